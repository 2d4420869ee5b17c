//! Shared fixtures for unit tests.

use chrono::{Duration, Utc};
use sqlx::SqlitePool;

use crate::config::{parse_config, Config};
use crate::db;
use crate::models::{NewPaper, PaperSource};
use crate::papers::{self, UpsertOutcome};

/// Fresh migrated database in a temp directory. Keep the `TempDir` alive.
pub async fn setup() -> (tempfile::TempDir, Config, SqlitePool) {
    setup_with("").await
}

/// Like [`setup`], with extra TOML appended to the minimal config.
pub async fn setup_with(extra: &str) -> (tempfile::TempDir, Config, SqlitePool) {
    let tmp = tempfile::TempDir::new().unwrap();
    let text = format!(
        "[db]\npath = \"{}/pfeed.sqlite\"\n\n[server]\nbind = \"127.0.0.1:0\"\n\n[enrichment]\nartifacts_dir = \"{}/artifacts\"\n{}",
        tmp.path().display(),
        tmp.path().display(),
        extra
    );
    let config = parse_config(&text).unwrap();
    let pool = db::connect(&config).await.unwrap();
    crate::migrate::apply(&pool).await.unwrap();
    (tmp, config, pool)
}

/// A paper published `days_ago` days before now in `cs.CL`.
pub fn new_paper(source_id: &str, title: &str, days_ago: i64) -> NewPaper {
    let ts = Utc::now() - Duration::days(days_ago);
    NewPaper {
        source: PaperSource::Arxiv,
        source_id: source_id.to_string(),
        title: title.to_string(),
        abstract_text: format!("Abstract of {}", title),
        authors: vec![],
        categories: vec!["cs.CL".to_string()],
        primary_category: Some("cs.CL".to_string()),
        venue: None,
        url: None,
        pdf_url: None,
        published_at: ts,
        updated_at: ts,
    }
}

/// Insert a paper and return its id.
pub async fn insert_paper(
    pool: &SqlitePool,
    source_id: &str,
    title: &str,
    days_ago: i64,
) -> String {
    match papers::upsert_paper(pool, &new_paper(source_id, title, days_ago))
        .await
        .unwrap()
    {
        UpsertOutcome::Inserted(id) => id,
        other => panic!("expected insert, got {:?}", other),
    }
}
