//! Paper retrieval by ID.
//!
//! Fetches a paper with every content artifact generated for it. Used by the
//! `pfeed get` CLI command and the `GET /papers/{id}` endpoint.

use anyhow::{bail, Result};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::enrichment;
use crate::models::{ContentArtifact, Paper};
use crate::papers;

#[derive(Debug, Clone, Serialize)]
pub struct PaperResponse {
    #[serde(flatten)]
    pub paper: Paper,
    pub published: String, // ISO8601
    pub artifacts: Vec<ContentArtifact>,
}

pub async fn get_paper(pool: &SqlitePool, id: &str) -> Result<PaperResponse> {
    let Some(paper) = papers::find_paper(pool, id).await? else {
        bail!("paper not found: {}", id);
    };
    let artifacts = enrichment::list_artifacts(pool, id).await?;

    Ok(PaperResponse {
        published: format_ts_iso(paper.published_at),
        paper,
        artifacts,
    })
}

/// CLI entry point: prints the paper and its artifacts to stdout.
pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let resp = get_paper(&pool, id).await;
    pool.close().await;
    let resp = resp?;
    let p = &resp.paper;

    println!("--- Paper ---");
    println!("id:         {}", p.id);
    println!("title:      {}", p.title);
    println!("source:     {} ({})", p.source, p.source_id);
    let authors: Vec<&str> = p.authors.iter().map(|a| a.name.as_str()).collect();
    if !authors.is_empty() {
        println!("authors:    {}", authors.join(", "));
    }
    println!("categories: {}", p.categories.join(" "));
    if let Some(ref venue) = p.venue {
        println!("venue:      {}", venue);
    }
    if let Some(ref url) = p.url {
        println!("url:        {}", url);
    }
    if let Some(ref pdf) = p.pdf_url {
        println!("pdf:        {}", pdf);
    }
    println!("published:  {}", resp.published);
    println!();

    println!("--- Abstract ---");
    println!("{}", p.abstract_text);
    println!();

    println!("--- Artifacts ({}) ---", resp.artifacts.len());
    for a in &resp.artifacts {
        let location = a
            .file_path
            .as_deref()
            .map(|f| format!(" -> {}", f))
            .unwrap_or_default();
        println!(
            "[{} {}] {} (attempts: {}){}",
            a.kind,
            a.language,
            a.status.as_str(),
            a.attempts,
            location
        );
        if let Some(ref err) = a.error {
            println!("  error: {}", err);
        }
        if let Some(ref body) = a.body {
            println!("{}", body);
        }
        println!();
    }

    Ok(())
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentKind;
    use crate::testutil;

    #[tokio::test]
    async fn includes_artifacts() {
        let (_tmp, _config, pool) = testutil::setup().await;
        let id = testutil::insert_paper(&pool, "x", "Some Paper", 0).await;
        enrichment::request_content(&pool, &id, ContentKind::Translation, "fr")
            .await
            .unwrap();

        let resp = get_paper(&pool, &id).await.unwrap();
        assert_eq!(resp.paper.title, "Some Paper");
        assert_eq!(resp.artifacts.len(), 1);
        assert!(resp.published.ends_with('Z'));

        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["abstract"], "Abstract of Some Paper");
        assert_eq!(json["artifacts"][0]["kind"], "translation");

        assert!(get_paper(&pool, "missing").await.is_err());
    }
}
