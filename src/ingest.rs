//! Ingestion pipeline orchestration.
//!
//! Coordinates the flow: fetch (arXiv API, Atom file, or conference dump) →
//! normalize → validate → dedup → upsert → inline embedding. Supports
//! incremental runs via per-source checkpoints; inline embedding failures
//! never abort an ingest.

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::PathBuf;

use crate::arxiv::{self, ArxivClient};
use crate::conference;
use crate::config::Config;
use crate::db;
use crate::embed_cmd;
use crate::models::NewPaper;
use crate::papers::{self, UpsertOutcome};
use crate::progress::{IngestProgressEvent, IngestProgressReporter, ProgressMode};

/// Where papers come from.
#[derive(Debug, Clone)]
pub enum IngestTarget {
    /// Live arXiv API query. `None` falls back to `[arxiv]` config.
    Arxiv {
        categories: Option<Vec<String>>,
        max_results: Option<usize>,
    },
    /// A saved arXiv Atom response.
    AtomFile(PathBuf),
    /// A conference JSON / JSON-lines dump.
    ConferenceFile(PathBuf),
}

impl IngestTarget {
    /// Checkpoint key for this target.
    pub fn source_label(&self) -> &'static str {
        match self {
            IngestTarget::Arxiv { .. } | IngestTarget::AtomFile(_) => "arxiv",
            IngestTarget::ConferenceFile(_) => "conference",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Ignore the checkpoint and process every fetched paper.
    pub full: bool,
    pub dry_run: bool,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub fetched: u64,
    pub skipped_unchanged: u64,
    pub skipped_invalid: u64,
    pub duplicates: u64,
    pub inserted: u64,
    pub updated: u64,
    pub embedded: u64,
    pub embed_pending: u64,
    pub checkpoint: i64,
}

/// Fetch papers for `target` without touching the database.
pub async fn fetch(config: &Config, target: &IngestTarget) -> Result<Vec<NewPaper>> {
    match target {
        IngestTarget::Arxiv {
            categories,
            max_results,
        } => {
            let client = ArxivClient::new(&config.arxiv)?;
            let categories = categories
                .clone()
                .unwrap_or_else(|| config.arxiv.categories.clone());
            client
                .fetch_latest(&categories, max_results.unwrap_or(config.arxiv.max_results))
                .await
        }
        IngestTarget::AtomFile(path) => {
            let xml = std::fs::read_to_string(path)?;
            arxiv::parse_atom_feed(&xml)
        }
        IngestTarget::ConferenceFile(path) => conference::load_conference_file(path),
    }
}

/// Store already-fetched papers. This is the database half of an ingest run.
pub async fn ingest_papers(
    pool: &SqlitePool,
    config: &Config,
    source: &str,
    mut items: Vec<NewPaper>,
    options: &IngestOptions,
    progress: &dyn IngestProgressReporter,
) -> Result<IngestStats> {
    let mut stats = IngestStats {
        fetched: items.len() as u64,
        ..Default::default()
    };

    let checkpoint = if options.full {
        None
    } else {
        get_checkpoint(pool, source).await?
    };

    // Filter by checkpoint (skip papers not updated since the last run)
    if let Some(cp) = checkpoint {
        let before = items.len();
        items.retain(|item| item.updated_at.timestamp() > cp);
        stats.skipped_unchanged = (before - items.len()) as u64;
    }

    let before = items.len();
    items.retain(is_valid);
    stats.skipped_invalid = (before - items.len()) as u64;
    if stats.skipped_invalid > 0 {
        tracing::warn!(
            source,
            count = stats.skipped_invalid,
            "skipping papers with empty title, abstract or id"
        );
    }

    // Oldest first so the checkpoint advances monotonically
    items.sort_by_key(|item| item.updated_at);

    if let Some(lim) = options.limit {
        items.truncate(lim);
    }

    let mut max_updated = checkpoint.unwrap_or(0);

    if options.dry_run {
        stats.inserted = items.len() as u64;
        stats.checkpoint = max_updated;
        return Ok(stats);
    }

    let total = items.len() as u64;
    let mut touched = Vec::new();

    for (i, item) in items.iter().enumerate() {
        match papers::upsert_paper(pool, item).await? {
            UpsertOutcome::Inserted(id) => {
                stats.inserted += 1;
                touched.push(id);
            }
            UpsertOutcome::Updated(id) => {
                stats.updated += 1;
                touched.push(id);
            }
            UpsertOutcome::Unchanged(_) => stats.skipped_unchanged += 1,
            UpsertOutcome::Duplicate(existing) => {
                tracing::debug!(source_id = %item.source_id, %existing, "duplicate title");
                stats.duplicates += 1;
            }
        }

        let ts = item.updated_at.timestamp();
        if ts > max_updated {
            max_updated = ts;
        }

        if (i + 1) % 50 == 0 || (i + 1) as u64 == total {
            progress.report(IngestProgressEvent::Storing {
                source: source.to_string(),
                n: (i + 1) as u64,
                total,
            });
        }
    }

    // Inline embedding (non-fatal)
    let (embedded, pending) = embed_cmd::embed_papers_inline(config, pool, &touched).await;
    stats.embedded = embedded;
    stats.embed_pending = pending;

    set_checkpoint(pool, source, max_updated).await?;
    stats.checkpoint = max_updated;

    Ok(stats)
}

fn is_valid(item: &NewPaper) -> bool {
    !item.source_id.trim().is_empty()
        && !item.title.trim().is_empty()
        && !item.abstract_text.trim().is_empty()
}

/// CLI entry point for `pfeed ingest`.
pub async fn run_ingest(
    config: &Config,
    target: IngestTarget,
    options: IngestOptions,
    progress_mode: ProgressMode,
) -> Result<()> {
    let reporter = progress_mode.reporter();
    let source = target.source_label();

    reporter.report(IngestProgressEvent::Fetching {
        source: source.to_string(),
    });
    let items = fetch(config, &target).await?;

    let pool = db::connect(config).await?;
    let stats = ingest_papers(&pool, config, source, items, &options, reporter.as_ref()).await?;
    pool.close().await;

    if options.dry_run {
        println!("ingest {} (dry-run)", source);
        println!("  papers found: {}", stats.fetched);
        println!("  would store: {}", stats.inserted);
        println!("  skipped (unchanged): {}", stats.skipped_unchanged);
        println!("  skipped (invalid): {}", stats.skipped_invalid);
        return Ok(());
    }

    println!("ingest {}", source);
    println!("  fetched: {} papers", stats.fetched);
    println!("  inserted: {}", stats.inserted);
    println!("  updated: {}", stats.updated);
    println!("  skipped (unchanged): {}", stats.skipped_unchanged);
    println!("  skipped (invalid): {}", stats.skipped_invalid);
    println!("  duplicates: {}", stats.duplicates);
    if config.embedding.is_enabled() {
        println!("  embeddings written: {}", stats.embedded);
        println!("  embeddings pending: {}", stats.embed_pending);
    }
    println!("  checkpoint: {}", stats.checkpoint);
    println!("ok");

    Ok(())
}

pub async fn get_checkpoint(pool: &SqlitePool, source: &str) -> Result<Option<i64>> {
    let result: Option<String> =
        sqlx::query_scalar("SELECT cursor FROM checkpoints WHERE source = ?")
            .bind(source)
            .fetch_optional(pool)
            .await?;

    Ok(result.and_then(|s| s.parse::<i64>().ok()))
}

async fn set_checkpoint(pool: &SqlitePool, source: &str, cursor_val: i64) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO checkpoints (source, cursor, updated_at) VALUES (?, ?, ?)
        ON CONFLICT(source) DO UPDATE SET cursor = excluded.cursor, updated_at = excluded.updated_at
        "#,
    )
    .bind(source)
    .bind(cursor_val.to_string())
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}
