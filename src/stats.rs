//! Database statistics and health overview.
//!
//! A quick summary of what the feed holds: papers per source, embedding
//! coverage, users, interactions, the enrichment queue, and when each source
//! was last ingested. Used by `pfeed stats` to confirm batch jobs are running.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FeedStats {
    pub papers: i64,
    pub embedded: i64,
    pub users: i64,
    pub interactions: i64,
    /// `(source, papers, embedded)`, largest first.
    pub by_source: Vec<(String, i64, i64)>,
    /// `(status, count)` for content artifacts.
    pub artifacts: Vec<(String, i64)>,
    /// `(source, last ingest unix time)`.
    pub checkpoints: Vec<(String, i64)>,
}

pub async fn collect_stats(pool: &SqlitePool) -> Result<FeedStats> {
    let papers: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM papers")
        .fetch_one(pool)
        .await?;
    let embedded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM paper_embeddings")
        .fetch_one(pool)
        .await?;
    let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;
    let interactions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM interactions")
        .fetch_one(pool)
        .await?;

    let by_source: Vec<(String, i64, i64)> = sqlx::query(
        r#"
        SELECT p.source, COUNT(*) AS paper_count, COUNT(e.paper_id) AS embedded_count
        FROM papers p
        LEFT JOIN paper_embeddings e ON e.paper_id = p.id
        GROUP BY p.source
        ORDER BY paper_count DESC
        "#,
    )
    .fetch_all(pool)
    .await?
    .iter()
    .map(|row| {
        (
            row.get("source"),
            row.get("paper_count"),
            row.get("embedded_count"),
        )
    })
    .collect();

    let artifacts: Vec<(String, i64)> = sqlx::query(
        "SELECT status, COUNT(*) AS n FROM content_artifacts GROUP BY status ORDER BY status",
    )
    .fetch_all(pool)
    .await?
    .iter()
    .map(|row| (row.get("status"), row.get("n")))
    .collect();

    let checkpoints: Vec<(String, i64)> =
        sqlx::query("SELECT source, updated_at FROM checkpoints ORDER BY source")
            .fetch_all(pool)
            .await?
            .iter()
            .map(|row| (row.get("source"), row.get("updated_at")))
            .collect();

    Ok(FeedStats {
        papers,
        embedded,
        users,
        interactions,
        by_source,
        artifacts,
        checkpoints,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = collect_stats(&pool).await?;
    pool.close().await;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Paper Feed: Database Stats");
    println!("==========================");
    println!();
    println!("  Database:      {}", config.db.path.display());
    println!("  Size:          {}", format_bytes(db_size));
    println!();
    println!("  Papers:        {}", stats.papers);
    println!(
        "  Embedded:      {} / {} ({}%)",
        stats.embedded,
        stats.papers,
        if stats.papers > 0 {
            (stats.embedded * 100) / stats.papers
        } else {
            0
        }
    );
    println!("  Users:         {}", stats.users);
    println!("  Interactions:  {}", stats.interactions);

    if !stats.by_source.is_empty() {
        println!();
        println!("  By source:");
        println!(
            "  {:<16} {:>8} {:>10}   {}",
            "SOURCE", "PAPERS", "EMBEDDED", "LAST INGEST"
        );
        println!("  {}", "-".repeat(56));

        for (source, count, embedded) in &stats.by_source {
            let last = stats
                .checkpoints
                .iter()
                .find(|(s, _)| s == source)
                .map(|(_, ts)| format_ts_relative(*ts))
                .unwrap_or_else(|| "never".to_string());
            println!("  {:<16} {:>8} {:>10}   {}", source, count, embedded, last);
        }
    }

    if !stats.artifacts.is_empty() {
        println!();
        println!("  Artifacts:");
        for (status, n) in &stats.artifacts {
            println!("    {:<10} {}", status, n);
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
