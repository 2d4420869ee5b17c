use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::papers::hash_text;

/// Text that represents a paper in embedding space.
pub fn paper_embedding_text(title: &str, abstract_text: &str) -> String {
    format!("{}\n\n{}", title.trim(), abstract_text.trim())
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EmbedStats {
    pub total: u64,
    pub embedded: u64,
    pub failed: u64,
}

/// Find and embed papers that are missing or have stale embeddings.
pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_size_override: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let pool = db::connect(config).await?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    let pending = find_pending_papers(&pool, provider.model_name(), limit, None).await?;

    if dry_run {
        println!("embed pending (dry-run)");
        println!("  papers needing embeddings: {}", pending.len());
        pool.close().await;
        return Ok(());
    }

    if pending.is_empty() {
        println!("embed pending");
        println!("  all papers up to date");
        pool.close().await;
        return Ok(());
    }

    let stats = embed_batches(&pool, provider.as_ref(), &pending, batch_size).await?;

    println!("embed pending");
    println!("  total pending: {}", stats.total);
    println!("  embedded: {}", stats.embedded);
    println!("  failed: {}", stats.failed);

    pool.close().await;
    Ok(())
}

/// Delete all embeddings and regenerate them.
///
/// Needed after switching models or dimensions; profiles built on the old
/// vectors are dropped as well.
pub async fn run_embed_rebuild(config: &Config, batch_size_override: Option<usize>) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let pool = db::connect(config).await?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    sqlx::query("DELETE FROM paper_embeddings")
        .execute(&pool)
        .await?;
    sqlx::query("DELETE FROM user_profiles").execute(&pool).await?;

    println!("embed rebuild: cleared existing embeddings");

    let all = find_pending_papers(&pool, provider.model_name(), None, None).await?;

    if all.is_empty() {
        println!("  no papers to embed");
        pool.close().await;
        return Ok(());
    }

    let stats = embed_batches(&pool, provider.as_ref(), &all, batch_size).await?;

    println!("embed rebuild");
    println!("  total papers: {}", stats.total);
    println!("  embedded: {}", stats.embedded);
    println!("  failed: {}", stats.failed);

    pool.close().await;
    Ok(())
}

/// Embed papers during ingest. Non-fatal on failure: returns
/// `(embedded, still_pending)`.
pub async fn embed_papers_inline(
    config: &Config,
    pool: &SqlitePool,
    paper_ids: &[String],
) -> (u64, u64) {
    if !config.embedding.is_enabled() || paper_ids.is_empty() {
        return (0, 0);
    }

    let provider = match embedding::create_provider(&config.embedding) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "could not create embedding provider");
            return (0, paper_ids.len() as u64);
        }
    };

    let pending =
        match find_pending_papers(pool, provider.model_name(), None, Some(paper_ids)).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "could not load papers to embed");
                return (0, paper_ids.len() as u64);
            }
        };
    let up_to_date = paper_ids.len() as u64 - pending.len() as u64;

    match embed_batches(pool, provider.as_ref(), &pending, config.embedding.batch_size)
        .await
    {
        Ok(stats) => (up_to_date + stats.embedded, stats.failed),
        Err(e) => {
            tracing::warn!(error = %e, "inline embedding failed");
            (up_to_date, pending.len() as u64)
        }
    }
}

struct PendingPaper {
    paper_id: String,
    text: String,
    text_hash: String,
}

async fn embed_batches(
    pool: &SqlitePool,
    provider: &dyn EmbeddingProvider,
    pending: &[PendingPaper],
    batch_size: usize,
) -> Result<EmbedStats> {
    let mut stats = EmbedStats {
        total: pending.len() as u64,
        ..Default::default()
    };

    for batch in pending.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();

        match provider.embed_batch(&texts).await {
            Ok(vectors) if vectors.len() == batch.len() => {
                for (item, vec) in batch.iter().zip(vectors.iter()) {
                    store_embedding(
                        pool,
                        &item.paper_id,
                        provider.model_name(),
                        provider.dims(),
                        &item.text_hash,
                        vec,
                    )
                    .await?;
                    stats.embedded += 1;
                }
            }
            Ok(vectors) => {
                tracing::warn!(
                    expected = batch.len(),
                    got = vectors.len(),
                    "embedding batch size mismatch"
                );
                stats.failed += batch.len() as u64;
            }
            Err(e) => {
                tracing::warn!(error = %e, "embedding batch failed");
                stats.failed += batch.len() as u64;
            }
        }
    }

    Ok(stats)
}

/// Papers with no embedding for `model`, or whose title/abstract changed
/// since they were embedded. `only` restricts the search to given ids.
async fn find_pending_papers(
    pool: &SqlitePool,
    model: &str,
    limit: Option<usize>,
    only: Option<&[String]>,
) -> Result<Vec<PendingPaper>> {
    let limit_val = limit.map(|l| l as i64).unwrap_or(i64::MAX);

    let rows = sqlx::query(
        r#"
        SELECT p.id, p.title, p.abstract, e.hash AS embedded_hash, e.model AS embedded_model
        FROM papers p
        LEFT JOIN paper_embeddings e ON e.paper_id = p.id
        ORDER BY p.published_at DESC, p.id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut results = Vec::new();
    for row in &rows {
        let id: String = row.get("id");
        if let Some(ids) = only {
            if !ids.contains(&id) {
                continue;
            }
        }

        let title: String = row.get("title");
        let abstract_text: String = row.get("abstract");
        let text = paper_embedding_text(&title, &abstract_text);
        let text_hash = hash_text(&text);

        let embedded_hash: Option<String> = row.get("embedded_hash");
        let embedded_model: Option<String> = row.get("embedded_model");
        if embedded_hash.as_deref() == Some(text_hash.as_str())
            && embedded_model.as_deref() == Some(model)
        {
            continue;
        }

        results.push(PendingPaper {
            paper_id: id,
            text,
            text_hash,
        });
        if results.len() as i64 >= limit_val {
            break;
        }
    }

    Ok(results)
}

/// Insert or replace the embedding for one paper.
pub async fn store_embedding(
    pool: &SqlitePool,
    paper_id: &str,
    model: &str,
    dims: usize,
    text_hash: &str,
    vector: &[f32],
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO paper_embeddings (paper_id, model, dims, hash, embedding, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(paper_id) DO UPDATE SET
            model = excluded.model,
            dims = excluded.dims,
            hash = excluded.hash,
            embedding = excluded.embedding,
            created_at = excluded.created_at
        "#,
    )
    .bind(paper_id)
    .bind(model)
    .bind(dims as i64)
    .bind(text_hash)
    .bind(embedding::vec_to_blob(vector))
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}
