//! Recommendation feeds: loads what [`crate::ranking`] needs from SQLite and
//! turns ranked ids back into papers.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet};

use crate::config::{Config, RankingConfig};
use crate::db;
use crate::embedding;
use crate::models::{parse_categories, RankingStrategy, Recommendation};
use crate::papers::{self, paper_from_row, PAPER_COLUMNS};
use crate::profile;
use crate::ranking::{self, Candidate, RankedItem};
use crate::users;

/// Papers inside the candidate window, with embeddings and popularity.
async fn load_candidates(pool: &SqlitePool, config: &Config, now: i64) -> Result<Vec<Candidate>> {
    let cutoff = now - config.ranking.candidate_days * 86_400;
    let rows = sqlx::query(
        r#"
        SELECT p.id, p.published_at, p.categories, e.embedding,
               (SELECT COUNT(*) FROM interactions i
                WHERE i.paper_id = p.id AND i.kind IN ('like', 'bookmark')) AS popularity
        FROM papers p
        LEFT JOIN paper_embeddings e ON e.paper_id = p.id
        WHERE p.published_at >= ?
        "#,
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let categories: String = row.get("categories");
            let blob: Option<Vec<u8>> = row.get("embedding");
            let popularity: i64 = row.get("popularity");
            Candidate {
                paper_id: row.get("id"),
                published_at: row.get("published_at"),
                categories: parse_categories(&categories),
                embedding: blob.map(|b| embedding::blob_to_vec(&b)),
                popularity: popularity.max(0) as u64,
            }
        })
        .collect())
}

/// Papers the user has already acted on (everything but views).
async fn excluded_papers(pool: &SqlitePool, user_id: &str) -> Result<HashSet<String>> {
    let ids: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT paper_id FROM interactions WHERE user_id = ? AND kind != 'view'",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(ids.into_iter().collect())
}

/// The user's full ranked feed, before paging.
async fn build_feed(pool: &SqlitePool, config: &Config, user_id: &str) -> Result<Vec<RankedItem>> {
    let user = users::require_user(pool, user_id).await?;
    let now = chrono::Utc::now().timestamp();
    let rc = &config.ranking;

    let excluded = excluded_papers(pool, &user.id).await?;
    let candidates = load_candidates(pool, config, now).await?;
    let filter = |candidates, require_embedding| {
        ranking::filter_candidates(
            candidates,
            now,
            rc,
            &user.categories,
            &excluded,
            require_embedding,
        )
    };

    match profile::current_profile(pool, config, &user.id).await? {
        Some(profile) => {
            let embedded_pool = filter(candidates.clone(), true);
            let candidate_pool = filter(candidates, false);
            let mut personal = ranking::score_candidates(&embedded_pool, &profile.vector, now, rc);
            ranking::rank(&mut personal);
            let exploration = ranking::exploration_list(&candidate_pool);
            tracing::debug!(
                user = %user.name,
                pool = candidate_pool.len(),
                embedded = embedded_pool.len(),
                scored = personal.len(),
                "personalized feed"
            );
            Ok(ranking::window(
                &personal,
                &exploration,
                rc.final_limit,
                rc.personalized_ratio,
            ))
        }
        None => {
            let candidate_pool = filter(candidates, false);
            tracing::debug!(user = %user.name, pool = candidate_pool.len(), "cold-start feed");
            Ok(ranking::cold_start_rank(&candidate_pool, rc.final_limit))
        }
    }
}

/// Attach paper rows to ranked items, numbering ranks from `offset + 1`.
async fn hydrate(
    pool: &SqlitePool,
    items: Vec<RankedItem>,
    offset: usize,
) -> Result<Vec<Recommendation>> {
    if items.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; items.len()].join(", ");
    let sql = format!(
        "SELECT {} FROM papers p WHERE p.id IN ({})",
        PAPER_COLUMNS, placeholders
    );
    let mut query = sqlx::query(&sql);
    for item in &items {
        query = query.bind(&item.paper_id);
    }
    let mut by_id = HashMap::new();
    for row in query.fetch_all(pool).await? {
        let paper = paper_from_row(&row)?;
        by_id.insert(paper.id.clone(), paper);
    }

    Ok(items
        .into_iter()
        .enumerate()
        .filter_map(|(i, item)| {
            let paper = by_id.remove(&item.paper_id)?;
            Some(Recommendation {
                rank: offset + i + 1,
                score: item.score,
                strategy: item.strategy,
                paper,
            })
        })
        .collect())
}

/// Ranked recommendations for one user, `limit` items starting at `offset`.
pub async fn recommend_for_user(
    pool: &SqlitePool,
    config: &Config,
    user_id: &str,
    offset: usize,
    limit: usize,
) -> Result<Vec<Recommendation>> {
    let feed = build_feed(pool, config, user_id).await?;
    let paged = ranking::page(feed, offset, limit);
    hydrate(pool, paged, offset).await
}

/// Recompute and persist the feed snapshot for one user. Returns the number
/// of stored rows and whether the user was in cold start.
pub async fn refresh_recommendations(
    pool: &SqlitePool,
    config: &Config,
    user_id: &str,
) -> Result<(usize, bool)> {
    let feed = build_feed(pool, config, user_id).await?;
    let cold = feed
        .first()
        .map(|r| r.strategy == RankingStrategy::ColdStart)
        .unwrap_or(true);
    let now = chrono::Utc::now().timestamp();

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM recommendations WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    for (i, item) in feed.iter().enumerate() {
        sqlx::query(
            "INSERT INTO recommendations (user_id, paper_id, rank, score, strategy, generated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(&item.paper_id)
        .bind((i + 1) as i64)
        .bind(item.score)
        .bind(item.strategy.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    Ok((feed.len(), cold))
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshStats {
    pub users: u64,
    pub cold_start: u64,
    pub recommendations: u64,
    pub failed: u64,
}

/// Refresh every user's snapshot. A failing user is logged and skipped.
pub async fn refresh_all(pool: &SqlitePool, config: &Config) -> Result<RefreshStats> {
    let mut stats = RefreshStats::default();
    for user in users::list_users(pool).await? {
        match refresh_recommendations(pool, config, &user.id).await {
            Ok((n, cold)) => {
                stats.users += 1;
                stats.recommendations += n as u64;
                if cold {
                    stats.cold_start += 1;
                }
            }
            Err(e) => {
                tracing::warn!(user = %user.name, error = %e, "refresh failed");
                stats.failed += 1;
            }
        }
    }
    Ok(stats)
}

/// The last persisted snapshot, in rank order.
pub async fn stored_recommendations(
    pool: &SqlitePool,
    user_id: &str,
    offset: usize,
    limit: usize,
) -> Result<Vec<Recommendation>> {
    let sql = format!(
        r#"
        SELECT {}, r.rank, r.score, r.strategy
        FROM recommendations r
        JOIN papers p ON p.id = r.paper_id
        WHERE r.user_id = ?
        ORDER BY r.rank ASC
        LIMIT ? OFFSET ?
        "#,
        PAPER_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(user_id)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|row| -> Result<Recommendation> {
            let rank: i64 = row.get("rank");
            let strategy: String = row.get("strategy");
            Ok(Recommendation {
                rank: rank as usize,
                score: row.get("score"),
                strategy: strategy.parse()?,
                paper: paper_from_row(row)?,
            })
        })
        .collect()
}

/// Papers whose embeddings are closest to `paper_id`, within the candidate
/// window. Errors when the paper has no embedding yet.
pub async fn similar_papers(
    pool: &SqlitePool,
    config: &Config,
    paper_id: &str,
    limit: usize,
) -> Result<Vec<Recommendation>> {
    let blob: Option<Vec<u8>> =
        sqlx::query_scalar("SELECT embedding FROM paper_embeddings WHERE paper_id = ?")
            .bind(paper_id)
            .fetch_optional(pool)
            .await?;
    let Some(blob) = blob else {
        if papers::find_paper(pool, paper_id).await?.is_none() {
            bail!("paper not found: {}", paper_id);
        }
        bail!("paper {} has no embedding yet", paper_id);
    };
    let target = embedding::blob_to_vec(&blob);

    let now = chrono::Utc::now().timestamp();
    let candidates: Vec<Candidate> = load_candidates(pool, config, now)
        .await?
        .into_iter()
        .filter(|c| c.paper_id != paper_id)
        .collect();

    let no_recency = RankingConfig {
        recency_weight: 0.0,
        ..config.ranking.clone()
    };
    let mut scored = ranking::score_candidates(&candidates, &target, now, &no_recency);
    ranking::rank(&mut scored);
    scored.truncate(limit);
    hydrate(pool, scored, 0).await
}

// ============ CLI entry points ============

pub async fn run_recommend(
    config: &Config,
    user: &str,
    offset: usize,
    limit: Option<usize>,
    cached: bool,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let user = users::require_user(&pool, user).await?;
    let limit = limit.unwrap_or(config.ranking.final_limit);

    let recs = if cached {
        stored_recommendations(&pool, &user.id, offset, limit).await?
    } else {
        recommend_for_user(&pool, config, &user.id, offset, limit).await?
    };
    pool.close().await;

    if recs.is_empty() {
        println!("No recommendations for {}.", user.name);
        return Ok(());
    }

    println!("recommendations for {}", user.name);
    for r in &recs {
        println!(
            "{:>3}. [{:.3}] {:<12} {}  {}",
            r.rank,
            r.score,
            r.strategy.as_str(),
            r.paper.id,
            r.paper.title
        );
    }
    Ok(())
}

pub async fn run_refresh(config: &Config, user: Option<&str>) -> Result<()> {
    let pool = db::connect(config).await?;

    match user {
        Some(name) => {
            let user = users::require_user(&pool, name).await?;
            let (n, cold) = refresh_recommendations(&pool, config, &user.id).await?;
            println!("refresh {}", user.name);
            println!("  recommendations: {}", n);
            println!("  cold start: {}", cold);
        }
        None => {
            let stats = refresh_all(&pool, config).await?;
            println!("refresh");
            println!("  users: {}", stats.users);
            println!("  cold start: {}", stats.cold_start);
            println!("  recommendations: {}", stats.recommendations);
            println!("  failed: {}", stats.failed);
        }
    }

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed_cmd::store_embedding;
    use crate::models::InteractionKind;
    use crate::testutil;

    #[tokio::test]
    async fn cold_start_then_personalized() {
        let (_tmp, config, pool) = testutil::setup_with(
            "\n[ranking]\nmin_interactions = 1\npool_size = 10\nfinal_limit = 4\npersonalized_ratio = 0.75\n",
        )
        .await;

        let liked = testutil::insert_paper(&pool, "liked", "Liked paper", 1).await;
        let near = testutil::insert_paper(&pool, "near", "Near paper", 2).await;
        let far = testutil::insert_paper(&pool, "far", "Far paper", 0).await;
        let popular = testutil::insert_paper(&pool, "popular", "Popular paper", 5).await;
        let stale = testutil::insert_paper(&pool, "stale", "Stale paper", 90).await;

        store_embedding(&pool, &liked, "m", 2, "h", &[1.0, 0.0]).await.unwrap();
        store_embedding(&pool, &near, "m", 2, "h", &[0.9, 0.1]).await.unwrap();
        store_embedding(&pool, &far, "m", 2, "h", &[0.0, 1.0]).await.unwrap();

        let fan = users::create_user(&pool, "fan", &[], "en").await.unwrap();
        users::record_interaction(&pool, &fan.id, &popular, InteractionKind::Bookmark)
            .await
            .unwrap();

        let user = users::create_user(&pool, "reader", &[], "en").await.unwrap();
        let recs = recommend_for_user(&pool, &config, &user.id, 0, 10).await.unwrap();
        assert!(recs.iter().all(|r| r.strategy == RankingStrategy::ColdStart));
        assert_eq!(recs[0].paper.id, popular);
        assert!(recs.iter().all(|r| r.paper.id != stale));

        users::record_interaction(&pool, &user.id, &liked, InteractionKind::Like)
            .await
            .unwrap();
        let recs = recommend_for_user(&pool, &config, &user.id, 0, 10).await.unwrap();
        assert_eq!(recs.len(), 3);
        assert!(recs.iter().all(|r| r.paper.id != liked));
        assert_eq!(recs[0].paper.id, near);
        assert_eq!(recs[0].strategy, RankingStrategy::Personalized);
        assert_eq!(recs[0].rank, 1);

        let page = recommend_for_user(&pool, &config, &user.id, 1, 1).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].rank, 2);
    }

    #[tokio::test]
    async fn unembedded_newcomers_do_not_crowd_out_scored_papers() {
        let (_tmp, config, pool) = testutil::setup_with(
            "\n[ranking]\nmin_interactions = 1\npool_size = 2\nfinal_limit = 2\npersonalized_ratio = 1.0\n",
        )
        .await;

        let liked = testutil::insert_paper(&pool, "liked", "Liked paper", 1).await;
        let near = testutil::insert_paper(&pool, "near", "Near paper", 4).await;
        testutil::insert_paper(&pool, "fresh-1", "Fresh one", 0).await;
        testutil::insert_paper(&pool, "fresh-2", "Fresh two", 0).await;
        store_embedding(&pool, &liked, "m", 2, "h", &[1.0, 0.0]).await.unwrap();
        store_embedding(&pool, &near, "m", 2, "h", &[0.9, 0.1]).await.unwrap();

        let user = users::create_user(&pool, "reader", &[], "en").await.unwrap();
        users::record_interaction(&pool, &user.id, &liked, InteractionKind::Like)
            .await
            .unwrap();

        let recs = recommend_for_user(&pool, &config, &user.id, 0, 10).await.unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].paper.id, near);
        assert_eq!(recs[0].strategy, RankingStrategy::Personalized);
        assert_eq!(recs[1].strategy, RankingStrategy::Exploration);
        assert!(recs[1].paper.title.starts_with("Fresh"));
    }

    #[tokio::test]
    async fn refresh_persists_snapshot() {
        let (_tmp, config, pool) = testutil::setup().await;
        testutil::insert_paper(&pool, "a", "Paper A", 1).await;
        testutil::insert_paper(&pool, "b", "Paper B", 2).await;
        let user = users::create_user(&pool, "u", &[], "en").await.unwrap();

        let stats = refresh_all(&pool, &config).await.unwrap();
        assert_eq!(stats.users, 1);
        assert_eq!(stats.cold_start, 1);
        assert_eq!(stats.recommendations, 2);

        let stored = stored_recommendations(&pool, &user.id, 0, 10).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].rank, 1);
        assert_eq!(stored[0].strategy, RankingStrategy::ColdStart);
    }

    #[tokio::test]
    async fn similar_papers_by_cosine() {
        let (_tmp, config, pool) = testutil::setup().await;
        let a = testutil::insert_paper(&pool, "a", "Paper A", 1).await;
        let b = testutil::insert_paper(&pool, "b", "Paper B", 1).await;
        let c = testutil::insert_paper(&pool, "c", "Paper C", 1).await;
        let bare = testutil::insert_paper(&pool, "d", "Paper D", 1).await;
        store_embedding(&pool, &a, "m", 2, "h", &[1.0, 0.0]).await.unwrap();
        store_embedding(&pool, &b, "m", 2, "h", &[0.0, 1.0]).await.unwrap();
        store_embedding(&pool, &c, "m", 2, "h", &[0.8, 0.2]).await.unwrap();

        let similar = similar_papers(&pool, &config, &a, 5).await.unwrap();
        let ids: Vec<&str> = similar.iter().map(|r| r.paper.id.as_str()).collect();
        assert_eq!(ids, vec![c.as_str(), b.as_str()]);

        let err = similar_papers(&pool, &config, &bare, 5).await.unwrap_err();
        assert!(err.to_string().contains("no embedding"));
        let err = similar_papers(&pool, &config, "nope", 5).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
