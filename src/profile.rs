//! User profile vectors.
//!
//! A profile is the weighted mean of the unit-length embeddings of every
//! paper a user interacted with, re-normalized to unit length. Weights come
//! from [`InteractionKind::profile_weight`], so dislikes pull the profile
//! away from what the user rejected.
//!
//! Users below `ranking.min_interactions` positive interactions (likes and
//! bookmarks on embedded papers) have no profile and get the cold-start feed.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::embedding;
use crate::models::InteractionKind;

#[derive(Debug, Clone)]
pub struct UserProfile {
    pub user_id: String,
    pub model: String,
    pub vector: Vec<f32>,
    /// Interactions (of any kind) that went into the vector.
    pub interaction_count: usize,
    pub updated_at: i64,
}

/// Build a profile vector from `(kind, embedding)` pairs.
///
/// Vectors whose length differs from the first one are ignored.
pub fn compute_profile(
    signals: &[(InteractionKind, Vec<f32>)],
    min_interactions: usize,
) -> Option<Vec<f32>> {
    let dims = signals.first()?.1.len();
    let usable: Vec<&(InteractionKind, Vec<f32>)> =
        signals.iter().filter(|(_, v)| v.len() == dims).collect();

    let positives = usable.iter().filter(|(k, _)| k.is_positive()).count();
    if positives < min_interactions.max(1) {
        return None;
    }

    let mut acc = vec![0.0f32; dims];
    for (kind, vec) in usable {
        let Some(unit) = embedding::normalize(vec) else {
            continue;
        };
        let w = kind.profile_weight();
        for (a, x) in acc.iter_mut().zip(unit.iter()) {
            *a += w * x;
        }
    }

    embedding::normalize(&acc)
}

/// Interactions of `user_id` on papers that have an embedding.
async fn load_signals(
    pool: &SqlitePool,
    user_id: &str,
) -> Result<Vec<(InteractionKind, Vec<f32>)>> {
    let rows = sqlx::query(
        r#"
        SELECT i.kind, e.embedding
        FROM interactions i
        JOIN paper_embeddings e ON e.paper_id = i.paper_id
        WHERE i.user_id = ?
        ORDER BY i.created_at ASC, i.paper_id ASC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        let kind: String = row.get("kind");
        let blob: Vec<u8> = row.get("embedding");
        out.push((kind.parse()?, embedding::blob_to_vec(&blob)));
    }
    Ok(out)
}

/// Recompute and cache the profile. Removes the cached row when the user is
/// back in cold start.
pub async fn refresh_profile(
    pool: &SqlitePool,
    config: &Config,
    user_id: &str,
) -> Result<Option<UserProfile>> {
    let signals = load_signals(pool, user_id).await?;
    let interaction_count = interaction_count(pool, user_id).await?;

    let Some(vector) = compute_profile(&signals, config.ranking.min_interactions) else {
        sqlx::query("DELETE FROM user_profiles WHERE user_id = ?")
            .bind(user_id)
            .execute(pool)
            .await?;
        return Ok(None);
    };

    let profile = UserProfile {
        user_id: user_id.to_string(),
        model: config.embedding.model.clone().unwrap_or_default(),
        interaction_count,
        updated_at: chrono::Utc::now().timestamp(),
        vector,
    };

    sqlx::query(
        r#"
        INSERT INTO user_profiles (user_id, model, dims, vector, interaction_count, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(user_id) DO UPDATE SET
            model = excluded.model,
            dims = excluded.dims,
            vector = excluded.vector,
            interaction_count = excluded.interaction_count,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&profile.user_id)
    .bind(&profile.model)
    .bind(profile.vector.len() as i64)
    .bind(embedding::vec_to_blob(&profile.vector))
    .bind(profile.interaction_count as i64)
    .bind(profile.updated_at)
    .execute(pool)
    .await?;

    tracing::debug!(user_id, interactions = interaction_count, "profile refreshed");
    Ok(Some(profile))
}

pub async fn load_profile(pool: &SqlitePool, user_id: &str) -> Result<Option<UserProfile>> {
    let row = sqlx::query(
        "SELECT user_id, model, vector, interaction_count, updated_at FROM user_profiles WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| {
        let blob: Vec<u8> = row.get("vector");
        let count: i64 = row.get("interaction_count");
        UserProfile {
            user_id: row.get("user_id"),
            model: row.get("model"),
            vector: embedding::blob_to_vec(&blob),
            interaction_count: count as usize,
            updated_at: row.get("updated_at"),
        }
    }))
}

/// Cached profile when it is still current, otherwise a fresh one.
///
/// The cache is stale once the interaction count changes, an interaction is
/// newer than the cached vector, one of the user's papers was embedded (or
/// re-embedded) since, or the embedding model was switched.
pub async fn current_profile(
    pool: &SqlitePool,
    config: &Config,
    user_id: &str,
) -> Result<Option<UserProfile>> {
    if let Some(cached) = load_profile(pool, user_id).await? {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT MAX(created_at) FROM interactions WHERE user_id = ?1) AS last_interaction,
                (SELECT MAX(e.created_at)
                 FROM interactions i
                 JOIN paper_embeddings e ON e.paper_id = i.paper_id
                 WHERE i.user_id = ?1) AS last_embedding
            "#,
        )
        .bind(user_id)
        .fetch_one(pool)
        .await?;
        let last_interaction: Option<i64> = row.get("last_interaction");
        let last_embedding: Option<i64> = row.get("last_embedding");

        let count = interaction_count(pool, user_id).await?;
        let model = config.embedding.model.as_deref().unwrap_or_default();
        if count == cached.interaction_count
            && last_interaction.unwrap_or(0) < cached.updated_at
            && last_embedding.unwrap_or(0) < cached.updated_at
            && cached.model == model
        {
            return Ok(Some(cached));
        }
    }
    refresh_profile(pool, config, user_id).await
}

async fn interaction_count(pool: &SqlitePool, user_id: &str) -> Result<usize> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM interactions WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await?;
    Ok(count as usize)
}
