//! Personalized ranking.
//!
//! Pure functions over in-memory candidates; [`crate::recommend`] does the
//! database work around them. The pipeline for one user:
//!
//! ```text
//! filter_candidates(embedded) ─► score_candidates ─► rank ─┐
//!                                                          ├─► window ─► page
//! filter_candidates(all) ────────► exploration_list ───────┘
//! ```
//!
//! The personalized pool holds embedded papers only and is cut to
//! `pool_size` after that filter. Without a profile the unfiltered pool goes
//! through [`cold_start_rank`] instead.
//!
//! # Scoring
//!
//! ```text
//! score = cosine(profile, embedding) + recency_weight × 2^(−age_days / half_life)
//! ```
//!
//! Ties break on newer `published_at`, then on paper id, so the same inputs
//! always produce the same order.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::config::RankingConfig;
use crate::embedding::cosine_similarity;
use crate::models::RankingStrategy;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// A paper eligible for recommendation.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub paper_id: String,
    pub published_at: i64,
    pub categories: Vec<String>,
    pub embedding: Option<Vec<f32>>,
    /// Likes plus bookmarks across all users.
    pub popularity: u64,
}

/// A candidate placed in one of the ranked lists.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedItem {
    pub paper_id: String,
    pub published_at: i64,
    pub score: f64,
    pub strategy: RankingStrategy,
}

/// Narrow the candidate set for one user.
///
/// Keeps papers published within `candidate_days` of `now` that are not in
/// `excluded`, and with `require_embedding` only those with an embedding.
/// When `preferred` is non-empty only matching categories are kept, unless
/// that would leave nothing. The result is newest first and at most
/// `pool_size` long.
pub fn filter_candidates(
    candidates: Vec<Candidate>,
    now: i64,
    config: &RankingConfig,
    preferred: &[String],
    excluded: &HashSet<String>,
    require_embedding: bool,
) -> Vec<Candidate> {
    let cutoff = now - config.candidate_days * SECONDS_PER_DAY as i64;

    let mut pool: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| c.published_at >= cutoff && !excluded.contains(&c.paper_id))
        .filter(|c| !require_embedding || c.embedding.is_some())
        .collect();

    if !preferred.is_empty() {
        let matching: Vec<Candidate> = pool
            .iter()
            .filter(|c| c.categories.iter().any(|cat| preferred.contains(cat)))
            .cloned()
            .collect();
        if !matching.is_empty() {
            pool = matching;
        }
    }

    pool.sort_by(|a, b| {
        b.published_at
            .cmp(&a.published_at)
            .then_with(|| a.paper_id.cmp(&b.paper_id))
    });
    pool.truncate(config.pool_size);
    pool
}

/// `2^(−age / half_life)`; papers from the future count as brand new.
pub fn recency_decay(published_at: i64, now: i64, half_life_days: f64) -> f64 {
    let age_days = (now - published_at).max(0) as f64 / SECONDS_PER_DAY;
    (-age_days / half_life_days).exp2()
}

/// Score every candidate that has an embedding against `profile`.
pub fn score_candidates(
    pool: &[Candidate],
    profile: &[f32],
    now: i64,
    config: &RankingConfig,
) -> Vec<RankedItem> {
    pool.iter()
        .filter_map(|c| {
            let emb = c.embedding.as_ref()?;
            let similarity = cosine_similarity(profile, emb) as f64;
            let recency = config.recency_weight
                * recency_decay(c.published_at, now, config.recency_half_life_days);
            Some(RankedItem {
                paper_id: c.paper_id.clone(),
                published_at: c.published_at,
                score: similarity + recency,
                strategy: RankingStrategy::Personalized,
            })
        })
        .collect()
}

/// Sort by score descending, then newest, then paper id.
pub fn rank(items: &mut [RankedItem]) {
    items.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.published_at.cmp(&a.published_at))
            .then_with(|| a.paper_id.cmp(&b.paper_id))
    });
}

fn by_popularity(pool: &[Candidate], strategy: RankingStrategy) -> Vec<RankedItem> {
    let mut sorted: Vec<&Candidate> = pool.iter().collect();
    sorted.sort_by(|a, b| {
        b.popularity
            .cmp(&a.popularity)
            .then_with(|| b.published_at.cmp(&a.published_at))
            .then_with(|| a.paper_id.cmp(&b.paper_id))
    });
    sorted
        .into_iter()
        .map(|c| RankedItem {
            paper_id: c.paper_id.clone(),
            published_at: c.published_at,
            score: c.popularity as f64,
            strategy,
        })
        .collect()
}

/// Non-personalized list used to fill exploration slots: popular first,
/// then newest. The score is the popularity count.
pub fn exploration_list(pool: &[Candidate]) -> Vec<RankedItem> {
    by_popularity(pool, RankingStrategy::Exploration)
}

/// Feed for users without a profile, ordered like [`exploration_list`].
pub fn cold_start_rank(pool: &[Candidate], total: usize) -> Vec<RankedItem> {
    let mut items = by_popularity(pool, RankingStrategy::ColdStart);
    items.truncate(total);
    items
}

/// Merge the personalized and exploration lists into one feed of at most
/// `total` items.
///
/// `round(total × ratio)` slots go to `personal`, the rest to `exploration`.
/// Papers already taken are skipped, and a side that runs short is
/// back-filled from the other. Exploration items are spread evenly through
/// the feed rather than appended.
pub fn window(
    personal: &[RankedItem],
    exploration: &[RankedItem],
    total: usize,
    personalized_ratio: f64,
) -> Vec<RankedItem> {
    let personal_slots = ((total as f64 * personalized_ratio).round() as usize).min(total);
    let mut seen: HashSet<&str> = HashSet::new();

    let mut mine: Vec<&RankedItem> = Vec::new();
    for item in personal {
        if mine.len() >= personal_slots {
            break;
        }
        if seen.insert(item.paper_id.as_str()) {
            mine.push(item);
        }
    }

    let mut explore: Vec<&RankedItem> = Vec::new();
    for item in exploration {
        if mine.len() + explore.len() >= total {
            break;
        }
        if seen.insert(item.paper_id.as_str()) {
            explore.push(item);
        }
    }

    // Exploration ran short: top up with the next personalized items
    for item in personal {
        if mine.len() + explore.len() >= total {
            break;
        }
        if seen.insert(item.paper_id.as_str()) {
            mine.push(item);
        }
    }

    interleave(&mine, &explore)
}

/// Spread `b` through `a` at an even stride: with 8 personal and 2
/// exploration items, exploration lands at positions 4 and 9.
fn interleave(a: &[&RankedItem], b: &[&RankedItem]) -> Vec<RankedItem> {
    let n = a.len() + b.len();
    let mut out = Vec::with_capacity(n);
    let (mut ia, mut ib) = (0, 0);

    for i in 0..n {
        let due = (i + 1) * b.len() / n > ib;
        let take_b = ib < b.len() && (due || ia >= a.len());
        if take_b {
            out.push(b[ib].clone());
            ib += 1;
        } else {
            out.push(a[ia].clone());
            ia += 1;
        }
    }
    out
}

/// Apply `offset`/`limit` paging to a merged feed.
pub fn page(items: Vec<RankedItem>, offset: usize, limit: usize) -> Vec<RankedItem> {
    items.into_iter().skip(offset).take(limit).collect()
}
