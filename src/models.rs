//! Core data models used throughout Paper Feed.
//!
//! Papers flow in from arXiv or conference dumps as [`NewPaper`]s, are stored
//! as [`Paper`]s, collect [`Interaction`]s from users, and come back out as
//! [`Recommendation`]s and [`ContentArtifact`]s.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a paper was ingested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaperSource {
    Arxiv,
    Conference,
}

impl PaperSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaperSource::Arxiv => "arxiv",
            PaperSource::Conference => "conference",
        }
    }
}

impl FromStr for PaperSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "arxiv" => Ok(PaperSource::Arxiv),
            "conference" => Ok(PaperSource::Conference),
            other => bail!("unknown paper source: {}", other),
        }
    }
}

impl fmt::Display for PaperSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliation: Option<String>,
}

/// Normalized paper produced by a fetcher, before it gets an id.
#[derive(Debug, Clone)]
pub struct NewPaper {
    pub source: PaperSource,
    pub source_id: String,
    pub title: String,
    pub abstract_text: String,
    pub authors: Vec<Author>,
    pub categories: Vec<String>,
    pub primary_category: Option<String>,
    pub venue: Option<String>,
    pub url: Option<String>,
    pub pdf_url: Option<String>,
    pub published_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Paper stored in SQLite.
#[derive(Debug, Clone, Serialize)]
pub struct Paper {
    pub id: String,
    pub source: PaperSource,
    pub source_id: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub authors: Vec<Author>,
    pub categories: Vec<String>,
    pub primary_category: Option<String>,
    pub venue: Option<String>,
    pub url: Option<String>,
    pub pdf_url: Option<String>,
    pub published_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub categories: Vec<String>,
    pub language: String,
    pub created_at: i64,
}

/// What a user did with a paper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    View,
    Like,
    Bookmark,
    Dislike,
}

impl InteractionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionKind::View => "view",
            InteractionKind::Like => "like",
            InteractionKind::Bookmark => "bookmark",
            InteractionKind::Dislike => "dislike",
        }
    }

    /// Contribution of one interaction to the user's profile vector.
    pub fn profile_weight(&self) -> f32 {
        match self {
            InteractionKind::Bookmark => 1.5,
            InteractionKind::Like => 1.0,
            InteractionKind::View => 0.2,
            InteractionKind::Dislike => -1.0,
        }
    }

    /// Likes and bookmarks count toward the cold-start threshold and popularity.
    pub fn is_positive(&self) -> bool {
        matches!(self, InteractionKind::Like | InteractionKind::Bookmark)
    }

    /// Papers with these interactions are never recommended again.
    pub fn excludes_from_feed(&self) -> bool {
        !matches!(self, InteractionKind::View)
    }
}

impl FromStr for InteractionKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "view" => Ok(InteractionKind::View),
            "like" => Ok(InteractionKind::Like),
            "bookmark" => Ok(InteractionKind::Bookmark),
            "dislike" => Ok(InteractionKind::Dislike),
            other => bail!(
                "invalid interaction kind: '{}'. Use view, like, bookmark, or dislike.",
                other
            ),
        }
    }
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Interaction {
    pub user_id: String,
    pub paper_id: String,
    pub kind: InteractionKind,
    pub created_at: i64,
}

/// Which list a recommended paper came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingStrategy {
    Personalized,
    Exploration,
    ColdStart,
}

impl RankingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankingStrategy::Personalized => "personalized",
            RankingStrategy::Exploration => "exploration",
            RankingStrategy::ColdStart => "cold_start",
        }
    }
}

impl FromStr for RankingStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "personalized" => Ok(RankingStrategy::Personalized),
            "exploration" => Ok(RankingStrategy::Exploration),
            "cold_start" => Ok(RankingStrategy::ColdStart),
            other => bail!("unknown ranking strategy: {}", other),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub rank: usize,
    pub score: f64,
    pub strategy: RankingStrategy,
    pub paper: Paper,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Translation,
    Interpretation,
    Speech,
    Infographic,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Translation => "translation",
            ContentKind::Interpretation => "interpretation",
            ContentKind::Speech => "speech",
            ContentKind::Infographic => "infographic",
        }
    }
}

impl FromStr for ContentKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "translation" => Ok(ContentKind::Translation),
            "interpretation" => Ok(ContentKind::Interpretation),
            "speech" | "tts" => Ok(ContentKind::Speech),
            "infographic" => Ok(ContentKind::Infographic),
            other => bail!(
                "invalid content kind: '{}'. Use translation, interpretation, speech, or infographic.",
                other
            ),
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Pending => "pending",
            ContentStatus::Running => "running",
            ContentStatus::Done => "done",
            ContentStatus::Failed => "failed",
        }
    }
}

impl FromStr for ContentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ContentStatus::Pending),
            "running" => Ok(ContentStatus::Running),
            "done" => Ok(ContentStatus::Done),
            "failed" => Ok(ContentStatus::Failed),
            other => bail!("unknown content status: {}", other),
        }
    }
}

/// AI-derived content attached to a paper.
#[derive(Debug, Clone, Serialize)]
pub struct ContentArtifact {
    pub id: String,
    pub paper_id: String,
    pub kind: ContentKind,
    pub language: String,
    pub status: ContentStatus,
    pub body: Option<String>,
    pub file_path: Option<String>,
    pub mime_type: Option<String>,
    pub model: Option<String>,
    pub error: Option<String>,
    pub attempts: i64,
    pub updated_at: i64,
}

/// Split a space- or comma-separated category list.
pub fn parse_categories(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}
