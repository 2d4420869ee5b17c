//! Conference paper import.
//!
//! Conference proceedings arrive as JSON dumps rather than an API. A file is
//! either a JSON array or JSON lines, one object per paper:
//!
//! ```json
//! {"id": "acl-2024-112", "title": "...", "abstract": "...",
//!  "authors": ["A. Author", {"name": "B. Author", "affiliation": "Lab"}],
//!  "venue": "ACL 2024", "year": 2024, "url": "https://...",
//!  "categories": ["cs.CL"]}
//! ```
//!
//! When no `published` timestamp is given, the paper is dated January 1st of
//! `year`.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::path::Path;

use crate::models::{Author, NewPaper, PaperSource};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawAuthor {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        affiliation: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct RawConferencePaper {
    id: String,
    title: String,
    #[serde(rename = "abstract", default)]
    abstract_text: String,
    #[serde(default)]
    authors: Vec<RawAuthor>,
    #[serde(default)]
    venue: Option<String>,
    #[serde(default)]
    year: Option<i32>,
    #[serde(default)]
    published: Option<DateTime<Utc>>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    pdf_url: Option<String>,
    #[serde(default)]
    categories: Vec<String>,
}

impl RawConferencePaper {
    fn into_paper(self) -> Result<NewPaper> {
        let published_at = match (self.published, self.year) {
            (Some(ts), _) => ts,
            (None, Some(year)) => Utc
                .with_ymd_and_hms(year, 1, 1, 0, 0, 0)
                .single()
                .ok_or_else(|| anyhow::anyhow!("invalid year {} for paper {}", year, self.id))?,
            (None, None) => bail!("paper {} has neither 'published' nor 'year'", self.id),
        };

        let authors = self
            .authors
            .into_iter()
            .map(|a| match a {
                RawAuthor::Name(name) => Author {
                    name,
                    affiliation: None,
                },
                RawAuthor::Full { name, affiliation } => Author { name, affiliation },
            })
            .collect();

        Ok(NewPaper {
            source: PaperSource::Conference,
            source_id: self.id,
            title: self.title.trim().to_string(),
            abstract_text: self.abstract_text.trim().to_string(),
            authors,
            primary_category: self.categories.first().cloned(),
            categories: self.categories,
            venue: self.venue,
            url: self.url,
            pdf_url: self.pdf_url,
            published_at,
            updated_at: published_at,
        })
    }
}

/// Parse conference papers from JSON array or JSON-lines text.
pub fn parse_conference_json(text: &str) -> Result<Vec<NewPaper>> {
    let trimmed = text.trim_start();
    let raw: Vec<RawConferencePaper> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).context("Invalid conference JSON array")?
    } else {
        trimmed
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str(line)
                    .with_context(|| format!("Invalid conference JSON on line {}", i + 1))
            })
            .collect::<Result<_>>()?
    };

    raw.into_iter().map(RawConferencePaper::into_paper).collect()
}

pub fn load_conference_file(path: &Path) -> Result<Vec<NewPaper>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read conference file: {}", path.display()))?;
    parse_conference_json(&text)
}
