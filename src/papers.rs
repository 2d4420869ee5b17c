//! Paper persistence: upsert, lookup, and listing.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{Author, NewPaper, Paper};

/// Column list shared by every query that maps rows with [`paper_from_row`].
pub const PAPER_COLUMNS: &str = "p.id, p.source, p.source_id, p.title, p.abstract, \
     p.authors_json, p.categories, p.primary_category, p.venue, p.url, p.pdf_url, \
     p.published_at, p.updated_at";

pub fn paper_from_row(row: &SqliteRow) -> Result<Paper> {
    let id: String = row.get("id");
    let source: String = row.get("source");
    let authors_json: String = row.get("authors_json");
    let categories: String = row.get("categories");
    let authors: Vec<Author> = serde_json::from_str(&authors_json)
        .with_context(|| format!("invalid authors for paper {}", id))?;

    Ok(Paper {
        source: source.parse()?,
        id,
        source_id: row.get("source_id"),
        title: row.get("title"),
        abstract_text: row.get("abstract"),
        authors,
        categories: categories.split_whitespace().map(String::from).collect(),
        primary_category: row.get("primary_category"),
        venue: row.get("venue"),
        url: row.get("url"),
        pdf_url: row.get("pdf_url"),
        published_at: row.get("published_at"),
        updated_at: row.get("updated_at"),
    })
}

/// Lowercased alphanumeric title, used to catch the same paper arriving
/// from two sources (e.g. an arXiv preprint and its conference version).
pub fn normalize_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Hash over everything that feeds embeddings and generated content.
pub fn content_hash(paper: &NewPaper) -> String {
    hash_text(&format!("{}\n{}", paper.title, paper.abstract_text))
}

/// Outcome of [`upsert_paper`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(String),
    Updated(String),
    Unchanged(String),
    /// Same normalized title already stored under another source id.
    Duplicate(String),
}

impl UpsertOutcome {
    pub fn paper_id(&self) -> &str {
        match self {
            UpsertOutcome::Inserted(id)
            | UpsertOutcome::Updated(id)
            | UpsertOutcome::Unchanged(id)
            | UpsertOutcome::Duplicate(id) => id,
        }
    }
}

/// Insert or update a paper keyed by `(source, source_id)`.
pub async fn upsert_paper(pool: &SqlitePool, paper: &NewPaper) -> Result<UpsertOutcome> {
    let title_hash = hash_text(&normalize_title(&paper.title));
    let content_hash = content_hash(paper);
    let now = chrono::Utc::now().timestamp();

    let existing =
        sqlx::query("SELECT id, content_hash FROM papers WHERE source = ? AND source_id = ?")
            .bind(paper.source.as_str())
            .bind(&paper.source_id)
            .fetch_optional(pool)
            .await?;

    let authors_json = serde_json::to_string(&paper.authors)?;
    let categories = paper.categories.join(" ");

    if let Some(row) = existing {
        let id: String = row.get("id");
        let old_hash: String = row.get("content_hash");

        sqlx::query(
            r#"
            UPDATE papers SET
                title = ?, abstract = ?, authors_json = ?, categories = ?,
                primary_category = ?, venue = ?, url = ?, pdf_url = ?,
                published_at = ?, updated_at = ?, title_hash = ?, content_hash = ?
            WHERE id = ?
            "#,
        )
        .bind(&paper.title)
        .bind(&paper.abstract_text)
        .bind(&authors_json)
        .bind(&categories)
        .bind(&paper.primary_category)
        .bind(&paper.venue)
        .bind(&paper.url)
        .bind(&paper.pdf_url)
        .bind(paper.published_at.timestamp())
        .bind(paper.updated_at.timestamp())
        .bind(&title_hash)
        .bind(&content_hash)
        .bind(&id)
        .execute(pool)
        .await?;

        return Ok(if old_hash == content_hash {
            UpsertOutcome::Unchanged(id)
        } else {
            UpsertOutcome::Updated(id)
        });
    }

    let duplicate: Option<String> =
        sqlx::query_scalar("SELECT id FROM papers WHERE title_hash = ? LIMIT 1")
            .bind(&title_hash)
            .fetch_optional(pool)
            .await?;
    if let Some(id) = duplicate {
        return Ok(UpsertOutcome::Duplicate(id));
    }

    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO papers (
            id, source, source_id, title, abstract, authors_json, categories,
            primary_category, venue, url, pdf_url, published_at, updated_at,
            ingested_at, title_hash, content_hash
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(paper.source.as_str())
    .bind(&paper.source_id)
    .bind(&paper.title)
    .bind(&paper.abstract_text)
    .bind(&authors_json)
    .bind(&categories)
    .bind(&paper.primary_category)
    .bind(&paper.venue)
    .bind(&paper.url)
    .bind(&paper.pdf_url)
    .bind(paper.published_at.timestamp())
    .bind(paper.updated_at.timestamp())
    .bind(now)
    .bind(&title_hash)
    .bind(&content_hash)
    .execute(pool)
    .await?;

    Ok(UpsertOutcome::Inserted(id))
}

pub async fn find_paper(pool: &SqlitePool, id: &str) -> Result<Option<Paper>> {
    let sql = format!("SELECT {} FROM papers p WHERE p.id = ?", PAPER_COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
    row.as_ref().map(paper_from_row).transpose()
}

/// Newest papers first, optionally restricted to one category.
pub async fn list_latest(
    pool: &SqlitePool,
    category: Option<&str>,
    limit: i64,
) -> Result<Vec<Paper>> {
    let rows = match category {
        Some(cat) => {
            let sql = format!(
                "SELECT {} FROM papers p WHERE (' ' || p.categories || ' ') LIKE ? \
                 ORDER BY p.published_at DESC, p.id ASC LIMIT ?",
                PAPER_COLUMNS
            );
            sqlx::query(&sql)
                .bind(format!("% {} %", cat))
                .bind(limit)
                .fetch_all(pool)
                .await?
        }
        None => {
            let sql = format!(
                "SELECT {} FROM papers p ORDER BY p.published_at DESC, p.id ASC LIMIT ?",
                PAPER_COLUMNS
            );
            sqlx::query(&sql).bind(limit).fetch_all(pool).await?
        }
    };

    rows.iter().map(paper_from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_title_ignores_case_and_punctuation() {
        assert_eq!(
            normalize_title("Attention Is All You Need!"),
            normalize_title("attention is   all you need")
        );
        assert_eq!(normalize_title("  A:  B  "), "a b");
    }

    #[test]
    fn hash_is_stable_hex() {
        let h = hash_text("abc");
        assert_eq!(h.len(), 64);
        assert_eq!(h, hash_text("abc"));
        assert_ne!(h, hash_text("abd"));
    }

    #[tokio::test]
    async fn corrupt_source_is_an_error() {
        let (_tmp, _config, pool) = crate::testutil::setup().await;
        let id = crate::testutil::insert_paper(&pool, "2410.00001", "Paper", 0).await;
        assert!(find_paper(&pool, &id).await.unwrap().is_some());

        sqlx::query("UPDATE papers SET source = 'openreview' WHERE id = ?")
            .bind(&id)
            .execute(&pool)
            .await
            .unwrap();
        let err = find_paper(&pool, &id).await.unwrap_err();
        assert!(err.to_string().contains("openreview"));
    }
}
