//! Users, their interactions, and their library.

use anyhow::{bail, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::models::{parse_categories, Interaction, InteractionKind, Paper, User};
use crate::papers::{self, paper_from_row, PAPER_COLUMNS};

fn user_from_row(row: &SqliteRow) -> User {
    let categories: String = row.get("categories");
    User {
        id: row.get("id"),
        name: row.get("name"),
        categories: parse_categories(&categories),
        language: row.get("language"),
        created_at: row.get("created_at"),
    }
}

pub async fn create_user(
    pool: &SqlitePool,
    name: &str,
    categories: &[String],
    language: &str,
) -> Result<User> {
    let name = name.trim();
    if name.is_empty() {
        bail!("user name must not be empty");
    }
    if find_user(pool, name).await?.is_some() {
        bail!("invalid user name: '{}' already exists", name);
    }

    let user = User {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        categories: categories.to_vec(),
        language: language.to_string(),
        created_at: chrono::Utc::now().timestamp(),
    };

    sqlx::query(
        "INSERT INTO users (id, name, categories, language, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&user.id)
    .bind(&user.name)
    .bind(user.categories.join(" "))
    .bind(&user.language)
    .bind(user.created_at)
    .execute(pool)
    .await?;

    Ok(user)
}

/// Look a user up by id or by name.
pub async fn find_user(pool: &SqlitePool, id_or_name: &str) -> Result<Option<User>> {
    let row = sqlx::query(
        "SELECT id, name, categories, language, created_at FROM users WHERE id = ? OR name = ?",
    )
    .bind(id_or_name)
    .bind(id_or_name)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(user_from_row))
}

pub async fn require_user(pool: &SqlitePool, id_or_name: &str) -> Result<User> {
    match find_user(pool, id_or_name).await? {
        Some(u) => Ok(u),
        None => bail!("user not found: {}", id_or_name),
    }
}

pub async fn list_users(pool: &SqlitePool) -> Result<Vec<User>> {
    let rows = sqlx::query(
        "SELECT id, name, categories, language, created_at FROM users ORDER BY created_at ASC, name ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(user_from_row).collect())
}

/// Record an interaction. Re-recording the same kind only refreshes its
/// timestamp. `like` and `dislike` replace each other.
pub async fn record_interaction(
    pool: &SqlitePool,
    user_id: &str,
    paper_id: &str,
    kind: InteractionKind,
) -> Result<Interaction> {
    if papers::find_paper(pool, paper_id).await?.is_none() {
        bail!("paper not found: {}", paper_id);
    }

    let now = chrono::Utc::now().timestamp();
    let mut tx = pool.begin().await?;

    let opposite = match kind {
        InteractionKind::Like => Some(InteractionKind::Dislike),
        InteractionKind::Dislike => Some(InteractionKind::Like),
        _ => None,
    };
    if let Some(opposite) = opposite {
        sqlx::query("DELETE FROM interactions WHERE user_id = ? AND paper_id = ? AND kind = ?")
            .bind(user_id)
            .bind(paper_id)
            .bind(opposite.as_str())
            .execute(&mut *tx)
            .await?;
    }

    sqlx::query(
        r#"
        INSERT INTO interactions (user_id, paper_id, kind, created_at) VALUES (?, ?, ?, ?)
        ON CONFLICT(user_id, paper_id, kind) DO UPDATE SET created_at = excluded.created_at
        "#,
    )
    .bind(user_id)
    .bind(paper_id)
    .bind(kind.as_str())
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Interaction {
        user_id: user_id.to_string(),
        paper_id: paper_id.to_string(),
        kind,
        created_at: now,
    })
}

pub async fn remove_interaction(
    pool: &SqlitePool,
    user_id: &str,
    paper_id: &str,
    kind: InteractionKind,
) -> Result<bool> {
    let result =
        sqlx::query("DELETE FROM interactions WHERE user_id = ? AND paper_id = ? AND kind = ?")
            .bind(user_id)
            .bind(paper_id)
            .bind(kind.as_str())
            .execute(pool)
            .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_interactions(pool: &SqlitePool, user_id: &str) -> Result<Vec<Interaction>> {
    let rows = sqlx::query(
        "SELECT user_id, paper_id, kind, created_at FROM interactions WHERE user_id = ? ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        let kind: String = row.get("kind");
        out.push(Interaction {
            user_id: row.get("user_id"),
            paper_id: row.get("paper_id"),
            kind: kind.parse()?,
            created_at: row.get("created_at"),
        });
    }
    Ok(out)
}

/// Liked and bookmarked papers, most recently saved first.
pub async fn library(pool: &SqlitePool, user_id: &str) -> Result<Vec<Paper>> {
    let sql = format!(
        r#"
        SELECT {}, MAX(i.created_at) AS saved_at
        FROM interactions i
        JOIN papers p ON p.id = i.paper_id
        WHERE i.user_id = ? AND i.kind IN ('like', 'bookmark')
        GROUP BY p.id
        ORDER BY saved_at DESC, p.id ASC
        "#,
        PAPER_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(user_id).fetch_all(pool).await?;
    rows.iter().map(paper_from_row).collect()
}

// ============ CLI entry points ============

pub async fn run_user_add(
    config: &Config,
    name: &str,
    categories: &[String],
    language: Option<&str>,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let language = language.unwrap_or(&config.enrichment.default_language);
    let user = create_user(&pool, name, categories, language).await?;
    pool.close().await;

    println!("user created");
    println!("  id: {}", user.id);
    println!("  name: {}", user.name);
    println!("  categories: {}", user.categories.join(", "));
    println!("  language: {}", user.language);
    Ok(())
}

pub async fn run_user_list(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let users = list_users(&pool).await?;
    pool.close().await;

    if users.is_empty() {
        println!("No users.");
        return Ok(());
    }

    println!("{:<38} {:<20} {:<6} CATEGORIES", "ID", "NAME", "LANG");
    for u in &users {
        println!(
            "{:<38} {:<20} {:<6} {}",
            u.id,
            u.name,
            u.language,
            u.categories.join(",")
        );
    }
    Ok(())
}

pub async fn run_interact(
    config: &Config,
    user: &str,
    paper_id: &str,
    kind: InteractionKind,
    remove: bool,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let user = require_user(&pool, user).await?;

    if remove {
        let removed = remove_interaction(&pool, &user.id, paper_id, kind).await?;
        println!(
            "{} {} {}: {}",
            user.name,
            kind,
            paper_id,
            if removed { "removed" } else { "not present" }
        );
    } else {
        record_interaction(&pool, &user.id, paper_id, kind).await?;
        println!("{} {} {}: recorded", user.name, kind, paper_id);
    }

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[tokio::test]
    async fn like_and_dislike_are_exclusive() {
        let (_tmp, _config, pool) = testutil::setup().await;
        let paper = testutil::insert_paper(&pool, "p1", "Paper One", 0).await;
        let user = create_user(&pool, "ada", &[], "en").await.unwrap();

        record_interaction(&pool, &user.id, &paper, InteractionKind::Like)
            .await
            .unwrap();
        record_interaction(&pool, &user.id, &paper, InteractionKind::Dislike)
            .await
            .unwrap();

        let kinds: Vec<InteractionKind> = list_interactions(&pool, &user.id)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.kind)
            .collect();
        assert_eq!(kinds, vec![InteractionKind::Dislike]);
    }

    #[tokio::test]
    async fn duplicate_names_rejected_and_lookup_by_name() {
        let (_tmp, _config, pool) = testutil::setup().await;
        let user = create_user(&pool, "grace", &["cs.PL".to_string()], "en")
            .await
            .unwrap();
        assert!(create_user(&pool, "grace", &[], "en").await.is_err());
        assert!(create_user(&pool, "  ", &[], "en").await.is_err());

        let found = require_user(&pool, "grace").await.unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(found.categories, vec!["cs.PL"]);
        assert!(require_user(&pool, "nobody").await.is_err());
    }

    #[tokio::test]
    async fn library_lists_saved_papers_once() {
        let (_tmp, _config, pool) = testutil::setup().await;
        let a = testutil::insert_paper(&pool, "a", "Paper A", 0).await;
        let b = testutil::insert_paper(&pool, "b", "Paper B", 1).await;
        let user = create_user(&pool, "alan", &[], "en").await.unwrap();

        record_interaction(&pool, &user.id, &a, InteractionKind::Like).await.unwrap();
        record_interaction(&pool, &user.id, &a, InteractionKind::Bookmark).await.unwrap();
        record_interaction(&pool, &user.id, &b, InteractionKind::View).await.unwrap();

        let lib = library(&pool, &user.id).await.unwrap();
        assert_eq!(lib.len(), 1);
        assert_eq!(lib[0].id, a);

        assert!(record_interaction(&pool, &user.id, "missing", InteractionKind::Like)
            .await
            .is_err());
    }
}
