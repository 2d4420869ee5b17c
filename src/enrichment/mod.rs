//! AI content enrichment.
//!
//! Content is produced asynchronously through a queue kept in the
//! `content_artifacts` table:
//!
//! ```text
//! request_content ──► pending ──► running ──► done
//!        ▲                           │
//!        └──── (reset) ── failed ◄───┘  after max_attempts
//! ```
//!
//! | Kind | Output | Stored in |
//! |------|--------|-----------|
//! | `translation` | title + abstract in the target language | `body` + `.txt` file |
//! | `interpretation` | plain-language explanation | `body` + `.txt` file |
//! | `infographic` | self-contained HTML page | `.html` file |
//! | `speech` | MP3 narration | `.mp3` file |
//!
//! Speech narrates the finished interpretation in the same language when
//! one exists, otherwise the abstract.

pub mod generator;
pub mod store;

use anyhow::{bail, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::models::{ContentArtifact, ContentKind, ContentStatus, Paper};
use crate::papers;

pub use generator::{create_generator, ContentGenerator, DisabledGenerator, OpenAiGenerator};
pub use store::ArtifactStore;

const ARTIFACT_COLUMNS: &str = "id, paper_id, kind, language, status, body, file_path, \
     mime_type, model, error, attempts, updated_at";

fn artifact_from_row(row: &SqliteRow) -> Result<ContentArtifact> {
    let kind: String = row.get("kind");
    let status: String = row.get("status");
    Ok(ContentArtifact {
        id: row.get("id"),
        paper_id: row.get("paper_id"),
        kind: kind.parse()?,
        language: row.get("language"),
        status: status.parse()?,
        body: row.get("body"),
        file_path: row.get("file_path"),
        mime_type: row.get("mime_type"),
        model: row.get("model"),
        error: row.get("error"),
        attempts: row.get("attempts"),
        updated_at: row.get("updated_at"),
    })
}

fn validate_language(language: &str) -> Result<()> {
    let ok = !language.is_empty()
        && language.len() <= 16
        && language
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !ok {
        bail!("invalid language code: '{}'", language);
    }
    Ok(())
}

pub async fn find_artifact(
    pool: &SqlitePool,
    paper_id: &str,
    kind: ContentKind,
    language: &str,
) -> Result<Option<ContentArtifact>> {
    let sql = format!(
        "SELECT {} FROM content_artifacts WHERE paper_id = ? AND kind = ? AND language = ?",
        ARTIFACT_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(paper_id)
        .bind(kind.as_str())
        .bind(language)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(artifact_from_row).transpose()
}

/// All artifacts of a paper, grouped by kind then language.
pub async fn list_artifacts(pool: &SqlitePool, paper_id: &str) -> Result<Vec<ContentArtifact>> {
    let sql = format!(
        "SELECT {} FROM content_artifacts WHERE paper_id = ? ORDER BY kind ASC, language ASC",
        ARTIFACT_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(paper_id).fetch_all(pool).await?;
    rows.iter().map(artifact_from_row).collect()
}

/// Queue generation of `kind` in `language` for a paper.
///
/// Requesting something that is already queued or done returns the existing
/// artifact. A failed artifact is reset to pending with a fresh attempt count.
pub async fn request_content(
    pool: &SqlitePool,
    paper_id: &str,
    kind: ContentKind,
    language: &str,
) -> Result<ContentArtifact> {
    validate_language(language)?;
    if papers::find_paper(pool, paper_id).await?.is_none() {
        bail!("paper not found: {}", paper_id);
    }

    let now = chrono::Utc::now().timestamp();

    if let Some(existing) = find_artifact(pool, paper_id, kind, language).await? {
        if existing.status != ContentStatus::Failed {
            return Ok(existing);
        }
        sqlx::query(
            "UPDATE content_artifacts SET status = 'pending', attempts = 0, error = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(&existing.id)
        .execute(pool)
        .await?;
    } else {
        sqlx::query(
            r#"
            INSERT INTO content_artifacts (id, paper_id, kind, language, status, attempts, created_at, updated_at)
            VALUES (?, ?, ?, ?, 'pending', 0, ?, ?)
            ON CONFLICT(paper_id, kind, language) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(paper_id)
        .bind(kind.as_str())
        .bind(language)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;
    }

    find_artifact(pool, paper_id, kind, language)
        .await?
        .ok_or_else(|| anyhow::anyhow!("artifact vanished after enqueue"))
}

/// Result of generating one artifact.
struct Generated {
    body: Option<String>,
    file_path: Option<String>,
    mime_type: String,
    model: String,
}

fn paper_prompt(paper: &Paper) -> String {
    format!("Title: {}\n\nAbstract: {}", paper.title, paper.abstract_text)
}

/// Drop a surrounding Markdown code fence, if the model added one.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

async fn speech_source(pool: &SqlitePool, paper: &Paper, language: &str) -> Result<String> {
    let interp = find_artifact(pool, &paper.id, ContentKind::Interpretation, language).await?;
    if let Some(interp) = interp {
        if interp.status == ContentStatus::Done {
            if let Some(body) = interp.body {
                return Ok(body);
            }
        }
    }
    Ok(format!("{}. {}", paper.title, paper.abstract_text))
}

/// Text kinds keep the body on the row and mirror it to a `.txt` file.
fn text_output(
    generator: &dyn ContentGenerator,
    store: &ArtifactStore,
    artifact: &ContentArtifact,
    body: String,
) -> Result<Generated> {
    let rel = store.write(
        artifact.kind,
        &artifact.paper_id,
        &artifact.language,
        body.as_bytes(),
    )?;
    Ok(Generated {
        body: Some(body),
        file_path: Some(rel),
        mime_type: store::mime_type(artifact.kind).to_string(),
        model: generator.text_model().to_string(),
    })
}

async fn generate(
    pool: &SqlitePool,
    generator: &dyn ContentGenerator,
    store: &ArtifactStore,
    artifact: &ContentArtifact,
    paper: &Paper,
) -> Result<Generated> {
    let lang = &artifact.language;
    match artifact.kind {
        ContentKind::Translation => {
            let system = format!(
                "Translate the paper title and abstract into the language with code '{}'. \
                 Keep technical terms accurate and keep the 'Title:' and 'Abstract:' labels.",
                lang
            );
            let body = generator.complete(&system, &paper_prompt(paper)).await?;
            text_output(generator, store, artifact, body)
        }
        ContentKind::Interpretation => {
            let system = format!(
                "Explain this paper to a curious non-specialist in the language with code '{}'. \
                 Cover the problem and the approach in a few short paragraphs.",
                lang
            );
            let body = generator.complete(&system, &paper_prompt(paper)).await?;
            text_output(generator, store, artifact, body)
        }
        ContentKind::Infographic => {
            let system = format!(
                "Produce one self-contained HTML page with inline CSS and no scripts that \
                 summarizes this paper visually. Write all text in the language with code '{}'. \
                 Reply with the HTML only.",
                lang
            );
            let raw = generator.complete(&system, &paper_prompt(paper)).await?;
            let html = strip_code_fence(&raw);
            let rel = store.write(artifact.kind, &paper.id, lang, html.as_bytes())?;
            Ok(Generated {
                body: None,
                file_path: Some(rel),
                mime_type: store::mime_type(artifact.kind).to_string(),
                model: generator.text_model().to_string(),
            })
        }
        ContentKind::Speech => {
            let text = speech_source(pool, paper, lang).await?;
            let audio = generator.synthesize_speech(&text).await?;
            if audio.is_empty() {
                bail!("speech service returned no audio");
            }
            let rel = store.write(artifact.kind, &paper.id, lang, &audio)?;
            Ok(Generated {
                body: None,
                file_path: Some(rel),
                mime_type: store::mime_type(artifact.kind).to_string(),
                model: generator.speech_model().to_string(),
            })
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EnrichStats {
    pub processed: u64,
    pub done: u64,
    /// Failed this round but will be retried.
    pub retrying: u64,
    /// Out of attempts.
    pub failed: u64,
}

/// Process up to `limit` pending artifacts.
///
/// Text kinds run before speech so a narration can pick up an interpretation
/// finished in the same batch.
pub async fn run_pending(
    pool: &SqlitePool,
    config: &Config,
    generator: &dyn ContentGenerator,
    store: &ArtifactStore,
    limit: Option<usize>,
) -> Result<EnrichStats> {
    // Rows left running by an interrupted worker go back to the queue
    sqlx::query("UPDATE content_artifacts SET status = 'pending' WHERE status = 'running'")
        .execute(pool)
        .await?;

    let sql = format!(
        "SELECT {} FROM content_artifacts WHERE status = 'pending' \
         ORDER BY CASE kind WHEN 'speech' THEN 1 ELSE 0 END, created_at ASC, id ASC LIMIT ?",
        ARTIFACT_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(limit.map(|l| l as i64).unwrap_or(i64::MAX))
        .fetch_all(pool)
        .await?;
    let pending: Vec<ContentArtifact> = rows.iter().map(artifact_from_row).collect::<Result<_>>()?;

    let max_attempts = config.enrichment.max_attempts;
    let mut stats = EnrichStats::default();

    for artifact in pending {
        stats.processed += 1;
        let attempts = artifact.attempts + 1;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            "UPDATE content_artifacts SET status = 'running', attempts = ?, updated_at = ? WHERE id = ?",
        )
        .bind(attempts)
        .bind(now)
        .bind(&artifact.id)
        .execute(pool)
        .await?;

        let result = match papers::find_paper(pool, &artifact.paper_id).await? {
            Some(paper) => generate(pool, generator, store, &artifact, &paper).await,
            None => Err(anyhow::anyhow!("paper not found: {}", artifact.paper_id)),
        };
        let now = chrono::Utc::now().timestamp();

        match result {
            Ok(out) => {
                sqlx::query(
                    r#"
                    UPDATE content_artifacts SET
                        status = 'done', body = ?, file_path = ?, mime_type = ?, model = ?,
                        error = NULL, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&out.body)
                .bind(&out.file_path)
                .bind(&out.mime_type)
                .bind(&out.model)
                .bind(now)
                .bind(&artifact.id)
                .execute(pool)
                .await?;
                stats.done += 1;
            }
            Err(e) => {
                let exhausted = attempts >= max_attempts;
                tracing::warn!(
                    artifact = %artifact.id,
                    kind = %artifact.kind,
                    attempts,
                    exhausted,
                    error = %e,
                    "content generation failed"
                );
                sqlx::query(
                    "UPDATE content_artifacts SET status = ?, error = ?, updated_at = ? WHERE id = ?",
                )
                .bind(if exhausted {
                    ContentStatus::Failed.as_str()
                } else {
                    ContentStatus::Pending.as_str()
                })
                .bind(e.to_string())
                .bind(now)
                .bind(&artifact.id)
                .execute(pool)
                .await?;
                if exhausted {
                    stats.failed += 1;
                } else {
                    stats.retrying += 1;
                }
            }
        }
    }

    Ok(stats)
}

// ============ CLI entry points ============

pub async fn run_enrich_request(
    config: &Config,
    paper_id: &str,
    kind: ContentKind,
    language: Option<&str>,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let language = language.unwrap_or(&config.enrichment.default_language);
    let artifact = request_content(&pool, paper_id, kind, language).await?;
    pool.close().await;

    println!("enrich request");
    println!("  artifact: {}", artifact.id);
    println!("  kind: {} ({})", artifact.kind, artifact.language);
    println!("  status: {}", artifact.status.as_str());
    Ok(())
}

pub async fn run_enrich_pending(config: &Config, limit: Option<usize>) -> Result<()> {
    if !config.enrichment.is_enabled() {
        bail!("Content enrichment is disabled. Set [enrichment] provider in config.");
    }

    let generator = create_generator(&config.enrichment)?;
    let store = ArtifactStore::new(&config.enrichment.artifacts_dir);
    let pool = db::connect(config).await?;
    let stats = run_pending(&pool, config, generator.as_ref(), &store, limit).await?;
    pool.close().await;

    println!("enrich pending");
    println!("  processed: {}", stats.processed);
    println!("  done: {}", stats.done);
    println!("  retrying: {}", stats.retrying);
    println!("  failed: {}", stats.failed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Echoes prompts back and records what speech was asked to read.
    #[derive(Default)]
    struct MockGenerator {
        fail_text: bool,
        calls: AtomicUsize,
        spoken: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ContentGenerator for MockGenerator {
        fn text_model(&self) -> &str {
            "mock-chat"
        }
        fn speech_model(&self) -> &str {
            "mock-tts"
        }
        async fn complete(&self, _system: &str, prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_text {
                bail!("upstream exploded");
            }
            Ok(format!("```html\n<p>{}</p>\n```", prompt.lines().next().unwrap_or("")))
        }
        async fn synthesize_speech(&self, text: &str) -> Result<Vec<u8>> {
            self.spoken.lock().unwrap().push(text.to_string());
            Ok(b"ID3audio".to_vec())
        }
    }

    #[test]
    fn code_fences_are_stripped() {
        assert_eq!(strip_code_fence("```html\n<b>x</b>\n```"), "<b>x</b>");
        assert_eq!(strip_code_fence("  plain  "), "plain");
    }

    #[tokio::test]
    async fn request_is_idempotent_and_validated() {
        let (_tmp, _config, pool) = testutil::setup().await;
        let paper = testutil::insert_paper(&pool, "p", "Paper", 0).await;

        let a = request_content(&pool, &paper, ContentKind::Translation, "es").await.unwrap();
        let b = request_content(&pool, &paper, ContentKind::Translation, "es").await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.status, ContentStatus::Pending);

        assert!(request_content(&pool, &paper, ContentKind::Translation, "").await.is_err());
        assert!(request_content(&pool, "nope", ContentKind::Speech, "en").await.is_err());
        assert_eq!(list_artifacts(&pool, &paper).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn generates_text_and_files_with_speech_after_interpretation() {
        let (_tmp, config, pool) = testutil::setup().await;
        let paper = testutil::insert_paper(&pool, "p", "Paper", 0).await;
        let store = ArtifactStore::new(&config.enrichment.artifacts_dir);
        let mock = MockGenerator::default();

        // Speech queued first must still run after the interpretation
        request_content(&pool, &paper, ContentKind::Speech, "en").await.unwrap();
        request_content(&pool, &paper, ContentKind::Interpretation, "en").await.unwrap();
        request_content(&pool, &paper, ContentKind::Infographic, "en").await.unwrap();

        let stats = run_pending(&pool, &config, &mock, &store, None).await.unwrap();
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.done, 3);

        let interp = find_artifact(&pool, &paper, ContentKind::Interpretation, "en")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(interp.model.as_deref(), Some("mock-chat"));
        assert_eq!(interp.mime_type.as_deref(), Some("text/plain"));
        let body = interp.body.unwrap();
        let text_rel = interp.file_path.unwrap();
        assert_eq!(text_rel, format!("interpretation/{}-en.txt", paper));
        assert_eq!(std::fs::read_to_string(store.root().join(&text_rel)).unwrap(), body);
        assert_eq!(mock.spoken.lock().unwrap().as_slice(), &[body]);

        let speech = find_artifact(&pool, &paper, ContentKind::Speech, "en")
            .await
            .unwrap()
            .unwrap();
        let rel = speech.file_path.unwrap();
        assert_eq!(std::fs::read(store.root().join(&rel)).unwrap(), b"ID3audio");
        assert_eq!(speech.mime_type.as_deref(), Some("audio/mpeg"));

        let info = find_artifact(&pool, &paper, ContentKind::Infographic, "en")
            .await
            .unwrap()
            .unwrap();
        let html = std::fs::read_to_string(store.root().join(info.file_path.unwrap())).unwrap();
        assert_eq!(html, "<p>Title: Paper</p>");
    }

    #[tokio::test]
    async fn failures_retry_until_max_attempts_then_reset_on_request() {
        let (_tmp, config, pool) =
            testutil::setup_with("max_attempts = 2\n").await;
        let paper = testutil::insert_paper(&pool, "p", "Paper", 0).await;
        let store = ArtifactStore::new(&config.enrichment.artifacts_dir);
        let mock = MockGenerator {
            fail_text: true,
            ..Default::default()
        };

        request_content(&pool, &paper, ContentKind::Translation, "de").await.unwrap();

        let s1 = run_pending(&pool, &config, &mock, &store, None).await.unwrap();
        assert_eq!(s1.retrying, 1);
        let s2 = run_pending(&pool, &config, &mock, &store, None).await.unwrap();
        assert_eq!(s2.failed, 1);
        let s3 = run_pending(&pool, &config, &mock, &store, None).await.unwrap();
        assert_eq!(s3.processed, 0);

        let failed = find_artifact(&pool, &paper, ContentKind::Translation, "de")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failed.status, ContentStatus::Failed);
        assert_eq!(failed.attempts, 2);
        assert!(failed.error.unwrap().contains("upstream exploded"));

        let again = request_content(&pool, &paper, ContentKind::Translation, "de").await.unwrap();
        assert_eq!(again.status, ContentStatus::Pending);
        assert_eq!(again.attempts, 0);
    }
}
