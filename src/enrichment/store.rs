//! On-disk storage for artifact files (text, HTML, audio).

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::models::ContentKind;

/// Writes artifacts as `<root>/<kind>/<paper_id>-<language>.<ext>`.
///
/// Stored paths are relative to the root so the HTTP server can expose the
/// root directory at `/artifacts`.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn relative_path(kind: ContentKind, paper_id: &str, language: &str) -> String {
        format!(
            "{}/{}-{}.{}",
            kind.as_str(),
            sanitize(paper_id),
            sanitize(language),
            extension(kind)
        )
    }

    /// Write `bytes` and return the relative path.
    pub fn write(
        &self,
        kind: ContentKind,
        paper_id: &str,
        language: &str,
        bytes: &[u8],
    ) -> Result<String> {
        let rel = Self::relative_path(kind, paper_id, language);
        let full = self.root.join(&rel);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&full, bytes)
            .with_context(|| format!("Failed to write artifact {}", full.display()))?;
        Ok(rel)
    }
}

pub fn extension(kind: ContentKind) -> &'static str {
    match kind {
        ContentKind::Speech => "mp3",
        ContentKind::Infographic => "html",
        ContentKind::Translation | ContentKind::Interpretation => "txt",
    }
}

pub fn mime_type(kind: ContentKind) -> &'static str {
    match kind {
        ContentKind::Speech => "audio/mpeg",
        ContentKind::Infographic => "text/html",
        ContentKind::Translation | ContentKind::Interpretation => "text/plain",
    }
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
