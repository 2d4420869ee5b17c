//! One-shot batch run for cron.
//!
//! ```text
//! ingest arXiv ─► embed pending ─► refresh feeds ─► enrich pending
//! ```
//!
//! Each step runs even when an earlier one failed. The run reports failure
//! at the end if any step did.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::embed_cmd;
use crate::enrichment;
use crate::ingest::{self, IngestOptions, IngestTarget};
use crate::progress::ProgressMode;
use crate::recommend;

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOptions {
    pub skip_ingest: bool,
    pub skip_enrich: bool,
    /// Cap on artifacts generated in this run.
    pub enrich_limit: Option<usize>,
}

pub async fn run_pipeline(
    config: &Config,
    options: PipelineOptions,
    progress: ProgressMode,
) -> Result<()> {
    let mut failed: Vec<&str> = Vec::new();

    if !options.skip_ingest {
        let target = IngestTarget::Arxiv {
            categories: None,
            max_results: None,
        };
        let opts = IngestOptions::default();
        if let Err(e) = ingest::run_ingest(config, target, opts, progress).await {
            tracing::error!(step = "ingest", error = %e, "pipeline step failed");
            failed.push("ingest");
        }
    }

    if config.embedding.is_enabled() {
        if let Err(e) = embed_cmd::run_embed_pending(config, None, None, false).await {
            tracing::error!(step = "embed", error = %e, "pipeline step failed");
            failed.push("embed");
        }
    } else {
        tracing::info!("embedding disabled, skipping embed step");
    }

    if let Err(e) = recommend::run_refresh(config, None).await {
        tracing::error!(step = "refresh", error = %e, "pipeline step failed");
        failed.push("refresh");
    }

    if !options.skip_enrich && config.enrichment.is_enabled() {
        if let Err(e) = enrichment::run_enrich_pending(config, options.enrich_limit).await {
            tracing::error!(step = "enrich", error = %e, "pipeline step failed");
            failed.push("enrich");
        }
    }

    if !failed.is_empty() {
        bail!("pipeline finished with failed steps: {}", failed.join(", "));
    }
    println!("pipeline ok");
    Ok(())
}
