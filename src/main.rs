//! # Paper Feed CLI (`pfeed`)
//!
//! The `pfeed` binary runs every batch job of the paper feed backend and
//! starts its HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! pfeed --config ./config/pfeed.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pfeed init` | Create the SQLite database and run schema migrations |
//! | `pfeed ingest arxiv` | Fetch the latest papers from the arXiv API |
//! | `pfeed ingest feed <file>` | Ingest a saved arXiv Atom response |
//! | `pfeed ingest file <file>` | Ingest a conference JSON / JSON-lines dump |
//! | `pfeed embed pending` | Backfill missing or stale paper embeddings |
//! | `pfeed embed rebuild` | Delete and regenerate all embeddings |
//! | `pfeed user add <name>` | Create a user |
//! | `pfeed user list` | List users |
//! | `pfeed interact <user> <paper> <kind>` | Record a view, like, bookmark or dislike |
//! | `pfeed recommend <user>` | Print a user's ranked feed |
//! | `pfeed refresh` | Recompute stored feeds for every user |
//! | `pfeed enrich request <paper> <kind>` | Queue AI content for a paper |
//! | `pfeed enrich pending` | Generate queued content |
//! | `pfeed get <id>` | Show a paper with its artifacts |
//! | `pfeed stats` | Database overview |
//! | `pfeed pipeline` | ingest → embed → refresh → enrich, for cron |
//! | `pfeed serve` | Start the HTTP API |
//! | `pfeed completions <shell>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! pfeed init
//! pfeed ingest arxiv --category cs.CL --max-results 100
//! pfeed embed pending
//! pfeed user add ada --category cs.CL --category cs.LG
//! pfeed recommend ada --limit 10
//! ```

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use paper_feed::ingest::{IngestOptions, IngestTarget};
use paper_feed::models::{ContentKind, InteractionKind};
use paper_feed::pipeline::PipelineOptions;
use paper_feed::progress::ProgressMode;
use paper_feed::{
    config, embed_cmd, enrichment, get, ingest, migrate, pipeline, recommend, server, stats, users,
};

/// Paper Feed: personalized arXiv and conference paper recommendations with
/// AI-generated translations, explanations, audio and infographics.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "pfeed",
    about = "Paper Feed: personalized paper recommendations and AI content enrichment",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pfeed.toml")]
    config: PathBuf,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Progress output on stderr: `human`, `json`, or `off`.
    /// Defaults to `human` when stderr is a terminal.
    #[arg(long, global = true, value_parser = parse_progress)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Ingest papers from arXiv or a file.
    ///
    /// Runs are incremental: papers not updated since the last run of the
    /// same source are skipped unless `--full` is given.
    Ingest {
        #[command(subcommand)]
        source: IngestSource,

        /// Ignore the checkpoint and process every fetched paper.
        #[arg(long, global = true)]
        full: bool,

        /// Show counts without writing to the database.
        #[arg(long, global = true)]
        dry_run: bool,

        /// Maximum number of papers to store.
        #[arg(long, global = true)]
        limit: Option<usize>,
    },

    /// Manage paper embeddings.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Manage users.
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Record (or with `--remove`, undo) an interaction with a paper.
    Interact {
        /// User id or name.
        user: String,
        /// Paper UUID.
        paper: String,
        /// `view`, `like`, `bookmark`, or `dislike`.
        kind: InteractionKind,
        #[arg(long)]
        remove: bool,
    },

    /// Print a user's recommendations.
    Recommend {
        /// User id or name.
        user: String,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        /// Defaults to `ranking.final_limit`.
        #[arg(long)]
        limit: Option<usize>,
        /// Show the last stored snapshot instead of ranking now.
        #[arg(long)]
        cached: bool,
    },

    /// Recompute and store recommendation snapshots.
    Refresh {
        /// Only refresh this user (id or name).
        #[arg(long)]
        user: Option<String>,
    },

    /// Queue and generate AI content.
    Enrich {
        #[command(subcommand)]
        action: EnrichAction,
    },

    /// Show a paper with its content artifacts.
    Get {
        /// Paper UUID.
        id: String,
    },

    /// Show database statistics.
    Stats,

    /// Run ingest, embedding, refresh and enrichment in sequence.
    Pipeline {
        #[arg(long)]
        skip_ingest: bool,
        #[arg(long)]
        skip_enrich: bool,
        /// Maximum artifacts to generate in this run.
        #[arg(long)]
        enrich_limit: Option<usize>,
    },

    /// Start the HTTP API server on `[server].bind`.
    Serve,

    /// Print shell completions to stdout.
    Completions {
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum IngestSource {
    /// Query the arXiv API.
    Arxiv {
        /// Category to fetch (repeatable). Defaults to `[arxiv].categories`.
        #[arg(long = "category")]
        categories: Vec<String>,
        /// Defaults to `[arxiv].max_results`.
        #[arg(long)]
        max_results: Option<usize>,
    },
    /// A saved arXiv Atom response.
    Feed { path: PathBuf },
    /// A conference JSON array or JSON-lines file.
    File { path: PathBuf },
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed papers that are missing or have stale embeddings.
    Pending {
        /// Maximum number of papers to embed in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Override the batch size from config (number of texts per API call).
        #[arg(long)]
        batch_size: Option<usize>,

        /// Show counts without performing any embedding.
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete and regenerate all embeddings.
    ///
    /// Useful when switching embedding models or dimensions.
    Rebuild {
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create a user.
    Add {
        name: String,
        /// Preferred category (repeatable).
        #[arg(long = "category")]
        categories: Vec<String>,
        /// Content language. Defaults to `[enrichment].default_language`.
        #[arg(long)]
        language: Option<String>,
    },
    /// List users.
    List,
}

#[derive(Subcommand)]
enum EnrichAction {
    /// Queue content generation for a paper.
    Request {
        /// Paper UUID.
        paper: String,
        /// `translation`, `interpretation`, `speech`, or `infographic`.
        kind: ContentKind,
        /// Defaults to `[enrichment].default_language`.
        #[arg(long)]
        language: Option<String>,
    },
    /// Generate queued content.
    Pending {
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn parse_progress(s: &str) -> Result<ProgressMode, String> {
    ProgressMode::parse(s)
        .ok_or_else(|| format!("invalid progress mode '{}': use human, json, or off", s))
}

/// Logs go to stderr so stdout stays clean for command output.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "pfeed", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            source,
            full,
            dry_run,
            limit,
        } => {
            let target = match source {
                IngestSource::Arxiv {
                    categories,
                    max_results,
                } => IngestTarget::Arxiv {
                    categories: if categories.is_empty() {
                        None
                    } else {
                        Some(categories)
                    },
                    max_results,
                },
                IngestSource::Feed { path } => IngestTarget::AtomFile(path),
                IngestSource::File { path } => IngestTarget::ConferenceFile(path),
            };
            let options = IngestOptions {
                full,
                dry_run,
                limit,
            };
            ingest::run_ingest(&cfg, target, options, progress).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                limit,
                batch_size,
                dry_run,
            } => {
                embed_cmd::run_embed_pending(&cfg, limit, batch_size, dry_run).await?;
            }
            EmbedAction::Rebuild { batch_size } => {
                embed_cmd::run_embed_rebuild(&cfg, batch_size).await?;
            }
        },
        Commands::User { action } => match action {
            UserAction::Add {
                name,
                categories,
                language,
            } => {
                let categories: Vec<String> = categories
                    .iter()
                    .flat_map(|c| paper_feed::models::parse_categories(c))
                    .collect();
                users::run_user_add(&cfg, &name, &categories, language.as_deref()).await?;
            }
            UserAction::List => {
                users::run_user_list(&cfg).await?;
            }
        },
        Commands::Interact {
            user,
            paper,
            kind,
            remove,
        } => {
            users::run_interact(&cfg, &user, &paper, kind, remove).await?;
        }
        Commands::Recommend {
            user,
            offset,
            limit,
            cached,
        } => {
            recommend::run_recommend(&cfg, &user, offset, limit, cached).await?;
        }
        Commands::Refresh { user } => {
            recommend::run_refresh(&cfg, user.as_deref()).await?;
        }
        Commands::Enrich { action } => match action {
            EnrichAction::Request {
                paper,
                kind,
                language,
            } => {
                enrichment::run_enrich_request(&cfg, &paper, kind, language.as_deref()).await?;
            }
            EnrichAction::Pending { limit } => {
                enrichment::run_enrich_pending(&cfg, limit).await?;
            }
        },
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Pipeline {
            skip_ingest,
            skip_enrich,
            enrich_limit,
        } => {
            let options = PipelineOptions {
                skip_ingest,
                skip_enrich,
                enrich_limit,
            };
            pipeline::run_pipeline(&cfg, options, progress).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Completions { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
