//! Chronicle command-line tool.
//!
//! Merges chapter extractions into the knowledge base and inspects it:
//!
//! ```bash
//! chronicle merge --all                # every chapter not yet merged
//! chronicle merge chapter_07 --dry-run # preview one chapter
//! chronicle validate --details
//! chronicle status
//! ```
//!
//! Exit status is 0 on success, 1 when the run produced hard errors and 2
//! when it could not start.

mod report;

use anyhow::{Context, Result};
use chronicle_core::extract::ClaudeExtractor;
use chronicle_core::{Credentials, CredentialsError, IngestConfig, Ingestor, Selection};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chronicle", version, about = "Campaign chronicle knowledge base")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct GlobalArgs {
    /// Directory holding the collections and the ledger
    #[arg(long, global = true, default_value = "data")]
    data_dir: PathBuf,

    /// Directory holding chapter narratives and batch files
    #[arg(long, global = true, default_value = "chapters")]
    chapters_dir: PathBuf,

    /// Curated alias declarations (default: DATA_DIR/aliases.json)
    #[arg(long, global = true)]
    aliases: Option<PathBuf>,

    /// Env file with ANTHROPIC_API_KEY (default: .env if present)
    #[arg(long, global = true)]
    credentials: Option<PathBuf>,

    /// Model used for extraction
    #[arg(long, global = true)]
    model: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Merge chapters into the knowledge base
    Merge {
        /// Chapter keys to merge, e.g. chapter_07
        #[arg(conflicts_with = "all")]
        chapters: Vec<String>,

        /// Merge every chapter the ledger has not recorded
        #[arg(long)]
        all: bool,

        /// Run the whole merge in memory and write nothing
        #[arg(long)]
        dry_run: bool,

        /// Merge chapters even if the ledger has them
        #[arg(long)]
        force: bool,

        /// Print every diagnostic
        #[arg(long)]
        details: bool,
    },

    /// Check every cross-reference in the persisted knowledge base
    Validate {
        /// Print every diagnostic
        #[arg(long)]
        details: bool,
    },

    /// Show merged and pending chapters
    Status,

    /// Rebuild the alias index and report conflicts
    Aliases,
}

impl GlobalArgs {
    fn config(&self) -> IngestConfig {
        let mut config = IngestConfig::new(&self.data_dir).with_chapters_dir(&self.chapters_dir);
        if let Some(path) = &self.aliases {
            config = config.with_aliases_file(path);
        }
        if let Some(model) = &self.model {
            config = config.with_model(model);
        }
        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}

/// Log to stderr; `RUST_LOG` overrides the default level.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = cli.global.config();

    match cli.command {
        Command::Merge {
            chapters,
            all,
            dry_run,
            force,
            details,
        } => {
            let selection = if all || chapters.is_empty() {
                Selection::Unmerged
            } else {
                Selection::Keys(chapters)
            };
            let config = config.with_dry_run(dry_run).with_force(force);
            merge(config, cli.global.credentials, &selection, details).await
        }
        Command::Validate { details } => validate(config, details).await,
        Command::Status => status(config).await,
        Command::Aliases => aliases(config).await,
    }
}

async fn open(config: IngestConfig) -> Result<Ingestor> {
    let data_dir = config.data_dir.clone();
    Ingestor::open(config)
        .await
        .with_context(|| format!("cannot load knowledge base from {}", data_dir.display()))
}

async fn merge(
    config: IngestConfig,
    credentials: Option<PathBuf>,
    selection: &Selection,
    details: bool,
) -> Result<ExitCode> {
    let extractor = match Credentials::load(credentials.as_deref()) {
        Ok(credentials) => Some(ClaudeExtractor::from_config(&credentials, &config)),
        // Chapters with a batch file need no credentials; the run decides.
        Err(CredentialsError::Missing) => {
            debug!("no API key; only pre-extracted chapters can be merged");
            None
        }
        Err(e) => return Err(e.into()),
    };

    let dry_run = config.dry_run;
    let mut ingestor = open(config).await?;
    if let Some(extractor) = extractor {
        ingestor = ingestor.with_extractor(extractor);
    }
    for conflict in ingestor.alias_conflicts() {
        warn!(%conflict, "alias conflict in persisted state");
    }

    let run = ingestor.run(selection).await?;
    for chapter in &run.chapters {
        println!("{chapter}");
        if details {
            report::print_diagnostics(&chapter.diagnostics);
        }
    }
    if run.chapters.is_empty() {
        println!("No chapters found in {}", ingestor.config().chapters_dir.display());
    } else if dry_run {
        println!("Dry run: nothing was written");
    }

    Ok(ExitCode::from(run.exit_code() as u8))
}

async fn validate(config: IngestConfig, details: bool) -> Result<ExitCode> {
    let ingestor = open(config).await?;
    let mut diagnostics = ingestor.alias_conflicts().clone();
    diagnostics.extend(ingestor.validate_all());

    report::print_counts(&ingestor.context().kb);
    println!(
        "{} errors, {} warnings",
        diagnostics.errors(),
        diagnostics.warnings()
    );
    if details {
        report::print_diagnostics(&diagnostics);
    }

    Ok(if diagnostics.errors() > 0 {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

async fn status(config: IngestConfig) -> Result<ExitCode> {
    let ingestor = open(config).await?;
    let pending = ingestor.pending().await?;

    report::print_counts(&ingestor.context().kb);
    report::print_ledger(ingestor.ledger());

    if pending.is_empty() {
        println!("No pending chapters");
    } else {
        println!("Pending ({}):", pending.len());
        for source in &pending {
            let via = if source.needs_extraction() { "extract" } else { "batch file" };
            println!("  {} ({via})", source.key);
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn aliases(config: IngestConfig) -> Result<ExitCode> {
    let ingestor = open(config).await?;
    report::print_aliases(&ingestor.context().aliases);

    let conflicts = ingestor.alias_conflicts();
    if conflicts.is_empty() {
        println!("No alias conflicts");
    } else {
        println!("{} conflicts:", conflicts.len());
        report::print_diagnostics(conflicts);
    }
    Ok(ExitCode::SUCCESS)
}
