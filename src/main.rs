//! # Community Digest CLI (`digest`)
//!
//! ## Usage
//!
//! ```bash
//! digest --config ./config/digest.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `digest init` | Create the SQLite database and schema |
//! | `digest sync <job>` | Sync `summaries`, `messages`, `forums`, `repositories`, or `all` |
//! | `digest checkpoint <tenant>` | Show where the next sync would start |
//! | `digest stats` | Per tenant/table counts and checkpoints |
//! | `digest completions <shell>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! digest init --config ./config/digest.toml
//!
//! # Summarize chat for one tenant
//! digest sync summaries --tenant acme
//!
//! # Everything, for every tenant, with JSON progress on stderr
//! digest sync all --progress json
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use tracing::info;

use community_digest::config;
use community_digest::ingest;
use community_digest::logging::init_logging;
use community_digest::migrate;
use community_digest::pipeline::JobKind;
use community_digest::progress::ProgressMode;
use community_digest::stats;

/// Community Digest CLI: incremental hierarchical summarization of
/// community chat, forums, and issues into a per-tenant vector store.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/digest.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "digest",
    about = "Community Digest: incremental summaries of community conversations",
    version,
    long_about = "Community Digest groups chat records by day, channel, and thread, rolls them up \
    into thread, channel, and day summaries, reconciles edited forum posts and issues, and \
    writes everything as embedded chunks to a per-tenant SQLite vector store. Runs resume \
    from what is already stored."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/digest.toml")]
    config: PathBuf,

    /// Progress on stderr: off, human, or json. Default: human when stderr
    /// is a terminal, otherwise off.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the `vectors` table. Safe to run
    /// more than once.
    Init,

    /// Sync one job for every tenant, or for the ones named with `--tenant`.
    ///
    /// Failures stay with their tenant: the others still run, and the
    /// command exits non-zero once all of them have finished.
    Sync {
        /// What to sync.
        #[arg(value_enum)]
        job: JobKind,

        /// Restrict to this tenant (repeatable).
        #[arg(long = "tenant")]
        tenants: Vec<String>,
    },

    /// Show a tenant's derived checkpoints without writing anything.
    Checkpoint {
        /// Tenant id.
        tenant: String,

        /// Only this table (`summaries`, `messages`, `forum`, `github`).
        #[arg(long)]
        table: Option<String>,
    },

    /// Show per tenant/table statistics.
    Stats,

    /// Print shell completions.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "digest", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    init_logging(&cfg.logging)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sync { job, tenants } => {
            let progress = cli
                .progress
                .map(ProgressMode::from)
                .unwrap_or_else(ProgressMode::default_for_tty);
            info!(%job, tenants = tenants.len(), "starting sync");
            let ok = ingest::run_sync(&cfg, job, &tenants, progress).await?;
            if !ok {
                std::process::exit(1);
            }
        }
        Commands::Checkpoint { tenant, table } => {
            stats::run_checkpoint(&cfg, &tenant, table.as_deref()).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
