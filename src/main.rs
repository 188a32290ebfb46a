//! # codeindex CLI (`cidx`)
//!
//! Indexes a source tree into a local vector store. Embedding and store
//! writes run in a separate worker process that `cidx` launches and
//! supervises.
//!
//! ## Usage
//!
//! ```bash
//! cidx --config ./config/cidx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cidx init` | Create the vector store table |
//! | `cidx index [ROOT]` | Chunk, embed and store every allowed file under ROOT |
//! | `cidx status` | Print the worker's status snapshot |
//! | `cidx worker` | Run the worker runtime on stdin/stdout (internal) |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use codeindex::progress::ProgressMode;
use codeindex::{config, index_cmd, logging, worker};

/// codeindex: supervised code indexing into a local vector store.
#[derive(Parser)]
#[command(name = "cidx", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/cidx.toml`. A missing file means every setting
    /// takes its default.
    #[arg(long, global = true, default_value = "./config/cidx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the vector store database and table.
    ///
    /// Idempotent: running it again keeps existing rows.
    Init,

    /// Index a source tree.
    ///
    /// Launches a worker, waits for it to initialize, walks ROOT and sends
    /// every chunk through the worker. Exits non-zero if the run fails.
    Index {
        /// Directory to index. Defaults to the current directory.
        root: Option<PathBuf>,

        /// Progress output on stderr: `off`, `human`, or `json`.
        /// Defaults to `human` when stderr is a TTY.
        #[arg(long, value_parser = parse_progress)]
        progress: Option<ProgressMode>,
    },

    /// Print the indexed item count and worker state.
    Status,

    /// Run the indexing worker on stdin/stdout.
    #[command(hide = true)]
    Worker,
}

fn parse_progress(s: &str) -> Result<ProgressMode, String> {
    ProgressMode::parse(s).ok_or_else(|| format!("invalid progress mode '{}': use off, human, or json", s))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::setup_logging();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => index_cmd::run_init(&cfg).await?,
        Commands::Index { root, progress } => {
            let root = match root {
                Some(root) => root,
                None => std::env::current_dir()?,
            };
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            index_cmd::run_index(&cfg, &cli.config, &root, mode).await?;
        }
        Commands::Status => index_cmd::run_status(&cfg, &cli.config).await?,
        Commands::Worker => {
            // Exit directly: the stdin reader thread may still be blocked
            // and would hold up runtime shutdown.
            let code = match worker::serve_stdio(cfg).await {
                Ok(()) => 0,
                Err(e) => {
                    tracing::error!(error = %format!("{:#}", e), "worker failed");
                    1
                }
            };
            std::process::exit(code);
        }
    }

    Ok(())
}
