//! CLI commands: `cidx init`, `cidx index`, `cidx status`.
//!
//! `index` and `status` run a [`Supervisor`] in this process and the worker
//! as a child process (`cidx worker`).

use anyhow::{bail, Result};
use std::path::Path;
use std::time::Duration;

use crate::config::Config;
use crate::embedding;
use crate::launcher::ProcessLauncher;
use crate::models::IndexSummary;
use crate::progress::{self, ProgressMode};
use crate::store::{SqliteVectorStore, VectorStore};
use crate::supervisor::Supervisor;

/// Create the vector store table. Idempotent.
pub async fn run_init(config: &Config) -> Result<()> {
    let dims = embedding::configured_dims(&config.embedding);
    let store =
        SqliteVectorStore::open_or_create(&config.store.path, &config.store.table, dims).await?;
    let rows = store.count_rows().await?;
    store.close().await;

    println!(
        "Vector store initialized at {} (table '{}', {} dims, {} rows)",
        config.store.path.display(),
        config.store.table,
        dims,
        rows
    );
    Ok(())
}

fn supervisor_for(config: &Config, config_path: &Path) -> Result<Supervisor> {
    let launcher = match &config.worker.program {
        Some(program) => ProcessLauncher::new(program, config_path),
        None => ProcessLauncher::current_exe(config_path)?,
    };
    Supervisor::from_config(config, Box::new(launcher))
}

/// Index `root` through a freshly launched worker and print a summary.
pub async fn run_index(
    config: &Config,
    config_path: &Path,
    root: &Path,
    mode: ProgressMode,
) -> Result<()> {
    let supervisor = supervisor_for(config, config_path)?;
    let reporter = progress::spawn_reporter(supervisor.subscribe(), mode.reporter());

    supervisor.launch()?;
    let outcome = match supervisor
        .wait_until_initialized(config.worker.init_timeout())
        .await
    {
        Ok(()) => supervisor.start_indexing(root).await.map_err(anyhow::Error::from),
        Err(e) => Err(anyhow::Error::from(e)),
    };

    supervisor.shutdown().await;
    drop(supervisor);
    let _ = tokio::time::timeout(Duration::from_secs(1), reporter).await;

    let summary = outcome?;
    print_summary(root, &summary);
    if !summary.success {
        bail!(
            "indexing failed: {}",
            summary.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn print_summary(root: &Path, summary: &IndexSummary) {
    println!("Indexed {}", root.display());
    println!("  files scanned:   {}", summary.files_scanned);
    println!("  chunks sent:     {}", summary.chunks_sent);
    println!("  chunks stored:   {}", summary.chunks_succeeded);
    println!("  chunks failed:   {}", summary.chunks_failed);
    println!("  peak in flight:  {}", summary.peak_in_flight);
    if let Some(error) = &summary.error {
        println!("  error:           {}", error);
    }
}

/// Launch a worker, wait for its initialization outcome, and print the
/// status it reports.
pub async fn run_status(config: &Config, config_path: &Path) -> Result<()> {
    let supervisor = supervisor_for(config, config_path)?;
    supervisor.launch()?;

    let init = supervisor
        .wait_until_initialized(config.worker.init_timeout())
        .await;
    let snapshot = supervisor.get_status().await;
    supervisor.shutdown().await;

    println!("state:  {}", snapshot.state);
    println!("items:  {}", snapshot.item_count);
    if let Some(error) = &snapshot.error {
        println!("error:  {}", error);
    }
    if let Err(e) = init {
        println!("worker: {}", e);
    }
    Ok(())
}
