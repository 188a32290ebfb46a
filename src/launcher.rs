//! Starting workers.
//!
//! A [`WorkerLauncher`] produces a [`WorkerHandle`]: the two protocol
//! streams plus a future that resolves when the worker is gone. The
//! supervisor never cares whether that is a child process or a task.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tracing::{debug, info};

use crate::worker::{self, WorkerResources};

/// How a worker ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    pub success: bool,
    pub code: Option<i32>,
    pub detail: String,
}

impl ExitReport {
    pub fn clean() -> Self {
        Self {
            success: true,
            code: Some(0),
            detail: "exited cleanly".to_string(),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            code: None,
            detail: detail.into(),
        }
    }
}

pub type ExitFuture = Pin<Box<dyn Future<Output = ExitReport> + Send>>;

/// A running worker as seen by the supervisor.
pub struct WorkerHandle {
    /// Worker → supervisor events.
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    /// Supervisor → worker commands.
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
    pub exit: ExitFuture,
}

pub trait WorkerLauncher: Send + Sync {
    /// Start one worker. Must be called inside a Tokio runtime.
    fn launch(&self) -> Result<WorkerHandle>;
}

/// Runs `<program> --config <path> worker` as a child process.
pub struct ProcessLauncher {
    program: PathBuf,
    config_path: PathBuf,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            config_path: config_path.into(),
        }
    }

    /// Launch the currently running executable as the worker.
    pub fn current_exe(config_path: impl Into<PathBuf>) -> Result<Self> {
        let program = std::env::current_exe().context("cannot locate the running executable")?;
        Ok(Self::new(program, config_path))
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self) -> Result<WorkerHandle> {
        let mut child = tokio::process::Command::new(&self.program)
            .arg("--config")
            .arg(&self.config_path)
            .arg("worker")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.program.display()))?;

        let stdin = child
            .stdin
            .take()
            .context("worker stdin was not captured")?;
        let stdout = child
            .stdout
            .take()
            .context("worker stdout was not captured")?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr));
        }

        info!(pid = ?child.id(), program = %self.program.display(), "worker process started");

        let exit = Box::pin(async move {
            match child.wait().await {
                Ok(status) => ExitReport {
                    success: status.success(),
                    code: status.code(),
                    detail: status.to_string(),
                },
                Err(e) => ExitReport::failed(format!("failed to wait for worker: {}", e)),
            }
        });

        Ok(WorkerHandle {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            exit,
        })
    }
}

async fn forward_stderr(stderr: tokio::process::ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "codeindex::worker_stderr", "{}", line);
    }
}

const PIPE_CAPACITY: usize = 64 * 1024;

/// Runs the worker runtime as a task on in-memory pipes.
///
/// `factory` is called once per launch, so every relaunch gets fresh
/// resources.
pub struct InProcessLauncher<F> {
    factory: F,
}

impl<F> InProcessLauncher<F> {
    pub fn new(factory: F) -> Self {
        Self { factory }
    }
}

impl<F, R> WorkerLauncher for InProcessLauncher<F>
where
    F: Fn() -> R + Send + Sync,
    R: WorkerResources,
{
    fn launch(&self) -> Result<WorkerHandle> {
        let (commands_out, commands_in) = tokio::io::duplex(PIPE_CAPACITY);
        let (events_out, events_in) = tokio::io::duplex(PIPE_CAPACITY);

        let task = tokio::spawn(worker::serve(commands_in, events_out, (self.factory)()));
        let exit = Box::pin(async move {
            match task.await {
                Ok(Ok(())) => ExitReport::clean(),
                Ok(Err(e)) => ExitReport::failed(format!("{:#}", e)),
                Err(e) => ExitReport::failed(e.to_string()),
            }
        });

        Ok(WorkerHandle {
            reader: Box::new(events_in),
            writer: Box::new(commands_out),
            exit,
        })
    }
}
