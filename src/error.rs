//! Errors returned by the supervisor's control surface.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("indexing service not initialized: service has not finished initializing")]
    NotInitialized,

    #[error("an indexing run is already active")]
    AlreadyRunning,

    #[error("indexing worker is not running")]
    WorkerUnavailable,

    #[error("indexing worker failed to initialize: {0}")]
    InitFailed(String),

    #[error("indexing worker exited")]
    WorkerExited,

    #[error("timed out waiting for the indexing worker")]
    Timeout,

    #[error("failed to launch indexing worker: {0}")]
    Launch(String),

    #[error("index root does not exist or is not a directory: {}", .0.display())]
    InvalidRoot(PathBuf),
}
