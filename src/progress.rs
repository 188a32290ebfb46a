//! Indexing progress reporting.
//!
//! Renders the supervisor's [`IndexEvent`] stream during `cidx index` so
//! users see which files are being chunked and what failed. Progress is
//! emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::models::IndexEvent;

/// Reports indexing progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &IndexEvent);
}

/// Human-friendly progress on stderr: "index  src/main.rs  3 chunks".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: &IndexEvent) {
        let line = match event {
            IndexEvent::IndexingStart { root } => format!("index {}  scanning...\n", root),
            // Only the dispatched milestone; the chunked one would double every line.
            IndexEvent::IndexingProgress {
                file_path,
                progress,
                chunks,
            } if *progress >= 100 => {
                format!("index  {}  {} chunks\n", file_path, format_number(*chunks as u64))
            }
            IndexEvent::IndexingProgress { .. } => return,
            IndexEvent::IndexingError { file_path, error } => {
                format!("index  {}  error: {}\n", file_path, error)
            }
            IndexEvent::IndexingFinished {
                success,
                files_scanned,
                chunks_sent,
                error,
            } => {
                let verdict = if *success { "done" } else { "failed" };
                let mut line = format!(
                    "index {}  {} files, {} chunks",
                    verdict,
                    format_number(*files_scanned),
                    format_number(*chunks_sent)
                );
                if let Some(error) = error {
                    line.push_str(&format!(" ({})", error));
                }
                line.push('\n');
                line
            }
            IndexEvent::ServiceStatus { status, error } => match error {
                Some(error) => format!("worker {}: {}\n", status, error),
                None => format!("worker {}\n", status),
            },
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: &IndexEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: &IndexEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "off" | "none" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

/// Feed every event from `events` to `reporter` until the channel closes.
///
/// Lagging receivers skip the missed events.
pub fn spawn_reporter(
    mut events: broadcast::Receiver<IndexEvent>,
    reporter: Box<dyn ProgressReporter>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => reporter.report(&event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "progress reporter lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
