//! Supervisor: owns the worker, the traversal and the in-flight accounting.
//!
//! The supervisor launches a worker through a [`WorkerLauncher`], mirrors
//! its lifecycle from protocol events, and feeds it chunks under a bounded
//! [`Gate`]. All mirrored state lives behind one lock and is only changed
//! by the supervisor itself, in response to worker events or caller
//! requests.
//!
//! # Indexing run
//!
//! ```text
//! scan root ─▶ read file ─▶ chunk ─▶ acquire slot ─▶ send addChunk ─┐
//!                                        ▲                           │
//!                                        └── slot dropped on result ◀┘
//! ```
//!
//! After traversal the run drains: it waits for every dispatched chunk to
//! be answered before reporting `indexing-finished`. If the worker exits,
//! every chunk still in flight is counted as failed, the gate is closed so
//! a blocked traversal wakes, and the run reports failure.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::chunk::{chunk_code, ChunkOptions};
use crate::config::Config;
use crate::error::IndexError;
use crate::gate::{Gate, Slot};
use crate::launcher::{ExitFuture, ExitReport, WorkerLauncher};
use crate::models::{ChunkRecord, IndexEvent, IndexSummary, StatusSnapshot};
use crate::protocol::{ChunkOutcome, Command, Event, InitOutcome};
use crate::protocol_wire::{self, ProtocolError};
use crate::scan::{ScanEntry, Scanner};

/// How long a worker gets to exit after closing its output.
const EXIT_GRACE: Duration = Duration::from_secs(10);

const EVENT_CAPACITY: usize = 1024;

/// The supervisor's mirror of the worker lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Absent,
    Launching,
    Ready,
    Initializing,
    Initialized,
    InitFailed,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Absent => "absent",
            WorkerStatus::Launching => "launching",
            WorkerStatus::Ready => "ready",
            WorkerStatus::Initializing => "initializing",
            WorkerStatus::Initialized => "initialized",
            WorkerStatus::InitFailed => "init-failed",
        }
    }
}

/// Settings the supervisor needs from [`Config`].
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub max_concurrent: usize,
    pub chunk_options: ChunkOptions,
    pub status_timeout: Duration,
}

impl SupervisorOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrent: config.indexing.max_concurrent.max(1),
            chunk_options: config.indexing.chunk_options(),
            status_timeout: config.worker.status_timeout(),
        }
    }
}

struct WorkerLink {
    generation: u64,
    commands: mpsc::UnboundedSender<Command>,
    monitor: Option<JoinHandle<()>>,
}

struct InFlight {
    file_path: String,
    _slot: Slot,
}

struct ActiveRun {
    id: u64,
    gate: Gate,
    in_flight: HashMap<String, InFlight>,
    sent: u64,
    succeeded: u64,
    failed: u64,
    peak: usize,
    abort: Option<String>,
}

impl ActiveRun {
    fn new(id: u64, gate: Gate) -> Self {
        Self {
            id,
            gate,
            in_flight: HashMap::new(),
            sent: 0,
            succeeded: 0,
            failed: 0,
            peak: 0,
            abort: None,
        }
    }
}

struct State {
    generation: u64,
    worker: Option<WorkerLink>,
    status: WorkerStatus,
    last_error: Option<String>,
    next_run: u64,
    run: Option<ActiveRun>,
    pending_status: VecDeque<oneshot::Sender<StatusSnapshot>>,
}

struct Shared {
    launcher: Box<dyn WorkerLauncher>,
    scanner: Scanner,
    options: SupervisorOptions,
    state: Mutex<State>,
    status_tx: watch::Sender<WorkerStatus>,
    events: broadcast::Sender<IndexEvent>,
}

/// Handle to the indexing service. Cheap to clone.
#[derive(Clone)]
pub struct Supervisor {
    shared: Arc<Shared>,
}

impl Supervisor {
    pub fn new(
        launcher: Box<dyn WorkerLauncher>,
        scanner: Scanner,
        options: SupervisorOptions,
    ) -> Self {
        let (status_tx, _) = watch::channel(WorkerStatus::Absent);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                launcher,
                scanner,
                options,
                state: Mutex::new(State {
                    generation: 0,
                    worker: None,
                    status: WorkerStatus::Absent,
                    last_error: None,
                    next_run: 0,
                    run: None,
                    pending_status: VecDeque::new(),
                }),
                status_tx,
                events,
            }),
        }
    }

    /// Build a supervisor from config.
    pub fn from_config(config: &Config, launcher: Box<dyn WorkerLauncher>) -> anyhow::Result<Self> {
        let scanner = Scanner::new(&config.indexing)?;
        Ok(Self::new(
            launcher,
            scanner,
            SupervisorOptions::from_config(config),
        ))
    }

    /// Receive [`IndexEvent`]s published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<IndexEvent> {
        self.shared.events.subscribe()
    }

    pub fn status(&self) -> WorkerStatus {
        self.shared.state.lock().status
    }

    /// Error reported by the last failed initialization or worker fault.
    pub fn last_error(&self) -> Option<String> {
        self.shared.state.lock().last_error.clone()
    }

    /// Chunks dispatched in the active run and not yet answered.
    pub fn in_flight(&self) -> usize {
        self.shared
            .state
            .lock()
            .run
            .as_ref()
            .map(|run| run.in_flight.len())
            .unwrap_or(0)
    }

    /// Start the worker. Does nothing if one is already tracked.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn launch(&self) -> Result<(), IndexError> {
        let mut state = self.shared.state.lock();
        if state.worker.is_some() {
            debug!("worker already running");
            return Ok(());
        }

        let handle = self
            .shared
            .launcher
            .launch()
            .map_err(|e| IndexError::Launch(format!("{:#}", e)))?;

        state.generation += 1;
        let generation = state.generation;
        let (commands, rx) = mpsc::unbounded_channel();

        tokio::spawn(write_commands(handle.writer, rx));
        let monitor = tokio::spawn(self.clone().monitor(generation, handle.reader, handle.exit));

        state.worker = Some(WorkerLink {
            generation,
            commands,
            monitor: Some(monitor),
        });
        state.last_error = None;
        self.set_status(&mut state, WorkerStatus::Launching);
        self.publish_status("launching", None);
        info!(generation, "launching indexing worker");
        Ok(())
    }

    /// Ask the worker to (re)initialize. Does not wait for the outcome.
    pub fn request_initialize(&self) -> Result<(), IndexError> {
        let mut state = self.shared.state.lock();
        self.send_initialize(&mut state)
    }

    /// Wait until the worker reports a successful initialization.
    pub async fn wait_until_initialized(&self, timeout: Duration) -> Result<(), IndexError> {
        let mut status = self.shared.status_tx.subscribe();
        let wait = async {
            loop {
                let current = *status.borrow_and_update();
                match current {
                    WorkerStatus::Initialized => return Ok(()),
                    WorkerStatus::InitFailed => {
                        let message = self
                            .last_error()
                            .unwrap_or_else(|| "unknown initialization error".to_string());
                        return Err(IndexError::InitFailed(message));
                    }
                    WorkerStatus::Absent => {
                        let launched = self.shared.state.lock().generation > 0;
                        return Err(if launched {
                            IndexError::WorkerExited
                        } else {
                            IndexError::WorkerUnavailable
                        });
                    }
                    _ => {}
                }
                if status.changed().await.is_err() {
                    return Err(IndexError::WorkerUnavailable);
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| IndexError::Timeout)?
    }

    /// Fresh status from the worker, or a synthetic `disconnected`
    /// snapshot when no worker is running. Never blocks longer than the
    /// configured status timeout.
    pub async fn get_status(&self) -> StatusSnapshot {
        let reply = {
            let mut state = self.shared.state.lock();
            let Some(link) = state.worker.as_ref() else {
                return StatusSnapshot::disconnected();
            };
            if link.commands.send(Command::GetStatus).is_err() {
                return StatusSnapshot::disconnected();
            }
            let (tx, rx) = oneshot::channel();
            state.pending_status.push_back(tx);
            rx
        };

        match tokio::time::timeout(self.shared.options.status_timeout, reply).await {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(_)) => StatusSnapshot::disconnected(),
            Err(_) => {
                warn!("status request timed out");
                StatusSnapshot {
                    item_count: 0,
                    state: self.status().as_str().to_string(),
                    error: Some("timed out waiting for worker status".to_string()),
                }
            }
        }
    }

    /// Stop the worker. An active run is aborted and its in-flight chunks
    /// are counted as failed.
    pub async fn shutdown(&self) {
        let monitor = {
            let mut state = self.shared.state.lock();
            let Some(mut link) = state.worker.take() else {
                return;
            };
            info!(generation = link.generation, "shutting down indexing worker");
            self.abort_run(&mut state, "indexing worker shut down".to_string());
            state.pending_status.clear();
            self.set_status(&mut state, WorkerStatus::Absent);
            self.publish_status("stopped", None);
            link.monitor.take()
        };

        if let Some(monitor) = monitor {
            if tokio::time::timeout(EXIT_GRACE, monitor).await.is_err() {
                warn!("worker did not stop in time");
            }
        }
    }

    /// Index every allowed file under `root`.
    ///
    /// Fails up front when the worker is not initialized, another run is
    /// active, or `root` is not a directory. Once started, the run always
    /// returns a summary; a worker failure mid-run shows up as
    /// `success: false`.
    pub async fn start_indexing(&self, root: impl AsRef<Path>) -> Result<IndexSummary, IndexError> {
        let root = root.as_ref().to_path_buf();
        let gate = Gate::new(self.shared.options.max_concurrent);

        let run_id = {
            let mut state = self.shared.state.lock();
            if state.status != WorkerStatus::Initialized || state.worker.is_none() {
                return Err(IndexError::NotInitialized);
            }
            if state.run.is_some() {
                return Err(IndexError::AlreadyRunning);
            }
            if !root.is_dir() {
                return Err(IndexError::InvalidRoot(root));
            }
            state.next_run += 1;
            let id = state.next_run;
            state.run = Some(ActiveRun::new(id, gate.clone()));
            id
        };

        info!(root = %root.display(), max_concurrent = gate.capacity(), "indexing started");
        self.publish(IndexEvent::IndexingStart {
            root: root.display().to_string(),
        });

        let mut files_scanned = 0u64;
        let mut outcome = self.traverse(run_id, &root, &gate, &mut files_scanned).await;
        if outcome.is_ok() && gate.drain().await.is_err() {
            outcome = Err(self.abort_reason(run_id));
        }

        let summary = {
            let mut state = self.shared.state.lock();
            let run = match state.run.take() {
                Some(run) if run.id == run_id => run,
                other => {
                    state.run = other;
                    return Err(IndexError::WorkerExited);
                }
            };
            let error = run.abort.clone().or_else(|| outcome.err());
            IndexSummary {
                success: error.is_none(),
                files_scanned,
                chunks_sent: run.sent,
                chunks_succeeded: run.succeeded,
                chunks_failed: run.failed + run.in_flight.len() as u64,
                peak_in_flight: run.peak,
                error,
            }
        };

        if summary.success {
            info!(
                files = summary.files_scanned,
                chunks = summary.chunks_sent,
                failed = summary.chunks_failed,
                "indexing finished"
            );
        } else {
            error!(
                error = summary.error.as_deref().unwrap_or_default(),
                chunks = summary.chunks_sent,
                "indexing failed"
            );
        }
        self.publish(IndexEvent::IndexingFinished {
            success: summary.success,
            files_scanned: summary.files_scanned,
            chunks_sent: summary.chunks_sent,
            error: summary.error.clone(),
        });
        Ok(summary)
    }

    async fn traverse(
        &self,
        run_id: u64,
        root: &Path,
        gate: &Gate,
        files_scanned: &mut u64,
    ) -> Result<(), String> {
        let scanner = self.shared.scanner.clone();
        let walk_root = root.to_path_buf();
        let entries = tokio::task::spawn_blocking(move || scanner.scan(&walk_root))
            .await
            .map_err(|e| format!("traversal failed: {}", e))?
            .map_err(|e| format!("{:#}", e))?;

        for entry in entries {
            let path = match entry {
                ScanEntry::File(path) => path,
                ScanEntry::Error { path, error } => {
                    self.report_scoped_error(&path, error);
                    continue;
                }
            };

            *files_scanned += 1;
            let file_path = path.display().to_string();
            let chunks = match self.read_and_chunk(&path, &file_path).await {
                Ok(chunks) => chunks,
                Err(error) => {
                    self.report_scoped_error(&path, error);
                    continue;
                }
            };

            let count = chunks.len();
            self.publish(IndexEvent::IndexingProgress {
                file_path: file_path.clone(),
                progress: 50,
                chunks: count,
            });

            for chunk in chunks {
                self.dispatch(run_id, gate, chunk).await?;
            }

            self.publish(IndexEvent::IndexingProgress {
                file_path,
                progress: 100,
                chunks: count,
            });
        }

        Ok(())
    }

    async fn read_and_chunk(&self, path: &Path, file_path: &str) -> Result<Vec<ChunkRecord>, String> {
        let bytes = tokio::fs::read(path).await.map_err(|e| e.to_string())?;
        // Invalid UTF-8 becomes U+FFFD; one stray byte must not drop the file.
        let content = String::from_utf8_lossy(&bytes);
        chunk_code(file_path, &content, self.shared.options.chunk_options)
            .map_err(|e| format!("{:#}", e))
    }

    fn report_scoped_error(&self, path: &Path, error: String) {
        warn!(path = %path.display(), error = %error, "skipping entry");
        self.publish(IndexEvent::IndexingError {
            file_path: path.display().to_string(),
            error,
        });
    }

    /// Reserve a slot and hand one chunk to the worker.
    async fn dispatch(&self, run_id: u64, gate: &Gate, chunk: ChunkRecord) -> Result<(), String> {
        let slot = gate.acquire().await.map_err(|_| self.abort_reason(run_id))?;

        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        let Some(link) = state.worker.as_ref() else {
            return Err("indexing worker exited".to_string());
        };
        let run = match state.run.as_mut() {
            Some(run) if run.id == run_id => run,
            _ => return Err("indexing run was replaced".to_string()),
        };
        if let Some(reason) = &run.abort {
            return Err(reason.clone());
        }

        let chunk_id = chunk.id.clone();
        run.in_flight.insert(
            chunk_id.clone(),
            InFlight {
                file_path: chunk.file_path.clone(),
                _slot: slot,
            },
        );
        if link.commands.send(Command::AddChunk(chunk)).is_err() {
            run.in_flight.remove(&chunk_id);
            return Err("worker command channel closed".to_string());
        }
        run.sent += 1;
        run.peak = run.peak.max(run.in_flight.len());
        Ok(())
    }

    fn abort_reason(&self, run_id: u64) -> String {
        self.shared
            .state
            .lock()
            .run
            .as_ref()
            .filter(|run| run.id == run_id)
            .and_then(|run| run.abort.clone())
            .unwrap_or_else(|| "indexing run aborted".to_string())
    }

    fn send_initialize(&self, state: &mut State) -> Result<(), IndexError> {
        let link = state.worker.as_ref().ok_or(IndexError::WorkerUnavailable)?;
        link.commands
            .send(Command::Initialize)
            .map_err(|_| IndexError::WorkerUnavailable)?;
        if matches!(state.status, WorkerStatus::Ready | WorkerStatus::InitFailed) {
            self.set_status(state, WorkerStatus::Initializing);
        }
        Ok(())
    }

    /// Read events from one worker until its stream ends, then account for
    /// its exit.
    async fn monitor(
        self,
        generation: u64,
        mut reader: Box<dyn AsyncRead + Send + Unpin>,
        exit: ExitFuture,
    ) {
        loop {
            match protocol_wire::read_message(&mut reader).await {
                Ok(frame) => match protocol_wire::decode::<Event>(&frame) {
                    Ok(event) => self.handle_event(generation, event),
                    Err(e) => warn!(error = %e, "ignoring malformed message from worker"),
                },
                Err(ProtocolError::ConnectionClosed) => break,
                Err(e) => {
                    warn!(error = %e, "worker event stream failed");
                    break;
                }
            }
        }

        let report = match tokio::time::timeout(EXIT_GRACE, exit).await {
            Ok(report) => report,
            Err(_) => ExitReport::failed("worker closed its output but did not exit"),
        };
        self.handle_exit(generation, report);
    }

    fn handle_event(&self, generation: u64, event: Event) {
        let mut state = self.shared.state.lock();
        let current = state
            .worker
            .as_ref()
            .is_some_and(|link| link.generation == generation);
        if !current {
            debug!(generation, kind = event.kind(), "ignoring event from stale worker");
            return;
        }

        match event {
            Event::Ready => {
                info!("worker ready");
                self.set_status(&mut state, WorkerStatus::Ready);
                self.publish_status("ready", None);
                if let Err(e) = self.send_initialize(&mut state) {
                    warn!(error = %e, "could not request initialization");
                }
            }
            Event::Initialized(InitOutcome { success: true, .. }) => {
                if state.status != WorkerStatus::Initialized {
                    info!("worker initialized");
                    self.set_status(&mut state, WorkerStatus::Initialized);
                    self.publish_status("initialized", None);
                }
            }
            Event::Initialized(InitOutcome { error, .. }) => {
                let message = error.unwrap_or_else(|| "unknown initialization error".to_string());
                error!(error = %message, "worker failed to initialize");
                state.last_error = Some(message.clone());
                self.set_status(&mut state, WorkerStatus::InitFailed);
                self.abort_run(&mut state, format!("initialization failed: {}", message));
                self.publish_status("error", Some(message));
            }
            Event::AddChunkResult(outcome) => self.complete_chunk(&mut state, outcome),
            Event::StatusResult(snapshot) => match state.pending_status.pop_front() {
                Some(reply) => {
                    let _ = reply.send(snapshot);
                }
                None => debug!("unsolicited status result"),
            },
            Event::ServiceError(fault) => {
                error!(message = %fault.message, origin = ?fault.origin, "worker reported a fault");
                state.last_error = Some(fault.message.clone());
                self.publish_status("error", Some(fault.message));
            }
        }
    }

    fn complete_chunk(&self, state: &mut State, outcome: ChunkOutcome) {
        let Some(run) = state.run.as_mut() else {
            warn!(chunk_id = %outcome.chunk_id, "result for chunk outside any run");
            return;
        };
        let Some(entry) = run.in_flight.remove(&outcome.chunk_id) else {
            warn!(chunk_id = %outcome.chunk_id, "result for unknown chunk");
            return;
        };

        if outcome.success {
            run.succeeded += 1;
        } else {
            run.failed += 1;
            let error = outcome.error.unwrap_or_else(|| "unknown error".to_string());
            debug!(chunk_id = %outcome.chunk_id, error = %error, "chunk failed");
            self.publish(IndexEvent::IndexingError {
                file_path: entry.file_path,
                error,
            });
        }
    }

    fn handle_exit(&self, generation: u64, report: ExitReport) {
        let mut state = self.shared.state.lock();
        let tracked = state
            .worker
            .as_ref()
            .is_some_and(|link| link.generation == generation);
        if !tracked {
            debug!(generation, detail = %report.detail, "untracked worker exited");
            return;
        }

        state.worker = None;
        state.pending_status.clear();
        self.set_status(&mut state, WorkerStatus::Absent);

        if report.success {
            info!(detail = %report.detail, "worker exited");
        } else {
            error!(detail = %report.detail, code = ?report.code, "worker crashed");
            state.last_error = Some(report.detail.clone());
        }
        self.abort_run(&mut state, "indexing worker exited".to_string());
        self.publish_status("crashed", (!report.success).then_some(report.detail));
    }

    /// Fail the active run: in-flight chunks count as failed and any
    /// traversal waiting on the gate is woken.
    fn abort_run(&self, state: &mut State, reason: String) {
        let Some(run) = state.run.as_mut() else {
            return;
        };
        let lost = run.in_flight.len();
        if lost > 0 || run.abort.is_none() {
            warn!(lost, reason = %reason, "aborting indexing run");
        }
        run.failed += lost as u64;
        run.in_flight.clear();
        run.abort.get_or_insert(reason);
        run.gate.close();
    }

    fn set_status(&self, state: &mut State, status: WorkerStatus) {
        if state.status != status {
            debug!(from = state.status.as_str(), to = status.as_str(), "worker status");
        }
        state.status = status;
        self.shared.status_tx.send_replace(status);
    }

    fn publish_status(&self, status: &str, error: Option<String>) {
        self.publish(IndexEvent::ServiceStatus {
            status: status.to_string(),
            error,
        });
    }

    fn publish(&self, event: IndexEvent) {
        // No subscribers is fine.
        let _ = self.shared.events.send(event);
    }
}

async fn write_commands(
    mut writer: Box<dyn AsyncWrite + Send + Unpin>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    while let Some(command) = commands.recv().await {
        if let Err(e) = protocol_wire::send(&mut writer, &command).await {
            warn!(error = %e, kind = command.kind(), "failed to write command to worker");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexingConfig;
    use crate::launcher::WorkerHandle;

    struct NoLauncher;

    impl WorkerLauncher for NoLauncher {
        fn launch(&self) -> anyhow::Result<WorkerHandle> {
            anyhow::bail!("no worker binary")
        }
    }

    fn supervisor() -> Supervisor {
        Supervisor::new(
            Box::new(NoLauncher),
            Scanner::new(&IndexingConfig::default()).unwrap(),
            SupervisorOptions {
                max_concurrent: 2,
                chunk_options: ChunkOptions::default(),
                status_timeout: Duration::from_millis(100),
            },
        )
    }

    #[tokio::test]
    async fn status_is_disconnected_without_worker() {
        let sup = supervisor();
        assert_eq!(sup.get_status().await, StatusSnapshot::disconnected());
        assert_eq!(sup.status(), WorkerStatus::Absent);
    }

    #[tokio::test]
    async fn indexing_requires_initialized_worker() {
        let sup = supervisor();
        let err = sup.start_indexing(".").await.unwrap_err();
        assert!(matches!(err, IndexError::NotInitialized));
        assert!(err.to_string().contains("not initialized"));
    }

    #[tokio::test]
    async fn launch_failure_is_reported() {
        let sup = supervisor();
        let err = sup.launch().unwrap_err();
        assert!(matches!(err, IndexError::Launch(ref m) if m.contains("no worker binary")));
        assert_eq!(sup.status(), WorkerStatus::Absent);
    }

    #[tokio::test]
    async fn waiting_without_worker_fails_fast() {
        let sup = supervisor();
        let err = sup
            .wait_until_initialized(Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::WorkerUnavailable));
    }

    #[tokio::test]
    async fn shutdown_without_worker_is_noop() {
        let sup = supervisor();
        sup.shutdown().await;
        assert_eq!(sup.in_flight(), 0);
        assert!(matches!(
            sup.request_initialize(),
            Err(IndexError::WorkerUnavailable)
        ));
    }
}
