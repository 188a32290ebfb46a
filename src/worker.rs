//! Worker runtime: the process that owns the embedder and the vector store.
//!
//! The runtime reads [`Command`]s from its input, handles them strictly one
//! at a time in arrival order, and writes exactly one [`Event`] per command
//! (plus `ready` at startup). The only work that overlaps command handling
//! is the initialization attempt, so `getStatus` and early `addChunk`
//! commands are answered while the store and model are still loading.
//!
//! ```text
//! Launching ──▶ Ready ──▶ Initializing ──▶ Initialized
//!                              │
//!                              └──────────▶ InitFailed ──(initialize)──▶ Initializing
//! ```
//!
//! End of input is a clean shutdown. An error or panic inside the runtime
//! is reported as `serviceError` before [`serve`] returns `Err`.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::embedding::{self, Embedder};
use crate::models::{ChunkRecord, LifecycleState, StatusSnapshot, VectorRow};
use crate::protocol::{ChunkOutcome, Command, Event, InitOutcome, ServiceFault};
use crate::protocol_wire::{self, ProtocolError};
use crate::store::{self, SqliteVectorStore, VectorStore};

/// Embedder and store owned by an initialized worker.
#[derive(Clone)]
pub struct Backend {
    pub embedder: Arc<dyn Embedder>,
    pub store: Arc<dyn VectorStore>,
}

/// Opens the worker's heavy resources. Called once per initialization
/// attempt.
#[async_trait]
pub trait WorkerResources: Send + Sync + 'static {
    async fn open(&self) -> Result<Backend>;
}

/// Resources described by the `[store]` and `[embedding]` config sections.
pub struct ConfiguredResources {
    config: Config,
}

impl ConfiguredResources {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl WorkerResources for ConfiguredResources {
    async fn open(&self) -> Result<Backend> {
        let dims = embedding::configured_dims(&self.config.embedding);
        let store = SqliteVectorStore::open_or_create(
            &self.config.store.path,
            &self.config.store.table,
            dims,
        )
        .await?;

        let embedder: Arc<dyn Embedder> =
            Arc::from(embedding::create_embedder(&self.config.embedding).await?);
        if embedder.dims() != store.dims() {
            anyhow::bail!(
                "embedder '{}' produces {} dimensions, store expects {}",
                embedder.model_name(),
                embedder.dims(),
                store.dims()
            );
        }

        Ok(Backend {
            embedder,
            store: Arc::new(store),
        })
    }
}

/// Serialized writer for outbound events.
pub struct EventSink<W> {
    writer: Arc<Mutex<W>>,
}

impl<W> Clone for EventSink<W> {
    fn clone(&self) -> Self {
        Self {
            writer: Arc::clone(&self.writer),
        }
    }
}

impl<W: AsyncWrite + Send + Unpin> EventSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    pub async fn send(&self, event: &Event) -> Result<(), ProtocolError> {
        let mut writer = self.writer.lock().await;
        protocol_wire::send(&mut *writer, event).await
    }
}

type InitFuture = Pin<Box<dyn Future<Output = Result<Backend>> + Send>>;

/// Aborts the wrapped task when dropped, including during unwinding.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct WorkerRuntime<W> {
    resources: Arc<dyn WorkerResources>,
    events: EventSink<W>,
    state: LifecycleState,
    backend: Option<Backend>,
}

impl<W: AsyncWrite + Send + Unpin + 'static> WorkerRuntime<W> {
    pub fn new(resources: Arc<dyn WorkerResources>, events: EventSink<W>) -> Self {
        Self {
            resources,
            events,
            state: LifecycleState::Launching,
            backend: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Run until the command stream ends.
    pub async fn run<R>(mut self, reader: R) -> Result<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let (tx, mut commands) = mpsc::unbounded_channel();
        let _reader = AbortOnDrop(tokio::spawn(read_commands(reader, tx)));

        self.emit(&Event::Ready).await?;
        self.state = LifecycleState::Ready;
        info!("worker ready");

        let mut init = Some(self.begin_init());

        loop {
            tokio::select! {
                outcome = settle(&mut init) => {
                    init = None;
                    self.finish_init(outcome).await?;
                }
                command = commands.recv() => {
                    let Some(command) = command else {
                        info!("command stream closed, shutting down");
                        return Ok(());
                    };
                    debug!(kind = command.kind(), "command received");
                    match command {
                        Command::Initialize => {
                            if init.is_some() {
                                info!("initialization already in progress");
                            } else if self.state == LifecycleState::Initialized {
                                self.emit(&Event::Initialized(InitOutcome::ok())).await?;
                            } else {
                                init = Some(self.begin_init());
                            }
                        }
                        Command::AddChunk(chunk) => self.add_chunk(chunk).await?,
                        Command::GetStatus => self.report_status().await?,
                    }
                }
            }
        }
    }

    async fn emit(&self, event: &Event) -> Result<()> {
        self.events
            .send(event)
            .await
            .with_context(|| format!("failed to send '{}' to supervisor", event.kind()))
    }

    fn begin_init(&mut self) -> InitFuture {
        self.state = LifecycleState::Initializing;
        info!("initializing vector store and embedder");
        let resources = Arc::clone(&self.resources);
        Box::pin(async move { resources.open().await })
    }

    async fn finish_init(&mut self, outcome: Result<Backend>) -> Result<()> {
        match outcome {
            Ok(backend) => {
                info!(
                    model = backend.embedder.model_name(),
                    dims = backend.embedder.dims(),
                    "worker initialized"
                );
                self.backend = Some(backend);
                self.state = LifecycleState::Initialized;
                self.emit(&Event::Initialized(InitOutcome::ok())).await
            }
            Err(err) => {
                let message = format!("{:#}", err);
                error!(error = %message, "initialization failed");
                self.state = LifecycleState::InitFailed;
                self.emit(&Event::Initialized(InitOutcome::failed(message)))
                    .await
            }
        }
    }

    /// The backend, but only while the lifecycle allows chunk work.
    fn initialized_backend(&self) -> Option<&Backend> {
        if self.state.accepts_chunks() {
            self.backend.as_ref()
        } else {
            None
        }
    }

    async fn add_chunk(&mut self, chunk: ChunkRecord) -> Result<()> {
        let outcome = match self.initialized_backend() {
            None => {
                debug!(chunk_id = %chunk.id, state = self.state.as_str(), "rejecting chunk");
                ChunkOutcome::failed(&chunk.id, "not initialized")
            }
            Some(_) if !chunk.has_valid_lines() => ChunkOutcome::failed(
                &chunk.id,
                format!(
                    "invalid line range {}..{}",
                    chunk.start_line, chunk.end_line
                ),
            ),
            Some(backend) => match store_chunk(backend, &chunk).await {
                Ok(()) => ChunkOutcome::ok(&chunk.id),
                Err(err) => {
                    warn!(chunk_id = %chunk.id, file = %chunk.file_path, error = %format!("{:#}", err), "chunk failed");
                    ChunkOutcome::failed(&chunk.id, format!("{:#}", err))
                }
            },
        };

        self.emit(&Event::AddChunkResult(outcome)).await
    }

    async fn report_status(&self) -> Result<()> {
        let snapshot = match self.initialized_backend() {
            Some(backend) => match backend.store.count_rows().await {
                Ok(count) => StatusSnapshot {
                    item_count: count,
                    state: StatusSnapshot::INITIALIZED.to_string(),
                    error: None,
                },
                Err(err) => StatusSnapshot {
                    item_count: 0,
                    state: StatusSnapshot::ERROR.to_string(),
                    error: Some(format!("{:#}", err)),
                },
            },
            None => StatusSnapshot {
                item_count: 0,
                state: StatusSnapshot::UNINITIALIZED.to_string(),
                error: Some("vector store not initialized".to_string()),
            },
        };

        self.emit(&Event::StatusResult(snapshot)).await
    }
}

async fn settle(init: &mut Option<InitFuture>) -> Result<Backend> {
    match init.as_mut() {
        Some(attempt) => attempt.await,
        None => std::future::pending().await,
    }
}

async fn store_chunk(backend: &Backend, chunk: &ChunkRecord) -> Result<()> {
    let vector = backend
        .embedder
        .embed(&chunk.code)
        .await
        .context("embedding failed")?;

    let row = VectorRow {
        chunk_id: chunk.id.clone(),
        vector,
        text: chunk.code.clone(),
        file: chunk.file_path.clone(),
        language: chunk.language.clone(),
        start_line: chunk.start_line,
        end_line: chunk.end_line,
        content_hash: store::content_hash(&chunk.code),
    };
    backend
        .store
        .append(&row)
        .await
        .context("vector store write failed")
}

/// Decode frames into commands until the stream ends. Malformed frames are
/// skipped.
async fn read_commands<R>(mut reader: R, commands: mpsc::UnboundedSender<Command>)
where
    R: AsyncRead + Send + Unpin,
{
    loop {
        let frame = match protocol_wire::read_message(&mut reader).await {
            Ok(frame) => frame,
            Err(ProtocolError::ConnectionClosed) => return,
            Err(e) => {
                error!(error = %e, "command stream failed");
                return;
            }
        };

        match protocol_wire::decode::<Command>(&frame) {
            Ok(command) => {
                if commands.send(command).is_err() {
                    return;
                }
            }
            Err(e) => warn!(error = %e, "ignoring malformed command"),
        }
    }
}

/// Run a worker on the given streams until its input ends.
///
/// Faults inside the runtime are reported to the supervisor as
/// `serviceError` and returned as `Err`.
pub async fn serve<R, W, S>(reader: R, writer: W, resources: S) -> Result<()>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
    S: WorkerResources,
{
    let events = EventSink::new(writer);
    let runtime = WorkerRuntime::new(Arc::new(resources), events.clone());

    let fault = match tokio::spawn(runtime.run(reader)).await {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(err)) => ServiceFault {
            message: format!("{:#}", err),
            origin: Some("runtime".to_string()),
        },
        Err(join) if join.is_panic() => ServiceFault {
            message: panic_message(join.into_panic()),
            origin: Some("panic".to_string()),
        },
        Err(join) => ServiceFault {
            message: join.to_string(),
            origin: Some("runtime".to_string()),
        },
    };

    error!(message = %fault.message, origin = ?fault.origin, "worker fault");
    if let Err(e) = events.send(&Event::ServiceError(fault.clone())).await {
        debug!(error = %e, "could not report fault to supervisor");
    }
    anyhow::bail!("worker terminated: {}", fault.message)
}

/// Worker process entry point: protocol on stdin/stdout, logs on stderr.
///
/// SIGTERM and Ctrl-C end the worker cleanly.
pub async fn serve_stdio(config: Config) -> Result<()> {
    let worker = serve(
        tokio::io::stdin(),
        tokio::io::stdout(),
        ConfiguredResources::new(config),
    );

    tokio::select! {
        result = worker => result,
        signal = shutdown_signal() => {
            let signal = signal?;
            info!(signal, "shutting down");
            Ok(())
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigterm.recv() => Ok("SIGTERM"),
        result = tokio::signal::ctrl_c() => result.map(|_| "SIGINT"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|_| "ctrl-c")
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_become_messages() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new("bang".to_string())), "bang");
        assert_eq!(panic_message(Box::new(7u8)), "worker panicked");
    }

    #[tokio::test]
    async fn uninitialized_status_reports_zero_items() {
        struct Never;
        #[async_trait]
        impl WorkerResources for Never {
            async fn open(&self) -> Result<Backend> {
                std::future::pending().await
            }
        }

        let (buf, mut out) = tokio::io::duplex(4096);
        let runtime = WorkerRuntime::new(Arc::new(Never), EventSink::new(buf));
        assert_eq!(runtime.state(), LifecycleState::Launching);
        runtime.report_status().await.unwrap();

        let frame = protocol_wire::read_message(&mut out).await.unwrap();
        match protocol_wire::decode::<Event>(&frame).unwrap() {
            Event::StatusResult(snapshot) => {
                assert_eq!(snapshot.item_count, 0);
                assert_eq!(snapshot.state, StatusSnapshot::UNINITIALIZED);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn chunks_are_gated_on_lifecycle_state() {
        use crate::store::MemoryStore;

        struct Never;
        #[async_trait]
        impl WorkerResources for Never {
            async fn open(&self) -> Result<Backend> {
                std::future::pending().await
            }
        }

        struct Unused;
        #[async_trait]
        impl Embedder for Unused {
            fn model_name(&self) -> &str {
                "unused"
            }
            fn dims(&self) -> usize {
                2
            }
            async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
                Ok(vec![0.0, 1.0])
            }
        }

        let store = MemoryStore::new(2);
        let (buf, mut out) = tokio::io::duplex(4096);
        let mut runtime = WorkerRuntime::new(Arc::new(Never), EventSink::new(buf));
        runtime.backend = Some(Backend {
            embedder: Arc::new(Unused),
            store: Arc::new(store.clone()),
        });
        let chunk = ChunkRecord {
            id: "c1".to_string(),
            file_path: "/w/a.rs".to_string(),
            language: "rs".to_string(),
            code: "fn a() {}".to_string(),
            start_line: 1,
            end_line: 1,
        };

        // A backend left over from an earlier attempt does not count.
        runtime.state = LifecycleState::Initializing;
        runtime.add_chunk(chunk.clone()).await.unwrap();
        let frame = protocol_wire::read_message(&mut out).await.unwrap();
        assert_eq!(
            protocol_wire::decode::<Event>(&frame).unwrap(),
            Event::AddChunkResult(ChunkOutcome::failed("c1", "not initialized"))
        );
        assert!(store.is_empty());

        runtime.state = LifecycleState::Initialized;
        runtime.add_chunk(chunk).await.unwrap();
        let frame = protocol_wire::read_message(&mut out).await.unwrap();
        assert_eq!(
            protocol_wire::decode::<Event>(&frame).unwrap(),
            Event::AddChunkResult(ChunkOutcome::ok("c1"))
        );
        assert_eq!(store.len(), 1);
    }
}
