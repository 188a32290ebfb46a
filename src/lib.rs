//! # codeindex
//!
//! Supervised indexing of a source tree into a vector store.
//!
//! Embedding and vector-store writes are isolated in a long-lived worker
//! process. A supervisor in the calling process walks the tree, chunks
//! files, and feeds chunks to the worker under a bounded concurrency gate,
//! tracking every chunk until the worker answers for it.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────┐   addChunk / getStatus   ┌──────────────────────┐
//! │ Supervisor                   │ ───────────────────────▶ │ Worker               │
//! │ scan ─▶ chunk ─▶ gate(K) ─▶  │   length-prefixed JSON   │ embedder ─▶ store    │
//! │ in-flight map, events        │ ◀─────────────────────── │ one command at a time│
//! └──────────────────────────────┘   results / status       └──────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`chunk`] | Overlapping character-window chunker |
//! | [`scan`] | Source tree traversal rules |
//! | [`protocol`] | Supervisor/worker message catalogue |
//! | [`protocol_wire`] | Frame encoding on the worker's stdio |
//! | [`worker`] | Worker runtime |
//! | [`gate`] | Bounded dispatch gate |
//! | [`supervisor`] | Worker lifecycle, traversal, in-flight accounting |
//! | [`launcher`] | Child-process and in-process workers |
//! | [`embedding`] | Embedding providers |
//! | [`store`] | Vector stores |
//! | [`config`] | TOML configuration |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod gate;
pub mod index_cmd;
pub mod launcher;
pub mod logging;
pub mod models;
pub mod progress;
pub mod protocol;
pub mod protocol_wire;
pub mod scan;
pub mod store;
pub mod supervisor;
pub mod worker;

pub use error::IndexError;
pub use supervisor::{Supervisor, SupervisorOptions, WorkerStatus};
