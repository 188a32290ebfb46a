//! Core data models shared by the supervisor and the worker.
//!
//! These types cross the process boundary inside protocol messages, so
//! their serde shape is part of the wire format (camelCase field names).

use serde::{Deserialize, Serialize};

/// A line-numbered slice of a source file, the unit of embedding work.
///
/// Produced by [`chunk_code`](crate::chunk::chunk_code) and consumed exactly
/// once by the worker. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRecord {
    pub id: String,
    pub file_path: String,
    pub language: String,
    pub code: String,
    pub start_line: u32,
    pub end_line: u32,
}

impl ChunkRecord {
    /// Line numbers are 1-based and ordered.
    pub fn has_valid_lines(&self) -> bool {
        self.start_line >= 1 && self.end_line >= self.start_line
    }
}

/// Point-in-time view of the worker's store, answered per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub item_count: u64,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusSnapshot {
    pub const INITIALIZED: &'static str = "initialized";
    pub const UNINITIALIZED: &'static str = "uninitialized";
    pub const DISCONNECTED: &'static str = "disconnected";
    pub const ERROR: &'static str = "error";

    /// Synthetic snapshot used when no worker is reachable.
    pub fn disconnected() -> Self {
        Self {
            item_count: 0,
            state: Self::DISCONNECTED.to_string(),
            error: None,
        }
    }
}

/// The worker's own lifecycle state.
///
/// `Initialized` is the only state in which chunk work is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Launching,
    Ready,
    Initializing,
    Initialized,
    InitFailed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Launching => "launching",
            LifecycleState::Ready => "ready",
            LifecycleState::Initializing => "initializing",
            LifecycleState::Initialized => "initialized",
            LifecycleState::InitFailed => "init-failed",
        }
    }

    pub fn accepts_chunks(&self) -> bool {
        matches!(self, LifecycleState::Initialized)
    }
}

/// One persisted row of the vector store.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRow {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub file: String,
    pub language: String,
    pub start_line: u32,
    pub end_line: u32,
    pub content_hash: String,
}

/// Outcome of one `start_indexing` run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSummary {
    pub success: bool,
    pub files_scanned: u64,
    pub chunks_sent: u64,
    pub chunks_succeeded: u64,
    pub chunks_failed: u64,
    pub peak_in_flight: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Caller-facing progress stream published by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum IndexEvent {
    IndexingStart {
        root: String,
    },
    #[serde(rename_all = "camelCase")]
    IndexingProgress {
        file_path: String,
        progress: u8,
        chunks: usize,
    },
    #[serde(rename_all = "camelCase")]
    IndexingError {
        file_path: String,
        error: String,
    },
    #[serde(rename_all = "camelCase")]
    IndexingFinished {
        success: bool,
        files_scanned: u64,
        chunks_sent: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ServiceStatus {
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_events_are_tagged() {
        let event = IndexEvent::IndexingProgress {
            file_path: "/w/a.ts".to_string(),
            progress: 50,
            chunks: 2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "indexing-progress");
        assert_eq!(json["filePath"], "/w/a.ts");

        let json = serde_json::to_value(IndexEvent::ServiceStatus {
            status: "crashed".to_string(),
            error: None,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"event": "service-status", "status": "crashed"}));
    }

    #[test]
    fn chunk_record_uses_camel_case_fields() {
        let chunk = ChunkRecord {
            id: "c1".to_string(),
            file_path: "src/lib.rs".to_string(),
            language: "rs".to_string(),
            code: "fn main() {}".to_string(),
            start_line: 1,
            end_line: 1,
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["filePath"], "src/lib.rs");
        assert_eq!(json["startLine"], 1);
        assert_eq!(json["endLine"], 1);
    }

    #[test]
    fn line_validation() {
        let mut chunk = ChunkRecord {
            id: "c1".to_string(),
            file_path: "a.ts".to_string(),
            language: "ts".to_string(),
            code: "x".to_string(),
            start_line: 3,
            end_line: 5,
        };
        assert!(chunk.has_valid_lines());
        chunk.end_line = 2;
        assert!(!chunk.has_valid_lines());
        chunk.start_line = 0;
        chunk.end_line = 0;
        assert!(!chunk.has_valid_lines());
    }

    #[test]
    fn status_error_omitted_when_absent() {
        let json = serde_json::to_string(&StatusSnapshot::disconnected()).unwrap();
        assert_eq!(json, r#"{"itemCount":0,"state":"disconnected"}"#);
    }

    #[test]
    fn only_initialized_accepts_chunks() {
        assert!(LifecycleState::Initialized.accepts_chunks());
        for state in [
            LifecycleState::Launching,
            LifecycleState::Ready,
            LifecycleState::Initializing,
            LifecycleState::InitFailed,
        ] {
            assert!(!state.accepts_chunks(), "{} accepted chunks", state.as_str());
        }
    }
}
