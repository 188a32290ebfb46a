//! Message catalogue exchanged between the supervisor and the worker.
//!
//! Every message is an envelope `{"type": ..., "payload": ...}`; payload is
//! omitted for messages that carry none. [`Command`]s flow from supervisor
//! to worker, [`Event`]s from worker to supervisor. Framing lives in
//! [`protocol_wire`](crate::protocol_wire).

use serde::{Deserialize, Serialize};

use crate::models::{ChunkRecord, StatusSnapshot};

/// Supervisor → worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Command {
    /// (Re)attempt store and model setup.
    Initialize,
    /// Embed and persist one chunk.
    AddChunk(ChunkRecord),
    /// Request a fresh [`StatusSnapshot`].
    GetStatus,
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Initialize => "initialize",
            Command::AddChunk(_) => "addChunk",
            Command::GetStatus => "getStatus",
        }
    }
}

/// Worker → supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Event {
    /// Process started and its command loop is live.
    Ready,
    Initialized(InitOutcome),
    AddChunkResult(ChunkOutcome),
    StatusResult(StatusSnapshot),
    /// Unhandled fault, sent before the worker terminates.
    ServiceError(ServiceFault),
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Ready => "ready",
            Event::Initialized(_) => "initialized",
            Event::AddChunkResult(_) => "addChunkResult",
            Event::StatusResult(_) => "statusResult",
            Event::ServiceError(_) => "serviceError",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InitOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkOutcome {
    pub success: bool,
    pub chunk_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChunkOutcome {
    pub fn ok(chunk_id: impl Into<String>) -> Self {
        Self {
            success: true,
            chunk_id: chunk_id.into(),
            error: None,
        }
    }

    pub fn failed(chunk_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            chunk_id: chunk_id.into(),
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceFault {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unit_commands_have_no_payload() {
        let json = serde_json::to_value(Command::Initialize).unwrap();
        assert_eq!(json, json!({"type": "initialize"}));
        let json = serde_json::to_value(Command::GetStatus).unwrap();
        assert_eq!(json, json!({"type": "getStatus"}));
        assert_eq!(serde_json::to_value(Event::Ready).unwrap(), json!({"type": "ready"}));
    }

    #[test]
    fn add_chunk_carries_record() {
        let cmd: Command = serde_json::from_value(json!({
            "type": "addChunk",
            "payload": {
                "id": "c-1",
                "filePath": "/w/a.ts",
                "language": "ts",
                "code": "let x = 1;",
                "startLine": 4,
                "endLine": 4
            }
        }))
        .unwrap();
        match cmd {
            Command::AddChunk(chunk) => {
                assert_eq!(chunk.id, "c-1");
                assert_eq!(chunk.start_line, 4);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn chunk_result_shape() {
        let json = serde_json::to_value(Event::AddChunkResult(ChunkOutcome::failed(
            "c-9",
            "not initialized",
        )))
        .unwrap();
        assert_eq!(
            json,
            json!({
                "type": "addChunkResult",
                "payload": {"success": false, "chunkId": "c-9", "error": "not initialized"}
            })
        );
    }

    #[test]
    fn initialized_without_error_omits_field() {
        let json = serde_json::to_value(Event::Initialized(InitOutcome::ok())).unwrap();
        assert_eq!(json, json!({"type": "initialized", "payload": {"success": true}}));
    }

    #[test]
    fn service_error_origin_optional() {
        let event: Event = serde_json::from_value(json!({
            "type": "serviceError",
            "payload": {"message": "boom"}
        }))
        .unwrap();
        assert_eq!(
            event,
            Event::ServiceError(ServiceFault {
                message: "boom".to_string(),
                origin: None
            })
        );
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(serde_json::from_value::<Command>(json!({"type": "dropTable"})).is_err());
        assert!(serde_json::from_value::<Event>(json!({"kind": "ready"})).is_err());
    }

    #[test]
    fn add_chunk_without_payload_is_rejected() {
        assert!(serde_json::from_value::<Command>(json!({"type": "addChunk"})).is_err());
    }
}
