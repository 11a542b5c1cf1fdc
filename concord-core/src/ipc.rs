use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ConcordRequest {
    Ping,
    Health,
    /// One conversational turn. `session_id` is optional: omitted for a new
    /// conversation, and the response always carries the authoritative id
    /// (a fresh one is issued when the old session idled out).
    Ask {
        session_id: Option<Uuid>,
        user_id: Option<String>,
        question: String,
    },
    /// Ingestion-time consolidation of one extracted document text.
    Ingest {
        document_id: Uuid,
        organization_id: String,
        text: String,
    },
    EndSession {
        session_id: Uuid,
    },
    /// Re-read safety rules and constraint answers from the store and swap
    /// the in-memory snapshots.
    ReloadRules,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConcordResponse {
    pub status: String,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub version: String,
}

impl ConcordResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            status: "ok".to_string(),
            data: Some(data),
            error: None,
            version: "0.1.0".to_string(),
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(msg.into()),
            version: "0.1.0".to_string(),
        }
    }

    pub fn pong() -> Self {
        Self::ok(serde_json::json!({"pong": true}))
    }
}
