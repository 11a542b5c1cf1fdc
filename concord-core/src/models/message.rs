use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::analysis::Intent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    Question,
    Answer,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::Question => "question",
            MessageRole::Answer => "answer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "question" => Some(MessageRole::Question),
            "answer" => Some(MessageRole::Answer),
            _ => None,
        }
    }
}

/// Provenance tag: which source/document backed a shown fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRef {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<Uuid>,
    pub title: String,
}

/// Per-message analysis metadata, immutable once written.
///
/// Conversation-analysis confidences are carried on the 0–100 scale here;
/// entity/correction confidences (0–1) never appear on messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_confidence: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_confidence: Option<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(default)]
    pub degraded: bool,
}

/// One transcript entry. Messages reference their session but are owned by
/// the transcript: append-only, never updated.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: String,
    pub content: String,
    #[sqlx(json)]
    pub relevant_items: Vec<ProvenanceRef>,
    #[sqlx(json)]
    pub metadata: MessageMetadata,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_answer(&self) -> bool {
        self.role == MessageRole::Answer.as_str()
    }
}
