use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::analysis::Intent;
use crate::models::message::ProvenanceRef;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Option<String>,
    #[sqlx(json)]
    pub context: SessionContext,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub active: bool,
    pub message_count: i32,
}

/// Last-known conversational values, kept as explicit optional fields and
/// stored as one jsonb column. Merged shallowly by `merge_context`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub last_documents: Vec<ProvenanceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_intent: Option<Intent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_question: Option<String>,
}
