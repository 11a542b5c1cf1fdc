//! Transient analysis results produced at query time.
//!
//! Confidences in this module use the 0–100 conversation-analysis scale.
//! The 0–1 scale is reserved for entities and corrections (`models::entity`).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    EnumerateDocuments,
    EnumerateOrganizations,
    RecallFact,
    CombinedLookup,
    OpenEnded,
    Blocked,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::EnumerateDocuments => "enumerate_documents",
            Intent::EnumerateOrganizations => "enumerate_organizations",
            Intent::RecallFact => "recall_fact",
            Intent::CombinedLookup => "combined_lookup",
            Intent::OpenEnded => "open_ended",
            Intent::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "enumerate_documents" => Some(Intent::EnumerateDocuments),
            "enumerate_organizations" => Some(Intent::EnumerateOrganizations),
            "recall_fact" => Some(Intent::RecallFact),
            "combined_lookup" => Some(Intent::CombinedLookup),
            "open_ended" => Some(Intent::OpenEnded),
            "blocked" => Some(Intent::Blocked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTarget {
    Documents,
    Knowledge,
    Both,
}

impl SourceTarget {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "documents" => Some(SourceTarget::Documents),
            "knowledge" => Some(SourceTarget::Knowledge),
            "both" => Some(SourceTarget::Both),
            _ => None,
        }
    }

    pub fn wants_documents(&self) -> bool {
        matches!(self, SourceTarget::Documents | SourceTarget::Both)
    }

    pub fn wants_knowledge(&self) -> bool {
        matches!(self, SourceTarget::Knowledge | SourceTarget::Both)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceType {
    Direct,
    Indirect,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceAnalysis {
    pub has_reference: bool,
    pub reference_type: ReferenceType,
    /// 0–100.
    pub confidence: u8,
    pub resolved_question: String,
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentAnalysis {
    pub intent: Intent,
    pub target: SourceTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// 0–100.
    pub confidence: u8,
}
