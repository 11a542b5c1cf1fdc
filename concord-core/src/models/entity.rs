//! Extracted entities and the per-organization consolidated profile.
//!
//! Confidences in this module use the 0–1 scale (f32). Conversation-analysis
//! confidences (0–100) never appear here.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Person,
    Department,
    Policy,
    Date,
    Number,
    Organization,
}

impl EntityType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "person" => Some(EntityType::Person),
            "department" => Some(EntityType::Department),
            "policy" => Some(EntityType::Policy),
            "date" => Some(EntityType::Date),
            "number" => Some(EntityType::Number),
            "organization" => Some(EntityType::Organization),
            _ => None,
        }
    }
}

/// Explicit optional attributes instead of free-form JSON traversal.
/// Collaborator output is normalized into this shape once, at the ingestion
/// boundary (`Entity::normalize_attributes`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityAttributes {
    /// Role or title for person entities ("ceo", "hr manager").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Field label the value belongs to ("leadership", "headcount").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Unit for number entities ("VND", "người").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl EntityAttributes {
    /// Fill this set's missing fields from `other` (merge recommendation).
    pub fn merge_from(&mut self, other: &EntityAttributes) {
        if self.role.is_none() {
            self.role = other.role.clone();
        }
        if self.field.is_none() {
            self.field = other.field.clone();
        }
        if self.unit.is_none() {
            self.unit = other.unit.clone();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub normalized_value: String,
    #[serde(default)]
    pub attributes: EntityAttributes,
    /// 0–1.
    pub confidence: f32,
    pub source_document_id: Uuid,
    /// Set when an unresolved conflict kept this value alongside another.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub flagged: bool,
}

impl Entity {
    /// Normalization boundary for loose collaborator attribute objects:
    /// known keys are lifted into `EntityAttributes`, everything else is
    /// dropped.
    pub fn normalize_attributes(raw: Option<&serde_json::Value>) -> EntityAttributes {
        let mut attrs = EntityAttributes::default();
        let Some(obj) = raw.and_then(|v| v.as_object()) else {
            return attrs;
        };
        attrs.role = obj
            .get("role")
            .or_else(|| obj.get("title"))
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_lowercase());
        attrs.field = obj.get("field").and_then(|v| v.as_str()).map(|s| s.trim().to_lowercase());
        attrs.unit = obj.get("unit").and_then(|v| v.as_str()).map(|s| s.trim().to_string());
        attrs
    }

    /// Case-folded identity used for dedup and conflict matching.
    pub fn value_key(&self) -> String {
        self.normalized_value.trim().to_lowercase()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQuality {
    pub total_documents: u32,
    pub entities_extracted: u32,
    pub conflicts_resolved: u32,
    /// 0–1, mean entity confidence over the consolidated set.
    pub confidence_score: f32,
    pub last_updated: DateTime<Utc>,
}

/// One entity seen in multiple documents of the same organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossReference {
    pub entity_type: EntityType,
    pub normalized_value: String,
    pub document_ids: Vec<Uuid>,
}

/// Consolidated entity view for one organization. At most one profile per
/// organization; every update is a full replace, never a partial patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityProfile {
    pub organization_id: String,
    pub entities: BTreeMap<EntityType, Vec<Entity>>,
    pub data_quality: DataQuality,
    #[serde(default)]
    pub cross_references: Vec<CrossReference>,
}

impl EntityProfile {
    pub fn entity_count(&self) -> usize {
        self.entities.values().map(|v| v.len()).sum()
    }
}

/// Suggested OCR/text correction from cross-document comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub original_text: String,
    pub corrected_text: String,
    /// 0–1; applied to stored text only at >= 0.8.
    pub confidence: f32,
    #[serde(default)]
    pub evidence_document_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictAction {
    UseNew,
    UseExisting,
    Merge,
}

/// Same field, differing values across documents of one organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityConflict {
    pub field: String,
    pub entity_type: EntityType,
    pub existing_value: String,
    pub new_value: String,
    pub recommendation: ConflictAction,
    /// 0–1; resolved per recommendation only at >= 0.8.
    pub confidence: f32,
    #[serde(default)]
    pub resolved: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_normalization_lifts_known_keys_only() {
        let raw = serde_json::json!({
            "role": "CEO",
            "unit": "VND",
            "notes": {"nested": "junk"},
        });
        let attrs = Entity::normalize_attributes(Some(&raw));
        assert_eq!(attrs.role.as_deref(), Some("ceo"));
        assert_eq!(attrs.unit.as_deref(), Some("VND"));
        assert_eq!(attrs.field, None);
    }

    #[test]
    fn attribute_normalization_tolerates_non_objects() {
        assert_eq!(
            Entity::normalize_attributes(Some(&serde_json::json!("garbage"))),
            EntityAttributes::default()
        );
        assert_eq!(Entity::normalize_attributes(None), EntityAttributes::default());
    }

    #[test]
    fn profile_serializes_entity_types_as_map_keys() {
        let mut entities = BTreeMap::new();
        entities.insert(
            EntityType::Person,
            vec![Entity {
                entity_type: EntityType::Person,
                normalized_value: "Le Nguyen Hoang Minh".to_string(),
                attributes: EntityAttributes {
                    role: Some("ceo".to_string()),
                    ..Default::default()
                },
                confidence: 0.92,
                source_document_id: Uuid::new_v4(),
                flagged: false,
            }],
        );
        let profile = EntityProfile {
            organization_id: "PDH".to_string(),
            entities,
            data_quality: DataQuality {
                total_documents: 1,
                entities_extracted: 1,
                conflicts_resolved: 0,
                confidence_score: 0.92,
                last_updated: Utc::now(),
            },
            cross_references: vec![],
        };

        let json = serde_json::to_value(&profile).unwrap();
        assert!(json["entities"]["person"].is_array());

        let back: EntityProfile = serde_json::from_value(json).unwrap();
        assert_eq!(back, profile);
    }
}
