//! Entity Consolidator — ingestion-time cross-document reconciliation.
//!
//! Pipeline for one document:
//! 1. schema-constrained entity extraction (collaborator), floor 0.7
//! 2. bounded fetch of up to 5 prior same-organization documents
//! 3. schema-constrained comparison: conflicts, similarities, corrections
//! 4. corrections >= 0.8 applied by literal substring replacement; every
//!    attempt (applied or not) logged immutably to `validation_log`
//! 5. conflicts >= 0.8 resolved per recommendation; below that both values
//!    are kept and flagged, never guessed
//! 6. per-document entities persisted, organization profile regenerated as
//!    a full replace with recomputed data quality
//!
//! Consolidations serialize per organization (advisory transaction lock);
//! different organizations run fully in parallel. Collaborator failure is
//! never fatal: the document is stored with the prior/empty entity set,
//! corrected text defaults to the original, confidence 0.5.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use concord_core::config::ConsolidationConfig;
use concord_core::models::{
    ConflictAction, Correction, CrossReference, DataQuality, Entity, EntityConflict,
    EntityProfile, EntityType,
};
use concord_core::parse::{self, SemanticReply};
use concord_core::semantic::SemanticBackend;

type EntityKey = (EntityType, String);

/// Report from consolidating one document.
#[derive(Debug, Clone)]
pub struct ConsolidationReport {
    pub document_id: Uuid,
    pub organization_id: String,
    pub corrected_text: String,
    pub entities: Vec<Entity>,
    pub corrections: Vec<Correction>,
    pub corrections_applied: usize,
    pub conflicts: Vec<EntityConflict>,
    pub conflicts_resolved: usize,
    pub conflicts_flagged: usize,
    /// 0–1.
    pub confidence: f32,
    pub degraded: bool,
}

// ============================================================================
// PUBLIC API
// ============================================================================

pub async fn consolidate(
    pool: &PgPool,
    backend: &dyn SemanticBackend,
    document_id: Uuid,
    text: &str,
    organization_id: &str,
    config: &ConsolidationConfig,
) -> anyhow::Result<ConsolidationReport> {
    let prior_documents =
        fetch_prior_documents(pool, organization_id, document_id, config.prior_document_limit)
            .await?;
    let previous_entities = fetch_document_entities(pool, document_id).await?;

    let outcome = analyze(
        backend,
        document_id,
        text,
        &previous_entities,
        &prior_documents,
        config,
    )
    .await;

    persist(pool, document_id, organization_id, &outcome, &prior_documents).await?;

    Ok(ConsolidationReport {
        document_id,
        organization_id: organization_id.to_string(),
        corrected_text: outcome.corrected_text,
        entities: outcome.entities,
        corrections: outcome.corrections,
        corrections_applied: outcome.applied.iter().filter(|a| **a).count(),
        conflicts: outcome.conflicts,
        conflicts_resolved: outcome.conflicts_resolved,
        conflicts_flagged: outcome.conflicts_flagged,
        confidence: outcome.confidence,
        degraded: outcome.degraded,
    })
}

// ============================================================================
// ANALYSIS (no persistence)
// ============================================================================

#[derive(Debug)]
struct AnalysisOutcome {
    corrected_text: String,
    entities: Vec<Entity>,
    corrections: Vec<Correction>,
    /// Parallel to `corrections`: whether each attempt was applied.
    applied: Vec<bool>,
    conflicts: Vec<EntityConflict>,
    conflicts_resolved: usize,
    conflicts_flagged: usize,
    /// Values that lost a resolved conflict, excluded from the profile.
    suppressed: HashSet<EntityKey>,
    /// Values kept on both sides of an unresolved conflict.
    flagged: HashSet<EntityKey>,
    confidence: f32,
    degraded: bool,
}

impl AnalysisOutcome {
    /// Failure policy: prior/empty entity set, original text, confidence 0.5.
    fn degraded(text: &str, previous: &[Entity], config: &ConsolidationConfig) -> Self {
        Self {
            corrected_text: text.to_string(),
            entities: previous.to_vec(),
            corrections: Vec::new(),
            applied: Vec::new(),
            conflicts: Vec::new(),
            conflicts_resolved: 0,
            conflicts_flagged: 0,
            suppressed: HashSet::new(),
            flagged: HashSet::new(),
            confidence: config.degraded_confidence,
            degraded: true,
        }
    }
}

async fn analyze(
    backend: &dyn SemanticBackend,
    document_id: Uuid,
    text: &str,
    previous_entities: &[Entity],
    prior_documents: &[(Uuid, Vec<Entity>)],
    config: &ConsolidationConfig,
) -> AnalysisOutcome {
    let Some(mut entities) = extract_entities(backend, document_id, text, config).await else {
        tracing::warn!(document = %document_id, "Entity extraction failed — degraded consolidation");
        return AnalysisOutcome::degraded(text, previous_entities, config);
    };

    // First document of an organization: nothing to compare against.
    if prior_documents.is_empty() {
        let confidence = mean_confidence(&entities);
        return AnalysisOutcome {
            corrected_text: text.to_string(),
            entities,
            corrections: Vec::new(),
            applied: Vec::new(),
            conflicts: Vec::new(),
            conflicts_resolved: 0,
            conflicts_flagged: 0,
            suppressed: HashSet::new(),
            flagged: HashSet::new(),
            confidence,
            degraded: false,
        };
    }

    let Some((mut conflicts, corrections)) =
        compare_entities(backend, &entities, prior_documents).await
    else {
        tracing::warn!(document = %document_id, "Entity comparison failed — degraded consolidation");
        let mut outcome = AnalysisOutcome::degraded(text, previous_entities, config);
        // Extraction itself succeeded; keep its result.
        outcome.entities = entities;
        return outcome;
    };

    let (corrected_text, applied) =
        apply_corrections(text, &corrections, config.correction_threshold);

    let prior_flat: Vec<Entity> = prior_documents
        .iter()
        .flat_map(|(_, entities)| entities.iter().cloned())
        .collect();
    let resolution = resolve_conflicts(
        &mut entities,
        &prior_flat,
        &mut conflicts,
        config.conflict_threshold,
    );

    let confidence = mean_confidence(&entities);

    AnalysisOutcome {
        corrected_text,
        entities,
        corrections,
        applied,
        conflicts,
        conflicts_resolved: resolution.resolved,
        conflicts_flagged: resolution.flagged_count,
        suppressed: resolution.suppressed,
        flagged: resolution.flagged,
        confidence,
        degraded: false,
    }
}

fn mean_confidence(entities: &[Entity]) -> f32 {
    if entities.is_empty() {
        return 0.0;
    }
    entities.iter().map(|e| e.confidence).sum::<f32>() / entities.len() as f32
}

// ============================================================================
// COLLABORATOR CALLS
// ============================================================================

#[derive(Debug, serde::Deserialize)]
struct ExtractReply {
    entities: Vec<CollabEntity>,
}

#[derive(Debug, serde::Deserialize)]
struct CollabEntity {
    #[serde(rename = "type")]
    entity_type: String,
    value: String,
    #[serde(default)]
    attributes: Option<serde_json::Value>,
    #[serde(default)]
    confidence: Option<f64>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct CompareReply {
    #[serde(default)]
    conflicts: Vec<CollabConflict>,
    /// Informational only; logged, not acted on.
    #[serde(default)]
    similarities: Vec<serde_json::Value>,
    #[serde(default)]
    corrections: Vec<CollabCorrection>,
}

#[derive(Debug, serde::Deserialize)]
struct CollabConflict {
    field: String,
    #[serde(rename = "type", default)]
    entity_type: Option<String>,
    existing_value: String,
    new_value: String,
    recommendation: String,
    #[serde(default)]
    confidence: Option<f64>,
}

#[derive(Debug, serde::Deserialize)]
struct CollabCorrection {
    original: String,
    corrected: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    evidence_document_ids: Vec<Uuid>,
}

async fn extract_entities(
    backend: &dyn SemanticBackend,
    document_id: Uuid,
    text: &str,
    config: &ConsolidationConfig,
) -> Option<Vec<Entity>> {
    let raw = match backend.complete(&build_extraction_prompt(text)).await {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(error = %e, "Extraction collaborator failed");
            return None;
        }
    };

    let collab_entities = match parse::parse_reply::<ExtractReply>(&raw) {
        SemanticReply::Parsed(reply) => reply.entities,
        SemanticReply::Partial(value) => {
            let array = value.get("entities")?.clone();
            serde_json::from_value::<Vec<CollabEntity>>(array).ok()?
        }
        SemanticReply::Unparsed(_) => return None,
    };

    Some(normalize_entities(collab_entities, document_id, config))
}

/// Ingestion-boundary normalization: parse types, lift attributes, convert
/// confidences to 0–1 and drop entities below the floor.
fn normalize_entities(
    collab: Vec<CollabEntity>,
    document_id: Uuid,
    config: &ConsolidationConfig,
) -> Vec<Entity> {
    collab
        .into_iter()
        .filter_map(|raw| {
            let entity_type = match EntityType::parse(&raw.entity_type) {
                Some(t) => t,
                None => {
                    tracing::debug!(kind = %raw.entity_type, "Dropping entity of unknown type");
                    return None;
                }
            };
            let value = raw.value.trim().to_string();
            if value.is_empty() {
                return None;
            }
            let confidence = parse::confidence_0_1(raw.confidence.unwrap_or(0.0));
            if confidence < config.min_entity_confidence {
                return None;
            }
            Some(Entity {
                entity_type,
                normalized_value: value,
                attributes: Entity::normalize_attributes(raw.attributes.as_ref()),
                confidence,
                source_document_id: document_id,
                flagged: false,
            })
        })
        .collect()
}

async fn compare_entities(
    backend: &dyn SemanticBackend,
    new_entities: &[Entity],
    prior_documents: &[(Uuid, Vec<Entity>)],
) -> Option<(Vec<EntityConflict>, Vec<Correction>)> {
    let prompt = build_comparison_prompt(new_entities, prior_documents);
    let raw = match backend.complete(&prompt).await {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(error = %e, "Comparison collaborator failed");
            return None;
        }
    };

    let reply = match parse::parse_reply::<CompareReply>(&raw) {
        SemanticReply::Parsed(reply) => reply,
        SemanticReply::Partial(value) => CompareReply {
            conflicts: value
                .get("conflicts")
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default(),
            similarities: Vec::new(),
            corrections: value
                .get("corrections")
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default(),
        },
        SemanticReply::Unparsed(_) => return None,
    };

    if !reply.similarities.is_empty() {
        tracing::debug!(count = reply.similarities.len(), "Cross-document similarities noted");
    }

    let conflicts = reply
        .conflicts
        .into_iter()
        .filter_map(|raw| {
            // The type may be absent; infer it from the new entity carrying
            // the conflicting value.
            let entity_type = raw
                .entity_type
                .as_deref()
                .and_then(EntityType::parse)
                .or_else(|| {
                    let needle = raw.new_value.trim().to_lowercase();
                    new_entities
                        .iter()
                        .find(|e| e.value_key() == needle)
                        .map(|e| e.entity_type)
                });
            let Some(entity_type) = entity_type else {
                tracing::warn!(field = %raw.field, "Dropping untypeable conflict");
                return None;
            };
            let recommendation = match raw.recommendation.trim().to_lowercase().as_str() {
                "use_new" => ConflictAction::UseNew,
                "use_existing" => ConflictAction::UseExisting,
                "merge" => ConflictAction::Merge,
                other => {
                    tracing::warn!(recommendation = %other, "Dropping conflict with unknown recommendation");
                    return None;
                }
            };
            Some(EntityConflict {
                field: raw.field,
                entity_type,
                existing_value: raw.existing_value,
                new_value: raw.new_value,
                recommendation,
                confidence: parse::confidence_0_1(raw.confidence.unwrap_or(0.0)),
                resolved: false,
            })
        })
        .collect();

    let corrections = reply
        .corrections
        .into_iter()
        .map(|raw| Correction {
            original_text: raw.original,
            corrected_text: raw.corrected,
            confidence: parse::confidence_0_1(raw.confidence.unwrap_or(0.0)),
            evidence_document_ids: raw.evidence_document_ids,
        })
        .collect();

    Some((conflicts, corrections))
}

// ============================================================================
// PURE RESOLUTION CORE
// ============================================================================

/// Apply corrections by literal substring replacement, honoring the
/// confidence threshold. Returns the corrected text and one applied flag
/// per attempt (the flags feed the validation log).
fn apply_corrections(
    text: &str,
    corrections: &[Correction],
    threshold: f32,
) -> (String, Vec<bool>) {
    let mut corrected = text.to_string();
    let mut applied = Vec::with_capacity(corrections.len());

    for correction in corrections {
        let apply = correction.confidence >= threshold
            && !correction.original_text.is_empty()
            && correction.original_text != correction.corrected_text
            && corrected.contains(&correction.original_text);

        if apply {
            corrected = corrected.replace(&correction.original_text, &correction.corrected_text);
        }
        applied.push(apply);
    }

    (corrected, applied)
}

#[derive(Debug, Default)]
struct ConflictResolution {
    resolved: usize,
    flagged_count: usize,
    suppressed: HashSet<EntityKey>,
    flagged: HashSet<EntityKey>,
}

/// Resolve conflicts at or above the threshold per their recommendation,
/// mutating the new document's entity set. Lower-confidence conflicts keep
/// both values and flag them.
fn resolve_conflicts(
    entities: &mut [Entity],
    prior: &[Entity],
    conflicts: &mut [EntityConflict],
    threshold: f32,
) -> ConflictResolution {
    let mut resolution = ConflictResolution::default();

    for conflict in conflicts.iter_mut() {
        let new_key = (conflict.entity_type, conflict.new_value.trim().to_lowercase());
        let existing_key = (
            conflict.entity_type,
            conflict.existing_value.trim().to_lowercase(),
        );

        if conflict.confidence < threshold {
            resolution.flagged_count += 1;
            resolution.flagged.insert(new_key.clone());
            resolution.flagged.insert(existing_key.clone());
            if let Some(entity) = find_entity_mut(entities, &new_key) {
                entity.flagged = true;
            }
            continue;
        }

        match conflict.recommendation {
            ConflictAction::UseNew => {
                resolution.suppressed.insert(existing_key);
                conflict.resolved = true;
                resolution.resolved += 1;
            }
            ConflictAction::UseExisting => {
                if let Some(entity) = find_entity_mut(entities, &new_key) {
                    entity.normalized_value = conflict.existing_value.clone();
                    if let Some(prior_entity) = find_entity(prior, &existing_key) {
                        entity.attributes.merge_from(&prior_entity.attributes);
                        entity.confidence = entity.confidence.max(prior_entity.confidence);
                    }
                }
                resolution.suppressed.insert(new_key);
                conflict.resolved = true;
                resolution.resolved += 1;
            }
            ConflictAction::Merge => {
                if let Some(entity) = find_entity_mut(entities, &new_key) {
                    if let Some(prior_entity) = find_entity(prior, &existing_key) {
                        entity.attributes.merge_from(&prior_entity.attributes);
                        entity.confidence = entity.confidence.max(prior_entity.confidence);
                    }
                }
                resolution.suppressed.insert(existing_key);
                conflict.resolved = true;
                resolution.resolved += 1;
            }
        }
    }

    resolution
}

fn find_entity_mut<'a>(entities: &'a mut [Entity], key: &EntityKey) -> Option<&'a mut Entity> {
    entities
        .iter_mut()
        .find(|e| e.entity_type == key.0 && e.value_key() == key.1)
}

fn find_entity<'a>(entities: &'a [Entity], key: &EntityKey) -> Option<&'a Entity> {
    entities
        .iter()
        .find(|e| e.entity_type == key.0 && e.value_key() == key.1)
}

/// Deterministic full-replace profile rebuild over every document's entity
/// set. Per (type, value) the highest-confidence occurrence wins (later
/// documents break ties); suppressed values are excluded, flagged values
/// carry their flag, and entities seen in two or more documents become
/// cross-references.
fn build_profile(
    organization_id: &str,
    documents: &[(Uuid, Vec<Entity>)],
    suppressed: &HashSet<EntityKey>,
    flagged: &HashSet<EntityKey>,
    conflicts_resolved_total: u32,
    now: DateTime<Utc>,
) -> EntityProfile {
    let mut winners: HashMap<EntityKey, Entity> = HashMap::new();
    let mut appearances: HashMap<EntityKey, Vec<Uuid>> = HashMap::new();

    for (document_id, entities) in documents {
        for entity in entities {
            let key = (entity.entity_type, entity.value_key());
            if suppressed.contains(&key) {
                continue;
            }

            let docs = appearances.entry(key.clone()).or_default();
            if !docs.contains(document_id) {
                docs.push(*document_id);
            }

            match winners.get(&key) {
                Some(current) if current.confidence > entity.confidence => {}
                _ => {
                    winners.insert(key, entity.clone());
                }
            }
        }
    }

    let mut entities: BTreeMap<EntityType, Vec<Entity>> = BTreeMap::new();
    for (key, mut entity) in winners {
        entity.flagged = entity.flagged || flagged.contains(&key);
        entities.entry(key.0).or_default().push(entity);
    }
    for bucket in entities.values_mut() {
        bucket.sort_by(|a, b| a.value_key().cmp(&b.value_key()));
    }

    let mut cross_references: Vec<CrossReference> = appearances
        .into_iter()
        .filter(|(key, docs)| docs.len() >= 2 && !suppressed.contains(key))
        .map(|((entity_type, normalized_value), document_ids)| CrossReference {
            entity_type,
            normalized_value,
            document_ids,
        })
        .collect();
    cross_references.sort_by(|a, b| {
        (a.entity_type, &a.normalized_value).cmp(&(b.entity_type, &b.normalized_value))
    });

    let entity_count: usize = entities.values().map(|v| v.len()).sum();
    let confidence_score = if entity_count == 0 {
        0.0
    } else {
        entities
            .values()
            .flatten()
            .map(|e| e.confidence)
            .sum::<f32>()
            / entity_count as f32
    };

    EntityProfile {
        organization_id: organization_id.to_string(),
        entities,
        data_quality: DataQuality {
            total_documents: documents.len() as u32,
            entities_extracted: entity_count as u32,
            conflicts_resolved: conflicts_resolved_total,
            confidence_score,
            last_updated: now,
        },
        cross_references,
    }
}

// ============================================================================
// PERSISTENCE
// ============================================================================

async fn fetch_prior_documents(
    pool: &PgPool,
    organization_id: &str,
    exclude: Uuid,
    limit: i64,
) -> Result<Vec<(Uuid, Vec<Entity>)>, sqlx::Error> {
    let rows: Vec<(Uuid, serde_json::Value)> = sqlx::query_as(
        "SELECT document_id, entities FROM document_entities
         WHERE organization_id = $1 AND document_id <> $2
         ORDER BY updated_at DESC
         LIMIT $3",
    )
    .bind(organization_id)
    .bind(exclude)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    // Oldest first so later documents win confidence ties deterministically.
    let mut documents: Vec<(Uuid, Vec<Entity>)> = rows
        .into_iter()
        .map(|(id, value)| {
            let entities = serde_json::from_value(value).unwrap_or_else(|e| {
                tracing::warn!(document = %id, error = %e, "Unreadable stored entities — treating as empty");
                Vec::new()
            });
            (id, entities)
        })
        .collect();
    documents.reverse();
    Ok(documents)
}

async fn fetch_document_entities(
    pool: &PgPool,
    document_id: Uuid,
) -> Result<Vec<Entity>, sqlx::Error> {
    let row: Option<(serde_json::Value,)> =
        sqlx::query_as("SELECT entities FROM document_entities WHERE document_id = $1")
            .bind(document_id)
            .fetch_optional(pool)
            .await?;

    Ok(row
        .and_then(|(value,)| serde_json::from_value(value).ok())
        .unwrap_or_default())
}

async fn persist(
    pool: &PgPool,
    document_id: Uuid,
    organization_id: &str,
    outcome: &AnalysisOutcome,
    prior_documents: &[(Uuid, Vec<Entity>)],
) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;

    // Serialize per organization: interleaved rebuilds would corrupt the
    // single-profile invariant. Other organizations proceed in parallel.
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(organization_id)
        .execute(&mut *tx)
        .await?;

    // Corrected text onto the stored document. Zero rows is fine: upload
    // persistence is a different collaborator's concern.
    sqlx::query("UPDATE documents SET content = $2, updated_at = NOW() WHERE id = $1")
        .bind(document_id)
        .bind(&outcome.corrected_text)
        .execute(&mut *tx)
        .await?;

    for (correction, applied) in outcome.corrections.iter().zip(&outcome.applied) {
        sqlx::query(
            "INSERT INTO validation_log
                 (id, document_id, organization_id, original_text, corrected_text,
                  confidence, applied, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())",
        )
        .bind(Uuid::new_v4())
        .bind(document_id)
        .bind(organization_id)
        .bind(&correction.original_text)
        .bind(&correction.corrected_text)
        .bind(correction.confidence)
        .bind(*applied)
        .execute(&mut *tx)
        .await?;
    }

    let entities_json = serde_json::to_value(&outcome.entities)?;
    sqlx::query(
        "INSERT INTO document_entities (document_id, organization_id, entities, updated_at)
         VALUES ($1, $2, $3, NOW())
         ON CONFLICT (document_id)
         DO UPDATE SET entities = EXCLUDED.entities, updated_at = NOW()",
    )
    .bind(document_id)
    .bind(organization_id)
    .bind(entities_json)
    .execute(&mut *tx)
    .await?;

    // Cumulative conflict counter carries across rebuilds.
    let prior_profile: Option<(serde_json::Value,)> =
        sqlx::query_as("SELECT profile FROM entity_profiles WHERE organization_id = $1")
            .bind(organization_id)
            .fetch_optional(&mut *tx)
            .await?;
    let prior_resolved = prior_profile
        .and_then(|(value,)| serde_json::from_value::<EntityProfile>(value).ok())
        .map(|p| p.data_quality.conflicts_resolved)
        .unwrap_or(0);

    let mut documents: Vec<(Uuid, Vec<Entity>)> = prior_documents.to_vec();
    documents.push((document_id, outcome.entities.clone()));

    let profile = build_profile(
        organization_id,
        &documents,
        &outcome.suppressed,
        &outcome.flagged,
        prior_resolved + outcome.conflicts_resolved as u32,
        Utc::now(),
    );
    let profile_json = serde_json::to_value(&profile)?;

    sqlx::query(
        "INSERT INTO entity_profiles (organization_id, profile, updated_at)
         VALUES ($1, $2, NOW())
         ON CONFLICT (organization_id)
         DO UPDATE SET profile = EXCLUDED.profile, updated_at = NOW()",
    )
    .bind(organization_id)
    .bind(profile_json)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        document = %document_id,
        organization = %organization_id,
        entities = profile.data_quality.entities_extracted,
        confidence = profile.data_quality.confidence_score,
        "Organization profile regenerated"
    );

    Ok(())
}

// ============================================================================
// PROMPTS
// ============================================================================

fn build_extraction_prompt(text: &str) -> String {
    format!(
        r#"Extract structured entities from this enterprise document text.

TEXT:
{}

Entity types (closed list): person, department, policy, date, number, organization.

Respond with ONE JSON object only, no markdown:
{{
  "entities": [
    {{
      "type": "person",
      "value": "normalized value",
      "attributes": {{"role": "job title if known", "field": "what this value describes", "unit": "unit for numbers"}},
      "confidence": 0.0-1.0
    }}
  ]
}}"#,
        text
    )
}

fn build_comparison_prompt(
    new_entities: &[Entity],
    prior_documents: &[(Uuid, Vec<Entity>)],
) -> String {
    let describe = |entities: &[Entity]| -> String {
        entities
            .iter()
            .map(|e| {
                format!(
                    "- {:?} \"{}\" (role: {}, confidence {:.2})",
                    e.entity_type,
                    e.normalized_value,
                    e.attributes.role.as_deref().unwrap_or("-"),
                    e.confidence
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let mut prior_block = String::new();
    for (document_id, entities) in prior_documents {
        prior_block.push_str(&format!("DOCUMENT {}:\n{}\n", document_id, describe(entities)));
    }

    format!(
        r#"Compare entities extracted from a NEW document against entities from PRIOR documents of the same organization. Identify conflicts (same field, differing values), similarities, and likely OCR/text corrections for the new document.

NEW DOCUMENT ENTITIES:
{}

PRIOR DOCUMENTS:
{}

Respond with ONE JSON object only, no markdown:
{{
  "conflicts": [
    {{"field": "what differs", "type": "person|department|policy|date|number|organization", "existing_value": "...", "new_value": "...", "recommendation": "use_new" | "use_existing" | "merge", "confidence": 0.0-1.0}}
  ],
  "similarities": [
    {{"field": "...", "value": "..."}}
  ],
  "corrections": [
    {{"original": "exact span from the new document", "corrected": "fixed span", "confidence": 0.0-1.0}}
  ]
}}"#,
        describe(new_entities),
        prior_block
    )
}

// ============================================================================
// TESTS
// ============================================================================
