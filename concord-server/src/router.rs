//! Request router — drives the query-time and ingestion-time pipelines.
//!
//! Query-time: Session Store → Reference Resolver → Intent Classifier →
//! Data Aggregator → synthesizer boundary → Session Store (append).
//! Ingestion-time: document text → Entity Consolidator.

use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

use concord_core::config::ConcordConfig;
use concord_core::ipc::{ConcordRequest, ConcordResponse};
use concord_core::models::{
    Intent, MessageMetadata, MessageRole, ProvenanceRef, SessionContext,
};
use concord_core::safety::SafetyGate;
use concord_core::search::SearchBackend;
use concord_core::semantic::SemanticBackend;
use concord_core::ConcordError;

use crate::subsystems::aggregate::{self, AggregatorDeps, Bundle, ConstraintAnswers, SourceCache};
use crate::subsystems::{consolidate, intent, resolve, sessions};

/// Fixed refusal for blocked content. The turn is still recorded.
pub const REFUSAL_ANSWER: &str =
    "Xin lỗi, tôi không thể hỗ trợ yêu cầu này. Vui lòng đặt câu hỏi khác về tài liệu của công ty.";

/// Fixed clarification prompt when a reference cannot be bound to any item.
pub const CLARIFICATION_ANSWER: &str =
    "Bạn đang nhắc đến tài liệu hay nội dung nào? Vui lòng nêu rõ tên để tôi tra cứu chính xác.";

/// Messages fetched per turn; covers the resolver window with headroom.
const TRANSCRIPT_LIMIT: i64 = 20;

pub struct AppState {
    pub pool: PgPool,
    pub config: ConcordConfig,
    pub semantic: Arc<dyn SemanticBackend>,
    pub search: Arc<dyn SearchBackend>,
    pub safety: Arc<SafetyGate>,
    pub constraints: Arc<ConstraintAnswers>,
    pub cache: Arc<SourceCache>,
}

pub async fn handle_request(request: ConcordRequest, state: &AppState) -> ConcordResponse {
    match request {
        ConcordRequest::Ping => ConcordResponse::pong(),
        ConcordRequest::Health => match concord_core::db::health_check(&state.pool).await {
            Ok(version) => ConcordResponse::ok(serde_json::json!({
                "postgresql": version,
                "status": "healthy"
            })),
            Err(e) => ConcordResponse::err(format!("DB health check failed: {}", e)),
        },
        ConcordRequest::Ask {
            session_id,
            user_id,
            question,
        } => match handle_ask(state, session_id, user_id.as_deref(), &question).await {
            Ok(data) => ConcordResponse::ok(data),
            Err(e) => ConcordResponse::err(e.to_string()),
        },
        ConcordRequest::Ingest {
            document_id,
            organization_id,
            text,
        } => {
            match consolidate::consolidate(
                &state.pool,
                state.semantic.as_ref(),
                document_id,
                &text,
                &organization_id,
                &state.config.consolidation,
            )
            .await
            {
                Ok(report) => ConcordResponse::ok(serde_json::json!({
                    "document_id": report.document_id,
                    "organization_id": report.organization_id,
                    "entities": report.entities.len(),
                    "corrections_applied": report.corrections_applied,
                    "conflicts_resolved": report.conflicts_resolved,
                    "conflicts_flagged": report.conflicts_flagged,
                    "confidence": report.confidence,
                    "degraded": report.degraded,
                })),
                Err(e) => ConcordResponse::err(e.to_string()),
            }
        }
        ConcordRequest::EndSession { session_id } => {
            match sessions::expire(&state.pool, session_id).await {
                Ok(ended) => ConcordResponse::ok(serde_json::json!({"ended": ended})),
                Err(e) => ConcordResponse::err(e.to_string()),
            }
        }
        ConcordRequest::ReloadRules => {
            let safety = state.safety.reload(&state.pool).await;
            let constraints = state.constraints.reload(&state.pool).await;
            match (safety, constraints) {
                (Ok(safety_rules), Ok(constraint_answers)) => {
                    ConcordResponse::ok(serde_json::json!({
                        "safety_rules": safety_rules,
                        "constraint_answers": constraint_answers,
                    }))
                }
                (Err(e), _) | (_, Err(e)) => {
                    ConcordResponse::err(format!("Rule reload failed: {}", e))
                }
            }
        }
    }
}

async fn handle_ask(
    state: &AppState,
    session_id: Option<Uuid>,
    user_id: Option<&str>,
    question: &str,
) -> Result<serde_json::Value, ConcordError> {
    let (session, reissued) =
        sessions::get_or_create(&state.pool, session_id, user_id, &state.config.session).await?;

    let transcript = sessions::get_transcript(&state.pool, session.id, TRANSCRIPT_LIMIT).await?;

    let resolution = match resolve::resolve(
        state.semantic.as_ref(),
        &transcript,
        question,
        &state.config.resolver,
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(resolve::ResolveError::NoCandidate) => {
            // Clarification, not a system error: record the turn and ask the
            // user to name the item.
            sessions::append(
                &state.pool,
                session.id,
                MessageRole::Question,
                question,
                &[],
                &MessageMetadata::default(),
            )
            .await?;
            sessions::append(
                &state.pool,
                session.id,
                MessageRole::Answer,
                CLARIFICATION_ANSWER,
                &[],
                &MessageMetadata::default(),
            )
            .await?;
            return Ok(serde_json::json!({
                "session_id": session.id,
                "session_reissued": reissued,
                "answer": CLARIFICATION_ANSWER,
                "clarification_needed": true,
                "sources": [],
            }));
        }
    };
    let resolved_question = resolution.analysis.resolved_question.clone();

    let intent_analysis = intent::classify(
        state.semantic.as_ref(),
        &state.safety,
        &resolved_question,
    )
    .await;

    let question_meta = MessageMetadata {
        resolved_question: Some(resolved_question.clone()),
        intent: Some(intent_analysis.intent),
        reference_confidence: Some(resolution.analysis.confidence),
        intent_confidence: Some(intent_analysis.confidence),
        sources: Vec::new(),
        degraded: false,
    };

    // Terminal blocked: fixed refusal, aggregator never consulted, turn
    // still recorded.
    if intent_analysis.intent == Intent::Blocked {
        sessions::append(
            &state.pool,
            session.id,
            MessageRole::Question,
            question,
            &resolution.referenced_items,
            &question_meta,
        )
        .await?;
        sessions::append(
            &state.pool,
            session.id,
            MessageRole::Answer,
            REFUSAL_ANSWER,
            &[],
            &MessageMetadata {
                intent: Some(Intent::Blocked),
                ..Default::default()
            },
        )
        .await?;
        return Ok(serde_json::json!({
            "session_id": session.id,
            "session_reissued": reissued,
            "answer": REFUSAL_ANSWER,
            "blocked": true,
            "sources": [],
        }));
    }

    let deps = AggregatorDeps {
        pool: &state.pool,
        search: state.search.as_ref(),
        cache: &state.cache,
        constraints: &state.constraints,
    };
    let bundle = aggregate::aggregate(
        &deps,
        &resolved_question,
        &intent_analysis,
        &state.config.aggregator,
    )
    .await;

    let answer = synthesize_answer(state.semantic.as_ref(), &resolved_question, &bundle).await;

    let relevant: Vec<ProvenanceRef> = bundle
        .documents
        .iter()
        .take(5)
        .chain(bundle.knowledge_entries.iter().take(3))
        .map(|hit| ProvenanceRef {
            source: hit.source.clone(),
            document_id: Some(hit.id),
            title: hit.title.clone(),
        })
        .collect();

    sessions::append(
        &state.pool,
        session.id,
        MessageRole::Question,
        question,
        &resolution.referenced_items,
        &MessageMetadata {
            sources: bundle.sources.clone(),
            ..question_meta
        },
    )
    .await?;
    sessions::append(
        &state.pool,
        session.id,
        MessageRole::Answer,
        &answer,
        &relevant,
        &MessageMetadata {
            sources: bundle.sources.clone(),
            ..Default::default()
        },
    )
    .await?;

    sessions::merge_context(
        &state.pool,
        session.id,
        &SessionContext {
            last_documents: relevant.clone(),
            last_intent: Some(intent_analysis.intent),
            last_question: Some(question.to_string()),
        },
    )
    .await?;

    Ok(serde_json::json!({
        "session_id": session.id,
        "session_reissued": reissued,
        "answer": answer,
        "resolved_question": resolved_question,
        "has_reference": resolution.analysis.has_reference,
        "reference_confidence": resolution.analysis.confidence,
        "intent": intent_analysis.intent,
        "intent_confidence": intent_analysis.confidence,
        "sources": bundle.sources,
        "documents": bundle.documents,
        "knowledge_entries": bundle.knowledge_entries,
        "organization": bundle.organization_info,
        "department": bundle.department_info,
    }))
}

/// Synthesizer boundary. A constraint answer bypasses synthesis entirely;
/// otherwise one collaborator call turns the bundle into prose, degrading
/// to a deterministic bundle summary on failure.
async fn synthesize_answer(
    backend: &dyn SemanticBackend,
    question: &str,
    bundle: &Bundle,
) -> String {
    if let Some(answer) = &bundle.constraint_answer {
        return answer.clone();
    }

    let prompt = build_synthesis_prompt(question, bundle);
    match backend.complete(&prompt).await {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => fallback_answer(bundle),
        Err(e) => {
            tracing::warn!(error = %e, "Synthesis collaborator failed — deterministic summary");
            fallback_answer(bundle)
        }
    }
}

fn build_synthesis_prompt(question: &str, bundle: &Bundle) -> String {
    let mut context = String::new();
    for hit in bundle.documents.iter().take(5) {
        context.push_str(&format!("[documents] {}: {}\n", hit.title, hit.snippet));
    }
    for hit in bundle.knowledge_entries.iter().take(5) {
        context.push_str(&format!("[knowledge] {}: {}\n", hit.title, hit.snippet));
    }
    if let Some(org) = &bundle.organization_info {
        context.push_str(&format!(
            "[organizations] {} ({}): {}\n",
            org.name,
            org.code,
            org.description.as_deref().unwrap_or("-")
        ));
    }
    if let Some(dept) = &bundle.department_info {
        context.push_str(&format!(
            "[departments] {}: {}\n",
            dept.name,
            dept.description.as_deref().unwrap_or("-")
        ));
    }

    format!(
        r#"Answer the user's question using ONLY the sources below. Answer in the question's language. If the sources do not contain the answer, say so briefly.

SOURCES:
{}

QUESTION: {}"#,
        context, question
    )
}

fn fallback_answer(bundle: &Bundle) -> String {
    if bundle.documents.is_empty() && bundle.knowledge_entries.is_empty() {
        return "Tôi chưa tìm thấy thông tin phù hợp trong kho tài liệu.".to_string();
    }

    let mut parts = Vec::new();
    if !bundle.documents.is_empty() {
        let titles: Vec<&str> = bundle
            .documents
            .iter()
            .take(5)
            .map(|h| h.title.as_str())
            .collect();
        parts.push(format!(
            "Tôi tìm thấy {} tài liệu liên quan: {}.",
            bundle.documents.len(),
            titles.join("; ")
        ));
    }
    if !bundle.knowledge_entries.is_empty() {
        let titles: Vec<&str> = bundle
            .knowledge_entries
            .iter()
            .take(3)
            .map(|h| h.title.as_str())
            .collect();
        parts.push(format!("Thông tin liên quan: {}.", titles.join("; ")));
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::search::SearchHit;

    fn hit(title: &str) -> SearchHit {
        SearchHit {
            id: Uuid::new_v4(),
            title: title.to_string(),
            snippet: "...".to_string(),
            score: 0.8,
            source: "documents".to_string(),
        }
    }

    #[tokio::test]
    async fn constraint_answer_bypasses_synthesis() {
        struct MustNotBeCalled;

        #[async_trait::async_trait]
        impl SemanticBackend for MustNotBeCalled {
            async fn complete(
                &self,
                _prompt: &str,
            ) -> Result<String, concord_core::SemanticError> {
                panic!("synthesis must be bypassed by a constraint answer");
            }

            fn name(&self) -> &str {
                "must-not-be-called"
            }
        }

        let bundle = Bundle {
            constraint_answer: Some("Giờ làm việc: 8h00-17h30.".to_string()),
            ..Default::default()
        };
        let answer = synthesize_answer(&MustNotBeCalled, "giờ làm việc?", &bundle).await;
        assert_eq!(answer, "Giờ làm việc: 8h00-17h30.");
    }

    #[test]
    fn fallback_answer_lists_found_documents() {
        let bundle = Bundle {
            documents: vec![hit("Quy chế lương thưởng PDI"), hit("Nội quy lao động PDI")],
            ..Default::default()
        };
        let answer = fallback_answer(&bundle);
        assert!(answer.contains("2 tài liệu"));
        assert!(answer.contains("Quy chế lương thưởng PDI"));
    }

    #[test]
    fn fallback_answer_admits_empty_bundles() {
        let answer = fallback_answer(&Bundle::default());
        assert!(answer.contains("chưa tìm thấy"));
    }
}
