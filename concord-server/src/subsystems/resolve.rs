//! Reference Resolver — does this question depend on prior turns?
//!
//! Two analyses run concurrently:
//! - a deterministic marker scan (pronouns/demonstratives, Vietnamese and
//!   English, plus very short questions) bound against the latest answer's
//!   provenance items
//! - a semantic collaborator call over the trailing message window
//!
//! An unambiguous deterministic single match wins outright. Otherwise the
//! collaborator's rewritten question is used, or one is synthesized by
//! injecting the referenced item's name. A detected reference with no
//! candidate item anywhere in history is an explicit `NoCandidate` error;
//! the caller turns it into a clarification request, never a silent guess.
//!
//! Confidence is always attached (0–100) and only annotates; resolution is
//! never blocked on low confidence.

use regex::Regex;

use concord_core::config::ResolverConfig;
use concord_core::models::{Message, ProvenanceRef, ReferenceAnalysis, ReferenceType};
use concord_core::parse::{self, SemanticReply};
use concord_core::semantic::SemanticBackend;

/// Marker phrases checked longest-first. Word-bounded, case-insensitive.
const MARKER_PATTERN: &str = r"(?i)\b(tài liệu (đó|này)|cái (đó|này)|ở trên|vừa (rồi|nãy)|đó|này|nó|chúng|that one|this one|those|them|that|this|it)\b";

#[derive(Debug)]
pub struct ResolveOutcome {
    pub analysis: ReferenceAnalysis,
    pub referenced_items: Vec<ProvenanceRef>,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("question refers to prior items but none exist in this conversation")]
    NoCandidate,
}

#[derive(Debug, Default)]
struct MarkerScan {
    matched: Option<String>,
    short_question: bool,
}

impl MarkerScan {
    fn suspected(&self) -> bool {
        self.matched.is_some() || self.short_question
    }
}

/// Collaborator reply schema for reference analysis. Confidence arrives on
/// the 0–100 conversation scale (the prompt asks for it; `confidence_0_100`
/// repairs replies that use 0–1 anyway).
#[derive(Debug, serde::Deserialize)]
struct CollabReference {
    has_reference: bool,
    #[serde(default)]
    reference_type: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    resolved_question: Option<String>,
    #[serde(default)]
    referenced_title: Option<String>,
    #[serde(default)]
    explanation: Option<String>,
}

pub async fn resolve(
    backend: &dyn SemanticBackend,
    transcript: &[Message],
    question: &str,
    config: &ResolverConfig,
) -> Result<ResolveOutcome, ResolveError> {
    // A first question cannot refer back to anything.
    if transcript.len() < 2 {
        return Ok(no_reference(question, 95, "fewer than two prior messages"));
    }

    let scan = scan_markers(question, config.short_question_max_tokens);
    let latest_items = latest_answer_items(transcript);
    let history_items = all_history_items(transcript);

    let window_start = transcript
        .len()
        .saturating_sub(config.window_messages.max(0) as usize);
    let window = &transcript[window_start..];

    let deterministic = async {
        if scan.suspected() && latest_items.len() == 1 {
            Some(latest_items[0].clone())
        } else {
            None
        }
    };
    let (det, collab) = tokio::join!(
        deterministic,
        collaborator_reference(backend, window, question)
    );

    if let Some(item) = det {
        let resolved = inject_item(question, &item);
        return Ok(ResolveOutcome {
            analysis: ReferenceAnalysis {
                has_reference: true,
                reference_type: ReferenceType::Direct,
                confidence: 90,
                resolved_question: resolved,
                explanation: format!(
                    "marker in question binds to the only item shown: {}",
                    item.title
                ),
            },
            referenced_items: vec![item],
        });
    }

    match collab {
        Some(c) if c.has_reference => {
            if history_items.is_empty() {
                return Err(ResolveError::NoCandidate);
            }

            let referenced = c
                .referenced_title
                .as_deref()
                .and_then(|title| find_item_by_title(&history_items, title))
                .or_else(|| latest_items.first().cloned())
                .or_else(|| history_items.last().cloned())
                // non-empty checked above
                .unwrap_or_else(|| history_items[0].clone());

            let resolved = c
                .resolved_question
                .filter(|q| !q.trim().is_empty())
                .unwrap_or_else(|| inject_item(question, &referenced));

            Ok(ResolveOutcome {
                analysis: ReferenceAnalysis {
                    has_reference: true,
                    reference_type: parse_reference_type(c.reference_type.as_deref()),
                    confidence: parse::confidence_0_100(c.confidence.unwrap_or(70.0)),
                    resolved_question: resolved,
                    explanation: c
                        .explanation
                        .unwrap_or_else(|| "collaborator detected a reference".to_string()),
                },
                referenced_items: vec![referenced],
            })
        }
        Some(c) => Ok(no_reference(
            question,
            parse::confidence_0_100(c.confidence.unwrap_or(80.0)),
            &c.explanation
                .unwrap_or_else(|| "collaborator found no reference".to_string()),
        )),
        None => {
            // Collaborator unavailable or unparseable: the marker scan is all
            // we have left.
            if !scan.suspected() {
                return Ok(no_reference(
                    question,
                    80,
                    "no markers detected; collaborator unavailable",
                ));
            }
            if history_items.is_empty() {
                return Err(ResolveError::NoCandidate);
            }
            let item = latest_items
                .first()
                .cloned()
                .unwrap_or_else(|| history_items[history_items.len() - 1].clone());
            let resolved = inject_item(question, &item);
            Ok(ResolveOutcome {
                analysis: ReferenceAnalysis {
                    has_reference: true,
                    reference_type: ReferenceType::Indirect,
                    confidence: 60,
                    resolved_question: resolved,
                    explanation: format!(
                        "marker scan only (collaborator unavailable); bound to {}",
                        item.title
                    ),
                },
                referenced_items: vec![item],
            })
        }
    }
}

fn no_reference(question: &str, confidence: u8, explanation: &str) -> ResolveOutcome {
    ResolveOutcome {
        analysis: ReferenceAnalysis {
            has_reference: false,
            reference_type: ReferenceType::None,
            confidence,
            resolved_question: question.to_string(),
            explanation: explanation.to_string(),
        },
        referenced_items: vec![],
    }
}

fn scan_markers(question: &str, max_tokens: usize) -> MarkerScan {
    let mut scan = MarkerScan {
        matched: None,
        short_question: question.split_whitespace().count() <= max_tokens,
    };

    if let Ok(re) = Regex::new(MARKER_PATTERN) {
        scan.matched = re
            .find(question)
            .map(|m| m.as_str().to_lowercase());
    }

    scan
}

/// Provenance items of the most recent answer, if any.
fn latest_answer_items(transcript: &[Message]) -> Vec<ProvenanceRef> {
    transcript
        .iter()
        .rev()
        .find(|m| m.is_answer())
        .map(|m| m.relevant_items.clone())
        .unwrap_or_default()
}

/// Every provenance item in the transcript, deduplicated, oldest first.
fn all_history_items(transcript: &[Message]) -> Vec<ProvenanceRef> {
    let mut seen = std::collections::HashSet::new();
    let mut items = Vec::new();
    for message in transcript {
        for item in &message.relevant_items {
            let key = (item.source.clone(), item.title.to_lowercase());
            if seen.insert(key) {
                items.push(item.clone());
            }
        }
    }
    items
}

fn find_item_by_title(items: &[ProvenanceRef], title: &str) -> Option<ProvenanceRef> {
    let needle = title.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    items
        .iter()
        .find(|item| {
            let have = item.title.to_lowercase();
            have == needle || have.contains(&needle) || needle.contains(&have)
        })
        .cloned()
}

/// Synthesized rewrite: the raw question with the referenced item named.
fn inject_item(question: &str, item: &ProvenanceRef) -> String {
    format!("{} ({})", question.trim(), item.title)
}

fn parse_reference_type(raw: Option<&str>) -> ReferenceType {
    match raw.map(|s| s.trim().to_lowercase()).as_deref() {
        Some("direct") => ReferenceType::Direct,
        Some("indirect") => ReferenceType::Indirect,
        _ => ReferenceType::Indirect,
    }
}

async fn collaborator_reference(
    backend: &dyn SemanticBackend,
    window: &[Message],
    question: &str,
) -> Option<CollabReference> {
    let prompt = build_reference_prompt(window, question);
    let raw = match backend.complete(&prompt).await {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(error = %e, "Reference collaborator failed — falling back to marker scan");
            return None;
        }
    };

    match parse::parse_reply::<CollabReference>(&raw) {
        SemanticReply::Parsed(c) => Some(c),
        SemanticReply::Partial(v) => {
            let has_reference = parse::bool_field(&v, "has_reference")?;
            Some(CollabReference {
                has_reference,
                reference_type: parse::str_field(&v, "reference_type"),
                confidence: parse::f64_field(&v, "confidence"),
                resolved_question: parse::str_field(&v, "resolved_question"),
                referenced_title: parse::str_field(&v, "referenced_title"),
                explanation: parse::str_field(&v, "explanation"),
            })
        }
        SemanticReply::Unparsed(raw) => {
            let head: String = raw.chars().take(120).collect();
            tracing::warn!(head = %head, "Unparseable reference reply");
            None
        }
    }
}

fn build_reference_prompt(window: &[Message], question: &str) -> String {
    let mut history = String::new();
    for message in window {
        history.push_str(&format!("[{}] {}\n", message.role, message.content));
        for item in &message.relevant_items {
            history.push_str(&format!("    (shown: {})\n", item.title));
        }
    }

    format!(
        r#"You analyze whether a follow-up question refers to earlier turns of a conversation.

CONVERSATION (most recent last):
{}

QUESTION: {}

Decide whether the question implicitly or explicitly refers to something shown earlier.
If it does, rewrite it as a fully self-contained question naming the referenced item.

Respond with ONE JSON object only, no markdown:
{{
  "has_reference": true or false,
  "reference_type": "direct" | "indirect" | "none",
  "confidence": 0-100,
  "resolved_question": "self-contained rewrite, or the original question",
  "referenced_title": "title of the referenced item, or empty",
  "explanation": "one short sentence"
}}"#,
        history, question
    )
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::models::{MessageMetadata, MessageRole};
    use concord_core::semantic::SemanticError;
    use uuid::Uuid;

    struct CannedSemantic(Option<String>);

    #[async_trait::async_trait]
    impl SemanticBackend for CannedSemantic {
        async fn complete(&self, _prompt: &str) -> Result<String, SemanticError> {
            match &self.0 {
                Some(reply) => Ok(reply.clone()),
                None => Err(SemanticError::EmptyReply),
            }
        }

        fn name(&self) -> &str {
            "canned"
        }
    }

    fn msg(role: MessageRole, content: &str, titles: &[&str]) -> Message {
        Message {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            role: role.as_str().to_string(),
            content: content.to_string(),
            relevant_items: titles
                .iter()
                .map(|t| ProvenanceRef {
                    source: "documents".to_string(),
                    document_id: Some(Uuid::new_v4()),
                    title: t.to_string(),
                })
                .collect(),
            metadata: MessageMetadata::default(),
            created_at: chrono::Utc::now(),
        }
    }

    fn pdi_transcript() -> Vec<Message> {
        vec![
            msg(MessageRole::Question, "Danh sách tài liệu PDI", &[]),
            msg(
                MessageRole::Answer,
                "Có 3 tài liệu: quy chế lương, nội quy, hợp đồng mẫu.",
                &[
                    "Quy chế lương thưởng PDI",
                    "Nội quy lao động PDI",
                    "Hợp đồng lao động mẫu PDI",
                ],
            ),
        ]
    }

    #[tokio::test]
    async fn brand_new_session_short_circuits() {
        let backend = CannedSemantic(None);
        let outcome = resolve(&backend, &[], "PDH là gì?", &ResolverConfig::default())
            .await
            .unwrap();
        assert!(!outcome.analysis.has_reference);
        assert_eq!(outcome.analysis.resolved_question, "PDH là gì?");
    }

    #[tokio::test]
    async fn single_prior_message_still_short_circuits() {
        let backend = CannedSemantic(None);
        let transcript = vec![msg(MessageRole::Question, "PDH là gì?", &[])];
        let outcome = resolve(&backend, &transcript, "còn PDI?", &ResolverConfig::default())
            .await
            .unwrap();
        assert!(!outcome.analysis.has_reference);
    }

    #[tokio::test]
    async fn unambiguous_single_item_wins_deterministically() {
        // Collaborator would deny the reference, but the deterministic single
        // match is preferred.
        let backend = CannedSemantic(Some(
            r#"{"has_reference": false, "confidence": 99}"#.to_string(),
        ));
        let transcript = vec![
            msg(MessageRole::Question, "Tìm quy chế lương PDH", &[]),
            msg(
                MessageRole::Answer,
                "Đây là tài liệu phù hợp nhất.",
                &["Quy chế lương thưởng PDH"],
            ),
        ];

        let outcome = resolve(
            &backend,
            &transcript,
            "nó nói gì về thưởng tết?",
            &ResolverConfig::default(),
        )
        .await
        .unwrap();

        assert!(outcome.analysis.has_reference);
        assert_eq!(outcome.analysis.reference_type, ReferenceType::Direct);
        assert_eq!(outcome.analysis.confidence, 90);
        assert!(outcome
            .analysis
            .resolved_question
            .contains("Quy chế lương thưởng PDH"));
    }

    #[tokio::test]
    async fn ambiguous_follow_up_uses_collaborator_rewrite() {
        // Scenario A: three documents shown, follow-up asks about "tài liệu đó".
        let backend = CannedSemantic(Some(
            r#"{
                "has_reference": true,
                "reference_type": "indirect",
                "confidence": 82,
                "resolved_question": "Quy chế lương thưởng PDI nói gì về lương?",
                "referenced_title": "Quy chế lương thưởng PDI",
                "explanation": "pronoun points at the salary regulation"
            }"#
            .to_string(),
        ));

        let outcome = resolve(
            &backend,
            &pdi_transcript(),
            "tài liệu đó nói gì về lương",
            &ResolverConfig::default(),
        )
        .await
        .unwrap();

        assert!(outcome.analysis.has_reference);
        assert_eq!(outcome.analysis.confidence, 82);
        assert!(outcome
            .analysis
            .resolved_question
            .contains("Quy chế lương thưởng PDI"));
        assert_eq!(outcome.referenced_items.len(), 1);
        assert_eq!(outcome.referenced_items[0].title, "Quy chế lương thưởng PDI");
    }

    #[tokio::test]
    async fn fractional_confidence_is_rescaled() {
        let backend = CannedSemantic(Some(
            r#"{"has_reference": true, "confidence": 0.82, "referenced_title": "Nội quy lao động PDI"}"#
                .to_string(),
        ));

        let outcome = resolve(
            &backend,
            &pdi_transcript(),
            "tài liệu đó nói gì về lương",
            &ResolverConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.analysis.confidence, 82);
    }

    #[tokio::test]
    async fn collaborator_failure_synthesizes_from_latest_answer() {
        let backend = CannedSemantic(None);

        let outcome = resolve(
            &backend,
            &pdi_transcript(),
            "tài liệu đó nói gì về lương",
            &ResolverConfig::default(),
        )
        .await
        .unwrap();

        assert!(outcome.analysis.has_reference);
        assert_eq!(outcome.analysis.confidence, 60);
        // Synthesized rewrite names the top-ranked shown item.
        assert!(outcome
            .analysis
            .resolved_question
            .contains("Quy chế lương thưởng PDI"));
    }

    #[tokio::test]
    async fn detected_reference_without_candidates_is_an_error() {
        let backend = CannedSemantic(None);
        let transcript = vec![
            msg(MessageRole::Question, "chào bạn", &[]),
            msg(MessageRole::Answer, "chào anh/chị, tôi giúp gì được?", &[]),
        ];

        let result = resolve(
            &backend,
            &transcript,
            "tài liệu đó nói gì?",
            &ResolverConfig::default(),
        )
        .await;

        assert!(matches!(result, Err(ResolveError::NoCandidate)));
    }

    #[tokio::test]
    async fn garbage_collaborator_reply_degrades_to_marker_scan() {
        let backend = CannedSemantic(Some("I could not make sense of that, sorry".to_string()));

        let outcome = resolve(
            &backend,
            &pdi_transcript(),
            "còn lương?",
            &ResolverConfig::default(),
        )
        .await
        .unwrap();

        // Short question + markerless garbage reply: marker-scan synthesis.
        assert!(outcome.analysis.has_reference);
        assert_eq!(outcome.analysis.confidence, 60);
    }

    #[test]
    fn marker_scan_finds_vietnamese_and_english_markers() {
        let cfg = ResolverConfig::default();
        assert!(scan_markers("tài liệu đó nói gì về lương", cfg.short_question_max_tokens)
            .matched
            .is_some());
        assert!(scan_markers("what does it say about leave", cfg.short_question_max_tokens)
            .matched
            .is_some());
        assert!(scan_markers(
            "Tóm tắt chính sách nghỉ phép của công ty Phú Đông",
            cfg.short_question_max_tokens
        )
        .matched
        .is_none());
    }

    #[test]
    fn short_questions_are_suspected_follow_ups() {
        let cfg = ResolverConfig::default();
        assert!(scan_markers("còn lương?", cfg.short_question_max_tokens).short_question);
        assert!(
            !scan_markers(
                "Cho tôi xem toàn bộ danh sách tài liệu của công ty PDH năm nay",
                cfg.short_question_max_tokens
            )
            .short_question
        );
    }

    #[test]
    fn history_items_deduplicate_across_turns() {
        let transcript = vec![
            msg(MessageRole::Answer, "a", &["Doc A", "Doc B"]),
            msg(MessageRole::Answer, "b", &["doc a", "Doc C"]),
        ];
        let items = all_history_items(&transcript);
        assert_eq!(items.len(), 3);
    }
}
