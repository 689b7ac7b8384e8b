//! Answer resolution: a short gauntlet of gates between the compacted
//! context and the caller. Cheap deterministic checks run first, the
//! model is consulted only when they pass, and whatever the model says
//! must be verifiable against the context or the pipeline abstains.
//!
//! Gate order: RULE_EXTRACT, PRECHECK, CLASSIFY_ANSWERABLE, GENERATE,
//! ENFORCE_SPAN. A wrong answer is worse than no answer, so every
//! failure mode resolves to an abstention with a reason.

use common::{error::AppError, services::ChatModel};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;

use crate::compaction::ContextBundle;
use crate::scoring::extract_keywords;

/// Sentinel the generator is instructed to emit when the context does not
/// hold the answer.
pub const IDK_SENTINEL: &str = "I don't know";

const GENERATE_SYSTEM_PROMPT: &str = "You answer questions using ONLY the provided context. \
Quote or closely paraphrase the context. If the context does not contain the answer, reply \
exactly: I don't know";

const CLASSIFY_SYSTEM_PROMPT: &str = "Decide whether the question can be answered from the \
provided context alone. Reply with exactly one word: yes or no.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbstainReason {
    /// The question shares too little vocabulary with the context.
    LowOverlap,
    /// The answerability classifier said no, or could not be consulted.
    NotClassifiedAnswerable,
    /// The generated answer is not a verifiable span of the context.
    SpanNotVerified,
    /// Nothing was retrieved, or an upstream stage failed hard.
    EmptyContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AnswerResult {
    Answer { text: String },
    Abstain { reason: AbstainReason },
}

impl AnswerResult {
    pub fn is_abstention(&self) -> bool {
        matches!(self, Self::Abstain { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    RuleExtract,
    Precheck,
    ClassifyAnswerable,
    Generate,
    EnforceSpan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDisposition {
    Passed,
    Skipped,
    Answered,
    Abstained,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct GateTraceEntry {
    pub gate: GateKind,
    pub disposition: GateDisposition,
}

/// Which gates run, derived from the pipeline tuning.
#[derive(Debug, Clone, Copy)]
pub struct GateSettings {
    pub rule_extract_enabled: bool,
    pub precheck_enabled: bool,
    pub classify_enabled: bool,
    pub enforce_span_enabled: bool,
    pub precheck_min_overlap: f32,
    pub service_timeout_ms: u64,
}

/// Runs the gate sequence over the compacted context and returns the
/// final result along with the per-gate trace.
pub async fn resolve_answer(
    model: &dyn ChatModel,
    question: &str,
    context: &ContextBundle,
    settings: &GateSettings,
) -> (AnswerResult, Vec<GateTraceEntry>) {
    let mut trace = Vec::new();

    if context.is_empty() {
        return (
            AnswerResult::Abstain {
                reason: AbstainReason::EmptyContext,
            },
            trace,
        );
    }

    let context_text = context.text();

    if settings.rule_extract_enabled {
        if let Some(answer) = rule_extract(question, &context_text) {
            trace.push(GateTraceEntry {
                gate: GateKind::RuleExtract,
                disposition: GateDisposition::Answered,
            });
            debug!("rule extraction short-circuited generation");
            return (AnswerResult::Answer { text: answer }, trace);
        }
        trace.push(GateTraceEntry {
            gate: GateKind::RuleExtract,
            disposition: GateDisposition::Passed,
        });
    } else {
        trace.push(GateTraceEntry {
            gate: GateKind::RuleExtract,
            disposition: GateDisposition::Skipped,
        });
    }

    if settings.precheck_enabled {
        let overlap = question_context_overlap(question, &context_text);
        if overlap < settings.precheck_min_overlap {
            trace.push(GateTraceEntry {
                gate: GateKind::Precheck,
                disposition: GateDisposition::Abstained,
            });
            return (
                AnswerResult::Abstain {
                    reason: AbstainReason::LowOverlap,
                },
                trace,
            );
        }
        trace.push(GateTraceEntry {
            gate: GateKind::Precheck,
            disposition: GateDisposition::Passed,
        });
    } else {
        trace.push(GateTraceEntry {
            gate: GateKind::Precheck,
            disposition: GateDisposition::Skipped,
        });
    }

    let timeout = Duration::from_millis(settings.service_timeout_ms);

    if settings.classify_enabled {
        match classify_answerable(model, question, &context_text, timeout).await {
            Ok(true) => trace.push(GateTraceEntry {
                gate: GateKind::ClassifyAnswerable,
                disposition: GateDisposition::Passed,
            }),
            Ok(false) | Err(_) => {
                trace.push(GateTraceEntry {
                    gate: GateKind::ClassifyAnswerable,
                    disposition: GateDisposition::Abstained,
                });
                return (
                    AnswerResult::Abstain {
                        reason: AbstainReason::NotClassifiedAnswerable,
                    },
                    trace,
                );
            }
        }
    } else {
        trace.push(GateTraceEntry {
            gate: GateKind::ClassifyAnswerable,
            disposition: GateDisposition::Skipped,
        });
    }

    let generated = match generate(model, question, &context_text, timeout).await {
        Ok(text) => text,
        Err(error) => {
            warn!(%error, "generation failed, abstaining");
            trace.push(GateTraceEntry {
                gate: GateKind::Generate,
                disposition: GateDisposition::Abstained,
            });
            return (
                AnswerResult::Abstain {
                    reason: AbstainReason::SpanNotVerified,
                },
                trace,
            );
        }
    };

    if is_sentinel(&generated) {
        trace.push(GateTraceEntry {
            gate: GateKind::Generate,
            disposition: GateDisposition::Abstained,
        });
        return (
            AnswerResult::Abstain {
                reason: AbstainReason::SpanNotVerified,
            },
            trace,
        );
    }
    trace.push(GateTraceEntry {
        gate: GateKind::Generate,
        disposition: GateDisposition::Passed,
    });

    if settings.enforce_span_enabled {
        if !span_verified(&generated, &context_text) {
            trace.push(GateTraceEntry {
                gate: GateKind::EnforceSpan,
                disposition: GateDisposition::Abstained,
            });
            return (
                AnswerResult::Abstain {
                    reason: AbstainReason::SpanNotVerified,
                },
                trace,
            );
        }
        trace.push(GateTraceEntry {
            gate: GateKind::EnforceSpan,
            disposition: GateDisposition::Passed,
        });
    } else {
        trace.push(GateTraceEntry {
            gate: GateKind::EnforceSpan,
            disposition: GateDisposition::Skipped,
        });
    }

    (AnswerResult::Answer { text: tidy(&generated) }, trace)
}

/// Deterministic extraction for lookup-style questions. Two patterns: a
/// single structured `key: value` (or `key = value`) line whose key terms
/// all appear in the question, and a file/path question against a context
/// holding exactly one path-like token. Ambiguity means no extraction.
fn rule_extract(question: &str, context: &str) -> Option<String> {
    let question_terms = extract_keywords(question);
    if question_terms.is_empty() {
        return None;
    }

    let mut matched_value: Option<&str> = None;
    for line in context.lines() {
        let Some((key, value)) = split_structured_line(line) else {
            continue;
        };
        let key_terms = extract_keywords(key);
        if key_terms.is_empty() || value.trim().is_empty() {
            continue;
        }
        if key_terms.iter().all(|term| question_terms.contains(term)) {
            if matched_value.is_some() {
                // Two plausible lines; defer to the model.
                return None;
            }
            matched_value = Some(value.trim());
        }
    }
    if let Some(value) = matched_value {
        return Some(tidy(value));
    }

    extract_unique_path(question, context)
}

fn extract_unique_path(question: &str, context: &str) -> Option<String> {
    let lowered = question.to_ascii_lowercase();
    if !lowered.contains("file") && !lowered.contains("path") {
        return None;
    }

    let mut unique: Option<&str> = None;
    for token in context.split_whitespace() {
        let cleaned = token.trim_matches(|c: char| {
            !c.is_alphanumeric() && c != '.' && c != '/' && c != '_' && c != '-'
        });
        if !looks_like_file_path(cleaned) {
            continue;
        }
        match unique {
            None => unique = Some(cleaned),
            Some(prior) if prior == cleaned => {}
            Some(_) => return None,
        }
    }
    unique.map(tidy)
}

fn looks_like_file_path(token: &str) -> bool {
    if token.len() < 4 {
        return false;
    }
    token.rsplit_once('.').is_some_and(|(stem, ext)| {
        !stem.is_empty()
            && (2..=4).contains(&ext.len())
            && ext.chars().all(|c| c.is_ascii_alphanumeric())
    })
}

fn split_structured_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim().trim_start_matches(['-', '*', ' ']);
    for separator in [": ", " = ", ":", "="] {
        if let Some((key, value)) = line.split_once(separator) {
            let key = key.trim();
            if !key.is_empty() && key.split_whitespace().count() <= 4 {
                return Some((key, value));
            }
            return None;
        }
    }
    None
}

fn question_context_overlap(question: &str, context: &str) -> f32 {
    let question_terms = extract_keywords(question);
    if question_terms.is_empty() {
        return 1.0;
    }
    let context_terms = extract_keywords(context);
    let matches = question_terms
        .iter()
        .filter(|term| context_terms.binary_search(term).is_ok())
        .count();
    (matches as f32) / (question_terms.len() as f32)
}

async fn classify_answerable(
    model: &dyn ChatModel,
    question: &str,
    context: &str,
    timeout: Duration,
) -> Result<bool, AppError> {
    let user = format!("Context:\n{context}\n\nQuestion: {question}");
    let reply = tokio::time::timeout(timeout, model.complete(CLASSIFY_SYSTEM_PROMPT, &user))
        .await
        .map_err(|_| AppError::Timeout("answerability classifier".into()))??;
    let normalized = reply.trim().to_ascii_lowercase();
    // Anything other than a clear positive counts as no.
    Ok(normalized.starts_with("yes") || normalized.starts_with("answerable"))
}

async fn generate(
    model: &dyn ChatModel,
    question: &str,
    context: &str,
    timeout: Duration,
) -> Result<String, AppError> {
    let user = format!("Context:\n{context}\n\nQuestion: {question}");
    tokio::time::timeout(timeout, model.complete(GENERATE_SYSTEM_PROMPT, &user))
        .await
        .map_err(|_| AppError::Timeout("answer generation".into()))?
}

fn is_sentinel(text: &str) -> bool {
    let normalized = normalize_for_match(text);
    let sentinel = normalize_for_match(IDK_SENTINEL);
    normalized == sentinel || normalized.starts_with(&sentinel)
}

/// NFKC-normalized, lowercased, whitespace-collapsed form used for span
/// containment checks.
fn normalize_for_match(text: &str) -> String {
    text.nfkc()
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn span_verified(answer: &str, context: &str) -> bool {
    let answer = normalize_for_match(answer);
    if answer.is_empty() {
        return false;
    }
    normalize_for_match(context).contains(&answer)
}

/// Trims and collapses internal whitespace, preserving case.
fn tidy(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compaction::{ContextBundle, SelectedChunk};
    use common::test_support::{FailingChatModel, ScriptedChatModel};

    fn bundle(texts: &[&str]) -> ContextBundle {
        ContextBundle {
            chunks: texts
                .iter()
                .enumerate()
                .map(|(i, text)| SelectedChunk {
                    chunk_id: format!("c{i}"),
                    file_path: "doc.md".to_owned(),
                    text: (*text).to_owned(),
                    score: 0.5,
                })
                .collect(),
            token_count: 10,
            token_budget: 100,
            compacted: false,
        }
    }

    fn settings() -> GateSettings {
        GateSettings {
            rule_extract_enabled: true,
            precheck_enabled: true,
            classify_enabled: true,
            enforce_span_enabled: true,
            precheck_min_overlap: 0.10,
            service_timeout_ms: 1000,
        }
    }

    #[tokio::test]
    async fn empty_context_abstains_without_model_calls() {
        let model = FailingChatModel;
        let context = bundle(&[]);
        let (result, trace) = resolve_answer(&model, "anything?", &context, &settings()).await;

        assert_eq!(
            result,
            AnswerResult::Abstain {
                reason: AbstainReason::EmptyContext
            }
        );
        assert!(trace.is_empty());
    }

    #[tokio::test]
    async fn rule_extraction_answers_structured_lookups_without_the_model() {
        let model = FailingChatModel;
        let context = bundle(&["name: answer-pipeline\nversion: 0.1.0"]);
        let (result, trace) =
            resolve_answer(&model, "What is the version?", &context, &settings()).await;

        assert_eq!(
            result,
            AnswerResult::Answer {
                text: "0.1.0".to_owned()
            }
        );
        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0].gate, GateKind::RuleExtract);
        assert_eq!(trace[0].disposition, GateDisposition::Answered);
    }

    #[tokio::test]
    async fn file_question_with_one_path_in_context_is_answered_by_rule() {
        let model = FailingChatModel;
        let context = bundle(&["The tuning defaults all live in src/pipeline/config.rs today."]);
        let (result, _) = resolve_answer(
            &model,
            "Which file holds the tuning defaults?",
            &context,
            &settings(),
        )
        .await;

        assert_eq!(
            result,
            AnswerResult::Answer {
                text: "src/pipeline/config.rs".to_owned()
            }
        );
    }

    #[tokio::test]
    async fn file_question_with_several_paths_defers_to_the_model() {
        let model = ScriptedChatModel::new(vec!["yes", "a.rs"]);
        let context = bundle(&["Both a.rs and b.rs hold tuning code for the file layout."]);
        let (result, _) = resolve_answer(
            &model,
            "Which file holds the tuning code?",
            &context,
            &settings(),
        )
        .await;

        assert_eq!(
            result,
            AnswerResult::Answer {
                text: "a.rs".to_owned()
            }
        );
    }

    #[tokio::test]
    async fn irrelevant_context_with_span_enforcement_abstains_on_the_sentinel() {
        let model = ScriptedChatModel::new(vec![IDK_SENTINEL]);
        let context = bundle(&["chapter twelve discusses medieval agriculture practices"]);
        let settings = GateSettings {
            rule_extract_enabled: true,
            precheck_enabled: false,
            classify_enabled: false,
            enforce_span_enabled: true,
            precheck_min_overlap: 0.10,
            service_timeout_ms: 1000,
        };

        let (result, _) = resolve_answer(
            &model,
            "What is the retry backoff interval?",
            &context,
            &settings,
        )
        .await;

        assert_eq!(
            result,
            AnswerResult::Abstain {
                reason: AbstainReason::SpanNotVerified
            }
        );
    }

    #[tokio::test]
    async fn ambiguous_structured_lines_defer_to_the_model() {
        let model = ScriptedChatModel::new(vec!["yes", "2.0"]);
        let context = bundle(&["version: 1.0\nversion: 2.0"]);
        let (result, _) =
            resolve_answer(&model, "What is the version?", &context, &settings()).await;

        assert_eq!(
            result,
            AnswerResult::Answer {
                text: "2.0".to_owned()
            }
        );
    }

    #[tokio::test]
    async fn low_overlap_abstains_before_any_model_call() {
        let model = FailingChatModel;
        let context = bundle(&["completely unrelated text about gardening tulips"]);
        let (result, _) = resolve_answer(
            &model,
            "How does the scheduler preempt kernel threads?",
            &context,
            &settings(),
        )
        .await;

        assert_eq!(
            result,
            AnswerResult::Abstain {
                reason: AbstainReason::LowOverlap
            }
        );
    }

    #[tokio::test]
    async fn negative_classification_abstains() {
        let model = ScriptedChatModel::new(vec!["no"]);
        let context = bundle(&["the scheduler runs tasks in priority order"]);
        let (result, _) = resolve_answer(
            &model,
            "What order does the scheduler run tasks in?",
            &context,
            &settings(),
        )
        .await;

        assert_eq!(
            result,
            AnswerResult::Abstain {
                reason: AbstainReason::NotClassifiedAnswerable
            }
        );
    }

    #[tokio::test]
    async fn classifier_failure_abstains_rather_than_guessing() {
        let model = ScriptedChatModel::new(vec![]);
        let context = bundle(&["the scheduler runs tasks in priority order"]);
        let (result, _) = resolve_answer(
            &model,
            "What order does the scheduler run tasks in?",
            &context,
            &settings(),
        )
        .await;

        assert_eq!(
            result,
            AnswerResult::Abstain {
                reason: AbstainReason::NotClassifiedAnswerable
            }
        );
    }

    #[tokio::test]
    async fn verified_span_is_returned_as_the_answer() {
        let model = ScriptedChatModel::new(vec!["yes", "priority order"]);
        let context = bundle(&["the scheduler runs tasks in priority order"]);
        let (result, trace) = resolve_answer(
            &model,
            "What order does the scheduler run tasks in?",
            &context,
            &settings(),
        )
        .await;

        assert_eq!(
            result,
            AnswerResult::Answer {
                text: "priority order".to_owned()
            }
        );
        assert_eq!(
            trace.last().map(|t| t.disposition),
            Some(GateDisposition::Passed)
        );
    }

    #[tokio::test]
    async fn unverifiable_answer_abstains() {
        let model = ScriptedChatModel::new(vec!["yes", "round-robin order"]);
        let context = bundle(&["the scheduler runs tasks in priority order"]);
        let (result, _) = resolve_answer(
            &model,
            "What order does the scheduler run tasks in?",
            &context,
            &settings(),
        )
        .await;

        assert_eq!(
            result,
            AnswerResult::Abstain {
                reason: AbstainReason::SpanNotVerified
            }
        );
    }

    #[tokio::test]
    async fn sentinel_reply_abstains_even_with_enforcement_disabled() {
        let model = ScriptedChatModel::new(vec!["yes", "I don't know"]);
        let context = bundle(&["the scheduler runs tasks in priority order"]);
        let mut settings = settings();
        settings.enforce_span_enabled = false;

        let (result, _) = resolve_answer(
            &model,
            "What order does the scheduler run tasks in?",
            &context,
            &settings,
        )
        .await;

        assert_eq!(
            result,
            AnswerResult::Abstain {
                reason: AbstainReason::SpanNotVerified
            }
        );
    }

    #[tokio::test]
    async fn span_matching_ignores_case_and_whitespace() {
        let model = ScriptedChatModel::new(vec!["yes", "Priority   ORDER"]);
        let context = bundle(&["the scheduler runs tasks in priority order"]);
        let (result, _) = resolve_answer(
            &model,
            "What order does the scheduler run tasks in?",
            &context,
            &settings(),
        )
        .await;

        assert_eq!(
            result,
            AnswerResult::Answer {
                text: "Priority ORDER".to_owned()
            }
        );
    }

    #[tokio::test]
    async fn disabled_gates_are_traced_as_skipped() {
        let model = ScriptedChatModel::new(vec!["whatever the model says"]);
        let context = bundle(&["whatever the model says is in here"]);
        let settings = GateSettings {
            rule_extract_enabled: false,
            precheck_enabled: false,
            classify_enabled: false,
            enforce_span_enabled: true,
            precheck_min_overlap: 0.10,
            service_timeout_ms: 1000,
        };

        let (result, trace) = resolve_answer(&model, "question?", &context, &settings).await;

        assert!(matches!(result, AnswerResult::Answer { .. }));
        let skipped = trace
            .iter()
            .filter(|t| t.disposition == GateDisposition::Skipped)
            .count();
        assert_eq!(skipped, 3);
    }
}
