//! Self-grounding loop and citation guardrail.

use lumina_core::audit::RecordingAuditSink;
use lumina_core::config::GroundingConfig;
use lumina_core::error::{LuminaError, Result};
use lumina_core::grounding::{
    validate_citations, CitationError, GroundingOutcome, SelfGroundingLoop, ESCALATE_MESSAGE,
    EXHAUSTED_MESSAGE, NO_EVIDENCE_MESSAGE,
};
use lumina_core::guardrails::{GroundingDecision, GATE_GROUNDING_DECISION};
use lumina_core::llm::{FakeLanguageModel, PromptMessage};
use lumina_core::observer::{Observer, TurnIds};
use lumina_core::prompts::{CRITIC_SYSTEM, INSUFFICIENT_EVIDENCE};
use lumina_core::retrieval::{EvidenceItem, EvidenceRetriever, FusedResult, SearchFilter};
use lumina_core::telemetry::RecordingTelemetry;
use std::sync::Arc;

struct Docs(Vec<EvidenceItem>);

impl EvidenceRetriever for Docs {
    fn retrieve(
        &self,
        _query: &str,
        n: usize,
        _filter: Option<&SearchFilter>,
    ) -> Result<Vec<FusedResult>> {
        Ok(self
            .0
            .iter()
            .take(n)
            .enumerate()
            .map(|(rank, item)| FusedResult {
                item: item.clone(),
                fused_score: 1.0 / (rank as f64 + 1.0),
                semantic_rank: Some(rank),
                lexical_rank: None,
            })
            .collect())
    }
}

struct Offline;

impl EvidenceRetriever for Offline {
    fn retrieve(&self, _: &str, _: usize, _: Option<&SearchFilter>) -> Result<Vec<FusedResult>> {
        Err(LuminaError::Retrieval("vector store offline".to_string()))
    }
}

fn docs() -> Arc<Docs> {
    Arc::new(Docs(vec![
        EvidenceItem::new("d1", "Block mode rejects malicious requests.").with_source("modes.md", "Block"),
        EvidenceItem::new("d2", "Detect mode only logs attacks.").with_source("modes.md", "Detect"),
    ]))
}

fn is_critic(messages: &[PromptMessage]) -> bool {
    messages.first().map(|m| m.content == CRITIC_SYSTEM).unwrap_or(false)
}

/// Drafter returns `draft`, critic returns `verdict`
fn scripted(draft: &'static str, verdict: &'static str) -> Arc<FakeLanguageModel> {
    Arc::new(FakeLanguageModel::from_fn(move |messages| {
        let reply = if is_critic(messages) { verdict } else { draft };
        Ok(reply.to_string())
    }))
}

fn config(max_attempts: u32) -> GroundingConfig {
    GroundingConfig {
        max_attempts,
        ..GroundingConfig::default()
    }
}

// =============================================================================
// Citation validation
// =============================================================================

#[test]
fn test_citation_cases() {
    assert_eq!(validate_citations("Use block mode [1].", 2, 1), Ok(()));
    assert_eq!(validate_citations("Both [1] and [2].", 2, 2), Ok(()));
    assert_eq!(
        validate_citations("Use block mode.", 2, 1),
        Err(CitationError::MissingCitations)
    );
    assert_eq!(
        validate_citations("Use block mode [3].", 2, 1),
        Err(CitationError::OutOfRange(3))
    );
    assert_eq!(
        validate_citations("Use block mode [0].", 2, 1),
        Err(CitationError::OutOfRange(0))
    );
    assert_eq!(
        validate_citations("Use block mode [1].", 0, 1),
        Err(CitationError::NoEvidence)
    );
}

// =============================================================================
// Loop outcomes
// =============================================================================

#[test]
fn test_cited_final_is_grounded() {
    let model = scripted("Block mode rejects malicious requests [1].", "FINAL: supported");
    let grounding = SelfGroundingLoop::new(docs(), model, config(3), Observer::noop());

    let answer = grounding.run("What does block mode do?", None, &TurnIds::default());
    assert!(answer.grounded());
    assert_eq!(answer.text, "Block mode rejects malicious requests [1].");
    assert_eq!(answer.trace.outcome, Some(GroundingOutcome::Final));
    assert_eq!(answer.trace.attempts.len(), 1);
    assert!(answer.trace.attempts[0].citations_valid);
}

#[test]
fn test_uncited_final_exhausts_single_attempt() {
    let model = scripted("Block mode rejects malicious requests.", "FINAL: looks fine");
    let grounding = SelfGroundingLoop::new(docs(), model, config(1), Observer::noop());

    let answer = grounding.run("What does block mode do?", None, &TurnIds::default());
    assert!(!answer.grounded());
    assert_eq!(answer.text, EXHAUSTED_MESSAGE);
    assert_eq!(answer.trace.outcome, Some(GroundingOutcome::Exhausted));

    let attempt = &answer.trace.attempts[0];
    assert_eq!(attempt.decision, GroundingDecision::Retry);
    assert_eq!(attempt.reason, "citation_guardrail:missing_citations");
}

#[test]
fn test_zero_evidence_is_not_grounded() {
    let model = Arc::new(FakeLanguageModel::always("FINAL: fine"));
    let grounding = SelfGroundingLoop::new(
        Arc::new(Docs(Vec::new())),
        model.clone(),
        config(3),
        Observer::noop(),
    );

    let answer = grounding.run("What is the meaning of life?", None, &TurnIds::default());
    assert!(!answer.grounded());
    assert_eq!(answer.text, NO_EVIDENCE_MESSAGE);
    assert_eq!(answer.trace.attempts.len(), 1);
    assert_eq!(answer.trace.attempts[0].reason, "no_grounded_evidence");
    assert_eq!(model.call_count(), 0);
}

#[test]
fn test_retrieval_failure_escalates() {
    let model = Arc::new(FakeLanguageModel::always("unused"));
    let grounding = SelfGroundingLoop::new(Arc::new(Offline), model, config(3), Observer::noop());

    let answer = grounding.run("How do I install?", None, &TurnIds::default());
    assert_eq!(answer.text, ESCALATE_MESSAGE);
    assert!(answer.trace.attempts[0]
        .reason
        .starts_with("retrieval_error:"));
}

#[test]
fn test_retry_widens_retrieval() {
    let model = scripted(INSUFFICIENT_EVIDENCE, "FINAL: unused");
    let grounding = SelfGroundingLoop::new(docs(), model, config(3), Observer::noop());

    let answer = grounding.run("Obscure question", None, &TurnIds::default());
    assert_eq!(answer.text, EXHAUSTED_MESSAGE);
    let sizes: Vec<usize> = answer.trace.attempts.iter().map(|a| a.n).collect();
    assert_eq!(sizes, vec![5, 7, 9]);
    assert!(answer
        .trace
        .attempts
        .iter()
        .all(|a| a.reason == "insufficient_evidence"));
}

#[test]
fn test_every_attempt_is_audited_and_counted() {
    let audit = Arc::new(RecordingAuditSink::new());
    let telemetry = Arc::new(RecordingTelemetry::new());
    let observer = Observer::new(audit.clone(), telemetry.clone());
    let model = Arc::new(FakeLanguageModel::replies(&[
        "Detect mode logs attacks.",
        "RETRY: add a citation",
        "Detect mode only logs attacks [2].",
        "FINAL: supported",
    ]));
    let grounding = SelfGroundingLoop::new(docs(), model, config(3), observer);

    let answer = grounding.run("What does detect mode do?", None, &TurnIds::default());
    assert!(answer.grounded());
    assert_eq!(
        audit.labels_for(GATE_GROUNDING_DECISION),
        vec!["RETRY:add a citation", "FINAL:supported"]
    );
    assert_eq!(telemetry.grounding_decisions(), vec!["RETRY", "FINAL"]);
    assert_eq!(telemetry.events().len(), 2);
}
