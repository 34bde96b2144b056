//! RETRIEVE -> DRAFT -> CRITIQUE -> {FINAL | RETRY | CLARIFY | ESCALATE}

use super::{
    validate_citations, GroundedAnswer, GroundingAttempt, GroundingOutcome, GroundingTrace,
    CLARIFY_MESSAGE, ESCALATE_MESSAGE, EXHAUSTED_MESSAGE, NO_EVIDENCE_MESSAGE,
    REASON_INSUFFICIENT_EVIDENCE, REASON_NO_EVIDENCE,
};
use crate::config::GroundingConfig;
use crate::guardrails::{parse_grounding_decision, GroundingDecision, GATE_GROUNDING_DECISION};
use crate::llm::LanguageModel;
use crate::observer::{Observer, TurnIds};
use crate::prompts::{critic_messages, drafter_messages, format_evidence_block, INSUFFICIENT_EVIDENCE};
use crate::retrieval::{EvidenceItem, EvidenceRetriever, SearchFilter};
use crate::telemetry::EVENT_GROUNDING_ATTEMPT;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

/// Evidence gathered for one attempt
struct AttemptContext {
    attempt: u32,
    n: usize,
    evidence: Vec<EvidenceItem>,
}

enum LoopState {
    Retrieve {
        attempt: u32,
        feedback: Option<String>,
    },
    Draft {
        ctx: AttemptContext,
        feedback: Option<String>,
    },
    Critique {
        ctx: AttemptContext,
        draft: String,
    },
    Decide {
        ctx: AttemptContext,
        decision: GroundingDecision,
        reason: String,
        citations_valid: bool,
        draft: Option<String>,
    },
    Done {
        outcome: GroundingOutcome,
        text: String,
    },
}

pub struct SelfGroundingLoop {
    retriever: Arc<dyn EvidenceRetriever>,
    model: Arc<dyn LanguageModel>,
    config: GroundingConfig,
    observer: Observer,
}

impl SelfGroundingLoop {
    pub fn new(
        retriever: Arc<dyn EvidenceRetriever>,
        model: Arc<dyn LanguageModel>,
        config: GroundingConfig,
        observer: Observer,
    ) -> Self {
        Self {
            retriever,
            model,
            config,
            observer,
        }
    }

    fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Run the loop to a terminal state. Never fails: every error path
    /// terminates in an ungrounded canned message.
    pub fn run(&self, question: &str, filter: Option<&SearchFilter>, ids: &TurnIds) -> GroundedAnswer {
        let mut trace = GroundingTrace::default();
        let mut state = LoopState::Retrieve {
            attempt: 1,
            feedback: None,
        };

        loop {
            state = match state {
                LoopState::Retrieve { attempt, feedback } => {
                    self.retrieve(question, filter, attempt, feedback)
                }
                LoopState::Draft { ctx, feedback } => self.draft(question, ctx, feedback.as_deref()),
                LoopState::Critique { ctx, draft } => self.critique(question, ctx, draft),
                LoopState::Decide {
                    ctx,
                    decision,
                    reason,
                    citations_valid,
                    draft,
                } => {
                    let record = GroundingAttempt {
                        attempt: ctx.attempt,
                        decision,
                        reason,
                        citations_valid,
                        evidence_count: ctx.evidence.len(),
                        n: ctx.n,
                    };
                    self.report(ids, &record);
                    let next = self.transition(&record, draft);
                    trace.attempts.push(record);
                    next
                }
                LoopState::Done { outcome, text } => {
                    trace.grounded = outcome == GroundingOutcome::Final;
                    trace.outcome = Some(outcome);
                    info!(
                        outcome = outcome.as_str(),
                        attempts = trace.attempts.len(),
                        "Grounding loop finished"
                    );
                    return GroundedAnswer { text, trace };
                }
            };
        }
    }

    fn retrieve(
        &self,
        question: &str,
        filter: Option<&SearchFilter>,
        attempt: u32,
        feedback: Option<String>,
    ) -> LoopState {
        let n = self.config.n_for_attempt(attempt);
        let escalate = |reason: String| LoopState::Decide {
            ctx: AttemptContext {
                attempt,
                n,
                evidence: Vec::new(),
            },
            decision: GroundingDecision::Escalate,
            reason,
            citations_valid: false,
            draft: None,
        };

        match self.retriever.retrieve(question, n, filter) {
            Err(e) => escalate(format!("retrieval_error:{}", e)),
            Ok(results) if results.is_empty() => escalate(REASON_NO_EVIDENCE.to_string()),
            Ok(results) => {
                debug!(attempt, n, evidence = results.len(), "Retrieved evidence");
                LoopState::Draft {
                    ctx: AttemptContext {
                        attempt,
                        n,
                        evidence: results.into_iter().map(|r| r.item).collect(),
                    },
                    feedback,
                }
            }
        }
    }

    fn draft(&self, question: &str, ctx: AttemptContext, feedback: Option<&str>) -> LoopState {
        let block = format_evidence_block(&ctx.evidence, self.config.evidence_max_chars);
        match self
            .model
            .invoke(&drafter_messages(question, &block, feedback), 0.0)
        {
            Err(e) => LoopState::Decide {
                ctx,
                decision: GroundingDecision::Escalate,
                reason: format!("llm_error:{}", e),
                citations_valid: false,
                draft: None,
            },
            Ok(draft) if draft.contains(INSUFFICIENT_EVIDENCE) => LoopState::Decide {
                ctx,
                decision: GroundingDecision::Retry,
                reason: REASON_INSUFFICIENT_EVIDENCE.to_string(),
                citations_valid: false,
                draft: None,
            },
            Ok(draft) => LoopState::Critique { ctx, draft },
        }
    }

    fn critique(&self, question: &str, ctx: AttemptContext, draft: String) -> LoopState {
        let evidence_count = ctx.evidence.len();
        let raw = match self
            .model
            .invoke(&critic_messages(question, &draft, evidence_count), 0.0)
        {
            Ok(raw) => raw,
            Err(e) => {
                return LoopState::Decide {
                    ctx,
                    decision: GroundingDecision::Escalate,
                    reason: format!("llm_error:{}", e),
                    citations_valid: false,
                    draft: None,
                }
            }
        };

        let (mut decision, mut reason) = parse_grounding_decision(&raw);
        let check = validate_citations(&draft, evidence_count, self.config.min_citations);
        if decision == GroundingDecision::Final {
            if let Err(cause) = check {
                decision = GroundingDecision::Retry;
                reason = format!("citation_guardrail:{}", cause);
            }
        }

        LoopState::Decide {
            ctx,
            decision,
            reason,
            citations_valid: check.is_ok(),
            draft: Some(draft),
        }
    }

    fn transition(&self, record: &GroundingAttempt, draft: Option<String>) -> LoopState {
        match record.decision {
            GroundingDecision::Final => LoopState::Done {
                outcome: GroundingOutcome::Final,
                text: draft.unwrap_or_default(),
            },
            GroundingDecision::Retry if record.attempt < self.max_attempts() => LoopState::Retrieve {
                attempt: record.attempt + 1,
                feedback: Some(record.reason.clone()),
            },
            GroundingDecision::Retry => LoopState::Done {
                outcome: GroundingOutcome::Exhausted,
                text: EXHAUSTED_MESSAGE.to_string(),
            },
            GroundingDecision::Clarify => LoopState::Done {
                outcome: GroundingOutcome::Clarify,
                text: CLARIFY_MESSAGE.to_string(),
            },
            GroundingDecision::Escalate if record.reason == REASON_NO_EVIDENCE => LoopState::Done {
                outcome: GroundingOutcome::Escalate,
                text: NO_EVIDENCE_MESSAGE.to_string(),
            },
            GroundingDecision::Escalate => LoopState::Done {
                outcome: GroundingOutcome::Escalate,
                text: ESCALATE_MESSAGE.to_string(),
            },
        }
    }

    fn report(&self, ids: &TurnIds, record: &GroundingAttempt) {
        info!(
            attempt = record.attempt,
            decision = record.decision.as_str(),
            reason = %record.reason,
            evidence = record.evidence_count,
            n = record.n,
            "Grounding attempt decided"
        );
        let metadata = json!({
            "attempt": record.attempt,
            "n": record.n,
            "evidence_count": record.evidence_count,
            "citations_valid": record.citations_valid,
        });
        self.observer.record_gate(
            ids,
            GATE_GROUNDING_DECISION,
            record.decision.as_str(),
            &record.reason,
            metadata.clone(),
        );
        self.observer
            .telemetry()
            .observe_grounding_decision(record.decision.as_str(), &record.reason);

        let mut event = metadata;
        event["decision"] = json!(record.decision.as_str());
        event["reason"] = json!(record.reason);
        self.observer.emit(ids, EVENT_GROUNDING_ATTEMPT, event);
    }
}
