//! Self-grounding answer loop.
//!
//! A documentation answer is only returned verbatim when a critic accepted it
//! and every citation marker points at retrieved evidence. Anything else
//! yields a canned, ungrounded message.

pub mod citations;
pub mod machine;

pub use citations::{extract_citations, validate_citations, CitationError};
pub use machine::SelfGroundingLoop;

use crate::guardrails::GroundingDecision;
use serde::{Deserialize, Serialize};

/// Reason recorded when retrieval returns nothing
pub const REASON_NO_EVIDENCE: &str = "no_grounded_evidence";
/// Reason recorded when the drafter emits the insufficiency sentinel
pub const REASON_INSUFFICIENT_EVIDENCE: &str = "insufficient_evidence";

pub const EXHAUSTED_MESSAGE: &str =
    "I could not produce a verifiable answer grounded in the documentation.";
pub const NO_EVIDENCE_MESSAGE: &str =
    "I found no grounded evidence in the documentation for this question, so I cannot answer it reliably.";
pub const CLARIFY_MESSAGE: &str =
    "Could you clarify your question? Which feature, setting or page of the documentation do you mean?";
pub const ESCALATE_MESSAGE: &str =
    "I cannot answer this safely from the documentation. Please consult the SafeLine documentation or an administrator.";

/// One RETRIEVE/DRAFT/CRITIQUE round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingAttempt {
    /// 1-based
    pub attempt: u32,
    pub decision: GroundingDecision,
    pub reason: String,
    pub citations_valid: bool,
    pub evidence_count: usize,
    /// Retrieval size requested
    pub n: usize,
}

/// How the loop terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundingOutcome {
    Final,
    Clarify,
    Escalate,
    /// Retry budget used up
    Exhausted,
}

impl GroundingOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroundingOutcome::Final => "final",
            GroundingOutcome::Clarify => "clarify",
            GroundingOutcome::Escalate => "escalate",
            GroundingOutcome::Exhausted => "exhausted",
        }
    }
}

/// Ordered record of every attempt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingTrace {
    pub attempts: Vec<GroundingAttempt>,
    pub grounded: bool,
    pub outcome: Option<GroundingOutcome>,
}

impl GroundingTrace {
    pub fn last(&self) -> Option<&GroundingAttempt> {
        self.attempts.last()
    }
}

/// Loop result: user-facing text plus the trace that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroundedAnswer {
    pub text: String,
    pub trace: GroundingTrace,
}

impl GroundedAnswer {
    pub fn grounded(&self) -> bool {
        self.trace.grounded
    }
}
