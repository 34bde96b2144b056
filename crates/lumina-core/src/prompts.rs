//! Prompt templates for routing, drafting and critique.

use crate::guardrails::{sanitize_retrieved_text, Route};
use crate::llm::PromptMessage;
use crate::retrieval::EvidenceItem;

/// Drafter output when the evidence cannot support an answer
pub const INSUFFICIENT_EVIDENCE: &str = "INSUFFICIENT_EVIDENCE";

pub const ROUTER_SYSTEM: &str = "You are Lumina, the AI security assistant for SafeLine WAF. \
Route the engineer's request to the right specialist:
- monitor: traffic monitoring, QPS, request stats
- log_analyst: reviewing attack events, identifying threats
- config_manager: changing WAF settings, protection modes, IP blacklist
- threat_intel: CVE lookup, threat analysis, attack correlation
- tuner: false positive handling, rule tuning, whitelist exceptions
- reporter: incident reports and summaries
- rag_agent: \"how do I...\" questions answered from documentation
- direct: greetings and general questions";

pub const DRAFTER_SYSTEM: &str = "You are Lumina's documentation expert for SafeLine WAF. \
Answer ONLY from the numbered evidence provided. Cite every claim with its evidence \
number in square brackets, e.g. [1] or [2]. Never cite a number that is not listed. \
If the evidence does not answer the question, reply with exactly INSUFFICIENT_EVIDENCE.";

pub const CRITIC_SYSTEM: &str = "You review draft answers for grounding. \
Reply with exactly one line: TOKEN: reason. TOKEN is one of \
FINAL (grounded in the evidence and correctly cited), \
RETRY (fixable with more or different evidence), \
CLARIFY (the question is ambiguous and needs the user's input), \
ESCALATE (cannot be answered safely).";

/// Routing prompt for one user message
pub fn router_messages(message: &str) -> Vec<PromptMessage> {
    let options: Vec<&str> = Route::ALL.iter().map(Route::as_str).collect();
    vec![
        PromptMessage::system(ROUTER_SYSTEM),
        PromptMessage::user(message),
        PromptMessage::user(format!(
            "Respond with ONLY the specialist name. Options: {}.",
            options.join(", ")
        )),
    ]
}

/// Numbered evidence blocks in rank order, texts sanitized and bounded
pub fn format_evidence_block(evidence: &[EvidenceItem], max_chars: usize) -> String {
    evidence
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let source = if item.source.is_empty() { "unknown" } else { &item.source };
            format!(
                "[{}] source={} section={}\n{}",
                i + 1,
                source,
                item.section,
                sanitize_retrieved_text(&item.text, max_chars)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Drafting prompt. `feedback` is the previous attempt's reason on retries.
pub fn drafter_messages(
    question: &str,
    evidence_block: &str,
    feedback: Option<&str>,
) -> Vec<PromptMessage> {
    let mut user = format!("Question: {}\n\nEvidence:\n{}", question, evidence_block);
    if let Some(feedback) = feedback {
        user.push_str(&format!(
            "\n\nYour previous answer was rejected ({}). Fix it using only the evidence above.",
            feedback
        ));
    }
    vec![PromptMessage::system(DRAFTER_SYSTEM), PromptMessage::user(user)]
}

pub fn critic_messages(question: &str, draft: &str, evidence_count: usize) -> Vec<PromptMessage> {
    vec![
        PromptMessage::system(CRITIC_SYSTEM),
        PromptMessage::user(format!(
            "Question: {}\n\nEvidence items available: {}\n\nDraft answer:\n{}",
            question, evidence_count, draft
        )),
    ]
}
