//! Deterministic guardrails around untrusted model and tool output.
//!
//! Everything here is a total function: free text is classified into a
//! closed vocabulary with an explicit fallback, never a partial match.

use crate::retrieval::EvidenceItem;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

/// Gate names reported to the audit log and telemetry
pub const GATE_ROUTE_PARSE: &str = "route_parse";
pub const GATE_ACTION_CONFIRMATION: &str = "action_confirmation";
pub const GATE_ACTION_VALIDATION: &str = "action_validation";
pub const GATE_TOOL_RESULT: &str = "tool_result";
pub const GATE_GROUNDING_DECISION: &str = "grounding_decision";

/// Maximum characters of a retrieved chunk shown to the model
pub const DEFAULT_RETRIEVED_TEXT_MAX_CHARS: usize = 1500;

// ============================================================================
// Routing
// ============================================================================

/// Specialist a user turn can be routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Monitor,
    LogAnalyst,
    ConfigManager,
    ThreatIntel,
    Tuner,
    Reporter,
    RagAgent,
    /// Fallback for anything outside the vocabulary
    Direct,
}

impl Route {
    pub const ALL: [Route; 8] = [
        Route::Monitor,
        Route::LogAnalyst,
        Route::ConfigManager,
        Route::ThreatIntel,
        Route::Tuner,
        Route::Reporter,
        Route::RagAgent,
        Route::Direct,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Monitor => "monitor",
            Route::LogAnalyst => "log_analyst",
            Route::ConfigManager => "config_manager",
            Route::ThreatIntel => "threat_intel",
            Route::Tuner => "tuner",
            Route::Reporter => "reporter",
            Route::RagAgent => "rag_agent",
            Route::Direct => "direct",
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of parsing a routing response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteParse {
    pub route: Route,
    /// False when the raw output was outside the vocabulary
    pub valid: bool,
}

/// Parse a routing response. Exact token match only: "monitor and then
/// config_manager" is not a route, it falls back to `Direct`.
pub fn parse_route(raw: &str) -> RouteParse {
    let token = raw.trim().to_lowercase();
    match Route::ALL.iter().find(|r| r.as_str() == token) {
        Some(route) => RouteParse { route: *route, valid: true },
        None => RouteParse { route: Route::Direct, valid: false },
    }
}

// ============================================================================
// Critic decisions
// ============================================================================

/// Decision emitted by the grounding critic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroundingDecision {
    Final,
    Retry,
    Clarify,
    Escalate,
}

impl GroundingDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroundingDecision::Final => "FINAL",
            GroundingDecision::Retry => "RETRY",
            GroundingDecision::Clarify => "CLARIFY",
            GroundingDecision::Escalate => "ESCALATE",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "FINAL" => Some(GroundingDecision::Final),
            "RETRY" => Some(GroundingDecision::Retry),
            "CLARIFY" => Some(GroundingDecision::Clarify),
            "ESCALATE" => Some(GroundingDecision::Escalate),
            _ => None,
        }
    }
}

impl std::fmt::Display for GroundingDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parse critic output of the form `TOKEN: reason`.
///
/// Empty output escalates with `empty_critic_response`; an unknown token
/// escalates with `invalid_decision_token`.
pub fn parse_grounding_decision(raw: &str) -> (GroundingDecision, String) {
    let text = raw.trim();
    if text.is_empty() {
        return (GroundingDecision::Escalate, "empty_critic_response".to_string());
    }

    let (head, reason) = match text.split_once(':') {
        Some((head, tail)) => (head, tail.trim().to_string()),
        None => (text, String::new()),
    };

    match GroundingDecision::from_token(&head.trim().to_uppercase()) {
        Some(decision) => (decision, reason),
        None => (GroundingDecision::Escalate, "invalid_decision_token".to_string()),
    }
}

// ============================================================================
// Tool results
// ============================================================================

/// Parsed outcome of a control-plane call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ToolOutcome {
    Ok,
    Failed(String),
}

impl ToolOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, ToolOutcome::Ok)
    }
}

/// Classify a tool payload as ok or failed.
///
/// Ok means: a JSON object, no truthy `error` field, and a `status` that is
/// absent, `ok` or `success`.
pub fn parse_tool_result(payload: &Value) -> ToolOutcome {
    let Some(obj) = payload.as_object() else {
        return ToolOutcome::Failed("tool response was not an object".to_string());
    };

    if let Some(error) = obj.get("error").filter(|e| is_truthy(e)) {
        let reason = match error {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return ToolOutcome::Failed(reason);
    }

    let status = match obj.get("status") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.trim().to_lowercase(),
        Some(other) => other.to_string().to_lowercase(),
    };
    if !status.is_empty() && status != "ok" && status != "success" {
        return ToolOutcome::Failed(format!("unexpected status: {}", status));
    }

    ToolOutcome::Ok
}

/// Same as [`parse_tool_result`] for a raw string payload.
pub fn parse_tool_result_str(raw: &str) -> ToolOutcome {
    match serde_json::from_str::<Value>(raw) {
        Ok(payload) => parse_tool_result(&payload),
        Err(_) => ToolOutcome::Failed("tool response was not valid JSON".to_string()),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

// ============================================================================
// Retrieved content
// ============================================================================

fn suspicious_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)ignore\s+previous\s+instructions",
            r"(?i)^\s*(system|developer|assistant|tool)\s*:",
            r"(?i)you\s+are\s+chatgpt",
            r"(?i)\bact\s+as\b",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Drop instruction-like lines from retrieved documentation and bound length.
///
/// Retrieved chunks are untrusted: a document saying "ignore previous
/// instructions" must never reach the drafting prompt verbatim.
pub fn sanitize_retrieved_text(text: &str, max_chars: usize) -> String {
    let patterns = suspicious_patterns();
    let kept: Vec<&str> = text
        .lines()
        .filter(|line| !patterns.iter().any(|p| p.is_match(line)))
        .collect();
    let clean = kept.join("\n");
    let clean = clean.trim();

    if clean.chars().count() <= max_chars {
        return clean.to_string();
    }
    let truncated: String = clean.chars().take(max_chars).collect();
    truncated.trim_end().to_string()
}

/// Parse a JSON retrieval payload (as produced by a search tool) into evidence.
///
/// Errors are reasons, not panics: `invalid_json`, `retrieval_error:<detail>`,
/// `invalid_payload_type`. Non-object list entries are skipped.
pub fn parse_evidence_payload(raw: &str) -> Result<Vec<EvidenceItem>, String> {
    let payload: Value = serde_json::from_str(raw).map_err(|_| "invalid_json".to_string())?;

    if let Some(error) = payload.get("error").filter(|e| is_truthy(e)) {
        let detail = match error {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Err(format!("retrieval_error:{}", detail));
    }

    let Value::Array(items) = payload else {
        return Err("invalid_payload_type".to_string());
    };

    Ok(items
        .iter()
        .filter_map(|item| item.as_object().map(EvidenceItem::from_json_object))
        .collect())
}
