//! Deterministic configuration intent inference from chat text.

use crate::validators::{normalize_mode, sanitize_comment, validate_ip_or_cidr, WafMode};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::net::Ipv6Addr;
use std::sync::OnceLock;

const BLOCK_WORDS: &[&str] = &["block", "ban", "blacklist", "deny"];
const MODE_WORDS: &[&str] = &["mode", "protection", "waf"];
const BLOCK_MODE_PHRASES: &[&str] = &["block mode", "blocking mode", "set block", "enable block"];
const DETECT_MODE_PHRASES: &[&str] = &["detect mode", "detection mode", "monitor mode", "default mode"];
const OFF_MODE_PHRASES: &[&str] = &["off mode", "disable mode", "turn off", "disable waf"];

fn ipv4_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\d{1,3}(?:\.\d{1,3}){3}(?:/\d{1,3})?").expect("ipv4 pattern is valid")
    })
}

fn confirm_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\bconfirm\s+(\d{6})\b").expect("confirm pattern is valid"))
}

/// What the user asked for, with parameters as written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ConfigIntent {
    SetMode { mode: String },
    BlacklistIp { ip: String, comment: String },
    None,
}

/// Validated, canonical action ready to be confirmed and executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ConfigAction {
    SetMode { mode: WafMode },
    BlacklistIp { ip: String, comment: String },
}

/// Why an intent could not become an action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentRejection {
    InvalidIp(String),
    InvalidMode(String),
    NoAction,
}

impl IntentRejection {
    /// Audit reason
    pub fn reason(&self) -> &'static str {
        match self {
            IntentRejection::InvalidIp(_) => "invalid_ip",
            IntentRejection::InvalidMode(_) => "invalid_mode",
            IntentRejection::NoAction => "no_action",
        }
    }
}

impl ConfigIntent {
    pub fn is_actionable(&self) -> bool {
        !matches!(self, ConfigIntent::None)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ConfigIntent::SetMode { .. } => "set_mode",
            ConfigIntent::BlacklistIp { .. } => "blacklist_ip",
            ConfigIntent::None => "none",
        }
    }

    /// Normalize parameters: mode aliases resolved, IP canonicalized,
    /// comment sanitized.
    pub fn validate(&self, comment_max_len: usize) -> Result<ConfigAction, IntentRejection> {
        match self {
            ConfigIntent::SetMode { mode } => normalize_mode(mode)
                .map(|mode| ConfigAction::SetMode { mode })
                .ok_or_else(|| IntentRejection::InvalidMode(mode.clone())),
            ConfigIntent::BlacklistIp { ip, comment } => validate_ip_or_cidr(ip)
                .map(|ip| ConfigAction::BlacklistIp {
                    ip,
                    comment: sanitize_comment(comment, comment_max_len),
                })
                .ok_or_else(|| IntentRejection::InvalidIp(ip.clone())),
            ConfigIntent::None => Err(IntentRejection::NoAction),
        }
    }
}

impl ConfigAction {
    pub fn kind(&self) -> &'static str {
        match self {
            ConfigAction::SetMode { .. } => "set_mode",
            ConfigAction::BlacklistIp { .. } => "blacklist_ip",
        }
    }

    /// Human-readable description shown in confirmation prompts
    pub fn preview(&self) -> String {
        match self {
            ConfigAction::SetMode { mode } => format!("set protection mode to {}", mode),
            ConfigAction::BlacklistIp { ip, .. } => format!("add IP {} to blacklist", ip),
        }
    }

    /// Parameters still present and well-formed
    pub fn has_valid_parameters(&self) -> bool {
        match self {
            ConfigAction::SetMode { .. } => true,
            ConfigAction::BlacklistIp { ip, .. } => validate_ip_or_cidr(ip).is_some(),
        }
    }
}

fn find_ipv6_token(norm: &str) -> Option<String> {
    norm.split_whitespace()
        .map(|t| t.trim_matches(|c: char| matches!(c, ',' | ';' | '!' | '?' | '\'' | '"')))
        .find(|token| {
            let addr = token.split_once('/').map(|(a, _)| a).unwrap_or(token);
            addr.contains(':') && addr.parse::<Ipv6Addr>().is_ok()
        })
        .map(str::to_string)
}

/// Infer a configuration intent. IP blacklisting wins over mode changes.
pub fn infer_intent(text: &str, blacklist_comment: &str) -> ConfigIntent {
    let norm = text.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ");

    if BLOCK_WORDS.iter().any(|w| norm.contains(w)) {
        let ip = ipv4_pattern()
            .find(&norm)
            .map(|m| m.as_str().to_string())
            .or_else(|| find_ipv6_token(&norm));
        if let Some(ip) = ip {
            return ConfigIntent::BlacklistIp {
                ip,
                comment: blacklist_comment.to_string(),
            };
        }
    }

    if MODE_WORDS.iter().any(|w| norm.contains(w)) {
        let phrased = |phrases: &[&str]| phrases.iter().any(|p| norm.contains(p));
        let mode = if phrased(BLOCK_MODE_PHRASES) {
            Some(WafMode::Block)
        } else if phrased(DETECT_MODE_PHRASES) {
            Some(WafMode::Detect)
        } else if phrased(OFF_MODE_PHRASES) {
            Some(WafMode::Off)
        } else {
            None
        };
        if let Some(mode) = mode {
            return ConfigIntent::SetMode {
                mode: mode.as_str().to_string(),
            };
        }
    }

    ConfigIntent::None
}

/// The 6-digit code from `confirm NNNNNN`, case-insensitive
pub fn extract_confirmation_nonce(text: &str) -> Option<String> {
    confirm_pattern()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn is_cancel(text: &str) -> bool {
    text.to_lowercase().contains("cancel")
}
