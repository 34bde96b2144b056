//! Lumina Configuration
//!
//! Configuration lives in /etc/lumina/config.toml. Every field has a default,
//! so a missing file or a partial file is always usable.
//!
//! Environment overrides (applied after the file):
//! - LUMINA_LOG_LEVEL
//! - LUMINA_AUDIT_ENABLED, LUMINA_AUDIT_PATH
//! - LUMINA_TRACE_PATH, LUMINA_METRICS_NAMESPACE
//! - LUMINA_GROUNDING_MAX_ATTEMPTS

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// System configuration directory
pub const SYSTEM_CONFIG_DIR: &str = "/etc/lumina";
const CONFIG_FILE: &str = "config.toml";

/// Lumina data directory (audit log, trace events)
pub const DATA_DIR: &str = "/var/lib/lumina";

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error). RUST_LOG wins when set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Hybrid retrieval settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// RRF smoothing constant
    #[serde(default = "default_rrf_k")]
    pub rrf_k: u32,

    /// Weight of the semantic (vector) list in fusion
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,

    /// Weight of the lexical (BM25) list in fusion
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f64,

    /// BM25 term-frequency saturation
    #[serde(default = "default_bm25_k1")]
    pub bm25_k1: f64,

    /// BM25 length normalization
    #[serde(default = "default_bm25_b")]
    pub bm25_b: f64,

    /// Floor for negative IDF, as a fraction of mean IDF
    #[serde(default = "default_bm25_epsilon")]
    pub bm25_epsilon: f64,
}

fn default_rrf_k() -> u32 {
    60
}

fn default_semantic_weight() -> f64 {
    0.6
}

fn default_lexical_weight() -> f64 {
    0.4
}

fn default_bm25_k1() -> f64 {
    1.5
}

fn default_bm25_b() -> f64 {
    0.75
}

fn default_bm25_epsilon() -> f64 {
    0.25
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
            semantic_weight: default_semantic_weight(),
            lexical_weight: default_lexical_weight(),
            bm25_k1: default_bm25_k1(),
            bm25_b: default_bm25_b(),
            bm25_epsilon: default_bm25_epsilon(),
        }
    }
}

/// Self-grounding loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundingConfig {
    /// Maximum RETRIEVE/DRAFT/CRITIQUE rounds (valid: >= 1)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Evidence requested on the first attempt
    #[serde(default = "default_initial_n")]
    pub initial_n: usize,

    /// Extra evidence requested per retry
    #[serde(default = "default_n_step")]
    pub n_step: usize,

    /// Upper bound on evidence per attempt
    #[serde(default = "default_max_n")]
    pub max_n: usize,

    /// Distinct citation markers required in a final answer
    #[serde(default = "default_min_citations")]
    pub min_citations: usize,

    /// Per-chunk character bound in the drafting prompt
    #[serde(default = "default_evidence_max_chars")]
    pub evidence_max_chars: usize,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_n() -> usize {
    5
}

fn default_n_step() -> usize {
    2
}

fn default_max_n() -> usize {
    12
}

fn default_min_citations() -> usize {
    1
}

fn default_evidence_max_chars() -> usize {
    crate::guardrails::DEFAULT_RETRIEVED_TEXT_MAX_CHARS
}

impl GroundingConfig {
    /// Retrieval size for a 1-based attempt number
    pub fn n_for_attempt(&self, attempt: u32) -> usize {
        let retries = attempt.saturating_sub(1) as usize;
        self.initial_n
            .saturating_add(self.n_step.saturating_mul(retries))
            .min(self.max_n)
    }
}

impl Default for GroundingConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_n: default_initial_n(),
            n_step: default_n_step(),
            max_n: default_max_n(),
            min_citations: default_min_citations(),
            evidence_max_chars: default_evidence_max_chars(),
        }
    }
}

/// Action-confirmation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionConfig {
    /// Seconds a pending action stays confirmable
    #[serde(default = "default_pending_ttl")]
    pub pending_ttl_secs: i64,

    /// Maximum blacklist comment length
    #[serde(default = "default_comment_max_len")]
    pub comment_max_len: usize,

    /// Comment attached to blacklist entries created from chat
    #[serde(default = "default_blacklist_comment")]
    pub blacklist_comment: String,
}

fn default_pending_ttl() -> i64 {
    300
}

fn default_comment_max_len() -> usize {
    crate::validators::DEFAULT_COMMENT_MAX_LEN
}

fn default_blacklist_comment() -> String {
    "Blocked by Lumina assistant".to_string()
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            pending_ttl_secs: default_pending_ttl(),
            comment_max_len: default_comment_max_len(),
            blacklist_comment: default_blacklist_comment(),
        }
    }
}

/// Session store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sessions untouched for this long are dropped (0 keeps them forever)
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_secs: u64,
}

fn default_idle_ttl() -> u64 {
    3600
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_ttl_secs: default_idle_ttl(),
        }
    }
}

impl SessionConfig {
    pub fn idle_ttl(&self) -> Option<Duration> {
        (self.idle_ttl_secs > 0).then(|| Duration::from_secs(self.idle_ttl_secs))
    }
}

/// Guardrail audit log settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// JSONL file receiving one record per gate decision
    #[serde(default = "default_audit_path")]
    pub path: PathBuf,
}

fn default_true() -> bool {
    true
}

fn default_audit_path() -> PathBuf {
    PathBuf::from(DATA_DIR).join("audit/guardrails.jsonl")
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_audit_path(),
        }
    }
}

/// Metrics and trace-event settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Prefix for every exported metric name
    #[serde(default = "default_metrics_namespace")]
    pub metrics_namespace: String,

    /// JSONL file receiving trace events (disabled when unset)
    #[serde(default)]
    pub trace_jsonl_path: Option<PathBuf>,
}

fn default_metrics_namespace() -> String {
    "lumina".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            metrics_namespace: default_metrics_namespace(),
            trace_jsonl_path: None,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LuminaConfig {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub grounding: GroundingConfig,
    #[serde(default)]
    pub actions: ActionConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl LuminaConfig {
    /// Default config file location
    pub fn system_path() -> PathBuf {
        PathBuf::from(SYSTEM_CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("parsing lumina config")?;
        Ok(config.normalized())
    }

    /// Load from a file; the file must exist
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let mut config = Self::from_toml_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        config.apply_env_overrides();
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config.normalized())
    }

    /// Load from a file, falling back to defaults when it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        debug!(path = %path.display(), "Config file missing, using defaults");
        let mut config = Self::default();
        config.apply_env_overrides();
        Ok(config.normalized())
    }

    /// Apply LUMINA_* overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (testable form of env overrides)
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("LUMINA_LOG_LEVEL") {
            self.log.level = level;
        }
        if let Some(enabled) = lookup("LUMINA_AUDIT_ENABLED") {
            self.audit.enabled = parse_bool(&enabled).unwrap_or(self.audit.enabled);
        }
        if let Some(path) = lookup("LUMINA_AUDIT_PATH") {
            self.audit.path = PathBuf::from(path);
        }
        if let Some(path) = lookup("LUMINA_TRACE_PATH") {
            self.observability.trace_jsonl_path = Some(PathBuf::from(path));
        }
        if let Some(ns) = lookup("LUMINA_METRICS_NAMESPACE") {
            self.observability.metrics_namespace = ns;
        }
        if let Some(raw) = lookup("LUMINA_GROUNDING_MAX_ATTEMPTS") {
            match raw.trim().parse::<u32>() {
                Ok(n) => self.grounding.max_attempts = n,
                Err(_) => warn!(value = %raw, "Ignoring invalid LUMINA_GROUNDING_MAX_ATTEMPTS"),
            }
        }
    }

    /// Clamp out-of-range values
    pub fn normalized(mut self) -> Self {
        if self.grounding.max_attempts < 1 {
            warn!("grounding.max_attempts must be >= 1, clamping");
            self.grounding.max_attempts = 1;
        }
        if self.grounding.initial_n < 1 {
            warn!("grounding.initial_n must be >= 1, clamping");
            self.grounding.initial_n = 1;
        }
        if self.grounding.max_n < self.grounding.initial_n {
            warn!("grounding.max_n below initial_n, clamping");
            self.grounding.max_n = self.grounding.initial_n;
        }
        if self.retrieval.semantic_weight < 0.0 || self.retrieval.semantic_weight.is_nan() {
            self.retrieval.semantic_weight = 0.0;
        }
        if self.retrieval.lexical_weight < 0.0 || self.retrieval.lexical_weight.is_nan() {
            self.retrieval.lexical_weight = 0.0;
        }
        if self.actions.pending_ttl_secs < 1 {
            warn!("actions.pending_ttl_secs must be positive, using default");
            self.actions.pending_ttl_secs = default_pending_ttl();
        }
        if !is_valid_metric_namespace(&self.observability.metrics_namespace) {
            warn!(
                namespace = %self.observability.metrics_namespace,
                "observability.metrics_namespace is not a valid metric name prefix, using default"
            );
            self.observability.metrics_namespace = default_metrics_namespace();
        }
        self
    }
}

/// Prometheus metric name rule: `[a-zA-Z_:][a-zA-Z0-9_:]*`
fn is_valid_metric_namespace(ns: &str) -> bool {
    let mut chars = ns.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
