//! Trust core of the Lumina WAF assistant.
//!
//! Documentation questions go through hybrid retrieval and a self-grounding
//! loop; configuration changes go through a nonce-gated confirmation
//! workflow. Every gate decision is audited.

// Leaf validation and parsing
pub mod error;
pub mod guardrails;
pub mod validators;

// Ambient stack
pub mod audit;
pub mod config;
pub mod logging;
pub mod observer;
pub mod telemetry;
pub mod version;

// Capabilities and prompts
pub mod llm;
pub mod prompts;

// Core paths
pub mod actions;
pub mod grounding;
pub mod retrieval;

// Sessions and entry points
pub mod assistant;
pub mod session;

pub use actions::{
    ConfigAction, ConfigIntent, ConfirmationWorkflow, ControlPlane, ControlPlaneError,
    PendingAction,
};
pub use assistant::{Assistant, TurnReply};
pub use audit::{AuditRecord, AuditSink, JsonlAuditLog};
pub use config::LuminaConfig;
pub use error::{LuminaError, Result};
pub use grounding::{GroundedAnswer, GroundingTrace, SelfGroundingLoop};
pub use guardrails::{GroundingDecision, Route};
pub use llm::{LanguageModel, LlmError, PromptMessage};
pub use observer::{Observer, TurnIds};
pub use retrieval::{EvidenceItem, EvidenceRetriever, FusedResult, HybridRetriever, SearchFilter};
pub use session::{SessionContext, SessionStore};
pub use telemetry::{AgentTelemetry, TelemetrySink};
pub use validators::WafMode;
pub use version::{VersionInfo, BUILD_DATE, GIT_SHA, VERSION};
