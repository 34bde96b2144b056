//! WAF control-plane capability consumed by the confirmation workflow.

use crate::validators::WafMode;
use serde_json::{json, Value};
use std::sync::Mutex;

pub const TOOL_SET_PROTECTION_MODE: &str = "set_protection_mode";
pub const TOOL_MANAGE_IP_BLACKLIST: &str = "manage_ip_blacklist";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ControlPlaneError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("control plane unavailable: {0}")]
    Unavailable(String),
}

/// Mutating WAF operations. Payloads are raw JSON, classified by the caller.
pub trait ControlPlane: Send + Sync {
    fn set_mode(&self, mode: WafMode) -> Result<Value, ControlPlaneError>;
    fn blacklist_ip(&self, ip: &str, comment: &str) -> Result<Value, ControlPlaneError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPlaneCall {
    SetMode(WafMode),
    BlacklistIp { ip: String, comment: String },
}

/// Records every call and answers with a fixed response
pub struct RecordingControlPlane {
    calls: Mutex<Vec<ControlPlaneCall>>,
    response: Result<Value, ControlPlaneError>,
}

impl Default for RecordingControlPlane {
    fn default() -> Self {
        Self::responding(Ok(json!({"status": "ok"})))
    }
}

impl RecordingControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn responding(response: Result<Value, ControlPlaneError>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            response,
        }
    }

    pub fn calls(&self) -> Vec<ControlPlaneCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn push(&self, call: ControlPlaneCall) -> Result<Value, ControlPlaneError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
        self.response.clone()
    }
}

impl ControlPlane for RecordingControlPlane {
    fn set_mode(&self, mode: WafMode) -> Result<Value, ControlPlaneError> {
        self.push(ControlPlaneCall::SetMode(mode))
    }

    fn blacklist_ip(&self, ip: &str, comment: &str) -> Result<Value, ControlPlaneError> {
        self.push(ControlPlaneCall::BlacklistIp {
            ip: ip.to_string(),
            comment: comment.to_string(),
        })
    }
}
