//! Nonce-gated confirmation of configuration changes.
//!
//! The control plane is only called when a pending action exists, is still
//! valid, and the user echoed its exact nonce. The pending action is cleared
//! after that single execution whatever its result.

use super::control_plane::{ControlPlane, TOOL_MANAGE_IP_BLACKLIST, TOOL_SET_PROTECTION_MODE};
use super::intent::{
    extract_confirmation_nonce, infer_intent, is_cancel, ConfigAction, ConfigIntent,
    IntentRejection,
};
use super::pending::{PendingAction, PendingInvalid};
use crate::audit::AuditDecision;
use crate::config::ActionConfig;
use crate::guardrails::{
    parse_tool_result, ToolOutcome, GATE_ACTION_CONFIRMATION, GATE_ACTION_VALIDATION,
    GATE_TOOL_RESULT,
};
use crate::observer::{Observer, TurnIds};
use crate::session::SessionContext;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Agent label used for tool-call telemetry
pub const CONFIG_AGENT: &str = "config_manager";

pub const CANCELLED_MESSAGE: &str = "Cancelled pending configuration action.";
pub const NO_ACTION_MESSAGE: &str = "No supported configuration action detected.";
pub const NO_PENDING_MESSAGE: &str = "There is no pending configuration action to confirm.";
pub const INVALID_TOKEN_MESSAGE: &str = "Invalid confirmation token. Reply with 'confirm <code>' \
using the code from my last message, or 'cancel' to abort.";

pub struct ConfirmationWorkflow {
    control_plane: Arc<dyn ControlPlane>,
    config: ActionConfig,
    observer: Observer,
}

impl ConfirmationWorkflow {
    pub fn new(control_plane: Arc<dyn ControlPlane>, config: ActionConfig, observer: Observer) -> Self {
        Self {
            control_plane,
            config,
            observer,
        }
    }

    /// Handle one configuration-path turn at the current time
    pub fn handle_config_turn(&self, message: &str, ctx: &SessionContext) -> (String, SessionContext) {
        self.handle_config_turn_at(message, ctx, Utc::now().timestamp())
    }

    /// Handle one configuration-path turn at `now` (unix seconds)
    pub fn handle_config_turn_at(
        &self,
        message: &str,
        ctx: &SessionContext,
        now: i64,
    ) -> (String, SessionContext) {
        let ids = ctx.ids();
        match &ctx.pending_action {
            Some(pending) => self.handle_pending(message, ctx, pending, &ids, now),
            None => self.handle_fresh(message, ctx, &ids, now),
        }
    }

    fn handle_pending(
        &self,
        message: &str,
        ctx: &SessionContext,
        pending: &PendingAction,
        ids: &TurnIds,
        now: i64,
    ) -> (String, SessionContext) {
        let meta = json!({"kind": pending.action.kind(), "preview": pending.preview()});

        if is_cancel(message) {
            self.gate(ids, GATE_ACTION_CONFIRMATION, AuditDecision::Deny, "user_cancelled", meta);
            return (CANCELLED_MESSAGE.to_string(), ctx.with_pending(None));
        }

        if let Err(invalid) = pending.validate(now) {
            self.gate(ids, GATE_ACTION_CONFIRMATION, AuditDecision::Deny, invalid.reason(), meta);
            let reply = match invalid {
                PendingInvalid::Expired => format!(
                    "The pending action ({}) has expired and was discarded. Please resubmit the request.",
                    pending.preview()
                ),
                other => format!(
                    "The pending action was invalid ({}) and was discarded. Please resubmit the request.",
                    other
                ),
            };
            return (reply, ctx.with_pending(None));
        }

        match extract_confirmation_nonce(message) {
            Some(token) if pending.matches_nonce(&token) => {
                self.gate(ids, GATE_ACTION_CONFIRMATION, AuditDecision::Allow, "nonce_match", meta);
                let reply = self.execute(&pending.action, ids);
                (reply, ctx.with_pending(None))
            }
            Some(_) => {
                self.gate(ids, GATE_ACTION_CONFIRMATION, AuditDecision::Deny, "nonce_mismatch", meta);
                (INVALID_TOKEN_MESSAGE.to_string(), ctx.clone())
            }
            None => {
                let intent = infer_intent(message, &self.config.blacklist_comment);
                let same = intent
                    .validate(self.config.comment_max_len)
                    .map(|action| action == pending.action)
                    .unwrap_or(false);
                if intent.is_actionable() && !same {
                    self.gate(ids, GATE_ACTION_CONFIRMATION, AuditDecision::Deny, "pending_action_conflict", meta);
                    let reply = format!(
                        "You already have a pending action ({}). Confirm it with 'confirm {}' or reply 'cancel' before requesting another change.",
                        pending.preview(),
                        pending.nonce
                    );
                    return (reply, ctx.clone());
                }
                (self.challenge_text(pending, now), ctx.clone())
            }
        }
    }

    fn handle_fresh(
        &self,
        message: &str,
        ctx: &SessionContext,
        ids: &TurnIds,
        now: i64,
    ) -> (String, SessionContext) {
        let token = extract_confirmation_nonce(message);
        if token.is_some() {
            self.gate(ids, GATE_ACTION_CONFIRMATION, AuditDecision::Deny, "no_pending_action", json!({}));
        }

        let intent = infer_intent(message, &self.config.blacklist_comment);
        if !intent.is_actionable() {
            let reply = if token.is_some() { NO_PENDING_MESSAGE } else { NO_ACTION_MESSAGE };
            return (reply.to_string(), ctx.clone());
        }

        let action = match intent.validate(self.config.comment_max_len) {
            Ok(action) => action,
            Err(rejection) => return (self.reject(&intent, &rejection, ids), ctx.clone()),
        };

        let pending = PendingAction::new(action, now, self.config.pending_ttl_secs);
        self.gate(
            ids,
            GATE_ACTION_CONFIRMATION,
            AuditDecision::Challenge,
            "confirmation_required",
            json!({
                "kind": pending.action.kind(),
                "preview": pending.preview(),
                "expires_at": pending.expires_at,
            }),
        );
        info!(kind = pending.action.kind(), expires_at = pending.expires_at, "Confirmation requested");
        let reply = self.challenge_text(&pending, now);
        (reply, ctx.with_pending(Some(pending)))
    }

    fn challenge_text(&self, pending: &PendingAction, now: i64) -> String {
        let remaining = (pending.expires_at - now).max(0);
        format!(
            "Please confirm before I apply this change: {}. Reply with 'confirm {}' within {} seconds to proceed, or 'cancel' to abort.",
            pending.preview(),
            pending.nonce,
            remaining
        )
    }

    fn reject(&self, intent: &ConfigIntent, rejection: &IntentRejection, ids: &TurnIds) -> String {
        let meta = json!({"kind": intent.kind()});
        self.gate(ids, GATE_ACTION_VALIDATION, AuditDecision::Deny, rejection.reason(), meta);
        match rejection {
            IntentRejection::InvalidIp(raw) => format!("Rejected: invalid IP or CIDR '{}'.", raw),
            IntentRejection::InvalidMode(raw) => format!(
                "Rejected: invalid protection mode '{}'. Use block, detect or off.",
                raw
            ),
            IntentRejection::NoAction => NO_ACTION_MESSAGE.to_string(),
        }
    }

    /// Call the control plane once and report the outcome
    fn execute(&self, action: &ConfigAction, ids: &TurnIds) -> String {
        if !action.has_valid_parameters() {
            self.gate(
                ids,
                GATE_ACTION_VALIDATION,
                AuditDecision::Deny,
                "invalid_parameters",
                json!({"kind": action.kind()}),
            );
            return "Configuration change failed: invalid parameters".to_string();
        }

        let started = Instant::now();
        let (tool, result) = match action {
            ConfigAction::SetMode { mode } => {
                (TOOL_SET_PROTECTION_MODE, self.control_plane.set_mode(*mode))
            }
            ConfigAction::BlacklistIp { ip, comment } => (
                TOOL_MANAGE_IP_BLACKLIST,
                self.control_plane.blacklist_ip(ip, comment),
            ),
        };
        let elapsed = started.elapsed();

        let outcome = match &result {
            Ok(payload) => parse_tool_result(payload),
            Err(e) => ToolOutcome::Failed(e.to_string()),
        };
        let status = if outcome.is_ok() { "ok" } else { "error" };
        self.observer
            .telemetry()
            .observe_tool_call(CONFIG_AGENT, tool, status, elapsed);

        match outcome {
            ToolOutcome::Ok => {
                self.gate(ids, GATE_TOOL_RESULT, AuditDecision::Allow, "tool_ok", json!({"tool": tool}));
                info!(tool, elapsed_ms = elapsed.as_millis() as u64, "Configuration change applied");
                match action {
                    ConfigAction::SetMode { mode } => format!(
                        "Executed: Set protection mode to {}",
                        mode.as_str().to_uppercase()
                    ),
                    ConfigAction::BlacklistIp { ip, .. } => {
                        format!("Executed: Added {} to blacklist", ip)
                    }
                }
            }
            ToolOutcome::Failed(reason) => {
                self.gate(ids, GATE_TOOL_RESULT, AuditDecision::Deny, &reason, json!({"tool": tool}));
                warn!(tool, %reason, "Configuration change failed");
                format!("Configuration change failed: {}", reason)
            }
        }
    }

    fn gate(
        &self,
        ids: &TurnIds,
        gate: &str,
        decision: AuditDecision,
        reason: &str,
        metadata: serde_json::Value,
    ) {
        self.observer
            .record_gate(ids, gate, decision.as_str(), reason, metadata);
    }
}
