//! Nonce-gated confirmation of configuration changes.
//!
//! The control plane must be called exactly once per confirmed action and
//! never without the exact nonce.

use lumina_core::actions::{
    ConfirmationWorkflow, ControlPlaneCall, PendingAction, RecordingControlPlane,
};
use lumina_core::audit::RecordingAuditSink;
use lumina_core::config::ActionConfig;
use lumina_core::guardrails::{GATE_ACTION_CONFIRMATION, GATE_TOOL_RESULT};
use lumina_core::observer::Observer;
use lumina_core::session::SessionContext;
use lumina_core::telemetry::RecordingTelemetry;
use lumina_core::validators::WafMode;
use serde_json::json;
use std::sync::Arc;

const T0: i64 = 1_700_000_000;

struct Harness {
    workflow: ConfirmationWorkflow,
    plane: Arc<RecordingControlPlane>,
    audit: Arc<RecordingAuditSink>,
    telemetry: Arc<RecordingTelemetry>,
}

fn harness_with(plane: RecordingControlPlane) -> Harness {
    let plane = Arc::new(plane);
    let audit = Arc::new(RecordingAuditSink::new());
    let telemetry = Arc::new(RecordingTelemetry::new());
    let observer = Observer::new(audit.clone(), telemetry.clone());
    Harness {
        workflow: ConfirmationWorkflow::new(plane.clone(), ActionConfig::default(), observer),
        plane,
        audit,
        telemetry,
    }
}

fn harness() -> Harness {
    harness_with(RecordingControlPlane::new())
}

fn pending(ctx: &SessionContext) -> PendingAction {
    ctx.pending_action.clone().expect("a pending action")
}

/// A 6-digit code guaranteed to differ from `nonce`
fn wrong_nonce(nonce: &str) -> String {
    if nonce == "000000" {
        "111111".to_string()
    } else {
        "000000".to_string()
    }
}

#[test]
fn test_exact_nonce_executes_once() {
    let h = harness();
    let (reply, ctx) =
        h.workflow
            .handle_config_turn_at("Switch WAF to block mode", &SessionContext::new("s1"), T0);
    let nonce = pending(&ctx).nonce;
    assert!(reply.contains(&format!("confirm {}", nonce)));
    assert_eq!(h.plane.call_count(), 0);

    let (reply, ctx) = h
        .workflow
        .handle_config_turn_at(&format!("confirm {}", nonce), &ctx, T0 + 30);
    assert!(reply.contains("Executed"));
    assert!(ctx.pending_action.is_none());
    assert_eq!(h.plane.calls(), vec![ControlPlaneCall::SetMode(WafMode::Block)]);

    let calls = h.telemetry.tool_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].tool, "set_protection_mode");
    assert_eq!(calls[0].status, "ok");
}

#[test]
fn test_confirm_is_case_insensitive() {
    let h = harness();
    let (_, ctx) = h
        .workflow
        .handle_config_turn_at("ban 203.0.113.7", &SessionContext::new("s1"), T0);
    let nonce = pending(&ctx).nonce;

    let (reply, _) = h
        .workflow
        .handle_config_turn_at(&format!("CONFIRM {}", nonce), &ctx, T0 + 1);
    assert_eq!(reply, "Executed: Added 203.0.113.7 to blacklist");
    assert_eq!(
        h.plane.calls(),
        vec![ControlPlaneCall::BlacklistIp {
            ip: "203.0.113.7".to_string(),
            comment: "Blocked by Lumina assistant".to_string(),
        }]
    );
}

#[test]
fn test_wrong_nonce_never_executes() {
    let h = harness();
    let (_, ctx) = h
        .workflow
        .handle_config_turn_at("enable block mode", &SessionContext::new("s1"), T0);
    let original = pending(&ctx);
    let wrong = format!("confirm {}", wrong_nonce(&original.nonce));

    let mut ctx = ctx;
    for i in 0..5 {
        let (reply, next) = h.workflow.handle_config_turn_at(&wrong, &ctx, T0 + i);
        assert!(reply.contains("Invalid confirmation token"));
        assert_eq!(next.pending_action.as_ref(), Some(&original));
        ctx = next;
    }
    assert_eq!(h.plane.call_count(), 0);

    // The real code still works afterwards
    let (reply, _) = h
        .workflow
        .handle_config_turn_at(&format!("confirm {}", original.nonce), &ctx, T0 + 10);
    assert!(reply.starts_with("Executed"));
    assert_eq!(h.plane.call_count(), 1);
}

#[test]
fn test_expired_action_is_discarded() {
    let h = harness();
    let (_, ctx) = h
        .workflow
        .handle_config_turn_at("enable block mode", &SessionContext::new("s1"), T0);
    let nonce = pending(&ctx).nonce;

    let (reply, ctx) = h
        .workflow
        .handle_config_turn_at(&format!("confirm {}", nonce), &ctx, T0 + 301);
    assert!(reply.contains("expired"));
    assert!(ctx.pending_action.is_none());
    assert_eq!(h.plane.call_count(), 0);
    assert_eq!(
        h.audit.labels_for(GATE_ACTION_CONFIRMATION),
        vec!["challenge:confirmation_required", "deny:expired"]
    );
}

#[test]
fn test_confirmation_at_exact_expiry_is_accepted() {
    let h = harness();
    let (_, ctx) = h
        .workflow
        .handle_config_turn_at("enable block mode", &SessionContext::new("s1"), T0);
    let nonce = pending(&ctx).nonce;

    let (reply, _) = h
        .workflow
        .handle_config_turn_at(&format!("confirm {}", nonce), &ctx, T0 + 300);
    assert!(reply.starts_with("Executed"));
}

#[test]
fn test_replayed_confirmation_executes_at_most_once() {
    let h = harness();
    let (_, ctx) = h
        .workflow
        .handle_config_turn_at("enable block mode", &SessionContext::new("s1"), T0);
    let confirm = format!("confirm {}", pending(&ctx).nonce);

    let (_, ctx) = h.workflow.handle_config_turn_at(&confirm, &ctx, T0 + 1);
    let (reply, ctx) = h.workflow.handle_config_turn_at(&confirm, &ctx, T0 + 2);
    assert_eq!(reply, "There is no pending configuration action to confirm.");
    assert!(ctx.pending_action.is_none());
    assert_eq!(h.plane.call_count(), 1);
    assert_eq!(
        h.audit.labels_for(GATE_ACTION_CONFIRMATION).last().map(String::as_str),
        Some("deny:no_pending_action")
    );
}

#[test]
fn test_invalid_ip_never_becomes_pending() {
    let h = harness();
    let (reply, ctx) = h.workflow.handle_config_turn_at(
        "please blacklist 999.999.999.999",
        &SessionContext::new("s1"),
        T0,
    );
    assert!(reply.contains("invalid IP"));
    assert!(ctx.pending_action.is_none());
    assert_eq!(h.plane.call_count(), 0);
}

#[test]
fn test_cancel_clears_pending() {
    let h = harness();
    let (_, ctx) = h
        .workflow
        .handle_config_turn_at("enable block mode", &SessionContext::new("s1"), T0);
    let (reply, ctx) = h.workflow.handle_config_turn_at("cancel that", &ctx, T0 + 1);
    assert_eq!(reply, "Cancelled pending configuration action.");
    assert!(ctx.pending_action.is_none());
    assert_eq!(h.plane.call_count(), 0);
    assert_eq!(
        h.audit.labels_for(GATE_ACTION_CONFIRMATION),
        vec!["challenge:confirmation_required", "deny:user_cancelled"]
    );
}

#[test]
fn test_tool_error_payload_is_not_success() {
    let h = harness_with(RecordingControlPlane::responding(Ok(json!({"error": "x"}))));
    let (_, ctx) = h
        .workflow
        .handle_config_turn_at("enable block mode", &SessionContext::new("s1"), T0);
    let (reply, ctx) = h
        .workflow
        .handle_config_turn_at(&format!("confirm {}", pending(&ctx).nonce), &ctx, T0 + 1);

    assert!(!reply.contains("Executed"));
    assert_eq!(reply, "Configuration change failed: x");
    assert!(ctx.pending_action.is_none());
    assert_eq!(h.plane.call_count(), 1);
    assert_eq!(h.audit.labels_for(GATE_TOOL_RESULT), vec!["deny:x"]);
    assert_eq!(h.telemetry.tool_calls()[0].status, "error");
}

#[test]
fn test_unexpected_status_is_not_success() {
    let h = harness_with(RecordingControlPlane::responding(Ok(
        json!({"status": "pending"}),
    )));
    let (_, ctx) = h
        .workflow
        .handle_config_turn_at("ban 198.51.100.0/24", &SessionContext::new("s1"), T0);
    let (reply, _) = h
        .workflow
        .handle_config_turn_at(&format!("confirm {}", pending(&ctx).nonce), &ctx, T0 + 1);
    assert_eq!(reply, "Configuration change failed: unexpected status: pending");
}

#[test]
fn test_nonces_are_six_digits() {
    let h = harness();
    for i in 0..20 {
        let (_, ctx) = h.workflow.handle_config_turn_at(
            "enable block mode",
            &SessionContext::new(format!("s{}", i)),
            T0,
        );
        let nonce = pending(&ctx).nonce;
        assert_eq!(nonce.len(), 6);
        assert!(nonce.chars().all(|c| c.is_ascii_digit()));
    }
}
