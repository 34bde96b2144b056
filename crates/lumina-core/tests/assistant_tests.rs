//! End-to-end turns through the assistant facade.

use lumina_core::actions::{ControlPlaneCall, RecordingControlPlane};
use lumina_core::assistant::{Assistant, TurnReply};
use lumina_core::audit::RecordingAuditSink;
use lumina_core::config::LuminaConfig;
use lumina_core::error::Result;
use lumina_core::guardrails::{Route, GATE_ROUTE_PARSE};
use lumina_core::llm::{FakeLanguageModel, PromptMessage};
use lumina_core::observer::Observer;
use lumina_core::prompts::{CRITIC_SYSTEM, ROUTER_SYSTEM};
use lumina_core::retrieval::{EvidenceItem, EvidenceRetriever, FusedResult, SearchFilter};
use lumina_core::session::{SessionContext, SessionStore};
use lumina_core::telemetry::RecordingTelemetry;
use lumina_core::validators::WafMode;
use std::sync::{Arc, Mutex};

/// Returns the same two chunks for every query and remembers the last filter
#[derive(Default)]
struct Docs {
    last_filter: Mutex<Option<SearchFilter>>,
}

impl EvidenceRetriever for Docs {
    fn retrieve(
        &self,
        _query: &str,
        n: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<FusedResult>> {
        *self.last_filter.lock().unwrap() = filter.cloned();
        let items = [
            EvidenceItem::new("certs", "Upload an SSL certificate for each site."),
            EvidenceItem::new("modes", "Block mode rejects malicious requests."),
        ];
        Ok(items
            .into_iter()
            .take(n)
            .enumerate()
            .map(|(rank, item)| FusedResult {
                item,
                fused_score: 0.6 / (61.0 + rank as f64),
                semantic_rank: Some(rank),
                lexical_rank: None,
            })
            .collect())
    }
}

struct Fixture {
    assistant: Assistant,
    model: Arc<FakeLanguageModel>,
    plane: Arc<RecordingControlPlane>,
    docs: Arc<Docs>,
    audit: Arc<RecordingAuditSink>,
    telemetry: Arc<RecordingTelemetry>,
    store: SessionStore,
}

fn first_is(messages: &[PromptMessage], system: &str) -> bool {
    messages.first().map(|m| m.content == system).unwrap_or(false)
}

/// Router answers `route`; drafter and critic produce a cited final answer
fn fixture(route: &'static str) -> Fixture {
    let model = Arc::new(FakeLanguageModel::from_fn(move |messages| {
        let reply = if first_is(messages, ROUTER_SYSTEM) {
            route
        } else if first_is(messages, CRITIC_SYSTEM) {
            "FINAL: supported by [1]"
        } else {
            "Upload a certificate for each site [1]."
        };
        Ok(reply.to_string())
    }));
    let plane = Arc::new(RecordingControlPlane::new());
    let docs = Arc::new(Docs::default());
    let audit = Arc::new(RecordingAuditSink::new());
    let telemetry = Arc::new(RecordingTelemetry::new());
    let observer = Observer::new(audit.clone(), telemetry.clone());
    let assistant = Assistant::new(
        model.clone(),
        docs.clone(),
        plane.clone(),
        &LuminaConfig::default(),
        observer,
    );
    Fixture {
        assistant,
        model,
        plane,
        docs,
        audit,
        telemetry,
        store: SessionStore::new(),
    }
}

#[test]
fn test_documentation_question_is_grounded() {
    let f = fixture("rag_agent");
    let reply = f
        .assistant
        .handle_turn(&f.store, "s1", "How do I configure SSL certificates?");

    assert_eq!(
        reply,
        TurnReply::Answer {
            text: "Upload a certificate for each site [1].".to_string(),
            grounded: true,
        }
    );
    let ctx = f.store.snapshot("s1").unwrap();
    assert_eq!(ctx.turn_id, 1);
    assert!(ctx.last_grounding.unwrap().grounded);
    assert_eq!(f.audit.labels_for(GATE_ROUTE_PARSE), vec!["allow:valid_token"]);
    assert_eq!(f.telemetry.routes(), vec!["rag_agent"]);
}

#[test]
fn test_invalid_route_falls_back_to_direct() {
    let f = fixture("monitor and then config_manager");
    let reply = f.assistant.handle_turn(&f.store, "s1", "show me recent attacks");

    assert_eq!(reply, TurnReply::Unhandled { route: Route::Direct });
    assert_eq!(reply.text(), None);
    assert_eq!(f.audit.labels_for(GATE_ROUTE_PARSE), vec!["deny:invalid_token"]);
    let records = f.audit.records();
    assert_eq!(records[0].metadata["raw"], "monitor and then config_manager");
}

#[test]
fn test_valid_specialist_route_is_unhandled() {
    let f = fixture("monitor");
    let reply = f.assistant.handle_turn(&f.store, "s1", "show me recent attacks");
    assert_eq!(reply, TurnReply::Unhandled { route: Route::Monitor });
}

#[test]
fn test_config_route_challenges_then_confirm_skips_router() {
    let f = fixture("config_manager");
    let reply = f.assistant.handle_turn(&f.store, "s1", "Switch WAF to block mode");
    let TurnReply::Config { text } = reply else {
        panic!("expected a config reply");
    };
    assert!(text.starts_with("Please confirm"));
    assert_eq!(f.model.call_count(), 1);

    let nonce = f
        .store
        .snapshot("s1")
        .and_then(|ctx| ctx.pending_action)
        .map(|p| p.nonce)
        .unwrap();
    let reply = f
        .assistant
        .handle_turn(&f.store, "s1", &format!("confirm {}", nonce));
    assert_eq!(reply.text(), Some("Executed: Set protection mode to BLOCK"));
    assert_eq!(f.plane.calls(), vec![ControlPlaneCall::SetMode(WafMode::Block)]);
    assert!(f.store.snapshot("s1").unwrap().pending_action.is_none());
    assert_eq!(f.model.call_count(), 1);
    assert_eq!(f.telemetry.routes(), vec!["config_manager", "config_manager"]);
}

#[test]
fn test_question_mentioning_block_mode_is_answered() {
    let f = fixture("rag_agent");
    for question in ["Is block mode supported?", "How does block mode work?"] {
        let reply = f.assistant.handle_turn(&f.store, "s1", question);
        assert!(matches!(reply, TurnReply::Answer { grounded: true, .. }));
        assert!(f.store.snapshot("s1").unwrap().pending_action.is_none());
    }
    assert_eq!(f.plane.call_count(), 0);
    assert_eq!(
        f.audit.labels_for(GATE_ROUTE_PARSE),
        vec!["allow:valid_token", "allow:valid_token"]
    );
}

#[test]
fn test_router_decides_intent_phrasing_without_pending_action() {
    let f = fixture("direct");
    let reply = f.assistant.handle_turn(&f.store, "s1", "ban 203.0.113.9");
    assert_eq!(reply, TurnReply::Unhandled { route: Route::Direct });
    assert!(f.store.snapshot("s1").unwrap().pending_action.is_none());
    assert_eq!(f.model.call_count(), 1);
}

#[test]
fn test_pending_action_forces_config_path() {
    let f = fixture("config_manager");
    f.assistant.handle_turn(&f.store, "s1", "ban 203.0.113.9");
    let routed = f.model.call_count();
    let reply = f
        .assistant
        .handle_turn(&f.store, "s1", "how do I configure SSL certificates?");

    let text = reply.text().unwrap();
    assert!(text.starts_with("Please confirm"));
    assert!(text.contains("add IP 203.0.113.9 to blacklist"));
    assert_eq!(f.model.call_count(), routed);
    assert_eq!(f.plane.call_count(), 0);
}

#[test]
fn test_sessions_are_isolated() {
    let f = fixture("config_manager");
    f.assistant.handle_turn(&f.store, "alice", "enable block mode");
    let nonce = f
        .store
        .snapshot("alice")
        .and_then(|ctx| ctx.pending_action)
        .map(|p| p.nonce)
        .unwrap();

    let reply = f
        .assistant
        .handle_turn(&f.store, "bob", &format!("confirm {}", nonce));
    assert_eq!(
        reply.text(),
        Some("There is no pending configuration action to confirm.")
    );
    assert_eq!(f.plane.call_count(), 0);
    assert!(f.store.snapshot("alice").unwrap().pending_action.is_some());
}

#[test]
fn test_doc_scope_reaches_retriever() {
    let f = fixture("rag_agent");
    let scope = SearchFilter::new().with("doc_id", "upload-7");
    f.store
        .put(SessionContext::new("s1").with_doc_scope(Some(scope.clone())));

    f.assistant.handle_turn(&f.store, "s1", "What does the uploaded guide say?");
    assert_eq!(*f.docs.last_filter.lock().unwrap(), Some(scope));
}
