//! Assistant facade: routing plus the documentation and configuration paths.

use crate::actions::{extract_confirmation_nonce, ConfirmationWorkflow, ControlPlane};
use crate::config::LuminaConfig;
use crate::grounding::SelfGroundingLoop;
use crate::guardrails::{parse_route, Route, GATE_ROUTE_PARSE};
use crate::llm::LanguageModel;
use crate::observer::{Observer, TurnIds};
use crate::prompts::router_messages;
use crate::retrieval::EvidenceRetriever;
use crate::session::{SessionContext, SessionStore};
use crate::telemetry::EVENT_ROUTE_SELECTED;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Supervisor label used for handoff telemetry
const SUPERVISOR: &str = "supervisor";

/// Outcome of [`Assistant::handle_turn`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnReply {
    /// Documentation answer
    Answer { text: String, grounded: bool },
    /// Configuration path reply
    Config { text: String },
    /// Routed to a specialist this crate does not implement
    Unhandled { route: Route },
}

impl TurnReply {
    pub fn text(&self) -> Option<&str> {
        match self {
            TurnReply::Answer { text, .. } | TurnReply::Config { text } => Some(text),
            TurnReply::Unhandled { .. } => None,
        }
    }
}

pub struct Assistant {
    model: Arc<dyn LanguageModel>,
    grounding: SelfGroundingLoop,
    workflow: ConfirmationWorkflow,
    observer: Observer,
}

impl Assistant {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        retriever: Arc<dyn EvidenceRetriever>,
        control_plane: Arc<dyn ControlPlane>,
        config: &LuminaConfig,
        observer: Observer,
    ) -> Self {
        Self {
            grounding: SelfGroundingLoop::new(
                retriever,
                Arc::clone(&model),
                config.grounding.clone(),
                observer.clone(),
            ),
            workflow: ConfirmationWorkflow::new(control_plane, config.actions.clone(), observer.clone()),
            model,
            observer,
        }
    }

    /// Ask the model which specialist should handle `message`.
    ///
    /// Output outside the route vocabulary (or a model failure) falls back to
    /// `Direct` and is audited as `deny:invalid_token`.
    pub fn route(&self, message: &str, ids: &TurnIds) -> Route {
        let raw = match self.model.invoke(&router_messages(message), 0.0) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Routing model call failed");
                String::new()
            }
        };
        let parsed = parse_route(&raw);
        let (decision, reason) = if parsed.valid {
            ("allow", "valid_token")
        } else {
            ("deny", "invalid_token")
        };
        self.observer.record_gate(
            ids,
            GATE_ROUTE_PARSE,
            decision,
            reason,
            json!({"raw": raw, "route": parsed.route.as_str()}),
        );
        self.select(ids, parsed.route, "model");
        parsed.route
    }

    fn select(&self, ids: &TurnIds, route: Route, source: &str) {
        debug!(route = route.as_str(), source, "Route selected");
        self.observer.telemetry().observe_route(route.as_str());
        self.observer.emit(
            ids,
            EVENT_ROUTE_SELECTED,
            json!({"route": route.as_str(), "source": source}),
        );
    }

    /// Documentation question through the self-grounding loop
    pub fn answer_question(&self, question: &str, ctx: &SessionContext) -> (String, SessionContext) {
        let answer = self.grounding.run(question, ctx.doc_scope.as_ref(), &ctx.ids());
        (answer.text, ctx.with_grounding(answer.trace))
    }

    /// Configuration message through the confirmation workflow
    pub fn handle_config_turn(&self, message: &str, ctx: &SessionContext) -> (String, SessionContext) {
        self.workflow.handle_config_turn(message, ctx)
    }

    /// Full turn for one session, serialized with that session's other turns.
    ///
    /// A pending action or a confirmation token takes the configuration path
    /// without consulting the model; every other message is routed by it.
    pub fn handle_turn(&self, store: &SessionStore, session_id: &str, message: &str) -> TurnReply {
        let started = Instant::now();
        store.with_session(session_id, |current| {
            let ctx = current.next_turn();
            let ids = ctx.ids();

            let config_override =
                ctx.pending_action.is_some() || extract_confirmation_nonce(message).is_some();
            let route = if config_override {
                self.select(&ids, Route::ConfigManager, "confirmation_override");
                Route::ConfigManager
            } else {
                self.route(message, &ids)
            };

            let (reply, next) = match route {
                Route::ConfigManager => {
                    self.observer.telemetry().observe_handoff(SUPERVISOR, route.as_str());
                    let (text, next) = self.handle_config_turn(message, &ctx);
                    (TurnReply::Config { text }, next)
                }
                Route::RagAgent => {
                    self.observer.telemetry().observe_handoff(SUPERVISOR, route.as_str());
                    let (text, next) = self.answer_question(message, &ctx);
                    let grounded = next.last_grounding.as_ref().map(|t| t.grounded).unwrap_or(false);
                    (TurnReply::Answer { text, grounded }, next)
                }
                other => (TurnReply::Unhandled { route: other }, ctx),
            };

            self.observer
                .telemetry()
                .observe_turn(route.as_str(), started.elapsed());
            (reply, next)
        })
    }
}
