//! Agent metrics and trace events.
//!
//! Counters and histograms live in a private prometheus `Registry` and are
//! exported in text format. Trace events are appended as JSONL when a path is
//! configured.

use crate::config::ObservabilityConfig;
use crate::error::Result;
use chrono::{DateTime, Utc};
use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry, Encoder,
    HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

pub const EVENT_ROUTE_SELECTED: &str = "route.selected";
pub const EVENT_GROUNDING_ATTEMPT: &str = "grounding.attempt";

const TOOL_LATENCY_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0];
const TURN_LATENCY_BUCKETS: &[f64] = &[0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0];

/// Structured event correlated with a turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub ts: DateTime<Utc>,
    pub event: String,
    pub trace_id: String,
    pub session_id: String,
    pub turn_id: u64,
    #[serde(default)]
    pub metadata: Value,
}

impl TraceEvent {
    pub fn new(event: &str, trace_id: &str, session_id: &str, turn_id: u64) -> Self {
        Self {
            ts: Utc::now(),
            event: event.to_string(),
            trace_id: trace_id.to_string(),
            session_id: session_id.to_string(),
            turn_id,
            metadata: Value::Object(Default::default()),
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Metric and event recorder. Implementations never fail the caller.
pub trait TelemetrySink: Send + Sync {
    fn observe_route(&self, route: &str);
    fn observe_handoff(&self, from: &str, to: &str);
    fn observe_tool_call(&self, agent: &str, tool: &str, status: &str, duration: Duration);
    fn observe_guardrail(&self, gate: &str, decision: &str, reason: &str);
    fn observe_grounding_decision(&self, decision: &str, reason: &str);
    fn observe_turn(&self, route: &str, duration: Duration);
    fn emit_event(&self, event: &TraceEvent);
}

#[derive(Clone)]
struct AgentMetrics {
    route_total: IntCounterVec,
    handoff_total: IntCounterVec,
    tool_calls_total: IntCounterVec,
    guardrail_total: IntCounterVec,
    selfrag_decision_total: IntCounterVec,
    trace_events_total: IntCounterVec,
    tool_latency_seconds: HistogramVec,
    turn_latency_seconds: HistogramVec,
}

impl AgentMetrics {
    fn register(namespace: &str, registry: &Registry) -> Result<Self> {
        let counter = |name: &str, help: &str, labels: &[&str]| {
            register_int_counter_vec_with_registry!(
                Opts::new(name, help).namespace(namespace),
                labels,
                registry
            )
        };
        let histogram = |name: &str, help: &str, labels: &[&str], buckets: &[f64]| {
            register_histogram_vec_with_registry!(
                HistogramOpts::new(name, help)
                    .namespace(namespace)
                    .buckets(buckets.to_vec()),
                labels,
                registry
            )
        };

        Ok(Self {
            route_total: counter("agent_route_total", "Routing decisions by route", &["route"])?,
            handoff_total: counter(
                "agent_handoff_total",
                "Handoffs between agents",
                &["from", "to"],
            )?,
            tool_calls_total: counter(
                "agent_tool_calls_total",
                "Tool calls by agent, tool and status",
                &["agent", "tool", "status"],
            )?,
            guardrail_total: counter(
                "agent_guardrail_total",
                "Guardrail gate decisions",
                &["gate", "decision", "reason"],
            )?,
            selfrag_decision_total: counter(
                "agent_selfrag_decision_total",
                "Self-grounding loop decisions",
                &["decision", "reason"],
            )?,
            trace_events_total: counter(
                "agent_trace_events_total",
                "Trace events emitted",
                &["event"],
            )?,
            tool_latency_seconds: histogram(
                "agent_tool_latency_seconds",
                "Tool call latency in seconds",
                &["agent", "tool"],
                TOOL_LATENCY_BUCKETS,
            )?,
            turn_latency_seconds: histogram(
                "agent_turn_latency_seconds",
                "End-to-end turn latency in seconds",
                &["route"],
                TURN_LATENCY_BUCKETS,
            )?,
        })
    }
}

const REASON_LABEL_MAX: usize = 64;

fn is_label_token(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= REASON_LABEL_MAX
        && s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == ':')
}

/// Collapse a free-form reason into a bounded metric label.
///
/// Snake-case reason codes pass through. Otherwise the code before the first
/// `:` is kept when it is one, and anything else becomes `other`.
pub fn reason_label(reason: &str) -> &str {
    let reason = reason.trim();
    if reason.is_empty() {
        return "unspecified";
    }
    if is_label_token(reason) {
        return reason;
    }
    match reason.split_once(':') {
        Some((head, _)) if is_label_token(head.trim()) => head.trim(),
        _ => "other",
    }
}

/// Prometheus-backed telemetry with an optional JSONL trace stream
pub struct AgentTelemetry {
    registry: Registry,
    metrics: Option<AgentMetrics>,
    trace_path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl AgentTelemetry {
    pub fn new(config: &ObservabilityConfig) -> Result<Self> {
        let registry = Registry::new();
        let metrics = if config.enabled {
            Some(AgentMetrics::register(&config.metrics_namespace, &registry)?)
        } else {
            None
        };

        Ok(Self {
            registry,
            metrics,
            trace_path: config.trace_jsonl_path.clone(),
            write_lock: Mutex::new(()),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.metrics.is_some()
    }

    /// Prometheus text exposition of every registered metric
    pub fn render_prometheus(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    fn append_event(&self, event: &TraceEvent) -> Result<()> {
        let Some(path) = &self.trace_path else {
            return Ok(());
        };
        let line = serde_json::to_string(event)?;
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

impl TelemetrySink for AgentTelemetry {
    fn observe_route(&self, route: &str) {
        if let Some(m) = &self.metrics {
            m.route_total.with_label_values(&[route]).inc();
        }
    }

    fn observe_handoff(&self, from: &str, to: &str) {
        if let Some(m) = &self.metrics {
            m.handoff_total.with_label_values(&[from, to]).inc();
        }
    }

    fn observe_tool_call(&self, agent: &str, tool: &str, status: &str, duration: Duration) {
        if let Some(m) = &self.metrics {
            m.tool_calls_total
                .with_label_values(&[agent, tool, status])
                .inc();
            m.tool_latency_seconds
                .with_label_values(&[agent, tool])
                .observe(duration.as_secs_f64());
        }
    }

    fn observe_guardrail(&self, gate: &str, decision: &str, reason: &str) {
        if let Some(m) = &self.metrics {
            m.guardrail_total
                .with_label_values(&[gate, decision, reason_label(reason)])
                .inc();
        }
    }

    fn observe_grounding_decision(&self, decision: &str, reason: &str) {
        if let Some(m) = &self.metrics {
            m.selfrag_decision_total
                .with_label_values(&[decision, reason_label(reason)])
                .inc();
        }
    }

    fn observe_turn(&self, route: &str, duration: Duration) {
        if let Some(m) = &self.metrics {
            m.turn_latency_seconds
                .with_label_values(&[route])
                .observe(duration.as_secs_f64());
        }
    }

    fn emit_event(&self, event: &TraceEvent) {
        // Disabled observability writes neither metrics nor trace lines
        let Some(m) = &self.metrics else {
            return;
        };
        m.trace_events_total.with_label_values(&[event.event.as_str()]).inc();
        if let Err(e) = self.append_event(event) {
            warn!(event = %event.event, error = %e, "Failed to append trace event");
        }
    }
}

/// Discards everything
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn observe_route(&self, _route: &str) {}
    fn observe_handoff(&self, _from: &str, _to: &str) {}
    fn observe_tool_call(&self, _agent: &str, _tool: &str, _status: &str, _duration: Duration) {}
    fn observe_guardrail(&self, _gate: &str, _decision: &str, _reason: &str) {}
    fn observe_grounding_decision(&self, _decision: &str, _reason: &str) {}
    fn observe_turn(&self, _route: &str, _duration: Duration) {}
    fn emit_event(&self, _event: &TraceEvent) {}
}

/// One observed tool call
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallObservation {
    pub agent: String,
    pub tool: String,
    pub status: String,
    pub duration: Duration,
}

/// In-memory sink for tests and embedding
#[derive(Default)]
pub struct RecordingTelemetry {
    routes: Mutex<Vec<String>>,
    tool_calls: Mutex<Vec<ToolCallObservation>>,
    grounding_decisions: Mutex<Vec<String>>,
    events: Mutex<Vec<TraceEvent>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn routes(&self) -> Vec<String> {
        self.routes.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn tool_calls(&self) -> Vec<ToolCallObservation> {
        self.tool_calls.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn grounding_decisions(&self) -> Vec<String> {
        self.grounding_decisions
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn observe_route(&self, route: &str) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.push(route.to_string());
        }
    }

    fn observe_handoff(&self, _from: &str, _to: &str) {}

    fn observe_tool_call(&self, agent: &str, tool: &str, status: &str, duration: Duration) {
        if let Ok(mut calls) = self.tool_calls.lock() {
            calls.push(ToolCallObservation {
                agent: agent.to_string(),
                tool: tool.to_string(),
                status: status.to_string(),
                duration,
            });
        }
    }

    fn observe_guardrail(&self, _gate: &str, _decision: &str, _reason: &str) {}

    fn observe_grounding_decision(&self, decision: &str, _reason: &str) {
        if let Ok(mut decisions) = self.grounding_decisions.lock() {
            decisions.push(decision.to_string());
        }
    }

    fn observe_turn(&self, _route: &str, _duration: Duration) {}

    fn emit_event(&self, event: &TraceEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
