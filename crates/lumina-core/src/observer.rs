//! Single handle for reporting gate decisions and trace events.

use crate::audit::{sink_from_config, AuditRecord, AuditSink, NoopAuditSink};
use crate::config::LuminaConfig;
use crate::error::Result;
use crate::telemetry::{AgentTelemetry, NoopTelemetry, TelemetrySink, TraceEvent};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Correlation ids of the turn being processed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnIds {
    pub trace_id: String,
    pub session_id: String,
    pub turn_id: u64,
}

/// Audit + telemetry pair shared by every component of a turn
#[derive(Clone)]
pub struct Observer {
    audit: Arc<dyn AuditSink>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl Observer {
    pub fn new(audit: Arc<dyn AuditSink>, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self { audit, telemetry }
    }

    /// Sinks described by configuration. The concrete telemetry handle is
    /// returned too so the host can export metrics.
    pub fn from_config(config: &LuminaConfig) -> Result<(Self, Arc<AgentTelemetry>)> {
        let telemetry = Arc::new(AgentTelemetry::new(&config.observability)?);
        let observer = Self::new(sink_from_config(&config.audit), telemetry.clone());
        Ok((observer, telemetry))
    }

    /// Observer that drops everything
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopAuditSink), Arc::new(NoopTelemetry))
    }

    pub fn telemetry(&self) -> &dyn TelemetrySink {
        self.telemetry.as_ref()
    }

    /// Audit a gate decision and count it.
    ///
    /// A failing audit sink is logged, never propagated.
    pub fn record_gate(
        &self,
        ids: &TurnIds,
        gate: &str,
        decision: &str,
        reason: &str,
        metadata: Value,
    ) {
        let record = AuditRecord::new(gate, decision, reason)
            .with_metadata(metadata)
            .with_ids(&ids.trace_id, &ids.session_id, ids.turn_id);
        if let Err(e) = self.audit.record(&record) {
            warn!(gate, decision, reason, error = %e, "Failed to write audit record");
        }
        self.telemetry.observe_guardrail(gate, decision, reason);
    }

    pub fn emit(&self, ids: &TurnIds, event: &str, metadata: Value) {
        let event = TraceEvent::new(event, &ids.trace_id, &ids.session_id, ids.turn_id)
            .with_metadata(metadata);
        self.telemetry.emit_event(&event);
    }
}
