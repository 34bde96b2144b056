//! Guardrail audit trail.
//!
//! Every gate decision (route parsing, confirmation, validation, tool result,
//! grounding) becomes one append-only JSONL line.
//!
//! Default location: /var/lib/lumina/audit/guardrails.jsonl

use crate::config::AuditConfig;
use crate::error::{LuminaError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Outcome of a gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditDecision {
    Allow,
    Deny,
    Challenge,
}

impl AuditDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditDecision::Allow => "allow",
            AuditDecision::Deny => "deny",
            AuditDecision::Challenge => "challenge",
        }
    }
}

impl std::fmt::Display for AuditDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One gate decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub ts: DateTime<Utc>,
    pub gate: String,
    /// Free-form for grounding decisions (FINAL, RETRY, ...), otherwise allow/deny/challenge
    pub decision: String,
    pub reason: String,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<u64>,
}

impl AuditRecord {
    pub fn new(gate: &str, decision: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            gate: gate.to_string(),
            decision: decision.into(),
            reason: reason.into(),
            metadata: Value::Object(Default::default()),
            trace_id: None,
            session_id: None,
            turn_id: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_ids(mut self, trace_id: &str, session_id: &str, turn_id: u64) -> Self {
        self.trace_id = Some(trace_id.to_string());
        self.session_id = Some(session_id.to_string());
        self.turn_id = Some(turn_id);
        self
    }

    /// `decision:reason`, e.g. `deny:nonce_mismatch`
    pub fn label(&self) -> String {
        format!("{}:{}", self.decision, self.reason)
    }
}

/// Destination for audit records
pub trait AuditSink: Send + Sync {
    fn record(&self, record: &AuditRecord) -> Result<()>;
}

/// Build the sink described by configuration
pub fn sink_from_config(config: &AuditConfig) -> Arc<dyn AuditSink> {
    if config.enabled {
        Arc::new(JsonlAuditLog::new(&config.path))
    } else {
        Arc::new(NoopAuditSink)
    }
}

/// Append-only JSONL file
pub struct JsonlAuditLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every record; unparseable lines are skipped
    pub fn read_all(&self) -> Result<Vec<AuditRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&self.path)?;
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(record) = serde_json::from_str::<AuditRecord>(&line) {
                records.push(record);
            }
        }
        Ok(records)
    }
}

impl AuditSink for JsonlAuditLog {
    fn record(&self, record: &AuditRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| LuminaError::Audit("audit log lock poisoned".to_string()))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

/// Discards everything
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _record: &AuditRecord) -> Result<()> {
        Ok(())
    }
}

/// Keeps records in memory, for tests and embedding
#[derive(Default)]
pub struct RecordingAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// `decision:reason` labels recorded for one gate, in order
    pub fn labels_for(&self, gate: &str) -> Vec<String> {
        self.records()
            .iter()
            .filter(|r| r.gate == gate)
            .map(AuditRecord::label)
            .collect()
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, record: &AuditRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| LuminaError::Audit("recording sink lock poisoned".to_string()))?
            .push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_jsonl_append_and_read() {
        let dir = TempDir::new().unwrap();
        let log = JsonlAuditLog::new(dir.path().join("nested/audit.jsonl"));

        log.record(&AuditRecord::new("route_parse", "allow", "valid_token")).unwrap();
        log.record(
            &AuditRecord::new("action_confirmation", "deny", "nonce_mismatch")
                .with_metadata(json!({"kind": "set_mode"}))
                .with_ids("t-1", "s-1", 4),
        )
        .unwrap();

        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].label(), "deny:nonce_mismatch");
        assert_eq!(records[1].turn_id, Some(4));
        assert_eq!(records[1].metadata["kind"], "set_mode");
    }

    #[test]
    fn test_lines_are_json_objects() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = JsonlAuditLog::new(&path);
        log.record(&AuditRecord::new("tool_result", "allow", "tool_ok")).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let value: Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(value["gate"], "tool_result");
        assert_eq!(value["decision"], "allow");
        assert_eq!(value["reason"], "tool_ok");
        assert!(value["ts"].as_str().unwrap().contains('T'));
        assert!(value.get("trace_id").is_none());
    }

    #[test]
    fn test_read_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let log = JsonlAuditLog::new(dir.path().join("absent.jsonl"));
        assert!(log.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_recording_sink_labels() {
        let sink = RecordingAuditSink::new();
        sink.record(&AuditRecord::new("a", "allow", "x")).unwrap();
        sink.record(&AuditRecord::new("b", "deny", "y")).unwrap();
        assert_eq!(sink.labels_for("b"), vec!["deny:y"]);
        assert_eq!(AuditDecision::Challenge.to_string(), "challenge");
    }

    #[test]
    fn test_poisoned_lock_is_audit_error() {
        let sink = Arc::new(RecordingAuditSink::new());
        let holder = Arc::clone(&sink);
        let _ = std::thread::spawn(move || {
            let _guard = holder.records.lock().unwrap();
            panic!("writer died holding the lock");
        })
        .join();

        let err = sink
            .record(&AuditRecord::new("tool_result", "allow", "tool_ok"))
            .unwrap_err();
        assert_eq!(err.tag(), "audit");
        assert!(matches!(err, LuminaError::Audit(_)));
    }
}
