//! Per-run outcome accumulation and the JSON report artifact.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use crate::error::SyncError;
use crate::model::{EntityKind, UpsertAction};

/// Warning-class entry: the run degraded but nothing failed.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunWarning {
    pub external_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Created,
    Updated,
    Skipped,
    Error,
}

impl From<UpsertAction> for OutcomeKind {
    fn from(action: UpsertAction) -> Self {
        match action {
            UpsertAction::Created => OutcomeKind::Created,
            UpsertAction::Updated => OutcomeKind::Updated,
            UpsertAction::Skipped => OutcomeKind::Skipped,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
    pub external_id: String,
    pub action: OutcomeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Finalized once per run, then written verbatim to the artifact; never
/// mutated afterward.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub entity_kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    pub dry_run: bool,
    pub entities_considered: usize,
    pub created_count: usize,
    pub updated_count: usize,
    pub skipped_count: usize,
    pub error_count: usize,
    pub average_sync_latency_ms: f64,
    pub incomplete: bool,
    pub actions: Vec<ActionRecord>,
    pub warnings: Vec<RunWarning>,
}

#[derive(Debug, Default)]
struct Tally {
    actions: Vec<ActionRecord>,
    warnings: Vec<RunWarning>,
    created: usize,
    updated: usize,
    skipped: usize,
    errors: usize,
    latency_total: Duration,
    latency_samples: u32,
    incomplete: bool,
}

/// Accumulates per-entity outcomes for one run. All updates go through one
/// mutex so a bounded worker pool could share the reporter unchanged.
#[derive(Debug)]
pub struct RunReporter {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    kind: EntityKind,
    repository: Option<String>,
    dry_run: bool,
    tally: Mutex<Tally>,
}

impl RunReporter {
    pub fn new(kind: EntityKind, repository: Option<String>, dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            kind,
            repository,
            dry_run,
            tally: Mutex::new(Tally::default()),
        }
    }

    pub fn record_action(&self, external_id: &str, action: UpsertAction, latency: Duration) {
        let mut tally = self.tally.lock().expect("tally lock");
        match action {
            UpsertAction::Created => tally.created += 1,
            UpsertAction::Updated => tally.updated += 1,
            UpsertAction::Skipped => tally.skipped += 1,
        }
        tally.latency_total += latency;
        tally.latency_samples += 1;
        tally.actions.push(ActionRecord {
            external_id: external_id.to_string(),
            action: action.into(),
            error_message: None,
        });
    }

    /// Entity-level failure: recorded and counted, the batch continues.
    pub fn record_error(&self, external_id: &str, err: &SyncError, latency: Option<Duration>) {
        let mut tally = self.tally.lock().expect("tally lock");
        tally.errors += 1;
        if let Some(latency) = latency {
            tally.latency_total += latency;
            tally.latency_samples += 1;
        }
        tally.actions.push(ActionRecord {
            external_id: external_id.to_string(),
            action: OutcomeKind::Error,
            error_message: Some(err.to_string()),
        });
    }

    pub fn record_warning(&self, external_id: &str, message: impl Into<String>) {
        let mut tally = self.tally.lock().expect("tally lock");
        tally.warnings.push(RunWarning {
            external_id: external_id.to_string(),
            message: message.into(),
        });
    }

    /// Schema mismatch: the field was dropped, not failed.
    pub fn record_schema_warning(&self, external_id: &str, property: &str) {
        self.record_warning(
            external_id,
            format!("property '{property}' absent from target database schema; field dropped"),
        );
    }

    /// Marks the run as cancelled or aborted mid-batch; the partial report
    /// is still emitted.
    pub fn mark_incomplete(&self) {
        self.tally.lock().expect("tally lock").incomplete = true;
    }

    pub fn error_count(&self) -> usize {
        self.tally.lock().expect("tally lock").errors
    }

    pub fn finalize(self) -> RunReport {
        let tally = self.tally.into_inner().expect("tally lock");
        let average_sync_latency_ms = if tally.latency_samples == 0 {
            0.0
        } else {
            tally.latency_total.as_secs_f64() * 1000.0 / f64::from(tally.latency_samples)
        };
        RunReport {
            run_id: self.run_id,
            timestamp: self.started_at,
            entity_kind: self.kind.as_str().to_string(),
            repository: self.repository,
            dry_run: self.dry_run,
            entities_considered: tally.actions.len(),
            created_count: tally.created,
            updated_count: tally.updated,
            skipped_count: tally.skipped,
            error_count: tally.errors,
            average_sync_latency_ms,
            incomplete: tally.incomplete,
            actions: tally.actions,
            warnings: tally.warnings,
        }
    }
}

/// Write the finalized report to disk as pretty-printed JSON.
pub fn write_report(report: &RunReport, path: &Path) -> io::Result<()> {
    let body = serde_json::to_string_pretty(report)?;
    fs::write(path, body)
}
