//! Per-run report.
//!
//! Always produced, including for runs that found nothing. The report
//! is serialized whole into the run_report table.

use crate::{
    calibration_subsystem::Calibration,
    execution::ExecutionOutcome,
    metrics_subsystem::PerformanceMetrics,
    safety_gate_subsystem::SafetyOverride,
    transaction::SkippedRecord,
    types::RunId,
    validation_subsystem::Rejection,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// No cluster reached the significance threshold.
    NoSignificantPatterns,
    /// Patterns were found but nothing survived validation and the gate.
    NoApprovedDecisions,
    Completed,
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::NoSignificantPatterns => "no_significant_patterns",
            RunOutcome::NoApprovedDecisions => "no_approved_decisions",
            RunOutcome::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub pattern: String,
    pub action: String,
    pub outcome: Option<ExecutionOutcome>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub as_of: DateTime<Utc>,
    pub outcome: RunOutcome,

    pub transactions_processed: usize,
    pub transactions_accepted: usize,
    pub transactions_skipped: usize,
    pub failures: usize,
    pub clusters_found: usize,
    pub clusters_analysed: usize,

    pub decisions_proposed: usize,
    pub decisions_validated: usize,
    pub decisions_rejected: usize,
    pub decisions_approved: usize,
    pub decisions_refused: usize,
    pub executions_failed: usize,

    pub skipped_records: Vec<SkippedRecord>,
    pub rejections: Vec<Rejection>,
    pub overrides: Vec<SafetyOverride>,
    /// Sum of capital kept by safety refusals.
    pub capital_preserved: f64,
    pub calibrations: Vec<Calibration>,
    pub executions: Vec<ExecutionRecord>,
    pub metrics: PerformanceMetrics,
}

impl RunReport {
    pub fn summary(&self) -> String {
        format!(
            "{}: {} transactions ({} skipped), {} clusters, {} proposed / {} validated / {} approved / {} refused, net ₹{:.2}, ₹{:.2} preserved",
            self.outcome.label(),
            self.transactions_processed,
            self.transactions_skipped,
            self.clusters_analysed,
            self.decisions_proposed,
            self.decisions_validated,
            self.decisions_approved,
            self.decisions_refused,
            self.metrics.net_profit,
            self.capital_preserved
        )
    }
}
