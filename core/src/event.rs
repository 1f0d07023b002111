//! The run audit log.
//!
//! RULE: every stage records what it did as a PipelineEvent, and every
//! event is appended to the event_log table in emission order. A run
//! can be reconstructed from its log without the text logs.

use crate::{
    calibration_subsystem::RuleId,
    decision::DecisionDefect,
    execution::ExecutionOutcome,
    pattern_history::Outcome,
    report::RunOutcome,
    transaction::RecordDefect,
    types::{PatternType, RunId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Variants are only ever appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    // ── Engine ─────────────────────────────────────
    RunInitialized {
        run_id: RunId,
        seed: Option<u64>,
        as_of: DateTime<Utc>,
    },
    RunCompleted {
        outcome: RunOutcome,
    },

    // ── Ingestion ──────────────────────────────────
    FeedIngested {
        accepted: usize,
        skipped: usize,
    },
    RecordSkipped {
        index: usize,
        transaction_id: Option<String>,
        defects: Vec<RecordDefect>,
    },

    // ── Clustering ─────────────────────────────────
    ClustersRanked {
        found: usize,
        kept: Vec<String>,
    },
    NoSignificantPatterns,

    // ── Calibration ────────────────────────────────
    ClusterCalibrated {
        cluster: String,
        pattern_type: PatternType,
        rules_applied: Vec<RuleId>,
        rules_overridden: Vec<RuleId>,
        base_modifier_before: f64,
        base_modifier_after: f64,
        staleness_decay: f64,
        confidence_baseline: f64,
        floor_hit: bool,
        needs_rescan: bool,
    },

    // ── Proposal and validation ────────────────────
    DecisionsProposed {
        proposer: String,
        count: usize,
    },
    ProposerFailed {
        proposer: String,
        error: String,
    },
    DecisionRejected {
        index: usize,
        pattern: Option<String>,
        defects: Vec<DecisionDefect>,
    },

    // ── Safety gate ────────────────────────────────
    DecisionApproved {
        pattern: String,
        action: String,
        confidence: f64,
    },
    SafetyOverrideIssued {
        pattern: String,
        action: String,
        reason: String,
        capital_preserved: f64,
    },

    // ── Execution ──────────────────────────────────
    DecisionExecuted {
        pattern: String,
        executor: String,
        outcome: ExecutionOutcome,
    },
    ExecutionFailed {
        pattern: String,
        action: String,
        error: String,
    },
    OutcomeRecorded {
        pattern_type: PatternType,
        outcome: Outcome,
    },

    // ── Metrics ────────────────────────────────────
    MetricsComputed {
        total_cost: f64,
        total_revenue_saved: f64,
        net_profit: f64,
    },
}

impl PipelineEvent {
    /// Stable name for the event_type column.
    pub fn type_name(&self) -> &'static str {
        match self {
            PipelineEvent::RunInitialized { .. } => "run_initialized",
            PipelineEvent::RunCompleted { .. } => "run_completed",
            PipelineEvent::FeedIngested { .. } => "feed_ingested",
            PipelineEvent::RecordSkipped { .. } => "record_skipped",
            PipelineEvent::ClustersRanked { .. } => "clusters_ranked",
            PipelineEvent::NoSignificantPatterns => "no_significant_patterns",
            PipelineEvent::ClusterCalibrated { .. } => "cluster_calibrated",
            PipelineEvent::DecisionsProposed { .. } => "decisions_proposed",
            PipelineEvent::ProposerFailed { .. } => "proposer_failed",
            PipelineEvent::DecisionRejected { .. } => "decision_rejected",
            PipelineEvent::DecisionApproved { .. } => "decision_approved",
            PipelineEvent::SafetyOverrideIssued { .. } => "safety_override_issued",
            PipelineEvent::DecisionExecuted { .. } => "decision_executed",
            PipelineEvent::ExecutionFailed { .. } => "execution_failed",
            PipelineEvent::OutcomeRecorded { .. } => "outcome_recorded",
            PipelineEvent::MetricsComputed { .. } => "metrics_computed",
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub run_id: RunId,
    /// Emission order within the run, from 0.
    pub seq: u64,
    pub stage: String,
    pub event_type: String,
    pub payload: String, // JSON-serialized PipelineEvent
}
