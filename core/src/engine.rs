//! The analysis engine: one run, start to finish.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Ingest       raw records → transactions, bad records skipped
//!   2. Cluster      failures grouped by (bank, card type, amount bucket)
//!   3. Rank         top clusters by count × avg amount
//!   4. Calibrate    cascade over pattern history, history updated
//!   5. Propose      untrusted proposer returns candidate decisions
//!   6. Validate     structural and consistency checks, reject or keep
//!   7. Gate         safety thresholds, refuse or approve
//!   8. Execute      approved decisions, reroute outcomes fed back
//!   9. Measure      metrics recomputed from cluster data
//!
//! RULES:
//!   - Every stage records its work in the event log.
//!   - Bad records, rejected decisions, refusals and a failing proposer
//!     are outcomes, not errors. Only persistence failures abort a run.
//!   - No stage reads the wall clock; time comes from the RunClock.

use crate::{
    calibration_subsystem::ConfidenceCalibrator,
    clock::RunClock,
    clustering_subsystem::{cluster_failures, rank_clusters, ClusterKey, FailureCluster},
    config::PipelineConfig,
    decision::{Action, CandidateDecision},
    error::{PipelineError, PipelineResult},
    event::{EventLogEntry, PipelineEvent},
    execution::{ExecutionOrder, Executor},
    metrics_subsystem::{match_cluster, FeedTotals, MetricsAggregator},
    pattern_history::{Outcome, PatternHistory, PatternHistoryRepository},
    proposer::{DecisionProposer, ProposalInput},
    report::{ExecutionRecord, RunOutcome, RunReport},
    safety_gate_subsystem::SafetyGate,
    store::PipelineStore,
    transaction::{ingest, RawTransaction, Transaction},
    types::{PatternType, RunId},
    validation_subsystem::DecisionValidator,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Fresh run identifier.
pub fn new_run_id() -> RunId {
    format!("run-{}", uuid::Uuid::new_v4())
}

/// The collaborators a run talks to. All of them sit behind traits.
pub struct Collaborators<'c> {
    pub history: &'c dyn PatternHistoryRepository,
    pub proposer: &'c mut dyn DecisionProposer,
    pub executor: &'c mut dyn Executor,
}

pub struct AnalysisEngine<'a> {
    pub run_id: RunId,
    config: &'a PipelineConfig,
    store: &'a PipelineStore,
    next_seq: u64,
}

impl<'a> AnalysisEngine<'a> {
    /// The run must already be registered with `store.insert_run`.
    pub fn new(run_id: RunId, config: &'a PipelineConfig, store: &'a PipelineStore) -> Self {
        Self {
            run_id,
            config,
            store,
            next_seq: 0,
        }
    }

    /// Execute one analysis run over `records`.
    ///
    /// `as_of` pins the run clock; without it the clock is the newest
    /// accepted timestamp in the feed.
    pub fn run(
        &mut self,
        records: Vec<RawTransaction>,
        as_of: Option<DateTime<Utc>>,
        collaborators: Collaborators<'_>,
    ) -> PipelineResult<RunReport> {
        if !self.store.run_exists(&self.run_id)? {
            return Err(PipelineError::RunNotInitialized);
        }
        self.config.validate()?;
        let Collaborators { history, proposer, executor } = collaborators;

        // ── 1. Ingest ──────────────────────────────────────────
        let ingested = ingest(records);
        let clock = match as_of {
            Some(t) => RunClock::at(t),
            None => RunClock::from_feed(ingested.accepted.iter().map(|t| t.timestamp), DateTime::<Utc>::default()),
        };
        self.store.set_run_as_of(&self.run_id, clock.as_of)?;
        let seed = self.store.run_seed(&self.run_id)?;
        self.emit("engine", PipelineEvent::RunInitialized {
            run_id: self.run_id.clone(),
            seed,
            as_of: clock.as_of,
        })?;
        self.emit("ingest", PipelineEvent::FeedIngested {
            accepted: ingested.accepted.len(),
            skipped: ingested.skipped.len(),
        })?;
        for skipped in &ingested.skipped {
            self.emit("ingest", PipelineEvent::RecordSkipped {
                index: skipped.index,
                transaction_id: skipped.transaction_id.clone(),
                defects: skipped.defects.clone(),
            })?;
        }
        let transactions = &ingested.accepted;
        let totals = FeedTotals {
            transactions: transactions.len(),
            failures: transactions.iter().filter(|t| t.is_failure()).count(),
        };
        log::info!(
            "Run {}: ingested {} transactions ({} skipped, {} failures)",
            self.run_id,
            totals.transactions,
            ingested.skipped.len(),
            totals.failures
        );

        // ── 2-3. Cluster and rank ──────────────────────────────
        let found = cluster_failures(transactions, &self.config.clustering);
        let clusters_found = found.len();
        let ranked = rank_clusters(found, &self.config.clustering);
        self.emit("cluster", PipelineEvent::ClustersRanked {
            found: clusters_found,
            kept: ranked.iter().map(|c| c.key.to_string()).collect(),
        })?;

        let mut report = RunReport {
            run_id: self.run_id.clone(),
            as_of: clock.as_of,
            outcome: RunOutcome::NoSignificantPatterns,
            transactions_processed: ingested.processed(),
            transactions_accepted: totals.transactions,
            transactions_skipped: ingested.skipped.len(),
            failures: totals.failures,
            clusters_found,
            clusters_analysed: ranked.len(),
            decisions_proposed: 0,
            decisions_validated: 0,
            decisions_rejected: 0,
            decisions_approved: 0,
            decisions_refused: 0,
            executions_failed: 0,
            skipped_records: ingested.skipped.clone(),
            rejections: Vec::new(),
            overrides: Vec::new(),
            capital_preserved: 0.0,
            calibrations: Vec::new(),
            executions: Vec::new(),
            metrics: MetricsAggregator::new(&self.config.economics).aggregate(&[], &ranked, totals, None),
        };

        // Load history before the early return so a corrupt store
        // fails every run, not only runs that find patterns.
        let mut calibrator = ConfidenceCalibrator::load(self.config, history)?;

        if ranked.is_empty() {
            log::info!("Run {}: no significant patterns", self.run_id);
            self.emit("cluster", PipelineEvent::NoSignificantPatterns)?;
            return self.finish(report);
        }

        // ── 4. Calibrate ───────────────────────────────────────
        let mut calibrations = Vec::with_capacity(ranked.len());
        for cluster in &ranked {
            let calibration = calibrator.calibrate(cluster, &clock)?;
            self.emit("calibrate", PipelineEvent::ClusterCalibrated {
                cluster: cluster.key.to_string(),
                pattern_type: calibration.pattern_type,
                rules_applied: calibration.rules_applied.clone(),
                rules_overridden: calibration.rules_overridden.clone(),
                base_modifier_before: calibration.base_modifier_before,
                base_modifier_after: calibration.base_modifier_after,
                staleness_decay: calibration.staleness_decay,
                confidence_baseline: calibration.confidence_baseline,
                floor_hit: calibration.floor_hit,
                needs_rescan: calibration.needs_rescan,
            })?;
            calibrations.push(calibration);
        }

        // ── 5. Propose ─────────────────────────────────────────
        let inputs: Vec<ProposalInput<'_>> = ranked
            .iter()
            .zip(&calibrations)
            .map(|(cluster, calibration)| ProposalInput { cluster, calibration })
            .collect();
        let proposals = match proposer.propose(&inputs) {
            Ok(p) => {
                self.emit("propose", PipelineEvent::DecisionsProposed {
                    proposer: proposer.name().to_string(),
                    count: p.len(),
                })?;
                p
            }
            Err(e) => {
                log::warn!("Proposer {} failed: {e}", proposer.name());
                self.emit("propose", PipelineEvent::ProposerFailed {
                    proposer: proposer.name().to_string(),
                    error: e.to_string(),
                })?;
                Vec::new()
            }
        };
        drop(inputs);

        // ── 6. Validate ────────────────────────────────────────
        let validation = DecisionValidator::new(&self.config.validation).validate(proposals);
        report.decisions_proposed = validation.proposed();
        report.decisions_validated = validation.valid.len();
        report.decisions_rejected = validation.rejections.len();
        for rejection in &validation.rejections {
            self.emit("validate", PipelineEvent::DecisionRejected {
                index: rejection.index,
                pattern: rejection.pattern.clone(),
                defects: rejection.defects.clone(),
            })?;
        }
        report.rejections = validation.rejections;

        // ── 7. Gate ────────────────────────────────────────────
        let gate = SafetyGate::new(&self.config.safety, &self.config.economics).screen(validation.valid);
        for refusal in &gate.overrides {
            self.emit("gate", PipelineEvent::SafetyOverrideIssued {
                pattern: refusal.decision.pattern_detected().to_string(),
                action: refusal.decision.action().label().to_string(),
                reason: refusal.reason.to_string(),
                capital_preserved: refusal.capital_preserved,
            })?;
        }
        for decision in &gate.approved {
            self.emit("gate", PipelineEvent::DecisionApproved {
                pattern: decision.pattern_detected().to_string(),
                action: decision.action().label().to_string(),
                confidence: decision.confidence(),
            })?;
        }
        report.decisions_approved = gate.approved.len();
        report.decisions_refused = gate.overrides.len();
        report.capital_preserved = gate.capital_preserved();

        // ── 8. Execute ─────────────────────────────────────────
        let pattern_types: BTreeMap<_, _> =
            calibrations.iter().map(|c| (c.cluster, c.pattern_type)).collect();
        for decision in &gate.approved {
            let record = self.execute_one(decision, &ranked, &pattern_types, executor, &mut calibrator)?;
            if record.error.is_some() {
                report.executions_failed += 1;
            }
            report.executions.push(record);
        }

        // ── 9. Measure ─────────────────────────────────────────
        report.metrics = MetricsAggregator::new(&self.config.economics).aggregate(
            &gate.approved,
            &ranked,
            totals,
            overall_accuracy(calibrator.histories().values()),
        );
        self.emit("metrics", PipelineEvent::MetricsComputed {
            total_cost: report.metrics.total_cost,
            total_revenue_saved: report.metrics.total_revenue_saved,
            net_profit: report.metrics.net_profit,
        })?;

        report.outcome = if gate.approved.is_empty() {
            RunOutcome::NoApprovedDecisions
        } else {
            RunOutcome::Completed
        };
        report.calibrations = calibrations;
        report.overrides = gate.overrides;
        self.finish(report)
    }

    fn execute_one(
        &mut self,
        decision: &CandidateDecision,
        ranked: &[FailureCluster],
        pattern_types: &BTreeMap<ClusterKey, PatternType>,
        executor: &mut dyn Executor,
        calibrator: &mut ConfidenceCalibrator<'_>,
    ) -> PipelineResult<ExecutionRecord> {
        let origin = match_cluster(decision.pattern_detected(), ranked);
        let order = ExecutionOrder {
            decision,
            bank: origin.map(|c| c.bank()),
            volume: origin.map_or(decision.affected_volume(), |c| c.count as u64),
            avg_amount: origin.map_or(decision.avg_amount(), |c| c.avg_amount),
        };
        let pattern = decision.pattern_detected().to_string();
        let action = decision.action().label().to_string();

        match executor.execute(&order) {
            Ok(outcome) => {
                self.emit("execute", PipelineEvent::DecisionExecuted {
                    pattern: pattern.clone(),
                    executor: executor.name().to_string(),
                    outcome: outcome.clone(),
                })?;
                if decision.action() == Action::Reroute {
                    let pattern_type = origin.and_then(|c| pattern_types.get(&c.key).copied());
                    match (pattern_type, outcome.realized_net()) {
                        (Some(pattern_type), Some(net)) => {
                            let graded = if net > 0.0 { Outcome::Hit } else { Outcome::Miss };
                            calibrator.record_outcome(pattern_type, graded)?;
                            self.emit("execute", PipelineEvent::OutcomeRecorded {
                                pattern_type,
                                outcome: graded,
                            })?;
                        }
                        _ => log::debug!("No pattern type for '{pattern}', outcome not graded"),
                    }
                }
                Ok(ExecutionRecord { pattern, action, outcome: Some(outcome), error: None })
            }
            Err(e) => {
                log::warn!("Execution of {action} on '{pattern}' failed: {e}");
                self.emit("execute", PipelineEvent::ExecutionFailed {
                    pattern: pattern.clone(),
                    action: action.clone(),
                    error: e.to_string(),
                })?;
                Ok(ExecutionRecord { pattern, action, outcome: None, error: Some(e.to_string()) })
            }
        }
    }

    /// History is already written per update; only the report is left.
    fn finish(&mut self, report: RunReport) -> PipelineResult<RunReport> {
        self.store.save_run_report(&report)?;
        self.emit("engine", PipelineEvent::RunCompleted { outcome: report.outcome })?;
        log::info!("Run {} finished: {}", self.run_id, report.summary());
        Ok(report)
    }

    /// Query this run's events from the store.
    /// Used by the determinism test and replay tooling.
    pub fn events(&self) -> PipelineResult<Vec<EventLogEntry>> {
        self.store.events_for_run(&self.run_id)
    }

    fn emit(&mut self, stage: &str, event: PipelineEvent) -> PipelineResult<()> {
        let entry = EventLogEntry {
            id: None,
            run_id: self.run_id.clone(),
            seq: self.next_seq,
            stage: stage.to_string(),
            event_type: event.type_name().to_string(),
            payload: serde_json::to_string(&event)?,
        };
        self.store.append_event(&entry)?;
        self.next_seq += 1;
        Ok(())
    }
}

/// Hits over graded predictions, across every pattern type.
pub fn overall_accuracy<'h>(histories: impl IntoIterator<Item = &'h PatternHistory>) -> Option<f64> {
    let (hits, graded) = histories
        .into_iter()
        .fold((0u64, 0u64), |(h, g), p| (h + p.correct_predictions, g + p.graded_predictions()));
    (graded > 0).then(|| hits as f64 / graded as f64)
}

/// Convenience for callers holding typed transactions.
pub fn raw_feed(transactions: &[Transaction]) -> Vec<RawTransaction> {
    transactions.iter().map(RawTransaction::from).collect()
}
