//! Per-pattern-type performance history.
//!
//! One record per PatternType, created on first encounter with a
//! neutral modifier of 1.0 and never deleted. The record survives
//! across runs through a PatternHistoryRepository; the storage
//! technology behind the trait is swappable without touching the
//! calibrator.

use crate::{
    calibration_subsystem::RuleId,
    clustering_subsystem::FailureCluster,
    config::ClassificationConfig,
    error::{PipelineError, PipelineResult},
    types::{AmountBucket, PatternType},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Hit,
    Miss,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Hit => "hit",
            Outcome::Miss => "miss",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "hit" => Some(Outcome::Hit),
            "miss" => Some(Outcome::Miss),
            _ => None,
        }
    }
}

/// One calibration's effect on a history record. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentLogEntry {
    /// Position in the record's log, starting at 0.
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub previous_modifier: f64,
    pub new_modifier: f64,
    pub rules_fired: Vec<RuleId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternHistory {
    pub pattern_type: PatternType,
    pub total_occurrences: u64,
    pub correct_predictions: u64,
    pub incorrect_predictions: u64,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_outcome: Option<Outcome>,
    /// The outcome before `last_outcome`.
    pub prior_outcome: Option<Outcome>,
    pub confidence_modifier: f64,
    pub adjustments: Vec<AdjustmentLogEntry>,
}

impl PatternHistory {
    pub fn new(pattern_type: PatternType) -> Self {
        Self {
            pattern_type,
            total_occurrences: 0,
            correct_predictions: 0,
            incorrect_predictions: 0,
            last_seen: None,
            last_outcome: None,
            prior_outcome: None,
            confidence_modifier: 1.0,
            adjustments: Vec::new(),
        }
    }

    pub fn graded_predictions(&self) -> u64 {
        self.correct_predictions + self.incorrect_predictions
    }

    /// None until at least one outcome has been recorded.
    pub fn accuracy(&self) -> Option<f64> {
        match self.graded_predictions() {
            0 => None,
            n => Some(self.correct_predictions as f64 / n as f64),
        }
    }

    pub fn record_outcome(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Hit => self.correct_predictions += 1,
            Outcome::Miss => self.incorrect_predictions += 1,
        }
        self.prior_outcome = self.last_outcome;
        self.last_outcome = Some(outcome);
    }

    pub fn append_adjustment(
        &mut self,
        at: DateTime<Utc>,
        previous_modifier: f64,
        new_modifier: f64,
        rules_fired: Vec<RuleId>,
    ) {
        let seq = self.adjustments.len() as u64;
        self.adjustments.push(AdjustmentLogEntry {
            seq,
            at,
            previous_modifier,
            new_modifier,
            rules_fired,
        });
    }

    /// Reject records a loader should not trust.
    pub fn check_integrity(&self) -> PipelineResult<()> {
        let corrupt = |detail: String| PipelineError::HistoryCorrupt {
            pattern_type: self.pattern_type.label().to_string(),
            detail,
        };
        if !self.confidence_modifier.is_finite() || self.confidence_modifier < 0.0 {
            return Err(corrupt(format!("modifier {} is not a valid factor", self.confidence_modifier)));
        }
        if self.prior_outcome.is_some() && self.last_outcome.is_none() {
            return Err(corrupt("prior outcome recorded without a last outcome".into()));
        }
        for (i, entry) in self.adjustments.iter().enumerate() {
            if entry.seq != i as u64 {
                return Err(corrupt(format!("adjustment log gap at position {i} (seq {})", entry.seq)));
            }
        }
        Ok(())
    }
}

/// Rule-based classification. First match wins, in this fixed order:
/// bank_spike, micro_transaction, vip_anomaly, card_testing,
/// high_risk_payment, payment_failure.
pub fn classify(cluster: &FailureCluster, cfg: &ClassificationConfig) -> PatternType {
    if cluster.failure_rate >= cfg.spike_failure_rate
        && cluster.window_hours() <= cfg.spike_max_window_hours
    {
        return PatternType::BankSpike;
    }
    if cluster.amount_bucket() == AmountBucket::Under100 {
        return PatternType::MicroTransaction;
    }
    if cluster.avg_amount >= cfg.vip_avg_amount {
        return PatternType::VipAnomaly;
    }
    if cluster.count >= cfg.card_testing_min_count
        && cluster.failure_rate >= cfg.card_testing_failure_rate
    {
        return PatternType::CardTesting;
    }
    let text = cluster.describe().to_lowercase();
    if cfg
        .risk_keywords
        .iter()
        .any(|k| !k.is_empty() && text.contains(&k.to_lowercase()))
    {
        return PatternType::HighRiskPayment;
    }
    PatternType::PaymentFailure
}

/// Durable mapping from pattern type to its history record.
///
/// `save_all` must be atomic: either every record is written or none.
/// `update` is the read-modify-write path the calibrator uses; stores
/// shared between writers must read, apply and write under one lock.
pub trait PatternHistoryRepository {
    fn load_all(&self) -> PipelineResult<BTreeMap<PatternType, PatternHistory>>;

    fn save_all(&self, histories: &BTreeMap<PatternType, PatternHistory>) -> PipelineResult<()>;

    /// Persist a single record. The default reloads and rewrites
    /// everything; stores with per-key writes should override it.
    fn save_one(&self, history: &PatternHistory) -> PipelineResult<()> {
        let mut all = self.load_all()?;
        all.insert(history.pattern_type, history.clone());
        self.save_all(&all)
    }

    /// Apply `change` to the stored record for `pattern_type` (a fresh
    /// record if none exists) and write it back. Returns the record as
    /// written.
    fn update(
        &self,
        pattern_type: PatternType,
        change: &mut dyn FnMut(&mut PatternHistory),
    ) -> PipelineResult<PatternHistory> {
        let mut history = self
            .load_all()?
            .remove(&pattern_type)
            .unwrap_or_else(|| PatternHistory::new(pattern_type));
        change(&mut history);
        self.save_one(&history)?;
        Ok(history)
    }
}

/// Process-local repository. Used in tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryHistoryRepository {
    records: Mutex<BTreeMap<PatternType, PatternHistory>>,
}

impl InMemoryHistoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = PatternHistory>,
    {
        Self {
            records: Mutex::new(records.into_iter().map(|h| (h.pattern_type, h)).collect()),
        }
    }

    fn lock(&self) -> PipelineResult<std::sync::MutexGuard<'_, BTreeMap<PatternType, PatternHistory>>> {
        self.records
            .lock()
            .map_err(|_| PipelineError::Other(anyhow::anyhow!("history lock poisoned")))
    }
}

impl PatternHistoryRepository for InMemoryHistoryRepository {
    fn load_all(&self) -> PipelineResult<BTreeMap<PatternType, PatternHistory>> {
        Ok(self.lock()?.clone())
    }

    fn save_all(&self, histories: &BTreeMap<PatternType, PatternHistory>) -> PipelineResult<()> {
        *self.lock()? = histories.clone();
        Ok(())
    }

    fn save_one(&self, history: &PatternHistory) -> PipelineResult<()> {
        self.lock()?.insert(history.pattern_type, history.clone());
        Ok(())
    }

    fn update(
        &self,
        pattern_type: PatternType,
        change: &mut dyn FnMut(&mut PatternHistory),
    ) -> PipelineResult<PatternHistory> {
        let mut records = self.lock()?;
        let history = records
            .entry(pattern_type)
            .or_insert_with(|| PatternHistory::new(pattern_type));
        change(history);
        Ok(history.clone())
    }
}

/// Flat JSON document on disk. Writes go to a sibling temp file and
/// are renamed into place, so a crash mid-write leaves the previous
/// document intact. Single writer only: there is no file lock.
#[derive(Debug, Clone)]
pub struct JsonFileHistoryRepository {
    path: std::path::PathBuf,
}

impl JsonFileHistoryRepository {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PatternHistoryRepository for JsonFileHistoryRepository {
    fn load_all(&self) -> PipelineResult<BTreeMap<PatternType, PatternHistory>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        let records: Vec<PatternHistory> = serde_json::from_str(&content)?;
        let mut out = BTreeMap::new();
        for record in records {
            record.check_integrity()?;
            out.insert(record.pattern_type, record);
        }
        Ok(out)
    }

    fn save_all(&self, histories: &BTreeMap<PatternType, PatternHistory>) -> PipelineResult<()> {
        let records: Vec<&PatternHistory> = histories.values().collect();
        let json = serde_json::to_string_pretty(&records)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
