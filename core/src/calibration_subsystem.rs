//! Confidence calibration.
//!
//! For each ranked cluster the calibrator classifies it into a
//! PatternType, runs the ordered rule cascade over that type's
//! history, applies staleness decay and the confidence floor, and
//! writes the outcome back to the history store. Every write is a
//! repository `update`; nothing is saved from the snapshot loaded at
//! the start of the run.
//!
//! CASCADE (fixed order, first terminal rule wins):
//!   1. fresh_pattern:     ≤2 prior occurrences, base = 0.80, stop.
//!   2. stale_reset:       last seen >48h before as_of, base = 1.0, stop.
//!   3. accuracy_modifier: scale the running modifier by accuracy band.
//!   4. consecutive_miss:  penalise a miss streak on top of rule 3.
//!
//! Decay and floor are applied after the cascade and never feed back
//! into the persisted modifier.

use crate::{
    clock::RunClock,
    clustering_subsystem::{ClusterKey, FailureCluster},
    config::{CalibrationConfig, PipelineConfig},
    error::{PipelineError, PipelineResult},
    pattern_history::{classify, Outcome, PatternHistory, PatternHistoryRepository},
    types::PatternType,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleId {
    FreshPattern,
    StaleReset,
    AccuracyModifier,
    ConsecutiveMiss,
}

impl RuleId {
    pub fn label(&self) -> &'static str {
        match self {
            RuleId::FreshPattern => "fresh_pattern",
            RuleId::StaleReset => "stale_reset",
            RuleId::AccuracyModifier => "accuracy_modifier",
            RuleId::ConsecutiveMiss => "consecutive_miss",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "fresh_pattern" => Some(RuleId::FreshPattern),
            "stale_reset" => Some(RuleId::StaleReset),
            "accuracy_modifier" => Some(RuleId::AccuracyModifier),
            "consecutive_miss" => Some(RuleId::ConsecutiveMiss),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuleVerdict {
    NotApplicable,
    Applied {
        modifier: f64,
        note: String,
        /// Skip every later rule.
        terminal: bool,
    },
}

pub struct RuleContext<'a> {
    pub history: &'a PatternHistory,
    pub clock: &'a RunClock,
    pub cfg: &'a CalibrationConfig,
}

/// One step of the cascade. `modifier` is the running value left by
/// the rules before it.
pub trait CalibrationRule {
    fn id(&self) -> RuleId;
    fn evaluate(&self, ctx: &RuleContext<'_>, modifier: f64) -> RuleVerdict;
}

pub struct FreshPatternRule;

impl CalibrationRule for FreshPatternRule {
    fn id(&self) -> RuleId {
        RuleId::FreshPattern
    }

    fn evaluate(&self, ctx: &RuleContext<'_>, _modifier: f64) -> RuleVerdict {
        let seen = ctx.history.total_occurrences;
        if seen > ctx.cfg.fresh_pattern_max_occurrences {
            return RuleVerdict::NotApplicable;
        }
        RuleVerdict::Applied {
            modifier: ctx.cfg.fresh_pattern_modifier,
            note: format!(
                "Fresh pattern: only {seen} prior occurrence(s), base modifier set to {:.2}",
                ctx.cfg.fresh_pattern_modifier
            ),
            terminal: true,
        }
    }
}

pub struct StaleResetRule;

impl CalibrationRule for StaleResetRule {
    fn id(&self) -> RuleId {
        RuleId::StaleReset
    }

    fn evaluate(&self, ctx: &RuleContext<'_>, _modifier: f64) -> RuleVerdict {
        match ctx.history.last_seen {
            Some(last) if ctx.clock.is_older_than(last, ctx.cfg.stale_reset_hours) => {
                let hours = (ctx.clock.as_of - last).num_hours();
                RuleVerdict::Applied {
                    modifier: 1.0,
                    note: format!(
                        "Stale history: last seen {hours}h ago (> {}h), base modifier reset to 1.00",
                        ctx.cfg.stale_reset_hours
                    ),
                    terminal: true,
                }
            }
            _ => RuleVerdict::NotApplicable,
        }
    }
}

pub struct AccuracyRule;

impl AccuracyRule {
    pub fn factor(accuracy: f64) -> f64 {
        if accuracy >= 0.85 {
            1.0
        } else if accuracy >= 0.70 {
            0.92
        } else if accuracy >= 0.50 {
            0.80
        } else {
            0.65
        }
    }
}

impl CalibrationRule for AccuracyRule {
    fn id(&self) -> RuleId {
        RuleId::AccuracyModifier
    }

    fn evaluate(&self, ctx: &RuleContext<'_>, modifier: f64) -> RuleVerdict {
        let Some(accuracy) = ctx.history.accuracy() else {
            return RuleVerdict::NotApplicable;
        };
        let factor = Self::factor(accuracy);
        RuleVerdict::Applied {
            modifier: modifier * factor,
            note: format!(
                "Accuracy {:.0}% over {} graded predictions: ×{factor:.2}",
                accuracy * 100.0,
                ctx.history.graded_predictions()
            ),
            terminal: false,
        }
    }
}

pub struct ConsecutiveMissRule;

impl CalibrationRule for ConsecutiveMissRule {
    fn id(&self) -> RuleId {
        RuleId::ConsecutiveMiss
    }

    fn evaluate(&self, ctx: &RuleContext<'_>, modifier: f64) -> RuleVerdict {
        let (factor, note) = match (ctx.history.last_outcome, ctx.history.prior_outcome) {
            (Some(Outcome::Miss), Some(Outcome::Miss)) => (0.70, "Two consecutive misses: ×0.70"),
            (Some(Outcome::Miss), _) => (0.88, "Most recent prediction missed: ×0.88"),
            _ => return RuleVerdict::NotApplicable,
        };
        RuleVerdict::Applied {
            modifier: modifier * factor,
            note: note.to_string(),
            terminal: false,
        }
    }
}

pub fn default_cascade() -> Vec<Box<dyn CalibrationRule>> {
    vec![
        Box::new(FreshPatternRule),
        Box::new(StaleResetRule),
        Box::new(AccuracyRule),
        Box::new(ConsecutiveMissRule),
    ]
}

/// Decay by minutes since the pattern was first detected in this run.
pub fn staleness_decay(minutes: i64) -> f64 {
    match minutes {
        m if m <= 15 => 1.0,
        m if m <= 30 => 0.95,
        m if m <= 60 => 0.85,
        m if m <= 120 => 0.70,
        _ => 0.55,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CascadeResult {
    pub applied: Vec<RuleId>,
    /// Rules skipped because a terminal rule fired first.
    pub overridden: Vec<RuleId>,
    pub modifier: f64,
    pub notes: Vec<String>,
}

/// Run `rules` in order starting from `start`.
pub fn run_cascade(
    rules: &[Box<dyn CalibrationRule>],
    ctx: &RuleContext<'_>,
    start: f64,
) -> CascadeResult {
    let mut result = CascadeResult {
        applied: Vec::new(),
        overridden: Vec::new(),
        modifier: start,
        notes: Vec::new(),
    };
    let mut iter = rules.iter();
    while let Some(rule) = iter.next() {
        match rule.evaluate(ctx, result.modifier) {
            RuleVerdict::NotApplicable => {}
            RuleVerdict::Applied { modifier, note, terminal } => {
                result.applied.push(rule.id());
                result.modifier = modifier;
                result.notes.push(note);
                if terminal {
                    result.overridden.extend(iter.by_ref().map(|r| r.id()));
                    break;
                }
            }
        }
    }
    result
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub cluster: ClusterKey,
    pub pattern_type: PatternType,
    pub rules_applied: Vec<RuleId>,
    pub rules_overridden: Vec<RuleId>,
    pub base_modifier_before: f64,
    pub base_modifier_after: f64,
    pub minutes_since_detection: i64,
    pub staleness_decay: f64,
    pub confidence_baseline: f64,
    pub floor_hit: bool,
    pub needs_rescan: bool,
    pub reasoning: Vec<String>,
    /// Advisory text for the proposer. Not binding.
    pub briefing: String,
}

pub struct ConfidenceCalibrator<'a> {
    config: &'a PipelineConfig,
    repo: &'a dyn PatternHistoryRepository,
    histories: BTreeMap<PatternType, PatternHistory>,
    rules: Vec<Box<dyn CalibrationRule>>,
}

impl<'a> ConfidenceCalibrator<'a> {
    /// Load every history record up front. A store that cannot be
    /// read fails here; the calibrator never guesses a neutral state.
    pub fn load(
        config: &'a PipelineConfig,
        repo: &'a dyn PatternHistoryRepository,
    ) -> PipelineResult<Self> {
        let histories = repo.load_all()?;
        for h in histories.values() {
            h.check_integrity()?;
        }
        log::debug!("Loaded {} pattern history records", histories.len());
        Ok(Self {
            config,
            repo,
            histories,
            rules: default_cascade(),
        })
    }

    pub fn history(&self, pattern_type: PatternType) -> Option<&PatternHistory> {
        self.histories.get(&pattern_type)
    }

    pub fn histories(&self) -> &BTreeMap<PatternType, PatternHistory> {
        &self.histories
    }

    pub fn classify(&self, cluster: &FailureCluster) -> PatternType {
        classify(cluster, &self.config.classification)
    }

    /// Calibrate one cluster. The cascade reads the stored record and
    /// the update is written back in the same repository `update`, so a
    /// concurrent run cannot slip a change in between.
    pub fn calibrate(
        &mut self,
        cluster: &FailureCluster,
        clock: &RunClock,
    ) -> PipelineResult<Calibration> {
        let config = self.config;
        let cfg = &config.calibration;
        let pattern_type = self.classify(cluster);
        let minutes = clock.minutes_since(cluster.first_failure_at);
        let decay = staleness_decay(minutes);
        let rules = &self.rules;

        let mut computed = None;
        let updated = self.repo.update(pattern_type, &mut |history: &mut PatternHistory| {
            let before = history.confidence_modifier;
            let cascade = run_cascade(rules, &RuleContext { history: &*history, clock, cfg }, before);
            let raw = cascade.modifier * decay;
            let baseline = raw.max(cfg.confidence_floor);
            let needs_rescan =
                decay <= cfg.rescan_decay_threshold || baseline <= cfg.rescan_baseline_threshold;
            let briefing = briefing(history, pattern_type, &cascade, baseline, needs_rescan);

            history.total_occurrences += 1;
            history.last_seen = Some(match history.last_seen {
                Some(prev) if prev > clock.as_of => prev,
                _ => clock.as_of,
            });
            history.confidence_modifier = cascade.modifier;
            history.append_adjustment(clock.as_of, before, cascade.modifier, cascade.applied.clone());
            computed = Some((before, cascade, raw, baseline, needs_rescan, briefing));
        })?;
        self.histories.insert(pattern_type, updated);

        let Some((before, cascade, raw, baseline, needs_rescan, briefing)) = computed else {
            return Err(PipelineError::HistoryCorrupt {
                pattern_type: pattern_type.label().to_string(),
                detail: "repository returned without applying the calibration".into(),
            });
        };
        let floor_hit = raw < cfg.confidence_floor;

        let mut reasoning = cascade.notes.clone();
        reasoning.push(format!("Staleness: {minutes} min since first detection, decay ×{decay:.2}"));
        if floor_hit {
            reasoning.push(format!(
                "Baseline {raw:.2} clamped to floor {:.2}",
                cfg.confidence_floor
            ));
        }

        log::debug!(
            "Calibrated {} as {}: rules={:?} base {:.3}→{:.3} decay {:.2} baseline {:.3}",
            cluster.key,
            pattern_type,
            cascade.applied,
            before,
            cascade.modifier,
            decay,
            baseline
        );

        Ok(Calibration {
            cluster: cluster.key,
            pattern_type,
            rules_applied: cascade.applied,
            rules_overridden: cascade.overridden,
            base_modifier_before: before,
            base_modifier_after: cascade.modifier,
            minutes_since_detection: minutes,
            staleness_decay: decay,
            confidence_baseline: baseline,
            floor_hit,
            needs_rescan,
            reasoning,
            briefing,
        })
    }

    /// Grade a past prediction for `pattern_type` and persist it.
    pub fn record_outcome(
        &mut self,
        pattern_type: PatternType,
        outcome: Outcome,
    ) -> PipelineResult<()> {
        let updated = self
            .repo
            .update(pattern_type, &mut |history: &mut PatternHistory| history.record_outcome(outcome))?;
        self.histories.insert(pattern_type, updated);
        log::debug!("Recorded {} for {pattern_type}", outcome.label());
        Ok(())
    }
}

fn briefing(
    history: &PatternHistory,
    pattern_type: PatternType,
    cascade: &CascadeResult,
    baseline: f64,
    needs_rescan: bool,
) -> String {
    let record = match history.accuracy() {
        Some(acc) => format!(
            "{:.0}% accurate ({}/{})",
            acc * 100.0,
            history.correct_predictions,
            history.graded_predictions()
        ),
        None => "no graded predictions yet".to_string(),
    };
    let stance = match cascade.applied.first() {
        Some(RuleId::FreshPattern) => "new pattern, treat with caution",
        Some(RuleId::StaleReset) => "history is stale, judged on current evidence",
        _ if cascade.applied.contains(&RuleId::ConsecutiveMiss) => "recent predictions missed",
        _ => "established track record",
    };
    let mut text = format!(
        "{pattern_type}: seen {} time(s) before, {record}; {stance}. Baseline confidence {baseline:.2}",
        history.total_occurrences
    );
    if needs_rescan {
        text.push_str(" (re-examine before trusting)");
    }
    text
}
