//! Safety gate: the last check before execution.
//!
//! CHECKS (in order, first failure refuses):
//!   1. confidence at or above the configured threshold
//!   2. no REROUTE whose structured net or cost narrative reports a loss
//!   3. affected volume within the safety ceiling
//!
//! A refusal is an expected outcome. It always yields a SafetyOverride
//! carrying the capital the refusal kept in the bank.

use crate::{
    config::{EconomicsConfig, SafetyConfig},
    decision::{Action, CandidateDecision},
};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RefusalReason {
    ConfidenceBelowThreshold { confidence: f64, threshold: f64 },
    RerouteWithNegativeNet { net: Option<f64> },
    VolumeAboveCeiling { volume: u64, ceiling: u64 },
}

impl fmt::Display for RefusalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefusalReason::ConfidenceBelowThreshold { confidence, threshold } => write!(
                f,
                "confidence below threshold ({:.0}% < {:.0}%)",
                confidence * 100.0,
                threshold * 100.0
            ),
            RefusalReason::RerouteWithNegativeNet { net: Some(net) } => {
                write!(f, "REROUTE with negative net benefit (₹{net:.2})")
            }
            RefusalReason::RerouteWithNegativeNet { net: None } => {
                f.write_str("REROUTE with negative net benefit")
            }
            RefusalReason::VolumeAboveCeiling { volume, ceiling } => {
                write!(f, "affected volume {volume} exceeds safety ceiling {ceiling}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyOverride {
    pub decision: CandidateDecision,
    pub reason: RefusalReason,
    pub affected_volume: u64,
    /// volume × per-transaction intervention cost.
    pub capital_preserved: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateVerdict {
    Approved,
    Refused(RefusalReason),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateReport {
    pub approved: Vec<CandidateDecision>,
    pub overrides: Vec<SafetyOverride>,
}

impl GateReport {
    pub fn capital_preserved(&self) -> f64 {
        self.overrides.iter().map(|o| o.capital_preserved).sum()
    }
}

pub struct SafetyGate<'a> {
    safety: &'a SafetyConfig,
    economics: &'a EconomicsConfig,
}

impl<'a> SafetyGate<'a> {
    pub fn new(safety: &'a SafetyConfig, economics: &'a EconomicsConfig) -> Self {
        Self { safety, economics }
    }

    pub fn check(&self, decision: &CandidateDecision) -> GateVerdict {
        if decision.confidence() < self.safety.confidence_threshold {
            return GateVerdict::Refused(RefusalReason::ConfidenceBelowThreshold {
                confidence: decision.confidence(),
                threshold: self.safety.confidence_threshold,
            });
        }
        if decision.action() == Action::Reroute && decision.encodes_negative_net() {
            return GateVerdict::Refused(RefusalReason::RerouteWithNegativeNet {
                net: decision.negative_net(),
            });
        }
        if decision.affected_volume() > self.safety.max_affected_volume {
            return GateVerdict::Refused(RefusalReason::VolumeAboveCeiling {
                volume: decision.affected_volume(),
                ceiling: self.safety.max_affected_volume,
            });
        }
        GateVerdict::Approved
    }

    /// Split validated decisions into approved and refused, keeping order.
    pub fn screen(&self, decisions: Vec<CandidateDecision>) -> GateReport {
        let mut report = GateReport::default();
        for decision in decisions {
            match self.check(&decision) {
                GateVerdict::Approved => report.approved.push(decision),
                GateVerdict::Refused(reason) => {
                    let volume = decision.affected_volume();
                    let capital_preserved = volume as f64 * self.economics.intervention_cost;
                    log::warn!(
                        "Safety override on {} for '{}': {reason} (₹{capital_preserved:.0} preserved)",
                        decision.action(),
                        decision.pattern_detected()
                    );
                    report.overrides.push(SafetyOverride {
                        decision,
                        reason,
                        affected_volume: volume,
                        capital_preserved,
                    });
                }
            }
        }
        log::info!(
            "Safety gate approved {} and refused {} decisions",
            report.approved.len(),
            report.overrides.len()
        );
        report
    }
}
