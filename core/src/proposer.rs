//! Decision proposers.
//!
//! The proposer sits outside the trusted core. It receives ranked
//! clusters with their calibration briefings and returns proposals that
//! the validator will check from scratch.
//!
//! ScriptedCouncil is the deterministic stand-in for a reasoning
//! service: a CFO read (net benefit), a CTO read (temporal signal) and
//! a moderator tiebreak, in that order:
//!   1. infrastructure emergency (spike)  → ALERT
//!   2. net benefit below zero            → IGNORE
//!   3. net benefit above zero            → REROUTE
//!   4. otherwise                         → IGNORE

use crate::{
    calibration_subsystem::Calibration,
    clustering_subsystem::FailureCluster,
    config::EconomicsConfig,
    decision::{Action, CostBreakdown, ProposedDecision, RiskCategory, TemporalSignal},
    error::PipelineResult,
    types::{is_infrastructure_error, PatternType},
};

const SPIKE_MAX_WINDOW_HOURS: u32 = 1;
const SPIKE_MIN_FAILURE_RATE: f64 = 0.90;
/// Net benefit above which a reroute is a strong call.
const STRONG_NET_BENEFIT: f64 = 1500.0;

/// One ranked cluster and what calibration made of it.
#[derive(Debug, Clone, Copy)]
pub struct ProposalInput<'a> {
    pub cluster: &'a FailureCluster,
    pub calibration: &'a Calibration,
}

pub trait DecisionProposer {
    fn name(&self) -> &'static str;

    /// Proposals in any order and any number. An `Err` means the
    /// proposer itself failed, not that a proposal was bad.
    fn propose(&mut self, inputs: &[ProposalInput<'_>]) -> PipelineResult<Vec<ProposedDecision>>;
}

/// Replays a fixed batch, whatever the clusters. Used for recorded
/// proposer output and tests.
#[derive(Debug, Clone, Default)]
pub struct CannedProposer {
    batch: Vec<ProposedDecision>,
}

impl CannedProposer {
    pub fn new(batch: Vec<ProposedDecision>) -> Self {
        Self { batch }
    }

    /// Load a JSON array of proposals. Unknown or missing fields are
    /// left for the validator to judge.
    pub fn from_json(json: &str) -> PipelineResult<Self> {
        Ok(Self::new(serde_json::from_str(json)?))
    }
}

impl DecisionProposer for CannedProposer {
    fn name(&self) -> &'static str {
        "canned"
    }

    fn propose(&mut self, _inputs: &[ProposalInput<'_>]) -> PipelineResult<Vec<ProposedDecision>> {
        Ok(self.batch.clone())
    }
}

pub struct ScriptedCouncil<'a> {
    economics: &'a EconomicsConfig,
}

impl<'a> ScriptedCouncil<'a> {
    pub fn new(economics: &'a EconomicsConfig) -> Self {
        Self { economics }
    }

    fn temporal_signal(cluster: &FailureCluster) -> TemporalSignal {
        let infrastructure = !cluster.error_codes.is_empty()
            && cluster.error_codes.iter().all(|c| is_infrastructure_error(c));
        if infrastructure
            && cluster.window_hours() <= SPIKE_MAX_WINDOW_HOURS
            && cluster.failure_rate >= SPIKE_MIN_FAILURE_RATE
        {
            TemporalSignal::SpikeDetected
        } else {
            TemporalSignal::Stable
        }
    }

    fn moderate(signal: TemporalSignal, net: f64) -> Action {
        if signal == TemporalSignal::SpikeDetected {
            Action::Alert
        } else if net < 0.0 {
            Action::Ignore
        } else if net > 0.0 {
            Action::Reroute
        } else {
            Action::Ignore
        }
    }

    fn risk_category(signal: TemporalSignal, pattern_type: PatternType) -> RiskCategory {
        match (signal, pattern_type) {
            (TemporalSignal::SpikeDetected, _) => RiskCategory::ServerOutage,
            (_, PatternType::CardTesting) => RiskCategory::SuspiciousActivity,
            (_, PatternType::HighRiskPayment) => RiskCategory::HighRiskPayment,
            _ => RiskCategory::PaymentFailure,
        }
    }

    fn base_confidence(action: Action, net: f64) -> f64 {
        match action {
            Action::Alert => 0.90,
            Action::Reroute if net >= STRONG_NET_BENEFIT => 0.95,
            Action::Reroute => 0.80,
            Action::Ignore if net < 0.0 => 0.95,
            _ => 0.75,
        }
    }

    fn propose_one(&self, input: &ProposalInput<'_>) -> ProposedDecision {
        let cluster = input.cluster;
        let calibration = input.calibration;
        let volume = cluster.count as f64;
        let per_txn_margin = cluster.avg_amount * self.economics.margin_rate;
        let costs = CostBreakdown::new(
            volume * self.economics.intervention_cost,
            volume * per_txn_margin,
        );

        let signal = Self::temporal_signal(cluster);
        let action = Self::moderate(signal, costs.net);
        let confidence =
            (Self::base_confidence(action, costs.net) * calibration.confidence_baseline * 100.0).round() / 100.0;

        let pattern = format!(
            "{} {} cards in the ₹{} range failing at {:.0}% during {}",
            cluster.bank(),
            cluster.card_type(),
            cluster.amount_bucket(),
            cluster.failure_rate * 100.0,
            cluster.time_window()
        );
        let cost_analysis = format!(
            "Reroute cost: {} ({} × {}). Revenue saved: {} ({} × {} avg margin). Net: {}",
            rupees(costs.intervention_cost),
            cluster.count,
            rupees(self.economics.intervention_cost),
            rupees(costs.recovered_revenue),
            cluster.count,
            rupees(per_txn_margin),
            signed_rupees(costs.net),
        );

        let cfo = if costs.net < 0.0 {
            format!(
                "CFO perspective: paying {} to recover {} per transaction loses {} in total.",
                rupees(self.economics.intervention_cost),
                rupees(per_txn_margin),
                rupees(-costs.net)
            )
        } else {
            format!(
                "CFO perspective: {} net benefit across {} transactions.",
                signed_rupees(costs.net),
                cluster.count
            )
        };
        let cto = match signal {
            TemporalSignal::SpikeDetected => format!(
                "CTO perspective: {} infrastructure failures inside {}, the backup gateway would fail too.",
                cluster.error_codes.join("/"),
                cluster.time_window()
            ),
            _ => format!(
                "CTO perspective: failures steady across {} with {}, reroutable.",
                cluster.time_window(),
                cluster.error_codes.join(", ")
            ),
        };
        let moderator = match action {
            Action::Alert => "Moderator synthesis: infrastructure emergency overrides profit, raise an alert.",
            Action::Reroute => "Moderator synthesis: recovery pays for itself, reroute to the backup provider.",
            _ => "Moderator synthesis: intervention does not pay, preserve the capital.",
        };
        let reasoning = format!(
            "{cfo} {cto} {moderator} Track record: {}",
            calibration.briefing
        );

        ProposedDecision {
            pattern_detected: Some(pattern),
            affected_volume: Some(cluster.count as i64),
            avg_amount: Some((cluster.avg_amount * 100.0).round() / 100.0),
            cost_analysis: Some(cost_analysis),
            costs: Some(costs),
            temporal_signal: Some(signal.label().to_string()),
            decision: Some(action.label().to_string()),
            risk_category: Some(Self::risk_category(signal, calibration.pattern_type).label().to_string()),
            reasoning: Some(reasoning),
            confidence: Some(confidence.clamp(0.0, 1.0)),
        }
    }
}

impl DecisionProposer for ScriptedCouncil<'_> {
    fn name(&self) -> &'static str {
        "scripted_council"
    }

    fn propose(&mut self, inputs: &[ProposalInput<'_>]) -> PipelineResult<Vec<ProposedDecision>> {
        Ok(inputs.iter().map(|i| self.propose_one(i)).collect())
    }
}

/// "₹1,905" style, whole rupees under ₹100 keep two decimals.
pub fn rupees(amount: f64) -> String {
    let magnitude = amount.abs();
    let body = if magnitude < 100.0 && magnitude.fract() != 0.0 {
        format!("{magnitude:.2}")
    } else {
        group_thousands(magnitude.round() as u64)
    };
    if amount < 0.0 {
        format!("-₹{body}")
    } else {
        format!("₹{body}")
    }
}

fn signed_rupees(amount: f64) -> String {
    if amount < 0.0 {
        rupees(amount)
    } else {
        format!("+{}", rupees(amount))
    }
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rupee_formatting() {
        assert_eq!(rupees(1905.0), "₹1,905");
        assert_eq!(rupees(-1797.4), "-₹1,797");
        assert_eq!(rupees(0.85), "₹0.85");
        assert_eq!(rupees(1_234_567.0), "₹1,234,567");
        assert_eq!(signed_rupees(6627.0), "+₹6,627");
    }

    #[test]
    fn moderator_tiebreak_order() {
        assert_eq!(ScriptedCouncil::moderate(TemporalSignal::SpikeDetected, 5000.0), Action::Alert);
        assert_eq!(ScriptedCouncil::moderate(TemporalSignal::Stable, -1.0), Action::Ignore);
        assert_eq!(ScriptedCouncil::moderate(TemporalSignal::Stable, 1.0), Action::Reroute);
        assert_eq!(ScriptedCouncil::moderate(TemporalSignal::Stable, 0.0), Action::Ignore);
    }
}
