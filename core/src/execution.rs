//! Execution collaborator.
//!
//! The core hands approved decisions over one at a time, together with
//! the volume and average amount of the cluster they came from. What
//! "rerouting" or "alerting" actually means lives behind the Executor
//! trait; SimulatedExecutor is the in-process stand-in.

use crate::{
    config::EconomicsConfig,
    decision::{Action, CandidateDecision, TemporalSignal},
    error::{PipelineError, PipelineResult},
    types::Bank,
};
use serde::{Deserialize, Serialize};

/// One approved decision plus its bookkeeping lineage.
#[derive(Debug, Clone)]
pub struct ExecutionOrder<'a> {
    pub decision: &'a CandidateDecision,
    /// Bank of the originating cluster, if one was matched.
    pub bank: Option<Bank>,
    pub volume: u64,
    pub avg_amount: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    High,
    Medium,
    Low,
}

impl AlertSeverity {
    pub fn for_signal(signal: TemporalSignal) -> Self {
        match signal {
            TemporalSignal::SpikeDetected => AlertSeverity::High,
            TemporalSignal::Stable => AlertSeverity::Medium,
            TemporalSignal::Declining => AlertSeverity::Low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Rerouted {
        from: Bank,
        to: String,
        affected: u64,
        successful: u64,
        failed: u64,
        cost: f64,
        revenue: f64,
        net: f64,
    },
    Alerted {
        severity: AlertSeverity,
        affected: u64,
        message: String,
    },
    Ignored {
        affected: u64,
        capital_preserved: f64,
    },
    /// Action this executor does not carry out; logged for an operator.
    Deferred { action: Action, affected: u64 },
}

impl ExecutionOutcome {
    /// Realized net for reroutes, None otherwise.
    pub fn realized_net(&self) -> Option<f64> {
        match self {
            ExecutionOutcome::Rerouted { net, .. } => Some(*net),
            _ => None,
        }
    }
}

pub trait Executor {
    fn name(&self) -> &'static str;

    fn execute(&mut self, order: &ExecutionOrder<'_>) -> PipelineResult<ExecutionOutcome>;
}

/// Backup provider and its success rate for each bank.
pub fn backup_route(bank: Bank) -> (&'static str, f64) {
    match bank {
        Bank::Hdfc => ("Razorpay", 0.95),
        Bank::Sbi => ("Razorpay", 0.93),
        Bank::Icici => ("Axis", 0.96),
        Bank::Axis => ("ICICI", 0.94),
        Bank::Kotak => ("Razorpay", 0.92),
    }
}

/// First bank label named in `text`.
pub fn bank_named_in(text: &str) -> Option<Bank> {
    Bank::ALL.iter().copied().find(|b| text.contains(b.label()))
}

const ALERT_MESSAGE_CHARS: usize = 100;

pub struct SimulatedExecutor<'a> {
    economics: &'a EconomicsConfig,
}

impl<'a> SimulatedExecutor<'a> {
    pub fn new(economics: &'a EconomicsConfig) -> Self {
        Self { economics }
    }

    fn reroute(&self, order: &ExecutionOrder<'_>) -> PipelineResult<ExecutionOutcome> {
        let from = order
            .bank
            .or_else(|| bank_named_in(order.decision.pattern_detected()))
            .ok_or_else(|| PipelineError::Execution {
                action: Action::Reroute.label().to_string(),
                detail: format!("no bank in '{}'", order.decision.pattern_detected()),
            })?;
        let (to, rate) = backup_route(from);
        let successful = (order.volume as f64 * rate).floor() as u64;
        let cost = order.volume as f64 * self.economics.intervention_cost;
        let revenue = successful as f64 * order.avg_amount * self.economics.margin_rate;
        Ok(ExecutionOutcome::Rerouted {
            from,
            to: to.to_string(),
            affected: order.volume,
            successful,
            failed: order.volume - successful,
            cost,
            revenue,
            net: revenue - cost,
        })
    }
}

impl Executor for SimulatedExecutor<'_> {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn execute(&mut self, order: &ExecutionOrder<'_>) -> PipelineResult<ExecutionOutcome> {
        let decision = order.decision;
        let outcome = match decision.action() {
            Action::Reroute => self.reroute(order)?,
            Action::Alert => ExecutionOutcome::Alerted {
                severity: AlertSeverity::for_signal(decision.temporal_signal()),
                affected: order.volume,
                message: decision.reasoning().chars().take(ALERT_MESSAGE_CHARS).collect(),
            },
            Action::Ignore => ExecutionOutcome::Ignored {
                affected: order.volume,
                capital_preserved: order.volume as f64 * self.economics.intervention_cost,
            },
            other => ExecutionOutcome::Deferred {
                action: other,
                affected: order.volume,
            },
        };
        log::info!("Executed {} on '{}'", decision.action(), decision.pattern_detected());
        Ok(outcome)
    }
}
