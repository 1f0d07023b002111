//! Decision validation.
//!
//! RULE: a proposal is either accepted as-is or rejected outright.
//! The validator never edits a decision into shape. Rejections are
//! data, not errors; an all-rejected batch is a normal outcome.

use crate::{
    config::ValidationConfig,
    decision::{CandidateDecision, DecisionDefect, ProposedDecision},
};
use serde::{Deserialize, Serialize};

/// Why one proposal was dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    /// Position in the proposer's batch.
    pub index: usize,
    /// Whatever pattern text the proposal carried, for the report.
    pub pattern: Option<String>,
    pub defects: Vec<DecisionDefect>,
}

impl Rejection {
    pub fn summary(&self) -> String {
        self.defects
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: Vec<CandidateDecision>,
    pub rejections: Vec<Rejection>,
}

impl ValidationReport {
    pub fn proposed(&self) -> usize {
        self.valid.len() + self.rejections.len()
    }
}

pub struct DecisionValidator<'a> {
    cfg: &'a ValidationConfig,
}

impl<'a> DecisionValidator<'a> {
    pub fn new(cfg: &'a ValidationConfig) -> Self {
        Self { cfg }
    }

    pub fn validate_one(&self, proposal: ProposedDecision) -> Result<CandidateDecision, Vec<DecisionDefect>> {
        CandidateDecision::build(proposal, self.cfg)
    }

    /// Validate a whole batch, keeping proposer order.
    pub fn validate(&self, proposals: Vec<ProposedDecision>) -> ValidationReport {
        let mut report = ValidationReport::default();
        for (index, proposal) in proposals.into_iter().enumerate() {
            let pattern = proposal.pattern_detected.clone();
            match self.validate_one(proposal) {
                Ok(decision) => report.valid.push(decision),
                Err(defects) => {
                    let rejection = Rejection { index, pattern, defects };
                    log::warn!("Rejected proposal #{index}: {}", rejection.summary());
                    report.rejections.push(rejection);
                }
            }
        }
        log::info!(
            "Validated {} of {} proposed decisions",
            report.valid.len(),
            report.proposed()
        );
        report
    }
}
