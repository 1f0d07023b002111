//! Candidate decisions and the proposer boundary.
//!
//! RULE: anything the proposer returns is untrusted. It arrives as a
//! `ProposedDecision` (every field optional, enums as raw labels) and
//! only becomes a `CandidateDecision` through `CandidateDecision::build`,
//! which enforces every structural and cross-field invariant.
//!
//! Financial figures travel as a structured `CostBreakdown`, which must
//! add up. The narrative is still read: a REROUTE is rejected when
//! either the structured net or the narrative reports a loss.

use crate::config::ValidationConfig;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Reroute,
    Ignore,
    Alert,
    Throttle,
    Failover,
    CircuitBreak,
    BlockUser,
    BlockCard,
    RateLimit,
    StepUpAuth,
    HoldForReview,
    EscalateSecurity,
    EscalatePriority,
    ComplianceHold,
}

impl Action {
    pub const ALL: &'static [Action] = &[
        Action::Reroute,
        Action::Ignore,
        Action::Alert,
        Action::Throttle,
        Action::Failover,
        Action::CircuitBreak,
        Action::BlockUser,
        Action::BlockCard,
        Action::RateLimit,
        Action::StepUpAuth,
        Action::HoldForReview,
        Action::EscalateSecurity,
        Action::EscalatePriority,
        Action::ComplianceHold,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Action::Reroute => "REROUTE",
            Action::Ignore => "IGNORE",
            Action::Alert => "ALERT",
            Action::Throttle => "THROTTLE",
            Action::Failover => "FAILOVER",
            Action::CircuitBreak => "CIRCUIT_BREAK",
            Action::BlockUser => "BLOCK_USER",
            Action::BlockCard => "BLOCK_CARD",
            Action::RateLimit => "RATE_LIMIT",
            Action::StepUpAuth => "STEP_UP_AUTH",
            Action::HoldForReview => "HOLD_FOR_REVIEW",
            Action::EscalateSecurity => "ESCALATE_SECURITY",
            Action::EscalatePriority => "ESCALATE_PRIORITY",
            Action::ComplianceHold => "COMPLIANCE_HOLD",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        Action::ALL.iter().copied().find(|a| a.label() == s)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalSignal {
    Stable,
    SpikeDetected,
    Declining,
}

impl TemporalSignal {
    pub fn label(&self) -> &'static str {
        match self {
            TemporalSignal::Stable => "stable",
            TemporalSignal::SpikeDetected => "spike_detected",
            TemporalSignal::Declining => "declining",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "stable" => Some(TemporalSignal::Stable),
            "spike_detected" => Some(TemporalSignal::SpikeDetected),
            "declining" => Some(TemporalSignal::Declining),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    PaymentFailure,
    HighTraffic,
    ServerOutage,
    SuspiciousActivity,
    HighRiskPayment,
}

impl RiskCategory {
    pub fn label(&self) -> &'static str {
        match self {
            RiskCategory::PaymentFailure => "payment_failure",
            RiskCategory::HighTraffic => "high_traffic",
            RiskCategory::ServerOutage => "server_outage",
            RiskCategory::SuspiciousActivity => "suspicious_activity",
            RiskCategory::HighRiskPayment => "high_risk_payment",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "payment_failure" => Some(RiskCategory::PaymentFailure),
            "high_traffic" => Some(RiskCategory::HighTraffic),
            "server_outage" => Some(RiskCategory::ServerOutage),
            "suspicious_activity" => Some(RiskCategory::SuspiciousActivity),
            "high_risk_payment" => Some(RiskCategory::HighRiskPayment),
            _ => None,
        }
    }
}

/// Structured money figures for one decision, in rupees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub intervention_cost: f64,
    pub recovered_revenue: f64,
    pub net: f64,
}

/// Largest gap tolerated between `net` and revenue minus cost.
pub const NET_TOLERANCE: f64 = 0.01;

impl CostBreakdown {
    pub fn new(intervention_cost: f64, recovered_revenue: f64) -> Self {
        Self {
            intervention_cost,
            recovered_revenue,
            net: recovered_revenue - intervention_cost,
        }
    }

    pub fn expected_net(&self) -> f64 {
        self.recovered_revenue - self.intervention_cost
    }

    pub fn is_consistent(&self) -> bool {
        (self.net - self.expected_net()).abs() <= NET_TOLERANCE
    }
}

/// What the proposer hands back, before any checking.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProposedDecision {
    #[serde(default)]
    pub pattern_detected: Option<String>,
    #[serde(default)]
    pub affected_volume: Option<i64>,
    #[serde(default)]
    pub avg_amount: Option<f64>,
    #[serde(default)]
    pub cost_analysis: Option<String>,
    #[serde(default)]
    pub costs: Option<CostBreakdown>,
    #[serde(default)]
    pub temporal_signal: Option<String>,
    #[serde(default, alias = "action")]
    pub decision: Option<String>,
    #[serde(default)]
    pub risk_category: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "defect", rename_all = "snake_case")]
pub enum DecisionDefect {
    MissingField { field: String },
    OutOfRange { field: String, value: f64 },
    TooShort { field: String, chars: usize, min: usize },
    NoCurrency,
    DenylistedTerm { term: String },
    UnknownLabel { field: String, value: String },
    InconsistentCosts { net: f64, expected: f64 },
    RerouteWithNegativeNet { net: Option<f64> },
}

impl fmt::Display for DecisionDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionDefect::MissingField { field } => write!(f, "missing field '{field}'"),
            DecisionDefect::OutOfRange { field, value } => {
                write!(f, "'{field}' out of range: {value}")
            }
            DecisionDefect::TooShort { field, chars, min } => {
                write!(f, "'{field}' too short: {chars} chars, need {min}")
            }
            DecisionDefect::NoCurrency => f.write_str("cost analysis names no currency amount"),
            DecisionDefect::DenylistedTerm { term } => {
                write!(f, "reasoning uses disallowed term '{term}'")
            }
            DecisionDefect::UnknownLabel { field, value } => {
                write!(f, "unknown {field} '{value}'")
            }
            DecisionDefect::InconsistentCosts { net, expected } => {
                write!(f, "costs.net ₹{net:.2} does not equal revenue minus cost ₹{expected:.2}")
            }
            DecisionDefect::RerouteWithNegativeNet { net: Some(net) } => {
                write!(f, "REROUTE contradicts negative net benefit (₹{net:.2})")
            }
            DecisionDefect::RerouteWithNegativeNet { net: None } => {
                f.write_str("REROUTE contradicts cost analysis reporting a loss")
            }
        }
    }
}

/// The defects that stopped a stored decision from being read back.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid decision: {}", join_defects(.0))]
pub struct InvalidDecision(pub Vec<DecisionDefect>);

fn join_defects(defects: &[DecisionDefect]) -> String {
    defects.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// A decision that passed every structural and consistency check.
/// Fields are private, and deserializing goes back through `build`
/// with the default validation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ProposedDecision")]
pub struct CandidateDecision {
    pattern_detected: String,
    affected_volume: u64,
    avg_amount: f64,
    cost_analysis: String,
    costs: Option<CostBreakdown>,
    temporal_signal: TemporalSignal,
    action: Action,
    risk_category: RiskCategory,
    reasoning: String,
    confidence: f64,
}

impl CandidateDecision {
    pub fn pattern_detected(&self) -> &str {
        &self.pattern_detected
    }
    pub fn affected_volume(&self) -> u64 {
        self.affected_volume
    }
    pub fn avg_amount(&self) -> f64 {
        self.avg_amount
    }
    pub fn cost_analysis(&self) -> &str {
        &self.cost_analysis
    }
    pub fn costs(&self) -> Option<&CostBreakdown> {
        self.costs.as_ref()
    }
    pub fn temporal_signal(&self) -> TemporalSignal {
        self.temporal_signal
    }
    pub fn action(&self) -> Action {
        self.action
    }
    pub fn risk_category(&self) -> RiskCategory {
        self.risk_category
    }
    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Structured net if present, otherwise whatever the narrative
    /// parser can recover.
    pub fn net_benefit(&self) -> Option<f64> {
        net_benefit_of(self.costs.as_ref(), &self.cost_analysis)
    }

    pub fn encodes_negative_net(&self) -> bool {
        encodes_negative_net(self.costs.as_ref(), &self.cost_analysis)
    }

    /// The loss figure behind `encodes_negative_net`, when one is stated.
    pub fn negative_net(&self) -> Option<f64> {
        negative_net_of(self.costs.as_ref(), &self.cost_analysis)
    }

    pub fn is_profitable(&self) -> bool {
        self.net_benefit().is_some_and(|n| n > 0.0)
    }

    /// Check `p` and construct. Every defect is reported, not just the
    /// first.
    pub fn build(p: ProposedDecision, cfg: &ValidationConfig) -> Result<Self, Vec<DecisionDefect>> {
        let mut defects = Vec::new();
        let missing = |field: &str| DecisionDefect::MissingField { field: field.into() };

        let pattern = text_field("pattern_detected", p.pattern_detected, cfg.min_pattern_chars, &mut defects);
        let cost_analysis = text_field("cost_analysis", p.cost_analysis, cfg.min_cost_chars, &mut defects);
        let reasoning = text_field("reasoning", p.reasoning, cfg.min_reasoning_chars, &mut defects);

        let affected_volume = match p.affected_volume {
            Some(v) if v >= 1 => Some(v as u64),
            Some(v) => {
                defects.push(DecisionDefect::OutOfRange { field: "affected_volume".into(), value: v as f64 });
                None
            }
            None => {
                defects.push(missing("affected_volume"));
                None
            }
        };
        let avg_amount = match p.avg_amount {
            Some(a) if a.is_finite() && a > 0.0 => Some(a),
            Some(a) => {
                defects.push(DecisionDefect::OutOfRange { field: "avg_amount".into(), value: a });
                None
            }
            None => {
                defects.push(missing("avg_amount"));
                None
            }
        };
        let confidence = match p.confidence {
            Some(c) if (0.0..=1.0).contains(&c) => Some(c),
            Some(c) => {
                defects.push(DecisionDefect::OutOfRange { field: "confidence".into(), value: c });
                None
            }
            None => {
                defects.push(missing("confidence"));
                None
            }
        };
        if let Some(costs) = &p.costs {
            let mut finite = true;
            for (field, value) in [
                ("costs.intervention_cost", costs.intervention_cost),
                ("costs.recovered_revenue", costs.recovered_revenue),
                ("costs.net", costs.net),
            ] {
                if !value.is_finite() {
                    finite = false;
                    defects.push(DecisionDefect::OutOfRange { field: field.into(), value });
                }
            }
            if finite && !costs.is_consistent() {
                defects.push(DecisionDefect::InconsistentCosts {
                    net: costs.net,
                    expected: costs.expected_net(),
                });
            }
        }

        let temporal = label_field("temporal_signal", p.temporal_signal, TemporalSignal::from_label, &mut defects);
        let action = label_field("decision", p.decision, Action::from_label, &mut defects);
        let risk = label_field("risk_category", p.risk_category, RiskCategory::from_label, &mut defects);

        if let Some(cost) = &cost_analysis {
            if currency_amount(cost, &cfg.currency_markers).is_none() {
                defects.push(DecisionDefect::NoCurrency);
            }
            if action == Some(Action::Reroute) && encodes_negative_net(p.costs.as_ref(), cost) {
                defects.push(DecisionDefect::RerouteWithNegativeNet {
                    net: negative_net_of(p.costs.as_ref(), cost),
                });
            }
        }
        if let Some(text) = &reasoning {
            for term in denylisted_terms(text, &cfg.denylisted_terms) {
                defects.push(DecisionDefect::DenylistedTerm { term });
            }
        }

        if !defects.is_empty() {
            return Err(defects);
        }

        match (pattern, affected_volume, avg_amount, cost_analysis, temporal, action, risk, reasoning, confidence) {
            (
                Some(pattern_detected),
                Some(affected_volume),
                Some(avg_amount),
                Some(cost_analysis),
                Some(temporal_signal),
                Some(action),
                Some(risk_category),
                Some(reasoning),
                Some(confidence),
            ) => Ok(Self {
                pattern_detected,
                affected_volume,
                avg_amount,
                cost_analysis,
                costs: p.costs,
                temporal_signal,
                action,
                risk_category,
                reasoning,
                confidence,
            }),
            _ => Err(vec![missing("unknown")]),
        }
    }
}

impl TryFrom<ProposedDecision> for CandidateDecision {
    type Error = InvalidDecision;

    fn try_from(p: ProposedDecision) -> Result<Self, Self::Error> {
        Self::build(p, &ValidationConfig::default()).map_err(InvalidDecision)
    }
}

fn text_field(
    field: &str,
    value: Option<String>,
    min_chars: usize,
    defects: &mut Vec<DecisionDefect>,
) -> Option<String> {
    match value {
        None => {
            defects.push(DecisionDefect::MissingField { field: field.into() });
            None
        }
        Some(v) => {
            let chars = v.trim().chars().count();
            if chars < min_chars {
                defects.push(DecisionDefect::TooShort { field: field.into(), chars, min: min_chars });
                None
            } else {
                Some(v)
            }
        }
    }
}

fn label_field<T>(
    field: &str,
    value: Option<String>,
    lookup: fn(&str) -> Option<T>,
    defects: &mut Vec<DecisionDefect>,
) -> Option<T> {
    let Some(raw) = value else {
        defects.push(DecisionDefect::MissingField { field: field.into() });
        return None;
    };
    let parsed = lookup(raw.trim());
    if parsed.is_none() {
        defects.push(DecisionDefect::UnknownLabel { field: field.into(), value: raw });
    }
    parsed
}

/// First amount in `text` written next to one of `markers`, either
/// "₹1,905" / "Rs. 675" or "675 INR". A bare marker does not count.
pub fn currency_amount(text: &str, markers: &[String]) -> Option<f64> {
    let alternatives: Vec<String> = markers
        .iter()
        .map(|m| m.trim())
        .filter(|m| !m.is_empty())
        .map(|m| {
            let escaped = regex::escape(m);
            if m.chars().next().is_some_and(char::is_alphanumeric) {
                format!(r"\b{escaped}\.?")
            } else {
                escaped
            }
        })
        .collect();
    if alternatives.is_empty() {
        return None;
    }
    let marker = alternatives.join("|");
    let pattern = format!(
        r"(?i)(?:(?:{marker})\s*(?P<pre>\d[\d,]*(?:\.\d+)?))|(?:(?P<post>\d[\d,]*(?:\.\d+)?)\s*(?:{marker})\b)"
    );
    let caps = Regex::new(&pattern).ok()?.captures(text)?;
    caps.name("pre")
        .or_else(|| caps.name("post"))?
        .as_str()
        .replace(',', "")
        .parse()
        .ok()
}

/// Whole-word, case-insensitive matches of `terms` in `text`, in
/// `terms` order.
pub fn denylisted_terms(text: &str, terms: &[String]) -> Vec<String> {
    terms
        .iter()
        .filter(|term| {
            let words: Vec<String> = term.split_whitespace().map(regex::escape).collect();
            if words.is_empty() {
                return false;
            }
            let pattern = format!(r"(?i)\b{}\b", words.join(r"\s+"));
            Regex::new(&pattern).map(|re| re.is_match(text)).unwrap_or(false)
        })
        .cloned()
        .collect()
}

pub fn net_benefit_of(costs: Option<&CostBreakdown>, narrative: &str) -> Option<f64> {
    match costs {
        Some(c) => Some(c.net),
        None => legacy::parse_net(narrative),
    }
}

/// True when the structured net is negative or the narrative reports a
/// loss. Either one is enough.
pub fn encodes_negative_net(costs: Option<&CostBreakdown>, narrative: &str) -> bool {
    costs.is_some_and(|c| c.net < 0.0) || legacy::narrative_reports_loss(narrative)
}

/// The negative figure behind `encodes_negative_net`, if one is known.
fn negative_net_of(costs: Option<&CostBreakdown>, narrative: &str) -> Option<f64> {
    costs
        .map(|c| c.net)
        .filter(|n| *n < 0.0)
        .or_else(|| legacy::parse_net(narrative).filter(|n| *n < 0.0))
}

/// Narrative parsing for proposers that only return text.
pub mod legacy {
    use regex::Regex;
    use std::sync::OnceLock;

    const LOSS_INDICATORS: &[&str] = &[
        "net: -",
        "net: (-",
        "net -",
        "negative",
        "loss of",
        "waste",
        "net profit: -",
    ];

    fn net_regex() -> Option<&'static Regex> {
        static RE: OnceLock<Option<Regex>> = OnceLock::new();
        RE.get_or_init(|| {
            Regex::new(
                r"(?i)\bnet(?:\s+(?:profit|benefit))?\s*:?\s*(?P<sign>[+-])?\s*\(?\s*(?P<neg>-)?\s*(?:₹|rs\.?|inr)?\s*(?P<num>\d[\d,]*(?:\.\d+)?)",
            )
            .ok()
        })
        .as_ref()
    }

    /// Signed net figure from text like "Net: -₹1,797" or
    /// "Net profit: +₹6,627".
    pub fn parse_net(narrative: &str) -> Option<f64> {
        let caps = net_regex()?.captures(narrative)?;
        let magnitude: f64 = caps.name("num")?.as_str().replace(',', "").parse().ok()?;
        let negative = caps.name("sign").is_some_and(|s| s.as_str() == "-") || caps.name("neg").is_some();
        Some(if negative { -magnitude } else { magnitude })
    }

    pub fn narrative_reports_loss(narrative: &str) -> bool {
        let lower = narrative.to_lowercase();
        LOSS_INDICATORS.iter().any(|i| lower.contains(i))
            || parse_net(narrative).is_some_and(|n| n < 0.0)
    }
}
