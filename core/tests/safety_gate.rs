//! Safety gate tests.
//!
//! Tests cover: the confidence threshold, the volume ceiling, check
//! order, capital preserved, and decisions read back from JSON going
//! through validation again.

use remediation_core::{
    config::{EconomicsConfig, SafetyConfig, ValidationConfig},
    decision::{CandidateDecision, CostBreakdown, ProposedDecision},
    safety_gate_subsystem::{GateVerdict, RefusalReason, SafetyGate},
    validation_subsystem::DecisionValidator,
};

fn decision(action: &str, volume: i64, confidence: f64) -> CandidateDecision {
    let avg = 7842.0;
    let cost = volume as f64 * 15.0;
    let revenue = volume as f64 * avg * 0.02;
    let proposal = ProposedDecision {
        pattern_detected: Some("HDFC Rewards cards in the ₹>5000 range failing at 98.0% during 14:00-16:00".into()),
        affected_volume: Some(volume),
        avg_amount: Some(avg),
        cost_analysis: Some(format!("Reroute cost: ₹{cost:.0}. Revenue saved: ₹{revenue:.0}. Net: +₹{:.0}", revenue - cost)),
        costs: Some(CostBreakdown::new(cost, revenue)),
        temporal_signal: Some("stable".into()),
        decision: Some(action.into()),
        risk_category: Some("payment_failure".into()),
        reasoning: Some(
            "CFO: high-value payments are failing on one issuer and each one recovered pays for many reroutes. \
             CTO: the backup route is healthy. Moderator: act."
                .into(),
        ),
        confidence: Some(confidence),
    };
    DecisionValidator::new(&ValidationConfig::default())
        .validate_one(proposal)
        .expect("test decision should validate")
}

#[test]
fn confident_small_decision_is_approved() {
    let safety = SafetyConfig::default();
    let econ = EconomicsConfig::default();
    let gate = SafetyGate::new(&safety, &econ);
    assert_eq!(gate.check(&decision("REROUTE", 45, 0.92)), GateVerdict::Approved);
}

#[test]
fn low_confidence_is_refused_whatever_the_economics() {
    let safety = SafetyConfig::default();
    let econ = EconomicsConfig::default();
    let gate = SafetyGate::new(&safety, &econ);

    let d = decision("REROUTE", 45, 0.65);
    assert!(d.is_profitable());
    let report = gate.screen(vec![d]);

    assert!(report.approved.is_empty());
    assert_eq!(report.overrides.len(), 1);
    let o = &report.overrides[0];
    assert_eq!(
        o.reason,
        RefusalReason::ConfidenceBelowThreshold { confidence: 0.65, threshold: 0.70 }
    );
    assert!(o.reason.to_string().contains("confidence below threshold"));
    assert_eq!(o.affected_volume, 45);
    assert!((o.capital_preserved - 675.0).abs() < 1e-9);
}

#[test]
fn threshold_is_inclusive() {
    let safety = SafetyConfig::default();
    let econ = EconomicsConfig::default();
    let gate = SafetyGate::new(&safety, &econ);
    assert_eq!(gate.check(&decision("ALERT", 10, 0.70)), GateVerdict::Approved);
}

#[test]
fn volume_above_ceiling_is_refused() {
    let safety = SafetyConfig::default();
    let econ = EconomicsConfig::default();
    let gate = SafetyGate::new(&safety, &econ);

    assert_eq!(gate.check(&decision("REROUTE", 1000, 0.95)), GateVerdict::Approved);

    let report = gate.screen(vec![decision("REROUTE", 1001, 0.95)]);
    assert_eq!(
        report.overrides[0].reason,
        RefusalReason::VolumeAboveCeiling { volume: 1001, ceiling: 1000 }
    );
    assert!((report.capital_preserved() - 15_015.0).abs() < 1e-9);
}

#[test]
fn confidence_is_checked_before_volume() {
    let safety = SafetyConfig::default();
    let econ = EconomicsConfig::default();
    let gate = SafetyGate::new(&safety, &econ);
    match gate.check(&decision("REROUTE", 5000, 0.30)) {
        GateVerdict::Refused(RefusalReason::ConfidenceBelowThreshold { .. }) => {}
        other => panic!("expected confidence refusal, got {other:?}"),
    }
}

#[test]
fn stored_decisions_are_revalidated_when_read_back() {
    let reasoning = "CFO: the whale payments recovered here pay for many reroutes. CTO: the backup route has headroom. \
                     Moderator: recorded for audit.";
    let loss = serde_json::json!({
        "pattern_detected": "SBI Debit cards in the ₹<100 range failing at 76.0% during 09:00-11:00",
        "affected_volume": 127,
        "avg_amount": 42.0,
        "cost_analysis": "Reroute cost: ₹1,905 (127 × ₹15). Revenue saved: ₹107. Net: -₹1,798",
        "costs": { "intervention_cost": 1905.0, "recovered_revenue": 107.0, "net": -1798.0 },
        "temporal_signal": "stable",
        "action": "REROUTE",
        "risk_category": "payment_failure",
        "reasoning": reasoning,
        "confidence": 0.9
    });
    let err = serde_json::from_value::<CandidateDecision>(loss).expect_err("loss-making REROUTE must not decode");
    assert!(err.to_string().contains("REROUTE contradicts"), "unexpected error: {err}");

    // Would sail through the gate if it could be constructed.
    let out_of_range = serde_json::json!({
        "pattern_detected": "HDFC Rewards cards in the ₹>5000 range failing at 98.0% during 14:00-16:00",
        "affected_volume": 0,
        "avg_amount": 7842.0,
        "cost_analysis": "Reroute cost: ₹0. Revenue saved: ₹0. Net: +₹0 for this pattern",
        "temporal_signal": "stable",
        "action": "IGNORE",
        "risk_category": "payment_failure",
        "reasoning": reasoning,
        "confidence": 5.0
    });
    let err = serde_json::from_value::<CandidateDecision>(out_of_range).expect_err("out-of-range decision must not decode");
    let text = err.to_string();
    assert!(text.contains("'confidence' out of range"), "unexpected error: {text}");
    assert!(text.contains("'affected_volume' out of range"), "unexpected error: {text}");
}

#[test]
fn approved_decision_survives_a_json_round_trip() {
    let original = decision("REROUTE", 45, 0.92);
    let json = serde_json::to_string(&original).expect("encode");
    let restored: CandidateDecision = serde_json::from_str(&json).expect("decode");

    assert_eq!(restored.action(), original.action());
    assert_eq!(restored.affected_volume(), 45);
    assert_eq!(restored.pattern_detected(), original.pattern_detected());
    assert_eq!(restored.confidence(), 0.92);

    let safety = SafetyConfig::default();
    let econ = EconomicsConfig::default();
    assert_eq!(SafetyGate::new(&safety, &econ).check(&restored), GateVerdict::Approved);
}

#[test]
fn screen_keeps_order_and_sums_preserved_capital() {
    let safety = SafetyConfig::default();
    let econ = EconomicsConfig::default();
    let report = SafetyGate::new(&safety, &econ).screen(vec![
        decision("REROUTE", 40, 0.90),
        decision("REROUTE", 20, 0.50),
        decision("IGNORE", 30, 0.95),
        decision("REROUTE", 2000, 0.99),
    ]);

    let approved: Vec<u64> = report.approved.iter().map(|d| d.affected_volume()).collect();
    assert_eq!(approved, vec![40, 30]);
    let refused: Vec<u64> = report.overrides.iter().map(|o| o.affected_volume).collect();
    assert_eq!(refused, vec![20, 2000]);
    assert!((report.capital_preserved() - 2020.0 * 15.0).abs() < 1e-9);
}

#[test]
fn custom_threshold_is_honoured() {
    let safety = SafetyConfig { confidence_threshold: 0.90, max_affected_volume: 50 };
    let econ = EconomicsConfig::default();
    let gate = SafetyGate::new(&safety, &econ);
    assert!(matches!(
        gate.check(&decision("REROUTE", 45, 0.85)),
        GateVerdict::Refused(RefusalReason::ConfidenceBelowThreshold { .. })
    ));
    assert!(matches!(
        gate.check(&decision("REROUTE", 60, 0.95)),
        GateVerdict::Refused(RefusalReason::VolumeAboveCeiling { volume: 60, ceiling: 50 })
    ));
}
