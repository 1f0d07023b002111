//! Metrics aggregator tests.
//!
//! Tests cover: two-of-three attribute matching, tie handling, the
//! unmatched fallback, money totals recomputed from clusters, ROI and
//! efficiency.

use chrono::{TimeZone, Utc};
use remediation_core::{
    clustering_subsystem::{ClusterKey, FailureCluster},
    config::{EconomicsConfig, ValidationConfig},
    decision::{CandidateDecision, CostBreakdown, ProposedDecision},
    metrics_subsystem::{attribute_matches, match_cluster, FeedTotals, MetricsAggregator, PerformanceMetrics},
    types::{AmountBucket, Bank, CardType},
    validation_subsystem::DecisionValidator,
};
use std::collections::BTreeMap;

fn cluster(bank: Bank, card_type: CardType, amount_bucket: AmountBucket, count: usize, avg_amount: f64) -> FailureCluster {
    let at = Utc.with_ymd_and_hms(2026, 2, 2, 14, 0, 0).unwrap();
    FailureCluster {
        key: ClusterKey { bank, card_type, amount_bucket },
        count,
        avg_amount,
        failure_rate: 0.9,
        start_hour: 14,
        end_hour: 16,
        error_codes: vec!["RISK_THRESHOLD_EXCEEDED".into()],
        first_failure_at: at,
        last_failure_at: at,
    }
}

fn clusters() -> Vec<FailureCluster> {
    vec![
        cluster(Bank::Hdfc, CardType::Rewards, AmountBucket::Over5000, 45, 7842.0),
        cluster(Bank::Hdfc, CardType::Credit, AmountBucket::Over5000, 20, 6000.0),
        cluster(Bank::Sbi, CardType::Debit, AmountBucket::Under100, 127, 42.0),
    ]
}

fn decision(action: &str, pattern: &str, volume: i64, avg: f64) -> CandidateDecision {
    let proposal = ProposedDecision {
        pattern_detected: Some(pattern.into()),
        affected_volume: Some(volume),
        avg_amount: Some(avg),
        cost_analysis: Some("Reroute cost: ₹15 per transaction, recovered margin reported separately".into()),
        costs: Some(CostBreakdown::new(15.0, 30.0)),
        temporal_signal: Some("stable".into()),
        decision: Some(action.into()),
        risk_category: Some("payment_failure".into()),
        reasoning: Some(
            "CFO: weigh the per-transaction fee against recovered margin. CTO: capacity is fine on the backup route. \
             Moderator: proceed as proposed."
                .into(),
        ),
        confidence: Some(0.9),
    };
    DecisionValidator::new(&ValidationConfig::default())
        .validate_one(proposal)
        .expect("test decision should validate")
}

#[test]
fn full_match_beats_partial_match() {
    let cs = clusters();
    let pattern = "HDFC Rewards cards in the ₹>5000 range failing at 98.0% during 14:00-16:00";
    assert_eq!(attribute_matches(&cs[0].key, pattern), 3);
    assert_eq!(attribute_matches(&cs[1].key, pattern), 2);
    let matched = match_cluster(pattern, &cs).expect("should match");
    assert_eq!(matched.card_type(), CardType::Rewards);
}

#[test]
fn one_attribute_is_not_enough() {
    let cs = clusters();
    assert!(match_cluster("HDFC payments above ₹5000 keep failing today", &cs).is_none());
}

#[test]
fn equal_scores_take_the_earliest_cluster() {
    let cs = clusters();
    let matched = match_cluster("HDFC >5000 failures on premium cards", &cs).expect("should match");
    assert_eq!(matched.key, cs[0].key);

    let reversed: Vec<FailureCluster> = cs.iter().rev().cloned().collect();
    let matched = match_cluster("HDFC >5000 failures on premium cards", &reversed).expect("should match");
    assert_eq!(matched.card_type(), CardType::Credit);
}

#[test]
fn totals_come_from_matched_clusters_not_decision_text() {
    let econ = EconomicsConfig::default();
    let decisions = vec![
        // Reported volume and average are wrong; the cluster's win.
        decision("REROUTE", "HDFC Rewards cards in the ₹>5000 range failing", 999, 1.0),
        decision("IGNORE", "SBI Debit cards in the ₹<100 range failing at 76%", 127, 42.0),
        decision("ALERT", "Unusual latency on an unnamed acquirer today", 10, 500.0),
    ];
    let m = MetricsAggregator::new(&econ).aggregate(
        &decisions,
        &clusters(),
        FeedTotals { transactions: 2500, failures: 412 },
        Some(0.75),
    );

    assert_eq!(m.total_transactions, 2500);
    assert_eq!(m.total_failures, 412);
    assert_eq!(m.patterns_discovered, 3);
    assert_eq!(m.reroutes_executed, 1);
    assert_eq!(m.reroutes_ignored, 1);
    assert_eq!(m.alerts_raised, 1);
    assert_eq!(m.matched_decisions, 2);
    assert_eq!(m.unmatched_decisions, 1);
    assert!((m.total_cost - 45.0 * 15.0).abs() < 1e-9, "cost {}", m.total_cost);
    assert!((m.total_revenue_saved - 45.0 * 7842.0 * 0.02).abs() < 1e-6);
    assert!((m.net_profit - (m.total_revenue_saved - m.total_cost)).abs() < 1e-9);
    assert_eq!(m.decision_accuracy, Some(0.75));

    let expected: BTreeMap<String, usize> =
        [("ALERT", 1), ("IGNORE", 1), ("REROUTE", 1)].into_iter().map(|(k, v)| (k.to_string(), v)).collect();
    assert_eq!(m.action_counts, expected);
}

#[test]
fn unmatched_reroute_falls_back_to_reported_figures() {
    let econ = EconomicsConfig::default();
    let decisions = vec![decision("REROUTE", "Kotak corporate payments failing since noon", 30, 2000.0)];
    let m = MetricsAggregator::new(&econ).aggregate(&decisions, &clusters(), FeedTotals::default(), None);

    assert_eq!(m.unmatched_decisions, 1);
    assert!((m.total_cost - 450.0).abs() < 1e-9);
    assert!((m.total_revenue_saved - 1200.0).abs() < 1e-9);
    assert!((m.roi() - 750.0 / 450.0 * 100.0).abs() < 1e-9);
}

#[test]
fn ratios_are_zero_without_activity() {
    let econ = EconomicsConfig::default();
    let m = MetricsAggregator::new(&econ).aggregate(&[], &[], FeedTotals::default(), None);
    assert_eq!(m.roi(), 0.0);
    assert_eq!(m.efficiency_score(), 0.0);
    assert_eq!(m.decision_accuracy, None);
    assert!(m.action_counts.is_empty());
}

#[test]
fn efficiency_counts_non_spending_decisions() {
    let m = PerformanceMetrics {
        total_transactions: 0,
        total_failures: 0,
        reroutes_executed: 1,
        reroutes_ignored: 2,
        alerts_raised: 1,
        action_counts: BTreeMap::new(),
        total_cost: 100.0,
        total_revenue_saved: 350.0,
        net_profit: 250.0,
        patterns_discovered: 4,
        decision_accuracy: None,
        matched_decisions: 4,
        unmatched_decisions: 0,
    };
    assert!((m.efficiency_score() - 75.0).abs() < 1e-9);
    assert!((m.roi() - 250.0).abs() < 1e-9);
}
