//! Confidence calibrator tests.
//!
//! Tests cover: cascade order and exclusivity, fresh and stale
//! patterns, miss streaks, staleness decay, the confidence floor,
//! classification, write-back of history records, and two runs
//! sharing one database.

use chrono::{DateTime, Duration, TimeZone, Utc};
use remediation_core::{
    calibration_subsystem::{ConfidenceCalibrator, RuleId},
    clock::RunClock,
    clustering_subsystem::{ClusterKey, FailureCluster},
    config::PipelineConfig,
    error::PipelineError,
    pattern_history::{
        classify, InMemoryHistoryRepository, JsonFileHistoryRepository, Outcome, PatternHistory,
        PatternHistoryRepository,
    },
    store::PipelineStore,
    types::{AmountBucket, Bank, CardType, PatternType},
};

fn as_of() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 2, 18, 0, 0).unwrap()
}

/// A cluster that classifies as payment_failure, first seen
/// `minutes_ago` before `as_of()`.
fn cluster(minutes_ago: i64) -> FailureCluster {
    FailureCluster {
        key: ClusterKey {
            bank: Bank::Axis,
            card_type: CardType::Debit,
            amount_bucket: AmountBucket::From1000,
        },
        count: 20,
        avg_amount: 2000.0,
        failure_rate: 0.6,
        start_hour: 17,
        end_hour: 18,
        error_codes: vec!["DECLINED".into()],
        first_failure_at: as_of() - Duration::minutes(minutes_ago),
        last_failure_at: as_of() - Duration::minutes(1),
    }
}

fn history(
    occurrences: u64,
    correct: u64,
    incorrect: u64,
    last_seen_hours_ago: Option<i64>,
    last: Option<Outcome>,
    prior: Option<Outcome>,
) -> PatternHistory {
    PatternHistory {
        total_occurrences: occurrences,
        correct_predictions: correct,
        incorrect_predictions: incorrect,
        last_seen: last_seen_hours_ago.map(|h| as_of() - Duration::hours(h)),
        last_outcome: last,
        prior_outcome: prior,
        ..PatternHistory::new(PatternType::PaymentFailure)
    }
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn unseen_pattern_takes_fresh_modifier_only() {
    let config = PipelineConfig::default();
    let repo = InMemoryHistoryRepository::new();
    let mut calibrator = ConfidenceCalibrator::load(&config, &repo).expect("load");

    let c = calibrator.calibrate(&cluster(5), &RunClock::at(as_of())).expect("calibrate");

    assert_eq!(c.pattern_type, PatternType::PaymentFailure);
    assert_eq!(c.rules_applied, vec![RuleId::FreshPattern]);
    assert_eq!(
        c.rules_overridden,
        vec![RuleId::StaleReset, RuleId::AccuracyModifier, RuleId::ConsecutiveMiss]
    );
    assert!(close(c.base_modifier_before, 1.0));
    assert!(close(c.base_modifier_after, 0.80));
    assert!(close(c.staleness_decay, 1.0));
    assert!(close(c.confidence_baseline, 0.80));
    assert!(!c.floor_hit);
    assert!(!c.needs_rescan);
}

#[test]
fn old_detection_decays_and_flags_rescan() {
    let config = PipelineConfig::default();
    let repo = InMemoryHistoryRepository::new();
    let mut calibrator = ConfidenceCalibrator::load(&config, &repo).expect("load");

    let c = calibrator.calibrate(&cluster(90), &RunClock::at(as_of())).expect("calibrate");

    assert_eq!(c.minutes_since_detection, 90);
    assert!(close(c.staleness_decay, 0.70));
    assert!(close(c.confidence_baseline, 0.56), "baseline {}", c.confidence_baseline);
    assert!(c.needs_rescan, "decay at 0.70 must request a rescan");
}

#[test]
fn stale_history_resets_and_skips_accuracy_rules() {
    let config = PipelineConfig::default();
    let repo = InMemoryHistoryRepository::with_records([history(
        5,
        10,
        1,
        Some(72),
        Some(Outcome::Miss),
        Some(Outcome::Hit),
    )]);
    let mut calibrator = ConfidenceCalibrator::load(&config, &repo).expect("load");

    let c = calibrator.calibrate(&cluster(5), &RunClock::at(as_of())).expect("calibrate");

    assert_eq!(c.rules_applied, vec![RuleId::StaleReset]);
    assert_eq!(c.rules_overridden, vec![RuleId::AccuracyModifier, RuleId::ConsecutiveMiss]);
    assert!(close(c.base_modifier_after, 1.0));
    assert!(close(c.confidence_baseline, 1.0));
}

#[test]
fn two_misses_in_a_row_apply_heavy_penalty() {
    let config = PipelineConfig::default();
    let repo = InMemoryHistoryRepository::with_records([history(
        3,
        9,
        0,
        Some(1),
        Some(Outcome::Hit),
        Some(Outcome::Hit),
    )]);
    let mut calibrator = ConfidenceCalibrator::load(&config, &repo).expect("load");
    let clock = RunClock::at(as_of());
    let pt = PatternType::PaymentFailure;

    let first = calibrator.calibrate(&cluster(5), &clock).expect("first");
    assert_eq!(first.rules_applied, vec![RuleId::AccuracyModifier]);
    assert!(close(first.base_modifier_after, 1.0));
    calibrator.record_outcome(pt, Outcome::Miss).expect("miss 1");

    let second = calibrator.calibrate(&cluster(5), &clock).expect("second");
    assert_eq!(second.rules_applied, vec![RuleId::AccuracyModifier, RuleId::ConsecutiveMiss]);
    assert!(close(second.base_modifier_after, 0.88), "after {}", second.base_modifier_after);
    calibrator.record_outcome(pt, Outcome::Miss).expect("miss 2");

    // 9 of 11 correct lands in the 0.92 band.
    let third = calibrator.calibrate(&cluster(5), &clock).expect("third");
    assert_eq!(third.rules_applied, vec![RuleId::AccuracyModifier, RuleId::ConsecutiveMiss]);
    assert!(close(third.base_modifier_before, 0.88));
    assert!(
        close(third.base_modifier_after, 0.88 * 0.92 * 0.70),
        "after {}",
        third.base_modifier_after
    );
    assert!(third.reasoning.iter().any(|r| r.contains("Two consecutive misses")));
}

#[test]
fn baseline_never_drops_below_floor() {
    let config = PipelineConfig::default();
    let repo = InMemoryHistoryRepository::with_records([history(
        5,
        0,
        5,
        Some(1),
        Some(Outcome::Miss),
        Some(Outcome::Miss),
    )]);
    let mut calibrator = ConfidenceCalibrator::load(&config, &repo).expect("load");

    let c = calibrator.calibrate(&cluster(180), &RunClock::at(as_of())).expect("calibrate");

    assert!(close(c.base_modifier_after, 0.65 * 0.70));
    assert!(close(c.staleness_decay, 0.55));
    assert!(close(c.confidence_baseline, 0.40));
    assert!(c.floor_hit);
    assert!(c.needs_rescan);
    // The floor is not written back into the modifier.
    let stored = repo.load_all().expect("reload");
    assert!(close(stored[&PatternType::PaymentFailure].confidence_modifier, 0.65 * 0.70));
}

#[test]
fn fresh_and_stale_never_fire_together() {
    let config = PipelineConfig::default();
    let outcomes = [None, Some(Outcome::Hit), Some(Outcome::Miss)];
    for occurrences in 0..5u64 {
        for last_seen in [None, Some(1), Some(30), Some(72)] {
            for last in outcomes {
                for prior in outcomes {
                    if prior.is_some() && last.is_none() {
                        continue;
                    }
                    let graded = u64::from(last.is_some()) + u64::from(prior.is_some());
                    let repo = InMemoryHistoryRepository::with_records([history(
                        occurrences,
                        graded / 2,
                        graded - graded / 2,
                        last_seen,
                        last,
                        prior,
                    )]);
                    let mut calibrator = ConfidenceCalibrator::load(&config, &repo).expect("load");
                    for minutes in [0, 20, 45, 100, 600] {
                        let c = calibrator
                            .calibrate(&cluster(minutes), &RunClock::at(as_of()))
                            .expect("calibrate");
                        assert!(
                            !(c.rules_applied.contains(&RuleId::FreshPattern)
                                && c.rules_applied.contains(&RuleId::StaleReset)),
                            "both terminal rules fired: {:?}",
                            c.rules_applied
                        );
                        assert!(c.rules_applied.iter().all(|r| !c.rules_overridden.contains(r)));
                        assert!(c.confidence_baseline >= 0.40, "baseline {}", c.confidence_baseline);
                        assert!(c.confidence_baseline <= 1.0);
                    }
                }
            }
        }
    }
}

#[test]
fn calibration_writes_history_back() {
    let config = PipelineConfig::default();
    let repo = InMemoryHistoryRepository::new();
    let mut calibrator = ConfidenceCalibrator::load(&config, &repo).expect("load");
    calibrator.calibrate(&cluster(5), &RunClock::at(as_of())).expect("calibrate");

    let stored = repo.load_all().expect("reload");
    let h = &stored[&PatternType::PaymentFailure];
    assert_eq!(h.total_occurrences, 1);
    assert_eq!(h.last_seen, Some(as_of()));
    assert!(close(h.confidence_modifier, 0.80));
    assert_eq!(h.adjustments.len(), 1);
    assert_eq!(h.adjustments[0].rules_fired, vec![RuleId::FreshPattern]);
    assert!(close(h.adjustments[0].previous_modifier, 1.0));
}

#[test]
fn concurrent_runs_on_one_database_keep_both_updates() {
    let config = PipelineConfig::default();
    let path = std::env::temp_dir().join(format!("calibration-{}.db", uuid::Uuid::new_v4()));
    let path_str = path.to_str().expect("utf-8 temp path").to_string();
    let first = PipelineStore::open(&path_str).expect("open");
    first.migrate().expect("migrate");
    let second = first.reopen().expect("second connection");

    // Both runs load before either writes.
    let mut run_a = ConfidenceCalibrator::load(&config, &first).expect("load a");
    let mut run_b = ConfidenceCalibrator::load(&config, &second).expect("load b");
    let clock = RunClock::at(as_of());
    let a = run_a.calibrate(&cluster(5), &clock).expect("calibrate a");
    let b = run_b.calibrate(&cluster(5), &clock).expect("calibrate b");
    run_a.record_outcome(PatternType::PaymentFailure, Outcome::Hit).expect("grade a");
    run_b.record_outcome(PatternType::PaymentFailure, Outcome::Miss).expect("grade b");

    let stored = first.load_all().expect("reload");
    drop(run_a);
    drop(run_b);
    drop(second);
    drop(first);
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{path_str}{suffix}"));
    }

    let h = &stored[&PatternType::PaymentFailure];
    assert_eq!(h.total_occurrences, 2);
    assert_eq!(h.correct_predictions, 1);
    assert_eq!(h.incorrect_predictions, 1);
    assert_eq!(h.last_outcome, Some(Outcome::Miss));
    assert_eq!(h.prior_outcome, Some(Outcome::Hit));
    let seqs: Vec<u64> = h.adjustments.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![0, 1]);
    // The second run saw the first run's occurrence.
    assert!(close(a.base_modifier_before, 1.0));
    assert!(close(b.base_modifier_before, 0.80));
}

#[test]
fn last_seen_never_moves_backwards() {
    let config = PipelineConfig::default();
    let later = as_of() + Duration::hours(3);
    let mut seeded = history(4, 2, 0, None, Some(Outcome::Hit), None);
    seeded.last_seen = Some(later);
    let repo = InMemoryHistoryRepository::with_records([seeded]);
    let mut calibrator = ConfidenceCalibrator::load(&config, &repo).expect("load");

    calibrator.calibrate(&cluster(5), &RunClock::at(as_of())).expect("calibrate");
    assert_eq!(calibrator.history(PatternType::PaymentFailure).and_then(|h| h.last_seen), Some(later));
}

#[test]
fn unreadable_history_fails_loading() {
    let path = std::env::temp_dir().join(format!("history-{}.json", uuid::Uuid::new_v4()));
    std::fs::write(&path, "{ not json").expect("write");
    let config = PipelineConfig::default();
    let repo = JsonFileHistoryRepository::new(&path);

    let result = ConfidenceCalibrator::load(&config, &repo);
    let _ = std::fs::remove_file(&path);
    assert!(matches!(result, Err(PipelineError::Serialization(_))));
}

#[test]
fn classification_follows_fixed_order() {
    let cfg = PipelineConfig::default().classification;
    let base = cluster(5);

    let spike = FailureCluster { failure_rate: 0.95, ..base.clone() };
    assert_eq!(classify(&spike, &cfg), PatternType::BankSpike);

    let wide_spike = FailureCluster { failure_rate: 0.95, start_hour: 9, end_hour: 17, ..base.clone() };
    assert_ne!(classify(&wide_spike, &cfg), PatternType::BankSpike);

    let micro = FailureCluster {
        key: ClusterKey { amount_bucket: AmountBucket::Under100, ..base.key },
        avg_amount: 45.0,
        ..base.clone()
    };
    assert_eq!(classify(&micro, &cfg), PatternType::MicroTransaction);

    let vip = FailureCluster { avg_amount: 7800.0, ..base.clone() };
    assert_eq!(classify(&vip, &cfg), PatternType::VipAnomaly);

    let testing = FailureCluster { count: 80, ..base.clone() };
    assert_eq!(classify(&testing, &cfg), PatternType::CardTesting);

    let risky = FailureCluster { error_codes: vec!["SUSPICIOUS_ACTIVITY".into()], ..base.clone() };
    assert_eq!(classify(&risky, &cfg), PatternType::HighRiskPayment);

    assert_eq!(classify(&base, &cfg), PatternType::PaymentFailure);
}
