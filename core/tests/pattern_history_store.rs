//! Pattern history persistence tests.
//!
//! Tests cover: SQLite round trips (in-memory and on disk across
//! connections), append-only adjustment logs, read-modify-write from
//! two connections, corrupt rows, and the JSON file repository.

use chrono::{DateTime, Duration, TimeZone, Utc};
use remediation_core::{
    calibration_subsystem::RuleId,
    error::PipelineError,
    pattern_history::{JsonFileHistoryRepository, Outcome, PatternHistory, PatternHistoryRepository},
    store::PipelineStore,
    types::PatternType,
};
use std::collections::BTreeMap;
use std::path::PathBuf;

fn at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 2, 18, 0, 0).unwrap() + Duration::nanoseconds(123_456_789)
}

fn sample(pattern_type: PatternType) -> PatternHistory {
    let mut h = PatternHistory::new(pattern_type);
    h.total_occurrences = 4;
    h.last_seen = Some(at());
    h.record_outcome(Outcome::Hit);
    h.record_outcome(Outcome::Miss);
    h.append_adjustment(at() - Duration::hours(2), 1.0, 0.8, vec![RuleId::FreshPattern]);
    h.append_adjustment(at(), 0.8, 0.64, vec![RuleId::AccuracyModifier, RuleId::ConsecutiveMiss]);
    h.confidence_modifier = 0.64;
    h
}

fn sample_map() -> BTreeMap<PatternType, PatternHistory> {
    [sample(PatternType::BankSpike), sample(PatternType::MicroTransaction)]
        .into_iter()
        .map(|h| (h.pattern_type, h))
        .collect()
}

fn temp_path(ext: &str) -> PathBuf {
    std::env::temp_dir().join(format!("pattern-history-{}.{ext}", uuid::Uuid::new_v4()))
}

fn cleanup(path: &PathBuf) {
    for suffix in ["", "-wal", "-shm"] {
        let mut p = path.clone().into_os_string();
        p.push(suffix);
        let _ = std::fs::remove_file(p);
    }
}

fn migrated_memory_store() -> PipelineStore {
    let store = PipelineStore::in_memory().expect("in-memory store");
    store.migrate().expect("migrate");
    store
}

#[test]
fn empty_store_loads_nothing() {
    let store = migrated_memory_store();
    assert!(store.load_all().expect("load").is_empty());
    assert_eq!(store.pattern_history_count().unwrap(), 0);
}

#[test]
fn sqlite_round_trip_preserves_every_field() {
    let store = migrated_memory_store();
    let original = sample_map();
    store.save_all(&original).expect("save");

    let loaded = store.load_all().expect("load");
    assert_eq!(loaded, original);
    assert_eq!(loaded[&PatternType::BankSpike].accuracy(), Some(0.5));
    assert_eq!(loaded[&PatternType::BankSpike].last_outcome, Some(Outcome::Miss));
    assert_eq!(loaded[&PatternType::BankSpike].prior_outcome, Some(Outcome::Hit));
}

#[test]
fn history_survives_a_new_connection() {
    let path = temp_path("db");
    let path_str = path.to_str().expect("utf-8 temp path").to_string();
    {
        let store = PipelineStore::open(&path_str).expect("open");
        store.migrate().expect("migrate");
        store.save_all(&sample_map()).expect("save");
    }

    let store = PipelineStore::open(&path_str).expect("reopen");
    store.migrate().expect("migrate is idempotent");
    let loaded = store.load_all().expect("load");
    let second = store.reopen().expect("second connection").load_all().expect("load");
    cleanup(&path);

    assert_eq!(loaded, sample_map());
    assert_eq!(second, loaded);
}

#[test]
fn adjustments_are_appended_not_rewritten() {
    let store = migrated_memory_store();
    let mut h = sample(PatternType::VipAnomaly);
    store.save_one(&h).expect("save");
    assert_eq!(store.adjustment_count(PatternType::VipAnomaly).unwrap(), 2);

    h.total_occurrences += 1;
    h.append_adjustment(at() + Duration::hours(1), h.confidence_modifier, 1.0, vec![RuleId::StaleReset]);
    h.confidence_modifier = 1.0;
    store.save_one(&h).expect("save again");

    assert_eq!(store.adjustment_count(PatternType::VipAnomaly).unwrap(), 3);
    assert_eq!(store.pattern_history_count().unwrap(), 1);
    let loaded = store.load_all().expect("load");
    assert_eq!(loaded[&PatternType::VipAnomaly], h);
}

#[test]
fn updates_from_two_connections_both_land() {
    let path = temp_path("db");
    let path_str = path.to_str().expect("utf-8 temp path").to_string();
    let first = PipelineStore::open(&path_str).expect("open");
    first.migrate().expect("migrate");
    let second = first.reopen().expect("second connection");

    let bump = |store: &PipelineStore, modifier: f64| {
        store
            .update(PatternType::CardTesting, &mut |h: &mut PatternHistory| {
                h.total_occurrences += 1;
                let before = h.confidence_modifier;
                h.append_adjustment(at(), before, modifier, vec![RuleId::FreshPattern]);
                h.confidence_modifier = modifier;
            })
            .expect("update")
    };
    let after_first = bump(&first, 0.8);
    let after_second = bump(&second, 0.5);
    let loaded = first.load_all().expect("load");
    let adjustments = first.adjustment_count(PatternType::CardTesting).expect("count");
    drop((first, second));
    cleanup(&path);

    assert_eq!(after_first.total_occurrences, 1);
    assert_eq!(after_second.total_occurrences, 2);
    assert_eq!(after_second.adjustments[1].previous_modifier, 0.8);
    assert_eq!(loaded[&PatternType::CardTesting], after_second);
    assert_eq!(adjustments, 2);
}

#[test]
fn save_one_leaves_other_records_alone() {
    let store = migrated_memory_store();
    store.save_all(&sample_map()).expect("save");

    let mut spike = sample(PatternType::BankSpike);
    spike.record_outcome(Outcome::Hit);
    store.save_one(&spike).expect("save one");

    let loaded = store.load_all().expect("load");
    assert_eq!(loaded[&PatternType::BankSpike].correct_predictions, 2);
    assert_eq!(loaded[&PatternType::MicroTransaction], sample(PatternType::MicroTransaction));
}

#[test]
fn corrupt_rows_fail_loudly() {
    let path = temp_path("db");
    let path_str = path.to_str().expect("utf-8 temp path").to_string();
    let store = PipelineStore::open(&path_str).expect("open");
    store.migrate().expect("migrate");

    let raw = rusqlite::Connection::open(&path).expect("raw connection");
    raw.execute(
        "INSERT INTO pattern_history (pattern_type, total_occurrences, correct_predictions,
            incorrect_predictions, last_seen, confidence_modifier)
         VALUES ('bank_spike', 3, 1, 0, 'last tuesday', 0.9)",
        [],
    )
    .expect("insert bad timestamp");
    let bad_timestamp = store.load_all();

    raw.execute("DELETE FROM pattern_history", []).expect("clear");
    raw.execute(
        "INSERT INTO pattern_history (pattern_type, total_occurrences, correct_predictions,
            incorrect_predictions, confidence_modifier)
         VALUES ('weather_event', 1, 0, 0, 1.0)",
        [],
    )
    .expect("insert unknown type");
    let unknown_type = store.load_all();

    raw.execute("DELETE FROM pattern_history", []).expect("clear");
    raw.execute(
        "INSERT INTO pattern_history (pattern_type, total_occurrences, correct_predictions,
            incorrect_predictions, confidence_modifier)
         VALUES ('card_testing', 1, 0, 0, -0.5)",
        [],
    )
    .expect("insert negative modifier");
    let negative_modifier = store.load_all();

    drop(raw);
    drop(store);
    cleanup(&path);

    for (name, result) in [
        ("bad timestamp", bad_timestamp),
        ("unknown type", unknown_type),
        ("negative modifier", negative_modifier),
    ] {
        assert!(
            matches!(result, Err(PipelineError::HistoryCorrupt { .. })),
            "{name}: expected HistoryCorrupt, got {result:?}"
        );
    }
}

#[test]
fn json_repository_round_trip() {
    let path = temp_path("json");
    let repo = JsonFileHistoryRepository::new(&path);

    assert!(repo.load_all().expect("missing file loads empty").is_empty());
    repo.save_all(&sample_map()).expect("save");
    let loaded = repo.load_all().expect("load");

    let mut spike = sample(PatternType::BankSpike);
    spike.total_occurrences = 9;
    repo.save_one(&spike).expect("save one");
    let updated = repo.load_all().expect("reload");
    let _ = std::fs::remove_file(&path);

    assert_eq!(loaded, sample_map());
    assert_eq!(updated[&PatternType::BankSpike].total_occurrences, 9);
    assert_eq!(updated.len(), 2);
}

#[test]
fn json_repository_rejects_log_gaps() {
    let path = temp_path("json");
    let mut h = sample(PatternType::CardTesting);
    h.adjustments[1].seq = 5;
    std::fs::write(&path, serde_json::to_string(&vec![h]).unwrap()).unwrap();

    let result = JsonFileHistoryRepository::new(&path).load_all();
    let _ = std::fs::remove_file(&path);
    assert!(matches!(result, Err(PipelineError::HistoryCorrupt { .. })));
}
