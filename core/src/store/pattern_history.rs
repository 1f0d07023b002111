//! Store methods for pattern history.
//!
//! `update` re-reads the record, applies the change and writes it back
//! inside one BEGIN IMMEDIATE transaction, so two runs sharing a
//! database serialize per record instead of losing increments. New
//! adjustment entries take their seq from what is stored at that moment.

use crate::{
    calibration_subsystem::RuleId,
    error::{PipelineError, PipelineResult},
    pattern_history::{AdjustmentLogEntry, Outcome, PatternHistory, PatternHistoryRepository},
    types::PatternType,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use std::collections::BTreeMap;

use super::{encode_timestamp, PipelineStore};

struct HistoryRow {
    pattern_type: String,
    total_occurrences: i64,
    correct_predictions: i64,
    incorrect_predictions: i64,
    last_seen: Option<String>,
    last_outcome: Option<String>,
    prior_outcome: Option<String>,
    confidence_modifier: f64,
}

struct AdjustmentRow {
    pattern_type: String,
    seq: i64,
    at: String,
    previous_modifier: f64,
    new_modifier: f64,
    rules_fired: String,
}

fn corrupt(pattern_type: &str, detail: impl Into<String>) -> PipelineError {
    PipelineError::HistoryCorrupt {
        pattern_type: pattern_type.to_string(),
        detail: detail.into(),
    }
}

fn decode_timestamp(pattern_type: &str, s: &str) -> PipelineResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| corrupt(pattern_type, format!("bad timestamp '{s}': {e}")))
}

fn decode_outcome(pattern_type: &str, s: Option<String>) -> PipelineResult<Option<Outcome>> {
    match s {
        None => Ok(None),
        Some(label) => Outcome::from_label(&label)
            .map(Some)
            .ok_or_else(|| corrupt(pattern_type, format!("unknown outcome '{label}'"))),
    }
}

fn decode_count(pattern_type: &str, field: &str, v: i64) -> PipelineResult<u64> {
    u64::try_from(v).map_err(|_| corrupt(pattern_type, format!("{field} is negative ({v})")))
}

fn encode_rules(rules: &[RuleId]) -> String {
    rules.iter().map(|r| r.label()).collect::<Vec<_>>().join(",")
}

fn decode_rules(pattern_type: &str, s: &str) -> PipelineResult<Vec<RuleId>> {
    if s.is_empty() {
        return Ok(Vec::new());
    }
    s.split(',')
        .map(|label| {
            RuleId::from_label(label).ok_or_else(|| corrupt(pattern_type, format!("unknown rule '{label}'")))
        })
        .collect()
}

fn write_history(tx: &Transaction<'_>, h: &PatternHistory) -> PipelineResult<()> {
    write_record(tx, h)?;
    // Entries already stored are left untouched.
    insert_adjustments(tx, h.pattern_type, &h.adjustments, "INSERT OR IGNORE")
}

fn write_record(tx: &Transaction<'_>, h: &PatternHistory) -> PipelineResult<()> {
    let label = h.pattern_type.label();
    tx.execute(
        "INSERT INTO pattern_history (
            pattern_type, total_occurrences, correct_predictions, incorrect_predictions,
            last_seen, last_outcome, prior_outcome, confidence_modifier
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(pattern_type) DO UPDATE SET
            total_occurrences     = excluded.total_occurrences,
            correct_predictions   = excluded.correct_predictions,
            incorrect_predictions = excluded.incorrect_predictions,
            last_seen             = excluded.last_seen,
            last_outcome          = excluded.last_outcome,
            prior_outcome         = excluded.prior_outcome,
            confidence_modifier   = excluded.confidence_modifier",
        params![
            label,
            h.total_occurrences as i64,
            h.correct_predictions as i64,
            h.incorrect_predictions as i64,
            h.last_seen.as_ref().map(encode_timestamp),
            h.last_outcome.map(|o| o.label()),
            h.prior_outcome.map(|o| o.label()),
            h.confidence_modifier,
        ],
    )?;
    Ok(())
}

fn insert_adjustments(
    tx: &Transaction<'_>,
    pattern_type: PatternType,
    entries: &[AdjustmentLogEntry],
    verb: &str,
) -> PipelineResult<()> {
    let label = pattern_type.label();
    let mut stmt = tx.prepare_cached(&format!(
        "{verb} INTO pattern_adjustment (
            pattern_type, seq, at, previous_modifier, new_modifier, rules_fired
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
    ))?;
    for entry in entries {
        stmt.execute(params![
            label,
            entry.seq as i64,
            encode_timestamp(&entry.at),
            entry.previous_modifier,
            entry.new_modifier,
            encode_rules(&entry.rules_fired),
        ])?;
    }
    Ok(())
}

/// Every record, or just `only` when given.
fn read_histories(
    conn: &Connection,
    only: Option<PatternType>,
) -> PipelineResult<BTreeMap<PatternType, PatternHistory>> {
    let filter = only.map(|pt| pt.label());
    let mut stmt = conn.prepare(
        "SELECT pattern_type, total_occurrences, correct_predictions, incorrect_predictions,
                last_seen, last_outcome, prior_outcome, confidence_modifier
         FROM pattern_history
         WHERE ?1 IS NULL OR pattern_type = ?1
         ORDER BY pattern_type",
    )?;
    let rows = stmt
        .query_map(params![filter], |row| {
            Ok(HistoryRow {
                pattern_type: row.get(0)?,
                total_occurrences: row.get(1)?,
                correct_predictions: row.get(2)?,
                incorrect_predictions: row.get(3)?,
                last_seen: row.get(4)?,
                last_outcome: row.get(5)?,
                prior_outcome: row.get(6)?,
                confidence_modifier: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = BTreeMap::new();
    for row in rows {
        let label = row.pattern_type.as_str();
        let pattern_type = PatternType::from_label(label)
            .ok_or_else(|| corrupt(label, "unknown pattern type"))?;
        let history = PatternHistory {
            pattern_type,
            total_occurrences: decode_count(label, "total_occurrences", row.total_occurrences)?,
            correct_predictions: decode_count(label, "correct_predictions", row.correct_predictions)?,
            incorrect_predictions: decode_count(label, "incorrect_predictions", row.incorrect_predictions)?,
            last_seen: row.last_seen.as_deref().map(|s| decode_timestamp(label, s)).transpose()?,
            last_outcome: decode_outcome(label, row.last_outcome)?,
            prior_outcome: decode_outcome(label, row.prior_outcome)?,
            confidence_modifier: row.confidence_modifier,
            adjustments: Vec::new(),
        };
        out.insert(pattern_type, history);
    }

    let mut stmt = conn.prepare(
        "SELECT pattern_type, seq, at, previous_modifier, new_modifier, rules_fired
         FROM pattern_adjustment
         WHERE ?1 IS NULL OR pattern_type = ?1
         ORDER BY pattern_type, seq",
    )?;
    let adjustments = stmt
        .query_map(params![filter], |row| {
            Ok(AdjustmentRow {
                pattern_type: row.get(0)?,
                seq: row.get(1)?,
                at: row.get(2)?,
                previous_modifier: row.get(3)?,
                new_modifier: row.get(4)?,
                rules_fired: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for row in adjustments {
        let label = row.pattern_type.as_str();
        let history = PatternType::from_label(label)
            .and_then(|pt| out.get_mut(&pt))
            .ok_or_else(|| corrupt(label, "adjustment without a history record"))?;
        history.adjustments.push(AdjustmentLogEntry {
            seq: decode_count(label, "seq", row.seq)?,
            at: decode_timestamp(label, &row.at)?,
            previous_modifier: row.previous_modifier,
            new_modifier: row.new_modifier,
            rules_fired: decode_rules(label, &row.rules_fired)?,
        });
    }

    for history in out.values() {
        history.check_integrity()?;
    }
    Ok(out)
}

impl PipelineStore {
    pub fn pattern_history_count(&self) -> PipelineResult<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM pattern_history", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn adjustment_count(&self, pattern_type: PatternType) -> PipelineResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM pattern_adjustment WHERE pattern_type = ?1",
            params![pattern_type.label()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

impl PatternHistoryRepository for PipelineStore {
    fn load_all(&self) -> PipelineResult<BTreeMap<PatternType, PatternHistory>> {
        read_histories(&self.conn, None)
    }

    fn save_all(&self, histories: &BTreeMap<PatternType, PatternHistory>) -> PipelineResult<()> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        for history in histories.values() {
            write_history(&tx, history)?;
        }
        tx.commit()?;
        log::debug!("Saved {} pattern history records", histories.len());
        Ok(())
    }

    fn save_one(&self, history: &PatternHistory) -> PipelineResult<()> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        write_history(&tx, history)?;
        tx.commit()?;
        Ok(())
    }

    fn update(
        &self,
        pattern_type: PatternType,
        change: &mut dyn FnMut(&mut PatternHistory),
    ) -> PipelineResult<PatternHistory> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let mut history = read_histories(&tx, Some(pattern_type))?
            .remove(&pattern_type)
            .unwrap_or_else(|| PatternHistory::new(pattern_type));
        let stored = history.adjustments.len();
        change(&mut history);
        if history.adjustments.len() < stored {
            return Err(corrupt(pattern_type.label(), "update removed adjustment log entries"));
        }
        history.check_integrity()?;
        write_record(&tx, &history)?;
        // Plain INSERT: a seq collision here means the log was forked.
        insert_adjustments(&tx, pattern_type, &history.adjustments[stored..], "INSERT")?;
        tx.commit()?;
        Ok(history)
    }
}
