//! Transaction records and feed ingestion.
//!
//! The feed is untrusted. `RawTransaction` mirrors whatever the
//! producer wrote; `ingest` turns each raw record into a typed
//! `Transaction` or a list of defects. A bad record is skipped,
//! never fatal to the run.

use crate::types::{
    AmountBucket, Bank, CardType, CustomerTier, MerchantCategory, TransactionId, TxnStatus,
};
use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub transaction_id: TransactionId,
    pub timestamp: DateTime<Utc>,
    pub bank: Bank,
    pub card_type: CardType,
    pub merchant_category: MerchantCategory,
    pub customer_tier: CustomerTier,
    pub amount: f64,
    pub currency: String,
    pub status: TxnStatus,
    pub latency_ms: u32,
    /// Present iff status is FAILED.
    pub error_code: Option<String>,
}

impl Transaction {
    pub fn is_failure(&self) -> bool {
        self.status == TxnStatus::Failed
    }

    pub fn hour(&self) -> u32 {
        self.timestamp.hour()
    }

    pub fn amount_bucket(&self) -> AmountBucket {
        AmountBucket::for_amount(self.amount)
    }
}

/// A transaction as the producer wrote it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTransaction {
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub bank: Option<String>,
    #[serde(default)]
    pub card_type: Option<String>,
    #[serde(default)]
    pub merchant_category: Option<String>,
    #[serde(default)]
    pub customer_tier: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub latency_ms: Option<i64>,
    #[serde(default)]
    pub error_code: Option<String>,
}

impl From<&Transaction> for RawTransaction {
    fn from(t: &Transaction) -> Self {
        Self {
            transaction_id: Some(t.transaction_id.clone()),
            timestamp: Some(t.timestamp.to_rfc3339()),
            bank: Some(t.bank.label().into()),
            card_type: Some(t.card_type.label().into()),
            merchant_category: Some(t.merchant_category.label().into()),
            customer_tier: Some(t.customer_tier.label().into()),
            amount: Some(t.amount),
            currency: Some(t.currency.clone()),
            status: Some(t.status.label().into()),
            latency_ms: Some(t.latency_ms as i64),
            error_code: t.error_code.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "defect", rename_all = "snake_case")]
pub enum RecordDefect {
    MissingField { field: String },
    UnknownLabel { field: String, value: String },
    BadTimestamp { value: String },
    NonPositiveAmount { value: f64 },
    NegativeLatency { value: i64 },
    ErrorCodeOnSuccess,
    MissingErrorCode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedRecord {
    pub index: usize,
    pub transaction_id: Option<String>,
    pub defects: Vec<RecordDefect>,
}

#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub accepted: Vec<Transaction>,
    pub skipped: Vec<SkippedRecord>,
}

impl IngestReport {
    pub fn processed(&self) -> usize {
        self.accepted.len() + self.skipped.len()
    }
}

/// Accepts RFC 3339 or a naive `YYYY-MM-DDTHH:MM:SS[.f]` read as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|n| n.and_utc())
}

fn required<'a>(
    field: &str,
    value: &'a Option<String>,
    defects: &mut Vec<RecordDefect>,
) -> Option<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Some(v),
        _ => {
            defects.push(RecordDefect::MissingField { field: field.into() });
            None
        }
    }
}

fn labelled<T>(
    field: &str,
    value: &Option<String>,
    lookup: fn(&str) -> Option<T>,
    defects: &mut Vec<RecordDefect>,
) -> Option<T> {
    let raw = required(field, value, defects)?;
    let parsed = lookup(raw);
    if parsed.is_none() {
        defects.push(RecordDefect::UnknownLabel {
            field: field.into(),
            value: raw.into(),
        });
    }
    parsed
}

impl RawTransaction {
    /// Validate one record. All defects are collected, not just the first.
    pub fn into_transaction(self) -> Result<Transaction, Vec<RecordDefect>> {
        let mut defects = Vec::new();

        let id = required("transaction_id", &self.transaction_id, &mut defects).map(str::to_string);
        let timestamp = required("timestamp", &self.timestamp, &mut defects).and_then(|s| {
            let parsed = parse_timestamp(s);
            if parsed.is_none() {
                defects.push(RecordDefect::BadTimestamp { value: s.into() });
            }
            parsed
        });
        let bank = labelled("bank", &self.bank, Bank::from_label, &mut defects);
        let card_type = labelled("card_type", &self.card_type, CardType::from_label, &mut defects);
        let merchant = labelled(
            "merchant_category",
            &self.merchant_category,
            MerchantCategory::from_label,
            &mut defects,
        );
        let tier = labelled("customer_tier", &self.customer_tier, CustomerTier::from_label, &mut defects);
        let status = labelled("status", &self.status, TxnStatus::from_label, &mut defects);

        let amount = match self.amount {
            Some(a) if a.is_finite() && a > 0.0 => Some(a),
            Some(a) => {
                defects.push(RecordDefect::NonPositiveAmount { value: a });
                None
            }
            None => {
                defects.push(RecordDefect::MissingField { field: "amount".into() });
                None
            }
        };
        let latency = match self.latency_ms {
            Some(l) if l < 0 => {
                defects.push(RecordDefect::NegativeLatency { value: l });
                None
            }
            Some(l) => Some(l.min(u32::MAX as i64) as u32),
            None => Some(0),
        };

        let error_code = self
            .error_code
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        match (status, &error_code) {
            (Some(TxnStatus::Success), Some(_)) => defects.push(RecordDefect::ErrorCodeOnSuccess),
            (Some(TxnStatus::Failed), None) => defects.push(RecordDefect::MissingErrorCode),
            _ => {}
        }

        if !defects.is_empty() {
            return Err(defects);
        }

        // Every Option below is Some when defects is empty.
        match (id, timestamp, bank, card_type, merchant, tier, amount, status, latency) {
            (
                Some(transaction_id),
                Some(timestamp),
                Some(bank),
                Some(card_type),
                Some(merchant_category),
                Some(customer_tier),
                Some(amount),
                Some(status),
                Some(latency_ms),
            ) => Ok(Transaction {
                transaction_id,
                timestamp,
                bank,
                card_type,
                merchant_category,
                customer_tier,
                amount,
                currency: self
                    .currency
                    .filter(|c| !c.trim().is_empty())
                    .unwrap_or_else(|| "INR".into()),
                status,
                latency_ms,
                error_code,
            }),
            _ => Err(vec![RecordDefect::MissingField { field: "unknown".into() }]),
        }
    }
}

/// Validate a whole feed, record by record.
pub fn ingest(raws: Vec<RawTransaction>) -> IngestReport {
    let mut report = IngestReport::default();
    for (index, raw) in raws.into_iter().enumerate() {
        let transaction_id = raw.transaction_id.clone();
        match raw.into_transaction() {
            Ok(txn) => report.accepted.push(txn),
            Err(defects) => {
                log::warn!(
                    "Skipping record #{index} ({}): {:?}",
                    transaction_id.as_deref().unwrap_or("no id"),
                    defects
                );
                report.skipped.push(SkippedRecord {
                    index,
                    transaction_id,
                    defects,
                });
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_failed() -> RawTransaction {
        RawTransaction {
            transaction_id: Some("TXN00042".into()),
            timestamp: Some("2026-01-31T14:30:00".into()),
            bank: Some("HDFC".into()),
            card_type: Some("Rewards".into()),
            merchant_category: Some("E-commerce".into()),
            customer_tier: Some("VIP".into()),
            amount: Some(7842.5),
            currency: None,
            status: Some("FAILED".into()),
            latency_ms: Some(8000),
            error_code: Some("RISK_THRESHOLD_EXCEEDED".into()),
        }
    }

    #[test]
    fn accepts_naive_timestamp_as_utc() {
        let txn = raw_failed().into_transaction().unwrap();
        assert_eq!(txn.hour(), 14);
        assert_eq!(txn.currency, "INR");
        assert_eq!(txn.amount_bucket(), AmountBucket::Over5000);
    }

    #[test]
    fn failed_without_error_code_is_rejected() {
        let mut raw = raw_failed();
        raw.error_code = None;
        let defects = raw.into_transaction().unwrap_err();
        assert_eq!(defects, vec![RecordDefect::MissingErrorCode]);
    }

    #[test]
    fn collects_every_defect() {
        let raw = RawTransaction {
            transaction_id: Some("TXN1".into()),
            timestamp: Some("yesterday".into()),
            bank: Some("Citi".into()),
            amount: Some(-5.0),
            status: Some("SUCCESS".into()),
            error_code: Some("DECLINED".into()),
            ..Default::default()
        };
        let defects = raw.into_transaction().unwrap_err();
        assert!(defects.contains(&RecordDefect::BadTimestamp { value: "yesterday".into() }));
        assert!(defects.contains(&RecordDefect::UnknownLabel {
            field: "bank".into(),
            value: "Citi".into()
        }));
        assert!(defects.contains(&RecordDefect::NonPositiveAmount { value: -5.0 }));
        assert!(defects.contains(&RecordDefect::ErrorCodeOnSuccess));
    }

    #[test]
    fn ingest_skips_without_aborting() {
        let mut bad = raw_failed();
        bad.bank = None;
        let report = ingest(vec![raw_failed(), bad, raw_failed()]);
        assert_eq!(report.accepted.len(), 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].index, 1);
        assert_eq!(report.processed(), 3);
    }
}
