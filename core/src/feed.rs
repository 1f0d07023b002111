//! Synthetic transaction feed.
//!
//! Produces one day of payments with a 92% baseline success rate and
//! four injected failure traps:
//!   - whale trap:       HDFC Rewards >5000, 14:00-15:59, 98% RISK_THRESHOLD_EXCEEDED
//!   - margin destroyer: SBI <100, 75% DECLINED
//!   - canary spike:     ICICI Debit, 18:00-18:29 at 18% SLOW_RESPONSE,
//!                       then 19:00-19:59 at 100% SERVICE_UNAVAILABLE
//!   - weekend VIP:      VIP Travel on Sat/Sun, 65% FRAUD_CHECK_TIMEOUT
//!
//! Same seed, same feed. All randomness comes from FeedRng.

use crate::{
    rng::{FeedRng, RngStream},
    transaction::Transaction,
    types::{
        Bank, CardType, CustomerTier, MerchantCategory, TxnStatus, CUSTOMER_ERRORS, FRAUD_ERRORS,
        INFRASTRUCTURE_ERRORS, POLICY_ERRORS,
    },
};
use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc, Weekday};

const BASE_SUCCESS_RATE: f64 = 0.92;
const AMOUNT_MIN: f64 = 10.0;
const AMOUNT_MAX: f64 = 15_000.0;
const AMOUNT_GEOMETRIC_MEAN: f64 = 850.0;
const AMOUNT_SIGMA: f64 = 0.8;
const LATENCY_MEAN_MS: f64 = 250.0;
const LATENCY_STD_MS: f64 = 100.0;
const LATENCY_OUTLIER_RATE: f64 = 0.05;

#[derive(Debug, Clone)]
pub struct FeedSpec {
    pub seed: u64,
    pub total_transactions: usize,
    pub start: DateTime<Utc>,
    pub duration_hours: i64,
    /// Share of generated rows forced into trap shapes so every trap
    /// has enough volume to cluster.
    pub trap_share: f64,
}

impl Default for FeedSpec {
    fn default() -> Self {
        Self {
            seed: 42,
            total_transactions: 2500,
            // Saturday, so the weekend trap is live.
            start: Utc.with_ymd_and_hms(2026, 1, 31, 0, 0, 0).single().unwrap_or_default(),
            duration_hours: 24,
            trap_share: 0.12,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trap {
    WhaleTrap,
    MarginDestroyer,
    CanarySpike,
    WeekendVip,
}

impl Trap {
    const ALL: [Trap; 4] = [
        Trap::WhaleTrap,
        Trap::MarginDestroyer,
        Trap::CanarySpike,
        Trap::WeekendVip,
    ];

    fn matches(&self, t: &Transaction) -> bool {
        let hour = t.timestamp.hour();
        let minute = t.timestamp.minute();
        match self {
            Trap::WhaleTrap => {
                t.bank == Bank::Hdfc
                    && t.card_type == CardType::Rewards
                    && t.amount > 5000.0
                    && (14..=15).contains(&hour)
            }
            Trap::MarginDestroyer => t.bank == Bank::Sbi && t.amount < 100.0,
            Trap::CanarySpike => {
                t.bank == Bank::Icici
                    && t.card_type == CardType::Debit
                    && ((hour == 18 && minute < 30) || hour == 19)
            }
            Trap::WeekendVip => {
                t.customer_tier == CustomerTier::Vip
                    && t.merchant_category == MerchantCategory::Travel
                    && matches!(t.timestamp.weekday(), Weekday::Sat | Weekday::Sun)
            }
        }
    }

    fn failure_rate(&self, t: &Transaction) -> f64 {
        match self {
            Trap::WhaleTrap => 0.98,
            Trap::MarginDestroyer => 0.75,
            Trap::CanarySpike if t.timestamp.hour() == 18 => 0.18,
            Trap::CanarySpike => 1.0,
            Trap::WeekendVip => 0.65,
        }
    }

    fn error_code(&self, t: &Transaction, rng: &mut FeedRng) -> &'static str {
        let (primary, diversity) = match self {
            Trap::WhaleTrap => ("RISK_THRESHOLD_EXCEEDED", 0.10),
            Trap::MarginDestroyer => ("DECLINED", 0.20),
            Trap::CanarySpike if t.timestamp.hour() == 18 => ("SLOW_RESPONSE", 0.0),
            Trap::CanarySpike => ("SERVICE_UNAVAILABLE", 0.0),
            Trap::WeekendVip => ("FRAUD_CHECK_TIMEOUT", 0.30),
        };
        if rng.chance(diversity) {
            random_error_code(rng)
        } else {
            primary
        }
    }

    /// Bend a base transaction into this trap's shape.
    fn shape(&self, t: &mut Transaction, rng: &mut FeedRng) {
        match self {
            Trap::WhaleTrap => {
                t.bank = Bank::Hdfc;
                t.card_type = CardType::Rewards;
                t.amount = round2(5001.0 + rng.next_f64() * 7000.0);
                t.timestamp = with_hour(t.timestamp, 14 + rng.next_u64_below(2) as u32);
            }
            Trap::MarginDestroyer => {
                t.bank = Bank::Sbi;
                t.amount = round2(10.0 + rng.next_f64() * 80.0);
            }
            Trap::CanarySpike => {
                t.bank = Bank::Icici;
                t.card_type = CardType::Debit;
                let hour = if rng.chance(0.3) { 18 } else { 19 };
                let ts = with_hour(t.timestamp, hour);
                t.timestamp = if hour == 18 {
                    ts.with_minute(ts.minute() % 30).unwrap_or(ts)
                } else {
                    ts
                };
            }
            Trap::WeekendVip => {
                t.customer_tier = CustomerTier::Vip;
                t.merchant_category = MerchantCategory::Travel;
            }
        }
    }
}

fn with_hour(ts: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    ts.with_hour(hour).unwrap_or(ts)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn random_error_code(rng: &mut FeedRng) -> &'static str {
    let family: &[&'static str] = match rng.next_u64_below(4) {
        0 => INFRASTRUCTURE_ERRORS,
        1 => POLICY_ERRORS,
        2 => CUSTOMER_ERRORS,
        _ => FRAUD_ERRORS,
    };
    *rng.pick(family)
}

/// Generate the feed described by `spec`.
pub fn generate(spec: &FeedSpec) -> Vec<Transaction> {
    let mut rng = FeedRng::new(spec.seed, RngStream::Feed as u64);
    let mut trap_rng = FeedRng::new(spec.seed, RngStream::Traps as u64);
    let total = spec.total_transactions.max(1);
    let span_secs = spec.duration_hours * 3600;

    let mut out = Vec::with_capacity(total);
    for index in 0..total {
        let offset = span_secs * index as i64 / total as i64;
        let mut txn = Transaction {
            transaction_id: format!("TXN{index:05}"),
            timestamp: spec.start + Duration::seconds(offset),
            bank: *rng.pick(Bank::ALL),
            card_type: *rng.pick(CardType::ALL),
            merchant_category: *rng.pick(MerchantCategory::ALL),
            customer_tier: *rng.pick(CustomerTier::ALL),
            amount: round2(
                rng.lognormal(AMOUNT_GEOMETRIC_MEAN, AMOUNT_SIGMA)
                    .clamp(AMOUNT_MIN, AMOUNT_MAX),
            ),
            currency: "INR".into(),
            status: TxnStatus::Success,
            latency_ms: 0,
            error_code: None,
        };

        if trap_rng.chance(spec.trap_share) {
            let trap = *trap_rng.pick(&Trap::ALL);
            trap.shape(&mut txn, &mut trap_rng);
        }

        let trap = Trap::ALL.iter().find(|t| t.matches(&txn)).copied();
        let failed = match trap {
            Some(t) => trap_rng.chance(t.failure_rate(&txn)),
            None => !rng.chance(BASE_SUCCESS_RATE),
        };

        let mut latency = if rng.chance(LATENCY_OUTLIER_RATE) {
            2000.0 + rng.next_f64() * 3000.0
        } else {
            rng.normal(LATENCY_MEAN_MS, LATENCY_STD_MS).max(50.0)
        };

        if failed {
            let code = match trap {
                Some(t) => {
                    latency *= match t {
                        Trap::WhaleTrap => 3.0,
                        Trap::WeekendVip => 2.5,
                        _ => 1.0,
                    };
                    t.error_code(&txn, &mut trap_rng)
                }
                None => random_error_code(&mut rng),
            };
            txn.status = TxnStatus::Failed;
            txn.error_code = Some(code.to_string());
        }
        txn.latency_ms = latency as u32;
        out.push(txn);
    }

    // Trap shaping can move timestamps; keep the feed in time order.
    out.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.transaction_id.cmp(&b.transaction_id))
    });
    out
}
