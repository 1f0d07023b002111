//! Failure clustering and impact ranking.
//!
//! Clusters are ephemeral: recomputed from the feed every run and
//! never persisted. Grouping is keyed by (bank, card type, amount
//! bucket) and iterated in label order, so identical input always
//! yields identical output order. Ranking ties break on the same
//! key.

use crate::{
    config::ClusteringConfig,
    transaction::Transaction,
    types::{AmountBucket, Bank, CardType},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterKey {
    pub bank: Bank,
    pub card_type: CardType,
    pub amount_bucket: AmountBucket,
}

impl ClusterKey {
    pub fn of(t: &Transaction) -> Self {
        Self {
            bank: t.bank,
            card_type: t.card_type,
            amount_bucket: t.amount_bucket(),
        }
    }

    fn labels(&self) -> (&'static str, &'static str, &'static str) {
        (self.bank.label(), self.card_type.label(), self.amount_bucket.label())
    }
}

/// Alphabetical on the display labels, not on declaration order.
impl Ord for ClusterKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.labels().cmp(&other.labels())
    }
}

impl PartialOrd for ClusterKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.bank, self.card_type, self.amount_bucket)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureCluster {
    pub key: ClusterKey,
    pub count: usize,
    pub avg_amount: f64,
    /// Failures / all transactions sharing the key. In [0, 1].
    pub failure_rate: f64,
    pub start_hour: u32,
    /// Exclusive.
    pub end_hour: u32,
    /// Most frequent first, at most three.
    pub error_codes: Vec<String>,
    pub first_failure_at: DateTime<Utc>,
    pub last_failure_at: DateTime<Utc>,
}

impl FailureCluster {
    pub fn bank(&self) -> Bank {
        self.key.bank
    }

    pub fn card_type(&self) -> CardType {
        self.key.card_type
    }

    pub fn amount_bucket(&self) -> AmountBucket {
        self.key.amount_bucket
    }

    /// Business impact used for ranking.
    pub fn impact_score(&self) -> f64 {
        self.count as f64 * self.avg_amount
    }

    pub fn window_hours(&self) -> u32 {
        self.end_hour.saturating_sub(self.start_hour)
    }

    pub fn time_window(&self) -> String {
        format!("{:02}:00-{:02}:00", self.start_hour, self.end_hour)
    }

    /// One-line summary handed to the proposer and used for keyword checks.
    pub fn describe(&self) -> String {
        format!(
            "Pattern: {} {} | Amount range: ₹{} | Failures: {} ({:.1}%) | Avg amount: ₹{:.2} | Time: {} | Errors: {}",
            self.key.bank,
            self.key.card_type,
            self.key.amount_bucket,
            self.count,
            self.failure_rate * 100.0,
            self.avg_amount,
            self.time_window(),
            self.error_codes.join(", "),
        )
    }
}

/// Rank by count of `key`, then ascending `key`.
fn top_by_frequency<K: Ord + Clone>(counts: BTreeMap<K, usize>, n: usize) -> Vec<K> {
    let mut entries: Vec<(K, usize)> = counts.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.into_iter().take(n).map(|(k, _)| k).collect()
}

/// Group failed transactions into significant clusters.
///
/// Output is in ascending key order; use `rank_clusters` for impact
/// order.
pub fn cluster_failures(transactions: &[Transaction], cfg: &ClusteringConfig) -> Vec<FailureCluster> {
    let mut segment_totals: HashMap<ClusterKey, usize> = HashMap::new();
    let mut failures: BTreeMap<ClusterKey, Vec<&Transaction>> = BTreeMap::new();

    for txn in transactions {
        let key = ClusterKey::of(txn);
        *segment_totals.entry(key).or_insert(0) += 1;
        if txn.is_failure() {
            failures.entry(key).or_default().push(txn);
        }
    }

    let mut clusters = Vec::new();
    for (key, group) in failures {
        if group.len() < cfg.min_cluster_size {
            log::debug!("Dropping {key}: {} failures below threshold", group.len());
            continue;
        }

        let count = group.len();
        let segment_total = segment_totals.get(&key).copied().unwrap_or(count);
        let failure_rate = if segment_total > 0 {
            (count as f64 / segment_total as f64).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let avg_amount = group.iter().map(|t| t.amount).sum::<f64>() / count as f64;

        let mut hour_counts: BTreeMap<u32, usize> = BTreeMap::new();
        let mut code_counts: BTreeMap<String, usize> = BTreeMap::new();
        for t in &group {
            *hour_counts.entry(t.hour()).or_insert(0) += 1;
            if let Some(code) = &t.error_code {
                *code_counts.entry(code.clone()).or_insert(0) += 1;
            }
        }

        let dominant = top_by_frequency(hour_counts, 2);
        let start_hour = dominant.iter().copied().min().unwrap_or(0);
        let end_hour = dominant.iter().copied().max().map(|h| h + 1).unwrap_or(24);

        let first_failure_at = group.iter().map(|t| t.timestamp).min();
        let last_failure_at = group.iter().map(|t| t.timestamp).max();
        let (Some(first_failure_at), Some(last_failure_at)) = (first_failure_at, last_failure_at)
        else {
            continue;
        };

        clusters.push(FailureCluster {
            key,
            count,
            avg_amount,
            failure_rate,
            start_hour,
            end_hour,
            error_codes: top_by_frequency(code_counts, 3),
            first_failure_at,
            last_failure_at,
        });
    }

    log::info!("Clustered failures into {} significant groups", clusters.len());
    clusters
}

/// Order by impact (count × avg amount) descending, ties by ascending
/// key, and keep the top `cfg.max_clusters`. An empty result means no
/// significant patterns this run.
pub fn rank_clusters(mut clusters: Vec<FailureCluster>, cfg: &ClusteringConfig) -> Vec<FailureCluster> {
    clusters.sort_by(|a, b| {
        b.impact_score()
            .total_cmp(&a.impact_score())
            .then_with(|| a.key.cmp(&b.key))
    });
    clusters.truncate(cfg.max_clusters);
    clusters
}
