//! Pipeline configuration.
//!
//! RULE: one explicit structure, passed by reference into each
//! component at construction. No component reads ambient constants.
//! Every section has defaults, so a config file only needs to name
//! the values it overrides.

use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Groups smaller than this are not significant.
    pub min_cluster_size: usize,
    /// Ranker keeps at most this many clusters per run.
    pub max_clusters: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: 10,
            max_clusters: 12,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassificationConfig {
    pub spike_failure_rate: f64,
    pub spike_max_window_hours: u32,
    pub vip_avg_amount: f64,
    pub card_testing_min_count: usize,
    pub card_testing_failure_rate: f64,
    /// Case-insensitive substrings that mark a cluster as a
    /// fraud/security signal.
    pub risk_keywords: Vec<String>,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            spike_failure_rate: 0.80,
            spike_max_window_hours: 2,
            vip_avg_amount: 5000.0,
            card_testing_min_count: 50,
            card_testing_failure_rate: 0.50,
            risk_keywords: vec![
                "fraud".into(),
                "suspicious".into(),
                "security".into(),
                "risk".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CalibrationConfig {
    pub fresh_pattern_max_occurrences: u64,
    pub fresh_pattern_modifier: f64,
    pub stale_reset_hours: i64,
    pub confidence_floor: f64,
    pub rescan_decay_threshold: f64,
    pub rescan_baseline_threshold: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            fresh_pattern_max_occurrences: 2,
            fresh_pattern_modifier: 0.80,
            stale_reset_hours: 48,
            confidence_floor: 0.40,
            rescan_decay_threshold: 0.70,
            rescan_baseline_threshold: 0.50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidationConfig {
    pub min_pattern_chars: usize,
    pub min_cost_chars: usize,
    pub min_reasoning_chars: usize,
    pub currency_markers: Vec<String>,
    /// Whole-word, case-insensitive.
    pub denylisted_terms: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_pattern_chars: 20,
            min_cost_chars: 30,
            min_reasoning_chars: 100,
            currency_markers: vec!["₹".into(), "Rs".into(), "INR".into()],
            denylisted_terms: vec![
                "model".into(),
                "algorithm".into(),
                "neural network".into(),
                "machine learning".into(),
                "AI".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SafetyConfig {
    pub confidence_threshold: f64,
    pub max_affected_volume: u64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.70,
            max_affected_volume: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EconomicsConfig {
    /// Cost of one intervention (reroute), in rupees.
    pub intervention_cost: f64,
    /// Merchant margin earned on a recovered transaction.
    pub margin_rate: f64,
}

impl Default for EconomicsConfig {
    fn default() -> Self {
        Self {
            intervention_cost: 15.0,
            margin_rate: 0.02,
        }
    }
}

impl EconomicsConfig {
    /// Net benefit of intervening on `volume` transactions of `avg_amount`.
    pub fn net_benefit(&self, volume: u64, avg_amount: f64) -> f64 {
        let v = volume as f64;
        v * avg_amount * self.margin_rate - v * self.intervention_cost
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub clustering: ClusteringConfig,
    pub classification: ClassificationConfig,
    pub calibration: CalibrationConfig,
    pub validation: ValidationConfig,
    pub safety: SafetyConfig,
    pub economics: EconomicsConfig,
}

impl PipelineConfig {
    /// Load from a JSON file. Sections absent from the file keep
    /// their defaults.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: PipelineConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        fn unit(field: &'static str, v: f64) -> PipelineResult<()> {
            if v.is_finite() && v > 0.0 && v <= 1.0 {
                Ok(())
            } else {
                Err(PipelineError::InvalidConfig {
                    field,
                    reason: format!("must be in (0, 1], got {v}"),
                })
            }
        }

        if self.clustering.min_cluster_size == 0 {
            return Err(PipelineError::InvalidConfig {
                field: "clustering.min_cluster_size",
                reason: "must be at least 1".into(),
            });
        }
        if self.clustering.max_clusters == 0 {
            return Err(PipelineError::InvalidConfig {
                field: "clustering.max_clusters",
                reason: "must be at least 1".into(),
            });
        }
        unit("calibration.confidence_floor", self.calibration.confidence_floor)?;
        unit("calibration.fresh_pattern_modifier", self.calibration.fresh_pattern_modifier)?;
        unit("safety.confidence_threshold", self.safety.confidence_threshold)?;
        if self.calibration.stale_reset_hours <= 0 {
            return Err(PipelineError::InvalidConfig {
                field: "calibration.stale_reset_hours",
                reason: format!("must be positive, got {}", self.calibration.stale_reset_hours),
            });
        }
        if !(self.economics.intervention_cost >= 0.0) || !(self.economics.margin_rate >= 0.0) {
            return Err(PipelineError::InvalidConfig {
                field: "economics",
                reason: "costs and margins must be non-negative".into(),
            });
        }
        if self.validation.currency_markers.is_empty() {
            return Err(PipelineError::InvalidConfig {
                field: "validation.currency_markers",
                reason: "at least one marker is required".into(),
            });
        }
        Ok(())
    }
}
