//! remediation-core: the analysis pipeline behind payment remediation.
//!
//! Failed transactions are clustered, ranked by business impact and
//! calibrated against per-pattern history. Proposed decisions are then
//! validated and passed through a safety gate before execution. The
//! engine module documents the fixed stage order.

pub mod calibration_subsystem;
pub mod clock;
pub mod clustering_subsystem;
pub mod config;
pub mod decision;
pub mod engine;
pub mod error;
pub mod event;
pub mod execution;
pub mod feed;
pub mod metrics_subsystem;
pub mod pattern_history;
pub mod proposer;
pub mod report;
pub mod rng;
pub mod safety_gate_subsystem;
pub mod store;
pub mod transaction;
pub mod types;
pub mod validation_subsystem;
