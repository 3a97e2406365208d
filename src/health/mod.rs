//! Account health scoring.
//!
//! Pipeline for one account: gather raw facts per dimension ([`metrics`]),
//! score each dimension ([`components`]), combine ([`composite`]), bucket and
//! explain ([`risk`]), then persist with trend and audit ([`recalc`]).

pub mod components;
pub mod composite;
pub mod decay;
pub mod metrics;
pub mod recalc;
pub mod risk;

pub use metrics::{gather_metrics, AccountMetrics, DbMetricSource, MetricQuery, MetricSource};
pub use recalc::{
    compute_health, recalculate_all_health, recalculate_health, AccountFailure, BulkRecalcSummary,
};
