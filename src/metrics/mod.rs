//! Dashboard metrics over the execution log, gated by test/live mode.

pub mod aggregator;
pub mod execution;
pub mod mode;
pub mod synthetic;

pub use aggregator::{AggregatedMetrics, ExecutionAggregator, HealthChecks, HealthState};
pub use execution::{is_valid_function_name, ExecutionRecord};
pub use mode::{DashboardMode, ModeGate};
