use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::aggregator::{AggregatedMetrics, ExecutionAggregator, HealthState};
use crate::error::AppError;
use crate::telemetry::BackupQueue;

/// Which data source a dashboard session reads from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DashboardMode {
    /// Synthetic demo dataset, no store access.
    Test,
    #[default]
    Live,
}

impl DashboardMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::Live => "live",
        }
    }
}

impl fmt::Display for DashboardMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DashboardMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "test" => Ok(Self::Test),
            "live" => Ok(Self::Live),
            other => Err(AppError::Validation(format!(
                "Unknown dashboard mode '{other}' (expected 'test' or 'live')"
            ))),
        }
    }
}

/// The single point where a dashboard request is routed to synthetic or
/// store-derived metrics.
///
/// Each call owns its result end to end: nothing is cached or shared between
/// calls, so concurrent sessions in different modes cannot see each other's
/// data. Live results also report whether the backup queue is holding records.
pub struct ModeGate {
    aggregator: ExecutionAggregator,
    backup: Arc<BackupQueue>,
}

impl ModeGate {
    pub fn new(aggregator: ExecutionAggregator, backup: Arc<BackupQueue>) -> Self {
        Self { aggregator, backup }
    }

    pub async fn select(&self, mode: DashboardMode) -> AggregatedMetrics {
        let mut metrics = self.aggregator.aggregate(mode).await;
        debug_assert_eq!(metrics.mode, mode);

        if mode == DashboardMode::Live {
            metrics.health_checks.recorder = Some(if self.backup.is_empty() {
                HealthState::Healthy
            } else {
                HealthState::Degraded
            });
        }
        metrics
    }
}
