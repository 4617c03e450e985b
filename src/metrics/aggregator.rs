use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, SecondsFormat, Utc};
use serde::Serialize;

use super::execution::ExecutionRecord;
use super::mode::DashboardMode;
use super::synthetic;
use crate::error::AppError;
use crate::store::{ReadQuery, RecordStore, StoreRow};

pub const TOP_PERFORMERS_LIMIT: usize = 5;
pub const RECENT_ERRORS_LIMIT: usize = 3;

/// Store page size for execution-log reads (the store's maximum).
const READ_PAGE_SIZE: usize = 100;

// =============================================================================
// Output types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthChecks {
    pub store: HealthState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recorder: Option<HealthState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformerSummary {
    pub function_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSummary {
    pub function_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_date: Option<String>,
}

/// Dashboard summary derived from execution-log rows, or from the synthetic
/// dataset in test mode. `mode` records which of the two produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedMetrics {
    pub mode: DashboardMode,
    pub generated_at: String,
    pub total_functions: usize,
    pub active_functions: usize,
    pub executions_today: usize,
    pub total_executions: usize,
    pub success_rate: String,
    pub top_performers: Vec<PerformerSummary>,
    pub recent_errors: Vec<ErrorSummary>,
    pub health_checks: HealthChecks,
}

impl AggregatedMetrics {
    /// Zero-valued result reported when the execution log cannot be read.
    pub fn zeroed(mode: DashboardMode, generated_at: String) -> Self {
        Self {
            mode,
            generated_at,
            total_functions: 0,
            active_functions: 0,
            executions_today: 0,
            total_executions: 0,
            success_rate: format_success_rate(0, 0),
            top_performers: Vec::new(),
            recent_errors: Vec::new(),
            health_checks: HealthChecks {
                store: HealthState::Error,
                recorder: None,
            },
        }
    }
}

/// One decimal with a `%` suffix; exactly `"0%"` when there is nothing to divide.
pub fn format_success_rate(passed: usize, total: usize) -> String {
    if total == 0 {
        return "0%".into();
    }
    format!("{:.1}%", passed as f64 / total as f64 * 100.0)
}

// =============================================================================
// Pure computation
// =============================================================================

/// Fold execution rows into dashboard metrics. Rows are taken in the order
/// the store returned them; performers and errors are not ranked.
pub fn summarize(
    records: &[ExecutionRecord],
    mode: DashboardMode,
    today: NaiveDate,
    generated_at: String,
) -> AggregatedMetrics {
    let today = today.format("%Y-%m-%d").to_string();

    let total_executions = records.len();
    let passed = records.iter().filter(|r| r.success).count();

    let mut functions: HashMap<&str, bool> = HashMap::new();
    for record in records.iter().filter(|r| r.has_valid_name()) {
        let seen_success = functions.entry(record.function_key()).or_insert(false);
        *seen_success |= record.success;
    }
    let active_functions = functions.values().filter(|ok| **ok).count();

    let top_performers = records
        .iter()
        .filter(|r| r.success)
        .take(TOP_PERFORMERS_LIMIT)
        .map(|r| PerformerSummary {
            function_name: r.function_key().to_string(),
            module_type: r.module_type.clone(),
            owner: r.owner.clone(),
            test_date: r.test_date.clone(),
        })
        .collect();

    let recent_errors = records
        .iter()
        .filter(|r| !r.success)
        .take(RECENT_ERRORS_LIMIT)
        .map(|r| ErrorSummary {
            function_name: r.function_key().to_string(),
            notes: r.notes.clone(),
            owner: r.owner.clone(),
            test_date: r.test_date.clone(),
        })
        .collect();

    AggregatedMetrics {
        mode,
        generated_at,
        total_functions: functions.len(),
        active_functions,
        executions_today: records.iter().filter(|r| r.ran_on(&today)).count(),
        total_executions,
        success_rate: format_success_rate(passed, total_executions),
        top_performers,
        recent_errors,
        health_checks: HealthChecks {
            store: if total_executions > 0 {
                HealthState::Healthy
            } else {
                HealthState::Error
            },
            recorder: None,
        },
    }
}

// =============================================================================
// ExecutionAggregator
// =============================================================================

pub struct ExecutionAggregator {
    store: Arc<dyn RecordStore>,
    collection: String,
    timeout: Duration,
}

impl ExecutionAggregator {
    pub fn new(store: Arc<dyn RecordStore>, collection: impl Into<String>, timeout: Duration) -> Self {
        Self {
            store,
            collection: collection.into(),
            timeout,
        }
    }

    /// Compute metrics for `mode`. Never fails: a store problem yields the
    /// zero-valued result with `healthChecks.store = "error"`.
    pub async fn aggregate(&self, mode: DashboardMode) -> AggregatedMetrics {
        match mode {
            DashboardMode::Test => synthetic::metrics(),
            DashboardMode::Live => self.aggregate_live().await,
        }
    }

    async fn aggregate_live(&self) -> AggregatedMetrics {
        let now = Utc::now();
        let generated_at = now.to_rfc3339_opts(SecondsFormat::Millis, true);

        match self.fetch_rows().await {
            Ok(rows) => {
                let records: Vec<ExecutionRecord> =
                    rows.iter().map(ExecutionRecord::from_row).collect();
                let metrics =
                    summarize(&records, DashboardMode::Live, now.date_naive(), generated_at);
                tracing::debug!(
                    collection = %self.collection,
                    rows = metrics.total_executions,
                    functions = metrics.total_functions,
                    success_rate = %metrics.success_rate,
                    "Aggregated live execution metrics"
                );
                metrics
            }
            Err(e) => {
                tracing::warn!(
                    collection = %self.collection,
                    error = %e,
                    kind = e.kind(),
                    "Execution log read failed, reporting zeroed metrics"
                );
                AggregatedMetrics::zeroed(DashboardMode::Live, generated_at)
            }
        }
    }

    async fn fetch_rows(&self) -> Result<Vec<StoreRow>, AppError> {
        let query = ReadQuery::new().page_size(READ_PAGE_SIZE);
        match tokio::time::timeout(self.timeout, self.store.read(&self.collection, Some(&query)))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(format!(
                "execution log read exceeded {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}
