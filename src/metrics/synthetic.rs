//! Fixed demo dataset served in test mode.
//!
//! Forty functions across eight categories with a success rate a little over
//! 80%. Everything here is a constant or derived from one, so two calls always
//! produce the same metrics and nothing ever reaches the record store.

use chrono::{Duration, NaiveDate};

use super::aggregator::{summarize, AggregatedMetrics};
use super::execution::ExecutionRecord;
use super::mode::DashboardMode;

/// Day the dataset treats as "today".
const AS_OF: (i32, u32, u32) = (2025, 6, 2);
const GENERATED_AT: &str = "2025-06-02T09:00:00.000Z";

struct Category {
    name: &'static str,
    owner: &'static str,
    /// `(function, runs, passes)`
    functions: [(&'static str, u32, u32); 5],
}

const CATALOG: [Category; 8] = [
    Category {
        name: "Lead Generation",
        owner: "growth",
        functions: [
            ("Lead Capture Webhook", 8, 8),
            ("Lead Enrichment", 6, 5),
            ("Lead Scoring Model", 7, 6),
            ("Lead Deduplication", 5, 4),
            ("Inbound Form Router", 6, 6),
        ],
    },
    Category {
        name: "Sales Automation",
        owner: "sales-ops",
        functions: [
            ("Deal Stage Sync", 7, 6),
            ("Quote Generator", 5, 4),
            ("Contract Renewal Alert", 4, 4),
            ("Pipeline Forecast", 6, 3),
            ("CRM Contact Merge", 5, 5),
        ],
    },
    Category {
        name: "Marketing",
        owner: "marketing",
        functions: [
            ("Campaign Audience Builder", 6, 5),
            ("Email Sequence Trigger", 8, 7),
            ("Social Post Scheduler", 5, 5),
            ("UTM Attribution", 4, 2),
            ("Newsletter Digest", 3, 3),
        ],
    },
    Category {
        name: "Voice & Content",
        owner: "studio",
        functions: [
            ("Voiceover Render", 7, 5),
            ("Script Summarizer", 6, 6),
            ("Podcast Transcriber", 5, 4),
            ("Voice Clone Preview", 3, 0),
            ("Caption Generator", 6, 5),
        ],
    },
    Category {
        name: "Analytics",
        owner: "data",
        functions: [
            ("Daily KPI Snapshot", 8, 8),
            ("Churn Risk Report", 5, 4),
            ("Cohort Retention Export", 4, 3),
            ("Revenue Dashboard Refresh", 6, 5),
            ("Funnel Drop-off Scan", 4, 0),
        ],
    },
    Category {
        name: "Operations",
        owner: "finance-ops",
        functions: [
            ("Invoice Reconciliation", 7, 6),
            ("Payment Retry Runner", 5, 0),
            ("Vendor Onboarding Check", 4, 4),
            ("Inventory Level Sync", 6, 5),
            ("Shipping Label Batch", 5, 4),
        ],
    },
    Category {
        name: "Customer Support",
        owner: "support",
        functions: [
            ("Ticket Triage Classifier", 8, 7),
            ("SLA Breach Notifier", 5, 5),
            ("Satisfaction Survey Sender", 4, 3),
            ("Knowledge Base Indexer", 3, 0),
            ("Escalation Router", 5, 4),
        ],
    },
    Category {
        name: "Data Export",
        owner: "data",
        functions: [
            ("CSV Lead Export", 6, 6),
            ("PDF Report Export", 5, 4),
            ("Warehouse Nightly Load", 7, 6),
            ("Backup Archive Rotation", 4, 4),
            ("Audit Log Export", 4, 3),
        ],
    },
];

const FAILURE_NOTES: [&str; 4] = [
    "Upstream API returned 429 Too Many Requests",
    "Timed out waiting for webhook acknowledgement",
    "Schema mismatch on field 'email'",
    "Credential expired, re-authentication required",
];

fn as_of() -> NaiveDate {
    let (y, m, d) = AS_OF;
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MIN)
}

/// Expand the catalog into execution rows. Each function's passing runs come
/// first; run dates spread over the four days ending on the as-of day.
pub fn dataset() -> Vec<ExecutionRecord> {
    let today = as_of();
    let mut rows = Vec::new();
    let mut index: u32 = 0;

    for category in &CATALOG {
        for &(name, runs, passes) in &category.functions {
            for run in 0..runs {
                let success = run < passes;
                let day = today - Duration::days(i64::from((run + index) % 4));
                rows.push(ExecutionRecord {
                    function_name: name.to_string(),
                    success,
                    notes: (!success).then(|| {
                        FAILURE_NOTES[(run + index) as usize % FAILURE_NOTES.len()].to_string()
                    }),
                    test_date: Some(day.format("%Y-%m-%d").to_string()),
                    owner: Some(category.owner.to_string()),
                    module_type: Some(category.name.to_string()),
                });
            }
            index += 1;
        }
    }
    rows
}

/// Metrics over the synthetic dataset, tagged as test-mode output.
pub fn metrics() -> AggregatedMetrics {
    summarize(
        &dataset(),
        DashboardMode::Test,
        as_of(),
        GENERATED_AT.to_string(),
    )
}
