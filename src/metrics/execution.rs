use serde::Serialize;
use serde_json::Value;

use crate::store::{Fields, StoreRow};

/// Names that start with this prefix are placeholders written by broken runs.
const UNKNOWN_FUNCTION_PREFIX: &str = "Unknown Function";

/// One row of the execution log, as the aggregator sees it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub function_name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_type: Option<String>,
}

impl ExecutionRecord {
    /// Map a store row. Column names are matched in both the display form
    /// used by the execution log ("Function Name") and camelCase.
    pub fn from_row(row: &StoreRow) -> Self {
        Self::from_fields(&row.fields)
    }

    pub fn from_fields(fields: &Fields) -> Self {
        Self {
            function_name: text(fields, &["Function Name", "functionName"]).unwrap_or_default(),
            success: lookup(fields, &["Success", "success"])
                .map(truthy)
                .unwrap_or(false),
            notes: text(fields, &["Notes", "notes"]),
            test_date: text(fields, &["Test Date", "testDate"]),
            owner: text(fields, &["Owner", "owner"]),
            module_type: text(fields, &["Module Type", "moduleType"]),
        }
    }

    /// Name used as the unique-function key: trimmed.
    pub fn function_key(&self) -> &str {
        self.function_name.trim()
    }

    pub fn has_valid_name(&self) -> bool {
        is_valid_function_name(&self.function_name)
    }

    /// Whether this run happened on `day` (`YYYY-MM-DD`).
    pub fn ran_on(&self, day: &str) -> bool {
        self.test_date
            .as_deref()
            .is_some_and(|d| d.trim_start().starts_with(day))
    }
}

/// A function name counts toward unique-function statistics only when it is
/// longer than 3 characters after trimming and is not a placeholder.
pub fn is_valid_function_name(name: &str) -> bool {
    let trimmed = name.trim();
    trimmed.chars().count() > 3 && !trimmed.starts_with(UNKNOWN_FUNCTION_PREFIX)
}

fn lookup<'a>(fields: &'a Fields, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|k| fields.get(*k))
        .filter(|v| !v.is_null())
}

fn text(fields: &Fields, keys: &[&str]) -> Option<String> {
    match lookup(fields, keys)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        // Multi-select / linked columns come back as arrays.
        Value::Array(items) => {
            let joined = items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            (!joined.is_empty()).then_some(joined)
        }
        _ => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "yes" | "pass" | "passed" | "success" | "1"
        ),
        _ => false,
    }
}
