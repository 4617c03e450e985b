use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;
use crate::store::Fields;

// =============================================================================
// Scalar extension values
// =============================================================================

/// Value of an auxiliary extension field. Only scalars cross the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl Scalar {
    /// Convert arbitrary JSON into a scalar. Nested values are kept as their
    /// JSON text, `null` is dropped.
    pub fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(Scalar::Bool(b)),
            Value::Number(n) => Some(Scalar::Number(n)),
            Value::String(s) => Some(Scalar::Text(s)),
            nested @ (Value::Array(_) | Value::Object(_)) => Some(Scalar::Text(nested.to_string())),
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Scalar::Bool(b) => b.to_string(),
            Scalar::Number(n) => n.to_string(),
            Scalar::Text(s) => s,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Number(n) => Value::Number(n.clone()),
            Scalar::Text(s) => Value::String(s.clone()),
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Text(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::Text(s)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

impl From<i64> for Scalar {
    fn from(n: i64) -> Self {
        Scalar::Number(n.into())
    }
}

// =============================================================================
// Well-known optional fields
// =============================================================================

/// Auxiliary fields many call sites attach. Anything else goes to `extensions`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

// =============================================================================
// ActionInput (pre-validation)
// =============================================================================

/// Unvalidated action as received from a call site or `POST /actions`.
///
/// Unknown top-level keys are collected into `extra` and merged into the
/// record's extensions.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionInput {
    pub action: Option<String>,
    pub actor: Option<String>,
    pub timestamp: Option<String>,
    // Well-known fields take any scalar on the wire and are stored as text.
    pub status: Option<Value>,
    pub channel: Option<Value>,
    pub session_id: Option<Value>,
    pub severity: Option<Value>,
    pub selected_voice: Option<Value>,
    pub export_type: Option<Value>,
    pub function_name: Option<Value>,
    pub details: Option<Value>,
    #[serde(default)]
    pub extensions: serde_json::Map<String, Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ActionInput {
    pub fn new(action: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            action: Some(action.into()),
            actor: Some(actor.into()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(Value::String(status.into()));
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }

    /// Check the required fields and produce an immutable [`ActionRecord`].
    ///
    /// `now` stamps the record when the caller supplied no timestamp.
    pub fn validate(self, now: DateTime<Utc>) -> Result<ActionRecord, AppError> {
        let action = required("action", self.action)?;
        let actor = required("actor", self.actor)?;

        let timestamp = match self.timestamp.as_deref().map(str::trim) {
            None | Some("") => now,
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|e| {
                    AppError::Validation(format!("timestamp '{}' is not ISO-8601: {}", raw, e))
                })?,
        };

        let mut extensions = BTreeMap::new();
        for (key, value) in self.extra.into_iter().chain(self.extensions) {
            if let Some(scalar) = Scalar::from_json(value) {
                extensions.insert(key, scalar);
            }
        }

        Ok(ActionRecord {
            action,
            actor,
            timestamp,
            fields: ActionFields {
                status: as_text(self.status),
                channel: as_text(self.channel),
                session_id: as_text(self.session_id),
                severity: as_text(self.severity),
                selected_voice: as_text(self.selected_voice),
                export_type: as_text(self.export_type),
                function_name: as_text(self.function_name),
                details: as_text(self.details),
            },
            extensions,
        })
    }
}

/// Blank values count as missing. Accepted values are kept exactly as sent.
fn required(name: &str, value: Option<String>) -> Result<String, AppError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AppError::Validation(format!("missing required field `{}`", name))),
    }
}

fn as_text(value: Option<Value>) -> Option<String> {
    Scalar::from_json(value?).map(Scalar::into_text)
}

// =============================================================================
// ActionRecord
// =============================================================================

/// One validated telemetry event. Fields are read-only once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    action: String,
    actor: String,
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    fields: ActionFields,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    extensions: BTreeMap<String, Scalar>,
}

impl ActionRecord {
    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn timestamp_iso(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn fields(&self) -> &ActionFields {
        &self.fields
    }

    pub fn extensions(&self) -> &BTreeMap<String, Scalar> {
        &self.extensions
    }

    /// Flatten into store columns. Well-known fields win over same-named extensions.
    pub fn to_store_fields(&self) -> Fields {
        let mut out = Fields::new();
        for (key, value) in &self.extensions {
            out.insert(key.clone(), value.to_json());
        }
        if let Ok(Value::Object(known)) = serde_json::to_value(&self.fields) {
            out.extend(known);
        }
        out.insert("action".into(), Value::String(self.action.clone()));
        out.insert("actor".into(), Value::String(self.actor.clone()));
        out.insert("timestamp".into(), Value::String(self.timestamp_iso()));
        out
    }
}

// =============================================================================
// BackupEntry
// =============================================================================

/// Wrapper persisted in the backup queue for a record that failed remote persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEntry {
    pub id: uuid::Uuid,
    pub action: String,
    pub actor: String,
    pub timestamp: String,
    pub original_record: ActionRecord,
    /// Replay attempts made by the retry worker so far.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Earliest time the retry worker may replay this entry.
    pub next_attempt_at: DateTime<Utc>,
}

impl BackupEntry {
    pub fn new(record: ActionRecord, error: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            action: record.action.clone(),
            actor: record.actor.clone(),
            timestamp: record.timestamp_iso(),
            original_record: record,
            attempts: 0,
            last_error: error,
            next_attempt_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-19T08:30:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_validate_stamps_missing_timestamp() {
        let record = ActionInput::new("Lead Export", "System").validate(now()).unwrap();
        assert_eq!(record.action(), "Lead Export");
        assert_eq!(record.actor(), "System");
        assert_eq!(record.timestamp(), now());
        assert_eq!(record.timestamp_iso(), "2026-10-19T08:30:00.000Z");
    }

    #[test]
    fn test_validate_keeps_supplied_timestamp() {
        let mut input = ActionInput::new("X", "Y");
        input.timestamp = Some("2025-01-02T03:04:05+02:00".into());
        let record = input.validate(now()).unwrap();
        assert_eq!(record.timestamp_iso(), "2025-01-02T01:04:05.000Z");
    }

    #[test]
    fn test_validate_rejects_missing_or_blank_required_fields() {
        let err = ActionInput {
            actor: Some("Y".into()),
            ..Default::default()
        }
        .validate(now())
        .unwrap_err();
        assert!(err.to_string().contains("`action`"));

        let err = ActionInput::new("X", "   ").validate(now()).unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(err.to_string().contains("`actor`"));
    }

    #[test]
    fn test_required_fields_are_kept_as_sent() {
        let record = ActionInput::new(" Lead Export ", "System\t")
            .validate(now())
            .unwrap();
        assert_eq!(record.action(), " Lead Export ");
        assert_eq!(record.actor(), "System\t");
    }

    #[test]
    fn test_well_known_fields_accept_any_scalar() {
        let input: ActionInput = serde_json::from_value(json!({
            "action": "Call Started",
            "actor": "Voice",
            "sessionId": 42,
            "status": true,
            "severity": 2.5,
            "details": { "step": 1 },
            "channel": null
        }))
        .unwrap();
        let record = input.validate(now()).unwrap();

        let fields = record.fields();
        assert_eq!(fields.session_id.as_deref(), Some("42"));
        assert_eq!(fields.status.as_deref(), Some("true"));
        assert_eq!(fields.severity.as_deref(), Some("2.5"));
        assert_eq!(fields.details.as_deref(), Some("{\"step\":1}"));
        assert!(fields.channel.is_none());
        assert_eq!(record.to_store_fields()["sessionId"], "42");
    }

    #[test]
    fn test_validate_rejects_garbage_timestamp() {
        let mut input = ActionInput::new("X", "Y");
        input.timestamp = Some("yesterday".into());
        assert_eq!(input.validate(now()).unwrap_err().kind(), "validation");
    }

    #[test]
    fn test_unknown_keys_become_extensions() {
        let input: ActionInput = serde_json::from_value(json!({
            "action": "Voice Generated",
            "actor": "Voice",
            "selectedVoice": "Rachel",
            "duration": 12,
            "premium": true,
            "extensions": { "campaign": "Q4", "meta": { "a": 1 }, "skip": null }
        }))
        .unwrap();
        let record = input.validate(now()).unwrap();

        assert_eq!(record.fields().selected_voice.as_deref(), Some("Rachel"));
        let ext = record.extensions();
        assert_eq!(ext["duration"], Scalar::from(12i64));
        assert_eq!(ext["premium"], Scalar::Bool(true));
        assert_eq!(ext["campaign"], Scalar::from("Q4"));
        assert_eq!(ext["meta"], Scalar::from("{\"a\":1}"));
        assert!(!ext.contains_key("skip"));
    }

    #[test]
    fn test_store_fields_flatten_known_and_extensions() {
        let record = ActionInput::new("PDF Export", "user_42")
            .with_status("completed")
            .with_extension("exportType", "shadow")
            .with_extension("pages", 3)
            .validate(now())
            .unwrap();
        let mut input = ActionInput::new("PDF Export", "user_42");
        input.export_type = Some("pdf".into());
        let typed = input.validate(now()).unwrap();

        let fields = record.to_store_fields();
        assert_eq!(fields["action"], "PDF Export");
        assert_eq!(fields["actor"], "user_42");
        assert_eq!(fields["status"], "completed");
        assert_eq!(fields["pages"], 3);
        assert_eq!(fields["timestamp"], "2026-10-19T08:30:00.000Z");

        // The typed field wins over an extension of the same wire name.
        assert_eq!(typed.to_store_fields()["exportType"], "pdf");
        assert_eq!(fields["exportType"], "shadow");
    }

    #[test]
    fn test_backup_entry_wraps_record() {
        let record = ActionInput::new("X", "Y").validate(now()).unwrap();
        let entry = BackupEntry::new(record.clone(), Some("503".into()), now());
        assert_eq!(entry.action, "X");
        assert_eq!(entry.actor, "Y");
        assert_eq!(entry.timestamp, record.timestamp_iso());
        assert_eq!(entry.original_record, record);
        assert_eq!(entry.attempts, 0);

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["originalRecord"]["action"], "X");
        let back: BackupEntry = serde_json::from_value(value).unwrap();
        assert_eq!(back, entry);
    }
}
