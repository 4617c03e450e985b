use serde::{Deserialize, Serialize};

/// Column values of a single store row.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// The store accepts at most this many records per create call.
pub const MAX_RECORDS_PER_WRITE: usize = 10;

// ============================================================================
// Wire bodies
// ============================================================================

#[derive(Debug, Serialize)]
pub(crate) struct CreateRecord<'a> {
    pub fields: &'a Fields,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateRecordsBody<'a> {
    pub records: Vec<CreateRecord<'a>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreatedRecord {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateRecordsResponse {
    #[serde(default)]
    pub records: Vec<CreatedRecord>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListRecordsResponse {
    #[serde(default)]
    pub records: Vec<StoreRow>,
    pub offset: Option<String>,
}

// ============================================================================
// Public results
// ============================================================================

/// Acknowledgement of a batch write: the ids the store assigned, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteAck {
    pub ids: Vec<String>,
}

/// One row as returned by a list call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreRow {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub fields: Fields,
    pub created_time: Option<String>,
}

/// Optional filtering/pagination parameters for a list call.
#[derive(Debug, Clone, Default)]
pub struct ReadQuery {
    params: Vec<(String, String)>,
}

impl ReadQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page_size(self, n: usize) -> Self {
        self.param("pageSize", n.to_string())
    }

    fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }
}
