use async_trait::async_trait;

use crate::config::StoreConfig;
use crate::error::AppError;

use super::types::*;
use super::RecordStore;

/// Upper bound on followed pagination cursors for a single read.
pub const MAX_READ_PAGES: usize = 50;

// ============================================================================
// RecordStoreClient
// ============================================================================

/// HTTP client wrapping the tabular record store's list/create endpoints.
///
/// No business logic lives here: it authenticates, encodes, decodes and
/// surfaces non-2xx answers as [`AppError::Store`].
pub struct RecordStoreClient {
    http: reqwest::Client,
    base_url: String,
    base_id: String,
    token: Option<String>,
}

impl RecordStoreClient {
    /// Create a new client. The underlying `reqwest::Client` uses the configured timeout.
    pub fn new(config: &StoreConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            base_id: config.base_id.clone(),
            token: if config.has_token() {
                config.token.clone()
            } else {
                None
            },
        })
    }

    // --------------------------------------------------------------------
    // Private HTTP helpers
    // --------------------------------------------------------------------

    fn collection_url(&self, collection: &str) -> String {
        format!(
            "{}/v0/{}/{}",
            self.base_url,
            urlencoding::encode(&self.base_id),
            urlencoding::encode(collection)
        )
    }

    fn token(&self) -> Result<&str, AppError> {
        self.token
            .as_deref()
            .ok_or_else(|| AppError::Configuration("record store token is not configured".into()))
    }

    fn authed(
        &self,
        method: reqwest::Method,
        collection: &str,
    ) -> Result<reqwest::RequestBuilder, AppError> {
        let token = self.token()?;
        Ok(self
            .http
            .request(method, self.collection_url(collection))
            .bearer_auth(token))
    }

    /// Send a request, surface non-2xx as `Store { status, body }`, decode JSON.
    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<T, AppError> {
        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(AppError::Store {
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl RecordStore for RecordStoreClient {
    fn is_configured(&self) -> bool {
        self.token.is_some()
    }

    /// `POST /v0/{baseId}/{collection}`, chunked to the store's batch limit.
    async fn write(&self, collection: &str, records: &[Fields]) -> Result<WriteAck, AppError> {
        // Fail before touching the network when unauthenticated.
        self.token()?;

        let mut ack = WriteAck::default();
        for chunk in records.chunks(MAX_RECORDS_PER_WRITE) {
            let body = CreateRecordsBody {
                records: chunk.iter().map(|fields| CreateRecord { fields }).collect(),
            };
            let req = self.authed(reqwest::Method::POST, collection)?.json(&body);
            let created: CreateRecordsResponse = self.send_json(req).await?;
            ack.ids.extend(created.records.into_iter().map(|r| r.id));
        }
        Ok(ack)
    }

    /// `GET /v0/{baseId}/{collection}`, following `offset` cursors.
    async fn read(
        &self,
        collection: &str,
        query: Option<&ReadQuery>,
    ) -> Result<Vec<StoreRow>, AppError> {
        let mut rows = Vec::new();
        let mut offset: Option<String> = None;

        for _ in 0..MAX_READ_PAGES {
            let mut req = self.authed(reqwest::Method::GET, collection)?;
            if let Some(q) = query {
                req = req.query(q.params());
            }
            if let Some(ref cursor) = offset {
                req = req.query(&[("offset", cursor.as_str())]);
            }

            let page: ListRecordsResponse = self.send_json(req).await?;
            rows.extend(page.records);

            match page.offset {
                Some(next) if !next.is_empty() => offset = Some(next),
                _ => return Ok(rows),
            }
        }

        tracing::warn!(
            collection,
            pages = MAX_READ_PAGES,
            rows = rows.len(),
            "Record store read stopped at page limit"
        );
        Ok(rows)
    }
}
