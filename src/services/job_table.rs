use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{Job, NewJobRow};

/// PostgREST media type asking for a single object instead of an array.
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

/// Remote table with one row per OCR job.
#[async_trait]
pub trait JobTable: Send + Sync {
    /// Insert a new job row and return it as stored.
    async fn insert(&self, row: &NewJobRow) -> Result<Job, TableError>;

    /// Read one job row by id.
    async fn fetch(&self, id: Uuid) -> Result<Job, TableError>;

    /// Most recently created jobs first.
    async fn list_recent(&self, limit: u32) -> Result<Vec<Job>, TableError>;
}

/// Job table served by Supabase's PostgREST API.
pub struct PostgrestJobTable {
    http: Client,
    endpoint: String,
}

impl PostgrestJobTable {
    pub fn new(
        supabase_url: &str,
        api_key: &str,
        table: &str,
        timeout: Duration,
    ) -> Result<Self, TableError> {
        let http = Client::builder()
            .default_headers(auth_headers(api_key)?)
            .timeout(timeout)
            .build()
            .map_err(TableError::Http)?;

        Ok(Self {
            http,
            endpoint: table_endpoint(supabase_url, table),
        })
    }
}

#[async_trait]
impl JobTable for PostgrestJobTable {
    async fn insert(&self, row: &NewJobRow) -> Result<Job, TableError> {
        let response = self
            .http
            .post(&self.endpoint)
            .header("Prefer", "return=representation")
            .json(row)
            .send()
            .await
            .map_err(TableError::Http)?;

        let mut rows: Vec<Job> = decode(response).await?;
        rows.pop().ok_or(TableError::EmptyInsert)
    }

    async fn fetch(&self, id: Uuid) -> Result<Job, TableError> {
        let response = self
            .http
            .get(&self.endpoint)
            .header(ACCEPT, SINGLE_OBJECT)
            .query(&[("id", format!("eq.{id}")), ("select", "*".to_string())])
            .send()
            .await
            .map_err(TableError::Http)?;

        // PostgREST answers 406 when a single-object request matches no rows.
        if response.status() == StatusCode::NOT_ACCEPTABLE {
            return Err(TableError::NotFound(id));
        }

        decode(response).await
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<Job>, TableError> {
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("select", "*".to_string()),
                ("order", "created_at.desc".to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await
            .map_err(TableError::Http)?;

        decode(response).await
    }
}

/// `apikey` and bearer headers sent on every request. Both carry the key.
fn auth_headers(api_key: &str) -> Result<HeaderMap, TableError> {
    let secret = |value: String| {
        let mut value =
            HeaderValue::from_str(&value).map_err(|e| TableError::Config(e.to_string()))?;
        value.set_sensitive(true);
        Ok::<_, TableError>(value)
    };

    let mut headers = HeaderMap::new();
    headers.insert("apikey", secret(api_key.to_string())?);
    headers.insert(AUTHORIZATION, secret(format!("Bearer {api_key}"))?);
    Ok(headers)
}

/// `{supabase_url}/rest/v1/{table}`
pub fn table_endpoint(supabase_url: &str, table: &str) -> String {
    format!("{}/rest/v1/{}", supabase_url.trim_end_matches('/'), table)
}

async fn decode<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, TableError> {
    let status = response.status();
    let body = response.text().await.map_err(TableError::Http)?;

    if !status.is_success() {
        return Err(TableError::Status {
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_str(&body).map_err(TableError::Decode)
}

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Job table returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode job row: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Insert returned no rows")]
    EmptyInsert,

    #[error("Job table configuration error: {0}")]
    Config(String),
}
