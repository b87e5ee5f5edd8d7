use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Supabase project URL (e.g., "https://abcd.supabase.co")
    pub supabase_url: String,

    /// Supabase API key (anon or service role), sent as `apikey` and bearer token
    pub supabase_key: String,

    /// Storage bucket holding uploaded invoice images
    #[serde(default = "default_storage_bucket")]
    pub storage_bucket: String,

    /// Region of the S3-compatible storage endpoint
    #[serde(default = "default_storage_region")]
    pub storage_region: String,

    /// S3-compatible storage endpoint. Defaults to `{supabase_url}/storage/v1/s3`.
    #[serde(default)]
    pub storage_s3_endpoint: Option<String>,

    /// S3 access key ID for Supabase Storage
    pub storage_access_key: String,

    /// S3 secret access key for Supabase Storage
    pub storage_secret_key: String,

    /// Table holding one row per OCR job
    #[serde(default = "default_jobs_table")]
    pub jobs_table: String,

    /// Delay between poll ticks in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Give up polling after this many seconds. Unset means poll until terminal.
    #[serde(default)]
    pub poll_timeout_secs: Option<u64>,

    /// Per-request timeout for PostgREST calls
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Delete the uploaded blob when the job row insert fails
    #[serde(default)]
    pub cleanup_orphaned_blobs: bool,
}

fn default_storage_bucket() -> String {
    "invoices".to_string()
}

fn default_storage_region() -> String {
    "us-east-1".to_string()
}

fn default_jobs_table() -> String {
    "ocr_jobs".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_http_timeout_secs() -> u64 {
    30
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.supabase_url.trim_end_matches('/')
    }

    pub fn s3_endpoint(&self) -> String {
        match &self.storage_s3_endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("{}/storage/v1/s3", self.base_url()),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Option<Duration> {
        self.poll_timeout_secs.map(Duration::from_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}
