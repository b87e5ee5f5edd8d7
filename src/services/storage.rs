use async_trait::async_trait;
use chrono::{DateTime, Utc};
use s3::creds::Credentials;
use s3::{Bucket, Region};
use uuid::Uuid;

/// Content type used when the image format cannot be detected.
pub const FALLBACK_CONTENT_TYPE: &str = "image/jpeg";
const FALLBACK_EXTENSION: &str = "jpg";

/// Blob store holding uploaded invoice images.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload image bytes under `key`.
    async fn upload(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError>;

    /// Public URL for an uploaded object. Does not check that it exists.
    fn public_url(&self, key: &str) -> String;

    /// Delete an object.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Supabase Storage accessed through its S3-compatible endpoint.
pub struct SupabaseStorage {
    bucket: Box<Bucket>,
    public_base: String,
}

impl SupabaseStorage {
    pub fn new(
        supabase_url: &str,
        bucket_name: &str,
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?
            .with_path_style();

        Ok(Self {
            bucket,
            public_base: public_base(supabase_url, bucket_name),
        })
    }
}

#[async_trait]
impl ObjectStore for SupabaseStorage {
    async fn upload(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        let response = self
            .bucket
            .put_object_with_content_type(key, data, content_type)
            .await
            .map_err(StorageError::S3)?;

        check_status(response.status_code())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base, key)
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let response = self.bucket.delete_object(key).await.map_err(StorageError::S3)?;
        check_status(response.status_code())
    }
}

fn check_status(code: u16) -> Result<(), StorageError> {
    if (200..300).contains(&code) {
        Ok(())
    } else {
        Err(StorageError::Status(code))
    }
}

/// Prefix of every public object URL in a bucket.
pub fn public_base(supabase_url: &str, bucket: &str) -> String {
    format!(
        "{}/storage/v1/object/public/{}",
        supabase_url.trim_end_matches('/'),
        bucket
    )
}

/// Detected content type and file extension for an image blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobKind {
    pub content_type: &'static str,
    pub extension: &'static str,
}

impl BlobKind {
    pub fn sniff(data: &[u8]) -> Self {
        match image::guess_format(data) {
            Ok(format) => Self {
                content_type: format.to_mime_type(),
                extension: format
                    .extensions_str()
                    .first()
                    .copied()
                    .unwrap_or(FALLBACK_EXTENSION),
            },
            Err(_) => Self {
                content_type: FALLBACK_CONTENT_TYPE,
                extension: FALLBACK_EXTENSION,
            },
        }
    }
}

/// Time-ordered object key: `<unix-millis>-<8 hex>.<ext>`.
///
/// The random suffix keeps keys distinct when two uploads land in the same
/// millisecond.
pub fn storage_key(now: DateTime<Utc>, extension: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}.{}", now.timestamp_millis(), &suffix[..8], extension)
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Storage returned HTTP {0}")]
    Status(u16),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
