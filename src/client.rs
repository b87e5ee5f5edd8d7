use chrono::Utc;
use garde::Validate;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::models::job::{Job, NewJobRow};
use crate::models::submission::SubmitRequest;
use crate::services::{
    job_table::{JobTable, PostgrestJobTable, TableError},
    poller::{self, ActivePolls, FetchError, PollError, PollHandle, PollOptions},
    storage::{storage_key, BlobKind, ObjectStore, StorageError, SupabaseStorage},
};

/// Behavior knobs that are not tied to a backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientSettings {
    /// Options used by [`JobClient::poll_default`] and friends.
    pub poll: PollOptions,
    /// Best-effort delete of the uploaded blob when the row insert fails.
    pub cleanup_orphaned_blobs: bool,
}

impl ClientSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            poll: PollOptions {
                interval: config.poll_interval(),
                max_duration: config.poll_timeout(),
            },
            cleanup_orphaned_blobs: config.cleanup_orphaned_blobs,
        }
    }
}

/// Submits invoice images as OCR jobs and watches them finish.
///
/// Cheap to clone; clones share the backends and the set of active polls.
#[derive(Clone)]
pub struct JobClient {
    storage: Arc<dyn ObjectStore>,
    table: Arc<dyn JobTable>,
    active: ActivePolls,
    settings: ClientSettings,
}

impl JobClient {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        table: Arc<dyn JobTable>,
        settings: ClientSettings,
    ) -> Self {
        Self {
            storage,
            table,
            active: ActivePolls::default(),
            settings,
        }
    }

    /// Client wired to the Supabase project described by `config`.
    pub fn from_config(config: &AppConfig) -> Result<Self, ClientInitError> {
        let storage = SupabaseStorage::new(
            config.base_url(),
            &config.storage_bucket,
            &config.s3_endpoint(),
            &config.storage_region,
            &config.storage_access_key,
            &config.storage_secret_key,
        )?;

        let table = PostgrestJobTable::new(
            config.base_url(),
            &config.supabase_key,
            &config.jobs_table,
            config.http_timeout(),
        )?;

        Ok(Self::new(
            Arc::new(storage),
            Arc::new(table),
            ClientSettings::from_config(config),
        ))
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Upload an image and create its `pending` job row.
    ///
    /// Not idempotent: every call creates a new blob and a new job. If the
    /// insert fails after the upload succeeded the blob is left behind unless
    /// `cleanup_orphaned_blobs` is set.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Job, SubmitError> {
        request
            .validate()
            .map_err(|e| SubmitError::Invalid(e.to_string()))?;

        let kind = BlobKind::sniff(&request.bytes);
        let key = storage_key(Utc::now(), kind.extension);

        tracing::debug!(
            key = %key,
            content_type = kind.content_type,
            size = request.bytes.len(),
            "Uploading invoice image"
        );

        if let Err(e) = self
            .storage
            .upload(&key, &request.bytes, kind.content_type)
            .await
        {
            tracing::error!(key = %key, error = %e, "Image upload failed");
            return Err(SubmitError::Upload(e));
        }

        let image_url = self.storage.public_url(&key);
        let row = NewJobRow::pending(image_url, request.image_name);
        let job_id = row.id;

        match self.table.insert(&row).await {
            Ok(job) => {
                tracing::info!(job_id = %job.id, key = %key, "OCR job submitted");
                Ok(job)
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, key = %key, error = %e, "Job insert failed");
                if self.settings.cleanup_orphaned_blobs {
                    self.remove_orphan(&key).await;
                }
                Err(SubmitError::Insert(e))
            }
        }
    }

    async fn remove_orphan(&self, key: &str) {
        match self.storage.delete(key).await {
            Ok(()) => tracing::info!(key = %key, "Removed orphaned image"),
            Err(e) => tracing::warn!(key = %key, error = %e, "Failed to remove orphaned image"),
        }
    }

    /// Read the current snapshot of a job.
    pub async fn fetch(&self, job_id: Uuid) -> Result<Job, FetchError> {
        self.table.fetch(job_id).await.map_err(FetchError::from)
    }

    /// Start polling a job until it reaches a terminal status.
    ///
    /// Fails with [`PollError::AlreadyPolling`] while another poll from this
    /// client is still running for the same job.
    pub fn poll(&self, job_id: Uuid, options: PollOptions) -> Result<PollHandle, PollError> {
        poller::spawn(Arc::clone(&self.table), &self.active, job_id, options)
    }

    /// [`poll`](Self::poll) with the configured options.
    pub fn poll_default(&self, job_id: Uuid) -> Result<PollHandle, PollError> {
        self.poll(job_id, self.settings.poll)
    }

    /// Poll to the end and return the terminal snapshot.
    pub async fn wait_for_completion(
        &self,
        job_id: Uuid,
        options: PollOptions,
    ) -> Result<Job, PollError> {
        self.poll(job_id, options)?.wait().await
    }

    pub fn is_polling(&self, job_id: Uuid) -> bool {
        self.active.is_active(job_id)
    }

    /// Newest jobs first.
    pub async fn list_recent(&self, limit: u32) -> Result<Vec<Job>, FetchError> {
        self.table.list_recent(limit).await.map_err(FetchError::from)
    }
}

/// Submitting an image failed. Nothing is retried.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("submission failed: invalid request: {0}")]
    Invalid(String),

    #[error("submission failed: {0}")]
    Upload(StorageError),

    #[error("submission failed: {0}")]
    Insert(TableError),
}

#[derive(Debug, thiserror::Error)]
pub enum ClientInitError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Table(#[from] TableError),
}
