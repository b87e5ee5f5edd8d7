//! In-memory stand-ins for Supabase Storage and the job table

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use invoice_scan_jobs::{
    models::job::{Job, JobStatus, NewJobRow},
    services::{
        job_table::{JobTable, TableError},
        storage::{ObjectStore, StorageError},
    },
    ClientSettings, JobClient, PollOptions,
};

pub const PUBLIC_BASE: &str = "https://test.supabase.co/storage/v1/object/public/invoices";

/// Smallest byte prefix `image::guess_format` recognizes as JPEG.
pub const JPEG_BYTES: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00];
pub const PNG_BYTES: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00];

#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub data: Vec<u8>,
    pub content_type: String,
}

#[derive(Default)]
pub struct MemoryStore {
    pub blobs: Mutex<HashMap<String, StoredBlob>>,
    pub deleted: Mutex<Vec<String>>,
    pub fail_uploads: bool,
}

impl MemoryStore {
    pub fn failing() -> Self {
        Self {
            fail_uploads: true,
            ..Self::default()
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.blobs.lock().unwrap().keys().cloned().collect()
    }

    pub fn blob(&self, key: &str) -> Option<StoredBlob> {
        self.blobs.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn upload(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        if self.fail_uploads {
            return Err(StorageError::Status(403));
        }
        self.blobs.lock().unwrap().insert(
            key.to_string(),
            StoredBlob {
                data: data.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{PUBLIC_BASE}/{key}")
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.blobs.lock().unwrap().remove(key);
        self.deleted.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

/// What one fetch of a scripted job returns.
#[derive(Debug, Clone)]
pub enum Tick {
    Status(JobStatus),
    Fail,
    /// The read never completes.
    Hang,
}

/// Job table where the "worker" is a per-job script of fetch outcomes.
///
/// Each fetch consumes one step; the last step repeats forever. Jobs without
/// a script return the row as inserted.
#[derive(Default)]
pub struct ScriptedTable {
    pub rows: Mutex<HashMap<Uuid, Job>>,
    pub scripts: Mutex<HashMap<Uuid, VecDeque<Tick>>>,
    pub fetches: Mutex<HashMap<Uuid, usize>>,
    pub fail_inserts: bool,
}

impl ScriptedTable {
    pub fn failing_inserts() -> Self {
        Self {
            fail_inserts: true,
            ..Self::default()
        }
    }

    /// Seed a row and the sequence of statuses the worker will show.
    pub fn script(&self, job: Job, ticks: impl IntoIterator<Item = Tick>) {
        let id = job.id;
        self.rows.lock().unwrap().insert(id, job);
        self.scripts
            .lock()
            .unwrap()
            .insert(id, ticks.into_iter().collect());
    }

    pub fn fetch_count(&self, id: Uuid) -> usize {
        self.fetches.lock().unwrap().get(&id).copied().unwrap_or(0)
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn row(&self, id: Uuid) -> Option<Job> {
        self.rows.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl JobTable for ScriptedTable {
    async fn insert(&self, row: &NewJobRow) -> Result<Job, TableError> {
        if self.fail_inserts {
            return Err(TableError::Status {
                status: 401,
                body: "{\"message\":\"permission denied\"}".to_string(),
            });
        }
        let job = row.clone().into_job();
        self.rows.lock().unwrap().insert(job.id, job.clone());
        Ok(job)
    }

    async fn fetch(&self, id: Uuid) -> Result<Job, TableError> {
        *self.fetches.lock().unwrap().entry(id).or_insert(0) += 1;

        let tick = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(&id) {
                Some(steps) if steps.len() > 1 => steps.pop_front(),
                Some(steps) => steps.front().cloned(),
                None => None,
            }
        };

        if matches!(tick, Some(Tick::Hang)) {
            return std::future::pending().await;
        }

        let mut rows = self.rows.lock().unwrap();
        let row = rows.get_mut(&id).ok_or(TableError::NotFound(id))?;

        match tick {
            Some(Tick::Hang) => unreachable!("handled above"),
            Some(Tick::Fail) => Err(TableError::Status {
                status: 503,
                body: "upstream unavailable".to_string(),
            }),
            Some(Tick::Status(status)) => {
                apply_worker_status(row, status);
                Ok(row.clone())
            }
            None => Ok(row.clone()),
        }
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<Job>, TableError> {
        let mut jobs: Vec<Job> = self.rows.lock().unwrap().values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit as usize);
        Ok(jobs)
    }
}

/// Fill in the columns the worker owns for a given status.
fn apply_worker_status(row: &mut Job, status: JobStatus) {
    row.status = status;
    match status {
        JobStatus::Processing => {
            row.started_at.get_or_insert_with(chrono::Utc::now);
        }
        JobStatus::Completed => {
            row.result = Some("ACME GmbH\nTOTAL 42.00 EUR".to_string());
            row.completed_at = Some(chrono::Utc::now());
        }
        JobStatus::Failed => {
            row.error = Some("no text detected".to_string());
            row.completed_at = Some(chrono::Utc::now());
        }
        JobStatus::Pending | JobStatus::Unknown => {}
    }
}

pub fn pending_job(name: &str) -> Job {
    NewJobRow::pending(format!("{PUBLIC_BASE}/{name}"), Some(name.to_string())).into_job()
}

pub struct Harness {
    pub client: JobClient,
    pub store: Arc<MemoryStore>,
    pub table: Arc<ScriptedTable>,
}

pub fn harness_with(store: MemoryStore, table: ScriptedTable, cleanup: bool) -> Harness {
    let store = Arc::new(store);
    let table = Arc::new(table);
    let settings = ClientSettings {
        poll: PollOptions::every(Duration::from_secs(1)),
        cleanup_orphaned_blobs: cleanup,
    };
    let client = JobClient::new(store.clone(), table.clone(), settings);
    Harness {
        client,
        store,
        table,
    }
}

pub fn harness() -> Harness {
    harness_with(MemoryStore::default(), ScriptedTable::default(), false)
}

/// No `pending`/`processing` snapshot may follow a terminal one.
pub fn assert_no_regression_after_terminal(jobs: &[Job]) {
    if let Some(first_terminal) = jobs.iter().position(|j| j.is_terminal()) {
        assert!(
            jobs[first_terminal..].iter().all(|j| j.is_terminal()),
            "non-terminal snapshot after terminal: {:?}",
            jobs.iter().map(|j| j.status).collect::<Vec<_>>()
        );
    }
}
