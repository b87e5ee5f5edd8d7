use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};
use uuid::Uuid;

use crate::models::wire_time;

/// Status of an OCR job as stored in the job table.
///
/// The wire values are shared with the external OCR worker and must not
/// change. Any value the worker writes that this client does not recognize
/// decodes to [`JobStatus::Unknown`] instead of failing the whole row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, AsRefStr, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    /// `completed` and `failed` end a job; nothing moves out of them.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Position in the `pending -> processing -> terminal` order.
    /// `None` for statuses this client cannot place.
    pub fn rank(self) -> Option<u8> {
        match self {
            JobStatus::Pending => Some(0),
            JobStatus::Processing => Some(1),
            JobStatus::Completed | JobStatus::Failed => Some(2),
            JobStatus::Unknown => None,
        }
    }

    /// True when moving from `self` to `next` goes backwards.
    pub fn regresses_to(self, next: JobStatus) -> bool {
        match (self.rank(), next.rank()) {
            (Some(from), Some(to)) => to < from,
            _ => false,
        }
    }
}

/// Snapshot of one OCR job row.
///
/// Field names match the job table columns. After creation the row is only
/// written by the worker; the client replaces its copy on every read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Job {
    pub id: Uuid,
    pub image_url: String,
    #[serde(default)]
    pub image_name: Option<String>,
    pub status: JobStatus,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(deserialize_with = "wire_time::deserialize")]
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "wire_time::deserialize_option")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "wire_time::deserialize_option")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Row written by the client when a job is created.
#[derive(Debug, Clone, Serialize)]
pub struct NewJobRow {
    pub id: Uuid,
    pub image_url: String,
    pub image_name: Option<String>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

impl NewJobRow {
    /// Build a fresh `pending` row with a client-generated id.
    pub fn pending(image_url: String, image_name: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            image_url,
            image_name,
            status: JobStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// The snapshot this row represents before the worker touches it.
    pub fn into_job(self) -> Job {
        Job {
            id: self.id,
            image_url: self.image_url,
            image_name: self.image_name,
            status: self.status,
            result: None,
            error: None,
            created_at: self.created_at,
            started_at: None,
            completed_at: None,
        }
    }
}
