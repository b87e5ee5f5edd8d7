//! Invoice OCR job client
//!
//! Uploads invoice images to Supabase Storage, records one OCR job row per
//! image in a PostgREST table, and polls that row until the external OCR
//! worker marks it `completed` or `failed`.

pub mod client;
pub mod config;
pub mod models;
pub mod services;

pub use client::{ClientSettings, JobClient, SubmitError};
pub use models::job::{Job, JobStatus};
pub use models::submission::SubmitRequest;
pub use services::poller::{FetchError, PollError, PollHandle, PollOptions};
