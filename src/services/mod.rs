pub mod job_table;
pub mod poller;
pub mod storage;
