pub mod job;
pub mod submission;
pub mod wire_time;
