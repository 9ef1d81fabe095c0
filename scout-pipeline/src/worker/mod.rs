//! Worker collaborator implementations

pub mod process;

pub use process::{parse_event_line, ProcessWorker};
