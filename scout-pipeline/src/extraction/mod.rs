//! Turns an opaque worker event stream into per-worker text and typed records

pub mod attribution;
pub mod events;
pub mod json;

pub use attribution::{infer_from_content, infer_from_query, Attribution, Attributor};
pub use events::{
    collect_outputs, EventCollector, Flow, StageOutputs, WorkerOutput, DEFAULT_MAX_EVENTS,
};
pub use json::{extract_json, extract_object, preview};
