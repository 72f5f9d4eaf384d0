//! Diagnosis pipeline
//!
//! Drives one session from raw query to diagnosis and alert decision:
//! `CLASSIFY -> RETRIEVE_KNOWLEDGE -> FETCH_REGIONAL -> SYNTHESIZE_DIAGNOSIS
//! -> EVALUATE_ALERT -> DONE`, with `FAILED` reachable from any stage.

mod orchestrator;
mod stage;

pub use orchestrator::{DiagnosisPipeline, PipelineConfig, PipelineReport};
pub use stage::Stage;
