//! Stage lifecycle events.
//!
//! Pipelines emit `stage.started`, `stage.completed` and `stage.failed` for
//! every stage, plus one `pipeline.*` event when a run ends.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Emitted before a stage runs.
pub const STAGE_STARTED: &str = "stage.started";
/// Emitted when a stage finishes without failing, including warnings.
pub const STAGE_COMPLETED: &str = "stage.completed";
/// Emitted when a stage fails.
pub const STAGE_FAILED: &str = "stage.failed";
/// Emitted when a run reaches its terminal state.
pub const PIPELINE_FINISHED: &str = "pipeline.finished";
