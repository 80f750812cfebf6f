//! Observability utilities.

mod subscriber;
mod wide_events;

pub use subscriber::{init_tracing, LogFormat, TelemetryError};
pub use wide_events::WideEventEmitter;
