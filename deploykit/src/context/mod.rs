//! Run state threaded through the pipelines.
//!
//! This module provides:
//! - the immutable [`RunContext`] identifying one run
//! - the mutable [`InfrastructureHandle`] recording what the run created

mod handle;
mod run;

pub use handle::{InfrastructureHandle, NodePoolRecord, RecordedResource};
pub use run::{RunContext, KUBECONFIG_FILE, MANIFESTS_DIR, REPORT_FILE};
