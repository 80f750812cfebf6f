//! Deployment and teardown pipelines.
//!
//! This module provides:
//! - [`DeploymentPipeline`], the seven-stage deployment state machine
//! - [`TeardownPipeline`], report-driven deletion of recorded resources
//! - the persisted [`DeploymentReport`] and [`TeardownReport`]

mod deploy;
mod report;
mod teardown;

pub use deploy::{Collaborators, DeploymentPipeline, PipelineState, LATEST_TAG};
pub use report::{
    DeploymentReport, TeardownMode, TeardownReport, TeardownTarget, TerminalState,
    EXIT_ABORTED_CLEAN, EXIT_ABORTED_PARTIAL, EXIT_DEGRADED, EXIT_SUCCESS,
};
pub use teardown::{resolve_report_path, TeardownPipeline};
