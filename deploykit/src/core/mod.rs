//! Core domain model types for deploykit.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Stage status, deployment stage and teardown step enums
//! - The stage result record appended to reports

mod result;
mod status;

pub use result::StageResult;
pub use status::{DeployStage, StageStatus, TeardownStep};
