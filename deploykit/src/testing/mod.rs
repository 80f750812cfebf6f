//! Testing utilities for deploykit pipelines.
//!
//! This module provides:
//! - In-memory cloud, cluster and registry collaborators
//! - Sample configuration, credentials and manifests

mod fakes;
mod fixtures;

pub use fakes::{FakeCloud, FakeKube, FakeRegistry};
pub use fixtures::{
    sample_config, sample_credentials, sample_manifests, StaticManifestSource,
};
