//! # Deploykit
//!
//! Deployment and teardown orchestration for a containerized service on a
//! managed Kubernetes cluster.
//!
//! A deployment run is a fixed sequence of stages:
//!
//! - **Image**: build the container image and push it to the registry
//! - **Infrastructure**: create a security group, cluster and node pool,
//!   then fetch a kubeconfig and wait for nodes
//! - **Workloads**: reconcile the namespace, pull secret and manifests, then
//!   verify that pods run
//!
//! Every run writes a [`pipeline::DeploymentReport`]. Teardown reads that
//! report and deletes exactly the resources it records.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use deploykit::prelude::*;
//!
//! let config = DeployConfig::load(Path::new("config.yaml"))?;
//! let credentials = Credentials::from_env()?;
//! let collaborators = Collaborators {
//!     registry: &docker,
//!     cloud: &cloud,
//!     kube: &kubectl,
//!     manifests: &manifests,
//! };
//! let report = DeploymentPipeline::new(&config, &credentials, collaborators)
//!     .with_event_sink(Arc::new(LoggingEventSink::default()))
//!     .run()
//!     .await;
//! std::process::exit(report.exit_code());
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, missing_docs, rust_2018_idioms)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod clients;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod manifests;
pub mod observability;
pub mod pipeline;
pub mod polling;
pub mod provision;
pub mod reconcile;
pub mod testing;
pub mod tools;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::clients::{
        ApplyOutcome, CloudApi, CloudResource, ImageRef, ImageRegistry, KubeApi, NodePoolState,
    };
    pub use crate::config::{
        Credentials, DeployConfig, NodeTimeoutPolicy, Policies, RegistryCredentials, Timeouts,
        WaitSettings,
    };
    pub use crate::context::{InfrastructureHandle, RunContext};
    pub use crate::core::{DeployStage, StageResult, StageStatus, TeardownStep};
    pub use crate::errors::{CloudError, ConfigError, DeployError, Result};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::manifests::{
        DirectoryManifestSource, Manifest, ManifestSet, ManifestSource, TemplateVars,
    };
    pub use crate::pipeline::{
        Collaborators, DeploymentPipeline, DeploymentReport, TeardownMode, TeardownPipeline,
        TeardownReport,
    };
    pub use crate::polling::{CancellationToken, LockRetry, PollOutcome, WaitPoller};
    pub use crate::provision::InfrastructureProvisioner;
    pub use crate::reconcile::ManifestReconciler;
    pub use crate::tools::{DockerCli, ExecEnv, KubeAccess, Kubectl};
}
