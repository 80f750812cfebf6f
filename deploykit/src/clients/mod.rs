//! Collaborator capabilities the pipelines drive.
//!
//! The engine never talks to a provider directly. Each external system is a
//! trait here; the [`crate::tools`] module supplies subprocess-backed
//! implementations and [`crate::testing`] supplies in-memory fakes.

mod cloud;
mod kube;
mod registry;

pub use cloud::{
    CloudApi, CloudResource, CloudResult, ClusterSpec, InstanceType, KubeconfigRequest,
    LoadBalancer, NodePoolSpec, NodePoolState,
};
pub use kube::{ApplyOutcome, KubeApi, ObjectSummary};
pub use registry::{BuildContext, ImageRef, ImageRegistry};

#[cfg(test)]
pub use cloud::MockCloudApi;
#[cfg(test)]
pub use kube::MockKubeApi;
#[cfg(test)]
pub use registry::MockImageRegistry;
