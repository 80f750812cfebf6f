//! Error types for deploykit.
//!
//! The taxonomy mirrors how the pipeline treats failures: fatal stage errors,
//! deadline expiry, transient resource locks, and external tool failures.
//! Components return these as typed values; only the pipeline state machine
//! decides whether an error aborts a run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DeployError>;

/// The main error type for deploykit operations.
#[derive(Debug, Error)]
pub enum DeployError {
    /// A stage failed in a way that halts the pipeline.
    #[error("Stage '{stage}' failed: {message}")]
    FatalStage {
        /// The stage name.
        stage: String,
        /// The underlying message.
        message: String,
    },

    /// A bounded wait elapsed before the awaited condition held.
    #[error("Deadline exceeded after {waited_secs}s waiting for {what}")]
    DeadlineExceeded {
        /// What was being waited for.
        what: String,
        /// Seconds waited.
        waited_secs: u64,
    },

    /// A resource stayed locked through every retry of an operation.
    #[error("Resource locked: {resource}: {message}")]
    TransientLock {
        /// The retried operation.
        resource: String,
        /// The last lock error.
        message: String,
    },

    /// An external tool exited unsuccessfully.
    #[error("{0}")]
    ExternalTool(#[from] ExternalToolError),

    /// A cloud API call failed.
    #[error("{0}")]
    Cloud(#[from] CloudError),

    /// A Kubernetes API call failed.
    #[error("Kubernetes error: {0}")]
    Kube(String),

    /// Configuration is missing or invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A wait was cancelled before completion.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeployError {
    /// Creates a fatal stage error.
    #[must_use]
    pub fn fatal(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FatalStage {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Creates a Kubernetes error.
    #[must_use]
    pub fn kube(message: impl Into<String>) -> Self {
        Self::Kube(message.into())
    }

    /// Returns true if this error belongs to the transient-lock class.
    #[must_use]
    pub fn is_lock(&self) -> bool {
        match self {
            Self::TransientLock { .. } => true,
            Self::Cloud(err) => err.is_lock(),
            _ => false,
        }
    }

    /// Returns true if repeating the same cloud call cannot succeed: the
    /// target is gone or its name is taken.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::Cloud(err) => err.is_not_found() || matches!(err, CloudError::NameConflict { .. }),
            _ => false,
        }
    }

    /// Returns a short machine-readable name for the error class.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FatalStage { .. } => "fatal_stage",
            Self::DeadlineExceeded { .. } => "deadline_exceeded",
            Self::TransientLock { .. } => "transient_lock",
            Self::ExternalTool(_) => "external_tool",
            Self::Cloud(_) => "cloud",
            Self::Kube(_) => "kube",
            Self::Config(_) => "config",
            Self::Cancelled(_) => "cancelled",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
        }
    }
}

impl From<serde_json::Error> for DeployError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for DeployError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Error raised when an external program exits with a nonzero status.
#[derive(Debug, Clone, Error)]
#[error("{program} {action} failed (exit {status}): {stderr}")]
pub struct ExternalToolError {
    /// The program that was invoked.
    pub program: String,
    /// What the invocation was doing (e.g. "build").
    pub action: String,
    /// Exit code, or -1 if killed by a signal.
    pub status: i32,
    /// Trimmed tail of stderr.
    pub stderr: String,
}

impl ExternalToolError {
    const STDERR_LIMIT: usize = 400;

    /// Creates a new external tool error, truncating stderr.
    #[must_use]
    pub fn new(
        program: impl Into<String>,
        action: impl Into<String>,
        status: i32,
        stderr: &str,
    ) -> Self {
        let trimmed = stderr.trim();
        let stderr = if trimmed.len() > Self::STDERR_LIMIT {
            let mut cut = trimmed.len() - Self::STDERR_LIMIT;
            while !trimmed.is_char_boundary(cut) {
                cut += 1;
            }
            format!("...{}", &trimmed[cut..])
        } else {
            trimmed.to_string()
        };
        Self {
            program: program.into(),
            action: action.into(),
            status,
            stderr,
        }
    }
}

/// The kind of cloud resource an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// A security group.
    SecurityGroup,
    /// A managed Kubernetes cluster.
    Cluster,
    /// A node pool.
    NodePool,
    /// A network load balancer.
    LoadBalancer,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SecurityGroup => write!(f, "security group"),
            Self::Cluster => write!(f, "cluster"),
            Self::NodePool => write!(f, "node pool"),
            Self::LoadBalancer => write!(f, "load balancer"),
        }
    }
}

/// Classified failures reported by the cloud collaborator.
#[derive(Debug, Clone, Error)]
pub enum CloudError {
    /// A resource with the requested name already exists.
    #[error("{kind} name '{name}' already exists")]
    NameConflict {
        /// Resource kind.
        kind: ResourceKind,
        /// The colliding name.
        name: String,
    },

    /// The requested zone does not exist or is unavailable.
    #[error("invalid zone '{0}'")]
    InvalidZone(String),

    /// The account quota is exhausted.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The resource is locked by an in-flight dependent operation.
    #[error("{kind} {id} is locked: {message}")]
    Locked {
        /// Resource kind.
        kind: ResourceKind,
        /// Resource id.
        id: String,
        /// Provider message.
        message: String,
    },

    /// The resource does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Resource kind.
        kind: ResourceKind,
        /// Resource id.
        id: String,
    },

    /// Any other API failure.
    #[error("cloud API error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Api {
        /// HTTP-like status, if known.
        status: Option<u16>,
        /// Provider message.
        message: String,
    },
}

impl CloudError {
    /// Creates a generic API error.
    #[must_use]
    pub fn api(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Returns true for the transient "locked / in use" failure class.
    #[must_use]
    pub fn is_lock(&self) -> bool {
        matches!(self, Self::Locked { .. } | Self::Api { status: Some(409), .. })
    }

    /// Returns true if the resource is already gone.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Api { status: Some(404), .. })
    }
}

/// Error raised when configuration cannot be loaded or validated.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("configuration file not found: {}", .path.display())]
    NotFound {
        /// The path that was tried.
        path: PathBuf,
    },

    /// The file could not be parsed.
    #[error("failed to parse {}: {message}", .path.display())]
    Parse {
        /// The file path.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// One or more fields failed validation.
    #[error("invalid configuration: {}", .problems.join("; "))]
    Invalid {
        /// Every problem found.
        problems: Vec<String>,
    },

    /// A required environment variable is not set.
    #[error("required environment variables not set: {}", .names.join(", "))]
    MissingEnv {
        /// The missing variable names.
        names: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_classification() {
        let locked = CloudError::Locked {
            kind: ResourceKind::SecurityGroup,
            id: "sg-1".to_string(),
            message: "in use".to_string(),
        };
        assert!(locked.is_lock());
        assert!(CloudError::api(Some(409), "conflict").is_lock());
        assert!(!CloudError::api(Some(500), "boom").is_lock());
        assert!(!CloudError::QuotaExceeded("cpu".to_string()).is_lock());

        let err: DeployError = locked.into();
        assert!(err.is_lock());
        assert!(!DeployError::kube("x").is_lock());
    }

    #[test]
    fn test_not_found_classification() {
        let err = CloudError::NotFound {
            kind: ResourceKind::Cluster,
            id: "c-1".to_string(),
        };
        assert!(err.is_not_found());
        assert!(CloudError::api(Some(404), "gone").is_not_found());
        assert!(!err.is_lock());
    }

    #[test]
    fn test_permanent_classification() {
        let gone: DeployError = CloudError::NotFound {
            kind: ResourceKind::NodePool,
            id: "pool-1".to_string(),
        }
        .into();
        let taken: DeployError = CloudError::NameConflict {
            kind: ResourceKind::SecurityGroup,
            name: "demo-sg".to_string(),
        }
        .into();
        assert!(gone.is_permanent());
        assert!(taken.is_permanent());
        assert!(!DeployError::from(CloudError::api(Some(500), "boom")).is_permanent());
        assert!(!DeployError::kube("x").is_permanent());
    }

    #[test]
    fn test_name_conflict_message() {
        let err = CloudError::NameConflict {
            kind: ResourceKind::SecurityGroup,
            name: "demo-sg-101010".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "security group name 'demo-sg-101010' already exists"
        );
    }

    #[test]
    fn test_external_tool_error_truncates() {
        let stderr = "x".repeat(1000);
        let err = ExternalToolError::new("docker", "build", 1, &stderr);
        assert!(err.stderr.starts_with("..."));
        assert!(err.stderr.len() <= 403);
        assert!(err.to_string().contains("docker build failed (exit 1)"));
    }

    #[test]
    fn test_config_error_lists_problems() {
        let err = ConfigError::Invalid {
            problems: vec!["nodes.count must be > 0".to_string(), "zone is empty".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "invalid configuration: nodes.count must be > 0; zone is empty"
        );
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(DeployError::fatal("build_image", "x").kind(), "fatal_stage");
        assert_eq!(DeployError::Cancelled("x".into()).kind(), "cancelled");
    }
}
