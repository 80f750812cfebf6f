//! Container image registry capability.

use crate::config::RegistryCredentials;
use crate::errors::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// A tagged image in a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    /// Repository, e.g. `acme/web`.
    pub repository: String,
    /// Tag, e.g. `1.2.0`.
    pub tag: String,
    /// Local image id, once built.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
}

impl ImageRef {
    /// Creates an image reference.
    #[must_use]
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
            image_id: None,
        }
    }

    /// Returns the same repository with another tag.
    #[must_use]
    pub fn retagged(&self, tag: impl Into<String>) -> Self {
        Self {
            repository: self.repository.clone(),
            tag: tag.into(),
            image_id: self.image_id.clone(),
        }
    }

    /// Records the local image id.
    #[must_use]
    pub fn with_image_id(mut self, image_id: impl Into<String>) -> Self {
        self.image_id = Some(image_id.into());
        self
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// Build inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildContext {
    /// Context directory.
    pub context_dir: PathBuf,
    /// Dockerfile.
    pub dockerfile: PathBuf,
    /// Target platform.
    pub platform: String,
    /// Additional tags applied to the same image.
    pub extra_tags: Vec<String>,
    /// Image labels.
    pub labels: BTreeMap<String, String>,
    /// Build arguments.
    pub build_args: BTreeMap<String, String>,
}

/// Builds, authenticates against and pushes to an image registry.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Builds `image` from `context` and returns it with its local id.
    async fn build(&self, context: &BuildContext, image: &ImageRef) -> Result<ImageRef>;

    /// Authenticates against the registry.
    async fn login(&self, credentials: &RegistryCredentials) -> Result<()>;

    /// Pushes one tag.
    async fn push(&self, image: &ImageRef) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_ref_display_and_retag() {
        let image = ImageRef::new("acme/web", "1.2.0").with_image_id("sha256:abc");
        assert_eq!(image.to_string(), "acme/web:1.2.0");

        let latest = image.retagged("latest");
        assert_eq!(latest.to_string(), "acme/web:latest");
        assert_eq!(latest.image_id.as_deref(), Some("sha256:abc"));
    }
}
