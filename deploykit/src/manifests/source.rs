//! Where manifests come from.

use super::{Manifest, ManifestSet};
use crate::errors::{ConfigError, DeployError, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

const CLUSTER_SCOPED: [&str; 6] = [
    "Namespace",
    "ClusterRole",
    "ClusterRoleBinding",
    "PersistentVolume",
    "StorageClass",
    "CustomResourceDefinition",
];

/// Values substituted into manifest templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateVars {
    /// Full image reference, `${IMAGE}`.
    pub image: String,
    /// Workload namespace, `${NAMESPACE}`.
    pub namespace: String,
    /// Service name, `${SERVICE_NAME}`.
    pub service_name: String,
    /// Replica count, `${REPLICAS}`.
    pub replicas: u32,
    /// Service version, `${VERSION}`.
    pub version: String,
}

impl TemplateVars {
    /// Substitutes every known placeholder in `template`.
    #[must_use]
    pub fn render(&self, template: &str) -> String {
        template
            .replace("${IMAGE}", &self.image)
            .replace("${NAMESPACE}", &self.namespace)
            .replace("${SERVICE_NAME}", &self.service_name)
            .replace("${REPLICAS}", &self.replicas.to_string())
            .replace("${VERSION}", &self.version)
    }
}

/// Supplies the manifests for a deployment.
pub trait ManifestSource: Send + Sync {
    /// Produces the manifest set for `vars`.
    fn load(&self, vars: &TemplateVars) -> Result<ManifestSet>;
}

/// Loads `*.yaml`, `*.yml` and `*.json` files from a directory, in file-name order.
///
/// Files may hold several documents separated by `---`, and `List` objects
/// are expanded into their items. Namespaced objects without a namespace are
/// placed in the workload namespace.
#[derive(Debug, Clone)]
pub struct DirectoryManifestSource {
    dir: PathBuf,
}

impl DirectoryManifestSource {
    /// Creates a source reading from `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn template_files(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.is_dir() {
            return Err(ConfigError::NotFound {
                path: self.dir.clone(),
            }
            .into());
        }
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && matches!(
                        path.extension().and_then(|e| e.to_str()),
                        Some("yaml" | "yml" | "json")
                    )
            })
            .collect();
        files.sort();
        Ok(files)
    }
}

impl ManifestSource for DirectoryManifestSource {
    fn load(&self, vars: &TemplateVars) -> Result<ManifestSet> {
        let mut set = ManifestSet::default();
        for path in self.template_files()? {
            let raw = std::fs::read_to_string(&path)?;
            let rendered = vars.render(&raw);
            let before = set.len();
            for document in parse_documents(&rendered)
                .map_err(|err| DeployError::kube(format!("{}: {err}", path.display())))?
            {
                set.push(Manifest::from_value(with_namespace(document, &vars.namespace))?);
            }
            debug!(file = %path.display(), objects = set.len() - before, "loaded manifests");
        }
        if set.is_empty() {
            return Err(DeployError::kube(format!(
                "no manifests found in {}",
                self.dir.display()
            )));
        }
        Ok(set)
    }
}

fn parse_documents(text: &str) -> std::result::Result<Vec<Value>, serde_yaml::Error> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let value = Value::deserialize(document)?;
        match value {
            Value::Null => {}
            Value::Object(ref map) if map.get("kind").and_then(Value::as_str) == Some("List") => {
                if let Some(Value::Array(items)) = map.get("items") {
                    documents.extend(items.iter().cloned());
                }
            }
            other => documents.push(other),
        }
    }
    Ok(documents)
}

fn with_namespace(mut document: Value, namespace: &str) -> Value {
    let kind = document.get("kind").and_then(Value::as_str).unwrap_or_default();
    if CLUSTER_SCOPED.contains(&kind) {
        return document;
    }
    if let Some(metadata) = document.get_mut("metadata").and_then(Value::as_object_mut) {
        metadata
            .entry("namespace")
            .or_insert_with(|| Value::String(namespace.to_string()));
    }
    document
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn vars() -> TemplateVars {
        TemplateVars {
            image: "acme/web:1.2.0".to_string(),
            namespace: "acme".to_string(),
            service_name: "web".to_string(),
            replicas: 2,
            version: "1.2.0".to_string(),
        }
    }

    #[test]
    fn test_render_substitutes_placeholders() {
        let rendered = vars().render("image: ${IMAGE}\nreplicas: ${REPLICAS}\nns: ${NAMESPACE}");
        assert_eq!(rendered, "image: acme/web:1.2.0\nreplicas: 2\nns: acme");
    }

    #[test]
    fn test_directory_source_multi_document() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("10-app.yaml"),
            "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: ${SERVICE_NAME}\nspec:\n  replicas: ${REPLICAS}\n---\napiVersion: v1\nkind: Service\nmetadata:\n  name: ${SERVICE_NAME}\n---\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("00-ns.json"),
            r#"{"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "${NAMESPACE}"}}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("README.md"), "not a manifest").unwrap();

        let set = DirectoryManifestSource::new(dir.path()).load(&vars()).unwrap();

        let refs: Vec<String> = set.manifests().iter().map(Manifest::reference).collect();
        assert_eq!(refs, vec!["namespace/acme", "deployment/web", "service/web"]);
        assert_eq!(set.manifests()[0].namespace(), None);
        assert_eq!(set.manifests()[1].namespace(), Some("acme"));
        assert_eq!(set.manifests()[1].body()["spec"]["replicas"], 2);
    }

    #[test]
    fn test_directory_source_expands_lists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("list.yaml"),
            "apiVersion: v1\nkind: List\nitems:\n- apiVersion: v1\n  kind: ConfigMap\n  metadata: {name: a}\n- apiVersion: v1\n  kind: ConfigMap\n  metadata: {name: b, namespace: other}\n",
        )
        .unwrap();

        let set = DirectoryManifestSource::new(dir.path()).load(&vars()).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.manifests()[1].namespace(), Some("other"));
    }

    #[test]
    fn test_directory_source_missing_dir() {
        let err = DirectoryManifestSource::new("/nonexistent/manifests")
            .load(&vars())
            .unwrap_err();
        assert!(matches!(err, DeployError::Config(ConfigError::NotFound { .. })));
    }

    #[test]
    fn test_directory_source_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let err = DirectoryManifestSource::new(dir.path()).load(&vars()).unwrap_err();
        assert!(err.to_string().contains("no manifests found"));
    }
}
