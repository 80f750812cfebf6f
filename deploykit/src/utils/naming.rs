//! Resource naming helpers.
//!
//! Cloud resource names must be lowercase DNS labels. Every name generated for
//! a run is prefixed with the project slug and suffixed with the run's
//! time-of-day so concurrent runs in one account never collide.

use regex::Regex;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static INVALID_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9-]").expect("static pattern"));

#[allow(clippy::expect_used)]
static REPEATED_DASHES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-+").expect("static pattern"));

#[allow(clippy::expect_used)]
static DNS_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$").expect("static pattern")
});

/// Converts a free-form project name to a lowercase DNS-label slug.
///
/// Non-alphanumeric characters become `-`, runs of `-` collapse, and leading or
/// trailing dashes are stripped.
#[must_use]
pub fn slugify(name: &str) -> String {
    let lowered = name.to_lowercase();
    let replaced = INVALID_CHARS.replace_all(&lowered, "-");
    let collapsed = REPEATED_DASHES.replace_all(&replaced, "-");
    collapsed.trim_matches('-').to_string()
}

/// Returns true if `value` is a valid RFC 1123 DNS label.
#[must_use]
pub fn is_dns_label(value: &str) -> bool {
    DNS_LABEL.is_match(value)
}

/// Names generated for the cloud resources of one run.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResourceNames {
    /// Security group name.
    pub security_group: String,
    /// Cluster name.
    pub cluster: String,
    /// Node pool name.
    pub node_pool: String,
}

impl ResourceNames {
    /// Derives resource names from a project slug and a `HHMMSS` suffix.
    #[must_use]
    pub fn derive(slug: &str, suffix: &str) -> Self {
        Self {
            security_group: format!("{slug}-sg-{suffix}"),
            cluster: format!("{slug}-cluster-{suffix}"),
            node_pool: format!("{slug}-workers"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("My Project"), "my-project");
        assert_eq!(slugify("Acme__Web--App!"), "acme-web-app");
        assert_eq!(slugify("--edge--"), "edge");
        assert_eq!(slugify("already-fine"), "already-fine");
    }

    #[test]
    fn test_is_dns_label() {
        assert!(is_dns_label("web-prod"));
        assert!(is_dns_label("a"));
        assert!(!is_dns_label("Web"));
        assert!(!is_dns_label("-web"));
        assert!(!is_dns_label("web_prod"));
        assert!(!is_dns_label(&"a".repeat(64)));
    }

    #[test]
    fn test_resource_names() {
        let names = ResourceNames::derive("acme", "142501");
        assert_eq!(names.security_group, "acme-sg-142501");
        assert_eq!(names.cluster, "acme-cluster-142501");
        assert_eq!(names.node_pool, "acme-workers");
    }
}
