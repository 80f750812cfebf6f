//! `CloudApi` backed by the `exo` command-line client.
//!
//! Every call runs `exo ... --output-format json` under an explicit
//! environment carrying the API key pair. Failures are classified from the
//! client's stderr into [`CloudError`] variants so the pipeline can tell a
//! lock from a missing resource.

use async_trait::async_trait;
use deploykit::clients::{
    CloudApi, CloudResource, CloudResult, ClusterSpec, InstanceType, KubeconfigRequest,
    LoadBalancer, NodePoolSpec, NodePoolState,
};
use deploykit::config::{CloudCredentials, CLOUD_KEY_VAR, CLOUD_SECRET_VAR};
use deploykit::errors::{CloudError, ExternalToolError, ResourceKind};
use deploykit::tools::{ExecEnv, ToolCommand};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::LazyLock;
use tracing::debug;

#[allow(clippy::expect_used)]
static HTTP_STATUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([45]\d\d)\b").expect("static pattern"));

/// What a failed invocation was acting on, for error classification.
#[derive(Debug, Clone, Copy)]
struct Target<'a> {
    kind: ResourceKind,
    id: &'a str,
    zone: Option<&'a str>,
}

impl<'a> Target<'a> {
    const fn new(kind: ResourceKind, id: &'a str) -> Self {
        Self {
            kind,
            id,
            zone: None,
        }
    }

    const fn in_zone(mut self, zone: &'a str) -> Self {
        self.zone = Some(zone);
        self
    }
}

/// Maps an `exo` failure onto the cloud error taxonomy.
fn classify(target: Target<'_>, err: &ExternalToolError) -> CloudError {
    let message = err.stderr.clone();
    let lower = message.to_ascii_lowercase();
    let status = HTTP_STATUS
        .captures(&message)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u16>().ok());

    if lower.contains("already exists") || lower.contains("name is already in use") {
        return CloudError::NameConflict {
            kind: target.kind,
            name: target.id.to_string(),
        };
    }
    if lower.contains("not found") || status == Some(404) {
        return CloudError::NotFound {
            kind: target.kind,
            id: target.id.to_string(),
        };
    }
    if lower.contains("quota") || lower.contains("limit exceeded") {
        return CloudError::QuotaExceeded(message);
    }
    if let Some(zone) = target.zone {
        if lower.contains("invalid zone") || lower.contains("unknown zone") {
            return CloudError::InvalidZone(zone.to_string());
        }
    }
    if lower.contains("locked") || lower.contains("in use") || status == Some(409) {
        return CloudError::Locked {
            kind: target.kind,
            id: target.id.to_string(),
            message,
        };
    }
    CloudError::api(status, format!("{}: {message}", err.action))
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RawInstanceType {
    id: String,
    #[serde(default)]
    family: String,
    #[serde(default)]
    size: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawVersion {
    Plain(String),
    Object { version: String },
}

#[derive(Debug, Deserialize)]
struct RawLoadBalancer {
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawNodePool {
    #[serde(default)]
    state: String,
}

fn parse_json<T: DeserializeOwned>(action: &str, stdout: &str) -> CloudResult<T> {
    serde_json::from_str(stdout)
        .map_err(|err| CloudError::api(None, format!("unexpected {action} output: {err}")))
}

/// Drives `exo compute ...` for security groups and SKS clusters.
#[derive(Debug, Clone)]
pub struct ExoCli {
    program: String,
    env: ExecEnv,
}

impl ExoCli {
    /// Creates a client whose child processes see only the search path and
    /// the API key pair.
    #[must_use]
    pub fn new(search_path: &str, credentials: &CloudCredentials) -> Self {
        let env = ExecEnv::new(search_path)
            .with_secret(CLOUD_KEY_VAR, credentials.key.clone())
            .with_secret(CLOUD_SECRET_VAR, credentials.secret.clone())
            .with_inherited("HOME");
        Self {
            program: "exo".to_string(),
            env,
        }
    }

    /// Overrides the program name.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self, action: &str) -> ToolCommand {
        ToolCommand::new(&self.program, action).args(["--output-format", "json", "compute"])
    }

    async fn run(&self, command: ToolCommand, target: Target<'_>) -> CloudResult<String> {
        command
            .run(&self.env)
            .await
            .map(|output| output.stdout)
            .map_err(|err| {
                let classified = classify(target, &err);
                debug!(program = %err.program, action = %err.action, error = %classified, "exo call failed");
                classified
            })
    }
}

#[async_trait]
impl CloudApi for ExoCli {
    async fn list_instance_types(&self, zone: &str) -> CloudResult<Vec<InstanceType>> {
        let command = self
            .command("list instance types")
            .args(["instance-type", "list", "--zone", zone]);
        let stdout = self
            .run(command, Target::new(ResourceKind::NodePool, zone).in_zone(zone))
            .await?;
        let raw: Vec<RawInstanceType> = parse_json("instance-type list", &stdout)?;
        Ok(raw
            .into_iter()
            .map(|t| InstanceType::new(t.id, t.family, t.size))
            .collect())
    }

    async fn list_kubernetes_versions(&self, zone: &str) -> CloudResult<Vec<String>> {
        let command = self
            .command("list kubernetes versions")
            .args(["sks", "versions", "--zone", zone]);
        let stdout = self
            .run(command, Target::new(ResourceKind::Cluster, zone).in_zone(zone))
            .await?;
        let raw: Vec<RawVersion> = parse_json("sks versions", &stdout)?;
        Ok(raw
            .into_iter()
            .map(|v| match v {
                RawVersion::Plain(version) | RawVersion::Object { version } => version,
            })
            .collect())
    }

    async fn create_security_group(&self, name: &str, description: &str) -> CloudResult<String> {
        let command = self
            .command("create security group")
            .args(["security-group", "create", name, "--description", description]);
        let stdout = self
            .run(command, Target::new(ResourceKind::SecurityGroup, name))
            .await?;
        Ok(parse_json::<IdOnly>("security-group create", &stdout)?.id)
    }

    async fn create_cluster(&self, spec: &ClusterSpec) -> CloudResult<String> {
        let mut command = self
            .command("create cluster")
            .args(["sks", "create", spec.name.as_str(), "--zone", spec.zone.as_str()])
            .args(["--kubernetes-version", spec.kubernetes_version.as_str()])
            .args(["--service-level", spec.level.as_str(), "--cni", spec.cni.as_str()])
            .args(["--description", spec.description.as_str(), "--no-nodepool"]);
        for addon in &spec.addons {
            command = command.arg(format!("--{addon}"));
        }
        let stdout = self
            .run(
                command,
                Target::new(ResourceKind::Cluster, &spec.name).in_zone(&spec.zone),
            )
            .await?;
        Ok(parse_json::<IdOnly>("sks create", &stdout)?.id)
    }

    async fn create_node_pool(
        &self,
        zone: &str,
        cluster_id: &str,
        spec: &NodePoolSpec,
    ) -> CloudResult<String> {
        let size = spec.size.to_string();
        let disk = spec.disk_gb.to_string();
        let command = self
            .command("create node pool")
            .args(["sks", "nodepool", "add", cluster_id, spec.name.as_str(), "--zone", zone])
            .args(["--size", size.as_str(), "--instance-type", spec.instance_type_id.as_str()])
            .args(["--disk-size", disk.as_str(), "--description", spec.description.as_str()]);
        let stdout = self
            .run(command, Target::new(ResourceKind::NodePool, &spec.name).in_zone(zone))
            .await?;
        Ok(parse_json::<IdOnly>("sks nodepool add", &stdout)?.id)
    }

    async fn node_pool_state(
        &self,
        zone: &str,
        cluster_id: &str,
        pool_id: &str,
    ) -> CloudResult<NodePoolState> {
        let command = self
            .command("show node pool")
            .args(["sks", "nodepool", "show", cluster_id, pool_id, "--zone", zone]);
        let stdout = self
            .run(command, Target::new(ResourceKind::NodePool, pool_id).in_zone(zone))
            .await?;
        let raw: RawNodePool = parse_json("sks nodepool show", &stdout)?;
        Ok(NodePoolState::parse(&raw.state))
    }

    async fn attach_security_group(
        &self,
        zone: &str,
        cluster_id: &str,
        pool_id: &str,
        security_group_id: &str,
    ) -> CloudResult<()> {
        let command = self
            .command("attach security group")
            .args(["sks", "nodepool", "update", cluster_id, pool_id, "--zone", zone])
            .args(["--security-group", security_group_id]);
        self.run(command, Target::new(ResourceKind::NodePool, pool_id).in_zone(zone))
            .await
            .map(drop)
    }

    async fn generate_kubeconfig(
        &self,
        zone: &str,
        cluster_id: &str,
        request: &KubeconfigRequest,
    ) -> CloudResult<String> {
        let ttl = request.ttl_secs.to_string();
        // kubeconfig output is YAML regardless of the output format flag.
        let mut command = ToolCommand::new(&self.program, "generate kubeconfig")
            .args(["compute", "sks", "kubeconfig", cluster_id, request.user.as_str()])
            .args(["--zone", zone, "--ttl", ttl.as_str()]);
        for group in &request.groups {
            command = command.args(["--group", group.as_str()]);
        }
        self.run(command, Target::new(ResourceKind::Cluster, cluster_id).in_zone(zone))
            .await
    }

    async fn exists(&self, zone: &str, resource: &CloudResource) -> CloudResult<bool> {
        let (command, target) = match resource {
            CloudResource::SecurityGroup { id } => (
                self.command("show security group")
                    .args(["security-group", "show", id.as_str()]),
                Target::new(ResourceKind::SecurityGroup, id),
            ),
            CloudResource::Cluster { id } => (
                self.command("show cluster")
                    .args(["sks", "show", id.as_str(), "--zone", zone]),
                Target::new(ResourceKind::Cluster, id),
            ),
            CloudResource::LoadBalancer { id } => (
                self.command("show load balancer")
                    .args(["load-balancer", "show", id.as_str(), "--zone", zone]),
                Target::new(ResourceKind::LoadBalancer, id),
            ),
            CloudResource::NodePool { cluster_id, id } => (
                self.command("show node pool").args([
                    "sks",
                    "nodepool",
                    "show",
                    cluster_id.as_str(),
                    id.as_str(),
                    "--zone",
                    zone,
                ]),
                Target::new(ResourceKind::NodePool, id),
            ),
        };
        match self.run(command, target).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn list_load_balancers(&self, zone: &str) -> CloudResult<Vec<LoadBalancer>> {
        let command = self
            .command("list load balancers")
            .args(["load-balancer", "list", "--zone", zone]);
        let stdout = self
            .run(command, Target::new(ResourceKind::LoadBalancer, zone).in_zone(zone))
            .await?;
        let raw: Vec<RawLoadBalancer> = parse_json("load-balancer list", &stdout)?;
        Ok(raw
            .into_iter()
            .map(|lb| LoadBalancer::new(lb.id, lb.name))
            .collect())
    }

    async fn delete_load_balancer(&self, zone: &str, load_balancer_id: &str) -> CloudResult<()> {
        let command = self
            .command("delete load balancer")
            .args(["load-balancer", "delete", load_balancer_id, "--zone", zone, "--force"]);
        self.run(
            command,
            Target::new(ResourceKind::LoadBalancer, load_balancer_id).in_zone(zone),
        )
        .await
        .map(drop)
    }

    async fn delete_node_pool(
        &self,
        zone: &str,
        cluster_id: &str,
        pool_id: &str,
    ) -> CloudResult<()> {
        let command = self
            .command("delete node pool")
            .args(["sks", "nodepool", "delete", cluster_id, pool_id, "--zone", zone, "--force"]);
        self.run(command, Target::new(ResourceKind::NodePool, pool_id).in_zone(zone))
            .await
            .map(drop)
    }

    async fn delete_cluster(&self, zone: &str, cluster_id: &str) -> CloudResult<()> {
        let command = self
            .command("delete cluster")
            .args(["sks", "delete", cluster_id, "--zone", zone, "--force"]);
        self.run(command, Target::new(ResourceKind::Cluster, cluster_id).in_zone(zone))
            .await
            .map(drop)
    }

    async fn delete_security_group(&self, security_group_id: &str) -> CloudResult<()> {
        let command = self
            .command("delete security group")
            .args(["security-group", "delete", security_group_id, "--force"]);
        self.run(
            command,
            Target::new(ResourceKind::SecurityGroup, security_group_id),
        )
        .await
        .map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(stderr: &str) -> ExternalToolError {
        ExternalToolError::new("exo", "delete security group", 1, stderr)
    }

    #[test]
    fn test_classify_lock() {
        let target = Target::new(ResourceKind::SecurityGroup, "sg-1");
        let err = classify(target, &failure("error: API request error: 409 Conflict"));
        assert!(err.is_lock());

        let err = classify(target, &failure("security group is in use by an instance"));
        assert!(matches!(err, CloudError::Locked { .. }));
    }

    #[test]
    fn test_classify_not_found() {
        let target = Target::new(ResourceKind::Cluster, "c-1").in_zone("ch-gva-2");
        let err = classify(target, &failure("error: resource not found"));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_classify_name_conflict_and_quota() {
        let target = Target::new(ResourceKind::SecurityGroup, "acme-sg");
        assert!(matches!(
            classify(target, &failure("a security group with this name already exists")),
            CloudError::NameConflict { .. }
        ));
        assert!(matches!(
            classify(target, &failure("compute quota exceeded for instances")),
            CloudError::QuotaExceeded(_)
        ));
    }

    #[test]
    fn test_classify_invalid_zone_needs_zone() {
        let err = classify(
            Target::new(ResourceKind::Cluster, "acme").in_zone("xx-nope-1"),
            &failure("invalid zone"),
        );
        assert!(matches!(err, CloudError::InvalidZone(zone) if zone == "xx-nope-1"));
    }

    #[test]
    fn test_classify_other_keeps_status() {
        let err = classify(
            Target::new(ResourceKind::Cluster, "c-1"),
            &failure("API request error: 500 Internal Server Error"),
        );
        assert!(matches!(err, CloudError::Api { status: Some(500), .. }));
    }

    #[test]
    fn test_parse_versions_accepts_both_shapes() {
        let plain: Vec<RawVersion> = parse_json("v", r#"["1.31.2","1.30.6"]"#).unwrap();
        let objects: Vec<RawVersion> =
            parse_json("v", r#"[{"version":"1.31.2"},{"version":"1.30.6"}]"#).unwrap();
        assert_eq!(plain.len(), 2);
        assert!(matches!(&objects[0], RawVersion::Object { version } if version == "1.31.2"));
    }

    #[test]
    fn test_parse_load_balancers_tolerates_missing_name() {
        let raw: Vec<RawLoadBalancer> = parse_json(
            "load-balancer list",
            r#"[{"id":"lb-1","name":"web-nlb","zone":"ch-gva-2"},{"id":"lb-2"}]"#,
        )
        .unwrap();
        assert_eq!(raw[0].name, "web-nlb");
        assert_eq!(raw[1].id, "lb-2");
        assert!(raw[1].name.is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = parse_json::<IdOnly>("sks create", "not json").unwrap_err();
        assert!(matches!(err, CloudError::Api { status: None, .. }));
    }
}
