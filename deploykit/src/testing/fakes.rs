//! In-memory collaborators with scripted failures.

use crate::clients::{
    ApplyOutcome, BuildContext, CloudApi, CloudResource, CloudResult, ClusterSpec, ImageRef,
    ImageRegistry, InstanceType, KubeApi, KubeconfigRequest, LoadBalancer, NodePoolSpec,
    NodePoolState, ObjectSummary,
};
use crate::config::RegistryCredentials;
use crate::errors::{CloudError, DeployError, ExternalToolError, Result};
use crate::manifests::Manifest;
use crate::tools::KubeAccess;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

#[derive(Debug, Default)]
struct CloudState {
    instance_types: Vec<InstanceType>,
    versions: Vec<String>,
    next_id: u32,
    existing: HashSet<CloudResource>,
    pool_states: VecDeque<NodePoolState>,
    failures: HashMap<String, VecDeque<CloudError>>,
    calls: Vec<String>,
    pool_specs: Vec<NodePoolSpec>,
    cluster_specs: Vec<ClusterSpec>,
    load_balancers: Vec<LoadBalancer>,
}

/// A cloud provider held in memory.
///
/// Created resources exist until deleted. Failures are queued per operation
/// name (`create_cluster`, `delete_security_group`, ...) and consumed one per
/// call. Node pools report the scripted states, then Running.
#[derive(Debug)]
pub struct FakeCloud {
    state: Mutex<CloudState>,
}

impl Default for FakeCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCloud {
    /// Creates a provider offering `standard.small` and `standard.medium`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CloudState {
                instance_types: vec![
                    InstanceType::new("it-standard-small", "standard", "small"),
                    InstanceType::new("it-standard-medium", "standard", "medium"),
                ],
                versions: vec!["1.31.2".to_string(), "1.30.6".to_string()],
                ..CloudState::default()
            }),
        }
    }

    /// Replaces the offered instance types.
    #[must_use]
    pub fn with_instance_types(self, types: Vec<InstanceType>) -> Self {
        self.state.lock().instance_types = types;
        self
    }

    /// Queues `error` for the next call of `operation`.
    pub fn fail_next(&self, operation: &str, error: CloudError) {
        self.state
            .lock()
            .failures
            .entry(operation.to_string())
            .or_default()
            .push_back(error);
    }

    /// Scripts the states node pools report before Running.
    pub fn script_pool_states(&self, states: Vec<NodePoolState>) {
        self.state.lock().pool_states = states.into();
    }

    /// Marks a resource as existing, as if a previous run created it.
    pub fn insert_existing(&self, resource: CloudResource) {
        self.state.lock().existing.insert(resource);
    }

    /// Adds a load balancer, as if a Service had provisioned one. Returns its id.
    pub fn add_load_balancer(&self, name: &str) -> String {
        let id = self.create("lb", |id| CloudResource::LoadBalancer { id });
        self.state
            .lock()
            .load_balancers
            .push(LoadBalancer::new(id.clone(), name));
        id
    }

    /// Returns the resources that currently exist.
    #[must_use]
    pub fn existing(&self) -> HashSet<CloudResource> {
        self.state.lock().existing.clone()
    }

    /// Returns every call, as `operation` or `operation:target`.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Returns the calls whose operation starts with `prefix`.
    #[must_use]
    pub fn calls_of(&self, prefix: &str) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Returns the node pool requests received.
    #[must_use]
    pub fn pool_specs(&self) -> Vec<NodePoolSpec> {
        self.state.lock().pool_specs.clone()
    }

    /// Returns the cluster requests received.
    #[must_use]
    pub fn cluster_specs(&self) -> Vec<ClusterSpec> {
        self.state.lock().cluster_specs.clone()
    }

    fn begin(&self, operation: &str, target: &str) -> CloudResult<()> {
        let mut state = self.state.lock();
        if target.is_empty() {
            state.calls.push(operation.to_string());
        } else {
            state.calls.push(format!("{operation}:{target}"));
        }
        match state.failures.get_mut(operation).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn create(&self, prefix: &str, make: impl FnOnce(String) -> CloudResource) -> String {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = format!("{prefix}-{:04}", state.next_id);
        state.existing.insert(make(id.clone()));
        id
    }

    fn remove(&self, resource: &CloudResource) -> CloudResult<()> {
        if self.state.lock().existing.remove(resource) {
            Ok(())
        } else {
            Err(CloudError::NotFound {
                kind: resource.kind(),
                id: resource.id().to_string(),
            })
        }
    }
}

#[async_trait]
impl CloudApi for FakeCloud {
    async fn list_instance_types(&self, _zone: &str) -> CloudResult<Vec<InstanceType>> {
        self.begin("list_instance_types", "")?;
        Ok(self.state.lock().instance_types.clone())
    }

    async fn list_kubernetes_versions(&self, _zone: &str) -> CloudResult<Vec<String>> {
        self.begin("list_kubernetes_versions", "")?;
        Ok(self.state.lock().versions.clone())
    }

    async fn create_security_group(&self, name: &str, _description: &str) -> CloudResult<String> {
        self.begin("create_security_group", name)?;
        Ok(self.create("sg", |id| CloudResource::SecurityGroup { id }))
    }

    async fn create_cluster(&self, spec: &ClusterSpec) -> CloudResult<String> {
        self.begin("create_cluster", &spec.name)?;
        self.state.lock().cluster_specs.push(spec.clone());
        Ok(self.create("cluster", |id| CloudResource::Cluster { id }))
    }

    async fn create_node_pool(
        &self,
        _zone: &str,
        cluster_id: &str,
        spec: &NodePoolSpec,
    ) -> CloudResult<String> {
        self.begin("create_node_pool", &spec.name)?;
        self.state.lock().pool_specs.push(spec.clone());
        Ok(self.create("pool", |id| CloudResource::NodePool {
            cluster_id: cluster_id.to_string(),
            id,
        }))
    }

    async fn node_pool_state(
        &self,
        _zone: &str,
        _cluster_id: &str,
        pool_id: &str,
    ) -> CloudResult<NodePoolState> {
        self.begin("node_pool_state", pool_id)?;
        Ok(self
            .state
            .lock()
            .pool_states
            .pop_front()
            .unwrap_or(NodePoolState::Running))
    }

    async fn attach_security_group(
        &self,
        _zone: &str,
        _cluster_id: &str,
        pool_id: &str,
        _security_group_id: &str,
    ) -> CloudResult<()> {
        self.begin("attach_security_group", pool_id)
    }

    async fn generate_kubeconfig(
        &self,
        _zone: &str,
        cluster_id: &str,
        request: &KubeconfigRequest,
    ) -> CloudResult<String> {
        self.begin("generate_kubeconfig", cluster_id)?;
        Ok(format!(
            "apiVersion: v1\nkind: Config\nclusters:\n- name: {cluster_id}\nusers:\n- name: {}\n",
            request.user
        ))
    }

    async fn exists(&self, _zone: &str, resource: &CloudResource) -> CloudResult<bool> {
        self.begin("exists", resource.id())?;
        Ok(self.state.lock().existing.contains(resource))
    }

    async fn list_load_balancers(&self, _zone: &str) -> CloudResult<Vec<LoadBalancer>> {
        self.begin("list_load_balancers", "")?;
        let state = self.state.lock();
        Ok(state
            .load_balancers
            .iter()
            .filter(|lb| {
                state.existing.contains(&CloudResource::LoadBalancer { id: lb.id.clone() })
            })
            .cloned()
            .collect())
    }

    async fn delete_load_balancer(&self, _zone: &str, load_balancer_id: &str) -> CloudResult<()> {
        self.begin("delete_load_balancer", load_balancer_id)?;
        self.remove(&CloudResource::LoadBalancer {
            id: load_balancer_id.to_string(),
        })
    }

    async fn delete_node_pool(&self, _zone: &str, cluster_id: &str, pool_id: &str) -> CloudResult<()> {
        self.begin("delete_node_pool", pool_id)?;
        self.remove(&CloudResource::NodePool {
            cluster_id: cluster_id.to_string(),
            id: pool_id.to_string(),
        })
    }

    async fn delete_cluster(&self, _zone: &str, cluster_id: &str) -> CloudResult<()> {
        self.begin("delete_cluster", cluster_id)?;
        self.remove(&CloudResource::Cluster {
            id: cluster_id.to_string(),
        })
    }

    async fn delete_security_group(&self, security_group_id: &str) -> CloudResult<()> {
        self.begin("delete_security_group", security_group_id)?;
        self.remove(&CloudResource::SecurityGroup {
            id: security_group_id.to_string(),
        })
    }
}

#[derive(Debug, Default)]
struct KubeState {
    nodes: Vec<ObjectSummary>,
    pods: Vec<ObjectSummary>,
    objects: BTreeMap<(String, String, String), serde_json::Value>,
    applied: Vec<String>,
    deleted_namespaces: Vec<String>,
    fail_kinds: HashSet<String>,
    unreachable: bool,
}

/// A cluster control plane held in memory.
///
/// Applies are idempotent: re-applying an identical object reports
/// `unchanged`, a different body for the same object reports `configured`.
#[derive(Debug, Default)]
pub struct FakeKube {
    state: Mutex<KubeState>,
}

impl FakeKube {
    /// Creates an empty cluster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the node list to `ready` Ready nodes plus `not_ready` NotReady nodes.
    pub fn set_nodes(&self, ready: usize, not_ready: usize) {
        let nodes = (0..ready)
            .map(|i| ObjectSummary::new(format!("node-{i}"), "Ready"))
            .chain((0..not_ready).map(|i| ObjectSummary::new(format!("node-nr-{i}"), "NotReady")))
            .collect();
        self.state.lock().nodes = nodes;
    }

    /// Sets the pod list to `running` Running pods plus `pending` Pending pods.
    pub fn set_pods(&self, running: usize, pending: usize) {
        let pods = (0..running)
            .map(|i| ObjectSummary::new(format!("web-{i}"), "Running"))
            .chain((0..pending).map(|i| ObjectSummary::new(format!("web-p-{i}"), "Pending")))
            .collect();
        self.state.lock().pods = pods;
    }

    /// Makes applies of `kind` fail.
    pub fn fail_apply_of(&self, kind: &str) {
        self.state.lock().fail_kinds.insert(kind.to_string());
    }

    /// Makes every call fail as if the API server were unreachable.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    /// Returns `kind/name` of every apply, in order.
    #[must_use]
    pub fn applied(&self) -> Vec<String> {
        self.state.lock().applied.clone()
    }

    /// Returns the number of distinct objects stored.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.state.lock().objects.len()
    }

    /// Returns how many stored objects have `kind`.
    #[must_use]
    pub fn count_of_kind(&self, kind: &str) -> usize {
        self.state
            .lock()
            .objects
            .keys()
            .filter(|(k, _, _)| k == kind)
            .count()
    }

    /// Returns the namespaces deleted.
    #[must_use]
    pub fn deleted_namespaces(&self) -> Vec<String> {
        self.state.lock().deleted_namespaces.clone()
    }

    fn check_reachable(&self, action: &str) -> Result<()> {
        if self.state.lock().unreachable {
            return Err(ExternalToolError::new("kubectl", action, 1, "Unable to connect to the server").into());
        }
        Ok(())
    }
}

#[async_trait]
impl KubeApi for FakeKube {
    async fn apply(&self, _access: &KubeAccess, manifest: &Manifest) -> Result<ApplyOutcome> {
        self.check_reachable("apply")?;
        let mut state = self.state.lock();
        state.applied.push(manifest.reference());
        if state.fail_kinds.contains(manifest.kind()) {
            return Err(ExternalToolError::new(
                "kubectl",
                "apply",
                1,
                &format!("error validating {}", manifest.reference()),
            )
            .into());
        }
        let key = (
            manifest.kind().to_string(),
            manifest.namespace().unwrap_or_default().to_string(),
            manifest.name().to_string(),
        );
        let outcome = match state.objects.insert(key, manifest.body().clone()) {
            None => ApplyOutcome::Created,
            Some(previous) if previous == *manifest.body() => ApplyOutcome::Unchanged,
            Some(_) => ApplyOutcome::Configured,
        };
        Ok(outcome)
    }

    async fn get(
        &self,
        _access: &KubeAccess,
        kind: &str,
        _namespace: &str,
    ) -> Result<Vec<ObjectSummary>> {
        self.check_reachable("get")?;
        let state = self.state.lock();
        match kind {
            "nodes" => Ok(state.nodes.clone()),
            "pods" => Ok(state.pods.clone()),
            other => Err(DeployError::kube(format!("fake cluster cannot list {other}"))),
        }
    }

    async fn delete_namespace(&self, _access: &KubeAccess, namespace: &str) -> Result<bool> {
        self.check_reachable("delete namespace")?;
        let mut state = self.state.lock();
        state.deleted_namespaces.push(namespace.to_string());
        let before = state.objects.len();
        state
            .objects
            .retain(|(kind, ns, name), _| ns != namespace && !(kind == "Namespace" && name == namespace));
        state.pods.clear();
        Ok(state.objects.len() != before)
    }
}

/// An image registry held in memory.
#[derive(Debug, Default)]
pub struct FakeRegistry {
    calls: Mutex<Vec<String>>,
    fail_build: Mutex<bool>,
    fail_push_tags: Mutex<HashSet<String>>,
}

impl FakeRegistry {
    /// Creates a registry where everything succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes builds fail.
    pub fn fail_build(&self) {
        *self.fail_build.lock() = true;
    }

    /// Makes pushes of `tag` fail.
    pub fn fail_push_of(&self, tag: &str) {
        self.fail_push_tags.lock().insert(tag.to_string());
    }

    /// Returns every call, e.g. `build acme/web:1.2.0`.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ImageRegistry for FakeRegistry {
    async fn build(&self, _context: &BuildContext, image: &ImageRef) -> Result<ImageRef> {
        self.calls.lock().push(format!("build {image}"));
        if *self.fail_build.lock() {
            return Err(ExternalToolError::new("docker", "build", 1, "failed to solve: Dockerfile not found").into());
        }
        Ok(image.clone().with_image_id("sha256:0123456789ab"))
    }

    async fn login(&self, credentials: &RegistryCredentials) -> Result<()> {
        self.calls.lock().push(format!("login {}", credentials.server));
        Ok(())
    }

    async fn push(&self, image: &ImageRef) -> Result<()> {
        self.calls.lock().push(format!("push {image}"));
        if self.fail_push_tags.lock().contains(&image.tag) {
            return Err(ExternalToolError::new("docker", "push", 1, "denied: requested access to the resource is denied").into());
        }
        Ok(())
    }
}
