//! The deployment state machine.
//!
//! Stages run strictly in order. Each stage's output is recorded in the run
//! state before the next stage starts, and every stage appends exactly one
//! [`StageResult`]. A fatal failure moves the machine to
//! [`PipelineState::Aborted`]; a reduced report is still written so the
//! resources created so far can be torn down.

use super::report::{DeploymentReport, TerminalState};
use crate::clients::{BuildContext, CloudApi, ImageRef, ImageRegistry, KubeApi};
use crate::config::{Credentials, DeployConfig, NodeTimeoutPolicy};
use crate::context::{InfrastructureHandle, RunContext};
use crate::core::{DeployStage, StageResult, StageStatus};
use crate::errors::{DeployError, Result};
use crate::events::{
    EventSink, NoOpEventSink, PIPELINE_FINISHED, STAGE_COMPLETED, STAGE_FAILED, STAGE_STARTED,
};
use crate::manifests::{ManifestSource, TemplateVars};
use crate::polling::{CancellationToken, PollOutcome};
use crate::provision::InfrastructureProvisioner;
use crate::reconcile::ManifestReconciler;
use crate::tools::{ExecEnv, KubeAccess};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};

/// Tag pushed alongside the versioned tag.
pub const LATEST_TAG: &str = "latest";

/// Where the deployment state machine is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    /// Building the image.
    BuildImage,
    /// Pushing the image.
    PushImage,
    /// Creating cloud resources.
    ProvisionInfrastructure,
    /// Waiting for worker nodes.
    WaitForNodes,
    /// Applying manifests.
    ApplyManifests,
    /// Waiting for pods.
    VerifyPods,
    /// Serializing the report.
    WriteReport,
    /// Terminal: the full report was written.
    ReportWritten,
    /// Terminal: a fatal failure stopped the run.
    Aborted,
}

impl PipelineState {
    /// Returns the stage this state runs, if any.
    #[must_use]
    pub fn stage(self) -> Option<DeployStage> {
        match self {
            Self::BuildImage => Some(DeployStage::BuildImage),
            Self::PushImage => Some(DeployStage::PushImage),
            Self::ProvisionInfrastructure => Some(DeployStage::ProvisionInfrastructure),
            Self::WaitForNodes => Some(DeployStage::WaitForNodes),
            Self::ApplyManifests => Some(DeployStage::ApplyManifests),
            Self::VerifyPods => Some(DeployStage::VerifyPods),
            Self::WriteReport => Some(DeployStage::WriteReport),
            Self::ReportWritten | Self::Aborted => None,
        }
    }

    /// Returns the state after this one completes without a fatal failure.
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            Self::BuildImage => Self::PushImage,
            Self::PushImage => Self::ProvisionInfrastructure,
            Self::ProvisionInfrastructure => Self::WaitForNodes,
            Self::WaitForNodes => Self::ApplyManifests,
            Self::ApplyManifests => Self::VerifyPods,
            Self::VerifyPods => Self::WriteReport,
            Self::WriteReport | Self::ReportWritten => Self::ReportWritten,
            Self::Aborted => Self::Aborted,
        }
    }
}

/// The external systems a deployment drives.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    /// Image build and push.
    pub registry: &'a dyn ImageRegistry,
    /// Cloud provider.
    pub cloud: &'a dyn CloudApi,
    /// Cluster control plane.
    pub kube: &'a dyn KubeApi,
    /// Manifest supplier.
    pub manifests: &'a dyn ManifestSource,
}

impl fmt::Debug for Collaborators<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// What a stage produced when it did not fail.
#[derive(Debug)]
struct StageDone {
    status: StageStatus,
    message: Option<String>,
    retries: u32,
    payload: BTreeMap<String, Value>,
}

impl StageDone {
    fn new(status: StageStatus) -> Self {
        Self {
            status,
            message: None,
            retries: 0,
            payload: BTreeMap::new(),
        }
    }

    fn success() -> Self {
        Self::new(StageStatus::Success)
    }

    fn with(mut self, key: &str, value: Value) -> Self {
        self.payload.insert(key.to_string(), value);
        self
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Values stages hand to later stages.
#[derive(Debug)]
struct RunState {
    handle: InfrastructureHandle,
    results: Vec<StageResult>,
    image: Option<ImageRef>,
    access: Option<KubeAccess>,
}

/// Runs one deployment from image build to report.
pub struct DeploymentPipeline<'a> {
    config: &'a DeployConfig,
    credentials: &'a Credentials,
    collaborators: Collaborators<'a>,
    events: Arc<dyn EventSink>,
    cancel: Option<Arc<CancellationToken>>,
    env: ExecEnv,
}

impl<'a> DeploymentPipeline<'a> {
    /// Creates a pipeline. Cluster tools run with only the configured search path.
    #[must_use]
    pub fn new(
        config: &'a DeployConfig,
        credentials: &'a Credentials,
        collaborators: Collaborators<'a>,
    ) -> Self {
        Self {
            config,
            credentials,
            collaborators,
            events: Arc::new(NoOpEventSink),
            cancel: None,
            env: ExecEnv::new(&config.search_path),
        }
    }

    /// Sends stage lifecycle events to `sink`.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Lets `token` end the blocking waits early.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Replaces the environment cluster tools run with.
    #[must_use]
    pub fn with_exec_env(mut self, env: ExecEnv) -> Self {
        self.env = env;
        self
    }

    /// Runs a deployment starting now.
    pub async fn run(&self) -> DeploymentReport {
        self.run_with_context(RunContext::new(self.config)).await
    }

    /// Runs a deployment with an existing run identity.
    ///
    /// Always returns a report. Whether it reached disk is recorded in its
    /// `write_report` result, or logged for aborted runs.
    pub async fn run_with_context(&self, ctx: RunContext) -> DeploymentReport {
        info!(
            run_id = %ctx.run_id(),
            project = %ctx.project(),
            zone = %ctx.zone(),
            run_dir = %ctx.run_dir().display(),
            "deployment started"
        );
        let mut run = RunState {
            handle: InfrastructureHandle::new(ctx.zone()),
            results: Vec::with_capacity(DeployStage::ALL.len()),
            image: None,
            access: None,
        };

        let mut state = PipelineState::BuildImage;
        let mut aborted_stage = None;
        while let Some(stage) = state.stage() {
            if stage == DeployStage::WriteReport {
                break;
            }
            let span = info_span!("stage", stage = stage.as_str(), run_id = %ctx.run_id());
            if self.run_stage(stage, &ctx, &mut run).instrument(span).await {
                state = state.next();
            } else {
                aborted_stage = Some(stage);
                state = PipelineState::Aborted;
            }
        }

        let report = self.finish(&ctx, run, aborted_stage).await;
        self.events
            .emit(
                PIPELINE_FINISHED,
                Some(json!({
                    "run_id": ctx.run_id(),
                    "terminal_state": report.terminal_state,
                    "success": report.success,
                    "exit_code": report.exit_code(),
                })),
            )
            .await;
        report
    }

    /// Runs one stage and records its result. Returns false if the stage was fatal.
    async fn run_stage(&self, stage: DeployStage, ctx: &RunContext, run: &mut RunState) -> bool {
        let started_at = Utc::now();
        let clock = Instant::now();
        info!("stage started");
        self.events
            .emit(STAGE_STARTED, Some(json!({ "stage": stage.as_str(), "run_id": ctx.run_id() })))
            .await;

        let outcome = self.execute(stage, ctx, run).await;
        let elapsed = clock.elapsed();
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Ok(done) => {
                if done.status.is_warning() {
                    warn!(status = %done.status, elapsed_ms, detail = done.message.as_deref().unwrap_or(""), "stage finished with warnings");
                } else {
                    info!(status = %done.status, elapsed_ms, "stage completed");
                }
                self.events
                    .emit(
                        STAGE_COMPLETED,
                        Some(json!({
                            "stage": stage.as_str(),
                            "status": done.status,
                            "duration_ms": elapsed_ms,
                        })),
                    )
                    .await;
                let mut result = StageResult::new(stage.as_str(), done.status, started_at, elapsed)
                    .with_retries(done.retries)
                    .with_payload_map(done.payload);
                if let Some(message) = done.message {
                    result = result.with_message(message);
                }
                run.results.push(result);
                true
            }
            Err(err) => {
                error!(elapsed_ms, error = %err, kind = err.kind(), "stage failed");
                self.events
                    .emit(
                        STAGE_FAILED,
                        Some(json!({
                            "stage": stage.as_str(),
                            "error": err.to_string(),
                            "duration_ms": elapsed_ms,
                        })),
                    )
                    .await;
                run.results.push(
                    StageResult::new(stage.as_str(), StageStatus::Failed, started_at, elapsed)
                        .with_message(err.to_string())
                        .with_payload("error_kind", json!(err.kind())),
                );
                false
            }
        }
    }

    async fn execute(
        &self,
        stage: DeployStage,
        ctx: &RunContext,
        run: &mut RunState,
    ) -> Result<StageDone> {
        match stage {
            DeployStage::BuildImage => self.build_image(ctx, run).await,
            DeployStage::PushImage => self.push_image(run).await,
            DeployStage::ProvisionInfrastructure => self.provision(ctx, run).await,
            DeployStage::WaitForNodes => self.wait_for_nodes(ctx, run).await,
            DeployStage::ApplyManifests => self.apply_manifests(ctx, run).await,
            DeployStage::VerifyPods => self.verify_pods(ctx, run).await,
            DeployStage::WriteReport => Err(DeployError::fatal(
                stage.as_str(),
                "the report is written when the run finishes",
            )),
        }
    }

    async fn build_image(&self, ctx: &RunContext, run: &mut RunState) -> Result<StageDone> {
        let version = &self.config.service_version;
        let image = ImageRef::new(self.config.image_repository(), version);
        let context = BuildContext {
            context_dir: self.config.build.context_dir.clone(),
            dockerfile: self.config.dockerfile(),
            platform: self.config.build.platform.clone(),
            extra_tags: vec![LATEST_TAG.to_string()],
            labels: BTreeMap::from([
                ("org.opencontainers.image.version".to_string(), version.clone()),
                (
                    "org.opencontainers.image.created".to_string(),
                    ctx.started_at().to_rfc3339(),
                ),
            ]),
            build_args: BTreeMap::from([("SERVICE_VERSION".to_string(), version.clone())]),
        };
        let built = self.collaborators.registry.build(&context, &image).await?;
        info!(image = %built, image_id = built.image_id.as_deref().unwrap_or("unknown"), "image built");
        let done = StageDone::success()
            .with("image", json!(built.to_string()))
            .with("image_id", json!(built.image_id))
            .with("platform", json!(context.platform));
        run.image = Some(built);
        Ok(done)
    }

    async fn push_image(&self, run: &RunState) -> Result<StageDone> {
        let image = run
            .image
            .as_ref()
            .ok_or_else(|| DeployError::fatal(DeployStage::PushImage.as_str(), "no image was built"))?;
        let registry = self.collaborators.registry;
        registry
            .login(&self.config.registry_credentials(self.credentials))
            .await?;
        registry.push(image).await?;
        let mut pushed = vec![image.to_string()];

        let latest = image.retagged(LATEST_TAG);
        let mut done = StageDone::success();
        match registry.push(&latest).await {
            Ok(()) => pushed.push(latest.to_string()),
            Err(err) => {
                warn!(image = %latest, error = %err, "pushing the latest tag failed");
                done = done.with_message(format!("{latest} not pushed: {err}"));
            }
        }
        Ok(done.with("pushed", json!(pushed)))
    }

    async fn provision(&self, ctx: &RunContext, run: &mut RunState) -> Result<StageDone> {
        let summary = InfrastructureProvisioner::new(self.collaborators.cloud, self.config, ctx)
            .with_cancellation(self.cancel.clone())
            .provision(&mut run.handle)
            .await?;
        let status = if summary.is_degraded() {
            StageStatus::Degraded
        } else {
            StageStatus::Success
        };
        let mut done = StageDone::new(status)
            .with("instance_type_id", json!(summary.instance_type_id))
            .with("kubernetes_version", json!(summary.kubernetes_version))
            .with("security_group_id", json!(run.handle.security_group_id()))
            .with("cluster_id", json!(run.handle.cluster_id()))
            .with("node_pool_id", json!(run.handle.node_pool_id()))
            .with("security_group_attached", json!(summary.attach.attached))
            .with("kubeconfig", json!(summary.kubeconfig));
        done.retries = summary.attach.retries;
        if !summary.warnings.is_empty() {
            done = done.with_message(summary.warnings.join("; "));
        }
        Ok(done)
    }

    async fn wait_for_nodes(&self, ctx: &RunContext, run: &mut RunState) -> Result<StageDone> {
        let kubeconfig = run.handle.kubeconfig().ok_or_else(|| {
            DeployError::fatal(DeployStage::WaitForNodes.as_str(), "no kubeconfig was recorded")
        })?;
        let access = KubeAccess::new(kubeconfig, self.env.clone());
        let expected = self.config.nodes.count;
        let settings = self.config.timeouts.nodes_ready;

        let outcome = InfrastructureProvisioner::new(self.collaborators.cloud, self.config, ctx)
            .with_cancellation(self.cancel.clone())
            .wait_for_nodes_ready(self.collaborators.kube, &access, expected)
            .await;
        run.access = Some(access);

        match outcome {
            PollOutcome::Ready(readiness) => Ok(StageDone::success()
                .with("ready", json!(readiness.ready))
                .with("expected", json!(expected))),
            PollOutcome::Pending(last) => {
                let ready = last.map_or(0, |r| r.ready);
                match self.config.policy.node_timeout {
                    NodeTimeoutPolicy::Proceed => Ok(StageDone::new(StageStatus::Timeout)
                        .with_message(format!(
                            "{ready} of {expected} nodes Ready after {}s, proceeding",
                            settings.deadline_secs
                        ))
                        .with("ready", json!(ready))
                        .with("expected", json!(expected))),
                    NodeTimeoutPolicy::Fail => Err(DeployError::DeadlineExceeded {
                        what: format!("{expected} worker nodes Ready ({ready} Ready)"),
                        waited_secs: settings.deadline_secs,
                    }),
                }
            }
            PollOutcome::Failed(err) => Err(err),
        }
    }

    async fn apply_manifests(&self, ctx: &RunContext, run: &mut RunState) -> Result<StageDone> {
        let stage = DeployStage::ApplyManifests.as_str();
        let access = run
            .access
            .as_ref()
            .ok_or_else(|| DeployError::fatal(stage, "no cluster access was established"))?;
        let image = run
            .image
            .as_ref()
            .ok_or_else(|| DeployError::fatal(stage, "no image was built"))?;
        let namespace = ctx.namespace();
        let secret_name = &self.config.registry.secret_name;

        let reconciler = ManifestReconciler::new(self.collaborators.kube, access)
            .with_audit_dir(ctx.manifests_dir());
        reconciler.ensure_namespace(namespace).await?;
        let secret = reconciler
            .reconcile_secret(
                namespace,
                secret_name,
                &self.config.registry_credentials(self.credentials),
            )
            .await?;

        let vars = TemplateVars {
            image: image.to_string(),
            namespace: namespace.to_string(),
            service_name: self.config.service_name.clone(),
            replicas: self.config.kubernetes.replicas,
            version: self.config.service_version.clone(),
        };
        let set = self.collaborators.manifests.load(&vars)?;
        // Recorded before applying: a partial apply can still create them.
        run.handle.load_balancer_names = set.load_balancer_names();
        let applied = reconciler.apply_manifests(&set).await?;

        Ok(StageDone::success()
            .with("namespace", json!(namespace))
            .with("pull_secret", json!({ "name": secret_name, "outcome": secret }))
            .with("manifests", serde_json::to_value(&applied)?)
            .with("load_balancers", json!(run.handle.load_balancer_names)))
    }

    async fn verify_pods(&self, ctx: &RunContext, run: &RunState) -> Result<StageDone> {
        let access = run.access.as_ref().ok_or_else(|| {
            DeployError::fatal(DeployStage::VerifyPods.as_str(), "no cluster access was established")
        })?;
        let expected = self.config.kubernetes.replicas;
        let readiness = ManifestReconciler::new(self.collaborators.kube, access)
            .with_cancellation(self.cancel.clone())
            .wait_for_pods_running(ctx.namespace(), expected, self.config.timeouts.pods_running)
            .await?;

        let mut done = if readiness.is_complete() {
            StageDone::success()
        } else {
            StageDone::new(StageStatus::Degraded).with_message(format!(
                "{} of {expected} pods Running ({})",
                readiness.running,
                readiness.describe()
            ))
        };
        done = done
            .with("running", json!(readiness.running))
            .with("expected", json!(expected))
            .with("phases", json!(readiness.phases));
        Ok(done)
    }

    /// Builds the report and writes it.
    ///
    /// A completed run appends its `write_report` result before serializing,
    /// so the file on disk holds all seven results.
    async fn finish(
        &self,
        ctx: &RunContext,
        run: RunState,
        aborted_stage: Option<DeployStage>,
    ) -> DeploymentReport {
        let path = ctx.report_path();
        let mut report = DeploymentReport {
            context: ctx.clone(),
            success: aborted_stage.is_none(),
            terminal_state: if aborted_stage.is_some() {
                TerminalState::Aborted
            } else {
                TerminalState::ReportWritten
            },
            aborted_stage: aborted_stage.map(|s| s.as_str().to_string()),
            stages: run.results,
            infrastructure: run.handle,
            image: run.image,
            completed_at: Utc::now(),
        };

        if aborted_stage.is_some() {
            match report.write(&path).await {
                Ok(()) => info!(path = %path.display(), stages = report.stages.len(), "reduced report written"),
                Err(err) => error!(path = %path.display(), error = %err, "writing the reduced report failed"),
            }
            return report;
        }

        let span = info_span!("stage", stage = DeployStage::WriteReport.as_str(), run_id = %ctx.run_id());
        self.write_final_report(ctx, &mut report, &path).instrument(span).await;
        report
    }

    /// Records the `write_report` stage and writes the complete report.
    async fn write_final_report(&self, ctx: &RunContext, report: &mut DeploymentReport, path: &Path) {
        let stage = DeployStage::WriteReport;
        let started_at = Utc::now();
        let clock = Instant::now();
        self.events
            .try_emit(STAGE_STARTED, Some(json!({ "stage": stage.as_str(), "run_id": ctx.run_id() })));
        report.stages.push(
            StageResult::new(stage.as_str(), StageStatus::Success, started_at, clock.elapsed())
                .with_payload("path", json!(path)),
        );

        match report.write(path).await {
            Ok(()) => {
                info!(path = %path.display(), "report written");
                self.events
                    .try_emit(STAGE_COMPLETED, Some(json!({ "stage": stage.as_str(), "status": StageStatus::Success })));
            }
            Err(err) => {
                error!(path = %path.display(), error = %err, "writing the report failed");
                self.events
                    .try_emit(STAGE_FAILED, Some(json!({ "stage": stage.as_str(), "error": err.to_string() })));
                if let Some(last) = report.stages.last_mut() {
                    last.status = StageStatus::Failed;
                    last.message = Some(err.to_string());
                }
                report.success = false;
                report.terminal_state = TerminalState::Aborted;
                report.aborted_stage = Some(stage.as_str().to_string());
            }
        }
    }
}
