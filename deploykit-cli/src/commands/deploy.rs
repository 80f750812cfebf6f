//! Deploy command - Build, push, provision and deploy in one run
//!
//! Usage: deploykit deploy [--config config.yaml] [--auto]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use deploykit::config::{Credentials, DeployConfig};
use deploykit::events::LoggingEventSink;
use deploykit::manifests::DirectoryManifestSource;
use deploykit::observability::WideEventEmitter;
use deploykit::pipeline::{Collaborators, DeploymentPipeline, DeploymentReport, EXIT_SUCCESS};
use deploykit::tools::{DockerCli, ExecEnv, Kubectl};

use super::interrupt_token;
use crate::exo::ExoCli;
use crate::prompt;

/// Build, push, provision and deploy
#[derive(Args, Debug)]
pub struct DeployArgs {
    /// Path to the deployment config YAML
    #[arg(short, long, default_value = "config.yaml")]
    pub config: PathBuf,

    /// Skip the configuration review and confirmation prompt
    #[arg(long)]
    pub auto: bool,
}

/// Renders the resolved configuration for review. Contains no secrets.
pub fn describe_config(config: &DeployConfig) -> String {
    let mut lines = vec![
        format!("  Project:     {}", config.project_name),
        format!(
            "  Service:     {}:{}",
            config.image_repository(),
            config.service_version
        ),
        format!("  Zone:        {}", config.zone),
        format!(
            "  Nodes:       {} x {}.{} ({} GB disk)",
            config.nodes.count,
            config.nodes.family,
            config.effective_node_size(),
            config.nodes.disk_gb
        ),
        format!(
            "  Namespace:   {} ({} replicas)",
            config.kubernetes.namespace, config.kubernetes.replicas
        ),
        format!("  Manifests:   {}", config.kubernetes.manifests_dir.display()),
        format!("  Outputs:     {}", config.output_dir.display()),
    ];
    if let Some(version) = &config.cluster.kubernetes_version {
        lines.push(format!("  Kubernetes:  {version}"));
    }
    lines.join("\n")
}

/// Renders the per-stage outcome of a run.
pub fn describe_report(report: &DeploymentReport) -> String {
    let mut lines: Vec<String> = report
        .stages
        .iter()
        .map(|stage| {
            let message = stage
                .message
                .as_deref()
                .map(|m| format!(" - {m}"))
                .unwrap_or_default();
            format!(
                "  {:<26} {:<9} {:>7} ms{message}",
                stage.stage, stage.status, stage.duration_ms
            )
        })
        .collect();
    if let Some(stage) = &report.aborted_stage {
        lines.push(format!("\n  Aborted at {stage}."));
        if report.infrastructure.has_resources() {
            lines.push("  Infrastructure was created; run `deploykit teardown` to remove it.".to_string());
        }
    }
    lines.push(format!(
        "\n  Report: {}",
        report.context.report_path().display()
    ));
    lines.join("\n")
}

pub async fn run(args: DeployArgs) -> anyhow::Result<i32> {
    let config = DeployConfig::load(&args.config)
        .with_context(|| format!("failed to load config {}", args.config.display()))?;
    let credentials = Credentials::from_env().context("failed to read credentials")?;

    println!("\nDeployment configuration:\n{}", describe_config(&config));
    if !args.auto && !prompt::confirm("Proceed with deployment?")? {
        println!("Deployment cancelled.");
        return Ok(EXIT_SUCCESS);
    }

    let tool_env = ExecEnv::new(&config.search_path)
        .with_inherited("HOME")
        .with_inherited("DOCKER_HOST")
        .with_inherited("DOCKER_CONFIG");
    let docker = DockerCli::new(tool_env.clone());
    let cloud = ExoCli::new(&config.search_path, &credentials.cloud);
    let kubectl = Kubectl::new();
    let manifests = DirectoryManifestSource::new(&config.kubernetes.manifests_dir);
    let collaborators = Collaborators {
        registry: &docker,
        cloud: &cloud,
        kube: &kubectl,
        manifests: &manifests,
    };

    let sink = Arc::new(LoggingEventSink::default());
    let report = DeploymentPipeline::new(&config, &credentials, collaborators)
        .with_event_sink(sink.clone())
        .with_cancellation(interrupt_token())
        .with_exec_env(tool_env)
        .run()
        .await;
    WideEventEmitter::new()
        .emit_deployment(sink.as_ref(), &report)
        .await;

    println!("\nDeployment summary:\n{}", describe_report(&report));
    Ok(report.exit_code())
}
