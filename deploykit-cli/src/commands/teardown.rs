//! Teardown command - Delete every resource a deployment recorded
//!
//! Usage: deploykit teardown [--config config.yaml] [--report PATH] [--force] [--dry-run]
//!
//! Resources are taken from the deployment report, never guessed from
//! names. Without `--report` the latest run under the output directory is
//! used.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use deploykit::config::{Credentials, DeployConfig};
use deploykit::events::LoggingEventSink;
use deploykit::observability::WideEventEmitter;
use deploykit::pipeline::{
    resolve_report_path, DeploymentReport, TeardownMode, TeardownPipeline, TeardownReport,
    TeardownTarget, EXIT_SUCCESS,
};
use deploykit::tools::{ExecEnv, Kubectl};
use tracing::info;

use crate::exo::ExoCli;
use crate::prompt;

/// Delete the resources recorded in a deployment report
#[derive(Args, Debug)]
pub struct TeardownArgs {
    /// Path to the deployment config YAML
    #[arg(short, long, default_value = "config.yaml")]
    pub config: PathBuf,

    /// Deployment report to tear down (defaults to the latest run)
    #[arg(short, long)]
    pub report: Option<PathBuf>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub force: bool,

    /// Show what would be deleted without deleting anything
    #[arg(long)]
    pub dry_run: bool,
}

fn describe_targets(targets: &[TeardownTarget]) -> String {
    targets
        .iter()
        .map(|t| {
            let state = if t.present { "present" } else { "already gone" };
            format!("  {:<36} {:<28} {state}", t.resource.to_string(), t.name)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Renders the outcome of a teardown, worded for its mode.
pub fn describe_outcome(report: &TeardownReport) -> String {
    match (report.mode, report.success) {
        (TeardownMode::DryRun, _) => format!(
            "DRY RUN: would delete {} resource(s); nothing was deleted.",
            report.planned().len()
        ),
        (TeardownMode::Execute, true) => {
            "Teardown complete: every recorded resource is gone.".to_string()
        }
        (TeardownMode::Execute, false) => {
            let mut lines = vec![format!(
                "Teardown incomplete: {} step(s) failed, {} resource(s) remain.",
                report.errors().len(),
                report.remaining.len()
            )];
            lines.extend(report.errors().into_iter().map(|e| format!("  error: {e}")));
            lines.extend(
                report
                    .remaining
                    .iter()
                    .map(|r| format!("  remaining: {r} (delete it manually in the provider console)")),
            );
            lines.join("\n")
        }
    }
}

pub async fn run(args: TeardownArgs) -> anyhow::Result<i32> {
    let config = DeployConfig::load(&args.config)
        .with_context(|| format!("failed to load config {}", args.config.display()))?;
    let credentials = Credentials::from_env().context("failed to read credentials")?;

    let report_path = resolve_report_path(args.report.as_deref(), &config.output_dir)
        .context("no deployment report to tear down")?;
    let deployment = DeploymentReport::load(&report_path)
        .with_context(|| format!("failed to read report {}", report_path.display()))?;
    info!(report = %report_path.display(), run_id = %deployment.context.run_id(), "loaded deployment report");

    let cloud = ExoCli::new(&config.search_path, &credentials.cloud);
    let kubectl = Kubectl::new();
    let sink = Arc::new(LoggingEventSink::default());
    let pipeline = TeardownPipeline::new(
        &cloud,
        &kubectl,
        config.policy,
        ExecEnv::new(&config.search_path).with_inherited("HOME"),
    )
    .with_event_sink(sink.clone());

    let targets = pipeline.discover(&deployment).await;
    println!(
        "\nResources recorded by run {} ({}):\n{}",
        deployment.context.run_id(),
        report_path.display(),
        describe_targets(&targets)
    );

    let mode = if args.dry_run {
        TeardownMode::DryRun
    } else {
        TeardownMode::Execute
    };
    let anything_present = targets.iter().any(|t| t.present);
    if mode == TeardownMode::Execute && !anything_present {
        println!("\nNothing to delete; every recorded resource is already gone.");
    }
    if mode == TeardownMode::Execute
        && anything_present
        && !args.force
        && !prompt::confirm("Delete these resources? This cannot be undone.")?
    {
        println!("Teardown cancelled.");
        return Ok(EXIT_SUCCESS);
    }

    let teardown = pipeline
        .run_with_targets(&deployment, &report_path, mode, targets)
        .await;
    WideEventEmitter::new()
        .emit_teardown(sink.as_ref(), &teardown)
        .await;

    if mode == TeardownMode::Execute {
        let written = teardown
            .write(&config.output_dir)
            .await
            .context("failed to write teardown report")?;
        println!("\nTeardown report: {}", written.display());
    }
    println!("\n{}", describe_outcome(&teardown));
    Ok(teardown.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use deploykit::clients::CloudResource;

    fn report(mode: TeardownMode, success: bool, remaining: Vec<CloudResource>) -> TeardownReport {
        TeardownReport {
            source_report: PathBuf::from("outputs/run/deployment_report.json"),
            deployment_run_id: uuid::Uuid::nil(),
            started_at: Utc::now(),
            mode,
            namespace: "acme".to_string(),
            targets: vec![TeardownTarget {
                resource: CloudResource::SecurityGroup {
                    id: "sg-1".to_string(),
                },
                name: "acme-sg".to_string(),
                present: true,
            }],
            steps: Vec::new(),
            remaining,
            success,
        }
    }

    #[test]
    fn test_dry_run_wording() {
        let text = describe_outcome(&report(TeardownMode::DryRun, true, Vec::new()));
        assert!(text.starts_with("DRY RUN"));
        assert!(text.contains("1 resource(s)"));
    }

    #[test]
    fn test_targets_listing_names_load_balancers() {
        let targets = vec![
            TeardownTarget {
                resource: CloudResource::LoadBalancer {
                    id: "lb-1".to_string(),
                },
                name: "web-nlb".to_string(),
                present: true,
            },
            TeardownTarget {
                resource: CloudResource::Cluster {
                    id: "c-1".to_string(),
                },
                name: "acme".to_string(),
                present: false,
            },
        ];
        let lines: Vec<String> = describe_targets(&targets).lines().map(str::to_string).collect();
        assert!(lines[0].contains("load balancer lb-1") && lines[0].contains("web-nlb"));
        assert!(lines[0].ends_with("present"));
        assert!(lines[1].ends_with("already gone"));
    }

    #[test]
    fn test_destructive_failure_wording() {
        let sg = CloudResource::SecurityGroup {
            id: "sg-1".to_string(),
        };
        let text = describe_outcome(&report(TeardownMode::Execute, false, vec![sg]));
        assert!(text.starts_with("Teardown incomplete"));
        assert!(text.contains("remaining: security group sg-1"));
    }
}
