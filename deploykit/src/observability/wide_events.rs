//! Wide event emitter: one comprehensive event per finished run.

use crate::core::StageResult;
use crate::events::EventSink;
use crate::pipeline::{DeploymentReport, TeardownReport};
use std::collections::BTreeMap;

/// Emitter for wide events summarizing a whole deployment or teardown.
#[derive(Debug, Clone)]
pub struct WideEventEmitter {
    /// Event type for deployment summaries.
    pub deployment_event_type: String,
    /// Event type for teardown summaries.
    pub teardown_event_type: String,
}

impl Default for WideEventEmitter {
    fn default() -> Self {
        Self {
            deployment_event_type: "deployment.wide".to_string(),
            teardown_event_type: "teardown.wide".to_string(),
        }
    }
}

fn stage_counts(stages: &[StageResult]) -> BTreeMap<String, u32> {
    let mut counts = BTreeMap::new();
    for stage in stages {
        *counts.entry(stage.status.to_string()).or_insert(0) += 1;
    }
    counts
}

fn stage_details(stages: &[StageResult]) -> Vec<serde_json::Value> {
    stages
        .iter()
        .map(|s| {
            serde_json::json!({
                "stage": s.stage,
                "status": s.status,
                "duration_ms": s.duration_ms,
                "retries": s.retries,
                "message": s.message,
            })
        })
        .collect()
}

impl WideEventEmitter {
    /// Creates a new wide event emitter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the deployment summary payload. Secrets never appear in it.
    #[must_use]
    pub fn build_deployment_payload(report: &DeploymentReport) -> serde_json::Value {
        let ctx = &report.context;
        let infra = &report.infrastructure;
        let total_ms: u64 = report.stages.iter().map(|s| s.duration_ms).sum();
        serde_json::json!({
            "run_id": ctx.run_id(),
            "project": ctx.project(),
            "zone": ctx.zone(),
            "namespace": ctx.namespace(),
            "terminal_state": report.terminal_state,
            "aborted_stage": report.aborted_stage,
            "success": report.success,
            "exit_code": report.exit_code(),
            "image": report.image.as_ref().map(ToString::to_string),
            "security_group_id": infra.security_group_id(),
            "cluster_id": infra.cluster_id(),
            "node_pool_id": infra.node_pool_id(),
            "duration_ms": total_ms,
            "stage_counts": stage_counts(&report.stages),
            "stage_details": stage_details(&report.stages),
        })
    }

    /// Builds the teardown summary payload.
    #[must_use]
    pub fn build_teardown_payload(report: &TeardownReport) -> serde_json::Value {
        serde_json::json!({
            "deployment_run_id": report.deployment_run_id,
            "mode": report.mode,
            "planned": report.planned().len(),
            "remaining": report.remaining.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "success": report.success,
            "errors": report.errors(),
            "stage_counts": stage_counts(&report.steps),
            "stage_details": stage_details(&report.steps),
        })
    }

    /// Emits a deployment summary.
    pub async fn emit_deployment(&self, sink: &dyn EventSink, report: &DeploymentReport) {
        sink.emit(
            &self.deployment_event_type,
            Some(Self::build_deployment_payload(report)),
        )
        .await;
    }

    /// Emits a teardown summary.
    pub async fn emit_teardown(&self, sink: &dyn EventSink, report: &TeardownReport) {
        sink.emit(
            &self.teardown_event_type,
            Some(Self::build_teardown_payload(report)),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{InfrastructureHandle, RecordedResource, RunContext};
    use crate::core::StageStatus;
    use crate::events::CollectingEventSink;
    use crate::pipeline::TerminalState;
    use crate::testing::sample_config;
    use chrono::Utc;
    use std::path::Path;
    use std::time::Duration;

    fn report() -> DeploymentReport {
        let config = sample_config(Path::new("/tmp/out"));
        let ctx = RunContext::new(&config);
        let mut infrastructure = InfrastructureHandle::new(ctx.zone());
        infrastructure.security_group = Some(RecordedResource::new("sg-1", "acme-web-sg-101010"));
        let now = Utc::now();
        DeploymentReport {
            stages: vec![
                StageResult::new("build_image", StageStatus::Success, now, Duration::from_millis(1500)),
                StageResult::new("push_image", StageStatus::Success, now, Duration::from_millis(500)),
                StageResult::new("provision_infrastructure", StageStatus::Failed, now, Duration::from_secs(3))
                    .with_message("quota exceeded"),
            ],
            context: ctx,
            success: false,
            terminal_state: TerminalState::Aborted,
            aborted_stage: Some("provision_infrastructure".to_string()),
            infrastructure,
            image: None,
            completed_at: now,
        }
    }

    #[test]
    fn test_build_deployment_payload() {
        let payload = WideEventEmitter::build_deployment_payload(&report());

        assert_eq!(payload["terminal_state"], "aborted");
        assert_eq!(payload["exit_code"], 2);
        assert_eq!(payload["security_group_id"], "sg-1");
        assert_eq!(payload["duration_ms"], 5000);
        assert_eq!(payload["stage_counts"]["success"], 2);
        assert_eq!(payload["stage_counts"]["failed"], 1);
        assert_eq!(payload["stage_details"][2]["message"], "quota exceeded");
    }

    #[tokio::test]
    async fn test_emit_deployment() {
        let sink = CollectingEventSink::new();
        WideEventEmitter::new().emit_deployment(&sink, &report()).await;
        assert_eq!(sink.event_types(), vec!["deployment.wide"]);
    }
}
