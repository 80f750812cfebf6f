//! Stage result records appended to deployment and teardown reports.

use super::StageStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Outcome of one pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage name.
    pub stage: String,
    /// Stage status.
    pub status: StageStatus,
    /// When the stage started.
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Diagnostic message (error text for failures, warning text otherwise).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Number of retries performed inside the stage.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub retries: u32,
    /// Stage-specific payload.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub payload: BTreeMap<String, serde_json::Value>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl StageResult {
    /// Creates a new stage result.
    #[must_use]
    pub fn new(
        stage: impl Into<String>,
        status: StageStatus,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            stage: stage.into(),
            status,
            started_at,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            message: None,
            retries: 0,
            payload: BTreeMap::new(),
        }
    }

    /// Sets the diagnostic message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Sets the retry count.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Adds a single payload entry.
    #[must_use]
    pub fn with_payload(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    /// Merges payload entries.
    #[must_use]
    pub fn with_payload_map(mut self, payload: BTreeMap<String, serde_json::Value>) -> Self {
        self.payload.extend(payload);
        self
    }

    /// Returns true if the stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns true if the stage failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status.is_failure()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_result_success() {
        let result = StageResult::new(
            "build_image",
            StageStatus::Success,
            Utc::now(),
            Duration::from_millis(1500),
        )
        .with_payload("image", serde_json::json!("acme/web:1.0.0"));

        assert_eq!(result.stage, "build_image");
        assert!(result.is_success());
        assert!(!result.is_failure());
        assert_eq!(result.duration_ms, 1500);
        assert_eq!(result.payload["image"], "acme/web:1.0.0");
    }

    #[test]
    fn test_stage_result_failed() {
        let result = StageResult::new("push_image", StageStatus::Failed, Utc::now(), Duration::ZERO)
            .with_message("denied: requested access to the resource is denied");

        assert!(result.is_failure());
        assert_eq!(
            result.message.as_deref(),
            Some("denied: requested access to the resource is denied")
        );
    }

    #[test]
    fn test_stage_result_serialization_omits_empty() {
        let result = StageResult::new("verify_pods", StageStatus::Success, Utc::now(), Duration::ZERO);
        let json = serde_json::to_value(&result).unwrap();

        assert!(json.get("message").is_none());
        assert!(json.get("retries").is_none());
        assert!(json.get("payload").is_none());

        let back: StageResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_stage_result_records_retries() {
        let result = StageResult::new(
            "delete_security_group",
            StageStatus::Success,
            Utc::now(),
            Duration::ZERO,
        )
        .with_retries(1);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["retries"], 1);
    }
}
