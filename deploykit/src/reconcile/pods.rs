//! Pod phase counts.

use crate::clients::ObjectSummary;
use serde::Serialize;
use std::collections::BTreeMap;

/// How many pods are Running out of those expected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PodReadiness {
    /// Pods in phase Running.
    pub running: u32,
    /// Pods listed in any phase.
    pub listed: u32,
    /// Pods expected.
    pub expected: u32,
    /// Pod count per phase.
    pub phases: BTreeMap<String, u32>,
}

impl PodReadiness {
    /// Counts Running pods. Only the Running phase counts; Succeeded does not.
    #[must_use]
    pub fn from_pods(pods: &[ObjectSummary], expected: u32) -> Self {
        let mut phases = BTreeMap::new();
        for pod in pods {
            *phases.entry(pod.status.clone()).or_insert(0) += 1;
        }
        Self {
            running: phases.get("Running").copied().unwrap_or(0),
            listed: u32::try_from(pods.len()).unwrap_or(u32::MAX),
            expected,
            phases,
        }
    }

    /// Returns true once every expected pod is Running.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.running >= self.expected
    }

    /// Formats the phase counts as `Pending=1, Running=1`.
    #[must_use]
    pub fn describe(&self) -> String {
        if self.phases.is_empty() {
            return "none listed".to_string();
        }
        self.phases
            .iter()
            .map(|(phase, count)| format!("{phase}={count}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_running_counts() {
        let pods = vec![
            ObjectSummary::new("a", "Running"),
            ObjectSummary::new("b", "Succeeded"),
            ObjectSummary::new("c", "Pending"),
        ];
        let readiness = PodReadiness::from_pods(&pods, 2);
        assert_eq!(readiness.running, 1);
        assert_eq!(readiness.listed, 3);
        assert!(!readiness.is_complete());
        assert_eq!(readiness.describe(), "Pending=1, Running=1, Succeeded=1");
    }

    #[test]
    fn test_empty_listing() {
        let readiness = PodReadiness::from_pods(&[], 2);
        assert_eq!(readiness.running, 0);
        assert_eq!(readiness.describe(), "none listed");
    }
}
