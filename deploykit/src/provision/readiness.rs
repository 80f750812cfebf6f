//! Worker node readiness counts.

use crate::clients::ObjectSummary;
use serde::{Deserialize, Serialize};

/// How many nodes have joined and how many are Ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReadiness {
    /// Nodes registered with the control plane.
    pub registered: u32,
    /// Nodes reporting Ready.
    pub ready: u32,
    /// Nodes expected.
    pub expected: u32,
}

impl NodeReadiness {
    /// Counts Ready nodes in a node listing.
    #[must_use]
    pub fn from_nodes(nodes: &[ObjectSummary], expected: u32) -> Self {
        let count = |n: usize| u32::try_from(n).unwrap_or(u32::MAX);
        Self {
            registered: count(nodes.len()),
            ready: count(nodes.iter().filter(|n| n.status == "Ready").count()),
            expected,
        }
    }

    /// Returns true once every expected node is Ready.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.ready >= self.expected
    }
}
