//! Teardown controller - best-effort reset of every node in a roster

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::sequencer::{run_on_nodes, Provisioner};
use super::steps::reset_steps;
use crate::manifest::Node;

/// Reset result for one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResetResult {
    pub hostname: String,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeResetResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-node results of a teardown, in roster order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeardownReport {
    pub cluster_name: String,
    pub nodes: Vec<NodeResetResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TeardownReport {
    pub fn success(&self) -> bool {
        self.nodes.iter().all(NodeResetResult::is_success)
    }

    pub fn failed_nodes(&self) -> Vec<&NodeResetResult> {
        self.nodes.iter().filter(|n| !n.is_success()).collect()
    }
}

impl Provisioner {
    /// Reset every node. A failure on one node never stops the others; the
    /// report lists what failed.
    pub async fn teardown(
        &self,
        cluster_name: &str,
        nodes: &[Node],
        cancel: &CancellationToken,
    ) -> TeardownReport {
        let started_at = Utc::now();
        info!(
            "Tearing down Kubernetes cluster {} ({} nodes)",
            cluster_name,
            nodes.len()
        );

        let runs = run_on_nodes(
            self.executor(),
            nodes,
            reset_steps(),
            self.config().max_parallel,
            cancel,
            false,
        )
        .await;

        let results: Vec<NodeResetResult> = runs
            .into_iter()
            .map(|run| {
                let error = run.result.err().map(|e| {
                    warn!("Failed to reset {}: {}", run.node.label(), e);
                    e.to_string()
                });
                NodeResetResult {
                    hostname: run.node.hostname,
                    address: run.node.address,
                    error,
                }
            })
            .collect();

        let report = TeardownReport {
            cluster_name: cluster_name.to_string(),
            nodes: results,
            started_at,
            finished_at: Utc::now(),
        };

        if report.success() {
            info!("Cluster {} torn down", cluster_name);
        } else {
            warn!(
                "Cluster {} teardown finished with {} failed node(s)",
                cluster_name,
                report.failed_nodes().len()
            );
        }
        report
    }
}
