use serde::Serialize;

use super::error::ProvisionError;
use crate::manifest::Node;

/// Roster split into control-plane and worker nodes.
///
/// The first `control_plane_count` nodes in roster order form the control
/// plane; `control_plane[0]` initializes the cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Partition {
    control_plane: Vec<Node>,
    workers: Vec<Node>,
}

impl Partition {
    pub fn control_plane(&self) -> &[Node] {
        &self.control_plane
    }

    pub fn workers(&self) -> &[Node] {
        &self.workers
    }

    pub fn first_control_plane(&self) -> &Node {
        // partition_roster guarantees at least one control-plane node
        &self.control_plane[0]
    }

    /// Control-plane nodes that join rather than initialize
    pub fn joining_control_plane(&self) -> &[Node] {
        &self.control_plane[1..]
    }

    /// Every node, control plane first, in roster order
    pub fn all_nodes(&self) -> Vec<Node> {
        self.control_plane
            .iter()
            .chain(self.workers.iter())
            .cloned()
            .collect()
    }
}

/// Split `nodes` into control-plane and worker sets.
/// Pure function - requires `0 < control_plane_count <= nodes.len()`.
pub fn partition_roster(
    nodes: &[Node],
    control_plane_count: usize,
) -> Result<Partition, ProvisionError> {
    if nodes.is_empty() {
        return Err(ProvisionError::InvalidRoster("roster is empty".to_string()));
    }
    if control_plane_count == 0 || control_plane_count > nodes.len() {
        return Err(ProvisionError::InvalidRoster(format!(
            "control-plane count {} outside 1..={}",
            control_plane_count,
            nodes.len()
        )));
    }

    let (control_plane, workers) = nodes.split_at(control_plane_count);
    Ok(Partition {
        control_plane: control_plane.to_vec(),
        workers: workers.to_vec(),
    })
}
