//! Provisioning phases and the per-run session state

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ProvisionError;
use super::roster::Partition;
use super::secrets::JoinCommand;
use crate::manifest::{ClusterSpec, Node};

/// Phases of a provisioning run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Session created, nothing issued yet
    Pending,
    Prereqs,
    MasterInit,
    MasterJoin,
    WorkerJoin,
    HaSetup,
    CniInstall,
    AgentRegistration,
    /// Terminal: every phase completed
    Provisioned,
    /// Terminal: a phase failed
    Failed,
}

impl Phase {
    /// Working phases in the order the sequencer runs them
    pub const ORDER: [Phase; 7] = [
        Phase::Prereqs,
        Phase::MasterInit,
        Phase::MasterJoin,
        Phase::WorkerJoin,
        Phase::HaSetup,
        Phase::CniInstall,
        Phase::AgentRegistration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Pending => "PENDING",
            Phase::Prereqs => "PREREQS",
            Phase::MasterInit => "MASTER_INIT",
            Phase::MasterJoin => "MASTER_JOIN",
            Phase::WorkerJoin => "WORKER_JOIN",
            Phase::HaSetup => "HA_SETUP",
            Phase::CniInstall => "CNI_INSTALL",
            Phase::AgentRegistration => "AGENT_REGISTRATION",
            Phase::Provisioned => "PROVISIONED",
            Phase::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Provisioned | Phase::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State owned by exactly one provisioning run. Never shared, never persisted.
#[derive(Debug)]
pub struct ProvisioningSession {
    run_id: Uuid,
    cluster: ClusterSpec,
    partition: Partition,
    worker_join: Option<JoinCommand>,
    control_plane_join: Option<JoinCommand>,
    phase: Phase,
}

impl ProvisioningSession {
    pub fn new(cluster: ClusterSpec, partition: Partition) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            cluster,
            partition,
            worker_join: None,
            control_plane_join: None,
            phase: Phase::Pending,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn cluster(&self) -> &ClusterSpec {
        &self.cluster
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The node that initializes the cluster and hosts HA, CNI and registration
    pub fn first_control_plane(&self) -> &Node {
        self.partition.first_control_plane()
    }

    /// Move to `next`. Phases only ever move forward.
    pub fn advance(&mut self, next: Phase) -> Result<(), ProvisionError> {
        if self.phase.is_terminal() || next <= self.phase {
            return Err(ProvisionError::Sequencing {
                phase: next,
                missing: format!("a forward transition from {}", self.phase),
            });
        }
        self.phase = next;
        Ok(())
    }

    /// Record a terminal failure
    pub fn fail(&mut self) {
        self.phase = Phase::Failed;
    }

    /// Cache both join commands produced by MASTER_INIT
    pub fn set_join_commands(&mut self, worker: JoinCommand, control_plane: JoinCommand) {
        self.worker_join = Some(worker);
        self.control_plane_join = Some(control_plane);
    }

    pub fn worker_join(&self, phase: Phase) -> Result<&JoinCommand, ProvisionError> {
        self.worker_join
            .as_ref()
            .ok_or_else(|| ProvisionError::Sequencing {
                phase,
                missing: "worker join command".to_string(),
            })
    }

    pub fn control_plane_join(&self, phase: Phase) -> Result<&JoinCommand, ProvisionError> {
        self.control_plane_join
            .as_ref()
            .ok_or_else(|| ProvisionError::Sequencing {
                phase,
                missing: "control-plane join command".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Registration;
    use crate::provision::roster::partition_roster;

    fn session() -> ProvisioningSession {
        let nodes = vec![Node::new("cp-1", "10.0.0.1"), Node::new("wk-1", "10.0.0.2")];
        let spec = ClusterSpec::new(
            "lab",
            1,
            Registration {
                url: "https://fleet".to_string(),
                token: "t".to_string(),
            },
        );
        let partition = partition_roster(&nodes, spec.control_plane_count).unwrap();
        ProvisioningSession::new(spec, partition)
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::MasterJoin.to_string(), "MASTER_JOIN");
        assert_eq!(
            serde_json::to_string(&Phase::AgentRegistration).unwrap(),
            "\"AGENT_REGISTRATION\""
        );
    }

    #[test]
    fn test_phase_order_is_sorted() {
        let mut sorted = Phase::ORDER;
        sorted.sort();
        assert_eq!(sorted, Phase::ORDER);
    }

    #[test]
    fn test_advance_forward_only() {
        let mut session = session();
        session.advance(Phase::Prereqs).unwrap();
        session.advance(Phase::MasterInit).unwrap();
        assert!(matches!(
            session.advance(Phase::Prereqs),
            Err(ProvisionError::Sequencing { .. })
        ));
        assert!(session.advance(Phase::MasterInit).is_err());
    }

    #[test]
    fn test_no_advance_after_terminal() {
        let mut session = session();
        session.fail();
        assert!(session.advance(Phase::Prereqs).is_err());
    }

    #[test]
    fn test_join_commands_missing_before_init() {
        let session = session();
        assert!(matches!(
            session.worker_join(Phase::WorkerJoin),
            Err(ProvisionError::Sequencing { phase: Phase::WorkerJoin, .. })
        ));
        assert!(session.control_plane_join(Phase::MasterJoin).is_err());
    }

    #[test]
    fn test_sessions_are_independent() {
        let mut a = session();
        let b = session();
        assert_ne!(a.run_id(), b.run_id());

        a.set_join_commands(
            JoinCommand::new("kubeadm join x --token y"),
            JoinCommand::new("kubeadm join x --token y --control-plane"),
        );
        assert!(a.worker_join(Phase::WorkerJoin).is_ok());
        assert!(b.worker_join(Phase::WorkerJoin).is_err());
    }
}
