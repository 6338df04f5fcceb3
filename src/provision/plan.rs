//! Dry-run provisioning plan
//!
//! Builds the same phase/step lists the sequencer would issue, without any
//! remote I/O. Join secrets do not exist yet, so placeholders stand in and
//! sensitive commands are shown redacted.

use serde::Serialize;

use super::error::ProvisionError;
use super::roster::{partition_roster, Partition};
use super::secrets::JoinCommand;
use super::session::Phase;
use super::steps::{
    cluster_init_steps, cni_steps, join_step, kubeconfig_steps, load_balancer_steps,
    prereq_steps, print_join_command_step, registration_steps, runtime_install_steps,
    upload_certs_step,
};
use super::template::{render_cni_manifest, render_haproxy_config};
use crate::manifest::{ClusterSpec, Node};
use crate::remote::Step;

const JOIN_PLACEHOLDER: &str = "kubeadm join <endpoint> --token <token> --discovery-token-ca-cert-hash <hash>";

#[derive(Debug, Clone, Serialize)]
pub struct PlannedStep {
    pub description: String,
    pub command: String,
}

impl From<&Step> for PlannedStep {
    fn from(step: &Step) -> Self {
        Self {
            description: step.description.clone(),
            command: step.display_command().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedPhase {
    pub phase: Phase,
    /// Node labels the phase targets, in roster order
    pub targets: Vec<String>,
    pub steps: Vec<PlannedStep>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvisionPlan {
    pub cluster_name: String,
    pub partition: Partition,
    pub phases: Vec<PlannedPhase>,
}

fn planned(phase: Phase, targets: &[Node], steps: &[Step]) -> PlannedPhase {
    PlannedPhase {
        phase,
        targets: targets.iter().map(Node::label).collect(),
        steps: steps.iter().map(PlannedStep::from).collect(),
    }
}

/// Build the ordered plan for provisioning `nodes` as `spec`
pub fn build_plan(nodes: &[Node], spec: &ClusterSpec) -> Result<ProvisionPlan, ProvisionError> {
    let partition = partition_roster(nodes, spec.control_plane_count)?;
    let first = std::slice::from_ref(partition.first_control_plane());
    let worker_join = JoinCommand::new(JOIN_PLACEHOLDER);
    let control_plane_join = JoinCommand::new(format!(
        "{} --control-plane --certificate-key <certificate-key>",
        JOIN_PLACEHOLDER
    ));

    let mut phases = Vec::with_capacity(Phase::ORDER.len());
    for phase in Phase::ORDER {
        let entry = match phase {
            Phase::Prereqs => planned(phase, &partition.all_nodes(), &prereq_steps()),
            Phase::MasterInit => {
                let mut steps = runtime_install_steps(spec);
                steps.extend(cluster_init_steps(spec).map_err(|e| {
                    ProvisionError::InvalidStep {
                        phase,
                        message: e.to_string(),
                    }
                })?);
                steps.extend(kubeconfig_steps());
                steps.push(print_join_command_step());
                steps.push(upload_certs_step());
                planned(phase, first, &steps)
            }
            Phase::MasterJoin => {
                let mut steps = runtime_install_steps(spec);
                steps.push(join_step("join control plane", &control_plane_join));
                steps.extend(kubeconfig_steps());
                planned(phase, partition.joining_control_plane(), &steps)
            }
            Phase::WorkerJoin => {
                let mut steps = runtime_install_steps(spec);
                steps.push(join_step("join cluster", &worker_join));
                planned(phase, partition.workers(), &steps)
            }
            Phase::HaSetup => {
                let config = render_haproxy_config(partition.control_plane());
                planned(phase, first, &load_balancer_steps(&config))
            }
            Phase::CniInstall => {
                let manifest = render_cni_manifest(spec);
                planned(phase, first, &cni_steps(&manifest))
            }
            Phase::AgentRegistration => planned(phase, first, &registration_steps(spec)),
            Phase::Pending | Phase::Provisioned | Phase::Failed => continue,
        };
        phases.push(entry);
    }

    Ok(ProvisionPlan {
        cluster_name: spec.name.clone(),
        partition,
        phases,
    })
}
