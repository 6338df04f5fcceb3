//! Phase sequencer - drives a roster through cluster bootstrap
//!
//! Phases run strictly in order (see [`Phase::ORDER`]). Phases that touch
//! several independent nodes fan out over a bounded task group and act as a
//! barrier: the next phase starts only once every node reported success. The
//! first failure cancels the rest of the phase and aborts the run. There is
//! no rollback; callers decide whether to tear down.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::{FailureCause, ProvisionError};
use super::roster::partition_roster;
use super::secrets::{extract_certificate_key, extract_join_command};
use super::session::{Phase, ProvisioningSession};
use super::steps::{
    cluster_init_steps, cni_steps, join_step, kubeconfig_steps, load_balancer_steps,
    prereq_steps, print_join_command_step, registration_steps, runtime_install_steps,
    upload_certs_step, PRINT_JOIN_COMMAND, UPLOAD_CERTS,
};
use super::template::{render_cni_manifest, render_haproxy_config};
use crate::manifest::{ClusterSpec, Node};
use crate::remote::{RemoteError, RemoteExecutor, Step};

/// Configuration for the provisioner
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    /// Upper bound on nodes worked on at once within a phase
    pub max_parallel: usize,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self { max_parallel: 4 }
    }
}

impl ProvisionerConfig {
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }
}

/// Result of one provisioning run as seen by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionOutcome {
    pub run_id: Uuid,
    pub cluster_name: String,
    pub success: bool,
    /// `PROVISIONED` or `FAILED`
    pub status: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureCause>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ProvisionOutcome {
    fn provisioned(run_id: Uuid, cluster_name: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            cluster_name: cluster_name.to_string(),
            success: true,
            status: Phase::Provisioned,
            failure: None,
            started_at,
            finished_at: Utc::now(),
        }
    }

    fn failed(
        run_id: Uuid,
        cluster_name: &str,
        err: &ProvisionError,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id,
            cluster_name: cluster_name.to_string(),
            success: false,
            status: Phase::Failed,
            failure: Some(FailureCause::from(err)),
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Outcome of one node's step list inside a fanned-out phase
#[derive(Debug, Clone)]
pub struct NodeRun {
    pub node: Node,
    pub result: Result<(), RemoteError>,
}

/// Run `steps` on every node, at most `max_parallel` at a time.
///
/// Results come back in roster order. With `fail_fast`, the first failing
/// node cancels the remaining in-flight and queued nodes.
pub async fn run_on_nodes(
    executor: &Arc<dyn RemoteExecutor>,
    nodes: &[Node],
    steps: Vec<Step>,
    max_parallel: usize,
    cancel: &CancellationToken,
    fail_fast: bool,
) -> Vec<NodeRun> {
    let group_cancel = cancel.child_token();
    let semaphore = Arc::new(Semaphore::new(max_parallel.max(1)));
    let steps = Arc::new(steps);
    let mut set = JoinSet::new();

    for (index, node) in nodes.iter().cloned().enumerate() {
        let executor = Arc::clone(executor);
        let semaphore = Arc::clone(&semaphore);
        let steps = Arc::clone(&steps);
        let token = group_cancel.clone();

        set.spawn(async move {
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => executor.run_steps(&node, &steps, &token).await,
                Err(_) => Err(RemoteError::Cancelled { node: node.label() }),
            };
            (index, NodeRun { node, result })
        });
    }

    let mut runs: Vec<Option<NodeRun>> = (0..nodes.len()).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, run)) => {
                if fail_fast && run.result.is_err() && !group_cancel.is_cancelled() {
                    debug!("{} failed, cancelling the rest of the group", run.node.label());
                    group_cancel.cancel();
                }
                runs[index] = Some(run);
            }
            Err(e) => {
                error!("Node task aborted: {}", e);
                if fail_fast {
                    group_cancel.cancel();
                }
            }
        }
    }

    runs.into_iter()
        .zip(nodes.iter())
        .map(|(run, node)| {
            run.unwrap_or_else(|| NodeRun {
                node: node.clone(),
                result: Err(RemoteError::Connection {
                    node: node.label(),
                    message: "node task aborted".to_string(),
                }),
            })
        })
        .collect()
}

/// Pick the error to report for a failed group: the first real failure in
/// roster order, ignoring cancellations it caused in sibling nodes
pub fn first_failure(runs: &[NodeRun]) -> Option<&RemoteError> {
    let mut errors = runs.iter().filter_map(|r| r.result.as_ref().err());
    let first = errors.clone().next();
    errors.find(|e| !e.is_cancelled()).or(first)
}

/// Drives provisioning phases over a [`RemoteExecutor`]
pub struct Provisioner {
    executor: Arc<dyn RemoteExecutor>,
    config: ProvisionerConfig,
}

impl Provisioner {
    pub fn new(executor: Arc<dyn RemoteExecutor>, config: ProvisionerConfig) -> Self {
        Self { executor, config }
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    pub(crate) fn executor(&self) -> &Arc<dyn RemoteExecutor> {
        &self.executor
    }

    /// Partition the roster and open a fresh session for one run
    pub fn start_session(
        &self,
        nodes: &[Node],
        spec: &ClusterSpec,
    ) -> Result<ProvisioningSession, ProvisionError> {
        let partition = partition_roster(nodes, spec.control_plane_count)?;
        Ok(ProvisioningSession::new(spec.clone(), partition))
    }

    /// Provision a cluster end to end. Never panics on remote failure; the
    /// outcome carries the cause.
    pub async fn provision(
        &self,
        nodes: &[Node],
        spec: &ClusterSpec,
        cancel: &CancellationToken,
    ) -> ProvisionOutcome {
        let started_at = Utc::now();
        info!(
            "Starting Kubernetes cluster provisioning: {} ({} nodes)",
            spec.name,
            nodes.len()
        );

        let mut session = match self.start_session(nodes, spec) {
            Ok(session) => session,
            Err(e) => {
                error!("Failed to provision cluster {}: {}", spec.name, e);
                return ProvisionOutcome::failed(Uuid::new_v4(), &spec.name, &e, started_at);
            }
        };

        match self.run(&mut session, cancel).await {
            Ok(()) => {
                info!("Kubernetes cluster {} provisioned successfully", spec.name);
                ProvisionOutcome::provisioned(session.run_id(), &spec.name, started_at)
            }
            Err(e) => {
                session.fail();
                error!("Failed to provision cluster {}: {}", spec.name, e);
                ProvisionOutcome::failed(session.run_id(), &spec.name, &e, started_at)
            }
        }
    }

    /// Run every phase in order on `session`
    pub async fn run(
        &self,
        session: &mut ProvisioningSession,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisionError> {
        for phase in Phase::ORDER {
            if cancel.is_cancelled() {
                return Err(ProvisionError::Cancelled { phase, node: None });
            }
            session.advance(phase)?;
            info!("[{}] phase {}", session.cluster().name, phase);
            self.run_phase(phase, session, cancel).await?;
        }
        session.advance(Phase::Provisioned)
    }

    /// Run a single working phase
    pub async fn run_phase(
        &self,
        phase: Phase,
        session: &mut ProvisioningSession,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisionError> {
        match phase {
            Phase::Prereqs => self.prereqs(session, cancel).await,
            Phase::MasterInit => self.master_init(session, cancel).await,
            Phase::MasterJoin => self.master_join(session, cancel).await,
            Phase::WorkerJoin => self.worker_join(session, cancel).await,
            Phase::HaSetup => self.ha_setup(session, cancel).await,
            Phase::CniInstall => self.cni_install(session, cancel).await,
            Phase::AgentRegistration => self.agent_registration(session, cancel).await,
            Phase::Pending | Phase::Provisioned | Phase::Failed => {
                Err(ProvisionError::Sequencing {
                    phase,
                    missing: "a working phase".to_string(),
                })
            }
        }
    }

    /// PREREQS: prepare every node in the roster
    pub async fn prereqs(
        &self,
        session: &ProvisioningSession,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisionError> {
        let nodes = session.partition().all_nodes();
        self.fan_out(Phase::Prereqs, &nodes, prereq_steps(), cancel)
            .await
    }

    /// MASTER_INIT: initialize the cluster on the first control-plane node and
    /// cache both join commands in the session
    pub async fn master_init(
        &self,
        session: &mut ProvisioningSession,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisionError> {
        let phase = Phase::MasterInit;
        let node = session.first_control_plane().clone();
        let spec = session.cluster();
        info!("Initializing cluster on {}", node.label());

        let mut steps = runtime_install_steps(spec);
        steps.extend(cluster_init_steps(spec).map_err(|e| ProvisionError::InvalidStep {
            phase,
            message: e.to_string(),
        })?);
        steps.extend(kubeconfig_steps());
        self.run_on_node(phase, &node, &steps, cancel).await?;

        let output = self
            .executor
            .run_step(&node, &print_join_command_step(), cancel)
            .await
            .map_err(|e| ProvisionError::from_remote(phase, e))?;
        let worker_join = extract_join_command(&output.stdout, PRINT_JOIN_COMMAND).map_err(
            |source| ProvisionError::MissingSecret {
                phase,
                node: node.label(),
                source,
            },
        )?;

        let output = self
            .executor
            .run_step(&node, &upload_certs_step(), cancel)
            .await
            .map_err(|e| ProvisionError::from_remote(phase, e))?;
        let certificate_key = extract_certificate_key(&output.stdout, UPLOAD_CERTS).map_err(
            |source| ProvisionError::MissingSecret {
                phase,
                node: node.label(),
                source,
            },
        )?;

        let control_plane_join = worker_join.for_control_plane(&certificate_key);
        session.set_join_commands(worker_join, control_plane_join);
        debug!("Cached join commands for run {}", session.run_id());
        Ok(())
    }

    /// MASTER_JOIN: join the remaining control-plane nodes
    pub async fn master_join(
        &self,
        session: &ProvisioningSession,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisionError> {
        let phase = Phase::MasterJoin;
        let join = session.control_plane_join(phase)?;
        let nodes = session.partition().joining_control_plane();
        if nodes.is_empty() {
            info!("No additional control-plane nodes to join");
            return Ok(());
        }

        let mut steps = runtime_install_steps(session.cluster());
        steps.push(join_step("join control plane", join));
        steps.extend(kubeconfig_steps());
        self.fan_out(phase, nodes, steps, cancel).await
    }

    /// WORKER_JOIN: join every worker node
    pub async fn worker_join(
        &self,
        session: &ProvisioningSession,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisionError> {
        let phase = Phase::WorkerJoin;
        let join = session.worker_join(phase)?;
        let nodes = session.partition().workers();
        if nodes.is_empty() {
            info!("No worker nodes to join");
            return Ok(());
        }

        let mut steps = runtime_install_steps(session.cluster());
        steps.push(join_step("join cluster", join));
        self.fan_out(phase, nodes, steps, cancel).await
    }

    /// HA_SETUP: load-balance the API server across the full control plane
    pub async fn ha_setup(
        &self,
        session: &ProvisioningSession,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisionError> {
        let config = render_haproxy_config(session.partition().control_plane());
        let node = session.first_control_plane();
        info!("Setting up HA load balancer on {}", node.label());
        self.run_on_node(Phase::HaSetup, node, &load_balancer_steps(&config), cancel)
            .await
    }

    /// CNI_INSTALL: give pods networking
    pub async fn cni_install(
        &self,
        session: &ProvisioningSession,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisionError> {
        let manifest = render_cni_manifest(session.cluster());
        let node = session.first_control_plane();
        info!("Installing CNI (Calico) from {}", node.label());
        self.run_on_node(Phase::CniInstall, node, &cni_steps(&manifest), cancel)
            .await
    }

    /// AGENT_REGISTRATION: register the cluster with the fleet manager
    pub async fn agent_registration(
        &self,
        session: &ProvisioningSession,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisionError> {
        let node = session.first_control_plane();
        info!(
            "Registering cluster {} with fleet manager",
            session.cluster().name
        );
        self.run_on_node(
            Phase::AgentRegistration,
            node,
            &registration_steps(session.cluster()),
            cancel,
        )
        .await
    }

    async fn run_on_node(
        &self,
        phase: Phase,
        node: &Node,
        steps: &[Step],
        cancel: &CancellationToken,
    ) -> Result<(), ProvisionError> {
        self.executor
            .run_steps(node, steps, cancel)
            .await
            .map_err(|e| ProvisionError::from_remote(phase, e))
    }

    async fn fan_out(
        &self,
        phase: Phase,
        nodes: &[Node],
        steps: Vec<Step>,
        cancel: &CancellationToken,
    ) -> Result<(), ProvisionError> {
        info!("{}: {} node(s)", phase, nodes.len());
        let runs = run_on_nodes(
            &self.executor,
            nodes,
            steps,
            self.config.max_parallel,
            cancel,
            true,
        )
        .await;

        match first_failure(&runs) {
            None => Ok(()),
            Some(err) => {
                warn!("{} failed: {}", phase, err);
                Err(ProvisionError::from_remote(phase, err.clone()))
            }
        }
    }
}
