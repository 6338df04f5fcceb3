//! Cluster bootstrap: roster partitioning, secret extraction, config
//! generation, phase sequencing and teardown

pub mod error;
pub mod plan;
pub mod roster;
pub mod secrets;
pub mod sequencer;
pub mod session;
pub mod steps;
pub mod teardown;
pub mod template;

pub use error::{FailureCause, ProvisionError};
pub use plan::{build_plan, PlannedPhase, PlannedStep, ProvisionPlan};
pub use roster::{partition_roster, Partition};
pub use secrets::{
    extract_certificate_key, extract_join_command, CertificateKey, JoinCommand,
    MissingSecretError, SecretKind,
};
pub use sequencer::{ProvisionOutcome, Provisioner, ProvisionerConfig};
pub use session::{Phase, ProvisioningSession};
pub use teardown::{NodeResetResult, TeardownReport};
pub use template::{render_cni_manifest, render_haproxy_config, LOAD_BALANCER_PORT};
