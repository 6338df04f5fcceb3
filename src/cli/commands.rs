//! Command implementations for the CLI
//!
//! SBIO pattern: Commands return Results, I/O is handled by caller

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{ConnectionArgs, RenderTarget};
use crate::manifest::{load_manifest_file, LoadError, Manifest};
use crate::provision::{
    build_plan, partition_roster, render_cni_manifest, render_haproxy_config, ProvisionError,
    ProvisionOutcome, ProvisionPlan, Provisioner, ProvisionerConfig, TeardownReport,
};
use crate::remote::ssh::{default_key_path, expand_key_path};
use crate::remote::{RemoteExecutor, SshExecutor};
use crate::report::{OutcomeReporter, ReportEvent, WebhookReporter};

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Manifest error: {0}")]
    Manifest(#[from] LoadError),

    #[error("Provision error: {0}")]
    Provision(#[from] ProvisionError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for commands
pub type CommandResult<T> = Result<T, CommandError>;

// ============================================================================
// Manifest commands (pure business logic)
// ============================================================================

/// Load and validate a manifest
pub fn load_manifest(path: &Path) -> CommandResult<Manifest> {
    Ok(load_manifest_file(path)?)
}

/// Result of validating a manifest
#[derive(Debug)]
pub struct ValidationResult {
    pub valid: bool,
    pub cluster_name: Option<String>,
    pub control_plane: usize,
    pub workers: usize,
    pub error: Option<String>,
}

/// Validate a manifest file and summarize its roster
pub fn validate_manifest_file(path: &Path) -> ValidationResult {
    let checked = load_manifest_file(path)
        .map_err(|e| e.to_string())
        .and_then(|manifest| {
            partition_roster(&manifest.nodes, manifest.cluster.control_plane_count)
                .map(|partition| (manifest.cluster.name, partition))
                .map_err(|e| e.to_string())
        });

    match checked {
        Ok((name, partition)) => ValidationResult {
            valid: true,
            cluster_name: Some(name),
            control_plane: partition.control_plane().len(),
            workers: partition.workers().len(),
            error: None,
        },
        Err(error) => ValidationResult {
            valid: false,
            cluster_name: None,
            control_plane: 0,
            workers: 0,
            error: Some(error),
        },
    }
}

/// Render generated configuration for a manifest
pub fn render_config(manifest: &Manifest, target: RenderTarget) -> CommandResult<String> {
    match target {
        RenderTarget::Haproxy => {
            let partition =
                partition_roster(&manifest.nodes, manifest.cluster.control_plane_count)?;
            Ok(render_haproxy_config(partition.control_plane()))
        }
        RenderTarget::Cni => Ok(render_cni_manifest(&manifest.cluster)),
    }
}

/// Build the dry-run plan for a manifest
pub fn plan_manifest(manifest: &Manifest) -> CommandResult<ProvisionPlan> {
    Ok(build_plan(&manifest.nodes, &manifest.cluster)?)
}

/// Pretty JSON for `--json` output
pub fn to_json<T: Serialize>(value: &T) -> CommandResult<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

// ============================================================================
// Wiring
// ============================================================================

/// SSH executor configured from command-line options
pub fn build_executor(args: &ConnectionArgs) -> SshExecutor {
    let key_path = args
        .ssh_key
        .as_deref()
        .map(expand_key_path)
        .unwrap_or_else(default_key_path);

    SshExecutor::new()
        .with_key_path(key_path)
        .with_command_timeout(Duration::from_secs(args.command_timeout))
        .with_connect_timeout(args.connect_timeout)
}

/// Provisioner over `executor` configured from command-line options
pub fn build_provisioner(args: &ConnectionArgs, executor: Arc<dyn RemoteExecutor>) -> Provisioner {
    let config = ProvisionerConfig::default().with_max_parallel(args.max_parallel);
    Provisioner::new(executor, config)
}

/// Webhook reporter, when a notification URL was given
pub fn build_reporter(args: &ConnectionArgs) -> Option<WebhookReporter> {
    args.notify_url.as_ref().map(|url| {
        let reporter = WebhookReporter::new(url.clone());
        match args.notify_token {
            Some(ref token) => reporter.with_bearer_token(token.clone()),
            None => reporter,
        }
    })
}

// ============================================================================
// Remote commands
// ============================================================================

async fn notify(reporter: Option<&dyn OutcomeReporter>, event: &ReportEvent) {
    if let Some(reporter) = reporter {
        match reporter.report(event).await {
            Ok(()) => info!("Reported result for {}", event.cluster_name()),
            Err(e) => warn!("Failed to report result for {}: {}", event.cluster_name(), e),
        }
    }
}

/// Provision the manifest's cluster and report the outcome
pub async fn run_provision(
    provisioner: &Provisioner,
    manifest: &Manifest,
    reporter: Option<&dyn OutcomeReporter>,
    cancel: &CancellationToken,
) -> ProvisionOutcome {
    let outcome = provisioner
        .provision(&manifest.nodes, &manifest.cluster, cancel)
        .await;

    notify(reporter, &ReportEvent::Provision(outcome.clone())).await;
    outcome
}

/// Tear down every node in the manifest and report the result
pub async fn run_teardown(
    provisioner: &Provisioner,
    manifest: &Manifest,
    reporter: Option<&dyn OutcomeReporter>,
    cancel: &CancellationToken,
) -> TeardownReport {
    let report = provisioner
        .teardown(&manifest.cluster.name, &manifest.nodes, cancel)
        .await;

    notify(reporter, &ReportEvent::Teardown(report.clone())).await;
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MANIFEST: &str = r#"
cluster:
  name: lab
  control-plane-count: 1
  registration:
    url: https://fleet.example.com
    token: abc
nodes:
  - hostname: cp-1
    address: 10.0.0.1
  - hostname: wk-1
    address: 10.0.0.2
  - hostname: wk-2
    address: 10.0.0.3
"#;

    fn manifest_file(content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn connection() -> ConnectionArgs {
        ConnectionArgs {
            ssh_key: Some("/keys/lab".to_string()),
            max_parallel: 2,
            command_timeout: 60,
            connect_timeout: 5,
            notify_url: None,
            notify_token: None,
        }
    }

    #[test]
    fn test_validate_manifest_file() {
        let file = manifest_file(MANIFEST);
        let result = validate_manifest_file(file.path());
        assert!(result.valid);
        assert_eq!(result.cluster_name.as_deref(), Some("lab"));
        assert_eq!(result.control_plane, 1);
        assert_eq!(result.workers, 2);
    }

    #[test]
    fn test_validate_manifest_file_invalid() {
        let file = manifest_file("cluster: [");
        let result = validate_manifest_file(file.path());
        assert!(!result.valid);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_render_config() {
        let file = manifest_file(MANIFEST);
        let manifest = load_manifest(file.path()).unwrap();
        let haproxy = render_config(&manifest, RenderTarget::Haproxy).unwrap();
        assert!(haproxy.contains("server master1 10.0.0.1:6443 check"));
        let cni = render_config(&manifest, RenderTarget::Cni).unwrap();
        assert!(cni.contains("cidr: 10.244.0.0/16"));
    }

    #[test]
    fn test_plan_manifest() {
        let file = manifest_file(MANIFEST);
        let manifest = load_manifest(file.path()).unwrap();
        let plan = plan_manifest(&manifest).unwrap();
        assert_eq!(plan.cluster_name, "lab");
        assert_eq!(plan.phases.len(), 7);
    }

    #[test]
    fn test_build_executor() {
        let executor = build_executor(&connection());
        assert_eq!(
            executor.key_path().map(|p| p.to_string_lossy().to_string()),
            Some("/keys/lab".to_string())
        );
        assert_eq!(executor.command_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_build_reporter() {
        assert!(build_reporter(&connection()).is_none());
        let mut args = connection();
        args.notify_url = Some("https://hooks.example.com".to_string());
        let reporter = build_reporter(&args).unwrap();
        assert_eq!(reporter.url(), "https://hooks.example.com");
    }
}
