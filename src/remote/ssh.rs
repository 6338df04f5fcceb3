//! SSH-backed remote executor
//!
//! Drives the system `ssh` client. Each call spawns its own `ssh` process,
//! wrapped in an [`SshSession`]; dropping the session kills the process, so
//! deadlines and cancellation tear the connection down on every exit path.
//!
//! Only the local client is killed. No pty is requested, so sshd does not
//! hang up the remote command when the connection drops: a timed-out or
//! cancelled `kubeadm` or package install may keep running on the node until
//! it finishes on its own. Teardown (`kubeadm reset -f`) is the way to clean
//! up after an aborted run.

use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{RemoteCommandResult, RemoteError, RemoteExecutor};
use crate::manifest::Node;

/// Exit status `ssh` reserves for its own connection and auth failures
pub const SSH_TRANSPORT_FAILURE: i32 = 255;

/// Default per-call deadline (kubeadm init and package installs are slow)
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30 * 60;

/// Default ssh ConnectTimeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default private key location: ~/.ssh/id_rsa
pub fn default_key_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ssh")
        .join("id_rsa")
}

/// Expand `~` and `$VAR` in a key path supplied by the environment or CLI
pub fn expand_key_path(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(raw).as_ref()),
    }
}

// ============================================================================
// SBIO: Pure argument building (no I/O)
// ============================================================================

/// Build the ssh argument vector for running `command` on `node`
pub fn build_ssh_args(
    node: &Node,
    key_path: Option<&PathBuf>,
    connect_timeout_secs: u64,
    command: &str,
) -> Vec<String> {
    let mut args = vec![
        "-p".to_string(),
        node.ssh_port.to_string(),
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=accept-new".to_string(),
        "-o".to_string(),
        format!("ConnectTimeout={}", connect_timeout_secs),
    ];
    if let Some(key) = key_path {
        args.push("-i".to_string());
        args.push(key.display().to_string());
    }
    args.push(format!("{}@{}", node.ssh_user, node.address));
    args.push(command.to_string());
    args
}

/// Map a finished ssh process to a command result.
/// Pure function - no I/O.
pub fn interpret_output(node: &Node, output: Output) -> Result<RemoteCommandResult, RemoteError> {
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    // A missing code means the process died from a signal
    let exit_status = output.status.code().unwrap_or(-1);

    if exit_status == SSH_TRANSPORT_FAILURE {
        return Err(RemoteError::Connection {
            node: node.label(),
            message: stderr.trim().to_string(),
        });
    }

    Ok(RemoteCommandResult {
        stdout,
        stderr,
        exit_status,
    })
}

// ============================================================================
// SBIO: I/O - session and executor
// ============================================================================

/// One live ssh connection running one command.
///
/// The child is spawned with `kill_on_drop`, so letting the session go out of
/// scope without calling [`SshSession::finish`] terminates the remote command.
pub struct SshSession {
    node: String,
    child: Child,
}

impl SshSession {
    /// Spawn `program` with `args`, capturing stdout and stderr
    pub fn open(program: &str, node: &Node, args: &[String]) -> Result<Self, RemoteError> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RemoteError::Connection {
                node: node.label(),
                message: format!("failed to start {}: {}", program, e),
            })?;

        Ok(Self {
            node: node.label(),
            child,
        })
    }

    /// Wait for the remote command to exit and collect its output
    pub async fn finish(self) -> std::io::Result<Output> {
        let output = self.child.wait_with_output().await;
        debug!("Closed ssh session to {}", self.node);
        output
    }
}

/// Executor that runs each command through a fresh `ssh` process
#[derive(Debug, Clone)]
pub struct SshExecutor {
    program: String,
    key_path: Option<PathBuf>,
    connect_timeout_secs: u64,
    command_timeout: Duration,
}

impl Default for SshExecutor {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            key_path: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
        }
    }
}

impl SshExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Authenticate with the private key at `path`
    pub fn with_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    /// Per-call deadline
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    /// Use a different ssh binary (e.g. a wrapper script)
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn key_path(&self) -> Option<&PathBuf> {
        self.key_path.as_ref()
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(
        &self,
        node: &Node,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<RemoteCommandResult, RemoteError> {
        let args = build_ssh_args(
            node,
            self.key_path.as_ref(),
            self.connect_timeout_secs,
            command,
        );
        let session = SshSession::open(&self.program, node, &args)?;

        // Whichever branch loses drops the session future, killing ssh
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Cancelling remote command on {}", node.label());
                return Err(RemoteError::Cancelled { node: node.label() });
            }
            waited = tokio::time::timeout(self.command_timeout, session.finish()) => waited,
        };

        let output = output
            .map_err(|_| RemoteError::Timeout {
                node: node.label(),
                command: command.lines().next().unwrap_or_default().to_string(),
                timeout: self.command_timeout,
            })?
            .map_err(|e| RemoteError::Connection {
                node: node.label(),
                message: e.to_string(),
            })?;

        interpret_output(node, output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;
    use std::time::Instant;
    use tempfile::TempDir;

    fn node() -> Node {
        Node::new("cp-1", "10.0.0.1")
            .with_ssh_port(2222)
            .with_ssh_user("ops")
    }

    /// Stand-in ssh binary that ignores its arguments and hangs for 5s
    fn hanging_ssh(dir: &TempDir) -> String {
        let path = dir.path().join("ssh");
        std::fs::write(&path, "#!/bin/sh\nexec sleep 5\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    fn output(code: i32, stdout: &str, stderr: &str) -> Output {
        Output {
            status: ExitStatus::from_raw(code << 8),
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_build_ssh_args() {
        let key = PathBuf::from("/keys/cluster");
        let args = build_ssh_args(&node(), Some(&key), 10, "uname -a");

        assert_eq!(&args[0..2], &["-p", "2222"]);
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"ConnectTimeout=10".to_string()));
        assert!(args.contains(&"/keys/cluster".to_string()));
        assert_eq!(args[args.len() - 2], "ops@10.0.0.1");
        assert_eq!(args[args.len() - 1], "uname -a");
    }

    #[test]
    fn test_build_ssh_args_without_key() {
        let args = build_ssh_args(&node(), None, 5, "true");
        assert!(!args.contains(&"-i".to_string()));
    }

    #[test]
    fn test_interpret_output_success() {
        let result = interpret_output(&node(), output(0, "ok\n", "")).unwrap();
        assert_eq!(result.stdout, "ok\n");
        assert!(result.is_success());
    }

    #[test]
    fn test_interpret_output_remote_failure() {
        let result = interpret_output(&node(), output(1, "", "no such file\n")).unwrap();
        assert_eq!(result.exit_status, 1);
        assert_eq!(result.stderr, "no such file\n");
    }

    #[test]
    fn test_interpret_output_transport_failure() {
        let err = interpret_output(&node(), output(255, "", "Permission denied (publickey).\n"))
            .unwrap_err();
        assert_eq!(
            err,
            RemoteError::Connection {
                node: "cp-1 (10.0.0.1)".to_string(),
                message: "Permission denied (publickey).".to_string(),
            }
        );
    }

    #[test]
    fn test_expand_key_path() {
        std::env::set_var("KUBESTRAP_TEST_KEY_DIR", "/opt/keys");
        assert_eq!(
            expand_key_path("$KUBESTRAP_TEST_KEY_DIR/id_ed25519"),
            PathBuf::from("/opt/keys/id_ed25519")
        );
        std::env::remove_var("KUBESTRAP_TEST_KEY_DIR");
    }

    #[tokio::test]
    async fn test_execute_runs_program() {
        // `echo` stands in for ssh: it prints its arguments and exits 0
        let executor = SshExecutor::new().with_program("echo");
        let result = executor
            .execute(&node(), "hostname", &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.stdout.contains("ops@10.0.0.1 hostname"));
    }

    #[tokio::test]
    async fn test_execute_missing_program() {
        let executor = SshExecutor::new().with_program("/nonexistent/ssh");
        let err = executor
            .execute(&node(), "hostname", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Connection { .. }));
    }

    #[tokio::test]
    async fn test_execute_cancelled() {
        let executor = SshExecutor::new().with_program("sleep");
        let cancel = CancellationToken::new();
        cancel.cancel();
        // `sleep -p 2222 ...` would fail anyway; cancellation wins first
        let err = executor.execute(&node(), "30", &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_execute_hits_command_deadline() {
        let dir = TempDir::new().unwrap();
        let executor = SshExecutor::new()
            .with_program(hanging_ssh(&dir))
            .with_command_timeout(Duration::from_millis(200));

        let started = Instant::now();
        let err = executor
            .execute(&node(), "kubeadm init", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(
            err,
            RemoteError::Timeout {
                node: "cp-1 (10.0.0.1)".to_string(),
                command: "kubeadm init".to_string(),
                timeout: Duration::from_millis(200),
            }
        );
        assert!(err.to_string().ends_with("timed out after 200ms"));
    }

    #[tokio::test]
    async fn test_execute_cancelled_mid_flight() {
        let dir = TempDir::new().unwrap();
        let executor = SshExecutor::new().with_program(hanging_ssh(&dir));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = executor
            .execute(&node(), "kubeadm init", &cancel)
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(
            err,
            RemoteError::Cancelled {
                node: "cp-1 (10.0.0.1)".to_string()
            }
        );
    }
}
