//! Remote command execution
//!
//! Every remote action is a [`Step`]: a described shell command, optionally
//! paired with a pattern its stdout must match. A [`RemoteExecutor`] opens one
//! session per call, runs the command, and hands back the captured output.
//! Non-zero exits are surfaced as [`RemoteError::CommandFailed`], never
//! swallowed.

pub mod ssh;

pub use ssh::{SshExecutor, SshSession};

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::manifest::Node;

/// Placeholder printed instead of secret-bearing command text
pub const REDACTED: &str = "<redacted>";

// ============================================================================
// SBIO: Pure data structures
// ============================================================================

/// A single remote step
#[derive(Debug, Clone)]
pub struct Step {
    /// Human-readable description used in logs and errors
    pub description: String,
    /// Shell command executed on the node
    pub command: String,
    /// Pattern stdout must match for the step to count as successful
    pub expected_output: Option<Regex>,
    /// Command carries credentials and must not be logged
    pub sensitive: bool,
}

impl Step {
    pub fn new(description: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            command: command.into(),
            expected_output: None,
            sensitive: false,
        }
    }

    /// Require stdout to match `pattern`
    pub fn expecting(mut self, pattern: Regex) -> Self {
        self.expected_output = Some(pattern);
        self
    }

    /// Like [`Step::expecting`], from pattern text
    pub fn expecting_pattern(self, pattern: &str) -> Result<Self, regex::Error> {
        Ok(self.expecting(Regex::new(pattern)?))
    }

    /// Mark the command as credential-bearing
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Command text safe to put in logs and errors
    pub fn display_command(&self) -> &str {
        if self.sensitive {
            REDACTED
        } else {
            &self.command
        }
    }
}

/// Captured output of one remote command
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteCommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
}

impl RemoteCommandResult {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_status: 0,
        }
    }

    pub fn failure(exit_status: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_status,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Errors raised while running a remote step
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    #[error("Connection to {node} failed: {message}")]
    Connection { node: String, message: String },

    #[error("Command `{command}` on {node} exited with status {exit_status}: {stderr}")]
    CommandFailed {
        node: String,
        command: String,
        exit_status: i32,
        stderr: String,
    },

    #[error("Command `{command}` on {node} timed out after {timeout:?}")]
    Timeout {
        node: String,
        command: String,
        timeout: Duration,
    },

    #[error("Command on {node} cancelled")]
    Cancelled { node: String },
}

impl RemoteError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RemoteError::Cancelled { .. })
    }

    /// Replace command text with the step's display form
    pub fn redacted_for(self, step: &Step) -> Self {
        match self {
            RemoteError::Timeout { node, timeout, .. } => RemoteError::Timeout {
                node,
                command: step.display_command().to_string(),
                timeout,
            },
            RemoteError::CommandFailed {
                node,
                exit_status,
                stderr,
                ..
            } => RemoteError::CommandFailed {
                node,
                command: step.display_command().to_string(),
                exit_status,
                stderr,
            },
            other => other,
        }
    }
}

/// Turn a raw result into a step outcome: non-zero exit and a missing
/// expected pattern both fail. Pure function - no I/O.
pub fn check_step_result(
    node: &Node,
    step: &Step,
    result: RemoteCommandResult,
) -> Result<RemoteCommandResult, RemoteError> {
    if !result.is_success() {
        return Err(RemoteError::CommandFailed {
            node: node.label(),
            command: step.display_command().to_string(),
            exit_status: result.exit_status,
            stderr: result.stderr.trim().to_string(),
        });
    }

    if let Some(pattern) = &step.expected_output {
        if !pattern.is_match(&result.stdout) {
            return Err(RemoteError::CommandFailed {
                node: node.label(),
                command: step.display_command().to_string(),
                exit_status: result.exit_status,
                stderr: format!("output did not match /{}/", pattern.as_str()),
            });
        }
    }

    Ok(result)
}

// ============================================================================
// SBIO: Trait for abstraction (allows mocking in tests)
// ============================================================================

#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Open a session to `node`, run `command`, and return its output once
    /// the remote process exits. The session is closed before returning.
    async fn execute(
        &self,
        node: &Node,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<RemoteCommandResult, RemoteError>;

    /// Run one step and check its exit status and expected output
    async fn run_step(
        &self,
        node: &Node,
        step: &Step,
        cancel: &CancellationToken,
    ) -> Result<RemoteCommandResult, RemoteError> {
        if cancel.is_cancelled() {
            return Err(RemoteError::Cancelled { node: node.label() });
        }
        debug!("[{}] {}: {}", node.address, step.description, step.display_command());
        let result = self
            .execute(node, &step.command, cancel)
            .await
            .map_err(|e| e.redacted_for(step))?;
        check_step_result(node, step, result)
    }

    /// Run steps one at a time, stopping at the first failure
    async fn run_steps(
        &self,
        node: &Node,
        steps: &[Step],
        cancel: &CancellationToken,
    ) -> Result<(), RemoteError> {
        for step in steps {
            self.run_step(node, step, cancel).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> Node {
        Node::new("cp-1", "10.0.0.1")
    }

    #[test]
    fn test_check_step_result_success() {
        let step = Step::new("echo", "echo ok");
        let result = check_step_result(&node(), &step, RemoteCommandResult::success("ok\n"));
        assert_eq!(result.unwrap().stdout, "ok\n");
    }

    #[test]
    fn test_check_step_result_nonzero_exit() {
        let step = Step::new("swap off", "swapoff -a");
        let err = check_step_result(
            &node(),
            &step,
            RemoteCommandResult::failure(1, "swapoff: permission denied\n"),
        )
        .unwrap_err();

        match err {
            RemoteError::CommandFailed {
                command,
                exit_status,
                stderr,
                ..
            } => {
                assert_eq!(command, "swapoff -a");
                assert_eq!(exit_status, 1);
                assert_eq!(stderr, "swapoff: permission denied");
            }
            other => panic!("Expected CommandFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_check_step_result_expected_output() {
        let step = Step::new("runtime", "systemctl is-active containerd")
            .expecting(Regex::new(r"^active").unwrap());
        assert!(check_step_result(&node(), &step, RemoteCommandResult::success("active\n")).is_ok());
        assert!(check_step_result(&node(), &step, RemoteCommandResult::success("failed\n")).is_err());
    }

    #[test]
    fn test_expecting_pattern_rejects_invalid_regex() {
        assert!(Step::new("init", "kubeadm init")
            .expecting_pattern(r"initialized (successfully")
            .is_err());

        let step = Step::new("init", "kubeadm init")
            .expecting_pattern(r"initialized successfully")
            .unwrap();
        assert!(step.expected_output.is_some());
    }

    #[test]
    fn test_sensitive_step_is_redacted() {
        let step = Step::new("join", "kubeadm join --token secret").sensitive();
        assert_eq!(step.display_command(), REDACTED);

        let err = check_step_result(&node(), &step, RemoteCommandResult::failure(1, "boom"))
            .unwrap_err();
        assert!(!err.to_string().contains("secret"));
    }

    #[test]
    fn test_error_display() {
        let err = RemoteError::Timeout {
            node: "cp-1 (10.0.0.1)".to_string(),
            command: "kubeadm init".to_string(),
            timeout: Duration::from_secs(30),
        };
        assert_eq!(
            err.to_string(),
            "Command `kubeadm init` on cp-1 (10.0.0.1) timed out after 30s"
        );

        let err = RemoteError::Timeout {
            node: "cp-1 (10.0.0.1)".to_string(),
            command: "kubeadm init".to_string(),
            timeout: Duration::from_millis(250),
        };
        assert!(err.to_string().ends_with("timed out after 250ms"));
        assert!(RemoteError::Cancelled { node: "x".to_string() }.is_cancelled());
    }

    #[test]
    fn test_timeout_redacted_for_sensitive_step() {
        let step = Step::new("join", "kubeadm join --token secret").sensitive();
        let err = RemoteError::Timeout {
            node: "wk-1".to_string(),
            command: step.command.clone(),
            timeout: Duration::from_secs(5),
        }
        .redacted_for(&step);
        assert!(!err.to_string().contains("secret"));
    }
}
