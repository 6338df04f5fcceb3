use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::secrets::MissingSecretError;
use super::session::Phase;
use crate::remote::RemoteError;

/// Errors that abort a provisioning run.
///
/// Every variant names the phase it happened in; node-level failures also
/// name the node, so callers can report "failed at <node> during <phase>".
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProvisionError {
    #[error("{phase}: command `{command}` failed on {node} (exit {exit_status}): {stderr}")]
    RemoteCommandFailure {
        phase: Phase,
        node: String,
        command: String,
        exit_status: i32,
        stderr: String,
    },

    #[error("{phase}: cannot connect to {node}: {message}")]
    Connection {
        phase: Phase,
        node: String,
        message: String,
    },

    #[error("{phase}: {source} on {node}")]
    MissingSecret {
        phase: Phase,
        node: String,
        source: MissingSecretError,
    },

    #[error("{phase}: {missing} has not been produced yet (phase run out of order)")]
    Sequencing { phase: Phase, missing: String },

    #[error("{phase}: command `{command}` timed out on {node} after {timeout:?}")]
    Timeout {
        phase: Phase,
        node: String,
        command: String,
        timeout: Duration,
    },

    #[error("{phase}: cancelled")]
    Cancelled { phase: Phase, node: Option<String> },

    #[error("{phase}: invalid step definition: {message}")]
    InvalidStep { phase: Phase, message: String },

    #[error("Invalid roster: {0}")]
    InvalidRoster(String),
}

impl ProvisionError {
    /// Attribute a remote failure to a phase
    pub fn from_remote(phase: Phase, err: RemoteError) -> Self {
        match err {
            RemoteError::Connection { node, message } => ProvisionError::Connection {
                phase,
                node,
                message,
            },
            RemoteError::CommandFailed {
                node,
                command,
                exit_status,
                stderr,
            } => ProvisionError::RemoteCommandFailure {
                phase,
                node,
                command,
                exit_status,
                stderr,
            },
            RemoteError::Timeout {
                node,
                command,
                timeout,
            } => ProvisionError::Timeout {
                phase,
                node,
                command,
                timeout,
            },
            RemoteError::Cancelled { node } => ProvisionError::Cancelled {
                phase,
                node: Some(node),
            },
        }
    }

    /// Phase the error was raised in. Roster problems happen before any phase.
    pub fn phase(&self) -> Phase {
        match self {
            ProvisionError::RemoteCommandFailure { phase, .. }
            | ProvisionError::Connection { phase, .. }
            | ProvisionError::MissingSecret { phase, .. }
            | ProvisionError::Sequencing { phase, .. }
            | ProvisionError::Timeout { phase, .. }
            | ProvisionError::Cancelled { phase, .. }
            | ProvisionError::InvalidStep { phase, .. } => *phase,
            ProvisionError::InvalidRoster(_) => Phase::Pending,
        }
    }

    /// Node the error was raised on, if it is node-specific
    pub fn node(&self) -> Option<&str> {
        match self {
            ProvisionError::RemoteCommandFailure { node, .. }
            | ProvisionError::Connection { node, .. }
            | ProvisionError::MissingSecret { node, .. }
            | ProvisionError::Timeout { node, .. } => Some(node),
            ProvisionError::Cancelled { node, .. } => node.as_deref(),
            ProvisionError::Sequencing { .. }
            | ProvisionError::InvalidStep { .. }
            | ProvisionError::InvalidRoster(_) => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProvisionError::Cancelled { .. })
    }
}

/// Serializable summary of why a run failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureCause {
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    pub message: String,
}

impl From<&ProvisionError> for FailureCause {
    fn from(err: &ProvisionError) -> Self {
        Self {
            phase: err.phase(),
            node: err.node().map(str::to_string),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_remote_command_failure() {
        let err = ProvisionError::from_remote(
            Phase::MasterJoin,
            RemoteError::CommandFailed {
                node: "cp-3 (10.0.0.3)".to_string(),
                command: "<redacted>".to_string(),
                exit_status: 1,
                stderr: "etcd member add failed".to_string(),
            },
        );
        assert_eq!(err.phase(), Phase::MasterJoin);
        assert_eq!(err.node(), Some("cp-3 (10.0.0.3)"));
        assert!(err.to_string().starts_with("MASTER_JOIN:"));
    }

    #[test]
    fn test_from_remote_connection() {
        let err = ProvisionError::from_remote(
            Phase::Prereqs,
            RemoteError::Connection {
                node: "wk-1".to_string(),
                message: "Connection refused".to_string(),
            },
        );
        assert!(matches!(err, ProvisionError::Connection { .. }));
    }

    #[test]
    fn test_from_remote_timeout_keeps_subsecond_deadline() {
        let err = ProvisionError::from_remote(
            Phase::Prereqs,
            RemoteError::Timeout {
                node: "wk-1".to_string(),
                command: "apt-get update".to_string(),
                timeout: Duration::from_millis(200),
            },
        );
        assert_eq!(
            err.to_string(),
            "PREREQS: command `apt-get update` timed out on wk-1 after 200ms"
        );
    }

    #[test]
    fn test_failure_cause_from_sequencing() {
        let err = ProvisionError::Sequencing {
            phase: Phase::WorkerJoin,
            missing: "worker join command".to_string(),
        };
        let cause = FailureCause::from(&err);
        assert_eq!(cause.phase, Phase::WorkerJoin);
        assert!(cause.node.is_none());
        assert!(cause.message.contains("worker join command"));
    }

    #[test]
    fn test_invalid_roster_phase() {
        let err = ProvisionError::InvalidRoster("empty".to_string());
        assert_eq!(err.phase(), Phase::Pending);
    }
}
