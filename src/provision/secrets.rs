//! Extraction of ephemeral join secrets from kubeadm output
//!
//! A missing pattern is always an error: an empty or partial join command
//! would be executed on the joining node with broken credentials.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::remote::REDACTED;

/// Kind of secret expected in a command's output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecretKind {
    JoinCommand,
    CertificateKey,
}

impl fmt::Display for SecretKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretKind::JoinCommand => write!(f, "join command"),
            SecretKind::CertificateKey => write!(f, "certificate key"),
        }
    }
}

/// An expected secret was absent from command output
#[derive(Error, Debug, Clone, PartialEq)]
#[error("no {secret} found in output of `{command}`")]
pub struct MissingSecretError {
    pub secret: SecretKind,
    pub command: String,
}

/// A join command carrying a bootstrap token.
///
/// `Debug` and `Display` never print the command itself.
#[derive(Clone, PartialEq, Eq)]
pub struct JoinCommand(String);

impl JoinCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self(command.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build the control-plane variant of a worker join command
    pub fn for_control_plane(&self, certificate_key: &CertificateKey) -> JoinCommand {
        JoinCommand(format!(
            "{} --control-plane --certificate-key {}",
            self.0, certificate_key.0
        ))
    }
}

impl fmt::Debug for JoinCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JoinCommand({})", REDACTED)
    }
}

impl fmt::Display for JoinCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

/// Key that lets a joining control-plane node fetch the shared certificates
#[derive(Clone, PartialEq, Eq)]
pub struct CertificateKey(String);

impl CertificateKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CertificateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CertificateKey({})", REDACTED)
    }
}

// ============================================================================
// SBIO: Pure functions (no I/O)
// ============================================================================

/// Extract the `kubeadm join ... --token ...` line printed by
/// `kubeadm token create --print-join-command`
pub fn extract_join_command(stdout: &str, command: &str) -> Result<JoinCommand, MissingSecretError> {
    let pattern = Regex::new(r"(?m)^\s*(kubeadm join\s+\S+.*\s--token\s+\S+.*?)\s*$").map_err(
        |_| MissingSecretError {
            secret: SecretKind::JoinCommand,
            command: command.to_string(),
        },
    )?;

    pattern
        .captures(stdout)
        .and_then(|caps| caps.get(1))
        .map(|m| JoinCommand::new(m.as_str()))
        .ok_or_else(|| MissingSecretError {
            secret: SecretKind::JoinCommand,
            command: command.to_string(),
        })
}

/// Extract the certificate key from `kubeadm init phase upload-certs` output.
///
/// Accepts both the `--certificate-key <key>` flag form and the
/// `Using certificate key:` banner followed by the key on the next line.
pub fn extract_certificate_key(
    stdout: &str,
    command: &str,
) -> Result<CertificateKey, MissingSecretError> {
    let missing = || MissingSecretError {
        secret: SecretKind::CertificateKey,
        command: command.to_string(),
    };

    let flag = Regex::new(r"--certificate-key\s+([0-9a-fA-F]+)").map_err(|_| missing())?;
    let banner =
        Regex::new(r"(?i)using certificate key:\s*\n\s*([0-9a-fA-F]+)").map_err(|_| missing())?;

    flag.captures(stdout)
        .or_else(|| banner.captures(stdout))
        .and_then(|caps| caps.get(1))
        .map(|m| CertificateKey(m.as_str().to_string()))
        .ok_or_else(missing)
}
