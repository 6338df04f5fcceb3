use std::collections::HashSet;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Port the Kubernetes API server listens on
pub const API_SERVER_PORT: u16 = 6443;

/// Errors that can occur during manifest parsing and validation
#[derive(Error, Debug, PartialEq)]
pub enum ManifestError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid manifest: {0}")]
    Invalid(String),

    #[error("Duplicate node address: '{0}'")]
    DuplicateAddress(String),
}

/// A physical machine in the roster.
///
/// Identity is the network address. Whether the node ends up in the control
/// plane or as a worker is decided by its position in the roster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Node {
    pub hostname: String,
    /// Address the node is reached on (IP or DNS name)
    pub address: String,
    #[serde(default = "default_ssh_port", rename = "ssh-port", alias = "ssh_port")]
    pub ssh_port: u16,
    #[serde(default = "default_ssh_user", rename = "ssh-user", alias = "ssh_user")]
    pub ssh_user: String,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_ssh_user() -> String {
    "root".to_string()
}

impl Node {
    pub fn new(hostname: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            address: address.into(),
            ssh_port: default_ssh_port(),
            ssh_user: default_ssh_user(),
        }
    }

    pub fn with_ssh_port(mut self, port: u16) -> Self {
        self.ssh_port = port;
        self
    }

    pub fn with_ssh_user(mut self, user: impl Into<String>) -> Self {
        self.ssh_user = user.into();
        self
    }

    /// Short label used in logs and error messages
    pub fn label(&self) -> String {
        format!("{} ({})", self.hostname, self.address)
    }
}

/// External fleet-management endpoint the cluster registers with
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Registration {
    pub url: String,
    pub token: String,
}

/// Desired shape of the cluster. Immutable for one provisioning run.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterSpec {
    pub name: String,
    #[serde(alias = "control_plane_count")]
    pub control_plane_count: usize,
    #[serde(default = "default_pod_cidr", alias = "pod_cidr")]
    pub pod_cidr: String,
    #[serde(default = "default_service_cidr", alias = "service_cidr")]
    pub service_cidr: String,
    /// Endpoint advertised by `kubeadm init`; defaults to `<name>-lb`
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "control_plane_endpoint"
    )]
    pub control_plane_endpoint: Option<String>,
    /// Kubernetes minor release used for the package repository, e.g. `v1.30`
    #[serde(default = "default_kubernetes_version", alias = "kubernetes_version")]
    pub kubernetes_version: String,
    pub registration: Registration,
}

fn default_pod_cidr() -> String {
    "10.244.0.0/16".to_string()
}

fn default_service_cidr() -> String {
    "10.96.0.0/12".to_string()
}

fn default_kubernetes_version() -> String {
    "v1.30".to_string()
}

impl ClusterSpec {
    pub fn new(
        name: impl Into<String>,
        control_plane_count: usize,
        registration: Registration,
    ) -> Self {
        Self {
            name: name.into(),
            control_plane_count,
            pod_cidr: default_pod_cidr(),
            service_cidr: default_service_cidr(),
            control_plane_endpoint: None,
            kubernetes_version: default_kubernetes_version(),
            registration,
        }
    }

    /// Effective control-plane endpoint passed to `kubeadm init`
    pub fn effective_endpoint(&self) -> String {
        self.control_plane_endpoint
            .clone()
            .unwrap_or_else(|| format!("{}-lb", self.name))
    }
}

/// A provisioning manifest: the cluster spec plus the ordered node roster
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Manifest {
    pub cluster: ClusterSpec,
    pub nodes: Vec<Node>,
}

// ============================================================================
// SBIO: Pure parsing functions (no I/O)
// ============================================================================

/// Parse a YAML manifest. Pure function - no I/O.
pub fn parse_yaml_manifest(content: &str) -> Result<Manifest, ManifestError> {
    serde_yaml::from_str(content).map_err(|e| ManifestError::ParseError(e.to_string()))
}

/// Parse a JSON manifest. Pure function - no I/O.
pub fn parse_json_manifest(content: &str) -> Result<Manifest, ManifestError> {
    serde_json::from_str(content).map_err(|e| ManifestError::ParseError(e.to_string()))
}

fn is_cidr(value: &str) -> bool {
    let Some((addr, prefix)) = value.split_once('/') else {
        return false;
    };
    let octets_ok = addr.split('.').count() == 4
        && addr.split('.').all(|o| o.parse::<u8>().is_ok());
    let prefix_ok = prefix.parse::<u8>().map(|p| p <= 32).unwrap_or(false);
    octets_ok && prefix_ok
}

/// Validate a manifest before any remote command is issued.
/// This is a pure function - no I/O.
pub fn validate_manifest(manifest: &Manifest) -> Result<(), ManifestError> {
    let cluster = &manifest.cluster;

    let name_pattern = Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$")
        .map_err(|e| ManifestError::Invalid(e.to_string()))?;
    if !name_pattern.is_match(&cluster.name) {
        return Err(ManifestError::Invalid(format!(
            "cluster name '{}' must be a lowercase DNS label",
            cluster.name
        )));
    }

    if manifest.nodes.is_empty() {
        return Err(ManifestError::Invalid("node roster is empty".to_string()));
    }

    if cluster.control_plane_count == 0 || cluster.control_plane_count > manifest.nodes.len() {
        return Err(ManifestError::Invalid(format!(
            "control-plane-count must be between 1 and {} (got {})",
            manifest.nodes.len(),
            cluster.control_plane_count
        )));
    }

    let address_pattern = pattern(r"^[A-Za-z0-9]([A-Za-z0-9.:-]*[A-Za-z0-9])?$")?;
    let user_pattern = pattern(r"^[A-Za-z_][A-Za-z0-9_.-]*$")?;
    let mut seen = HashSet::new();
    for node in &manifest.nodes {
        if node.address.trim().is_empty() {
            return Err(ManifestError::Invalid(format!(
                "node '{}' has no address",
                node.hostname
            )));
        }
        if !address_pattern.is_match(&node.address) {
            return Err(ManifestError::Invalid(format!(
                "node '{}' address '{}' is not a hostname or IP address",
                node.hostname, node.address
            )));
        }
        if !user_pattern.is_match(&node.ssh_user) {
            return Err(ManifestError::Invalid(format!(
                "node '{}' ssh-user '{}' is not a valid user name",
                node.hostname, node.ssh_user
            )));
        }
        if !seen.insert(node.address.as_str()) {
            return Err(ManifestError::DuplicateAddress(node.address.clone()));
        }
    }

    for (field, value) in [("pod-cidr", &cluster.pod_cidr), ("service-cidr", &cluster.service_cidr)] {
        if !is_cidr(value) {
            return Err(ManifestError::Invalid(format!(
                "{} '{}' is not a valid IPv4 CIDR",
                field, value
            )));
        }
    }

    let version_pattern =
        Regex::new(r"^v\d+\.\d+$").map_err(|e| ManifestError::Invalid(e.to_string()))?;
    if !version_pattern.is_match(&cluster.kubernetes_version) {
        return Err(ManifestError::Invalid(format!(
            "kubernetes-version '{}' must look like v1.30",
            cluster.kubernetes_version
        )));
    }

    if let Some(ref endpoint) = cluster.control_plane_endpoint {
        let endpoint_pattern = pattern(&format!("^{}$", HOST_PORT))?;
        if !endpoint_pattern.is_match(endpoint) {
            return Err(ManifestError::Invalid(format!(
                "control-plane-endpoint '{}' must be host[:port]",
                endpoint
            )));
        }
    }

    let url = &cluster.registration.url;
    let url_pattern = pattern(&format!(r"^https?://{}(/[A-Za-z0-9._~%/-]*)?$", HOST_PORT))?;
    if !url_pattern.is_match(url) {
        return Err(ManifestError::Invalid(format!(
            "registration url '{}' must be an http(s) URL without query or shell characters",
            url
        )));
    }

    let token_pattern = pattern(r"^[A-Za-z0-9._:-]+$")?;
    if !token_pattern.is_match(&cluster.registration.token) {
        return Err(ManifestError::Invalid(
            "registration token may only contain letters, digits and . _ : -".to_string(),
        ));
    }

    Ok(())
}

/// `host` or `host:port`, host being a DNS name or IPv4 address
const HOST_PORT: &str = r"[A-Za-z0-9]([A-Za-z0-9.-]*[A-Za-z0-9])?(:[0-9]{1,5})?";

fn pattern(re: &str) -> Result<Regex, ManifestError> {
    Regex::new(re).map_err(|e| ManifestError::Invalid(e.to_string()))
}

impl Manifest {
    /// Parse and validate a manifest from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self, ManifestError> {
        let manifest = parse_yaml_manifest(content)?;
        validate_manifest(&manifest)?;
        Ok(manifest)
    }

    /// Parse and validate a manifest from a JSON string
    pub fn from_json(content: &str) -> Result<Self, ManifestError> {
        let manifest = parse_json_manifest(content)?;
        validate_manifest(&manifest)?;
        Ok(manifest)
    }
}
