//! Configuration text generated from the roster and cluster spec
//!
//! Everything here is a pure function of its inputs: the same roster and spec
//! always render byte-identical text. Writing and applying the result is the
//! sequencer's job.

use crate::manifest::{ClusterSpec, Node, API_SERVER_PORT};

/// Port the HAProxy frontend listens on. It runs on the first control-plane
/// node next to its own API server, so it cannot reuse 6443.
pub const LOAD_BALANCER_PORT: u16 = 8443;

/// Calico release installed by CNI_INSTALL
pub const CALICO_VERSION: &str = "v3.28.1";

/// Remote path the HAProxy config is written to
pub const HAPROXY_CONFIG_PATH: &str = "/etc/haproxy/haproxy.cfg";

/// Remote path the Calico installation manifest is written to
pub const CNI_MANIFEST_PATH: &str = "/tmp/kubestrap-calico-installation.yaml";

const HEREDOC_MARKER: &str = "KUBESTRAP_EOF";

/// Render the HAProxy config balancing the API server across the control plane
pub fn render_haproxy_config(control_plane: &[Node]) -> String {
    let mut config = String::new();

    config.push_str(
        "global
    daemon
    log 127.0.0.1:514 local0
    chroot /var/lib/haproxy
    stats socket /run/haproxy/admin.sock mode 660 level admin
    stats timeout 30s
    user haproxy
    group haproxy

defaults
    mode tcp
    log global
    option tcplog
    option dontlognull
    option redispatch
    retries 3
    timeout queue 1m
    timeout connect 10s
    timeout client 1m
    timeout server 1m
    timeout check 10s
    maxconn 3000

",
    );

    config.push_str(&format!(
        "frontend k8s-api
    bind *:{}
    mode tcp
    default_backend k8s-control-plane

backend k8s-control-plane
    mode tcp
    balance roundrobin
    option tcp-check
",
        LOAD_BALANCER_PORT
    ));

    for (index, node) in control_plane.iter().enumerate() {
        config.push_str(&format!(
            "    server master{} {}:{} check\n",
            index + 1,
            node.address,
            API_SERVER_PORT
        ));
    }

    config
}

/// Render the Calico `Installation` resource for the tigera operator,
/// carrying the cluster's pod address range
pub fn render_cni_manifest(spec: &ClusterSpec) -> String {
    format!(
        "apiVersion: operator.tigera.io/v1
kind: Installation
metadata:
  name: default
  labels:
    app.kubernetes.io/managed-by: kubestrap
    kubestrap.io/cluster: {name}
spec:
  calicoNetwork:
    ipPools:
    - name: default-ipv4-ippool
      blockSize: 26
      cidr: {cidr}
      encapsulation: VXLANCrossSubnet
      natOutgoing: Enabled
      nodeSelector: all()
---
apiVersion: operator.tigera.io/v1
kind: APIServer
metadata:
  name: default
spec: {{}}
",
        name = spec.name,
        cidr = spec.pod_cidr
    )
}

/// URL of the tigera operator manifest for [`CALICO_VERSION`]
pub fn calico_operator_url() -> String {
    format!(
        "https://raw.githubusercontent.com/projectcalico/calico/{}/manifests/tigera-operator.yaml",
        CALICO_VERSION
    )
}

/// Shell command writing `content` to `path` verbatim (quoted heredoc, no
/// expansion on the remote side)
pub fn write_file_command(path: &str, content: &str) -> String {
    let body = if content.ends_with('\n') {
        content.to_string()
    } else {
        format!("{}\n", content)
    };
    format!(
        "cat > {path} << '{marker}'\n{body}{marker}",
        path = path,
        marker = HEREDOC_MARKER,
        body = body
    )
}
