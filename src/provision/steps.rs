//! Structured step lists for each phase
//!
//! Targets RHEL-family hosts (yum, firewalld, SELinux). Each step is one
//! command so a failure names exactly what broke.

use std::borrow::Cow;

use super::secrets::JoinCommand;
use super::template::{
    calico_operator_url, write_file_command, CNI_MANIFEST_PATH, HAPROXY_CONFIG_PATH,
};
use crate::manifest::ClusterSpec;
use crate::remote::Step;

/// Prints a fresh worker join command
pub const PRINT_JOIN_COMMAND: &str = "kubeadm token create --print-join-command";

/// Re-uploads control-plane certificates and prints the certificate key
pub const UPLOAD_CERTS: &str = "kubeadm init phase upload-certs --upload-certs";

/// Quote a manifest-supplied value for the remote shell
fn quote(value: &str) -> Cow<'_, str> {
    shell_escape::unix::escape(Cow::Borrowed(value))
}

/// Node preparation run on every node before anything is installed
pub fn prereq_steps() -> Vec<Step> {
    vec![
        Step::new("update packages", "yum update -y"),
        Step::new(
            "install base utilities",
            "yum install -y curl wget vim net-tools yum-utils",
        ),
        Step::new("disable firewall", "systemctl disable --now firewalld"),
        Step::new("set SELinux permissive", "setenforce 0 || true"),
        Step::new(
            "persist SELinux permissive",
            "sed -i 's/^SELINUX=enforcing$/SELINUX=permissive/' /etc/selinux/config",
        ),
        Step::new("disable swap", "swapoff -a"),
        Step::new(
            "persist swap off",
            "sed -i '/ swap / s/^\\([^#]\\)/#\\1/' /etc/fstab",
        ),
        Step::new(
            "load kernel modules",
            "modprobe overlay && modprobe br_netfilter",
        ),
        Step::new(
            "persist kernel modules",
            write_file_command("/etc/modules-load.d/k8s.conf", "overlay\nbr_netfilter\n"),
        ),
        Step::new(
            "write sysctl settings",
            write_file_command(
                "/etc/sysctl.d/k8s.conf",
                "net.bridge.bridge-nf-call-iptables = 1\n\
                 net.bridge.bridge-nf-call-ip6tables = 1\n\
                 net.ipv4.ip_forward = 1\n",
            ),
        ),
        Step::new("apply sysctl settings", "sysctl --system"),
    ]
}

fn kubernetes_repo(version: &str) -> String {
    format!(
        "[kubernetes]\n\
         name=Kubernetes\n\
         baseurl=https://pkgs.k8s.io/core:/stable:/{v}/rpm/\n\
         enabled=1\n\
         gpgcheck=1\n\
         gpgkey=https://pkgs.k8s.io/core:/stable:/{v}/rpm/repodata/repomd.xml.key\n\
         exclude=kubelet kubeadm kubectl cri-tools kubernetes-cni\n",
        v = version
    )
}

/// Container runtime and Kubernetes tooling, identical on every node
pub fn runtime_install_steps(spec: &ClusterSpec) -> Vec<Step> {
    vec![
        Step::new(
            "add container runtime repository",
            "yum-config-manager --add-repo https://download.docker.com/linux/centos/docker-ce.repo",
        ),
        Step::new("install containerd", "yum install -y containerd.io"),
        Step::new("create containerd config dir", "mkdir -p /etc/containerd"),
        Step::new(
            "write default containerd config",
            "containerd config default > /etc/containerd/config.toml",
        ),
        Step::new(
            "enable systemd cgroup driver",
            "sed -i 's/SystemdCgroup = false/SystemdCgroup = true/' /etc/containerd/config.toml",
        ),
        Step::new("start containerd", "systemctl enable --now containerd"),
        Step::new(
            "add kubernetes repository",
            write_file_command(
                "/etc/yum.repos.d/kubernetes.repo",
                &kubernetes_repo(&spec.kubernetes_version),
            ),
        ),
        Step::new(
            "install kubernetes tooling",
            "yum install -y kubelet kubeadm kubectl --disableexcludes=kubernetes",
        ),
        Step::new("enable kubelet", "systemctl enable --now kubelet"),
    ]
}

/// `kubeadm init` on the first control-plane node
pub fn cluster_init_steps(spec: &ClusterSpec) -> Result<Vec<Step>, regex::Error> {
    Ok(vec![Step::new(
        "initialize cluster",
        format!(
            "kubeadm init --control-plane-endpoint={} --pod-network-cidr={} --service-cidr={} --upload-certs",
            quote(&spec.effective_endpoint()),
            quote(&spec.pod_cidr),
            quote(&spec.service_cidr)
        ),
    )
    .expecting_pattern(r"initialized successfully")?])
}

/// Copy the admin kubeconfig for root's kubectl
pub fn kubeconfig_steps() -> Vec<Step> {
    vec![
        Step::new("create kubeconfig dir", "mkdir -p $HOME/.kube"),
        Step::new(
            "copy admin kubeconfig",
            "cp -f /etc/kubernetes/admin.conf $HOME/.kube/config",
        ),
        Step::new(
            "own kubeconfig",
            "chown $(id -u):$(id -g) $HOME/.kube/config",
        ),
    ]
}

/// Step whose output holds the worker join command
pub fn print_join_command_step() -> Step {
    Step::new("print join command", PRINT_JOIN_COMMAND).sensitive()
}

/// Step whose output holds the certificate key
pub fn upload_certs_step() -> Step {
    Step::new("upload control-plane certificates", UPLOAD_CERTS).sensitive()
}

/// Run a cached join command
pub fn join_step(description: &str, join: &JoinCommand) -> Step {
    Step::new(description, join.as_str()).sensitive()
}

/// Install and start HAProxy with the rendered config
pub fn load_balancer_steps(haproxy_config: &str) -> Vec<Step> {
    vec![
        Step::new("install haproxy", "yum install -y haproxy"),
        Step::new(
            "write haproxy config",
            write_file_command(HAPROXY_CONFIG_PATH, haproxy_config),
        ),
        Step::new("validate haproxy config", format!("haproxy -c -f {}", HAPROXY_CONFIG_PATH)),
        Step::new("enable haproxy", "systemctl enable haproxy"),
        Step::new("restart haproxy", "systemctl restart haproxy"),
    ]
}

/// Install the tigera operator and apply the rendered Calico manifest
pub fn cni_steps(cni_manifest: &str) -> Vec<Step> {
    vec![
        Step::new(
            "install tigera operator",
            format!(
                "kubectl create -f {} || kubectl replace -f {}",
                calico_operator_url(),
                calico_operator_url()
            ),
        ),
        Step::new(
            "write calico installation",
            write_file_command(CNI_MANIFEST_PATH, cni_manifest),
        ),
        Step::new(
            "apply calico installation",
            format!("kubectl apply -f {}", CNI_MANIFEST_PATH),
        ),
    ]
}

/// Register the cluster with the fleet-management endpoint
pub fn registration_steps(spec: &ClusterSpec) -> Vec<Step> {
    vec![Step::new(
        "register with fleet manager",
        format!(
            "curl -sfL {} | sh -s - --server {} --token {} --cluster-name {}",
            quote(&format!("{}/install.sh", spec.registration.url.trim_end_matches('/'))),
            quote(&spec.registration.url),
            quote(&spec.registration.token),
            quote(&spec.name)
        ),
    )
    .sensitive()]
}

/// Reset a node back to its pre-cluster state
pub fn reset_steps() -> Vec<Step> {
    vec![
        Step::new("reset kubeadm", "kubeadm reset --force"),
        Step::new("stop kubelet", "systemctl stop kubelet"),
        Step::new("stop containerd", "systemctl stop containerd"),
        Step::new(
            "remove cluster state",
            "rm -rf /var/lib/cni/ /var/lib/kubelet/* /etc/cni/ /etc/kubernetes/ /var/lib/etcd/ /root/.kube/",
        ),
        Step::new(
            "flush packet filter rules",
            "iptables -F && iptables -t nat -F && iptables -t mangle -F && iptables -X",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Registration;

    fn spec() -> ClusterSpec {
        ClusterSpec::new(
            "prod-eu",
            3,
            Registration {
                url: "https://rancher.example.com/".to_string(),
                token: "reg-token".to_string(),
            },
        )
    }

    #[test]
    fn test_prereq_steps_cover_node_preparation() {
        let commands: Vec<String> = prereq_steps().into_iter().map(|s| s.command).collect();
        let all = commands.join("\n");
        assert!(all.contains("swapoff -a"));
        assert!(all.contains("firewalld"));
        assert!(all.contains("setenforce 0"));
        assert!(all.contains("modprobe br_netfilter"));
        assert!(all.contains("net.bridge.bridge-nf-call-iptables = 1"));
        assert!(all.contains("sysctl --system"));
    }

    #[test]
    fn test_runtime_install_uses_spec_version() {
        let mut spec = spec();
        spec.kubernetes_version = "v1.29".to_string();
        let steps = runtime_install_steps(&spec);
        assert!(steps
            .iter()
            .any(|s| s.command.contains("pkgs.k8s.io/core:/stable:/v1.29/rpm/")));
    }

    #[test]
    fn test_cluster_init_command() {
        let steps = cluster_init_steps(&spec()).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(
            steps[0].command,
            "kubeadm init --control-plane-endpoint=prod-eu-lb --pod-network-cidr=10.244.0.0/16 --service-cidr=10.96.0.0/12 --upload-certs"
        );
        assert!(steps[0].expected_output.is_some());
    }

    #[test]
    fn test_secret_steps_are_sensitive() {
        assert!(print_join_command_step().sensitive);
        assert!(upload_certs_step().sensitive);
        assert!(join_step("join", &JoinCommand::new("kubeadm join x --token y")).sensitive);
        assert!(registration_steps(&spec())[0].sensitive);
    }

    #[test]
    fn test_registration_command() {
        let step = &registration_steps(&spec())[0];
        assert!(step.command.contains("--token reg-token"));
        assert!(step
            .command
            .starts_with("curl -sfL 'https://rancher.example.com/install.sh' | sh -s -"));
    }

    #[test]
    fn test_manifest_values_are_shell_quoted() {
        let mut spec = spec();
        spec.control_plane_endpoint = Some("x$(touch /tmp/x)".to_string());
        spec.registration.url = "https://fleet.example.com;touch /tmp/x;".to_string();
        spec.registration.token = "a b&&id".to_string();

        let init = &cluster_init_steps(&spec).unwrap()[0].command;
        assert!(init.contains("--control-plane-endpoint='x$(touch /tmp/x)' "));

        let register = &registration_steps(&spec)[0].command;
        assert!(register.contains("--token 'a b&&id' "));
        assert!(register.contains("--server 'https://fleet.example.com;touch /tmp/x;' "));
        assert!(register.starts_with("curl -sfL 'https://fleet.example.com;touch /tmp/x;/install.sh' | "));
    }

    #[test]
    fn test_load_balancer_steps_write_config() {
        let steps = load_balancer_steps("frontend x\n");
        assert!(steps[1].command.contains(HAPROXY_CONFIG_PATH));
        assert!(steps[1].command.contains("frontend x\n"));
    }

    #[test]
    fn test_reset_steps() {
        let steps = reset_steps();
        assert_eq!(steps[0].command, "kubeadm reset --force");
        assert!(steps.iter().any(|s| s.command.contains("iptables -F")));
        assert!(steps.iter().any(|s| s.command.contains("/var/lib/etcd/")));
    }
}
