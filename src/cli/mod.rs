//! CLI module for kubestrap
//!
//! Subcommands:
//! - `kubestrap provision` - Bootstrap a cluster from a manifest
//! - `kubestrap teardown` - Reset every node in a manifest
//! - `kubestrap plan` - Show the phase/step plan without touching any node
//! - `kubestrap render` - Print generated HAProxy or CNI configuration
//! - `kubestrap validate` - Validate a manifest file

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod commands;
mod display;

pub use commands::*;
pub use display::*;

#[derive(Parser, Debug)]
#[command(name = "kubestrap")]
#[command(about = "Bootstrap bare-metal Kubernetes clusters over SSH")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to a .env file loaded before anything else
    #[arg(long, value_name = "FILE", global = true)]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Provision a cluster from a manifest
    Provision(ProvisionArgs),

    /// Reset every node listed in a manifest (best effort)
    Teardown(TeardownArgs),

    /// Print the provisioning plan without connecting to any node
    Plan(PlanArgs),

    /// Print generated configuration
    Render(RenderArgs),

    /// Validate a manifest file
    Validate(ValidateArgs),
}

/// SSH and concurrency options shared by commands that reach nodes
#[derive(clap::Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Private key used for every node (default: ~/.ssh/id_rsa)
    #[arg(long, env = "KUBESTRAP_SSH_KEY", value_name = "PATH")]
    pub ssh_key: Option<String>,

    /// Maximum nodes worked on at once within a phase
    #[arg(long, default_value_t = 4)]
    pub max_parallel: usize,

    /// Deadline for a single remote command, in seconds
    #[arg(long, default_value_t = 1800, value_name = "SECS")]
    pub command_timeout: u64,

    /// SSH connect timeout, in seconds
    #[arg(long, default_value_t = 10, value_name = "SECS")]
    pub connect_timeout: u64,

    /// POST the run result as JSON to this URL
    #[arg(long, env = "KUBESTRAP_NOTIFY_URL", value_name = "URL")]
    pub notify_url: Option<String>,

    /// Bearer token sent with notifications
    #[arg(long, env = "KUBESTRAP_NOTIFY_TOKEN", hide_env_values = true)]
    pub notify_token: Option<String>,
}

/// Arguments for the provision command
#[derive(Parser, Debug)]
pub struct ProvisionArgs {
    /// Path to the cluster manifest (JSON or YAML)
    pub manifest: PathBuf,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Print the outcome as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the teardown command
#[derive(Parser, Debug)]
pub struct TeardownArgs {
    /// Path to the cluster manifest (JSON or YAML)
    pub manifest: PathBuf,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the plan command
#[derive(Parser, Debug)]
pub struct PlanArgs {
    /// Path to the cluster manifest (JSON or YAML)
    pub manifest: PathBuf,

    /// Print the plan as JSON
    #[arg(long)]
    pub json: bool,
}

/// Generated configuration kinds
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderTarget {
    /// HAProxy config for the API server load balancer
    Haproxy,
    /// Calico installation manifest
    Cni,
}

/// Arguments for the render command
#[derive(Parser, Debug)]
pub struct RenderArgs {
    /// Path to the cluster manifest (JSON or YAML)
    pub manifest: PathBuf,

    /// What to render
    #[arg(value_enum)]
    pub target: RenderTarget,
}

/// Arguments for the validate command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to the cluster manifest (JSON or YAML)
    pub manifest: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_provision_defaults() {
        let cli = Cli::parse_from(["kubestrap", "provision", "cluster.yaml"]);
        match cli.command {
            Commands::Provision(args) => {
                assert_eq!(args.manifest, PathBuf::from("cluster.yaml"));
                assert_eq!(args.connection.max_parallel, 4);
                assert_eq!(args.connection.command_timeout, 1800);
                assert_eq!(args.connection.connect_timeout, 10);
                assert!(!args.json);
            }
            _ => panic!("Expected Provision command"),
        }
    }

    #[test]
    fn test_parse_provision_flags() {
        let cli = Cli::parse_from([
            "kubestrap",
            "-vv",
            "provision",
            "cluster.yaml",
            "--ssh-key",
            "/keys/lab",
            "--max-parallel",
            "8",
            "--notify-url",
            "https://hooks.example.com/x",
        ]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Provision(args) => {
                assert_eq!(args.connection.ssh_key.as_deref(), Some("/keys/lab"));
                assert_eq!(args.connection.max_parallel, 8);
                assert_eq!(
                    args.connection.notify_url.as_deref(),
                    Some("https://hooks.example.com/x")
                );
            }
            _ => panic!("Expected Provision command"),
        }
    }

    #[test]
    fn test_parse_teardown() {
        let cli = Cli::parse_from(["kubestrap", "teardown", "cluster.json", "--json"]);
        match cli.command {
            Commands::Teardown(args) => {
                assert_eq!(args.manifest, PathBuf::from("cluster.json"));
                assert!(args.json);
            }
            _ => panic!("Expected Teardown command"),
        }
    }

    #[test]
    fn test_parse_render() {
        let cli = Cli::parse_from(["kubestrap", "render", "cluster.yaml", "haproxy"]);
        match cli.command {
            Commands::Render(args) => assert_eq!(args.target, RenderTarget::Haproxy),
            _ => panic!("Expected Render command"),
        }
        assert!(Cli::try_parse_from(["kubestrap", "render", "cluster.yaml", "nginx"]).is_err());
    }

    #[test]
    fn test_parse_plan_and_validate() {
        let cli = Cli::parse_from(["kubestrap", "plan", "c.yaml"]);
        assert!(matches!(cli.command, Commands::Plan(_)));
        let cli = Cli::parse_from(["kubestrap", "validate", "c.yaml"]);
        assert!(matches!(cli.command, Commands::Validate(_)));
    }

    #[test]
    fn test_env_file_is_global() {
        let cli = Cli::parse_from(["kubestrap", "validate", "c.yaml", "--env-file", ".env"]);
        assert_eq!(cli.env_file, Some(PathBuf::from(".env")));
    }
}
