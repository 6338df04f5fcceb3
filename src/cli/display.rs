//! Display formatting for CLI output
//!
//! SBIO pattern: Pure functions that format data for display

use super::commands::ValidationResult;
use crate::provision::{ProvisionOutcome, ProvisionPlan, TeardownReport};

// ============================================================================
// Table formatting helpers
// ============================================================================

/// Format a simple table with headers and rows
pub fn format_table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    if rows.is_empty() {
        return "No nodes.\n".to_string();
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let mut output = String::new();

    for (i, header) in headers.iter().enumerate() {
        if i > 0 {
            output.push_str("   ");
        }
        output.push_str(&format!(
            "{:width$}",
            header.to_uppercase(),
            width = widths[i]
        ));
    }
    output.push('\n');

    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i > 0 {
                output.push_str("   ");
            }
            if i < widths.len() {
                output.push_str(&format!("{:width$}", cell, width = widths[i]));
            } else {
                output.push_str(cell);
            }
        }
        output.push('\n');
    }

    output
}

fn elapsed(started: chrono::DateTime<chrono::Utc>, finished: chrono::DateTime<chrono::Utc>) -> String {
    let secs = (finished - started).num_seconds().max(0);
    format!("{}m{:02}s", secs / 60, secs % 60)
}

// ============================================================================
// Provision display
// ============================================================================

/// Format a provisioning outcome
pub fn format_outcome(outcome: &ProvisionOutcome) -> String {
    let mut output = String::new();

    if outcome.success {
        output.push_str(&format!("✓ Cluster {} provisioned\n\n", outcome.cluster_name));
    } else {
        output.push_str(&format!("✗ Cluster {} failed\n\n", outcome.cluster_name));
    }

    output.push_str(&format!("  Run:     {}\n", outcome.run_id));
    output.push_str(&format!("  Status:  {}\n", outcome.status));
    output.push_str(&format!(
        "  Elapsed: {}\n",
        elapsed(outcome.started_at, outcome.finished_at)
    ));

    if let Some(ref cause) = outcome.failure {
        output.push_str(&format!("  Phase:   {}\n", cause.phase));
        if let Some(ref node) = cause.node {
            output.push_str(&format!("  Node:    {}\n", node));
        }
        output.push_str(&format!("  Error:   {}\n", cause.message));
    }

    output
}

// ============================================================================
// Teardown display
// ============================================================================

/// Format a teardown report as a per-node table
pub fn format_teardown_report(report: &TeardownReport) -> String {
    let headers = &["HOSTNAME", "ADDRESS", "RESULT"];
    let rows: Vec<Vec<String>> = report
        .nodes
        .iter()
        .map(|n| {
            vec![
                n.hostname.clone(),
                n.address.clone(),
                match n.error {
                    None => "reset".to_string(),
                    Some(ref e) => format!("failed: {}", e),
                },
            ]
        })
        .collect();

    let mut output = format!("Teardown of cluster {}\n\n", report.cluster_name);
    output.push_str(&format_table(headers, rows));

    let failed = report.failed_nodes().len();
    if failed == 0 {
        output.push_str("\nAll nodes reset.\n");
    } else {
        output.push_str(&format!(
            "\n{} of {} node(s) failed to reset.\n",
            failed,
            report.nodes.len()
        ));
    }
    output
}

// ============================================================================
// Plan display
// ============================================================================

/// Format a dry-run plan
pub fn format_plan(plan: &ProvisionPlan) -> String {
    let mut output = String::new();

    output.push_str(&format!("Cluster: {}\n\n", plan.cluster_name));

    let roles: Vec<Vec<String>> = plan
        .partition
        .control_plane()
        .iter()
        .map(|n| (n, "control-plane"))
        .chain(plan.partition.workers().iter().map(|n| (n, "worker")))
        .map(|(n, role)| vec![n.hostname.clone(), n.address.clone(), role.to_string()])
        .collect();
    output.push_str(&format_table(&["HOSTNAME", "ADDRESS", "ROLE"], roles));

    for (index, phase) in plan.phases.iter().enumerate() {
        output.push_str(&format!("\n{}. {}\n", index + 1, phase.phase));
        if phase.targets.is_empty() {
            output.push_str("   (no nodes, skipped)\n");
            continue;
        }
        output.push_str(&format!("   Nodes: {}\n", phase.targets.join(", ")));
        for step in &phase.steps {
            let command = step.command.lines().next().unwrap_or_default();
            output.push_str(&format!("   - {}: {}\n", step.description, command));
        }
    }

    output.push_str("\nNo commands were run. Use `kubestrap provision` to execute.\n");
    output
}

// ============================================================================
// Validation display
// ============================================================================

/// Format validation result for display
pub fn format_validation_result(result: &ValidationResult, path: &str) -> String {
    let mut output = String::new();

    if result.valid {
        output.push_str(&format!("✓ {} is valid\n\n", path));
        if let Some(ref name) = result.cluster_name {
            output.push_str(&format!("  Cluster:       {}\n", name));
        }
        output.push_str(&format!("  Control plane: {}\n", result.control_plane));
        output.push_str(&format!("  Workers:       {}\n", result.workers));
    } else {
        output.push_str(&format!("✗ {} is invalid\n\n", path));
        if let Some(ref error) = result.error {
            output.push_str(&format!("  Error: {}\n", error));
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{ClusterSpec, Node, Registration};
    use crate::provision::{build_plan, FailureCause, NodeResetResult, Phase};
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    #[test]
    fn test_format_table() {
        let headers = &["NAME", "ADDRESS"];
        let rows = vec![
            vec!["cp-1".to_string(), "10.0.0.1".to_string()],
            vec!["wk-1".to_string(), "10.0.0.2".to_string()],
        ];

        let output = format_table(headers, rows);
        assert!(output.starts_with("NAME"));
        assert!(output.contains("cp-1"));
        assert!(output.contains("wk-1"));
    }

    #[test]
    fn test_format_table_empty() {
        let rows: Vec<Vec<String>> = vec![];
        assert!(format_table(&["NAME"], rows).contains("No nodes"));
    }

    #[test]
    fn test_format_outcome_failure() {
        let started = Utc::now();
        let outcome = ProvisionOutcome {
            run_id: Uuid::new_v4(),
            cluster_name: "lab".to_string(),
            success: false,
            status: Phase::Failed,
            failure: Some(FailureCause {
                phase: Phase::MasterJoin,
                node: Some("node2 (10.0.0.3)".to_string()),
                message: "MASTER_JOIN: command failed".to_string(),
            }),
            started_at: started,
            finished_at: started + Duration::seconds(75),
        };

        let output = format_outcome(&outcome);
        assert!(output.contains("✗ Cluster lab failed"));
        assert!(output.contains("Phase:   MASTER_JOIN"));
        assert!(output.contains("Node:    node2 (10.0.0.3)"));
        assert!(output.contains("1m15s"));
    }

    #[test]
    fn test_format_teardown_report() {
        let report = TeardownReport {
            cluster_name: "lab".to_string(),
            nodes: vec![
                NodeResetResult {
                    hostname: "cp-1".to_string(),
                    address: "10.0.0.1".to_string(),
                    error: None,
                },
                NodeResetResult {
                    hostname: "wk-1".to_string(),
                    address: "10.0.0.2".to_string(),
                    error: Some("connection refused".to_string()),
                },
            ],
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };

        let output = format_teardown_report(&report);
        assert!(output.contains("failed: connection refused"));
        assert!(output.contains("1 of 2 node(s) failed"));
    }

    #[test]
    fn test_format_plan() {
        let nodes = vec![Node::new("cp-1", "10.0.0.1"), Node::new("wk-1", "10.0.0.2")];
        let spec = ClusterSpec::new(
            "lab",
            1,
            Registration {
                url: "https://fleet".to_string(),
                token: "secret-token".to_string(),
            },
        );
        let plan = build_plan(&nodes, &spec).unwrap();
        let output = format_plan(&plan);
        assert!(output.contains("1. PREREQS"));
        assert!(output.contains("7. AGENT_REGISTRATION"));
        assert!(output.contains("control-plane"));
        assert!(output.contains("(no nodes, skipped)"));
        assert!(!output.contains("secret-token"));
    }

    #[test]
    fn test_format_validation_invalid() {
        let result = ValidationResult {
            valid: false,
            cluster_name: None,
            control_plane: 0,
            workers: 0,
            error: Some("roster is empty".to_string()),
        };

        let output = format_validation_result(&result, "cluster.yaml");
        assert!(output.contains("✗"));
        assert!(output.contains("roster is empty"));
    }
}
