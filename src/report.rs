//! Outcome reporting collaborator
//!
//! Run results are pushed to an external endpoint (chat bridge, inventory
//! service) after provisioning or teardown finishes. Reporting never changes
//! a run's result; callers log reporter failures and move on.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::provision::{ProvisionOutcome, TeardownReport};

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Endpoint returned {status}: {message}")]
    Rejected { status: u16, message: String },
}

// ============================================================================
// SBIO: Pure event envelope (no I/O)
// ============================================================================

/// Event posted to the reporting endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReportEvent {
    Provision(ProvisionOutcome),
    Teardown(TeardownReport),
}

impl ReportEvent {
    pub fn cluster_name(&self) -> &str {
        match self {
            ReportEvent::Provision(outcome) => &outcome.cluster_name,
            ReportEvent::Teardown(report) => &report.cluster_name,
        }
    }

    pub fn success(&self) -> bool {
        match self {
            ReportEvent::Provision(outcome) => outcome.success,
            ReportEvent::Teardown(report) => report.success(),
        }
    }

    /// One-line human summary, used as the `text` field for chat webhooks
    pub fn summary(&self) -> String {
        match self {
            ReportEvent::Provision(outcome) => match &outcome.failure {
                None => format!("Cluster {} provisioned", outcome.cluster_name),
                Some(cause) => format!(
                    "Cluster {} failed in {}{}: {}",
                    outcome.cluster_name,
                    cause.phase,
                    cause
                        .node
                        .as_ref()
                        .map(|n| format!(" on {}", n))
                        .unwrap_or_default(),
                    cause.message
                ),
            },
            ReportEvent::Teardown(report) => {
                let failed = report.failed_nodes().len();
                if failed == 0 {
                    format!("Cluster {} torn down", report.cluster_name)
                } else {
                    format!(
                        "Cluster {} teardown left {} of {} node(s) unreset",
                        report.cluster_name,
                        failed,
                        report.nodes.len()
                    )
                }
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    text: String,
    #[serde(flatten)]
    event: &'a ReportEvent,
}

/// JSON body posted for `event`
pub fn render_payload(event: &ReportEvent) -> serde_json::Value {
    let envelope = Envelope {
        text: event.summary(),
        event,
    };
    serde_json::to_value(envelope).unwrap_or_else(|_| serde_json::json!({ "text": event.summary() }))
}

// ============================================================================
// Reporter seam
// ============================================================================

#[async_trait]
pub trait OutcomeReporter: Send + Sync {
    async fn report(&self, event: &ReportEvent) -> Result<(), ReportError>;
}

// ============================================================================
// SBIO: I/O implementation (webhook POST)
// ============================================================================

#[derive(Clone)]
pub struct WebhookReporter {
    client: reqwest::Client,
    url: String,
    bearer_token: Option<String>,
}

impl WebhookReporter {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            bearer_token: None,
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl OutcomeReporter for WebhookReporter {
    async fn report(&self, event: &ReportEvent) -> Result<(), ReportError> {
        let mut req = self.client.post(&self.url).json(&render_payload(event));
        if let Some(ref token) = self.bearer_token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }

        let response = req
            .send()
            .await
            .map_err(|e| ReportError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ReportError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        debug!("Reported {} event to {}", event.cluster_name(), self.url);
        Ok(())
    }
}
