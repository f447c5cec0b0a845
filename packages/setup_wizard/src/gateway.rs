//! OperationGateway: fire-and-acknowledge trigger requests.
//!
//! A trigger only starts work on the backend. Its HTTP response says the
//! request was accepted; the actual outcome arrives later on the push
//! channel. Transport failures are reported into the event queue so the
//! state machine can treat them like a pushed error.

use anyhow::Context;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use wizard_core::{Operation, WizardEvent};

use crate::config::{BackendEndpoint, GatewayConfig};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("trigger request failed: {0}")]
    Transport(reqwest::Error),

    #[error("backend answered {0}")]
    Status(reqwest::StatusCode),

    #[error("acknowledgement was not JSON: {0}")]
    MalformedBody(reqwest::Error),
}

impl GatewayError {
    fn from_body(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::MalformedBody(err)
        } else {
            Self::Transport(err)
        }
    }
}

#[derive(Clone)]
pub struct OperationGateway {
    client: reqwest::Client,
    endpoint: BackendEndpoint,
    events: mpsc::Sender<WizardEvent>,
}

impl OperationGateway {
    pub fn new(
        endpoint: BackendEndpoint,
        config: &GatewayConfig,
        events: mpsc::Sender<WizardEvent>,
    ) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint,
            events,
        })
    }

    /// Issue `operation` on its own task. The acknowledgement or failure is
    /// delivered into the event queue.
    pub fn trigger(&self, operation: Operation) -> JoinHandle<()> {
        let gateway = self.clone();
        tokio::spawn(async move {
            let kind = operation.kind();
            let event = match gateway.request(&operation).await {
                Ok(ack) => {
                    debug!(operation = %kind, %ack, "trigger accepted");
                    WizardEvent::TriggerAccepted(kind)
                }
                Err(e) => {
                    warn!(operation = %kind, error = %e, "trigger failed");
                    WizardEvent::TriggerFailed(kind)
                }
            };
            if gateway.events.send(event).await.is_err() {
                debug!(operation = %kind, "wizard gone, dropping trigger result");
            }
        })
    }

    /// Send the request and return the acknowledgement body.
    pub async fn request(&self, operation: &Operation) -> Result<serde_json::Value, GatewayError> {
        let url = self.endpoint.api_url(operation.kind().path());
        let mut request = self.client.post(&url);
        if let Some(body) = operation.body() {
            request = request.json(&body);
        }

        let resp = request.send().await.map_err(GatewayError::Transport)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(GatewayError::Status(status));
        }
        resp.json::<serde_json::Value>()
            .await
            .map_err(GatewayError::from_body)
    }
}
