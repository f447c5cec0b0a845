//! The orchestrator task.
//!
//! Owns the [`WizardSession`] by value and drains one ordered event queue.
//! The push channel reader, gateway tasks and the presentation adapter are
//! all producers into that queue; the presentation adapter reads state back
//! through a `watch` of [`RenderState`] snapshots.

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use wizard_core::{Effect, Intent, IntentError, RenderState, WizardEvent, WizardSession};

use crate::channel::ChannelManager;
use crate::config::WizardConfig;
use crate::gateway::OperationGateway;

const EVENT_QUEUE_CAPACITY: usize = 256;

pub struct Orchestrator {
    session: WizardSession,
    events: mpsc::Receiver<WizardEvent>,
    channel: ChannelManager,
    gateway: OperationGateway,
    render: watch::Sender<RenderState>,
    notice: Option<String>,
}

/// What the presentation adapter holds: a way in (intents) and a way out
/// (snapshots).
#[derive(Clone)]
pub struct WizardHandle {
    events: mpsc::Sender<WizardEvent>,
    render: watch::Receiver<RenderState>,
}

impl WizardHandle {
    /// Forward a user intent. Returns false once the orchestrator has stopped.
    pub async fn intent(&self, intent: Intent) -> bool {
        self.events.send(WizardEvent::Intent(intent)).await.is_ok()
    }

    pub fn subscribe(&self) -> watch::Receiver<RenderState> {
        self.render.clone()
    }

    pub fn snapshot(&self) -> RenderState {
        self.render.borrow().clone()
    }
}

impl Orchestrator {
    /// Wire up the channel manager and gateway. Must be called inside a
    /// tokio runtime: the channel starts connecting immediately.
    pub fn new(config: &WizardConfig) -> anyhow::Result<(Self, WizardHandle)> {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let session = WizardSession::new();
        let (render_tx, render_rx) = watch::channel(session.snapshot());

        let gateway =
            OperationGateway::new(config.endpoint.clone(), &config.gateway, events_tx.clone())?;
        let channel = ChannelManager::connect(
            config.endpoint.ws_url(),
            config.channel.clone(),
            events_tx.clone(),
        );

        let orchestrator = Self {
            session,
            events: events_rx,
            channel,
            gateway,
            render: render_tx,
            notice: None,
        };
        let handle = WizardHandle {
            events: events_tx,
            render: render_rx,
        };
        Ok((orchestrator, handle))
    }

    /// Process events until the user closes the wizard. Returns the final
    /// session state.
    pub async fn run(mut self) -> WizardSession {
        info!(step = %self.session.current_step(), "wizard started");

        while let Some(event) = self.events.recv().await {
            debug!(?event, "event");
            if matches!(event, WizardEvent::Intent(_)) {
                self.notice = None;
            }
            match self.session.apply(event) {
                Ok(effects) => {
                    for effect in effects {
                        self.execute(effect).await;
                    }
                }
                // Already shown inline next to the field.
                Err(e @ IntentError::Validation(_)) => debug!(error = %e, "intent rejected"),
                Err(e) => {
                    debug!(error = %e, "intent rejected");
                    self.notice = Some(e.to_string());
                }
            }
            self.publish();

            if self.session.is_closed() {
                break;
            }
        }

        // Reached only if every producer went away without a close.
        if !self.session.is_closed() {
            self.channel.shutdown().await;
        }
        info!(step = %self.session.current_step(), "wizard finished");
        self.session
    }

    async fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::Trigger(operation) => {
                info!(operation = %operation, "triggering");
                self.gateway.trigger(operation);
            }
            Effect::Send(message) => {
                if !self.channel.send(message).await {
                    debug!("client message not delivered, channel closed");
                }
            }
            Effect::EndSession => self.channel.shutdown().await,
        }
    }

    fn publish(&self) {
        let mut snapshot = self.session.snapshot();
        snapshot.notice = self.notice.clone();
        self.render.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}
