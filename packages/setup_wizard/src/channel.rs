//! ChannelManager: the persistent push channel to the setup backend.
//!
//! One supervised task owns the socket. It connects, forwards decoded frames
//! into the wizard's event queue, and on any close (including a failed
//! connect) waits a fixed delay before trying again. There is never more
//! than one pending reconnect, and nothing is buffered across connections.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use wizard_core::{ClientMessage, ServerMessage, WizardEvent};

use crate::config::ChannelConfig;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("backend is unavailable")]
    Unavailable,

    #[error("push channel handshake failed: {0}")]
    Handshake(tungstenite::Error),
}

impl ChannelError {
    pub fn from_tungstenite(err: tungstenite::Error) -> Self {
        let is_connect = match &err {
            tungstenite::Error::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        };
        if is_connect {
            Self::Unavailable
        } else {
            Self::Handshake(err)
        }
    }
}

/// Observable connection state, mirrored into logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

/// Why a single connection ended.
#[derive(Debug, PartialEq, Eq)]
enum ConnectionEnd {
    Lost,
    Shutdown,
}

/// Writer slot for the live connection. Replaced on every reconnect.
type Outbound = Arc<Mutex<Option<mpsc::Sender<ClientMessage>>>>;

pub struct ChannelManager {
    outbound: Outbound,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ChannelManager {
    /// Start the supervised connect/reconnect task. Decoded push frames and
    /// open/close transitions are delivered into `events`.
    pub fn connect(url: String, config: ChannelConfig, events: mpsc::Sender<WizardEvent>) -> Self {
        let outbound: Outbound = Arc::new(Mutex::new(None));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(supervise(
            url,
            config,
            events,
            outbound.clone(),
            cancel.clone(),
        ));

        Self {
            outbound,
            cancel,
            task: Some(task),
        }
    }

    /// Queue a message on the live connection. Returns false (and drops the
    /// message) when no connection is open or its queue is full.
    pub async fn send(&self, message: ClientMessage) -> bool {
        let slot = self.outbound.lock().await;
        let Some(tx) = slot.as_ref() else {
            debug!(?message, "push channel not open, dropping message");
            return false;
        };
        match tx.try_send(message) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "push channel send dropped");
                false
            }
        }
    }

    /// Stop reconnecting and close the socket. Messages already accepted by
    /// `send` are written before the close frame.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "push channel task ended abnormally");
            }
        }
        info!("push channel shut down");
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn supervise(
    url: String,
    config: ChannelConfig,
    events: mpsc::Sender<WizardEvent>,
    outbound: Outbound,
    cancel: CancellationToken,
) {
    let mut state = ChannelState::Connecting;
    let mut attempt = 0u32;

    loop {
        debug!(url = %url, state = ?state, "connecting push channel");

        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            result = tokio_tungstenite::connect_async(url.as_str()) => result,
        };

        match connected {
            Ok((ws, _)) => {
                info!(url = %url, "push channel connected");
                attempt = 0;
                state = ChannelState::Connected;
                debug!(state = ?state);

                let (tx, rx) = mpsc::channel(config.outbound_capacity);
                *outbound.lock().await = Some(tx);
                // On cancel, fall through so the connection still flushes and closes.
                if !forward(&events, WizardEvent::ChannelOpened, &cancel).await
                    && !cancel.is_cancelled()
                {
                    *outbound.lock().await = None;
                    break;
                }

                let end = run_connection(ws, rx, &events, &cancel).await;
                *outbound.lock().await = None;

                if end == ConnectionEnd::Shutdown {
                    break;
                }
                info!("push channel disconnected");
                if !forward(&events, WizardEvent::ChannelClosed, &cancel).await {
                    break;
                }
            }
            Err(e) => {
                warn!(url = %url, error = %ChannelError::from_tungstenite(e), "push channel connect failed");
            }
        }

        attempt += 1;
        state = ChannelState::Reconnecting { attempt };
        info!(
            attempt,
            delay_ms = config.reconnect_delay.as_millis() as u64,
            "push channel reconnect scheduled"
        );

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(config.reconnect_delay) => {}
        }
    }

    debug!("push channel supervisor stopped");
}

/// Deliver an event to the wizard unless the manager is cancelled first.
/// False means the supervisor should stop.
async fn forward(
    events: &mpsc::Sender<WizardEvent>,
    event: WizardEvent,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = events.send(event) => sent.is_ok(),
    }
}

/// Pump one connection until it closes or the manager is cancelled.
async fn run_connection(
    ws: WsStream,
    mut outbound: mpsc::Receiver<ClientMessage>,
    events: &mpsc::Sender<WizardEvent>,
    cancel: &CancellationToken,
) -> ConnectionEnd {
    let (mut ws_write, mut ws_read) = ws.split();

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            Some(message) = outbound.recv() => {
                if let Err(e) = write_message(&mut ws_write, &message).await {
                    warn!(error = %e, "push channel write error");
                    return ConnectionEnd::Lost;
                }
            }

            frame = ws_read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => match ServerMessage::from_json(&text) {
                        Ok(message) => {
                            debug!(kind = message.kind(), "push received");
                            if !forward(events, WizardEvent::Push(message), cancel).await {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, frame = text.as_str(), "dropping undecodable push frame");
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "push channel closed by backend");
                        return ConnectionEnd::Lost;
                    }
                    Some(Ok(_)) => {
                        // Binary, ping and pong frames carry nothing for us.
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "push channel read error");
                        return ConnectionEnd::Lost;
                    }
                    None => return ConnectionEnd::Lost,
                }
            }
        }
    }

    // Flush whatever was accepted before the close frame.
    while let Ok(message) = outbound.try_recv() {
        if let Err(e) = write_message(&mut ws_write, &message).await {
            warn!(error = %e, "push channel flush failed");
            break;
        }
    }
    let _ = ws_write.close().await;
    ConnectionEnd::Shutdown
}

async fn write_message<S>(ws_write: &mut S, message: &ClientMessage) -> anyhow::Result<()>
where
    S: futures::Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let json = message.to_json()?;
    ws_write.send(Message::Text(json.into())).await?;
    Ok(())
}
