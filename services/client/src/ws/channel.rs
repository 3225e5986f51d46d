//! Opens one websocket connection per chat exchange.

use super::endpoint::{EndpointError, chat_endpoint};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{Instrument, debug, error, info};
use tutor_core::channel::{
    Channel, ChannelEvent, ChannelEventKind, ChannelFactory, ChannelId, SendError,
};

/// Instructions from the channel handle to its connection task.
#[derive(Debug)]
enum Outbound {
    Frame(String),
    Close,
}

/// Handle to a connection task started by [`WsChannelFactory`].
///
/// Dropping the handle closes the connection as well.
pub struct WsChannel {
    id: ChannelId,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Channel for WsChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn send(&mut self, frame: String) -> Result<(), SendError> {
        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| SendError(self.id))
    }

    fn close(&mut self) {
        let _ = self.outbound.send(Outbound::Close);
    }
}

/// Opens chat channels against a fixed websocket endpoint.
#[derive(Debug, Clone)]
pub struct WsChannelFactory {
    endpoint: String,
}

impl WsChannelFactory {
    /// Creates a factory for the backend at `base_url` (an `http(s)` address).
    pub fn new(base_url: &str) -> Result<Self, EndpointError> {
        Ok(Self {
            endpoint: chat_endpoint(base_url)?,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ChannelFactory for WsChannelFactory {
    /// Spawns the connection task. Must be called within a Tokio runtime.
    fn open(&self, id: ChannelId, events: mpsc::Sender<ChannelEvent>) -> Box<dyn Channel> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let span = tracing::info_span!("chat_channel", channel = %id);
        tokio::spawn(run_connection(id, self.endpoint.clone(), events, outbound_rx).instrument(span));
        Box::new(WsChannel {
            id,
            outbound: outbound_tx,
        })
    }
}

/// Drives a single websocket connection until either side closes it.
async fn run_connection(
    id: ChannelId,
    endpoint: String,
    events: mpsc::Sender<ChannelEvent>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let ws_stream = match connect_async(endpoint.as_str()).await {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            error!(%endpoint, error = %e, "Failed to connect to chat endpoint.");
            emit(&events, id, ChannelEventKind::Error(e.to_string())).await;
            emit(&events, id, ChannelEventKind::Closed).await;
            return;
        }
    };
    info!(%endpoint, "Connected to chat endpoint.");
    if !emit(&events, id, ChannelEventKind::Opened).await {
        return;
    }

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    loop {
        tokio::select! {
            command = outbound.recv() => match command {
                Some(Outbound::Frame(text)) => {
                    if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                        error!(error = %e, "Failed to send frame.");
                        emit(&events, id, ChannelEventKind::Error(e.to_string())).await;
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    debug!("Closing chat channel.");
                    let _ = ws_tx.close().await;
                    return;
                }
            },
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let kind = ChannelEventKind::Message(text.as_str().to_owned());
                    if !emit(&events, id, kind).await {
                        return;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "Chat endpoint closed the connection.");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(error = %e, "Error reading from chat endpoint.");
                    emit(&events, id, ChannelEventKind::Error(e.to_string())).await;
                    break;
                }
                None => break,
            },
        }
    }
    emit(&events, id, ChannelEventKind::Closed).await;
}

/// Queues one lifecycle event. Returns `false` once the session has stopped listening.
async fn emit(events: &mpsc::Sender<ChannelEvent>, id: ChannelId, kind: ChannelEventKind) -> bool {
    events.send(ChannelEvent::new(id, kind)).await.is_ok()
}
