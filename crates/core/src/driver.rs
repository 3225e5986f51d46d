//! Runs a [`SessionController`] on its own task.
//!
//! Channel callbacks and `start` requests both arrive as messages on queues
//! drained by a single task, which preserves the one-at-a-time ordering the
//! controller relies on without tying it to a particular event loop.

use crate::{
    channel::{ChannelEvent, ChannelFactory},
    session::{SessionController, SessionSnapshot, StartError},
};
use std::sync::Arc;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{Instrument, info};

/// Requests a [`SessionHandle`] sends to the session task.
#[derive(Debug)]
pub enum SessionCommand {
    Start {
        query: String,
        user_id: String,
        reply: oneshot::Sender<Result<(), StartError>>,
    },
}

/// Cheap, clonable front end to a running session task.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    updates: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// Asks the session to begin a new exchange.
    ///
    /// Resolves once the controller has accepted or refused the request; the
    /// exchange itself continues in the background.
    pub async fn start(
        &self,
        query: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Result<(), StartError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(SessionCommand::Start {
                query: query.into(),
                user_id: user_id.into(),
                reply,
            })
            .await
            .map_err(|_| StartError::SessionEnded)?;
        response.await.map_err(|_| StartError::SessionEnded)?
    }

    /// A fresh receiver of session snapshots.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.updates.clone()
    }

    /// The most recently published snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.updates.borrow().clone()
    }

    /// Waits until the current exchange reaches `Closed` or `Failed`.
    ///
    /// Only meaningful after this handle's `start` was accepted. Called
    /// before that, it returns the previous exchange's terminal snapshot
    /// at once. [`ask`](Self::ask) does both steps in order.
    pub async fn wait_for_exchange(&self) -> Result<SessionSnapshot, StartError> {
        let mut updates = self.updates.clone();
        let snapshot = updates
            .wait_for(|s| s.state.is_terminal())
            .await
            .map_err(|_| StartError::SessionEnded)?;
        Ok(snapshot.clone())
    }

    /// Runs one exchange to completion and returns its final snapshot.
    pub async fn ask(
        &self,
        query: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Result<SessionSnapshot, StartError> {
        self.start(query, user_id).await?;
        self.wait_for_exchange().await
    }
}

/// Spawns the session task and returns a handle to it.
///
/// The task ends once every [`SessionHandle`] clone has been dropped; any
/// channel still open at that point is dropped with the controller.
pub fn spawn_session(factory: Arc<dyn ChannelFactory>) -> (SessionHandle, JoinHandle<()>) {
    let (commands_tx, commands_rx) = mpsc::channel(8);
    let (events_tx, events_rx) = mpsc::channel(128);
    let controller = SessionController::new(factory, events_tx);
    let updates = controller.subscribe();

    let span = tracing::info_span!("chat_session");
    let handle = tokio::spawn(run(controller, commands_rx, events_rx).instrument(span));

    (
        SessionHandle {
            commands: commands_tx,
            updates,
        },
        handle,
    )
}

async fn run(
    mut controller: SessionController,
    mut commands: mpsc::Receiver<SessionCommand>,
    mut events: mpsc::Receiver<ChannelEvent>,
) {
    info!("Chat session task started.");
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(SessionCommand::Start { query, user_id, reply }) => {
                    let _ = reply.send(controller.start(query, user_id));
                }
                None => break,
            },
            Some(event) = events.recv() => controller.handle_event(event),
        }
    }
    info!("Chat session task finished.");
}
