//! Chat Session Controller
//!
//! Orchestrates one exchange at a time: it owns the current channel handle,
//! drives the session state machine from channel events, threads the
//! transcript through [`transcript::apply`](crate::transcript::apply), and
//! publishes a [`SessionSnapshot`] to subscribers after every transition.
//!
//! The controller is synchronous. Every method applies its transition
//! completely before returning, so it needs no locking as long as a single
//! task feeds it (see [`crate::driver`]).

use crate::{
    channel::{Channel, ChannelEvent, ChannelEventKind, ChannelFactory, ChannelId},
    protocol::{self, InboundEvent, OutboundRequest},
    transcript::{self, Transcript},
};
use serde::Serialize;
use std::{fmt, sync::Arc};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// System turn text for a transport error reported by the channel.
pub const CONNECTION_ERROR_TEXT: &str = "Connection error";
/// System turn text for a channel that closed without `done` or `error`.
pub const CONNECTION_CLOSED_TEXT: &str = "Connection closed before the response completed";

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    AwaitingResponse,
    Streaming,
    Closed,
    Failed,
}

impl SessionState {
    /// True while an exchange owns a channel and a new `start` must be refused.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::AwaitingResponse | SessionState::Streaming
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::AwaitingResponse => "awaiting_response",
            SessionState::Streaming => "streaming",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why a `start` request was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StartError {
    #[error("An exchange is already in progress (state: {state})")]
    Busy { state: SessionState },
    #[error("The chat session is no longer running")]
    SessionEnded,
}

/// What subscribers observe after every transition.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub transcript: Transcript,
}

pub struct SessionController {
    factory: Arc<dyn ChannelFactory>,
    events: mpsc::Sender<ChannelEvent>,
    state: SessionState,
    transcript: Transcript,
    channel: Option<Box<dyn Channel>>,
    pending: Option<OutboundRequest>,
    next_channel: u64,
    updates: watch::Sender<SessionSnapshot>,
}

impl SessionController {
    /// Creates an idle controller with an empty transcript.
    ///
    /// `events` is handed to every channel the factory opens; whoever drains
    /// the matching receiver must feed each event back into
    /// [`handle_event`](Self::handle_event).
    pub fn new(factory: Arc<dyn ChannelFactory>, events: mpsc::Sender<ChannelEvent>) -> Self {
        let (updates, _) = watch::channel(SessionSnapshot::default());
        Self {
            factory,
            events,
            state: SessionState::Idle,
            transcript: Transcript::new(),
            channel: None,
            pending: None,
            next_channel: 0,
            updates,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Id of the channel backing the current exchange, if one is open.
    pub fn channel_id(&self) -> Option<ChannelId> {
        self.channel.as_ref().map(|c| c.id())
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.updates.subscribe()
    }

    /// Begins a new exchange: records the user's turn and opens a channel.
    ///
    /// Refused without any side effect while another exchange is in flight.
    pub fn start(
        &mut self,
        query: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Result<(), StartError> {
        if self.state.is_busy() {
            warn!(state = %self.state, "Rejected start: exchange already in progress.");
            return Err(StartError::Busy { state: self.state });
        }

        let request = OutboundRequest::new(query, user_id);
        self.transcript = std::mem::take(&mut self.transcript).with_user_turn(&request.query);

        self.next_channel += 1;
        let id = ChannelId(self.next_channel);
        info!(channel = %id, user_id = %request.user_id, "Starting exchange.");
        self.pending = Some(request);
        self.channel = Some(self.factory.open(id, self.events.clone()));
        self.state = SessionState::Connecting;
        self.publish();
        Ok(())
    }

    /// Applies one channel callback. Callbacks from any channel other than
    /// the one currently owned are dropped.
    pub fn handle_event(&mut self, event: ChannelEvent) {
        if self.channel_id() != Some(event.channel) {
            debug!(channel = %event.channel, kind = ?event.kind, "Discarding event from stale channel.");
            return;
        }

        match event.kind {
            ChannelEventKind::Opened => self.on_opened(),
            ChannelEventKind::Message(raw) => match protocol::decode(&raw) {
                Ok(inbound) => self.on_inbound(inbound),
                Err(e) => warn!(error = %e, "Ignoring undecodable frame."),
            },
            ChannelEventKind::Error(detail) => {
                error!(%detail, state = %self.state, "Channel reported an error.");
                self.fail_transport(CONNECTION_ERROR_TEXT);
            }
            ChannelEventKind::Closed => {
                error!(state = %self.state, "Channel closed before a terminal frame.");
                self.fail_transport(CONNECTION_CLOSED_TEXT);
            }
        }
    }

    fn on_opened(&mut self) {
        if self.state != SessionState::Connecting {
            warn!(state = %self.state, "Ignoring duplicate open notification.");
            return;
        }
        let Some(request) = self.pending.take() else {
            return;
        };

        let sent = match protocol::encode(&request) {
            Ok(frame) => self
                .channel
                .as_mut()
                .map(|channel| channel.send(frame).map_err(|e| e.to_string())),
            Err(e) => Some(Err(e.to_string())),
        };
        match sent {
            Some(Ok(())) => {
                debug!("Request frame sent.");
                self.state = SessionState::AwaitingResponse;
                self.publish();
            }
            Some(Err(detail)) => {
                error!(%detail, "Failed to send request frame.");
                self.fail_transport(CONNECTION_ERROR_TEXT);
            }
            None => {}
        }
    }

    fn on_inbound(&mut self, event: InboundEvent) {
        if !matches!(
            self.state,
            SessionState::AwaitingResponse | SessionState::Streaming
        ) {
            warn!(state = %self.state, ?event, "Ignoring frame received before the request was sent.");
            return;
        }

        self.transcript = transcript::apply(std::mem::take(&mut self.transcript), &event);
        match event {
            InboundEvent::Token { .. } => {
                self.state = SessionState::Streaming;
                self.publish();
            }
            InboundEvent::Done => {
                info!("Exchange completed.");
                self.finish(SessionState::Closed);
            }
            InboundEvent::Error { message } => {
                warn!(%message, "Server reported an error.");
                self.finish(SessionState::Failed);
            }
        }
    }

    fn fail_transport(&mut self, text: &str) {
        self.transcript = std::mem::take(&mut self.transcript).with_system_turn(text);
        self.finish(SessionState::Failed);
    }

    /// Moves to a terminal state and releases the channel exactly once.
    fn finish(&mut self, terminal: SessionState) {
        if terminal == SessionState::Failed {
            self.transcript = std::mem::take(&mut self.transcript).seal_streaming();
        }
        if let Some(mut channel) = self.channel.take() {
            debug!(channel = %channel.id(), "Closing channel.");
            channel.close();
        }
        self.pending = None;
        self.state = terminal;
        self.publish();
    }

    fn publish(&self) {
        self.updates.send_replace(SessionSnapshot {
            state: self.state,
            transcript: self.transcript.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::{MockChannel, MockChannelFactory},
        transcript::{Role, TurnStatus},
    };
    use mockall::predicate::eq;
    use serde_json::Value;

    /// A channel that expects exactly one request frame and one close.
    fn well_behaved_channel(id: ChannelId, query: &'static str, user_id: &'static str) -> MockChannel {
        let mut channel = MockChannel::new();
        channel.expect_id().return_const(id);
        channel
            .expect_send()
            .withf(move |frame| {
                let value: Value = serde_json::from_str(frame).unwrap();
                value["query"] == query && value["user_id"] == user_id
            })
            .times(1)
            .returning(|_| Ok(()));
        channel.expect_close().times(1).return_const(());
        channel
    }

    fn controller_with(channels: Vec<MockChannel>) -> SessionController {
        let mut factory = MockChannelFactory::new();
        let mut seq = mockall::Sequence::new();
        for (i, channel) in channels.into_iter().enumerate() {
            factory
                .expect_open()
                .with(eq(ChannelId(i as u64 + 1)), mockall::predicate::always())
                .times(1)
                .in_sequence(&mut seq)
                .return_once(move |_, _| Box::new(channel) as Box<dyn Channel>);
        }
        let (events, _rx) = mpsc::channel(8);
        SessionController::new(Arc::new(factory), events)
    }

    fn message(id: u64, raw: &str) -> ChannelEvent {
        ChannelEvent::new(ChannelId(id), ChannelEventKind::Message(raw.to_string()))
    }

    fn opened(id: u64) -> ChannelEvent {
        ChannelEvent::new(ChannelId(id), ChannelEventKind::Opened)
    }

    fn assert_single_streaming(controller: &SessionController) {
        assert!(controller.transcript().streaming_count() <= 1);
    }

    #[test]
    fn test_scenario_tokens_then_done() {
        let mut controller =
            controller_with(vec![well_behaved_channel(ChannelId(1), "Explain BFS", "u1")]);
        let mut updates = controller.subscribe();

        controller.start("Explain BFS", "u1").unwrap();
        assert_eq!(controller.state(), SessionState::Connecting);
        assert_eq!(controller.transcript().len(), 1);

        controller.handle_event(opened(1));
        assert_eq!(controller.state(), SessionState::AwaitingResponse);

        for chunk in ["BFS ", "is a ", "graph"] {
            controller.handle_event(message(
                1,
                &format!(r#"{{"type":"token","text":"{chunk}"}}"#),
            ));
            assert_eq!(controller.state(), SessionState::Streaming);
            assert_single_streaming(&controller);
        }
        controller.handle_event(message(1, r#"{"type":"done"}"#));

        assert_eq!(controller.state(), SessionState::Closed);
        assert_eq!(controller.channel_id(), None);
        let turns = controller.transcript().turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[0].text, "Explain BFS");
        assert_eq!(turns[1].role, Role::Assistant);
        assert_eq!(turns[1].status, TurnStatus::Final);
        assert_eq!(turns[1].text, "BFS is a graph");

        assert!(updates.has_changed().unwrap());
        let snapshot = updates.borrow_and_update().clone();
        assert_eq!(snapshot.state, SessionState::Closed);
        assert_eq!(&snapshot.transcript, controller.transcript());
    }

    #[test]
    fn test_scenario_server_error_without_tokens() {
        let mut controller = controller_with(vec![well_behaved_channel(ChannelId(1), "x", "u1")]);

        controller.start("x", "u1").unwrap();
        controller.handle_event(opened(1));
        controller.handle_event(message(1, r#"{"type":"error","message":"rate limited"}"#));

        assert_eq!(controller.state(), SessionState::Failed);
        let turns = controller.transcript().turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].role, Role::System);
        assert_eq!(turns[1].status, TurnStatus::Final);
        assert_eq!(turns[1].text, "rate limited");
        assert!(turns.iter().all(|t| t.role != Role::Assistant));
    }

    #[test]
    fn test_scenario_abnormal_close() {
        let mut controller = controller_with(vec![well_behaved_channel(ChannelId(1), "q", "u1")]);

        controller.start("q", "u1").unwrap();
        controller.handle_event(opened(1));
        controller.handle_event(message(1, r#"{"type":"token","text":"par"}"#));
        controller.handle_event(ChannelEvent::new(ChannelId(1), ChannelEventKind::Closed));

        assert_eq!(controller.state(), SessionState::Failed);
        let turns = controller.transcript().turns();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[2].role, Role::System);
        assert_eq!(turns[2].text, CONNECTION_CLOSED_TEXT);
        assert_eq!(controller.transcript().streaming_count(), 0);

        // Late callbacks from the released channel change nothing.
        let before = controller.transcript().clone();
        controller.handle_event(ChannelEvent::new(
            ChannelId(1),
            ChannelEventKind::Error("reset".to_string()),
        ));
        controller.handle_event(message(1, r#"{"type":"token","text":"tial"}"#));
        assert_eq!(controller.transcript(), &before);
        assert_eq!(controller.state(), SessionState::Failed);
    }

    #[test]
    fn test_error_then_close_appends_one_system_turn() {
        // Fails while connecting, so the request frame is never sent.
        let mut channel = MockChannel::new();
        channel.expect_id().return_const(ChannelId(1));
        channel.expect_send().never();
        channel.expect_close().times(1).return_const(());
        let mut controller = controller_with(vec![channel]);

        controller.start("q", "u1").unwrap();
        controller.handle_event(ChannelEvent::new(
            ChannelId(1),
            ChannelEventKind::Error("connection refused".to_string()),
        ));
        controller.handle_event(ChannelEvent::new(ChannelId(1), ChannelEventKind::Closed));

        assert_eq!(controller.state(), SessionState::Failed);
        let system_turns = controller
            .transcript()
            .turns()
            .iter()
            .filter(|t| t.role == Role::System)
            .count();
        assert_eq!(system_turns, 1);
        assert_eq!(controller.transcript().last().unwrap().text, CONNECTION_ERROR_TEXT);
    }

    #[test]
    fn test_scenario_malformed_frame_is_ignored() {
        let mut controller = controller_with(vec![well_behaved_channel(ChannelId(1), "q", "u1")]);

        controller.start("q", "u1").unwrap();
        controller.handle_event(opened(1));
        controller.handle_event(message(1, r#"{"type":"token","text":"a"}"#));
        let before = controller.transcript().clone();

        controller.handle_event(message(1, "not-json"));
        assert_eq!(controller.transcript(), &before);
        assert_eq!(controller.state(), SessionState::Streaming);

        controller.handle_event(message(1, r#"{"type":"token","text":"b"}"#));
        controller.handle_event(message(1, r#"{"type":"done"}"#));
        assert_eq!(controller.transcript().last().unwrap().text, "ab");
    }

    #[test]
    fn test_start_while_busy_is_rejected() {
        let mut controller = controller_with(vec![well_behaved_channel(ChannelId(1), "q", "u1")]);

        controller.start("q", "u1").unwrap();
        let check_rejected = |controller: &mut SessionController| {
            let state = controller.state();
            let before = controller.transcript().clone();
            assert_eq!(
                controller.start("again", "u1"),
                Err(StartError::Busy { state })
            );
            assert_eq!(controller.state(), state);
            assert_eq!(controller.transcript(), &before);
        };

        check_rejected(&mut controller);
        controller.handle_event(opened(1));
        check_rejected(&mut controller);
        controller.handle_event(message(1, r#"{"type":"token","text":"t"}"#));
        check_rejected(&mut controller);
        controller.handle_event(message(1, r#"{"type":"done"}"#));
        assert_eq!(controller.state(), SessionState::Closed);
    }

    #[test]
    fn test_done_without_tokens_closes_without_assistant_turn() {
        let mut controller = controller_with(vec![well_behaved_channel(ChannelId(1), "q", "u1")]);

        controller.start("q", "u1").unwrap();
        controller.handle_event(opened(1));
        controller.handle_event(message(1, r#"{"type":"done"}"#));

        assert_eq!(controller.state(), SessionState::Closed);
        assert_eq!(controller.transcript().len(), 1);
    }

    #[test]
    fn test_new_exchange_uses_fresh_channel_and_drops_stale_events() {
        let mut controller = controller_with(vec![
            well_behaved_channel(ChannelId(1), "first", "u1"),
            well_behaved_channel(ChannelId(2), "second", "u1"),
        ]);

        controller.start("first", "u1").unwrap();
        controller.handle_event(opened(1));
        controller.handle_event(message(1, r#"{"type":"error"}"#));
        assert_eq!(controller.state(), SessionState::Failed);

        controller.start("second", "u1").unwrap();
        assert_eq!(controller.channel_id(), Some(ChannelId(2)));

        // The first channel's straggling frames must not leak into this exchange.
        controller.handle_event(message(1, r#"{"type":"token","text":"stale"}"#));
        controller.handle_event(ChannelEvent::new(ChannelId(1), ChannelEventKind::Closed));
        assert_eq!(controller.state(), SessionState::Connecting);

        controller.handle_event(opened(2));
        controller.handle_event(message(2, r#"{"type":"token","text":"fresh"}"#));
        controller.handle_event(message(2, r#"{"type":"done"}"#));

        let texts: Vec<&str> = controller
            .transcript()
            .turns()
            .iter()
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(
            texts,
            vec!["first", crate::protocol::DEFAULT_ERROR_MESSAGE, "second", "fresh"]
        );
        assert_eq!(controller.state(), SessionState::Closed);
    }

    #[test]
    fn test_failed_exchange_seals_partial_answer() {
        let mut controller = controller_with(vec![
            well_behaved_channel(ChannelId(1), "q1", "u1"),
            well_behaved_channel(ChannelId(2), "q2", "u1"),
        ]);

        controller.start("q1", "u1").unwrap();
        controller.handle_event(opened(1));
        controller.handle_event(message(1, r#"{"type":"token","text":"half"}"#));
        controller.handle_event(message(1, r#"{"type":"error","message":"boom"}"#));
        assert_eq!(controller.transcript().streaming_count(), 0);
        assert_eq!(controller.transcript().turns()[1].text, "half");

        controller.start("q2", "u1").unwrap();
        controller.handle_event(opened(2));
        controller.handle_event(message(2, r#"{"type":"token","text":"next"}"#));
        assert_single_streaming(&controller);
        controller.handle_event(message(2, r#"{"type":"done"}"#));
    }

    #[test]
    fn test_error_frame_with_non_string_message_ends_exchange() {
        let mut controller = controller_with(vec![well_behaved_channel(ChannelId(1), "q", "u1")]);

        controller.start("q", "u1").unwrap();
        controller.handle_event(opened(1));
        controller.handle_event(message(1, r#"{"type":"error","message":7}"#));

        assert_eq!(controller.state(), SessionState::Failed);
        assert_eq!(controller.channel_id(), None);
        let last = controller.transcript().last().unwrap();
        assert_eq!(last.role, Role::System);
        assert_eq!(last.text, crate::protocol::DEFAULT_ERROR_MESSAGE);
    }

    #[test]
    fn test_channel_error_while_streaming_fails_exchange() {
        let mut controller = controller_with(vec![well_behaved_channel(ChannelId(1), "q", "u1")]);

        controller.start("q", "u1").unwrap();
        controller.handle_event(opened(1));
        controller.handle_event(message(1, r#"{"type":"token","text":"half"}"#));
        assert_eq!(controller.state(), SessionState::Streaming);

        controller.handle_event(ChannelEvent::new(
            ChannelId(1),
            ChannelEventKind::Error("connection reset".to_string()),
        ));
        controller.handle_event(ChannelEvent::new(ChannelId(1), ChannelEventKind::Closed));

        assert_eq!(controller.state(), SessionState::Failed);
        let turns = controller.transcript().turns();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[1].role, Role::Assistant);
        assert_eq!(turns[1].text, "half");
        assert_eq!(turns[1].status, TurnStatus::Final);
        let system: Vec<&str> = turns
            .iter()
            .filter(|t| t.role == Role::System)
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(system, vec![CONNECTION_ERROR_TEXT]);
        assert_eq!(controller.transcript().streaming_count(), 0);
    }

    #[test]
    fn test_tokens_before_open_are_ignored() {
        let mut controller = controller_with(vec![well_behaved_channel(ChannelId(1), "q", "u1")]);

        controller.start("q", "u1").unwrap();
        controller.handle_event(message(1, r#"{"type":"token","text":"early"}"#));
        assert_eq!(controller.state(), SessionState::Connecting);
        assert_eq!(controller.transcript().len(), 1);

        controller.handle_event(opened(1));
        controller.handle_event(message(1, r#"{"type":"done"}"#));
    }

    #[test]
    fn test_send_failure_fails_exchange() {
        let mut channel = MockChannel::new();
        channel.expect_id().return_const(ChannelId(1));
        channel
            .expect_send()
            .times(1)
            .returning(|_| Err(crate::channel::SendError(ChannelId(1))));
        channel.expect_close().times(1).return_const(());
        let mut controller = controller_with(vec![channel]);

        controller.start("q", "u1").unwrap();
        controller.handle_event(opened(1));

        assert_eq!(controller.state(), SessionState::Failed);
        assert_eq!(
            controller.transcript().last().unwrap().text,
            CONNECTION_ERROR_TEXT
        );
    }

    #[test]
    fn test_state_helpers() {
        assert!(SessionState::Streaming.is_busy());
        assert!(!SessionState::Closed.is_busy());
        assert!(SessionState::Failed.is_terminal());
        assert!(!SessionState::Idle.is_terminal());
        assert_eq!(SessionState::AwaitingResponse.to_string(), "awaiting_response");
        assert_eq!(
            StartError::Busy {
                state: SessionState::Streaming
            }
            .to_string(),
            "An exchange is already in progress (state: streaming)"
        );
    }
}
