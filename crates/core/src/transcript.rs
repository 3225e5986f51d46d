//! Transcript Assembly
//!
//! The transcript is the ordered, append-only history of every turn across
//! all exchanges. It is an owned value threaded through [`apply`], a pure
//! transition from `(transcript, event)` to the next transcript. Turns are
//! never removed or reordered; only the trailing streaming assistant turn is
//! ever mutated, and only until it is sealed.

use crate::protocol::InboundEvent;
use serde::Serialize;
use std::fmt;

/// Sequential identifier of a turn, assigned in append order.
pub type TurnId = u64;

/// Who a turn is attributed to.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

/// Whether a turn can still grow.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    Streaming,
    Final,
}

/// One entry in the transcript.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub id: TurnId,
    pub role: Role,
    pub text: String,
    pub status: TurnStatus,
}

impl ChatTurn {
    pub fn is_streaming(&self) -> bool {
        self.status == TurnStatus::Streaming
    }

    fn is_streaming_assistant(&self) -> bool {
        self.role == Role::Assistant && self.is_streaming()
    }
}

/// Ordered history of turns.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    turns: Vec<ChatTurn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&ChatTurn> {
        self.turns.last()
    }

    /// Number of turns currently marked as streaming.
    pub fn streaming_count(&self) -> usize {
        self.turns.iter().filter(|t| t.is_streaming()).count()
    }

    /// Appends the user's query as a final turn.
    pub fn with_user_turn(self, text: impl Into<String>) -> Self {
        self.appended(Role::User, text.into(), TurnStatus::Final)
    }

    /// Appends a final system turn, used for errors and transport failures.
    pub fn with_system_turn(self, text: impl Into<String>) -> Self {
        self.appended(Role::System, text.into(), TurnStatus::Final)
    }

    /// Seals the streaming assistant turn, if any, without changing its text.
    pub fn seal_streaming(mut self) -> Self {
        for turn in self.turns.iter_mut().rev() {
            if turn.is_streaming_assistant() {
                turn.status = TurnStatus::Final;
                break;
            }
        }
        self
    }

    fn appended(mut self, role: Role, text: String, status: TurnStatus) -> Self {
        let id = self.turns.len() as TurnId;
        self.turns.push(ChatTurn {
            id,
            role,
            text,
            status,
        });
        self
    }

    fn streaming_tail_mut(&mut self) -> Option<&mut ChatTurn> {
        self.turns
            .last_mut()
            .filter(|turn| turn.is_streaming_assistant())
    }
}

/// Applies one inbound event to the transcript.
///
/// - `Token` extends the trailing streaming assistant turn, or starts one.
/// - `Done` seals the trailing streaming assistant turn, if any. An exchange
///   with no tokens therefore produces no assistant turn.
/// - `Error` appends a final system turn. An assistant turn still streaming
///   is left as it is.
pub fn apply(mut transcript: Transcript, event: &InboundEvent) -> Transcript {
    match event {
        InboundEvent::Token { text } => match transcript.streaming_tail_mut() {
            Some(turn) => {
                turn.text.push_str(text);
                transcript
            }
            None => transcript.appended(Role::Assistant, text.clone(), TurnStatus::Streaming),
        },
        InboundEvent::Done => {
            if let Some(turn) = transcript.streaming_tail_mut() {
                turn.status = TurnStatus::Final;
            }
            transcript
        }
        InboundEvent::Error { message } => transcript.with_system_turn(message.clone()),
    }
}
