//! Streaming chat session core for the Adaptive Tutor client.
//!
//! - `protocol`: JSON frames exchanged over the chat channel.
//! - `transcript`: the append-only transcript and its pure `apply` transition.
//! - `channel`: the transport seam and its lifecycle events.
//! - `session`: the per-exchange state machine.
//! - `driver`: runs a session on its own task behind a clonable handle.

pub mod channel;
pub mod driver;
pub mod protocol;
pub mod session;
pub mod transcript;

pub use driver::{SessionHandle, spawn_session};
pub use session::{SessionController, SessionSnapshot, SessionState, StartError};
