//! WebSocket Transport
//!
//! Concrete websocket implementation of the chat channel seam:
//!
//! - `endpoint`: derives the chat websocket address from the HTTP base address.
//! - `channel`: opens one `tokio-tungstenite` connection per exchange and turns
//!   its lifecycle into channel events.

mod channel;
mod endpoint;

pub use channel::{WsChannel, WsChannelFactory};
pub use endpoint::{CHAT_PATH, EndpointError, chat_endpoint};
