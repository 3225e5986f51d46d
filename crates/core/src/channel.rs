//! The seam between the session controller and a concrete duplex transport.
//!
//! A transport's lifecycle callbacks (opened, message, error, closed) are
//! turned into [`ChannelEvent`]s and pushed onto a single-consumer queue, so
//! the controller processes them one at a time on its own task. Each event
//! carries the [`ChannelId`] it came from, which lets the controller discard
//! anything produced by a channel it no longer owns.

use std::fmt;
use tokio::sync::mpsc;

/// Identity of one opened channel. Unique per controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// A lifecycle callback from a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEventKind {
    Opened,
    /// A raw text frame, not yet decoded.
    Message(String),
    /// A transport-level failure, with a human-readable detail.
    Error(String),
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEvent {
    pub channel: ChannelId,
    pub kind: ChannelEventKind,
}

impl ChannelEvent {
    pub fn new(channel: ChannelId, kind: ChannelEventKind) -> Self {
        Self { channel, kind }
    }
}

/// Raised when a frame cannot be handed to the transport.
#[derive(Debug, thiserror::Error)]
#[error("Channel {0} is no longer accepting frames")]
pub struct SendError(pub ChannelId);

/// A handle to one open (or opening) duplex channel.
#[cfg_attr(test, mockall::automock)]
pub trait Channel: Send {
    fn id(&self) -> ChannelId;

    /// Queues a text frame for delivery. Never blocks.
    fn send(&mut self, frame: String) -> Result<(), SendError>;

    /// Asks the transport to close. Events the transport emits afterwards
    /// still carry this channel's id.
    fn close(&mut self);
}

/// Opens one channel per call. No pooling and no retry.
#[cfg_attr(test, mockall::automock)]
pub trait ChannelFactory: Send + Sync {
    fn open(&self, id: ChannelId, events: mpsc::Sender<ChannelEvent>) -> Box<dyn Channel>;
}
