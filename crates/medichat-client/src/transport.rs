//! Live channel capability.
//!
//! The session loop only sees this trait. Commands are fire-and-forget; every
//! outcome comes back as a [`TransportEvent`] tagged with the attempt it
//! belongs to, which is how the connection manager discards events from
//! abandoned attempts.

use std::future::Future;

pub use medichat_core::TransportFailure;
use medichat_core::{AttemptId, OpenRequest};
use medichat_proto::ClientFrame;

/// Something that happened on the live channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed.
    Opened {
        /// Attempt that connected
        attempt: AttemptId,
    },

    /// Text frame received.
    Frame {
        /// Attempt the frame arrived on
        attempt: AttemptId,
        /// Raw frame text
        text: String,
    },

    /// Peer closed the channel.
    Closed {
        /// Attempt that closed
        attempt: AttemptId,
        /// Close code
        code: u16,
        /// Close reason
        reason: String,
    },

    /// Control traffic proved the channel alive (ping or pong).
    Activity {
        /// Attempt the traffic arrived on
        attempt: AttemptId,
    },

    /// Handshake or connection failed.
    Failed {
        /// Attempt that failed
        attempt: AttemptId,
        /// What went wrong
        failure: TransportFailure,
    },
}

/// Live channel transport.
///
/// Implementations hold at most one connection. `open` replaces whatever was
/// there before.
pub trait Transport: Send + 'static {
    /// Start a handshake. The outcome arrives as `Opened` or `Failed`.
    fn open(&mut self, attempt: AttemptId, request: OpenRequest);

    /// Write a frame. Dropped if `attempt` is not the open connection.
    fn send(&mut self, attempt: AttemptId, frame: ClientFrame);

    /// Release the connection for `attempt`. No event is reported for it.
    fn close(&mut self, attempt: AttemptId);

    /// Next event. `None` once the transport can produce no more events.
    fn next_event(&mut self) -> impl Future<Output = Option<TransportEvent>> + Send;
}
