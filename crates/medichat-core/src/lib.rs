//! Core state machines for a single open conversation.
//!
//! Everything here is Sans-IO: methods take the current time as a parameter
//! and return actions for a driver to execute. No sockets, no timers, no
//! tasks. That keeps the interesting behavior (reconnection, deduplication,
//! ordering) testable with plain values.
//!
//! # Components
//!
//! - [`ConnectionManager`]: lifecycle of the live channel (open, loss
//!   detection, reconnection, teardown)
//! - [`MessageStream`]: merged, ordered, deduplicated view of history, live
//!   frames and optimistic local sends
//! - [`Environment`]: time source abstraction for deterministic simulation
//! - [`SessionProvider`]: where the credential and the user's id come from

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod connection;
pub mod env;
pub mod error;
pub mod message;
pub mod session;
pub mod stream;
pub mod target;

pub use connection::{
    AttemptId, ConnectionAction, ConnectionConfig, ConnectionManager, ConnectionNotice,
    ConnectionState, OpenRequest,
};
pub use env::Environment;
pub use error::{ConnectionError, StreamError, TransportFailure};
pub use message::{DeliveryState, LocalId, Message, MessageId};
pub use session::{AuthToken, SessionInfo, SessionProvider, StaticSession};
pub use stream::{
    FailedSend, InboundOutcome, MergeSummary, MessageStream, OutboundMessage, StreamConfig,
};
pub use target::ConversationTarget;
