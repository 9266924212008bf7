//! Wire types for the medichat live channel.
//!
//! The backend speaks JSON. History responses carry [`MessageRecord`]s, the
//! live channel carries text frames that decode into [`ServerEvent`]s, and the
//! client writes [`ClientFrame`]s back (heartbeats only).
//!
//! Nothing in this crate performs I/O. Decoding is strict about size and
//! shape but lenient about field naming, because the portal backend is not
//! consistent about it (`_id` vs `id`, `message` vs `body`).

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod errors;
pub mod event;
pub mod ids;
pub mod record;

pub use errors::{ProtocolError, Result};
pub use event::{ClientFrame, ErrorPayload, MAX_FRAME_SIZE, ReadReceipt, ServerEvent};
pub use ids::{ConversationId, ServerMessageId, UserId};
pub use record::MessageRecord;
