//! Message entity and delivery lifecycle.

use std::fmt;

use chrono::{DateTime, Utc};
use medichat_proto::{ConversationId, ServerMessageId, UserId};

/// Client-generated provisional id of an optimistic send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(pub(crate) u64);

impl LocalId {
    /// Numeric value. Unique within one stream.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local-{}", self.0)
    }
}

/// Message identity.
///
/// Provisional ids live in their own variant, so they can never collide with
/// server ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// Durable id assigned by the backend.
    Server(ServerMessageId),
    /// Provisional id of a send not yet seen on the live channel.
    Local(LocalId),
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server(id) => write!(f, "{id}"),
            Self::Local(id) => write!(f, "{id}"),
        }
    }
}

/// Delivery state of a message.
///
/// ```text
/// Pending ──ack──> Sent ──echo──> Confirmed
///    │                                ^
///    ├───────────── echo ─────────────┤
///    └──error──> Failed ──echo────────┘
/// ```
///
/// Nothing ever returns to `Pending`, and `Confirmed` is final. A `Failed`
/// send only moves on when its server copy turns up: the request errored but
/// the backend stored the message anyway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryState {
    /// Optimistic local echo, backend not yet answered.
    Pending,
    /// Backend acknowledged the send.
    Sent,
    /// Send attempt errored. Body is recoverable for retry.
    Failed,
    /// Seen through the live channel or a history fetch.
    Confirmed,
}

impl DeliveryState {
    /// Whether moving from `self` to `next` is allowed.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Sent | Self::Failed | Self::Confirmed)
                | (Self::Sent | Self::Failed, Self::Confirmed)
        )
    }

    /// Whether this message is still a local, unconfirmed entry.
    pub fn is_provisional(self) -> bool {
        matches!(self, Self::Pending | Self::Sent)
    }
}

/// A message as rendered in the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Current identity. Switches from `Local` to `Server` on reconciliation.
    pub id: MessageId,
    /// Author.
    pub sender_id: UserId,
    /// Other participant.
    pub receiver_id: UserId,
    /// Backend conversation id, if known.
    pub conversation_id: Option<ConversationId>,
    /// Text content.
    pub body: String,
    /// Ordering timestamp.
    pub sent_at: DateTime<Utc>,
    /// Delivery state.
    pub delivery: DeliveryState,
    /// Server-controlled read flag. Advisory.
    pub read: bool,
    /// Arrival sequence number, breaks `sent_at` ties.
    pub(crate) arrival: u64,
    /// Local id this message was created under, for optimistic sends.
    pub(crate) origin: Option<LocalId>,
}

impl Message {
    /// Local id of the send that created this entry, if it was a local send.
    ///
    /// Stays set after reconciliation so late acknowledgements still find the
    /// entry.
    #[must_use]
    pub fn local_id(&self) -> Option<LocalId> {
        self.origin
    }

    /// Server id, once known.
    #[must_use]
    pub fn server_id(&self) -> Option<&ServerMessageId> {
        match &self.id {
            MessageId::Server(id) => Some(id),
            MessageId::Local(_) => None,
        }
    }

    /// Arrival sequence number within the stream.
    #[must_use]
    pub fn arrival(&self) -> u64 {
        self.arrival
    }

    /// Sort key: timestamp first, arrival order on ties.
    pub(crate) fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.sent_at, self.arrival)
    }
}
