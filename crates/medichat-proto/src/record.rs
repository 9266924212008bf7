//! Message records as the backend describes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ConversationId, ServerMessageId, UserId};

/// A persisted chat message.
///
/// Returned by the history endpoint and pushed on the live channel inside
/// `new_message` events. Field aliases cover the spellings the portal backend
/// has used over time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    /// Server-assigned id.
    #[serde(alias = "_id")]
    pub id: ServerMessageId,
    /// Author of the message.
    #[serde(alias = "sender")]
    pub sender_id: UserId,
    /// Other participant.
    #[serde(alias = "receiver")]
    pub receiver_id: UserId,
    /// Conversation id, when the backend scopes messages by conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    /// Text content.
    #[serde(alias = "message", alias = "text")]
    pub body: String,
    /// Server timestamp used for ordering.
    #[serde(alias = "createdAt", alias = "timestamp")]
    pub sent_at: DateTime<Utc>,
    /// Read flag. Advisory only.
    #[serde(default, alias = "isRead")]
    pub read: bool,
}

impl MessageRecord {
    /// Whether `user` is one of the two participants.
    pub fn involves(&self, user: &UserId) -> bool {
        &self.sender_id == user || &self.receiver_id == user
    }
}
