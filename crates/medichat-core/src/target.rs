//! Conversation scoping.

use medichat_proto::{ConversationId, MessageRecord, UserId};

/// The conversation a view has open.
///
/// The live channel carries events for all of the user's conversations;
/// [`ConversationTarget::matches`] decides which of them belong here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTarget {
    /// The logged-in user.
    pub self_id: UserId,
    /// The other participant.
    pub peer_id: UserId,
    /// Backend conversation id, if the backend scopes by conversation.
    pub conversation_id: Option<ConversationId>,
}

impl ConversationTarget {
    /// Conversation between `self_id` and `peer_id`.
    pub fn new(self_id: impl Into<UserId>, peer_id: impl Into<UserId>) -> Self {
        Self { self_id: self_id.into(), peer_id: peer_id.into(), conversation_id: None }
    }

    /// Scope by backend conversation id as well.
    #[must_use]
    pub fn with_conversation_id(mut self, id: impl Into<ConversationId>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    /// Whether `record` belongs to this conversation.
    ///
    /// When both sides carry a conversation id, the ids decide. Otherwise the
    /// unordered participant pair must equal `{self_id, peer_id}`.
    pub fn matches(&self, record: &MessageRecord) -> bool {
        if let (Some(ours), Some(theirs)) = (&self.conversation_id, &record.conversation_id) {
            return ours == theirs;
        }

        let outgoing = record.sender_id == self.self_id && record.receiver_id == self.peer_id;
        let incoming = record.sender_id == self.peer_id && record.receiver_id == self.self_id;
        outgoing || incoming
    }
}
