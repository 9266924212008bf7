//! Merged message sequence for one conversation.
//!
//! Three sources feed the same list: the history fetch, live `new_message`
//! events and optimistic local sends. The stream keeps one entry per logical
//! message, ordered by `sent_at` with arrival order breaking ties.
//!
//! # Reconciliation
//!
//! Local sends are rendered immediately as `Pending` with a [`LocalId`]. The
//! backend never echoes that id back, so an inbound record is matched to a
//! local entry by correlation key: same sender, same body, and timestamps
//! within [`StreamConfig::correlation_window`]. The oldest matching local
//! entry wins. Two identical bodies sent within the window can therefore be
//! matched to each other's echo; both still end up rendered exactly once.
//!
//! `Failed` entries are candidates too. A send whose request timed out may
//! still have been stored, and its copy must replace the failed entry rather
//! than render next to it.

use std::{collections::HashSet, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use medichat_proto::{MessageRecord, ServerMessageId};

use crate::{
    error::StreamError,
    message::{DeliveryState, LocalId, Message, MessageId},
    target::ConversationTarget,
};

/// Maximum message body length in characters.
pub const MAX_BODY_CHARS: usize = 2000;

/// How far apart a local send and its echo may be timestamped.
pub const DEFAULT_CORRELATION_WINDOW: Duration = Duration::from_secs(60);

/// Stream configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Correlation window for matching echoes to local sends.
    pub correlation_window: Duration,
    /// Maximum body length in characters.
    pub max_body_chars: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { correlation_window: DEFAULT_CORRELATION_WINDOW, max_body_chars: MAX_BODY_CHARS }
    }
}

/// What happened to an inbound record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Belongs to another conversation.
    Ignored,
    /// Server id already present.
    Duplicate,
    /// Upgraded the local entry created under this id.
    Reconciled(LocalId),
    /// Upgraded a failed local entry. Any retry offer for it is void.
    Recovered(LocalId),
    /// Inserted as a new entry.
    Appended,
}

/// Tally of a history merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// New entries inserted
    pub appended: usize,
    /// Local entries confirmed by history
    pub reconciled: usize,
    /// Failed sends the history showed were stored after all
    pub recovered: Vec<LocalId>,
    /// Records already present
    pub duplicates: usize,
    /// Records for other conversations
    pub ignored: usize,
}

/// A send the driver must hand to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Provisional id of the rendered entry.
    pub local_id: LocalId,
    /// Trimmed body.
    pub body: String,
}

/// A send that failed. Carries the body so the view can offer a retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedSend {
    /// Provisional id of the failed entry.
    pub local_id: LocalId,
    /// Original body.
    pub body: String,
}

/// Ordered, deduplicated messages of one conversation.
#[derive(Debug, Clone)]
pub struct MessageStream {
    target: ConversationTarget,
    config: StreamConfig,
    /// Sorted by `(sent_at, arrival)`
    messages: Vec<Message>,
    /// Server ids present in `messages`
    server_ids: HashSet<ServerMessageId>,
    next_arrival: u64,
    next_local: u64,
    history_error: Option<String>,
}

impl MessageStream {
    /// Empty stream for `target`.
    pub fn new(target: ConversationTarget, config: StreamConfig) -> Self {
        Self {
            target,
            config,
            messages: Vec::new(),
            server_ids: HashSet::new(),
            next_arrival: 0,
            next_local: 1,
            history_error: None,
        }
    }

    /// Conversation this stream belongs to.
    pub fn target(&self) -> &ConversationTarget {
        &self.target
    }

    /// Messages in display order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Owned copy of the sequence, for publishing to a view.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// Number of rendered messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether nothing is rendered.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Message currently rendered under `id`.
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Message created by the local send `id`, reconciled or not.
    pub fn get_local(&self, id: LocalId) -> Option<&Message> {
        self.messages.iter().find(|m| m.origin == Some(id))
    }

    /// Last history failure, cleared by a successful [`seed`](Self::seed).
    pub fn history_error(&self) -> Option<&str> {
        self.history_error.as_deref()
    }

    /// Record that the history fetch failed. The sequence is left as is.
    pub fn history_failed(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(%reason, "history fetch failed");
        self.history_error = Some(reason);
    }

    /// Merge a history page.
    ///
    /// Records go through the same path as live events, so a history copy of
    /// a pending local send reconciles it.
    pub fn seed(&mut self, history: impl IntoIterator<Item = MessageRecord>) -> MergeSummary {
        let mut summary = MergeSummary::default();
        for record in history {
            match self.receive_inbound(record) {
                InboundOutcome::Ignored => summary.ignored += 1,
                InboundOutcome::Duplicate => summary.duplicates += 1,
                InboundOutcome::Reconciled(_) => summary.reconciled += 1,
                InboundOutcome::Recovered(local) => {
                    summary.reconciled += 1;
                    summary.recovered.push(local);
                },
                InboundOutcome::Appended => summary.appended += 1,
            }
        }

        self.history_error = None;
        tracing::debug!(?summary, total = self.messages.len(), "history merged");
        summary
    }

    /// Merge one server-confirmed record.
    pub fn receive_inbound(&mut self, record: MessageRecord) -> InboundOutcome {
        if !self.target.matches(&record) {
            return InboundOutcome::Ignored;
        }

        if self.server_ids.contains(&record.id) {
            return InboundOutcome::Duplicate;
        }

        if let Some(idx) = self.correlate(&record) {
            let mut message = self.messages.remove(idx);
            let local = message.origin;
            let was_failed = message.delivery == DeliveryState::Failed;

            self.server_ids.insert(record.id.clone());
            message.id = MessageId::Server(record.id);
            message.sent_at = record.sent_at;
            message.delivery = DeliveryState::Confirmed;
            message.read = record.read;
            if record.conversation_id.is_some() {
                message.conversation_id = record.conversation_id;
            }
            self.insert(message);

            match local {
                Some(local) if was_failed => {
                    tracing::info!(%local, "failed send was stored, confirming");
                    return InboundOutcome::Recovered(local);
                },
                Some(local) => {
                    tracing::debug!(%local, "local send confirmed");
                    return InboundOutcome::Reconciled(local);
                },
                None => {},
            }
            return InboundOutcome::Appended;
        }

        self.server_ids.insert(record.id.clone());
        let arrival = self.next_arrival();
        self.insert(Message {
            id: MessageId::Server(record.id),
            sender_id: record.sender_id,
            receiver_id: record.receiver_id,
            conversation_id: record.conversation_id,
            body: record.body,
            sent_at: record.sent_at,
            delivery: DeliveryState::Confirmed,
            read: record.read,
            arrival,
            origin: None,
        });
        InboundOutcome::Appended
    }

    /// Render an optimistic send.
    ///
    /// The body is trimmed and validated, then appended as `Pending` under a
    /// fresh [`LocalId`].
    pub fn send_local(
        &mut self,
        body: &str,
        now: DateTime<Utc>,
    ) -> Result<OutboundMessage, StreamError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(StreamError::EmptyBody);
        }

        let len = body.chars().count();
        if len > self.config.max_body_chars {
            return Err(StreamError::BodyTooLong { len, max: self.config.max_body_chars });
        }

        let local_id = LocalId(self.next_local);
        self.next_local += 1;

        let arrival = self.next_arrival();
        self.insert(Message {
            id: MessageId::Local(local_id),
            sender_id: self.target.self_id.clone(),
            receiver_id: self.target.peer_id.clone(),
            conversation_id: self.target.conversation_id.clone(),
            body: body.to_owned(),
            sent_at: now,
            delivery: DeliveryState::Pending,
            read: false,
            arrival,
            origin: Some(local_id),
        });

        Ok(OutboundMessage { local_id, body: body.to_owned() })
    }

    /// Backend acknowledged the send.
    ///
    /// A no-op if the echo already confirmed it.
    pub fn mark_sent(&mut self, id: LocalId) -> Result<(), StreamError> {
        let idx = self.position_local(id)?;
        let message = &mut self.messages[idx];

        match message.delivery {
            DeliveryState::Sent | DeliveryState::Confirmed => Ok(()),
            from => {
                transition(from, DeliveryState::Sent)?;
                message.delivery = DeliveryState::Sent;
                Ok(())
            },
        }
    }

    /// Backend rejected the send.
    ///
    /// Returns the body for a retry, or `None` if the entry was already
    /// confirmed or already failed.
    pub fn mark_failed(&mut self, id: LocalId) -> Result<Option<FailedSend>, StreamError> {
        let idx = self.position_local(id)?;
        let message = &mut self.messages[idx];

        match message.delivery {
            DeliveryState::Confirmed | DeliveryState::Failed => Ok(None),
            from => {
                transition(from, DeliveryState::Failed)?;
                message.delivery = DeliveryState::Failed;
                tracing::info!(%id, "send failed");
                Ok(Some(FailedSend { local_id: id, body: message.body.clone() }))
            },
        }
    }

    /// Replace a failed entry with a fresh pending send of the same body.
    pub fn retry(
        &mut self,
        id: LocalId,
        now: DateTime<Utc>,
    ) -> Result<OutboundMessage, StreamError> {
        let body = self.take_failed(id, DeliveryState::Pending)?;
        self.send_local(&body, now)
    }

    /// Remove a failed entry, returning its body.
    pub fn discard(&mut self, id: LocalId) -> Result<String, StreamError> {
        self.take_failed(id, DeliveryState::Failed)
    }

    /// Set the advisory read flag. Returns whether a message was found.
    pub fn mark_read(&mut self, id: &ServerMessageId) -> bool {
        if !self.server_ids.contains(id) {
            return false;
        }

        let target = MessageId::Server(id.clone());
        match self.messages.iter_mut().find(|m| m.id == target) {
            Some(message) => {
                message.read = true;
                true
            },
            None => false,
        }
    }

    /// Oldest unconfirmed local entry, failed ones included, the record
    /// could be the echo of.
    fn correlate(&self, record: &MessageRecord) -> Option<usize> {
        let window = TimeDelta::from_std(self.config.correlation_window).unwrap_or(TimeDelta::MAX);
        let body = record.body.trim();

        self.messages
            .iter()
            .enumerate()
            .filter(|(_, m)| {
                m.origin.is_some()
                    && (m.delivery.is_provisional() || m.delivery == DeliveryState::Failed)
                    && m.sender_id == record.sender_id
                    && m.body == body
                    && abs_delta(m.sent_at, record.sent_at) <= window
            })
            .min_by_key(|(_, m)| m.arrival)
            .map(|(idx, _)| idx)
    }

    fn take_failed(&mut self, id: LocalId, to: DeliveryState) -> Result<String, StreamError> {
        let idx = self.position_local(id)?;
        let from = self.messages[idx].delivery;
        if from != DeliveryState::Failed {
            return Err(StreamError::InvalidTransition { from, to });
        }

        Ok(self.messages.remove(idx).body)
    }

    fn position_local(&self, id: LocalId) -> Result<usize, StreamError> {
        self.messages
            .iter()
            .position(|m| m.origin == Some(id))
            .ok_or_else(|| StreamError::UnknownMessage(id.to_string()))
    }

    /// Insert keeping `(sent_at, arrival)` order.
    fn insert(&mut self, message: Message) {
        let key = message.order_key();
        let pos = self.messages.partition_point(|m| m.order_key() <= key);
        self.messages.insert(pos, message);
    }

    fn next_arrival(&mut self) -> u64 {
        let arrival = self.next_arrival;
        self.next_arrival += 1;
        arrival
    }
}

fn transition(from: DeliveryState, to: DeliveryState) -> Result<(), StreamError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(StreamError::InvalidTransition { from, to })
    }
}

fn abs_delta(a: DateTime<Utc>, b: DateTime<Utc>) -> TimeDelta {
    if a >= b { a - b } else { b - a }
}
