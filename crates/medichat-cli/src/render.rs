//! Plain-text rendering of a conversation view.
//!
//! The shell is append-only: [`Transcript::update`] returns the lines for
//! whatever changed since the last view, so a message shows up again when its
//! delivery state moves.

use std::collections::HashMap;

use medichat_client::{ChatNotice, ChatView};
use medichat_core::{ConnectionNotice, ConnectionState, DeliveryState, LocalId, Message};
use medichat_proto::{ServerMessageId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Key {
    Local(LocalId),
    Server(ServerMessageId),
}

fn key(message: &Message) -> Option<Key> {
    message
        .local_id()
        .map(Key::Local)
        .or_else(|| message.server_id().cloned().map(Key::Server))
}

/// Tracks what has been printed.
#[derive(Debug, Default)]
pub struct Transcript {
    seen: HashMap<Key, (DeliveryState, bool)>,
    connection: Option<ConnectionState>,
    history_error: Option<String>,
}

impl Transcript {
    /// Lines describing what changed since the previous call.
    pub fn update(&mut self, view: &ChatView) -> Vec<String> {
        let mut lines = Vec::new();

        if self.connection != Some(view.connection) {
            self.connection = Some(view.connection);
            lines.push(connection_line(view.connection));
        }

        if view.history_error != self.history_error {
            if let Some(reason) = &view.history_error {
                lines.push(format!("-- history unavailable: {reason} --"));
            }
            self.history_error.clone_from(&view.history_error);
        }

        for message in &view.messages {
            let Some(key) = key(message) else { continue };
            let state = (message.delivery, message.read);
            if self.seen.get(&key) != Some(&state) {
                self.seen.insert(key, state);
                lines.push(message_line(message, &view.target.self_id));
            }
        }

        lines
    }
}

/// One message as a line.
pub fn message_line(message: &Message, self_id: &UserId) -> String {
    let mine = &message.sender_id == self_id;
    let who = if mine { "you" } else { message.sender_id.as_str() };
    let status = match message.delivery {
        DeliveryState::Pending => " [sending]",
        DeliveryState::Sent => " [sent]",
        DeliveryState::Failed => " [failed: /retry or /discard]",
        DeliveryState::Confirmed if mine && message.read => " [read]",
        DeliveryState::Confirmed => "",
    };

    format!("{} {who}: {}{status}", message.sent_at.format("%H:%M"), message.body)
}

fn connection_line(state: ConnectionState) -> String {
    let label = match state {
        ConnectionState::Disconnected => "offline",
        ConnectionState::Connecting => "connecting",
        ConnectionState::Connected => "live",
        ConnectionState::Closed => "closed",
    };
    format!("-- {label} --")
}

/// Line for a notice, if it adds anything the view does not show.
pub fn notice_line(notice: &ChatNotice) -> Option<String> {
    match notice {
        ChatNotice::AuthRejected { reason } => {
            Some(format!("!! session rejected ({reason}), log in again then /reconnect"))
        },
        ChatNotice::SendFailed(failed) => Some(format!("!! could not send \"{}\"", failed.body)),
        ChatNotice::Connection(ConnectionNotice::Disconnected {
            reason,
            retry_in,
            failed_attempts,
        }) => Some(format!(
            "-- {reason}, retrying in {}s (attempt {}) --",
            retry_in.as_secs(),
            failed_attempts + 1
        )),
        ChatNotice::Connection(_)
        | ChatNotice::HistoryFailed { .. }
        | ChatNotice::SendRecovered { .. } => None,
    }
}
