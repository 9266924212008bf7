//! REST collaborator for history and sends.

use std::future::Future;

use medichat_core::{AuthToken, ConversationTarget};
use medichat_proto::MessageRecord;
use thiserror::Error;

/// Errors from the REST backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Request never got a response.
    #[error("network error: {0}")]
    Network(String),

    /// Non-success status.
    #[error("backend returned {status}: {message}")]
    Status {
        /// HTTP status
        status: u16,
        /// Response body or reason phrase
        message: String,
    },

    /// Credential rejected (401/403).
    #[error("unauthorized ({status})")]
    Unauthorized {
        /// HTTP status
        status: u16,
    },

    /// Response body did not parse.
    #[error("invalid response: {0}")]
    Decode(String),
}

impl BackendError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            401 | 403 => Self::Unauthorized { status },
            _ => Self::Status { status, message: message.into() },
        }
    }

    /// Returns true if a later retry could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Unauthorized { .. } | Self::Decode(_) => false,
        }
    }
}

/// History and send endpoints.
///
/// Calls run in spawned tasks, so implementations are cheap to clone and
/// their futures are `Send`.
pub trait ChatBackend: Clone + Send + Sync + 'static {
    /// All messages between the target's participants.
    fn fetch_history(
        &self,
        token: &AuthToken,
        target: &ConversationTarget,
    ) -> impl Future<Output = Result<Vec<MessageRecord>, BackendError>> + Send;

    /// Persist a message to the target's peer.
    fn send_message(
        &self,
        token: &AuthToken,
        target: &ConversationTarget,
        body: &str,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;
}
