//! Error types for the chat core.
//!
//! Strongly-typed errors per concern: connection lifecycle, transport
//! failures as reported by a driver, and message stream operations. None of
//! them are allowed to escape to the view as a panic; the driver turns them
//! into notices.

use std::time::Duration;

use thiserror::Error;

use crate::message::DeliveryState;

/// WebSocket policy-violation close code, used by the backend for bad tokens.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Application close code for an expired or missing credential.
pub const CLOSE_UNAUTHORIZED: u16 = 4401;

/// Application close code for a credential without chat access.
pub const CLOSE_FORBIDDEN: u16 = 4403;

/// Errors returned by [`crate::ConnectionManager`] operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// No credential available. Fatal for this open attempt; no reconnect
    /// loop is started.
    #[error("no session token available")]
    MissingToken,
}

/// Why a transport attempt ended, as reported by the driver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    /// Network-level failure (DNS, TCP, TLS, I/O).
    #[error("network error: {0}")]
    Network(String),

    /// Handshake did not complete within the open timeout.
    #[error("open timed out after {elapsed:?}")]
    Timeout {
        /// How long we waited
        elapsed: Duration,
    },

    /// No inbound activity within the idle timeout.
    #[error("connection idle for {elapsed:?}")]
    Idle {
        /// How long the connection was silent
        elapsed: Duration,
    },

    /// Peer closed the channel.
    #[error("closed by peer ({code}): {reason}")]
    Closed {
        /// Close code
        code: u16,
        /// Close reason
        reason: String,
    },

    /// Credential was rejected (HTTP 401/403 on upgrade, auth close code, or
    /// an auth `error` frame).
    #[error("credential rejected ({status}): {reason}")]
    Rejected {
        /// HTTP status or close code
        status: u16,
        /// Server-provided reason
        reason: String,
    },
}

impl TransportFailure {
    /// Classify a close frame.
    pub fn from_close(code: u16, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        match code {
            CLOSE_POLICY_VIOLATION | CLOSE_UNAUTHORIZED | CLOSE_FORBIDDEN => {
                Self::Rejected { status: code, reason }
            },
            _ => Self::Closed { code, reason },
        }
    }

    /// Returns true if the credential was rejected.
    ///
    /// Auth rejections are fatal for the manager instance: retrying with the
    /// same token cannot succeed.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// Errors returned by [`crate::MessageStream`] operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Body is empty after trimming.
    #[error("message body is empty")]
    EmptyBody,

    /// Body exceeds the configured maximum.
    #[error("message body too long: {len} characters (max {max})")]
    BodyTooLong {
        /// Body length in characters
        len: usize,
        /// Maximum allowed characters
        max: usize,
    },

    /// No message with this local id is in the stream.
    #[error("unknown local message {0}")]
    UnknownMessage(String),

    /// Delivery state change not allowed.
    #[error("invalid delivery transition {from:?} -> {to:?}")]
    InvalidTransition {
        /// Current delivery state
        from: DeliveryState,
        /// Requested delivery state
        to: DeliveryState,
    },
}
