//! Client configuration.

use std::time::Duration;

use medichat_core::{ConnectionConfig, StreamConfig};
use medichat_proto::ConversationId;

/// How often the session loop drives the connection timers.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Per-request timeout for the REST backend.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Configuration for a [`crate::ChatSession`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Live channel timings.
    pub connection: ConnectionConfig,
    /// Message stream limits.
    pub stream: StreamConfig,
    /// Timer resolution of the session loop.
    pub tick_interval: Duration,
    /// Per-request timeout for the REST backend.
    pub request_timeout: Duration,
    /// Backend conversation id, if the backend scopes by conversation.
    pub conversation_id: Option<ConversationId>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            stream: StreamConfig::default(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            conversation_id: None,
        }
    }
}
