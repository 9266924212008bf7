//! Live channel lifecycle state machine.
//!
//! Owns at most one transport connection per conversation view and hides
//! reconnection from consumers. Uses the action pattern: methods take time as
//! input and return [`ConnectionAction`]s for the driver to execute. The
//! driver reports transport outcomes back, tagged with the [`AttemptId`] they
//! belong to, so late events from an abandoned attempt are ignored.
//!
//! # State Machine
//!
//! ```text
//!                    open()               transport opened
//! ┌──────────────┐ ─────────> ┌────────────┐ ──────────────> ┌───────────┐
//! │ Disconnected │            │ Connecting │                 │ Connected │
//! └──────────────┘ <───────── └────────────┘ <─────────────── └───────────┘
//!        │   ^     failure/timeout      ^      close/idle          │
//!        │   │                          │                          │
//!        │   └──────────────────────────┼──────────────────────────┘
//!        │         reconnect delay      │
//!        └──────────────────────────────┘
//!
//!  close() from any state ──> Closed (no automatic transitions out)
//! ```
//!
//! Credential rejections land in `Disconnected` with the token forgotten, so
//! no reconnect is scheduled until the caller supplies a new one.

use std::{
    ops::Sub,
    time::{Duration, Instant},
};

use medichat_proto::{ClientFrame, ServerEvent};

use crate::{
    error::{ConnectionError, TransportFailure},
    session::AuthToken,
    target::ConversationTarget,
};

/// Bounded wait for a transport handshake.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Fixed delay between an unexpected disconnect and the next attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Maximum time without inbound activity before the connection is considered
/// lost.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Interval at which heartbeats are sent while connected.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Identifies one transport attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttemptId(u64);

impl AttemptId {
    /// Numeric value. Strictly increasing per manager.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

/// What the transport needs to open the live channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    /// Credential to attach to the handshake.
    pub token: AuthToken,
    /// Conversation the view has open.
    pub target: ConversationTarget,
}

/// Actions returned by the connection state machine.
///
/// The driver executes these:
/// - `OpenTransport`: start a handshake, report the outcome with `attempt`
/// - `SendFrame`: encode and write the frame
/// - `CloseTransport`: release the transport for `attempt`
/// - `Notify`: surface a lifecycle change to the view
/// - `Deliver`: hand a parsed event to the message stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Open a transport.
    OpenTransport {
        /// Attempt the outcome must be reported for.
        attempt: AttemptId,
        /// Credential and conversation.
        request: OpenRequest,
    },

    /// Write a frame on the open transport.
    SendFrame {
        /// Attempt whose transport should carry the frame.
        attempt: AttemptId,
        /// Frame to send.
        frame: ClientFrame,
    },

    /// Release the transport.
    CloseTransport {
        /// Attempt whose transport should be released.
        attempt: AttemptId,
    },

    /// Lifecycle notification for the view.
    Notify(ConnectionNotice),

    /// Inbound event for the message stream.
    Deliver(ServerEvent),
}

/// Lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionNotice {
    /// Live channel is up.
    Connected,

    /// Live channel was lost; a reconnect is scheduled.
    Disconnected {
        /// What happened.
        reason: String,
        /// Delay before the next attempt.
        retry_in: Duration,
        /// Consecutive attempts that ended without connecting.
        failed_attempts: u32,
    },

    /// Credential rejected. Reported once; no reconnect until a new token is
    /// supplied via [`ConnectionManager::open`].
    AuthRejected {
        /// Server-provided reason.
        reason: String,
    },

    /// Torn down by [`ConnectionManager::close`].
    Closed,
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport. A reconnect may be scheduled.
    Disconnected,
    /// Handshake in flight.
    Connecting,
    /// Live channel established.
    Connected,
    /// Torn down explicitly. No automatic transitions out.
    Closed,
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Bounded wait for the handshake.
    pub open_timeout: Duration,
    /// Fixed delay before reconnecting.
    pub reconnect_delay: Duration,
    /// Silence after which a connected channel is considered lost.
    pub idle_timeout: Duration,
    /// Heartbeat interval (should be < idle_timeout / 2).
    pub heartbeat_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// Connection manager state machine.
///
/// Pure state machine - no I/O, no clock. Time is passed to every method
/// that needs it. Generic over `Instant` so simulation can use virtual time.
///
/// # Invariants
///
/// - At most one transport attempt is live at a time. Every new attempt gets
///   a fresh [`AttemptId`]; events for older attempts are ignored.
/// - In `Closed`, only an explicit [`open`](Self::open) produces actions.
/// - Without a token no attempt is ever started.
#[derive(Debug, Clone)]
pub struct ConnectionManager<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Current state
    state: ConnectionState,
    /// Configuration
    config: ConnectionConfig,
    /// Last known credential. Cleared on auth rejection.
    token: Option<AuthToken>,
    /// Conversation to open
    target: Option<ConversationTarget>,
    /// Most recent attempt
    attempt: AttemptId,
    /// Whether the transport for `attempt` still needs releasing
    transport_live: bool,
    /// When the in-flight handshake started
    attempt_started: Option<I>,
    /// When the reconnect delay started counting. `None` if no reconnect is
    /// scheduled.
    reconnect_from: Option<I>,
    /// Last inbound activity while connected
    last_activity: Option<I>,
    /// Last heartbeat sent
    last_heartbeat: Option<I>,
    /// Consecutive attempts that ended without connecting
    failed_attempts: u32,
}

impl<I> ConnectionManager<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a manager in [`ConnectionState::Disconnected`] with nothing
    /// scheduled.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            config,
            token: None,
            target: None,
            attempt: AttemptId(0),
            transport_live: false,
            attempt_started: None,
            reconnect_from: None,
            last_activity: None,
            last_heartbeat: None,
            failed_attempts: 0,
        }
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Most recent attempt id.
    #[must_use]
    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    /// Consecutive attempts that ended without connecting.
    #[must_use]
    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    /// Whether a reconnect is scheduled.
    #[must_use]
    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_from.is_some()
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Open the live channel for `target`.
    ///
    /// Idempotent: while `Connecting` or `Connected` this returns no actions.
    /// From `Disconnected` or `Closed` it starts a new attempt immediately and
    /// cancels any scheduled reconnect.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::MissingToken` if `token` is `None` or blank. No
    ///   reconnect loop is started.
    pub fn open(
        &mut self,
        token: Option<AuthToken>,
        target: ConversationTarget,
        now: I,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if matches!(self.state, ConnectionState::Connecting | ConnectionState::Connected) {
            tracing::debug!(state = ?self.state, "open ignored, attempt already in flight");
            return Ok(vec![]);
        }

        let Some(token) = token.filter(|t| !t.is_empty()) else {
            tracing::warn!("refusing to open live channel without a session token");
            return Err(ConnectionError::MissingToken);
        };

        self.token = Some(token);
        self.target = Some(target);
        self.failed_attempts = 0;
        self.reconnect_from = None;

        Ok(self.start_attempt(now))
    }

    /// Replace the credential used by the next attempt.
    pub fn replace_token(&mut self, token: AuthToken) {
        self.token = Some(token);
    }

    /// Explicit teardown.
    ///
    /// Transitions to `Closed`, cancels any scheduled reconnect and releases
    /// the transport. Calling it twice is a no-op.
    pub fn close(&mut self) -> Vec<ConnectionAction> {
        if self.state == ConnectionState::Closed {
            return vec![];
        }

        tracing::debug!(from = ?self.state, "closing live channel");

        let mut actions = Vec::new();
        if self.transport_live {
            self.transport_live = false;
            actions.push(ConnectionAction::CloseTransport { attempt: self.attempt });
        }

        self.state = ConnectionState::Closed;
        self.reconnect_from = None;
        self.attempt_started = None;
        actions.push(ConnectionAction::Notify(ConnectionNotice::Closed));
        actions
    }

    /// Transport reports a completed handshake.
    pub fn handle_transport_opened(&mut self, attempt: AttemptId, now: I) -> Vec<ConnectionAction> {
        if attempt != self.attempt || self.state != ConnectionState::Connecting {
            tracing::debug!(?attempt, state = ?self.state, "ignoring stale open");
            return vec![];
        }

        tracing::info!(attempt = attempt.get(), "live channel connected");

        self.state = ConnectionState::Connected;
        self.failed_attempts = 0;
        self.attempt_started = None;
        self.last_activity = Some(now);
        self.last_heartbeat = Some(now);

        vec![ConnectionAction::Notify(ConnectionNotice::Connected)]
    }

    /// Transport reports a failed handshake or a broken connection.
    pub fn handle_transport_failed(
        &mut self,
        attempt: AttemptId,
        failure: TransportFailure,
        now: I,
    ) -> Vec<ConnectionAction> {
        if attempt != self.attempt || !self.is_live() {
            tracing::debug!(?attempt, state = ?self.state, %failure, "ignoring stale failure");
            return vec![];
        }

        self.lose(failure, now)
    }

    /// Transport reports a close frame.
    ///
    /// Ignored in `Closed`. Otherwise the connection is lost and a reconnect
    /// is scheduled, unless the close code says the credential was rejected.
    pub fn handle_close(
        &mut self,
        attempt: AttemptId,
        code: u16,
        reason: &str,
        now: I,
    ) -> Vec<ConnectionAction> {
        if attempt != self.attempt || !self.is_live() {
            tracing::debug!(?attempt, state = ?self.state, code, "ignoring close");
            return vec![];
        }

        self.lose(TransportFailure::from_close(code, reason), now)
    }

    /// Process one inbound text frame.
    ///
    /// Malformed frames are logged and dropped; they never affect the
    /// connection. `pong` only refreshes liveness. An `error` frame with an
    /// auth status is treated as a credential rejection.
    pub fn handle_frame(&mut self, attempt: AttemptId, text: &str, now: I) -> Vec<ConnectionAction> {
        if attempt != self.attempt || self.state != ConnectionState::Connected {
            tracing::debug!(?attempt, state = ?self.state, "dropping frame for inactive attempt");
            return vec![];
        }

        self.last_activity = Some(now);

        match ServerEvent::decode(text) {
            Ok(ServerEvent::Pong) => vec![],
            Ok(ServerEvent::Error(error)) if error.is_auth_rejection() => self.lose(
                TransportFailure::Rejected { status: error.code, reason: error.message },
                now,
            ),
            Ok(ServerEvent::Unknown(kind)) => {
                tracing::debug!(%kind, "ignoring unknown event type");
                vec![]
            },
            Ok(event) => vec![ConnectionAction::Deliver(event)],
            Err(e) => {
                tracing::warn!(error = %e, len = text.len(), "dropping malformed frame");
                vec![]
            },
        }
    }

    /// Control traffic (a websocket ping or pong) arrived on `attempt`.
    ///
    /// Refreshes liveness like any frame. Servers that answer heartbeats at
    /// the protocol level never send a `pong` text frame.
    pub fn handle_activity(&mut self, attempt: AttemptId, now: I) {
        if attempt == self.attempt && self.state == ConnectionState::Connected {
            self.last_activity = Some(now);
        }
    }

    /// Drive timers.
    ///
    /// - `Connecting`: open timeout
    /// - `Connected`: idle timeout and heartbeats
    /// - `Disconnected`: due reconnect, reusing the last token
    pub fn tick(&mut self, now: I) -> Vec<ConnectionAction> {
        match self.state {
            ConnectionState::Connecting => match self.attempt_started {
                Some(started) if now - started > self.config.open_timeout => {
                    self.lose(TransportFailure::Timeout { elapsed: now - started }, now)
                },
                _ => vec![],
            },
            ConnectionState::Connected => {
                if let Some(last) = self.last_activity
                    && now - last > self.config.idle_timeout
                {
                    return self.lose(TransportFailure::Idle { elapsed: now - last }, now);
                }

                let heartbeat_due = match self.last_heartbeat {
                    None => true,
                    Some(last) => now - last >= self.config.heartbeat_interval,
                };

                if heartbeat_due {
                    self.last_heartbeat = Some(now);
                    vec![ConnectionAction::SendFrame {
                        attempt: self.attempt,
                        frame: ClientFrame::Ping,
                    }]
                } else {
                    vec![]
                }
            },
            ConnectionState::Disconnected => match self.reconnect_from {
                Some(from) if now - from >= self.config.reconnect_delay => {
                    self.reconnect_from = None;
                    tracing::debug!(failed_attempts = self.failed_attempts, "reconnecting");
                    self.start_attempt(now)
                },
                _ => vec![],
            },
            ConnectionState::Closed => vec![],
        }
    }

    fn is_live(&self) -> bool {
        matches!(self.state, ConnectionState::Connecting | ConnectionState::Connected)
    }

    /// Begin a new attempt with the stored token. No-op without one.
    fn start_attempt(&mut self, now: I) -> Vec<ConnectionAction> {
        let (Some(token), Some(target)) = (self.token.clone(), self.target.clone()) else {
            return vec![];
        };

        debug_assert!(!self.transport_live, "previous transport must be released first");

        self.attempt = AttemptId(self.attempt.0 + 1);
        self.state = ConnectionState::Connecting;
        self.transport_live = true;
        self.attempt_started = Some(now);
        self.last_activity = None;
        self.last_heartbeat = None;

        vec![ConnectionAction::OpenTransport {
            attempt: self.attempt,
            request: OpenRequest { token, target },
        }]
    }

    /// Leave `Connecting`/`Connected` because of `failure`.
    fn lose(&mut self, failure: TransportFailure, now: I) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();
        if self.transport_live {
            self.transport_live = false;
            actions.push(ConnectionAction::CloseTransport { attempt: self.attempt });
        }

        let was_connected = self.state == ConnectionState::Connected;
        self.state = ConnectionState::Disconnected;
        self.attempt_started = None;
        self.last_activity = None;
        self.last_heartbeat = None;

        if failure.is_auth_rejection() {
            tracing::warn!(%failure, "credential rejected, not reconnecting");
            self.token = None;
            self.reconnect_from = None;
            actions.push(ConnectionAction::Notify(ConnectionNotice::AuthRejected {
                reason: failure.to_string(),
            }));
            return actions;
        }

        if !was_connected {
            self.failed_attempts += 1;
        }
        self.reconnect_from = Some(now);

        tracing::info!(
            %failure,
            retry_in = ?self.config.reconnect_delay,
            failed_attempts = self.failed_attempts,
            "live channel lost"
        );

        actions.push(ConnectionAction::Notify(ConnectionNotice::Disconnected {
            reason: failure.to_string(),
            retry_in: self.config.reconnect_delay,
            failed_attempts: self.failed_attempts,
        }));
        actions
    }
}
