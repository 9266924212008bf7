//! Session credential interface.
//!
//! The chat core never parses credentials. Whoever owns the login session
//! implements [`SessionProvider`] and hands over the user's id together with
//! an opaque token.

use std::fmt;

use medichat_proto::UserId;

/// Opaque bearer credential.
///
/// `Debug` is redacted so tokens never end up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wrap a raw token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token, for attaching to a request.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the token is blank.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(***)")
    }
}

/// Who is logged in and with which credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// The logged-in user.
    pub user_id: UserId,
    /// Credential for the live channel and REST calls.
    pub token: AuthToken,
}

/// Source of the current session.
///
/// Read-only from the chat core's point of view. Returning `None` means no
/// one is logged in, which is a fatal precondition for opening a connection.
pub trait SessionProvider: Send + Sync + 'static {
    /// Current session, if any.
    fn current(&self) -> Option<SessionInfo>;
}

/// Fixed session, for the CLI and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticSession(Option<SessionInfo>);

impl StaticSession {
    /// Session for `user_id` holding `token`.
    pub fn new(user_id: impl Into<UserId>, token: impl Into<String>) -> Self {
        Self(Some(SessionInfo { user_id: user_id.into(), token: AuthToken::new(token) }))
    }

    /// No one logged in.
    pub fn anonymous() -> Self {
        Self(None)
    }
}

impl SessionProvider for StaticSession {
    fn current(&self) -> Option<SessionInfo> {
        self.0.clone()
    }
}
