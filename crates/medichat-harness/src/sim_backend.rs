//! Scripted REST backend.
//!
//! Responses are queued up front and served in order; with nothing queued,
//! history is empty and sends succeed. An optional latency is applied with
//! `tokio::time::sleep`, which paused-time tests skip through instantly.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use medichat_client::{BackendError, ChatBackend};
use medichat_core::{AuthToken, ConversationTarget};
use medichat_proto::MessageRecord;

#[derive(Debug, Default)]
struct Script {
    history: VecDeque<Result<Vec<MessageRecord>, BackendError>>,
    sends: VecDeque<Result<(), BackendError>>,
    latency: Duration,
    history_calls: usize,
    sent: Vec<SentRequest>,
}

/// A send the backend received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRequest {
    /// Raw token presented
    pub token: String,
    /// Conversation peer
    pub peer_id: String,
    /// Message body
    pub body: String,
}

/// Scripted backend. Clones share the script.
#[derive(Debug, Clone, Default)]
pub struct SimBackend {
    script: Arc<Mutex<Script>>,
}

impl SimBackend {
    /// Backend with empty history and succeeding sends.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every response by `latency`.
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        self.lock().latency = latency;
        self
    }

    /// Queue the result of the next history fetch.
    pub fn push_history(&self, result: Result<Vec<MessageRecord>, BackendError>) {
        self.lock().history.push_back(result);
    }

    /// Queue the result of the next send.
    pub fn push_send(&self, result: Result<(), BackendError>) {
        self.lock().sends.push_back(result);
    }

    /// Number of history fetches served.
    pub fn history_calls(&self) -> usize {
        self.lock().history_calls
    }

    /// Sends received so far.
    pub fn sent(&self) -> Vec<SentRequest> {
        self.lock().sent.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ChatBackend for SimBackend {
    async fn fetch_history(
        &self,
        _token: &AuthToken,
        _target: &ConversationTarget,
    ) -> Result<Vec<MessageRecord>, BackendError> {
        let (latency, result) = {
            let mut script = self.lock();
            script.history_calls += 1;
            (script.latency, script.history.pop_front().unwrap_or(Ok(Vec::new())))
        };

        tokio::time::sleep(latency).await;
        result
    }

    async fn send_message(
        &self,
        token: &AuthToken,
        target: &ConversationTarget,
        body: &str,
    ) -> Result<(), BackendError> {
        let (latency, result) = {
            let mut script = self.lock();
            script.sent.push(SentRequest {
                token: token.expose().to_owned(),
                peer_id: target.peer_id.to_string(),
                body: body.to_owned(),
            });
            (script.latency, script.sends.pop_front().unwrap_or(Ok(())))
        };

        tokio::time::sleep(latency).await;
        result
    }
}
