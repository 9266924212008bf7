//! HTTP implementation of [`ChatBackend`] on `reqwest`.
//!
//! - `GET  {base}/messages/{peer_id}` returns the conversation history
//! - `POST {base}/messages/{peer_id}` with `{"message": body}` sends

use std::time::Duration;

use medichat_core::{AuthToken, ConversationTarget};
use medichat_proto::{MessageRecord, UserId};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::backend::{BackendError, ChatBackend};

/// History responses come either bare or wrapped.
#[derive(Deserialize)]
#[serde(untagged)]
enum HistoryBody {
    List(Vec<MessageRecord>),
    Wrapped { messages: Vec<MessageRecord> },
}

#[derive(Serialize)]
struct SendBody<'a> {
    message: &'a str,
}

/// REST backend over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base: Url,
}

impl HttpBackend {
    /// Backend rooted at `base`, with a per-request timeout.
    pub fn new(base: Url, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Network(e.to_string()))?;
        Ok(Self { client, base })
    }

    fn messages_url(&self, peer: &UserId) -> Result<Url, BackendError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| BackendError::Network(format!("{} cannot be a base URL", self.base)))?
            .pop_if_empty()
            .push("messages")
            .push(peer.as_str());
        Ok(url)
    }
}

fn request_error(e: reqwest::Error) -> BackendError {
    if e.is_decode() {
        BackendError::Decode(e.to_string())
    } else {
        BackendError::Network(e.to_string())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(BackendError::from_status(status.as_u16(), message))
}

impl ChatBackend for HttpBackend {
    async fn fetch_history(
        &self,
        token: &AuthToken,
        target: &ConversationTarget,
    ) -> Result<Vec<MessageRecord>, BackendError> {
        let url = self.messages_url(&target.peer_id)?;
        tracing::debug!(%url, "fetching history");

        let response = self
            .client
            .get(url)
            .bearer_auth(token.expose())
            .send()
            .await
            .map_err(request_error)?;

        let body: HistoryBody = check_status(response).await?.json().await.map_err(request_error)?;
        Ok(match body {
            HistoryBody::List(messages) | HistoryBody::Wrapped { messages } => messages,
        })
    }

    async fn send_message(
        &self,
        token: &AuthToken,
        target: &ConversationTarget,
        body: &str,
    ) -> Result<(), BackendError> {
        let url = self.messages_url(&target.peer_id)?;

        let response = self
            .client
            .post(url)
            .bearer_auth(token.expose())
            .json(&SendBody { message: body })
            .send()
            .await
            .map_err(request_error)?;

        check_status(response).await?;
        Ok(())
    }
}
