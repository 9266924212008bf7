//! WebSocket transport for the live channel.
//!
//! Each attempt runs in its own task that owns the socket. The task forwards
//! inbound text frames as [`TransportEvent`]s and writes whatever the session
//! loop queues for it. Releasing an attempt drops its outgoing queue, which
//! makes the task close the socket and exit without reporting anything.
//!
//! Heartbeats go out as protocol-level pings. Any compliant server answers
//! those with a pong, which comes back as [`TransportEvent::Activity`].

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use medichat_core::{AttemptId, AuthToken, OpenRequest, connection::DEFAULT_OPEN_TIMEOUT};
use medichat_proto::ClientFrame;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::tungstenite::{
    self, Message,
    client::IntoClientRequest,
    handshake::client::Request,
    http::{HeaderValue, StatusCode, header::AUTHORIZATION},
};
use url::Url;

use crate::transport::{Transport, TransportEvent, TransportFailure};

/// Close code reported when the socket ends without a close frame.
const CLOSE_ABNORMAL: u16 = 1006;

/// Close code reported for a close frame without a status.
const CLOSE_NO_STATUS: u16 = 1005;

struct Socket {
    attempt: AttemptId,
    outgoing: mpsc::UnboundedSender<Message>,
    task: JoinHandle<()>,
}

/// Live channel over `tokio-tungstenite`.
///
/// The token travels both as an `Authorization: Bearer` header and as a
/// `token` query parameter, since some deployments strip headers on upgrade.
pub struct WsTransport {
    url: Url,
    handshake_timeout: Duration,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    active: Option<Socket>,
}

impl WsTransport {
    /// Transport for the live channel at `url` (`ws://` or `wss://`).
    pub fn new(url: Url) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self { url, handshake_timeout: DEFAULT_OPEN_TIMEOUT, events_tx, events_rx, active: None }
    }

    /// Give up on a handshake that has not completed within `timeout`.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    fn endpoint(&self, token: &AuthToken) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut().append_pair("token", token.expose());
        url
    }

    fn release(&mut self) {
        if let Some(socket) = self.active.take() {
            tracing::debug!(attempt = socket.attempt.get(), "releasing socket");
            // Dropping `outgoing` makes the task close the socket
            drop(socket.outgoing);
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if let Some(socket) = self.active.take() {
            socket.task.abort();
        }
    }
}

impl Transport for WsTransport {
    fn open(&mut self, attempt: AttemptId, request: OpenRequest) {
        self.release();

        let url = self.endpoint(&request.token);
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_socket(
            attempt,
            url,
            request.token,
            self.handshake_timeout,
            outgoing_rx,
            self.events_tx.clone(),
        ));

        self.active = Some(Socket { attempt, outgoing, task });
    }

    fn send(&mut self, attempt: AttemptId, frame: ClientFrame) {
        let Some(socket) = self.active.as_ref().filter(|s| s.attempt == attempt) else {
            tracing::debug!(attempt = attempt.get(), "dropping frame for released socket");
            return;
        };

        let message = match frame {
            ClientFrame::Ping => Message::Ping(Default::default()),
        };
        let _ = socket.outgoing.send(message);
    }

    fn close(&mut self, attempt: AttemptId) {
        if self.active.as_ref().is_some_and(|s| s.attempt == attempt) {
            self.release();
        }
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events_rx.recv().await
    }
}

fn handshake_request(url: &Url, token: &AuthToken) -> Result<Request, String> {
    let mut request = url.as_str().into_client_request().map_err(|e| e.to_string())?;
    let bearer =
        HeaderValue::from_str(&format!("Bearer {}", token.expose())).map_err(|e| e.to_string())?;
    request.headers_mut().insert(AUTHORIZATION, bearer);
    Ok(request)
}

fn classify(error: tungstenite::Error) -> TransportFailure {
    match error {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                TransportFailure::Rejected {
                    status: status.as_u16(),
                    reason: status.canonical_reason().unwrap_or("rejected").to_owned(),
                }
            } else {
                TransportFailure::Network(format!("upgrade refused with HTTP {status}"))
            }
        },
        other => TransportFailure::Network(other.to_string()),
    }
}

/// Map one inbound websocket message to what the session loop sees.
fn inbound_event(attempt: AttemptId, message: Message) -> Option<TransportEvent> {
    match message {
        Message::Text(text) => Some(TransportEvent::Frame { attempt, text: text.to_string() }),
        Message::Ping(_) | Message::Pong(_) => Some(TransportEvent::Activity { attempt }),
        Message::Close(frame) => {
            let (code, reason) = frame.map_or((CLOSE_NO_STATUS, String::new()), |f| {
                (u16::from(f.code), f.reason.to_string())
            });
            Some(TransportEvent::Closed { attempt, code, reason })
        },
        Message::Binary(_) | Message::Frame(_) => None,
    }
}

async fn run_socket(
    attempt: AttemptId,
    url: Url,
    token: AuthToken,
    handshake_timeout: Duration,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let failed = |failure| TransportEvent::Failed { attempt, failure };

    let request = match handshake_request(&url, &token) {
        Ok(request) => request,
        Err(reason) => {
            let _ = events.send(failed(TransportFailure::Network(reason)));
            return;
        },
    };

    let handshake = tokio_tungstenite::connect_async(request);
    let stream = match tokio::time::timeout(handshake_timeout, handshake).await {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(e)) => {
            let _ = events.send(failed(classify(e)));
            return;
        },
        Err(_) => {
            tracing::warn!(attempt = attempt.get(), ?handshake_timeout, "handshake timed out");
            let _ = events.send(failed(TransportFailure::Timeout { elapsed: handshake_timeout }));
            return;
        },
    };

    if events.send(TransportEvent::Opened { attempt }).is_err() {
        return;
    }

    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            queued = outgoing.recv() => match queued {
                Some(message) => {
                    if let Err(e) = sink.send(message).await {
                        let _ = events.send(failed(TransportFailure::Network(e.to_string())));
                        return;
                    }
                },
                None => {
                    let _ = sink.close().await;
                    return;
                },
            },
            incoming = source.next() => match incoming {
                Some(Ok(message)) => {
                    let Some(event) = inbound_event(attempt, message) else { continue };
                    let closed = matches!(event, TransportEvent::Closed { .. });
                    let _ = events.send(event);
                    if closed {
                        return;
                    }
                },
                Some(Err(e)) => {
                    let _ = events.send(failed(TransportFailure::Network(e.to_string())));
                    return;
                },
                None => {
                    let _ = events.send(TransportEvent::Closed {
                        attempt,
                        code: CLOSE_ABNORMAL,
                        reason: "stream ended".to_owned(),
                    });
                    return;
                },
            },
        }
    }
}
