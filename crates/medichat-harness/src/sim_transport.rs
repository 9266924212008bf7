//! Scripted live channel.
//!
//! [`SimTransport`] implements the client's [`Transport`] trait without any
//! network. Tests drive it through the paired [`SimNetwork`]: inspect the
//! attempts the session opened, then complete, fail or close them and push
//! frames, exactly as a server would.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use medichat_client::{Transport, TransportEvent, TransportFailure};
use medichat_core::{AttemptId, OpenRequest};
use medichat_proto::{ClientFrame, ServerEvent};
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct Wire {
    opens: Vec<(AttemptId, OpenRequest)>,
    sent: Vec<(AttemptId, ClientFrame)>,
    released: Vec<AttemptId>,
    auto_accept: bool,
}

/// Transport half, handed to the session.
pub struct SimTransport {
    wire: Arc<Mutex<Wire>>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Test half, kept by the test.
#[derive(Clone)]
pub struct SimNetwork {
    wire: Arc<Mutex<Wire>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

/// Create a connected transport/network pair.
///
/// With `auto_accept`, every handshake succeeds immediately.
pub fn sim_transport(auto_accept: bool) -> (SimTransport, SimNetwork) {
    let wire = Arc::new(Mutex::new(Wire { auto_accept, ..Wire::default() }));
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let network = SimNetwork { wire: Arc::clone(&wire), events: events_tx.clone() };
    (SimTransport { wire, events_tx, events_rx }, network)
}

fn lock(wire: &Mutex<Wire>) -> MutexGuard<'_, Wire> {
    wire.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Transport for SimTransport {
    fn open(&mut self, attempt: AttemptId, request: OpenRequest) {
        let mut wire = lock(&self.wire);
        tracing::trace!(attempt = attempt.get(), "sim open");
        wire.opens.push((attempt, request));
        if wire.auto_accept {
            let _ = self.events_tx.send(TransportEvent::Opened { attempt });
        }
    }

    fn send(&mut self, attempt: AttemptId, frame: ClientFrame) {
        lock(&self.wire).sent.push((attempt, frame));
    }

    fn close(&mut self, attempt: AttemptId) {
        lock(&self.wire).released.push(attempt);
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events_rx.recv().await
    }
}

impl SimNetwork {
    /// Every open request so far, oldest first.
    pub fn opens(&self) -> Vec<(AttemptId, OpenRequest)> {
        lock(&self.wire).opens.clone()
    }

    /// Number of handshakes started.
    pub fn open_count(&self) -> usize {
        lock(&self.wire).opens.len()
    }

    /// Most recent attempt, if any.
    pub fn last_attempt(&self) -> Option<AttemptId> {
        lock(&self.wire).opens.last().map(|(attempt, _)| *attempt)
    }

    /// Frames the session wrote.
    pub fn sent(&self) -> Vec<(AttemptId, ClientFrame)> {
        lock(&self.wire).sent.clone()
    }

    /// Attempts the session released.
    pub fn released(&self) -> Vec<AttemptId> {
        lock(&self.wire).released.clone()
    }

    /// Complete the handshake for `attempt`.
    pub fn accept(&self, attempt: AttemptId) {
        self.push(TransportEvent::Opened { attempt });
    }

    /// Fail `attempt`.
    pub fn fail(&self, attempt: AttemptId, failure: TransportFailure) {
        self.push(TransportEvent::Failed { attempt, failure });
    }

    /// Close `attempt` from the server side.
    pub fn close(&self, attempt: AttemptId, code: u16, reason: &str) {
        self.push(TransportEvent::Closed { attempt, code, reason: reason.to_owned() });
    }

    /// Control-level pong (or ping) from the server on `attempt`.
    pub fn activity(&self, attempt: AttemptId) {
        self.push(TransportEvent::Activity { attempt });
    }

    /// Deliver an event on `attempt`.
    pub fn deliver(&self, attempt: AttemptId, event: &ServerEvent) {
        match event.encode() {
            Ok(text) => self.deliver_raw(attempt, text),
            Err(e) => tracing::warn!(error = %e, "sim event failed to encode"),
        }
    }

    /// Deliver raw frame text on `attempt`.
    pub fn deliver_raw(&self, attempt: AttemptId, text: impl Into<String>) {
        self.push(TransportEvent::Frame { attempt, text: text.into() });
    }

    fn push(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }
}
