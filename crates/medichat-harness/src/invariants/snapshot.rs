//! Observable state snapshots for invariant checking.
//!
//! Snapshots capture what a view renders at a point in time, plus the history
//! the checks need to reason across steps (which sends were issued, which
//! delivery states each one went through).

use std::collections::HashMap;

use medichat_core::{DeliveryState, LocalId, Message, MessageStream};

/// Snapshot of the entire system state.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// Per-view state snapshots.
    pub views: Vec<ViewSnapshot>,
}

impl SystemSnapshot {
    /// Create an empty snapshot (no views).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a snapshot with a single view.
    pub fn single(view: ViewSnapshot) -> Self {
        Self { views: vec![view] }
    }
}

/// Snapshot of one conversation view.
#[derive(Debug, Clone, Default)]
pub struct ViewSnapshot {
    /// View identifier.
    pub id: u64,
    /// Rendered sequence at the last capture.
    pub messages: Vec<Message>,
    /// Local sends still expected on screen (issued, not retried away or
    /// discarded).
    pub live_sends: Vec<LocalId>,
    /// Delivery states observed per local send, in capture order.
    pub delivery_history: HashMap<LocalId, Vec<DeliveryState>>,
}

impl ViewSnapshot {
    /// Create an empty view snapshot.
    pub fn new(id: u64) -> Self {
        Self { id, ..Default::default() }
    }

    /// Record that a local send was issued.
    pub fn issued(&mut self, id: LocalId) {
        self.live_sends.push(id);
    }

    /// Record that a local send left the screen on purpose.
    pub fn removed(&mut self, id: LocalId) {
        self.live_sends.retain(|live| *live != id);
    }

    /// Capture the stream's current sequence and extend delivery history.
    pub fn capture(&mut self, stream: &MessageStream) {
        self.messages = stream.snapshot();
        for message in &self.messages {
            if let Some(local) = message.local_id() {
                let history = self.delivery_history.entry(local).or_default();
                if history.last() != Some(&message.delivery) {
                    history.push(message.delivery);
                }
            }
        }
    }
}
