//! Property-based tests for the message stream.
//!
//! Arbitrary interleavings of local sends, acknowledgements, failures,
//! echoes, peer messages, retries and history merges. The standard stream
//! invariants are checked after every step.

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use medichat_core::{
    ConversationTarget, DeliveryState, InboundOutcome, LocalId, MessageStream, StreamConfig,
};
use medichat_harness::{InvariantRegistry, SystemSnapshot, ViewSnapshot};
use medichat_proto::{MessageRecord, ServerMessageId};
use proptest::prelude::*;

const BODIES: [&str; 4] = ["ok", "thanks", "see you at 10", "ok"];

#[derive(Debug, Clone)]
enum Op {
    /// Send `BODIES[body]` after `advance` seconds.
    Send { body: usize, advance: i64 },
    /// Acknowledge the n-th issued send.
    Ack(usize),
    /// Fail the n-th issued send.
    Fail(usize),
    /// Echo the n-th issued send, timestamped `delay` seconds later.
    Echo { send: usize, delay: i64 },
    /// Peer message after `advance` seconds.
    Peer { body: usize, advance: i64 },
    /// Retry the n-th issued send.
    Retry(usize),
    /// Discard the n-th issued send.
    Discard(usize),
    /// Re-deliver everything echoed so far as a history page.
    Replay,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..BODIES.len(), 0i64..5).prop_map(|(body, advance)| Op::Send { body, advance }),
        3 => (0usize..8).prop_map(Op::Ack),
        2 => (0usize..8).prop_map(Op::Fail),
        4 => (0usize..8, 0i64..90).prop_map(|(send, delay)| Op::Echo { send, delay }),
        2 => (0..BODIES.len(), 0i64..5).prop_map(|(body, advance)| Op::Peer { body, advance }),
        1 => (0usize..8).prop_map(Op::Retry),
        1 => (0usize..8).prop_map(Op::Discard),
        1 => Just(Op::Replay),
    ]
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 2, 3, 14, 0, 0).unwrap()
}

fn record(id: String, sender: &str, body: &str, sent_at: DateTime<Utc>) -> MessageRecord {
    let receiver = if sender == "pat" { "doc" } else { "pat" };
    MessageRecord {
        id: ServerMessageId::new(id),
        sender_id: sender.into(),
        receiver_id: receiver.into(),
        conversation_id: None,
        body: body.into(),
        sent_at,
        read: false,
    }
}

struct Sim {
    stream: MessageStream,
    view: ViewSnapshot,
    now: DateTime<Utc>,
    /// Every local send issued, with its body and timestamp
    issued: Vec<(LocalId, String, DateTime<Utc>)>,
    echoed: Vec<MessageRecord>,
    peer_count: usize,
}

impl Sim {
    fn new() -> Self {
        Self {
            stream: MessageStream::new(
                ConversationTarget::new("pat", "doc"),
                StreamConfig::default(),
            ),
            view: ViewSnapshot::new(0),
            now: t0(),
            issued: Vec::new(),
            echoed: Vec::new(),
            peer_count: 0,
        }
    }

    fn nth(&self, n: usize) -> Option<(LocalId, String, DateTime<Utc>)> {
        if self.issued.is_empty() {
            return None;
        }
        Some(self.issued[n % self.issued.len()].clone())
    }

    fn apply(&mut self, op: &Op) {
        match *op {
            Op::Send { body, advance } => {
                self.now += TimeDelta::seconds(advance);
                let out = self.stream.send_local(BODIES[body], self.now).unwrap();
                self.view.issued(out.local_id);
                self.issued.push((out.local_id, out.body, self.now));
            },
            Op::Ack(n) => {
                if let Some((id, ..)) = self.nth(n) {
                    let _ = self.stream.mark_sent(id);
                }
            },
            Op::Fail(n) => {
                if let Some((id, ..)) = self.nth(n) {
                    let _ = self.stream.mark_failed(id);
                }
            },
            Op::Echo { send, delay } => {
                if let Some((id, body, sent_at)) = self.nth(send) {
                    let echo =
                        record(format!("srv-{id}"), "pat", &body, sent_at + TimeDelta::seconds(delay));
                    self.echoed.push(echo.clone());
                    self.stream.receive_inbound(echo);
                }
            },
            Op::Peer { body, advance } => {
                self.now += TimeDelta::seconds(advance);
                self.peer_count += 1;
                let peer = record(format!("peer-{}", self.peer_count), "doc", BODIES[body], self.now);
                self.stream.receive_inbound(peer);
            },
            Op::Retry(n) => {
                if let Some((id, ..)) = self.nth(n)
                    && let Ok(out) = self.stream.retry(id, self.now)
                {
                    self.view.removed(id);
                    self.view.issued(out.local_id);
                    self.issued.push((out.local_id, out.body, self.now));
                }
            },
            Op::Discard(n) => {
                if let Some((id, ..)) = self.nth(n)
                    && self.stream.discard(id).is_ok()
                {
                    self.view.removed(id);
                }
            },
            Op::Replay => {
                let summary = self.stream.seed(self.echoed.clone());
                assert_eq!(summary.appended + summary.reconciled, 0, "replay added entries");
            },
        }
        self.view.capture(&self.stream);
    }
}

proptest! {
    /// Stream invariants hold under arbitrary operation sequences.
    #[test]
    fn prop_stream_invariants_hold(ops in prop::collection::vec(op_strategy(), 0..60)) {
        let registry = InvariantRegistry::standard();
        let mut sim = Sim::new();

        for op in &ops {
            sim.apply(op);
            prop_assert!(
                registry.check_all(&SystemSnapshot::single(sim.view.clone())).is_ok(),
                "Invariant violated after {:?}", op
            );
        }
    }

    /// Distinct sends echoed in any order, with acks in any order, end up as
    /// exactly one confirmed entry each.
    #[test]
    fn prop_echoes_never_duplicate(
        count in 1usize..8,
        echo_order in Just((0usize..8).collect::<Vec<_>>()).prop_shuffle(),
        acks in prop::collection::vec(any::<bool>(), 8),
    ) {
        let mut stream =
            MessageStream::new(ConversationTarget::new("pat", "doc"), StreamConfig::default());
        let mut sends = Vec::new();

        for i in 0..count {
            let at = t0() + TimeDelta::seconds(i as i64);
            let out = stream.send_local(&format!("message {i}"), at).unwrap();
            if acks[i] {
                stream.mark_sent(out.local_id).unwrap();
            }
            sends.push((out, at));
        }

        for &i in echo_order.iter().filter(|&&i| i < count) {
            let (out, at) = &sends[i];
            let echo = record(format!("srv-{i}"), "pat", &out.body, *at + TimeDelta::seconds(1));
            prop_assert_eq!(stream.receive_inbound(echo), InboundOutcome::Reconciled(out.local_id));
        }

        prop_assert_eq!(stream.len(), count);
        prop_assert!(stream.messages().iter().all(|m| m.delivery == DeliveryState::Confirmed));
        prop_assert!(stream.messages().windows(2).all(|w| w[0].sent_at <= w[1].sent_at));
    }

    /// History arriving in any order is rendered sorted.
    #[test]
    fn prop_history_is_sorted(offsets in prop::collection::vec(0i64..3600, 0..40)) {
        let mut stream =
            MessageStream::new(ConversationTarget::new("pat", "doc"), StreamConfig::default());

        let history: Vec<_> = offsets
            .iter()
            .enumerate()
            .map(|(i, off)| record(format!("h{i}"), "doc", "note", t0() + TimeDelta::seconds(*off)))
            .collect();
        let summary = stream.seed(history);

        prop_assert_eq!(summary.appended, offsets.len());
        prop_assert!(stream.messages().windows(2).all(|w| w[0].sent_at <= w[1].sent_at));
    }
}
