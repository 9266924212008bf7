//! Fuzz target for MessageStream merging
//!
//! Interleaves local sends, acknowledgements, failures, echoes, peer
//! messages and raw frames in arbitrary order.
//!
//! # Invariants
//!
//! - Messages stay sorted by (sent_at, arrival)
//! - A server id is rendered at most once
//! - Every local send is rendered exactly once until confirmed or discarded

#![no_main]

use std::collections::HashSet;

use arbitrary::Arbitrary;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use libfuzzer_sys::fuzz_target;
use medichat_core::{ConversationTarget, LocalId, MessageStream, StreamConfig};
use medichat_proto::{MessageRecord, ServerEvent, ServerMessageId};

const SELF_ID: &str = "pat";
const PEER_ID: &str = "doc";

#[derive(Debug, Clone, Arbitrary)]
enum StreamOp {
    Send { body: u8, minute: u8 },
    Ack(u8),
    Fail(u8),
    Retry(u8),
    Discard(u8),
    Echo { body: u8, id: u16, minute: u8 },
    Peer { body: u8, id: u16, minute: u8 },
    Raw(String),
}

fn at(minute: u8) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).single().unwrap_or_default()
        + TimeDelta::minutes(i64::from(minute))
}

fn record(id: u16, sender: &str, receiver: &str, body: u8, minute: u8) -> MessageRecord {
    MessageRecord {
        id: ServerMessageId::new(format!("m-{id}")),
        sender_id: sender.into(),
        receiver_id: receiver.into(),
        conversation_id: None,
        body: format!("body {body}"),
        sent_at: at(minute),
        read: false,
    }
}

fn pick(ids: &[LocalId], idx: u8) -> Option<LocalId> {
    if ids.is_empty() { None } else { Some(ids[usize::from(idx) % ids.len()]) }
}

fuzz_target!(|ops: Vec<StreamOp>| {
    let mut stream =
        MessageStream::new(ConversationTarget::new(SELF_ID, PEER_ID), StreamConfig::default());
    let mut locals: Vec<LocalId> = Vec::new();

    for op in ops {
        match op {
            StreamOp::Send { body, minute } => {
                if let Ok(out) = stream.send_local(&format!("body {body}"), at(minute)) {
                    locals.push(out.local_id);
                }
            },
            StreamOp::Ack(idx) => {
                if let Some(id) = pick(&locals, idx) {
                    let _ = stream.mark_sent(id);
                }
            },
            StreamOp::Fail(idx) => {
                if let Some(id) = pick(&locals, idx) {
                    let _ = stream.mark_failed(id);
                }
            },
            StreamOp::Retry(idx) => {
                if let Some(id) = pick(&locals, idx)
                    && let Ok(out) = stream.retry(id, at(idx))
                {
                    locals.push(out.local_id);
                }
            },
            StreamOp::Discard(idx) => {
                if let Some(id) = pick(&locals, idx) {
                    let _ = stream.discard(id);
                }
            },
            StreamOp::Echo { body, id, minute } => {
                stream.receive_inbound(record(id, SELF_ID, PEER_ID, body, minute));
            },
            StreamOp::Peer { body, id, minute } => {
                stream.receive_inbound(record(id, PEER_ID, SELF_ID, body, minute));
            },
            StreamOp::Raw(text) => {
                if let Ok(ServerEvent::NewMessage(record)) = ServerEvent::decode(&text) {
                    stream.receive_inbound(record);
                }
            },
        }

        let messages = stream.messages();
        for pair in messages.windows(2) {
            assert!(
                (pair[0].sent_at, pair[0].arrival()) <= (pair[1].sent_at, pair[1].arrival()),
                "stream out of order"
            );
        }

        let mut seen_server = HashSet::new();
        let mut seen_local = HashSet::new();
        for message in messages {
            if let Some(id) = message.server_id() {
                assert!(seen_server.insert(id.clone()), "server id {id} rendered twice");
            }
            if let Some(id) = message.local_id() {
                assert!(seen_local.insert(id), "local id {id} rendered twice");
            }
        }
    }
});
