//! Session runtime tests.
//!
//! Every test runs one conversation view against the simulated transport and
//! backend under paused tokio time. `settle` lets all spawned work run before
//! the assertions.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use medichat_client::{
    BackendError, ChatError, ChatHandle, ChatNotice, ChatSession, ClientConfig,
};
use medichat_core::{
    ConnectionNotice, ConnectionState, DeliveryState, FailedSend, StaticSession,
};
use medichat_harness::{SimBackend, SimEnv, SimNetwork, sim_transport};
use medichat_proto::{ClientFrame, MessageRecord, ReadReceipt, ServerEvent, ServerMessageId};

const SELF_ID: &str = "pat-42";
const PEER_ID: &str = "doc-7";

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

fn record(id: &str, sender: &str, receiver: &str, body: &str, at: DateTime<Utc>) -> MessageRecord {
    MessageRecord {
        id: ServerMessageId::new(id),
        sender_id: sender.into(),
        receiver_id: receiver.into(),
        conversation_id: None,
        body: body.into(),
        sent_at: at,
        read: false,
    }
}

fn drain(handle: &mut ChatHandle) -> Vec<ChatNotice> {
    std::iter::from_fn(|| handle.try_notice()).collect()
}

struct Fixture {
    env: SimEnv,
    network: SimNetwork,
    backend: SimBackend,
    handle: ChatHandle,
}

fn open_with(backend: SimBackend, auto_accept: bool) -> Fixture {
    let env = SimEnv::new();
    let (transport, network) = sim_transport(auto_accept);
    let session = Arc::new(StaticSession::new(SELF_ID, "tok-1"));
    let handle =
        ChatSession::new(env.clone(), transport, backend.clone(), session, ClientConfig::default())
            .open(PEER_ID)
            .unwrap();

    Fixture { env, network, backend, handle }
}

#[tokio::test(start_paused = true)]
async fn opening_connects_and_loads_history() {
    let backend = SimBackend::new();
    let t0 = SimEnv::new().epoch();
    backend.push_history(Ok(vec![
        record("m-2", SELF_ID, PEER_ID, "Thank you", t0 - TimeDelta::minutes(1)),
        record("m-1", PEER_ID, SELF_ID, "Your results are in", t0 - TimeDelta::minutes(5)),
    ]));

    let mut fx = open_with(backend, true);
    settle().await;

    let view = fx.handle.view();
    assert_eq!(view.connection, ConnectionState::Connected);
    let bodies: Vec<_> = view.messages.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, ["Your results are in", "Thank you"]);

    assert_eq!(fx.network.open_count(), 1);
    assert_eq!(fx.backend.history_calls(), 1);
    assert_eq!(fx.network.opens()[0].1.token.expose(), "tok-1");
    assert_eq!(drain(&mut fx.handle), [ChatNotice::Connection(ConnectionNotice::Connected)]);

    fx.handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn send_renders_at_once_and_confirms_on_echo() {
    let mut fx = open_with(SimBackend::new().with_latency(Duration::from_secs(1)), true);
    settle().await;

    let id = fx.handle.send("I have a headache").await.unwrap();
    let view = fx.handle.view();
    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.messages[0].local_id(), Some(id));
    assert_eq!(view.messages[0].delivery, DeliveryState::Pending);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(fx.handle.view().messages[0].delivery, DeliveryState::Sent);

    let sent = fx.backend.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].body, "I have a headache");
    assert_eq!(sent[0].token, "tok-1");
    assert_eq!(sent[0].peer_id, PEER_ID);

    let attempt = fx.network.last_attempt().unwrap();
    let echo = record("m-9", SELF_ID, PEER_ID, "I have a headache", fx.env.epoch());
    fx.network.deliver(attempt, &ServerEvent::NewMessage(echo));
    settle().await;

    let view = fx.handle.view();
    assert_eq!(view.messages.len(), 1, "echo must not render twice");
    assert_eq!(view.messages[0].delivery, DeliveryState::Confirmed);
    assert_eq!(view.messages[0].server_id(), Some(&ServerMessageId::new("m-9")));

    fx.handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn echo_before_ack_still_confirms_once() {
    let mut fx = open_with(SimBackend::new().with_latency(Duration::from_secs(1)), true);
    settle().await;

    fx.handle.send("See you Tuesday").await.unwrap();
    let attempt = fx.network.last_attempt().unwrap();
    let echo = record("m-3", SELF_ID, PEER_ID, "See you Tuesday", fx.env.epoch());
    fx.network.deliver(attempt, &ServerEvent::NewMessage(echo));
    settle().await;

    assert_eq!(fx.handle.view().messages[0].delivery, DeliveryState::Confirmed);

    // Late acknowledgement leaves the confirmed entry alone
    tokio::time::sleep(Duration::from_secs(2)).await;
    let view = fx.handle.view();
    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.messages[0].delivery, DeliveryState::Confirmed);

    fx.handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn frames_for_other_conversations_are_ignored() {
    let mut fx = open_with(SimBackend::new(), true);
    settle().await;

    let attempt = fx.network.last_attempt().unwrap();
    let other = record("m-5", "doc-9", SELF_ID, "Different thread", fx.env.epoch());
    fx.network.deliver(attempt, &ServerEvent::NewMessage(other));
    let mine = record("m-6", PEER_ID, SELF_ID, "Take it with food", fx.env.epoch());
    fx.network.deliver(attempt, &ServerEvent::NewMessage(mine.clone()));
    fx.network.deliver(attempt, &ServerEvent::NewMessage(mine));
    settle().await;

    let view = fx.handle.view();
    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.messages[0].body, "Take it with food");

    fx.handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn read_receipts_flag_messages() {
    let backend = SimBackend::new();
    let t0 = SimEnv::new().epoch();
    backend.push_history(Ok(vec![record("m-1", SELF_ID, PEER_ID, "Is it contagious?", t0)]));

    let mut fx = open_with(backend, true);
    settle().await;
    assert!(!fx.handle.view().messages[0].read);

    let attempt = fx.network.last_attempt().unwrap();
    let receipt = ReadReceipt { id: ServerMessageId::new("m-1"), reader_id: Some(PEER_ID.into()) };
    fx.network.deliver(attempt, &ServerEvent::MessageRead(receipt));
    settle().await;

    assert!(fx.handle.view().messages[0].read);
    fx.handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn failed_send_keeps_body_for_retry() {
    let backend = SimBackend::new();
    backend.push_send(Err(BackendError::from_status(500, "database unavailable")));

    let mut fx = open_with(backend, true);
    settle().await;
    drain(&mut fx.handle);

    let id = fx.handle.send("Need a refill").await.unwrap();
    settle().await;

    assert_eq!(
        drain(&mut fx.handle),
        [ChatNotice::SendFailed(FailedSend { local_id: id, body: "Need a refill".into() })]
    );
    assert_eq!(fx.handle.view().messages[0].delivery, DeliveryState::Failed);

    let retried = fx.handle.retry(id).await.unwrap();
    assert_ne!(retried, id);
    settle().await;

    let view = fx.handle.view();
    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.messages[0].local_id(), Some(retried));
    assert_eq!(view.messages[0].delivery, DeliveryState::Sent);
    assert_eq!(fx.backend.sent().len(), 2);

    fx.handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn discarding_a_failed_send_returns_its_body() {
    let backend = SimBackend::new();
    backend.push_send(Err(BackendError::Network("connection reset".into())));

    let fx = open_with(backend, true);
    settle().await;

    let id = fx.handle.send("Cancel my appointment").await.unwrap();
    settle().await;

    assert_eq!(fx.handle.discard(id).await.unwrap(), "Cancel my appointment");
    assert!(fx.handle.view().messages.is_empty());
    assert!(matches!(fx.handle.discard(id).await, Err(ChatError::Stream(_))));

    fx.handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn failed_send_confirmed_by_late_echo() {
    let backend = SimBackend::new();
    backend.push_send(Err(BackendError::Network("request timed out".into())));

    let mut fx = open_with(backend, true);
    settle().await;
    drain(&mut fx.handle);

    let id = fx.handle.send("Is the clinic open Friday?").await.unwrap();
    settle().await;
    assert!(matches!(drain(&mut fx.handle).as_slice(), [ChatNotice::SendFailed(_)]));

    // The request timed out but the backend stored the message anyway
    let attempt = fx.network.last_attempt().unwrap();
    let copy = record("m-11", SELF_ID, PEER_ID, "Is the clinic open Friday?", fx.env.epoch());
    fx.network.deliver(attempt, &ServerEvent::NewMessage(copy));
    settle().await;

    assert_eq!(drain(&mut fx.handle), [ChatNotice::SendRecovered { local_id: id }]);
    let view = fx.handle.view();
    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.messages[0].delivery, DeliveryState::Confirmed);
    assert_eq!(view.messages[0].server_id(), Some(&ServerMessageId::new("m-11")));

    // Nothing left to retry, so the message cannot be sent twice
    assert!(matches!(fx.handle.retry(id).await, Err(ChatError::Stream(_))));
    assert_eq!(fx.backend.sent().len(), 1);

    fx.handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn failed_send_confirmed_by_refetched_history() {
    let backend = SimBackend::new();
    backend.push_send(Err(BackendError::Network("connection reset".into())));

    let mut fx = open_with(backend, true);
    settle().await;

    let id = fx.handle.send("Booked for 3pm").await.unwrap();
    settle().await;
    drain(&mut fx.handle);

    let stored = record("m-12", SELF_ID, PEER_ID, "Booked for 3pm", fx.env.epoch());
    fx.backend.push_history(Ok(vec![stored]));
    fx.network.close(fx.network.last_attempt().unwrap(), 1006, "stream ended");
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(fx.backend.history_calls(), 2);
    assert!(drain(&mut fx.handle).contains(&ChatNotice::SendRecovered { local_id: id }));
    let view = fx.handle.view();
    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.messages[0].delivery, DeliveryState::Confirmed);

    fx.handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn lost_channel_reconnects_and_refetches_history() {
    let mut fx = open_with(SimBackend::new(), true);
    settle().await;
    drain(&mut fx.handle);

    let first = fx.network.last_attempt().unwrap();
    fx.network.close(first, 1006, "stream ended");
    settle().await;

    assert_eq!(fx.handle.view().connection, ConnectionState::Disconnected);
    assert!(matches!(
        drain(&mut fx.handle).as_slice(),
        [ChatNotice::Connection(ConnectionNotice::Disconnected { .. })]
    ));

    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(fx.network.open_count(), 2);
    assert_ne!(fx.network.last_attempt(), Some(first));
    assert_eq!(fx.handle.view().connection, ConnectionState::Connected);
    assert_eq!(fx.backend.history_calls(), 2);
    assert_eq!(drain(&mut fx.handle), [ChatNotice::Connection(ConnectionNotice::Connected)]);

    fx.handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn events_from_a_superseded_attempt_are_ignored() {
    let fx = open_with(SimBackend::new(), true);
    settle().await;

    let first = fx.network.last_attempt().unwrap();
    fx.network.close(first, 1006, "stream ended");
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(fx.handle.view().connection, ConnectionState::Connected);

    let stale = record("m-7", PEER_ID, SELF_ID, "from the old socket", fx.env.epoch());
    fx.network.deliver(first, &ServerEvent::NewMessage(stale));
    fx.network.close(first, 1006, "late close");
    settle().await;

    let view = fx.handle.view();
    assert!(view.messages.is_empty());
    assert_eq!(view.connection, ConnectionState::Connected);

    fx.handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn auth_rejection_waits_for_explicit_reconnect() {
    let mut fx = open_with(SimBackend::new(), true);
    settle().await;
    drain(&mut fx.handle);

    let attempt = fx.network.last_attempt().unwrap();
    fx.network.close(attempt, 4401, "token expired");
    settle().await;

    let notices = drain(&mut fx.handle);
    assert!(matches!(notices.as_slice(), [ChatNotice::AuthRejected { .. }]));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(fx.network.open_count(), 1, "no reconnect loop after rejection");

    fx.handle.reconnect().await.unwrap();
    settle().await;
    assert_eq!(fx.network.open_count(), 2);
    assert_eq!(fx.handle.view().connection, ConnectionState::Connected);

    fx.handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn open_without_session_fails() {
    let (transport, network) = sim_transport(true);
    let result = ChatSession::new(
        SimEnv::new(),
        transport,
        SimBackend::new(),
        Arc::new(StaticSession::anonymous()),
        ClientConfig::default(),
    )
    .open(PEER_ID);

    assert!(matches!(result.err(), Some(ChatError::NoSession)));
    assert_eq!(network.open_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn history_failure_is_reported_without_dropping_the_channel() {
    let backend = SimBackend::new();
    backend.push_history(Err(BackendError::from_status(503, "maintenance")));

    let mut fx = open_with(backend, true);
    settle().await;

    let view = fx.handle.view();
    assert_eq!(view.connection, ConnectionState::Connected);
    assert!(view.history_error.is_some());
    assert!(
        drain(&mut fx.handle).iter().any(|n| matches!(n, ChatNotice::HistoryFailed { .. }))
    );

    fx.handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn close_is_terminal() {
    let fx = open_with(SimBackend::new(), true);
    settle().await;
    let attempt = fx.network.last_attempt().unwrap();
    let view = fx.handle.subscribe();

    fx.handle.close().await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(view.borrow().connection, ConnectionState::Closed);
    assert_eq!(fx.network.released(), [attempt]);
    assert_eq!(fx.network.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn completion_after_close_is_dropped() {
    let fx = open_with(SimBackend::new().with_latency(Duration::from_secs(5)), true);
    settle().await;
    let view = fx.handle.subscribe();

    fx.handle.send("Running late").await.unwrap();
    fx.handle.close().await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(fx.backend.sent().len(), 1);
    let last = view.borrow().clone();
    assert_eq!(last.messages.len(), 1);
    assert_eq!(last.messages[0].delivery, DeliveryState::Pending);
}

#[tokio::test(start_paused = true)]
async fn handshake_timeout_schedules_reconnect() {
    let mut fx = open_with(SimBackend::new(), false);
    settle().await;
    assert_eq!(fx.handle.view().connection, ConnectionState::Connecting);

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(drain(&mut fx.handle).iter().any(|n| matches!(
        n,
        ChatNotice::Connection(ConnectionNotice::Disconnected { failed_attempts: 1, .. })
    )));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(fx.network.open_count(), 2);
    let second = fx.network.last_attempt().unwrap();
    fx.network.accept(second);
    settle().await;
    assert_eq!(fx.handle.view().connection, ConnectionState::Connected);

    fx.handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn control_pongs_keep_channel_open() {
    let fx = open_with(SimBackend::new(), true);
    settle().await;
    let attempt = fx.network.last_attempt().unwrap();

    // Server answers heartbeats only at the websocket level
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_secs(20)).await;
        fx.network.activity(attempt);
    }
    settle().await;

    assert_eq!(fx.handle.view().connection, ConnectionState::Connected);
    assert_eq!(fx.network.open_count(), 1);
    assert!(fx.network.sent().iter().any(|(_, frame)| *frame == ClientFrame::Ping));

    // Once the pongs stop the channel is declared dead
    tokio::time::sleep(Duration::from_secs(65)).await;
    assert_ne!(fx.network.last_attempt(), Some(attempt));

    fx.handle.close().await;
}
