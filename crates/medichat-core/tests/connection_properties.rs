//! Property-based tests for the connection manager.
//!
//! Arbitrary sequences of transport outcomes, frames, timer ticks, explicit
//! opens and closes. Verifies:
//! - At most one transport is live at any time
//! - Attempt ids strictly increase
//! - After `close()`, nothing but an explicit `open()` starts an attempt
//! - After a credential rejection, no attempt starts without a new token

use std::time::{Duration, Instant};

use medichat_core::{
    AttemptId, AuthToken, ConnectionAction, ConnectionConfig, ConnectionManager,
    ConnectionNotice, ConnectionState, ConversationTarget, TransportFailure,
};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Event {
    Open,
    Close,
    /// Handshake for the latest attempt (or a stale one) completes.
    Opened { stale: bool },
    /// Latest attempt fails.
    Failed { auth: bool },
    /// Peer sends a close frame.
    CloseFrame(u16),
    /// A frame arrives.
    Frame(&'static str),
    /// Time passes and the timers run.
    Advance(u64),
}

fn event_strategy() -> impl Strategy<Value = Event> {
    prop_oneof![
        2 => Just(Event::Open),
        1 => Just(Event::Close),
        4 => any::<bool>().prop_map(|stale| Event::Opened { stale }),
        2 => prop::bool::weighted(0.2).prop_map(|auth| Event::Failed { auth }),
        2 => prop_oneof![Just(1000u16), Just(1006), Just(1011), Just(4401)].prop_map(Event::CloseFrame),
        2 => prop_oneof![
            Just(r#"{"type":"pong"}"#),
            Just("garbage"),
            Just(r#"{"type":"typing","payload":{}}"#),
        ]
        .prop_map(Event::Frame),
        5 => (0u64..30).prop_map(Event::Advance),
    ]
}

struct Sim {
    conn: ConnectionManager,
    now: Instant,
    live: Option<AttemptId>,
    last_attempt: Option<AttemptId>,
    first_attempt: Option<AttemptId>,
    /// Whether the manager may start attempts on its own
    armed: bool,
}

impl Sim {
    fn new() -> Self {
        Self {
            conn: ConnectionManager::new(ConnectionConfig::default()),
            now: Instant::now(),
            live: None,
            last_attempt: None,
            first_attempt: None,
            armed: false,
        }
    }

    /// Apply actions, checking the transport bookkeeping.
    fn observe(&mut self, actions: Vec<ConnectionAction>, explicit_open: bool) -> Result<(), String> {
        for action in actions {
            match action {
                ConnectionAction::OpenTransport { attempt, .. } => {
                    if !explicit_open && !self.armed {
                        return Err(format!("attempt {attempt:?} started while disarmed"));
                    }
                    if let Some(live) = self.live {
                        return Err(format!("attempt {attempt:?} opened while {live:?} is live"));
                    }
                    if self.last_attempt.is_some_and(|last| attempt <= last) {
                        return Err(format!("attempt id {attempt:?} did not increase"));
                    }
                    self.live = Some(attempt);
                    self.last_attempt = Some(attempt);
                    self.first_attempt.get_or_insert(attempt);
                },
                ConnectionAction::CloseTransport { attempt } => {
                    if self.live != Some(attempt) {
                        return Err(format!("released {attempt:?} but live is {:?}", self.live));
                    }
                    self.live = None;
                },
                ConnectionAction::Notify(ConnectionNotice::Closed)
                | ConnectionAction::Notify(ConnectionNotice::AuthRejected { .. }) => {
                    self.armed = false;
                },
                _ => {},
            }
        }
        Ok(())
    }

    fn step(&mut self, event: &Event) -> Result<(), String> {
        let attempt = self.conn.attempt();
        let actions = match *event {
            Event::Open => {
                let actions = self
                    .conn
                    .open(Some(AuthToken::new("tok")), ConversationTarget::new("pat", "doc"), self.now)
                    .map_err(|e| e.to_string())?;
                self.armed = true;
                return self.observe(actions, true);
            },
            Event::Close => self.conn.close(),
            Event::Opened { stale } => {
                // Replaying the first attempt ever issued is stale once a
                // second one exists
                let target = if stale { self.first_attempt.unwrap_or(attempt) } else { attempt };
                self.conn.handle_transport_opened(target, self.now)
            },
            Event::Failed { auth } => {
                let failure = if auth {
                    TransportFailure::Rejected { status: 401, reason: "expired".into() }
                } else {
                    TransportFailure::Network("connection reset".into())
                };
                self.conn.handle_transport_failed(attempt, failure, self.now)
            },
            Event::CloseFrame(code) => self.conn.handle_close(attempt, code, "bye", self.now),
            Event::Frame(text) => self.conn.handle_frame(attempt, text, self.now),
            Event::Advance(secs) => {
                self.now += Duration::from_secs(secs);
                self.conn.tick(self.now)
            },
        };
        self.observe(actions, false)
    }
}

proptest! {
    /// Transport bookkeeping holds under arbitrary event sequences.
    #[test]
    fn prop_single_live_transport(events in prop::collection::vec(event_strategy(), 0..80)) {
        let mut sim = Sim::new();

        for event in &events {
            let result = sim.step(event);
            prop_assert!(result.is_ok(), "{:?} after {:?}", result, event);
        }
    }

    /// Once closed, the manager stays closed until opened explicitly.
    #[test]
    fn prop_close_is_terminal(
        before in prop::collection::vec(event_strategy(), 0..30),
        after in prop::collection::vec(event_strategy(), 0..30),
    ) {
        let mut sim = Sim::new();
        for event in &before {
            let _ = sim.step(event);
        }
        let _ = sim.step(&Event::Close);

        for event in after.iter().filter(|e| !matches!(e, Event::Open)) {
            let _ = sim.step(event);
            prop_assert_eq!(sim.conn.state(), ConnectionState::Closed);
        }
    }
}
