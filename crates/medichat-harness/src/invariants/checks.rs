//! Standard invariant checks.
//!
//! These invariants capture behavioral properties that must always hold.
//! They verify WHAT must be true, not specific test scenarios.

use std::collections::{HashMap, HashSet};

use chrono::TimeDelta;
use medichat_core::{DeliveryState, Message, MessageId, stream::DEFAULT_CORRELATION_WINDOW};

use super::{Invariant, InvariantResult, SystemSnapshot, Violation};

/// Rendered sequence is ordered by `sent_at`.
///
/// For every pair of consecutive messages, `sent_at(i) <= sent_at(i + 1)`.
pub struct OrderingMonotonic;

impl Invariant for OrderingMonotonic {
    fn name(&self) -> &'static str {
        "ordering_monotonic"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for view in &state.views {
            for (i, pair) in view.messages.windows(2).enumerate() {
                if pair[1].sent_at < pair[0].sent_at {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "view {}: message {} ({}) at index {} precedes {} ({})",
                            view.id,
                            pair[0].id,
                            pair[0].sent_at,
                            i,
                            pair[1].id,
                            pair[1].sent_at
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// A server id is rendered at most once.
pub struct UniqueServerIds;

impl Invariant for UniqueServerIds {
    fn name(&self) -> &'static str {
        "unique_server_ids"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for view in &state.views {
            let mut seen = HashSet::new();
            for message in &view.messages {
                if let MessageId::Server(id) = &message.id
                    && !seen.insert(id)
                {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!("view {}: server id {} rendered twice", view.id, id),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Every issued local send is rendered exactly once.
///
/// Counts entries created by each local send, reconciled or not. Zero means
/// a send vanished, two means its echo was appended instead of reconciled.
///
/// A failed send counts its server copy too: a server-only entry from the
/// same sender with the same body, arriving after the failed entry and
/// within the correlation window, is the same send rendered twice.
pub struct SingleRenderPerSend;

fn is_stored_copy_of(copy: &Message, failed: &Message) -> bool {
    let window = TimeDelta::from_std(DEFAULT_CORRELATION_WINDOW).unwrap_or(TimeDelta::MAX);
    copy.local_id().is_none()
        && copy.arrival() > failed.arrival()
        && copy.sender_id == failed.sender_id
        && copy.body == failed.body
        && (copy.sent_at - failed.sent_at).abs() <= window
}

impl Invariant for SingleRenderPerSend {
    fn name(&self) -> &'static str {
        "single_render_per_send"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for view in &state.views {
            let mut rendered: HashMap<_, usize> = HashMap::new();
            for message in &view.messages {
                if let Some(local) = message.local_id() {
                    *rendered.entry(local).or_default() += 1;
                }
            }

            for local in &view.live_sends {
                let count = rendered.get(local).copied().unwrap_or(0);
                if count != 1 {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!("view {}: send {} rendered {} times", view.id, local, count),
                    });
                }
            }

            if let Some((local, count)) = rendered.iter().find(|(_, count)| **count > 1) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("view {}: send {} rendered {} times", view.id, local, count),
                });
            }

            let failed = view.messages.iter().filter(|m| m.delivery == DeliveryState::Failed);
            for entry in failed {
                if let Some(copy) = view.messages.iter().find(|m| is_stored_copy_of(m, entry)) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "view {}: failed send {} also rendered as {}",
                            view.id, entry.id, copy.id
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Delivery states only move forward.
///
/// Every observed step must be an allowed transition: nothing returns to
/// `Pending` and `Confirmed` is final.
pub struct NoPendingRegression;

impl Invariant for NoPendingRegression {
    fn name(&self) -> &'static str {
        "no_pending_regression"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for view in &state.views {
            for (local, history) in &view.delivery_history {
                if history.first().is_some_and(|first| *first != DeliveryState::Pending) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "view {}: send {} first observed as {:?}",
                            view.id, local, history[0]
                        ),
                    });
                }

                for step in history.windows(2) {
                    if !step[0].can_transition_to(step[1]) {
                        return Err(Violation {
                            invariant: self.name(),
                            message: format!(
                                "view {}: send {} moved {:?} → {:?}",
                                view.id, local, step[0], step[1]
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
