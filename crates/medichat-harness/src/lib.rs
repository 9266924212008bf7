//! Deterministic simulation harness for medichat testing.
//!
//! Scripted implementations of the client's collaborator traits plus a
//! simulated environment, so a whole conversation view can run under paused
//! tokio time with no network.
//!
//! # Invariant Testing
//!
//! The `invariants` module provides behavioral testing through invariant
//! checks over captured message streams. Use
//! [`InvariantRegistry::standard()`] for the stream invariants.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod sim_backend;
pub mod sim_env;
pub mod sim_transport;

pub use invariants::{
    Invariant, InvariantRegistry, InvariantResult, NoPendingRegression, OrderingMonotonic,
    SingleRenderPerSend, SystemSnapshot, UniqueServerIds, ViewSnapshot, Violation,
};
pub use sim_backend::{SentRequest, SimBackend};
pub use sim_env::SimEnv;
pub use sim_transport::{SimNetwork, SimTransport, sim_transport};
