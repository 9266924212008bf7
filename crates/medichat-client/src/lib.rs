//! Async runtime for medichat conversation views.
//!
//! Drives the Sans-IO state machines from `medichat-core` with real
//! collaborators: a live channel [`Transport`], a REST [`ChatBackend`] and a
//! [`SessionProvider`](medichat_core::SessionProvider). The view talks to a
//! running conversation through a [`ChatHandle`].
//!
//! # Features
//!
//! - `ws`: [`WsTransport`](ws::WsTransport) on `tokio-tungstenite`
//! - `http`: [`HttpBackend`](http::HttpBackend) on `reqwest`

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod backend;
pub mod config;
#[cfg(feature = "http")]
pub mod http;
pub mod runtime;
pub mod system_env;
pub mod transport;
#[cfg(feature = "ws")]
pub mod ws;

pub use backend::{BackendError, ChatBackend};
pub use config::ClientConfig;
pub use runtime::{ChatError, ChatHandle, ChatNotice, ChatSession, ChatView};
pub use system_env::SystemEnv;
pub use transport::{Transport, TransportEvent, TransportFailure};
