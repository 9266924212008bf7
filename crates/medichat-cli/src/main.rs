//! medichat binary.
//!
//! # Usage
//!
//! ```bash
//! # Open the conversation with doctor `doc-7` as patient `pat-42`
//! MEDICHAT_TOKEN=... medichat --user pat-42 doc-7
//!
//! # Point at a different deployment
//! medichat --ws-url wss://portal.example/ws --api-url https://portal.example/api \
//!     --user pat-42 --token "$TOKEN" doc-7
//! ```

use std::sync::Arc;

use clap::Parser;
use medichat_cli::Shell;
use medichat_client::{
    ChatSession, ClientConfig, SystemEnv, http::HttpBackend, ws::WsTransport,
};
use medichat_core::StaticSession;
use medichat_proto::ConversationId;
use tokio::io::BufReader;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

/// Healthcare portal chat shell
#[derive(Parser, Debug)]
#[command(name = "medichat")]
#[command(about = "Terminal shell for one healthcare portal conversation")]
#[command(version)]
struct Args {
    /// The other participant's user id
    peer: String,

    /// Logged-in user's id
    #[arg(short, long, env = "MEDICHAT_USER_ID")]
    user: String,

    /// Session token
    #[arg(short, long, env = "MEDICHAT_TOKEN", hide_env_values = true)]
    token: String,

    /// Live channel endpoint
    #[arg(long, env = "MEDICHAT_WS_URL", default_value = "ws://localhost:5000/ws")]
    ws_url: Url,

    /// REST API base
    #[arg(long, env = "MEDICHAT_API_URL", default_value = "http://localhost:5000/api")]
    api_url: Url,

    /// Backend conversation id, if the backend scopes by conversation
    #[arg(long)]
    conversation_id: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    // stdout belongs to the transcript
    tracing_subscriber::registry().with(fmt::layer().with_writer(std::io::stderr)).with(filter).init();

    let config = ClientConfig {
        conversation_id: args.conversation_id.map(ConversationId::from),
        ..ClientConfig::default()
    };

    tracing::info!(ws = %args.ws_url, api = %args.api_url, "medichat starting");

    let backend = HttpBackend::new(args.api_url, config.request_timeout)?;
    let transport =
        WsTransport::new(args.ws_url).with_handshake_timeout(config.connection.open_timeout);
    let session = Arc::new(StaticSession::new(args.user, args.token));

    let handle =
        ChatSession::new(SystemEnv::new(), transport, backend, session, config).open(args.peer)?;

    Shell::new(handle, std::io::stdout()).run(BufReader::new(tokio::io::stdin())).await?;

    Ok(())
}
