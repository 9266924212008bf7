//! Session loop wiring the state machines to real collaborators.
//!
//! [`ChatSession::open`] spawns one task per conversation view. The task owns
//! the [`ConnectionManager`], the [`MessageStream`] and the transport, and runs
//! a single `select!` loop over:
//!
//! - commands from the [`ChatHandle`]
//! - transport events
//! - completions of spawned history and send requests
//! - a timer tick driving the connection timeouts
//!
//! Requests run in their own tasks and report back over a channel owned by
//! the loop. Once the loop exits that channel is gone, so a completion that
//! arrives after the view closed is dropped without touching any state.

use std::sync::Arc;

use medichat_core::{
    ConnectionAction, ConnectionError, ConnectionManager, ConnectionNotice, ConnectionState,
    ConversationTarget, Environment, FailedSend, InboundOutcome, LocalId, Message,
    MessageStream, OutboundMessage, SessionProvider, StreamError,
};
use medichat_proto::{MessageRecord, ServerEvent, UserId};
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};

use crate::{
    backend::{BackendError, ChatBackend},
    config::ClientConfig,
    transport::{Transport, TransportEvent},
};

/// Errors surfaced by the session runtime.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// No one is logged in.
    #[error("no active session")]
    NoSession,

    /// Live channel could not be opened.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Message operation rejected.
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Session loop has exited.
    #[error("chat session is closed")]
    Closed,
}

/// What the view renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatView {
    /// Conversation on screen.
    pub target: ConversationTarget,
    /// Messages in display order.
    pub messages: Vec<Message>,
    /// Live channel state.
    pub connection: ConnectionState,
    /// Last history failure, if the latest fetch failed.
    pub history_error: Option<String>,
}

/// One-off events for the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatNotice {
    /// Live channel lifecycle change.
    Connection(ConnectionNotice),
    /// Credential rejected. Call [`ChatHandle::reconnect`] after refreshing
    /// the session.
    AuthRejected {
        /// Server-provided reason
        reason: String,
    },
    /// A send failed. The body is kept for retry.
    SendFailed(FailedSend),
    /// A failed send reached the backend after all and is now confirmed.
    /// Its retry offer no longer applies.
    SendRecovered {
        /// Send that was marked failed
        local_id: LocalId,
    },
    /// History could not be loaded.
    HistoryFailed {
        /// What went wrong
        reason: String,
    },
}

enum Command {
    Send { body: String, reply: oneshot::Sender<Result<LocalId, StreamError>> },
    Retry { id: LocalId, reply: oneshot::Sender<Result<LocalId, StreamError>> },
    Discard { id: LocalId, reply: oneshot::Sender<Result<String, StreamError>> },
    Reconnect { reply: oneshot::Sender<Result<(), ChatError>> },
    Close,
}

enum Completion {
    History(Result<Vec<MessageRecord>, BackendError>),
    Sent { local_id: LocalId, result: Result<(), BackendError> },
}

/// Builder for one conversation view.
pub struct ChatSession<E, T, B, S> {
    env: E,
    transport: T,
    backend: B,
    session: Arc<S>,
    config: ClientConfig,
}

impl<E, T, B, S> ChatSession<E, T, B, S>
where
    E: Environment,
    T: Transport,
    B: ChatBackend,
    S: SessionProvider,
{
    /// Assemble a session from its collaborators.
    pub fn new(env: E, transport: T, backend: B, session: Arc<S>, config: ClientConfig) -> Self {
        Self { env, transport, backend, session, config }
    }

    /// Open the conversation with `peer`.
    ///
    /// Reads the current session, starts the live channel and the history
    /// fetch, and spawns the session loop. Must be called inside a tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// - `ChatError::NoSession` if no one is logged in
    /// - `ChatError::Connection` if the session carries no usable token
    pub fn open(self, peer: impl Into<UserId>) -> Result<ChatHandle, ChatError> {
        let info = self.session.current().ok_or(ChatError::NoSession)?;

        let mut target = ConversationTarget::new(info.user_id, peer);
        if let Some(id) = self.config.conversation_id.clone() {
            target = target.with_conversation_id(id);
        }

        let mut connection = ConnectionManager::new(self.config.connection.clone());
        let actions = connection.open(Some(info.token), target.clone(), self.env.now())?;
        let stream = MessageStream::new(target.clone(), self.config.stream.clone());

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(ChatView {
            target: target.clone(),
            messages: Vec::new(),
            connection: connection.state(),
            history_error: None,
        });

        tracing::info!(self_id = %target.self_id, peer_id = %target.peer_id, "opening conversation");

        let mut driver = SessionLoop {
            env: self.env,
            transport: self.transport,
            backend: self.backend,
            session: self.session,
            target,
            connection,
            stream,
            commands: commands_rx,
            completions_tx,
            completions: completions_rx,
            notices: notices_tx,
            view: view_tx,
            tick_interval: self.config.tick_interval,
            connected_before: false,
        };
        driver.execute(actions);
        driver.fetch_history();
        driver.publish();

        let task = tokio::spawn(driver.run());

        Ok(ChatHandle { commands: commands_tx, view: view_rx, notices: notices_rx, task })
    }
}

/// View-side handle to a running conversation.
///
/// Dropping the handle closes the conversation, same as [`close`](Self::close)
/// without waiting.
pub struct ChatHandle {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<ChatView>,
    notices: mpsc::UnboundedReceiver<ChatNotice>,
    task: JoinHandle<()>,
}

impl ChatHandle {
    /// Send a message. Returns the provisional id of the rendered entry.
    pub async fn send(&self, body: impl Into<String>) -> Result<LocalId, ChatError> {
        let body = body.into();
        Ok(self.request(|reply| Command::Send { body, reply }).await??)
    }

    /// Re-send a failed message under a fresh provisional id.
    pub async fn retry(&self, id: LocalId) -> Result<LocalId, ChatError> {
        Ok(self.request(|reply| Command::Retry { id, reply }).await??)
    }

    /// Drop a failed message, returning its body.
    pub async fn discard(&self, id: LocalId) -> Result<String, ChatError> {
        Ok(self.request(|reply| Command::Discard { id, reply }).await??)
    }

    /// Re-open the live channel with the session's current token.
    ///
    /// Needed after [`ChatNotice::AuthRejected`]; a no-op while connected.
    pub async fn reconnect(&self) -> Result<(), ChatError> {
        self.request(|reply| Command::Reconnect { reply }).await?
    }

    /// Current view state.
    pub fn view(&self) -> ChatView {
        self.view.borrow().clone()
    }

    /// Watch channel publishing every view change.
    pub fn subscribe(&self) -> watch::Receiver<ChatView> {
        self.view.clone()
    }

    /// Next notice. `None` once the session has exited.
    pub async fn next_notice(&mut self) -> Option<ChatNotice> {
        self.notices.recv().await
    }

    /// Next notice if one is queued.
    pub fn try_notice(&mut self) -> Option<ChatNotice> {
        self.notices.try_recv().ok()
    }

    /// Close the conversation and wait for the loop to exit.
    pub async fn close(self) {
        let _ = self.commands.send(Command::Close);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "chat session task failed");
        }
    }

    async fn request<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, ChatError> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(build(tx)).map_err(|_| ChatError::Closed)?;
        rx.await.map_err(|_| ChatError::Closed)
    }
}

struct SessionLoop<E: Environment, T, B, S> {
    env: E,
    transport: T,
    backend: B,
    session: Arc<S>,
    target: ConversationTarget,
    connection: ConnectionManager<E::Instant>,
    stream: MessageStream,
    commands: mpsc::UnboundedReceiver<Command>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
    notices: mpsc::UnboundedSender<ChatNotice>,
    view: watch::Sender<ChatView>,
    tick_interval: std::time::Duration,
    /// Whether the channel has connected at least once. Later connects
    /// refetch history to cover the gap.
    connected_before: bool,
}

impl<E, T, B, S> SessionLoop<E, T, B, S>
where
    E: Environment,
    T: Transport,
    B: ChatBackend,
    S: SessionProvider,
{
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Close) | None => {
                        let actions = self.connection.close();
                        self.execute(actions);
                        self.publish();
                        break;
                    },
                    Some(command) => self.handle_command(command),
                },
                Some(event) = self.transport.next_event() => self.handle_transport(event),
                Some(done) = self.completions.recv() => self.handle_completion(done),
                _ = ticker.tick() => self.handle_tick(),
            }

            self.publish();
        }

        tracing::debug!(peer_id = %self.target.peer_id, "chat session ended");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Send { body, reply } => {
                let result = self.stream.send_local(&body, self.env.wall_clock());
                let _ = reply.send(self.dispatch(result));
            },
            Command::Retry { id, reply } => {
                let result = self.stream.retry(id, self.env.wall_clock());
                let _ = reply.send(self.dispatch(result));
            },
            Command::Discard { id, reply } => {
                let _ = reply.send(self.stream.discard(id));
            },
            Command::Reconnect { reply } => {
                let token = self.session.current().map(|info| info.token);
                let result = self.connection.open(token, self.target.clone(), self.env.now());
                let _ = reply.send(match result {
                    Ok(actions) => {
                        self.execute(actions);
                        Ok(())
                    },
                    Err(e) => Err(e.into()),
                });
            },
            Command::Close => {},
        }
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        let now = self.env.now();
        let actions = match event {
            TransportEvent::Opened { attempt } => {
                self.connection.handle_transport_opened(attempt, now)
            },
            TransportEvent::Frame { attempt, text } => {
                self.connection.handle_frame(attempt, &text, now)
            },
            TransportEvent::Closed { attempt, code, reason } => {
                self.connection.handle_close(attempt, code, &reason, now)
            },
            TransportEvent::Failed { attempt, failure } => {
                self.connection.handle_transport_failed(attempt, failure, now)
            },
            TransportEvent::Activity { attempt } => {
                self.connection.handle_activity(attempt, now);
                return;
            },
        };
        self.execute(actions);
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::History(Ok(records)) => {
                let summary = self.stream.seed(records);
                for local_id in summary.recovered {
                    self.notify(ChatNotice::SendRecovered { local_id });
                }
            },
            Completion::History(Err(e)) => {
                let reason = e.to_string();
                self.stream.history_failed(reason.clone());
                self.notify(ChatNotice::HistoryFailed { reason });
            },
            Completion::Sent { local_id, result: Ok(()) } => {
                if let Err(e) = self.stream.mark_sent(local_id) {
                    tracing::debug!(%local_id, error = %e, "ignoring acknowledgement");
                }
            },
            Completion::Sent { local_id, result: Err(e) } => {
                tracing::warn!(%local_id, error = %e, transient = e.is_transient(), "send failed");
                match self.stream.mark_failed(local_id) {
                    Ok(Some(failed)) => self.notify(ChatNotice::SendFailed(failed)),
                    Ok(None) => {},
                    Err(e) => tracing::debug!(%local_id, error = %e, "ignoring send failure"),
                }
            },
        }
    }

    fn handle_tick(&mut self) {
        // Reconnects pick up a refreshed token
        if self.connection.state() == ConnectionState::Disconnected
            && self.connection.reconnect_pending()
            && let Some(info) = self.session.current()
        {
            self.connection.replace_token(info.token);
        }

        let actions = self.connection.tick(self.env.now());
        self.execute(actions);
    }

    fn execute(&mut self, actions: Vec<ConnectionAction>) {
        for action in actions {
            match action {
                ConnectionAction::OpenTransport { attempt, request } => {
                    self.transport.open(attempt, request);
                },
                ConnectionAction::SendFrame { attempt, frame } => {
                    self.transport.send(attempt, frame);
                },
                ConnectionAction::CloseTransport { attempt } => self.transport.close(attempt),
                ConnectionAction::Notify(notice) => self.handle_notice(notice),
                ConnectionAction::Deliver(event) => self.deliver(event),
            }
        }
    }

    fn handle_notice(&mut self, notice: ConnectionNotice) {
        match notice {
            ConnectionNotice::Connected => {
                if self.connected_before {
                    self.fetch_history();
                }
                self.connected_before = true;
                self.notify(ChatNotice::Connection(ConnectionNotice::Connected));
            },
            ConnectionNotice::AuthRejected { reason } => {
                self.notify(ChatNotice::AuthRejected { reason });
            },
            other => self.notify(ChatNotice::Connection(other)),
        }
    }

    fn deliver(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::NewMessage(record) => {
                let outcome = self.stream.receive_inbound(record);
                tracing::trace!(?outcome, "inbound message");
                if let InboundOutcome::Recovered(local_id) = outcome {
                    self.notify(ChatNotice::SendRecovered { local_id });
                }
            },
            ServerEvent::MessageRead(receipt) => {
                self.stream.mark_read(&receipt.id);
            },
            ServerEvent::Error(error) => {
                tracing::warn!(code = error.code, message = %error.message, "server error event");
            },
            ServerEvent::Pong | ServerEvent::Unknown(_) => {},
        }
    }

    /// Hand a freshly rendered send to the backend.
    fn dispatch(
        &self,
        result: Result<OutboundMessage, StreamError>,
    ) -> Result<LocalId, StreamError> {
        let outbound = result?;
        let local_id = outbound.local_id;
        let tx = self.completions_tx.clone();

        let Some(info) = self.session.current() else {
            tracing::warn!(%local_id, "no session, failing send");
            let _ = tx.send(Completion::Sent {
                local_id,
                result: Err(BackendError::Unauthorized { status: 401 }),
            });
            return Ok(local_id);
        };

        let backend = self.backend.clone();
        let target = self.target.clone();
        tokio::spawn(async move {
            let result = backend.send_message(&info.token, &target, &outbound.body).await;
            let _ = tx.send(Completion::Sent { local_id, result });
        });

        Ok(local_id)
    }

    fn fetch_history(&self) {
        let Some(info) = self.session.current() else {
            let _ = self.completions_tx.send(Completion::History(Err(
                BackendError::Unauthorized { status: 401 },
            )));
            return;
        };

        let backend = self.backend.clone();
        let target = self.target.clone();
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = backend.fetch_history(&info.token, &target).await;
            let _ = tx.send(Completion::History(result));
        });
    }

    fn notify(&self, notice: ChatNotice) {
        // Receiver gone means the view stopped listening
        let _ = self.notices.send(notice);
    }

    fn publish(&self) {
        let messages = self.stream.messages();
        let connection = self.connection.state();
        let history_error = self.stream.history_error();

        self.view.send_if_modified(|view| {
            let unchanged = view.connection == connection
                && view.history_error.as_deref() == history_error
                && view.messages.as_slice() == messages;
            if unchanged {
                return false;
            }

            view.messages = messages.to_vec();
            view.connection = connection;
            view.history_error = history_error.map(str::to_owned);
            true
        });
    }
}
