//! Interactive loop: stdin in, transcript out.

use std::io::Write;

use medichat_client::{ChatError, ChatHandle, ChatNotice, ChatView};
use medichat_core::LocalId;
use thiserror::Error;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt},
    sync::watch,
};

use crate::{
    input::{Input, parse},
    render::{Transcript, notice_line},
};

/// Errors that end the shell.
#[derive(Error, Debug)]
pub enum ShellError {
    /// Conversation failed.
    #[error(transparent)]
    Chat(#[from] ChatError),

    /// Terminal I/O failed.
    #[error("terminal I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Line-oriented view over one conversation.
pub struct Shell<W> {
    handle: ChatHandle,
    view: watch::Receiver<ChatView>,
    transcript: Transcript,
    /// Failed sends, most recent last
    failed: Vec<LocalId>,
    out: W,
}

impl<W: Write> Shell<W> {
    /// Shell printing to `out`.
    pub fn new(handle: ChatHandle, out: W) -> Self {
        let view = handle.subscribe();
        Self { handle, view, transcript: Transcript::default(), failed: Vec::new(), out }
    }

    /// Run until `/quit`, end of input, or the conversation ends.
    pub async fn run<R>(mut self, input: R) -> Result<(), ShellError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        self.render()?;

        loop {
            tokio::select! {
                biased;

                notice = self.handle.next_notice() => match notice {
                    Some(notice) => self.show_notice(&notice)?,
                    None => break,
                },
                changed = self.view.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.render()?;
                },
                line = lines.next_line() => match line? {
                    Some(line) => {
                        if !self.handle_line(&line).await? {
                            break;
                        }
                    },
                    None => break,
                },
            }
        }

        self.handle.close().await;
        Ok(())
    }

    /// Returns false when the user asked to leave.
    async fn handle_line(&mut self, line: &str) -> Result<bool, ShellError> {
        match parse(line) {
            Input::Send(body) => {
                let result = self.handle.send(body).await.map(drop);
                self.report(result)?;
            },
            Input::Retry => match self.failed.pop() {
                Some(id) => {
                    let result = self.handle.retry(id).await.map(drop);
                    self.report(result)?;
                },
                None => writeln!(self.out, "!! nothing to retry")?,
            },
            Input::Discard => match self.failed.pop() {
                Some(id) => match self.handle.discard(id).await {
                    Ok(body) => writeln!(self.out, "-- discarded \"{body}\" --")?,
                    Err(e) => self.report(Err(e))?,
                },
                None => writeln!(self.out, "!! nothing to discard")?,
            },
            Input::Reconnect => {
                let result = self.handle.reconnect().await;
                self.report(result)?;
            },
            Input::Quit => return Ok(false),
            Input::Empty => {},
            Input::Unknown(command) => writeln!(self.out, "!! unknown command /{command}")?,
        }
        Ok(true)
    }

    /// Print recoverable errors; propagate the rest.
    fn report(&mut self, result: Result<(), ChatError>) -> Result<(), ShellError> {
        match result {
            Ok(()) => Ok(()),
            Err(e @ (ChatError::Stream(_) | ChatError::Connection(_) | ChatError::NoSession)) => {
                writeln!(self.out, "!! {e}")?;
                Ok(())
            },
            Err(e) => Err(e.into()),
        }
    }

    fn show_notice(&mut self, notice: &ChatNotice) -> Result<(), ShellError> {
        match notice {
            ChatNotice::SendFailed(failed) => self.failed.push(failed.local_id),
            ChatNotice::SendRecovered { local_id } => self.failed.retain(|id| id != local_id),
            _ => {},
        }
        if let Some(line) = notice_line(notice) {
            writeln!(self.out, "{line}")?;
        }
        Ok(())
    }

    fn render(&mut self) -> Result<(), ShellError> {
        let view = self.view.borrow_and_update().clone();
        for line in self.transcript.update(&view) {
            writeln!(self.out, "{line}")?;
        }
        self.out.flush()?;
        Ok(())
    }
}
