//! Terminal shell for a single medichat conversation.
//!
//! Reads lines from stdin, prints the merged message sequence as it changes.
//! Lines starting with `/` are commands: `/retry`, `/discard`, `/reconnect`,
//! `/quit`.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod input;
pub mod render;
pub mod shell;

pub use input::{Input, parse};
pub use render::{Transcript, message_line, notice_line};
pub use shell::{Shell, ShellError};
