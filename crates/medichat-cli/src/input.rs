//! Line input parsing.

/// What a typed line asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Send the line as a message.
    Send(String),
    /// Retry the most recent failed send.
    Retry,
    /// Discard the most recent failed send.
    Discard,
    /// Re-open the live channel.
    Reconnect,
    /// Leave the conversation.
    Quit,
    /// Blank line.
    Empty,
    /// Unrecognized slash command.
    Unknown(String),
}

/// Parse one line.
///
/// A leading `//` escapes a message that starts with a slash.
pub fn parse(line: &str) -> Input {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Input::Empty;
    }

    if let Some(escaped) = trimmed.strip_prefix("//") {
        return Input::Send(format!("/{escaped}"));
    }

    match trimmed.strip_prefix('/') {
        None => Input::Send(trimmed.to_owned()),
        Some("retry") => Input::Retry,
        Some("discard") => Input::Discard,
        Some("reconnect") => Input::Reconnect,
        Some("quit" | "q") => Input::Quit,
        Some(other) => Input::Unknown(other.to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_lines_are_messages() {
        assert_eq!(parse("  hello doctor "), Input::Send("hello doctor".into()));
        assert_eq!(parse("   "), Input::Empty);
    }

    #[test]
    fn slash_commands() {
        assert_eq!(parse("/retry"), Input::Retry);
        assert_eq!(parse("/discard"), Input::Discard);
        assert_eq!(parse("/reconnect"), Input::Reconnect);
        assert_eq!(parse("/q"), Input::Quit);
        assert_eq!(parse("/dance"), Input::Unknown("dance".into()));
    }

    #[test]
    fn double_slash_escapes() {
        assert_eq!(parse("//shrug"), Input::Send("/shrug".into()));
    }
}
