//! Turns typed lines into room actions

use shared::Envelope;

/// What a line of user input asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Plain chat text
    Say(String),
    /// `/event <payload>`: a structured event, payload sent verbatim
    Event(String),
    /// `/quit`
    Quit,
    /// Blank line or a bare command with nothing to send
    Nothing,
    /// `/something` we do not know
    Unknown(String),
}

impl Command {
    /// Envelope to send for this command, if any.
    pub fn to_envelope(&self) -> Option<Envelope> {
        match self {
            Command::Say(text) => Some(Envelope::text(text)),
            Command::Event(payload) => Some(Envelope::event(payload.as_bytes())),
            _ => None,
        }
    }
}

pub fn parse_line(line: &str) -> Command {
    let line = line.trim_end_matches(&['\r', '\n'][..]);
    if line.trim().is_empty() {
        return Command::Nothing;
    }

    // A doubled slash escapes a leading slash in plain text
    if let Some(text) = line.strip_prefix("//") {
        return Command::Say(format!("/{}", text));
    }

    let Some(command) = line.strip_prefix('/') else {
        return Command::Say(line.to_string());
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map(|(name, rest)| (name, rest.trim()))
        .unwrap_or((command, ""));

    match name {
        "quit" | "exit" => Command::Quit,
        "event" if rest.is_empty() => Command::Nothing,
        "event" => Command::Event(rest.to_string()),
        other => Command::Unknown(other.to_string()),
    }
}
