//! Terminal rendering of room traffic

use shared::{Envelope, EnvelopeKind};

/// One printable line per envelope.
pub fn render(envelope: &Envelope) -> String {
    let who = if envelope.user_id().is_empty() {
        "server"
    } else {
        envelope.user_id()
    };

    match envelope.kind() {
        EnvelopeKind::Text => match envelope.payload_str() {
            Some(text) => format!("[{}] {}", who, text),
            None => format!("[{}] <{} bytes of binary text>", who, envelope.payload().len()),
        },
        EnvelopeKind::StructuredEvent => match envelope.payload_str() {
            Some(event) => format!("* {} event: {}", who, event),
            None => format!("* {} event ({} bytes)", who, envelope.payload().len()),
        },
        EnvelopeKind::PresenceJoin => format!("--> {} joined", display_name(envelope, who)),
        EnvelopeKind::PresenceLeave => format!("<-- {} left", display_name(envelope, who)),
    }
}

/// Presence notices carry the display name as their payload.
fn display_name<'a>(envelope: &'a Envelope, fallback: &'a str) -> &'a str {
    envelope
        .payload_str()
        .filter(|name| !name.is_empty())
        .unwrap_or(fallback)
}
