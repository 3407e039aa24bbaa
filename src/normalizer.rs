//! Message normalizer: raw RFC 822 bytes to subject, sender and plain text.

use mail_parser::{Message, MessageParser, PartType};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::NormalizeError;

/// Separator placed between the text of consecutive MIME parts.
const PART_SEPARATOR: &str = "\n\n";

/// Subject, sender and best-effort plain-text body of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    /// Decoded subject line.
    pub subject: String,
    /// `Name <address>` or bare address.
    pub sender: String,
    /// Concatenated text of every decodable part.
    pub body: String,
}

/// Normalize a raw message.
///
/// Encoded-word subjects and transfer encodings are decoded by the parser.
/// Parts that don't yield text are skipped; the call fails only when the
/// message can't be parsed, has no subject, or no part yields any text.
pub fn normalize(raw: &[u8]) -> Result<NormalizedMessage, NormalizeError> {
    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| NormalizeError::MalformedMessage("unparseable message".into()))?;

    let subject = parsed
        .subject()
        .ok_or_else(|| NormalizeError::MalformedMessage("missing Subject header".into()))?
        .trim()
        .to_string();

    let body = extract_body(&parsed)
        .ok_or_else(|| NormalizeError::MalformedMessage("no decodable text part".into()))?;

    Ok(NormalizedMessage {
        subject,
        sender: extract_sender(&parsed),
        body,
    })
}

/// Concatenate the text of every part that decodes.
///
/// Returns `None` only if no part produced text at all.
fn extract_body(parsed: &Message<'_>) -> Option<String> {
    let mut texts: Vec<String> = Vec::new();
    let mut any_decoded = false;

    for (index, part) in parsed.parts.iter().enumerate() {
        let text = match &part.body {
            PartType::Text(text) => Some(text.to_string()),
            PartType::Html(html) => Some(strip_html(html)),
            PartType::Binary(bytes) | PartType::InlineBinary(bytes) => {
                std::str::from_utf8(bytes).ok().map(str::to_string)
            }
            // Forwarded mail: its own parts are walked recursively.
            PartType::Message(nested) => extract_body(nested),
            PartType::Multipart(_) => continue,
        };

        match text {
            Some(text) => {
                any_decoded = true;
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    texts.push(trimmed.to_string());
                }
            }
            None => debug!(part = index, "Skipping part that is not valid text"),
        }
    }

    any_decoded.then(|| texts.join(PART_SEPARATOR))
}

/// Extract the sender from a parsed message.
fn extract_sender(parsed: &Message<'_>) -> String {
    let Some(addr) = parsed.from().and_then(|from| from.first()) else {
        return "unknown".to_string();
    };
    match (addr.name(), addr.address()) {
        (Some(name), Some(address)) => format!("{name} <{address}>"),
        (None, Some(address)) => address.to_string(),
        (Some(name), None) => name.to_string(),
        (None, None) => "unknown".to_string(),
    }
}

/// Flatten HTML to plain text.
///
/// Tags are dropped; `<br>` and block-level tags become line breaks so
/// paragraphs survive, and the common character entities are decoded.
/// Runs of whitespace collapse within each line and blank lines go away.
pub fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut tag = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' if !in_tag => {
                in_tag = true;
                tag.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                if breaks_line(&tag) {
                    text.push('\n');
                }
            }
            _ if in_tag => tag.push(ch),
            _ => text.push(ch),
        }
    }

    decode_entities(&text)
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn breaks_line(tag: &str) -> bool {
    let name = tag
        .trim_start_matches('/')
        .split(|c: char| c.is_whitespace() || c == '/')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    matches!(
        name.as_str(),
        "br" | "p" | "div" | "li" | "tr" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "blockquote"
    )
}

fn decode_entities(text: &str) -> String {
    // `&amp;` last so `&amp;lt;` stays `&lt;`.
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
