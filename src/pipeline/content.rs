//! Message decoding: subject, readable text, and plain links.

use std::sync::LazyLock;

use mail_parser::{Message, MessageParser, MessagePart, MimeHeaders, PartType};
use regex::Regex;

static LINK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://\S+").unwrap());

/// Characters dropped from the end of an extracted link.
const LINK_TRAILERS: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '}', '>', '"', '\''];

/// The parts of an email the matcher looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageContent {
    /// Decoded `Subject` header, empty when absent.
    pub subject: String,
    /// Every text/plain part verbatim plus every text/html part stripped to text.
    pub text: String,
}

impl MessageContent {
    /// Parse a raw RFC 822 message. Returns `None` if it can't be parsed.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let parsed = MessageParser::default().parse(raw)?;
        let subject = parsed.subject().unwrap_or_default().to_string();
        let mut parts = Vec::new();
        collect_text(&parsed, &mut parts);
        Some(Self {
            subject,
            text: parts.join("\n"),
        })
    }

    /// Subject and body joined, as tested by the keyword matcher.
    pub fn search_space(&self) -> String {
        format!("{}\n{}", self.subject, self.text)
    }

    /// Links found in the body text, in order of appearance.
    pub fn links(&self) -> Vec<String> {
        extract_links(&self.text)
    }
}

fn collect_text(message: &Message<'_>, out: &mut Vec<String>) {
    for part in &message.parts {
        match &part.body {
            PartType::Text(text) if is_plain_text(part) => out.push(text.to_string()),
            PartType::Html(html) => out.push(strip_html(html)),
            PartType::Message(inner) => collect_text(inner, out),
            PartType::Text(_)
            | PartType::Binary(_)
            | PartType::InlineBinary(_)
            | PartType::Multipart(_) => {}
        }
    }
}

/// text/plain, or a part with no `Content-Type` at all.
fn is_plain_text(part: &MessagePart<'_>) -> bool {
    part.content_type().is_none_or(|ct| {
        ct.ctype().eq_ignore_ascii_case("text")
            && ct.subtype().is_none_or(|sub| sub.eq_ignore_ascii_case("plain"))
    })
}

/// Find every `http(s)://` link in plain text.
///
/// Trailing sentence punctuation and closing brackets are not part of the link.
pub fn extract_links(text: &str) -> Vec<String> {
    LINK_RE
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches(LINK_TRAILERS))
        .filter(|link| link.contains("://") && !link.ends_with("://"))
        .map(str::to_string)
        .collect()
}

/// Wrap width handed to the HTML renderer; wide enough that links stay on one line.
const HTML_WRAP_WIDTH: usize = 4096;

/// Render HTML to plain text and collapse whitespace.
///
/// Falls back to the raw markup if the renderer rejects it.
pub fn strip_html(html: &str) -> String {
    let text = html2text::from_read(html.as_bytes(), HTML_WRAP_WIDTH).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "HTML render failed, searching raw markup");
        html.to_string()
    });
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
