//! Internal module for decoding and parsing raw messages.

use crate::error::{Error, Result};
use crate::mail::MailMessage;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use mailparse::{parse_mail, MailHeaderMap, ParsedMail};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// Base64url that accepts payloads with or without padding.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"));
static HTML_HIDDEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(style|script|head)[^>]*>.*?</(style|script|head)>")
        .expect("valid hidden-block regex")
});

/// Decodes a base64url payload.
pub(crate) fn decode_base64url(data: &str) -> Result<Vec<u8>> {
    URL_SAFE_LENIENT
        .decode(data.trim())
        .map_err(|e| Error::Decode {
            what: "base64url payload",
            message: e.to_string(),
        })
}

/// Parses a raw RFC 822 message into the fields the poll loop searches.
pub(crate) fn parse_message(id: &str, snippet: &str, raw: &[u8]) -> Result<MailMessage> {
    let parsed = parse_mail(raw).map_err(|source| Error::ParseEmail { source })?;

    let from = parsed.headers.get_first_value("From").unwrap_or_default();
    let subject = parsed
        .headers
        .get_first_value("Subject")
        .unwrap_or_default();
    let body = extract_body_text(&parsed).map_err(|source| Error::ParseEmail { source })?;
    debug!(id, body_len = body.len(), "Parsed message");

    Ok(MailMessage {
        id: id.to_string(),
        from,
        subject,
        snippet: snippet.to_string(),
        body,
    })
}

/// Extracts text content from a parsed email, handling multipart messages.
///
/// `text/plain` is preferred over `text/html` anywhere in the tree; HTML is
/// reduced to its visible text.
fn extract_body_text(parsed: &ParsedMail<'_>) -> std::result::Result<String, mailparse::MailParseError> {
    if parsed.subparts.is_empty() {
        let body = parsed.get_body()?;
        return Ok(if is_mimetype(parsed, "text/html") {
            html_to_text(&body)
        } else {
            body
        });
    }

    if let Some(plain) = find_part(parsed, "text/plain") {
        return plain.get_body();
    }
    if let Some(html) = find_part(parsed, "text/html") {
        return Ok(html_to_text(&html.get_body()?));
    }

    // No text parts found, fall back to the first subpart
    match parsed.subparts.first() {
        Some(first) => extract_body_text(first),
        None => parsed.get_body(),
    }
}

fn find_part<'a, 'b>(parsed: &'a ParsedMail<'b>, mimetype: &str) -> Option<&'a ParsedMail<'b>> {
    if is_mimetype(parsed, mimetype) && parsed.subparts.is_empty() {
        return Some(parsed);
    }
    parsed
        .subparts
        .iter()
        .find_map(|part| find_part(part, mimetype))
}

fn is_mimetype(parsed: &ParsedMail<'_>, mimetype: &str) -> bool {
    parsed.ctype.mimetype.eq_ignore_ascii_case(mimetype)
}

fn html_to_text(html: &str) -> String {
    let visible = HTML_HIDDEN.replace_all(html, " ");
    let text = HTML_TAG.replace_all(&visible, " ");
    text.replace("&nbsp;", " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
