//! Byte-faithful RFC-5322/MIME parsing.
//!
//! Everything here operates on `&[u8]`; nothing converts the raw message to a
//! host string on the way in, because a lossy conversion at ingress destroys
//! the very bytes a declared charset needs later. Text materialises exactly
//! once per field, at the end of that field's decode chain.

pub mod charsets;
pub mod encoded_word;
mod headers;
mod multipart;
pub mod transfer;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::domain::normalize_message_id;
use crate::domain::strip_display_name;
use crate::domain::Attachment;
use crate::domain::RawHeader;
use crate::mime::encoded_word::decode_header_value;
use crate::mime::headers::find_header;
use crate::mime::headers::split_message;
use crate::mime::headers::unfold_headers;
use crate::mime::multipart::extract_parts;
use crate::mime::multipart::Part;
use crate::mime::transfer::compact_base64;
use crate::mime::transfer::decode_base64;

#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("no header/body separator (CRLFCRLF or LFLF) found")]
    MissingBodySeparator,
    #[error("multipart nesting exceeds {0} levels")]
    NestingTooDeep(usize),
}

/// The canonical parse result: decoded headers, selected bodies, extracted
/// attachments.
#[derive(Debug, Clone, Default)]
pub struct ParsedEmail {
    /// Bare sender address, display name stripped
    pub from: Option<String>,
    /// Decoded `To` header; display-name stripping is the caller's concern
    pub to: Option<String>,
    pub subject: String,
    /// Normalized (no angle brackets, trimmed)
    pub message_id: Option<String>,
    pub body_text: String,
    pub body_html: Option<String>,
    pub attachments: Vec<Attachment>,
    /// Unfolded headers in message order, `Subject` replaced by its decoded
    /// value
    pub raw_headers: Vec<RawHeader>,
}

pub fn parse_message(raw: &[u8]) -> Result<ParsedEmail, ParseError> {
    let (header_block, body) = split_message(raw)?;
    let headers = unfold_headers(header_block);

    let subject = find_header(&headers, "subject")
        .map(decode_header_value)
        .unwrap_or_default();
    let from = find_header(&headers, "from")
        .map(|v| strip_display_name(&decode_header_value(v)));
    let to = find_header(&headers, "to").map(|v| decode_header_value(v));
    let message_id = find_header(&headers, "message-id")
        .map(|v| normalize_message_id(&charsets::decode_utf8_or_latin1(v)));

    let outer = Part::from_message(header_block, body);
    let mut boundaries = Vec::new();
    let mut parts = Vec::new();
    match outer.multipart_boundary() {
        Some(boundary) => {
            let decoded = outer.decoded_container_bytes();
            extract_parts(&decoded, &boundary, &mut boundaries, &mut parts)?;
        }
        None => parts.push(outer),
    }

    let (body_text, body_html) = select_bodies(&parts, &boundaries);
    let attachments = collect_attachments(&parts);

    let raw_headers = headers
        .iter()
        .map(|h| RawHeader {
            name: h.name.clone(),
            value: match h.name.eq_ignore_ascii_case("subject") {
                true => subject.clone(),
                false => charsets::decode_utf8_or_latin1(&h.value),
            },
        })
        .collect();

    Ok(ParsedEmail {
        from,
        to,
        subject,
        message_id,
        body_text: body_text.unwrap_or_default(),
        body_html,
        attachments,
        raw_headers,
    })
}

fn select_bodies(
    parts: &[Part],
    boundaries: &[String],
) -> (Option<String>, Option<String>) {
    let mut body_text: Option<String> = None;
    let mut body_html: Option<String> = None;
    for part in parts {
        if part.is_attachment() {
            continue;
        }
        match part.mime() {
            "text/plain" if body_text.is_none() => body_text = Some(part.decoded_text()),
            "text/html" if body_html.is_none() => body_html = Some(part.decoded_text()),
            _ => {}
        }
    }
    // a text-only message still gets an html rendition, unless the text looks
    // corrupted (subscribers then fall back to the raw content)
    if body_html.is_none() {
        if let Some(text) = body_text.as_deref().filter(|t| !t.is_empty()) {
            if looks_suspicious(text, boundaries) {
                tracing::warn!("parsed text body looks corrupted; skipping html synthesis");
            } else {
                body_html = Some(text.replace("\r\n", "<br>").replace('\n', "<br>"));
            }
        }
    }
    (body_text, body_html)
}

/// Decoded under 10 characters, nothing but punctuation/whitespace, or a
/// boundary marker leaking into the text.
fn looks_suspicious(
    text: &str,
    boundaries: &[String],
) -> bool {
    if text.chars().count() < 10 {
        return true;
    }
    if text.chars().all(|c| c.is_ascii_punctuation() || c.is_whitespace()) {
        return true;
    }
    boundaries.iter().any(|b| text.contains(b.as_str()))
}

fn collect_attachments(parts: &[Part]) -> Vec<Attachment> {
    let mut attachments = Vec::new();
    for part in parts {
        if !part.is_attachment() {
            continue;
        }
        let filename = part
            .filename()
            .unwrap_or_else(|| format!("attachment-{}", attachments.len() + 1));
        let content_type = part
            .content_type
            .as_ref()
            .map(|ct| ct.token.clone())
            .unwrap_or_else(|| "application/octet-stream".to_string());

        // base64 attachments keep their wire form; everything else keeps its
        // (byte-preserving) decoded bytes, re-encoded locally
        let wire_base64 = part.transfer_encoding.as_deref() == Some("base64");
        let attachment = match wire_base64.then(|| decode_base64(&part.body)).flatten() {
            Some(decoded) => Attachment {
                filename,
                content_type,
                size: decoded.len(),
                content: compact_base64(&part.body),
                raw_base64: true,
            },
            None => {
                let bytes = part.decoded_bytes();
                Attachment {
                    filename,
                    content_type,
                    size: bytes.len(),
                    content: BASE64.encode(&bytes),
                    raw_base64: false,
                }
            }
        };
        attachments.push(attachment);
    }
    attachments
}

impl Part {
    /// Build the outermost "part" from the message's own headers and body.
    fn from_message(
        header_block: &[u8],
        body: &[u8],
    ) -> Self {
        let mut synthetic = Vec::with_capacity(header_block.len() + body.len() + 4);
        synthetic.extend_from_slice(header_block);
        synthetic.extend_from_slice(b"\r\n\r\n");
        synthetic.extend_from_slice(body);
        Self::from_section(&synthetic)
    }

    fn multipart_boundary(&self) -> Option<String> {
        self.content_type
            .as_ref()
            .filter(|ct| ct.token.starts_with("multipart/"))
            .and_then(|ct| ct.param("boundary"))
            .map(str::to_string)
    }

    /// Container bodies may themselves be transfer-encoded; undo that before
    /// splitting on the boundary.
    fn decoded_container_bytes(&self) -> Vec<u8> {
        self.decoded_bytes()
    }
}
