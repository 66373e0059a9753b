use crate::mime::charsets;
use crate::mime::encoded_word::decode_header_value;
use crate::mime::headers::find_header;
use crate::mime::headers::find_subsequence;
use crate::mime::headers::split_header_block;
use crate::mime::headers::unfold_headers;
use crate::mime::transfer::decode_transfer_encoding;
use crate::mime::ParseError;

const MAX_NESTING: usize = 16;

/// A parsed `Content-Type` or `Content-Disposition` value: the leading token
/// plus its `key=value` parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderParams {
    pub token: String,
    params: Vec<(String, String)>,
}

impl HeaderParams {
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let text = charsets::decode_utf8_or_latin1(raw);
        let mut pieces = text.split(';');
        let token = pieces.next()?.trim().to_lowercase();
        if token.is_empty() {
            return None;
        }
        let params = pieces
            .filter_map(|piece| {
                let (key, value) = piece.split_once('=')?;
                let value = value.trim().trim_matches('"');
                Some((key.trim().to_lowercase(), value.to_string()))
            })
            .collect();
        Some(Self { token, params })
    }

    pub fn param(
        &self,
        name: &str,
    ) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// One leaf of the flattened multipart tree. The body keeps its raw bytes;
/// transfer and charset decoding are applied on demand so attachments can
/// preserve their on-wire form.
#[derive(Debug, Clone)]
pub struct Part {
    pub content_type: Option<HeaderParams>,
    pub disposition: Option<HeaderParams>,
    pub transfer_encoding: Option<String>,
    pub body: Vec<u8>,
}

impl Part {
    pub(crate) fn from_section(section: &[u8]) -> Self {
        // a leading blank line means an empty header block; no blank line at
        // all means the whole section is body
        let (header_block, body) = if let Some(body) = section.strip_prefix(b"\r\n") {
            (&b""[..], body)
        } else if let Some(body) = section.strip_prefix(b"\n") {
            (&b""[..], body)
        } else {
            match split_header_block(section) {
                Some((headers, body)) => (headers, body),
                None => (&b""[..], section),
            }
        };
        let headers = unfold_headers(header_block);
        Self {
            content_type: find_header(&headers, "content-type").and_then(HeaderParams::parse),
            disposition: find_header(&headers, "content-disposition").and_then(HeaderParams::parse),
            transfer_encoding: find_header(&headers, "content-transfer-encoding")
                .map(|v| String::from_utf8_lossy(v).trim().to_lowercase()),
            body: body.to_vec(),
        }
    }

    pub fn mime(&self) -> &str {
        self.content_type
            .as_ref()
            .map(|ct| ct.token.as_str())
            .unwrap_or("text/plain")
    }

    pub fn charset(&self) -> &str {
        self.content_type
            .as_ref()
            .and_then(|ct| ct.param("charset"))
            .unwrap_or("utf-8")
    }

    pub fn filename(&self) -> Option<String> {
        let raw = self
            .disposition
            .as_ref()
            .and_then(|d| d.param("filename"))
            .or_else(|| self.content_type.as_ref().and_then(|ct| ct.param("name")))?;
        Some(decode_header_value(raw.as_bytes()))
    }

    pub fn is_attachment(&self) -> bool {
        if let Some(disposition) = &self.disposition {
            if disposition.token.contains("attachment") {
                return true;
            }
            if disposition.param("filename").is_some() {
                return true;
            }
        }
        match &self.content_type {
            Some(ct) => {
                !matches!(ct.token.as_str(), "text/plain" | "text/html" | "message/rfc822")
                    && !ct.token.starts_with("multipart/")
            }
            None => false,
        }
    }

    /// Body with the transfer encoding undone.
    pub fn decoded_bytes(&self) -> Vec<u8> {
        decode_transfer_encoding(&self.body, self.transfer_encoding.as_deref())
    }

    /// Body decoded all the way to text, using the declared charset.
    pub fn decoded_text(&self) -> String {
        charsets::decode(&self.decoded_bytes(), self.charset())
    }
}

/// Flatten a multipart body into its leaves, recursing into nested
/// `multipart/*` containers. Every boundary encountered is recorded in
/// `boundaries` (the corruption heuristic needs them).
pub fn extract_parts(
    body: &[u8],
    boundary: &str,
    boundaries: &mut Vec<String>,
    out: &mut Vec<Part>,
) -> Result<(), ParseError> {
    extract_at_depth(body, boundary, boundaries, out, 0)
}

fn extract_at_depth(
    body: &[u8],
    boundary: &str,
    boundaries: &mut Vec<String>,
    out: &mut Vec<Part>,
    depth: usize,
) -> Result<(), ParseError> {
    if depth >= MAX_NESTING {
        return Err(ParseError::NestingTooDeep(MAX_NESTING));
    }
    boundaries.push(boundary.to_string());
    for section in split_sections(body, boundary) {
        let part = Part::from_section(section);
        let nested = part
            .content_type
            .as_ref()
            .filter(|ct| ct.token.starts_with("multipart/"))
            .and_then(|ct| ct.param("boundary").map(str::to_string));
        match nested {
            Some(nested_boundary) => {
                // some upstreams transfer-encode even container parts
                let decoded = part.decoded_bytes();
                extract_at_depth(&decoded, &nested_boundary, boundaries, out, depth + 1)?;
            }
            None => out.push(part),
        }
    }
    Ok(())
}

/// Slice a multipart body into the content of each section.
///
/// A delimiter only counts when `--boundary` starts a line AND is followed by
/// a line ending, `--`, or transport padding; anything else is a longer,
/// different boundary (a nested part's marker sharing this prefix). The
/// preamble before the first delimiter and the epilogue after `--boundary--`
/// are discarded. A section is never skipped for merely ending in `--`: that
/// is what a nested closing marker looks like.
fn split_sections<'a>(
    body: &'a [u8],
    boundary: &str,
) -> Vec<&'a [u8]> {
    let marker = format!("--{boundary}");
    let marker = marker.as_bytes();
    let mut sections = Vec::new();
    let mut current_start: Option<usize> = None;
    let mut search = 0;
    while search < body.len() {
        let Some(rel) = find_subsequence(&body[search..], marker) else {
            break;
        };
        let at = search + rel;
        let after = at + marker.len();
        let at_line_start = at == 0 || body[at - 1] == b'\n';
        let tail = &body[after..];
        let own_marker = tail.is_empty()
            || tail.starts_with(b"--")
            || matches!(tail[0], b'\r' | b'\n' | b' ' | b'\t');
        if !at_line_start || !own_marker {
            search = after;
            continue;
        }
        if let Some(start) = current_start.take() {
            let section = strip_trailing_newline(&body[start..at]);
            if !section.is_empty() {
                sections.push(section);
            }
        }
        if tail.starts_with(b"--") {
            break;
        }
        // skip the rest of the delimiter line
        search = match tail.iter().position(|&b| b == b'\n') {
            Some(i) => after + i + 1,
            None => body.len(),
        };
        current_start = Some(search);
    }
    if let Some(start) = current_start {
        // missing closing marker; keep what we have
        let section = strip_trailing_newline(&body[start..]);
        if !section.is_empty() {
            sections.push(section);
        }
    }
    sections
}

fn strip_trailing_newline(section: &[u8]) -> &[u8] {
    let section = section.strip_suffix(b"\n").unwrap_or(section);
    section.strip_suffix(b"\r").unwrap_or(section)
}
