use crate::mime::ParseError;

/// Locate `needle` anywhere in `haystack`.
pub(crate) fn find_subsequence(
    haystack: &[u8],
    needle: &[u8],
) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Split a raw message (or a multipart section) into its header block and
/// body at the first CRLFCRLF, falling back to LFLF for messages that lost
/// their CRs somewhere upstream.
pub(crate) fn split_header_block(raw: &[u8]) -> Option<(&[u8], &[u8])> {
    if let Some(i) = find_subsequence(raw, b"\r\n\r\n") {
        return Some((&raw[..i], &raw[i + 4..]));
    }
    find_subsequence(raw, b"\n\n").map(|i| (&raw[..i], &raw[i + 2..]))
}

pub(crate) fn split_message(raw: &[u8]) -> Result<(&[u8], &[u8]), ParseError> {
    split_header_block(raw).ok_or(ParseError::MissingBodySeparator)
}

/// One unfolded header. The value keeps its raw bytes: charset decisions are
/// made per field, later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: Vec<u8>,
}

/// Unfold a header block: continuation lines (leading SP/HTAB) are joined to
/// the previous header with a single space. Lines without a colon that are not
/// continuations are dropped.
pub(crate) fn unfold_headers(block: &[u8]) -> Vec<Header> {
    let mut headers: Vec<Header> = Vec::new();
    for line in block.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        if line[0] == b' ' || line[0] == b'\t' {
            if let Some(last) = headers.last_mut() {
                let folded = trim_bytes(line);
                if !folded.is_empty() {
                    last.value.push(b' ');
                    last.value.extend_from_slice(folded);
                }
            }
            continue;
        }
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            continue;
        };
        let name = String::from_utf8_lossy(trim_bytes(&line[..colon])).into_owned();
        let value = trim_bytes(&line[colon + 1..]).to_vec();
        if !name.is_empty() {
            headers.push(Header { name, value });
        }
    }
    headers
}

pub(crate) fn find_header<'a>(
    headers: &'a [Header],
    name: &str,
) -> Option<&'a [u8]> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_slice())
}

fn trim_bytes(mut bytes: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = bytes {
        bytes = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = bytes {
        bytes = rest;
    }
    bytes
}
