use crate::mime::charsets;
use crate::mime::headers::find_subsequence;
use crate::mime::transfer::decode_base64;

// RFC-2047: `=?charset?(B|Q)?text?=`. A header may interleave any number of
// encoded-words with plain text; whitespace between two adjacent
// encoded-words is transparent per the RFC.

struct EncodedWord {
    /// Offset of the leading `=?`
    start: usize,
    /// Offset one past the trailing `?=`
    end: usize,
    decoded: String,
}

/// Decode a full header value. Encoded-words are decoded with their declared
/// charset; plain segments adopt a UTF-8 interpretation only when valid and
/// read as latin-1 otherwise.
pub fn decode_header_value(raw: &[u8]) -> String {
    let mut out = String::new();
    let mut pos = 0;
    let mut after_encoded_word = false;
    let mut search = 0;
    while let Some(word) = next_encoded_word(raw, search) {
        let gap = &raw[pos..word.start];
        // whitespace separating two encoded-words carries no content
        if !(after_encoded_word && gap.iter().all(|b| b.is_ascii_whitespace())) {
            out.push_str(&charsets::decode_utf8_or_latin1(gap));
        }
        out.push_str(&word.decoded);
        pos = word.end;
        search = word.end;
        after_encoded_word = true;
    }
    out.push_str(&charsets::decode_utf8_or_latin1(&raw[pos..]));
    out
}

fn next_encoded_word(
    raw: &[u8],
    mut search: usize,
) -> Option<EncodedWord> {
    while search + 2 <= raw.len() {
        let rel = find_subsequence(&raw[search..], b"=?")?;
        let start = search + rel;
        match parse_encoded_word(raw, start) {
            Some(word) => return Some(word),
            // not a well-formed word; keep looking past this `=?`
            None => search = start + 2,
        }
    }
    None
}

fn parse_encoded_word(
    raw: &[u8],
    start: usize,
) -> Option<EncodedWord> {
    let inner = &raw[start + 2..];
    let charset_end = inner.iter().position(|&b| b == b'?')?;
    let charset = &inner[..charset_end];
    let encoding = *inner.get(charset_end + 1)?;
    if inner.get(charset_end + 2) != Some(&b'?') {
        return None;
    }
    let text_start = charset_end + 3;
    let text_len = find_subsequence(&inner[text_start..], b"?=")?;
    let text = &inner[text_start..text_start + text_len];
    if charset.is_empty() || charset.contains(&b'\n') || text.contains(&b'\n') {
        return None;
    }

    let bytes = match encoding {
        b'B' | b'b' => decode_base64(text)?,
        b'Q' | b'q' => decode_q(text),
        _ => return None,
    };
    // charset labels may carry an RFC-2231 language suffix (`*lang`)
    let charset = charset.split(|&b| b == b'*').next().unwrap_or(charset);
    let label = String::from_utf8_lossy(charset);
    Some(EncodedWord {
        start,
        end: start + 2 + text_start + text_len + 2,
        decoded: charsets::decode(&bytes, &label),
    })
}

/// The Q form: `_` is a space, `=HH` is the octet `0xHH`. The result is a byte
/// string; the charset decode happens afterwards, on the whole word.
fn decode_q(text: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    let mut i = 0;
    while i < text.len() {
        match text[i] {
            b'_' => {
                out.push(b' ');
                i += 1;
            }
            b'=' if i + 2 < text.len() => {
                match (hex(text[i + 1]), hex(text[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                    }
                    _ => {
                        out.push(b'=');
                        i += 1;
                    }
                }
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    out
}

fn hex(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
