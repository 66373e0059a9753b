use base64::engine::general_purpose::STANDARD;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;

/// Decode a quoted-printable body to bytes. Soft line breaks (`=` before
/// CRLF/LF) disappear; `=HH` produces the octet `0xHH` — never a code point;
/// everything else passes through unchanged. Malformed escapes are kept
/// literally rather than dropped.
pub fn decode_quoted_printable(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        let b = data[i];
        if b != b'=' {
            out.push(b);
            i += 1;
            continue;
        }
        match data.get(i + 1) {
            // soft break: `=\r\n` or `=\n`
            Some(b'\r') if data.get(i + 2) == Some(&b'\n') => i += 3,
            Some(b'\n') => i += 2,
            Some(&hi) if data.get(i + 2).is_some() => {
                let lo = data[i + 2];
                match (hex_value(hi), hex_value(lo)) {
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
            // trailing `=` (or `=X` at end of input)
            _ => break,
        }
    }
    out
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Base64 with the whitespace the wire inserts (folded lines) removed.
/// Returns `None` when the payload is not base64 at all; padding variants are
/// tolerated.
pub fn decode_base64(data: &[u8]) -> Option<Vec<u8>> {
    let compact: Vec<u8> = data
        .iter()
        .copied()
        .filter(|b| !b" \t\r\n".contains(b))
        .collect();
    STANDARD
        .decode(&compact)
        .or_else(|_| {
            let trimmed = compact.strip_suffix(b"==").unwrap_or(&compact);
            let trimmed = trimmed.strip_suffix(b"=").unwrap_or(trimmed);
            STANDARD_NO_PAD.decode(trimmed)
        })
        .ok()
}

/// Strip whitespace from on-wire base64 text without decoding it. Attachments
/// that arrived as base64 are forwarded in this form.
pub fn compact_base64(data: &[u8]) -> String {
    data.iter()
        .copied()
        .filter(|b| !b" \t\r\n".contains(b))
        .map(|b| b as char)
        .collect()
}

/// Apply a `Content-Transfer-Encoding` to a part body. `7bit`, `8bit`,
/// `binary` and absent encodings pass through; a base64 body that fails to
/// decode also passes through untouched.
pub fn decode_transfer_encoding(
    data: &[u8],
    encoding: Option<&str>,
) -> Vec<u8> {
    let encoding = encoding.map(|e| e.trim().to_lowercase());
    match encoding.as_deref() {
        Some("quoted-printable") => decode_quoted_printable(data),
        Some("base64") => decode_base64(data).unwrap_or_else(|| data.to_vec()),
        _ => data.to_vec(),
    }
}
