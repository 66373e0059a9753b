use encoding_rs::Encoding;

/// Decode a byte sequence using a MIME-declared charset label.
///
/// The label goes through the WHATWG registry (`encoding_rs`), which maps the
/// usual aliases: `latin-1`/`iso-8859-1` land on windows-1252 (a superset),
/// `utf-16` without an endianness suffix is resolved by BOM sniffing inside
/// `decode`. Unknown labels fall back to lossy UTF-8; this is the last step of
/// a field decode, never the ingress path.
pub fn decode(
    bytes: &[u8],
    label: &str,
) -> String {
    let label = label.trim().trim_matches('"').trim();
    match Encoding::for_label(label.as_bytes()) {
        Some(encoding) => encoding.decode(bytes).0.into_owned(),
        None => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// UTF-8 when the bytes are valid UTF-8, latin-1 otherwise. Applied to header
/// segments that carry high-bit bytes without an RFC-2047 encoded-word.
pub fn decode_utf8_or_latin1(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}
