/// Reduce an RFC-5322 mailbox to its bare address: `"Jane Doe"
/// <jane@example.com>` becomes `jane@example.com`. Subscribers and filters only
/// ever see the bare form.
pub fn strip_display_name(value: &str) -> String {
    let value = value.trim();
    if let (Some(open), Some(close)) = (value.rfind('<'), value.rfind('>')) {
        if open < close {
            return value[open + 1..close].trim().to_string();
        }
    }
    // no angle-bracket wrapper; drop any stray quotes around a bare address
    value.trim_matches('"').trim().to_string()
}

/// Canonical form of a Message-ID used for dedup: surrounding whitespace and
/// angle brackets removed. Both ingress paths and the catch-up replay must
/// produce the same key for the same logical message.
pub fn normalize_message_id(value: &str) -> String {
    value
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim()
        .to_string()
}
