/// Derive a subscriber's health URL by replacing the `/api/email/...` tail
/// with `/health`, keeping any mount prefix (`/helpdesk/api/email/inbound`
/// probes `/helpdesk/health`). `None` means the URL has no recognisable tail
/// and the probe is skipped entirely.
pub fn derive_health_url(webhook_url: &str) -> Option<String> {
    let idx = webhook_url.rfind("/api/email/")?;
    Some(format!("{}/health", &webhook_url[..idx]))
}

/// Sleep applied before a POST to an endpoint that has been failing:
/// `min(1000 * 2^(retry_count - 1), 30_000)` ms.
pub fn backoff_delay(retry_count: i32) -> std::time::Duration {
    if retry_count <= 0 {
        return std::time::Duration::ZERO;
    }
    let exponent = (retry_count - 1).min(16) as u32;
    let millis = 1000u64.saturating_mul(1 << exponent).min(30_000);
    std::time::Duration::from_millis(millis)
}
