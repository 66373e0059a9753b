use regex::RegexBuilder;
use serde::Deserialize;
use serde::Serialize;

use crate::domain::strip_display_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Active,
    Suspended,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
        }
    }
}

/// Final-hop delivery accounting. `Sent` means the first HTTP POST returned
/// 2xx; `Delivered`/`Failed` are set by the subscriber's confirmation
/// callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            other => Err(format!("Invalid delivery status: {other:?}")),
        }
    }
}

/// Per-subscription routing filters, stored as JSONB on the subscription row.
///
/// A missing key matches everything. `to`/`from` entries are either exact
/// addresses or `*@domain` wildcards; `subject_pattern` is a case-insensitive
/// regular expression. Filters always see bare addresses (display names
/// stripped).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_pattern: Option<String>,
}

impl SubscriptionFilters {
    /// Whether an email with the given (already stripped) addresses and
    /// decoded subject should be delivered to this subscription.
    pub fn matches(
        &self,
        to: &str,
        from: &str,
        subject: &str,
    ) -> bool {
        if let Some(patterns) = &self.to {
            if !patterns.iter().any(|p| address_matches(p, to)) {
                return false;
            }
        }
        if let Some(patterns) = &self.from {
            if !patterns.iter().any(|p| address_matches(p, from)) {
                return false;
            }
        }
        if let Some(pattern) = &self.subject_pattern {
            // an unparseable pattern must never open the floodgates
            let re = match RegexBuilder::new(pattern).case_insensitive(true).build() {
                Ok(re) => re,
                Err(e) => {
                    tracing::warn!(
                        error.message = %e,
                        pattern,
                        "invalid subject pattern treated as non-match"
                    );
                    return false;
                }
            };
            if !re.is_match(subject) {
                return false;
            }
        }
        true
    }
}

/// `*@domain` matches any address in that domain; anything else is an exact
/// (case-insensitive) comparison. Inputs may still carry display names.
fn address_matches(
    pattern: &str,
    address: &str,
) -> bool {
    let address = strip_display_name(address).to_lowercase();
    let pattern = pattern.trim().to_lowercase();
    match pattern.strip_prefix('*') {
        Some(domain) if domain.starts_with('@') => address.ends_with(domain),
        _ => address == pattern,
    }
}
