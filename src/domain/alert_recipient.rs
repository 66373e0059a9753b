use validator::ValidateEmail;

/// Operator address for out-of-band alerts (delivery timeouts). Must be
/// instantiated with `AlertRecipient::parse`, which rejects anything that does
/// not look like an email address; a typo'd config value should fail at
/// startup, not when the first alert is due.
#[derive(Debug, Clone)]
pub struct AlertRecipient(String);

impl AlertRecipient {
    pub fn parse(email: String) -> Result<Self, String> {
        ValidateEmail::validate_email(&email)
            .then_some(Self(email.clone()))
            .ok_or(format!("Invalid alert recipient: {email:?}"))
    }
}

impl AsRef<str> for AlertRecipient {
    fn as_ref(&self) -> &str { &self.0 }
}
