mod alert_recipient;
mod email_address;
mod inbound_email;
mod notification;
mod subscription;

// allow external `use` statements to skip `inbound_email` etc
pub use alert_recipient::AlertRecipient;
pub use email_address::normalize_message_id;
pub use email_address::strip_display_name;
pub use inbound_email::Attachment;
pub use inbound_email::InboundStatus;
pub use inbound_email::RawHeader;
pub use notification::InboundNotification;
pub use notification::MailHeaders;
pub use notification::MailInfo;
pub use notification::ObjectRecord;
pub use notification::ReceiptAction;
pub use notification::ReceiptInfo;
pub use subscription::DeliveryStatus;
pub use subscription::SubscriptionFilters;
pub use subscription::SubscriptionStatus;
