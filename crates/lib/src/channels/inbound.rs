//! Inbound message from the support platform: delivered to the relay for routing.

/// File attached to a platform message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub content_type: Option<String>,
}

/// A human-written message in a guild channel the bot can see.
#[derive(Debug, Clone)]
pub struct PlatformMessage {
    pub channel_id: u64,
    pub message_id: u64,
    /// Author display name as shown to the browser.
    pub author: String,
    pub content: String,
    pub attachments: Vec<Attachment>,
}
