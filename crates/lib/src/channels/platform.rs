//! Support platform: the messaging side of the relay (ticket channels, embeds, replies).

use async_trait::async_trait;
use thiserror::Error;

use crate::session::UserProfile;

/// Adapter failure. `ChannelGone` means the channel no longer exists and the mapping must be dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("channel no longer exists")]
    ChannelGone,
    #[error("support guild not available")]
    GuildUnavailable,
    #[error("support category not available")]
    CategoryUnavailable,
    #[error("bot is not connected")]
    NotConnected,
    #[error("platform request failed: {0}")]
    Request(String),
}

/// Handle to a running support platform connector.
#[async_trait]
pub trait SupportPlatform: Send + Sync {
    /// Platform id (e.g. "discord").
    fn id(&self) -> &str;

    /// Stop the connector. Default does nothing.
    async fn stop(&self) {}

    /// Check that a ticket channel still exists.
    async fn resolve_channel(&self, channel_id: u64) -> Result<(), PlatformError>;

    /// Create a private ticket channel visible only to the bot (and staff through category permissions).
    async fn create_ticket_channel(&self, name: &str) -> Result<u64, PlatformError>;

    /// Post the ticket summary: who opened it and their first message.
    async fn send_ticket_opened(
        &self,
        channel_id: u64,
        user: &UserProfile,
        first_message: &str,
    ) -> Result<(), PlatformError>;

    /// Post a follow-up message from the website user.
    async fn send_user_message(
        &self,
        channel_id: u64,
        user: &UserProfile,
        message: &str,
    ) -> Result<(), PlatformError>;

    /// Reply to a platform message (announcement confirmations).
    async fn reply(&self, channel_id: u64, message_id: u64, text: &str) -> Result<(), PlatformError>;

    async fn delete_channel(&self, channel_id: u64) -> Result<(), PlatformError>;
}
