//! Relay core: moves chat lines between browser connections and ticket channels.
//!
//! Outbound (browser -> platform) resolves or lazily creates the client's ticket channel
//! under the client's creation lock. Inbound (platform -> browser) routes through the
//! channel registry, handles the close command, and feeds the announcement board.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::announcements::{parse_announcement, AnnouncementStore, ACCEPTED_REPLY, FORMAT_REPLY};
use crate::channels::{PlatformError, PlatformMessage, SupportPlatform};
use crate::error::RelayError;
use crate::gateway::connections::{ConnectionId, ConnectionManager};
use crate::gateway::protocol::{close_codes, Sender, ServerEnvelope};
use crate::routing::{ChannelId, ChannelRegistry};
use crate::session::UserProfile;

pub const STATUS_EXISTING_CHAT: &str = "Connected to existing chat session.";
pub const STATUS_WAITING: &str = "Waiting for your first message...";
pub const STATUS_TICKET_CLOSED: &str = "This chat has been closed by support. Thank you for contacting us.";
pub const ACK_MESSAGE: &str = "Your message has been sent. A support agent will respond shortly.";
const ACK_AUTHOR: &str = "Support Bot";

/// Relay behaviour that comes from config.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Command (case-insensitive, exact) that closes a ticket.
    pub close_command: String,
    /// Delay between the terminal status frame and closing the socket.
    pub close_grace: Duration,
    pub announcement_channel_id: Option<u64>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            close_command: "!close".to_string(),
            close_grace: Duration::from_millis(3000),
            announcement_channel_id: None,
        }
    }
}

/// Where an outbound message ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// A new ticket channel was created and the message posted as its summary.
    Opened(ChannelId),
    /// Posted as a follow-up in the existing channel.
    FollowUp(ChannelId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    Closed,
    /// The channel was not (or no longer) mapped; nothing was done.
    AlreadyClosed,
}

/// What happened to an inbound platform message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    Forwarded,
    /// Ticket channel, but the browser is offline.
    Dropped,
    Teardown(Teardown),
    Announcement { accepted: bool },
    /// Not a tracked channel.
    Ignored,
}

pub struct Relay {
    connections: Arc<ConnectionManager>,
    registry: Arc<ChannelRegistry>,
    platform: Arc<dyn SupportPlatform>,
    announcements: Arc<AnnouncementStore>,
    settings: RelaySettings,
}

/// Ticket channel name: stable per user, lowercase letters, digits and dashes.
pub fn ticket_channel_name(user: &UserProfile) -> String {
    let mut slug = String::new();
    for c in user.username.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
        if slug.len() >= 24 {
            break;
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        format!("support-{}", user.id)
    } else {
        format!("support-{}-{}", slug, user.id)
    }
}

fn unavailable(e: PlatformError) -> RelayError {
    RelayError::ChannelUnavailable(e.to_string())
}

impl Relay {
    pub fn new(
        connections: Arc<ConnectionManager>,
        registry: Arc<ChannelRegistry>,
        platform: Arc<dyn SupportPlatform>,
        announcements: Arc<AnnouncementStore>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            connections,
            registry,
            platform,
            announcements,
            settings,
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn platform(&self) -> &Arc<dyn SupportPlatform> {
        &self.platform
    }

    pub fn announcements(&self) -> &Arc<AnnouncementStore> {
        &self.announcements
    }

    /// Handle `init`: authenticate, then tell the browser whether a ticket is already open.
    pub async fn handle_init(&self, id: ConnectionId, session_id: Option<String>) {
        match self.connections.on_init(id, session_id).await {
            Ok(profile) => {
                let text = if self.registry.channel_for(&profile.id).await.is_some() {
                    STATUS_EXISTING_CHAT
                } else {
                    STATUS_WAITING
                };
                self.connections
                    .send(id, ServerEnvelope::authenticated(text, profile))
                    .await;
            }
            Err(e) => {
                log::debug!("init rejected on connection {}: {}", id, e);
                self.connections.reject(id, &e).await;
            }
        }
    }

    /// Handle a chat `message`: admit it, relay it, and acknowledge only when a ticket was opened.
    pub async fn handle_message(&self, id: ConnectionId, text: &str) {
        let profile = match self.connections.on_message(id, text).await {
            Ok(p) => p,
            Err(e) => {
                self.connections.reject_message(id, &e).await;
                return;
            }
        };
        match self.relay_outbound(&profile, text).await {
            Ok(Delivery::Opened(channel)) => {
                log::info!("opened ticket channel {} for user {}", channel, profile.id);
                self.connections
                    .send(id, ServerEnvelope::chat(Sender::Bot, ACK_AUTHOR, ACK_MESSAGE))
                    .await;
            }
            Ok(Delivery::FollowUp(_)) => {}
            Err(e) => {
                log::warn!("relaying message from user {} failed: {}", profile.id, e);
                self.connections.reject(id, &e).await;
            }
        }
    }

    /// Forward a browser message to the client's ticket channel, creating it if needed.
    /// Holds the client's creation lock for the whole call, so messages from one client are posted in order.
    pub async fn relay_outbound(
        &self,
        profile: &UserProfile,
        text: &str,
    ) -> Result<Delivery, RelayError> {
        let guard = self.registry.lock_client(&profile.id).await;
        let result = self.relay_outbound_locked(profile, text).await;
        drop(guard);
        self.registry.forget_client_lock(&profile.id);
        result
    }

    async fn relay_outbound_locked(
        &self,
        profile: &UserProfile,
        text: &str,
    ) -> Result<Delivery, RelayError> {
        if let Some(channel) = self.registry.channel_for(&profile.id).await {
            let sent = match self.platform.resolve_channel(channel).await {
                Ok(()) => self.platform.send_user_message(channel, profile, text).await,
                Err(e) => Err(e),
            };
            match sent {
                Ok(()) => return Ok(Delivery::FollowUp(channel)),
                Err(PlatformError::ChannelGone) => {
                    log::info!(
                        "ticket channel {} of user {} was deleted externally; recreating",
                        channel,
                        profile.id
                    );
                    self.registry.unbind_channel(channel).await;
                }
                Err(e) => return Err(unavailable(e)),
            }
        }

        let channel = self
            .platform
            .create_ticket_channel(&ticket_channel_name(profile))
            .await
            .map_err(unavailable)?;
        self.registry.bind(profile.id.clone(), channel).await;
        self.platform
            .send_ticket_opened(channel, profile, text)
            .await
            .map_err(unavailable)?;
        Ok(Delivery::Opened(channel))
    }

    /// Route a platform message: announcement channel, close command, or support reply.
    pub async fn relay_inbound(&self, msg: PlatformMessage) -> InboundOutcome {
        if self.settings.announcement_channel_id == Some(msg.channel_id) {
            return self.ingest_announcement(&msg).await;
        }
        let Some(client) = self.registry.client_for(msg.channel_id).await else {
            return InboundOutcome::Ignored;
        };
        if msg
            .content
            .trim()
            .eq_ignore_ascii_case(self.settings.close_command.trim())
        {
            return InboundOutcome::Teardown(self.teardown(msg.channel_id).await);
        }

        let mut text = msg.content.trim().to_string();
        for a in &msg.attachments {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&a.url);
        }
        if text.is_empty() {
            return InboundOutcome::Ignored;
        }
        let envelope = ServerEnvelope::chat(Sender::Support, msg.author, text);
        if self.connections.send_to_user(&client, envelope).await {
            log::debug!("forwarded support reply from channel {} to user {}", msg.channel_id, client);
            InboundOutcome::Forwarded
        } else {
            log::debug!("user {} offline; dropping reply from channel {}", client, msg.channel_id);
            InboundOutcome::Dropped
        }
    }

    /// Close a ticket: terminal status to the browser, delayed socket close, unmap, delete the channel.
    /// A second teardown of the same channel is a logged no-op.
    pub async fn teardown(&self, channel: ChannelId) -> Teardown {
        let Some(client) = self.registry.unbind_channel(channel).await else {
            log::info!("teardown of channel {} skipped: not mapped", channel);
            return Teardown::AlreadyClosed;
        };
        self.registry.forget_client_lock(&client);

        if let Some(conn) = self.connections.connection_for_user(&client).await {
            self.connections
                .send(conn, ServerEnvelope::status(STATUS_TICKET_CLOSED))
                .await;
            let connections = self.connections.clone();
            let grace = self.settings.close_grace;
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                connections
                    .close(conn, close_codes::NORMAL, "ticket closed")
                    .await;
            });
        }

        match self.platform.delete_channel(channel).await {
            Ok(()) => log::info!("ticket channel {} of user {} closed", channel, client),
            Err(PlatformError::ChannelGone) => {
                log::info!("ticket channel {} was already deleted", channel)
            }
            Err(e) => log::warn!("deleting ticket channel {} failed: {}", channel, e),
        }
        Teardown::Closed
    }

    async fn ingest_announcement(&self, msg: &PlatformMessage) -> InboundOutcome {
        let (accepted, reply) = match parse_announcement(&msg.content, &msg.attachments) {
            Ok(a) => {
                log::info!("new announcement: {}", a.title);
                if let Err(e) = self.announcements.add(a).await {
                    log::warn!("saving announcements failed: {}", e);
                }
                (true, ACCEPTED_REPLY)
            }
            Err(e) => {
                log::debug!("announcement rejected: {}", e);
                (false, FORMAT_REPLY)
            }
        };
        if let Err(e) = self
            .platform
            .reply(msg.channel_id, msg.message_id, reply)
            .await
        {
            log::warn!("announcement reply failed: {}", e);
        }
        InboundOutcome::Announcement { accepted }
    }

    /// Consume platform messages until the sender side closes.
    pub async fn run_inbound(self: Arc<Self>, mut inbound_rx: mpsc::Receiver<PlatformMessage>) {
        while let Some(msg) = inbound_rx.recv().await {
            self.relay_inbound(msg).await;
        }
        log::debug!("inbound relay loop stopped");
    }
}
