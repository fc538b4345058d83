//! Discord channel: serenity gateway client for ticket channels and inbound messages.

use crate::channels::inbound::{Attachment, PlatformMessage};
use crate::channels::platform::{PlatformError, SupportPlatform};
use crate::config::ResolvedDiscord;
use crate::session::UserProfile;
use async_trait::async_trait;
use serenity::all::{
    Channel, ChannelId, ChannelType, Client, Context, CreateChannel, CreateEmbed, CreateMessage,
    EventHandler, GatewayIntents, GuildId, Message, MessageId, MessageReference,
    PermissionOverwrite, PermissionOverwriteType, Permissions, Ready, RoleId, ShardManager,
    Timestamp, UserId,
};
use serenity::http::{Http, HttpError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

const TICKET_OPENED_COLOR: u32 = 0x00ff00;
const FOLLOW_UP_COLOR: u32 = 0xb891f9;

/// Discord JSON error codes.
const UNKNOWN_CHANNEL: isize = 10003;
const UNKNOWN_GUILD: isize = 10004;

/// Discord connector: creates and deletes ticket channels, posts embeds, forwards guild messages.
pub struct DiscordChannel {
    id: String,
    token: String,
    guild_id: u64,
    support_category_id: u64,
    announcement_channel_id: Option<u64>,
    bot_user_id: AtomicU64,
    http: RwLock<Option<Arc<Http>>>,
    shard_manager: RwLock<Option<Arc<ShardManager>>>,
}

impl DiscordChannel {
    pub fn new(discord: &ResolvedDiscord) -> Self {
        Self {
            id: "discord".to_string(),
            token: discord.bot_token.clone(),
            guild_id: discord.guild_id,
            support_category_id: discord.support_category_id,
            announcement_channel_id: discord.announcement_channel_id,
            bot_user_id: AtomicU64::new(0),
            http: RwLock::new(None),
            shard_manager: RwLock::new(None),
        }
    }

    fn bot_user_id(&self) -> u64 {
        self.bot_user_id.load(Ordering::SeqCst)
    }

    async fn http(&self) -> Result<Arc<Http>, PlatformError> {
        self.http
            .read()
            .await
            .clone()
            .ok_or(PlatformError::NotConnected)
    }

    /// Connect to the Discord gateway and forward guild messages to the relay. Returns a handle to await on shutdown.
    pub fn start_inbound(self: Arc<Self>, inbound_tx: mpsc::Sender<PlatformMessage>) -> JoinHandle<()> {
        log::info!("discord channel: connecting to gateway");
        tokio::spawn(async move {
            if let Err(e) = run_client(self, inbound_tx).await {
                log::warn!("discord client stopped: {}", e);
            }
            log::info!("discord channel: gateway client stopped");
        })
    }

    /// Convert a Discord message into a relay message. Bot authors and other guilds are skipped.
    fn normalize_message(&self, msg: &Message) -> Option<PlatformMessage> {
        if msg.author.bot {
            return None;
        }
        if msg.guild_id.map(|g| g.get()) != Some(self.guild_id) {
            return None;
        }
        Some(PlatformMessage {
            channel_id: msg.channel_id.get(),
            message_id: msg.id.get(),
            author: msg.author.name.clone(),
            content: msg.content.clone(),
            attachments: msg
                .attachments
                .iter()
                .map(|a| Attachment {
                    url: a.url.clone(),
                    content_type: a.content_type.clone(),
                })
                .collect(),
        })
    }

    /// Log whether the configured category and announcement channel exist.
    async fn check_channels(&self, http: &Http) {
        match ChannelId::new(self.support_category_id).to_channel(http).await {
            Ok(Channel::Guild(c)) if c.kind == ChannelType::Category => {
                log::info!("support category \"{}\" found ({})", c.name, c.id)
            }
            Ok(_) => log::warn!(
                "support category {} is not a category channel",
                self.support_category_id
            ),
            Err(e) => log::warn!(
                "support category {} not found: {}",
                self.support_category_id,
                e
            ),
        }
        if let Some(id) = self.announcement_channel_id {
            match ChannelId::new(id).to_channel(http).await {
                Ok(c) => log::info!("announcement channel found ({})", c.id()),
                Err(e) => log::warn!("announcement channel {} not found: {}", id, e),
            }
        }
    }
}

async fn run_client(
    channel: Arc<DiscordChannel>,
    inbound_tx: mpsc::Sender<PlatformMessage>,
) -> Result<(), serenity::Error> {
    let intents =
        GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT;
    let handler = DiscordHandler {
        channel: channel.clone(),
        inbound_tx,
    };
    let mut client = Client::builder(&channel.token, intents)
        .event_handler(handler)
        .await?;
    *channel.http.write().await = Some(client.http.clone());
    *channel.shard_manager.write().await = Some(client.shard_manager.clone());
    client.start().await
}

struct DiscordHandler {
    channel: Arc<DiscordChannel>,
    inbound_tx: mpsc::Sender<PlatformMessage>,
}

#[serenity::async_trait]
impl EventHandler for DiscordHandler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        log::info!("discord bot logged in as {} ({})", ready.user.name, ready.user.id);
        self.channel
            .bot_user_id
            .store(ready.user.id.get(), Ordering::SeqCst);
        self.channel.check_channels(&ctx.http).await;
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        let Some(inbound) = self.channel.normalize_message(&msg) else {
            return;
        };
        log::debug!(
            "discord message in channel {} ({} bytes)",
            inbound.channel_id,
            inbound.content.len()
        );
        if self.inbound_tx.send(inbound).await.is_err() {
            log::debug!("discord: inbound channel closed, dropping message");
        }
    }
}

/// Map a serenity error, recognizing "unknown channel" and "unknown guild" responses.
fn classify(e: serenity::Error) -> PlatformError {
    if let serenity::Error::Http(HttpError::UnsuccessfulRequest(ref resp)) = e {
        if resp.error.code == UNKNOWN_GUILD {
            return PlatformError::GuildUnavailable;
        }
        if resp.error.code == UNKNOWN_CHANNEL || resp.status_code.as_u16() == 404 {
            return PlatformError::ChannelGone;
        }
    }
    PlatformError::Request(e.to_string())
}

fn ticket_opened_embed(user: &UserProfile, first_message: &str) -> CreateEmbed {
    CreateEmbed::new()
        .title("New chat from user")
        .description(format!("**First message:** {}", first_message))
        .field("User", user.display_name(), true)
        .field("User ID", user.id.clone(), true)
        .color(TICKET_OPENED_COLOR)
        .timestamp(Timestamp::now())
}

fn follow_up_embed(user: &UserProfile, message: &str) -> CreateEmbed {
    CreateEmbed::new()
        .title(user.display_name())
        .description(message)
        .field("User ID", user.id.clone(), true)
        .color(FOLLOW_UP_COLOR)
        .timestamp(Timestamp::now())
}

#[async_trait]
impl SupportPlatform for DiscordChannel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn stop(&self) {
        if let Some(manager) = self.shard_manager.read().await.clone() {
            manager.shutdown_all().await;
        }
    }

    async fn resolve_channel(&self, channel_id: u64) -> Result<(), PlatformError> {
        let http = self.http().await?;
        ChannelId::new(channel_id)
            .to_channel(&*http)
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn create_ticket_channel(&self, name: &str) -> Result<u64, PlatformError> {
        let http = self.http().await?;
        let bot = self.bot_user_id();
        if bot == 0 {
            return Err(PlatformError::NotConnected);
        }
        let overwrites = vec![
            PermissionOverwrite {
                allow: Permissions::empty(),
                deny: Permissions::VIEW_CHANNEL,
                kind: PermissionOverwriteType::Role(RoleId::new(self.guild_id)),
            },
            PermissionOverwrite {
                allow: Permissions::VIEW_CHANNEL
                    | Permissions::SEND_MESSAGES
                    | Permissions::READ_MESSAGE_HISTORY,
                deny: Permissions::empty(),
                kind: PermissionOverwriteType::Member(UserId::new(bot)),
            },
        ];
        let builder = CreateChannel::new(name)
            .kind(ChannelType::Text)
            .category(ChannelId::new(self.support_category_id))
            .permissions(overwrites);
        let created = GuildId::new(self.guild_id)
            .create_channel(&*http, builder)
            .await
            .map_err(|e| match classify(e) {
                PlatformError::ChannelGone => PlatformError::CategoryUnavailable,
                other => other,
            })?;
        Ok(created.id.get())
    }

    async fn send_ticket_opened(
        &self,
        channel_id: u64,
        user: &UserProfile,
        first_message: &str,
    ) -> Result<(), PlatformError> {
        let http = self.http().await?;
        let msg = CreateMessage::new().embed(ticket_opened_embed(user, first_message));
        ChannelId::new(channel_id)
            .send_message(&*http, msg)
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn send_user_message(
        &self,
        channel_id: u64,
        user: &UserProfile,
        message: &str,
    ) -> Result<(), PlatformError> {
        let http = self.http().await?;
        let msg = CreateMessage::new().embed(follow_up_embed(user, message));
        ChannelId::new(channel_id)
            .send_message(&*http, msg)
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn reply(&self, channel_id: u64, message_id: u64, text: &str) -> Result<(), PlatformError> {
        let http = self.http().await?;
        let channel = ChannelId::new(channel_id);
        let msg = CreateMessage::new()
            .content(text)
            .reference_message(MessageReference::from((channel, MessageId::new(message_id))));
        channel
            .send_message(&*http, msg)
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn delete_channel(&self, channel_id: u64) -> Result<(), PlatformError> {
        let http = self.http().await?;
        ChannelId::new(channel_id)
            .delete(&*http)
            .await
            .map(|_| ())
            .map_err(classify)
    }
}
