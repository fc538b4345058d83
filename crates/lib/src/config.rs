//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.helpdesk/config.json`) and environment.
//! Discord credentials and ids can come from either; environment wins so deployments
//! can keep secrets out of the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Connection and message limits enforced by the connection manager.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Discord bot settings (guild, ticket category, announcement channel).
    #[serde(default)]
    pub discord: DiscordConfig,

    /// Discord OAuth application used for website login.
    #[serde(default)]
    pub oauth: OAuthConfig,

    /// Session cookie settings.
    #[serde(default)]
    pub sessions: SessionsConfig,

    /// Announcement board settings.
    #[serde(default)]
    pub announcements: AnnouncementsConfig,
}

/// Gateway bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for HTTP and WebSocket (default 3000). Overridden by PORT env.
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    3000
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

/// Limits for WebSocket connections and chat messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitsConfig {
    /// Maximum concurrent sockets, pending and authenticated (default 100).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Seconds a new socket has to send a valid `init` (default 30).
    #[serde(default = "default_init_timeout_secs")]
    pub init_timeout_secs: u64,
    /// Seconds an authenticated socket may stay silent, heartbeats included (default 300).
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Messages allowed per user inside one rate window (default 5).
    #[serde(default = "default_messages_per_window")]
    pub messages_per_window: usize,
    /// Length of the sliding rate window in milliseconds (default 1000).
    #[serde(default = "default_window_millis")]
    pub window_millis: u64,
    /// Largest accepted chat message in bytes (default 2000).
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    /// How often authenticated sockets are re-checked against the session store and block list (default 60).
    #[serde(default = "default_revalidate_interval_secs")]
    pub revalidate_interval_secs: u64,
}

fn default_max_connections() -> usize {
    100
}
fn default_init_timeout_secs() -> u64 {
    30
}
fn default_idle_timeout_secs() -> u64 {
    300
}
fn default_messages_per_window() -> usize {
    5
}
fn default_window_millis() -> u64 {
    1000
}
fn default_max_message_bytes() -> usize {
    2000
}
fn default_revalidate_interval_secs() -> u64 {
    60
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            init_timeout_secs: default_init_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            messages_per_window: default_messages_per_window(),
            window_millis: default_window_millis(),
            max_message_bytes: default_max_message_bytes(),
            revalidate_interval_secs: default_revalidate_interval_secs(),
        }
    }
}

impl LimitsConfig {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_millis)
    }

    pub fn revalidate_interval(&self) -> Duration {
        Duration::from_secs(self.revalidate_interval_secs.max(1))
    }
}

/// Discord bot config. Ids are Discord snowflakes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordConfig {
    /// Bot token. Overridden by DISCORD_TOKEN env when set.
    pub bot_token: Option<String>,
    /// Guild that hosts ticket channels. Overridden by DISCORD_GUILD_ID.
    pub guild_id: Option<u64>,
    /// Category new ticket channels are created under. Overridden by DISCORD_SUPPORT_CATEGORY_ID.
    pub support_category_id: Option<u64>,
    /// Channel whose messages are parsed as website announcements. Overridden by DISCORD_ANNOUNCEMENT_CHANNEL_ID.
    pub announcement_channel_id: Option<u64>,
    /// Text a support agent posts in a ticket channel to close it (case-insensitive, default "!close").
    #[serde(default = "default_close_command")]
    pub close_command: String,
    /// Delay between the terminal status frame and closing the browser socket (default 3000).
    #[serde(default = "default_close_grace_millis")]
    pub close_grace_millis: u64,
    /// Discord user ids flagged as support agents when they open a website session.
    #[serde(default)]
    pub support_agent_ids: Vec<String>,
}

fn default_close_command() -> String {
    "!close".to_string()
}

fn default_close_grace_millis() -> u64 {
    3000
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            guild_id: None,
            support_category_id: None,
            announcement_channel_id: None,
            close_command: default_close_command(),
            close_grace_millis: default_close_grace_millis(),
            support_agent_ids: Vec::new(),
        }
    }
}

/// Discord OAuth2 application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthConfig {
    /// Application client id. Overridden by DISCORD_CLIENT_ID.
    pub client_id: Option<String>,
    /// Application client secret. Overridden by DISCORD_CLIENT_SECRET.
    pub client_secret: Option<String>,
    /// Registered redirect URI. Overridden by REDIRECT_URI.
    pub redirect_uri: Option<String>,
    /// Discord API base (default "https://discord.com/api/v10").
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Where the browser lands after a successful login (default "/").
    #[serde(default = "default_post_login_redirect")]
    pub post_login_redirect: String,
}

fn default_api_base() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_post_login_redirect() -> String {
    "/".to_string()
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            redirect_uri: None,
            api_base: default_api_base(),
            post_login_redirect: default_post_login_redirect(),
        }
    }
}

/// Session cookie settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsConfig {
    /// Cookie carrying the session id (default "sessionId").
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Upper bound on session lifetime and cookie Max-Age in seconds (default 7 days).
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    /// Mark the cookie Secure. Disable only for plain-http local development.
    #[serde(default = "default_true")]
    pub secure_cookie: bool,
}

fn default_cookie_name() -> String {
    "sessionId".to_string()
}

fn default_max_age_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_true() -> bool {
    true
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            max_age_secs: default_max_age_secs(),
            secure_cookie: true,
        }
    }
}

/// Announcement board settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnouncementsConfig {
    /// How many announcements are kept, newest first (default 4).
    #[serde(default = "default_max_announcements")]
    pub max: usize,
    /// JSON file the board is persisted to (default ~/.helpdesk/announcements.json).
    pub path: Option<PathBuf>,
}

fn default_max_announcements() -> usize {
    4
}

impl Default for AnnouncementsConfig {
    fn default() -> Self {
        Self {
            max: default_max_announcements(),
            path: None,
        }
    }
}

/// True if the bind address only accepts local connections.
pub fn is_loopback_bind(bind: &str) -> bool {
    match bind.trim() {
        "localhost" => true,
        b => b
            .parse::<std::net::IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false),
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

fn trimmed(value: Option<&String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_id(key: &str) -> Option<u64> {
    env_non_empty(key).and_then(|s| s.parse().ok()).filter(|id| *id != 0)
}

/// Resolve the Discord bot token: env DISCORD_TOKEN overrides config.
pub fn resolve_bot_token(config: &Config) -> Option<String> {
    env_non_empty("DISCORD_TOKEN").or_else(|| trimmed(config.discord.bot_token.as_ref()))
}

/// Resolve the guild id: env DISCORD_GUILD_ID overrides config.
pub fn resolve_guild_id(config: &Config) -> Option<u64> {
    env_id("DISCORD_GUILD_ID").or(config.discord.guild_id.filter(|id| *id != 0))
}

/// Resolve the ticket category id: env DISCORD_SUPPORT_CATEGORY_ID overrides config.
pub fn resolve_support_category_id(config: &Config) -> Option<u64> {
    env_id("DISCORD_SUPPORT_CATEGORY_ID").or(config.discord.support_category_id.filter(|id| *id != 0))
}

/// Resolve the announcement channel id: env DISCORD_ANNOUNCEMENT_CHANNEL_ID overrides config.
pub fn resolve_announcement_channel_id(config: &Config) -> Option<u64> {
    env_id("DISCORD_ANNOUNCEMENT_CHANNEL_ID")
        .or(config.discord.announcement_channel_id.filter(|id| *id != 0))
}

/// Resolve OAuth client credentials and redirect: DISCORD_CLIENT_ID, DISCORD_CLIENT_SECRET and REDIRECT_URI override config.
pub fn resolve_oauth(config: &Config) -> OAuthConfig {
    let oauth = &config.oauth;
    OAuthConfig {
        client_id: env_non_empty("DISCORD_CLIENT_ID").or_else(|| trimmed(oauth.client_id.as_ref())),
        client_secret: env_non_empty("DISCORD_CLIENT_SECRET")
            .or_else(|| trimmed(oauth.client_secret.as_ref())),
        redirect_uri: env_non_empty("REDIRECT_URI").or_else(|| trimmed(oauth.redirect_uri.as_ref())),
        api_base: oauth.api_base.trim_end_matches('/').to_string(),
        post_login_redirect: oauth.post_login_redirect.clone(),
    }
}

/// Resolve the listen port: env PORT overrides config (hosting platforms set it).
pub fn resolve_port(config: &Config) -> u16 {
    env_non_empty("PORT")
        .and_then(|s| s.parse().ok())
        .unwrap_or(config.gateway.port)
}

/// Fully resolved Discord settings required to run the bot.
#[derive(Debug, Clone)]
pub struct ResolvedDiscord {
    pub bot_token: String,
    pub guild_id: u64,
    pub support_category_id: u64,
    pub announcement_channel_id: Option<u64>,
}

/// Resolve Discord settings, failing when the token, guild or category is missing.
pub fn resolve_discord(config: &Config) -> Result<ResolvedDiscord> {
    let bot_token = resolve_bot_token(config)
        .context("discord bot token missing (set discord.botToken or DISCORD_TOKEN)")?;
    let guild_id = resolve_guild_id(config)
        .context("discord guild id missing (set discord.guildId or DISCORD_GUILD_ID)")?;
    let support_category_id = resolve_support_category_id(config).context(
        "discord support category missing (set discord.supportCategoryId or DISCORD_SUPPORT_CATEGORY_ID)",
    )?;
    Ok(ResolvedDiscord {
        bot_token,
        guild_id,
        support_category_id,
        announcement_channel_id: resolve_announcement_channel_id(config),
    })
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("HELPDESK_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".helpdesk").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Resolve the announcements file: `announcements.path` if set, otherwise next to the config file.
pub fn resolve_announcements_path(config: &Config, config_path: &std::path::Path) -> PathBuf {
    match &config.announcements.path {
        Some(p) if !p.as_os_str().is_empty() => p.clone(),
        _ => config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."))
            .join("announcements.json"),
    }
}

/// Load config from the given path (or HELPDESK_CONFIG_PATH / default). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s).with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn loopback_binds() {
        assert!(is_loopback_bind("127.0.0.1"));
        assert!(is_loopback_bind(" ::1 "));
        assert!(is_loopback_bind("localhost"));
        assert!(!is_loopback_bind("0.0.0.0"));
        assert!(!is_loopback_bind("support.example"));
    }

    #[test]
    fn default_gateway_port_and_bind() {
        let g = GatewayConfig::default();
        assert_eq!(g.port, 3000);
        assert_eq!(g.bind, "127.0.0.1");
    }

    #[test]
    fn empty_json_fills_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.limits.max_connections, 100);
        assert_eq!(config.limits.messages_per_window, 5);
        assert_eq!(config.limits.window(), Duration::from_secs(1));
        assert_eq!(config.limits.init_timeout(), Duration::from_secs(30));
        assert_eq!(config.discord.close_command, "!close");
        assert_eq!(config.sessions.cookie_name, "sessionId");
        assert!(config.sessions.secure_cookie);
        assert_eq!(config.announcements.max, 4);
    }

    #[test]
    fn camel_case_fields_parse() {
        let json = r#"{
            "limits": { "maxConnections": 7, "messagesPerWindow": 2 },
            "discord": { "guildId": 42, "supportCategoryId": 43, "closeCommand": "!done" },
            "sessions": { "secureCookie": false }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.limits.max_connections, 7);
        assert_eq!(config.limits.messages_per_window, 2);
        assert_eq!(config.limits.idle_timeout_secs, 300);
        assert_eq!(config.discord.guild_id, Some(42));
        assert_eq!(config.discord.close_command, "!done");
        assert!(!config.sessions.secure_cookie);
    }

    #[test]
    fn announcements_path_defaults_next_to_config() {
        let config = Config::default();
        let path = Path::new("/home/user/.helpdesk/config.json");
        assert_eq!(
            resolve_announcements_path(&config, path),
            PathBuf::from("/home/user/.helpdesk/announcements.json")
        );
    }

    #[test]
    fn announcements_path_override() {
        let mut config = Config::default();
        config.announcements.path = Some(PathBuf::from("/srv/board.json"));
        let path = Path::new("/home/user/.helpdesk/config.json");
        assert_eq!(
            resolve_announcements_path(&config, path),
            PathBuf::from("/srv/board.json")
        );
    }

    #[test]
    fn zero_ids_are_treated_as_unset() {
        let mut config = Config::default();
        config.discord.support_category_id = Some(0);
        assert_eq!(config.discord.support_category_id.filter(|id| *id != 0), None);
    }
}
