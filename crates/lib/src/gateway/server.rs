//! Gateway HTTP + WebSocket server (single port).

use crate::announcements::AnnouncementStore;
use crate::block::{BlockList, MemoryBlockList};
use crate::channels::{DiscordChannel, PlatformMessage, SupportPlatform};
use crate::config::{self, Config};
use crate::gateway::auth;
use crate::gateway::connections::{ConnectionId, ConnectionManager, HandshakeMeta, Outbound};
use crate::gateway::protocol::{close_codes, parse_client_frame, ClientEnvelope, ServerEnvelope};
use crate::gateway::relay::{Relay, RelaySettings};
use crate::oauth::OAuthClient;
use crate::routing::ChannelRegistry;
use crate::session::{MemorySessionStore, SessionStore};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;

const PROTOCOL_VERSION: u32 = 1;

/// Transport cap for one WebSocket frame.
const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Events broadcast to every socket task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayEvent {
    Shutdown,
}

/// Shared state for the gateway (config, stores, relay, platform).
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub relay: Arc<Relay>,
    pub sessions: Arc<dyn SessionStore>,
    pub blocks: Arc<dyn BlockList>,
    /// None when Discord login is not configured.
    pub oauth: Option<Arc<OAuthClient>>,
    /// Broadcasts events to connected sockets (e.g. shutdown).
    pub event_tx: broadcast::Sender<GatewayEvent>,
    /// Platform connector tasks; awaited during graceful shutdown.
    pub channel_tasks: Arc<RwLock<Vec<JoinHandle<()>>>>,
}

impl GatewayState {
    /// Wire the connection manager, channel registry and relay around the given collaborators.
    pub fn new(
        config: Config,
        platform: Arc<dyn SupportPlatform>,
        sessions: Arc<dyn SessionStore>,
        blocks: Arc<dyn BlockList>,
        announcements: Arc<AnnouncementStore>,
    ) -> Self {
        let connections = Arc::new(ConnectionManager::new(
            config.limits.clone(),
            config.discord.support_agent_ids.clone(),
            sessions.clone(),
            blocks.clone(),
        ));
        let settings = RelaySettings {
            close_command: config.discord.close_command.clone(),
            close_grace: Duration::from_millis(config.discord.close_grace_millis),
            announcement_channel_id: config::resolve_announcement_channel_id(&config),
        };
        let relay = Arc::new(Relay::new(
            connections,
            Arc::new(ChannelRegistry::new()),
            platform,
            announcements,
            settings,
        ));
        let oauth = OAuthClient::from_config(&config::resolve_oauth(&config)).map(Arc::new);
        if oauth.is_none() {
            log::warn!("discord login not configured (set oauth.clientId, oauth.clientSecret, oauth.redirectUri)");
        }
        let (event_tx, _) = broadcast::channel(16);
        Self {
            config: Arc::new(config),
            relay,
            sessions,
            blocks,
            oauth,
            event_tx,
            channel_tasks: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Register a platform task to be awaited during graceful shutdown.
    pub async fn register_channel_task(&self, handle: JoinHandle<()>) {
        self.channel_tasks.write().await.push(handle);
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        self.relay.connections()
    }
}

/// HTTP routes and the WebSocket endpoint.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/ws", get(ws_handler))
        .route("/auth/discord", get(auth::discord_login))
        .route("/auth/discord/callback", get(auth::discord_callback))
        .route("/auth/session", get(auth::session_status))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/check-block/:user_id", get(auth::check_block))
        .route("/api/announcements", get(auth::announcements))
        .with_state(state)
}

/// Run the gateway: connect the Discord bot, then serve on config.gateway.bind:config.gateway.port.
/// Blocks until shutdown (e.g. Ctrl+C).
/// `config_path` locates the announcements file when `announcements.path` is unset.
pub async fn run_gateway(config: Config, config_path: PathBuf) -> Result<()> {
    let discord = config::resolve_discord(&config)?;
    let bind = config.gateway.bind.trim().to_string();
    if !config::is_loopback_bind(&bind) && !config.sessions.secure_cookie {
        log::warn!(
            "binding to {} with sessions.secureCookie disabled; session cookies will be sent over plain http",
            bind
        );
    }

    let announcements_path = config::resolve_announcements_path(&config, &config_path);
    let announcements =
        Arc::new(AnnouncementStore::load(&announcements_path, config.announcements.max).await);
    let discord = Arc::new(DiscordChannel::new(&discord));
    let port = config.gateway.port;
    let state = GatewayState::new(
        config,
        discord.clone(),
        Arc::new(MemorySessionStore::new()),
        Arc::new(MemoryBlockList::new()),
        announcements,
    );

    let (inbound_tx, inbound_rx) = mpsc::channel::<PlatformMessage>(64);
    tokio::spawn(state.relay.clone().run_inbound(inbound_rx));
    let handle = discord.start_inbound(inbound_tx);
    state.register_channel_task(handle).await;
    log::info!("discord channel registered and gateway client started");

    let bind_addr = format!("{}:{}", bind, port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);
    serve(listener, state).await
}

/// Serve the router on an already bound listener, with periodic session re-validation,
/// until SIGINT or SIGTERM.
pub async fn serve(listener: TcpListener, state: GatewayState) -> Result<()> {
    let revalidation = tokio::spawn(revalidate_loop(state.connections().clone()));
    let event_tx = state.event_tx.clone();
    let platform = state.relay.platform().clone();
    let channel_tasks = state.channel_tasks.clone();

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal(event_tx, platform, channel_tasks))
        .await
        .context("gateway server exited")?;
    revalidation.abort();
    log::info!("gateway stopped");
    Ok(())
}

async fn revalidate_loop(connections: Arc<ConnectionManager>) {
    let mut interval = tokio::time::interval(connections.limits().revalidate_interval());
    interval.tick().await;
    loop {
        interval.tick().await;
        let closed = connections.revalidate().await;
        if closed > 0 {
            log::info!("revalidation closed {} connection(s)", closed);
        }
    }
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// Broadcasts shutdown to sockets, stops the platform connector, then awaits its tasks.
async fn shutdown_signal(
    event_tx: broadcast::Sender<GatewayEvent>,
    platform: Arc<dyn SupportPlatform>,
    channel_tasks: Arc<RwLock<Vec<JoinHandle<()>>>>,
) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, closing connections");

    let _ = event_tx.send(GatewayEvent::Shutdown);
    platform.stop().await;

    let handles = {
        let mut g = channel_tasks.write().await;
        std::mem::take(&mut *g)
    };
    for h in handles {
        let _ = h.await;
    }
    log::info!("channel tasks finished");
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "protocol": PROTOCOL_VERSION,
        "port": state.config.gateway.port,
        "connections": state.connections().len().await,
    }))
}

/// GET /ws upgrades to WebSocket. The first frame must be `init`.
async fn ws_handler(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let meta = HandshakeMeta {
        cookie_session: auth::cookie_value(&headers, &state.config.sessions.cookie_name),
    };
    // Oversized chat text must still reach the size check so the client gets `message_too_large`.
    let max_frame = MAX_FRAME_BYTES.max(state.config.limits.max_message_bytes.saturating_mul(4) + 1024);
    ws.max_message_size(max_frame)
        .on_upgrade(move |socket| handle_socket(socket, state, meta))
}

fn close_message(code: u16, reason: impl Into<String>) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into().into(),
    }))
}

async fn handle_socket(mut socket: WebSocket, state: GatewayState, meta: HandshakeMeta) {
    let connections = state.connections().clone();
    let (tx, mut out_rx) = mpsc::unbounded_channel();
    let id = match connections.on_connect(tx, meta).await {
        Ok(id) => id,
        Err(e) => {
            let _ = socket
                .send(Message::Text(ServerEnvelope::error(&e).to_json()))
                .await;
            let code = e.close_code().unwrap_or(close_codes::TRY_AGAIN_LATER);
            let _ = socket.send(close_message(code, e.code())).await;
            return;
        }
    };
    let mut event_rx = state.event_tx.subscribe();

    loop {
        let deadline = connections
            .deadline(id)
            .await
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
        tokio::select! {
            biased;

            event = event_rx.recv() => {
                match event {
                    Ok(GatewayEvent::Shutdown) | Err(broadcast::error::RecvError::Closed) => {
                        let _ = socket.send(close_message(close_codes::GOING_AWAY, "server shutting down")).await;
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::debug!("ws client lagged {} broadcast events", n);
                    }
                }
            }
            out = out_rx.recv() => {
                match out {
                    Some(Outbound::Envelope(envelope)) => {
                        if socket.send(Message::Text(envelope.to_json())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close { code, reason }) => {
                        let _ = socket.send(close_message(code, reason)).await;
                        break;
                    }
                    None => break,
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                connections.expire_if_due(id).await;
            }
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => handle_frame(&state, id, &text).await,
                    Message::Close(_) => break,
                    _ => continue,
                }
            }
        }
    }
    connections.on_close(id).await;
}

/// Dispatch one browser frame. Handlers run to completion before the next frame is read.
async fn handle_frame(state: &GatewayState, id: ConnectionId, text: &str) {
    match parse_client_frame(text) {
        Ok(ClientEnvelope::Init { session_id }) => state.relay.handle_init(id, session_id).await,
        Ok(ClientEnvelope::Message { message }) => state.relay.handle_message(id, &message).await,
        Ok(ClientEnvelope::Heartbeat) => {
            state.connections().on_heartbeat(id).await;
        }
        Err(e) => {
            log::debug!("invalid frame on connection {}: {}", id, e);
            state.connections().reject_message(id, &e).await;
        }
    }
}
