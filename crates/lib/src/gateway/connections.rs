//! Connection manager: owns every browser WebSocket connection.
//!
//! A socket registers as *pending* on upgrade and becomes *authenticated* after a valid
//! `init`. Session and block lookups are awaited before the connection map is touched; the
//! one-connection-per-user rule is re-checked and applied under the map lock afterwards.
//! Sockets never talk to each other directly: every frame goes through the connection's
//! outbound queue, which the socket task drains.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

use crate::block::BlockList;
use crate::config::LimitsConfig;
use crate::error::RelayError;
use crate::gateway::protocol::{close_codes, ServerEnvelope};
use crate::gateway::rate_limit::SlidingWindow;
use crate::session::{SessionStore, UserProfile};

pub type ConnectionId = u64;

/// Work item for a socket task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Envelope(ServerEnvelope),
    /// Send a close frame and end the socket task.
    Close { code: u16, reason: String },
}

/// What the upgrade request told us about the client.
#[derive(Debug, Clone, Default)]
pub struct HandshakeMeta {
    /// Session id from the `sessionId` cookie, used when `init` omits it.
    pub cookie_session: Option<String>,
}

struct Authenticated {
    session_id: String,
    profile: UserProfile,
    last_activity: Instant,
}

struct Connection {
    tx: mpsc::UnboundedSender<Outbound>,
    cookie_session: Option<String>,
    connected_at: Instant,
    auth: Option<Authenticated>,
}

#[derive(Default)]
struct Inner {
    next_id: ConnectionId,
    connections: HashMap<ConnectionId, Connection>,
    by_user: HashMap<String, ConnectionId>,
    /// Per-user message windows. Outlive connections so a reconnect keeps the user's recent hits.
    limiters: HashMap<String, SlidingWindow>,
}

impl Inner {
    /// Remove a connection from both maps. Returns its sender so the caller can still notify it.
    fn detach(&mut self, id: ConnectionId) -> Option<mpsc::UnboundedSender<Outbound>> {
        let conn = self.connections.remove(&id)?;
        if let Some(auth) = &conn.auth {
            if self.by_user.get(&auth.profile.id) == Some(&id) {
                self.by_user.remove(&auth.profile.id);
            }
        }
        Some(conn.tx)
    }
}

/// Tracks pending and authenticated sockets; enforces limits, timeouts and rate limits.
pub struct ConnectionManager {
    limits: LimitsConfig,
    support_agents: HashSet<String>,
    sessions: Arc<dyn SessionStore>,
    blocks: Arc<dyn BlockList>,
    inner: Mutex<Inner>,
}

impl ConnectionManager {
    pub fn new(
        limits: LimitsConfig,
        support_agents: impl IntoIterator<Item = String>,
        sessions: Arc<dyn SessionStore>,
        blocks: Arc<dyn BlockList>,
    ) -> Self {
        Self {
            limits,
            support_agents: support_agents.into_iter().collect(),
            sessions,
            blocks,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    /// Register a new socket as pending. Fails when the connection limit is reached.
    pub async fn on_connect(
        &self,
        tx: mpsc::UnboundedSender<Outbound>,
        meta: HandshakeMeta,
    ) -> Result<ConnectionId, RelayError> {
        let mut g = self.inner.lock().await;
        if g.connections.len() >= self.limits.max_connections {
            log::warn!(
                "rejecting connection: limit of {} reached",
                self.limits.max_connections
            );
            return Err(RelayError::ConnectionLimitExceeded);
        }
        g.next_id += 1;
        let id = g.next_id;
        g.connections.insert(
            id,
            Connection {
                tx,
                cookie_session: meta.cookie_session.filter(|s| !s.trim().is_empty()),
                connected_at: Instant::now(),
                auth: None,
            },
        );
        log::debug!("connection {} pending ({} open)", id, g.connections.len());
        Ok(id)
    }

    /// Authenticate a connection. On success the user's previous connection, if any, is closed.
    pub async fn on_init(
        &self,
        id: ConnectionId,
        session_id: Option<String>,
    ) -> Result<UserProfile, RelayError> {
        let cookie = {
            let g = self.inner.lock().await;
            let conn = g.connections.get(&id).ok_or(RelayError::Unauthenticated)?;
            conn.cookie_session.clone()
        };
        let session_id = session_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or(cookie)
            .ok_or(RelayError::Unauthenticated)?;

        let session = match self.sessions.get(&session_id).await {
            Ok(Some(s)) => s,
            Ok(None) => return Err(RelayError::Unauthenticated),
            Err(e) => {
                log::warn!("session lookup failed: {}", e);
                return Err(RelayError::Unauthenticated);
            }
        };
        let now = Utc::now();
        if session.is_expired(now) {
            if let Err(e) = self.sessions.remove(&session.id).await {
                log::warn!("removing expired session failed: {}", e);
            }
            return Err(RelayError::SessionExpired);
        }
        match self.blocks.check(&session.user_id, now).await {
            Ok(None) => {}
            Ok(Some(entry)) => {
                return Err(RelayError::UserBlocked {
                    reason: entry.reason,
                    until: entry.until,
                })
            }
            Err(e) => {
                log::warn!("block list lookup failed: {}", e);
                return Err(RelayError::Unauthenticated);
            }
        }

        let profile = session.profile(self.support_agents.contains(&session.user_id));
        let mut g = self.inner.lock().await;
        if !g.connections.contains_key(&id) {
            return Err(RelayError::Unauthenticated);
        }
        if let Some(prev) = g.by_user.get(&profile.id).copied().filter(|p| *p != id) {
            if let Some(tx) = g.detach(prev) {
                log::info!(
                    "user {} reconnected: closing connection {} for {}",
                    profile.id,
                    prev,
                    id
                );
                let _ = tx.send(Outbound::Close {
                    code: close_codes::REPLACED,
                    reason: "replaced by a newer connection".to_string(),
                });
            }
        }
        let previous_user = g
            .connections
            .get_mut(&id)
            .and_then(|conn| {
                conn.auth
                    .replace(Authenticated {
                        session_id: session.id.clone(),
                        profile: profile.clone(),
                        last_activity: Instant::now(),
                    })
                    .map(|old| old.profile.id)
            })
            .filter(|old| *old != profile.id);
        if let Some(old) = previous_user {
            if g.by_user.get(&old) == Some(&id) {
                g.by_user.remove(&old);
            }
        }
        g.by_user.insert(profile.id.clone(), id);
        log::info!("connection {} authenticated as user {}", id, profile.id);
        Ok(profile)
    }

    /// Admit one chat message. Returns the sender's profile when the message may be relayed.
    pub async fn on_message(&self, id: ConnectionId, text: &str) -> Result<UserProfile, RelayError> {
        let profile = {
            let g = self.inner.lock().await;
            g.connections
                .get(&id)
                .and_then(|c| c.auth.as_ref())
                .map(|a| a.profile.clone())
                .ok_or(RelayError::Unauthenticated)?
        };
        if text.len() > self.limits.max_message_bytes {
            return Err(RelayError::MessageTooLarge {
                limit: self.limits.max_message_bytes,
            });
        }
        if text.trim().is_empty() {
            return Err(RelayError::InvalidMessage("message is empty".to_string()));
        }
        match self.blocks.check(&profile.id, Utc::now()).await {
            Ok(None) => {}
            Ok(Some(entry)) => {
                return Err(RelayError::UserBlocked {
                    reason: entry.reason,
                    until: entry.until,
                })
            }
            Err(e) => {
                log::warn!("block list lookup failed: {}", e);
                return Err(RelayError::Unauthenticated);
            }
        }

        let mut g = self.inner.lock().await;
        let inner = &mut *g;
        let auth = inner
            .connections
            .get_mut(&id)
            .and_then(|c| c.auth.as_mut())
            .ok_or(RelayError::Unauthenticated)?;
        let now = Instant::now();
        let limiter = inner
            .limiters
            .entry(auth.profile.id.clone())
            .or_insert_with(|| {
                SlidingWindow::new(self.limits.messages_per_window, self.limits.window())
            });
        if !limiter.try_acquire(now) {
            log::debug!("user {} rate limited", auth.profile.id);
            return Err(RelayError::RateLimited);
        }
        auth.last_activity = now;
        Ok(auth.profile.clone())
    }

    /// Refresh the idle timer of an authenticated connection. Pending sockets are unaffected.
    pub async fn on_heartbeat(&self, id: ConnectionId) -> bool {
        let mut g = self.inner.lock().await;
        match g.connections.get_mut(&id).and_then(|c| c.auth.as_mut()) {
            Some(auth) => {
                auth.last_activity = Instant::now();
                true
            }
            None => false,
        }
    }

    /// When the connection times out: init deadline while pending, idle deadline once authenticated.
    pub async fn deadline(&self, id: ConnectionId) -> Option<Instant> {
        let g = self.inner.lock().await;
        let conn = g.connections.get(&id)?;
        Some(match &conn.auth {
            None => conn.connected_at + self.limits.init_timeout(),
            Some(auth) => auth.last_activity + self.limits.idle_timeout(),
        })
    }

    /// Close the connection with `Timeout` if its deadline has passed. Returns whether it was closed.
    pub async fn expire_if_due(&self, id: ConnectionId) -> bool {
        match self.deadline(id).await {
            Some(deadline) if Instant::now() >= deadline => {
                log::debug!("connection {} timed out", id);
                self.reject(id, &RelayError::Timeout).await;
                true
            }
            _ => false,
        }
    }

    /// Send an error frame. Terminal errors also detach the connection and close it.
    pub async fn reject(&self, id: ConnectionId, err: &RelayError) {
        let envelope = ServerEnvelope::error(err);
        let mut g = self.inner.lock().await;
        match err.close_code() {
            Some(code) if err.is_terminal() => {
                if let Some(tx) = g.detach(id) {
                    let _ = tx.send(Outbound::Envelope(envelope));
                    let _ = tx.send(Outbound::Close {
                        code,
                        reason: err.code().to_string(),
                    });
                }
            }
            _ => {
                if let Some(conn) = g.connections.get(&id) {
                    let _ = conn.tx.send(Outbound::Envelope(envelope));
                }
            }
        }
    }

    /// Reject a chat message. A message sent before `init` only gets an error frame; the init timer still applies.
    pub async fn reject_message(&self, id: ConnectionId, err: &RelayError) {
        if *err == RelayError::Unauthenticated {
            self.send(id, ServerEnvelope::error(err)).await;
        } else {
            self.reject(id, err).await;
        }
    }

    pub async fn send(&self, id: ConnectionId, envelope: ServerEnvelope) -> bool {
        let g = self.inner.lock().await;
        g.connections
            .get(&id)
            .is_some_and(|c| c.tx.send(Outbound::Envelope(envelope)).is_ok())
    }

    /// Send to the user's live connection. Returns false when the user is offline.
    pub async fn send_to_user(&self, user_id: &str, envelope: ServerEnvelope) -> bool {
        let g = self.inner.lock().await;
        let Some(id) = g.by_user.get(user_id) else {
            return false;
        };
        g.connections
            .get(id)
            .is_some_and(|c| c.tx.send(Outbound::Envelope(envelope)).is_ok())
    }

    pub async fn connection_for_user(&self, user_id: &str) -> Option<ConnectionId> {
        self.inner.lock().await.by_user.get(user_id).copied()
    }

    /// Detach and close a connection. No-op when it is already gone.
    pub async fn close(&self, id: ConnectionId, code: u16, reason: &str) -> bool {
        let tx = self.inner.lock().await.detach(id);
        match tx {
            Some(tx) => {
                let _ = tx.send(Outbound::Close {
                    code,
                    reason: reason.to_string(),
                });
                true
            }
            None => false,
        }
    }

    /// Socket ended (closed by peer, error, or after a close we initiated).
    pub async fn on_close(&self, id: ConnectionId) {
        let mut g = self.inner.lock().await;
        if g.detach(id).is_some() {
            log::debug!("connection {} closed ({} open)", id, g.connections.len());
        }
    }

    /// All sockets, pending and authenticated.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.connections.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn authenticated_len(&self) -> usize {
        self.inner.lock().await.by_user.len()
    }

    /// Re-check every authenticated connection against the session store and block list, then purge expired sessions.
    /// Returns how many connections were closed.
    pub async fn revalidate(&self) -> usize {
        let snapshot: Vec<(ConnectionId, String, String)> = {
            let g = self.inner.lock().await;
            g.connections
                .iter()
                .filter_map(|(id, c)| {
                    c.auth
                        .as_ref()
                        .map(|a| (*id, a.session_id.clone(), a.profile.id.clone()))
                })
                .collect()
        };
        let now = Utc::now();
        let mut closed = 0;
        for (id, session_id, user_id) in snapshot {
            let failure = match self.sessions.get(&session_id).await {
                Ok(Some(s)) if s.is_expired(now) => {
                    if let Err(e) = self.sessions.remove(&session_id).await {
                        log::warn!("removing expired session failed: {}", e);
                    }
                    Some(RelayError::SessionExpired)
                }
                Ok(Some(_)) => match self.blocks.check(&user_id, now).await {
                    Ok(None) => None,
                    Ok(Some(entry)) => Some(RelayError::UserBlocked {
                        reason: entry.reason,
                        until: entry.until,
                    }),
                    Err(e) => {
                        log::warn!("block list lookup failed during revalidation: {}", e);
                        None
                    }
                },
                Ok(None) => Some(RelayError::Unauthenticated),
                Err(e) => {
                    log::warn!("session lookup failed during revalidation: {}", e);
                    None
                }
            };
            if let Some(err) = failure {
                if self.still_on_session(id, &session_id).await {
                    log::info!("closing connection {} of user {}: {}", id, user_id, err);
                    self.reject(id, &err).await;
                    closed += 1;
                }
            }
        }
        {
            let instant = Instant::now();
            self.inner
                .lock()
                .await
                .limiters
                .retain(|_, l| !l.is_idle(instant));
        }
        match self.sessions.purge_expired(now).await {
            Ok(0) => {}
            Ok(n) => log::debug!("purged {} expired session(s)", n),
            Err(e) => log::warn!("purging expired sessions failed: {}", e),
        }
        closed
    }

    async fn still_on_session(&self, id: ConnectionId, session_id: &str) -> bool {
        let g = self.inner.lock().await;
        g.connections
            .get(&id)
            .and_then(|c| c.auth.as_ref())
            .is_some_and(|a| a.session_id == session_id)
    }
}
