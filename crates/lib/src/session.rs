//! Website login sessions.
//!
//! A session is created after a successful Discord OAuth exchange and is looked up by its
//! opaque id on every WebSocket `init` and on periodic re-validation. The store is an async
//! trait so the gateway can be backed by an external database; `MemorySessionStore` is the
//! single-process implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::StoreError;

/// Unique session identifier (opaque string).
pub type SessionId = String;

/// A logged-in website visitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    /// Discord user id; also the relay's client id.
    pub user_id: String,
    pub username: String,
    pub discriminator: String,
    pub avatar: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Public profile of the session's user.
    pub fn profile(&self, is_support_agent: bool) -> UserProfile {
        UserProfile {
            id: self.user_id.clone(),
            username: self.username.clone(),
            discriminator: self.discriminator.clone(),
            avatar: self.avatar.clone(),
            is_support_agent,
        }
    }
}

/// Fields needed to create a session; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: String,
    pub username: String,
    pub discriminator: String,
    pub avatar: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// User identity as sent to the browser and shown in ticket embeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    pub discriminator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default)]
    pub is_support_agent: bool,
}

impl UserProfile {
    /// `name#1234`, or just the name for accounts without a legacy discriminator.
    pub fn display_name(&self) -> String {
        if self.discriminator.is_empty() || self.discriminator == "0" {
            self.username.clone()
        } else {
            format!("{}#{}", self.username, self.discriminator)
        }
    }
}

/// Session lookup interface used by the connection manager and the auth routes.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session with a generated id.
    async fn create(&self, new: NewSession) -> Result<Session, StoreError>;
    /// Look up a session by id. Expired sessions are returned as-is; callers decide.
    async fn get(&self, id: &str) -> Result<Option<Session>, StoreError>;
    /// Delete a session. Returns whether it existed.
    async fn remove(&self, id: &str) -> Result<bool, StoreError>;
    /// Delete every session expired at `now`. Returns how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// In-memory session store.
pub struct MemorySessionStore {
    inner: Arc<RwLock<HashMap<SessionId, Session>>>,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, new: NewSession) -> Result<Session, StoreError> {
        let id = format!("sess-{}", uuid::Uuid::new_v4());
        let session = Session {
            id: id.clone(),
            user_id: new.user_id,
            username: new.username,
            discriminator: new.discriminator,
            avatar: new.avatar,
            access_token: new.access_token,
            refresh_token: new.refresh_token,
            expires_at: new.expires_at,
        };
        self.inner.write().await.insert(id, session.clone());
        Ok(session)
    }

    async fn get(&self, id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.inner.read().await.get(id).cloned())
    }

    async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.inner.write().await.remove(id).is_some())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut g = self.inner.write().await;
        let before = g.len();
        g.retain(|_, s| !s.is_expired(now));
        Ok(before - g.len())
    }
}

#[cfg(test)]
pub(crate) fn new_session(user_id: &str, username: &str, expires_at: DateTime<Utc>) -> NewSession {
    NewSession {
        user_id: user_id.to_string(),
        username: username.to_string(),
        discriminator: "0".to_string(),
        avatar: None,
        access_token: None,
        refresh_token: None,
        expires_at,
    }
}
