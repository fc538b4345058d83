//! Shared helpers for gateway integration tests: an in-process support platform and a
//! gateway served on an ephemeral port.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use helpdesk::announcements::AnnouncementStore;
use helpdesk::block::MemoryBlockList;
use helpdesk::channels::{PlatformError, SupportPlatform};
use helpdesk::config::Config;
use helpdesk::gateway::{self, GatewayState};
use helpdesk::session::{MemorySessionStore, NewSession, SessionStore, UserProfile};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Records what the relay asked the platform to do.
#[derive(Default)]
pub struct RecordingPlatform {
    next_id: AtomicU64,
    pub created: Mutex<Vec<String>>,
    pub posted: Mutex<Vec<(u64, String)>>,
}

#[async_trait]
impl SupportPlatform for RecordingPlatform {
    fn id(&self) -> &str {
        "recording"
    }

    async fn resolve_channel(&self, _channel_id: u64) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn create_ticket_channel(&self, name: &str) -> Result<u64, PlatformError> {
        self.created.lock().unwrap().push(name.to_string());
        Ok(5000 + self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn send_ticket_opened(
        &self,
        channel_id: u64,
        _user: &UserProfile,
        first_message: &str,
    ) -> Result<(), PlatformError> {
        self.posted
            .lock()
            .unwrap()
            .push((channel_id, first_message.to_string()));
        Ok(())
    }

    async fn send_user_message(
        &self,
        channel_id: u64,
        _user: &UserProfile,
        message: &str,
    ) -> Result<(), PlatformError> {
        self.posted
            .lock()
            .unwrap()
            .push((channel_id, message.to_string()));
        Ok(())
    }

    async fn reply(&self, _channel_id: u64, _message_id: u64, _text: &str) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn delete_channel(&self, _channel_id: u64) -> Result<(), PlatformError> {
        Ok(())
    }
}

pub struct TestGateway {
    pub addr: SocketAddr,
    pub platform: Arc<RecordingPlatform>,
    pub sessions: Arc<MemorySessionStore>,
}

impl TestGateway {
    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Log a user in directly through the session store.
    pub async fn login(&self, user_id: &str, username: &str) -> String {
        self.sessions
            .create(NewSession {
                user_id: user_id.to_string(),
                username: username.to_string(),
                discriminator: "0".to_string(),
                avatar: None,
                access_token: None,
                refresh_token: None,
                expires_at: Utc::now() + chrono::Duration::hours(1),
            })
            .await
            .expect("create session")
            .id
    }
}

/// Serve a gateway on 127.0.0.1 with an ephemeral port. The server task runs until the test ends.
pub async fn spawn_gateway(mut config: Config) -> TestGateway {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local_addr");
    config.gateway.port = addr.port();
    config.sessions.secure_cookie = false;

    let platform = Arc::new(RecordingPlatform::default());
    let sessions = Arc::new(MemorySessionStore::new());
    let state = GatewayState::new(
        config,
        platform.clone(),
        sessions.clone(),
        Arc::new(MemoryBlockList::new()),
        Arc::new(AnnouncementStore::in_memory(4)),
    );
    tokio::spawn(async move {
        let _ = gateway::serve(listener, state).await;
    });
    TestGateway {
        addr,
        platform,
        sessions,
    }
}
