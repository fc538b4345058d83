//! In-memory platform used by relay tests.

use super::{PlatformError, SupportPlatform};
use crate::session::UserProfile;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(String),
    Opened(u64, String),
    FollowUp(u64, String),
    Reply(u64, u64, String),
    Delete(u64),
}

#[derive(Default)]
struct State {
    next_id: u64,
    live: HashSet<u64>,
    calls: Vec<Call>,
    fail_create: Option<PlatformError>,
}

#[derive(Default)]
pub struct FakePlatform {
    state: Mutex<State>,
    create_delay: Option<Duration>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_create_delay(delay: Duration) -> Self {
        Self {
            create_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn created(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Create(_)))
            .count()
    }

    pub fn is_live(&self, channel_id: u64) -> bool {
        self.state.lock().unwrap().live.contains(&channel_id)
    }

    /// Delete a channel behind the relay's back.
    pub fn delete_externally(&self, channel_id: u64) {
        self.state.lock().unwrap().live.remove(&channel_id);
    }

    pub fn fail_create(&self, err: PlatformError) {
        self.state.lock().unwrap().fail_create = Some(err);
    }
}

#[async_trait]
impl SupportPlatform for FakePlatform {
    fn id(&self) -> &str {
        "fake"
    }

    async fn resolve_channel(&self, channel_id: u64) -> Result<(), PlatformError> {
        if self.is_live(channel_id) {
            Ok(())
        } else {
            Err(PlatformError::ChannelGone)
        }
    }

    async fn create_ticket_channel(&self, name: &str) -> Result<u64, PlatformError> {
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        let mut s = self.state.lock().unwrap();
        if let Some(err) = s.fail_create.clone() {
            return Err(err);
        }
        s.next_id += 1;
        let id = 1000 + s.next_id;
        s.live.insert(id);
        s.calls.push(Call::Create(name.to_string()));
        Ok(id)
    }

    async fn send_ticket_opened(
        &self,
        channel_id: u64,
        _user: &UserProfile,
        first_message: &str,
    ) -> Result<(), PlatformError> {
        let mut s = self.state.lock().unwrap();
        if !s.live.contains(&channel_id) {
            return Err(PlatformError::ChannelGone);
        }
        s.calls.push(Call::Opened(channel_id, first_message.to_string()));
        Ok(())
    }

    async fn send_user_message(
        &self,
        channel_id: u64,
        _user: &UserProfile,
        message: &str,
    ) -> Result<(), PlatformError> {
        let mut s = self.state.lock().unwrap();
        if !s.live.contains(&channel_id) {
            return Err(PlatformError::ChannelGone);
        }
        s.calls.push(Call::FollowUp(channel_id, message.to_string()));
        Ok(())
    }

    async fn reply(&self, channel_id: u64, message_id: u64, text: &str) -> Result<(), PlatformError> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(Call::Reply(channel_id, message_id, text.to_string()));
        Ok(())
    }

    async fn delete_channel(&self, channel_id: u64) -> Result<(), PlatformError> {
        let mut s = self.state.lock().unwrap();
        s.calls.push(Call::Delete(channel_id));
        if s.live.remove(&channel_id) {
            Ok(())
        } else {
            Err(PlatformError::ChannelGone)
        }
    }
}
