//! Browser WebSocket protocol: JSON envelopes tagged by `type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::session::UserProfile;

/// Frame sent by the browser widget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientEnvelope {
    /// `{ "type": "init", "sessionId": "..." }`. The id may be omitted when the session cookie was sent on upgrade.
    Init {
        #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// `{ "type": "message", "message": "..." }`
    Message { message: String },
    /// `{ "type": "heartbeat" }`
    Heartbeat,
}

/// Who wrote a relayed chat line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Support,
    Bot,
}

/// Frame sent to the browser widget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEnvelope {
    Status {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        authenticated: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<UserProfile>,
    },
    Message {
        message: String,
        sender: Sender,
        author: String,
    },
    Error {
        message: String,
        code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        until: Option<DateTime<Utc>>,
    },
}

impl ServerEnvelope {
    pub fn status(message: impl Into<String>) -> Self {
        ServerEnvelope::Status {
            message: message.into(),
            authenticated: None,
            user: None,
        }
    }

    pub fn authenticated(message: impl Into<String>, user: UserProfile) -> Self {
        ServerEnvelope::Status {
            message: message.into(),
            authenticated: Some(true),
            user: Some(user),
        }
    }

    pub fn chat(sender: Sender, author: impl Into<String>, message: impl Into<String>) -> Self {
        ServerEnvelope::Message {
            message: message.into(),
            sender,
            author: author.into(),
        }
    }

    pub fn error(err: &RelayError) -> Self {
        let (reason, until) = match err {
            RelayError::UserBlocked { reason, until } => (Some(reason.clone()), Some(*until)),
            _ => (None, None),
        };
        ServerEnvelope::Error {
            message: err.user_message(),
            code: err.code().to_string(),
            reason,
            until,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","message":"internal error","code":"invalid_message"}"#.to_string()
        })
    }
}

/// Parse a browser frame. Unknown `type` or missing fields yield `InvalidMessage`.
pub fn parse_client_frame(text: &str) -> Result<ClientEnvelope, RelayError> {
    serde_json::from_str(text).map_err(|e| RelayError::InvalidMessage(e.to_string()))
}

/// WebSocket close codes used by the gateway.
pub mod close_codes {
    /// Ticket closed by support.
    pub const NORMAL: u16 = 1000;
    /// Server shutting down.
    pub const GOING_AWAY: u16 = 1001;
    /// Blocked user.
    pub const POLICY_VIOLATION: u16 = 1008;
    /// Connection limit reached.
    pub const TRY_AGAIN_LATER: u16 = 1013;
    /// No `init` in time, or idle.
    pub const TIMEOUT: u16 = 4000;
    pub const UNAUTHENTICATED: u16 = 4001;
    pub const SESSION_EXPIRED: u16 = 4002;
    /// Replaced by a newer connection of the same user.
    pub const REPLACED: u16 = 4004;
}
