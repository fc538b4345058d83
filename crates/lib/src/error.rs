//! Relay error taxonomy shared by the connection manager, the relay and the wire protocol.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::gateway::close_codes;

/// Failure surfaced to a browser connection as an `error` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("not authenticated")]
    Unauthenticated,

    #[error("session expired")]
    SessionExpired,

    #[error("user is blocked until {until}: {reason}")]
    UserBlocked { reason: String, until: DateTime<Utc> },

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("support channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("message exceeds {limit} bytes")]
    MessageTooLarge { limit: usize },

    #[error("too many connections")]
    ConnectionLimitExceeded,

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("timed out")]
    Timeout,
}

impl RelayError {
    /// Stable machine-readable identifier sent as `code`.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::Unauthenticated => "unauthenticated",
            RelayError::SessionExpired => "session_expired",
            RelayError::UserBlocked { .. } => "user_blocked",
            RelayError::RateLimited => "rate_limited",
            RelayError::ChannelUnavailable(_) => "channel_unavailable",
            RelayError::MessageTooLarge { .. } => "message_too_large",
            RelayError::ConnectionLimitExceeded => "connection_limit_exceeded",
            RelayError::InvalidMessage(_) => "invalid_message",
            RelayError::Timeout => "timeout",
        }
    }

    /// Terminal errors close the connection after the error frame is sent.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RelayError::Unauthenticated
                | RelayError::SessionExpired
                | RelayError::UserBlocked { .. }
                | RelayError::ConnectionLimitExceeded
                | RelayError::Timeout
        )
    }

    /// WebSocket close code for terminal errors.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            RelayError::Unauthenticated => Some(close_codes::UNAUTHENTICATED),
            RelayError::SessionExpired => Some(close_codes::SESSION_EXPIRED),
            RelayError::UserBlocked { .. } => Some(close_codes::POLICY_VIOLATION),
            RelayError::ConnectionLimitExceeded => Some(close_codes::TRY_AGAIN_LATER),
            RelayError::Timeout => Some(close_codes::TIMEOUT),
            _ => None,
        }
    }

    /// Human-readable text for the browser. Platform details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            RelayError::Unauthenticated => "Not authenticated. Please log in again.".to_string(),
            RelayError::SessionExpired => "Your session has expired. Please log in again.".to_string(),
            RelayError::UserBlocked { reason, .. } => {
                format!("You are blocked from support chat: {}", reason)
            }
            RelayError::RateLimited => {
                "You are sending messages too quickly. Please slow down.".to_string()
            }
            RelayError::ChannelUnavailable(_) => {
                "Support is unavailable right now. Please try again later.".to_string()
            }
            RelayError::MessageTooLarge { limit } => {
                format!("Message is too long (max {} bytes).", limit)
            }
            RelayError::ConnectionLimitExceeded => {
                "Too many connections. Please try again later.".to_string()
            }
            RelayError::InvalidMessage(detail) => format!("Invalid message: {}", detail),
            RelayError::Timeout => "Connection timed out.".to_string(),
        }
    }
}

/// A session store or block list could not be reached.
#[derive(Debug, Error)]
#[error("store unavailable: {0}")]
pub struct StoreError(pub String);
