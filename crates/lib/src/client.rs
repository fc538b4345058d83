//! Reconnection policy for chat clients.
//!
//! A dropped socket is retried a bounded number of times with a fixed delay. Logging out, or
//! a close code that means the session or the ticket is over, ends the loop.

use std::time::Duration;

use crate::gateway::close_codes;

/// Why a client's socket went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnect {
    /// The user asked to log out.
    Logout,
    /// The server closed the socket, with its close code when one was sent.
    Closed { code: Option<u16> },
    /// Transport error or failed connect.
    Error,
}

impl Disconnect {
    /// True when reconnecting cannot succeed or is not wanted. 1000 means support closed the ticket.
    pub fn is_final(&self) -> bool {
        match self {
            Disconnect::Logout => true,
            Disconnect::Closed { code: Some(code) } => matches!(
                *code,
                close_codes::NORMAL
                    | close_codes::UNAUTHENTICATED
                    | close_codes::SESSION_EXPIRED
                    | close_codes::POLICY_VIOLATION
                    | close_codes::REPLACED
            ),
            Disconnect::Closed { code: None } | Disconnect::Error => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(3),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt number `attempt` (1-based), or None to give up.
    pub fn next_delay(&self, attempt: u32, reason: &Disconnect) -> Option<Duration> {
        if reason.is_final() || attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        Some(self.delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_transient_drops_up_to_limit() {
        let policy = ReconnectPolicy::default();
        let dropped = Disconnect::Closed { code: Some(close_codes::GOING_AWAY) };
        for attempt in 1..=5 {
            assert_eq!(policy.next_delay(attempt, &dropped), Some(Duration::from_secs(3)));
        }
        assert_eq!(policy.next_delay(6, &dropped), None);
        assert_eq!(policy.next_delay(1, &Disconnect::Error), Some(Duration::from_secs(3)));
    }

    #[test]
    fn never_retries_logout_or_auth_closes() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.next_delay(1, &Disconnect::Logout), None);
        for code in [4001, 4002, 1008, 4004] {
            assert_eq!(
                policy.next_delay(1, &Disconnect::Closed { code: Some(code) }),
                None,
                "code {}",
                code
            );
        }
        assert!(policy
            .next_delay(1, &Disconnect::Closed { code: Some(close_codes::TRY_AGAIN_LATER) })
            .is_some());
    }

    #[test]
    fn ticket_closed_by_support_ends_the_chat() {
        let closed = Disconnect::Closed { code: Some(close_codes::NORMAL) };
        assert!(closed.is_final());
        assert_eq!(ReconnectPolicy::default().next_delay(1, &closed), None);
    }
}
