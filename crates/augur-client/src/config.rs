//! Client settings and reconnect schedule

use std::time::Duration;

pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Gateway URL, e.g. `ws://127.0.0.1:8787`
    pub url: String,
    pub user_id: String,
    /// Session to resume; the gateway generates one when absent
    pub session_id: Option<String>,
    /// Shared secret, when the gateway requires one
    pub token: Option<String>,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user_id: user_id.into(),
            session_id: None,
            token: None,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_base_delay: DEFAULT_RECONNECT_BASE_DELAY,
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_reconnect(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.max_reconnect_attempts = max_attempts;
        self.reconnect_base_delay = base_delay;
        self
    }

    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(self.max_reconnect_attempts, self.reconnect_base_delay)
    }
}

/// Linear backoff: attempt `k` waits `base × k`, up to `max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_BASE_DELAY)
    }
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based), `None` once exhausted
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        Some(self.base_delay * attempt)
    }
}
