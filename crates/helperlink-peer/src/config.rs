use std::time::Duration;

use helperlink_frame::FrameConfig;

/// Keepalive timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepaliveConfig {
    /// Time between pings.
    pub interval: Duration,
    /// Intervals without a pong before the peer is declared wedged.
    pub max_missed: u32,
}

impl KeepaliveConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_missed(mut self, max_missed: u32) -> Self {
        self.max_missed = max_missed.max(1);
        self
    }

    /// Silence tolerated before a keepalive timeout.
    pub fn timeout(&self) -> Duration {
        self.interval.saturating_mul(self.max_missed)
    }
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_missed: 5,
        }
    }
}

/// Per-connection behaviour.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub frame: FrameConfig,
    pub keepalive: KeepaliveConfig,
    /// Send a ping in the older generation on start and pin to it if that
    /// is the one answered.
    pub probe_older_generation: bool,
    /// Role required on routes registered by the peer.
    pub http_role: String,
    /// Label under which auth tokens are minted for the peer.
    pub http_auth_label: String,
    pub http_auth_ttl: Duration,
    /// Delay between `SIGTERM` and `SIGKILL` for an attached helper.
    pub terminate_grace: Duration,
}

impl ConnectionConfig {
    pub fn with_frame(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    pub fn with_keepalive(mut self, keepalive: KeepaliveConfig) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn with_probe_older_generation(mut self, probe: bool) -> Self {
        self.probe_older_generation = probe;
        self
    }

    pub fn with_http_role(mut self, role: impl Into<String>) -> Self {
        self.http_role = role.into();
        self
    }

    pub fn with_http_auth(mut self, label: impl Into<String>, ttl: Duration) -> Self {
        self.http_auth_label = label.into();
        self.http_auth_ttl = ttl;
        self
    }

    pub fn with_terminate_grace(mut self, grace: Duration) -> Self {
        self.terminate_grace = grace;
        self
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            keepalive: KeepaliveConfig::default(),
            probe_older_generation: true,
            http_role: "logon".to_string(),
            http_auth_label: "external helper".to_string(),
            http_auth_ttl: Duration::ZERO,
            terminate_grace: Duration::from_secs(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keepalive_timeout_spans_missed_intervals() {
        let cfg = KeepaliveConfig::default();
        assert_eq!(cfg.timeout(), Duration::from_secs(5));
        let cfg = cfg
            .with_interval(Duration::from_millis(200))
            .with_max_missed(0);
        assert_eq!(cfg.max_missed, 1);
        assert_eq!(cfg.timeout(), Duration::from_millis(200));
    }

    #[test]
    fn defaults() {
        let cfg = ConnectionConfig::default();
        assert!(cfg.probe_older_generation);
        assert_eq!(cfg.http_role, "logon");
        assert_eq!(cfg.terminate_grace, Duration::from_secs(2));
    }
}
