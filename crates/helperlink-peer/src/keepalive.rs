use helperlink_frame::Generation;
use tokio::time::Instant;

use crate::config::KeepaliveConfig;

/// Liveness and generation-negotiation state for one connection.
///
/// Pure bookkeeping: the connection drives it from its timer and its pong
/// handler and acts on the answers.
#[derive(Debug, Clone)]
pub struct KeepaliveMonitor {
    config: KeepaliveConfig,
    last_pong: Instant,
    confirmed: bool,
    /// Sequence of the ping sent in the older generation, if any.
    probe: Option<u32>,
    outstanding: Option<u32>,
}

impl KeepaliveMonitor {
    /// Start the clock at `now`; the peer has one full timeout to answer.
    pub fn new(config: KeepaliveConfig, now: Instant) -> Self {
        Self {
            config,
            last_pong: now,
            confirmed: false,
            probe: None,
            outstanding: None,
        }
    }

    pub fn config(&self) -> &KeepaliveConfig {
        &self.config
    }

    /// Record the generation probe ping.
    pub fn probe_sent(&mut self, sequence: u32) {
        self.probe = Some(sequence);
    }

    pub fn ping_sent(&mut self, sequence: u32) {
        self.outstanding = Some(sequence);
    }

    /// Record a pong.
    ///
    /// Returns the generation to pin when this pong is the first one: the
    /// pong's own generation if it answers the probe, otherwise `current`.
    /// Later pongs only refresh the clock.
    pub fn pong_received(
        &mut self,
        sequence: u32,
        generation: Generation,
        current: Generation,
        now: Instant,
    ) -> Option<Generation> {
        self.last_pong = now;
        if self.outstanding == Some(sequence) {
            self.outstanding = None;
        }
        if self.confirmed {
            return None;
        }
        self.confirmed = true;
        if self.probe == Some(sequence) {
            Some(generation)
        } else {
            Some(current)
        }
    }

    /// Whether the peer has gone quiet for the whole timeout window.
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_pong) >= self.config.timeout()
    }

    pub fn last_pong(&self) -> Instant {
        self.last_pong
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    pub fn outstanding(&self) -> Option<u32> {
        self.outstanding
    }
}
