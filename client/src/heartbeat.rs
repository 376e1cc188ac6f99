//! Liveness tracking driven by caller-supplied time deltas.

use pinus_protocol::HeartbeatConfig;

/// What the owner of a [`HeartbeatMonitor`] should do after `advance`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send a heartbeat frame to the peer.
    SendHeartbeat,
    /// Nothing was heard from the peer within the timeout window.
    Timeout,
}

/// Accumulates elapsed time since the peer last showed signs of life.
///
/// The monitor never acts on its own; the session decides what a timeout means.
#[derive(Clone, Debug)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    accumulated: f32,
    started: bool,
}

impl HeartbeatMonitor {
    #[must_use]
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            accumulated: 0.0,
            started: false,
        }
    }

    #[must_use]
    pub fn config(&self) -> HeartbeatConfig {
        self.config
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started
    }

    #[must_use]
    pub fn accumulated(&self) -> f32 {
        self.accumulated
    }

    /// Arms the monitor. A disabled config (interval 0) stays inert.
    pub fn start(&mut self) {
        self.started = true;
    }

    /// Called whenever any heartbeat or data frame arrives from the peer.
    pub fn reset(&mut self) {
        self.accumulated = 0.0;
    }

    /// Adds `delta` seconds.
    ///
    /// In `[interval, timeout)` a heartbeat is due and the counter restarts;
    /// at or past `timeout` the peer is considered lost.
    pub fn advance(&mut self, delta: f32) -> Option<HeartbeatEvent> {
        if !self.started || !self.config.is_enabled() {
            return None;
        }

        self.accumulated += delta;

        if self.accumulated < self.config.interval_secs as f32 {
            return None;
        }

        if self.accumulated < self.config.timeout_secs as f32 {
            self.accumulated = 0.0;
            Some(HeartbeatEvent::SendHeartbeat)
        } else {
            Some(HeartbeatEvent::Timeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(interval_secs: u32) -> HeartbeatMonitor {
        let mut monitor = HeartbeatMonitor::new(HeartbeatConfig::from_interval(interval_secs));
        monitor.start();
        monitor
    }

    #[test]
    fn interval_reached_in_one_step_sends_heartbeat() {
        let mut monitor = started(5);

        assert_eq!(monitor.advance(5.0), Some(HeartbeatEvent::SendHeartbeat));
        assert_eq!(monitor.accumulated(), 0.0);
    }

    #[test]
    fn crossing_timeout_reports_timeout_only() {
        let mut monitor = started(5);

        assert_eq!(monitor.advance(4.0), None);
        assert_eq!(monitor.advance(6.0), Some(HeartbeatEvent::Timeout));
        assert_eq!(monitor.advance(0.5), Some(HeartbeatEvent::Timeout));
    }

    #[test]
    fn small_steps_accumulate_before_firing() {
        let mut monitor = started(2);

        for _ in 0..3 {
            assert_eq!(monitor.advance(0.5), None);
        }
        assert_eq!(monitor.advance(0.5), Some(HeartbeatEvent::SendHeartbeat));
    }

    #[test]
    fn reset_postpones_heartbeat() {
        let mut monitor = started(5);

        assert_eq!(monitor.advance(4.5), None);
        monitor.reset();
        assert_eq!(monitor.advance(4.5), None);
        assert_eq!(monitor.advance(0.5), Some(HeartbeatEvent::SendHeartbeat));
    }

    #[test]
    fn zero_interval_never_fires() {
        let mut monitor = started(0);
        assert_eq!(monitor.advance(1_000.0), None);
        assert_eq!(monitor.accumulated(), 0.0);
    }

    #[test]
    fn not_started_never_fires() {
        let mut monitor = HeartbeatMonitor::new(HeartbeatConfig::from_interval(1));
        assert_eq!(monitor.advance(10.0), None);
    }
}
