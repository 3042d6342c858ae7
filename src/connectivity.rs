// ABOUTME: Connectivity monitor tracking whether the backend is reachable
// Flips only on poll/probe outcomes and reports each flip exactly once

use std::fmt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Connected,
    Disconnected,
}

impl Connectivity {
    pub fn is_reachable(self) -> bool {
        self == Connectivity::Connected
    }
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connectivity::Connected => f.write_str("connected"),
            Connectivity::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// A change of reachability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Lost,
    Recovered,
}

pub struct ConnectivityMonitor {
    state: watch::Sender<Connectivity>,
    consecutive_failures: u32,
}

impl ConnectivityMonitor {
    /// Starts optimistic, like the dashboard does before its first poll
    pub fn new() -> Self {
        let (state, _) = watch::channel(Connectivity::Connected);
        Self {
            state,
            consecutive_failures: 0,
        }
    }

    pub fn state(&self) -> Connectivity {
        *self.state.borrow()
    }

    pub fn is_reachable(&self) -> bool {
        self.state().is_reachable()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Read-only view; the presentation layer never writes reachability
    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.state.subscribe()
    }

    pub fn record_success(&mut self) -> Option<Transition> {
        self.consecutive_failures = 0;
        if self.state() == Connectivity::Connected {
            return None;
        }
        self.state.send_replace(Connectivity::Connected);
        info!("Backend reachable again");
        Some(Transition::Recovered)
    }

    pub fn record_failure(&mut self) -> Option<Transition> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.state() == Connectivity::Disconnected {
            debug!(
                "Backend still unreachable ({} consecutive failures)",
                self.consecutive_failures
            );
            return None;
        }
        self.state.send_replace(Connectivity::Disconnected);
        warn!("Backend unreachable, disabling target actions");
        Some(Transition::Lost)
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flip_reported_once_per_direction() {
        let mut monitor = ConnectivityMonitor::new();
        assert_eq!(monitor.record_failure(), Some(Transition::Lost));
        assert_eq!(monitor.record_failure(), None);
        assert_eq!(monitor.record_failure(), None);
        assert_eq!(monitor.consecutive_failures(), 3);
        assert!(!monitor.is_reachable());

        assert_eq!(monitor.record_success(), Some(Transition::Recovered));
        assert_eq!(monitor.record_success(), None);
        assert_eq!(monitor.consecutive_failures(), 0);
    }

    #[test]
    fn test_subscribers_observe_state() {
        let mut monitor = ConnectivityMonitor::new();
        let view = monitor.subscribe();
        assert_eq!(*view.borrow(), Connectivity::Connected);
        monitor.record_failure();
        assert_eq!(*view.borrow(), Connectivity::Disconnected);
    }
}
