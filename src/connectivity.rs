//! Connectivity tracking
//!
//! Two-state machine fed by platform "now online" / "now offline" signals.
//! Only real transitions produce an event; a repeated identical signal is
//! ignored.

use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Online,
    Offline,
}

/// Edge event raised on a state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    WentOnline,
    WentOffline,
}

/// Source of the initial connectivity state
#[async_trait::async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Probe with a fixed answer
pub struct FixedProbe(pub bool);

#[async_trait::async_trait]
impl ConnectivityProbe for FixedProbe {
    async fn is_online(&self) -> bool {
        self.0
    }
}

/// Probe that reports online when a TCP connection to `addr` succeeds
/// within `timeout`
pub struct TcpProbe {
    addr: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(addr: &str, timeout: Duration) -> Self {
        Self {
            addr: addr.to_string(),
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl ConnectivityProbe for TcpProbe {
    async fn is_online(&self) -> bool {
        match tokio::time::timeout(self.timeout, tokio::net::TcpStream::connect(&self.addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::debug!("Probe {} failed: {}", self.addr, e);
                false
            }
            Err(_) => {
                tracing::debug!("Probe {} timed out", self.addr);
                false
            }
        }
    }
}

pub struct ConnectivityMonitor {
    state: Mutex<Connectivity>,
    events: broadcast::Sender<ConnectivityEvent>,
}

impl ConnectivityMonitor {
    pub fn new(initial: Connectivity) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(initial),
            events,
        }
    }

    /// Create a monitor whose initial state comes from `probe`
    pub async fn probe(probe: &dyn ConnectivityProbe) -> Self {
        let initial = if probe.is_online().await {
            Connectivity::Online
        } else {
            Connectivity::Offline
        };
        tracing::info!("Initial connectivity: {:?}", initial);
        Self::new(initial)
    }

    pub fn state(&self) -> Connectivity {
        *self.state.lock()
    }

    pub fn is_online(&self) -> bool {
        self.state() == Connectivity::Online
    }

    /// Register a listener. Events are delivered in transition order.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }

    /// Platform says we are back online
    pub fn signal_online(&self) -> Option<ConnectivityEvent> {
        self.transition(Connectivity::Online)
    }

    /// Platform says connectivity was lost
    pub fn signal_offline(&self) -> Option<ConnectivityEvent> {
        self.transition(Connectivity::Offline)
    }

    fn transition(&self, next: Connectivity) -> Option<ConnectivityEvent> {
        let mut state = self.state.lock();
        if *state == next {
            return None;
        }
        *state = next;
        let event = match next {
            Connectivity::Online => ConnectivityEvent::WentOnline,
            Connectivity::Offline => ConnectivityEvent::WentOffline,
        };
        // Sent under the lock so listeners see transitions in order. Sending
        // never runs a listener inline, so listeners may call back into us.
        let _ = self.events.send(event);
        tracing::info!("Connectivity changed: {:?}", next);
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_sets_initial_state() {
        let monitor = ConnectivityMonitor::probe(&FixedProbe(false)).await;
        assert_eq!(monitor.state(), Connectivity::Offline);

        let monitor = ConnectivityMonitor::probe(&FixedProbe(true)).await;
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn test_one_event_per_transition() {
        let monitor = ConnectivityMonitor::new(Connectivity::Offline);
        let mut rx = monitor.subscribe();

        assert_eq!(monitor.signal_offline(), None);
        assert_eq!(monitor.signal_online(), Some(ConnectivityEvent::WentOnline));
        assert_eq!(monitor.signal_online(), None);
        assert_eq!(monitor.signal_offline(), Some(ConnectivityEvent::WentOffline));

        assert_eq!(rx.recv().await.unwrap(), ConnectivityEvent::WentOnline);
        assert_eq!(rx.recv().await.unwrap(), ConnectivityEvent::WentOffline);
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_every_listener_gets_the_event() {
        let monitor = ConnectivityMonitor::new(Connectivity::Online);
        let mut a = monitor.subscribe();
        let mut b = monitor.subscribe();

        monitor.signal_offline();

        assert_eq!(a.recv().await.unwrap(), ConnectivityEvent::WentOffline);
        assert_eq!(b.recv().await.unwrap(), ConnectivityEvent::WentOffline);
    }

    #[tokio::test]
    async fn test_tcp_probe_unreachable() {
        // Port 9 on localhost is almost never listening; either way the
        // probe must answer within its timeout.
        let probe = TcpProbe::new("127.0.0.1:9", Duration::from_millis(200));
        let started = std::time::Instant::now();
        let _ = probe.is_online().await;
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
