use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Platform side of the connectivity pair: whatever observes the network pushes
/// transitions through this.
#[derive(Debug, Clone)]
pub struct ConnectivitySignal {
    tx: watch::Sender<bool>,
}

impl ConnectivitySignal {
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
        if changed {
            tracing::info!(online, "connectivity changed");
        }
    }
}

/// Read side: only feeds status display, never gates writes.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    rx: watch::Receiver<bool>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> (ConnectivitySignal, Self) {
        let (tx, rx) = watch::channel(initially_online);
        (ConnectivitySignal { tx }, Self { rx })
    }

    /// A monitor with no signal source; reports online forever.
    pub fn assume_online() -> Self {
        let (signal, monitor) = Self::new(true);
        drop(signal);
        monitor
    }

    pub fn is_online(&self) -> bool {
        *self.rx.borrow()
    }

    pub fn label(&self) -> &'static str {
        if self.is_online() { "Online" } else { "Offline" }
    }

    /// Resolves with the new state on the next transition, or `None` once the
    /// signal side is gone.
    pub async fn changed(&mut self) -> Option<bool> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}

pub async fn probe_once(addr: SocketAddr, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_)) => true,
        Ok(Err(err)) => {
            tracing::debug!(%addr, ?err, "connectivity probe failed");
            false
        }
        Err(_) => {
            tracing::debug!(%addr, "connectivity probe timed out");
            false
        }
    }
}

pub fn spawn_tcp_probe(
    signal: ConnectivitySignal,
    addr: SocketAddr,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let online = probe_once(addr, interval).await;
            signal.set_online(online);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn monitor_tracks_transitions() {
        let (signal, mut monitor) = ConnectivityMonitor::new(true);
        assert!(monitor.is_online());
        assert_eq!(monitor.label(), "Online");

        signal.set_online(false);
        assert_eq!(monitor.changed().await, Some(false));
        assert!(!monitor.is_online());
        assert_eq!(monitor.label(), "Offline");

        drop(signal);
        assert_eq!(monitor.changed().await, None);
    }

    #[tokio::test]
    async fn repeated_state_is_not_a_transition() {
        let (signal, mut monitor) = ConnectivityMonitor::new(true);
        signal.set_online(true);
        signal.set_online(false);
        assert_eq!(monitor.changed().await, Some(false));
    }

    #[tokio::test]
    async fn assumed_online_without_signal() {
        let monitor = ConnectivityMonitor::assume_online();
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn probe_reaches_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(probe_once(addr, Duration::from_secs(2)).await);

        drop(listener);
        assert!(!probe_once(addr, Duration::from_secs(2)).await);
    }
}
