//! Connectivity signal shared by the queue and the embedding application.

use tokio::sync::watch;
use tracing::info;

/// Owner side of the online/offline signal; the platform layer drives it.
#[derive(Debug)]
pub struct NetworkMonitor {
    tx: watch::Sender<bool>,
}

impl NetworkMonitor {
    /// Creates a monitor starting in the given state.
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx }
    }

    /// Records a connectivity transition. Repeating the current state is a no-op.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "network status changed");
        }
    }

    /// Current state.
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Read side for consumers.
    pub fn status(&self) -> NetworkStatus {
        NetworkStatus {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read side of the connectivity signal.
#[derive(Debug, Clone)]
pub struct NetworkStatus {
    rx: watch::Receiver<bool>,
}

impl NetworkStatus {
    /// Current state.
    pub fn is_online(&self) -> bool {
        *self.rx.borrow()
    }

    /// Waits for the next transition and returns the new state, or `None`
    /// once the monitor is gone.
    pub async fn changed(&mut self) -> Option<bool> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }

    /// Waits until the signal transitions to online.
    pub async fn wait_online(&mut self) -> Option<()> {
        loop {
            if self.changed().await? {
                return Some(());
            }
        }
    }
}
