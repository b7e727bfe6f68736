//! Network reachability as observable state.
//!
//! The platform layer reports changes with [`Connectivity::set_online`];
//! the sync coordinator and the search waterfall consult it before touching
//! the network, and UI code can [`subscribe`](Connectivity::subscribe).

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

#[derive(Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// A connectivity observer that starts online.
    pub fn online() -> Self {
        Self::new(true)
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Report a reachability change. Subscribers are only woken when the
    /// state actually flips.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|state| {
            if *state == online {
                return false;
            }
            *state = online;
            info!("Network is now {}", if online { "online" } else { "offline" });
            true
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Resolve once the network is reachable.
    pub async fn wait_online(&self) {
        let mut rx = self.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|online| *online).await;
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::online()
    }
}
