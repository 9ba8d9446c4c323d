//! Inventory update notifications
//!
//! Every inventory mutation bumps a generation counter held in a
//! [`tokio::sync::watch`] channel. Each `ListAndWatch` subscriber owns its
//! own receiver, so signals that pile up while a subscriber is busy collapse
//! into a single wake-up and the subscriber re-reads the latest snapshot.

use std::sync::Arc;
use tokio::sync::watch;

/// Producer side of the update channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct UpdateChannel {
    tx: Arc<watch::Sender<u64>>,
}

impl Default for UpdateChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateChannel {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    /// Wake every subscriber. Never blocks, works without subscribers.
    pub fn signal(&self) {
        self.tx.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Number of signals sent so far.
    pub fn generation(&self) -> u64 {
        *self.tx.borrow()
    }

    /// New subscriber. Signals sent before this call are considered seen.
    pub fn subscribe(&self) -> UpdateReceiver {
        let mut rx = self.tx.subscribe();
        rx.borrow_and_update();
        UpdateReceiver { rx }
    }
}

/// Consumer side of the update channel.
#[derive(Debug)]
pub struct UpdateReceiver {
    rx: watch::Receiver<u64>,
}

impl UpdateReceiver {
    /// Wait for the next signal.
    ///
    /// Returns `false` once every [`UpdateChannel`] handle has been dropped.
    pub async fn changed(&mut self) -> bool {
        let alive = self.rx.changed().await.is_ok();
        if alive {
            self.rx.borrow_and_update();
        }
        alive
    }
}
