use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::broadcast;

/// A handle which stops a node's background loops.
/// You can create multiple connected shutdowns by cloning.
#[derive(Debug, Clone)]
pub struct Shutdown {
    /// This channel tells the loops to stop.
    notify: broadcast::Sender<()>,
    /// Set once so that late waiters return immediately.
    fired: Arc<AtomicBool>,
}

impl Shutdown {
    /// Creates a new active shutdown.
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(1);
        Self {
            notify,
            fired: Default::default(),
        }
    }

    /// Signals every `Shutdown` cloned from this one.
    pub fn shut_down(&self) {
        if !self.fired.swap(true, Ordering::SeqCst) {
            // Nobody listening is fine, the flag covers later waiters
            let _ = self.notify.send(());
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Waits until some clone calls [`Shutdown::shut_down`].
    pub async fn wait_for_shutdown(&self) {
        let mut recv = self.notify.subscribe();
        if self.is_shut_down() {
            return;
        }
        // Closed cannot happen while we hold a sender, and lagging still
        // means the signal went out.
        let _ = recv.recv().await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
