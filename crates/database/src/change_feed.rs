use std::sync::Arc;

use tokio::sync::watch;

/// Change notifications for the entry table.
///
/// Holds a monotonically increasing change counter. Subscribers only ever
/// observe the latest value, so a burst of writes wakes a slow subscriber
/// once rather than once per write.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    sender: Arc<watch::Sender<u64>>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(0);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Signals that an entry was created or deleted.
    pub fn notify(&self) {
        self.sender.send_modify(|version| *version = version.wrapping_add(1));
    }

    /// Subscribes to future changes. The current version counts as seen.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.sender.subscribe()
    }

    /// Number of changes signalled so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        *self.sender.borrow()
    }
}
