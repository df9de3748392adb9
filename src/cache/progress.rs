//! Prefetch progress shared between the orchestrator and the UI.

use serde::Serialize;
use tokio::sync::watch;

/// Point-in-time prefetch progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PrefetchProgress {
    pub completed: usize,
    pub total: usize,
}

impl PrefetchProgress {
    /// Whole-number percentage; an empty run counts as complete.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        let ratio = self.completed.min(self.total) * 100 / self.total;
        u8::try_from(ratio).unwrap_or(100)
    }

    pub fn is_complete(&self) -> bool {
        self.completed >= self.total
    }
}

/// Publishes [`PrefetchProgress`] updates.
///
/// Only the orchestrator writes; readers poll [`snapshot`](Self::snapshot) or
/// hold a receiver from [`subscribe`](Self::subscribe).
#[derive(Debug)]
pub struct ProgressTracker {
    tx: watch::Sender<PrefetchProgress>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(PrefetchProgress::default());
        Self { tx }
    }

    /// Start a new run over `total` items.
    pub(crate) fn reset(&self, total: usize) {
        self.tx.send_replace(PrefetchProgress {
            completed: 0,
            total,
        });
    }

    /// Record `count` settled items; never exceeds `total`.
    pub(crate) fn advance(&self, count: usize) {
        self.tx.send_modify(|progress| {
            progress.completed = progress.completed.saturating_add(count).min(progress.total);
        });
    }

    pub fn snapshot(&self) -> PrefetchProgress {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PrefetchProgress> {
        self.tx.subscribe()
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}
