//! Counting barrier: an async wait-group.
//!
//! Units are added when work starts and marked done when it completes;
//! [`CountingBarrier::wait`] resolves once the count is back to zero.
//! Barriers are named so log lines can say which one a task is waiting on,
//! and are shared between owners through `Arc`.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::warn;

#[derive(Debug)]
pub struct CountingBarrier {
    name: String,
    count: watch::Sender<usize>,
}

impl CountingBarrier {
    pub fn new(name: impl Into<String>) -> Self {
        let (count, _) = watch::channel(0);
        Self {
            name: name.into(),
            count,
        }
    }

    /// Convenience constructor for a barrier shared between several owners.
    pub fn shared(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(name))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add `n` outstanding units.
    pub fn add(&self, n: usize) {
        if n > 0 {
            self.count.send_modify(|count| *count += n);
        }
    }

    /// Mark one unit complete.
    pub fn done(&self) {
        self.count.send_modify(|count| {
            if *count == 0 {
                warn!(barrier = %self.name, "done called on a barrier with no outstanding units");
            } else {
                *count -= 1;
            }
        });
    }

    /// Outstanding units right now.
    pub fn count(&self) -> usize {
        *self.count.borrow()
    }

    pub fn is_idle(&self) -> bool {
        self.count() == 0
    }

    /// Wait until no units are outstanding. Returns immediately when idle.
    pub async fn wait(&self) {
        let mut rx = self.count.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    /// Add one unit and return a guard that completes it on drop.
    pub fn enter(self: &Arc<Self>) -> BarrierGuard {
        self.add(1);
        BarrierGuard {
            barrier: Arc::clone(self),
        }
    }
}

/// Completes one unit of a [`CountingBarrier`] when dropped.
#[derive(Debug)]
pub struct BarrierGuard {
    barrier: Arc<CountingBarrier>,
}

impl BarrierGuard {
    /// Take ownership of a unit that was already added with [`CountingBarrier::add`].
    pub fn adopt(barrier: Arc<CountingBarrier>) -> Self {
        Self { barrier }
    }
}

impl Drop for BarrierGuard {
    fn drop(&mut self) {
        self.barrier.done();
    }
}
