// stats.rs — Fiber counters for operational tooling

use std::cell::Cell;

use serde::Serialize;

/// Snapshot of a scheduler's fiber counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FiberStatistics {
    /// Fibers ever allocated.
    pub total: u64,
    /// Fibers currently alive, cached ones included.
    pub current: u64,
    /// Fibers sitting idle in the cache.
    pub cached: u64,
    /// Peak of `current`.
    pub max: u64,
    /// Execution contexts that entered their run loop.
    pub initialized: u64,
}

/// Live counters shared between a scheduler and its fibers.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    total: Cell<u64>,
    current: Cell<u64>,
    max: Cell<u64>,
    initialized: Cell<u64>,
}

impl Counters {
    pub(crate) fn allocated(&self) {
        self.total.set(self.total.get() + 1);
        let current = self.current.get() + 1;
        self.current.set(current);
        self.max.set(self.max.get().max(current));
    }

    pub(crate) fn freed(&self) {
        self.current.set(self.current.get().saturating_sub(1));
    }

    pub(crate) fn initialized(&self) {
        self.initialized.set(self.initialized.get() + 1);
    }

    pub(crate) fn reset(&self) {
        self.total.set(0);
        self.current.set(0);
        self.max.set(0);
        self.initialized.set(0);
    }

    pub(crate) fn snapshot(&self, cached: usize) -> FiberStatistics {
        FiberStatistics {
            total: self.total.get(),
            current: self.current.get(),
            cached: cached as u64,
            max: self.max.get(),
            initialized: self.initialized.get(),
        }
    }
}
