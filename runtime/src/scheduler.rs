// scheduler.rs — Fiber allocation and the idle-fiber cache
//
// The scheduler hands out fibers, recycles them through a bounded LIFO
// cache, and keeps the counters behind `statistics()`. One scheduler serves
// one thread; embedders running several threads create one per thread.
//
// Preconditions: used from a single thread.
// Postconditions: a fiber is either owned by a caller or cached, never both.
// Failure modes: invalid configuration → `ConfigError`; stack allocation
//                failure → `internal_error`.
// Side effects: allocates and frees fiber stacks.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use crate::config::{ConfigError, FiberConfig};
use crate::fiber::{Fiber, FiberState};
use crate::stats::{Counters, FiberStatistics};

#[derive(Debug)]
pub struct FiberScheduler {
    config: FiberConfig,
    cache: RefCell<Vec<Fiber>>,
    counters: Rc<Counters>,
}

impl Default for FiberScheduler {
    fn default() -> Self {
        FiberScheduler {
            config: FiberConfig::default(),
            cache: RefCell::new(Vec::new()),
            counters: Rc::new(Counters::default()),
        }
    }
}

impl FiberScheduler {
    pub fn new(config: FiberConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(FiberScheduler {
            config,
            ..FiberScheduler::default()
        })
    }

    pub fn config(&self) -> &FiberConfig {
        &self.config
    }

    /// A fiber ready to run a job: the most recently cached one if any,
    /// otherwise a freshly allocated one.
    pub fn create(&self) -> Fiber {
        if let Some(fiber) = self.cache.borrow_mut().pop() {
            debug!(target: "fibers", state = ?fiber.state(), "reusing cached fiber");
            return fiber;
        }
        debug!(target: "fibers", "cache empty; allocating fiber");
        Fiber::new(self.config.stack_size, self.counters.clone())
    }

    /// Return a fiber. A fiber suspended inside a job is aborted first; the
    /// fiber is then cached if there is room and freed otherwise.
    pub fn destroy(&self, mut fiber: Fiber) {
        if fiber.state() == FiberState::Yielded {
            fiber.abort();
        }
        fiber.clear();

        let mut cache = self.cache.borrow_mut();
        if cache.len() < self.config.cache_size {
            cache.push(fiber);
            debug!(target: "fibers", cached = cache.len(), "cached fiber");
        } else {
            debug!(target: "fibers", "cache full; freeing fiber");
            drop(cache);
            drop(fiber);
        }
    }

    /// Fill the cache to capacity with fresh fibers.
    pub fn prime_cache(&self) {
        let missing = self.config.cache_size - self.cache.borrow().len();
        let fresh: Vec<Fiber> = (0..missing)
            .map(|_| Fiber::new(self.config.stack_size, self.counters.clone()))
            .collect();
        self.cache.borrow_mut().extend(fresh);
        debug!(target: "fibers", primed = missing, "primed fiber cache");
    }

    /// Free every cached fiber and zero the counters.
    pub fn reset(&self) {
        let cached = std::mem::take(&mut *self.cache.borrow_mut());
        drop(cached);
        self.counters.reset();
        debug!(target: "fibers", "reset fiber scheduler");
    }

    pub fn statistics(&self) -> FiberStatistics {
        self.counters.snapshot(self.cache.borrow().len())
    }
}
