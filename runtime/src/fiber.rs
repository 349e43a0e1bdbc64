// fiber.rs — Stackful cooperative execution contexts
//
// A `Fiber` owns a coroutine stack running a trampoline: it takes a job,
// runs it to completion, parks as `Idle`, and waits for the next job. Jobs
// suspend themselves through `FiberContext::yield_now`. Cancellation is a
// `Cancelled` error returned from the suspension point; a job that ignores
// it and suspends again is force-unwound.
//
// Preconditions: a fiber is driven from the thread that created it.
// Postconditions: after `run`/`resume` return, the fiber is `Yielded`,
//                 `Idle` (job result or failure stored), or re-armed with a
//                 fresh context after a panic.
// Failure modes: protocol violations (resume of a non-yielded fiber, yield
//                outside a running job) → assertion panic; stack allocation
//                failure → `internal_error`.
// Side effects: switches stacks; emits `fibers` trace events.

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};
use tracing::{trace, warn};

use crate::error::internal_error;
use crate::stats::Counters;

// ── Public types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FiberState {
    /// Fresh context, no job run yet.
    Init,
    Running,
    /// Suspended inside a job.
    Yielded,
    /// Job finished; context parked waiting for the next job.
    Idle,
    /// Cancellation delivered; the job is unwinding.
    Aborting,
    /// The last job was aborted.
    Finished,
}

/// Delivered at a suspension point when the fiber is being aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("fiber aborted")]
pub struct Cancelled;

/// A job's failure, captured on the fiber and redelivered to its owner.
pub enum TaskFailure {
    Error(anyhow::Error),
    Panic(Box<dyn Any + Send + 'static>),
}

impl fmt::Debug for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskFailure::Error(e) => f.debug_tuple("Error").field(e).finish(),
            TaskFailure::Panic(_) => f.write_str("Panic(..)"),
        }
    }
}

/// Handle a running job uses to suspend its fiber.
pub struct FiberContext<'y> {
    yielder: &'y Yielder<Signal, Suspend>,
    state: Rc<Cell<FiberState>>,
}

impl FiberContext<'_> {
    /// Suspend the fiber until its owner resumes or aborts it.
    ///
    /// Returns `Err(Cancelled)` when the fiber is being aborted; jobs should
    /// propagate it with `?`.
    pub fn yield_now(&self) -> Result<(), Cancelled> {
        let state = self.state.get();
        assert!(
            matches!(state, FiberState::Running | FiberState::Aborting),
            "yield from a fiber that is not running (state {state:?})"
        );
        if state == FiberState::Running {
            self.state.set(FiberState::Yielded);
        }

        match self.yielder.suspend(Suspend::Yielded) {
            Signal::Resume => {
                self.state.set(FiberState::Running);
                Ok(())
            }
            Signal::Abort => Err(Cancelled),
            Signal::Run(_) => internal_error("job delivered to a suspended fiber"),
        }
    }

    pub fn state(&self) -> FiberState {
        self.state.get()
    }
}

// ── Switching protocol ──────────────────────────────────────────────────────

type Outcome = anyhow::Result<Box<dyn Any>>;
pub(crate) type Job = Box<dyn FnOnce(&FiberContext<'_>) -> Outcome>;

/// Owner → fiber.
pub(crate) enum Signal {
    Run(Job),
    Resume,
    Abort,
}

/// Fiber → owner.
pub(crate) enum Suspend {
    Yielded,
    Idle(Outcome),
}

type Context = Coroutine<Signal, Suspend, (), DefaultStack>;

fn trampoline(stack: DefaultStack, state: Rc<Cell<FiberState>>, counters: Rc<Counters>) -> Context {
    Coroutine::with_stack(stack, move |yielder: &Yielder<Signal, Suspend>, first: Signal| {
        counters.initialized();
        let mut signal = first;
        loop {
            let Signal::Run(job) = signal else {
                internal_error("fiber context entered without a job");
            };
            state.set(FiberState::Running);
            let outcome = job(&FiberContext {
                yielder,
                state: state.clone(),
            });
            state.set(FiberState::Idle);
            signal = yielder.suspend(Suspend::Idle(outcome));
        }
    })
}

// ── Fiber ───────────────────────────────────────────────────────────────────

pub struct Fiber {
    context: Option<Context>,
    state: Rc<Cell<FiberState>>,
    counters: Rc<Counters>,
    result: Option<Box<dyn Any>>,
    failure: Option<TaskFailure>,
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("state", &self.state.get())
            .field("has_result", &self.result.is_some())
            .field("failure", &self.failure)
            .finish()
    }
}

impl Fiber {
    pub(crate) fn new(stack_size: usize, counters: Rc<Counters>) -> Fiber {
        let stack = match DefaultStack::new(stack_size) {
            Ok(stack) => stack,
            Err(e) => internal_error(&format!("could not allocate {stack_size}-byte fiber stack: {e}")),
        };
        let state = Rc::new(Cell::new(FiberState::Init));
        counters.allocated();
        trace!(target: "fibers", stack_size, "allocated fiber");
        Fiber {
            context: Some(trampoline(stack, state.clone(), counters.clone())),
            state,
            counters,
            result: None,
            failure: None,
        }
    }

    pub fn state(&self) -> FiberState {
        self.state.get()
    }

    /// Bind `task` to this fiber and run it until it returns or yields.
    pub fn run<T, F>(&mut self, task: F)
    where
        T: 'static,
        F: FnOnce(&FiberContext<'_>) -> anyhow::Result<T> + 'static,
    {
        let state = self.state.get();
        assert!(
            matches!(
                state,
                FiberState::Init | FiberState::Idle | FiberState::Finished
            ),
            "run on a busy fiber (state {state:?})"
        );
        self.result = None;
        self.failure = None;
        let job: Job =
            Box::new(move |ctx: &FiberContext<'_>| task(ctx).map(|v| Box::new(v) as Box<dyn Any>));
        trace!(target: "fibers", "run");
        self.switch(Signal::Run(job));
    }

    /// Continue a yielded job where it left off.
    pub fn resume(&mut self) {
        let state = self.state.get();
        assert_eq!(
            state,
            FiberState::Yielded,
            "resume of a fiber that is not yielded"
        );
        trace!(target: "fibers", "resume");
        self.switch(Signal::Resume);
    }

    /// Cancel a yielded job: it sees `Cancelled` at its suspension point and
    /// unwinds. Any result or error it produces is discarded; a panic raised
    /// while unwinding is kept for `take_failure`.
    pub fn abort(&mut self) {
        let state = self.state.get();
        assert_eq!(
            state,
            FiberState::Yielded,
            "abort of a fiber that is not yielded"
        );
        trace!(target: "fibers", "abort");
        self.state.set(FiberState::Aborting);
        self.switch(Signal::Abort);

        if self.state.get() == FiberState::Aborting {
            // The job suspended again instead of returning.
            warn!(target: "fibers", "job ignored cancellation; unwinding its stack");
            if let Some(context) = self.context.as_mut() {
                context.force_unwind();
            }
            self.rearm();
        }

        self.result = None;
        if let Some(TaskFailure::Error(_)) = self.failure {
            self.failure = None;
        }
        if self.failure.is_some() {
            warn!(target: "fibers", "job panicked while handling cancellation");
        }
        self.state.set(FiberState::Finished);
    }

    /// Value returned by the last job, once it finished.
    pub fn take_result(&mut self) -> Option<Box<dyn Any>> {
        self.result.take()
    }

    /// Failure of the last job, once it finished.
    pub fn take_failure(&mut self) -> Option<TaskFailure> {
        self.failure.take()
    }

    /// Forget any unclaimed outcome before the fiber is reused.
    pub(crate) fn clear(&mut self) {
        self.result = None;
        self.failure = None;
    }

    fn switch(&mut self, signal: Signal) {
        let Some(context) = self.context.as_mut() else {
            internal_error("fiber has no execution context");
        };

        match panic::catch_unwind(AssertUnwindSafe(|| context.resume(signal))) {
            Ok(CoroutineResult::Yield(Suspend::Yielded)) => {
                trace!(target: "fibers", "yielded");
            }
            Ok(CoroutineResult::Yield(Suspend::Idle(outcome))) => {
                trace!(target: "fibers", ok = outcome.is_ok(), "job finished");
                match outcome {
                    Ok(value) => self.result = Some(value),
                    Err(e) => self.failure = Some(TaskFailure::Error(e)),
                }
            }
            Ok(CoroutineResult::Return(())) => internal_error("fiber trampoline returned"),
            Err(payload) => {
                trace!(target: "fibers", "job panicked");
                self.failure = Some(TaskFailure::Panic(payload));
                self.rearm();
            }
        }
    }

    /// Replace a finished context with a fresh one on the same stack.
    fn rearm(&mut self) {
        if let Some(context) = self.context.take() {
            let stack = context.into_stack();
            self.context = Some(trampoline(
                stack,
                self.state.clone(),
                self.counters.clone(),
            ));
        }
        self.state.set(FiberState::Init);
    }
}

impl Drop for Fiber {
    fn drop(&mut self) {
        self.counters.freed();
        trace!(target: "fibers", state = ?self.state.get(), "freed fiber");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fiber() -> Fiber {
        Fiber::new(64 * 1024, Rc::new(Counters::default()))
    }

    #[test]
    fn runs_to_completion() {
        let mut f = fiber();
        assert_eq!(f.state(), FiberState::Init);
        f.run(|_| Ok(42u32));
        assert_eq!(f.state(), FiberState::Idle);
        let value = f.take_result().unwrap();
        assert_eq!(*value.downcast::<u32>().unwrap(), 42);
    }

    #[test]
    fn yields_and_resumes_in_place() {
        let log = Rc::new(Cell::new(0));
        let seen = log.clone();
        let mut f = fiber();
        f.run(move |ctx| {
            seen.set(1);
            ctx.yield_now()?;
            seen.set(2);
            ctx.yield_now()?;
            seen.set(3);
            Ok(())
        });
        assert_eq!((f.state(), log.get()), (FiberState::Yielded, 1));
        f.resume();
        assert_eq!((f.state(), log.get()), (FiberState::Yielded, 2));
        f.resume();
        assert_eq!((f.state(), log.get()), (FiberState::Idle, 3));
        assert!(f.take_result().is_some());
    }

    #[test]
    fn abort_delivers_cancellation() {
        let cleaned = Rc::new(Cell::new(false));
        let flag = cleaned.clone();
        let mut f = fiber();
        f.run(move |ctx| {
            let r = ctx.yield_now();
            flag.set(true);
            r?;
            Ok(())
        });
        f.abort();
        assert!(cleaned.get());
        assert_eq!(f.state(), FiberState::Finished);
        assert!(f.take_failure().is_none());
        // The context is reusable afterwards.
        f.run(|_| Ok("again"));
        assert_eq!(f.state(), FiberState::Idle);
    }

    #[test]
    fn stubborn_job_is_force_unwound() {
        let mut f = fiber();
        f.run(|ctx: &FiberContext<'_>| -> anyhow::Result<()> {
            loop {
                let _ = ctx.yield_now();
            }
        });
        f.abort();
        assert_eq!(f.state(), FiberState::Finished);
        f.run(|_| Ok(1));
        assert_eq!(f.state(), FiberState::Idle);
    }

    #[test]
    fn panics_are_captured_and_context_rearmed() {
        let mut f = fiber();
        f.run(|_| -> anyhow::Result<()> { panic!("boom") });
        assert!(matches!(f.take_failure(), Some(TaskFailure::Panic(_))));
        assert_eq!(f.state(), FiberState::Init);
        f.run(|_| Ok(()));
        assert_eq!(f.state(), FiberState::Idle);
    }

    #[test]
    fn panic_during_cancellation_is_kept() {
        let mut f = fiber();
        f.run(|ctx: &FiberContext<'_>| -> anyhow::Result<()> {
            if ctx.yield_now().is_err() {
                panic!("cleanup failed");
            }
            Ok(())
        });
        f.abort();
        assert_eq!(f.state(), FiberState::Finished);
        let Some(TaskFailure::Panic(payload)) = f.take_failure() else {
            panic!("expected the cleanup panic to be kept");
        };
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"cleanup failed"));
        f.run(|_| Ok(()));
        assert_eq!(f.state(), FiberState::Idle);
    }

    #[test]
    #[should_panic(expected = "resume of a fiber that is not yielded")]
    fn resume_requires_yielded() {
        let mut f = fiber();
        f.resume();
    }
}
