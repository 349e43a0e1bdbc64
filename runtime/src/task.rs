// task.rs — Run-until-result-or-suspension wrapper around a fiber
//
// A `ResumableTask` owns one fiber while its job is in flight. `run` and
// `resume` return once the job yields or finishes; a job failure is
// re-raised on the caller's stack (errors as `Err`, panics by resuming the
// unwind), and the fiber goes back to the scheduler as soon as the task
// reaches a terminal state.

use std::panic;
use std::rc::Rc;

use tracing::trace;

use crate::error::internal_error;
use crate::fiber::{Fiber, FiberContext, TaskFailure};
use crate::scheduler::FiberScheduler;

type Body<T> = Box<dyn FnOnce(&FiberContext<'_>) -> anyhow::Result<T>>;

pub struct ResumableTask<T: 'static> {
    scheduler: Rc<FiberScheduler>,
    body: Option<Body<T>>,
    fiber: Option<Fiber>,
    result: Option<T>,
    done: bool,
}

impl<T: 'static> ResumableTask<T> {
    pub fn new<F>(scheduler: Rc<FiberScheduler>, body: F) -> Self
    where
        F: FnOnce(&FiberContext<'_>) -> anyhow::Result<T> + 'static,
    {
        ResumableTask {
            scheduler,
            body: Some(Box::new(body)),
            fiber: None,
            result: None,
            done: false,
        }
    }

    /// Start the job on a fiber from the scheduler.
    pub fn run(&mut self) -> anyhow::Result<()> {
        let Some(body) = self.body.take() else {
            internal_error("task started twice");
        };
        let mut fiber = self.scheduler.create();
        fiber.run(body);
        self.fiber = Some(fiber);
        self.yielded()
    }

    /// Continue a job that yielded.
    pub fn resume(&mut self) -> anyhow::Result<()> {
        let Some(fiber) = self.fiber.as_mut() else {
            internal_error("resume of a task without a suspended fiber");
        };
        fiber.resume();
        self.yielded()
    }

    /// Cancel the job, discarding any result. The task is done afterwards.
    /// A panic raised by the job while it unwinds is resumed here, after the
    /// fiber went back to the scheduler.
    pub fn abort(&mut self) {
        let mut failure = None;
        if let Some(mut fiber) = self.fiber.take() {
            fiber.abort();
            failure = fiber.take_failure();
            self.scheduler.destroy(fiber);
        }
        trace!(target: "fibers", "task aborted");
        self.body = None;
        self.result = None;
        self.done = true;
        if let Some(TaskFailure::Panic(payload)) = failure {
            panic::resume_unwind(payload);
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn result(&self) -> Option<&T> {
        self.result.as_ref()
    }

    pub fn take_result(&mut self) -> Option<T> {
        self.result.take()
    }

    /// Inspect the fiber after control came back to us.
    fn yielded(&mut self) -> anyhow::Result<()> {
        let Some(fiber) = self.fiber.as_mut() else {
            return Ok(());
        };

        if let Some(failure) = fiber.take_failure() {
            self.release();
            self.done = true;
            return match failure {
                TaskFailure::Error(e) => Err(e),
                TaskFailure::Panic(payload) => panic::resume_unwind(payload),
            };
        }

        if let Some(value) = fiber.take_result() {
            let value = match value.downcast::<T>() {
                Ok(value) => *value,
                Err(_) => internal_error("task produced a value of the wrong type"),
            };
            self.result = Some(value);
            self.release();
            self.done = true;
        }

        Ok(())
    }

    fn release(&mut self) {
        if let Some(fiber) = self.fiber.take() {
            self.scheduler.destroy(fiber);
        }
    }
}

impl<T: 'static> Drop for ResumableTask<T> {
    fn drop(&mut self) {
        self.release();
    }
}
