// qrt — cooperative fiber runtime
//
// Library root. `scheduler` hands out fibers, `fiber` switches stacks,
// `task` wraps a fiber into a run/resume/abort contract.

pub mod config;
pub mod error;
pub mod fiber;
pub mod scheduler;
pub mod stats;
pub mod task;

pub use config::FiberConfig;
pub use fiber::{Cancelled, Fiber, FiberContext, FiberState};
pub use scheduler::FiberScheduler;
pub use stats::FiberStatistics;
pub use task::ResumableTask;
