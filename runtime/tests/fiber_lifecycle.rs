// End-to-end behavior of tasks, fibers and the scheduler cache.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use proptest::prelude::*;
use qrt::{Cancelled, FiberConfig, FiberScheduler, FiberState, ResumableTask};

fn scheduler(cache_size: usize) -> Rc<FiberScheduler> {
    Rc::new(
        FiberScheduler::new(FiberConfig {
            stack_size: 64 * 1024,
            cache_size,
        })
        .unwrap(),
    )
}

#[derive(Debug, thiserror::Error)]
#[error("parse failed at byte {0}")]
struct ParseFailure(usize);

#[test]
fn task_error_is_redelivered_to_the_caller() {
    let s = scheduler(4);
    let mut task = ResumableTask::<()>::new(s.clone(), |ctx| {
        ctx.yield_now()?;
        Err(ParseFailure(7).into())
    });
    task.run().unwrap();
    let err = task.resume().unwrap_err();
    assert_eq!(err.to_string(), "parse failed at byte 7");
    assert!(err.downcast_ref::<ParseFailure>().is_some());
    assert!(task.is_done());

    // Released exactly once.
    let stats = s.statistics();
    assert_eq!(stats.cached, 1);
    assert_eq!(stats.current, 1);
}

#[test]
fn task_panic_is_resumed_on_the_caller_stack() {
    let s = scheduler(4);
    let mut task = ResumableTask::<()>::new(s.clone(), |_| panic!("fiber exploded"));
    let caught = panic::catch_unwind(AssertUnwindSafe(|| task.run())).unwrap_err();
    assert_eq!(caught.downcast_ref::<&str>(), Some(&"fiber exploded"));
    assert!(task.is_done());
    assert_eq!(s.statistics().cached, 1);

    // The recycled fiber runs the next job on a fresh context.
    let mut next = ResumableTask::new(s.clone(), |_| Ok(5));
    next.run().unwrap();
    assert_eq!(next.take_result(), Some(5));
    assert_eq!(s.statistics().total, 1);
}

#[test]
fn cancellation_is_an_ordinary_error_inside_the_job() {
    let s = scheduler(4);
    let seen = Rc::new(RefCell::new(None));
    let sink = seen.clone();
    let mut task = ResumableTask::new(s, move |ctx| {
        let err = anyhow::Error::from(ctx.yield_now().unwrap_err());
        *sink.borrow_mut() = Some(err.is::<Cancelled>());
        Err(err)
    });
    task.run().unwrap();
    task.abort();
    assert_eq!(*seen.borrow(), Some(true));
    assert_eq!(task.take_result(), None::<()>);
}

#[test]
fn interleaved_tasks_keep_their_own_stacks() {
    let s = scheduler(4);
    let log = Rc::new(RefCell::new(Vec::new()));

    let mut tasks: Vec<ResumableTask<usize>> = (0..3)
        .map(|i| {
            let log = log.clone();
            ResumableTask::new(s.clone(), move |ctx| {
                let mut local = i * 10;
                for step in 0..2 {
                    log.borrow_mut().push((i, step));
                    local += 1;
                    ctx.yield_now()?;
                }
                Ok(local)
            })
        })
        .collect();

    for t in &mut tasks {
        t.run().unwrap();
    }
    while tasks.iter().any(|t| !t.is_done()) {
        for t in tasks.iter_mut().filter(|t| !t.is_done()) {
            t.resume().unwrap();
        }
    }

    let results: Vec<usize> = tasks.iter_mut().filter_map(|t| t.take_result()).collect();
    assert_eq!(results, vec![2, 12, 22]);
    assert_eq!(
        *log.borrow(),
        vec![(0, 0), (1, 0), (2, 0), (0, 1), (1, 1), (2, 1)]
    );
    assert_eq!(s.statistics().max, 3);
}

#[test]
fn tasks_nest_inside_fibers() {
    let s = scheduler(4);
    let inner_scheduler = s.clone();
    let mut outer = ResumableTask::new(s.clone(), move |ctx| {
        let mut inner = ResumableTask::new(inner_scheduler, |ctx| {
            ctx.yield_now()?;
            Ok(20)
        });
        inner.run()?;
        ctx.yield_now()?;
        inner.resume()?;
        Ok(inner.take_result().unwrap_or_default() + 1)
    });
    outer.run().unwrap();
    assert!(!outer.is_done());
    outer.resume().unwrap();
    assert_eq!(outer.take_result(), Some(21));
    assert_eq!(s.statistics().cached, 2);
}

#[test]
fn initialized_counts_contexts_entering_their_loop() {
    let s = scheduler(4);
    s.prime_cache();
    assert_eq!(s.statistics().initialized, 0);
    for _ in 0..3 {
        let mut task = ResumableTask::new(s.clone(), |_| Ok(()));
        task.run().unwrap();
    }
    // The same cached fiber served every run; its loop started once.
    let stats = s.statistics();
    assert_eq!(stats.initialized, 1);
    assert_eq!(stats.total, 4);
}

#[test]
fn fiber_state_machine_through_the_public_api() {
    let s = scheduler(1);
    let mut fiber = s.create();
    assert_eq!(fiber.state(), FiberState::Init);
    fiber.run(|ctx| {
        assert_eq!(ctx.state(), FiberState::Running);
        ctx.yield_now()?;
        Ok(())
    });
    assert_eq!(fiber.state(), FiberState::Yielded);
    fiber.resume();
    assert_eq!(fiber.state(), FiberState::Idle);
    s.destroy(fiber);
}

proptest! {
    #[test]
    fn cache_round_trip_never_reallocates(cache_size in 1usize..8, n in 1usize..8) {
        prop_assume!(n <= cache_size);
        let s = scheduler(cache_size);
        let first: Vec<_> = (0..n).map(|_| s.create()).collect();
        for f in first {
            s.destroy(f);
        }
        let second: Vec<_> = (0..n).map(|_| s.create()).collect();
        prop_assert_eq!(s.statistics().total, n as u64);
        drop(second);
        prop_assert_eq!(s.statistics().current, 0);
    }
}
