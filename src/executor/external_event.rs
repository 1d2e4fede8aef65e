// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::error::Stopped;
use crate::executor::{Executor, ExecutorController, RepeatableTask, ThreadInitFn};
use crate::scheduler::{DefaultScheduler, Scheduler, SchedulerThread};
use crate::task::{AutoCancelable, Cancelable, PeriodicTask, Task};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Callback that wakes the host event loop.
pub type WakeFn = Box<dyn Fn() + Send + Sync>;

struct ExternalState {
    queue: VecDeque<Task>,
    stopped: bool,
}

/// An executor driven by a host event loop (`epoll`, a UI loop, ...).
///
/// `wake` fires exactly when a post finds the queue empty (edge-triggered);
/// the host is expected to call [`run_once`](ExternalEventExecutor::run_once)
/// from inside its loop in response. `run_once` swaps the queue out before
/// draining, so concurrent posts never block behind running tasks.
pub struct ExternalEventExecutor {
    state: Mutex<ExternalState>,
    wake: WakeFn,
    scheduler: Arc<dyn Scheduler>,
    weak_self: Weak<ExternalEventExecutor>,
}

impl ExternalEventExecutor {
    pub(crate) fn new(scheduler: Arc<dyn Scheduler>, wake: WakeFn) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            state: Mutex::new(ExternalState {
                queue: VecDeque::new(),
                stopped: false,
            }),
            wake,
            scheduler,
            weak_self: weak_self.clone(),
        })
    }

    /// Drains every task currently queued, including tasks posted while the
    /// drain is in progress. Returns the number of tasks run.
    pub fn run_once(&self) -> usize {
        let mut processed = 0;
        loop {
            let batch = {
                let mut state = self.state.lock();
                if state.queue.is_empty() {
                    return processed;
                }
                std::mem::take(&mut state.queue)
            };
            for task in batch {
                task.run();
                processed += 1;
            }
        }
    }

    pub(crate) fn mark_stopped(&self) {
        self.state.lock().stopped = true;
    }

    fn weak_self(&self) -> Weak<dyn Executor> {
        self.weak_self.clone()
    }
}

impl Executor for ExternalEventExecutor {
    fn now(&self) -> Instant {
        self.scheduler.now()
    }

    fn post(&self, mut task: Task) -> Result<(), Stopped> {
        task.maybe_set_executor(self.weak_self());
        let wake = {
            let mut state = self.state.lock();
            if state.stopped {
                return Err(Stopped(()));
            }
            let was_empty = state.queue.is_empty();
            state.queue.push_back(task);
            was_empty
        };
        if wake {
            (self.wake)();
        }
        Ok(())
    }

    fn post_at(&self, deadline: Instant, mut task: Task) -> Result<Arc<dyn Cancelable>, Stopped> {
        task.maybe_set_executor(self.weak_self());
        Ok(self.scheduler.execute_at(self.weak_self(), deadline, task))
    }

    fn post_after(&self, delay: Duration, mut task: Task) -> Result<Arc<dyn Cancelable>, Stopped> {
        task.maybe_set_executor(self.weak_self());
        Ok(self.scheduler.execute_after(self.weak_self(), delay, task))
    }

    fn post_periodically(
        &self,
        period: Duration,
        task: RepeatableTask,
    ) -> Result<AutoCancelable, Stopped> {
        let executor = self.weak_self.upgrade().ok_or(Stopped(()))?;
        Ok(AutoCancelable::new(PeriodicTask::create(
            period,
            task,
            executor as Arc<dyn Executor>,
        )))
    }

    fn scheduler(&self) -> Arc<dyn Scheduler> {
        Arc::clone(&self.scheduler)
    }

    fn is_serializing(&self) -> bool {
        true
    }
}

/// Owns an [`ExternalEventExecutor`] and, unless an external scheduler was
/// supplied, the scheduler thread driving its timed posts.
pub struct ExternalEventExecutorController {
    executor: Arc<ExternalEventExecutor>,
    scheduler_thread: Mutex<Option<SchedulerThread>>,
}

impl ExternalEventExecutorController {
    fn new(
        wake: WakeFn,
        scheduler_init_fn: Option<ThreadInitFn>,
        external_scheduler: Option<Arc<dyn Scheduler>>,
    ) -> Self {
        let (scheduler, scheduler_thread) = match external_scheduler {
            Some(scheduler) => (scheduler, None),
            None => {
                let thread =
                    SchedulerThread::new(scheduler_init_fn, Arc::new(DefaultScheduler::new()));
                (thread.scheduler(), Some(thread))
            }
        };

        Self {
            executor: ExternalEventExecutor::new(scheduler, wake),
            scheduler_thread: Mutex::new(scheduler_thread),
        }
    }

    /// Forwarded to [`ExternalEventExecutor::run_once`]; call this from the
    /// host loop whenever the wake callback fired.
    pub fn run_once(&self) -> usize {
        self.executor.run_once()
    }
}

impl ExecutorController for ExternalEventExecutorController {
    fn executor(&self) -> Arc<dyn Executor> {
        Arc::clone(&self.executor) as Arc<dyn Executor>
    }

    fn scheduler(&self) -> Arc<dyn Scheduler> {
        self.executor.scheduler()
    }

    fn finish(&self) {
        if let Some(mut scheduler_thread) = self.scheduler_thread.lock().take() {
            scheduler_thread.finish();
        }
        self.executor.mark_stopped();
    }
}

impl Drop for ExternalEventExecutorController {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Creates an executor embedded into a host event loop. `wake` must make the
/// host call [`run_once`](ExternalEventExecutorController::run_once) soon.
pub fn create_external_event(
    wake: WakeFn,
    scheduler_init_fn: Option<ThreadInitFn>,
    scheduler: Option<Arc<dyn Scheduler>>,
) -> ExternalEventExecutorController {
    ExternalEventExecutorController::new(wake, scheduler_init_fn, scheduler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_wake() -> (Arc<AtomicUsize>, WakeFn) {
        let wakes = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&wakes);
        (
            wakes,
            Box::new(move || {
                counted.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn wake_is_edge_triggered() {
        let (wakes, wake) = counting_wake();
        let controller = create_external_event(wake, None, None);
        let executor = controller.executor();

        executor.post(Task::new(|| {})).unwrap();
        executor.post(Task::new(|| {})).unwrap();
        executor.post(Task::new(|| {})).unwrap();
        assert_eq!(wakes.load(Ordering::SeqCst), 1);

        assert_eq!(controller.run_once(), 3);

        // queue went empty, the next post wakes again
        executor.post(Task::new(|| {})).unwrap();
        assert_eq!(wakes.load(Ordering::SeqCst), 2);
        assert_eq!(controller.run_once(), 1);
        controller.finish();
    }

    #[test]
    fn run_once_drains_posts_made_during_the_drain() {
        let (_wakes, wake) = counting_wake();
        let controller = create_external_event(wake, None, None);
        let executor = controller.executor();

        let again = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&again);
        let inner_executor = Arc::clone(&executor);
        executor
            .post(Task::new(move || {
                inner_executor
                    .post(Task::new(move || {
                        observed.fetch_add(1, Ordering::SeqCst);
                    }))
                    .unwrap();
            }))
            .unwrap();

        assert_eq!(controller.run_once(), 2);
        assert_eq!(again.load(Ordering::SeqCst), 1);
        controller.finish();
    }

    #[test]
    fn post_after_finish_fails() {
        let (_wakes, wake) = counting_wake();
        let controller = create_external_event(wake, None, None);
        let executor = controller.executor();
        controller.finish();
        assert_eq!(executor.post(Task::new(|| {})), Err(Stopped(())));
    }

    #[test]
    fn timed_posts_fire_into_the_host_queue() {
        let (_wakes, wake) = counting_wake();
        let controller = create_external_event(wake, None, None);
        let executor = controller.executor();
        let ran = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&ran);
        executor
            .post_after(
                Duration::from_millis(10),
                Task::new(move || {
                    observed.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while ran.load(Ordering::SeqCst) == 0 {
            assert!(Instant::now() < deadline, "timed post never fired");
            controller.run_once();
            std::thread::sleep(Duration::from_millis(1));
        }
        controller.finish();
    }
}
