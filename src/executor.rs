// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

mod external_event;
mod inline;
mod metrics;
mod panic_shield;
mod strand;
mod thread_pool;

use crate::error::Stopped;
use crate::scheduler::Scheduler;
use crate::task::{AutoCancelable, Cancelable, Task};
use std::cell::RefCell;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

pub use external_event::{
    ExternalEventExecutor, ExternalEventExecutorController, WakeFn, create_external_event,
};
pub use inline::{InlineExecutor, create_inline};
pub use metrics::{
    ExecutorMetrics, HistogramSnapshot, MetricsSnapshot, MetricsWrapper, TaskMetricsSnapshot,
    create_metrics_wrapper,
};
pub use panic_shield::{PanicHandler, PanicShield, create_panic_shield};
pub use strand::{Strand, create_strand};
pub use thread_pool::{
    ThreadInitFn, ThreadPoolConfig, ThreadPoolExecutor, ThreadPoolExecutorController,
    create_thread_pool, create_thread_pool_with_config,
};

/// A repeatedly invocable closure, the payload of `post_periodically`.
pub type RepeatableTask = Box<dyn FnMut() + Send>;

/// An object that accepts tasks and eventually runs them, with a defined
/// threading model.
///
/// Executors are shared through `Arc<dyn Executor>`. While a task runs, the
/// executor that owns it is exposed through [`this_thread::current_executor`],
/// which is how future continuations find their way back home.
pub trait Executor: Send + Sync {
    /// The executor's steady clock.
    fn now(&self) -> Instant;

    /// Enqueues a task for execution.
    ///
    /// # Errors
    ///
    /// Returns [`Stopped`] once the executor has been shut down.
    fn post(&self, task: Task) -> Result<(), Stopped>;

    /// Schedules a task to run at `deadline`.
    ///
    /// Deadlines in the past fire on the scheduler's next turn.
    ///
    /// # Errors
    ///
    /// Returns [`Stopped`] once the executor has been shut down.
    fn post_at(&self, deadline: Instant, task: Task) -> Result<Arc<dyn Cancelable>, Stopped>;

    /// Schedules a task to run after `delay`.
    ///
    /// # Errors
    ///
    /// Returns [`Stopped`] once the executor has been shut down.
    fn post_after(&self, delay: Duration, task: Task) -> Result<Arc<dyn Cancelable>, Stopped>;

    /// Schedules `task` to run every `period`, starting one period from now.
    ///
    /// Deadlines accumulate exactly (`post_time + n * period`); if wakeups lag,
    /// ticks bunch up rather than collapse. Dropping the returned
    /// [`AutoCancelable`] is the way periodic tasks are stopped.
    ///
    /// # Errors
    ///
    /// Returns [`Stopped`] once the executor has been shut down.
    fn post_periodically(
        &self,
        period: Duration,
        task: RepeatableTask,
    ) -> Result<AutoCancelable, Stopped>;

    /// The scheduler timed posts are routed through.
    fn scheduler(&self) -> Arc<dyn Scheduler>;

    /// Whether tasks posted to this executor run in post order without ever
    /// overlapping.
    fn is_serializing(&self) -> bool;
}

/// Owns the threads behind an executor and controls its shutdown.
pub trait ExecutorController {
    fn executor(&self) -> Arc<dyn Executor>;

    fn scheduler(&self) -> Arc<dyn Scheduler>;

    /// Shuts down: stops the owned scheduler thread, marks the executor
    /// stopped for new posts, drains already queued tasks and joins workers.
    /// Idempotent.
    fn finish(&self);
}

thread_local! {
    /// Stack of executors of the tasks currently on this thread's call stack.
    ///
    /// `None` entries mark tasks that were never adopted by an executor; a
    /// guard is pushed either way so lookups never leak into an outer task's
    /// context.
    static TASK_EXECUTOR_STACK: RefCell<Vec<Option<Weak<dyn Executor>>>> =
        const { RefCell::new(Vec::new()) };

    /// Fallback installed by host code for threads the runtime does not own.
    static THREAD_EXECUTOR: RefCell<Option<Weak<dyn Executor>>> = const { RefCell::new(None) };
}

/// Scoped entry in the thread's current-executor stack.
///
/// Restored on drop, so the context unwinds correctly even when a task panics.
pub(crate) struct CurrentExecutorGuard(());

impl CurrentExecutorGuard {
    pub(crate) fn new(executor: Option<Weak<dyn Executor>>) -> Self {
        TASK_EXECUTOR_STACK.with(|stack| stack.borrow_mut().push(executor));
        Self(())
    }
}

impl Drop for CurrentExecutorGuard {
    fn drop(&mut self) {
        TASK_EXECUTOR_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Access to the executor owning the task currently running on this thread.
pub mod this_thread {
    use super::{Executor, TASK_EXECUTOR_STACK, THREAD_EXECUTOR};
    use std::sync::{Arc, Weak};

    /// Installs a fallback executor for this thread.
    ///
    /// Required on threads the runtime does not own (think `main`) that still
    /// want to attach continuations with [`Future::then`]; continuations will
    /// be posted to the installed executor.
    ///
    /// [`Future::then`]: crate::future::Future::then
    pub fn set_current_executor(executor: Weak<dyn Executor>) {
        THREAD_EXECUTOR.with(|slot| *slot.borrow_mut() = Some(executor));
    }

    /// The executor of the task currently running on this thread, or the
    /// thread's fallback executor if no task is running.
    ///
    /// Returns `None` outside of any task on a thread without a fallback, and
    /// when the recorded executor has already been dropped.
    pub fn try_current_executor() -> Option<Arc<dyn Executor>> {
        let from_task = TASK_EXECUTOR_STACK.with(|stack| stack.borrow().last().cloned());
        match from_task {
            // A running task shadows the thread fallback even when its own
            // executor is gone or was never set.
            Some(current) => current.and_then(|weak| weak.upgrade()),
            None => THREAD_EXECUTOR.with(|slot| slot.borrow().as_ref().and_then(Weak::upgrade)),
        }
    }

    /// Like [`try_current_executor`], but panics when there is none.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a task on a thread without a fallback
    /// executor, or when the recorded executor has been dropped.
    #[track_caller]
    pub fn current_executor() -> Arc<dyn Executor> {
        try_current_executor().expect("no current executor on this thread")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use std::sync::mpsc;

    #[test]
    fn no_current_executor_outside_tasks() {
        assert!(this_thread::try_current_executor().is_none());
    }

    #[test]
    fn task_installs_its_executor() {
        let executor = create_inline();
        let weak = Arc::downgrade(&executor);
        let (tx, rx) = mpsc::channel();
        executor
            .post(Task::new(move || {
                let current = this_thread::current_executor();
                tx.send(Weak::ptr_eq(
                    &Arc::downgrade(&current),
                    &(weak.clone() as Weak<dyn Executor>),
                ))
                .unwrap();
            }))
            .unwrap();
        assert!(rx.recv().unwrap());
        // restored after the task finished
        assert!(this_thread::try_current_executor().is_none());
    }

    #[test]
    fn thread_fallback_is_shadowed_by_tasks() {
        let outer = create_inline();
        let inner = create_inline();
        this_thread::set_current_executor(Arc::downgrade(&outer) as Weak<dyn Executor>);
        assert!(this_thread::try_current_executor().is_some());

        let inner_clone = Arc::clone(&inner);
        let (tx, rx) = mpsc::channel();
        inner
            .post(Task::new(move || {
                let current = this_thread::current_executor();
                tx.send(Arc::ptr_eq(&current, &(inner_clone as Arc<dyn Executor>)))
                    .unwrap();
            }))
            .unwrap();
        assert!(rx.recv().unwrap());

        this_thread::set_current_executor(Weak::<InlineExecutor>::new() as Weak<dyn Executor>);
        assert!(this_thread::try_current_executor().is_none());
    }
}
