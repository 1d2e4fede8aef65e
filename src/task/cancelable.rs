// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::task::Task;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// A handle whose `cancel` prevents a not-yet-started task from running.
///
/// Cancellation is best effort across threads: a task that is already in
/// execution (or being prepared for execution) is not affected. `cancel` is
/// idempotent and safe to call concurrently with the task starting.
pub trait Cancelable: Send + Sync {
    fn cancel(&self);
}

/// Shared slot a scheduled task lives in until it runs or is cancelled.
pub(crate) type SharedTask = Arc<Mutex<Option<Task>>>;

#[derive(Debug)]
struct CancelState {
    cancelled: bool,
    running: bool,
}

/// The leaf cancelable guarding one scheduled task.
///
/// Cancelling drops the task payload (unless the task is already running), so
/// captured resources are released eagerly; the heap slot itself is cleaned up
/// lazily when the deadline surfaces.
#[derive(Debug)]
pub struct TaskCancelable {
    state: Mutex<CancelState>,
    task: Weak<Mutex<Option<Task>>>,
}

impl TaskCancelable {
    pub(crate) fn new(task: Weak<Mutex<Option<Task>>>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CancelState {
                cancelled: false,
                running: false,
            }),
            task,
        })
    }

    /// Transitions to running unless already cancelled. Once this returns
    /// `true`, a concurrent `cancel` no longer affects the invocation.
    pub(crate) fn maybe_mark_running(&self) -> bool {
        let mut state = self.state.lock();
        state.running = !state.cancelled;
        state.running
    }
}

impl Cancelable for TaskCancelable {
    fn cancel(&self) {
        let mut state = self.state.lock();
        state.cancelled = true;
        if state.running {
            return;
        }
        if let Some(task) = self.task.upgrade() {
            task.lock().take();
        }
    }
}

/// A task wrapper that observes its cancel cell right before invocation.
pub struct CancelableTask {
    task: SharedTask,
    cancelable: Arc<TaskCancelable>,
}

impl CancelableTask {
    pub(crate) fn new(task: SharedTask, cancelable: Arc<TaskCancelable>) -> Self {
        Self { task, cancelable }
    }

    /// Wraps a task in a fresh cancel cell, returning the guarded task and the
    /// matching handle.
    pub(crate) fn wrap(task: Task) -> (Self, Arc<TaskCancelable>) {
        let shared = Arc::new(Mutex::new(Some(task)));
        let cancelable = TaskCancelable::new(Arc::downgrade(&shared));
        (Self::new(shared, Arc::clone(&cancelable)), cancelable)
    }

    /// Converts into a plain [`Task`] suitable for posting.
    pub(crate) fn into_task(self) -> Task {
        Task::new(move || {
            if !self.cancelable.maybe_mark_running() {
                return;
            }
            let task = self.task.lock().take();
            if let Some(task) = task {
                task.run();
            }
        })
    }
}

/// Owns a [`Cancelable`] and cancels it when dropped.
///
/// This scope-bound form is how periodic tasks are torn down.
#[must_use = "dropping an AutoCancelable cancels the underlying work"]
pub struct AutoCancelable {
    inner: Arc<dyn Cancelable>,
}

impl AutoCancelable {
    pub fn new(inner: Arc<dyn Cancelable>) -> Self {
        Self { inner }
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }
}

impl Drop for AutoCancelable {
    fn drop(&mut self) {
        self.inner.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_task(count: &Arc<AtomicUsize>) -> Task {
        let count = Arc::clone(count);
        Task::new(move || {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn cancel_before_run_suppresses_the_task() {
        let count = Arc::new(AtomicUsize::new(0));
        let (task, cancelable) = CancelableTask::wrap(counting_task(&count));
        cancelable.cancel();
        task.into_task().run();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancel_is_idempotent() {
        let count = Arc::new(AtomicUsize::new(0));
        let (task, cancelable) = CancelableTask::wrap(counting_task(&count));
        cancelable.cancel();
        cancelable.cancel();
        task.into_task().run();
        cancelable.cancel();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancel_after_run_is_a_no_op() {
        let count = Arc::new(AtomicUsize::new(0));
        let (task, cancelable) = CancelableTask::wrap(counting_task(&count));
        task.into_task().run();
        cancelable.cancel();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_releases_the_payload() {
        let resource = Arc::new(());
        let captured = Arc::clone(&resource);
        let (task, cancelable) = CancelableTask::wrap(Task::new(move || {
            let _keep = &captured;
        }));
        assert_eq!(Arc::strong_count(&resource), 2);
        cancelable.cancel();
        assert_eq!(Arc::strong_count(&resource), 1);
        task.into_task().run();
    }

    #[test]
    fn auto_cancelable_cancels_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        let (task, cancelable) = CancelableTask::wrap(counting_task(&count));
        drop(AutoCancelable::new(cancelable));
        task.into_task().run();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
