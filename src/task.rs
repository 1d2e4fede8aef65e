// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

mod cancelable;
mod periodic;

use crate::executor::{CurrentExecutorGuard, Executor};
use std::fmt;
use std::sync::Weak;

pub use cancelable::{AutoCancelable, Cancelable, CancelableTask, TaskCancelable};
pub use periodic::PeriodicTask;

/// A type-erased unit of work.
///
/// A task owns a no-arg closure and, optionally, a weak handle to the executor
/// it was first posted to. Wrappers (strands, shields) pass tasks down their
/// stack without losing track of the user's original executor: only the first
/// recorded executor sticks.
pub struct Task {
    closure: Box<dyn FnOnce() + Send>,
    executor: Option<Weak<dyn Executor>>,
}

impl Task {
    pub fn new(closure: impl FnOnce() + Send + 'static) -> Self {
        Self {
            closure: Box::new(closure),
            executor: None,
        }
    }

    /// Records the executor this task belongs to. Called by each executor in
    /// the stack the task is posted through; every call after the first is
    /// ignored, so the outermost wrapper wins.
    pub fn maybe_set_executor(&mut self, executor: Weak<dyn Executor>) {
        if self.executor.is_none() {
            self.executor = Some(executor);
        }
    }

    #[cfg(test)]
    pub(crate) fn executor(&self) -> Option<&Weak<dyn Executor>> {
        self.executor.as_ref()
    }

    /// Runs the closure once.
    ///
    /// For the duration of the call the thread's current-executor context
    /// points at the recorded executor. The closure and everything it captured
    /// are dropped before this returns, so captured resources are released on
    /// the thread that ran the task.
    pub fn run(self) {
        let _guard = CurrentExecutorGuard::new(self.executor);
        (self.closure)();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("executor_set", &self.executor.is_some())
            .finish_non_exhaustive()
    }
}

static_assertions::assert_impl_all!(Task: Send);
