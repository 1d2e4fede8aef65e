// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::executor::{Executor, create_inline};
use crate::scheduler::{BaseScheduler, Scheduler};
use crate::task::{Cancelable, Task};
use parking_lot::Mutex;
use std::sync::mpsc;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Runs `f` inside an inline-executor task on the current thread and returns
/// its result. Everything posted to the ambient executor (including future
/// continuations attached inside `f`) runs synchronously, which makes
/// continuation tests deterministic.
pub(crate) fn with_inline<T>(f: impl FnOnce() -> T + Send + 'static) -> T
where
    T: Send + 'static,
{
    let executor = create_inline();
    let (tx, rx) = mpsc::channel();
    executor
        .post(Task::new(move || {
            tx.send(f()).unwrap();
        }))
        .unwrap();
    rx.recv().unwrap()
}

/// A scheduler against a virtual clock that only moves when told to.
///
/// Advancing the clock forwards every entry that becomes due, one deadline
/// step at a time, so tests control exactly which ticks have fired.
pub(crate) struct FakeClockScheduler {
    base: Mutex<BaseScheduler>,
    now: Arc<Mutex<Instant>>,
}

impl FakeClockScheduler {
    pub(crate) fn new() -> Self {
        let now = Arc::new(Mutex::new(Instant::now()));
        let sampled = Arc::clone(&now);
        Self {
            base: Mutex::new(BaseScheduler::new(Box::new(move || *sampled.lock()))),
            now,
        }
    }

    /// Moves the clock to the next due deadline, clamped by `limit`, and
    /// forwards everything that became due. Returns true once `limit` has
    /// been reached.
    pub(crate) fn advance_to_next(&self, limit: Instant) -> bool {
        let batch = {
            let mut base = self.base.lock();
            let next = base.next_expiry(limit);
            *self.now.lock() = next;
            base.prepare_elapse();
            base.take_elapsed()
        };
        for entry in batch {
            entry.dispatch();
        }
        *self.now.lock() >= limit
    }

    /// Advances the virtual clock by `duration`, firing every deadline in
    /// between in order.
    pub(crate) fn advance(&self, duration: Duration) {
        let limit = *self.now.lock() + duration;
        while !self.advance_to_next(limit) {}
    }
}

impl Scheduler for FakeClockScheduler {
    fn now(&self) -> Instant {
        *self.now.lock()
    }

    fn execute_at(
        &self,
        executor: Weak<dyn Executor>,
        deadline: Instant,
        task: Task,
    ) -> Arc<dyn Cancelable> {
        self.base.lock().execute_at(executor, deadline, task)
    }

    fn execute_after(
        &self,
        executor: Weak<dyn Executor>,
        delay: Duration,
        task: Task,
    ) -> Arc<dyn Cancelable> {
        self.base.lock().execute_after(executor, delay, task)
    }
}
