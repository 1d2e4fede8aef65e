// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::error::Stopped;
use crate::executor::{Executor, RepeatableTask};
use crate::scheduler::Scheduler;
use crate::task::{AutoCancelable, Cancelable, PeriodicTask, Task};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum State {
    Waiting,
    Executing,
}

struct StrandState {
    queue: VecDeque<Task>,
    state: State,
}

/// A serializing wrapper over any inner executor.
///
/// At most one of the strand's tasks is in flight or queued on the inner
/// executor at any time, and all of them observe a single total order matching
/// enqueue order. Layering a strand over a multi-threaded pool recovers
/// single-threaded reasoning without a dedicated thread.
pub struct Strand {
    inner: Arc<dyn Executor>,
    state: Mutex<StrandState>,
    weak_self: Weak<Strand>,
}

impl Strand {
    fn new(inner: Arc<dyn Executor>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            inner,
            state: Mutex::new(StrandState {
                queue: VecDeque::new(),
                state: State::Waiting,
            }),
            weak_self: weak_self.clone(),
        })
    }

    fn weak_self(&self) -> Weak<dyn Executor> {
        self.weak_self.clone()
    }

    /// Forwards one task to the inner executor. The wrapper keeps the strand
    /// alive while it sits in the inner queue and hands execution back through
    /// [`notify_done`](Self::notify_done).
    fn forward(&self, task: Task) -> Result<(), Stopped> {
        let Some(strand) = self.weak_self.upgrade() else {
            return Ok(());
        };
        self.inner.post(Task::new(move || {
            task.run();
            strand.notify_done();
        }))
    }

    fn notify_done(&self) {
        let task = {
            let mut state = self.state.lock();
            debug_assert_eq!(state.state, State::Executing);
            let Some(task) = state.queue.pop_front() else {
                state.state = State::Waiting;
                return;
            };
            task
        };
        if self.forward(task).is_err() {
            // the inner executor stopped mid-drain; un-wedge the strand
            tracing::debug!("inner executor stopped, dropping queued strand task");
            self.state.lock().state = State::Waiting;
        }
    }
}

impl Executor for Strand {
    fn now(&self) -> Instant {
        self.inner.now()
    }

    fn post(&self, mut task: Task) -> Result<(), Stopped> {
        task.maybe_set_executor(self.weak_self());
        {
            let mut state = self.state.lock();
            match state.state {
                State::Executing => {
                    state.queue.push_back(task);
                    return Ok(());
                }
                State::Waiting => {
                    state.state = State::Executing;
                }
            }
        }
        let result = self.forward(task);
        if result.is_err() {
            self.state.lock().state = State::Waiting;
        }
        result
    }

    fn post_at(&self, deadline: Instant, mut task: Task) -> Result<Arc<dyn Cancelable>, Stopped> {
        task.maybe_set_executor(self.weak_self());
        Ok(self
            .scheduler()
            .execute_at(self.weak_self(), deadline, task))
    }

    fn post_after(&self, delay: Duration, mut task: Task) -> Result<Arc<dyn Cancelable>, Stopped> {
        task.maybe_set_executor(self.weak_self());
        Ok(self.scheduler().execute_after(self.weak_self(), delay, task))
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
        self.inner.scheduler()
    }

    fn is_serializing(&self) -> bool {
        true
    }
}

/// Wraps `inner` in a [`Strand`], or returns it unchanged when it already
/// serializes.
pub fn create_strand(inner: Arc<dyn Executor>) -> Arc<dyn Executor> {
    if inner.is_serializing() {
        inner
    } else {
        Strand::new(inner) as Arc<dyn Executor>
    }
}
