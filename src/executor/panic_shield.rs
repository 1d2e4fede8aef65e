// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::error::Stopped;
use crate::executor::{Executor, RepeatableTask};
use crate::scheduler::Scheduler;
use crate::task::{AutoCancelable, Cancelable, Task};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Receives the payload of a panic caught by a [`PanicShield`].
pub type PanicHandler = Arc<dyn Fn(Box<dyn Any + Send>) + Send + Sync>;

/// Executor wrapper that keeps task panics from unwinding into the worker
/// loop of the wrapped executor; the panic payload is handed to the handler
/// instead.
///
/// By default panics unwind through the worker thread that ran the task. Hosts
/// that must not lose worker threads to user code wrap their executors in a
/// shield.
pub struct PanicShield {
    inner: Arc<dyn Executor>,
    handler: PanicHandler,
    weak_self: Weak<PanicShield>,
}

impl PanicShield {
    fn shielded(&self, task: Task) -> Task {
        let handler = Arc::clone(&self.handler);
        Task::new(move || {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| task.run())) {
                handler(payload);
            }
        })
    }

    fn weak_self(&self) -> Weak<dyn Executor> {
        self.weak_self.clone()
    }
}

impl Executor for PanicShield {
    fn now(&self) -> Instant {
        self.inner.now()
    }

    fn post(&self, mut task: Task) -> Result<(), Stopped> {
        task.maybe_set_executor(self.weak_self());
        self.inner.post(self.shielded(task))
    }

    fn post_at(&self, deadline: Instant, mut task: Task) -> Result<Arc<dyn Cancelable>, Stopped> {
        task.maybe_set_executor(self.weak_self());
        self.inner.post_at(deadline, self.shielded(task))
    }

    fn post_after(&self, delay: Duration, mut task: Task) -> Result<Arc<dyn Cancelable>, Stopped> {
        task.maybe_set_executor(self.weak_self());
        self.inner.post_after(delay, self.shielded(task))
    }

    fn post_periodically(
        &self,
        period: Duration,
        mut task: RepeatableTask,
    ) -> Result<AutoCancelable, Stopped> {
        let handler = Arc::clone(&self.handler);
        self.inner.post_periodically(
            period,
            Box::new(move || {
                if let Err(payload) = catch_unwind(AssertUnwindSafe(&mut task)) {
                    handler(payload);
                }
            }),
        )
    }

    fn scheduler(&self) -> Arc<dyn Scheduler> {
        self.inner.scheduler()
    }

    fn is_serializing(&self) -> bool {
        self.inner.is_serializing()
    }
}

/// Wraps `inner` so that panics in posted tasks are routed to `handler`.
pub fn create_panic_shield(inner: Arc<dyn Executor>, handler: PanicHandler) -> Arc<PanicShield> {
    Arc::new_cyclic(|weak_self| PanicShield {
        inner,
        handler,
        weak_self: weak_self.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ExecutorController, create_thread_pool, this_thread};
    use std::sync::mpsc;

    #[test]
    fn panics_reach_the_handler_and_the_worker_survives() {
        let controller = create_thread_pool(1);
        let (tx, rx) = mpsc::channel();
        let handler_tx = tx.clone();
        let shield = create_panic_shield(
            controller.executor(),
            Arc::new(move |payload: Box<dyn Any + Send>| {
                let message = payload
                    .downcast_ref::<&str>()
                    .copied()
                    .unwrap_or("<non-string panic>");
                handler_tx.send(format!("caught: {message}")).unwrap();
            }),
        );

        shield
            .post(Task::new(|| {
                panic!("task blew up");
            }))
            .unwrap();
        shield
            .post(Task::new(move || {
                tx.send("survived".to_owned()).unwrap();
            }))
            .unwrap();

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            "caught: task blew up"
        );
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            "survived"
        );
        controller.finish();
    }

    #[test]
    fn tasks_see_the_shield_as_current_executor() {
        let controller = create_thread_pool(1);
        let shield = create_panic_shield(controller.executor(), Arc::new(|_| {}));
        let (tx, rx) = mpsc::channel();
        let expected = Arc::clone(&shield);
        shield
            .post(Task::new(move || {
                let current = this_thread::current_executor();
                tx.send(Arc::ptr_eq(&current, &(expected as Arc<dyn Executor>)))
                    .unwrap();
            }))
            .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        controller.finish();
    }
}
