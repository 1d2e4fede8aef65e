// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::executor::{Executor, RepeatableTask};
use crate::task::{Cancelable, Task};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

struct Core {
    cancelled: bool,
    task: Option<RepeatableTask>,
    armed: Option<Arc<dyn Cancelable>>,
    expiry: Instant,
}

/// Drives a repeatable callable at `post_time + n * period` until cancelled.
///
/// Built on `post_at`: each tick re-arms the next one at the exact accumulated
/// expiry, so deadlines never drift. If wakeups lag, ticks bunch up rather
/// than collapse; every tick posts exactly one user invocation.
///
/// Cancellation disarms the pending delayed task and releases the user
/// callable. When `cancel` is called from inside the callable itself, the
/// callable is released after it returns.
pub struct PeriodicTask {
    core: Mutex<Core>,
    period: Duration,
    executor: Weak<dyn Executor>,
}

impl PeriodicTask {
    /// Creates the driver and arms the first tick.
    pub(crate) fn create(
        period: Duration,
        task: RepeatableTask,
        executor: Arc<dyn Executor>,
    ) -> Arc<Self> {
        let this = Arc::new(Self {
            core: Mutex::new(Core {
                cancelled: false,
                task: Some(task),
                armed: None,
                expiry: executor.now(),
            }),
            period,
            executor: Arc::downgrade(&executor),
        });
        let mut core = this.core.lock();
        Self::arm_next(&this, &mut core);
        drop(core);
        this
    }

    /// Arms the next tick at the accumulated expiry. The scheduled task holds
    /// a strong handle, keeping the driver alive until the tick surfaces.
    fn arm_next(this: &Arc<Self>, core: &mut Core) {
        core.expiry += this.period;
        let Some(executor) = this.executor.upgrade() else {
            return;
        };
        let tick = Arc::clone(this);
        match executor.post_at(core.expiry, Task::new(move || Self::on_tick(&tick))) {
            Ok(cancelable) => core.armed = Some(cancelable),
            Err(_) => {
                tracing::debug!("dropping periodic task, executor stopped");
            }
        }
    }

    fn on_tick(this: &Arc<Self>) {
        let mut core = this.core.lock();
        if core.cancelled {
            return;
        }
        if let Some(executor) = this.executor.upgrade() {
            let invoke = Arc::clone(this);
            if executor.post(Task::new(move || invoke.invoke())).is_err() {
                tracing::debug!("dropping periodic tick, executor stopped");
            }
        }
        Self::arm_next(this, &mut core);
    }

    /// Runs the user callable once, outside the driver lock. The callable is
    /// taken out for the duration of the call; if a concurrent (or reentrant)
    /// cancel lands meanwhile, it is dropped instead of being put back.
    fn invoke(&self) {
        let mut task = {
            let mut core = self.core.lock();
            if core.cancelled {
                return;
            }
            let Some(task) = core.task.take() else {
                return;
            };
            task
        };
        task();
        let mut core = self.core.lock();
        if !core.cancelled {
            core.task = Some(task);
        }
    }
}

impl Cancelable for PeriodicTask {
    fn cancel(&self) {
        let mut core = self.core.lock();
        if core.cancelled {
            return;
        }
        core.cancelled = true;
        if let Some(armed) = core.armed.take() {
            armed.cancel();
        }
        core.task = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{Executor, ExecutorController, create_thread_pool_with_config};
    use crate::executor::ThreadPoolConfig;
    use crate::test_util::FakeClockScheduler;
    use std::sync::mpsc;
    use std::time::Duration;

    fn fake_clock_pool() -> (
        Arc<FakeClockScheduler>,
        crate::executor::ThreadPoolExecutorController,
    ) {
        let scheduler = Arc::new(FakeClockScheduler::new());
        let controller = create_thread_pool_with_config(
            ThreadPoolConfig::with_threads(1),
            Some(Arc::clone(&scheduler) as Arc<dyn crate::scheduler::Scheduler>),
        );
        (scheduler, controller)
    }

    #[test]
    fn ticks_follow_the_virtual_clock() {
        let (scheduler, controller) = fake_clock_pool();
        let executor = controller.executor();
        let (tx, rx) = mpsc::channel();

        let cancelable = executor
            .post_periodically(
                Duration::from_millis(10),
                Box::new(move || {
                    tx.send(()).unwrap();
                }),
            )
            .unwrap();

        // advancing 25ms yields exactly the 10ms and 20ms ticks
        scheduler.advance(Duration::from_millis(15));
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        scheduler.advance(Duration::from_millis(10));
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(rx.try_recv().is_err());

        drop(cancelable);
        scheduler.advance(Duration::from_millis(50));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        controller.finish();
    }

    #[test]
    fn cancel_from_inside_the_callable() {
        let (scheduler, controller) = fake_clock_pool();
        let executor = controller.executor();
        let (tx, rx) = mpsc::channel::<()>();
        let slot: Arc<Mutex<Option<crate::task::AutoCancelable>>> = Arc::new(Mutex::new(None));

        let cancelable = executor
            .post_periodically(
                Duration::from_millis(10),
                Box::new({
                    let slot = Arc::clone(&slot);
                    let tx = tx.clone();
                    move || {
                        slot.lock().take();
                        tx.send(()).unwrap();
                    }
                }),
            )
            .unwrap();
        *slot.lock() = Some(cancelable);

        scheduler.advance(Duration::from_millis(15));
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        scheduler.advance(Duration::from_millis(100));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        controller.finish();
    }
}
