// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::error::Stopped;
use crate::executor::{Executor, ExecutorController, RepeatableTask};
use crate::scheduler::{DefaultScheduler, Scheduler, SchedulerThread};
use crate::task::{AutoCancelable, Cancelable, PeriodicTask, Task};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// Runs once on a freshly spawned runtime thread before its loop starts.
pub type ThreadInitFn = Box<dyn FnOnce() + Send>;

/// Configuration for [`create_thread_pool_with_config`]: one init callback
/// slot per worker thread (the pool size is the vector length) and one for the
/// scheduler thread.
#[derive(Default)]
pub struct ThreadPoolConfig {
    pub executor_init_fns: Vec<Option<ThreadInitFn>>,
    pub scheduler_init_fn: Option<ThreadInitFn>,
}

impl ThreadPoolConfig {
    pub fn with_threads(num_threads: usize) -> Self {
        let mut executor_init_fns = Vec::with_capacity(num_threads);
        executor_init_fns.resize_with(num_threads, || None);
        Self {
            executor_init_fns,
            scheduler_init_fn: None,
        }
    }
}

struct PoolState {
    queue: VecDeque<Task>,
    active_threads: usize,
    shutdown_requested: bool,
    stopped: bool,
}

/// A fixed set of worker threads sharing one FIFO task queue.
///
/// Workers block on a condition variable while idle. After
/// [`finish`](ThreadPoolExecutor::finish) the queue is drained to completion;
/// the last worker to leave marks the executor stopped, after which `post`
/// fails. A pool with a single worker is serializing.
pub struct ThreadPoolExecutor {
    state: Mutex<PoolState>,
    condvar: Condvar,
    scheduler: Arc<dyn Scheduler>,
    serializing: bool,
    weak_self: Weak<ThreadPoolExecutor>,
}

impl ThreadPoolExecutor {
    pub(crate) fn new(scheduler: Arc<dyn Scheduler>, serializing: bool) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                active_threads: 0,
                shutdown_requested: false,
                stopped: false,
            }),
            condvar: Condvar::new(),
            scheduler,
            serializing,
            weak_self: weak_self.clone(),
        })
    }

    /// Worker loop. Each pool thread parks here until shutdown.
    pub fn run(&self) {
        {
            let mut state = self.state.lock();
            if state.stopped {
                return;
            }
            state.active_threads += 1;
        }
        tracing::debug!("worker entering pool loop");
        loop {
            let task = {
                let mut state = self.state.lock();
                while state.queue.is_empty() && !state.shutdown_requested {
                    self.condvar.wait(&mut state);
                }
                if state.shutdown_requested && state.queue.is_empty() {
                    debug_assert!(!state.stopped);
                    state.active_threads -= 1;
                    if state.active_threads == 0 {
                        // the last worker to leave marks the pool stopped
                        state.stopped = true;
                    }
                    tracing::debug!("worker leaving pool loop");
                    return;
                }
                let Some(task) = state.queue.pop_front() else {
                    continue;
                };
                task
            };
            task.run();
        }
    }

    /// Signals shutdown: workers drain the queue, then exit.
    pub fn finish(&self) {
        self.state.lock().shutdown_requested = true;
        self.condvar.notify_all();
    }

    fn weak_self(&self) -> Weak<dyn Executor> {
        self.weak_self.clone()
    }
}

impl Executor for ThreadPoolExecutor {
    fn now(&self) -> Instant {
        self.scheduler.now()
    }

    fn post(&self, mut task: Task) -> Result<(), Stopped> {
        task.maybe_set_executor(self.weak_self());
        {
            let mut state = self.state.lock();
            if state.stopped {
                return Err(Stopped(()));
            }
            state.queue.push_back(task);
        }
        self.condvar.notify_one();
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
        self.serializing
    }
}

/// Owns a [`ThreadPoolExecutor`] together with its worker threads and, unless
/// an external scheduler was supplied, the scheduler thread driving timed
/// posts.
pub struct ThreadPoolExecutorController {
    executor: Arc<ThreadPoolExecutor>,
    scheduler_thread: Mutex<Option<SchedulerThread>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl ThreadPoolExecutorController {
    fn new(config: ThreadPoolConfig, external_scheduler: Option<Arc<dyn Scheduler>>) -> Self {
        let (scheduler, scheduler_thread) = match external_scheduler {
            Some(scheduler) => (scheduler, None),
            None => {
                let thread = SchedulerThread::new(
                    config.scheduler_init_fn,
                    Arc::new(DefaultScheduler::new()),
                );
                (thread.scheduler(), Some(thread))
            }
        };

        let serializing = config.executor_init_fns.len() == 1;
        let executor = ThreadPoolExecutor::new(scheduler, serializing);

        let workers = config
            .executor_init_fns
            .into_iter()
            .enumerate()
            .map(|(index, init)| {
                let executor = Arc::clone(&executor);
                thread::Builder::new()
                    .name(format!("postbox-worker-{index}"))
                    .spawn(move || {
                        if let Some(init) = init {
                            init();
                        }
                        executor.run();
                    })
                    .expect("failed to spawn pool worker thread")
            })
            .collect();

        Self {
            executor,
            scheduler_thread: Mutex::new(scheduler_thread),
            workers: Mutex::new(workers),
        }
    }
}

impl ExecutorController for ThreadPoolExecutorController {
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
        self.executor.finish();
        for worker in self.workers.lock().drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for ThreadPoolExecutorController {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Creates a pool of `num_threads` workers with its own scheduler thread.
pub fn create_thread_pool(num_threads: usize) -> ThreadPoolExecutorController {
    create_thread_pool_with_config(ThreadPoolConfig::with_threads(num_threads), None)
}

/// Creates a pool from an explicit config. When `scheduler` is given, it is
/// used for timed posts and no scheduler thread is spawned; driving it is the
/// caller's business.
pub fn create_thread_pool_with_config(
    config: ThreadPoolConfig,
    scheduler: Option<Arc<dyn Scheduler>>,
) -> ThreadPoolExecutorController {
    ThreadPoolExecutorController::new(config, scheduler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    #[test]
    fn posted_task_runs() {
        let controller = create_thread_pool(1);
        let (tx, rx) = mpsc::channel();
        controller
            .executor()
            .post(Task::new(move || {
                tx.send(7).unwrap();
            }))
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
        controller.finish();
    }

    #[test]
    fn many_tasks_complete() {
        let controller = create_thread_pool(2);
        let executor = controller.executor();
        let (tx, rx) = mpsc::channel();
        for i in 0..200 {
            let tx = tx.clone();
            executor
                .post(Task::new(move || {
                    tx.send(i).unwrap();
                }))
                .unwrap();
        }
        drop(tx);
        let mut seen = 0;
        while rx.recv_timeout(Duration::from_secs(5)).is_ok() {
            seen += 1;
        }
        assert_eq!(seen, 200);
        controller.finish();
    }

    #[test]
    fn queued_tasks_drain_on_finish() {
        let controller = create_thread_pool(1);
        let executor = controller.executor();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let count = Arc::clone(&count);
            executor
                .post(Task::new(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }
        controller.finish();
        assert_eq!(count.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn post_after_finish_fails() {
        let controller = create_thread_pool(2);
        let executor = controller.executor();
        controller.finish();
        assert_eq!(executor.post(Task::new(|| {})), Err(Stopped(())));
    }

    #[test]
    fn single_thread_pool_serializes() {
        let single = create_thread_pool(1);
        let multi = create_thread_pool(2);
        assert!(single.executor().is_serializing());
        assert!(!multi.executor().is_serializing());
        single.finish();
        multi.finish();
    }

    #[test]
    fn thread_init_runs_on_the_worker() {
        let mut config = ThreadPoolConfig::with_threads(1);
        let (tx, rx) = mpsc::channel();
        config.executor_init_fns[0] = Some(Box::new(move || {
            tx.send(thread::current().name().map(str::to_owned)).unwrap();
        }));
        let controller = create_thread_pool_with_config(config, None);
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("postbox-worker-0"));
        controller.finish();
    }
}
