// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The deadline-ordered dispatcher feeding executors at future points in time.
//!
//! Scheduled entries sit in a min-heap keyed by `(deadline, insertion order)`.
//! Draining happens in two phases so locking stays minimal: `prepare_elapse`
//! moves everything due into a FIFO under the lock, the elapse phase forwards
//! the FIFO to the target executors without it.

use crate::executor::Executor;
use crate::task::{Cancelable, CancelableTask, Task};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{self, AtomicBool};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// Sampler for the scheduler's notion of "now". Swappable for tests.
pub type ClockNowFn = Box<dyn Fn() -> Instant + Send + Sync>;

/// Time-ordered task dispatch.
///
/// Implementations forward each task to its target executor once the deadline
/// has elapsed, skipping targets that are gone or stopped by then.
pub trait Scheduler: Send + Sync {
    /// The scheduler's steady clock.
    fn now(&self) -> Instant;

    /// Schedules `task` to be posted to `executor` at `deadline`.
    ///
    /// The returned handle suppresses the task if cancelled before the target
    /// executor starts running it. Deadlines in the past fire on the next
    /// turn; entries with identical deadlines fire in insertion order.
    fn execute_at(
        &self,
        executor: Weak<dyn Executor>,
        deadline: Instant,
        task: Task,
    ) -> Arc<dyn Cancelable>;

    /// Schedules `task` to be posted to `executor` after `delay`.
    fn execute_after(
        &self,
        executor: Weak<dyn Executor>,
        delay: Duration,
        task: Task,
    ) -> Arc<dyn Cancelable>;
}

/// A [`Scheduler`] with an owned driver loop, run on a dedicated thread by
/// [`SchedulerThread`] or by custom host code.
pub trait RunnableScheduler: Scheduler {
    /// Drives the scheduler until [`stop`](RunnableScheduler::stop) is called.
    fn run(&self);

    /// Signals the driver loop to exit after the current turn.
    fn stop(&self);
}

/// An entry waiting for its deadline: the deadline, a guarded task and the
/// weak handle of the executor it will be forwarded to.
pub(crate) struct ScheduledEntry {
    deadline: Instant,
    seq: u64,
    executor: Weak<dyn Executor>,
    task: CancelableTask,
}

impl ScheduledEntry {
    /// Forwards the task to its executor. Dead or stopped targets drop the
    /// task silently.
    pub(crate) fn dispatch(self) {
        let Some(executor) = self.executor.upgrade() else {
            tracing::debug!("dropping scheduled task, target executor is gone");
            return;
        };
        if executor.post(self.task.into_task()).is_err() {
            tracing::debug!("dropping scheduled task, target executor stopped");
        }
    }
}

impl PartialEq for ScheduledEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for ScheduledEntry {}

impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEntry {
    // `BinaryHeap` is a max-heap, so earlier deadlines (and among equals,
    // earlier insertions) compare greater.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// The heap-and-FIFO core shared by the stock drivers and the fake-clock test
/// scheduler. Not synchronized; callers wrap it in their own mutex.
pub struct BaseScheduler {
    timer_queue: BinaryHeap<ScheduledEntry>,
    elapsed: VecDeque<ScheduledEntry>,
    next_seq: u64,
    now_fn: ClockNowFn,
}

impl BaseScheduler {
    pub fn new(now_fn: ClockNowFn) -> Self {
        Self {
            timer_queue: BinaryHeap::new(),
            elapsed: VecDeque::new(),
            next_seq: 0,
            now_fn,
        }
    }

    pub fn now(&self) -> Instant {
        (self.now_fn)()
    }

    pub fn execute_at(
        &mut self,
        executor: Weak<dyn Executor>,
        deadline: Instant,
        task: Task,
    ) -> Arc<dyn Cancelable> {
        let (task, cancelable) = CancelableTask::wrap(task);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.timer_queue.push(ScheduledEntry {
            deadline,
            seq,
            executor,
            task,
        });
        cancelable
    }

    pub fn execute_after(
        &mut self,
        executor: Weak<dyn Executor>,
        delay: Duration,
        task: Task,
    ) -> Arc<dyn Cancelable> {
        let deadline = self.now() + delay;
        self.execute_at(executor, deadline, task)
    }

    /// Moves every entry with `deadline <= now` into the elapsed FIFO.
    pub fn prepare_elapse(&mut self) {
        let now = self.now();
        while let Some(entry) = self.timer_queue.peek() {
            if entry.deadline > now {
                break;
            }
            let entry = self.timer_queue.pop().expect("peeked entry");
            self.elapsed.push_back(entry);
        }
    }

    /// Forwards everything in the elapsed FIFO to its target executor,
    /// returning how many entries were forwarded.
    pub fn elapse(&mut self) -> usize {
        let batch = self.take_elapsed();
        let count = batch.len();
        for entry in batch {
            entry.dispatch();
        }
        count
    }

    /// Takes the elapsed FIFO so it can be dispatched without holding the
    /// caller's lock.
    pub(crate) fn take_elapsed(&mut self) -> VecDeque<ScheduledEntry> {
        std::mem::take(&mut self.elapsed)
    }

    /// The deadline of the nearest scheduled entry, if it is not later than
    /// `limit`; otherwise `limit`. Never earlier than now.
    pub fn next_expiry(&self, limit: Instant) -> Instant {
        let now = self.now();
        match self.timer_queue.peek() {
            Some(entry) if entry.deadline <= limit => entry.deadline.max(now),
            _ => limit.max(now),
        }
    }

    /// The deadline of the farthest scheduled entry, but at least now.
    pub fn last_expiry(&self) -> Instant {
        let now = self.now();
        self.timer_queue
            .iter()
            .map(|entry| entry.deadline)
            .max()
            .map_or(now, |deadline| deadline.max(now))
    }

    pub fn queue_len(&self) -> usize {
        self.timer_queue.len()
    }

    pub fn clear(&mut self) {
        self.timer_queue.clear();
        self.elapsed.clear();
    }
}

/// The stock driver: a granularity-polled loop over a [`BaseScheduler`].
///
/// Wakeups land within one timer granularity of the deadline; all due tasks
/// are drained before the loop yields again.
pub struct DefaultScheduler {
    base: Mutex<BaseScheduler>,
    granularity: Duration,
    shutdown: AtomicBool,
}

impl DefaultScheduler {
    const DEFAULT_GRANULARITY: Duration = Duration::from_millis(5);

    pub fn new() -> Self {
        Self::with_granularity(Self::DEFAULT_GRANULARITY)
    }

    pub fn with_granularity(granularity: Duration) -> Self {
        Self {
            base: Mutex::new(BaseScheduler::new(Box::new(Instant::now))),
            granularity,
            shutdown: AtomicBool::new(false),
        }
    }
}

impl Default for DefaultScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for DefaultScheduler {
    fn now(&self) -> Instant {
        Instant::now()
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

impl RunnableScheduler for DefaultScheduler {
    fn run(&self) {
        loop {
            if self.shutdown.load(atomic::Ordering::Acquire) {
                return;
            }
            let batch = {
                let mut base = self.base.lock();
                base.prepare_elapse();
                base.take_elapsed()
            };
            if !batch.is_empty() {
                tracing::trace!(due = batch.len(), "forwarding elapsed tasks");
            }
            for entry in batch {
                entry.dispatch();
            }
            thread::sleep(self.granularity);
        }
    }

    fn stop(&self) {
        self.shutdown.store(true, atomic::Ordering::Release);
    }
}

/// Owns the thread a [`RunnableScheduler`] is driven on.
pub struct SchedulerThread {
    scheduler: Arc<dyn RunnableScheduler>,
    thread: Option<thread::JoinHandle<()>>,
}

impl SchedulerThread {
    /// Spawns the driver thread. `init` runs on the new thread before the
    /// scheduler loop starts.
    ///
    /// # Panics
    ///
    /// Panics if the OS refuses to spawn a thread.
    pub fn new(init: Option<Box<dyn FnOnce() + Send>>, scheduler: Arc<dyn RunnableScheduler>) -> Self {
        let thread = thread::Builder::new()
            .name("postbox-scheduler".to_owned())
            .spawn({
                let scheduler = Arc::clone(&scheduler);
                move || {
                    if let Some(init) = init {
                        init();
                    }
                    scheduler.run();
                }
            })
            .expect("failed to spawn scheduler thread");

        Self {
            scheduler,
            thread: Some(thread),
        }
    }

    pub fn scheduler(&self) -> Arc<dyn Scheduler> {
        Arc::clone(&self.scheduler) as Arc<dyn Scheduler>
    }

    /// Stops the driver loop and joins the thread. Idempotent.
    pub fn finish(&mut self) {
        self.scheduler.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SchedulerThread {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Silently drops scheduled work. Used by executors that reject timed posts.
pub(crate) struct NullScheduler;

impl Scheduler for NullScheduler {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn execute_at(
        &self,
        _executor: Weak<dyn Executor>,
        _deadline: Instant,
        _task: Task,
    ) -> Arc<dyn Cancelable> {
        panic!("this executor does not support timed posts")
    }

    fn execute_after(
        &self,
        _executor: Weak<dyn Executor>,
        _delay: Duration,
        _task: Task,
    ) -> Arc<dyn Cancelable> {
        panic!("this executor does not support timed posts")
    }
}
