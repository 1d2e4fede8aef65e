// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Executor instrumentation.
//!
//! [`MetricsWrapper`] decorates an executor with four metric families, each
//! split by task kind (immediate vs. timed): `processed_tasks_total`,
//! `currently_enqueued_tasks_total`, `task_execution_duration_ns` and
//! `task_queueing_delay_ns`. Counters are lock-free; readers take
//! [`snapshot`](ExecutorMetrics::snapshot)s.

use crate::error::Stopped;
use crate::executor::{Executor, RepeatableTask};
use crate::scheduler::Scheduler;
use crate::task::{AutoCancelable, Cancelable, Task};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

const BUCKETS: usize = 16;

/// Power-of-four nanosecond histogram: bucket `i` counts samples of up to
/// `4^(i+4)` ns, the last bucket is unbounded. The range covers 256ns up to
/// about 1152s.
struct Histogram {
    buckets: [AtomicU64; BUCKETS],
    count: AtomicU64,
    sum_ns: AtomicU64,
}

impl Histogram {
    fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            sum_ns: AtomicU64::new(0),
        }
    }

    fn bucket_bound(index: usize) -> u64 {
        4u64.saturating_pow(u32::try_from(index + 4).unwrap_or(u32::MAX))
    }

    fn record(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        let index = (0..BUCKETS - 1)
            .find(|&i| nanos <= Self::bucket_bound(i))
            .unwrap_or(BUCKETS - 1);
        self.buckets[index].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_ns.fetch_add(nanos, Ordering::Relaxed);
    }

    fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            buckets: (0..BUCKETS)
                .map(|i| {
                    (
                        Self::bucket_bound(i),
                        self.buckets[i].load(Ordering::Relaxed),
                    )
                })
                .collect(),
            count: self.count.load(Ordering::Relaxed),
            sum_ns: self.sum_ns.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of one histogram; `buckets` pairs each upper bound in
/// nanoseconds with its count.
#[derive(Clone, Debug)]
pub struct HistogramSnapshot {
    pub buckets: Vec<(u64, u64)>,
    pub count: u64,
    pub sum_ns: u64,
}

struct TaskMetrics {
    processed_total: AtomicU64,
    enqueued: AtomicU64,
    execution_ns: Histogram,
    queueing_ns: Histogram,
}

impl TaskMetrics {
    fn new() -> Self {
        Self {
            processed_total: AtomicU64::new(0),
            enqueued: AtomicU64::new(0),
            execution_ns: Histogram::new(),
            queueing_ns: Histogram::new(),
        }
    }

    fn snapshot(&self) -> TaskMetricsSnapshot {
        TaskMetricsSnapshot {
            processed_total: self.processed_total.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            execution_ns: self.execution_ns.snapshot(),
            queueing_ns: self.queueing_ns.snapshot(),
        }
    }
}

/// Point-in-time view of one task kind's counters.
#[derive(Clone, Debug)]
pub struct TaskMetricsSnapshot {
    pub processed_total: u64,
    pub enqueued: u64,
    pub execution_ns: HistogramSnapshot,
    pub queueing_ns: HistogramSnapshot,
}

/// The counters recorded by a [`MetricsWrapper`].
pub struct ExecutorMetrics {
    immediate: TaskMetrics,
    timed: TaskMetrics,
}

impl ExecutorMetrics {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            immediate: TaskMetrics::new(),
            timed: TaskMetrics::new(),
        })
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            immediate: self.immediate.snapshot(),
            timed: self.timed.snapshot(),
        }
    }

    fn family(&self, kind: TaskKind) -> &TaskMetrics {
        match kind {
            TaskKind::Immediate => &self.immediate,
            TaskKind::Timed => &self.timed,
        }
    }
}

/// Point-in-time view of all counters, split by task kind.
#[derive(Clone, Debug)]
pub struct MetricsSnapshot {
    pub immediate: TaskMetricsSnapshot,
    pub timed: TaskMetricsSnapshot,
}

#[derive(Copy, Clone)]
enum TaskKind {
    Immediate,
    Timed,
}

/// Executor decorator recording throughput, queue depth, execution duration
/// and queueing delay for everything posted through it.
pub struct MetricsWrapper {
    inner: Arc<dyn Executor>,
    metrics: Arc<ExecutorMetrics>,
    weak_self: Weak<MetricsWrapper>,
}

impl MetricsWrapper {
    fn instrumented(&self, task: Task, kind: TaskKind) -> Task {
        let metrics = Arc::clone(&self.metrics);
        metrics.family(kind).enqueued.fetch_add(1, Ordering::Relaxed);
        let enqueued_at = Instant::now();
        Task::new(move || {
            let family = metrics.family(kind);
            family.queueing_ns.record(enqueued_at.elapsed());
            let started = Instant::now();
            task.run();
            let family = metrics.family(kind);
            family.execution_ns.record(started.elapsed());
            family.enqueued.fetch_sub(1, Ordering::Relaxed);
            family.processed_total.fetch_add(1, Ordering::Relaxed);
        })
    }

    fn weak_self(&self) -> Weak<dyn Executor> {
        self.weak_self.clone()
    }
}

impl Executor for MetricsWrapper {
    fn now(&self) -> Instant {
        self.inner.now()
    }

    fn post(&self, mut task: Task) -> Result<(), Stopped> {
        task.maybe_set_executor(self.weak_self());
        self.inner.post(self.instrumented(task, TaskKind::Immediate))
    }

    fn post_at(&self, deadline: Instant, mut task: Task) -> Result<Arc<dyn Cancelable>, Stopped> {
        task.maybe_set_executor(self.weak_self());
        self.inner
            .post_at(deadline, self.instrumented(task, TaskKind::Timed))
    }

    fn post_after(&self, delay: Duration, mut task: Task) -> Result<Arc<dyn Cancelable>, Stopped> {
        task.maybe_set_executor(self.weak_self());
        self.inner
            .post_after(delay, self.instrumented(task, TaskKind::Timed))
    }

    fn post_periodically(
        &self,
        period: Duration,
        task: RepeatableTask,
    ) -> Result<AutoCancelable, Stopped> {
        // periodic user invocations are posted as immediate tasks by the
        // driver, which accounts them through `post`
        self.inner.post_periodically(period, task)
    }

    fn scheduler(&self) -> Arc<dyn Scheduler> {
        self.inner.scheduler()
    }

    fn is_serializing(&self) -> bool {
        self.inner.is_serializing()
    }
}

/// Wraps `inner` with metrics recording; the second return value reads them.
pub fn create_metrics_wrapper(
    inner: Arc<dyn Executor>,
) -> (Arc<MetricsWrapper>, Arc<ExecutorMetrics>) {
    let metrics = ExecutorMetrics::new();
    let wrapper = Arc::new_cyclic(|weak_self| MetricsWrapper {
        inner,
        metrics: Arc::clone(&metrics),
        weak_self: weak_self.clone(),
    });
    (wrapper, metrics)
}
