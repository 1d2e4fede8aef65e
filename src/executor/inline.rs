// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::error::Stopped;
use crate::executor::{Executor, RepeatableTask};
use crate::scheduler::{NullScheduler, Scheduler};
use crate::task::{AutoCancelable, Cancelable, Task};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Runs posted tasks synchronously on the caller's thread.
///
/// The boundary executor behind [`blocking_wait`]: it installs itself as the
/// current executor for the duration of each post, so continuations attached
/// inside run inline as well. Timed posts are not supported.
///
/// [`blocking_wait`]: crate::future::blocking_wait
pub struct InlineExecutor {
    scheduler: Arc<NullScheduler>,
    weak_self: Weak<InlineExecutor>,
}

impl Executor for InlineExecutor {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn post(&self, mut task: Task) -> Result<(), Stopped> {
        task.maybe_set_executor(self.weak_self.clone());
        task.run();
        Ok(())
    }

    /// # Panics
    ///
    /// The inline executor rejects timed posts.
    fn post_at(&self, _deadline: Instant, _task: Task) -> Result<Arc<dyn Cancelable>, Stopped> {
        panic!("inline executor cannot schedule timed tasks")
    }

    /// # Panics
    ///
    /// The inline executor rejects timed posts.
    fn post_after(&self, _delay: Duration, _task: Task) -> Result<Arc<dyn Cancelable>, Stopped> {
        panic!("inline executor cannot schedule timed tasks")
    }

    /// # Panics
    ///
    /// The inline executor rejects timed posts.
    fn post_periodically(
        &self,
        _period: Duration,
        _task: RepeatableTask,
    ) -> Result<AutoCancelable, Stopped> {
        panic!("inline executor cannot schedule timed tasks")
    }

    fn scheduler(&self) -> Arc<dyn Scheduler> {
        Arc::clone(&self.scheduler) as Arc<dyn Scheduler>
    }

    fn is_serializing(&self) -> bool {
        true
    }
}

/// Creates an [`InlineExecutor`].
pub fn create_inline() -> Arc<InlineExecutor> {
    Arc::new_cyclic(|weak_self| InlineExecutor {
        scheduler: Arc::new(NullScheduler),
        weak_self: weak_self.clone(),
    })
}
