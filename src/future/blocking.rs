// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Bridges from synchronous code into the runtime.
//!
//! These park the calling thread until a future settles. They exist for the
//! boundary between a plain thread (think `main`) and asynchronous code and
//! must never be called from inside the runtime: a worker parked on its own
//! executor's output deadlocks.

use crate::error::{Error, IntoError, error_msg};
use crate::executor::{Executor, create_inline};
use crate::future::{Future, WhenAll, when_all};
use crate::task::Task;
use std::sync::Arc;
use std::sync::mpsc;

fn park_on<T: Send + 'static>(receiver: &mpsc::Receiver<Result<T, Error>>) -> Result<T, Error> {
    match receiver.recv() {
        Ok(result) => result,
        Err(_) => Err(error_msg("future was dropped without being settled")),
    }
}

/// Parks the caller until `future` settles, returning its value or error.
///
/// Continuations are driven through a private inline executor, so the
/// resolving thread delivers the result directly.
pub fn blocking_wait<T: Send + 'static>(future: Future<T>) -> Result<T, Error> {
    let executor = create_inline();
    let (tx, rx) = mpsc::channel();
    let error_tx = tx.clone();
    let posted = executor.post(Task::new(move || {
        future
            .then(move |value| {
                let _ = tx.send(Ok(value));
            })
            .catch_error(move |error| {
                let _ = error_tx.send(Err(error));
            });
    }));
    debug_assert!(posted.is_ok(), "inline executors do not stop");
    park_on(&rx)
}

/// Posts `f` to `executor`, then parks the caller until the future it returns
/// settles.
///
/// # Errors
///
/// Returns the future's rejection; posting to a stopped executor surfaces as
/// an error as well.
pub fn blocking_wait_post<T, F>(executor: &Arc<dyn Executor>, f: F) -> Result<T, Error>
where
    T: Send + 'static,
    F: FnOnce() -> Future<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let error_tx = tx.clone();
    executor
        .post(Task::new(move || {
            f().then(move |value| {
                let _ = tx.send(Ok(value));
            })
            .catch_error(move |error| {
                let _ = error_tx.send(Err(error));
            });
        }))
        .map_err(IntoError::into_error)?;
    park_on(&rx)
}

/// Parks the caller until every future in the tuple settles, returning the
/// joined values or the first error.
pub fn blocking_wait_all<W>(futures: W) -> Result<W::Output, Error>
where
    W: WhenAll + Send + 'static,
{
    let executor = create_inline();
    let (tx, rx) = mpsc::channel();
    let error_tx = tx.clone();
    let posted = executor.post(Task::new(move || {
        when_all(futures)
            .then(move |values| {
                let _ = tx.send(Ok(values));
            })
            .catch_error(move |error| {
                let _ = error_tx.send(Err(error));
            });
    }));
    debug_assert!(posted.is_ok(), "inline executors do not stop");
    park_on(&rx)
}
