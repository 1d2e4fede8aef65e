// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::error::error_msg;
use crate::future::{Future, Promise, make_lazy_future, split};

/// Lazily runs a future-returning function at most once, fanning the eventual
/// value out to every caller of [`get`](LazyOneTimeInitializer::get).
///
/// Not thread-safe by design; intended to live inside a single strand or
/// serializing executor, which is also what provides the current executor the
/// internal [`split`] needs.
pub struct LazyOneTimeInitializer<T: Clone + Send + 'static> {
    init: Option<Box<dyn FnOnce() -> Future<T> + Send>>,
    future: Option<Future<T>>,
}

impl<T: Clone + Send + 'static> LazyOneTimeInitializer<T> {
    pub fn new(init: impl FnOnce() -> Future<T> + Send + 'static) -> Self {
        Self {
            init: Some(Box::new(init)),
            future: None,
        }
    }

    /// A future for the initializer's eventual value. The function runs (and
    /// is released) on the first call; every call returns an independent copy
    /// of the value.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread has no current executor.
    #[track_caller]
    pub fn get(&mut self) -> Future<T> {
        if self.future.is_none() {
            let init = self.init.take().expect("initializer already consumed");
            self.future = Some(init());
        }
        let stored = self.future.take().expect("checked above");
        let (keep, out) = split(stored);
        self.future = Some(keep);
        out
    }

    /// Whether the initializing function has already run.
    pub fn has_future(&self) -> bool {
        debug_assert!(self.init.is_some() != self.future.is_some());
        self.future.is_some()
    }
}

/// A write-once cell with multi-reader fan-out.
///
/// Every [`future`](LazyValue::future) call returns an independent copy of
/// the eventual value. Dropping the cell without ever setting a value rejects
/// all outstanding futures.
pub struct LazyValue<T: Clone + Send + 'static> {
    promise: Promise<T>,
    future: Option<Future<T>>,
    has_value: bool,
}

impl<T: Clone + Send + 'static> LazyValue<T> {
    pub fn new() -> Self {
        let (future, promise) = make_lazy_future();
        Self {
            promise,
            future: Some(future),
            has_value: false,
        }
    }

    /// A future for the cell's eventual value.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread has no current executor.
    #[track_caller]
    pub fn future(&mut self) -> Future<T> {
        let stored = self.future.take().expect("always refilled");
        let (keep, out) = split(stored);
        self.future = Some(keep);
        out
    }

    /// Sets the value, resolving every future handed out so far and every one
    /// requested later.
    ///
    /// # Panics
    ///
    /// Panics when called twice.
    #[track_caller]
    pub fn set_value(&mut self, value: T) {
        self.has_value = true;
        self.promise.set_value(value);
    }

    pub fn has_value(&self) -> bool {
        self.has_value
    }
}

impl<T: Clone + Send + 'static> Default for LazyValue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Drop for LazyValue<T> {
    fn drop(&mut self) {
        if !self.has_value {
            self.promise
                .set_exception(error_msg("could not be resolved, no value was set"));
        }
    }
}
