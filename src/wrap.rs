// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Callback wrappers for crossing executor and lifetime boundaries.
//!
//! Two orthogonal concerns are covered:
//!
//! - **post**: the returned callback re-posts the wrapped function to an
//!   executor instead of running it on the caller's thread. Use this when
//!   handing callbacks to code outside the runtime so that mutating access
//!   stays on the owning executor. (Not needed for [`Future::then`]
//!   continuations, which post themselves.)
//! - **weak**: the returned callback upgrades a weak handle first and only
//!   runs the wrapped function if the object is still alive, passing the
//!   strong handle as the first argument. This decouples the lifetime of
//!   objects captured in continuations from the lifetime of the
//!   promise/future holding them. The non-`ignore` variant surfaces
//!   [`WeakExpired`] as a `Result`, which a [`Future::then`] continuation
//!   turns into a rejection; `_ignore` swallows the expiry and
//!   `_with_custom_error` routes it to a caller-supplied function.
//!
//! [`Future::then`]: crate::future::Future::then

use crate::error::{Error, IntoError, WeakExpired};
use crate::executor::{Executor, this_thread};
use crate::task::Task;
use std::sync::{Arc, Weak};

/// Wraps `f` so that calling the result posts `f` with its argument to
/// `executor`. Posting to a stopped executor drops the call.
pub fn wrap_post<T, F>(executor: Arc<dyn Executor>, f: F) -> impl FnOnce(T)
where
    T: Send + 'static,
    F: FnOnce(T) + Send + 'static,
{
    move |value| {
        if executor.post(Task::new(move || f(value))).is_err() {
            tracing::debug!("dropping wrapped callback, executor stopped");
        }
    }
}

/// [`wrap_post`] onto the executor current at wrap time.
///
/// # Panics
///
/// Panics if the calling thread has no current executor.
#[track_caller]
pub fn wrap_post_current<T, F>(f: F) -> impl FnOnce(T)
where
    T: Send + 'static,
    F: FnOnce(T) + Send + 'static,
{
    wrap_post(this_thread::current_executor(), f)
}

/// Wraps `f` behind a weak handle to `object`. The result runs `f` with the
/// re-upgraded handle, or returns [`WeakExpired`] (as an [`Error`]) when the
/// object is gone; handed to [`then`](crate::future::Future::then), that
/// error becomes the downstream rejection.
pub fn wrap_weak<S, T, R, F>(object: &Arc<S>, f: F) -> impl FnOnce(T) -> Result<R, Error> + use<S, T, R, F>
where
    S: Send + Sync + 'static,
    F: FnOnce(Arc<S>, T) -> R,
{
    let weak = Arc::downgrade(object);
    move |value| match weak.upgrade() {
        Some(strong) => Ok(f(strong, value)),
        None => Err(WeakExpired.into_error()),
    }
}

/// Like [`wrap_weak`], but expiry runs `error_fn` instead; its return value
/// stands in for the wrapped function's.
pub fn wrap_weak_with_custom_error<S, T, R, F, E>(
    object: &Arc<S>,
    f: F,
    error_fn: E,
) -> impl FnOnce(T) -> R + use<S, T, R, F, E>
where
    S: Send + Sync + 'static,
    F: FnOnce(Arc<S>, T) -> R,
    E: FnOnce() -> R,
{
    let weak = Arc::downgrade(object);
    move |value| match weak.upgrade() {
        Some(strong) => f(strong, value),
        None => error_fn(),
    }
}

/// Like [`wrap_weak`], but silently does nothing when the object is gone.
/// Only for callbacks without a result; use this for plain posts and error
/// handlers, where an expiry rejection would be misread as a failure of the
/// surrounding machinery.
pub fn wrap_weak_ignore<S, T, F>(object: &Arc<S>, f: F) -> impl FnOnce(T) + use<S, T, F>
where
    S: Send + Sync + 'static,
    F: FnOnce(Arc<S>, T),
{
    wrap_weak_with_custom_error(object, f, || {})
}

/// Combination of [`wrap_post`] and [`wrap_weak_with_custom_error`]: posts to
/// `executor`, upgrades inside the task. `error_fn` also runs when the post
/// itself fails because the executor stopped.
pub fn wrap_weak_post_with_custom_error<S, T, F, E>(
    executor: Arc<dyn Executor>,
    object: &Arc<S>,
    f: F,
    error_fn: E,
) -> impl FnOnce(T)
where
    S: Send + Sync + 'static,
    T: Send + 'static,
    F: FnOnce(Arc<S>, T) + Send + 'static,
    E: FnOnce() + Clone + Send + 'static,
{
    let weak = Arc::downgrade(object);
    move |value| {
        let task_error_fn = error_fn.clone();
        let posted = executor.post(Task::new(move || match weak.upgrade() {
            Some(strong) => f(strong, value),
            None => task_error_fn(),
        }));
        if posted.is_err() {
            error_fn();
        }
    }
}

/// Combination of [`wrap_post`] and [`wrap_weak_ignore`].
pub fn wrap_weak_post_ignore<S, T, F>(
    executor: Arc<dyn Executor>,
    object: &Arc<S>,
    f: F,
) -> impl FnOnce(T)
where
    S: Send + Sync + 'static,
    T: Send + 'static,
    F: FnOnce(Arc<S>, T) + Send + 'static,
{
    wrap_weak_post_with_custom_error(executor, object, f, || {})
}

/// [`wrap_weak_post_ignore`] onto the executor current at wrap time.
///
/// # Panics
///
/// Panics if the calling thread has no current executor.
#[track_caller]
pub fn wrap_weak_post_current_ignore<S, T, F>(object: &Arc<S>, f: F) -> impl FnOnce(T)
where
    S: Send + Sync + 'static,
    T: Send + 'static,
    F: FnOnce(Arc<S>, T) + Send + 'static,
{
    wrap_weak_post_ignore(this_thread::current_executor(), object, f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ExecutorController, create_inline, create_thread_pool};
    use crate::future::make_lazy_future;
    use crate::test_util::with_inline;
    use std::sync::mpsc;
    use std::time::Duration;

    struct Owner {
        tx: mpsc::Sender<i32>,
    }

    #[test]
    fn wrap_post_moves_the_call_onto_the_executor() {
        let controller = create_thread_pool(1);
        let (tx, rx) = mpsc::channel();
        let callback = wrap_post(controller.executor(), move |value: i32| {
            tx.send(value * 2).unwrap();
        });
        callback(4);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 8);
        controller.finish();
    }

    #[test]
    fn wrap_post_current_uses_the_ambient_executor() {
        let received = with_inline(|| {
            let (tx, rx) = mpsc::channel();
            let callback = wrap_post_current(move |value: i32| {
                tx.send(value).unwrap();
            });
            callback(6);
            rx
        });
        assert_eq!(received.try_recv().unwrap(), 6);
    }

    #[test]
    fn wrap_weak_passes_the_strong_handle() {
        let (tx, rx) = mpsc::channel();
        let owner = Arc::new(Owner { tx });
        let callback = wrap_weak(&owner, |owner, value: i32| {
            owner.tx.send(value).unwrap();
        });
        callback(5).unwrap();
        assert_eq!(rx.try_recv().unwrap(), 5);
    }

    #[test]
    fn wrap_weak_surfaces_expiry_as_an_error() {
        let owner = Arc::new(Owner {
            tx: mpsc::channel().0,
        });
        let callback = wrap_weak(&owner, |_owner, _value: i32| 1);
        drop(owner);
        let result = callback(5);
        assert_eq!(result.unwrap_err().to_string(), "weak wrapped object expired");
    }

    #[test]
    fn wrap_weak_expiry_rejects_a_continuation_chain() {
        let errors = with_inline(|| {
            let (tx, rx) = mpsc::channel();
            let owner = Arc::new(Owner {
                tx: mpsc::channel().0,
            });
            let (future, promise) = make_lazy_future::<i32>();
            future
                .then(wrap_weak(&owner, |owner, value: i32| {
                    owner.tx.send(value).unwrap();
                }))
                .catch_error(move |error| {
                    tx.send(error.to_string()).unwrap();
                });
            drop(owner);
            promise.set_value(9);
            rx
        });
        assert_eq!(errors.try_recv().unwrap(), "weak wrapped object expired");
    }

    #[test]
    fn wrap_weak_ignore_swallows_expiry() {
        let owner = Arc::new(Owner {
            tx: mpsc::channel().0,
        });
        let callback = wrap_weak_ignore(&owner, |owner, value: i32| {
            owner.tx.send(value).unwrap();
        });
        drop(owner);
        callback(5);
    }

    #[test]
    fn wrap_weak_with_custom_error_substitutes_a_value() {
        let owner = Arc::new(Owner {
            tx: mpsc::channel().0,
        });
        let callback = wrap_weak_with_custom_error(&owner, |_owner, value: i32| value, || -1);
        drop(owner);
        assert_eq!(callback(5), -1);
    }

    #[test]
    fn wrap_weak_post_ignore_runs_alive_objects_on_the_executor() {
        let controller = create_thread_pool(1);
        let (tx, rx) = mpsc::channel();
        let owner = Arc::new(Owner { tx });
        let callback = wrap_weak_post_ignore(controller.executor(), &owner, |owner, value: i32| {
            owner.tx.send(value).unwrap();
        });
        callback(3);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 3);
        controller.finish();
    }

    #[test]
    fn wrap_weak_post_custom_error_fires_on_stopped_executor() {
        let controller = create_thread_pool(1);
        let executor = controller.executor();
        controller.finish();

        let (error_tx, error_rx) = mpsc::channel();
        let owner = Arc::new(Owner {
            tx: mpsc::channel().0,
        });
        let callback = wrap_weak_post_with_custom_error(
            executor,
            &owner,
            |owner, value: i32| {
                owner.tx.send(value).unwrap();
            },
            move || {
                error_tx.send(()).unwrap();
            },
        );
        callback(2);
        assert_eq!(error_rx.try_recv().unwrap(), ());
    }

    #[test]
    fn wrap_weak_post_current_ignore_posts_home() {
        let received = with_inline(|| {
            let (tx, rx) = mpsc::channel();
            let owner = Arc::new(Owner { tx });
            let callback = wrap_weak_post_current_ignore(&owner, |owner, value: i32| {
                owner.tx.send(value).unwrap();
            });
            callback(1);
            rx
        });
        assert_eq!(received.try_recv().unwrap(), 1);
    }

    #[test]
    fn inline_executor_keeps_wrap_post_synchronous() {
        let executor = create_inline();
        let (tx, rx) = mpsc::channel();
        let callback = wrap_post(executor as Arc<dyn Executor>, move |value: i32| {
            tx.send(value).unwrap();
        });
        callback(10);
        assert_eq!(rx.try_recv().unwrap(), 10);
    }
}
