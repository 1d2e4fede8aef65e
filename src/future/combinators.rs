// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Combinators over [`Future`]s: joining, racing, splitting and timeouts.
//!
//! All of these attach continuations, so they must be called on a thread with
//! a current executor, like [`Future::then`] itself.

use crate::error::Timeout;
use crate::executor::{Executor as _, this_thread};
use crate::future::{Future, Promise, make_lazy_future, make_ready_future};
use crate::task::{Cancelable as _, Task};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Joining futures of several value types at once; implemented for tuples of
/// [`Future`]s up to eight elements. Entry point: [`when_all`].
pub trait WhenAll {
    type Output: Send + 'static;

    fn when_all(self) -> Future<Self::Output>;
}

struct JoinState<S> {
    slots: S,
    settled: bool,
}

/// A tuple of `Option` slots that can be emptied in one go once every slot is
/// filled. Implemented alongside [`WhenAll`] for each tuple arity.
trait JoinSlots {
    type Values;

    fn try_take_all(&mut self) -> Option<Self::Values>;
}

macro_rules! impl_when_all {
    ($(($T:ident, $idx:tt)),+) => {
        impl<$($T: Send + 'static),+> JoinSlots for ($(Option<$T>,)+) {
            type Values = ($($T,)+);

            fn try_take_all(&mut self) -> Option<Self::Values> {
                if $(self.$idx.is_some())&&+ {
                    Some(($(self.$idx.take().unwrap(),)+))
                } else {
                    None
                }
            }
        }

        impl<$($T: Send + 'static),+> WhenAll for ($(Future<$T>,)+) {
            type Output = ($($T,)+);

            fn when_all(self) -> Future<Self::Output> {
                let (future, promise) = make_lazy_future::<Self::Output>();
                let state = Arc::new(Mutex::new(JoinState {
                    slots: ($(Option::<$T>::None,)+),
                    settled: false,
                }));
                $(
                    {
                        let value_state = Arc::clone(&state);
                        let value_promise = promise.clone();
                        let error_state = Arc::clone(&state);
                        let error_promise = promise.clone();
                        self.$idx
                            .then(move |value| {
                                let mut state = value_state.lock();
                                state.slots.$idx = Some(value);
                                if state.settled {
                                    return;
                                }
                                if let Some(values) = state.slots.try_take_all() {
                                    state.settled = true;
                                    drop(state);
                                    value_promise.set_value(values);
                                }
                            })
                            .catch_error(move |error| {
                                let mut state = error_state.lock();
                                if !state.settled {
                                    state.settled = true;
                                    drop(state);
                                    error_promise.set_exception(error);
                                }
                            });
                    }
                )+
                future
            }
        }
    };
}

impl_when_all!((T0, 0));
impl_when_all!((T0, 0), (T1, 1));
impl_when_all!((T0, 0), (T1, 1), (T2, 2));
impl_when_all!((T0, 0), (T1, 1), (T2, 2), (T3, 3));
impl_when_all!((T0, 0), (T1, 1), (T2, 2), (T3, 3), (T4, 4));
impl_when_all!((T0, 0), (T1, 1), (T2, 2), (T3, 3), (T4, 4), (T5, 5));
impl_when_all!(
    (T0, 0),
    (T1, 1),
    (T2, 2),
    (T3, 3),
    (T4, 4),
    (T5, 5),
    (T6, 6)
);
impl_when_all!(
    (T0, 0),
    (T1, 1),
    (T2, 2),
    (T3, 3),
    (T4, 4),
    (T5, 5),
    (T6, 6),
    (T7, 7)
);

/// Combines a tuple of futures into one future of the tuple of their values.
///
/// Resolves once every input has resolved; rejects with the first input error
/// (later errors are discarded).
///
/// # Panics
///
/// Panics if the calling thread has no current executor.
#[track_caller]
pub fn when_all<W: WhenAll>(futures: W) -> Future<W::Output> {
    futures.when_all()
}

/// Combines homogeneous futures into one future of the `Vec` of their values,
/// in input order. An empty input resolves immediately with an empty vector;
/// otherwise the semantics of [`when_all`] apply.
///
/// # Panics
///
/// Panics if the calling thread has no current executor (except for empty
/// input).
#[track_caller]
pub fn when_all_iter<T, I>(futures: I) -> Future<Vec<T>>
where
    T: Send + 'static,
    I: IntoIterator<Item = Future<T>>,
{
    let futures: Vec<_> = futures.into_iter().collect();
    if futures.is_empty() {
        return make_ready_future(Vec::new());
    }

    struct IterState<T> {
        values: Vec<Option<T>>,
        remaining: usize,
        settled: bool,
    }

    let (future, promise) = make_lazy_future::<Vec<T>>();
    let count = futures.len();
    let state = Arc::new(Mutex::new(IterState {
        values: std::iter::repeat_with(|| None).take(count).collect(),
        remaining: count,
        settled: false,
    }));

    for (index, input) in futures.into_iter().enumerate() {
        let value_state = Arc::clone(&state);
        let value_promise = promise.clone();
        let error_state = Arc::clone(&state);
        let error_promise = promise.clone();
        input
            .then(move |value| {
                let mut state = value_state.lock();
                state.values[index] = Some(value);
                state.remaining -= 1;
                if !state.settled && state.remaining == 0 {
                    state.settled = true;
                    let values = state
                        .values
                        .iter_mut()
                        .map(|slot| slot.take().unwrap())
                        .collect();
                    drop(state);
                    value_promise.set_value(values);
                }
            })
            .catch_error(move |error| {
                let mut state = error_state.lock();
                if !state.settled {
                    state.settled = true;
                    drop(state);
                    error_promise.set_exception(error);
                }
            });
    }
    future
}

/// Races homogeneous futures: the result settles exactly once, mirroring
/// whichever input resolves or rejects first. Later settlements are
/// discarded. An empty input never settles.
///
/// # Panics
///
/// Panics if the calling thread has no current executor.
#[track_caller]
pub fn when_any<T, I>(futures: I) -> Future<T>
where
    T: Send + 'static,
    I: IntoIterator<Item = Future<T>>,
{
    let (future, promise) = make_lazy_future::<T>();
    let settled = Arc::new(AtomicBool::new(false));
    for input in futures {
        let value_flag = Arc::clone(&settled);
        let value_promise = promise.clone();
        let error_flag = Arc::clone(&settled);
        let error_promise = promise.clone();
        input
            .then(move |value| {
                if !value_flag.swap(true, Ordering::AcqRel) {
                    value_promise.set_value(value);
                }
            })
            .catch_error(move |error| {
                if !error_flag.swap(true, Ordering::AcqRel) {
                    error_promise.set_exception(error);
                }
            });
    }
    future
}

/// The tagged sum produced by [`when_any_either`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Either<A, B> {
    Left(A),
    Right(B),
}

/// Races two futures of different value types. Settles exactly once with the
/// first input to resolve or reject; `()` inputs surface as a unit-typed
/// branch.
///
/// # Panics
///
/// Panics if the calling thread has no current executor.
#[track_caller]
pub fn when_any_either<A, B>(left: Future<A>, right: Future<B>) -> Future<Either<A, B>>
where
    A: Send + 'static,
    B: Send + 'static,
{
    let (future, promise) = make_lazy_future::<Either<A, B>>();
    let settled = Arc::new(AtomicBool::new(false));

    {
        let flag = Arc::clone(&settled);
        let value_promise = promise.clone();
        let error_flag = Arc::clone(&settled);
        let error_promise = promise.clone();
        left.then(move |value| {
            if !flag.swap(true, Ordering::AcqRel) {
                value_promise.set_value(Either::Left(value));
            }
        })
        .catch_error(move |error| {
            if !error_flag.swap(true, Ordering::AcqRel) {
                error_promise.set_exception(error);
            }
        });
    }
    {
        let flag = Arc::clone(&settled);
        let value_promise = promise.clone();
        let error_flag = settled;
        let error_promise = promise;
        right
            .then(move |value| {
                if !flag.swap(true, Ordering::AcqRel) {
                    value_promise.set_value(Either::Right(value));
                }
            })
            .catch_error(move |error| {
                if !error_flag.swap(true, Ordering::AcqRel) {
                    error_promise.set_exception(error);
                }
            });
    }
    future
}

/// Duplicates a future: both outputs deliver the eventual value (or error)
/// independently. Consumes the input; requires `T: Clone` since the value is
/// delivered twice.
///
/// # Panics
///
/// Panics if the calling thread has no current executor.
#[track_caller]
pub fn split<T>(future: Future<T>) -> (Future<T>, Future<T>)
where
    T: Clone + Send + 'static,
{
    let (first, first_promise) = make_lazy_future::<T>();
    let (second, second_promise) = make_lazy_future::<T>();
    let first_error = first_promise.clone();
    let second_error = second_promise.clone();
    future
        .then(move |value: T| {
            first_promise.set_value(value.clone());
            second_promise.set_value(value);
        })
        .catch_error(move |error| {
            first_error.set_exception(error.clone());
            second_error.set_exception(error);
        });
    (first, second)
}

/// Augments a future with a deadline: the result rejects with [`Timeout`]
/// once `duration` elapses, unless the input settles first. The input's own
/// errors are passed through unchanged, and the timer is cancelled as soon as
/// the input settles.
///
/// # Panics
///
/// Panics if the calling thread has no current executor.
#[track_caller]
pub fn add_timeout<T>(duration: Duration, future: Future<T>) -> Future<T>
where
    T: Clone + Send + 'static,
{
    let executor = this_thread::current_executor();

    let (timeout_future, timeout_promise) = make_lazy_future::<T>();
    let cancelable = match executor.post_after(
        duration,
        Task::new(move || timeout_promise.set_exception(Timeout)),
    ) {
        Ok(cancelable) => cancelable,
        Err(stopped) => return crate::future::make_exceptional_future(stopped),
    };

    // the caller must still see the input's own errors distinct from Timeout,
    // so the timer is disarmed on a split-off branch rather than on the
    // returned one
    let (returned, error_watch) = split(future);
    {
        let cancelable = Arc::clone(&cancelable);
        error_watch.catch_error(move |_| cancelable.cancel());
    }

    when_any([returned, timeout_future]).then(move |value| {
        cancelable.cancel();
        Ok(value)
    })
}

/// Plumbs the eventual result of `future` into `promise`.
///
/// # Panics
///
/// Panics if the calling thread has no current executor.
#[track_caller]
pub fn when_then<T: Send + 'static>(future: Future<T>, promise: Promise<T>) {
    let error_promise = promise.clone();
    future
        .then(move |value| promise.set_value(value))
        .catch_error(move |error| error_promise.set_exception(error));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::error_msg;
    use crate::executor::{Executor, ExecutorController, create_thread_pool};
    use crate::future::make_exceptional_future;
    use crate::test_util::with_inline;
    use std::sync::mpsc;
    use std::time::Instant;

    #[test]
    fn when_all_joins_values() {
        let result = with_inline(|| {
            let (tx, rx) = mpsc::channel();
            when_all((
                make_ready_future(1),
                make_ready_future("two"),
                make_ready_future(()),
            ))
            .then(move |values| {
                tx.send(values).unwrap();
            });
            rx
        });
        assert_eq!(result.try_recv().unwrap(), (1, "two", ()));
    }

    #[test]
    fn when_all_rejects_with_the_first_error() {
        let (value_rx, error_rx) = with_inline(|| {
            let (value_tx, value_rx) = mpsc::channel();
            let (error_tx, error_rx) = mpsc::channel();
            when_all((
                make_ready_future(3),
                make_exceptional_future::<i32>("first"),
                make_ready_future(5),
            ))
            .then(move |values| {
                value_tx.send(values).unwrap();
            })
            .catch_error(move |error| {
                error_tx.send(error.to_string()).unwrap();
            });
            (value_rx, error_rx)
        });
        assert_eq!(error_rx.try_recv().unwrap(), "first");
        assert!(value_rx.try_recv().is_err());
    }

    #[test]
    fn when_all_discards_later_errors() {
        let errors = with_inline(|| {
            let (tx, rx) = mpsc::channel();
            when_all((
                make_exceptional_future::<i32>("first"),
                make_exceptional_future::<i32>("second"),
            ))
            .catch_error(move |error| {
                tx.send(error.to_string()).unwrap();
            });
            rx
        });
        assert_eq!(errors.try_recv().unwrap(), "first");
        assert!(errors.try_recv().is_err());
    }

    #[test]
    fn when_all_iter_collects_in_input_order() {
        let result = with_inline(|| {
            let (tx, rx) = mpsc::channel();
            let (pending, promise) = make_lazy_future::<i32>();
            when_all_iter([pending, make_ready_future(2), make_ready_future(3)]).then(
                move |values| {
                    tx.send(values).unwrap();
                },
            );
            promise.set_value(1);
            rx
        });
        assert_eq!(result.try_recv().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn when_all_iter_empty_resolves_immediately() {
        let result = with_inline(|| {
            let (tx, rx) = mpsc::channel();
            when_all_iter(Vec::<Future<i32>>::new()).then(move |values| {
                tx.send(values).unwrap();
            });
            rx
        });
        assert_eq!(result.try_recv().unwrap(), Vec::<i32>::new());
    }

    #[test]
    fn when_any_settles_with_the_first_input() {
        let result = with_inline(|| {
            let (tx, rx) = mpsc::channel();
            let (pending, _promise) = make_lazy_future::<i32>();
            when_any([pending, make_ready_future(9)]).then(move |value| {
                tx.send(value).unwrap();
            });
            rx
        });
        assert_eq!(result.try_recv().unwrap(), 9);
    }

    #[test]
    fn when_any_discards_later_settlements() {
        let result = with_inline(|| {
            let (tx, rx) = mpsc::channel();
            let (pending, promise) = make_lazy_future::<i32>();
            when_any([make_ready_future(1), pending]).then(move |value| {
                tx.send(value).unwrap();
            });
            promise.set_value(2);
            rx
        });
        assert_eq!(result.try_recv().unwrap(), 1);
        assert!(result.try_recv().is_err());
    }

    #[test]
    fn when_any_propagates_the_first_error() {
        let errors = with_inline(|| {
            let (tx, rx) = mpsc::channel();
            let (pending, _promise) = make_lazy_future::<i32>();
            when_any([make_exceptional_future::<i32>("lost"), pending]).catch_error(
                move |error| {
                    tx.send(error.to_string()).unwrap();
                },
            );
            rx
        });
        assert_eq!(errors.try_recv().unwrap(), "lost");
    }

    #[test]
    fn when_any_either_tags_the_winner() {
        let result = with_inline(|| {
            let (tx, rx) = mpsc::channel();
            let (pending, _promise) = make_lazy_future::<i32>();
            when_any_either(pending, make_ready_future("fast")).then(move |value| {
                tx.send(value).unwrap();
            });
            rx
        });
        assert_eq!(result.try_recv().unwrap(), Either::Right("fast"));
    }

    #[test]
    fn split_delivers_the_value_twice() {
        let (first, second) = with_inline(|| {
            let (first_tx, first_rx) = mpsc::channel();
            let (second_tx, second_rx) = mpsc::channel();
            let (first, second) = split(make_ready_future(7));
            first.then(move |value| {
                first_tx.send(value).unwrap();
            });
            second.then(move |value| {
                second_tx.send(value).unwrap();
            });
            (first_rx, second_rx)
        });
        assert_eq!(first.try_recv().unwrap(), 7);
        assert_eq!(second.try_recv().unwrap(), 7);
    }

    #[test]
    fn split_delivers_the_error_twice() {
        let (first, second) = with_inline(|| {
            let (first_tx, first_rx) = mpsc::channel();
            let (second_tx, second_rx) = mpsc::channel();
            let (first, second) = split(make_exceptional_future::<i32>("both"));
            first.catch_error(move |error| {
                first_tx.send(error.to_string()).unwrap();
            });
            second.catch_error(move |error| {
                second_tx.send(error.to_string()).unwrap();
            });
            (first_rx, second_rx)
        });
        assert_eq!(first.try_recv().unwrap(), "both");
        assert_eq!(second.try_recv().unwrap(), "both");
    }

    #[test]
    fn when_then_plumbs_values() {
        let result = with_inline(|| {
            let (tx, rx) = mpsc::channel();
            let (target, target_promise) = make_lazy_future::<i32>();
            target.then(move |value| {
                tx.send(value).unwrap();
            });
            when_then(make_ready_future(11), target_promise);
            rx
        });
        assert_eq!(result.try_recv().unwrap(), 11);
    }

    #[test]
    fn when_then_plumbs_errors() {
        let errors = with_inline(|| {
            let (tx, rx) = mpsc::channel();
            let (target, target_promise) = make_lazy_future::<i32>();
            target.catch_error(move |error| {
                tx.send(error.to_string()).unwrap();
            });
            when_then(make_exceptional_future::<i32>("routed"), target_promise);
            rx
        });
        assert_eq!(errors.try_recv().unwrap(), "routed");
    }

    #[test]
    fn add_timeout_rejects_when_the_promise_is_never_set() {
        let controller = create_thread_pool(1);
        let executor = controller.executor();
        let (tx, rx) = mpsc::channel();
        let started = Instant::now();
        executor
            .post(Task::new(move || {
                let (pending, promise) = make_lazy_future::<i32>();
                add_timeout(Duration::from_millis(1), pending).catch_error(move |error| {
                    tx.send(error.to_string()).unwrap();
                });
                // keep the promise alive past the deadline
                std::mem::forget(promise);
            }))
            .unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Timeout.to_string()
        );
        assert!(started.elapsed() < Duration::from_secs(5));
        controller.finish();
    }

    #[test]
    fn add_timeout_passes_the_value_through() {
        let controller = create_thread_pool(1);
        let executor = controller.executor();
        let (tx, rx) = mpsc::channel();
        executor
            .post(Task::new(move || {
                add_timeout(Duration::from_secs(30), make_ready_future(5)).then(move |value| {
                    tx.send(value).unwrap();
                });
            }))
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 5);
        controller.finish();
    }

    #[test]
    fn add_timeout_passes_errors_through_distinct_from_timeout() {
        let controller = create_thread_pool(1);
        let executor = controller.executor();
        let (tx, rx) = mpsc::channel();
        executor
            .post(Task::new(move || {
                add_timeout(
                    Duration::from_secs(30),
                    make_exceptional_future::<i32>(error_msg("not a timeout")),
                )
                .catch_error(move |error| {
                    tx.send(error.to_string()).unwrap();
                });
            }))
            .unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            "not a timeout"
        );
        controller.finish();
    }
}
