// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A lazy push-stream of values, the streaming counterpart to
//! [`Future`](crate::future::Future).
//!
//! ```text
//!       |  one value  |  collection of values
//! ------+-------------+-----------------------
//! space |      T      |        Vec<T>
//! time  |  Future<T>  |     Observable<T>
//! ```
//!
//! An [`Observable`] is created with a provider callback that is invoked, on
//! the provider's executor, once per [`subscribe`](Observable::subscribe);
//! the callback receives a [`Subscriber`] to push values through. Subscriber
//! callbacks in turn run on the executor that was current at subscribe time.
//! Transformers ([`map`](Observable::map), [`filter`](Observable::filter),
//! [`scan`](Observable::scan)) are lazy: they subscribe upstream only when
//! something subscribes downstream.

use crate::error::Error;
use crate::executor::{Executor, this_thread};
use crate::task::Task;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Consumer-side value callback of a subscription.
pub type ValueFn<T> = Box<dyn FnMut(T) + Send>;
/// Consumer-side error callback of a subscription.
pub type ErrorFn = Box<dyn FnOnce(Error) + Send>;
/// Consumer-side completion callback of a subscription.
pub type CompletionFn = Box<dyn FnOnce() + Send>;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum SubscriptionState {
    Active,
    Unsubscribed,
    Completed,
}

/// Shared between the provider pushing values and the consumer owning the
/// subscription, hence the mutex.
struct SubscriptionContext<T> {
    inner: Mutex<SubscriptionInner<T>>,
}

struct SubscriptionInner<T> {
    state: SubscriptionState,
    value_fn: Option<ValueFn<T>>,
    error_fn: Option<ErrorFn>,
    completion_fn: Option<CompletionFn>,
}

impl<T> SubscriptionContext<T> {
    fn new(
        value_fn: Option<ValueFn<T>>,
        error_fn: Option<ErrorFn>,
        completion_fn: Option<CompletionFn>,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(SubscriptionInner {
                state: SubscriptionState::Active,
                value_fn,
                error_fn,
                completion_fn,
            }),
        })
    }

    fn on_value(&self, value: T) {
        let mut inner = self.inner.lock();
        if inner.state != SubscriptionState::Active {
            return;
        }
        if let Some(value_fn) = inner.value_fn.as_mut() {
            value_fn(value);
        }
    }

    fn on_error(&self, error: Error) {
        let mut inner = self.inner.lock();
        if inner.state != SubscriptionState::Active {
            return;
        }
        inner.state = SubscriptionState::Completed;
        let callback = inner.error_fn.take();
        inner.value_fn = None;
        inner.completion_fn = None;
        drop(inner);
        if let Some(callback) = callback {
            callback(error);
        }
    }

    fn on_completed(&self) {
        let mut inner = self.inner.lock();
        if inner.state != SubscriptionState::Active {
            return;
        }
        inner.state = SubscriptionState::Completed;
        let callback = inner.completion_fn.take();
        inner.value_fn = None;
        inner.error_fn = None;
        drop(inner);
        if let Some(callback) = callback {
            callback();
        }
    }

    fn on_cancelled(&self) {
        let mut inner = self.inner.lock();
        inner.state = SubscriptionState::Unsubscribed;
        inner.value_fn = None;
        inner.error_fn = None;
        inner.completion_fn = None;
    }
}

trait Unsubscribable: Send + Sync {
    fn cancel(&self);
}

impl<T: Send + 'static> Unsubscribable for SubscriptionContext<T> {
    fn cancel(&self) {
        self.on_cancelled();
    }
}

/// The contract started by [`Observable::subscribe`]. Cancelling guarantees
/// no further callbacks are delivered.
pub struct Subscription {
    context: Arc<dyn Unsubscribable>,
}

impl Subscription {
    pub fn cancel(&self) {
        self.context.cancel();
    }
}

/// Provider-side handle for pushing values into a subscription.
///
/// Every push posts the matching consumer callback onto the subscriber's
/// executor. After [`complete`](Subscriber::complete) or
/// [`push_error`](Subscriber::push_error) the subscription is over; values
/// racing in from other clones are dropped silently, but pushing *through*
/// the clone family after it terminated the stream itself is a usage error.
pub struct Subscriber<T> {
    context: Arc<SubscriptionContext<T>>,
    executor: Arc<dyn Executor>,
    terminated: Arc<AtomicBool>,
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self {
            context: Arc::clone(&self.context),
            executor: Arc::clone(&self.executor),
            terminated: Arc::clone(&self.terminated),
        }
    }
}

impl<T: Send + 'static> Subscriber<T> {
    fn new(context: Arc<SubscriptionContext<T>>, executor: Arc<dyn Executor>) -> Self {
        Self {
            context,
            executor,
            terminated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Sends a value to the subscription's value callback.
    ///
    /// # Panics
    ///
    /// Panics if this subscriber family already completed or errored the
    /// stream.
    #[track_caller]
    pub fn push_value(&self, value: T) {
        assert!(
            !self.terminated.load(Ordering::Acquire),
            "no value must be emitted after completion or error"
        );
        let context = Arc::clone(&self.context);
        if self
            .executor
            .post(Task::new(move || context.on_value(value)))
            .is_err()
        {
            tracing::debug!("dropping pushed value, subscriber executor stopped");
        }
    }

    /// Signals an error; no callback fires after this one.
    ///
    /// # Panics
    ///
    /// Panics if this subscriber family already completed or errored the
    /// stream.
    #[track_caller]
    pub fn push_error(&self, error: Error) {
        assert!(
            !self.terminated.swap(true, Ordering::AcqRel),
            "no error must be emitted after completion or error"
        );
        let context = Arc::clone(&self.context);
        if self
            .executor
            .post(Task::new(move || context.on_error(error)))
            .is_err()
        {
            tracing::debug!("dropping pushed error, subscriber executor stopped");
        }
    }

    /// Signals graceful termination; no callback fires after this one.
    ///
    /// # Panics
    ///
    /// Panics if this subscriber family already completed or errored the
    /// stream.
    #[track_caller]
    pub fn complete(&self) {
        assert!(
            !self.terminated.swap(true, Ordering::AcqRel),
            "no completion must be emitted after completion or error"
        );
        let context = Arc::clone(&self.context);
        if self
            .executor
            .post(Task::new(move || context.on_completed()))
            .is_err()
        {
            tracing::debug!("dropping completion, subscriber executor stopped");
        }
    }
}

type OnSubscribeFn<T> = Box<dyn FnMut(Subscriber<T>) + Send>;

struct ProviderContext<T> {
    on_subscribe: Mutex<OnSubscribeFn<T>>,
}

/// A lazy push-stream of values of type `T`.
pub struct Observable<T> {
    provider: Arc<ProviderContext<T>>,
    provider_executor: Arc<dyn Executor>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            provider_executor: Arc::clone(&self.provider_executor),
        }
    }
}

/// Creates an observable from a provider callback, invoked on the *current*
/// executor once per subscription with a fresh [`Subscriber`].
///
/// # Panics
///
/// Panics if the calling thread has no current executor.
#[track_caller]
pub fn make_lazy_observable<T, F>(on_subscribe: F) -> Observable<T>
where
    T: Send + 'static,
    F: FnMut(Subscriber<T>) + Send + 'static,
{
    Observable {
        provider: Arc::new(ProviderContext {
            on_subscribe: Mutex::new(Box::new(on_subscribe)),
        }),
        provider_executor: this_thread::current_executor(),
    }
}

impl<T: Send + 'static> Observable<T> {
    /// Subscribes with a value callback only.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread has no current executor.
    #[track_caller]
    pub fn subscribe(&self, value_fn: impl FnMut(T) + Send + 'static) -> Subscription {
        self.subscribe_with(Some(Box::new(value_fn)), None, None)
    }

    /// Subscribes with any combination of value, error and completion
    /// callbacks. Callbacks run on the executor current at this call. After
    /// an error or completion callback, nothing further is delivered.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread has no current executor.
    #[track_caller]
    pub fn subscribe_with(
        &self,
        value_fn: Option<ValueFn<T>>,
        error_fn: Option<ErrorFn>,
        completion_fn: Option<CompletionFn>,
    ) -> Subscription {
        let subscriber_executor = this_thread::current_executor();
        let context = SubscriptionContext::new(value_fn, error_fn, completion_fn);

        let provider = Arc::clone(&self.provider);
        let subscriber = Subscriber::new(Arc::clone(&context), subscriber_executor);
        if self
            .provider_executor
            .post(Task::new(move || {
                (*provider.on_subscribe.lock())(subscriber);
            }))
            .is_err()
        {
            tracing::debug!("dropping subscription, provider executor stopped");
        }

        Subscription { context }
    }

    /// Transforms every value with `f`; errors and completion pass through.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread has no current executor.
    #[track_caller]
    pub fn map<U, F>(&self, f: F) -> Observable<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        let upstream = self.clone();
        let f = Arc::new(Mutex::new(f));
        make_lazy_observable(move |subscriber: Subscriber<U>| {
            let value_subscriber = subscriber.clone();
            let error_subscriber = subscriber.clone();
            let f = Arc::clone(&f);
            upstream.subscribe_with(
                Some(Box::new(move |value| {
                    let mapped = (*f.lock())(value);
                    value_subscriber.push_value(mapped);
                })),
                Some(Box::new(move |error| error_subscriber.push_error(error))),
                Some(Box::new(move || subscriber.complete())),
            );
        })
    }

    /// Keeps only the values `predicate` accepts.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread has no current executor.
    #[track_caller]
    pub fn filter<F>(&self, predicate: F) -> Observable<T>
    where
        F: FnMut(&T) -> bool + Send + 'static,
    {
        let upstream = self.clone();
        let predicate = Arc::new(Mutex::new(predicate));
        make_lazy_observable(move |subscriber: Subscriber<T>| {
            let value_subscriber = subscriber.clone();
            let error_subscriber = subscriber.clone();
            let predicate = Arc::clone(&predicate);
            upstream.subscribe_with(
                Some(Box::new(move |value| {
                    if (*predicate.lock())(&value) {
                        value_subscriber.push_value(value);
                    }
                })),
                Some(Box::new(move |error| error_subscriber.push_error(error))),
                Some(Box::new(move || subscriber.complete())),
            );
        })
    }

    /// Folds values while emitting every intermediate state, starting from
    /// `initial` folded together with the first upstream value. The running
    /// state is not emitted by itself.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread has no current executor.
    #[track_caller]
    pub fn scan<U, F>(&self, f: F, initial: U) -> Observable<U>
    where
        U: Clone + Send + 'static,
        F: FnMut(U, T) -> U + Send + 'static,
    {
        let upstream = self.clone();
        let fold = Arc::new(Mutex::new((f, initial)));
        make_lazy_observable(move |subscriber: Subscriber<U>| {
            let value_subscriber = subscriber.clone();
            let error_subscriber = subscriber.clone();
            let fold = Arc::clone(&fold);
            upstream.subscribe_with(
                Some(Box::new(move |value| {
                    let state = {
                        let mut fold = fold.lock();
                        let fold = &mut *fold;
                        let next = (fold.0)(fold.1.clone(), value);
                        fold.1 = next.clone();
                        next
                    };
                    value_subscriber.push_value(state);
                })),
                Some(Box::new(move |error| error_subscriber.push_error(error))),
                Some(Box::new(move || subscriber.complete())),
            );
        })
    }
}
