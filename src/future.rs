// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A continuation-based future/promise pair.
//!
//! A [`Future`] is the read end for a single eventual value or error, a
//! [`Promise`] the write end. Futures never block: [`Future::then`] registers
//! a continuation that is *posted* to the executor that was current at attach
//! time once the value arrives, which is what makes promise resolution safe
//! from any thread and keeps continuations on their home executor.
//!
//! ```text
//!    --> Resolved --
//!    |             |
//! Ready -----------+-> Continued
//!    |             |
//!    --> Rejected --
//! ```
//!
//! Each future accepts at most one continuation and at most one error
//! handler over its lifetime. When one side settles, the handler of the
//! never-taken branch is dropped immediately, so resources captured by the
//! losing branch are released deterministically.

mod blocking;
mod combinators;
mod lazy;

use crate::error::{Error, IntoError};
use crate::executor::{Executor as _, this_thread};
use crate::task::Task;
use parking_lot::Mutex;
use std::fmt;
use std::mem;
use std::sync::{Arc, Weak};

pub use blocking::{blocking_wait, blocking_wait_all, blocking_wait_post};
pub use combinators::{
    Either, WhenAll, add_timeout, split, when_all, when_all_iter, when_any, when_any_either,
    when_then,
};
pub use lazy::{LazyOneTimeInitializer, LazyValue};

/// Downstream end an unhandled error is forwarded to.
trait ErrorSink: Send + Sync {
    fn forward_error(&self, error: Error);
}

enum State<T> {
    Ready {
        continuation: Option<Box<dyn FnOnce(T) + Send>>,
        on_error: Option<Box<dyn FnOnce(Error) + Send>>,
        error_sink: Option<Weak<dyn ErrorSink>>,
    },
    Resolved(T),
    Rejected(Error),
    Continued,
}

impl<T> State<T> {
    fn name(&self) -> &'static str {
        match self {
            State::Ready { .. } => "Ready",
            State::Resolved(_) => "Resolved",
            State::Rejected(_) => "Rejected",
            State::Continued => "Continued",
        }
    }
}

struct Core<T> {
    state: State<T>,
    continuation_set: bool,
    on_error_set: bool,
    error_breaks_chain: bool,
}

struct Shared<T> {
    core: Mutex<Core<T>>,
}

impl<T: Send + 'static> Shared<T> {
    fn new(state: State<T>) -> Arc<Self> {
        Arc::new(Self {
            core: Mutex::new(Core {
                state,
                continuation_set: false,
                on_error_set: false,
                error_breaks_chain: true,
            }),
        })
    }

    fn empty() -> Arc<Self> {
        Self::new(State::Ready {
            continuation: None,
            on_error: None,
            error_sink: None,
        })
    }

    /// Delivers the value. Invokes the continuation if one is attached,
    /// otherwise parks the value in `Resolved`.
    #[track_caller]
    fn resolve(&self, value: T) {
        let mut core = self.core.lock();
        let state = mem::replace(&mut core.state, State::Continued);
        match state {
            State::Ready {
                continuation: Some(continuation),
                ..
            } => {
                // handler of the never-taken error branch dropped with `state`
                drop(core);
                continuation(value);
            }
            State::Ready {
                continuation: None, ..
            } => {
                core.state = State::Resolved(value);
            }
            other => {
                core.state = other;
                panic!("future already in final state");
            }
        }
    }

    /// Delivers the error: to the attached handler if any (forwarding
    /// downstream as well unless the handler breaks the chain), otherwise
    /// downstream, parking the error in `Rejected`.
    #[track_caller]
    fn reject(&self, error: Error) {
        let mut core = self.core.lock();
        let state = mem::replace(&mut core.state, State::Continued);
        match state {
            State::Ready {
                on_error: Some(on_error),
                error_sink,
                ..
            } => {
                let forward = if core.error_breaks_chain {
                    None
                } else {
                    error_sink
                };
                drop(core);
                on_error(error.clone());
                if let Some(sink) = forward.as_ref().and_then(Weak::upgrade) {
                    sink.forward_error(error);
                }
            }
            State::Ready {
                on_error: None,
                error_sink,
                ..
            } => {
                core.state = State::Rejected(error.clone());
                drop(core);
                if let Some(sink) = error_sink.as_ref().and_then(Weak::upgrade) {
                    sink.forward_error(error);
                }
            }
            other => {
                core.state = other;
                panic!("future already in final state");
            }
        }
    }
}

impl<T: Send + 'static> ErrorSink for Shared<T> {
    fn forward_error(&self, error: Error) {
        self.reject(error);
    }
}

/// The read end for a single eventual value or error.
///
/// See the [module docs](self) for the state machine and ordering contract.
pub struct Future<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> Future<T> {
    /// Attaches the continuation run once this future resolves and returns
    /// the future of its result.
    ///
    /// The continuation will be posted to the executor current *now*, at
    /// attach time, no matter which thread later resolves the promise. Its
    /// return value shapes the downstream future (see [`Futurize`]):
    ///
    /// - `Result<U, Error>` resolves (or rejects) the returned `Future<U>`,
    /// - a `Future<U>` is flattened into the returned `Future<U>`,
    /// - `()` makes the returned future `Future<()>`, resolved after the call.
    ///
    /// Attaching to a future whose error was already consumed by an error
    /// handler is a silent no-op: the chain is broken, the continuation is
    /// dropped unrun.
    ///
    /// # Panics
    ///
    /// Panics if a continuation was already attached, or if the calling
    /// thread has no current executor.
    #[track_caller]
    pub fn then<R, F>(self, f: F) -> Future<R::Value>
    where
        R: Futurize,
        F: FnOnce(T) -> R + Send + 'static,
    {
        let executor = this_thread::current_executor();
        let (future, promise) = make_lazy_future::<R::Value>();

        let binder_promise = promise.clone();
        let continuation: Box<dyn FnOnce(T) + Send> = Box::new(move |value: T| {
            let posted = executor.post(Task::new(move || {
                f(value).complete(binder_promise);
            }));
            if posted.is_err() {
                tracing::debug!("dropping continuation, its executor stopped");
            }
        });

        let mut core = self.shared.core.lock();
        assert!(
            !core.continuation_set,
            "only one continuation may be scheduled on a future"
        );
        core.continuation_set = true;

        let state = mem::replace(&mut core.state, State::Continued);
        match state {
            State::Ready {
                on_error,
                continuation: _,
                error_sink: _,
            } => {
                core.state = State::Ready {
                    continuation: Some(continuation),
                    on_error,
                    error_sink: Some(
                        Arc::downgrade(&future.shared) as Weak<dyn ErrorSink>
                    ),
                };
            }
            State::Resolved(value) => {
                drop(core);
                continuation(value);
            }
            State::Rejected(error) => {
                // the error outlives this attach so a later error handler can
                // still observe it
                core.state = State::Rejected(error.clone());
                drop(core);
                future.shared.reject(error);
            }
            State::Continued => {}
        }
        future
    }

    /// Attaches the handler for this future's error and breaks the chain:
    /// errors go only to the handler, downstream never settles on the error
    /// path.
    ///
    /// Returns a handle to the same future, so value continuations can be
    /// attached around it. Attaching to an already-resolved or continued
    /// future is a silent no-op.
    ///
    /// # Panics
    ///
    /// Panics if an error handler was already attached, or if the calling
    /// thread has no current executor.
    #[track_caller]
    pub fn catch_error<F>(self, f: F) -> Future<T>
    where
        F: FnOnce(Error) + Send + 'static,
    {
        self.attach_error_handler(f, true)
    }

    /// Like [`catch_error`](Future::catch_error), but keeps the chain intact:
    /// the error goes to the handler *and* onward to downstream handlers.
    ///
    /// # Panics
    ///
    /// Panics if an error handler was already attached, or if the calling
    /// thread has no current executor.
    #[track_caller]
    pub fn catch_and_forward_error<F>(self, f: F) -> Future<T>
    where
        F: FnOnce(Error) + Send + 'static,
    {
        self.attach_error_handler(f, false)
    }

    #[track_caller]
    fn attach_error_handler<F>(self, f: F, breaks_chain: bool) -> Future<T>
    where
        F: FnOnce(Error) + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        let executor = this_thread::current_executor();
        let handler: Box<dyn FnOnce(Error) + Send> = Box::new(move |error: Error| {
            let posted = executor.post(Task::new(move || f(error)));
            if posted.is_err() {
                tracing::debug!("dropping error handler, its executor stopped");
            }
        });

        let mut core = self.shared.core.lock();
        assert!(
            !core.on_error_set,
            "only one error handler may be scheduled on a future"
        );
        core.on_error_set = true;
        core.error_breaks_chain = breaks_chain;

        let state = mem::replace(&mut core.state, State::Continued);
        match state {
            State::Ready {
                continuation,
                error_sink,
                on_error: _,
            } => {
                core.state = State::Ready {
                    continuation,
                    on_error: Some(handler),
                    error_sink,
                };
            }
            State::Resolved(value) => {
                // an error handler on a resolved future can never fire
                core.state = State::Resolved(value);
            }
            State::Rejected(error) => {
                if !breaks_chain {
                    core.state = State::Rejected(error.clone());
                }
                drop(core);
                handler(error);
            }
            State::Continued => {}
        }

        Future { shared }
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self
            .shared
            .core
            .try_lock()
            .map_or("<locked>", |core| core.state.name());
        f.debug_struct("Future").field("state", &state).finish()
    }
}

/// The write end of a lazy future.
///
/// Clonable so that value and error paths of an operation can each own a
/// handle; across all clones at most one of `set_value` / `set_exception` may
/// ever be called.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> Promise<T> {
    /// Resolves the future with `value`.
    ///
    /// # Panics
    ///
    /// Panics if the future was already resolved or rejected.
    #[track_caller]
    pub fn set_value(&self, value: T) {
        self.shared.resolve(value);
    }

    /// Rejects the future with `error`.
    ///
    /// # Panics
    ///
    /// Panics if the future was already resolved or rejected.
    #[track_caller]
    pub fn set_exception(&self, error: impl IntoError) {
        self.shared.reject(error.into_error());
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self
            .shared
            .core
            .try_lock()
            .map_or("<locked>", |core| core.state.name());
        f.debug_struct("Promise").field("state", &state).finish()
    }
}

/// Creates an already-resolved future.
pub fn make_ready_future<T: Send + 'static>(value: T) -> Future<T> {
    Future {
        shared: Shared::new(State::Resolved(value)),
    }
}

/// Creates an already-rejected future. Accepts an [`Error`], one of this
/// crate's error types, or a message string (promoted to an opaque error).
pub fn make_exceptional_future<T: Send + 'static>(error: impl IntoError) -> Future<T> {
    Future {
        shared: Shared::new(State::Rejected(error.into_error())),
    }
}

/// Creates a future together with the promise that will settle it. For
/// interop with code that does not itself return futures; prefer deriving
/// futures with [`Future::then`] and the combinators where possible.
pub fn make_lazy_future<T: Send + 'static>() -> (Future<T>, Promise<T>) {
    let shared = Shared::empty();
    (
        Future {
            shared: Arc::clone(&shared),
        },
        Promise { shared },
    )
}

/// Adapts a synchronous fallible call into an already-settled future,
/// prefixing failures with `context`.
pub fn futurize<T: Send + 'static>(
    f: impl FnOnce() -> std::result::Result<T, Error>,
    context: &str,
) -> Future<T> {
    match f() {
        Ok(value) => make_ready_future(value),
        Err(error) => make_exceptional_future(format!("{context}: {error}")),
    }
}

/// Return shapes a [`then`](Future::then) continuation may have.
///
/// Implemented for `Result<U, Error>` (the workhorse: `Ok` resolves, `Err`
/// rejects, and `?` works inside continuations), for `Future<U>` (flattened
/// into the downstream future) and for `()` (side-effect continuations).
pub trait Futurize: Send + 'static {
    type Value: Send + 'static;

    /// Wires this result into `promise`.
    fn complete(self, promise: Promise<Self::Value>);
}

impl<T: Send + 'static> Futurize for std::result::Result<T, Error> {
    type Value = T;

    fn complete(self, promise: Promise<T>) {
        match self {
            Ok(value) => promise.set_value(value),
            Err(error) => promise.set_exception(error),
        }
    }
}

impl Futurize for () {
    type Value = ();

    fn complete(self, promise: Promise<()>) {
        promise.set_value(());
    }
}

impl<T: Send + 'static> Futurize for Future<T> {
    type Value = T;

    fn complete(self, promise: Promise<T>) {
        let error_promise = promise.clone();
        self.then(move |value| promise.set_value(value))
            .catch_error(move |error| error_promise.set_exception(error));
    }
}

static_assertions::assert_impl_all!(Future<u32>: Send);
static_assertions::assert_impl_all!(Promise<u32>: Send, Sync);
