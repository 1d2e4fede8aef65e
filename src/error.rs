// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt;
use std::sync::Arc;

/// A shared, type-erased error, the currency of future rejections.
///
/// Rejections travel through continuation chains and may be observed by more
/// than one handler (`split`, `when_all`), so they are reference counted.
pub type Error = Arc<dyn std::error::Error + Send + Sync>;

/// Conversion into a future rejection.
///
/// Implemented for [`Error`] itself, for plain message strings (promoted to an
/// opaque runtime error) and for the error types of this crate. Arbitrary
/// error types are adapted with [`from_error`].
pub trait IntoError {
    fn into_error(self) -> Error;
}

impl IntoError for Error {
    fn into_error(self) -> Error {
        self
    }
}

impl IntoError for String {
    fn into_error(self) -> Error {
        Arc::new(StringError(self))
    }
}

impl IntoError for &str {
    fn into_error(self) -> Error {
        Arc::new(StringError(self.to_owned()))
    }
}

impl IntoError for Stopped {
    fn into_error(self) -> Error {
        Arc::new(self)
    }
}

impl IntoError for Timeout {
    fn into_error(self) -> Error {
        Arc::new(self)
    }
}

impl IntoError for WeakExpired {
    fn into_error(self) -> Error {
        Arc::new(self)
    }
}

/// Promotes a message into an [`Error`].
pub fn error_msg(msg: impl Into<String>) -> Error {
    msg.into().into_error()
}

/// Adapts any concrete error type into an [`Error`].
pub fn from_error(error: impl std::error::Error + Send + Sync + 'static) -> Error {
    Arc::new(error)
}

#[derive(Debug)]
struct StringError(String);

impl fmt::Display for StringError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for StringError {}

/// Returned by `post` once an executor has been shut down and fully drained.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Stopped(pub(crate) ());

impl fmt::Display for Stopped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("executor stopped")
    }
}

impl std::error::Error for Stopped {}

/// The rejection emitted by [`add_timeout`] when the deadline wins the race.
///
/// [`add_timeout`]: crate::future::add_timeout
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Timeout;

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("timeout")
    }
}

impl std::error::Error for Timeout {}

/// Produced by the non-ignoring [`wrap_weak`] wrappers when the wrapped object
/// is gone by the time the callback fires.
///
/// [`wrap_weak`]: crate::wrap::wrap_weak
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct WeakExpired;

impl fmt::Display for WeakExpired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("weak wrapped object expired")
    }
}

impl std::error::Error for WeakExpired {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages() {
        assert_eq!(Stopped(()).to_string(), "executor stopped");
        assert_eq!(Timeout.to_string(), "timeout");
        assert_eq!(WeakExpired.to_string(), "weak wrapped object expired");
        assert_eq!(error_msg("boom").to_string(), "boom");
    }

    #[test]
    fn error_identity_is_preserved() {
        let error = error_msg("x");
        let same = error.clone().into_error();
        assert!(Arc::ptr_eq(&error, &same));
    }
}
