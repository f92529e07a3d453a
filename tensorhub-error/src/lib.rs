#![deny(missing_docs)]
#![feature(error_generic_member_access)]

//! Error handling for TensorHub.
//!
//! Every fallible operation in the workspace returns [`HubResult`]. Errors are built with the
//! [`hub_err!`] and [`hub_bail!`] macros, which capture a backtrace at the point of creation.

mod ext;

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::fmt::{Debug, Display, Formatter};
use std::ops::Deref;
use std::{env, fmt, io};

pub use ext::*;

/// A string that can be used as an error message.
#[derive(Debug)]
pub struct ErrString(Cow<'static, str>);

#[allow(clippy::fallible_impl_from)]
impl<T> From<T> for ErrString
where
    T: Into<Cow<'static, str>>,
{
    #[allow(clippy::panic)]
    fn from(msg: T) -> Self {
        if env::var("TENSORHUB_PANIC_ON_ERR").as_deref().unwrap_or("") == "1" {
            panic!("{}\nBacktrace:\n{}", msg.into(), Backtrace::capture());
        } else {
            Self(msg.into())
        }
    }
}

impl AsRef<str> for ErrString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for ErrString {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for ErrString {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// The top-level error type for TensorHub.
#[derive(thiserror::Error)]
#[non_exhaustive]
pub enum HubError {
    /// An index or range addressed samples or elements outside the valid extent.
    #[error("index {0} out of bounds from {1} to {2}\nBacktrace:\n{3}")]
    OutOfBounds(usize, usize, usize, Backtrace),
    /// A stored schema does not match the one supplied by the caller.
    #[error("schema mismatch: {0}\nBacktrace:\n{1}")]
    SchemaMismatch(ErrString, Backtrace),
    /// A value or declared shape does not fit the tensor's shape bounds.
    #[error("shape mismatch: {0}\nBacktrace:\n{1}")]
    ShapeMismatch(ErrString, Backtrace),
    /// A compressor name has no registered codec.
    #[error("unsupported compressor: {0}\nBacktrace:\n{1}")]
    UnsupportedCompressor(ErrString, Backtrace),
    /// A chunk or metadata blob could not be decoded.
    #[error("corrupt chunk: {0}\nBacktrace:\n{1}")]
    CorruptChunk(ErrString, Backtrace),
    /// An advisory lock could not be acquired in time.
    #[error("concurrent write conflict: {0}\nBacktrace:\n{1}")]
    ConcurrentWriteConflict(ErrString, Backtrace),
    /// A key or path does not exist.
    #[error("not found: {0}\nBacktrace:\n{1}")]
    NotFound(ErrString, Backtrace),
    /// A storage root holds data that does not belong to a dataset.
    #[error("not a dataset: {0}\nBacktrace:\n{1}")]
    NotADataset(ErrString, Backtrace),
    /// An argument to a function is invalid.
    #[error("{0}\nBacktrace:\n{1}")]
    InvalidArgument(ErrString, Backtrace),
    /// An assertion about an internal invariant failed.
    #[error("{0}\nBacktrace:\n{1}")]
    AssertionFailed(ErrString, Backtrace),
    /// An error wrapped with additional context.
    #[error("{0}: {1}")]
    Context(ErrString, Box<HubError>),
    /// A wrapped I/O error.
    #[error("{0}\nBacktrace:\n{1}")]
    Io(#[from] io::Error, Backtrace),
    /// A wrapped JSON (de)serialization error.
    #[error("{0}\nBacktrace:\n{1}")]
    Json(#[from] serde_json::Error, Backtrace),
    /// A wrapped URL parse error.
    #[error("{0}\nBacktrace:\n{1}")]
    Url(#[from] url::ParseError, Backtrace),
    /// A wrapped integer conversion error.
    #[error("{0}\nBacktrace:\n{1}")]
    TryFromInt(#[from] std::num::TryFromIntError, Backtrace),
    /// A wrapped object store error.
    #[cfg(feature = "object_store")]
    #[error("{0}\nBacktrace:\n{1}")]
    ObjectStore(#[from] object_store::Error, Backtrace),
}

impl HubError {
    /// Adds additional context to an error.
    pub fn with_context<T: Into<ErrString>>(self, msg: T) -> Self {
        HubError::Context(msg.into(), Box::new(self))
    }

    /// Returns the innermost error, skipping any context wrappers.
    pub fn root(&self) -> &HubError {
        match self {
            HubError::Context(_, inner) => inner.root(),
            other => other,
        }
    }

    /// Whether the root cause is [`HubError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        match self.root() {
            HubError::NotFound(..) => true,
            HubError::Io(err, _) => err.kind() == io::ErrorKind::NotFound,
            #[cfg(feature = "object_store")]
            HubError::ObjectStore(object_store::Error::NotFound { .. }, _) => true,
            _ => false,
        }
    }
}

impl Debug for HubError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// A type alias for Results that return [`HubError`] as their error type.
pub type HubResult<T> = Result<T, HubError>;

/// A trait for unwrapping a value while panicking with a [`HubError`] if it is absent.
pub trait HubExpect {
    /// The type of the value being expected.
    type Output;

    /// Returns the value or panics with the given message.
    fn hub_expect(self, msg: &str) -> Self::Output;
}

impl<T, E> HubExpect for Result<T, E>
where
    E: Into<HubError>,
{
    type Output = T;

    #[inline(always)]
    fn hub_expect(self, msg: &str) -> Self::Output {
        self.map_err(|err| err.into())
            .unwrap_or_else(|e| hub_panic!(e.with_context(msg.to_string())))
    }
}

impl<T> HubExpect for Option<T> {
    type Output = T;

    #[inline(always)]
    fn hub_expect(self, msg: &str) -> Self::Output {
        self.unwrap_or_else(|| {
            let err = HubError::AssertionFailed(msg.to_string().into(), Backtrace::capture());
            hub_panic!(err)
        })
    }
}

/// Builds a [`HubError`] of the given kind.
///
/// ```
/// use tensorhub_error::{hub_err, HubError};
///
/// let err = hub_err!(ShapeMismatch: "axis {} exceeds {}", 1, 32);
/// assert!(matches!(err, HubError::ShapeMismatch(..)));
/// let err = hub_err!("bare messages are invalid arguments");
/// assert!(matches!(err, HubError::InvalidArgument(..)));
/// ```
#[macro_export]
macro_rules! hub_err {
    (OutOfBounds: $idx:expr, $start:expr, $stop:expr) => {{
        use std::backtrace::Backtrace;
        $crate::__private::must_use(
            $crate::HubError::OutOfBounds($idx, $start, $stop, Backtrace::capture())
        )
    }};
    ($variant:ident: $fmt:literal $(, $arg:expr)* $(,)?) => {{
        use std::backtrace::Backtrace;
        $crate::__private::must_use(
            $crate::HubError::$variant(format!($fmt, $($arg),*).into(), Backtrace::capture())
        )
    }};
    ($variant:ident: $err:expr $(,)?) => {
        $crate::__private::must_use(
            $crate::HubError::$variant($err)
        )
    };
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::hub_err!(InvalidArgument: $fmt, $($arg),*)
    };
}

/// Returns early with a [`HubError`] built by [`hub_err!`].
#[macro_export]
macro_rules! hub_bail {
    ($($tt:tt)+) => {
        return Err($crate::hub_err!($($tt)+))
    };
}

/// Panics with a [`HubError`]. Reserved for violated internal invariants.
#[macro_export]
macro_rules! hub_panic {
    (OutOfBounds: $idx:expr, $start:expr, $stop:expr) => {{
        $crate::hub_panic!($crate::hub_err!(OutOfBounds: $idx, $start, $stop))
    }};
    ($variant:ident: $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::hub_panic!($crate::hub_err!($variant: $fmt, $($arg),*))
    };
    ($err:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {{
        let err: $crate::HubError = $err;
        panic!("{}", err.with_context(format!($fmt, $($arg),*)))
    }};
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::hub_panic!($crate::hub_err!($fmt, $($arg),*))
    };
    ($err:expr) => {{
        let err: $crate::HubError = $err;
        panic!("{}", err)
    }};
}

#[doc(hidden)]
pub mod __private {
    #[doc(hidden)]
    #[inline]
    #[must_use]
    pub const fn must_use(error: crate::HubError) -> crate::HubError {
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fails() -> HubResult<()> {
        hub_bail!(SchemaMismatch: "expected {:?}", ["/a", "/b"])
    }

    #[test]
    fn bail_builds_variant() {
        let err = fails().unwrap_err();
        assert!(matches!(err, HubError::SchemaMismatch(..)));
        assert!(err.to_string().starts_with("schema mismatch: expected [\"/a\", \"/b\"]"));
    }

    #[test]
    fn context_preserves_root() {
        let err = hub_err!(NotFound: "meta.json").with_context("opening dataset");
        assert!(err.is_not_found());
        assert!(matches!(err.root(), HubError::NotFound(..)));
        assert!(err.to_string().starts_with("opening dataset: not found: meta.json"));
    }

    #[test]
    fn io_not_found_is_not_found() {
        let err = HubError::from(io::Error::from(io::ErrorKind::NotFound));
        assert!(err.is_not_found());
    }

    #[test]
    fn not_a_dataset_message() {
        let err = hub_err!(NotADataset: "{} holds {} keys", "/data", 2);
        assert!(err.to_string().starts_with("not a dataset: /data holds 2 keys"));
        assert!(!err.is_not_found());
    }

    #[test]
    fn out_of_bounds_message() {
        let err = hub_err!(OutOfBounds: 12, 0, 10);
        assert!(err.to_string().starts_with("index 12 out of bounds from 0 to 10"));
    }
}
