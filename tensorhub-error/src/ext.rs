use crate::{ErrString, HubResult};

/// Extension trait for attaching context to the error of a [`HubResult`].
pub trait ResultExt<T>: private::Sealed {
    /// Wraps the error, if any, with the message produced by `f`.
    ///
    /// The message is only built on the error path.
    fn context<M: Into<ErrString>, F: FnOnce() -> M>(self, f: F) -> HubResult<T>;
}

mod private {
    use crate::HubResult;

    pub trait Sealed {}

    impl<T> Sealed for HubResult<T> {}
}

impl<T> ResultExt<T> for HubResult<T> {
    fn context<M: Into<ErrString>, F: FnOnce() -> M>(self, f: F) -> HubResult<T> {
        self.map_err(|e| e.with_context(f()))
    }
}
