use crate::BoxError;
use std::fmt::{self, Debug, Display};

#[repr(transparent)]
/// A type-erased error, as returned by [`ErrorContext`] and [`ErrorExt`].
///
/// Its [`Display`] and [`source`] are forwarded to the wrapped error,
/// so it adds nothing to the error chain itself.
///
/// [`ErrorContext`]: crate::ErrorContext
/// [`ErrorExt`]: crate::ErrorExt
/// [`source`]: std::error::Error::source
pub struct OpaqueError(BoxError);

impl OpaqueError {
    /// Create an [`OpaqueError`] from an std error.
    pub fn from_std(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self(Box::new(error))
    }
}

impl Debug for OpaqueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl Display for OpaqueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl std::error::Error for OpaqueError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

#[repr(transparent)]
/// An error type that wraps a message.
pub(super) struct MessageError<M>(pub(super) M);

impl<M: Debug> Debug for MessageError<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl<M: Display> Display for MessageError<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<M> std::error::Error for MessageError<M> where M: Display + Debug + 'static {}
