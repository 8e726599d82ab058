use std::fmt::Display;

mod chain;
mod context;

mod opaque;
pub use opaque::OpaqueError;
use opaque::MessageError;

/// Extends the `Result` and `Option` types with methods for adding context to errors.
///
/// # Examples
///
/// ```
/// use tapedeck_error::ErrorContext;
///
/// let result = "hello".parse::<i32>().context("parse integer");
/// assert_eq!("parse integer: invalid digit found in string", result.unwrap_err().to_string());
///
/// let missing: Option<u8> = None;
/// assert_eq!("cache key: value is missing", missing.context("cache key").unwrap_err().to_string());
/// ```
pub trait ErrorContext: private::SealedErrorContext {
    /// The resulting context type after adding context to the contained error.
    type Context;

    /// Add a static context to the contained error.
    fn context<M>(self, context: M) -> Self::Context
    where
        M: Display + Send + Sync + 'static;

    /// Lazily add a context to the contained error, if it exists.
    fn with_context<C, F>(self, context: F) -> Self::Context
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> ErrorContext for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    type Context = Result<T, OpaqueError>;

    fn context<M>(self, context: M) -> Self::Context
    where
        M: Display + Send + Sync + 'static,
    {
        self.map_err(|error| error.context(context))
    }

    fn with_context<C, F>(self, context: F) -> Self::Context
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|error| error.context(context()))
    }
}

impl<T> ErrorContext for Option<T> {
    type Context = Result<T, OpaqueError>;

    fn context<M>(self, context: M) -> Self::Context
    where
        M: Display + Send + Sync + 'static,
    {
        self.ok_or_else(|| MessageError("value is missing").context(context))
    }

    fn with_context<C, F>(self, context: F) -> Self::Context
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.ok_or_else(|| MessageError("value is missing").context(context()))
    }
}

/// Extends the `Error` type with methods for working with errors.
///
/// # Examples
///
/// ```
/// use tapedeck_error::ErrorExt;
///
/// #[derive(Debug)]
/// struct StoreDown;
///
/// impl std::fmt::Display for StoreDown {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         write!(f, "store down")
///     }
/// }
///
/// impl std::error::Error for StoreDown {}
///
/// let error = StoreDown.context("fetch cache entry");
/// assert!(error.root_cause().downcast_ref::<StoreDown>().is_some());
/// assert_eq!(2, error.chain().count());
/// ```
pub trait ErrorExt: private::SealedErrorExt {
    /// Wrap the error in a context.
    fn context<M>(self, context: M) -> OpaqueError
    where
        M: Display + Send + Sync + 'static;

    /// Lazily wrap the error with a context.
    fn with_context<C, F>(self, context: F) -> OpaqueError
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;

    /// Iterate over the chain of errors, starting with this one.
    fn chain(&self) -> impl Iterator<Item = &(dyn std::error::Error + 'static)>;

    /// Get the root cause of the error.
    fn root_cause(&self) -> &(dyn std::error::Error + 'static);
}

impl<Error: std::error::Error + Send + Sync + 'static> ErrorExt for Error {
    fn context<M>(self, context: M) -> OpaqueError
    where
        M: Display + Send + Sync + 'static,
    {
        OpaqueError::from_std(context::ContextError {
            context,
            error: self,
        })
    }

    fn with_context<C, F>(self, context: F) -> OpaqueError
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        OpaqueError::from_std(context::ContextError {
            context: context(),
            error: self,
        })
    }

    fn chain(&self) -> impl Iterator<Item = &(dyn std::error::Error + 'static)> {
        chain::Chain::new(self)
    }

    fn root_cause(&self) -> &(dyn std::error::Error + 'static) {
        let mut cause: &(dyn std::error::Error + 'static) = self;
        while let Some(next) = cause.source() {
            cause = next;
        }
        cause
    }
}

mod private {
    pub trait SealedErrorContext {}

    impl<T, E> SealedErrorContext for Result<T, E> where E: std::error::Error + Send + Sync + 'static {}
    impl<T> SealedErrorContext for Option<T> {}

    pub trait SealedErrorExt {}

    impl<Error: std::error::Error + Send + Sync + 'static> SealedErrorExt for Error {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoxError;

    #[derive(Debug)]
    struct Truncated;

    impl Display for Truncated {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("truncated")
        }
    }

    impl std::error::Error for Truncated {}

    #[test]
    fn test_context_display_and_source() {
        let error = Truncated.context("decode entry");
        assert_eq!("decode entry: truncated", error.to_string());
        let source = std::error::Error::source(&error).unwrap();
        assert_eq!("truncated", source.to_string());
    }

    #[test]
    fn test_nested_context_chain() {
        let error = Truncated.context("decode entry").context("cache lookup");
        assert_eq!("cache lookup: decode entry: truncated", error.to_string());
        assert_eq!(3, error.chain().count());
        assert!(error.root_cause().downcast_ref::<Truncated>().is_some());
    }

    #[test]
    fn test_option_context() {
        let value: Option<()> = None;
        let error = value.with_context(|| format!("key {}", 42)).unwrap_err();
        assert_eq!("key 42: value is missing", error.to_string());
    }

    #[test]
    fn test_opaque_into_box_error() {
        let error: BoxError = Truncated.context("store").into();
        assert_eq!("store: truncated", error.to_string());
    }
}
