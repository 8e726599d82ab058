//! The innermost step of a [`Pipeline`]: the [`Handler`].
//!
//! [`Pipeline`]: super::Pipeline

use crate::Request;
use crate::sink::DynSink;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::fmt;
use tapedeck_error::BoxError;

/// Produces the response for a request by writing it into a sink.
pub trait Handler: Send + Sync + 'static {
    /// Serve `req`, writing the response into `sink`.
    fn serve<'a>(
        &'a self,
        req: &'a Request,
        sink: &'a mut DynSink<'a>,
    ) -> BoxFuture<'a, Result<(), BoxError>>;
}

impl<H: Handler> Handler for std::sync::Arc<H> {
    #[inline]
    fn serve<'a>(
        &'a self,
        req: &'a Request,
        sink: &'a mut DynSink<'a>,
    ) -> BoxFuture<'a, Result<(), BoxError>> {
        self.as_ref().serve(req, sink)
    }
}

/// Create a [`HandlerFn`] from a synchronous function.
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: Fn(&Request, &mut DynSink<'_>) -> Result<(), BoxError> + Send + Sync + 'static,
{
    HandlerFn { f }
}

/// A [`Handler`] implemented using a synchronous function.
///
/// Created using [`handler_fn`].
#[derive(Clone)]
pub struct HandlerFn<F> {
    f: F,
}

impl<F> fmt::Debug for HandlerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerFn")
            .field("f", &std::any::type_name::<F>())
            .finish()
    }
}

impl<F> Handler for HandlerFn<F>
where
    F: Fn(&Request, &mut DynSink<'_>) -> Result<(), BoxError> + Send + Sync + 'static,
{
    fn serve<'a>(
        &'a self,
        req: &'a Request,
        sink: &'a mut DynSink<'a>,
    ) -> BoxFuture<'a, Result<(), BoxError>> {
        futures::future::ready((self.f)(req, sink)).boxed()
    }
}
