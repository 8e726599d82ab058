//! Composition of [`Stage`]s around a [`Handler`].
//!
//! A [`Pipeline`] is an ordered list of stages, finished by a handler.
//! Each stage receives the request, the sink to write the response into,
//! and a [`Next`] to continue with the rest of the pipeline. A stage
//! may observe, wrap the sink, or not call [`Next::run`] at all and
//! produce the response itself (e.g. on a cache hit).
//!
//! # Example
//!
//! ```
//! use tapedeck_http::Request;
//! use tapedeck_http::bytes::Bytes;
//! use tapedeck_http::http::StatusCode;
//! use tapedeck_http::pipeline::{PipelineBuilder, handler_fn};
//! use tapedeck_http::sink::ResponseSink;
//!
//! # futures::executor::block_on(async {
//! let pipeline = PipelineBuilder::new().handler(handler_fn(|_req, sink| {
//!     sink.write_status(StatusCode::NO_CONTENT)?;
//!     Ok(())
//! }));
//!
//! let req = Request::new(Bytes::new());
//! let response = pipeline.serve_buffered(&req).await.unwrap();
//! assert_eq!(StatusCode::NO_CONTENT, response.status());
//! # });
//! ```

use crate::Request;
use crate::sink::{BufferedSink, DynSink};
use bytes::Bytes;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use tapedeck_error::BoxError;

mod handler;
#[doc(inline)]
pub use handler::{Handler, HandlerFn, handler_fn};

/// A named step of a [`Pipeline`], wrapping everything that comes after it.
pub trait Stage: Send + Sync + 'static {
    /// Name of the stage, used in logs and [`Pipeline::stage_names`].
    fn name(&self) -> &'static str;

    /// Serve `req`, usually by calling [`Next::run`] with (a wrapper of) `sink`.
    fn serve<'a>(
        &'a self,
        req: &'a Request,
        sink: &'a mut DynSink<'a>,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<(), BoxError>>;
}

/// The remainder of a [`Pipeline`], as seen by a [`Stage`].
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
    handler: &'a dyn Handler,
}

impl<'a> Next<'a> {
    /// Continue with the next stage, or with the handler if no stages are left.
    pub fn run<'b>(
        self,
        req: &'b Request,
        sink: &'b mut DynSink<'b>,
    ) -> BoxFuture<'b, Result<(), BoxError>>
    where
        'a: 'b,
    {
        match self.stages.split_first() {
            Some((stage, stages)) => {
                tracing::trace!(stage = stage.name(), "pipeline: enter stage");
                stage.serve(
                    req,
                    sink,
                    Next {
                        stages,
                        handler: self.handler,
                    },
                )
            }
            None => {
                tracing::trace!("pipeline: enter handler");
                self.handler.serve(req, sink)
            }
        }
    }

    /// Amount of stages left before the handler is reached.
    #[must_use]
    pub fn remaining_stages(&self) -> usize {
        self.stages.len()
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("stages", &stage_names(self.stages))
            .finish_non_exhaustive()
    }
}

/// An immutable, cheaply cloneable, chain of [`Stage`]s finished by a [`Handler`].
///
/// Created using a [`PipelineBuilder`].
#[derive(Clone)]
pub struct Pipeline {
    stages: Arc<[Arc<dyn Stage>]>,
    handler: Arc<dyn Handler>,
}

impl Pipeline {
    /// Serve `req`, writing the response into `sink`.
    pub fn serve<'a>(
        &'a self,
        req: &'a Request,
        sink: &'a mut DynSink<'a>,
    ) -> BoxFuture<'a, Result<(), BoxError>> {
        self.next().run(req, sink)
    }

    /// Serve `req` into a [`BufferedSink`], returning the buffered response.
    pub async fn serve_buffered(&self, req: &Request) -> Result<http::Response<Bytes>, BoxError> {
        let mut sink = BufferedSink::new();
        self.serve(req, &mut sink).await?;
        Ok(sink.into_response())
    }

    /// Names of the stages, in the order they are run.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        stage_names(&self.stages)
    }

    fn next(&self) -> Next<'_> {
        Next {
            stages: &self.stages,
            handler: self.handler.as_ref(),
        }
    }
}

impl Handler for Pipeline {
    #[inline]
    fn serve<'a>(
        &'a self,
        req: &'a Request,
        sink: &'a mut DynSink<'a>,
    ) -> BoxFuture<'a, Result<(), BoxError>> {
        Self::serve(self, req, sink)
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish_non_exhaustive()
    }
}

#[derive(Default, Clone)]
/// Builder of a [`Pipeline`].
pub struct PipelineBuilder {
    stages: Vec<Arc<dyn Stage>>,
}

impl PipelineBuilder {
    /// Create a new [`PipelineBuilder`] without any stages.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stage, run after all stages added before it.
    #[must_use]
    pub fn with_stage(mut self, stage: impl Stage) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Add a stage, run after all stages added before it.
    pub fn push_stage(&mut self, stage: impl Stage) -> &mut Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Finish the [`Pipeline`] with the given handler.
    pub fn handler(self, handler: impl Handler) -> Pipeline {
        Pipeline {
            stages: self.stages.into(),
            handler: Arc::new(handler),
        }
    }
}

impl fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("stages", &stage_names(&self.stages))
            .finish()
    }
}

fn stage_names(stages: &[Arc<dyn Stage>]) -> Vec<&'static str> {
    stages.iter().map(|stage| stage.name()).collect()
}
