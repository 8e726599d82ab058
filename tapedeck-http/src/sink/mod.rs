//! The [`ResponseSink`] capability and its error type.
//!
//! A sink is anything a handler can write a response into: the live
//! connection ([`WireSink`]), an in-memory buffer ([`BufferedSink`]),
//! a [`ResponseCapture`] recording on top of another sink, or a
//! [`BroadcastSink`] fanning out to several of them.
//!
//! All sinks share the same wire semantics: headers may be changed freely
//! up until the status is committed, either explicitly via
//! [`ResponseSink::write_status`] or implicitly (as `200 OK`)
//! by the first [`ResponseSink::write`]. From then on the status can not be
//! committed again, and header changes no longer have any effect.
//!
//! [`ResponseCapture`]: crate::capture::ResponseCapture
//! [`BroadcastSink`]: crate::broadcast::BroadcastSink

use http::{HeaderMap, StatusCode};
use std::fmt;

mod buffered;
#[doc(inline)]
pub use buffered::BufferedSink;

mod wire;
#[doc(inline)]
pub use wire::WireSink;

/// A destination for a streamed http response.
pub trait ResponseSink {
    /// Mutable view of the headers that will be sent with the response.
    ///
    /// Changes made after the status was committed have no effect.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Commit the status code, which also commits the current headers.
    ///
    /// Fails with [`SinkError::HeadersAlreadyLocked`] if the status was already committed.
    fn write_status(&mut self, status: StatusCode) -> Result<(), SinkError>;

    /// Write (a chunk of) the response body,
    /// committing a `200 OK` status first if no status was committed yet.
    ///
    /// Returns the amount of bytes accepted.
    fn write(&mut self, data: &[u8]) -> Result<usize, SinkError>;
}

/// Type-erased [`ResponseSink`] as passed through a [`Pipeline`].
///
/// [`Pipeline`]: crate::pipeline::Pipeline
pub type DynSink<'a> = dyn ResponseSink + Send + 'a;

impl<S> ResponseSink for &mut S
where
    S: ResponseSink + ?Sized,
{
    #[inline]
    fn headers_mut(&mut self) -> &mut HeaderMap {
        (**self).headers_mut()
    }

    #[inline]
    fn write_status(&mut self, status: StatusCode) -> Result<(), SinkError> {
        (**self).write_status(status)
    }

    #[inline]
    fn write(&mut self, data: &[u8]) -> Result<usize, SinkError> {
        (**self).write(data)
    }
}

impl<S> ResponseSink for Box<S>
where
    S: ResponseSink + ?Sized,
{
    #[inline]
    fn headers_mut(&mut self) -> &mut HeaderMap {
        (**self).headers_mut()
    }

    #[inline]
    fn write_status(&mut self, status: StatusCode) -> Result<(), SinkError> {
        (**self).write_status(status)
    }

    #[inline]
    fn write(&mut self, data: &[u8]) -> Result<usize, SinkError> {
        (**self).write(data)
    }
}

#[derive(Debug)]
/// Errors reported by a [`ResponseSink`].
pub enum SinkError {
    /// The status (and thus the headers) was already committed.
    ///
    /// This is a protocol-order violation by the caller. It is reported,
    /// but leaves the state of the sink untouched.
    HeadersAlreadyLocked,
    /// A sink accepted a different amount of bytes than it was given.
    DivergentWrite {
        /// Amount of bytes offered to the sink.
        expected: usize,
        /// Amount of bytes the sink reported as written.
        written: usize,
    },
    /// One or more sinks of a broadcast failed.
    ///
    /// The sinks not listed here did receive the operation.
    Fanout(Vec<FanoutFailure>),
    /// An I/O Error while writing to the underlying transport.
    Io(std::io::Error),
}

impl SinkError {
    /// Returns `true` if this error reports a repeated status commit.
    #[must_use]
    pub fn is_already_locked(&self) -> bool {
        matches!(self, Self::HeadersAlreadyLocked)
    }
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HeadersAlreadyLocked => {
                write!(f, "response sink: headers have already been locked")
            }
            Self::DivergentWrite { expected, written } => write!(
                f,
                "response sink: divergent write: {written} of {expected} bytes written"
            ),
            Self::Fanout(failures) => {
                write!(f, "response sink: broadcast failed for {} sink(s)", failures.len())?;
                for failure in failures {
                    write!(f, "; #{}: {}", failure.sink, failure.error)?;
                }
                Ok(())
            }
            Self::Io(error) => write!(f, "response sink: I/O: {error}"),
        }
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(error) => Some(error),
            Self::Fanout(failures) => failures
                .first()
                .map(|failure| &failure.error as &(dyn std::error::Error + 'static)),
            Self::HeadersAlreadyLocked | Self::DivergentWrite { .. } => None,
        }
    }
}

impl From<std::io::Error> for SinkError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

#[derive(Debug)]
/// The failure of a single sink within a broadcast.
pub struct FanoutFailure {
    /// Position of the failed sink within the broadcast.
    pub sink: usize,
    /// The error reported by (or on behalf of) that sink.
    pub error: SinkError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fanout_error_display_lists_every_sink() {
        let error = SinkError::Fanout(vec![
            FanoutFailure {
                sink: 1,
                error: SinkError::DivergentWrite {
                    expected: 4,
                    written: 2,
                },
            },
            FanoutFailure {
                sink: 3,
                error: SinkError::Io(std::io::Error::other("closed")),
            },
        ]);
        assert_eq!(
            error.to_string(),
            "response sink: broadcast failed for 2 sink(s); \
            #1: response sink: divergent write: 2 of 4 bytes written; \
            #3: response sink: I/O: closed"
        );
    }

    #[test]
    fn test_dyn_sink_through_box_and_ref() {
        let mut boxed: Box<DynSink<'static>> = Box::new(BufferedSink::new());
        {
            let by_ref: &mut DynSink<'_> = &mut boxed;
            by_ref.write_status(StatusCode::NO_CONTENT).unwrap();
            assert!(by_ref.write_status(StatusCode::OK).unwrap_err().is_already_locked());
        }
        assert_eq!(0, boxed.write(b"").unwrap());
    }
}
