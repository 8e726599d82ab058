//! Capture of everything a handler writes to a [`ResponseSink`].
//!
//! A [`ResponseCapture`] sits in between a handler and the sink it would
//! otherwise write to. Every operation is forwarded to that sink, while the
//! headers, status and body are recorded along the way. The recorded state
//! can be frozen into a [`CapturedResponse`], which can be replayed onto
//! any number of other sinks or persisted using the [`codec`].
//!
//! # Header lock
//!
//! Headers are locked exactly once, at the first explicit status commit
//! or at the first body write, whichever comes first. From then on:
//!
//! - the locked headers can no longer change;
//! - the working headers returned by [`ResponseSink::headers_mut`] can still
//!   be modified, but those modifications are never recorded nor forwarded;
//! - committing a status again fails with [`SinkError::HeadersAlreadyLocked`],
//!   without forwarding anything.
//!
//! A body write without a preceding status commit commits `200 OK`,
//! recording it and forwarding it to the wrapped sink.
//!
//! A status is only recorded once the wrapped sink accepted it. If the wrapped
//! sink was already committed before it got wrapped, the implicit commit of a
//! body write is skipped: the chunk is still recorded and forwarded, but the
//! status stays unknown and the capture is never considered a success.
//!
//! # Example
//!
//! ```
//! use tapedeck_http::capture::ResponseCapture;
//! use tapedeck_http::sink::{BufferedSink, ResponseSink};
//! use tapedeck_http::http::{HeaderValue, StatusCode, header::CONTENT_TYPE};
//!
//! let mut capture = ResponseCapture::new(BufferedSink::new());
//! capture
//!     .headers_mut()
//!     .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
//! capture.write(b"hello").unwrap();
//! assert!(capture.is_success_status());
//!
//! let captured = capture.freeze();
//! let mut other_client = BufferedSink::new();
//! captured.replay(&mut other_client).unwrap();
//!
//! let response = other_client.into_response();
//! assert_eq!(StatusCode::OK, response.status());
//! assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
//! assert_eq!(response.body().as_ref(), b"hello");
//! ```
//!
//! [`codec`]: crate::codec

use crate::headers::{HeaderSnapshot, clone_headers};
use crate::sink::{ResponseSink, SinkError};
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};

/// Records the headers, status and body written through it,
/// while forwarding all of it to the wrapped sink.
///
/// Scoped to a single handler invocation: create a new one for each request.
///
/// See the [module docs](crate::capture) for the header lock rules.
#[derive(Debug)]
pub struct ResponseCapture<S> {
    inner: S,
    working: HeaderMap,
    locked: Option<HeaderSnapshot>,
    status: Option<StatusCode>,
    committed_elsewhere: bool,
    body: BytesMut,
}

impl<S: ResponseSink> ResponseCapture<S> {
    /// Wrap the given sink.
    ///
    /// The working headers start out as a copy of the headers already set on `inner`.
    pub fn new(mut inner: S) -> Self {
        let working = clone_headers(inner.headers_mut());
        Self {
            inner,
            working,
            locked: None,
            status: None,
            committed_elsewhere: false,
            body: BytesMut::new(),
        }
    }

    fn lock_headers(&mut self) -> Result<(), SinkError> {
        if self.locked.is_some() {
            return Err(SinkError::HeadersAlreadyLocked);
        }
        let snapshot = HeaderSnapshot::capture(&self.working);
        snapshot.overwrite_onto(self.inner.headers_mut());
        tracing::trace!(
            header_values = snapshot.value_count(),
            "response capture: headers locked"
        );
        self.locked = Some(snapshot);
        Ok(())
    }
}

impl<S> ResponseCapture<S> {
    /// Returns `true` once the headers are locked.
    pub fn is_locked(&self) -> bool {
        self.locked.is_some()
    }

    /// The recorded status, `None` as long as nothing was written,
    /// or if the wrapped sink refused the status commit.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// The body recorded so far.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Returns `true` if the headers are locked and the recorded status
    /// is either unset or `200 OK`.
    ///
    /// Always `false` once the wrapped sink reported that its status was
    /// committed before this capture could commit one.
    ///
    /// This is what makes a response worth caching.
    pub fn is_success_status(&self) -> bool {
        !self.committed_elsewhere && is_success_status(self.locked.is_some(), self.status)
    }

    /// Returns `true` if the wrapped sink refused a status commit
    /// because it was committed before.
    pub fn is_committed_elsewhere(&self) -> bool {
        self.committed_elsewhere
    }

    /// Freeze the current state into a [`CapturedResponse`].
    ///
    /// Valid at any point: the locked headers are used if present,
    /// the working headers otherwise.
    pub fn freeze(&self) -> CapturedResponse {
        CapturedResponse {
            headers: self
                .locked
                .clone()
                .unwrap_or_else(|| HeaderSnapshot::capture(&self.working)),
            locked: self.locked.is_some(),
            status: self.status,
            body: Bytes::copy_from_slice(&self.body),
        }
    }

    /// Consume the capture into a [`CapturedResponse`], without copying the body.
    pub fn into_captured(self) -> CapturedResponse {
        self.into_parts().1
    }

    /// Consume the capture, returning the wrapped sink and the [`CapturedResponse`].
    pub fn into_parts(self) -> (S, CapturedResponse) {
        let captured = CapturedResponse {
            locked: self.locked.is_some(),
            headers: self
                .locked
                .unwrap_or_else(|| HeaderSnapshot::from(self.working)),
            status: self.status,
            body: self.body.freeze(),
        };
        (self.inner, captured)
    }

    /// Consume the capture, returning the wrapped sink.
    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Replay what was recorded so far onto `target`.
    ///
    /// See [`CapturedResponse::replay`].
    pub fn replay<T>(&self, target: &mut T) -> Result<(), SinkError>
    where
        T: ResponseSink + ?Sized,
    {
        replay_onto(self.locked.as_ref(), self.status, &self.body, target)
    }
}

impl<S: ResponseSink> ResponseSink for ResponseCapture<S> {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.working
    }

    fn write_status(&mut self, status: StatusCode) -> Result<(), SinkError> {
        self.lock_headers()?;
        if let Err(err) = self.inner.write_status(status) {
            if err.is_already_locked() {
                self.committed_elsewhere = true;
            }
            return Err(err);
        }
        self.status = Some(status);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, SinkError> {
        if self.locked.is_none() {
            match self.write_status(StatusCode::OK) {
                Ok(()) => (),
                Err(SinkError::HeadersAlreadyLocked) => tracing::debug!(
                    "response capture: wrapped sink committed before the first write, status unknown"
                ),
                Err(err) => return Err(err),
            }
        }
        // recorded before forwarding, so it is kept even if the transport fails
        self.body.extend_from_slice(data);
        self.inner.write(data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A frozen [`ResponseCapture`], independent of any live sink.
///
/// This is the form in which a response is persisted (see [`codec`])
/// and replayed. Replaying is read-only and can be done any number of times.
///
/// [`codec`]: crate::codec
pub struct CapturedResponse {
    headers: HeaderSnapshot,
    locked: bool,
    status: Option<StatusCode>,
    body: Bytes,
}

impl CapturedResponse {
    pub(crate) fn from_parts(
        headers: HeaderSnapshot,
        locked: bool,
        status: Option<StatusCode>,
        body: Bytes,
    ) -> Self {
        Self {
            headers,
            locked,
            status,
            body,
        }
    }

    /// The captured headers: the locked ones if [`Self::is_locked`],
    /// the working headers at the time of freezing otherwise.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        self.headers.as_map()
    }

    /// Returns `true` if the headers were locked at the time of freezing.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// The captured status, `None` if it was never set.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// The captured body.
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// See [`ResponseCapture::is_success_status`].
    #[must_use]
    pub fn is_success_status(&self) -> bool {
        is_success_status(self.locked, self.status)
    }

    /// Reproduce the captured response onto `target`.
    ///
    /// The locked headers overwrite the headers of `target`, after which the
    /// captured status is committed and the captured body written.
    /// A capture that was never locked had nothing written to it,
    /// and leaves `target` untouched.
    pub fn replay<T>(&self, target: &mut T) -> Result<(), SinkError>
    where
        T: ResponseSink + ?Sized,
    {
        let locked = self.locked.then_some(&self.headers);
        replay_onto(locked, self.status, &self.body, target)
    }
}

fn is_success_status(locked: bool, status: Option<StatusCode>) -> bool {
    locked && status.is_none_or(|status| status == StatusCode::OK)
}

fn replay_onto<T>(
    locked: Option<&HeaderSnapshot>,
    status: Option<StatusCode>,
    body: &[u8],
    target: &mut T,
) -> Result<(), SinkError>
where
    T: ResponseSink + ?Sized,
{
    let Some(headers) = locked else {
        return Ok(());
    };
    headers.overwrite_onto(target.headers_mut());
    if let Some(status) = status {
        target.write_status(status)?;
    }
    let written = target.write(body)?;
    if written != body.len() {
        return Err(SinkError::DivergentWrite {
            expected: body.len(),
            written,
        });
    }
    Ok(())
}
