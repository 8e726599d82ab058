use super::{ResponseSink, SinkError};
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Response, StatusCode};

#[derive(Debug, Clone, Default)]
/// An in-memory [`ResponseSink`].
///
/// It follows the same wire semantics as a network sink:
/// the headers are frozen at the moment the status is committed,
/// and the first write commits `200 OK` if no status was committed yet.
///
/// Use [`BufferedSink::into_response`] to turn what was written
/// into a regular [`Response`].
pub struct BufferedSink {
    headers: HeaderMap,
    committed: Option<(StatusCode, HeaderMap)>,
    body: BytesMut,
}

impl BufferedSink {
    /// Create a new empty [`BufferedSink`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new [`BufferedSink`] with headers already present,
    /// as a server would do for e.g. `date` or `server` headers.
    #[must_use]
    pub fn with_headers(headers: HeaderMap) -> Self {
        Self {
            headers,
            ..Default::default()
        }
    }

    /// The committed status, if any.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        self.committed.as_ref().map(|(status, _)| *status)
    }

    /// The committed headers, or the pending ones if nothing was committed yet.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        match &self.committed {
            Some((_, headers)) => headers,
            None => &self.headers,
        }
    }

    /// The body bytes written so far.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Returns `true` once a status was committed.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.committed.is_some()
    }

    /// Turn the written response into a [`Response`].
    ///
    /// A sink that was never written to results in an empty `200 OK` response,
    /// carrying whatever headers were set on it.
    #[must_use]
    pub fn into_response(self) -> Response<Bytes> {
        let (status, headers) = self
            .committed
            .unwrap_or((StatusCode::OK, self.headers));
        let mut response = Response::new(self.body.freeze());
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

impl ResponseSink for BufferedSink {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_status(&mut self, status: StatusCode) -> Result<(), SinkError> {
        if self.committed.is_some() {
            return Err(SinkError::HeadersAlreadyLocked);
        }
        self.committed = Some((status, self.headers.clone()));
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, SinkError> {
        if self.committed.is_none() {
            self.write_status(StatusCode::OK)?;
        }
        self.body.extend_from_slice(data);
        Ok(data.len())
    }
}
