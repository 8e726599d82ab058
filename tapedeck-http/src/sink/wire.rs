use super::{ResponseSink, SinkError};
use bytes::{BufMut, BytesMut};
use http::{HeaderMap, StatusCode, Version};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// A [`ResponseSink`] serializing an HTTP/1.x response for an [`AsyncWrite`]r.
///
/// The status line and headers are serialized in one go when the status is
/// committed, after which body writes are appended as-is. The sink operations
/// only buffer: the serialized bytes reach the writer on [`WireSink::flush`].
/// Framing of the body (`content-length`, chunking) is left to the handler,
/// as are any further transport concerns.
pub struct WireSink<W> {
    writer: W,
    pending: BytesMut,
    headers: HeaderMap,
    version: Version,
    committed: bool,
}

impl<W> std::fmt::Debug for WireSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireSink")
            .field("writer", &format_args!("{}", std::any::type_name::<W>()))
            .field("pending", &self.pending.len())
            .field("headers", &self.headers)
            .field("version", &self.version)
            .field("committed", &self.committed)
            .finish()
    }
}

impl<W> WireSink<W> {
    /// Create a new [`WireSink`] writing HTTP/1.1 onto the given writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            pending: BytesMut::new(),
            headers: HeaderMap::new(),
            version: Version::HTTP_11,
            committed: false,
        }
    }

    /// Write HTTP/1.0 status lines instead of HTTP/1.1 ones.
    #[must_use]
    pub fn with_http10(mut self) -> Self {
        self.version = Version::HTTP_10;
        self
    }

    /// Returns `true` once the response head was serialized.
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// The serialized bytes not yet flushed to the writer.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Gets a reference to the underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    /// Consume the sink, returning the underlying writer.
    ///
    /// Bytes that were not [flushed](Self::flush) are dropped.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn put_head(&mut self, status: StatusCode) {
        self.pending.put_slice(
            format!(
                "{:?} {}{}\r\n",
                self.version,
                status.as_u16(),
                status
                    .canonical_reason()
                    .map(|r| format!(" {r}"))
                    .unwrap_or_default(),
            )
            .as_bytes(),
        );
        for (name, value) in &self.headers {
            self.pending.put_slice(name.as_str().as_bytes());
            self.pending.put_slice(b": ");
            self.pending.put_slice(value.as_bytes());
            self.pending.put_slice(b"\r\n");
        }
        self.pending.put_slice(b"\r\n");
    }
}

impl<W: AsyncWrite + Unpin> WireSink<W> {
    /// Write all pending bytes to the writer, and flush it.
    ///
    /// Bytes the writer did not accept before failing stay pending.
    pub async fn flush(&mut self) -> std::io::Result<()> {
        self.writer.write_all_buf(&mut self.pending).await?;
        self.writer.flush().await
    }
}

impl<W> ResponseSink for WireSink<W> {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_status(&mut self, status: StatusCode) -> Result<(), SinkError> {
        if self.committed {
            return Err(SinkError::HeadersAlreadyLocked);
        }
        self.committed = true;
        self.put_head(status);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, SinkError> {
        if !self.committed {
            self.write_status(StatusCode::OK)?;
        }
        self.pending.put_slice(data);
        Ok(data.len())
    }
}
