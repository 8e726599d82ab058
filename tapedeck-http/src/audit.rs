//! Writing of the requests and responses passing through a [`Pipeline`].
//!
//! The [`AuditStage`] records each request before handing it to the rest of
//! the pipeline, and the response afterwards. The response is observed by
//! broadcasting it to both the live sink and an in-memory copy, so what is
//! recorded is exactly what the live sink received. Failures of the live
//! sink reach the handler as they were reported by that sink.
//!
//! Records are formatted in the http/1.1 text format and handed to an
//! [`AuditWriter`]. The channel based writers created by
//! [`AuditStage::writer`] and [`AuditStage::writer_unbounded`] forward them
//! to a task writing to an [`AsyncWrite`]r, each record followed by an
//! empty line. Failures to write a record are logged and never fail the request.
//!
//! # Example
//!
//! ```
//! use tapedeck_http::audit::{AuditMode, AuditStage};
//! use tapedeck_http::bytes::Bytes;
//! use tapedeck_http::pipeline::{PipelineBuilder, handler_fn};
//! use tapedeck_http::sink::ResponseSink;
//! use tokio::io::AsyncReadExt;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let (writer, mut reader) = tokio::io::duplex(4096);
//! let pipeline = PipelineBuilder::new()
//!     .with_stage(AuditStage::writer_unbounded(writer).with_mode(AuditMode::Headers))
//!     .handler(handler_fn(|_req, sink| {
//!         sink.write(b"pong")?;
//!         Ok(())
//!     }));
//!
//! let req = tapedeck_http::http::Request::get("/ping").body(Bytes::new()).unwrap();
//! pipeline.serve_buffered(&req).await.unwrap();
//! drop(pipeline);
//!
//! let mut log = String::new();
//! reader.read_to_string(&mut log).await.unwrap();
//! assert_eq!("GET /ping HTTP/1.1\r\n\r\n\r\nHTTP/1.1 200 OK\r\n\r\n\r\n", log);
//! # }
//! ```
//!
//! [`Pipeline`]: crate::pipeline::Pipeline

use crate::Request;
use crate::broadcast::BroadcastSink;
use crate::pipeline::{Next, Stage};
use crate::sink::{BufferedSink, DynSink, ResponseSink, SinkError};
use bytes::{BufMut, Bytes, BytesMut};
use futures::future::BoxFuture;
use http::{HeaderMap, Response, StatusCode};
use std::fmt;
use tapedeck_error::BoxError;
use tokio::io::{AsyncWrite, AsyncWriteExt, stderr, stdout};
use tokio::sync::mpsc::{Sender, UnboundedSender, channel, unbounded_channel};
use tracing::Instrument;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// What part of the request and response is written by an [`AuditStage`].
pub enum AuditMode {
    /// The request and status line, and the headers.
    Headers,
    /// The body only.
    Body,
    #[default]
    /// Both the headers and the body.
    All,
}

impl AuditMode {
    fn headers(self) -> bool {
        matches!(self, Self::Headers | Self::All)
    }

    fn body(self) -> bool {
        matches!(self, Self::Body | Self::All)
    }
}

/// Marker that can be inserted in the extensions of a request,
/// to have it (and its response) skipped by the [`AuditStage`].
#[derive(Debug, Clone, Copy, Default)]
#[non_exhaustive]
pub struct DoNotAudit;

impl DoNotAudit {
    /// Create a new [`DoNotAudit`] marker.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Whether an [`AuditRecord`] holds a request or a response.
pub enum RecordKind {
    /// The request, recorded before the rest of the pipeline ran.
    Request,
    /// The response, as received by the live sink.
    Response,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request => f.write_str("request"),
            Self::Response => f.write_str("response"),
        }
    }
}

#[derive(Debug, Clone)]
/// A single formatted request or response, as produced by an [`AuditStage`].
pub struct AuditRecord {
    kind: RecordKind,
    data: Bytes,
}

impl AuditRecord {
    fn request(req: &Request, mode: AuditMode) -> Self {
        let mut buf = BytesMut::new();
        if mode.headers() {
            buf.put_slice(
                format!("{} {} {:?}\r\n", req.method(), req.uri(), req.version()).as_bytes(),
            );
            put_headers(&mut buf, req.headers());
        }
        if mode.body() {
            put_body(&mut buf, req.body());
        }
        Self {
            kind: RecordKind::Request,
            data: buf.freeze(),
        }
    }

    fn response(res: &Response<Bytes>, mode: AuditMode) -> Self {
        let mut buf = BytesMut::new();
        if mode.headers() {
            buf.put_slice(format!("{:?} {}\r\n", res.version(), res.status()).as_bytes());
            put_headers(&mut buf, res.headers());
        }
        if mode.body() {
            put_body(&mut buf, res.body());
        }
        Self {
            kind: RecordKind::Response,
            data: buf.freeze(),
        }
    }

    /// Whether this is a request or a response.
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    /// The formatted record, without the trailing empty line.
    #[must_use]
    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

fn put_headers(buf: &mut BytesMut, headers: &HeaderMap) {
    for (name, value) in headers {
        buf.put_slice(name.as_str().as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(value.as_bytes());
        buf.put_slice(b"\r\n");
    }
    buf.put_slice(b"\r\n");
}

fn put_body(buf: &mut BytesMut, body: &[u8]) {
    if body.is_empty() {
        return;
    }
    buf.put_slice(body);
    buf.put_slice(b"\r\n");
}

/// A destination for the records of an [`AuditStage`].
pub trait AuditWriter: Send + Sync + 'static {
    /// Write the record.
    fn write_record(&self, record: AuditRecord) -> impl Future<Output = ()> + Send + '_;
}

impl AuditWriter for Sender<AuditRecord> {
    async fn write_record(&self, record: AuditRecord) {
        if let Err(err) = self.send(record).await {
            tracing::error!("audit: failed to send record to channel: {err:?}");
        }
    }
}

impl AuditWriter for UnboundedSender<AuditRecord> {
    async fn write_record(&self, record: AuditRecord) {
        if let Err(err) = self.send(record) {
            tracing::error!("audit: failed to send record to unbounded channel: {err:?}");
        }
    }
}

impl<F, Fut> AuditWriter for F
where
    F: Fn(AuditRecord) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn write_record(&self, record: AuditRecord) {
        self(record).await
    }
}

async fn write_to<W>(writer: &mut W, record: &AuditRecord)
where
    W: AsyncWrite + Unpin,
{
    let result = async {
        writer.write_all(record.data()).await?;
        writer.write_all(b"\r\n").await?;
        writer.flush().await
    }
    .await;
    if let Err(err) = result {
        tracing::error!("audit: failed to write http {}: {err:?}", record.kind());
    }
}

/// A [`Stage`] handing every request and response to an [`AuditWriter`].
///
/// See the [module docs](crate::audit) for more details.
pub struct AuditStage<W> {
    writer: W,
    mode: AuditMode,
}

impl<W> fmt::Debug for AuditStage<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditStage")
            .field("writer", &format_args!("{}", std::any::type_name::<W>()))
            .field("mode", &self.mode)
            .finish()
    }
}

impl<W> AuditStage<W> {
    /// Create a new [`AuditStage`] with a custom [`AuditWriter`].
    pub const fn new(writer: W) -> Self {
        Self {
            writer,
            mode: AuditMode::All,
        }
    }

    /// Select what is written, [`AuditMode::All`] by default.
    #[must_use]
    pub fn with_mode(mut self, mode: AuditMode) -> Self {
        self.mode = mode;
        self
    }

    /// Select what is written, [`AuditMode::All`] by default.
    pub fn set_mode(&mut self, mode: AuditMode) -> &mut Self {
        self.mode = mode;
        self
    }

    /// What is written.
    pub fn mode(&self) -> AuditMode {
        self.mode
    }
}

impl AuditStage<UnboundedSender<AuditRecord>> {
    /// Create a new [`AuditStage`] writing to an [`AsyncWrite`]r
    /// over an unbounded channel.
    ///
    /// The writer is driven by a task spawned on the current tokio runtime,
    /// which ends once the stage is dropped.
    pub fn writer_unbounded<W>(mut writer: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = unbounded_channel::<AuditRecord>();
        tokio::spawn(
            async move {
                while let Some(record) = rx.recv().await {
                    write_to(&mut writer, &record).await;
                }
            }
            .in_current_span(),
        );
        Self::new(tx)
    }

    /// Create a new [`AuditStage`] writing to stdout over an unbounded channel.
    #[must_use]
    pub fn stdout() -> Self {
        Self::writer_unbounded(stdout())
    }

    /// Create a new [`AuditStage`] writing to stderr over an unbounded channel.
    #[must_use]
    pub fn stderr() -> Self {
        Self::writer_unbounded(stderr())
    }
}

impl AuditStage<Sender<AuditRecord>> {
    /// Create a new [`AuditStage`] writing to an [`AsyncWrite`]r
    /// over a bounded channel with a fixed buffer size.
    ///
    /// Requests wait for room in the channel once `buffer_size` records are pending.
    /// See [`AuditStage::writer_unbounded`] for the lifetime of the writer task.
    pub fn writer<W>(mut writer: W, buffer_size: usize) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = channel::<AuditRecord>(buffer_size);
        tokio::spawn(
            async move {
                while let Some(record) = rx.recv().await {
                    write_to(&mut writer, &record).await;
                }
            }
            .in_current_span(),
        );
        Self::new(tx)
    }
}

impl<W: AuditWriter> Stage for AuditStage<W> {
    fn name(&self) -> &'static str {
        "audit"
    }

    fn serve<'a>(
        &'a self,
        req: &'a Request,
        sink: &'a mut DynSink<'a>,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<(), BoxError>> {
        Box::pin(async move {
            if req.extensions().get::<DoNotAudit>().is_some() {
                return next.run(req, sink).await;
            }

            let mode = self.mode;
            self.writer
                .write_record(AuditRecord::request(req, mode))
                .await;

            let mut copy = BufferedSink::new();
            let result = {
                let mut observed = ObservedSink(
                    BroadcastSink::new(&mut *sink as &mut DynSink<'_>)
                        .with_sink(&mut copy as &mut DynSink<'_>),
                );
                let result = next.run(req, &mut observed).await;
                observed.0.finish();
                result
            };

            if result.is_ok() || copy.is_committed() {
                let response = copy.into_response();
                self.writer
                    .write_record(AuditRecord::response(&response, mode))
                    .await;
            } else {
                tracing::debug!("audit: no response written before failure");
            }
            result
        })
    }
}

/// Broadcast to the live sink (first) and the in-memory copy.
struct ObservedSink<S>(BroadcastSink<S>);

impl<S: ResponseSink> ResponseSink for ObservedSink<S> {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.0.headers_mut()
    }

    fn write_status(&mut self, status: StatusCode) -> Result<(), SinkError> {
        self.0.write_status(status).map_err(live_failure)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, SinkError> {
        self.0.write(data).map_err(live_failure)
    }
}

/// The in-memory copy never fails: a failure of the live sink alone
/// is reported as that sink reported it.
fn live_failure(err: SinkError) -> SinkError {
    match err {
        SinkError::Fanout(mut failures)
            if matches!(failures.as_slice(), [only] if only.sink == 0) =>
        {
            match failures.pop() {
                Some(failure) => failure.error,
                None => SinkError::Fanout(failures),
            }
        }
        err => err,
    }
}
