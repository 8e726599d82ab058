#![allow(dead_code)]

use futures::future::BoxFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tapedeck::Request;
use tapedeck::audit::{AuditRecord, AuditStage};
use tapedeck::bytes::Bytes;
use tapedeck::error::BoxError;
use tapedeck::http::header::CONTENT_TYPE;
use tapedeck::http::{HeaderValue, Method, StatusCode};
use tapedeck::pipeline::Handler;
use tapedeck::sink::{DynSink, ResponseSink};
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio::sync::mpsc::UnboundedSender;

pub(crate) fn request(method: Method, path: &str) -> Request {
    tapedeck::http::Request::builder()
        .method(method)
        .uri(path)
        .body(Bytes::new())
        .unwrap()
}

/// A json api serving `/users/{id}`, counting how often it was called.
///
/// Responds `404` for unknown users and `500` for `/users/500`.
#[derive(Debug, Clone, Default)]
pub(crate) struct UserApi {
    calls: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl UserApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Handler for UserApi {
    fn serve<'a>(
        &'a self,
        req: &'a Request,
        sink: &'a mut DynSink<'a>,
    ) -> BoxFuture<'a, Result<(), BoxError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let id: u64 = match req.uri().path().strip_prefix("/users/") {
                Some(id) => id.parse()?,
                None => {
                    sink.write_status(StatusCode::NOT_FOUND)?;
                    return Ok(());
                }
            };

            sink.headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            if id == 500 {
                sink.write_status(StatusCode::INTERNAL_SERVER_ERROR)?;
                sink.write(br#"{"error":"database unavailable"}"#)?;
                return Ok(());
            }
            sink.write_status(StatusCode::OK)?;
            sink.write(format!(r#"{{"id":{id}}}"#).as_bytes())?;
            Ok(())
        })
    }
}

/// An [`AuditStage`] writing into the returned in-memory stream.
pub(crate) fn audit_log() -> (AuditStage<UnboundedSender<AuditRecord>>, DuplexStream) {
    let (writer, reader) = tokio::io::duplex(64 * 1024);
    (AuditStage::writer_unbounded(writer), reader)
}

/// Everything written to an [`audit_log`] stream,
/// once every stage writing to it was dropped.
pub(crate) async fn read_audit_log(mut reader: DuplexStream) -> String {
    let mut log = String::new();
    tokio::time::timeout(Duration::from_secs(5), reader.read_to_string(&mut log))
        .await
        .unwrap()
        .unwrap();
    log
}
