//! 📼 tapedeck records streamed http responses as they are written,
//! and plays them back onto as many clients as you like.
//!
//! A handler writes its response into a [`ResponseSink`]. Wrapping that sink in a
//! [`ResponseCapture`] records the headers, status and body without
//! changing what the client receives. The recording can be replayed,
//! encoded with the [`CaptureCodec`] for storage, or fanned out live to
//! several sinks at once with a [`BroadcastSink`].
//!
//! These building blocks power the stages that ship with tapedeck:
//!
//! | stage | what it does |
//! |-|-|
//! | [`CacheStage`] | serves repeated requests from a [`CacheStore`], optionally coalescing concurrent misses |
//! | [`AuditStage`] | writes every request and response to stdout, stderr or any `AsyncWrite`r |
//!
//! Stages are composed around a [`Handler`] into a [`Pipeline`].
//!
//! # Example
//!
//! ```
//! use tapedeck::Request;
//! use tapedeck::audit::{AuditMode, AuditStage};
//! use tapedeck::bytes::Bytes;
//! use tapedeck::cache::{CacheStage, MemoryCacheStore};
//! use tapedeck::http::StatusCode;
//! use tapedeck::pipeline::{PipelineBuilder, handler_fn};
//! use tapedeck::sink::{ResponseSink, WireSink};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let pipeline = PipelineBuilder::new()
//!     .with_stage(AuditStage::writer_unbounded(tokio::io::sink()).with_mode(AuditMode::Headers))
//!     .with_stage(CacheStage::new(MemoryCacheStore::new()).with_coalescing(true))
//!     .handler(handler_fn(|_req, sink| {
//!         sink.write_status(StatusCode::OK)?;
//!         sink.write(b"hello")?;
//!         Ok(())
//!     }));
//!
//! let req = tapedeck::http::Request::get("/hello").body(Bytes::new()).unwrap();
//! let mut conn = WireSink::new(Vec::new());
//! pipeline.serve(&req, &mut conn).await.unwrap();
//! conn.flush().await.unwrap();
//! assert_eq!(
//!     b"HTTP/1.1 200 OK\r\n\r\nhello".as_slice(),
//!     conn.into_inner().as_slice(),
//! );
//! # }
//! ```
//!
//! [`ResponseSink`]: sink::ResponseSink
//! [`ResponseCapture`]: capture::ResponseCapture
//! [`CaptureCodec`]: codec::CaptureCodec
//! [`BroadcastSink`]: broadcast::BroadcastSink
//! [`CacheStage`]: cache::CacheStage
//! [`CacheStore`]: cache::CacheStore
//! [`AuditStage`]: audit::AuditStage
//! [`Handler`]: pipeline::Handler
//! [`Pipeline`]: pipeline::Pipeline

#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(not(test), warn(clippy::print_stdout, clippy::dbg_macro))]

#[doc(inline)]
pub use tapedeck_error as error;

#[doc(inline)]
pub use tapedeck_http::{
    Request, audit, broadcast, bytes, cache, capture, codec, headers, http, pipeline, sink,
};
