//! Capture, replay, broadcast and caching of streamed http responses.
//!
//! Handlers write their response into a [`ResponseSink`]: headers first,
//! then a status, then the body. This crate provides sinks that sit in
//! between a handler and the live connection:
//!
//! - [`ResponseCapture`] records everything written through it, locking the
//!   headers at the first status or body write, and can replay the recording
//!   onto any other sink, any number of times;
//! - [`CaptureCodec`] turns such a recording into bytes and back;
//! - [`BroadcastSink`] delivers a single response to multiple sinks.
//!
//! On top of these, [`Pipeline`]s of [`Stage`]s are composed around a [`Handler`].
//! The [`CacheStage`] serves repeated requests from a [`CacheStore`],
//! and the [`AuditStage`] writes all traffic to a writer of choice.
//!
//! # Example
//!
//! ```
//! use tapedeck_http::Request;
//! use tapedeck_http::bytes::Bytes;
//! use tapedeck_http::cache::{CacheStage, MemoryCacheStore};
//! use tapedeck_http::http::StatusCode;
//! use tapedeck_http::pipeline::{PipelineBuilder, handler_fn};
//! use tapedeck_http::sink::ResponseSink;
//!
//! # futures::executor::block_on(async {
//! let store = MemoryCacheStore::new();
//! let pipeline = PipelineBuilder::new()
//!     .with_stage(CacheStage::new(store.clone()))
//!     .handler(handler_fn(|_req, sink| {
//!         sink.write(br#"{"id":42}"#)?;
//!         Ok(())
//!     }));
//!
//! let req = tapedeck_http::http::Request::get("/users/42").body(Bytes::new()).unwrap();
//! let response = pipeline.serve_buffered(&req).await.unwrap();
//! assert_eq!(StatusCode::OK, response.status());
//! assert!(store.contains_key("GET:/users/42"));
//! # });
//! ```
//!
//! [`ResponseSink`]: sink::ResponseSink
//! [`ResponseCapture`]: capture::ResponseCapture
//! [`CaptureCodec`]: codec::CaptureCodec
//! [`BroadcastSink`]: broadcast::BroadcastSink
//! [`Pipeline`]: pipeline::Pipeline
//! [`Stage`]: pipeline::Stage
//! [`Handler`]: pipeline::Handler
//! [`CacheStage`]: cache::CacheStage
//! [`CacheStore`]: cache::CacheStore
//! [`AuditStage`]: audit::AuditStage

#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(not(test), warn(clippy::print_stdout, clippy::dbg_macro))]

pub use ::bytes;
pub use ::http;

/// The request type served by a [`Pipeline`](pipeline::Pipeline),
/// with its body fully buffered.
pub type Request = http::Request<bytes::Bytes>;

pub mod headers;
pub mod sink;

pub mod capture;
pub mod codec;

pub mod broadcast;

pub mod pipeline;

pub mod audit;
pub mod cache;
