//! Response caching on top of [`ResponseCapture`] and [`CaptureCodec`].
//!
//! The [`CacheStage`] derives a key for each request using a [`CacheKeyFn`].
//! On a hit the stored response is decoded and replayed onto the live sink.
//! On a miss the rest of the pipeline runs against a capture of the live sink,
//! and successful responses are encoded and stored afterwards.
//!
//! Where entries are stored is up to the [`CacheStore`]. No eviction or
//! expiry happens at this layer. [`MemoryCacheStore`] is an in-process store.
//!
//! [`ResponseCapture`]: crate::capture::ResponseCapture
//! [`CaptureCodec`]: crate::codec::CaptureCodec

use crate::Request;
use bytes::Bytes;
use http::Method;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tapedeck_error::BoxError;

mod coalesce;

mod stage;
#[doc(inline)]
pub use stage::CacheStage;

/// Storage of encoded cache entries, keyed by an opaque string.
pub trait CacheStore: Send + Sync + 'static {
    /// Fetch the entry stored for `key`, if any.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Bytes>, BoxError>> + Send;

    /// Store `entry` for `key`, replacing any previous entry.
    fn set(&self, key: &str, entry: Bytes) -> impl Future<Output = Result<(), BoxError>> + Send;
}

impl<S: CacheStore> CacheStore for Arc<S> {
    #[inline]
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Bytes>, BoxError>> + Send {
        self.as_ref().get(key)
    }

    #[inline]
    fn set(&self, key: &str, entry: Bytes) -> impl Future<Output = Result<(), BoxError>> + Send {
        self.as_ref().set(key, entry)
    }
}

#[derive(Debug, Clone, Default)]
/// An in-process [`CacheStore`], shared between its clones.
pub struct MemoryCacheStore {
    entries: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemoryCacheStore {
    /// Create a new, empty, [`MemoryCacheStore`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Amount of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns `true` if an entry is stored for `key`.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Remove and return the entry stored for `key`.
    pub fn remove(&self, key: &str) -> Option<Bytes> {
        self.entries.write().remove(key)
    }

    /// Store `entry` for `key` directly, bypassing the async interface.
    pub fn insert(&self, key: impl Into<String>, entry: Bytes) -> Option<Bytes> {
        self.entries.write().insert(key.into(), entry)
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Bytes>, BoxError>> + Send {
        std::future::ready(Ok(self.entries.read().get(key).cloned()))
    }

    fn set(&self, key: &str, entry: Bytes) -> impl Future<Output = Result<(), BoxError>> + Send {
        self.entries.write().insert(key.to_owned(), entry);
        std::future::ready(Ok(()))
    }
}

/// Derives the cache key of a request.
///
/// Returning `None` makes the request bypass the cache entirely.
pub trait CacheKeyFn: Send + Sync + 'static {
    /// The cache key for `req`, if it is cacheable at all.
    fn cache_key(&self, req: &Request) -> Option<String>;
}

impl<F> CacheKeyFn for F
where
    F: Fn(&Request) -> Option<String> + Send + Sync + 'static,
{
    #[inline]
    fn cache_key(&self, req: &Request) -> Option<String> {
        (self)(req)
    }
}

#[derive(Debug, Clone, Copy, Default)]
#[non_exhaustive]
/// The default [`CacheKeyFn`]: `"{METHOD}:{path}"`, for `GET` and `HEAD` requests only.
///
/// e.g. `GET /users/42?verbose=1` results in the key `GET:/users/42`.
pub struct MethodPathKey;

impl MethodPathKey {
    /// Create a new [`MethodPathKey`].
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl CacheKeyFn for MethodPathKey {
    fn cache_key(&self, req: &Request) -> Option<String> {
        let method = req.method();
        if method != Method::GET && method != Method::HEAD {
            return None;
        }
        Some(format!("{}:{}", method.as_str(), req.uri().path()))
    }
}
