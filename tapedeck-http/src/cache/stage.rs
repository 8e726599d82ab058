use super::coalesce::KeyedLocks;
use super::{CacheKeyFn, CacheStore, MethodPathKey};
use crate::Request;
use crate::capture::{CapturedResponse, ResponseCapture};
use crate::codec::CaptureCodec;
use crate::pipeline::{Next, Stage};
use crate::sink::DynSink;
use futures::future::BoxFuture;
use std::fmt;
use tapedeck_error::{BoxError, ErrorContext};

/// A [`Stage`] serving responses from a [`CacheStore`],
/// and storing successful responses on a miss.
///
/// A response is stored only if the rest of the pipeline succeeded and its
/// status was `200 OK` (or never set explicitly). Failures of the store are
/// never propagated: a failed or corrupt lookup is served as a miss,
/// and a failed store is only logged, as the response was already delivered.
///
/// With [coalescing](Self::with_coalescing) enabled, concurrent misses for the
/// same key wait for the first one, and replay its stored response instead
/// of running the rest of the pipeline again.
pub struct CacheStage<S, K = MethodPathKey> {
    store: S,
    key_fn: K,
    codec: CaptureCodec,
    coalescing: Option<KeyedLocks>,
}

impl<S> CacheStage<S> {
    /// Create a new [`CacheStage`] on top of the given store,
    /// using the default [`MethodPathKey`] key function.
    pub fn new(store: S) -> Self {
        Self {
            store,
            key_fn: MethodPathKey::new(),
            codec: CaptureCodec::new(),
            coalescing: None,
        }
    }
}

impl<S, K> CacheStage<S, K> {
    /// Use a different [`CacheKeyFn`] to derive the cache key of a request.
    pub fn with_key_fn<T>(self, key_fn: T) -> CacheStage<S, T> {
        CacheStage {
            store: self.store,
            key_fn,
            codec: self.codec,
            coalescing: self.coalescing,
        }
    }

    /// Enable or disable the coalescing of concurrent misses for the same key.
    #[must_use]
    pub fn with_coalescing(mut self, enabled: bool) -> Self {
        self.set_coalescing(enabled);
        self
    }

    /// Enable or disable the coalescing of concurrent misses for the same key.
    pub fn set_coalescing(&mut self, enabled: bool) -> &mut Self {
        self.coalescing = enabled.then(KeyedLocks::new);
        self
    }

    /// Returns `true` if concurrent misses for the same key are coalesced.
    #[must_use]
    pub fn is_coalescing(&self) -> bool {
        self.coalescing.is_some()
    }

    /// Reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: fmt::Debug, K: fmt::Debug> fmt::Debug for CacheStage<S, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStage")
            .field("store", &self.store)
            .field("key_fn", &self.key_fn)
            .field("coalescing", &self.is_coalescing())
            .finish()
    }
}

impl<S: CacheStore, K> CacheStage<S, K> {
    async fn lookup(&self, key: &str) -> Option<CapturedResponse> {
        let entry = match self.store.get(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(cache.key = key, "cache: lookup failed, served as miss: {err}");
                return None;
            }
        };
        match self.codec.decode(&entry) {
            Ok(captured) => Some(captured),
            Err(err) => {
                tracing::warn!(cache.key = key, "cache: corrupt entry, served as miss: {err}");
                None
            }
        }
    }
}

impl<S, K> Stage for CacheStage<S, K>
where
    S: CacheStore,
    K: CacheKeyFn,
{
    fn name(&self) -> &'static str {
        "cache"
    }

    fn serve<'a>(
        &'a self,
        req: &'a Request,
        sink: &'a mut DynSink<'a>,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<(), BoxError>> {
        Box::pin(async move {
            let Some(key) = self.key_fn.cache_key(req) else {
                tracing::trace!(method = %req.method(), uri = %req.uri(), "cache: bypass");
                return next.run(req, sink).await;
            };

            if let Some(captured) = self.lookup(&key).await {
                tracing::debug!(cache.key = %key, "cache: hit");
                captured.replay(sink).context("cache: replay stored response")?;
                return Ok(());
            }

            let _guard = match &self.coalescing {
                Some(locks) => {
                    let guard = locks.lock(&key).await;
                    if let Some(captured) = self.lookup(&key).await {
                        tracing::debug!(cache.key = %key, "cache: hit after coalesced miss");
                        captured
                            .replay(sink)
                            .context("cache: replay stored response")?;
                        return Ok(());
                    }
                    Some(guard)
                }
                None => None,
            };

            tracing::debug!(cache.key = %key, "cache: miss");
            let mut capture = ResponseCapture::new(&mut *sink);
            next.run(req, &mut capture).await?;

            if !capture.is_success_status() {
                tracing::debug!(
                    cache.key = %key,
                    status = ?capture.status(),
                    "cache: response not stored",
                );
                return Ok(());
            }

            let entry = self.codec.encode(&capture.into_captured());
            match self.store.set(&key, entry).await {
                Ok(()) => tracing::debug!(cache.key = %key, "cache: entry stored"),
                Err(err) => tracing::error!(cache.key = %key, "cache: failed to store entry: {err}"),
            }
            Ok(())
        })
    }
}
