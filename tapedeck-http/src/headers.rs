//! Independent copies of multi-valued header maps.
//!
//! A [`HeaderSnapshot`] is what a response capture freezes its headers into:
//! once taken, nothing done to the source map is visible through the snapshot,
//! and nothing done to a map it was written onto is visible back.

use http::HeaderMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// An independent copy of a [`HeaderMap`].
///
/// Header names are case-insensitive, and every name maps to an ordered
/// sequence of values, which is preserved by [`HeaderSnapshot::capture`] and
/// [`HeaderSnapshot::overwrite_onto`].
pub struct HeaderSnapshot(HeaderMap);

impl HeaderSnapshot {
    /// Deep copy the given header map into a new [`HeaderSnapshot`].
    #[must_use]
    pub fn capture(source: &HeaderMap) -> Self {
        Self(clone_headers(source))
    }

    /// Replace the full contents of `destination` with this snapshot.
    ///
    /// Every key present in `destination` is removed first,
    /// after which all key/value-sequences of the snapshot are inserted.
    /// Calling it more than once with the same snapshot results in the same state.
    pub fn overwrite_onto(&self, destination: &mut HeaderMap) {
        overwrite_headers(destination, &self.0);
    }

    /// Read-only view of the snapshotted headers.
    #[must_use]
    pub fn as_map(&self) -> &HeaderMap {
        &self.0
    }

    /// Consume the snapshot into its header map.
    #[must_use]
    pub fn into_map(self) -> HeaderMap {
        self.0
    }

    /// Total amount of header values, counting every value of multi-valued names.
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.0.len()
    }
}

impl From<HeaderMap> for HeaderSnapshot {
    fn from(value: HeaderMap) -> Self {
        Self(value)
    }
}

/// Copy every name and value of `source` into a new, independent [`HeaderMap`].
#[must_use]
pub fn clone_headers(source: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(source.keys_len());
    for (name, value) in source {
        headers.append(name.clone(), value.clone());
    }
    headers
}

/// Clear `destination` and insert every name and value of `source` into it.
pub fn overwrite_headers(destination: &mut HeaderMap, source: &HeaderMap) {
    destination.clear();
    for (name, value) in source {
        destination.append(name.clone(), value.clone());
    }
}
