//! Fan-out of a single response to multiple [`ResponseSink`]s.

use crate::headers::overwrite_headers;
use crate::sink::{FanoutFailure, ResponseSink, SinkError};
use http::{HeaderMap, StatusCode};

#[derive(Debug)]
/// A [`ResponseSink`] that delivers every operation to all of its sinks, in order.
///
/// Headers are buffered in the broadcast itself, and pushed (overwriting)
/// onto every sink right before the first status commit or body write is
/// delivered. Use [`BroadcastSink::finish`] to push them for a response
/// that never wrote anything.
///
/// A failing sink never prevents delivery to the other sinks.
/// All failures of a single operation are reported together as
/// [`SinkError::Fanout`]. Each sink must accept the full body chunk,
/// a sink accepting fewer (or more) bytes is reported as
/// [`SinkError::DivergentWrite`].
pub struct BroadcastSink<S> {
    sinks: Vec<S>,
    headers: HeaderMap,
    committed: bool,
}

impl<S: ResponseSink> BroadcastSink<S> {
    /// Create a new [`BroadcastSink`], delivering to `first` (and any sink added later).
    ///
    /// The buffered headers start as a copy of the headers of `first`.
    pub fn new(mut first: S) -> Self {
        let headers = first.headers_mut().clone();
        Self {
            sinks: vec![first],
            headers,
            committed: false,
        }
    }

    /// Add another sink, delivered to after all sinks added before it.
    #[must_use]
    pub fn with_sink(mut self, sink: S) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Add another sink, delivered to after all sinks added before it.
    pub fn push_sink(&mut self, sink: S) -> &mut Self {
        self.sinks.push(sink);
        self
    }

    /// Amount of sinks delivered to, never zero.
    #[must_use]
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Returns `true` once the status was committed, explicitly or by a write.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Push the buffered headers onto all sinks, if this did not happen yet.
    ///
    /// Only needed for responses that neither committed a status nor wrote a body.
    pub fn finish(&mut self) {
        if !self.committed {
            self.flush_headers();
        }
    }

    /// Give back the sinks, in the order they were added.
    pub fn into_sinks(self) -> Vec<S> {
        self.sinks
    }

    fn flush_headers(&mut self) {
        tracing::trace!(
            sinks = self.sinks.len(),
            header_values = self.headers.len(),
            "broadcast: flush buffered headers"
        );
        for sink in &mut self.sinks {
            overwrite_headers(sink.headers_mut(), &self.headers);
        }
    }

    fn commit(&mut self) {
        self.flush_headers();
        self.committed = true;
    }

    fn fan_out<F>(&mut self, mut op: F) -> Result<(), SinkError>
    where
        F: FnMut(&mut S) -> Result<(), SinkError>,
    {
        let failures: Vec<_> = self
            .sinks
            .iter_mut()
            .enumerate()
            .filter_map(|(sink, target)| {
                op(target)
                    .err()
                    .map(|error| FanoutFailure { sink, error })
            })
            .collect();

        if failures.is_empty() {
            return Ok(());
        }
        tracing::debug!(
            failed = failures.len(),
            sinks = self.sinks.len(),
            "broadcast: delivery failed for one or more sinks"
        );
        Err(SinkError::Fanout(failures))
    }
}

impl<S: ResponseSink> ResponseSink for BroadcastSink<S> {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_status(&mut self, status: StatusCode) -> Result<(), SinkError> {
        if self.committed {
            return Err(SinkError::HeadersAlreadyLocked);
        }
        self.commit();
        self.fan_out(|sink| sink.write_status(status))
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, SinkError> {
        if !self.committed {
            self.commit();
        }
        let expected = data.len();
        self.fan_out(|sink| match sink.write(data)? {
            written if written == expected => Ok(()),
            written => Err(SinkError::DivergentWrite { expected, written }),
        })?;
        Ok(expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{BufferedSink, DynSink};
    use http::HeaderValue;
    use http::header::{CONTENT_TYPE, SERVER};

    #[derive(Debug, Default)]
    struct HalfSink {
        headers: HeaderMap,
        writes: usize,
    }

    impl ResponseSink for HalfSink {
        fn headers_mut(&mut self) -> &mut HeaderMap {
            &mut self.headers
        }

        fn write_status(&mut self, _status: StatusCode) -> Result<(), SinkError> {
            Ok(())
        }

        fn write(&mut self, data: &[u8]) -> Result<usize, SinkError> {
            self.writes += 1;
            Ok(data.len() / 2)
        }
    }

    #[derive(Debug, Default)]
    struct DeadSink {
        headers: HeaderMap,
    }

    impl ResponseSink for DeadSink {
        fn headers_mut(&mut self) -> &mut HeaderMap {
            &mut self.headers
        }

        fn write_status(&mut self, _status: StatusCode) -> Result<(), SinkError> {
            Err(std::io::Error::from(std::io::ErrorKind::ConnectionReset).into())
        }

        fn write(&mut self, _data: &[u8]) -> Result<usize, SinkError> {
            Err(std::io::Error::from(std::io::ErrorKind::ConnectionReset).into())
        }
    }

    #[test]
    fn test_fan_out_to_every_sink() {
        let mut a = BufferedSink::new();
        let mut b = BufferedSink::new();
        let mut c = BufferedSink::new();
        {
            let mut broadcast = BroadcastSink::new(&mut a)
                .with_sink(&mut b)
                .with_sink(&mut c);
            assert_eq!(3, broadcast.sink_count());
            broadcast
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
            broadcast.write_status(StatusCode::CREATED).unwrap();
            assert_eq!(5, broadcast.write(b"hello").unwrap());
            assert_eq!(6, broadcast.write(b" world").unwrap());
        }

        for sink in [a, b, c] {
            let response = sink.into_response();
            assert_eq!(StatusCode::CREATED, response.status());
            assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
            assert_eq!("hello world", response.body());
        }
    }

    #[test]
    fn test_headers_buffered_until_commit() {
        let mut live = BufferedSink::new();
        live.headers_mut()
            .insert(SERVER, HeaderValue::from_static("tapedeck"));
        let mut copy = BufferedSink::new();
        {
            let mut broadcast = BroadcastSink::new(&mut live).with_sink(&mut copy);
            broadcast
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));

            let [live, copy] = broadcast.sinks.as_mut_slice() else {
                panic!("expected two sinks");
            };
            assert!(live.headers_mut().get(CONTENT_TYPE).is_none());
            assert!(copy.headers_mut().is_empty());

            broadcast.write(b"x").unwrap();
            broadcast
                .headers_mut()
                .insert("x-too-late", HeaderValue::from_static("1"));
        }

        for sink in [live, copy] {
            assert_eq!(StatusCode::OK, sink.status().unwrap());
            assert_eq!(sink.headers()[SERVER], "tapedeck");
            assert_eq!(sink.headers()[CONTENT_TYPE], "text/plain");
            assert!(sink.headers().get("x-too-late").is_none());
        }
    }

    #[test]
    fn test_finish_flushes_headers_once() {
        let mut a = BufferedSink::new();
        let mut b = BufferedSink::new();
        let mut broadcast = BroadcastSink::new(&mut a).with_sink(&mut b);
        broadcast
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        broadcast.finish();
        broadcast.finish();
        assert!(!broadcast.is_committed());

        for sink in broadcast.into_sinks() {
            assert_eq!(sink.headers()[CONTENT_TYPE], "text/plain");
            assert!(!sink.is_committed());
        }
    }

    #[test]
    fn test_divergent_write_reported_without_blocking_others() {
        let mut half = HalfSink::default();
        let mut full = BufferedSink::new();
        {
            let mut broadcast = BroadcastSink::new(&mut half as &mut DynSink<'_>)
                .with_sink(&mut full as &mut DynSink<'_>);
            let err = broadcast.write(b"abcd").unwrap_err();
            let SinkError::Fanout(failures) = err else {
                panic!("unexpected error: {err}");
            };
            assert_eq!(1, failures.len());
            assert_eq!(0, failures[0].sink);
            assert!(matches!(
                failures[0].error,
                SinkError::DivergentWrite {
                    expected: 4,
                    written: 2
                }
            ));
        }
        assert_eq!(1, half.writes);
        assert_eq!(b"abcd", full.body());
    }

    #[test]
    fn test_failures_collected_for_every_failing_sink() {
        let mut first = DeadSink::default();
        let mut live = BufferedSink::new();
        let mut last = DeadSink::default();
        {
            let mut broadcast = BroadcastSink::new(&mut first as &mut DynSink<'_>)
                .with_sink(&mut live as &mut DynSink<'_>)
                .with_sink(&mut last as &mut DynSink<'_>);

            let err = broadcast.write_status(StatusCode::ACCEPTED).unwrap_err();
            let SinkError::Fanout(failures) = err else {
                panic!("unexpected error: {err}");
            };
            let failed: Vec<_> = failures.iter().map(|failure| failure.sink).collect();
            assert_eq!(vec![0, 2], failed);
            assert!(
                failures
                    .iter()
                    .all(|failure| matches!(failure.error, SinkError::Io(_)))
            );

            assert!(broadcast.write(b"still delivered").is_err());
        }
        assert_eq!(Some(StatusCode::ACCEPTED), live.status());
        assert_eq!(b"still delivered", live.body());
    }

    #[test]
    fn test_second_status_commit_rejected() {
        let mut a = BufferedSink::new();
        let mut b = BufferedSink::new();
        {
            let mut broadcast = BroadcastSink::new(&mut a).with_sink(&mut b);
            broadcast.write_status(StatusCode::OK).unwrap();
            assert!(
                broadcast
                    .write_status(StatusCode::NOT_FOUND)
                    .unwrap_err()
                    .is_already_locked()
            );
        }
        assert_eq!(Some(StatusCode::OK), a.status());
        assert_eq!(Some(StatusCode::OK), b.status());
    }

    #[test]
    fn test_push_sink() {
        let mut broadcast = BroadcastSink::new(BufferedSink::new());
        broadcast
            .push_sink(BufferedSink::new())
            .push_sink(BufferedSink::new());
        broadcast.write(b"abc").unwrap();

        let sinks = broadcast.into_sinks();
        assert_eq!(3, sinks.len());
        assert!(sinks.iter().all(|sink| sink.body() == b"abc"));
    }
}
