//! Binary encoding of a [`CapturedResponse`], for use as a cache entry.
//!
//! ```plain
//! +-------+-----+-------+--------+------+----------------+----------+----------+
//! | MAGIC | VER | FLAGS | STATUS | NHDR | HEADER ENTRIES | BODY LEN |   BODY   |
//! +-------+-----+-------+--------+------+----------------+----------+----------+
//! |   4   |  1  |   1   |   2    |  4   |    Variable    |    8     | Variable |
//! +-------+-----+-------+--------+------+----------------+----------+----------+
//! ```
//!
//! Each header entry is laid out as:
//!
//! ```plain
//! +----------+------+-----------+-------+
//! | NAME LEN | NAME | VALUE LEN | VALUE |
//! +----------+------+-----------+-------+
//! |    2     | Var. |     4     | Var.  |
//! +----------+------+-----------+-------+
//! ```
//!
//! All integers are big-endian. Multi-valued headers result in one entry per value,
//! in order. `FLAGS` bit 0 is set if the headers were locked, bit 1 if a status
//! is present; `STATUS` is zero when it is not.
//!
//! Decoding is strict: anything that does not match this layout exactly,
//! including trailing bytes, is rejected with a [`CodecError`].

use crate::capture::CapturedResponse;
use crate::headers::HeaderSnapshot;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use std::fmt;

/// Magic bytes every encoded capture starts with.
pub const MAGIC: [u8; 4] = *b"TDCR";

/// Version of the encoding written by [`CaptureCodec::encode`].
pub const VERSION: u8 = 1;

const FLAG_LOCKED: u8 = 0b01;
const FLAG_STATUS: u8 = 0b10;

const FIXED_HEAD_LEN: usize = 4 + 1 + 1 + 2 + 4;
const MIN_HEADER_ENTRY_LEN: usize = 2 + 1 + 4;

#[derive(Debug, Clone, Copy, Default)]
#[non_exhaustive]
/// Encoder and decoder of [`CapturedResponse`]s.
///
/// See the [module docs](crate::codec) for the layout.
pub struct CaptureCodec;

impl CaptureCodec {
    /// Create a new [`CaptureCodec`].
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode the captured response.
    ///
    /// The output only depends on the captured response itself.
    #[must_use]
    pub fn encode(&self, captured: &CapturedResponse) -> Bytes {
        let mut buf = BytesMut::with_capacity(serialized_len(captured));
        write_to_buf(captured, &mut buf);
        buf.freeze()
    }

    /// Decode a captured response previously produced by [`Self::encode`].
    pub fn decode(&self, payload: &[u8]) -> Result<CapturedResponse, CodecError> {
        let mut buf = payload;
        let captured = read_from_buf(&mut buf)?;
        if buf.has_remaining() {
            return Err(CodecError::TrailingBytes(buf.remaining()));
        }
        Ok(captured)
    }
}

fn serialized_len(captured: &CapturedResponse) -> usize {
    let headers: usize = captured
        .headers()
        .iter()
        .map(|(name, value)| 2 + name.as_str().len() + 4 + value.len())
        .sum();
    FIXED_HEAD_LEN + headers + 8 + captured.body().len()
}

fn write_to_buf<B: BufMut>(captured: &CapturedResponse, buf: &mut B) {
    let mut flags = 0;
    if captured.is_locked() {
        flags |= FLAG_LOCKED;
    }
    if captured.status().is_some() {
        flags |= FLAG_STATUS;
    }

    buf.put_slice(&MAGIC);
    buf.put_u8(VERSION);
    buf.put_u8(flags);
    buf.put_u16(captured.status().map(|status| status.as_u16()).unwrap_or_default());

    let headers = captured.headers();
    buf.put_u32(headers.len() as u32);
    for (name, value) in headers {
        // header names are limited to u16::MAX bytes by the http crate
        buf.put_u16(name.as_str().len() as u16);
        buf.put_slice(name.as_str().as_bytes());
        buf.put_u32(value.len() as u32);
        buf.put_slice(value.as_bytes());
    }

    buf.put_u64(captured.body().len() as u64);
    buf.put_slice(captured.body());
}

fn read_from_buf(buf: &mut &[u8]) -> Result<CapturedResponse, CodecError> {
    ensure_remaining(buf, FIXED_HEAD_LEN)?;

    let mut magic = [0u8; 4];
    buf.copy_to_slice(&mut magic);
    if magic != MAGIC {
        return Err(CodecError::BadMagic(magic));
    }

    let version = buf.get_u8();
    if version != VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let flags = buf.get_u8();
    if flags & !(FLAG_LOCKED | FLAG_STATUS) != 0 {
        return Err(CodecError::UnknownFlags(flags));
    }
    let locked = flags & FLAG_LOCKED != 0;

    let raw_status = buf.get_u16();
    let status = if flags & FLAG_STATUS != 0 {
        Some(StatusCode::from_u16(raw_status).map_err(|_| CodecError::InvalidStatus(raw_status))?)
    } else if raw_status != 0 {
        return Err(CodecError::InvalidStatus(raw_status));
    } else {
        None
    };

    let header_count = buf.get_u32() as usize;
    // refuse to even start on counts the payload can not possibly hold
    if header_count > buf.remaining() / MIN_HEADER_ENTRY_LEN {
        return Err(CodecError::Truncated {
            needed: header_count.saturating_mul(MIN_HEADER_ENTRY_LEN),
            remaining: buf.remaining(),
        });
    }

    let mut headers = HeaderMap::new();
    for _ in 0..header_count {
        ensure_remaining(buf, 2)?;
        let name_len = buf.get_u16() as usize;
        ensure_remaining(buf, name_len)?;
        let name = HeaderName::from_bytes(&buf[..name_len])
            .map_err(|_| CodecError::InvalidHeaderName)?;
        buf.advance(name_len);

        ensure_remaining(buf, 4)?;
        let value_len = buf.get_u32() as usize;
        ensure_remaining(buf, value_len)?;
        let value = HeaderValue::from_bytes(&buf[..value_len])
            .map_err(|_| CodecError::InvalidHeaderValue)?;
        buf.advance(value_len);

        headers
            .try_append(name, value)
            .map_err(|_| CodecError::TooManyHeaders)?;
    }

    ensure_remaining(buf, 8)?;
    let body_len = usize::try_from(buf.get_u64()).unwrap_or(usize::MAX);
    ensure_remaining(buf, body_len)?;
    let body = Bytes::copy_from_slice(&buf[..body_len]);
    buf.advance(body_len);

    if !locked && (status.is_some() || !body.is_empty()) {
        return Err(CodecError::Inconsistent);
    }

    Ok(CapturedResponse::from_parts(
        HeaderSnapshot::from(headers),
        locked,
        status,
        body,
    ))
}

fn ensure_remaining(buf: &[u8], needed: usize) -> Result<(), CodecError> {
    if buf.len() < needed {
        return Err(CodecError::Truncated {
            needed,
            remaining: buf.len(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A payload that could not be decoded into a [`CapturedResponse`].
pub enum CodecError {
    /// The payload ended before the structure it announced.
    Truncated {
        /// Amount of bytes required to continue.
        needed: usize,
        /// Amount of bytes left in the payload.
        remaining: usize,
    },
    /// The payload does not start with [`MAGIC`].
    BadMagic([u8; 4]),
    /// The payload was written by an unknown version of the encoding.
    UnsupportedVersion(u8),
    /// The flags byte has bits set that are not defined.
    UnknownFlags(u8),
    /// The status is not a valid http status code,
    /// or is present while the flags say it should not be.
    InvalidStatus(u16),
    /// A header name is not a valid http header name.
    InvalidHeaderName,
    /// A header value is not a valid http header value.
    InvalidHeaderValue,
    /// More headers than a header map can hold.
    TooManyHeaders,
    /// A status or body is present on a capture whose headers were never locked.
    Inconsistent,
    /// Bytes left over after a complete capture was read.
    TrailingBytes(usize),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("corrupt capture payload: ")?;
        match self {
            Self::Truncated { needed, remaining } => {
                write!(f, "truncated: {needed} bytes needed, {remaining} remaining")
            }
            Self::BadMagic(magic) => write!(f, "bad magic {magic:02x?}"),
            Self::UnsupportedVersion(version) => write!(f, "unsupported version {version}"),
            Self::UnknownFlags(flags) => write!(f, "unknown flags {flags:#010b}"),
            Self::InvalidStatus(status) => write!(f, "invalid status {status}"),
            Self::InvalidHeaderName => f.write_str("invalid header name"),
            Self::InvalidHeaderValue => f.write_str("invalid header value"),
            Self::TooManyHeaders => f.write_str("too many headers"),
            Self::Inconsistent => f.write_str("status or body present on an unlocked capture"),
            Self::TrailingBytes(n) => write!(f, "{n} trailing bytes"),
        }
    }
}

impl std::error::Error for CodecError {}
