//! Wire codecs for composite values passed across the host boundary
//!
//! The host ABI only moves flat byte buffers, so header maps, property paths
//! and property values are packed with the layouts below. All integers are
//! little-endian.
//!
//! | Codec | Layout |
//! |-------|--------|
//! | map | `u32 n` `{u32 klen, u32 vlen}×n` `{key 0x00 value 0x00}×n` |
//! | property path | segments joined by `0x00`, no trailing separator |
//! | length-prefixed slice | `{0x00, u8 len, bytes}×n` |
//! | string slice | `u32 n` `{u64 len}×n` `{bytes 0x00 0x00}×n` |
//! | bool / u64 / f64 / timestamp | 1 byte / 8 bytes / 8 bytes / `i64` ns since epoch |

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Errors produced while decoding a wire buffer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("buffer truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("invalid UTF-8 in decoded string")]
    InvalidUtf8,

    #[error("string of {len} bytes exceeds the 255-byte length prefix")]
    StringTooLong { len: usize },

    #[error("expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Forward-only cursor over an encoded buffer
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if n > self.remaining() {
            return Err(CodecError::Truncated {
                needed: n,
                available: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(fixed::<8>(self.take(8)?)?))
    }

    /// Fail early when a declared element count cannot possibly fit
    fn ensure(&self, count: usize, unit: usize) -> Result<(), CodecError> {
        let needed = count.checked_mul(unit).unwrap_or(usize::MAX);
        if needed > self.remaining() {
            return Err(CodecError::Truncated {
                needed,
                available: self.remaining(),
            });
        }
        Ok(())
    }
}

fn fixed<const N: usize>(bytes: &[u8]) -> Result<[u8; N], CodecError> {
    bytes.try_into().map_err(|_| CodecError::InvalidLength {
        expected: N,
        actual: bytes.len(),
    })
}

fn utf8(bytes: &[u8]) -> Result<String, CodecError> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| CodecError::InvalidUtf8)
}

// ============================================================
// Map
// ============================================================

/// Encode an ordered list of key/value pairs
///
/// Values may be text or raw bytes; both use the same layout. An empty map
/// encodes as four zero bytes.
pub fn serialize_map<K, V>(pairs: &[(K, V)]) -> Vec<u8>
where
    K: AsRef<str>,
    V: AsRef<[u8]>,
{
    let payload: usize = pairs
        .iter()
        .map(|(k, v)| k.as_ref().len() + v.as_ref().len() + 2)
        .sum();
    let mut out = Vec::with_capacity(4 + pairs.len() * 8 + payload);

    out.extend_from_slice(&(pairs.len() as u32).to_le_bytes());
    for (k, v) in pairs {
        out.extend_from_slice(&(k.as_ref().len() as u32).to_le_bytes());
        out.extend_from_slice(&(v.as_ref().len() as u32).to_le_bytes());
    }
    for (k, v) in pairs {
        out.extend_from_slice(k.as_ref().as_bytes());
        out.push(0);
        out.extend_from_slice(v.as_ref());
        out.push(0);
    }
    out
}

fn decode_map_raw(bytes: &[u8]) -> Result<Vec<(&[u8], &[u8])>, CodecError> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    let mut reader = Reader::new(bytes);
    let count = reader.u32()? as usize;
    reader.ensure(count, 8)?;

    let mut sizes = Vec::with_capacity(count);
    for _ in 0..count {
        let key_len = reader.u32()? as usize;
        let value_len = reader.u32()? as usize;
        sizes.push((key_len, value_len));
    }

    let mut pairs = Vec::with_capacity(count);
    for (key_len, value_len) in sizes {
        let key = reader.take(key_len)?;
        reader.take(1)?;
        let value = reader.take(value_len)?;
        reader.take(1)?;
        pairs.push((key, value));
    }
    Ok(pairs)
}

/// Decode a map into ordered string pairs; duplicates are preserved
pub fn deserialize_map(bytes: &[u8]) -> Result<Vec<(String, String)>, CodecError> {
    decode_map_raw(bytes)?
        .into_iter()
        .map(|(k, v)| Ok((utf8(k)?, utf8(v)?)))
        .collect()
}

/// Decode a map whose values are raw bytes
pub fn deserialize_bytes_map(bytes: &[u8]) -> Result<Vec<(String, Vec<u8>)>, CodecError> {
    decode_map_raw(bytes)?
        .into_iter()
        .map(|(k, v)| Ok((utf8(k)?, v.to_vec())))
        .collect()
}

/// Decode a map into an unordered lookup table; the last duplicate wins
pub fn deserialize_string_map(bytes: &[u8]) -> Result<HashMap<String, String>, CodecError> {
    Ok(deserialize_map(bytes)?.into_iter().collect())
}

// ============================================================
// Property path
// ============================================================

/// Join path segments with a single NUL separator
pub fn serialize_property_path<S: AsRef<str>>(path: &[S]) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, segment) in path.iter().enumerate() {
        if i > 0 {
            out.push(0);
        }
        out.extend_from_slice(segment.as_ref().as_bytes());
    }
    out
}

/// Split a NUL-joined path back into segments
///
/// An empty buffer decodes to an empty path. The path `[""]` also encodes to
/// an empty buffer, so it comes back as `[]`.
pub fn deserialize_property_path(bytes: &[u8]) -> Result<Vec<String>, CodecError> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    bytes.split(|b| *b == 0).map(utf8).collect()
}

// ============================================================
// Length-prefixed string slice
// ============================================================

/// Encode strings as `{0x00, len, bytes}`; strings over 255 bytes are rejected
pub fn serialize_length_prefixed<S: AsRef<str>>(items: &[S]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    for item in items {
        let bytes = item.as_ref().as_bytes();
        let len = u8::try_from(bytes.len())
            .map_err(|_| CodecError::StringTooLong { len: bytes.len() })?;
        out.push(0);
        out.push(len);
        out.extend_from_slice(bytes);
    }
    Ok(out)
}

pub fn deserialize_length_prefixed(bytes: &[u8]) -> Result<Vec<String>, CodecError> {
    let mut reader = Reader::new(bytes);
    let mut out = Vec::new();
    while reader.remaining() > 0 {
        // leading tag byte carries no information
        reader.u8()?;
        let len = reader.u8()? as usize;
        out.push(utf8(reader.take(len)?)?);
    }
    Ok(out)
}

// ============================================================
// String slice / byte-slice slice
// ============================================================

/// Encode a list of byte strings with `u64` lengths and double-NUL terminators
pub fn serialize_bytes_slice<B: AsRef<[u8]>>(items: &[B]) -> Vec<u8> {
    let payload: usize = items.iter().map(|b| b.as_ref().len() + 2).sum();
    let mut out = Vec::with_capacity(4 + items.len() * 8 + payload);

    out.extend_from_slice(&(items.len() as u32).to_le_bytes());
    for item in items {
        out.extend_from_slice(&(item.as_ref().len() as u64).to_le_bytes());
    }
    for item in items {
        out.extend_from_slice(item.as_ref());
        out.extend_from_slice(&[0, 0]);
    }
    out
}

pub fn deserialize_bytes_slice(bytes: &[u8]) -> Result<Vec<Vec<u8>>, CodecError> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    let mut reader = Reader::new(bytes);
    let count = reader.u32()? as usize;
    reader.ensure(count, 8)?;

    let mut lengths = Vec::with_capacity(count);
    for _ in 0..count {
        let len = usize::try_from(reader.u64()?).map_err(|_| CodecError::Truncated {
            needed: usize::MAX,
            available: reader.remaining(),
        })?;
        lengths.push(len);
    }

    let mut out = Vec::with_capacity(count);
    for len in lengths {
        out.push(reader.take(len)?.to_vec());
        reader.take(2)?;
    }
    Ok(out)
}

pub fn serialize_string_slice<S: AsRef<str>>(items: &[S]) -> Vec<u8> {
    let bytes: Vec<&[u8]> = items.iter().map(|s| s.as_ref().as_bytes()).collect();
    serialize_bytes_slice(&bytes)
}

pub fn deserialize_string_slice(bytes: &[u8]) -> Result<Vec<String>, CodecError> {
    deserialize_bytes_slice(bytes)?
        .into_iter()
        .map(|b| String::from_utf8(b).map_err(|_| CodecError::InvalidUtf8))
        .collect()
}

// ============================================================
// Scalars
// ============================================================

pub fn serialize_bool(value: bool) -> Vec<u8> {
    vec![u8::from(value)]
}

pub fn deserialize_bool(bytes: &[u8]) -> Result<bool, CodecError> {
    Ok(fixed::<1>(bytes)?[0] != 0)
}

pub fn serialize_u64(value: u64) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

pub fn deserialize_u64(bytes: &[u8]) -> Result<u64, CodecError> {
    Ok(u64::from_le_bytes(fixed::<8>(bytes)?))
}

pub fn serialize_f64(value: f64) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

pub fn deserialize_f64(bytes: &[u8]) -> Result<f64, CodecError> {
    Ok(f64::from_le_bytes(fixed::<8>(bytes)?))
}

/// Encode a point in time as signed nanoseconds since the Unix epoch
pub fn serialize_timestamp(value: SystemTime) -> Vec<u8> {
    let nanos: i64 = match value.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_nanos()).unwrap_or(i64::MAX),
        Err(before) => i64::try_from(before.duration().as_nanos())
            .map(|n| -n)
            .unwrap_or(i64::MIN),
    };
    nanos.to_le_bytes().to_vec()
}

pub fn deserialize_timestamp(bytes: &[u8]) -> Result<SystemTime, CodecError> {
    let nanos = i64::from_le_bytes(fixed::<8>(bytes)?);
    let offset = Duration::from_nanos(nanos.unsigned_abs());
    Ok(if nanos >= 0 {
        UNIX_EPOCH + offset
    } else {
        UNIX_EPOCH - offset
    })
}

pub fn deserialize_string(bytes: &[u8]) -> Result<String, CodecError> {
    utf8(bytes)
}
