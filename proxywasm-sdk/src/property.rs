//! Host properties
//!
//! A property is addressed by a path of names (`["request", "path"]`) and
//! holds raw bytes whose layout depends on the property. The typed getters
//! decode those bytes; a value that does not decode is
//! [`Error::Decode`](crate::Error::Decode), distinct from an absent property
//! (`Ok(None)`).

use crate::error::Result;
use crate::hostcall;
use proxywasm_api::codec::{self, CodecError};
use proxywasm_api::HostError;
use std::collections::HashMap;
use std::time::SystemTime;

/// Raw bytes of a property; `None` when the host has no such property
pub fn get_property<S: AsRef<str>>(path: &[S]) -> Result<Option<Vec<u8>>> {
    let mut data = Vec::new();
    match hostcall::host()
        .get_property(&codec::serialize_property_path(path), &mut data)
        .into_result()
    {
        Ok(()) => Ok(Some(data)),
        Err(HostError::NotFound) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

pub fn set_property<S: AsRef<str>>(path: &[S], value: &[u8]) -> Result<()> {
    hostcall::host()
        .set_property(&codec::serialize_property_path(path), value)
        .into_result()?;
    Ok(())
}

fn typed<S, T>(
    path: &[S],
    decode: fn(&[u8]) -> std::result::Result<T, CodecError>,
) -> Result<Option<T>>
where
    S: AsRef<str>,
{
    match get_property(path)? {
        Some(bytes) => Ok(Some(decode(&bytes)?)),
        None => Ok(None),
    }
}

pub fn get_property_string<S: AsRef<str>>(path: &[S]) -> Result<Option<String>> {
    typed(path, codec::deserialize_string)
}

pub fn get_property_bool<S: AsRef<str>>(path: &[S]) -> Result<Option<bool>> {
    typed(path, codec::deserialize_bool)
}

pub fn get_property_u64<S: AsRef<str>>(path: &[S]) -> Result<Option<u64>> {
    typed(path, codec::deserialize_u64)
}

pub fn get_property_f64<S: AsRef<str>>(path: &[S]) -> Result<Option<f64>> {
    typed(path, codec::deserialize_f64)
}

pub fn get_property_timestamp<S: AsRef<str>>(path: &[S]) -> Result<Option<SystemTime>> {
    typed(path, codec::deserialize_timestamp)
}

/// Property holding a map; duplicate keys keep the last value
pub fn get_property_string_map<S: AsRef<str>>(
    path: &[S],
) -> Result<Option<HashMap<String, String>>> {
    typed(path, codec::deserialize_string_map)
}

pub fn get_property_bytes_map<S: AsRef<str>>(path: &[S]) -> Result<Option<Vec<(String, Vec<u8>)>>> {
    typed(path, codec::deserialize_bytes_map)
}

pub fn get_property_string_slice<S: AsRef<str>>(path: &[S]) -> Result<Option<Vec<String>>> {
    typed(path, codec::deserialize_string_slice)
}

pub fn get_property_bytes_slice<S: AsRef<str>>(path: &[S]) -> Result<Option<Vec<Vec<u8>>>> {
    typed(path, codec::deserialize_bytes_slice)
}

/// Property packed as `{0x00, len, bytes}` records, as used by node metadata
pub fn get_property_length_prefixed<S: AsRef<str>>(path: &[S]) -> Result<Option<Vec<String>>> {
    typed(path, codec::deserialize_length_prefixed)
}
