//! HTTP stream host calls
//!
//! All calls address the active context, which is the stream the host is
//! currently calling into (or the caller of a callout during its callback).
//!
//! Header and trailer maps share one generic surface keyed by [`MapType`];
//! the named functions below cover the four maps of an HTTP stream.

use crate::buffer::{get_buffer, set_buffer};
use crate::error::Result;
use crate::hostcall;
use proxywasm_api::codec::{deserialize_map, serialize_map};
use proxywasm_api::{BufferMode, BufferType, Headers, HostError, MapType, StreamType};

// ============================================================
// Generic header maps
// ============================================================

/// All pairs of a header map, in host order
pub fn get_map(map_type: MapType) -> Result<Headers> {
    let mut data = Vec::new();
    match hostcall::host()
        .get_header_map_pairs(map_type as u32, &mut data)
        .into_result()
    {
        Ok(()) => Ok(deserialize_map(&data)?),
        Err(HostError::NotFound) => Ok(Vec::new()),
        Err(err) => Err(err.into()),
    }
}

/// Replace a whole header map
pub fn set_map<K: AsRef<str>, V: AsRef<str>>(map_type: MapType, pairs: &[(K, V)]) -> Result<()> {
    let pairs: Vec<(&str, &str)> = pairs.iter().map(|(k, v)| (k.as_ref(), v.as_ref())).collect();
    hostcall::host()
        .set_header_map_pairs(map_type as u32, &serialize_map(&pairs))
        .into_result()?;
    Ok(())
}

/// Value of one header; `None` when absent
pub fn get_map_value(map_type: MapType, key: &str) -> Result<Option<String>> {
    let mut data = Vec::new();
    match hostcall::host()
        .get_header_map_value(map_type as u32, key.as_bytes(), &mut data)
        .into_result()
    {
        Ok(()) => Ok(Some(proxywasm_api::codec::deserialize_string(&data)?)),
        Err(HostError::NotFound) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Add a value, keeping existing values of the same key
pub fn add_map_value(map_type: MapType, key: &str, value: &str) -> Result<()> {
    hostcall::host()
        .add_header_map_value(map_type as u32, key.as_bytes(), value.as_bytes())
        .into_result()?;
    Ok(())
}

/// Set a header to a single value, adding it when absent
pub fn replace_map_value(map_type: MapType, key: &str, value: &str) -> Result<()> {
    hostcall::host()
        .replace_header_map_value(map_type as u32, key.as_bytes(), value.as_bytes())
        .into_result()?;
    Ok(())
}

/// Remove every value of a header
pub fn remove_map_value(map_type: MapType, key: &str) -> Result<()> {
    hostcall::host()
        .remove_header_map_value(map_type as u32, key.as_bytes())
        .into_result()?;
    Ok(())
}

macro_rules! header_map {
    (
        $map:expr,
        $what:literal,
        $get_all:ident,
        $set_all:ident,
        $get:ident,
        $add:ident,
        $set:ident,
        $remove:ident
    ) => {
        #[doc = concat!("All ", $what, " in host order")]
        pub fn $get_all() -> Result<Headers> {
            get_map($map)
        }

        #[doc = concat!("Replace all ", $what)]
        pub fn $set_all<K: AsRef<str>, V: AsRef<str>>(pairs: &[(K, V)]) -> Result<()> {
            set_map($map, pairs)
        }

        #[doc = concat!("One value from the ", $what)]
        pub fn $get(name: &str) -> Result<Option<String>> {
            get_map_value($map, name)
        }

        #[doc = concat!("Add a value to the ", $what)]
        pub fn $add(name: &str, value: &str) -> Result<()> {
            add_map_value($map, name, value)
        }

        #[doc = concat!("Set one entry of the ", $what, ", replacing existing values")]
        pub fn $set(name: &str, value: &str) -> Result<()> {
            replace_map_value($map, name, value)
        }

        #[doc = concat!("Remove one entry from the ", $what)]
        pub fn $remove(name: &str) -> Result<()> {
            remove_map_value($map, name)
        }
    };
}

header_map!(
    MapType::HttpRequestHeaders,
    "request headers",
    get_http_request_headers,
    set_http_request_headers,
    get_http_request_header,
    add_http_request_header,
    set_http_request_header,
    remove_http_request_header
);

header_map!(
    MapType::HttpRequestTrailers,
    "request trailers",
    get_http_request_trailers,
    set_http_request_trailers,
    get_http_request_trailer,
    add_http_request_trailer,
    set_http_request_trailer,
    remove_http_request_trailer
);

header_map!(
    MapType::HttpResponseHeaders,
    "response headers",
    get_http_response_headers,
    set_http_response_headers,
    get_http_response_header,
    add_http_response_header,
    set_http_response_header,
    remove_http_response_header
);

header_map!(
    MapType::HttpResponseTrailers,
    "response trailers",
    get_http_response_trailers,
    set_http_response_trailers,
    get_http_response_trailer,
    add_http_response_trailer,
    set_http_response_trailer,
    remove_http_response_trailer
);

// ============================================================
// Bodies
// ============================================================

/// Bytes `[start, start + max_size)` of the buffered request body
pub fn get_http_request_body(start: usize, max_size: usize) -> Result<Option<Vec<u8>>> {
    get_buffer(BufferType::HttpRequestBody, start, max_size)
}

pub fn append_http_request_body(data: &[u8]) -> Result<()> {
    set_buffer(BufferType::HttpRequestBody, BufferMode::Append, data)
}

pub fn prepend_http_request_body(data: &[u8]) -> Result<()> {
    set_buffer(BufferType::HttpRequestBody, BufferMode::Prepend, data)
}

pub fn replace_http_request_body(data: &[u8]) -> Result<()> {
    set_buffer(BufferType::HttpRequestBody, BufferMode::Replace, data)
}

/// Bytes `[start, start + max_size)` of the buffered response body
pub fn get_http_response_body(start: usize, max_size: usize) -> Result<Option<Vec<u8>>> {
    get_buffer(BufferType::HttpResponseBody, start, max_size)
}

pub fn append_http_response_body(data: &[u8]) -> Result<()> {
    set_buffer(BufferType::HttpResponseBody, BufferMode::Append, data)
}

pub fn prepend_http_response_body(data: &[u8]) -> Result<()> {
    set_buffer(BufferType::HttpResponseBody, BufferMode::Prepend, data)
}

pub fn replace_http_response_body(data: &[u8]) -> Result<()> {
    set_buffer(BufferType::HttpResponseBody, BufferMode::Replace, data)
}

// ============================================================
// Stream control
// ============================================================

/// Resume a request paused by a hook
pub fn resume_http_request() -> Result<()> {
    hostcall::host()
        .continue_stream(StreamType::HttpRequest as u32)
        .into_result()?;
    Ok(())
}

/// Resume a response paused by a hook
pub fn resume_http_response() -> Result<()> {
    hostcall::host()
        .continue_stream(StreamType::HttpResponse as u32)
        .into_result()?;
    Ok(())
}

/// Reset the stream without a response
pub fn close_http_stream() -> Result<()> {
    hostcall::host()
        .close_stream(StreamType::HttpRequest as u32)
        .into_result()?;
    Ok(())
}

/// Send a local response in place of the upstream's
///
/// The stream stays paused afterwards; the host still delivers `on_log` and
/// deletes the context. `grpc_status` of `None` means "not a gRPC response".
pub fn send_http_response<K: AsRef<str>, V: AsRef<str>>(
    status_code: u32,
    headers: &[(K, V)],
    body: Option<&[u8]>,
    grpc_status: Option<i32>,
) -> Result<()> {
    let pairs: Vec<(&str, &str)> = headers.iter().map(|(k, v)| (k.as_ref(), v.as_ref())).collect();
    hostcall::host()
        .send_local_response(
            status_code,
            b"",
            body.unwrap_or_default(),
            &serialize_map(&pairs),
            grpc_status.unwrap_or(-1),
        )
        .into_result()?;
    tracing::debug!(status_code, "local response sent");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxywasm_api::Status;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Headersmith {
        request: RefCell<Vec<(String, String)>>,
        responses: RefCell<Vec<(u32, Vec<u8>, Headers, i32)>>,
    }

    impl hostcall::ProxyHost for Headersmith {
        fn get_header_map_pairs(&self, map_type: u32, return_data: &mut Vec<u8>) -> Status {
            if map_type != MapType::HttpRequestHeaders as u32 {
                return Status::NotFound;
            }
            *return_data = serialize_map(self.request.borrow().as_slice());
            Status::Ok
        }

        fn get_header_map_value(
            &self,
            _map_type: u32,
            key: &[u8],
            return_value: &mut Vec<u8>,
        ) -> Status {
            match self.request.borrow().iter().find(|(k, _)| k.as_bytes() == key) {
                Some((_, v)) => {
                    return_value.extend_from_slice(v.as_bytes());
                    Status::Ok
                }
                None => Status::NotFound,
            }
        }

        fn replace_header_map_value(&self, _map_type: u32, key: &[u8], value: &[u8]) -> Status {
            let key = String::from_utf8_lossy(key).into_owned();
            let value = String::from_utf8_lossy(value).into_owned();
            let mut request = self.request.borrow_mut();
            request.retain(|(k, _)| *k != key);
            request.push((key, value));
            Status::Ok
        }

        fn send_local_response(
            &self,
            status_code: u32,
            _details: &[u8],
            body: &[u8],
            headers: &[u8],
            grpc_status: i32,
        ) -> Status {
            let headers = deserialize_map(headers).unwrap_or_default();
            self.responses
                .borrow_mut()
                .push((status_code, body.to_vec(), headers, grpc_status));
            Status::Ok
        }
    }

    #[test]
    fn test_request_headers() {
        let host = Rc::new(Headersmith::default());
        host.request.borrow_mut().push(("k".into(), "v".into()));
        hostcall::install(host.clone());

        set_http_request_header("test", "best").expect("Failed to set header");
        assert_eq!(
            get_http_request_headers().expect("Failed to get headers"),
            vec![("k".to_string(), "v".to_string()), ("test".to_string(), "best".to_string())]
        );
        assert_eq!(
            get_http_request_header("test").expect("Failed to get header"),
            Some("best".to_string())
        );
        assert_eq!(get_http_request_header("missing").expect("lookup"), None);
        // absent map reads as empty
        assert!(get_http_response_trailers().expect("trailers").is_empty());
        hostcall::uninstall();
    }

    #[test]
    fn test_send_http_response() {
        let host = Rc::new(Headersmith::default());
        hostcall::install(host.clone());

        send_http_response(403, &[("x-reason", "denied")], Some(b"invalid payload"), None)
            .expect("Failed to send response");
        assert_eq!(
            *host.responses.borrow(),
            vec![(
                403,
                b"invalid payload".to_vec(),
                vec![("x-reason".to_string(), "denied".to_string())],
                -1
            )]
        );
        hostcall::uninstall();
    }

    #[test]
    fn test_unsupported_call_is_categorized() {
        hostcall::install(Rc::new(Headersmith::default()));
        let err = resume_http_request().expect_err("resume is not implemented");
        assert_eq!(err.host_kind(), Some(proxywasm_api::ErrorKind::Unsupported));
        hostcall::uninstall();
    }
}
