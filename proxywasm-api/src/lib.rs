//! proxywasm-api: Shared ABI definitions for the Proxy-Wasm SDK
//!
//! This crate defines the contract between a guest module and a Proxy-Wasm
//! host (ABI v0.2.1): status codes, hook return values, map/buffer/stream
//! selectors, and the byte layouts used to pass composite values.
//! It performs no I/O; both the guest SDK and the host emulator build on it.

pub mod codec;
pub mod error;
pub mod types;

pub use codec::CodecError;
pub use error::{ErrorKind, HostError};
pub use types::{
    Action, BufferMode, BufferType, LogLevel, MapType, MetricType, PeerType, Status, StreamType,
    BUFFER_SENTINEL,
};

/// ABI version implemented by this crate, exported as `proxy_abi_version_0_2_1`
pub const ABI_VERSION: &str = "0.2.1";

/// Header or trailer list as delivered by the host, in wire order
pub type Headers = Vec<(String, String)>;
