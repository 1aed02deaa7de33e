//! MessagePack transport for Weft
//!
//! Implements the runtime's `WireCodec` seam with MessagePack framing
//! and provides a small framed TCP client used by integration tests and
//! controller processes. Registers under the `msgpack` URI scheme, so
//! apps bound to `msgpack://host:port/` speak this codec.

use bytes::Bytes;
use std::sync::Arc;

use weft_runtime_core::msg::Msg;
use weft_runtime_core::transport::{CodecRegistry, WireCodec};
use weft_runtime_core::{Error, Result};

pub mod client;

pub use client::MsgpackClient;

/// MessagePack message codec.
pub struct MsgpackCodec;

impl WireCodec for MsgpackCodec {
    fn scheme(&self) -> &str {
        "msgpack"
    }

    fn encode(&self, msg: &Msg) -> Result<Bytes> {
        rmp_serde::to_vec_named(msg)
            .map(Bytes::from)
            .map_err(|e| Error::Codec(format!("msgpack encode: {e}")))
    }

    fn decode(&self, frame: &[u8]) -> Result<Msg> {
        rmp_serde::from_slice(frame).map_err(|e| Error::Codec(format!("msgpack decode: {e}")))
    }
}

/// Codec registry with the msgpack codec pre-registered.
pub fn codec_registry() -> CodecRegistry {
    let mut registry = CodecRegistry::new();
    registry.register(Arc::new(MsgpackCodec));
    registry
}
