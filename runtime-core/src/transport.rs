//! Wire codec abstraction
//!
//! The core consumes a framed byte stream and produces/consumes in-memory
//! messages; the actual packing format lives in transport crates. A codec
//! registers under the URI scheme it serves (`msgpack://...` picks the
//! codec registered as `msgpack`).

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

use crate::msg::Msg;
use crate::{Error, Result};

/// Encode/decode one message to/from a wire frame.
///
/// Framing (length prefixes) is handled by the remote layer; a codec only
/// sees whole frames.
pub trait WireCodec: Send + Sync {
    /// URI scheme this codec serves.
    fn scheme(&self) -> &str;

    fn encode(&self, msg: &Msg) -> Result<Bytes>;

    fn decode(&self, frame: &[u8]) -> Result<Msg>;
}

/// Codecs keyed by URI scheme.
#[derive(Default, Clone)]
pub struct CodecRegistry {
    codecs: HashMap<String, Arc<dyn WireCodec>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, codec: Arc<dyn WireCodec>) {
        self.codecs.insert(codec.scheme().to_string(), codec);
    }

    /// Codec for a full app URI such as `msgpack://127.0.0.1:8001/`.
    pub fn for_uri(&self, uri: &str) -> Result<Arc<dyn WireCodec>> {
        let parsed = url::Url::parse(uri)
            .map_err(|e| Error::InvalidArgument(format!("invalid app uri '{uri}': {e}")))?;
        self.for_scheme(parsed.scheme())
    }

    pub fn for_scheme(&self, scheme: &str) -> Result<Arc<dyn WireCodec>> {
        self.codecs.get(scheme).cloned().ok_or_else(|| {
            Error::InvalidArgument(format!("no wire codec registered for scheme '{scheme}'"))
        })
    }
}

/// Split an app URI into its bind/dial address.
pub fn uri_host_port(uri: &str) -> Result<(String, u16)> {
    let parsed = url::Url::parse(uri)
        .map_err(|e| Error::InvalidArgument(format!("invalid app uri '{uri}': {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| Error::InvalidArgument(format!("app uri '{uri}' has no host")))?
        .to_string();
    let port = parsed
        .port()
        .ok_or_else(|| Error::InvalidArgument(format!("app uri '{uri}' has no port")))?;
    Ok((host, port))
}
