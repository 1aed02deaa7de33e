//! Weft Runtime Core - wire-format-agnostic dataflow engine
//!
//! This crate provides the core runtime for Weft graphs: independent
//! user-written **extensions** declare typed message handlers, a
//! **graph** wires them together, and the runtime delivers commands
//! (request/response with streaming results), data, and audio/video
//! frames between them, across threads and across processes.
//!
//! # Architecture
//!
//! Runtime-core is a pure library that:
//! - Defines the message model and property value system
//! - Routes command results backwards through per-extension path tables
//! - Runs one OS thread per extension group with a cooperative loop
//! - Hosts graph engines and the app-level control plane
//! - Has ZERO wire-format dependencies; transports implement `WireCodec`
//!
//! Transport crates (e.g. `weft-msgpack`) depend on runtime-core,
//! implement the codec, and register under their URI scheme.
//!
//! # Example
//!
//! ```no_run
//! use weft_runtime_core::addon::AddonRegistry;
//! use weft_runtime_core::app::{App, AppConfig};
//! use weft_runtime_core::transport::CodecRegistry;
//!
//! # async fn boot() -> weft_runtime_core::Result<()> {
//! let config = AppConfig::new("msgpack://127.0.0.1:8001/");
//! let addons = AddonRegistry::new();
//! let codecs = CodecRegistry::new();
//! let app = App::new(config, addons, codecs)?;
//! app.run().await
//! # }
//! ```

#![warn(clippy::all)]

pub mod addon;
pub mod app;
pub mod engine;
pub mod extension;
pub mod graph;
pub mod msg;
pub mod path;
pub mod schema;
pub mod transport;
pub mod value;

mod error;
mod timer;

pub use error::{Error, ErrorKind, Result};

// Convenience re-exports for the common surface.
pub use addon::{AddonRegistry, ExtensionAddon};
pub use app::{App, AppConfig, AppHandle};
pub use extension::{EnvHandle, EnvProxy, Extension};
pub use graph::GraphDefinition;
pub use msg::{AudioFrame, Cmd, CmdResult, Data, Loc, Msg, MsgKind, StatusCode, VideoFrame};
pub use schema::Schema;
pub use value::Value;

/// Initialize default logging for embedding processes and tests.
///
/// Apps configure logging from their own property bag; this is the
/// plain env-filter fallback.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}
