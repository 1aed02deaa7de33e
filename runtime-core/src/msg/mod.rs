//! Message model
//!
//! A `Msg` is the unit the runtime routes: commands (with correlated
//! results), unidirectional data, and audio/video frames. User code holds
//! a unique owning handle; `send_*` moves the handle into the runtime,
//! fan-out performs explicit deep clones of the property bag, and frame
//! payload buffers stay shared by reference (`Bytes`).

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value::Value;
use crate::{Error, Result};

pub mod cmd;
pub mod frame;
pub mod loc;

pub use cmd::{Cmd, CmdResult, StatusCode};
pub use frame::{AudioFrame, Data, PixelFormat, VideoFrame};
pub use loc::Loc;

/// Message kinds the runtime routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MsgKind {
    Cmd,
    CmdResult,
    CmdStartGraph,
    CmdStopGraph,
    CmdCloseApp,
    CmdTimer,
    CmdTimeout,
    Data,
    AudioFrame,
    VideoFrame,
}

impl MsgKind {
    /// Command-family kinds correlate with results through the path table.
    pub fn is_cmd_family(self) -> bool {
        matches!(
            self,
            MsgKind::Cmd
                | MsgKind::CmdStartGraph
                | MsgKind::CmdStopGraph
                | MsgKind::CmdCloseApp
                | MsgKind::CmdTimer
                | MsgKind::CmdTimeout
        )
    }

    /// Wire representation (`original_cmd_type` field on results).
    pub fn as_i32(self) -> i32 {
        match self {
            MsgKind::Cmd => 1,
            MsgKind::CmdResult => 2,
            MsgKind::CmdStartGraph => 3,
            MsgKind::CmdStopGraph => 4,
            MsgKind::CmdCloseApp => 5,
            MsgKind::CmdTimer => 6,
            MsgKind::CmdTimeout => 7,
            MsgKind::Data => 8,
            MsgKind::AudioFrame => 9,
            MsgKind::VideoFrame => 10,
        }
    }
}

/// Kind-specific message body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Payload {
    /// Plain commands and data carry everything in the property bag.
    None,
    CmdResult {
        status: StatusCode,
        is_final: bool,
        is_completed: bool,
        original_kind: MsgKind,
    },
    Data {
        buf: Bytes,
    },
    AudioFrame {
        buf: Bytes,
        sample_rate: u32,
        channels: u32,
        samples_per_channel: u32,
        timestamp_us: u64,
    },
    VideoFrame {
        buf: Bytes,
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        timestamp_us: u64,
    },
    StartGraph {
        /// Serialized graph definition (JSON)
        graph_json: String,
        /// Predefined graph name when starting by name
        predefined_name: Option<String>,
    },
    StopGraph {
        graph_id: String,
    },
    CloseApp,
    Timer {
        timer_id: u32,
        timeout_us: u64,
        times: u32,
    },
    Timeout {
        timer_id: u32,
    },
}

/// The routed message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Msg {
    pub(crate) kind: MsgKind,
    pub(crate) name: String,
    pub(crate) src: Loc,
    pub(crate) dests: Vec<Loc>,
    pub(crate) properties: Value,
    pub(crate) msg_id: String,
    /// Correlation: a command's own id; copied onto its results.
    pub(crate) cmd_id: String,
    /// Client-supplied correlation, preserved across hops.
    pub(crate) seq_id: String,
    pub(crate) payload: Payload,
    #[serde(skip)]
    pub(crate) sealed: bool,
}

impl Msg {
    pub(crate) fn new(kind: MsgKind, name: impl Into<String>, payload: Payload) -> Self {
        let cmd_id = if kind.is_cmd_family() {
            Uuid::new_v4().to_string()
        } else {
            String::new()
        };
        Msg {
            kind,
            name: name.into(),
            src: Loc::default(),
            dests: Vec::new(),
            properties: Value::object(),
            msg_id: Uuid::new_v4().to_string(),
            cmd_id,
            seq_id: String::new(),
            payload,
            sealed: false,
        }
    }

    pub fn kind(&self) -> MsgKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the message (used by connection-level name mapping).
    pub fn set_name(&mut self, name: impl Into<String>) -> Result<()> {
        self.check_unsealed()?;
        self.name = name.into();
        Ok(())
    }

    pub fn src(&self) -> &Loc {
        &self.src
    }

    pub fn dests(&self) -> &[Loc] {
        &self.dests
    }

    /// Address an explicit destination, bypassing the connection table.
    pub fn add_dest(&mut self, dest: Loc) -> Result<()> {
        self.check_unsealed()?;
        self.dests.push(dest);
        Ok(())
    }

    /// Drop all explicit destinations.
    pub fn clear_dests(&mut self) -> Result<()> {
        self.check_unsealed()?;
        self.dests.clear();
        Ok(())
    }

    pub fn msg_id(&self) -> &str {
        &self.msg_id
    }

    pub fn cmd_id(&self) -> &str {
        &self.cmd_id
    }

    pub fn seq_id(&self) -> &str {
        &self.seq_id
    }

    pub fn set_seq_id(&mut self, seq_id: impl Into<String>) -> Result<()> {
        self.check_unsealed()?;
        self.seq_id = seq_id.into();
        Ok(())
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Read a property by dotted path.
    pub fn get_property(&self, path: &str) -> Result<Option<&Value>> {
        self.properties.get_path(path)
    }

    /// Write a property by dotted path, creating intermediate containers.
    pub fn set_property(&mut self, path: &str, value: impl Into<Value>) -> Result<()> {
        self.check_unsealed()?;
        self.properties.set_path(path, value.into())
    }

    /// Load the whole property bag from a JSON string.
    pub fn set_properties_from_json(&mut self, json: &str) -> Result<()> {
        self.check_unsealed()?;
        let parsed = crate::value::json::parse(json)?;
        if !parsed.is_object() {
            return Err(Error::InvalidArgument(
                "message properties must be a JSON object".into(),
            ));
        }
        self.properties = parsed;
        Ok(())
    }

    /// Render the property bag as JSON.
    pub fn properties_to_json(&self) -> Result<String> {
        crate::value::json::to_string(&self.properties)
    }

    pub(crate) fn properties(&self) -> &Value {
        &self.properties
    }

    pub(crate) fn properties_mut(&mut self) -> &mut Value {
        &mut self.properties
    }

    /// Freeze the message; the runtime calls this when a send is accepted.
    pub(crate) fn seal(&mut self) {
        self.sealed = true;
    }

    fn check_unsealed(&self) -> Result<()> {
        if self.sealed {
            Err(Error::InvalidArgument(
                "message is sealed; it was already moved into a send".into(),
            ))
        } else {
            Ok(())
        }
    }

    /// Independent copy for per-destination fan-out.
    ///
    /// Property trees are deep-cloned so destinations cannot observe each
    /// other's mutations; frame payload buffers are shared by reference
    /// because they are immutable once sent.
    pub(crate) fn clone_for_route(&self) -> Msg {
        let mut copy = self.clone();
        copy.sealed = false;
        copy
    }
}
