//! Commands and command results

use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

use super::{Msg, MsgKind, Payload};
use crate::{Error, ErrorKind, Result};

/// Result status on the wire: 0 = OK, 1 = Error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Ok,
    Error,
}

impl StatusCode {
    pub fn as_i32(self) -> i32 {
        match self {
            StatusCode::Ok => 0,
            StatusCode::Error => 1,
        }
    }
}

/// A request message. Results correlate back through its `cmd_id`.
#[derive(Debug, Clone)]
pub struct Cmd(pub(crate) Msg);

impl Cmd {
    /// A plain named command.
    pub fn new(name: impl Into<String>) -> Self {
        Cmd(Msg::new(MsgKind::Cmd, name, Payload::None))
    }

    /// Control command carrying a serialized graph to start.
    pub fn start_graph(graph_json: impl Into<String>) -> Self {
        Cmd(Msg::new(
            MsgKind::CmdStartGraph,
            "start_graph",
            Payload::StartGraph {
                graph_json: graph_json.into(),
                predefined_name: None,
            },
        ))
    }

    /// Control command starting a predefined graph by name.
    pub fn start_predefined_graph(name: impl Into<String>) -> Self {
        Cmd(Msg::new(
            MsgKind::CmdStartGraph,
            "start_graph",
            Payload::StartGraph {
                graph_json: String::new(),
                predefined_name: Some(name.into()),
            },
        ))
    }

    /// Control command stopping a running graph.
    pub fn stop_graph(graph_id: impl Into<String>) -> Self {
        Cmd(Msg::new(
            MsgKind::CmdStopGraph,
            "stop_graph",
            Payload::StopGraph {
                graph_id: graph_id.into(),
            },
        ))
    }

    /// Control command for orderly app shutdown.
    pub fn close_app() -> Self {
        Cmd(Msg::new(MsgKind::CmdCloseApp, "close_app", Payload::CloseApp))
    }

    /// Schedule `times` timeout commands at `timeout_us` intervals.
    pub fn timer(timer_id: u32, timeout_us: u64, times: u32) -> Self {
        Cmd(Msg::new(
            MsgKind::CmdTimer,
            "timer",
            Payload::Timer {
                timer_id,
                timeout_us,
                times,
            },
        ))
    }

    pub(crate) fn from_msg(msg: Msg) -> Self {
        debug_assert!(msg.kind.is_cmd_family());
        Cmd(msg)
    }

    pub(crate) fn into_msg(self) -> Msg {
        self.0
    }
}

impl From<Cmd> for Msg {
    fn from(cmd: Cmd) -> Msg {
        cmd.0
    }
}

impl TryFrom<Msg> for Cmd {
    type Error = Error;

    fn try_from(msg: Msg) -> Result<Cmd> {
        if msg.kind.is_cmd_family() {
            Ok(Cmd(msg))
        } else {
            Err(Error::InvalidArgument(format!(
                "message kind {:?} is not a command",
                msg.kind
            )))
        }
    }
}

impl Deref for Cmd {
    type Target = Msg;
    fn deref(&self) -> &Msg {
        &self.0
    }
}

impl DerefMut for Cmd {
    fn deref_mut(&mut self) -> &mut Msg {
        &mut self.0
    }
}

/// A result flowing backwards along a command's path.
#[derive(Debug, Clone)]
pub struct CmdResult(pub(crate) Msg);

impl CmdResult {
    /// New result pre-filled with the command's correlation.
    ///
    /// The destination is derived from the command's path entry when the
    /// result is returned, never chosen here.
    pub fn from_cmd(status: StatusCode, cmd: &Cmd) -> Self {
        let mut msg = Msg::new(
            MsgKind::CmdResult,
            cmd.name.clone(),
            Payload::CmdResult {
                status,
                is_final: true,
                is_completed: false,
                original_kind: cmd.kind,
            },
        );
        msg.cmd_id = cmd.cmd_id.clone();
        msg.seq_id = cmd.seq_id.clone();
        CmdResult(msg)
    }

    /// Runtime-synthesized error result for a known command header.
    pub(crate) fn from_error(
        cmd_id: &str,
        seq_id: &str,
        name: &str,
        original_kind: MsgKind,
        err: &Error,
    ) -> Self {
        let mut msg = Msg::new(
            MsgKind::CmdResult,
            name,
            Payload::CmdResult {
                status: StatusCode::Error,
                is_final: true,
                // Receivers with a path table recompute completion; for
                // anyone else a synthesized error ends the chain.
                is_completed: true,
                original_kind,
            },
        );
        msg.cmd_id = cmd_id.to_string();
        msg.seq_id = seq_id.to_string();
        // Property writes on a fresh unsealed object root cannot fail.
        let _ = msg.set_property("detail", err.to_string());
        let _ = msg.set_property("code", err.kind().code());
        CmdResult(msg)
    }

    pub fn status_code(&self) -> StatusCode {
        match self.0.payload {
            Payload::CmdResult { status, .. } => status,
            _ => StatusCode::Error,
        }
    }

    /// Whether this is the last result of its correlation chain.
    pub fn is_final(&self) -> bool {
        matches!(self.0.payload, Payload::CmdResult { is_final: true, .. })
    }

    /// Mark a streaming intermediate result (`false` keeps the path alive).
    pub fn set_final(&mut self, final_: bool) -> Result<()> {
        if self.0.sealed {
            return Err(Error::InvalidArgument("result is sealed".into()));
        }
        if let Payload::CmdResult { is_final, .. } = &mut self.0.payload {
            *is_final = final_;
        }
        Ok(())
    }

    /// Runtime-computed: true on the last result reaching the sender in a
    /// fan-out, captured before the result handler runs.
    pub fn is_completed(&self) -> bool {
        matches!(
            self.0.payload,
            Payload::CmdResult {
                is_completed: true,
                ..
            }
        )
    }

    pub(crate) fn set_completed(&mut self, completed: bool) {
        if let Payload::CmdResult { is_completed, .. } = &mut self.0.payload {
            *is_completed = completed;
        }
    }

    /// Kind of the command this result answers.
    pub fn original_cmd_kind(&self) -> MsgKind {
        match self.0.payload {
            Payload::CmdResult { original_kind, .. } => original_kind,
            _ => MsgKind::Cmd,
        }
    }

    /// Shorthand for the conventional `detail` property.
    pub fn detail(&self) -> Option<String> {
        self.get_property("detail")
            .ok()
            .flatten()
            .and_then(|v| v.get_str().ok())
            .map(|s| s.to_string())
    }

    /// Error taxonomy code carried on runtime-synthesized error results.
    pub fn error_code(&self) -> Option<i32> {
        self.get_property("code")
            .ok()
            .flatten()
            .and_then(|v| v.get_i32().ok())
    }

    /// Whether this result carries the given error kind.
    pub fn is_error_kind(&self, kind: ErrorKind) -> bool {
        self.status_code() == StatusCode::Error && self.error_code() == Some(kind.code())
    }

    pub(crate) fn from_msg(msg: Msg) -> Self {
        debug_assert_eq!(msg.kind, MsgKind::CmdResult);
        CmdResult(msg)
    }

    pub(crate) fn into_msg(self) -> Msg {
        self.0
    }
}

impl From<CmdResult> for Msg {
    fn from(result: CmdResult) -> Msg {
        result.0
    }
}

impl TryFrom<Msg> for CmdResult {
    type Error = Error;

    fn try_from(msg: Msg) -> Result<CmdResult> {
        if msg.kind == MsgKind::CmdResult {
            Ok(CmdResult(msg))
        } else {
            Err(Error::InvalidArgument(format!(
                "message kind {:?} is not a command result",
                msg.kind
            )))
        }
    }
}

impl Deref for CmdResult {
    type Target = Msg;
    fn deref(&self) -> &Msg {
        &self.0
    }
}

impl DerefMut for CmdResult {
    fn deref_mut(&mut self) -> &mut Msg {
        &mut self.0
    }
}
