//! Extension runtime
//!
//! An extension is a user-implemented unit with lifecycle hooks and typed
//! message handlers. Each extension belongs to an extension group; all
//! extensions of a group run on one OS thread and never see two of their
//! handlers execute concurrently.
//!
//! Lifecycle: `on_configure → on_init → on_start → on_stop → on_deinit`,
//! each acknowledged by exactly one matching `on_*_done` call on the env
//! handle. Incoming messages buffer until the extension is running.

use std::collections::HashMap;

use tokio::sync::watch;

use crate::msg::{AudioFrame, Cmd, CmdResult, Data, Loc, Msg, StatusCode, VideoFrame};
use crate::path::PathTable;
use crate::schema::Schema;
use crate::value::Value;

pub mod env;
pub mod proxy;
pub mod thread;

pub use env::EnvHandle;
pub use proxy::EnvProxy;

/// Result handler registered with `send_cmd`; invoked once per arriving
/// result, possibly many times for streaming results.
pub type ResultHandler = Box<dyn FnMut(&mut EnvHandle<'_>, CmdResult) + Send + 'static>;

/// Observable lifecycle states of one extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    Created,
    Configuring,
    Configured,
    Initing,
    Inited,
    Starting,
    Running,
    Stopping,
    Stopped,
    Deiniting,
    Deinited,
}

/// Lifecycle phases broadcast by the engine; each maps onto one hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Configure,
    Init,
    Start,
    Stop,
    Deinit,
}

/// User-implemented extension.
///
/// Default lifecycle hooks acknowledge immediately; the default command
/// handler answers with an OK result so unhandled commands do not hang
/// their sender's path entry.
pub trait Extension: 'static {
    fn on_configure(&mut self, env: &mut EnvHandle<'_>) {
        env.on_configure_done();
    }

    fn on_init(&mut self, env: &mut EnvHandle<'_>) {
        env.on_init_done();
    }

    fn on_start(&mut self, env: &mut EnvHandle<'_>) {
        env.on_start_done();
    }

    fn on_stop(&mut self, env: &mut EnvHandle<'_>) {
        env.on_stop_done();
    }

    fn on_deinit(&mut self, env: &mut EnvHandle<'_>) {
        env.on_deinit_done();
    }

    fn on_cmd(&mut self, env: &mut EnvHandle<'_>, cmd: Cmd) {
        let result = CmdResult::from_cmd(StatusCode::Ok, &cmd);
        if let Err(e) = env.return_result(result, &cmd) {
            tracing::warn!(extension = %env.extension_name(), error = %e, "default on_cmd could not return a result");
        }
    }

    fn on_data(&mut self, _env: &mut EnvHandle<'_>, _data: Data) {}

    fn on_audio_frame(&mut self, _env: &mut EnvHandle<'_>, _frame: AudioFrame) {}

    fn on_video_frame(&mut self, _env: &mut EnvHandle<'_>, _frame: VideoFrame) {}
}

/// Instantiation recipe for one extension, derived from a graph node.
#[derive(Debug, Clone)]
pub(crate) struct ExtensionSpec {
    pub name: String,
    pub group: String,
    pub addon: String,
    pub property: Value,
}

/// Runtime state of one extension, owned by its group thread.
///
/// Split off from the user `Extension` object so the env handle can
/// borrow the state mutably while a hook holds `&mut self`.
pub(crate) struct ExtCore {
    pub name: String,
    pub loc: Loc,
    pub state: LifecycleState,
    pub props: Value,
    pub schema: Schema,
    pub path_table: PathTable<ResultHandler>,
    /// Messages held back until the extension reaches `Running`.
    pub buffered: Vec<Msg>,
    /// Set by `on_start_done`; the group loop drains `buffered` once the
    /// current hook returns.
    pub pending_flush: bool,
    /// Armed timers by timer id; dropping the sender cancels the task.
    pub timers: HashMap<u32, watch::Sender<bool>>,
    pub live_proxies: usize,
}

impl ExtCore {
    pub fn new(spec: &ExtensionSpec, app_uri: &str, graph_id: &str, schema: Schema) -> Self {
        ExtCore {
            name: spec.name.clone(),
            loc: Loc {
                app_uri: Some(app_uri.to_string()),
                graph_id: Some(graph_id.to_string()),
                group: Some(spec.group.clone()),
                extension: Some(spec.name.clone()),
            },
            state: LifecycleState::Created,
            props: spec.property.clone(),
            schema,
            path_table: PathTable::new(),
            buffered: Vec::new(),
            pending_flush: false,
            timers: HashMap::new(),
            live_proxies: 0,
        }
    }

    /// Sends stay legal through the `on_deinit` hook and are rejected
    /// once `on_deinit_done` has been called.
    pub fn is_open(&self) -> bool {
        self.state < LifecycleState::Deinited
    }
}
