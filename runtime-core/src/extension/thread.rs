//! Extension group threads
//!
//! Each extension group owns exactly one OS thread driving a cooperative
//! event loop (a current-thread tokio runtime). All handlers of all
//! extensions in the group run here; the runtime never invokes two
//! handlers of the same extension concurrently.
//!
//! The loop also runs the path-table timeout sweep and the lock-mode
//! protocol for env proxies: while an outer thread holds lock mode, only
//! that proxy's notifications are processed and everything else is
//! deferred, so the outer thread can treat a burst as atomic.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::addon::AddonRegistry;
use crate::engine::{EngineEvent, EngineShared};
use crate::extension::env::EnvHandle;
use crate::extension::{
    ExtCore, Extension, ExtensionSpec, LifecyclePhase, LifecycleState,
};
use crate::msg::{AudioFrame, Cmd, CmdResult, Data, Msg, MsgKind, VideoFrame};
use crate::path::{CompletionPolicy, ResultAction};
use crate::schema::Direction;
use crate::Error;

/// Closure enqueued by an env proxy; runs on the group thread.
pub(crate) type NotifyFn = Box<dyn FnOnce(&mut EnvHandle<'_>) + Send>;

/// Events a group thread processes.
pub(crate) enum GroupEvent {
    CreateExtensions {
        specs: Vec<ExtensionSpec>,
    },
    Lifecycle(LifecyclePhase),
    Deliver(Msg),
    Notify {
        ext: String,
        proxy_id: u64,
        f: NotifyFn,
    },
    AcquireLock {
        proxy_id: u64,
        granted: oneshot::Sender<()>,
    },
    ReleaseLock {
        proxy_id: u64,
    },
    ProxyClosed {
        ext: String,
    },
    Shutdown,
}

/// Context shared by every env handle created on one group thread.
pub(crate) struct GroupCtx {
    pub engine: Arc<EngineShared>,
    pub inbox: mpsc::UnboundedSender<GroupEvent>,
}

struct ExtEntry {
    /// Taken out while a hook runs so the env handle can borrow the core.
    ext: Option<Box<dyn Extension>>,
    core: ExtCore,
}

/// Spawn the OS thread for one extension group and return its inbox.
pub(crate) fn spawn_group(
    name: &str,
    engine: Arc<EngineShared>,
    registry: Arc<AddonRegistry>,
) -> mpsc::UnboundedSender<GroupEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    let ctx_tx = tx.clone();
    let group = name.to_string();
    let spawned = std::thread::Builder::new()
        .name(format!("weft-group-{group}"))
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    tracing::error!(group = %group, error = %e, "group runtime build failed");
                    return;
                }
            };
            rt.block_on(group_loop(group, engine, registry, ctx_tx, rx));
        });
    if let Err(e) = spawned {
        tracing::error!(error = %e, "failed to spawn group thread");
    }
    tx
}

async fn group_loop(
    group: String,
    engine: Arc<EngineShared>,
    registry: Arc<AddonRegistry>,
    inbox: mpsc::UnboundedSender<GroupEvent>,
    mut rx: mpsc::UnboundedReceiver<GroupEvent>,
) {
    let mut state = GroupLoop {
        ctx: GroupCtx {
            engine: engine.clone(),
            inbox,
        },
        registry,
        order: Vec::new(),
        exts: HashMap::new(),
        lock_owner: None,
        deferred: VecDeque::new(),
        shutting_down: false,
    };

    let mut sweep = tokio::time::interval(engine.path_check_interval);
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        if state.lock_owner.is_none() {
            if let Some(ev) = state.deferred.pop_front() {
                state.handle(ev);
                if state.should_exit() {
                    break;
                }
                continue;
            }
        }
        tokio::select! {
            ev = rx.recv() => {
                match ev {
                    Some(ev) => {
                        if state.defers_while_locked(&ev) {
                            state.deferred.push_back(ev);
                        } else {
                            state.handle(ev);
                            if state.should_exit() {
                                break;
                            }
                        }
                    }
                    None => break,
                }
            }
            _ = sweep.tick() => state.sweep_paths(),
        }
    }
    tracing::debug!(group = %group, "group thread exiting");
}

struct GroupLoop {
    ctx: GroupCtx,
    registry: Arc<AddonRegistry>,
    order: Vec<String>,
    exts: HashMap<String, ExtEntry>,
    lock_owner: Option<u64>,
    deferred: VecDeque<GroupEvent>,
    shutting_down: bool,
}

impl GroupLoop {
    fn defers_while_locked(&self, ev: &GroupEvent) -> bool {
        let Some(owner) = self.lock_owner else {
            return false;
        };
        !matches!(ev,
            GroupEvent::Notify { proxy_id, .. } if *proxy_id == owner)
            && !matches!(ev,
            GroupEvent::ReleaseLock { proxy_id } if *proxy_id == owner)
    }

    fn should_exit(&self) -> bool {
        self.shutting_down
            && self.deferred.is_empty()
            && self
                .exts
                .values()
                .map(|e| e.core.live_proxies)
                .sum::<usize>()
                == 0
    }

    fn handle(&mut self, ev: GroupEvent) {
        match ev {
            GroupEvent::CreateExtensions { specs } => self.create_extensions(specs),
            GroupEvent::Lifecycle(phase) => self.run_lifecycle(phase),
            GroupEvent::Deliver(msg) => self.dispatch_msg(msg),
            GroupEvent::Notify { ext, f, .. } => self.run_notify(&ext, f),
            GroupEvent::AcquireLock { proxy_id, granted } => {
                self.lock_owner = Some(proxy_id);
                let _ = granted.send(());
            }
            GroupEvent::ReleaseLock { proxy_id } => {
                if self.lock_owner == Some(proxy_id) {
                    self.lock_owner = None;
                } else {
                    tracing::warn!(proxy_id, "lock release from non-owner ignored");
                }
            }
            GroupEvent::ProxyClosed { ext } => {
                if let Some(entry) = self.exts.get_mut(&ext) {
                    entry.core.live_proxies = entry.core.live_proxies.saturating_sub(1);
                }
            }
            GroupEvent::Shutdown => {
                self.shutting_down = true;
            }
        }
        self.flush_started();
    }

    fn create_extensions(&mut self, specs: Vec<ExtensionSpec>) {
        for spec in specs {
            match self.registry.create(&spec.addon) {
                Ok(ext) => {
                    let schema = self.registry.schema_for(&spec.addon);
                    let core = ExtCore::new(
                        &spec,
                        &self.ctx.engine.app_uri,
                        &self.ctx.engine.graph_id,
                        schema,
                    );
                    self.order.push(spec.name.clone());
                    self.exts.insert(
                        spec.name,
                        ExtEntry {
                            ext: Some(ext),
                            core,
                        },
                    );
                }
                Err(e) => {
                    let _ = self.ctx.engine.engine_tx.send(EngineEvent::CreateFailed {
                        ext: spec.name,
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    fn run_lifecycle(&mut self, phase: LifecyclePhase) {
        for name in self.order.clone() {
            let ctx = &self.ctx;
            let Some(entry) = self.exts.get_mut(&name) else {
                continue;
            };
            match phase {
                LifecyclePhase::Configure => {
                    entry.core.state = LifecycleState::Configuring;
                    Self::run_hook(entry, ctx, |ext, env| ext.on_configure(env));
                }
                LifecyclePhase::Init => {
                    entry.core.state = LifecycleState::Initing;
                    Self::run_hook(entry, ctx, |ext, env| ext.on_init(env));
                }
                LifecyclePhase::Start => {
                    entry.core.state = LifecycleState::Starting;
                    Self::run_hook(entry, ctx, |ext, env| ext.on_start(env));
                }
                LifecyclePhase::Stop => {
                    entry.core.state = LifecycleState::Stopping;
                    // Timers self-disable when their owner stops.
                    for (_, cancel) in entry.core.timers.drain() {
                        let _ = cancel.send(true);
                    }
                    Self::run_hook(entry, ctx, |ext, env| ext.on_stop(env));
                }
                LifecyclePhase::Deinit => {
                    entry.core.state = LifecycleState::Deiniting;
                    Self::run_hook(entry, ctx, |ext, env| ext.on_deinit(env));
                }
            }
        }
    }

    fn run_hook(
        entry: &mut ExtEntry,
        ctx: &GroupCtx,
        f: impl FnOnce(&mut dyn Extension, &mut EnvHandle<'_>),
    ) {
        let Some(mut ext) = entry.ext.take() else {
            tracing::error!(extension = %entry.core.name, "re-entrant hook dispatch refused");
            return;
        };
        {
            let mut env = EnvHandle {
                core: &mut entry.core,
                ctx,
            };
            f(ext.as_mut(), &mut env);
        }
        entry.ext = Some(ext);
    }

    fn run_notify(&mut self, ext: &str, f: NotifyFn) {
        let ctx = &self.ctx;
        let Some(entry) = self.exts.get_mut(ext) else {
            tracing::warn!(extension = %ext, "notify for unknown extension dropped");
            return;
        };
        let mut env = EnvHandle {
            core: &mut entry.core,
            ctx,
        };
        f(&mut env);
    }

    fn dispatch_msg(&mut self, mut msg: Msg) {
        // The seal protected the sender's copy in flight; the receiver
        // gets an independent mutable view.
        msg.sealed = false;
        let ctx = &self.ctx;
        let Some(ext_name) = msg.dests().first().and_then(|d| d.extension.clone()) else {
            tracing::warn!(name = %msg.name(), "group received message without extension dest");
            return;
        };
        let Some(entry) = self.exts.get_mut(&ext_name) else {
            tracing::warn!(extension = %ext_name, "message for unknown extension on this group");
            return;
        };

        // Results flow through the path table in any lifecycle state;
        // flushed tables simply drop them.
        if msg.kind() == MsgKind::CmdResult {
            Self::deliver_result(entry, ctx, msg);
            return;
        }

        if entry.core.state < LifecycleState::Running {
            entry.core.buffered.push(msg);
            return;
        }

        if entry.core.state >= LifecycleState::Deiniting {
            if msg.kind().is_cmd_family() {
                let err = Error::EnvClosed(format!("extension '{ext_name}' is shutting down"));
                let mut result = CmdResult::from_error(
                    msg.cmd_id(),
                    msg.seq_id(),
                    msg.name(),
                    msg.kind(),
                    &err,
                );
                result.0.src = entry.core.loc.clone();
                result.0.dests = vec![msg.src().clone()];
                ctx.engine.deliver(result.into_msg());
            } else {
                tracing::debug!(extension = %ext_name, name = %msg.name(), "message to deinitializing extension dropped");
            }
            return;
        }

        if let Err(e) = entry.core.schema.check_msg(&msg, Direction::Ingress) {
            if msg.kind().is_cmd_family() {
                let mut result = CmdResult::from_error(
                    msg.cmd_id(),
                    msg.seq_id(),
                    msg.name(),
                    msg.kind(),
                    &e,
                );
                result.0.src = entry.core.loc.clone();
                result.0.dests = vec![msg.src().clone()];
                ctx.engine.deliver(result.into_msg());
            } else {
                tracing::warn!(extension = %ext_name, error = %e, "inbound message failed schema check");
            }
            return;
        }

        match msg.kind() {
            MsgKind::Data => {
                let data = Data::from_msg(msg);
                Self::run_hook(entry, ctx, |ext, env| ext.on_data(env, data));
            }
            MsgKind::AudioFrame => {
                let frame = AudioFrame::from_msg(msg);
                Self::run_hook(entry, ctx, |ext, env| ext.on_audio_frame(env, frame));
            }
            MsgKind::VideoFrame => {
                let frame = VideoFrame::from_msg(msg);
                Self::run_hook(entry, ctx, |ext, env| ext.on_video_frame(env, frame));
            }
            _ => {
                // Command family: record the backward path before the
                // handler runs, it may return a result synchronously.
                entry.core.path_table.add_in_path(&msg);
                let cmd = Cmd::from_msg(msg);
                Self::run_hook(entry, ctx, |ext, env| ext.on_cmd(env, cmd));
            }
        }
    }

    fn deliver_result(entry: &mut ExtEntry, ctx: &GroupCtx, msg: Msg) {
        let mut result = CmdResult::from_msg(msg);
        match entry.core.path_table.on_result(&mut result) {
            ResultAction::Drop => {}
            ResultAction::Deliver { handler, policy } => {
                let cmd_id = result.cmd_id().to_string();
                if let Some(mut handler) = handler {
                    {
                        let mut env = EnvHandle {
                            core: &mut entry.core,
                            ctx,
                        };
                        handler(&mut env, result);
                    }
                    if policy == CompletionPolicy::Streaming {
                        entry.core.path_table.restore_handler(&cmd_id, handler);
                    }
                }
            }
        }
    }

    /// Dispatch messages buffered before an extension reached `Running`.
    /// Runs after every event so the drain happens outside the hook that
    /// called `on_start_done`.
    fn flush_started(&mut self) {
        loop {
            let Some(name) = self
                .order
                .iter()
                .find(|n| {
                    self.exts.get(*n).is_some_and(|e| {
                        e.core.pending_flush && e.core.state == LifecycleState::Running
                    })
                })
                .cloned()
            else {
                break;
            };
            let Some(entry) = self.exts.get_mut(&name) else {
                break;
            };
            entry.core.pending_flush = false;
            let buffered = std::mem::take(&mut entry.core.buffered);
            for msg in buffered {
                self.dispatch_msg(msg);
            }
        }
    }

    fn sweep_paths(&mut self) {
        let timeout = self.ctx.engine.path_timeout;
        for name in self.order.clone() {
            let ctx = &self.ctx;
            let Some(entry) = self.exts.get_mut(&name) else {
                continue;
            };
            // Entries held by a stopping extension are flushed with
            // EnvClosed at deinit, not timed out here.
            if entry.core.state >= LifecycleState::Stopping {
                continue;
            }
            let flushed = entry.core.path_table.sweep(timeout);
            for path in flushed {
                tracing::warn!(
                    extension = %name,
                    cmd = %path.cmd_name,
                    "path entry timed out"
                );
                if let Some(mut handler) = path.handler {
                    let mut result = CmdResult::from_error(
                        &path.cmd_id,
                        &path.seq_id,
                        &path.cmd_name,
                        path.original_kind,
                        &Error::PathTimeout,
                    );
                    result.set_completed(true);
                    let mut env = EnvHandle {
                        core: &mut entry.core,
                        ctx,
                    };
                    handler(&mut env, result);
                }
            }
        }
    }
}
