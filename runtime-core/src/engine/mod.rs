//! Graph engine
//!
//! One engine owns one running graph instance: the extension group
//! threads hosting its nodes, the connection table resolving declared
//! message flows, and the lifecycle barriers that walk every extension
//! through configure/init/start (and stop/deinit on the way down).
//!
//! Routing never dispatches inline: local destinations are enqueued onto
//! the target group's inbox even when sender and receiver share a thread,
//! so cyclic graphs cannot recurse on one stack.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};

use crate::addon::AddonRegistry;
use crate::app::AppEvent;
use crate::extension::thread::{spawn_group, GroupEvent};
use crate::extension::{ExtensionSpec, LifecyclePhase};
use crate::graph::{GraphDefinition, MsgConversion};
use crate::msg::{CmdResult, Loc, Msg, MsgKind};
use crate::value::{json, Value};
use crate::{Error, Result};

/// Connection-table bucket per routable message family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum FlowKind {
    Cmd,
    Data,
    AudioFrame,
    VideoFrame,
}

impl FlowKind {
    fn of(kind: MsgKind) -> Option<FlowKind> {
        match kind {
            MsgKind::Cmd => Some(FlowKind::Cmd),
            MsgKind::Data => Some(FlowKind::Data),
            MsgKind::AudioFrame => Some(FlowKind::AudioFrame),
            MsgKind::VideoFrame => Some(FlowKind::VideoFrame),
            _ => None,
        }
    }
}

/// One resolved destination of a connection flow.
#[derive(Clone)]
pub(crate) struct DestRule {
    pub loc: Loc,
    pub conversion: Option<MsgConversion>,
}

/// Index over the graph's declared connections, keyed by
/// `(source extension, flow kind, message name)`.
#[derive(Default)]
pub(crate) struct ConnectionTable {
    flows: HashMap<(String, FlowKind, String), Vec<DestRule>>,
}

impl ConnectionTable {
    fn build(graph: &GraphDefinition, app_uri: &str, graph_id: &str) -> Self {
        let mut flows: HashMap<(String, FlowKind, String), Vec<DestRule>> = HashMap::new();
        for conn in &graph.connections {
            let src_local = match conn.app.as_deref() {
                None => true,
                Some(uri) => uri == app_uri || uri == "localhost",
            };
            if !src_local {
                continue;
            }
            let buckets = [
                (FlowKind::Cmd, &conn.cmd),
                (FlowKind::Data, &conn.data),
                (FlowKind::AudioFrame, &conn.audio_frame),
                (FlowKind::VideoFrame, &conn.video_frame),
            ];
            for (kind, msg_flows) in buckets {
                for flow in msg_flows.iter() {
                    let rules = flow
                        .dest
                        .iter()
                        .map(|dest| DestRule {
                            loc: Loc {
                                app_uri: Some(
                                    dest.app.clone().unwrap_or_else(|| app_uri.to_string()),
                                ),
                                graph_id: Some(graph_id.to_string()),
                                group: None,
                                extension: Some(dest.extension.clone()),
                            },
                            conversion: dest.msg_conversion.clone(),
                        })
                        .collect();
                    flows.insert((conn.extension.clone(), kind, flow.name.clone()), rules);
                }
            }
        }
        ConnectionTable { flows }
    }

    pub fn lookup(&self, src_ext: &str, kind: MsgKind, name: &str) -> Option<&Vec<DestRule>> {
        let flow = FlowKind::of(kind)?;
        self.flows.get(&(src_ext.to_string(), flow, name.to_string()))
    }
}

/// Engine control and lifecycle events.
pub(crate) enum EngineEvent {
    LifecycleAck { ext: String, phase: LifecyclePhase },
    CreateFailed { ext: String, error: String },
    Stop { reply: oneshot::Sender<()> },
}

/// State shared between the engine loop, its group threads, and the
/// connection tasks funnelling messages into the graph.
pub(crate) struct EngineShared {
    pub graph_id: String,
    pub app_uri: String,
    pub conn_table: ConnectionTable,
    /// Local extension name -> owning group name
    pub ext_groups: HashMap<String, String>,
    /// Group name -> group inbox
    pub groups: RwLock<HashMap<String, mpsc::UnboundedSender<GroupEvent>>>,
    pub engine_tx: mpsc::UnboundedSender<EngineEvent>,
    /// Outbound hand-off to the app's remote layer
    pub remote_tx: mpsc::UnboundedSender<Msg>,
    pub app_tx: mpsc::UnboundedSender<AppEvent>,
    pub app_props: Arc<RwLock<Value>>,
    pub path_check_interval: Duration,
    pub path_timeout: Duration,
}

impl EngineShared {
    /// Consult the connection table for an outgoing message.
    pub fn resolve(&self, src_ext: &str, msg: &Msg) -> Vec<DestRule> {
        self.conn_table
            .lookup(src_ext, msg.kind(), msg.name())
            .cloned()
            .unwrap_or_default()
    }

    /// Deliver a routed message to its single destination: a local group
    /// inbox, the app control loop, or the remote layer.
    pub fn deliver(&self, msg: Msg) {
        let Some(dest) = msg.dests().first().cloned() else {
            tracing::warn!(name = %msg.name(), "message without destination dropped");
            return;
        };

        if !dest.is_local_to(&self.app_uri) {
            if self.remote_tx.send(msg).is_err() {
                tracing::warn!(dest = %dest, "remote layer gone, message dropped");
            }
            return;
        }

        // Traffic for a sibling graph goes back through the app layer,
        // which answers GraphNotFound for ids no engine serves.
        if let Some(graph_id) = dest.graph_id.as_deref() {
            if graph_id != self.graph_id {
                if self.app_tx.send(AppEvent::LocalDeliver { msg }).is_err() {
                    tracing::warn!("app loop gone, cross-graph message dropped");
                }
                return;
            }
        }

        let Some(ext) = dest.extension.as_deref() else {
            // App-level control command issued from inside the graph.
            if self.app_tx.send(AppEvent::ControlCmd { msg }).is_err() {
                tracing::warn!("app loop gone, control message dropped");
            }
            return;
        };

        match self.ext_groups.get(ext) {
            Some(group) => {
                let groups = self.groups.read();
                match groups.get(group) {
                    Some(inbox) => {
                        if inbox.send(GroupEvent::Deliver(msg)).is_err() {
                            tracing::warn!(extension = %ext, "group thread gone, message dropped");
                        }
                    }
                    None => {
                        tracing::warn!(extension = %ext, group = %group, "group not running, message dropped")
                    }
                }
            }
            None => self.reject_unknown_extension(ext, msg),
        }
    }

    /// Unknown destination extension: commands get an error result walked
    /// back to the sender, everything else is dropped with a log line.
    fn reject_unknown_extension(&self, ext: &str, msg: Msg) {
        if msg.kind().is_cmd_family() {
            let err = Error::ExtensionInvalid(format!(
                "extension '{ext}' does not exist in graph '{}'",
                self.graph_id
            ));
            let mut result =
                CmdResult::from_error(msg.cmd_id(), msg.seq_id(), msg.name(), msg.kind(), &err);
            result.0.src = Loc::app(self.app_uri.clone()).with_graph(self.graph_id.clone());
            result.0.dests = vec![msg.src().clone()];
            self.deliver(result.into_msg());
        } else {
            tracing::warn!(
                extension = %ext,
                name = %msg.name(),
                "message for unknown extension dropped"
            );
        }
    }

    fn broadcast(&self, make: impl Fn() -> GroupEvent) {
        let groups = self.groups.read();
        for inbox in groups.values() {
            let _ = inbox.send(make());
        }
    }
}

/// Handle the app keeps per running engine.
#[derive(Clone)]
pub(crate) struct EngineHandle {
    pub graph_id: String,
    pub shared: Arc<EngineShared>,
    pub engine_tx: mpsc::UnboundedSender<EngineEvent>,
}

/// Instantiate and start an engine for `graph`, returning once every
/// local extension has reached `Running`.
pub(crate) async fn start_engine(
    app_uri: &str,
    graph: &GraphDefinition,
    graph_id: String,
    registry: Arc<AddonRegistry>,
    app_tx: mpsc::UnboundedSender<AppEvent>,
    remote_tx: mpsc::UnboundedSender<Msg>,
    app_props: Arc<RwLock<Value>>,
    path_check_interval: Duration,
    path_timeout: Duration,
    dedicated_thread: bool,
) -> Result<EngineHandle> {
    let local_nodes = graph.nodes_for_app(app_uri);

    for node in &local_nodes {
        if !registry.has(&node.addon) {
            return Err(Error::ExtensionInvalid(format!(
                "addon '{}' for node '{}' is not registered",
                node.addon, node.name
            )));
        }
    }

    let mut specs_by_group: Vec<(String, Vec<ExtensionSpec>)> = Vec::new();
    let mut ext_groups = HashMap::new();
    for node in &local_nodes {
        let spec = ExtensionSpec {
            name: node.name.clone(),
            group: node.group().to_string(),
            addon: node.addon.clone(),
            property: json::from_json(&node.property),
        };
        ext_groups.insert(node.name.clone(), spec.group.clone());
        match specs_by_group.iter_mut().find(|(g, _)| g == &spec.group) {
            Some((_, specs)) => specs.push(spec),
            None => specs_by_group.push((spec.group.clone(), vec![spec])),
        }
    }
    let total = local_nodes.len();

    let (engine_tx, engine_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(EngineShared {
        graph_id: graph_id.clone(),
        app_uri: app_uri.to_string(),
        conn_table: ConnectionTable::build(graph, app_uri, &graph_id),
        ext_groups,
        groups: RwLock::new(HashMap::new()),
        engine_tx: engine_tx.clone(),
        remote_tx,
        app_tx,
        app_props,
        path_check_interval,
        path_timeout,
    });

    let (ready_tx, ready_rx) = oneshot::channel();
    let loop_shared = shared.clone();
    let loop_fut = engine_loop(
        loop_shared,
        registry,
        specs_by_group,
        total,
        ready_tx,
        engine_rx,
    );

    if dedicated_thread {
        let thread_name = format!("weft-engine-{graph_id}");
        std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(rt) => rt.block_on(loop_fut),
                    Err(e) => tracing::error!(error = %e, "engine runtime build failed"),
                }
            })
            .map_err(|e| Error::Io(e))?;
    } else {
        tokio::spawn(loop_fut);
    }

    ready_rx
        .await
        .map_err(|_| Error::Graph(format!("engine for graph '{graph_id}' exited during start")))?
        .map(|_| EngineHandle {
            graph_id,
            shared,
            engine_tx,
        })
}

async fn await_phase(
    rx: &mut mpsc::UnboundedReceiver<EngineEvent>,
    phase: LifecyclePhase,
    total: usize,
    pending_stops: &mut Vec<oneshot::Sender<()>>,
) -> Result<()> {
    let mut acks = 0;
    while acks < total {
        match rx.recv().await {
            Some(EngineEvent::LifecycleAck { phase: p, .. }) if p == phase => acks += 1,
            Some(EngineEvent::LifecycleAck { ext, phase: p }) => {
                tracing::warn!(extension = %ext, expected = ?phase, got = ?p, "stray lifecycle ack");
            }
            Some(EngineEvent::CreateFailed { ext, error }) => {
                return Err(Error::ExtensionInvalid(format!(
                    "extension '{ext}' failed to instantiate: {error}"
                )));
            }
            Some(EngineEvent::Stop { reply }) => pending_stops.push(reply),
            None => {
                return Err(Error::Graph("engine channel closed during startup".into()));
            }
        }
    }
    Ok(())
}

async fn engine_loop(
    shared: Arc<EngineShared>,
    registry: Arc<AddonRegistry>,
    specs_by_group: Vec<(String, Vec<ExtensionSpec>)>,
    total: usize,
    ready_tx: oneshot::Sender<Result<()>>,
    mut rx: mpsc::UnboundedReceiver<EngineEvent>,
) {
    // Spawn one OS thread per extension group and hand each its nodes.
    for (group, specs) in specs_by_group {
        let inbox = spawn_group(&group, shared.clone(), registry.clone());
        let _ = inbox.send(GroupEvent::CreateExtensions { specs });
        shared.groups.write().insert(group, inbox);
    }

    // Walk every extension through the startup phases; each phase is a
    // graph-wide barrier.
    let mut pending_stops = Vec::new();
    for phase in [
        LifecyclePhase::Configure,
        LifecyclePhase::Init,
        LifecyclePhase::Start,
    ] {
        shared.broadcast(|| GroupEvent::Lifecycle(phase));
        if let Err(e) = await_phase(&mut rx, phase, total, &mut pending_stops).await {
            tracing::error!(graph_id = %shared.graph_id, error = %e, "engine startup failed");
            shared.broadcast(|| GroupEvent::Shutdown);
            let _ = ready_tx.send(Err(e));
            return;
        }
    }
    let _ = ready_tx.send(Ok(()));
    tracing::info!(graph_id = %shared.graph_id, extensions = total, "engine running");

    let stop_reply = if let Some(reply) = pending_stops.pop() {
        Some(reply)
    } else {
        loop {
            match rx.recv().await {
                Some(EngineEvent::Stop { reply }) => break Some(reply),
                Some(EngineEvent::LifecycleAck { ext, phase }) => {
                    tracing::warn!(extension = %ext, phase = ?phase, "unexpected lifecycle ack while running");
                }
                Some(EngineEvent::CreateFailed { ext, error }) => {
                    tracing::error!(extension = %ext, error = %error, "late create failure");
                }
                None => break None,
            }
        }
    };

    // Orderly shutdown: stop all, then deinit all, then let the group
    // threads drain and exit.
    let mut ignored = Vec::new();
    for phase in [LifecyclePhase::Stop, LifecyclePhase::Deinit] {
        shared.broadcast(|| GroupEvent::Lifecycle(phase));
        if let Err(e) = await_phase(&mut rx, phase, total, &mut ignored).await {
            tracing::warn!(graph_id = %shared.graph_id, error = %e, "engine shutdown interrupted");
            break;
        }
    }
    shared.broadcast(|| GroupEvent::Shutdown);

    if let Some(reply) = stop_reply {
        let _ = reply.send(());
    }
    for reply in ignored {
        let _ = reply.send(());
    }
    let _ = shared
        .app_tx
        .send(AppEvent::EngineStopped {
            graph_id: shared.graph_id.clone(),
        });
    tracing::info!(graph_id = %shared.graph_id, "engine stopped");
}
