//! App layer
//!
//! An `App` is one process-level instance of the runtime: it serves a
//! URI, owns the running graph engines, the addon registry, and the pool
//! of remote connections. The app loop is the control plane; message
//! traffic flows between connection tasks and group threads without
//! passing through it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::addon::AddonRegistry;
use crate::engine::EngineHandle;
use crate::msg::{Cmd, CmdResult, Loc, Msg, MsgKind};
use crate::transport::CodecRegistry;
use crate::value::Value;
use crate::{Error, Result};

pub mod config;
pub(crate) mod graph_ctl;
pub(crate) mod remote;

pub use config::AppConfig;

/// Events the app control loop processes.
pub(crate) enum AppEvent {
    /// start_graph / stop_graph / close_app, from a connection, an
    /// extension, or a local handle.
    ControlCmd { msg: Msg },
    /// Cross-graph traffic inside this app; resolved against the engine
    /// table.
    LocalDeliver { msg: Msg },
    EngineStopped { graph_id: String },
    Shutdown,
}

/// State shared between the app loop, connection tasks, and engines.
pub(crate) struct AppShared {
    pub config: AppConfig,
    pub uri: String,
    pub addons: Arc<AddonRegistry>,
    pub codecs: CodecRegistry,
    pub engines: Mutex<HashMap<String, EngineHandle>>,
    /// Predefined graph name -> running graph id
    pub running_predefined: Mutex<HashMap<String, String>>,
    pub pool: remote::Pool,
    /// Oneshot resolvers for app-issued control commands, by cmd id.
    pub pending_results: Mutex<HashMap<String, oneshot::Sender<CmdResult>>>,
    pub app_props: Arc<RwLock<Value>>,
    pub app_tx: mpsc::UnboundedSender<AppEvent>,
    /// Engine-outbound messages, consumed by the outbound router.
    pub remote_tx: mpsc::UnboundedSender<Msg>,
    pub closing: AtomicBool,
}

impl AppShared {
    /// Route a message by its first destination: a local engine, a local
    /// pending control handle, or a remote app.
    pub fn route_msg(&self, msg: Msg) {
        let Some(dest) = msg.dests().first().cloned() else {
            tracing::warn!(name = %msg.name(), "message without destination dropped");
            return;
        };

        if let Some(uri) = dest.app_uri.as_deref() {
            if uri.starts_with("local:") {
                if msg.kind() == MsgKind::CmdResult {
                    let pending = self.pending_results.lock().remove(msg.cmd_id());
                    if let Some(tx) = pending {
                        let _ = tx.send(CmdResult::from_msg(msg));
                        return;
                    }
                }
                tracing::debug!(name = %msg.name(), "unclaimed local control message dropped");
                return;
            }
            if uri != self.uri && uri != "localhost" {
                if self.remote_tx.send(msg).is_err() {
                    tracing::warn!("outbound router gone, message dropped");
                }
                return;
            }
        }

        match dest.graph_id.as_deref() {
            Some(graph_id) => {
                let engine = self.engines.lock().get(graph_id).map(|h| h.shared.clone());
                match engine {
                    Some(shared) => shared.deliver(msg),
                    None => {
                        if msg.kind().is_cmd_family() {
                            let err = Error::GraphNotFound(graph_id.to_string());
                            let mut result = CmdResult::from_error(
                                msg.cmd_id(),
                                msg.seq_id(),
                                msg.name(),
                                msg.kind(),
                                &err,
                            );
                            result.0.src = Loc::app(self.uri.clone());
                            result.0.dests = vec![msg.src().clone()];
                            self.route_msg(result.into_msg());
                        } else {
                            tracing::warn!(
                                graph_id = %graph_id,
                                name = %msg.name(),
                                "message for unknown graph dropped"
                            );
                        }
                    }
                }
            }
            None => {
                if msg.kind() == MsgKind::CmdResult {
                    let pending = self.pending_results.lock().remove(msg.cmd_id());
                    match pending {
                        Some(tx) => {
                            let _ = tx.send(CmdResult::from_msg(msg));
                        }
                        None => tracing::debug!(cmd_id = %msg.cmd_id(), "stray app-scope result"),
                    }
                } else {
                    tracing::warn!(name = %msg.name(), "app-scope message dropped");
                }
            }
        }
    }
}

/// A process instance of the runtime.
pub struct App {
    shared: Arc<AppShared>,
    app_rx: mpsc::UnboundedReceiver<AppEvent>,
    remote_rx: mpsc::UnboundedReceiver<Msg>,
}

impl App {
    pub fn new(config: AppConfig, addons: AddonRegistry, codecs: CodecRegistry) -> Result<App> {
        if config.uri.is_empty() {
            return Err(Error::InvalidArgument("app config needs a uri".into()));
        }
        let (app_tx, app_rx) = mpsc::unbounded_channel();
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        let uri = config.uri.clone();
        let shared = Arc::new(AppShared {
            config,
            uri,
            addons: Arc::new(addons),
            codecs,
            engines: Mutex::new(HashMap::new()),
            running_predefined: Mutex::new(HashMap::new()),
            pool: remote::Pool::default(),
            pending_results: Mutex::new(HashMap::new()),
            app_props: Arc::new(RwLock::new(Value::object())),
            app_tx,
            remote_tx,
            closing: AtomicBool::new(false),
        });
        // Extensions read these through the `app:` property prefix.
        shared
            .app_props
            .write()
            .set_path("uri", Value::from(shared.uri.clone()))?;
        Ok(App {
            shared,
            app_rx,
            remote_rx,
        })
    }

    /// Control handle usable before and while `run` executes.
    pub fn handle(&self) -> AppHandle {
        AppHandle {
            shared: self.shared.clone(),
        }
    }

    /// Serve the app until close_app (or the last graph ends without
    /// `long_running_mode`).
    pub async fn run(self) -> Result<()> {
        let App {
            shared,
            mut app_rx,
            remote_rx,
        } = self;

        config::init_logging(&shared.config);

        let codec = shared.codecs.for_uri(&shared.uri)?;
        let (host, port) = crate::transport::uri_host_port(&shared.uri)?;
        let listener = tokio::net::TcpListener::bind((host.as_str(), port)).await?;
        tracing::info!(uri = %shared.uri, "app listening");

        let accept_shared = shared.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        tracing::debug!(peer = %peer, "inbound connection");
                        remote::spawn_connection(
                            accept_shared.clone(),
                            stream,
                            codec.clone(),
                            None,
                        );
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                    }
                }
            }
        });

        let router_task = tokio::spawn(remote::outbound_router(shared.clone(), remote_rx));

        // Predefined graphs marked auto_start come up before any client
        // traffic is answered.
        for graph in shared
            .config
            .predefined_graphs
            .iter()
            .filter(|g| g.auto_start)
        {
            let handle = AppHandle {
                shared: shared.clone(),
            };
            match handle.start_predefined_graph(&graph.name).await {
                Ok(result) if result.status_code() == crate::msg::StatusCode::Ok => {
                    tracing::info!(graph = %graph.name, "auto-started predefined graph");
                }
                Ok(result) => {
                    tracing::error!(
                        graph = %graph.name,
                        detail = %result.detail().unwrap_or_default(),
                        "predefined graph failed to start"
                    );
                }
                Err(e) => {
                    tracing::error!(graph = %graph.name, error = %e, "predefined graph failed to start");
                }
            }
        }

        while let Some(event) = app_rx.recv().await {
            match event {
                AppEvent::ControlCmd { msg } => {
                    graph_ctl::dispatch_control(shared.clone(), msg);
                }
                AppEvent::LocalDeliver { msg } => {
                    shared.route_msg(msg);
                }
                AppEvent::EngineStopped { graph_id } => {
                    shared.engines.lock().remove(&graph_id);
                    shared
                        .running_predefined
                        .lock()
                        .retain(|_, running| running != &graph_id);
                    let none_left = shared.engines.lock().is_empty();
                    let closing = shared.closing.load(Ordering::SeqCst);
                    if none_left && (closing || !shared.config.long_running_mode) {
                        break;
                    }
                }
                AppEvent::Shutdown => break,
            }
        }

        accept_task.abort();
        router_task.abort();
        tracing::info!(uri = %shared.uri, "app exited");
        Ok(())
    }
}

/// Local control handle: issue graph control commands without a wire
/// connection (tests, embedding processes, auto-start).
#[derive(Clone)]
pub struct AppHandle {
    shared: Arc<AppShared>,
}

impl AppHandle {
    pub async fn start_graph(&self, graph_json: &str) -> Result<CmdResult> {
        self.control(Cmd::start_graph(graph_json)).await
    }

    pub async fn start_predefined_graph(&self, name: &str) -> Result<CmdResult> {
        self.control(Cmd::start_predefined_graph(name)).await
    }

    pub async fn stop_graph(&self, graph_id: &str) -> Result<CmdResult> {
        self.control(Cmd::stop_graph(graph_id)).await
    }

    /// Begin orderly shutdown; `App::run` returns once every engine has
    /// stopped.
    pub fn close(&self) {
        let mut cmd = Cmd::close_app();
        cmd.0.src = Loc::app(format!("local:{}", Uuid::new_v4()));
        graph_ctl::dispatch_control(self.shared.clone(), cmd.into_msg());
    }

    /// Local control commands bypass the app event loop so they work
    /// before `run` starts consuming it (auto-start) and cannot deadlock
    /// against it.
    async fn control(&self, mut cmd: Cmd) -> Result<CmdResult> {
        cmd.0.src = Loc::app(format!("local:{}", Uuid::new_v4()));
        let (tx, rx) = oneshot::channel();
        self.shared
            .pending_results
            .lock()
            .insert(cmd.cmd_id().to_string(), tx);
        graph_ctl::dispatch_control(self.shared.clone(), cmd.into_msg());
        rx.await
            .map_err(|_| Error::EnvClosed("app loop has ended".into()))
    }
}
