//! Start/stop graph control protocol
//!
//! `start_graph` partitions the graph's nodes by hosting app, forwards
//! the definition to every remote participant, and only reports success
//! once all of them (and the local engine) are running. Any remote
//! failure aborts the whole graph and rolls back already-started remotes
//! with `stop_graph`. The assigned graph id travels back in the result's
//! `detail` property.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::app::{remote, AppShared};
use crate::engine::{start_engine, EngineEvent};
use crate::graph::GraphDefinition;
use crate::msg::{Cmd, CmdResult, Loc, Msg, MsgKind, Payload, StatusCode};
use crate::{Error, Result};

/// How long the originator waits for each remote's start acknowledgement.
const REMOTE_START_TIMEOUT: Duration = Duration::from_secs(10);

/// Fan control commands out of the app loop; each runs as its own task
/// so the loop stays responsive.
pub(crate) fn dispatch_control(app: Arc<AppShared>, msg: Msg) {
    match msg.kind() {
        MsgKind::CmdStartGraph => {
            tokio::spawn(handle_start_graph(app, msg));
        }
        MsgKind::CmdStopGraph => {
            tokio::spawn(handle_stop_graph(app, msg));
        }
        MsgKind::CmdCloseApp => {
            tokio::spawn(handle_close_app(app));
        }
        kind => tracing::warn!(?kind, "unexpected control command"),
    }
}

fn reply(app: &AppShared, msg: &Msg, result: CmdResult) {
    let mut result = result;
    result.0.src = Loc::app(app.uri.clone());
    result.0.dests = vec![msg.src().clone()];
    app.route_msg(result.into_msg());
}

fn reply_err(app: &AppShared, msg: &Msg, err: &Error) {
    let result = CmdResult::from_error(msg.cmd_id(), msg.seq_id(), msg.name(), msg.kind(), err);
    reply(app, msg, result);
}

pub(crate) async fn handle_start_graph(app: Arc<AppShared>, msg: Msg) {
    if app.closing.load(Ordering::SeqCst) {
        reply_err(
            &app,
            &msg,
            &Error::InvalidArgument("app is closing, start_graph refused".into()),
        );
        return;
    }

    let (graph_json, predefined_name) = match msg.payload() {
        Payload::StartGraph {
            graph_json,
            predefined_name,
        } => (graph_json.clone(), predefined_name.clone()),
        _ => {
            reply_err(
                &app,
                &msg,
                &Error::InvalidArgument("start_graph without graph payload".into()),
            );
            return;
        }
    };
    let supplied_id = msg.dests().first().and_then(|d| d.graph_id.clone());

    // Resolve the definition and the graph id: predefined graphs start by
    // name and keep it as their id; ad-hoc graphs get a fresh one unless
    // the caller supplied an id (the forwarded-subset case).
    let (graph, graph_id, predefined) = match predefined_name {
        Some(name) => {
            let Some(entry) = app
                .config
                .predefined_graphs
                .iter()
                .find(|g| g.name == name)
            else {
                reply_err(
                    &app,
                    &msg,
                    &Error::Graph(format!("unknown predefined graph '{name}'")),
                );
                return;
            };
            if app.running_predefined.lock().contains_key(&name) {
                let detail = if entry.singleton {
                    format!("singleton graph '{name}' is already running")
                } else {
                    format!("graph '{name}' is already running")
                };
                reply_err(&app, &msg, &Error::Graph(detail));
                return;
            }
            let graph = entry.definition();
            if let Err(e) = graph.validate() {
                reply_err(&app, &msg, &e);
                return;
            }
            (graph, name.clone(), Some(name))
        }
        None => match GraphDefinition::from_json(&graph_json) {
            Ok(graph) => {
                let graph_id = supplied_id.unwrap_or_else(|| Uuid::new_v4().to_string());
                (graph, graph_id, None)
            }
            Err(e) => {
                reply_err(&app, &msg, &e);
                return;
            }
        },
    };

    if app.engines.lock().contains_key(&graph_id) {
        reply_err(
            &app,
            &msg,
            &Error::Graph(format!("graph id '{graph_id}' is already in use")),
        );
        return;
    }

    // Remote participants first; all must acknowledge before the
    // originator reports success.
    let remotes = graph.remote_apps(&app.uri);
    let mut started: Vec<String> = Vec::new();
    for uri in &remotes {
        match forward_start(&app, &graph, &graph_id, uri).await {
            Ok(()) => started.push(uri.clone()),
            Err(e) => {
                rollback(&app, &graph_id, &started).await;
                reply_err(&app, &msg, &e);
                return;
            }
        }
    }

    match start_engine(
        &app.uri,
        &graph,
        graph_id.clone(),
        app.addons.clone(),
        app.app_tx.clone(),
        app.remote_tx.clone(),
        app.app_props.clone(),
        app.config.check_interval(),
        app.config.timeout(),
        app.config.one_event_loop_per_engine,
    )
    .await
    {
        Ok(handle) => {
            app.engines.lock().insert(graph_id.clone(), handle);
            if let Some(name) = predefined {
                app.running_predefined.lock().insert(name, graph_id.clone());
            }
            tracing::info!(graph_id = %graph_id, "graph started");
            let mut result = ok_result_for(&msg);
            // Property writes on a fresh result cannot fail.
            let _ = result.set_property("detail", graph_id.as_str());
            reply(&app, &msg, result);
        }
        Err(e) => {
            rollback(&app, &graph_id, &started).await;
            reply_err(&app, &msg, &e);
        }
    }
}

fn ok_result_for(msg: &Msg) -> CmdResult {
    let mut result = CmdResult(Msg::new(
        MsgKind::CmdResult,
        msg.name(),
        Payload::CmdResult {
            status: StatusCode::Ok,
            is_final: true,
            is_completed: true,
            original_kind: msg.kind(),
        },
    ));
    result.0.cmd_id = msg.cmd_id().to_string();
    result.0.seq_id = msg.seq_id().to_string();
    result
}

/// Forward the graph to one remote app and wait for its acknowledgement.
async fn forward_start(
    app: &Arc<AppShared>,
    graph: &GraphDefinition,
    graph_id: &str,
    uri: &str,
) -> Result<()> {
    let handle = remote::get_or_connect(app, uri).await?;

    let mut fwd = Cmd::start_graph(graph.to_json()?);
    fwd.0.src = Loc::app(app.uri.clone());
    fwd.0.dests = vec![Loc::app(uri).with_graph(graph_id)];
    let cmd_id = fwd.cmd_id().to_string();

    let (tx, rx) = oneshot::channel();
    app.pending_results.lock().insert(cmd_id.clone(), tx);

    if handle.tx.send(fwd.into_msg()).is_err() {
        app.pending_results.lock().remove(&cmd_id);
        return Err(Error::ConnectionFailed(uri.to_string()));
    }

    match tokio::time::timeout(REMOTE_START_TIMEOUT, rx).await {
        Ok(Ok(result)) => {
            if result.status_code() == StatusCode::Ok {
                Ok(())
            } else {
                Err(Error::Graph(result.detail().unwrap_or_else(|| {
                    format!("remote app {uri} failed to start the graph")
                })))
            }
        }
        Ok(Err(_)) | Err(_) => {
            app.pending_results.lock().remove(&cmd_id);
            Err(Error::ConnectionFailed(uri.to_string()))
        }
    }
}

/// Best-effort rollback: already-started remotes are told to stop the
/// half-created graph.
async fn rollback(app: &Arc<AppShared>, graph_id: &str, started: &[String]) {
    for uri in started {
        if let Ok(handle) = remote::get_or_connect(app, uri).await {
            let mut stop = Cmd::stop_graph(graph_id);
            stop.0.src = Loc::app(app.uri.clone());
            stop.0.dests = vec![Loc::app(uri)];
            let _ = handle.tx.send(stop.into_msg());
        }
    }
}

pub(crate) async fn handle_stop_graph(app: Arc<AppShared>, msg: Msg) {
    let graph_id = match msg.payload() {
        Payload::StopGraph { graph_id } => graph_id.clone(),
        _ => {
            reply_err(
                &app,
                &msg,
                &Error::InvalidArgument("stop_graph without graph id".into()),
            );
            return;
        }
    };

    let handle = app.engines.lock().get(&graph_id).cloned();
    match handle {
        None => reply_err(&app, &msg, &Error::GraphNotFound(graph_id)),
        Some(handle) => {
            let (tx, rx) = oneshot::channel();
            if handle.engine_tx.send(EngineEvent::Stop { reply: tx }).is_ok() {
                let _ = rx.await;
            }
            let mut result = ok_result_for(&msg);
            let _ = result.set_property("detail", graph_id.as_str());
            reply(&app, &msg, result);
        }
    }
}

/// Orderly shutdown: refuse new graphs, stop the running ones, and let
/// the app loop exit once the last engine reports down.
pub(crate) async fn handle_close_app(app: Arc<AppShared>) {
    app.closing.store(true, Ordering::SeqCst);
    let handles: Vec<_> = app.engines.lock().values().cloned().collect();
    if handles.is_empty() {
        let _ = app.app_tx.send(crate::app::AppEvent::Shutdown);
        return;
    }
    for handle in handles {
        let (tx, rx) = oneshot::channel();
        if handle.engine_tx.send(EngineEvent::Stop { reply: tx }).is_ok() {
            let _ = rx.await;
        }
    }
}
