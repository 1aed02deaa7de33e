//! Remote connections
//!
//! Framed message streams between apps (and test clients). Outbound
//! connections are pooled by app URI; inbound connections start in
//! `PreMigration` and bind to an engine on the first graph-scoped
//! message. A migrated connection never re-migrates: traffic for a
//! different graph id is answered with an error while the connection
//! stays up.
//!
//! Frames are a 4-byte big-endian length prefix followed by one
//! codec-encoded message.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::app::{AppEvent, AppShared};
use crate::engine::EngineShared;
use crate::msg::{CmdResult, Loc, Msg, MsgKind};
use crate::transport::{uri_host_port, WireCodec};
use crate::{Error, Result};

/// Upper bound on a single frame; anything larger is treated as framing
/// corruption and terminates the connection.
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Outgoing side of one connection.
#[derive(Clone)]
pub(crate) struct RemoteHandle {
    pub uri: String,
    pub tx: mpsc::UnboundedSender<Msg>,
}

/// Connection pool keyed by peer URI, guarded on the app side.
#[derive(Default)]
pub(crate) struct Pool {
    conns: parking_lot::Mutex<std::collections::HashMap<String, RemoteHandle>>,
}

impl Pool {
    pub fn get(&self, uri: &str) -> Option<RemoteHandle> {
        self.conns.lock().get(uri).cloned()
    }

    pub fn insert(&self, handle: RemoteHandle) {
        self.conns.lock().insert(handle.uri.clone(), handle);
    }

    pub fn alias(&self, uri: &str, handle: RemoteHandle) {
        self.conns.lock().insert(uri.to_string(), handle);
    }

    pub fn remove(&self, uri: &str) {
        self.conns.lock().remove(uri);
    }
}

/// Per-connection graph binding.
enum MigrationState {
    PreMigration,
    Migrated(String, Arc<EngineShared>),
}

struct ConnState {
    /// URI this connection is pooled under (assigned for anonymous
    /// clients, learned from the peer's source locator otherwise).
    assigned_uri: String,
    /// Additional pool keys learned from inbound source locators.
    aliases: Vec<String>,
    migration: MigrationState,
    tx: mpsc::UnboundedSender<Msg>,
}

/// Look up a pooled connection or dial the remote app.
pub(crate) async fn get_or_connect(app: &Arc<AppShared>, uri: &str) -> Result<RemoteHandle> {
    if let Some(handle) = app.pool.get(uri) {
        return Ok(handle);
    }
    let codec = app.codecs.for_uri(uri)?;
    let (host, port) = uri_host_port(uri)?;
    let stream = TcpStream::connect((host.as_str(), port))
        .await
        .map_err(|e| {
            tracing::debug!(uri = %uri, error = %e, "dial failed");
            Error::ConnectionFailed(uri.to_string())
        })?;
    Ok(spawn_connection(
        app.clone(),
        stream,
        codec,
        Some(uri.to_string()),
    ))
}

/// Stand up the reader/writer tasks for one connection and pool it.
pub(crate) fn spawn_connection(
    app: Arc<AppShared>,
    stream: TcpStream,
    codec: Arc<dyn WireCodec>,
    peer_uri: Option<String>,
) -> RemoteHandle {
    let (mut read_half, mut write_half) = stream.into_split();
    let (tx, mut out_rx) = mpsc::unbounded_channel::<Msg>();
    let uri = peer_uri.unwrap_or_else(|| format!("client:{}", Uuid::new_v4()));
    let handle = RemoteHandle {
        uri: uri.clone(),
        tx: tx.clone(),
    };
    app.pool.insert(handle.clone());

    let write_codec = codec.clone();
    tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let frame = match write_codec.encode(&msg) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(error = %e, name = %msg.name(), "encode failed, message dropped");
                    continue;
                }
            };
            let len = (frame.len() as u32).to_be_bytes();
            if write_half.write_all(&len).await.is_err() {
                break;
            }
            if write_half.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    let reader_app = app;
    tokio::spawn(async move {
        let mut state = ConnState {
            assigned_uri: uri.clone(),
            aliases: Vec::new(),
            migration: MigrationState::PreMigration,
            tx,
        };
        loop {
            let mut len_buf = [0u8; 4];
            if read_half.read_exact(&mut len_buf).await.is_err() {
                break;
            }
            let len = u32::from_be_bytes(len_buf) as usize;
            if len > MAX_FRAME_LEN {
                tracing::error!(uri = %state.assigned_uri, len, "oversized frame, closing connection");
                break;
            }
            let mut frame = vec![0u8; len];
            if read_half.read_exact(&mut frame).await.is_err() {
                break;
            }
            match codec.decode(&frame) {
                Ok(msg) => handle_inbound(&reader_app, &mut state, msg),
                Err(e) => {
                    tracing::error!(uri = %state.assigned_uri, error = %e, "frame decode failed, closing connection");
                    break;
                }
            }
        }
        reader_app.pool.remove(&state.assigned_uri);
        for alias in &state.aliases {
            reader_app.pool.remove(alias);
        }
        tracing::debug!(uri = %state.assigned_uri, "connection closed");
    });

    handle
}

fn handle_inbound(app: &Arc<AppShared>, state: &mut ConnState, mut msg: Msg) {
    // Learn the peer's identity, or assign one so results can be routed
    // back over this connection.
    match msg.src().app_uri.clone() {
        Some(peer) if !peer.is_empty() => {
            if peer != state.assigned_uri && !state.aliases.contains(&peer) {
                app.pool.alias(
                    &peer,
                    RemoteHandle {
                        uri: peer.clone(),
                        tx: state.tx.clone(),
                    },
                );
                state.aliases.push(peer);
            }
        }
        _ => {
            msg.src.app_uri = Some(state.assigned_uri.clone());
        }
    }

    match msg.kind() {
        // App control plane; handled off the connection.
        MsgKind::CmdStartGraph | MsgKind::CmdStopGraph | MsgKind::CmdCloseApp => {
            let _ = app.app_tx.send(AppEvent::ControlCmd { msg });
        }
        _ => {
            let Some(dest) = msg.dests().first().cloned() else {
                tracing::warn!(name = %msg.name(), "inbound message without destination dropped");
                return;
            };

            // Results for app-issued control commands (start_graph fan-out).
            if msg.kind() == MsgKind::CmdResult && dest.extension.is_none() {
                let pending = app.pending_results.lock().remove(msg.cmd_id());
                match pending {
                    Some(tx) => {
                        let _ = tx.send(CmdResult::from_msg(msg));
                    }
                    None => tracing::debug!(cmd_id = %msg.cmd_id(), "stray app-scope result"),
                }
                return;
            }

            match &state.migration {
                MigrationState::PreMigration => {
                    let Some(graph_id) = dest.graph_id.clone() else {
                        reject(app, state, msg, Error::InvalidArgument(
                            "message without graph id".into(),
                        ));
                        return;
                    };
                    let engine = app.engines.lock().get(&graph_id).map(|h| h.shared.clone());
                    match engine {
                        Some(shared) => {
                            tracing::debug!(uri = %state.assigned_uri, graph_id = %graph_id, "connection migrated");
                            state.migration = MigrationState::Migrated(graph_id, shared.clone());
                            shared.deliver(msg);
                        }
                        None => {
                            reject(app, state, msg, Error::GraphNotFound(graph_id));
                        }
                    }
                }
                MigrationState::Migrated(bound, shared) => {
                    if dest.graph_id.as_deref() == Some(bound.as_str()) {
                        shared.deliver(msg);
                    } else {
                        // No re-migration: wrong graph id is an error, but
                        // the connection stays bound and usable.
                        let graph_id = dest.graph_id.unwrap_or_default();
                        reject(app, state, msg, Error::GraphNotFound(graph_id));
                    }
                }
            }
        }
    }
}

fn reject(app: &Arc<AppShared>, state: &ConnState, msg: Msg, err: Error) {
    if msg.kind().is_cmd_family() {
        let mut result =
            CmdResult::from_error(msg.cmd_id(), msg.seq_id(), msg.name(), msg.kind(), &err);
        result.0.src = Loc::app(app.uri.clone());
        result.0.dests = vec![msg.src().clone()];
        let _ = state.tx.send(result.into_msg());
    } else {
        tracing::warn!(name = %msg.name(), error = %err, "inbound message dropped");
    }
}

/// Deliver engine-outbound messages: resolve the destination app through
/// the pool (dialing on demand) and surface dial failures back to the
/// sending extension as error results.
pub(crate) async fn outbound_router(app: Arc<AppShared>, mut rx: mpsc::UnboundedReceiver<Msg>) {
    while let Some(msg) = rx.recv().await {
        let Some(uri) = msg.dests().first().and_then(|d| d.app_uri.clone()) else {
            tracing::warn!(name = %msg.name(), "outbound message without app uri dropped");
            continue;
        };

        if uri.starts_with("local:") {
            if msg.kind() == MsgKind::CmdResult {
                let pending = app.pending_results.lock().remove(msg.cmd_id());
                if let Some(tx) = pending {
                    let _ = tx.send(CmdResult::from_msg(msg));
                }
            }
            continue;
        }

        match get_or_connect(&app, &uri).await {
            Ok(handle) => {
                if handle.tx.send(msg).is_err() {
                    tracing::warn!(uri = %uri, "connection writer gone, message dropped");
                    app.pool.remove(&uri);
                }
            }
            Err(e) => {
                tracing::warn!(uri = %uri, error = %e, "remote delivery failed");
                if msg.kind().is_cmd_family() {
                    let mut result = CmdResult::from_error(
                        msg.cmd_id(),
                        msg.seq_id(),
                        msg.name(),
                        msg.kind(),
                        &e,
                    );
                    result.0.src = Loc::app(app.uri.clone());
                    result.0.dests = vec![msg.src().clone()];
                    app.route_msg(result.into_msg());
                }
            }
        }
    }
}
