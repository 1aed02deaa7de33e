//! Framed TCP client
//!
//! The client side of the msgpack transport: connects to an app URI,
//! writes length-prefixed frames, and reads whole messages back. Used by
//! integration tests and controller processes to drive graphs from
//! outside the runtime.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use weft_runtime_core::msg::{Cmd, CmdResult, Loc, Msg};
use weft_runtime_core::transport::{uri_host_port, WireCodec};
use weft_runtime_core::{Error, Result, StatusCode};

use crate::MsgpackCodec;

/// Frames larger than this are treated as corruption.
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

pub struct MsgpackClient {
    stream: TcpStream,
    codec: MsgpackCodec,
    app_uri: String,
}

impl MsgpackClient {
    /// Connect to an app at `msgpack://host:port/`.
    pub async fn connect(app_uri: &str) -> Result<Self> {
        let (host, port) = uri_host_port(app_uri)?;
        let stream = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|_| Error::ConnectionFailed(app_uri.to_string()))?;
        Ok(MsgpackClient {
            stream,
            codec: MsgpackCodec,
            app_uri: app_uri.to_string(),
        })
    }

    /// Send one message as a frame.
    pub async fn send_msg(&mut self, msg: impl Into<Msg>) -> Result<()> {
        let msg = msg.into();
        let frame = self.codec.encode(&msg)?;
        let len = (frame.len() as u32).to_be_bytes();
        self.stream.write_all(&len).await?;
        self.stream.write_all(&frame).await?;
        Ok(())
    }

    /// Read the next message frame.
    pub async fn recv_msg(&mut self) -> Result<Msg> {
        let mut len_buf = [0u8; 4];
        self.stream.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN {
            return Err(Error::Codec(format!("oversized frame ({len} bytes)")));
        }
        let mut frame = vec![0u8; len];
        self.stream.read_exact(&mut frame).await?;
        self.codec.decode(&frame)
    }

    /// Read messages until a command result arrives.
    pub async fn recv_result(&mut self) -> Result<CmdResult> {
        loop {
            let msg = self.recv_msg().await?;
            match CmdResult::try_from(msg) {
                Ok(result) => return Ok(result),
                Err(_) => continue,
            }
        }
    }

    /// `recv_result` with a deadline, for tests that assert timing.
    pub async fn recv_result_timeout(&mut self, timeout: Duration) -> Result<CmdResult> {
        tokio::time::timeout(timeout, self.recv_result())
            .await
            .map_err(|_| Error::PathTimeout)?
    }

    /// Send a command addressed to `extension` in `graph_id` and wait for
    /// its (final) result.
    pub async fn send_cmd_and_wait(
        &mut self,
        graph_id: &str,
        extension: &str,
        cmd: Cmd,
    ) -> Result<CmdResult> {
        self.send_cmd(graph_id, extension, cmd).await?;
        self.recv_result().await
    }

    /// Send a command addressed to `extension` in `graph_id`.
    pub async fn send_cmd(&mut self, graph_id: &str, extension: &str, mut cmd: Cmd) -> Result<()> {
        cmd.clear_dests()?;
        cmd.add_dest(
            Loc::extension(extension)
                .with_app(self.app_uri.clone())
                .with_graph(graph_id),
        )?;
        self.send_msg(cmd).await
    }

    /// Start a graph from its JSON definition; returns the assigned
    /// graph id from the result's `detail` property.
    pub async fn start_graph(&mut self, graph_json: &str) -> Result<(CmdResult, String)> {
        let cmd = Cmd::start_graph(graph_json);
        self.send_msg(cmd).await?;
        let result = self.recv_result().await?;
        if result.status_code() != StatusCode::Ok {
            let detail = result.detail().unwrap_or_else(|| "start_graph failed".into());
            return Err(Error::Graph(detail));
        }
        let graph_id = result.detail().unwrap_or_default();
        Ok((result, graph_id))
    }

    /// Start a predefined graph by name.
    pub async fn start_predefined_graph(&mut self, name: &str) -> Result<CmdResult> {
        let cmd = Cmd::start_predefined_graph(name);
        self.send_msg(cmd).await?;
        self.recv_result().await
    }

    /// Stop a running graph.
    pub async fn stop_graph(&mut self, graph_id: &str) -> Result<CmdResult> {
        let cmd = Cmd::stop_graph(graph_id);
        self.send_msg(cmd).await?;
        self.recv_result().await
    }

    /// Ask the app to shut down; the connection drops without a result.
    pub async fn close_app(&mut self) -> Result<()> {
        self.send_msg(Cmd::close_app()).await
    }
}
