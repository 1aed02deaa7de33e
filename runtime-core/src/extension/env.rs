//! Per-extension environment handle
//!
//! Every hook and result handler receives an `EnvHandle`: the extension's
//! window onto the runtime. Sends are synchronous and non-blocking; a
//! successful return means the message was accepted into the outgoing
//! queue and ownership passed to the runtime. Actual delivery happens
//! later on the destination's thread.

use crate::engine::DestRule;
use crate::extension::proxy::EnvProxy;
use crate::extension::thread::{GroupCtx, GroupEvent};
use crate::extension::{ExtCore, LifecyclePhase, LifecycleState, ResultHandler};
use crate::msg::{AudioFrame, Cmd, CmdResult, Data, Msg, MsgKind, VideoFrame};
use crate::schema::Direction;
use crate::value::{json, Value};
use crate::{Error, Result};

pub struct EnvHandle<'a> {
    pub(crate) core: &'a mut ExtCore,
    pub(crate) ctx: &'a GroupCtx,
}

impl<'a> EnvHandle<'a> {
    pub fn extension_name(&self) -> &str {
        &self.core.name
    }

    pub fn graph_id(&self) -> &str {
        self.core.loc.graph_id.as_deref().unwrap_or("")
    }

    pub fn app_uri(&self) -> &str {
        self.core.loc.app_uri.as_deref().unwrap_or("")
    }

    // ------------------------------------------------------------------
    // Lifecycle acknowledgements
    // ------------------------------------------------------------------

    pub fn on_configure_done(&mut self) {
        self.advance(
            LifecycleState::Configuring,
            LifecycleState::Configured,
            LifecyclePhase::Configure,
        );
    }

    pub fn on_init_done(&mut self) {
        self.advance(
            LifecycleState::Initing,
            LifecycleState::Inited,
            LifecyclePhase::Init,
        );
    }

    pub fn on_start_done(&mut self) {
        self.advance(
            LifecycleState::Starting,
            LifecycleState::Running,
            LifecyclePhase::Start,
        );
        // Buffered messages are dispatched by the group loop once the
        // current hook unwinds; dispatching here would re-enter the
        // extension while `on_start` still holds `&mut self`.
        self.core.pending_flush = true;
    }

    pub fn on_stop_done(&mut self) {
        self.advance(
            LifecycleState::Stopping,
            LifecycleState::Stopped,
            LifecyclePhase::Stop,
        );
    }

    pub fn on_deinit_done(&mut self) {
        self.advance(
            LifecycleState::Deiniting,
            LifecycleState::Deinited,
            LifecyclePhase::Deinit,
        );
        self.flush_paths_closed();
    }

    fn advance(&mut self, expect: LifecycleState, next: LifecycleState, phase: LifecyclePhase) {
        if self.core.state != expect {
            tracing::error!(
                extension = %self.core.name,
                state = ?self.core.state,
                phase = ?phase,
                "lifecycle acknowledgement out of order"
            );
            panic!(
                "extension '{}': {:?} done called in state {:?}",
                self.core.name, phase, self.core.state
            );
        }
        self.core.state = next;
        let _ = self
            .ctx
            .engine
            .engine_tx
            .send(crate::engine::EngineEvent::LifecycleAck {
                ext: self.core.name.clone(),
                phase,
            });
    }

    /// Flush outstanding path entries on shutdown: every pending result
    /// handler fires once with an error result, then sends are refused.
    fn flush_paths_closed(&mut self) {
        let flushed = self.core.path_table.flush_all();
        if flushed.is_empty() {
            return;
        }
        tracing::debug!(
            extension = %self.core.name,
            count = flushed.len(),
            "flushing outstanding paths on shutdown"
        );
        let err = Error::EnvClosed(format!("extension '{}' is shutting down", self.core.name));
        for path in flushed {
            if let Some(mut handler) = path.handler {
                let mut result = CmdResult::from_error(
                    &path.cmd_id,
                    &path.seq_id,
                    &path.cmd_name,
                    path.original_kind,
                    &err,
                );
                result.set_completed(true);
                handler(self, result);
            }
        }
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    /// Issue a command; `handler` fires for every returning result, with
    /// fan-out completion aggregated onto the last final result.
    pub fn send_cmd(
        &mut self,
        cmd: Cmd,
        handler: impl FnMut(&mut EnvHandle<'_>, CmdResult) + Send + 'static,
    ) -> Result<()> {
        self.send_msg(cmd.into_msg(), Some(Box::new(handler)), true)
    }

    /// Like `send_cmd`, but without result aggregation: every final
    /// result carries its own completion, useful for remote fan-out.
    pub fn send_cmd_ex(
        &mut self,
        cmd: Cmd,
        handler: impl FnMut(&mut EnvHandle<'_>, CmdResult) + Send + 'static,
    ) -> Result<()> {
        self.send_msg(cmd.into_msg(), Some(Box::new(handler)), false)
    }

    /// Issue a command and ignore its results.
    pub fn send_cmd_detached(&mut self, cmd: Cmd) -> Result<()> {
        self.send_msg(cmd.into_msg(), None, true)
    }

    pub fn send_data(&mut self, data: Data) -> Result<()> {
        self.send_msg(data.into_msg(), None, true)
    }

    pub fn send_audio_frame(&mut self, frame: AudioFrame) -> Result<()> {
        self.send_msg(frame.into_msg(), None, true)
    }

    pub fn send_video_frame(&mut self, frame: VideoFrame) -> Result<()> {
        self.send_msg(frame.into_msg(), None, true)
    }

    fn send_msg(
        &mut self,
        mut msg: Msg,
        handler: Option<ResultHandler>,
        aggregate: bool,
    ) -> Result<()> {
        if !self.core.is_open() {
            return Err(Error::EnvClosed(format!(
                "extension '{}' has deinitialized",
                self.core.name
            )));
        }
        if msg.kind() == MsgKind::Cmd && msg.name().is_empty() {
            return Err(Error::InvalidArgument("command needs a name".into()));
        }
        self.core.schema.check_msg(&msg, Direction::Egress)?;
        msg.src = self.core.loc.clone();

        if msg.kind() == MsgKind::CmdTimer {
            return crate::timer::arm(self.core, self.ctx, msg, handler, aggregate);
        }

        // App-control commands default to the local app's control plane.
        if msg.dests.is_empty()
            && matches!(
                msg.kind(),
                MsgKind::CmdStartGraph | MsgKind::CmdStopGraph | MsgKind::CmdCloseApp
            )
        {
            msg.dests.push(crate::msg::Loc::app(
                self.core.loc.app_uri.clone().unwrap_or_default(),
            ));
        }

        // Explicit destinations win; otherwise the connection table
        // decides. Resolution happens here, on the sender's thread, so
        // the path entry can record the exact fan-out count.
        let rules: Vec<DestRule> = if msg.dests.is_empty() {
            self.ctx.engine.resolve(&self.core.name, &msg)
        } else {
            msg.dests
                .drain(..)
                .map(|mut loc| {
                    loc.resolve_with(&self.core.loc);
                    DestRule {
                        loc,
                        conversion: None,
                    }
                })
                .collect()
        };

        if rules.is_empty() {
            if msg.kind().is_cmd_family() {
                // The sender still gets a result: an ExtensionInvalid
                // error walked through its own path entry.
                msg.seal();
                self.core.path_table.add_out_path(&msg, 1, handler, aggregate);
                let err = Error::ExtensionInvalid(format!(
                    "no destination for command '{}'",
                    msg.name()
                ));
                let mut result = CmdResult::from_error(
                    msg.cmd_id(),
                    msg.seq_id(),
                    msg.name(),
                    msg.kind(),
                    &err,
                );
                result.0.src = self.core.loc.clone();
                result.0.dests = vec![self.core.loc.clone()];
                let _ = self.ctx.inbox.send(GroupEvent::Deliver(result.into_msg()));
                return Ok(());
            }
            tracing::warn!(
                extension = %self.core.name,
                name = %msg.name(),
                "no destination, message dropped"
            );
            return Ok(());
        }

        // Build every per-destination clone before routing anything, so a
        // conversion error fails the whole send synchronously.
        let mut outgoing = Vec::with_capacity(rules.len());
        for rule in &rules {
            let mut routed = msg.clone_for_route();
            routed.dests = vec![rule.loc.clone()];
            if let Some(conversion) = &rule.conversion {
                conversion.apply(&mut routed)?;
            }
            routed.seal();
            outgoing.push(routed);
        }

        if msg.kind().is_cmd_family() {
            msg.seal();
            self.core
                .path_table
                .add_out_path(&msg, outgoing.len(), handler, aggregate);
        }
        for routed in outgoing {
            self.ctx.engine.deliver(routed);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Returning results
    // ------------------------------------------------------------------

    /// Pair `result` with the originating command and forward it
    /// upstream. The command handle stays usable for further non-final
    /// results until a final one is returned.
    pub fn return_result(&mut self, mut result: CmdResult, cmd: &Cmd) -> Result<()> {
        result.0.cmd_id = cmd.cmd_id().to_string();
        result.0.seq_id = cmd.seq_id().to_string();
        self.return_result_inner(result)
    }

    /// Forward a result that already carries its correlation (created via
    /// `CmdResult::from_cmd`).
    pub fn return_result_directly(&mut self, result: CmdResult) -> Result<()> {
        self.return_result_inner(result)
    }

    fn return_result_inner(&mut self, mut result: CmdResult) -> Result<()> {
        if !self.core.is_open() {
            return Err(Error::EnvClosed(format!(
                "extension '{}' has deinitialized",
                self.core.name
            )));
        }
        if result.cmd_id().is_empty() {
            return Err(Error::InvalidArgument(
                "result is not paired with a command".into(),
            ));
        }
        self.core.schema.check_msg(&result, Direction::Egress)?;

        let is_final = result.is_final();
        let Some(in_path) = self
            .core
            .path_table
            .take_in_path_for_result(result.cmd_id(), is_final)
        else {
            // A final result already consumed the path; late results for
            // the same command are dropped.
            tracing::debug!(
                extension = %self.core.name,
                cmd_id = %result.cmd_id(),
                "result after final, dropped"
            );
            return Ok(());
        };

        result.0.cmd_id = in_path.cmd_id;
        result.0.seq_id = in_path.seq_id;
        result.0.name = in_path.cmd_name;
        if let crate::msg::Payload::CmdResult { original_kind, .. } = &mut result.0.payload {
            *original_kind = in_path.original_kind;
        }
        // Receivers with a path table recompute this against their own
        // fan-out counters; external clients see the returner's view.
        result.set_completed(is_final);
        result.0.src = self.core.loc.clone();
        result.0.dests = vec![in_path.return_loc];
        result.0.seal();
        self.ctx.engine.deliver(result.into_msg());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------

    /// Read from the extension property store, or from the app store via
    /// the `app:` prefix.
    pub fn get_property(&self, path: &str) -> Result<Option<Value>> {
        if let Some(app_path) = path.strip_prefix("app:") {
            let props = self.ctx.engine.app_props.read();
            return Ok(props.get_path(app_path)?.cloned());
        }
        Ok(self.core.props.get_path(path)?.cloned())
    }

    /// Write to the extension property store. App-store writes are
    /// restricted to app-scoped lifecycle and rejected here.
    pub fn set_property(&mut self, path: &str, value: impl Into<Value>) -> Result<()> {
        if path.starts_with("app:") {
            return Err(Error::InvalidArgument(
                "app property store is read-only from extensions".into(),
            ));
        }
        let value = value.into();
        self.core.schema.check_property(path, &value)?;
        self.core.props.set_path(path, value)
    }

    /// Replace the whole property store from JSON.
    pub fn init_property_from_json(&mut self, json_str: &str) -> Result<()> {
        let parsed = json::parse(json_str)?;
        if !parsed.is_object() {
            return Err(Error::InvalidArgument(
                "extension properties must be a JSON object".into(),
            ));
        }
        self.core.props = parsed;
        Ok(())
    }

    /// Render the property store as JSON.
    pub fn get_property_to_json(&self) -> Result<String> {
        json::to_string(&self.core.props)
    }

    // ------------------------------------------------------------------
    // Cross-thread access
    // ------------------------------------------------------------------

    /// Create a proxy handle that outer threads use to reach back into
    /// this extension. The group run loop stays alive until every proxy
    /// is dropped.
    pub fn proxy(&mut self) -> EnvProxy {
        self.core.live_proxies += 1;
        EnvProxy::new(self.core.name.clone(), self.ctx.inbox.clone())
    }
}
