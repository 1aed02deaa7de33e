//! Timer subsystem
//!
//! A `cmd_timer` never leaves the sender's thread: arming it spawns a
//! periodic task on the group's run loop that posts `cmd_timeout`
//! commands (same `timer_id`) back to the sending extension, `times`
//! times at the requested period. The timer self-disables after the last
//! firing or when the owner enters `Stopping`.

use std::time::Duration;

use tokio::sync::watch;

use crate::extension::thread::{GroupCtx, GroupEvent};
use crate::extension::{ExtCore, ResultHandler};
use crate::msg::{CmdResult, Msg, MsgKind, Payload, StatusCode};
use crate::{Error, Result};

/// Arm a timer from a `cmd_timer` message. The command is answered
/// immediately with an OK result through the sender's own path table.
pub(crate) fn arm(
    core: &mut ExtCore,
    ctx: &GroupCtx,
    msg: Msg,
    handler: Option<ResultHandler>,
    aggregate: bool,
) -> Result<()> {
    let (timer_id, timeout_us, times) = match msg.payload() {
        Payload::Timer {
            timer_id,
            timeout_us,
            times,
        } => (*timer_id, *timeout_us, *times),
        _ => {
            return Err(Error::InvalidArgument(
                "timer command without timer payload".into(),
            ))
        }
    };
    if times == 0 {
        return Err(Error::InvalidArgument("timer needs times >= 1".into()));
    }
    if timeout_us == 0 {
        return Err(Error::InvalidArgument("timer needs a non-zero period".into()));
    }
    if core.timers.contains_key(&timer_id) {
        return Err(Error::InvalidArgument(format!(
            "timer {timer_id} is already armed"
        )));
    }

    let (cancel_tx, mut cancel_rx) = watch::channel(false);
    core.timers.insert(timer_id, cancel_tx);

    let inbox = ctx.inbox.clone();
    let owner = core.loc.clone();
    let period = Duration::from_micros(timeout_us);
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + period;
        let mut ticks = tokio::time::interval_at(start, period);
        for _ in 0..times {
            tokio::select! {
                _ = ticks.tick() => {
                    let mut timeout = Msg::new(
                        MsgKind::CmdTimeout,
                        "timeout",
                        Payload::Timeout { timer_id },
                    );
                    timeout.src = owner.clone();
                    timeout.dests = vec![owner.clone()];
                    if inbox.send(GroupEvent::Deliver(timeout)).is_err() {
                        return;
                    }
                }
                _ = cancel_rx.changed() => return,
            }
        }
    });

    // Answer the timer command right away; the sender's handler observes
    // a normal completed result.
    let mut result = CmdResult(Msg::new(
        MsgKind::CmdResult,
        msg.name(),
        Payload::CmdResult {
            status: StatusCode::Ok,
            is_final: true,
            is_completed: false,
            original_kind: msg.kind(),
        },
    ));
    result.0.cmd_id = msg.cmd_id().to_string();
    result.0.seq_id = msg.seq_id().to_string();
    result.0.src = core.loc.clone();
    result.0.dests = vec![core.loc.clone()];

    let mut sealed = msg;
    sealed.seal();
    core.path_table.add_out_path(&sealed, 1, handler, aggregate);
    let _ = ctx.inbox.send(GroupEvent::Deliver(result.into_msg()));
    Ok(())
}
