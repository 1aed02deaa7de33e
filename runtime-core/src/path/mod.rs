//! Path table: routing command results back to their senders
//!
//! Every outgoing command inserts an *out path* keyed by its `cmd_id`;
//! arriving results are matched against it, fan-out counters decide the
//! `is_completed` flag, and `CompletionPolicy` decides whether the result
//! handler stays registered for streaming intermediates. Every incoming
//! command records an *in path* so that `return_result` can stamp the
//! correlation headers and walk the message backwards, hop by hop.
//!
//! The table is generic over the handler type so the routing rules can be
//! exercised without an extension runtime around them.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::msg::{CmdResult, Loc, Msg, MsgKind};

/// Whether a result handler survives the result that just arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionPolicy {
    /// The chain is complete; the handler is dropped with the entry.
    Once,
    /// Streaming intermediates (or remaining fan-out) keep the entry alive.
    Streaming,
}

/// Record of one outstanding command issued by this extension.
pub(crate) struct OutPath<H> {
    pub cmd_name: String,
    pub seq_id: String,
    pub original_kind: MsgKind,
    /// Taken out while the handler runs, put back for streaming entries.
    pub handler: Option<H>,
    /// Number of resolved destinations still owing a final result.
    pub expected_results: usize,
    pub finals_received: usize,
    /// `send_cmd` aggregates fan-out completion; `send_cmd_ex` does not.
    pub aggregate: bool,
    pub created_at: Instant,
}

/// Snapshot of an incoming command's header, kept until its final result
/// is returned upstream.
#[derive(Debug, Clone)]
pub(crate) struct InPath {
    pub cmd_id: String,
    pub seq_id: String,
    pub cmd_name: String,
    pub original_kind: MsgKind,
    /// Where results for this command go: the hop we received it from.
    pub return_loc: Loc,
    pub created_at: Instant,
}

/// What the dispatcher should do with an arriving result.
pub(crate) enum ResultAction<H> {
    /// No entry for this correlation: late or unknown result, drop it.
    Drop,
    /// Invoke `handler` (when present); re-register it afterwards when
    /// `policy` is `Streaming`.
    Deliver {
        handler: Option<H>,
        policy: CompletionPolicy,
    },
}

/// An entry flushed by timeout or shutdown, with enough of the command
/// header left to synthesize an error result.
pub(crate) struct FlushedPath<H> {
    pub cmd_id: String,
    pub cmd_name: String,
    pub seq_id: String,
    pub original_kind: MsgKind,
    pub handler: Option<H>,
}

pub(crate) struct PathTable<H> {
    out_paths: HashMap<String, OutPath<H>>,
    in_paths: HashMap<String, InPath>,
}

impl<H> Default for PathTable<H> {
    fn default() -> Self {
        Self {
            out_paths: HashMap::new(),
            in_paths: HashMap::new(),
        }
    }
}

impl<H> PathTable<H> {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Out paths
    // ------------------------------------------------------------------

    /// Register an outgoing command with `expected` resolved destinations.
    pub fn add_out_path(&mut self, cmd: &Msg, expected: usize, handler: Option<H>, aggregate: bool) {
        self.out_paths.insert(
            cmd.cmd_id().to_string(),
            OutPath {
                cmd_name: cmd.name().to_string(),
                seq_id: cmd.seq_id().to_string(),
                original_kind: cmd.kind(),
                handler,
                expected_results: expected,
                finals_received: 0,
                aggregate,
                created_at: Instant::now(),
            },
        );
    }

    /// Match an arriving result against its out path.
    ///
    /// Updates the fan-out counters and stamps `is_completed` on the
    /// result *before* the handler runs, so re-entrant sends from inside
    /// the handler observe a settled flag.
    pub fn on_result(&mut self, result: &mut CmdResult) -> ResultAction<H> {
        let cmd_id = result.cmd_id().to_string();
        let Some(entry) = self.out_paths.get_mut(&cmd_id) else {
            tracing::debug!(cmd_id = %cmd_id, name = %result.name(), "result without path entry, dropping");
            return ResultAction::Drop;
        };

        if result.is_final() {
            entry.finals_received += 1;
        }
        let done = entry.finals_received >= entry.expected_results;
        let completed = if entry.aggregate {
            done
        } else {
            result.is_final()
        };
        result.set_completed(completed);

        let handler = entry.handler.take();
        if done {
            self.out_paths.remove(&cmd_id);
            ResultAction::Deliver {
                handler,
                policy: CompletionPolicy::Once,
            }
        } else {
            ResultAction::Deliver {
                handler,
                policy: CompletionPolicy::Streaming,
            }
        }
    }

    /// Re-register a handler after a streaming delivery.
    ///
    /// The entry may have been flushed while the handler ran; the handler
    /// is dropped in that case.
    pub fn restore_handler(&mut self, cmd_id: &str, handler: H) {
        if let Some(entry) = self.out_paths.get_mut(cmd_id) {
            entry.handler = Some(handler);
        }
    }

    pub fn out_path_count(&self) -> usize {
        self.out_paths.len()
    }

    // ------------------------------------------------------------------
    // In paths
    // ------------------------------------------------------------------

    /// Snapshot an incoming command so results can be routed backwards.
    pub fn add_in_path(&mut self, cmd: &Msg) {
        self.in_paths.insert(
            cmd.cmd_id().to_string(),
            InPath {
                cmd_id: cmd.cmd_id().to_string(),
                seq_id: cmd.seq_id().to_string(),
                cmd_name: cmd.name().to_string(),
                original_kind: cmd.kind(),
                return_loc: cmd.src().clone(),
                created_at: Instant::now(),
            },
        );
    }

    /// Look up the in path for a result being returned.
    ///
    /// A final result consumes the entry: the originating command is
    /// released and later results for the same correlation are dropped.
    pub fn take_in_path_for_result(&mut self, cmd_id: &str, is_final: bool) -> Option<InPath> {
        if is_final {
            self.in_paths.remove(cmd_id)
        } else {
            self.in_paths.get(cmd_id).cloned()
        }
    }

    pub fn in_path_count(&self) -> usize {
        self.in_paths.len()
    }

    // ------------------------------------------------------------------
    // Timeout sweep and shutdown flush
    // ------------------------------------------------------------------

    /// Remove entries older than `timeout` and hand them back for error
    /// delivery.
    ///
    /// In paths live twice as long: when an upstream hop times out, this
    /// extension may still be asked to walk that hop's error result
    /// backwards in the same sweep cycle, so the backward route must
    /// outlive the forward entry.
    pub fn sweep(&mut self, timeout: Duration) -> Vec<FlushedPath<H>> {
        let now = Instant::now();
        let expired: Vec<String> = self
            .out_paths
            .iter()
            .filter(|(_, p)| now.duration_since(p.created_at) >= timeout)
            .map(|(id, _)| id.clone())
            .collect();
        let mut flushed = Vec::with_capacity(expired.len());
        for cmd_id in expired {
            if let Some(path) = self.out_paths.remove(&cmd_id) {
                flushed.push(FlushedPath {
                    cmd_id,
                    cmd_name: path.cmd_name,
                    seq_id: path.seq_id,
                    original_kind: path.original_kind,
                    handler: path.handler,
                });
            }
        }
        let in_path_horizon = timeout.saturating_mul(2);
        self.in_paths.retain(|cmd_id, p| {
            let keep = now.duration_since(p.created_at) < in_path_horizon;
            if !keep {
                tracing::debug!(cmd_id = %cmd_id, "in path expired");
            }
            keep
        });
        flushed
    }

    /// Flush every outstanding out path (extension shutdown).
    pub fn flush_all(&mut self) -> Vec<FlushedPath<H>> {
        let out: Vec<FlushedPath<H>> = self
            .out_paths
            .drain()
            .map(|(cmd_id, path)| FlushedPath {
                cmd_id,
                cmd_name: path.cmd_name,
                seq_id: path.seq_id,
                original_kind: path.original_kind,
                handler: path.handler,
            })
            .collect();
        self.in_paths.clear();
        out
    }
}
