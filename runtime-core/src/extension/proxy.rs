//! Env proxy: reaching an extension from outer threads
//!
//! User code may spawn its own threads; an `EnvProxy` is the only legal
//! way back in. `notify` enqueues a closure onto the extension's group
//! thread; lock mode gives the outer thread exclusive FIFO access so a
//! burst of notifications is processed without interleaving.
//!
//! A live proxy keeps the group run loop alive past the extension's
//! `on_deinit`; dropping the proxy releases it.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot};

use crate::extension::env::EnvHandle;
use crate::extension::thread::GroupEvent;
use crate::{Error, Result};

static NEXT_PROXY_ID: AtomicU64 = AtomicU64::new(1);

/// Cross-thread handle onto one extension.
///
/// Created on the extension thread via `EnvHandle::proxy`, then moved to
/// the outer thread. Not cloneable: each outer thread takes its own.
pub struct EnvProxy {
    ext: String,
    proxy_id: u64,
    inbox: mpsc::UnboundedSender<GroupEvent>,
    locked: bool,
}

impl EnvProxy {
    pub(crate) fn new(ext: String, inbox: mpsc::UnboundedSender<GroupEvent>) -> Self {
        EnvProxy {
            ext,
            proxy_id: NEXT_PROXY_ID.fetch_add(1, Ordering::Relaxed),
            inbox,
            locked: false,
        }
    }

    /// Enqueue `f` onto the extension thread. Non-blocking; the closure
    /// runs there with a live env handle.
    pub fn notify(&self, f: impl FnOnce(&mut EnvHandle<'_>) + Send + 'static) -> Result<()> {
        self.inbox
            .send(GroupEvent::Notify {
                ext: self.ext.clone(),
                proxy_id: self.proxy_id,
                f: Box::new(f),
            })
            .map_err(|_| Error::EnvClosed(format!("extension '{}' run loop ended", self.ext)))
    }

    /// Block until the extension thread grants this proxy exclusive
    /// access to its notification slot. Must be paired with
    /// `release_lock_mode`, and must not be called from the extension
    /// thread itself.
    pub fn acquire_lock_mode(&mut self) -> Result<()> {
        if self.locked {
            return Err(Error::InvalidArgument("lock mode already held".into()));
        }
        let (granted_tx, granted_rx) = oneshot::channel();
        self.inbox
            .send(GroupEvent::AcquireLock {
                proxy_id: self.proxy_id,
                granted: granted_tx,
            })
            .map_err(|_| Error::EnvClosed(format!("extension '{}' run loop ended", self.ext)))?;
        granted_rx
            .blocking_recv()
            .map_err(|_| Error::EnvClosed(format!("extension '{}' run loop ended", self.ext)))?;
        self.locked = true;
        Ok(())
    }

    /// Release lock mode; deferred work resumes on the extension thread.
    pub fn release_lock_mode(&mut self) -> Result<()> {
        if !self.locked {
            return Err(Error::InvalidArgument("lock mode not held".into()));
        }
        self.inbox
            .send(GroupEvent::ReleaseLock {
                proxy_id: self.proxy_id,
            })
            .map_err(|_| Error::EnvClosed(format!("extension '{}' run loop ended", self.ext)))?;
        self.locked = false;
        Ok(())
    }

    /// Destroy the proxy. Equivalent to dropping it; named for symmetry
    /// with creation.
    pub fn close(self) {}
}

impl Drop for EnvProxy {
    fn drop(&mut self) {
        if self.locked {
            let _ = self.inbox.send(GroupEvent::ReleaseLock {
                proxy_id: self.proxy_id,
            });
        }
        let _ = self.inbox.send(GroupEvent::ProxyClosed {
            ext: self.ext.clone(),
        });
    }
}
