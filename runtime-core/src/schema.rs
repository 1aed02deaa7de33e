//! Schema-check predicates
//!
//! Schema validation itself lives outside the core; the runtime only
//! consumes predicates. They run at an extension's message ingress and
//! egress points and on property-store writes, not on every in-flight
//! mutation.

use std::sync::Arc;

use crate::msg::Msg;
use crate::value::Value;
use crate::Result;

/// Which boundary a message check runs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Message about to be dispatched to a handler
    Ingress,
    /// Message about to leave through a `send_*`
    Egress,
}

type MsgCheck = dyn Fn(&Msg, Direction) -> Result<()> + Send + Sync;
type PropertyCheck = dyn Fn(&str, &Value) -> Result<()> + Send + Sync;

/// Per-extension schema predicates. The default checks nothing.
#[derive(Clone, Default)]
pub struct Schema {
    msg_check: Option<Arc<MsgCheck>>,
    property_check: Option<Arc<PropertyCheck>>,
}

impl Schema {
    /// Predicate over messages crossing the extension boundary.
    pub fn with_msg_check(
        mut self,
        check: impl Fn(&Msg, Direction) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.msg_check = Some(Arc::new(check));
        self
    }

    /// Predicate over property-store writes.
    pub fn with_property_check(
        mut self,
        check: impl Fn(&str, &Value) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.property_check = Some(Arc::new(check));
        self
    }

    pub(crate) fn check_msg(&self, msg: &Msg, direction: Direction) -> Result<()> {
        match &self.msg_check {
            Some(check) => check(msg, direction),
            None => Ok(()),
        }
    }

    pub(crate) fn check_property(&self, path: &str, value: &Value) -> Result<()> {
        match &self.property_check {
            Some(check) => check(path, value),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema")
            .field("msg_check", &self.msg_check.is_some())
            .field("property_check", &self.property_check.is_some())
            .finish()
    }
}
