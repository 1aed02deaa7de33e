//! Per-connection message conversion
//!
//! A conversion rule rewrites the property bag of a message as it is
//! routed to one particular destination: copy a value from the original
//! bag to a new path, or set a fixed value. The special target path
//! `name` renames the message, which is how connection-level name mapping
//! works.

use serde::{Deserialize, Serialize};

use crate::msg::Msg;
use crate::value::{json, Value};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionMode {
    /// Deep-copy the value at `original_path` to `path`.
    FromOriginal,
    /// Set `path` to the literal `value`.
    FixedValue,
}

/// One property rewrite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionRule {
    pub path: String,

    pub conversion_mode: ConversionMode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

/// Conversion applied to a message bound for one destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsgConversion {
    /// Start from the original bag (true) or an empty one (false).
    #[serde(default = "default_keep_original")]
    pub keep_original: bool,

    pub rules: Vec<ConversionRule>,
}

fn default_keep_original() -> bool {
    true
}

impl MsgConversion {
    /// Apply the rules, replacing the message's property bag (and possibly
    /// its name) in place.
    pub fn apply(&self, msg: &mut Msg) -> Result<()> {
        let original = msg.properties().clone();
        let mut target = if self.keep_original {
            original.clone()
        } else {
            Value::object()
        };

        for rule in &self.rules {
            let value = match rule.conversion_mode {
                ConversionMode::FromOriginal => {
                    let src_path = rule.original_path.as_deref().ok_or_else(|| {
                        Error::Graph(format!(
                            "from_original rule for '{}' missing original_path",
                            rule.path
                        ))
                    })?;
                    match original.get_path(src_path)? {
                        Some(v) => v.clone(),
                        None => {
                            return Err(Error::InvalidArgument(format!(
                                "conversion source path '{src_path}' not present"
                            )))
                        }
                    }
                }
                ConversionMode::FixedValue => {
                    let literal = rule.value.as_ref().ok_or_else(|| {
                        Error::Graph(format!(
                            "fixed_value rule for '{}' missing value",
                            rule.path
                        ))
                    })?;
                    json::from_json(literal)
                }
            };

            if rule.path == "name" {
                let name = value.get_str().map_err(|_| {
                    Error::InvalidArgument("conversion target 'name' needs a string".into())
                })?;
                msg.name = name.to_string();
            } else {
                target.set_path(&rule.path, value)?;
            }
        }

        *msg.properties_mut() = target;
        Ok(())
    }
}
