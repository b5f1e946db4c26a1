//! Control messages honoured in `Auto` mode.
//!
//! A received payload that is a JSON object with a `command` field is a
//! control message:
//!
//! ```json
//! {"command": "set_role", "role": "server"}
//! {"command": "update_config", "key": "port", "value": 50052}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A control instruction carried in a message payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Switch the node's mode.
    SetRole { role: String },
    /// Apply `DcfConfig::update(key, value)`.
    UpdateConfig { key: String, value: Value },
}

impl ControlCommand {
    /// Parse `payload`; anything that is not a control object is `None`.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let first = payload.iter().find(|b| !b.is_ascii_whitespace())?;
        if *first != b'{' {
            return None;
        }
        serde_json::from_slice(payload).ok()
    }
}

/// String form of a JSON value as accepted by `DcfConfig::update`.
pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
