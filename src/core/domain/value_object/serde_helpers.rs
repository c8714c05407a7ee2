//! Serde helpers for the loosely typed fields of the Proxmox API.

use serde::{Deserialize, Deserializer};

/// Deserialization for flags the API reports as `0`/`1`, `true`/`false` or `"1"`.
pub mod flexible_bool {
    use super::*;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::Bool(b) => Ok(b),
            serde_json::Value::Number(n) => Ok(n.as_i64().unwrap_or(0) != 0),
            serde_json::Value::String(s) => Ok(matches!(s.trim(), "1" | "true" | "yes")),
            serde_json::Value::Null => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "expected boolean-like value, got {other}"
            ))),
        }
    }
}

/// Deserialization for optional property strings that may arrive as bare numbers
/// (e.g. `agent: 1` versus `agent: "enabled=1,fstrim_cloned_disks=1"`).
pub mod string_or_number {
    use super::*;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<serde_json::Value>::deserialize(deserializer)?;
        Ok(match value {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(s),
            Some(other) => Some(other.to_string()),
        })
    }
}

/// Splits a Proxmox tag string (`;` or `,` separated) into trimmed, non-empty tags.
pub fn split_tags(raw: &str) -> Vec<String> {
    raw.split([';', ','])
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

/// Returns whether a Proxmox `agent` property string enables the guest agent.
///
/// The property is either a bare flag (`1`) or a property list whose
/// `enabled` key (or leading positional value) carries the flag.
pub fn agent_enabled(raw: &str) -> bool {
    raw.split(',').any(|part| {
        let part = part.trim();
        match part.split_once('=') {
            Some((key, value)) => key == "enabled" && value == "1",
            None => part == "1",
        }
    })
}
