use serde::{Deserialize, Serialize};
use std::fmt;

/// Operating system identity reported by the guest agent's `get-osinfo`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct OsInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub pretty_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub version_id: Option<String>,
}

/// Envelope of the `get-osinfo` agent response.
#[derive(Debug, Clone, Deserialize)]
pub struct OsInfoResponse {
    pub result: OsInfo,
}

impl fmt::Display for OsInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(pretty) = &self.pretty_name {
            return f.write_str(pretty);
        }
        let name = self.name.as_deref().or(self.id.as_deref()).unwrap_or("unknown");
        match self.version.as_deref().or(self.version_id.as_deref()) {
            Some(version) => write!(f, "{name} {version}"),
            None => f.write_str(name),
        }
    }
}
