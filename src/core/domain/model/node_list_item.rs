//! Domain model for node list items from the `/nodes` endpoint.

use serde::{Deserialize, Serialize};

/// A node in the Proxmox cluster.
///
/// Only the fields the collector needs are modeled; the endpoint returns
/// many more usage statistics which are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NodeListItem {
    /// The node name (e.g., "pve1").
    pub node: String,
    /// Current node status (e.g., "online", "offline", "unknown").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl NodeListItem {
    /// Returns true unless the node explicitly reports itself as not online.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.status.as_deref().is_none_or(|status| status == "online")
    }
}
