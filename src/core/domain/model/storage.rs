//! Storage listings and the virtual disks derived from them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A storage as returned by `/nodes/{node}/storage`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StorageListItem {
    /// Storage identifier (e.g., `local-lvm`).
    pub storage: String,
    /// Comma separated content types (e.g., `images,rootdir`).
    #[serde(default)]
    pub content: String,
}

impl StorageListItem {
    /// Returns true if the storage can hold VM disk images.
    #[must_use]
    pub fn holds_images(&self) -> bool {
        self.content.split(',').any(|c| c.trim() == "images")
    }
}

/// A volume as returned by `/nodes/{node}/storage/{storage}/content`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StorageContentItem {
    /// Volume identifier (`storage:name`).
    pub volid: String,
    /// Owning VM, absent for ISOs, templates and backups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vmid: Option<u32>,
    /// Allocated size in bytes.
    #[serde(default)]
    pub size: u64,
}

/// A virtual disk owned by a VM.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PveDisk {
    /// Volume identifier, also the natural key.
    pub id: String,
    pub vmid: u32,
    pub size_bytes: u64,
}

impl PveDisk {
    /// Builds a disk from a content entry; entries without an owner yield `None`.
    pub fn from_content(item: &StorageContentItem) -> Option<Self> {
        item.vmid.map(|vmid| Self {
            id: item.volid.clone(),
            vmid,
            size_bytes: item.size,
        })
    }

    #[must_use]
    pub fn size_mib(&self) -> u64 {
        self.size_bytes / (1024 * 1024)
    }
}

impl fmt::Display for PveDisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "id={}@{}:size={}M", self.id, self.vmid, self.size_mib())
    }
}
