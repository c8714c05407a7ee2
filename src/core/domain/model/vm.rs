//! Domain models for QEMU virtual machines.
//!
//! This module defines the wire structures read from the Proxmox API and the
//! authoritative [`PveVm`] record assembled from them by the fact collector.

use super::{interface::PveInterface, os_info::OsInfo, storage::PveDisk};
use crate::core::domain::value_object::serde_helpers::{self, string_or_number};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// A virtual machine as returned by the `/nodes/{node}/qemu` endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct VmListItem {
    /// The VM identifier (unique per cluster).
    pub vmid: u32,
    /// Human-readable name.
    #[serde(default)]
    pub name: Option<String>,
    /// Current status (e.g., "running", "stopped").
    pub status: String,
    /// Number of virtual CPUs.
    #[serde(default, alias = "maxcpu")]
    pub cpus: u32,
    /// Maximum memory in bytes.
    #[serde(default)]
    pub maxmem: u64,
}

impl VmListItem {
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }
}

/// VM configuration from `/nodes/{node}/qemu/{vmid}/config`.
///
/// Only the properties that feed the inventory are modeled.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct VmConfig {
    /// VM name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// VM generation id, stable across reboots and migrations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vmgenid: Option<String>,
    /// Tags, `;` separated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    /// Guest agent property string (e.g. `1` or `enabled=1,fstrim_cloned_disks=1`).
    #[serde(
        default,
        deserialize_with = "string_or_number::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub agent: Option<String>,
}

impl VmConfig {
    /// Returns true if the QEMU guest agent is enabled for this VM.
    #[must_use]
    pub fn agent_enabled(&self) -> bool {
        self.agent
            .as_deref()
            .is_some_and(serde_helpers::agent_enabled)
    }

    /// Returns the parsed tag list.
    #[must_use]
    pub fn tag_list(&self) -> Vec<String> {
        self.tags
            .as_deref()
            .map(serde_helpers::split_tags)
            .unwrap_or_default()
    }
}

/// A virtual machine as observed on the hypervisor: the authoritative side of
/// VM reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct PveVm {
    /// Node the VM currently runs on.
    pub node: String,
    pub vmid: u32,
    pub name: String,
    pub vcpus: u32,
    /// RAM in bytes.
    pub memory_bytes: u64,
    /// Generation UUID, the cross-system natural key.
    pub generation_id: String,
    pub tags: Vec<String>,
    pub primary_ipv4: Option<Ipv4Addr>,
    pub primary_ipv6: Option<Ipv6Addr>,
    pub disks: Vec<PveDisk>,
    pub interfaces: Vec<PveInterface>,
    pub os_info: Option<OsInfo>,
}

impl PveVm {
    /// RAM rounded down to whole MiB.
    #[must_use]
    pub fn memory_mib(&self) -> u64 {
        self.memory_bytes / (1024 * 1024)
    }
}

impl fmt::Display for PveVm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |items: Vec<String>| items.join(";");
        write!(
            f,
            "id={}:{}@{},cpu={},ram={}M,ipv4={},genid={},disks=[{}],ifaces=[{}]",
            self.name,
            self.vmid,
            self.node,
            self.vcpus,
            self.memory_mib(),
            self.primary_ipv4
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "none".to_string()),
            self.generation_id,
            join(self.disks.iter().map(ToString::to_string).collect()),
            join(self.interfaces.iter().map(ToString::to_string).collect()),
        )
    }
}
