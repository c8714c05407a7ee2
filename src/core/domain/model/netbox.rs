//! Downstream NetBox records and the typed field maps written to them.
//!
//! Records only model the identifier and the natural-key fields the matcher
//! compares; everything else in a NetBox payload is ignored on read. Field
//! maps are serialized at the inventory boundary, where the externally
//! managed marker is merged into `custom_fields`.

use super::{interface::PveInterface, storage::PveDisk, vm::PveVm};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;

/// NetBox object type of VM interfaces, used for IP assignment.
pub const VM_INTERFACE_OBJECT_TYPE: &str = "virtualization.vminterface";

/// Status written to every synchronized VM and IP address.
pub const STATUS_ACTIVE: &str = "active";

/// The NetBox endpoints the engine reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Device,
    VirtualMachine,
    VirtualDisk,
    VmInterface,
    IpAddress,
}

impl EntityKind {
    /// REST path relative to `/api/`.
    #[must_use]
    pub fn endpoint(self) -> &'static str {
        match self {
            EntityKind::Device => "dcim/devices/",
            EntityKind::VirtualMachine => "virtualization/virtual-machines/",
            EntityKind::VirtualDisk => "virtualization/virtual-disks/",
            EntityKind::VmInterface => "virtualization/interfaces/",
            EntityKind::IpAddress => "ipam/ip-addresses/",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityKind::Device => "device",
            EntityKind::VirtualMachine => "virtual machine",
            EntityKind::VirtualDisk => "virtual disk",
            EntityKind::VmInterface => "VM interface",
            EntityKind::IpAddress => "IP address",
        })
    }
}

/// A record fetched from the inventory, identified by an opaque numeric id.
pub trait DownstreamRecord: DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> u64;
}

/// Nested object reference (`{"id": 3, ...}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct NestedRef {
    pub id: u64,
}

/// A hypervisor node as recorded in `dcim/devices`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NetboxDevice {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub site: Option<NestedRef>,
    #[serde(default)]
    pub cluster: Option<NestedRef>,
}

impl DownstreamRecord for NetboxDevice {
    const KIND: EntityKind = EntityKind::Device;

    fn id(&self) -> u64 {
        self.id
    }
}

/// Placement of a VM: the hypervisor device and its site/cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HypervisorRef {
    pub device: u64,
    pub site: Option<u64>,
    pub cluster: Option<u64>,
}

impl From<&NetboxDevice> for HypervisorRef {
    fn from(device: &NetboxDevice) -> Self {
        Self {
            device: device.id,
            site: device.site.map(|s| s.id),
            cluster: device.cluster.map(|c| c.id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NetboxVm {
    pub id: u64,
    pub name: String,
    /// Holds the generation UUID of managed VMs.
    #[serde(default)]
    pub serial: Option<String>,
}

impl DownstreamRecord for NetboxVm {
    const KIND: EntityKind = EntityKind::VirtualMachine;

    fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NetboxDisk {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
}

impl DownstreamRecord for NetboxDisk {
    const KIND: EntityKind = EntityKind::VirtualDisk;

    fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NetboxInterface {
    pub id: u64,
    pub name: String,
}

impl DownstreamRecord for NetboxInterface {
    const KIND: EntityKind = EntityKind::VmInterface;

    fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NetboxIp {
    pub id: u64,
    /// Address with prefix length, e.g. `10.0.0.5/24`.
    pub address: String,
}

impl DownstreamRecord for NetboxIp {
    const KIND: EntityKind = EntityKind::IpAddress;

    fn id(&self) -> u64 {
        self.id
    }
}

/// An address collected from a guest interface: the authoritative side of
/// IP reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestIp {
    /// Address with prefix length.
    pub address: String,
    /// Name of the owning interface.
    pub interface: String,
}

impl GuestIp {
    pub fn of_interface(interface: &PveInterface) -> Vec<GuestIp> {
        interface
            .addresses()
            .map(|address| GuestIp {
                address: address.clone(),
                interface: interface.name.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VmCustomFields {
    pub vmid: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VmFields {
    pub name: String,
    pub status: &'static str,
    pub serial: String,
    pub site: Option<u64>,
    pub cluster: Option<u64>,
    pub device: u64,
    pub vcpus: u32,
    /// RAM in MiB.
    pub memory: u64,
    pub custom_fields: VmCustomFields,
}

impl VmFields {
    pub fn new(vm: &PveVm, hypervisor: &HypervisorRef) -> Self {
        Self {
            name: vm.name.clone(),
            status: STATUS_ACTIVE,
            serial: vm.generation_id.clone(),
            site: hypervisor.site,
            cluster: hypervisor.cluster,
            device: hypervisor.device,
            vcpus: vm.vcpus,
            memory: vm.memory_mib(),
            custom_fields: VmCustomFields { vmid: vm.vmid },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskFields {
    pub virtual_machine: u64,
    pub name: String,
    /// Size in MiB.
    pub size: u64,
}

impl DiskFields {
    pub fn new(disk: &PveDisk, virtual_machine: u64) -> Self {
        Self {
            virtual_machine,
            name: disk.id.clone(),
            size: disk.size_mib(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterfaceFields {
    pub virtual_machine: u64,
    pub name: String,
    pub mtu: Option<u32>,
    pub primary_mac_address: Option<String>,
    pub enabled: bool,
}

impl InterfaceFields {
    pub fn new(interface: &PveInterface, virtual_machine: u64) -> Self {
        Self {
            virtual_machine,
            name: interface.name.clone(),
            mtu: interface.mtu,
            primary_mac_address: interface.mac.clone(),
            enabled: interface.up,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IpFields {
    pub address: String,
    pub assigned_object_type: &'static str,
    pub assigned_object_id: u64,
    pub status: &'static str,
}

impl IpFields {
    pub fn new(ip: &GuestIp, interface_id: u64) -> Self {
        Self {
            address: ip.address.clone(),
            assigned_object_type: VM_INTERFACE_OBJECT_TYPE,
            assigned_object_id: interface_id,
            status: STATUS_ACTIVE,
        }
    }
}

/// Patch of a VM's primary address references; `None` clears the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PrimaryIpFields {
    pub primary_ip4: Option<u64>,
    pub primary_ip6: Option<u64>,
}
