//! Reconciles NetBox virtualization records with the live state of a
//! Proxmox VE cluster.
//!
//! A run collects every VM of the cluster (with disks from the node storages
//! and network facts from the QEMU guest agent), matches them against the
//! externally managed NetBox records and creates, updates or deletes
//! records until both sides agree:
//!
//! - virtual machines, matched by generation id (NetBox `serial`)
//! - VM interfaces, matched by name
//! - IP addresses, matched by address and prefix length
//! - the VM's primary IPv4/IPv6 references
//! - virtual disks, matched by volume id
//!
//! # Examples
//!
//! ```no_run
//! use pve_netbox_sync::{SyncConfig, SyncResult};
//!
//! #[tokio::main]
//! async fn main() -> SyncResult<()> {
//!     let config = SyncConfig::from_env()?;
//!     let report = pve_netbox_sync::connect(&config)?.run().await?;
//!     println!("vms: {}", report.vms);
//!     Ok(())
//! }
//! ```

mod config;
mod core;
mod sync;


pub use crate::config::{
    NetboxConnectionConfig, PveConnectionConfig, RateLimitConfig, SyncConfig, SyncSettings,
};
pub use crate::core::domain::{
    error::{SyncError, SyncResult, ValidationError},
    model::{
        interface::PveInterface,
        netbox::EntityKind,
        os_info::OsInfo,
        reconciled::{Reconciled, SyncAction},
        storage::PveDisk,
        vm::PveVm,
    },
    port::{Criteria, Hypervisor, Inventory},
    value_object::{DEFAULT_INTERFACE_BLACKLIST, InterfaceBlacklist},
};
pub use crate::core::infrastructure::{api_client::PveApiClient, netbox_client::NetboxClient};
pub use crate::sync::application::service::sync_service::{
    ActionCounts, InventorySync, SyncReport, UnitFailure,
};
use std::sync::Arc;

/// Builds both HTTP clients from `config` and wires them into an [`InventorySync`].
///
/// # Errors
/// Returns `SyncError::Connection` if an HTTP client cannot be built and
/// `SyncError::Validation` if a configured address is not a valid URL.
pub fn connect(config: &SyncConfig) -> SyncResult<InventorySync> {
    let hypervisor = PveApiClient::new(&config.pve, config.rate_limit)?;
    let inventory = NetboxClient::new(&config.netbox, config.rate_limit)?;
    Ok(InventorySync::new(
        Arc::new(hypervisor),
        Arc::new(inventory),
        &config.settings,
    ))
}
