use crate::core::domain::{
    error::SyncResult,
    model::{
        guest_agent::GuestExecStatus,
        node_list_item::NodeListItem,
        os_info::OsInfo,
        storage::{StorageContentItem, StorageListItem},
        vm::{VmConfig, VmListItem},
    },
};
use async_trait::async_trait;

/// Read access to the virtualization platform, plus its guest-agent channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Hypervisor: Send + Sync {
    async fn list_nodes(&self) -> SyncResult<Vec<NodeListItem>>;

    async fn list_vm_summaries(&self, node: &str) -> SyncResult<Vec<VmListItem>>;

    async fn get_vm_config(&self, node: &str, vmid: u32) -> SyncResult<VmConfig>;

    async fn list_storages(&self, node: &str) -> SyncResult<Vec<StorageListItem>>;

    async fn list_storage_content(
        &self,
        node: &str,
        storage: &str,
    ) -> SyncResult<Vec<StorageContentItem>>;

    /// Starts `argv` inside the guest and returns its process id.
    ///
    /// # Errors
    /// Returns `SyncError::GuestAgentUnavailable` if the VM exposes no
    /// command-execution capability.
    async fn submit_guest_command(&self, node: &str, vmid: u32, argv: Vec<String>)
    -> SyncResult<u64>;

    async fn poll_guest_command(&self, node: &str, vmid: u32, pid: u64)
    -> SyncResult<GuestExecStatus>;

    async fn get_guest_os_info(&self, node: &str, vmid: u32) -> SyncResult<OsInfo>;
}
