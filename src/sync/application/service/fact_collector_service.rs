use super::guest_command_service::{GuestCommandService, VmHandle};
use crate::core::domain::{
    error::{SyncError, SyncResult},
    model::{
        interface::{PveInterface, parse_ip_addr, parse_route_source},
        os_info::OsInfo,
        storage::PveDisk,
        vm::{PveVm, VmListItem},
    },
    port::Hypervisor,
    value_object::InterfaceBlacklist,
};
use crate::core::infrastructure::worker_pool::WorkerPool;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Lists the guest's links and their addresses.
pub const IP_ADDR_COMMAND: &[&str] = &["ip", "-j", "addr"];
/// Resolves the source address of the default IPv4 route.
pub const ROUTE_V4_COMMAND: &[&str] = &["ip", "-j", "-4", "route", "get", "1.1.1.1"];
/// Resolves the source address of the default IPv6 route.
pub const ROUTE_V6_COMMAND: &[&str] = &["ip", "-j", "-6", "route", "get", "2606:4700:4700::1111"];

/// The authoritative snapshot of one run.
#[derive(Debug, Clone, Default)]
pub struct CollectedInventory {
    /// Names of every node visited.
    pub nodes: Vec<String>,
    pub vms: Vec<PveVm>,
}

/// Facts gathered from inside a running guest.
#[derive(Debug, Clone, Default, PartialEq)]
struct GuestFacts {
    interfaces: Vec<PveInterface>,
    primary_ipv4: Option<std::net::Ipv4Addr>,
    primary_ipv6: Option<std::net::Ipv6Addr>,
    os_info: Option<OsInfo>,
}

/// Builds the authoritative VM records from the hypervisor.
///
/// Guest degradation (agent missing, commands failing or timing out) only
/// empties that VM's network facts. Failures of the hypervisor API itself
/// fail the whole collection, so a run never reconciles against a partial
/// snapshot.
#[derive(Clone)]
pub struct FactCollectorService {
    hypervisor: Arc<dyn Hypervisor>,
    guest: GuestCommandService,
    blacklist: InterfaceBlacklist,
    guest_timeout: Duration,
    max_parallelism: usize,
}

impl FactCollectorService {
    pub fn new(
        hypervisor: Arc<dyn Hypervisor>,
        blacklist: InterfaceBlacklist,
        guest_timeout: Duration,
        poll_interval: Duration,
        max_parallelism: usize,
    ) -> Self {
        Self {
            guest: GuestCommandService::new(Arc::clone(&hypervisor), poll_interval),
            hypervisor,
            blacklist,
            guest_timeout,
            max_parallelism,
        }
    }

    /// Collects every VM of every node.
    ///
    /// # Errors
    /// Returns the first hypervisor API error, or `SyncError::Connection` if
    /// a node is not online.
    #[instrument(skip(self))]
    pub async fn collect(&self) -> SyncResult<CollectedInventory> {
        let nodes = self.hypervisor.list_nodes().await?;
        if let Some(offline) = nodes.iter().find(|node| !node.is_online()) {
            return Err(SyncError::Connection(format!(
                "node '{}' is {}; refusing to reconcile a partial cluster",
                offline.node,
                offline.status.as_deref().unwrap_or("unknown")
            )));
        }

        let mut collected = CollectedInventory::default();
        for node in nodes {
            let vms = self.collect_node(&node.node).await?;
            info!(node = %node.node, vms = vms.len(), "collected node");
            collected.vms.extend(vms);
            collected.nodes.push(node.node);
        }
        Ok(collected)
    }

    #[instrument(skip(self))]
    async fn collect_node(&self, node: &str) -> SyncResult<Vec<PveVm>> {
        let mut disks = self.node_disks(node).await?;
        let summaries = self.hypervisor.list_vm_summaries(node).await?;

        let mut pool = WorkerPool::new(self.max_parallelism);
        for summary in summaries {
            let collector = self.clone();
            let node = node.to_string();
            let vm_disks = disks.remove(&summary.vmid).unwrap_or_default();
            pool.spawn(async move { collector.collect_vm(node, summary, vm_disks).await });
        }

        let mut vms = Vec::new();
        for joined in pool.join_all().await {
            if let Some(vm) = joined.and_then(|collected| collected)? {
                vms.push(vm);
            }
        }
        Ok(vms)
    }

    /// Lists the image volumes of every storage on `node`, grouped by owning VM.
    ///
    /// Shared storages are listed once per node, so volumes are deduplicated
    /// by identifier.
    async fn node_disks(&self, node: &str) -> SyncResult<HashMap<u32, Vec<PveDisk>>> {
        let mut seen = HashSet::new();
        let mut by_vm: HashMap<u32, Vec<PveDisk>> = HashMap::new();

        for storage in self.hypervisor.list_storages(node).await? {
            if !storage.holds_images() {
                continue;
            }
            let content = self
                .hypervisor
                .list_storage_content(node, &storage.storage)
                .await?;
            for disk in content.iter().filter_map(PveDisk::from_content) {
                if seen.insert(disk.id.clone()) {
                    by_vm.entry(disk.vmid).or_default().push(disk);
                }
            }
        }
        Ok(by_vm)
    }

    async fn collect_vm(
        &self,
        node: String,
        summary: VmListItem,
        disks: Vec<PveDisk>,
    ) -> SyncResult<Option<PveVm>> {
        let config = self.hypervisor.get_vm_config(&node, summary.vmid).await?;
        let Some(generation_id) = config.vmgenid.clone() else {
            warn!(%node, vmid = summary.vmid, "VM has no generation id; skipping");
            return Ok(None);
        };

        let handle = VmHandle::new(node.as_str(), summary.vmid);
        let facts = if summary.is_running() && config.agent_enabled() {
            self.guest_facts(&handle).await
        } else {
            GuestFacts::default()
        };

        let vm = PveVm {
            name: summary
                .name
                .clone()
                .or_else(|| config.name.clone())
                .unwrap_or_else(|| format!("vm-{}", summary.vmid)),
            node,
            vmid: summary.vmid,
            vcpus: summary.cpus,
            memory_bytes: summary.maxmem,
            generation_id,
            tags: config.tag_list(),
            primary_ipv4: facts.primary_ipv4,
            primary_ipv6: facts.primary_ipv6,
            disks,
            interfaces: facts.interfaces,
            os_info: facts.os_info,
        };
        debug!(%vm, "collected VM");
        Ok(Some(vm))
    }

    async fn guest_facts(&self, handle: &VmHandle) -> GuestFacts {
        let (addr, route_v4, route_v6, os_info) = tokio::join!(
            self.guest.execute(handle, IP_ADDR_COMMAND, self.guest_timeout),
            self.guest.execute(handle, ROUTE_V4_COMMAND, self.guest_timeout),
            self.guest.execute(handle, ROUTE_V6_COMMAND, self.guest_timeout),
            tokio::time::timeout(
                self.guest_timeout,
                self.hypervisor.get_guest_os_info(&handle.node, handle.vmid),
            ),
        );

        let interfaces = addr
            .map(|output| {
                parse_ip_addr(&output, &self.blacklist).unwrap_or_else(|e| {
                    debug!(vmid = handle.vmid, error = %e, "unparseable ip addr output");
                    Vec::new()
                })
            })
            .unwrap_or_default();

        let os_info = match os_info {
            Ok(Ok(os_info)) => Some(os_info),
            Ok(Err(e)) => {
                debug!(vmid = handle.vmid, error = %e, "no OS info");
                None
            }
            Err(_) => {
                debug!(vmid = handle.vmid, "OS info request timed out");
                None
            }
        };

        GuestFacts {
            interfaces,
            primary_ipv4: route_source(handle, route_v4).and_then(|ip| match ip {
                IpAddr::V4(ip) => Some(ip),
                IpAddr::V6(_) => None,
            }),
            primary_ipv6: route_source(handle, route_v6).and_then(|ip| match ip {
                IpAddr::V6(ip) => Some(ip),
                IpAddr::V4(_) => None,
            }),
            os_info,
        }
    }
}

fn route_source(handle: &VmHandle, output: Option<String>) -> Option<IpAddr> {
    parse_route_source(&output?)
        .map_err(|e| debug!(vmid = handle.vmid, error = %e, "unparseable route output"))
        .ok()
        .flatten()
}
