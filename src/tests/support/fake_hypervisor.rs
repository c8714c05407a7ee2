use crate::core::domain::{
    error::{SyncError, SyncResult},
    model::{
        guest_agent::GuestExecStatus,
        node_list_item::NodeListItem,
        os_info::OsInfo,
        storage::{StorageContentItem, StorageListItem},
        vm::{VmConfig, VmListItem},
    },
    port::Hypervisor,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

pub const GUEST_IP_ADDR: &str = r#"[
    {"ifindex":1,"ifname":"lo","flags":["LOOPBACK","UP"],"mtu":65536,"address":"00:00:00:00:00:00",
     "addr_info":[{"family":"inet","local":"127.0.0.1","prefixlen":8,"scope":"host"}]},
    {"ifindex":2,"ifname":"eth0","flags":["BROADCAST","UP","LOWER_UP"],"mtu":1500,"operstate":"UP",
     "address":"bc:24:11:aa:bb:cc",
     "addr_info":[
        {"family":"inet","local":"10.0.0.5","prefixlen":24,"scope":"global"},
        {"family":"inet6","local":"2001:db8::5","prefixlen":64,"scope":"global"},
        {"family":"inet6","local":"fe80::1","prefixlen":64,"scope":"link"}]},
    {"ifindex":3,"ifname":"veth1234","flags":["UP"],"mtu":1500,"addr_info":[]}
]"#;
pub const GUEST_ROUTE_V4: &str = r#"[{"dst":"1.1.1.1","dev":"eth0","prefsrc":"10.0.0.5"}]"#;
pub const GUEST_ROUTE_V6: &str =
    r#"[{"dst":"2606:4700:4700::1111","dev":"eth0","prefsrc":"2001:db8::5"}]"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestBehavior {
    /// Submissions fail as if the agent were not running.
    Unavailable,
    /// Commands exit 0 with the canned network outputs.
    Network,
    /// Commands start but never exit.
    Hung,
    /// Submissions and OS info requests never answer.
    StalledSubmit,
    /// Commands start, but polls and OS info requests never answer.
    StalledPoll,
}

/// How long a stalled agent request blocks before answering.
pub const STALL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct FakeVm {
    pub vmid: u32,
    pub name: String,
    pub generation_id: Option<String>,
    pub running: bool,
    pub agent: bool,
    pub guest: GuestBehavior,
}

impl FakeVm {
    pub fn running(vmid: u32, name: &str, generation_id: &str) -> Self {
        Self {
            vmid,
            name: name.into(),
            generation_id: Some(generation_id.into()),
            running: true,
            agent: true,
            guest: GuestBehavior::Unavailable,
        }
    }

    pub fn stopped(vmid: u32, name: &str, generation_id: &str) -> Self {
        Self {
            running: false,
            ..Self::running(vmid, name, generation_id)
        }
    }

    pub fn with_guest_network(mut self) -> Self {
        self.guest = GuestBehavior::Network;
        self
    }

    pub fn with_hung_agent(mut self) -> Self {
        self.guest = GuestBehavior::Hung;
        self
    }

    pub fn with_stalled_submit(mut self) -> Self {
        self.guest = GuestBehavior::StalledSubmit;
        self
    }

    pub fn with_stalled_poll(mut self) -> Self {
        self.guest = GuestBehavior::StalledPoll;
        self
    }

    pub fn without_agent(mut self) -> Self {
        self.agent = false;
        self
    }

    pub fn without_generation_id(mut self) -> Self {
        self.generation_id = None;
        self
    }
}

/// A cluster described up front; guest commands answer from canned output.
#[derive(Default)]
pub struct FakeHypervisor {
    nodes: Vec<NodeListItem>,
    vms: HashMap<String, Vec<FakeVm>>,
    storages: HashMap<String, Vec<StorageListItem>>,
    content: HashMap<(String, String), Vec<StorageContentItem>>,
    failing_configs: Vec<u32>,
    next_pid: AtomicU64,
    submissions: AtomicUsize,
    outputs: Mutex<HashMap<u64, Option<String>>>,
}

impl FakeHypervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(mut self, node: &str) -> Self {
        self.nodes.push(NodeListItem {
            node: node.into(),
            status: Some("online".into()),
        });
        self
    }

    pub fn with_offline_node(mut self, node: &str) -> Self {
        self.nodes.push(NodeListItem {
            node: node.into(),
            status: Some("offline".into()),
        });
        self
    }

    pub fn with_vm(mut self, node: &str, vm: FakeVm) -> Self {
        self.vms.entry(node.into()).or_default().push(vm);
        self
    }

    pub fn with_images_storage(mut self, node: &str, storage: &str) -> Self {
        self.storages
            .entry(node.into())
            .or_default()
            .push(StorageListItem {
                storage: storage.into(),
                content: "images,rootdir".into(),
            });
        self
    }

    pub fn with_disk(mut self, node: &str, storage: &str, vmid: u32, volid: &str, size: u64) -> Self {
        self.content
            .entry((node.into(), storage.into()))
            .or_default()
            .push(StorageContentItem {
                volid: volid.into(),
                vmid: Some(vmid),
                size,
            });
        self
    }

    pub fn failing_config(mut self, vmid: u32) -> Self {
        self.failing_configs.push(vmid);
        self
    }

    /// Number of guest commands submitted so far.
    pub fn guest_submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    fn vm(&self, node: &str, vmid: u32) -> SyncResult<&FakeVm> {
        self.vms
            .get(node)
            .and_then(|vms| vms.iter().find(|vm| vm.vmid == vmid))
            .ok_or_else(|| SyncError::NotFound(format!("VM {vmid} on {node}")))
    }
}

fn canned_output(argv: &[String]) -> Option<String> {
    let has = |arg: &str| argv.iter().any(|a| a == arg);
    if has("addr") {
        Some(GUEST_IP_ADDR.to_string())
    } else if has("-4") {
        Some(GUEST_ROUTE_V4.to_string())
    } else if has("-6") {
        Some(GUEST_ROUTE_V6.to_string())
    } else {
        None
    }
}

fn agent_down() -> SyncError {
    SyncError::GuestAgentUnavailable("500: QEMU guest agent is not running".into())
}

#[async_trait]
impl Hypervisor for FakeHypervisor {
    async fn list_nodes(&self) -> SyncResult<Vec<NodeListItem>> {
        Ok(self.nodes.clone())
    }

    async fn list_vm_summaries(&self, node: &str) -> SyncResult<Vec<VmListItem>> {
        Ok(self
            .vms
            .get(node)
            .map(|vms| {
                vms.iter()
                    .map(|vm| VmListItem {
                        vmid: vm.vmid,
                        name: Some(vm.name.clone()),
                        status: if vm.running { "running" } else { "stopped" }.into(),
                        cpus: 2,
                        maxmem: 2 << 30,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_vm_config(&self, node: &str, vmid: u32) -> SyncResult<VmConfig> {
        if self.failing_configs.contains(&vmid) {
            return Err(SyncError::Api {
                status: 500,
                path: format!("nodes/{node}/qemu/{vmid}/config"),
                message: "internal error".into(),
            });
        }
        let vm = self.vm(node, vmid)?;
        Ok(VmConfig {
            name: Some(vm.name.clone()),
            vmgenid: vm.generation_id.clone(),
            tags: Some("prod".into()),
            agent: Some(if vm.agent { "1" } else { "0" }.into()),
        })
    }

    async fn list_storages(&self, node: &str) -> SyncResult<Vec<StorageListItem>> {
        Ok(self.storages.get(node).cloned().unwrap_or_default())
    }

    async fn list_storage_content(
        &self,
        node: &str,
        storage: &str,
    ) -> SyncResult<Vec<StorageContentItem>> {
        Ok(self
            .content
            .get(&(node.to_string(), storage.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn submit_guest_command(
        &self,
        node: &str,
        vmid: u32,
        argv: Vec<String>,
    ) -> SyncResult<u64> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        let output = match self.vm(node, vmid)?.guest {
            GuestBehavior::Unavailable => return Err(agent_down()),
            GuestBehavior::Network => canned_output(&argv),
            GuestBehavior::Hung | GuestBehavior::StalledPoll => None,
            GuestBehavior::StalledSubmit => {
                tokio::time::sleep(STALL).await;
                None
            }
        };
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst) + 1;
        self.outputs.lock().unwrap().insert(pid, output);
        Ok(pid)
    }

    async fn poll_guest_command(
        &self,
        node: &str,
        vmid: u32,
        pid: u64,
    ) -> SyncResult<GuestExecStatus> {
        match self.vm(node, vmid)?.guest {
            GuestBehavior::Hung => return Ok(GuestExecStatus::running()),
            GuestBehavior::StalledPoll => {
                tokio::time::sleep(STALL).await;
                return Ok(GuestExecStatus::running());
            }
            _ => {}
        }
        match self.outputs.lock().unwrap().get(&pid) {
            Some(Some(output)) => Ok(GuestExecStatus::exited(0, output.clone())),
            Some(None) => Ok(GuestExecStatus::exited(1, "")),
            None => Err(SyncError::NotFound(format!("pid {pid}"))),
        }
    }

    async fn get_guest_os_info(&self, node: &str, vmid: u32) -> SyncResult<OsInfo> {
        match self.vm(node, vmid)?.guest {
            GuestBehavior::Network => Ok(OsInfo {
                id: Some("debian".into()),
                pretty_name: Some("Debian GNU/Linux 12 (bookworm)".into()),
                name: Some("Debian GNU/Linux".into()),
                version: Some("12 (bookworm)".into()),
                version_id: Some("12".into()),
            }),
            GuestBehavior::StalledSubmit | GuestBehavior::StalledPoll => {
                tokio::time::sleep(STALL).await;
                Err(agent_down())
            }
            _ => Err(agent_down()),
        }
    }
}
