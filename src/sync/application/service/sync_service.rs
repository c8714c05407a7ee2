use super::{
    fact_collector_service::FactCollectorService,
    upsert_service::{UpsertService, all_or_first_error},
};
use crate::config::SyncSettings;
use crate::core::domain::{
    error::{SyncError, SyncResult},
    model::{
        interface::{PveInterface, host_address},
        netbox::{
            DiskFields, GuestIp, HypervisorRef, InterfaceFields, IpFields, NetboxDevice,
            NetboxDisk, NetboxInterface, NetboxIp, NetboxVm, PrimaryIpFields, VmFields,
        },
        reconciled::{Reconciled, SyncAction},
        vm::PveVm,
    },
    port::{Hypervisor, Inventory},
};
use crate::core::infrastructure::worker_pool::WorkerPool;
use crate::sync::application::matcher::full_outer_join;
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Created/updated/deleted tallies of one entity kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionCounts {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl ActionCounts {
    pub fn record(&mut self, action: SyncAction) {
        match action {
            SyncAction::Created => self.created += 1,
            SyncAction::Updated => self.updated += 1,
            SyncAction::Deleted => self.deleted += 1,
        }
    }

    fn absorb(&mut self, other: ActionCounts) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
    }
}

impl fmt::Display for ActionCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "created={},updated={},deleted={}",
            self.created, self.updated, self.deleted
        )
    }
}

/// A unit of work that did not complete, and why.
#[derive(Debug)]
pub struct UnitFailure {
    pub unit: String,
    pub error: SyncError,
}

/// Outcome of a reconciliation run.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub vms: ActionCounts,
    pub interfaces: ActionCounts,
    pub ip_addresses: ActionCounts,
    pub disks: ActionCounts,
    pub failures: Vec<UnitFailure>,
}

impl SyncReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, unit: String, error: SyncError) {
        warn!(%unit, %error, "unit failed");
        self.failures.push(UnitFailure { unit, error });
    }
}

/// A VM together with the hypervisor device it is placed on.
#[derive(Debug, Clone)]
struct PlacedVm {
    vm: PveVm,
    hypervisor: HypervisorRef,
}

#[derive(Debug, Default)]
struct DependentCounts {
    interfaces: ActionCounts,
    ip_addresses: ActionCounts,
    disks: ActionCounts,
}

/// Reconciles the inventory against the hypervisor.
///
/// A run collects the authoritative snapshot, reconciles virtual machines,
/// then, per surviving VM, its interfaces, their addresses, the VM's primary
/// addresses and finally its disks. Disk writes wait for the network stages
/// because the inventory only settles disk aggregates once interface and
/// address assignments are final.
pub struct InventorySync {
    collector: FactCollectorService,
    upsert: UpsertService,
    hypervisor_device_type: String,
    max_parallelism: usize,
}

impl InventorySync {
    pub fn new(
        hypervisor: Arc<dyn Hypervisor>,
        inventory: Arc<dyn Inventory>,
        settings: &SyncSettings,
    ) -> Self {
        Self {
            collector: FactCollectorService::new(
                hypervisor,
                settings.interface_blacklist.clone(),
                settings.guest_command_timeout,
                settings.guest_poll_interval,
                settings.max_parallelism,
            ),
            upsert: UpsertService::new(
                inventory,
                &settings.external_field_slug,
                settings.max_parallelism,
            ),
            hypervisor_device_type: settings.hypervisor_device_type.clone(),
            max_parallelism: settings.max_parallelism,
        }
    }

    /// Runs one reconciliation pass.
    ///
    /// # Errors
    /// Fails before any inventory write if collection fails or hypervisor
    /// devices cannot be looked up. Failures after that point are confined
    /// to their unit and listed in the report.
    #[instrument(skip(self))]
    pub async fn run(&self) -> SyncResult<SyncReport> {
        let collected = self.collector.collect().await?;
        info!(
            nodes = collected.nodes.len(),
            vms = collected.vms.len(),
            "collected hypervisor inventory"
        );

        let mut report = SyncReport::default();
        let placements = self.resolve_hypervisors(&collected.nodes).await?;
        let live = self
            .sync_vms(collected.vms, &placements, &mut report)
            .await?;
        self.sync_dependents(live, &mut report).await;

        info!(
            vms = %report.vms,
            interfaces = %report.interfaces,
            ip_addresses = %report.ip_addresses,
            disks = %report.disks,
            failures = report.failures.len(),
            "reconciliation finished"
        );
        Ok(report)
    }

    /// Looks up the device of every node; nodes without one are left out.
    async fn resolve_hypervisors(
        &self,
        nodes: &[String],
    ) -> SyncResult<HashMap<String, HypervisorRef>> {
        let mut placements = HashMap::new();
        for node in nodes {
            let devices: Vec<NetboxDevice> = self
                .upsert
                .fetch(vec![
                    ("name".to_string(), node.clone()),
                    ("device_type".to_string(), self.hypervisor_device_type.clone()),
                ])
                .await?;
            match devices.as_slice() {
                [] => warn!(%node, device_type = %self.hypervisor_device_type, "no hypervisor device"),
                [device, rest @ ..] => {
                    if !rest.is_empty() {
                        warn!(%node, count = devices.len(), "several hypervisor devices; using the first");
                    }
                    placements.insert(node.clone(), HypervisorRef::from(device));
                }
            }
        }
        Ok(placements)
    }

    async fn sync_vms(
        &self,
        vms: Vec<PveVm>,
        placements: &HashMap<String, HypervisorRef>,
        report: &mut SyncReport,
    ) -> SyncResult<Vec<(NetboxVm, PveVm)>> {
        // Without devices there is no scope; an unscoped listing would match every VM.
        let existing: Vec<NetboxVm> = if placements.is_empty() {
            Vec::new()
        } else {
            let mut device_ids: Vec<u64> = placements.values().map(|p| p.device).collect();
            device_ids.sort_unstable();
            device_ids.dedup();
            self.upsert
                .fetch_managed(
                    device_ids
                        .into_iter()
                        .map(|id| ("device_id".to_string(), id.to_string()))
                        .collect(),
                )
                .await?
        };

        let mut pairs = Vec::new();
        let mut units = Vec::new();
        for (record, vm) in full_outer_join(existing, vms, |record, vm| {
            record.serial.as_deref() == Some(vm.generation_id.as_str())
        }) {
            match vm {
                Some(vm) => match placements.get(&vm.node) {
                    Some(hypervisor) => {
                        units.push(vm_unit(&vm));
                        pairs.push((
                            record,
                            Some(PlacedVm {
                                hypervisor: *hypervisor,
                                vm,
                            }),
                        ));
                    }
                    None => report.fail(
                        vm_unit(&vm),
                        SyncError::NotFound(format!(
                            "no '{}' device named '{}'",
                            self.hypervisor_device_type, vm.node
                        )),
                    ),
                },
                None => {
                    let Some(record) = record else { continue };
                    units.push(format!("virtual machine #{} ({})", record.id, record.name));
                    pairs.push((Some(record), None));
                }
            }
        }

        let results = self
            .upsert
            .upsert(pairs, |placed: &PlacedVm| {
                VmFields::new(&placed.vm, &placed.hypervisor)
            })
            .await;

        let mut live = Vec::new();
        for (unit, result) in units.into_iter().zip(results) {
            match result {
                Ok(reconciled) => {
                    report.vms.record(reconciled.action);
                    if let Some(placed) = reconciled.source {
                        live.push((reconciled.record, placed.vm));
                    }
                }
                Err(error) => report.fail(unit, error),
            }
        }
        Ok(live)
    }

    /// Runs the dependent pipeline of every surviving VM on the worker pool.
    async fn sync_dependents(&self, live: Vec<(NetboxVm, PveVm)>, report: &mut SyncReport) {
        let mut pool = WorkerPool::new(self.max_parallelism);
        let mut units = Vec::with_capacity(live.len());
        for (record, vm) in live {
            units.push(vm_unit(&vm));
            let upsert = self.upsert.clone();
            pool.spawn(async move {
                let mut pipeline = VmDependents {
                    upsert: &upsert,
                    vm_id: record.id,
                    vm: &vm,
                    counts: DependentCounts::default(),
                };
                let result = pipeline.run().await;
                (pipeline.counts, result)
            });
        }

        for (unit, joined) in units.into_iter().zip(pool.join_all().await) {
            match joined {
                Ok((counts, result)) => {
                    report.interfaces.absorb(counts.interfaces);
                    report.ip_addresses.absorb(counts.ip_addresses);
                    report.disks.absorb(counts.disks);
                    if let Err(error) = result {
                        report.fail(unit, error);
                    }
                }
                Err(error) => report.fail(unit, error),
            }
        }
    }
}

fn vm_unit(vm: &PveVm) -> String {
    format!("{} (vmid {} on {})", vm.name, vm.vmid, vm.node)
}

/// Records the actions of successful pairs and surfaces the first failure.
fn tally<R, A>(
    counts: &mut ActionCounts,
    results: Vec<SyncResult<Reconciled<R, A>>>,
) -> SyncResult<Vec<(R, A)>> {
    for reconciled in results.iter().flatten() {
        counts.record(reconciled.action);
    }
    Ok(all_or_first_error(results)?
        .into_iter()
        .filter_map(|reconciled| reconciled.source.map(|source| (reconciled.record, source)))
        .collect())
}

/// The stages that hang off one VM record, run strictly in order.
struct VmDependents<'a> {
    upsert: &'a UpsertService,
    vm_id: u64,
    vm: &'a PveVm,
    counts: DependentCounts,
}

impl VmDependents<'_> {
    async fn run(&mut self) -> SyncResult<()> {
        let interfaces = self.sync_interfaces().await?;
        let addresses = self.sync_addresses(&interfaces).await?;
        self.patch_primary_addresses(&addresses).await?;
        self.sync_disks().await
    }

    fn scope(&self) -> Vec<(String, String)> {
        vec![("virtual_machine_id".to_string(), self.vm_id.to_string())]
    }

    async fn sync_interfaces(&mut self) -> SyncResult<Vec<(NetboxInterface, PveInterface)>> {
        let existing: Vec<NetboxInterface> = self.upsert.fetch_managed(self.scope()).await?;
        let pairs = full_outer_join(existing, self.vm.interfaces.clone(), |record, interface| {
            record.name == interface.name
        });
        let vm_id = self.vm_id;
        let results = self
            .upsert
            .upsert(pairs, move |interface| InterfaceFields::new(interface, vm_id))
            .await;
        tally(&mut self.counts.interfaces, results)
    }

    async fn sync_addresses(
        &mut self,
        interfaces: &[(NetboxInterface, PveInterface)],
    ) -> SyncResult<Vec<(NetboxIp, GuestIp)>> {
        let mut live = Vec::new();
        for (record, interface) in interfaces {
            let existing: Vec<NetboxIp> = self
                .upsert
                .fetch_managed(vec![("vminterface_id".to_string(), record.id.to_string())])
                .await?;
            let pairs = full_outer_join(existing, GuestIp::of_interface(interface), |record, ip| {
                record.address == ip.address
            });
            let interface_id = record.id;
            let results = self
                .upsert
                .upsert(pairs, move |ip| IpFields::new(ip, interface_id))
                .await;
            live.extend(tally(&mut self.counts.ip_addresses, results)?);
        }
        Ok(live)
    }

    async fn patch_primary_addresses(&self, addresses: &[(NetboxIp, GuestIp)]) -> SyncResult<()> {
        let record_of = |target: Option<IpAddr>| {
            let target = target?;
            addresses
                .iter()
                .find(|(_, ip)| host_address(&ip.address) == Some(target))
                .map(|(record, _)| record.id)
        };
        let fields = PrimaryIpFields {
            primary_ip4: record_of(self.vm.primary_ipv4.map(IpAddr::V4)),
            primary_ip6: record_of(self.vm.primary_ipv6.map(IpAddr::V6)),
        };
        self.upsert.patch::<NetboxVm, _>(self.vm_id, &fields).await?;
        Ok(())
    }

    async fn sync_disks(&mut self) -> SyncResult<()> {
        let existing: Vec<NetboxDisk> = self.upsert.fetch_managed(self.scope()).await?;
        let pairs = full_outer_join(existing, self.vm.disks.clone(), |record, disk| {
            record.name == disk.id
        });
        let vm_id = self.vm_id;
        let results = self
            .upsert
            .upsert(pairs, move |disk| DiskFields::new(disk, vm_id))
            .await;
        tally(&mut self.counts.disks, results)?;
        Ok(())
    }
}
