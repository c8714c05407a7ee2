use crate::tests::support::{
    fake_hypervisor::{FakeHypervisor, FakeVm},
    fake_inventory::{Call, FakeInventory},
};
use crate::{EntityKind, InventorySync, SyncError, SyncReport, SyncSettings};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

const DEVICE_TYPE: &str = "proxmox-ve";

fn settings() -> SyncSettings {
    SyncSettings {
        guest_command_timeout: Duration::from_millis(200),
        guest_poll_interval: Duration::from_millis(5),
        max_parallelism: 4,
        ..SyncSettings::default()
    }
}

async fn run(hypervisor: FakeHypervisor, inventory: &Arc<FakeInventory>) -> SyncReport {
    InventorySync::new(Arc::new(hypervisor), inventory.clone(), &settings())
        .run()
        .await
        .unwrap()
}

fn web_cluster() -> FakeHypervisor {
    FakeHypervisor::new()
        .with_node("pve1")
        .with_images_storage("pve1", "local-lvm")
        .with_vm("pve1", FakeVm::running(100, "web-01", "G1").with_guest_network())
        .with_disk("pve1", "local-lvm", 100, "local-lvm:vm-100-disk-0", 32 << 30)
}

fn find<'a>(records: &'a [Value], field: &str, value: &str) -> Option<&'a Value> {
    records.iter().find(|r| r[field] == value)
}

fn id(record: &Value) -> u64 {
    record["id"].as_u64().unwrap()
}

#[tokio::test]
async fn test_new_vm_is_created_with_dependents() {
    let inventory = Arc::new(FakeInventory::new("external"));
    let hypervisor_id = inventory.seed_hypervisor("pve1", DEVICE_TYPE);

    let report = run(web_cluster(), &inventory).await;
    assert!(report.is_success(), "{:?}", report.failures);
    assert_eq!(report.vms.created, 1);
    assert_eq!(report.interfaces.created, 1);
    assert_eq!(report.ip_addresses.created, 2);
    assert_eq!(report.disks.created, 1);

    let vms = inventory.records(EntityKind::VirtualMachine);
    assert_eq!(vms.len(), 1);
    let vm = &vms[0];
    assert_eq!(vm["serial"], "G1");
    assert_eq!(vm["name"], "web-01");
    assert_eq!(vm["status"], "active");
    assert_eq!(vm["device"], hypervisor_id);
    assert_eq!(vm["site"], 1);
    assert_eq!(vm["cluster"], 2);
    assert_eq!(vm["memory"], 2048);
    assert_eq!(vm["custom_fields"], json!({"vmid": 100, "external": true}));

    let interfaces = inventory.records(EntityKind::VmInterface);
    assert_eq!(interfaces.len(), 1);
    let eth0 = find(&interfaces, "name", "eth0").unwrap();
    assert_eq!(eth0["virtual_machine"], id(vm));
    assert_eq!(eth0["primary_mac_address"], "bc:24:11:aa:bb:cc");

    let ips = inventory.records(EntityKind::IpAddress);
    let v4 = find(&ips, "address", "10.0.0.5/24").unwrap();
    let v6 = find(&ips, "address", "2001:db8::5/64").unwrap();
    for ip in [v4, v6] {
        assert_eq!(ip["assigned_object_type"], "virtualization.vminterface");
        assert_eq!(ip["assigned_object_id"], id(eth0));
    }
    assert_eq!(vm["primary_ip4"], id(v4));
    assert_eq!(vm["primary_ip6"], id(v6));

    let disks = inventory.records(EntityKind::VirtualDisk);
    assert_eq!(disks.len(), 1);
    assert_eq!(disks[0]["name"], "local-lvm:vm-100-disk-0");
    assert_eq!(disks[0]["size"], 32768);
    assert_eq!(disks[0]["virtual_machine"], id(vm));
}

#[tokio::test]
async fn test_every_write_carries_the_marker() {
    let inventory = Arc::new(FakeInventory::new("external"));
    inventory.seed_hypervisor("pve1", DEVICE_TYPE);

    run(web_cluster(), &inventory).await;

    for call in inventory.calls() {
        if let Call::Create { payload, .. } | Call::Update { payload, .. } = call {
            assert_eq!(payload["custom_fields"]["external"], true, "{payload}");
        }
    }
}

#[tokio::test]
async fn test_orphaned_managed_vm_is_deleted() {
    let inventory = Arc::new(FakeInventory::new("external"));
    let hypervisor_id = inventory.seed_hypervisor("pve1", DEVICE_TYPE);
    let orphan = inventory.seed_managed(
        EntityKind::VirtualMachine,
        json!({"name": "old-01", "serial": "G9", "device": hypervisor_id}),
    );

    let report = run(FakeHypervisor::new().with_node("pve1"), &inventory).await;
    assert_eq!(report.vms.deleted, 1);

    let vm_calls: Vec<Call> = inventory
        .calls()
        .into_iter()
        .filter(|c| c.kind() == EntityKind::VirtualMachine && c.is_write())
        .collect();
    assert_eq!(
        vm_calls,
        vec![Call::Delete {
            kind: EntityKind::VirtualMachine,
            id: orphan
        }]
    );
    assert!(inventory.records(EntityKind::VirtualMachine).is_empty());
}

#[tokio::test]
async fn test_unmanaged_records_are_left_alone() {
    let inventory = Arc::new(FakeInventory::new("external"));
    let hypervisor_id = inventory.seed_hypervisor("pve1", DEVICE_TYPE);
    let manual = inventory.seed(
        EntityKind::VirtualMachine,
        json!({"name": "hand-made", "serial": "G1", "device": hypervisor_id}),
    );

    let report = run(web_cluster(), &inventory).await;
    assert_eq!(report.vms.created, 1);

    for call in inventory.calls() {
        match call {
            Call::Update {
                kind: EntityKind::VirtualMachine,
                id,
                ..
            }
            | Call::Delete {
                kind: EntityKind::VirtualMachine,
                id,
            } => assert_ne!(id, manual),
            _ => {}
        }
    }
    let untouched = inventory
        .record(EntityKind::VirtualMachine, manual)
        .unwrap();
    assert_eq!(untouched["name"], "hand-made");
}

#[tokio::test]
async fn test_second_run_only_updates() {
    let inventory = Arc::new(FakeInventory::new("external"));
    inventory.seed_hypervisor("pve1", DEVICE_TYPE);

    run(web_cluster(), &inventory).await;
    let before: Vec<usize> = [
        EntityKind::VirtualMachine,
        EntityKind::VmInterface,
        EntityKind::IpAddress,
        EntityKind::VirtualDisk,
    ]
    .iter()
    .map(|kind| inventory.records(*kind).len())
    .collect();
    inventory.clear_calls();

    let report = run(web_cluster(), &inventory).await;
    assert!(report.is_success());
    assert_eq!(report.vms.updated, 1);
    assert_eq!(report.vms.created + report.vms.deleted, 0);
    assert_eq!(report.ip_addresses.updated, 2);
    assert!(
        inventory
            .calls()
            .iter()
            .all(|c| !matches!(c, Call::Create { .. } | Call::Delete { .. }))
    );

    let after: Vec<usize> = [
        EntityKind::VirtualMachine,
        EntityKind::VmInterface,
        EntityKind::IpAddress,
        EntityKind::VirtualDisk,
    ]
    .iter()
    .map(|kind| inventory.records(*kind).len())
    .collect();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_network_stages_precede_disks() {
    let inventory = Arc::new(FakeInventory::new("external"));
    inventory.seed_hypervisor("pve1", DEVICE_TYPE);

    run(web_cluster(), &inventory).await;
    let calls = inventory.calls();

    let first_disk = calls
        .iter()
        .position(|c| c.kind() == EntityKind::VirtualDisk)
        .unwrap();
    let primary_patch = calls
        .iter()
        .position(|c| {
            matches!(c, Call::Update { kind: EntityKind::VirtualMachine, payload, .. }
                if payload.get("primary_ip4").is_some())
        })
        .unwrap();
    let last_network = calls
        .iter()
        .rposition(|c| matches!(c.kind(), EntityKind::VmInterface | EntityKind::IpAddress))
        .unwrap();

    assert!(last_network < primary_patch);
    assert!(primary_patch < first_disk);
}

#[tokio::test]
async fn test_failure_is_confined_to_its_vm() {
    let inventory = Arc::new(FakeInventory::new("external"));
    inventory.seed_hypervisor("pve1", DEVICE_TYPE);
    inventory.reject_writes_where("name", "bad-01");
    inventory.reject_writes_where("name", "local-lvm:vm-101-disk-0");

    let hypervisor = web_cluster()
        .with_vm("pve1", FakeVm::running(101, "db-01", "G2").with_guest_network())
        .with_vm("pve1", FakeVm::stopped(102, "bad-01", "G3"))
        .with_disk("pve1", "local-lvm", 101, "local-lvm:vm-101-disk-0", 8 << 30)
        .with_disk("pve1", "local-lvm", 102, "local-lvm:vm-102-disk-0", 8 << 30);

    let report = run(hypervisor, &inventory).await;

    let mut failed: Vec<&str> = report.failures.iter().map(|f| f.unit.as_str()).collect();
    failed.sort_unstable();
    assert_eq!(
        failed,
        vec!["bad-01 (vmid 102 on pve1)", "db-01 (vmid 101 on pve1)"]
    );
    assert!(
        report
            .failures
            .iter()
            .all(|f| matches!(f.error, SyncError::Api { status: 400, .. }))
    );

    // web-01 completed every stage; db-01 got as far as its disks.
    let disks = inventory.records(EntityKind::VirtualDisk);
    assert_eq!(disks.len(), 1);
    assert_eq!(disks[0]["name"], "local-lvm:vm-100-disk-0");
    assert_eq!(inventory.records(EntityKind::VmInterface).len(), 2);

    // bad-01 never got a record, so nothing hanging off it was attempted.
    assert!(!inventory.calls().iter().any(|c| matches!(c,
        Call::Create { payload, .. } if payload["name"] == "local-lvm:vm-102-disk-0")));
}

#[tokio::test]
async fn test_missing_hypervisor_device_fails_its_vms() {
    let inventory = Arc::new(FakeInventory::new("external"));
    inventory.seed_hypervisor("pve1", DEVICE_TYPE);
    // Present, but with the wrong device type.
    inventory.seed_hypervisor("pve2", "generic-server");

    let hypervisor = web_cluster()
        .with_node("pve2")
        .with_vm("pve2", FakeVm::stopped(200, "lost-01", "G7"));

    let report = run(hypervisor, &inventory).await;
    assert_eq!(report.vms.created, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].unit, "lost-01 (vmid 200 on pve2)");
    assert!(matches!(report.failures[0].error, SyncError::NotFound(_)));
    assert!(find(&inventory.records(EntityKind::VirtualMachine), "serial", "G7").is_none());
}

#[tokio::test]
async fn test_migrated_vm_is_updated_in_place() {
    let inventory = Arc::new(FakeInventory::new("external"));
    let pve1 = inventory.seed_hypervisor("pve1", DEVICE_TYPE);
    let pve2 = inventory.seed_hypervisor("pve2", DEVICE_TYPE);
    let existing = inventory.seed_managed(
        EntityKind::VirtualMachine,
        json!({"name": "web-01", "serial": "G1", "device": pve1}),
    );

    let hypervisor = FakeHypervisor::new()
        .with_node("pve1")
        .with_node("pve2")
        .with_vm("pve2", FakeVm::stopped(100, "web-01", "G1"));

    let report = run(hypervisor, &inventory).await;
    assert_eq!(report.vms.updated, 1);
    assert_eq!(report.vms.created + report.vms.deleted, 0);

    let vm = inventory
        .record(EntityKind::VirtualMachine, existing)
        .unwrap();
    assert_eq!(vm["device"], pve2);
}

#[tokio::test]
async fn test_collection_failure_prevents_any_write() {
    let inventory = Arc::new(FakeInventory::new("external"));
    let hypervisor_id = inventory.seed_hypervisor("pve1", DEVICE_TYPE);
    inventory.seed_managed(
        EntityKind::VirtualMachine,
        json!({"name": "web-01", "serial": "G1", "device": hypervisor_id}),
    );

    let hypervisor = web_cluster().failing_config(100);
    let result = InventorySync::new(Arc::new(hypervisor), inventory.clone(), &settings())
        .run()
        .await;

    assert!(matches!(result, Err(SyncError::Api { status: 500, .. })));
    assert!(inventory.calls().iter().all(|c| !c.is_write()));
    assert_eq!(inventory.records(EntityKind::VirtualMachine).len(), 1);
}

#[tokio::test]
async fn test_vanished_interface_and_address_are_removed() {
    let inventory = Arc::new(FakeInventory::new("external"));
    inventory.seed_hypervisor("pve1", DEVICE_TYPE);
    run(web_cluster(), &inventory).await;

    let vm_id = id(&inventory.records(EntityKind::VirtualMachine)[0]);
    let eth0 = id(find(&inventory.records(EntityKind::VmInterface), "name", "eth0").unwrap());
    let stale_interface = inventory.seed_managed(
        EntityKind::VmInterface,
        json!({"virtual_machine": vm_id, "name": "eth9"}),
    );
    let stale_ip = inventory.seed_managed(
        EntityKind::IpAddress,
        json!({
            "address": "192.0.2.1/24",
            "assigned_object_type": "virtualization.vminterface",
            "assigned_object_id": eth0
        }),
    );

    let report = run(web_cluster(), &inventory).await;
    assert_eq!(report.interfaces.deleted, 1);
    assert_eq!(report.ip_addresses.deleted, 1);
    assert!(inventory.record(EntityKind::VmInterface, stale_interface).is_none());
    assert!(inventory.record(EntityKind::IpAddress, stale_ip).is_none());
}
