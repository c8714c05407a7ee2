//! Collaborator contracts the reconciliation engine is written against.

mod hypervisor;
mod inventory;

pub use hypervisor::Hypervisor;
#[cfg(test)]
pub use hypervisor::MockHypervisor;
pub use inventory::{Criteria, Inventory};
