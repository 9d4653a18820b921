use serde::Serialize;

use crate::cluster::types::MigrationRequest;
use crate::core::inventory::Inventory;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    pub vm: String,
    pub vmid: u32,
    pub origin: String,
    pub target: String,
}

impl PlanEntry {
    /// Online (no-downtime) migration request for this entry.
    pub fn to_request(&self) -> MigrationRequest {
        MigrationRequest {
            vmid: self.vmid,
            origin: self.origin.clone(),
            target: self.target.clone(),
            online: true,
        }
    }
}

/// The VM relocations left to execute once a cycle has settled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MigrationPlan {
    entries: Vec<PlanEntry>,
}

impl MigrationPlan {
    /// Every VM whose target differs from its origin, in VM id order.
    pub fn from_inventory(inventory: &Inventory) -> Self {
        let entries = inventory
            .vms()
            .filter(|vm| vm.is_relocated())
            .map(|vm| PlanEntry {
                vm: vm.name.clone(),
                vmid: vm.id,
                origin: vm.origin().to_string(),
                target: vm.target().to_string(),
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
