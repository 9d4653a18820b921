//! Typed per-cycle snapshot of node and VM resource state.
//!
//! Built once per cycle from raw cluster metrics. Nodes and VMs live in
//! ordered maps so every scan, and therefore every tie-break, visits
//! records in name/id order.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::cluster::types::{ClusterSnapshot, NodeMetrics, VmMetrics};
use crate::core::grouping::Grouping;
use crate::core::resource::{Dimension, Resource, Usage};
use crate::core::vm::{VMResources, VirtualMachine};

/// An entry of `balancing.ignore_vms`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmPattern {
    Exact(String),
    /// Written as `name*`. Matches any VM whose name *contains* the stem,
    /// not only names starting with it.
    Contains(String),
}

impl VmPattern {
    pub fn parse(raw: &str) -> Self {
        match raw.strip_suffix('*') {
            Some(stem) => VmPattern::Contains(stem.to_string()),
            None => VmPattern::Exact(raw.to_string()),
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            VmPattern::Exact(exact) => exact == name,
            VmPattern::Contains(stem) => name.contains(stem.as_str()),
        }
    }
}

/// Nodes and VMs kept out of balancing by configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exclusions {
    pub nodes: Vec<String>,
    pub vms: Vec<VmPattern>,
}

impl Exclusions {
    /// Build from the two comma-separated configuration lists.
    pub fn parse(nodes: &str, vms: &str) -> Self {
        Self {
            nodes: split_list(nodes).map(str::to_string).collect(),
            vms: split_list(vms).map(VmPattern::parse).collect(),
        }
    }

    pub fn ignores_node(&self, name: &str) -> bool {
        self.nodes.iter().any(|n| n == name)
    }

    pub fn ignores_vm(&self, name: &str) -> bool {
        self.vms.iter().any(|p| p.matches(name))
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    pub name: String,
    pub memory: Resource,
    pub disk: Resource,
    pub cpu: Resource,
}

impl Node {
    pub fn new(name: impl Into<String>, memory: Resource, disk: Resource, cpu: Resource) -> Self {
        Self {
            name: name.into(),
            memory,
            disk,
            cpu,
        }
    }

    fn from_metrics(metrics: &NodeMetrics) -> Self {
        Self::new(
            metrics.node.clone(),
            Resource::new(metrics.maxmem.unwrap_or(0), metrics.mem.unwrap_or(0)),
            Resource::new(metrics.maxdisk.unwrap_or(0), metrics.disk.unwrap_or(0)),
            Resource::new(metrics.cpu_capacity_millis(), metrics.cpu_used_millis()),
        )
    }

    pub fn resource(&self, dimension: Dimension) -> &Resource {
        match dimension {
            Dimension::Memory => &self.memory,
            Dimension::Disk => &self.disk,
            Dimension::Cpu => &self.cpu,
        }
    }

    fn resource_mut(&mut self, dimension: Dimension) -> &mut Resource {
        match dimension {
            Dimension::Memory => &mut self.memory,
            Dimension::Disk => &mut self.disk,
            Dimension::Cpu => &mut self.cpu,
        }
    }
}

fn vm_from_metrics(metrics: &VmMetrics, grouping: Grouping) -> VirtualMachine {
    let resources = VMResources {
        memory: Usage::new(metrics.maxmem.unwrap_or(0), metrics.mem.unwrap_or(0)),
        disk: Usage::new(metrics.maxdisk.unwrap_or(0), metrics.disk.unwrap_or(0)),
        cpu: Usage::new(metrics.cpu_capacity_millis(), metrics.cpu_used_millis()),
    };
    VirtualMachine::new(metrics.vmid, metrics.name.clone(), metrics.node.clone(), resources)
        .with_grouping(grouping)
}

/// The owned, mutable store every stage of a cycle works on.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    nodes: BTreeMap<String, Node>,
    vms: BTreeMap<u32, VirtualMachine>,
}

impl Inventory {
    pub fn new(nodes: Vec<Node>, vms: Vec<VirtualMachine>) -> Self {
        Self {
            nodes: nodes.into_iter().map(|n| (n.name.clone(), n)).collect(),
            vms: vms.into_iter().map(|vm| (vm.id, vm)).collect(),
        }
    }

    /// Keep only online, non-excluded nodes and the running, non-excluded,
    /// non-ignored VMs residing on them.
    pub fn build(snapshot: &ClusterSnapshot, exclusions: &Exclusions) -> Self {
        let mut inventory = Inventory::default();

        for metrics in &snapshot.nodes {
            if !metrics.is_online() {
                debug!(node = %metrics.node, status = %metrics.status, "skipping node that is not online");
                continue;
            }
            if exclusions.ignores_node(&metrics.node) {
                debug!(node = %metrics.node, "skipping ignored node");
                continue;
            }
            inventory.nodes.insert(metrics.node.clone(), Node::from_metrics(metrics));
        }

        for metrics in &snapshot.vms {
            if !metrics.is_running() {
                continue;
            }
            if !inventory.nodes.contains_key(&metrics.node) {
                debug!(vm = %metrics.name, node = %metrics.node, "skipping VM on ineligible node");
                continue;
            }
            if exclusions.ignores_vm(&metrics.name) {
                debug!(vm = %metrics.name, "skipping VM excluded by ignore_vms");
                continue;
            }
            let grouping = Grouping::from_tags(metrics.tags.as_deref().unwrap_or_default());
            if grouping.ignore {
                debug!(vm = %metrics.name, "skipping VM tagged plb_ignore_vm");
                continue;
            }
            if inventory.vms.contains_key(&metrics.vmid) {
                warn!(vmid = metrics.vmid, "duplicate VM id in snapshot, keeping the first");
                continue;
            }
            inventory.vms.insert(metrics.vmid, vm_from_metrics(metrics, grouping));
        }

        inventory
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn vms(&self) -> impl Iterator<Item = &VirtualMachine> {
        self.vms.values()
    }

    pub fn vm(&self, vmid: u32) -> Option<&VirtualMachine> {
        self.vms.get(&vmid)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Sum of `used` across all eligible nodes for one dimension.
    pub fn total_used(&self, dimension: Dimension) -> i64 {
        self.nodes.values().map(|n| n.resource(dimension).used()).sum()
    }

    /// Move a VM's usage for `dimension` from its current target node to
    /// `destination` and retarget it. Returns `false` when nothing changed.
    pub fn relocate(&mut self, vmid: u32, destination: &str, dimension: Dimension) -> bool {
        if !self.nodes.contains_key(destination) {
            warn!(vmid, node = destination, "relocation target is not an eligible node");
            return false;
        }
        let Some(vm) = self.vms.get_mut(&vmid) else {
            return false;
        };
        if vm.target() == destination {
            return false;
        }

        let amount = vm.used(dimension);
        if let Some(source) = self.nodes.get_mut(vm.target()) {
            source.resource_mut(dimension).sub(amount);
        }
        if let Some(dest) = self.nodes.get_mut(destination) {
            dest.resource_mut(dimension).add(amount);
        }
        debug!(
            vm = %vm.name,
            vmid,
            from = %vm.target(),
            to = destination,
            amount,
            %dimension,
            "relocated VM"
        );
        vm.set_target(destination);
        true
    }
}
