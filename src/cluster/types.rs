//! Raw metrics as reported by the Proxmox VE API.
//!
//! These mirror the `/nodes` and `/nodes/{node}/qemu` list endpoints. Every
//! numeric field is optional because Proxmox omits them for offline nodes
//! and stopped guests.

use serde::{Deserialize, Serialize};

use crate::core::vm::VMStatus;

const MILLIS_PER_CORE: f64 = 1000.0;

/// A node as listed by `GET /nodes`.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct NodeMetrics {
    /// Node name (e.g. "pve01").
    pub node: String,
    /// "online", "offline" or "unknown".
    pub status: String,
    /// CPU utilisation across all cores (0.0 to 1.0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxcpu: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxmem: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxdisk: Option<u64>,
}

impl NodeMetrics {
    pub fn is_online(&self) -> bool {
        self.status == "online"
    }

    pub fn cpu_capacity_millis(&self) -> u64 {
        cores_to_millis(self.maxcpu)
    }

    pub fn cpu_used_millis(&self) -> u64 {
        load_to_millis(self.cpu, self.maxcpu)
    }
}

/// A guest as listed by `GET /nodes/{node}/qemu`.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct VmMetrics {
    pub vmid: u32,
    #[serde(default)]
    pub name: String,
    /// Node the guest runs on. Not part of the list payload; filled in by
    /// the client from the node it queried.
    #[serde(default)]
    pub node: String,
    /// "running", "stopped", ...
    pub status: String,
    /// CPU utilisation of the guest's own cores (0.0 to 1.0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxmem: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxdisk: Option<u64>,
    /// Semicolon-delimited tag string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
}

impl VmMetrics {
    pub fn is_running(&self) -> bool {
        VMStatus::from(self.status.as_str()) == VMStatus::Running
    }

    pub fn cpu_capacity_millis(&self) -> u64 {
        cores_to_millis(self.cpus)
    }

    pub fn cpu_used_millis(&self) -> u64 {
        load_to_millis(self.cpu, self.cpus)
    }
}

/// Everything one balancing cycle needs from the cluster.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ClusterSnapshot {
    pub nodes: Vec<NodeMetrics>,
    pub vms: Vec<VmMetrics>,
}

/// A live-migration request for one guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRequest {
    pub vmid: u32,
    pub origin: String,
    pub target: String,
    pub online: bool,
}

fn cores_to_millis(cores: Option<u32>) -> u64 {
    u64::from(cores.unwrap_or(0)) * MILLIS_PER_CORE as u64
}

fn load_to_millis(load: Option<f64>, cores: Option<u32>) -> u64 {
    let load = load.unwrap_or(0.0).max(0.0);
    (load * f64::from(cores.unwrap_or(0)) * MILLIS_PER_CORE).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_list_item_deserializes() {
        let node: NodeMetrics = serde_json::from_str(
            r#"{"node":"pve01","status":"online","cpu":0.25,"maxcpu":8,
                "mem":4096,"maxmem":16384,"disk":100,"maxdisk":1000,"uptime":42}"#,
        )
        .unwrap();
        assert!(node.is_online());
        assert_eq!(node.cpu_capacity_millis(), 8000);
        assert_eq!(node.cpu_used_millis(), 2000);
        assert_eq!(node.maxmem, Some(16384));
    }

    #[test]
    fn offline_node_without_figures_deserializes() {
        let node: NodeMetrics = serde_json::from_str(r#"{"node":"pve02","status":"offline"}"#).unwrap();
        assert!(!node.is_online());
        assert_eq!(node.cpu_capacity_millis(), 0);
        assert_eq!(node.cpu_used_millis(), 0);
    }

    #[test]
    fn vm_list_item_deserializes() {
        let vm: VmMetrics = serde_json::from_str(
            r#"{"vmid":101,"name":"web01","status":"running","cpu":0.5,"cpus":2,
                "mem":1024,"maxmem":2048,"disk":0,"maxdisk":10240,"tags":"plb_include_web"}"#,
        )
        .unwrap();
        assert!(vm.is_running());
        assert_eq!(vm.node, "");
        assert_eq!(vm.cpu_used_millis(), 1000);
        assert_eq!(vm.tags.as_deref(), Some("plb_include_web"));
    }
}
