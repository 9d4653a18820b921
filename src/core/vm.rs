use serde::{Deserialize, Serialize};

use crate::core::grouping::Grouping;
use crate::core::resource::{Dimension, Usage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VMStatus {
    Running,
    Stopped,
    Paused,
    #[serde(other)]
    Unknown,
}

impl From<&str> for VMStatus {
    fn from(state: &str) -> Self {
        match state {
            "running" => VMStatus::Running,
            "stopped" => VMStatus::Stopped,
            "paused" => VMStatus::Paused,
            _ => VMStatus::Unknown,
        }
    }
}

/// Per-dimension figures of a VM.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VMResources {
    pub memory: Usage,
    pub disk: Usage,
    pub cpu: Usage,
}

impl VMResources {
    pub fn get(&self, dimension: Dimension) -> Usage {
        match dimension {
            Dimension::Memory => self.memory,
            Dimension::Disk => self.disk,
            Dimension::Cpu => self.cpu,
        }
    }
}

/// A VM taking part in this cycle's balancing.
#[derive(Debug, Clone, Serialize)]
pub struct VirtualMachine {
    pub id: u32,
    pub name: String,
    /// Node the VM runs on at snapshot time. Fixed for the cycle.
    origin: String,
    /// Node the VM should end the cycle on.
    target: String,
    pub resources: VMResources,
    pub grouping: Grouping,
}

impl VirtualMachine {
    pub fn new(id: u32, name: impl Into<String>, node: impl Into<String>, resources: VMResources) -> Self {
        let node = node.into();
        Self {
            id,
            name: name.into(),
            target: node.clone(),
            origin: node,
            resources,
            grouping: Grouping::default(),
        }
    }

    pub fn with_grouping(mut self, grouping: Grouping) -> Self {
        self.grouping = grouping;
        self
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub(crate) fn set_target(&mut self, node: &str) {
        self.target = node.to_string();
    }

    pub fn used(&self, dimension: Dimension) -> u64 {
        self.resources.get(dimension).used
    }

    pub fn is_relocated(&self) -> bool {
        self.origin != self.target
    }
}
