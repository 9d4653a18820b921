pub mod cli;
pub mod cluster;
pub mod config;
pub mod core;
pub mod errors;
pub mod scheduler;

// Re-exports
pub use crate::cluster::{ClusterApi, ProxmoxClient};
pub use crate::config::Settings;
pub use crate::core::{Dimension, Inventory, MigrationPlan};
pub use crate::errors::{BalancerError, BalancerResult};
pub use crate::scheduler::{CycleReport, Scheduler};
