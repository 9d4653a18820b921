pub mod settings;

pub use settings::{BalancingConfig, BalancingSettings, ProxmoxSettings, ServiceSettings, Settings};
