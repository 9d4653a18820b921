/*
* ProxLB Configuration
* --------------------
*
* Configuration Hierarchy (from lowest to highest priority):
* -----------------------------------------------------
* 1. Hardcoded defaults (set_default below)
* 2. The INI file passed with --config
* 3. Environment variables, PROXLB__<SECTION>__<KEY>
*
* Sections:
* ---------
* [proxmox]    api_host, api_user, api_pass, verify_ssl, timeout_secs
* [balancing]  method, balanciness, ignore_nodes, ignore_vms
* [service]    daemon, schedule (hours), log_verbosity
*
* Example:
* --------
* ```ini
* [proxmox]
* api_host = pve01.example.com
* api_user = root@pam
* api_pass = secret
* verify_ssl = 1
*
* [balancing]
* method = memory
* balanciness = 10
* ignore_nodes = pve03
* ignore_vms = testvm01,web*
*
* [service]
* daemon = 1
* schedule = 24
* ```
*
* Everything is validated in Settings::load, so a bad method or verbosity
* stops the process before the first cycle instead of halfway through one.
*/

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, Level};

use crate::core::balancer::DEFAULT_BALANCINESS;
use crate::core::inventory::Exclusions;
use crate::core::resource::Dimension;
use crate::errors::ConfigError;

const SECS_PER_HOUR: u64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub proxmox: ProxmoxSettings,
    pub balancing: BalancingSettings,
    pub service: ServiceSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxmoxSettings {
    /// `host` or `host:port`; the port defaults to 8006.
    pub api_host: String,
    pub api_user: String,
    pub api_pass: String,
    pub verify_ssl: bool,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancingSettings {
    pub method: String,
    pub balanciness: i64,
    pub ignore_nodes: String,
    pub ignore_vms: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    pub daemon: bool,
    /// Hours between two cycles in daemon mode.
    pub schedule: u64,
    pub log_verbosity: String,
}

/// The typed view of `[balancing]` the core works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalancingConfig {
    pub dimension: Dimension,
    pub balanciness: i64,
    pub exclusions: Exclusions,
}

impl Default for BalancingConfig {
    fn default() -> Self {
        Self {
            dimension: Dimension::Memory,
            balanciness: DEFAULT_BALANCINESS,
            exclusions: Exclusions::default(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::MissingFile {
                path: path.to_path_buf(),
            });
        }

        info!("Loading configuration from path: {}", path.display());

        let config = Config::builder()
            .set_default("proxmox.verify_ssl", true)?
            .set_default("proxmox.timeout_secs", 10)?
            .set_default("balancing.method", "memory")?
            .set_default("balancing.balanciness", DEFAULT_BALANCINESS)?
            .set_default("balancing.ignore_nodes", "")?
            .set_default("balancing.ignore_vms", "")?
            .set_default("service.daemon", true)?
            .set_default("service.schedule", 24)?
            .set_default("service.log_verbosity", "CRITICAL")?
            .add_source(File::from(path.to_path_buf()).format(FileFormat::Ini))
            .add_source(Environment::with_prefix("PROXLB").separator("__"))
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.balancing()?;
        self.log_level()?;
        self.schedule()?;
        for (key, value) in [
            ("proxmox.api_host", &self.proxmox.api_host),
            ("proxmox.api_user", &self.proxmox.api_user),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn balancing(&self) -> Result<BalancingConfig, ConfigError> {
        let dimension = self
            .balancing
            .method
            .parse::<Dimension>()
            .map_err(|value| ConfigError::InvalidMethod { value })?;
        if self.balancing.balanciness < 0 {
            return Err(ConfigError::InvalidValue {
                key: "balancing.balanciness".to_string(),
                message: format!("{} is negative", self.balancing.balanciness),
            });
        }
        Ok(BalancingConfig {
            dimension,
            balanciness: self.balancing.balanciness,
            exclusions: Exclusions::parse(&self.balancing.ignore_nodes, &self.balancing.ignore_vms),
        })
    }

    /// Pause between two daemon cycles. `service.schedule` is in hours.
    pub fn schedule(&self) -> Result<Duration, ConfigError> {
        if self.service.schedule == 0 {
            return Err(ConfigError::InvalidValue {
                key: "service.schedule".to_string(),
                message: "must be at least 1 hour".to_string(),
            });
        }
        Ok(Duration::from_secs(self.service.schedule.saturating_mul(SECS_PER_HOUR)))
    }

    pub fn log_level(&self) -> Result<Level, ConfigError> {
        match self.service.log_verbosity.trim().to_ascii_uppercase().as_str() {
            "CRITICAL" | "ERROR" => Ok(Level::ERROR),
            "WARNING" | "WARN" => Ok(Level::WARN),
            "INFO" => Ok(Level::INFO),
            "DEBUG" => Ok(Level::DEBUG),
            other => Err(ConfigError::InvalidValue {
                key: "service.log_verbosity".to_string(),
                message: format!("unknown level '{other}'"),
            }),
        }
    }
}
