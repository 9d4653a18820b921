use std::path::PathBuf;
use thiserror::Error;

/// Exit code used when the configuration cannot be loaded or validated.
pub const EXIT_CONFIG: i32 = 2;
/// Exit code used when the cluster API cannot be reached.
pub const EXIT_CONNECTIVITY: i32 = 3;
/// Exit code for everything else that stops the process.
pub const EXIT_FAILURE: i32 = 1;

#[derive(Error, Debug)]
pub enum BalancerError {
    #[error("Configuration Error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("Connectivity Error: {0}")]
    ConnectivityError(#[from] ConnectivityError),

    #[error("Migration Error: {0}")]
    MigrationError(#[from] MigrationError),

    #[error("Runtime Error: {0}")]
    Runtime(#[from] anyhow::Error),
}

impl BalancerError {
    /// Process exit code reserved for this error class.
    pub fn exit_code(&self) -> i32 {
        match self {
            BalancerError::ConfigError(_) => EXIT_CONFIG,
            BalancerError::ConnectivityError(_) => EXIT_CONNECTIVITY,
            BalancerError::MigrationError(_) | BalancerError::Runtime(_) => EXIT_FAILURE,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {}", path.display())]
    MissingFile { path: PathBuf },

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid balancing.method '{value}' (expected memory, disk or cpu)")]
    InvalidMethod { value: String },

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

#[derive(Error, Debug)]
pub enum ConnectivityError {
    #[error("could not resolve host {host}: {message}")]
    NameResolution { host: String, message: String },

    #[error("connection to {host} timed out")]
    Timeout { host: String },

    #[error("TLS verification failed for {host}: {message}")]
    Tls { host: String, message: String },

    #[error("authentication rejected for user {user}")]
    Authentication { user: String },

    #[error("unexpected API response {status} from {path}")]
    Api { status: u16, path: String },

    #[error("request to {host} failed: {message}")]
    Transport { host: String, message: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MigrationError {
    #[error("migration of VM {vmid} rejected ({status}): {message}")]
    Rejected {
        vmid: u32,
        status: u16,
        message: String,
    },

    #[error("migration request for VM {vmid} failed: {message}")]
    Transport { vmid: u32, message: String },
}

pub type BalancerResult<T> = Result<T, BalancerError>;
