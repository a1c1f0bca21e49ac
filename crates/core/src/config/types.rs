use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::coordinator::CoordinatorConfig;
use crate::job::JobsConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// SQLite file holding deposit status, locks and the audit log.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// SQLite file holding the operation, job and pipeline channels.
    #[serde(default = "default_queue_path")]
    pub queue_path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            queue_path: default_queue_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("deposits.db")
}

fn default_queue_path() -> PathBuf {
    PathBuf::from("deposit-queues.db")
}

/// Sanitized config for API responses (job arguments redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub coordinator: CoordinatorConfig,
    pub jobs: SanitizedJobsConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedJobsConfig {
    pub sequence: Vec<SanitizedJobDefinition>,
    pub cleanup: SanitizedJobDefinition,
}

/// Job definition with its arguments hidden, they may carry credentials
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedJobDefinition {
    pub class: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<PathBuf>,
    pub arg_count: usize,
}

impl From<&crate::job::JobDefinition> for SanitizedJobDefinition {
    fn from(job: &crate::job::JobDefinition) -> Self {
        Self {
            class: job.class.clone(),
            program: job.program.clone(),
            arg_count: job.args.len(),
        }
    }
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            coordinator: config.coordinator.clone(),
            jobs: SanitizedJobsConfig {
                sequence: config.jobs.sequence.iter().map(Into::into).collect(),
                cleanup: (&config.jobs.cleanup).into(),
            },
        }
    }
}
