//! graphload.toml configuration parser.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::address::{Address, AddressError};
use crate::duration::parse_duration;

pub const DEFAULT_CONCURRENCY_PER_ADDRESS: usize = 10;
pub const DEFAULT_QUEUE_SIZE: usize = 1000;
pub const DEFAULT_RETRY: u32 = 3;
pub const DEFAULT_RETRY_INITIAL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_RECONNECT_INITIAL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_READER_CONCURRENCY: usize = 50;
pub const DEFAULT_IMPORTER_CONCURRENCY: usize = 512;
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("client.addresses must not be empty")]
    NoAddresses,

    #[error(transparent)]
    InvalidAddress(#[from] AddressError),

    #[error("unsupported client version {0:?}, supported: \"v3\"")]
    UnsupportedVersion(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{field}: invalid duration {value:?}")]
    InvalidDuration { field: &'static str, value: String },
}

/// Wire protocol version spoken by the session layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ClientVersion {
    #[default]
    V3,
}

impl FromStr for ClientVersion {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "v3" | "3" => Ok(ClientVersion::V3),
            _ => Err(ConfigError::UnsupportedVersion(s.to_string())),
        }
    }
}

impl fmt::Display for ClientVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientVersion::V3 => write!(f, "v3"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    pub client: ClientConfig,
    #[serde(default)]
    pub manager: ManagerConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    pub version: Option<String>,
    #[serde(default)]
    pub addresses: Vec<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub concurrency_per_address: Option<usize>,
    pub queue_size: Option<usize>,
    pub retry: Option<u32>,
    pub retry_initial_interval: Option<String>,
    pub reconnect_initial_interval: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagerConfig {
    pub graph_name: Option<String>,
    pub reader_concurrency: Option<usize>,
    pub importer_concurrency: Option<usize>,
    pub stats_interval: Option<String>,
    #[serde(default)]
    pub hooks: HooksConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HooksConfig {
    #[serde(default)]
    pub before: Vec<HookConfig>,
    #[serde(default)]
    pub after: Vec<HookConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookConfig {
    #[serde(default)]
    pub statements: Vec<String>,
    pub wait: Option<String>,
}

impl LoaderConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every field that can be checked without touching the network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.client.validate()?;
        self.manager.validate()
    }

    /// Scaffold a minimal graphload.toml for a local cluster.
    pub fn scaffold(graph_name: &str) -> Self {
        LoaderConfig {
            client: ClientConfig {
                version: Some(ClientVersion::V3.to_string()),
                addresses: vec!["127.0.0.1:9669".to_string()],
                user: Some("root".to_string()),
                password: Some("nebula".to_string()),
                concurrency_per_address: Some(DEFAULT_CONCURRENCY_PER_ADDRESS),
                queue_size: Some(DEFAULT_QUEUE_SIZE),
                retry: Some(DEFAULT_RETRY),
                retry_initial_interval: Some("1s".to_string()),
                reconnect_initial_interval: Some("1s".to_string()),
            },
            manager: ManagerConfig {
                graph_name: Some(graph_name.to_string()),
                reader_concurrency: Some(DEFAULT_READER_CONCURRENCY),
                importer_concurrency: Some(DEFAULT_IMPORTER_CONCURRENCY),
                stats_interval: Some("10s".to_string()),
                hooks: HooksConfig::default(),
            },
        }
    }
}

impl ClientConfig {
    pub fn version(&self) -> Result<ClientVersion, ConfigError> {
        self.version
            .as_deref()
            .map(str::parse::<ClientVersion>)
            .unwrap_or(Ok(ClientVersion::default()))
    }

    pub fn addresses(&self) -> Result<Vec<Address>, ConfigError> {
        if self.addresses.is_empty() {
            return Err(ConfigError::NoAddresses);
        }
        Ok(Address::parse_list(&self.addresses)?)
    }

    pub fn user(&self) -> &str {
        self.user.as_deref().unwrap_or("root")
    }

    pub fn password(&self) -> &str {
        self.password.as_deref().unwrap_or_default()
    }

    pub fn concurrency_per_address(&self) -> Result<usize, ConfigError> {
        positive(
            "client.concurrency_per_address",
            self.concurrency_per_address
                .unwrap_or(DEFAULT_CONCURRENCY_PER_ADDRESS),
        )
    }

    pub fn queue_size(&self) -> Result<usize, ConfigError> {
        positive("client.queue_size", self.queue_size.unwrap_or(DEFAULT_QUEUE_SIZE))
    }

    pub fn retry(&self) -> u32 {
        self.retry.unwrap_or(DEFAULT_RETRY)
    }

    pub fn retry_initial_interval(&self) -> Result<Duration, ConfigError> {
        duration_field(
            "client.retry_initial_interval",
            self.retry_initial_interval.as_deref(),
            DEFAULT_RETRY_INITIAL_INTERVAL,
        )
    }

    pub fn reconnect_initial_interval(&self) -> Result<Duration, ConfigError> {
        duration_field(
            "client.reconnect_initial_interval",
            self.reconnect_initial_interval.as_deref(),
            DEFAULT_RECONNECT_INITIAL_INTERVAL,
        )
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.version()?;
        self.addresses()?;
        self.concurrency_per_address()?;
        self.queue_size()?;
        self.retry_initial_interval()?;
        self.reconnect_initial_interval()?;
        Ok(())
    }
}

impl ManagerConfig {
    pub fn graph_name(&self) -> &str {
        self.graph_name.as_deref().unwrap_or_default()
    }

    pub fn reader_concurrency(&self) -> Result<usize, ConfigError> {
        positive(
            "manager.reader_concurrency",
            self.reader_concurrency.unwrap_or(DEFAULT_READER_CONCURRENCY),
        )
    }

    pub fn importer_concurrency(&self) -> Result<usize, ConfigError> {
        positive(
            "manager.importer_concurrency",
            self.importer_concurrency
                .unwrap_or(DEFAULT_IMPORTER_CONCURRENCY),
        )
    }

    /// Zero disables periodic stats logging.
    pub fn stats_interval(&self) -> Result<Duration, ConfigError> {
        duration_field(
            "manager.stats_interval",
            self.stats_interval.as_deref(),
            DEFAULT_STATS_INTERVAL,
        )
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.reader_concurrency()?;
        self.importer_concurrency()?;
        self.stats_interval()?;
        for hook in self.hooks.before.iter().chain(&self.hooks.after) {
            hook.wait()?;
        }
        Ok(())
    }
}

impl HookConfig {
    pub fn wait(&self) -> Result<Option<Duration>, ConfigError> {
        self.wait
            .as_deref()
            .map(|value| {
                parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
                    field: "manager.hooks.wait",
                    value: value.to_string(),
                })
            })
            .transpose()
    }
}

fn positive(field: &'static str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(ConfigError::Zero(field));
    }
    Ok(value)
}

fn duration_field(
    field: &'static str,
    value: Option<&str>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) => parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
            field,
            value: value.to_string(),
        }),
    }
}
