use blobfleet_core::{
    DEFAULT_GROUP, DEFAULT_NODE_CONNECT_TIMEOUT, DEFAULT_NODE_TIMEOUT, Endpoint, FleetError,
    ReplicationPolicy, Result, TopologyRegistry,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// `(group, endpoint)` pairs in registration order.
    #[serde(default)]
    pub blob_servers: Vec<BlobServerConfig>,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub replication: ReplicationPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobServerConfig {
    #[serde(default = "default_group")]
    pub group: String,
    pub endpoint: Endpoint,
}

fn default_group() -> String {
    DEFAULT_GROUP.to_string()
}

/// Bounds every outbound request to a blob-server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    DEFAULT_NODE_TIMEOUT.as_millis() as u64
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_NODE_CONNECT_TIMEOUT.as_millis() as u64
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("BLOBFLEET").separator("__"))
            .build()
            .map_err(|e| FleetError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| FleetError::Config(e.to_string()))?;

        config.replication.validate()?;
        Ok(config)
    }

    /// Resolves the fleet either from an explicit comma-separated list, which places
    /// every server in the default group, or from the configuration file.
    pub fn load(blob_servers: Option<&str>, path: &str) -> Result<(Self, TopologyRegistry)> {
        if let Some(list) = blob_servers.filter(|list| !list.trim().is_empty()) {
            return Ok((Self::default(), TopologyRegistry::from_endpoint_list(list)?));
        }

        let config = Self::from_file(path)?;
        let registry = config.topology()?;
        Ok((config, registry))
    }

    pub fn topology(&self) -> Result<TopologyRegistry> {
        TopologyRegistry::from_servers(
            self.blob_servers
                .iter()
                .map(|server| (server.group.as_str(), server.endpoint.clone())),
        )
    }
}
