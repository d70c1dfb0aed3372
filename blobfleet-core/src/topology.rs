use crate::{FleetError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

pub const DEFAULT_GROUP: &str = "default";

/// Base URL of a storage node, e.g. `http://10.0.0.5:3001`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint(String);

impl Endpoint {
    /// Normalises `host:port` or a URL base: trims whitespace and trailing slashes,
    /// prepends `http://` when no scheme is given and lowercases scheme and host.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(FleetError::InvalidEndpoint(
                "endpoint cannot be empty".to_string(),
            ));
        }

        let candidate = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("http://{}", trimmed)
        };

        let url = reqwest::Url::parse(&candidate)
            .map_err(|error| FleetError::InvalidEndpoint(format!("{}: {}", raw.trim(), error)))?;

        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(FleetError::InvalidEndpoint(format!(
                "{}: expected an http(s) base URL",
                raw.trim()
            )));
        }

        // The parsed form has a lowercase scheme and host.
        Ok(Self(url.as_str().trim_end_matches('/').to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Endpoint {
    type Error = FleetError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Group {
    pub name: String,
    /// Registration order.
    pub endpoints: Vec<Endpoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerEntry {
    pub group: String,
    pub endpoint: Endpoint,
}

/// Immutable view of the fleet. Groups are kept sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Topology {
    groups: Vec<Group>,
}

impl Topology {
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|group| group.name == name)
    }

    pub fn endpoint_count(&self) -> usize {
        self.groups.iter().map(|group| group.endpoints.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoint_count() == 0
    }

    /// Every `(group, endpoint)` pair in group order, then registration order.
    pub fn servers(&self) -> Vec<ServerEntry> {
        self.groups
            .iter()
            .flat_map(|group| {
                group.endpoints.iter().map(|endpoint| ServerEntry {
                    group: group.name.clone(),
                    endpoint: endpoint.clone(),
                })
            })
            .collect()
    }

    pub fn group_of(&self, endpoint: &Endpoint) -> Option<&str> {
        self.groups
            .iter()
            .find(|group| group.endpoints.contains(endpoint))
            .map(|group| group.name.as_str())
    }

    /// Returns `true` if the endpoint was newly added.
    pub fn add_server(&mut self, group: &str, endpoint: Endpoint) -> Result<bool> {
        let group = group.trim();
        if group.is_empty() {
            return Err(FleetError::Config("group name cannot be empty".to_string()));
        }

        if let Some(owner) = self.group_of(&endpoint) {
            if owner == group {
                return Ok(false);
            }
            return Err(FleetError::Config(format!(
                "endpoint {} already belongs to group '{}', cannot add it to '{}'",
                endpoint, owner, group
            )));
        }

        match self
            .groups
            .binary_search_by(|existing| existing.name.as_str().cmp(group))
        {
            Ok(index) => self.groups[index].endpoints.push(endpoint),
            Err(index) => self.groups.insert(
                index,
                Group {
                    name: group.to_string(),
                    endpoints: vec![endpoint],
                },
            ),
        }

        Ok(true)
    }
}

/// Process-wide topology. Readers take a cheap snapshot; writers copy, modify and swap,
/// so registration never holds the lock across I/O.
#[derive(Debug, Default)]
pub struct TopologyRegistry {
    current: RwLock<Arc<Topology>>,
}

impl TopologyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_topology(topology: Topology) -> Self {
        Self {
            current: RwLock::new(Arc::new(topology)),
        }
    }

    pub fn from_servers<I, G>(servers: I) -> Result<Self>
    where
        I: IntoIterator<Item = (G, Endpoint)>,
        G: AsRef<str>,
    {
        let mut topology = Topology::default();
        for (group, endpoint) in servers {
            topology.add_server(group.as_ref(), endpoint)?;
        }
        Ok(Self::from_topology(topology))
    }

    /// Registers every entry of a comma-separated list in the default group.
    pub fn from_endpoint_list(list: &str) -> Result<Self> {
        let mut topology = Topology::default();
        for raw in list.split(',').filter(|raw| !raw.trim().is_empty()) {
            topology.add_server(DEFAULT_GROUP, Endpoint::parse(raw)?)?;
        }
        Ok(Self::from_topology(topology))
    }

    pub async fn snapshot(&self) -> Arc<Topology> {
        self.current.read().await.clone()
    }

    pub async fn add_server(&self, group: &str, endpoint: Endpoint) -> Result<bool> {
        let mut current = self.current.write().await;
        let mut next = Topology::clone(&current);
        let added = next.add_server(group, endpoint.clone())?;
        if added {
            *current = Arc::new(next);
            tracing::info!("Registered blob-server {} in group '{}'", endpoint, group);
        }
        Ok(added)
    }
}
