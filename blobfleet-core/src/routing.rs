//! Search/placement order for a routing key.
//!
//! A key's home group is derived from its SHA-256 digest. The search path lists the home
//! group's endpoints first and then every other group in enumeration order, so a
//! correctly replicated fleet answers on the first attempt while blobs stored before a
//! topology change stay reachable.

use crate::{Endpoint, Group, Topology};
use sha2::{Digest, Sha256};

/// SHA-256 of `data` as lowercase hex. Used as the id of uploaded content.
pub fn content_fingerprint(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Index of the home group among `group_count` groups, `None` when there are none.
pub fn home_group_index(key: &str, group_count: usize) -> Option<usize> {
    if group_count == 0 {
        return None;
    }

    let digest = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let value = u64::from_be_bytes(prefix);

    Some((value % group_count as u64) as usize)
}

pub fn home_group<'a>(key: &str, topology: &'a Topology) -> Option<&'a Group> {
    home_group_index(key, topology.groups().len()).map(|index| &topology.groups()[index])
}

/// Ordered list of endpoints to try for `key`. Pure: depends only on the snapshot.
pub fn ordered_search_path(key: &str, topology: &Topology) -> Vec<Endpoint> {
    let groups = topology.groups();
    let Some(home) = home_group_index(key, groups.len()) else {
        return Vec::new();
    };

    let mut path = Vec::with_capacity(topology.endpoint_count());
    path.extend(groups[home].endpoints.iter().cloned());
    for (index, group) in groups.iter().enumerate() {
        if index != home {
            path.extend(group.endpoints.iter().cloned());
        }
    }

    path
}
