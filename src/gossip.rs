//! The gossip network contract. The replica publishes cluster metadata
//! (cluster ID, first-range descriptor, configuration maps) when and only
//! when it holds a valid leader lease; the network itself is an external
//! collaborator. An in-memory implementation is provided for embedding and
//! tests.

use crate::error::Result;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// The gossip key for the cluster ID, published by all first-range replicas.
pub const KEY_CLUSTER_ID: &str = "cluster-id";
/// The sentinel gossip key, which informs a node whether it is connected to
/// the primary gossip network and not just a partition. Published by the
/// first range's leader.
pub const KEY_SENTINEL: &str = "sentinel";
/// The gossip key for the first range's descriptor.
pub const KEY_FIRST_RANGE: &str = "first-range";
/// The gossip key for the zone configuration map.
pub const KEY_CONFIG_ZONE: &str = "zone-config";
/// The gossip key for the system configuration span.
pub const KEY_SYSTEM_CONFIG: &str = "system-config";

/// Time-to-live for the cluster ID and sentinel. These must expire on a
/// reasonable basis and be continually re-gossiped, since they indicate a
/// live connection to the primary gossip network.
pub const CLUSTER_ID_GOSSIP_TTL: Duration = Duration::from_secs(120);
/// The approximate interval at which the sentinel is re-published.
pub const CLUSTER_ID_GOSSIP_INTERVAL: Duration =
    Duration::from_secs(CLUSTER_ID_GOSSIP_TTL.as_secs() / 2);

/// Time-to-live for configuration maps: they do not expire.
pub const CONFIG_GOSSIP_TTL: Duration = Duration::ZERO;
/// The interval at which leaders re-gossip their config maps. Even though
/// config maps do not expire, periodic gossip safeguards against a leader
/// failing to gossip after an update.
pub const CONFIG_GOSSIP_INTERVAL: Duration = Duration::from_secs(60);

/// A gossip network. Implementations must be safe for concurrent use.
pub trait Gossip: Send + Sync {
    /// Adds or updates a gossip entry with a time-to-live. A zero TTL means
    /// the entry does not expire.
    fn add_info(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// Returns the current value of a gossip entry, if any.
    fn get_info(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

/// An in-memory gossip network. Entries never expire; the TTL is recorded
/// for inspection only.
#[derive(Default)]
pub struct MemGossip {
    infos: Mutex<HashMap<String, Info>>,
}

#[derive(Default)]
struct Info {
    value: Vec<u8>,
    ttl: Duration,
    /// How many times the entry has been published.
    updates: u64,
}

impl MemGossip {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the recorded TTL of an entry, if any.
    pub fn get_ttl(&self, key: &str) -> Result<Option<Duration>> {
        Ok(self.infos.lock()?.get(key).map(|info| info.ttl))
    }

    /// Returns how many times an entry has been published.
    pub fn updates(&self, key: &str) -> Result<u64> {
        Ok(self.infos.lock()?.get(key).map(|info| info.updates).unwrap_or(0))
    }
}

impl Gossip for MemGossip {
    fn add_info(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let mut infos = self.infos.lock()?;
        let info = infos.entry(key.to_string()).or_default();
        info.value = value;
        info.ttl = ttl;
        info.updates += 1;
        Ok(())
    }

    fn get_info(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.infos.lock()?.get(key).map(|info| info.value.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_gossip_add_and_get() -> Result<()> {
        let gossip = MemGossip::new();
        assert_eq!(gossip.get_info("a")?, None);

        gossip.add_info("a", vec![1], CLUSTER_ID_GOSSIP_TTL)?;
        assert_eq!(gossip.get_info("a")?, Some(vec![1]));
        assert_eq!(gossip.get_ttl("a")?, Some(CLUSTER_ID_GOSSIP_TTL));

        gossip.add_info("a", vec![2], CONFIG_GOSSIP_TTL)?;
        assert_eq!(gossip.get_info("a")?, Some(vec![2]));
        Ok(())
    }
}
