//! Configuration maps gossiped by range leaders. Administrative
//! configuration lives in the system-reserved keyspace as ordinary MVCC
//! data; whenever a write may have changed it, the leader reloads the
//! affected map, hashes its contents, and re-gossips it if the hash moved.
//!
//! Each map is registered as a descriptor carrying its key prefix, gossip
//! key, and a decode function that validates raw entry values. No reflection
//! is involved: adding a config type means registering another descriptor.

use crate::encoding::Value as _;
use crate::error::Result;
use crate::gossip;
use crate::hlc::Timestamp;
use crate::keys;
use crate::request::KeyValue;
use crate::storage::{mvcc, WriteBatch};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Describes an administrative configuration map: which key prefix holds its
/// entries, where it is gossiped, and how raw entry values are decoded and
/// validated.
#[derive(Clone)]
pub struct ConfigDescriptor {
    pub key_prefix: Vec<u8>,
    pub gossip_key: &'static str,
    /// Decodes and validates a raw entry value, returning its canonical
    /// encoding.
    pub decode: fn(&[u8]) -> Result<Vec<u8>>,
}

/// The default config descriptors: zone configurations.
pub fn default_descriptors() -> Vec<ConfigDescriptor> {
    vec![ConfigDescriptor {
        key_prefix: keys::CONFIG_ZONE_PREFIX.to_vec(),
        gossip_key: gossip::KEY_CONFIG_ZONE,
        decode: |bytes| {
            let config = ZoneConfig::decode(bytes)?;
            config.validate()?;
            config.encode()
        },
    }]
}

/// A zone configuration, attached to a key prefix. Controls replication and
/// size parameters for the ranges under the prefix.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ZoneConfig {
    /// Required attributes of the stores holding each replica.
    pub replica_attrs: Vec<String>,
    /// The target minimum size of a range before merging.
    pub range_min_bytes: i64,
    /// The maximum size of a range before splitting.
    pub range_max_bytes: i64,
    /// How long overwritten values are retained before garbage collection.
    pub gc_ttl_seconds: i32,
}

impl crate::encoding::Value for ZoneConfig {}

impl ZoneConfig {
    pub fn validate(&self) -> Result<()> {
        if self.range_min_bytes < 0 || self.range_max_bytes < self.range_min_bytes {
            return Err(crate::error::Error::InvalidInput(format!(
                "invalid zone size bounds [{}, {}]",
                self.range_min_bytes, self.range_max_bytes
            )));
        }
        Ok(())
    }
}

/// One entry of a configuration map: the key suffix below the map's prefix,
/// and the canonical encoded configuration value.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PrefixConfig {
    #[serde(with = "serde_bytes")]
    pub prefix: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub config: Vec<u8>,
}

/// A configuration map, gossiped as a whole.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConfigMap {
    pub entries: Vec<PrefixConfig>,
}

impl crate::encoding::Value for ConfigMap {}

/// The system configuration span, gossiped as raw key/value pairs with its
/// own content hash.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    pub values: Vec<KeyValue>,
}

impl crate::encoding::Value for SystemConfig {}

/// Loads the configuration map under a descriptor's prefix, returning it
/// along with a content hash used to suppress redundant gossip. The scan is
/// consistent, so an intent in the span fails the load; the caller logs the
/// failure and the next trigger retries.
pub fn load_config_map(
    batch: &WriteBatch,
    desc: &ConfigDescriptor,
) -> Result<(ConfigMap, Vec<u8>)> {
    let end = keys::prefix_end(&desc.key_prefix);
    let (kvs, _) = mvcc::scan(batch, &desc.key_prefix, &end, Timestamp::MAX, None, true)?;
    let mut entries = Vec::with_capacity(kvs.len());
    let mut sha = Sha256::new();
    for (key, value) in kvs {
        let config = (desc.decode)(&value)?;
        sha.update(&value);
        entries.push(PrefixConfig { prefix: key[desc.key_prefix.len()..].to_vec(), config });
    }
    Ok((ConfigMap { entries }, sha.finalize().to_vec()))
}

/// Loads the entire system configuration span and its content hash.
pub fn load_system_config(batch: &WriteBatch) -> Result<(SystemConfig, Vec<u8>)> {
    let end = keys::prefix_end(keys::SYSTEM_CONFIG_PREFIX);
    let (kvs, _) =
        mvcc::scan(batch, keys::SYSTEM_CONFIG_PREFIX, &end, Timestamp::MAX, None, true)?;
    let mut values = Vec::with_capacity(kvs.len());
    let mut sha = Sha256::new();
    for (key, value) in kvs {
        sha.update(&value);
        values.push(KeyValue { key, value });
    }
    Ok((SystemConfig { values }, sha.finalize().to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Value as _;
    use crate::error::Error;
    use crate::storage::engine::share;
    use crate::storage::Memory;
    use crate::types::{Txn, TxnStatus};

    fn zone_key(suffix: &[u8]) -> Vec<u8> {
        let mut key = keys::CONFIG_ZONE_PREFIX.to_vec();
        key.extend_from_slice(suffix);
        key
    }

    fn zone(max_bytes: i64) -> ZoneConfig {
        ZoneConfig { range_max_bytes: max_bytes, ..Default::default() }
    }

    #[test]
    fn load_config_map_hashes_content() -> Result<()> {
        let mut batch = WriteBatch::new(share(Memory::new()));
        let mut stats = mvcc::Stats::default();
        let desc = default_descriptors().remove(0);

        let (map, empty_hash) = load_config_map(&batch, &desc)?;
        assert!(map.entries.is_empty());

        mvcc::put(
            &mut batch,
            &mut stats,
            &zone_key(b"db1"),
            Timestamp::new(1, 0),
            zone(1 << 20).encode()?,
            None,
        )?;
        let (map, hash) = load_config_map(&batch, &desc)?;
        assert_eq!(map.entries.len(), 1);
        assert_eq!(map.entries[0].prefix, b"db1".to_vec());
        assert_ne!(hash, empty_hash);

        // The hash is stable across reloads, and moves when content changes.
        let (_, again) = load_config_map(&batch, &desc)?;
        assert_eq!(hash, again);
        mvcc::put(
            &mut batch,
            &mut stats,
            &zone_key(b"db2"),
            Timestamp::new(2, 0),
            zone(2 << 20).encode()?,
            None,
        )?;
        let (_, changed) = load_config_map(&batch, &desc)?;
        assert_ne!(hash, changed);
        Ok(())
    }

    #[test]
    fn load_config_map_rejects_invalid_entries() -> Result<()> {
        let mut batch = WriteBatch::new(share(Memory::new()));
        let mut stats = mvcc::Stats::default();
        let desc = default_descriptors().remove(0);

        let invalid = ZoneConfig { range_min_bytes: 10, range_max_bytes: 5, ..Default::default() };
        mvcc::put(
            &mut batch,
            &mut stats,
            &zone_key(b"bad"),
            Timestamp::new(1, 0),
            invalid.encode()?,
            None,
        )?;
        assert!(matches!(load_config_map(&batch, &desc), Err(Error::InvalidInput(_))));
        Ok(())
    }

    #[test]
    fn load_config_map_fails_on_intents() -> Result<()> {
        let mut batch = WriteBatch::new(share(Memory::new()));
        let mut stats = mvcc::Stats::default();
        let desc = default_descriptors().remove(0);

        let txn = Txn {
            id: 1,
            key: zone_key(b"db1"),
            timestamp: Timestamp::new(1, 0),
            priority: 1,
            status: TxnStatus::Pending,
        };
        mvcc::put(
            &mut batch,
            &mut stats,
            &zone_key(b"db1"),
            txn.timestamp,
            zone(1 << 20).encode()?,
            Some(&txn),
        )?;
        assert!(matches!(load_config_map(&batch, &desc), Err(Error::WriteIntent { .. })));
        Ok(())
    }

    #[test]
    fn load_system_config_spans_raw_values() -> Result<()> {
        let mut batch = WriteBatch::new(share(Memory::new()));
        let mut stats = mvcc::Stats::default();

        let mut key = keys::SYSTEM_CONFIG_PREFIX.to_vec();
        key.extend_from_slice(b"desc1");
        mvcc::put(&mut batch, &mut stats, &key, Timestamp::new(1, 0), vec![7], None)?;

        let (config, hash) = load_system_config(&batch)?;
        assert_eq!(config.values.len(), 1);
        assert_eq!(config.values[0].value, vec![7]);
        assert!(!hash.is_empty());
        Ok(())
    }
}
