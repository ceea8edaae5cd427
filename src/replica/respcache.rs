//! The response cache makes write retries idempotent across leadership
//! changes. It maps command IDs to the outcome of their first execution
//! (response or error), persisted in the same storage namespace as the
//! range's data. Entries are written inside the same batch as the command's
//! mutations, so readers observe either both or neither; a replayed proposal
//! with a known command ID returns the cached outcome without re-executing
//! side effects.

use crate::encoding::bincode;
use crate::encoding::Key as _;
use crate::error::Result;
use crate::keys::{Key, KeyPrefix};
use crate::request::BatchResponse;
use crate::storage::WriteBatch;
use crate::types::{CmdID, RangeID};

/// A cached command outcome: the batch response, or the error it failed
/// with. Note that leadership errors are never cached, since the retry is
/// expected to succeed elsewhere.
pub type CachedResponse = Result<BatchResponse>;

/// A range's response cache. The cache itself is stateless; all data lives
/// in the engine under the range's local response keys.
pub struct ResponseCache {
    range_id: RangeID,
}

impl ResponseCache {
    pub fn new(range_id: RangeID) -> Self {
        ResponseCache { range_id }
    }

    /// Looks up the cached outcome for a command ID, reading through the
    /// given batch. Commands without an ID are never cached.
    pub fn get_response(&self, batch: &WriteBatch, cmd_id: CmdID) -> Result<Option<CachedResponse>> {
        if cmd_id.is_empty() {
            return Ok(None);
        }
        batch
            .get(&self.key(cmd_id)?)?
            .map(|v| bincode::deserialize(&v))
            .transpose()
    }

    /// Adds the outcome for a command ID to the given batch. It is the
    /// caller's responsibility to commit the batch together with the
    /// command's data mutations.
    pub fn put_response(
        &self,
        batch: &mut WriteBatch,
        cmd_id: CmdID,
        response: &CachedResponse,
    ) -> Result<()> {
        if cmd_id.is_empty() {
            return Ok(());
        }
        batch.set(&self.key(cmd_id)?, bincode::serialize(response)?);
        Ok(())
    }

    /// Removes all of the range's cached responses, via the given batch.
    pub fn clear_data(&self, batch: &mut WriteBatch) -> Result<()> {
        for (key, _) in batch.scan_prefix(&KeyPrefix::Response(self.range_id).encode()?)? {
            batch.delete(&key);
        }
        Ok(())
    }

    /// Garbage collects cached responses whose command wall time is below
    /// the given threshold, returning the number removed.
    pub fn gc(&self, batch: &mut WriteBatch, before_wall_time: i64) -> Result<u64> {
        let mut removed = 0;
        for (key, _) in batch.scan_prefix(&KeyPrefix::Response(self.range_id).encode()?)? {
            if let Key::Response(_, wall_time, _) = Key::decode(&key)? {
                if wall_time < before_wall_time {
                    batch.delete(&key);
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    fn key(&self, cmd_id: CmdID) -> Result<Vec<u8>> {
        Key::Response(self.range_id, cmd_id.wall_time, cmd_id.random).encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::storage::engine::share;
    use crate::storage::Memory;

    fn cmd_id(wall_time: i64) -> CmdID {
        CmdID { wall_time, random: 42 }
    }

    #[test]
    fn caches_responses_and_errors() -> Result<()> {
        let engine = share(Memory::new());
        let cache = ResponseCache::new(1);
        let mut batch = WriteBatch::new(engine.clone());

        assert_eq!(cache.get_response(&batch, cmd_id(1))?, None);

        let ok: CachedResponse = Ok(BatchResponse::default());
        cache.put_response(&mut batch, cmd_id(1), &ok)?;
        let err: CachedResponse = Err(Error::Abort);
        cache.put_response(&mut batch, cmd_id(2), &err)?;

        // Visible through the batch before commit, and after.
        assert_eq!(cache.get_response(&batch, cmd_id(1))?, Some(ok.clone()));
        batch.commit()?;
        let batch = WriteBatch::new(engine);
        assert_eq!(cache.get_response(&batch, cmd_id(1))?, Some(ok));
        assert_eq!(cache.get_response(&batch, cmd_id(2))?, Some(err));
        Ok(())
    }

    #[test]
    fn empty_cmd_id_is_never_cached() -> Result<()> {
        let cache = ResponseCache::new(1);
        let mut batch = WriteBatch::new(share(Memory::new()));
        cache.put_response(&mut batch, CmdID::default(), &Ok(BatchResponse::default()))?;
        assert_eq!(cache.get_response(&batch, CmdID::default())?, None);
        Ok(())
    }

    #[test]
    fn caches_are_separate_per_range() -> Result<()> {
        let engine = share(Memory::new());
        let mut batch = WriteBatch::new(engine);
        let first = ResponseCache::new(1);
        let second = ResponseCache::new(2);

        first.put_response(&mut batch, cmd_id(1), &Ok(BatchResponse::default()))?;
        assert_eq!(second.get_response(&batch, cmd_id(1))?, None);

        second.clear_data(&mut batch)?;
        assert!(first.get_response(&batch, cmd_id(1))?.is_some());
        first.clear_data(&mut batch)?;
        assert_eq!(first.get_response(&batch, cmd_id(1))?, None);
        Ok(())
    }

    #[test]
    fn gc_removes_old_entries() -> Result<()> {
        let cache = ResponseCache::new(1);
        let mut batch = WriteBatch::new(share(Memory::new()));
        cache.put_response(&mut batch, cmd_id(10), &Ok(BatchResponse::default()))?;
        cache.put_response(&mut batch, cmd_id(20), &Ok(BatchResponse::default()))?;

        assert_eq!(cache.gc(&mut batch, 15)?, 1);
        assert_eq!(cache.get_response(&batch, cmd_id(10))?, None);
        assert!(cache.get_response(&batch, cmd_id(20))?.is_some());
        Ok(())
    }
}
