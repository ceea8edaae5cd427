use super::{Engine, Status};
use crate::error::Result;

/// An in-memory key/value storage engine using the Rust standard library
/// B-tree implementation. Data is not persisted. Mainly used for tests and
/// for synthesized read snapshots.
#[derive(Default)]
pub struct Memory {
    data: std::collections::BTreeMap<Vec<u8>, Vec<u8>>,
}

impl Memory {
    /// Creates a new Memory key-value storage engine.
    pub fn new() -> Self {
        Self { data: std::collections::BTreeMap::new() }
    }
}

impl std::fmt::Display for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "memory")
    }
}

impl Engine for Memory {
    type ScanIterator<'a> = ScanIterator<'a>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.data.remove(key);
        Ok(())
    }

    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.data.get(key).cloned())
    }

    fn scan(&mut self, range: impl std::ops::RangeBounds<Vec<u8>>) -> Self::ScanIterator<'_> {
        ScanIterator { inner: self.data.range(range) }
    }

    fn scan_dyn(
        &mut self,
        range: (std::ops::Bound<Vec<u8>>, std::ops::Bound<Vec<u8>>),
    ) -> Box<dyn super::ScanIterator + '_> {
        Box::new(self.scan(range))
    }

    fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.data.insert(key.to_vec(), value);
        Ok(())
    }

    fn status(&mut self) -> Result<Status> {
        Ok(Status {
            name: "memory".to_string(),
            keys: self.data.len() as u64,
            size: self.data.iter().fold(0, |size, (k, v)| size + k.len() as u64 + v.len() as u64),
        })
    }
}

pub struct ScanIterator<'a> {
    inner: std::collections::btree_map::Range<'a, Vec<u8>, Vec<u8>>,
}

impl ScanIterator<'_> {
    fn map(item: (&Vec<u8>, &Vec<u8>)) -> <Self as Iterator>::Item {
        let (key, value) = item;
        Ok((key.clone(), value.clone()))
    }
}

impl Iterator for ScanIterator<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(Self::map)
    }
}

impl DoubleEndedIterator for ScanIterator<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(Self::map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_ops() -> Result<()> {
        let mut s = Memory::new();

        // Getting a missing key should return None.
        assert_eq!(s.get(b"a")?, None);

        // Setting and getting a key should return its value.
        s.set(b"a", vec![1])?;
        assert_eq!(s.get(b"a")?, Some(vec![1]));

        // Setting an existing key should replace its value.
        s.set(b"a", vec![0])?;
        assert_eq!(s.get(b"a")?, Some(vec![0]));

        // Deleting a key should remove it, but not affect others.
        s.set(b"b", vec![2])?;
        s.delete(b"a")?;
        assert_eq!(s.get(b"a")?, None);
        assert_eq!(s.get(b"b")?, Some(vec![2]));

        // Deletes are idempotent.
        s.delete(b"a")?;
        assert_eq!(s.get(b"a")?, None);

        Ok(())
    }

    #[test]
    fn scans() -> Result<()> {
        let mut s = Memory::new();
        s.set(b"a", vec![1])?;
        s.set(b"b", vec![2])?;
        s.set(b"ba", vec![2, 1])?;
        s.set(b"c", vec![3])?;

        assert_eq!(
            s.scan(b"b".to_vec()..b"c".to_vec()).collect::<Result<Vec<_>>>()?,
            vec![(b"b".to_vec(), vec![2]), (b"ba".to_vec(), vec![2, 1])],
        );
        assert_eq!(
            s.scan(b"b".to_vec()..b"c".to_vec()).rev().collect::<Result<Vec<_>>>()?,
            vec![(b"ba".to_vec(), vec![2, 1]), (b"b".to_vec(), vec![2])],
        );
        Ok(())
    }
}
