//! # Ordered KV Side
//!
//! Joint bodies and range-scanned secondary indexes. Writes go through
//! [`KvBatch`]: the batch records, for every key it touches, the value the
//! key held before - producing a reverse batch the writer applies if the
//! row-store commit that follows the KV sync fails.

use crate::errors::StoreError;
use crate::store::Store;

/// One KV mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum KvOp {
    /// Set `key` to `value`.
    Put(Vec<u8>, Vec<u8>),
    /// Remove `key`.
    Delete(Vec<u8>),
}

/// The undo log of an applied [`KvBatch`].
#[derive(Debug, Default)]
pub struct ReverseBatch {
    pub(crate) ops: Vec<KvOp>,
}

impl ReverseBatch {
    /// Whether there is anything to undo.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// A staged, atomic set of KV writes with reverse-op recording.
pub struct KvBatch<'a> {
    store: &'a Store,
    ops: Vec<KvOp>,
    reverse: Vec<KvOp>,
}

impl<'a> KvBatch<'a> {
    pub(crate) fn new(store: &'a Store) -> Self {
        Self {
            store,
            ops: Vec::new(),
            reverse: Vec::new(),
        }
    }

    /// Stage a put, recording the prior value for undo.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), StoreError> {
        self.record_reverse(&key)?;
        self.ops.push(KvOp::Put(key, value));
        Ok(())
    }

    /// Stage a delete, recording the prior value for undo.
    pub fn delete(&mut self, key: Vec<u8>) -> Result<(), StoreError> {
        self.record_reverse(&key)?;
        self.ops.push(KvOp::Delete(key));
        Ok(())
    }

    /// Number of staged operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Staged entries under `prefix`, last write per key winning:
    /// `(key, Some(value))` for puts, `(key, None)` for deletes. Readers
    /// that must see earlier writes of the same batch (the AA engine
    /// across MCIs of one stabilization) overlay these onto committed
    /// state.
    pub fn staged_with_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Option<Vec<u8>>)> {
        let mut latest: std::collections::BTreeMap<Vec<u8>, Option<Vec<u8>>> =
            std::collections::BTreeMap::new();
        for op in &self.ops {
            match op {
                KvOp::Put(key, value) if key.starts_with(prefix) => {
                    latest.insert(key.clone(), Some(value.clone()));
                }
                KvOp::Delete(key) if key.starts_with(prefix) => {
                    latest.insert(key.clone(), None);
                }
                _ => {}
            }
        }
        latest.into_iter().collect()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Apply atomically. `sync` forces fsync before return; the save path
    /// always syncs so that the row commit that follows never outruns the
    /// KV state. Returns the reverse batch for the caller to hold until
    /// the row commit lands.
    pub fn write(self, sync: bool) -> Result<ReverseBatch, StoreError> {
        self.store.kv_apply_ops(&self.ops, sync)?;
        Ok(ReverseBatch { ops: self.reverse })
    }

    fn record_reverse(&mut self, key: &[u8]) -> Result<(), StoreError> {
        // Later ops on the same key would record an intra-batch value;
        // first-touch wins so the reverse batch restores the pre-batch
        // state.
        if self
            .ops
            .iter()
            .any(|op| matches!(op, KvOp::Put(k, _) | KvOp::Delete(k) if k == key))
        {
            return Ok(());
        }
        match self.store.kv_get_raw(key)? {
            Some(prior) => self.reverse.push(KvOp::Put(key.to_vec(), prior)),
            None => self.reverse.push(KvOp::Delete(key.to_vec())),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(StoreConfig::for_testing(dir.path().to_string_lossy())).unwrap();
        (dir, store)
    }

    #[test]
    fn batch_applies_atomically() {
        let (_dir, store) = open_store();
        let mut batch = store.kv_batch();
        batch.put(b"j\nU1".to_vec(), b"{}".to_vec()).unwrap();
        batch.put(b"j\nU2".to_vec(), b"{}".to_vec()).unwrap();
        batch.write(true).unwrap();
        assert!(store.kv_get_raw(b"j\nU1").unwrap().is_some());
        assert!(store.kv_get_raw(b"j\nU2").unwrap().is_some());
    }

    #[test]
    fn reverse_batch_restores_prior_state() {
        let (_dir, store) = open_store();
        let mut seed = store.kv_batch();
        seed.put(b"k1".to_vec(), b"old".to_vec()).unwrap();
        seed.write(true).unwrap();

        let mut batch = store.kv_batch();
        batch.put(b"k1".to_vec(), b"new".to_vec()).unwrap();
        batch.put(b"k2".to_vec(), b"fresh".to_vec()).unwrap();
        let reverse = batch.write(true).unwrap();

        assert_eq!(store.kv_get_raw(b"k1").unwrap(), Some(b"new".to_vec()));
        store.kv_apply_reverse(reverse).unwrap();
        assert_eq!(store.kv_get_raw(b"k1").unwrap(), Some(b"old".to_vec()));
        assert_eq!(store.kv_get_raw(b"k2").unwrap(), None);
    }

    #[test]
    fn first_touch_wins_in_reverse_log() {
        let (_dir, store) = open_store();
        let mut batch = store.kv_batch();
        batch.put(b"k".to_vec(), b"a".to_vec()).unwrap();
        batch.put(b"k".to_vec(), b"b".to_vec()).unwrap();
        let reverse = batch.write(true).unwrap();

        assert_eq!(store.kv_get_raw(b"k").unwrap(), Some(b"b".to_vec()));
        store.kv_apply_reverse(reverse).unwrap();
        // The reverse restores the pre-batch absence, not the mid-batch "a".
        assert_eq!(store.kv_get_raw(b"k").unwrap(), None);
    }
}
