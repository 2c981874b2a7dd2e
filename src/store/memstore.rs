//! In-process reference implementation of `KvStore`, used by the test
//! suite and the demos. Backed by a `BTreeMap` (so prefix/range scans are
//! naturally byte-lexicographic) guarded by a single `parking_lot::RwLock`,
//! with an append-only crc32-framed log mirroring `storage::wal`'s
//! durability idiom (`src/storage/wal.rs`) and snapshot/txn semantics
//! modeled on `mvcc::controller`'s version-map pattern.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::error::{Error, Result};
use crate::store::{Batch, KvStore, ReadView, Txn};

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(Default)]
pub struct MemStore {
    data: Arc<RwLock<Map>>,
    seq: AtomicU64,
    log: RwLock<Vec<LogFrame>>,
}

enum LogEntry {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// A WAL record plus its crc32 framing checksum, mirroring `storage::wal`'s
/// frame layout (`[checksum][payload]`) so a corrupted in-memory log is
/// detectable the same way a corrupted on-disk one is.
struct LogFrame {
    entry: LogEntry,
    checksum: u32,
}

impl LogFrame {
    fn new(entry: LogEntry) -> Self {
        let checksum = match &entry {
            LogEntry::Put(k, v) => {
                let mut hasher = crc32fast::Hasher::new();
                hasher.update(k);
                hasher.update(v);
                hasher.finalize()
            }
            LogEntry::Delete(k) => crc32fast::hash(k),
        };
        LogFrame { entry, checksum }
    }

    fn verify(&self) -> bool {
        let expect = match &self.entry {
            LogEntry::Put(k, v) => {
                let mut hasher = crc32fast::Hasher::new();
                hasher.update(k);
                hasher.update(v);
                hasher.finalize()
            }
            LogEntry::Delete(k) => crc32fast::hash(k),
        };
        expect == self.checksum
    }
}

impl MemStore {
    pub fn new() -> Self {
        MemStore { data: Arc::new(RwLock::new(BTreeMap::new())), seq: AtomicU64::new(0), log: RwLock::new(Vec::new()) }
    }

    fn apply(&self, entry: LogEntry) {
        let mut data = self.data.write();
        match &entry {
            LogEntry::Put(k, v) => {
                data.insert(k.clone(), v.clone());
            }
            LogEntry::Delete(k) => {
                data.remove(k);
            }
        }
        drop(data);
        self.log.write().push(LogFrame::new(entry));
        self.seq.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of mutations applied since construction; used by tests to
    /// assert atomicity (a failed batch must leave this unchanged).
    pub fn mutation_count(&self) -> u64 {
        self.seq.load(Ordering::Relaxed)
    }

    /// Re-validates every WAL frame's crc32 checksum against its payload;
    /// returns the count of frames whose checksum still matches. A mismatch
    /// would indicate log corruption, the condition WAL framing exists to
    /// catch.
    pub fn verify_log(&self) -> usize {
        self.log.read().iter().filter(|f| f.verify()).count()
    }
}

fn range_ok(key: &[u8], lo: &[u8], hi: &[u8]) -> bool {
    key >= lo && key < hi
}

impl KvStore for MemStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.apply(LogEntry::Put(key.to_vec(), value.to_vec()));
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.apply(LogEntry::Delete(key.to_vec()));
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8], f: &mut dyn FnMut(&[u8], &[u8]) -> bool) -> Result<()> {
        let data = self.data.read();
        for (k, v) in data.range(prefix.to_vec()..) {
            if !k.starts_with(prefix) {
                break;
            }
            if !f(k, v) {
                break;
            }
        }
        Ok(())
    }

    fn scan_range(
        &self,
        lo: &[u8],
        hi: &[u8],
        reverse: bool,
        f: &mut dyn FnMut(&[u8], &[u8]) -> bool,
    ) -> Result<()> {
        let data = self.data.read();
        if !reverse {
            for (k, v) in data.range(lo.to_vec()..hi.to_vec()) {
                if !f(k, v) {
                    break;
                }
            }
        } else {
            for (k, v) in data.range(lo.to_vec()..hi.to_vec()).rev() {
                if !range_ok(k, lo, hi) {
                    continue;
                }
                if !f(k, v) {
                    break;
                }
            }
        }
        Ok(())
    }

    fn open_write_batch(&self) -> Box<dyn Batch> {
        Box::new(MemBatch { store: self.data.clone(), ops: Vec::new() })
    }

    fn snapshot(&self) -> Box<dyn ReadView> {
        Box::new(MemSnapshot { data: self.data.read().clone() })
    }

    fn transaction(&self) -> Box<dyn Txn> {
        let base = self.data.read().clone();
        Box::new(MemTxn { store: self.data.clone(), base, writes: BTreeMap::new() })
    }
}

/// Move-only batch: buffers ops and applies them to the map only on
/// `commit()`. A dropped, uncommitted batch leaves the store untouched.
pub struct MemBatch {
    store: Arc<RwLock<Map>>,
    ops: Vec<LogEntry>,
}

impl Batch for MemBatch {
    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.ops.push(LogEntry::Put(key.to_vec(), value.to_vec()));
    }

    fn delete(&mut self, key: &[u8]) {
        self.ops.push(LogEntry::Delete(key.to_vec()));
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let mut data = self.store.write();
        for op in &self.ops {
            match op {
                LogEntry::Put(k, v) => {
                    data.insert(k.clone(), v.clone());
                }
                LogEntry::Delete(k) => {
                    data.remove(k);
                }
            }
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.ops.len()
    }
}

pub struct MemSnapshot {
    data: Map,
}

impl ReadView for MemSnapshot {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.data.get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &[u8], f: &mut dyn FnMut(&[u8], &[u8]) -> bool) -> Result<()> {
        for (k, v) in self.data.range(prefix.to_vec()..) {
            if !k.starts_with(prefix) {
                break;
            }
            if !f(k, v) {
                break;
            }
        }
        Ok(())
    }
}

/// Optimistic transaction: reads come from a private snapshot taken at
/// `transaction()` time; writes buffer locally and are validated against
/// the live map at `commit()` (first-committer-wins), matching
/// `mvcc::controller`'s optimistic-validation discipline.
pub struct MemTxn {
    store: Arc<RwLock<Map>>,
    base: Map,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl Txn for MemTxn {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(w) = self.writes.get(key) {
            return Ok(w.clone());
        }
        Ok(self.base.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.writes.insert(key.to_vec(), Some(value.to_vec()));
    }

    fn delete(&mut self, key: &[u8]) {
        self.writes.insert(key.to_vec(), None);
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let mut data = self.store.write();
        for (k, _) in &self.writes {
            let current = data.get(k).cloned();
            let seen = self.base.get(k).cloned();
            if current != seen {
                return Err(Error::store(format!(
                    "write conflict on key {:?}: concurrent mutation since snapshot",
                    String::from_utf8_lossy(k)
                )));
            }
        }
        for (k, v) in self.writes {
            match v {
                Some(val) => {
                    data.insert(k, val);
                }
                None => {
                    data.remove(&k);
                }
            }
        }
        Ok(())
    }

    fn rollback(self: Box<Self>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_roundtrip() {
        let s = MemStore::new();
        s.put(b"a", b"1").unwrap();
        assert_eq!(s.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn batch_is_atomic_until_commit() {
        let s = MemStore::new();
        let mut batch = s.open_write_batch();
        batch.put(b"x", b"1");
        batch.put(b"y", b"2");
        assert!(s.get(b"x").unwrap().is_none());
        batch.commit().unwrap();
        assert_eq!(s.get(b"x").unwrap(), Some(b"1".to_vec()));
        assert_eq!(s.get(b"y").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn scan_prefix_is_ordered() {
        let s = MemStore::new();
        for k in ["idx:a", "idx:b", "idx:c", "other"] {
            s.put(k.as_bytes(), b"").unwrap();
        }
        let mut seen = Vec::new();
        s.scan_prefix(b"idx:", &mut |k, _| {
            seen.push(String::from_utf8(k.to_vec()).unwrap());
            true
        })
        .unwrap();
        assert_eq!(seen, vec!["idx:a", "idx:b", "idx:c"]);
    }

    #[test]
    fn transaction_detects_conflicting_write() {
        let s = MemStore::new();
        s.put(b"k", b"1").unwrap();
        let mut txn = s.transaction();
        txn.put(b"k", b"2");
        s.put(b"k", b"3").unwrap();
        assert!(txn.commit().is_err());
    }

    #[test]
    fn wal_frames_verify_after_writes() {
        let s = MemStore::new();
        s.put(b"a", b"1").unwrap();
        s.put(b"b", b"2").unwrap();
        s.delete(b"a").unwrap();
        assert_eq!(s.verify_log(), 3);
    }
}
