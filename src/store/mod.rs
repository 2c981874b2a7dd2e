//! The underlying LSM key-value store is an external collaborator
//! (`spec.md` §1, §6): the core only ever talks to it through this trait.
//! `memstore` provides the in-process reference implementation used by
//! tests and the demos; a production deployment plugs in a real LSM engine
//! behind the same trait.

pub mod memstore;

use crate::core::error::Result;

pub use memstore::MemStore;

/// `get/put/delete/scan_prefix/scan_range/open_write_batch/snapshot/transaction`
/// per `spec.md` §6. Implementations must give scans byte-lexicographic
/// ordering since every index relies on it (`spec.md` §3).
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Visits every `(key, value)` with the given prefix in ascending key
    /// order. The callback returns `false` to stop early.
    fn scan_prefix(&self, prefix: &[u8], f: &mut dyn FnMut(&[u8], &[u8]) -> bool) -> Result<()>;

    /// Visits keys in `[lo, hi)` (or `(lo, hi]` reversed) order; `reverse`
    /// flips iteration direction without changing the bound semantics.
    fn scan_range(
        &self,
        lo: &[u8],
        hi: &[u8],
        reverse: bool,
        f: &mut dyn FnMut(&[u8], &[u8]) -> bool,
    ) -> Result<()>;

    fn open_write_batch(&self) -> Box<dyn Batch>;

    fn snapshot(&self) -> Box<dyn ReadView>;

    fn transaction(&self) -> Box<dyn Txn>;
}

/// Move-only, scoped write batch: writes are invisible until `commit()` is
/// called, and dropping without committing discards them
/// (`spec.md` §9, "Scoped writers").
pub trait Batch: Send {
    fn put(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
    fn commit(self: Box<Self>) -> Result<()>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Point-in-time read view (`spec.md` §6).
pub trait ReadView: Send {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn scan_prefix(&self, prefix: &[u8], f: &mut dyn FnMut(&[u8], &[u8]) -> bool) -> Result<()>;
}

/// MVCC-style transaction used by optimistic variants of index ops
/// (`spec.md` §6).
pub trait Txn: Send {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn put(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
    fn commit(self: Box<Self>) -> Result<()>;
    fn rollback(self: Box<Self>);
}
