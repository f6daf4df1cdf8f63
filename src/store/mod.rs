//! C2 — the store: per-`(thing, shadow)` shadow records and sync records.
//!
//! `Store` is the persistence seam (§1 leaves the concrete engine to the
//! implementer). Two implementations are provided: [`memory::InMemoryStore`]
//! for tests and embedded use, and [`sqlite::SqliteStore`] for durable
//! on-disk storage, mirroring the teacher's `StorageBackend` split between an
//! in-memory wrapper and a SQLite-backed implementation.

pub mod memory;
pub mod sqlite;

use crate::error::Result;
use crate::ids::ShadowKey;

/// A stored shadow: serialized document bytes plus the bookkeeping §3 requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowRecord {
    /// Serialized `ShadowDocument` bytes. `None` when `deleted` (a tombstone).
    pub document_bytes: Option<Vec<u8>>,
    pub version: u64,
    pub deleted: bool,
    pub update_time: u64,
}

impl ShadowRecord {
    pub fn is_tombstone(&self) -> bool {
        self.deleted
    }
}

/// The parallel sync bookkeeping record (§3) — last-synced base document,
/// local/cloud version tracking, and the cloud tombstone flag.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncRecord {
    pub thing: String,
    pub shadow: String,
    /// Serialized `ShadowDocument` bytes of the last document both sides agreed on.
    pub last_synced_document: Option<Vec<u8>>,
    pub local_version: u64,
    pub cloud_version: u64,
    pub cloud_deleted: bool,
    pub cloud_update_time: u64,
    pub last_sync_time: u64,
}

impl SyncRecord {
    pub fn new(thing: impl Into<String>, shadow: impl Into<String>) -> Self {
        Self {
            thing: thing.into(),
            shadow: shadow.into(),
            ..Default::default()
        }
    }
}

/// The persistence seam (§4.2). Every operation is single-shadow transactional;
/// cross-shadow atomicity is not required. Implementations must serialize
/// `put`/`soft_delete` against concurrent reads of the same row (§4.4's `Get`
/// relies on this rather than taking the write-gate lock for reads).
pub trait Store: Send + Sync {
    fn get(&self, thing: &str, shadow: &str) -> Result<Option<ShadowRecord>>;
    fn put(
        &self,
        thing: &str,
        shadow: &str,
        document_bytes: Vec<u8>,
        version: u64,
        update_time: u64,
    ) -> Result<()>;
    fn soft_delete(
        &self,
        thing: &str,
        shadow: &str,
        new_version: u64,
        update_time: u64,
    ) -> Result<()>;
    fn list_named_shadows(&self, thing: &str, offset: usize, limit: usize) -> Result<Vec<String>>;

    fn get_sync(&self, thing: &str, shadow: &str) -> Result<Option<SyncRecord>>;
    fn put_sync(&self, record: SyncRecord) -> Result<()>;
    /// Insert only if absent; a no-op (not an overwrite) when a record already exists.
    fn insert_sync_if_absent(&self, record: SyncRecord) -> Result<()>;
    fn delete_sync(&self, thing: &str, shadow: &str) -> Result<()>;
    fn list_sync(&self) -> Result<Vec<ShadowKey>>;
}

#[cfg(test)]
/// Shared conformance suite run against every `Store` implementation.
pub(crate) mod conformance {
    use super::*;

    pub fn monotonic_versions_across_delete_and_recreate(store: &dyn Store) {
        store.put("t1", "", b"{}".to_vec(), 1, 1).unwrap();
        assert_eq!(store.get("t1", "").unwrap().unwrap().version, 1);

        store.soft_delete("t1", "", 2, 2).unwrap();
        let tombstone = store.get("t1", "").unwrap().unwrap();
        assert!(tombstone.is_tombstone());
        assert_eq!(tombstone.version, 2);

        store.put("t1", "", b"{}".to_vec(), 3, 3).unwrap();
        let recreated = store.get("t1", "").unwrap().unwrap();
        assert!(!recreated.is_tombstone());
        assert_eq!(recreated.version, 3);
    }

    pub fn list_named_shadows_excludes_classic_and_tombstones(store: &dyn Store) {
        store.put("t1", "", b"{}".to_vec(), 1, 1).unwrap();
        store.put("t1", "config", b"{}".to_vec(), 1, 1).unwrap();
        store.put("t1", "telemetry", b"{}".to_vec(), 1, 1).unwrap();
        store.soft_delete("t1", "telemetry", 2, 2).unwrap();

        let mut names = store.list_named_shadows("t1", 0, 10).unwrap();
        names.sort();
        assert_eq!(names, vec!["config".to_string()]);
    }

    pub fn sync_record_round_trip(store: &dyn Store) {
        assert!(store.get_sync("t1", "").unwrap().is_none());

        let mut rec = SyncRecord::new("t1", "");
        rec.local_version = 1;
        store.insert_sync_if_absent(rec.clone()).unwrap();

        // insert_sync_if_absent must not overwrite an existing record.
        let mut other = rec.clone();
        other.local_version = 99;
        store.insert_sync_if_absent(other).unwrap();
        assert_eq!(store.get_sync("t1", "").unwrap().unwrap().local_version, 1);

        rec.local_version = 2;
        store.put_sync(rec.clone()).unwrap();
        assert_eq!(store.get_sync("t1", "").unwrap().unwrap().local_version, 2);

        assert_eq!(store.list_sync().unwrap(), vec![("t1".to_string(), "".to_string())]);

        store.delete_sync("t1", "").unwrap();
        assert!(store.get_sync("t1", "").unwrap().is_none());
    }
}
