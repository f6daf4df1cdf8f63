//! In-memory `Store` — a `parking_lot::Mutex`-guarded map, used for tests and
//! for embedding without a disk, mirroring the teacher's `MemoryMapped` wrapper.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::Result;
use crate::ids::{key, ShadowKey};

use super::{ShadowRecord, Store, SyncRecord};

#[derive(Default)]
pub struct InMemoryStore {
    records: Mutex<HashMap<ShadowKey, ShadowRecord>>,
    sync: Mutex<HashMap<ShadowKey, SyncRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for InMemoryStore {
    fn get(&self, thing: &str, shadow: &str) -> Result<Option<ShadowRecord>> {
        Ok(self.records.lock().get(&key(thing, shadow)).cloned())
    }

    fn put(
        &self,
        thing: &str,
        shadow: &str,
        document_bytes: Vec<u8>,
        version: u64,
        update_time: u64,
    ) -> Result<()> {
        self.records.lock().insert(
            key(thing, shadow),
            ShadowRecord {
                document_bytes: Some(document_bytes),
                version,
                deleted: false,
                update_time,
            },
        );
        Ok(())
    }

    fn soft_delete(
        &self,
        thing: &str,
        shadow: &str,
        new_version: u64,
        update_time: u64,
    ) -> Result<()> {
        self.records.lock().insert(
            key(thing, shadow),
            ShadowRecord {
                document_bytes: None,
                version: new_version,
                deleted: true,
                update_time,
            },
        );
        Ok(())
    }

    fn list_named_shadows(&self, thing: &str, offset: usize, limit: usize) -> Result<Vec<String>> {
        let records = self.records.lock();
        let mut names: Vec<String> = records
            .iter()
            .filter(|((t, s), r)| t == thing && !s.is_empty() && !r.deleted)
            .map(|((_, s), _)| s.clone())
            .collect();
        names.sort();
        Ok(names.into_iter().skip(offset).take(limit).collect())
    }

    fn get_sync(&self, thing: &str, shadow: &str) -> Result<Option<SyncRecord>> {
        Ok(self.sync.lock().get(&key(thing, shadow)).cloned())
    }

    fn put_sync(&self, record: SyncRecord) -> Result<()> {
        let k = key(&record.thing, &record.shadow);
        self.sync.lock().insert(k, record);
        Ok(())
    }

    fn insert_sync_if_absent(&self, record: SyncRecord) -> Result<()> {
        let k = key(&record.thing, &record.shadow);
        self.sync.lock().entry(k).or_insert(record);
        Ok(())
    }

    fn delete_sync(&self, thing: &str, shadow: &str) -> Result<()> {
        self.sync.lock().remove(&key(thing, shadow));
        Ok(())
    }

    fn list_sync(&self) -> Result<Vec<ShadowKey>> {
        Ok(self.sync.lock().keys().cloned().collect())
    }
}
