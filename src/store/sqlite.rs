//! `rusqlite`-backed `Store` — the durable persistence engine (§6: "any
//! concrete layout is acceptable so long as the operations in §4.2 are
//! atomic per row"). Two tables, `documents` and `sync`, one row per
//! `(thing, shadow)`.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::ids::ShadowKey;

use super::{ShadowRecord, Store, SyncRecord};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                thing TEXT NOT NULL,
                shadow TEXT NOT NULL,
                document_bytes BLOB,
                version INTEGER NOT NULL,
                deleted INTEGER NOT NULL,
                update_time INTEGER NOT NULL,
                PRIMARY KEY (thing, shadow)
            );
            CREATE TABLE IF NOT EXISTS sync (
                thing TEXT NOT NULL,
                shadow TEXT NOT NULL,
                last_synced_document BLOB,
                local_version INTEGER NOT NULL,
                cloud_version INTEGER NOT NULL,
                cloud_deleted INTEGER NOT NULL,
                cloud_update_time INTEGER NOT NULL,
                last_sync_time INTEGER NOT NULL,
                PRIMARY KEY (thing, shadow)
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl Store for SqliteStore {
    fn get(&self, thing: &str, shadow: &str) -> Result<Option<ShadowRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                "SELECT document_bytes, version, deleted, update_time FROM documents
                 WHERE thing = ?1 AND shadow = ?2",
                params![thing, shadow],
                |row| {
                    Ok(ShadowRecord {
                        document_bytes: row.get(0)?,
                        version: row.get::<_, i64>(1)? as u64,
                        deleted: row.get::<_, i64>(2)? != 0,
                        update_time: row.get::<_, i64>(3)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn put(
        &self,
        thing: &str,
        shadow: &str,
        document_bytes: Vec<u8>,
        version: u64,
        update_time: u64,
    ) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO documents (thing, shadow, document_bytes, version, deleted, update_time)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)
             ON CONFLICT(thing, shadow) DO UPDATE SET
                document_bytes = excluded.document_bytes,
                version = excluded.version,
                deleted = 0,
                update_time = excluded.update_time",
            params![thing, shadow, document_bytes, version as i64, update_time as i64],
        )?;
        Ok(())
    }

    fn soft_delete(
        &self,
        thing: &str,
        shadow: &str,
        new_version: u64,
        update_time: u64,
    ) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO documents (thing, shadow, document_bytes, version, deleted, update_time)
             VALUES (?1, ?2, NULL, ?3, 1, ?4)
             ON CONFLICT(thing, shadow) DO UPDATE SET
                document_bytes = NULL,
                version = excluded.version,
                deleted = 1,
                update_time = excluded.update_time",
            params![thing, shadow, new_version as i64, update_time as i64],
        )?;
        Ok(())
    }

    fn list_named_shadows(&self, thing: &str, offset: usize, limit: usize) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT shadow FROM documents
             WHERE thing = ?1 AND shadow != '' AND deleted = 0
             ORDER BY shadow
             LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt
            .query_map(params![thing, limit as i64, offset as i64], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(rows)
    }

    fn get_sync(&self, thing: &str, shadow: &str) -> Result<Option<SyncRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                "SELECT last_synced_document, local_version, cloud_version, cloud_deleted,
                        cloud_update_time, last_sync_time
                 FROM sync WHERE thing = ?1 AND shadow = ?2",
                params![thing, shadow],
                |row| {
                    Ok(SyncRecord {
                        thing: thing.to_string(),
                        shadow: shadow.to_string(),
                        last_synced_document: row.get(0)?,
                        local_version: row.get::<_, i64>(1)? as u64,
                        cloud_version: row.get::<_, i64>(2)? as u64,
                        cloud_deleted: row.get::<_, i64>(3)? != 0,
                        cloud_update_time: row.get::<_, i64>(4)? as u64,
                        last_sync_time: row.get::<_, i64>(5)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn put_sync(&self, record: SyncRecord) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO sync (thing, shadow, last_synced_document, local_version, cloud_version,
                                cloud_deleted, cloud_update_time, last_sync_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(thing, shadow) DO UPDATE SET
                last_synced_document = excluded.last_synced_document,
                local_version = excluded.local_version,
                cloud_version = excluded.cloud_version,
                cloud_deleted = excluded.cloud_deleted,
                cloud_update_time = excluded.cloud_update_time,
                last_sync_time = excluded.last_sync_time",
            params![
                record.thing,
                record.shadow,
                record.last_synced_document,
                record.local_version as i64,
                record.cloud_version as i64,
                record.cloud_deleted as i64,
                record.cloud_update_time as i64,
                record.last_sync_time as i64,
            ],
        )?;
        Ok(())
    }

    fn insert_sync_if_absent(&self, record: SyncRecord) -> Result<()> {
        self.conn.lock().execute(
            "INSERT OR IGNORE INTO sync
                (thing, shadow, last_synced_document, local_version, cloud_version,
                 cloud_deleted, cloud_update_time, last_sync_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.thing,
                record.shadow,
                record.last_synced_document,
                record.local_version as i64,
                record.cloud_version as i64,
                record.cloud_deleted as i64,
                record.cloud_update_time as i64,
                record.last_sync_time as i64,
            ],
        )?;
        Ok(())
    }

    fn delete_sync(&self, thing: &str, shadow: &str) -> Result<()> {
        self.conn
            .lock()
            .execute("DELETE FROM sync WHERE thing = ?1 AND shadow = ?2", params![thing, shadow])?;
        Ok(())
    }

    fn list_sync(&self) -> Result<Vec<ShadowKey>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT thing, shadow FROM sync")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<ShadowKey>, _>>()?;
        Ok(rows)
    }
}
