//! SQLite storage for authoritative records. Durable across restarts and
//! cache flushes; the cache is rebuilt from here at startup.
//!
//! Names compare without regard to ASCII case, like the cache keys do.

use crate::error::{DnsError, DnsResult};
use crate::store::{RecordStore, StoredRecord};
use crate::types::{class_name, type_name};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    pub fn open(db_path: &str) -> DnsResult<Self> {
        let conn = Connection::open(db_path)?;
        Self::create_tables(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn in_memory() -> DnsResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::create_tables(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn create_tables(conn: &Connection) -> DnsResult<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL COLLATE NOCASE,
                rr_type INTEGER NOT NULL,
                class INTEGER NOT NULL,
                record TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE (name, rr_type, class)
            )",
            [],
        )?;
        Ok(())
    }
}

fn describe(name: &str, rr_type: u16, class: u16) -> String {
    format!("{} {} {}", name, class_name(class), type_name(rr_type))
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredRecord> {
    Ok(StoredRecord {
        name: row.get(0)?,
        rr_type: row.get(1)?,
        class: row.get(2)?,
        record: row.get(3)?,
    })
}

#[async_trait::async_trait]
impl RecordStore for SqliteRecordStore {
    async fn create(&self, record: &StoredRecord) -> DnsResult<()> {
        let conn = self.conn.lock().await;
        let now = chrono::Utc::now().timestamp();
        conn.execute(
            "INSERT INTO records (name, rr_type, class, record, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![record.name, record.rr_type, record.class, record.record, now],
        )
        .map_err(|e| match DnsError::from(e) {
            DnsError::Conflict(_) => {
                DnsError::Conflict(describe(&record.name, record.rr_type, record.class))
            }
            other => other,
        })?;
        Ok(())
    }

    async fn get(&self, name: &str, rr_type: u16, class: u16) -> DnsResult<StoredRecord> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT name, rr_type, class, record FROM records
             WHERE name = ?1 AND rr_type = ?2 AND class = ?3",
            params![name, rr_type, class],
            row_to_record,
        )
        .optional()?
        .ok_or_else(|| DnsError::NotFound(describe(name, rr_type, class)))
    }

    async fn list(&self) -> DnsResult<Vec<StoredRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT name, rr_type, class, record FROM records ORDER BY id")?;
        let rows = stmt.query_map([], row_to_record)?;
        let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    async fn update(&self, record: &StoredRecord) -> DnsResult<()> {
        let conn = self.conn.lock().await;
        let now = chrono::Utc::now().timestamp();
        let changed = conn.execute(
            "UPDATE records SET record = ?4, updated_at = ?5
             WHERE name = ?1 AND rr_type = ?2 AND class = ?3",
            params![record.name, record.rr_type, record.class, record.record, now],
        )?;
        if changed == 0 {
            return Err(DnsError::NotFound(describe(&record.name, record.rr_type, record.class)));
        }
        Ok(())
    }

    async fn delete(&self, name: &str, rr_type: u16, class: u16) -> DnsResult<()> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "DELETE FROM records WHERE name = ?1 AND rr_type = ?2 AND class = ?3",
            params![name, rr_type, class],
        )?;
        if changed == 0 {
            return Err(DnsError::NotFound(describe(name, rr_type, class)));
        }
        Ok(())
    }
}
