//! Local storage: encrypted objects on disk through `SecureFs`, metadata
//! records in SQLite.

use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{from_millis, object_path, FileRecord, NewFileRecord, StorageService};
use crate::error::VaultResult;
use crate::secure_fs::SecureFs;

const OBJECTS_DIR: &str = "objects";

pub struct LocalStorage {
    conn: Mutex<Connection>,
    fs: SecureFs,
}

impl LocalStorage {
    /// Open (or create) the store rooted at `root`
    pub fn open(root: &Path) -> VaultResult<Self> {
        std::fs::create_dir_all(root.join("db"))?;
        let conn = Connection::open(root.join("db").join("files.db"))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS files (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                owner_id TEXT NOT NULL,
                storage_path TEXT NOT NULL,
                file_name TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                size INTEGER NOT NULL,
                is_encrypted INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_files_owner ON files(owner_id, created_at);
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            fs: SecureFs::new(root),
        })
    }

    fn fs_path(path: &str) -> String {
        format!("{}/{}", OBJECTS_DIR, path)
    }

    fn row_to_record(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
        let size: i64 = row.get("size")?;
        let seq: i64 = row.get("seq")?;
        Ok(FileRecord {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            storage_path: row.get("storage_path")?,
            file_name: row.get("file_name")?,
            mime_type: row.get("mime_type")?,
            size: size as u64,
            is_encrypted: row.get("is_encrypted")?,
            created_at: from_millis(row.get("created_at")?),
            sequence: seq as u64,
        })
    }
}

#[async_trait]
impl StorageService for LocalStorage {
    async fn put_object(&self, owner_id: &str, file_name: &str, bytes: &[u8]) -> VaultResult<String> {
        let path = object_path(owner_id, file_name);
        self.fs.write_file(&Self::fs_path(&path), bytes)?;
        Ok(path)
    }

    async fn get_object(&self, path: &str) -> VaultResult<Vec<u8>> {
        self.fs.read_file(&Self::fs_path(path))
    }

    async fn delete_object(&self, path: &str) -> VaultResult<bool> {
        self.fs.delete_file(&Self::fs_path(path))
    }

    async fn list_records(&self, owner_id: &str) -> VaultResult<Vec<FileRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM files WHERE owner_id = ?1 ORDER BY created_at DESC, seq DESC",
        )?;
        let rows = stmt.query_map(params![owner_id], Self::row_to_record)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    async fn get_record(&self, id: &str) -> VaultResult<Option<FileRecord>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row("SELECT * FROM files WHERE id = ?1", params![id], Self::row_to_record)
            .optional()?)
    }

    async fn insert_record(&self, record: NewFileRecord) -> VaultResult<FileRecord> {
        let conn = self.conn.lock();
        let mut record = record.into_record(0);

        conn.execute(
            "INSERT INTO files (id, owner_id, storage_path, file_name, mime_type, size, is_encrypted, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.id,
                record.owner_id,
                record.storage_path,
                record.file_name,
                record.mime_type,
                record.size as i64,
                record.is_encrypted,
                record.created_at.timestamp_millis(),
            ],
        )?;
        record.sequence = conn.last_insert_rowid() as u64;

        Ok(record)
    }

    async fn delete_record(&self, owner_id: &str, id: &str) -> VaultResult<bool> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "DELETE FROM files WHERE id = ?1 AND owner_id = ?2",
            params![id, owner_id],
        )?;
        Ok(n > 0)
    }
}
