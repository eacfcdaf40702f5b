//! ALFA File Vault - Storage Collaborator
//!
//! Object bytes plus plaintext metadata records. Only ciphertext ever goes
//! through `put_object`.

pub mod local;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::VaultResult;

pub use local::LocalStorage;
pub use memory::MemoryStorage;

/// File metadata record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub owner_id: String,
    pub storage_path: String,
    pub file_name: String,
    pub mime_type: String,
    /// Plaintext size in bytes
    pub size: u64,
    pub is_encrypted: bool,
    pub created_at: DateTime<Utc>,
    /// Insertion order, breaks ties between equal timestamps
    pub sequence: u64,
}

/// Record to insert; id and sequence are assigned by the store
#[derive(Debug, Clone)]
pub struct NewFileRecord {
    pub owner_id: String,
    pub storage_path: String,
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
    pub is_encrypted: bool,
    /// Defaults to now; migration keeps the original upload time
    pub created_at: Option<DateTime<Utc>>,
}

impl NewFileRecord {
    pub(crate) fn into_record(self, sequence: u64) -> FileRecord {
        FileRecord {
            id: Uuid::new_v4().to_string(),
            owner_id: self.owner_id,
            storage_path: self.storage_path,
            file_name: self.file_name,
            mime_type: self.mime_type,
            size: self.size,
            is_encrypted: self.is_encrypted,
            created_at: truncate_millis(self.created_at.unwrap_or_else(Utc::now)),
            sequence,
        }
    }
}

/// Storage service collaborator
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Store object bytes for an owner, returns the storage path
    async fn put_object(&self, owner_id: &str, file_name: &str, bytes: &[u8]) -> VaultResult<String>;

    /// Fetch object bytes (`FileNotFound` if missing)
    async fn get_object(&self, path: &str) -> VaultResult<Vec<u8>>;

    /// Remove an object, returns whether it existed
    async fn delete_object(&self, path: &str) -> VaultResult<bool>;

    /// Owner's records, newest first
    async fn list_records(&self, owner_id: &str) -> VaultResult<Vec<FileRecord>>;

    /// Record by id
    async fn get_record(&self, id: &str) -> VaultResult<Option<FileRecord>>;

    async fn insert_record(&self, record: NewFileRecord) -> VaultResult<FileRecord>;

    /// Remove a record, only if it belongs to `owner_id`
    async fn delete_record(&self, owner_id: &str, id: &str) -> VaultResult<bool>;
}

/// Storage path for a new object: `{owner}/{millis}_{uuid}_{name}`
pub fn object_path(owner_id: &str, file_name: &str) -> String {
    format!(
        "{}/{}_{}_{}",
        sanitize(owner_id),
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple(),
        sanitize(file_name)
    )
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    match cleaned.trim_matches('.') {
        "" => "file".to_string(),
        s => s.to_string(),
    }
}

/// Records are kept at millisecond precision
pub(crate) fn truncate_millis(t: DateTime<Utc>) -> DateTime<Utc> {
    from_millis(t.timestamp_millis())
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

/// Newest first, then by insertion order
pub(crate) fn sort_newest_first(records: &mut [FileRecord]) {
    records.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.sequence.cmp(&a.sequence))
    });
}
