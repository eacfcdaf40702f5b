//! In-memory storage, with a switch to simulate a network outage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{object_path, sort_newest_first, FileRecord, NewFileRecord, StorageService};
use crate::error::{VaultError, VaultResult};

#[derive(Default)]
struct Inner {
    objects: HashMap<String, Vec<u8>>,
    records: Vec<FileRecord>,
    next_sequence: u64,
}

pub struct MemoryStorage {
    inner: Mutex<Inner>,
    online: AtomicBool,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            online: AtomicBool::new(true),
        }
    }

    /// `false` makes every call fail with `StorageUnavailable`
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn object_count(&self) -> usize {
        self.inner.lock().objects.len()
    }

    /// Store raw bytes at a fixed path (seeding legacy data)
    pub fn put_raw(&self, path: &str, bytes: &[u8]) {
        self.inner.lock().objects.insert(path.to_string(), bytes.to_vec());
    }

    fn check_online(&self) -> VaultResult<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(VaultError::StorageUnavailable("network unreachable".into()))
        }
    }
}

#[async_trait]
impl StorageService for MemoryStorage {
    async fn put_object(&self, owner_id: &str, file_name: &str, bytes: &[u8]) -> VaultResult<String> {
        self.check_online()?;
        let path = object_path(owner_id, file_name);
        self.inner.lock().objects.insert(path.clone(), bytes.to_vec());
        Ok(path)
    }

    async fn get_object(&self, path: &str) -> VaultResult<Vec<u8>> {
        self.check_online()?;
        self.inner
            .lock()
            .objects
            .get(path)
            .cloned()
            .ok_or_else(|| VaultError::FileNotFound(path.to_string()))
    }

    async fn delete_object(&self, path: &str) -> VaultResult<bool> {
        self.check_online()?;
        Ok(self.inner.lock().objects.remove(path).is_some())
    }

    async fn list_records(&self, owner_id: &str) -> VaultResult<Vec<FileRecord>> {
        self.check_online()?;
        let mut records: Vec<FileRecord> = self
            .inner
            .lock()
            .records
            .iter()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect();
        sort_newest_first(&mut records);
        Ok(records)
    }

    async fn get_record(&self, id: &str) -> VaultResult<Option<FileRecord>> {
        self.check_online()?;
        Ok(self.inner.lock().records.iter().find(|r| r.id == id).cloned())
    }

    async fn insert_record(&self, record: NewFileRecord) -> VaultResult<FileRecord> {
        self.check_online()?;
        let mut inner = self.inner.lock();
        inner.next_sequence += 1;
        let record = record.into_record(inner.next_sequence);
        inner.records.push(record.clone());
        Ok(record)
    }

    async fn delete_record(&self, owner_id: &str, id: &str) -> VaultResult<bool> {
        self.check_online()?;
        let mut inner = self.inner.lock();
        let before = inner.records.len();
        inner.records.retain(|r| r.id != id || r.owner_id != owner_id);
        Ok(inner.records.len() != before)
    }
}
