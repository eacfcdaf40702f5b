//! ALFA File Vault - Legacy Migration
//!
//! Files written by the old pass-through scheme are stored as raw bytes even
//! though their record claims encryption. This pass re-encrypts them under
//! the owner's master key. It runs outside the normal view path, which never
//! reads plaintext objects.

use serde::Serialize;
use zeroize::Zeroizing;

use crate::envelope::is_envelope;
use crate::error::VaultResult;
use crate::session::SessionContext;
use crate::storage::{FileRecord, NewFileRecord};
use crate::vault::FileVault;

/// Outcome of a migration run
#[derive(Debug, Default, Clone, Serialize)]
pub struct MigrationReport {
    /// Records inspected
    pub scanned: usize,
    /// Already in envelope format
    pub already_encrypted: usize,
    /// Re-encrypted by this run
    pub migrated: usize,
    /// Envelope blobs whose record was only missing the encrypted flag
    pub relabelled: usize,
    /// (record id, error) for files left untouched
    pub failures: Vec<(String, String)>,
    /// (object path or record id, error) for leftovers a rollback could not
    /// remove; these need manual cleanup
    pub cleanup_failures: Vec<(String, String)>,
}

impl MigrationReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.cleanup_failures.is_empty()
    }
}

enum Step {
    AlreadyEncrypted,
    Relabelled,
    Migrated,
}

/// Re-encrypt every legacy file of the session owner
pub async fn migrate_legacy_files(vault: &FileVault, session: &SessionContext) -> VaultResult<MigrationReport> {
    session.ensure_active()?;

    let records = vault.storage().list_records(session.user_id()).await?;
    let mut report = MigrationReport {
        scanned: records.len(),
        ..MigrationReport::default()
    };

    for record in records {
        match migrate_one(vault, session, &record, &mut report).await {
            Ok(Step::Migrated) => report.migrated += 1,
            Ok(Step::Relabelled) => report.relabelled += 1,
            Ok(Step::AlreadyEncrypted) => report.already_encrypted += 1,
            Err(e) => {
                log::warn!("Migration of file {} failed: {}", record.id, e);
                report.failures.push((record.id.clone(), e.to_string()));
            }
        }
    }

    log::info!(
        "Legacy migration: {} scanned, {} migrated, {} relabelled, {} failed",
        report.scanned,
        report.migrated,
        report.relabelled,
        report.failures.len()
    );
    Ok(report)
}

async fn migrate_one(
    vault: &FileVault,
    session: &SessionContext,
    record: &FileRecord,
    report: &mut MigrationReport,
) -> VaultResult<Step> {
    let storage = vault.storage();
    let raw = Zeroizing::new(storage.get_object(&record.storage_path).await?);

    if is_envelope(&raw) {
        if record.is_encrypted {
            return Ok(Step::AlreadyEncrypted);
        }
        // Never wrap an envelope in a second one; fix the flag instead
        let replacement = successor(record, record.storage_path.clone(), record.size);
        replace_record(vault, session, record, replacement, None, report).await?;
        return Ok(Step::Relabelled);
    }

    let blob = {
        let key = vault.keys().ensure_key(session.user_id()).await?;
        vault.cipher().encrypt(&raw, &key)?.to_bytes()
    };
    let new_path = storage
        .put_object(session.user_id(), &record.file_name, &blob)
        .await?;

    let replacement = successor(record, new_path.clone(), raw.len() as u64);
    replace_record(vault, session, record, replacement, Some(&new_path), report).await?;

    if let Err(e) = storage.delete_object(&record.storage_path).await {
        log::warn!("Legacy object {} left behind: {}", record.storage_path, e);
        report
            .cleanup_failures
            .push((record.storage_path.clone(), e.to_string()));
    }
    Ok(Step::Migrated)
}

fn successor(record: &FileRecord, storage_path: String, size: u64) -> NewFileRecord {
    NewFileRecord {
        owner_id: record.owner_id.clone(),
        storage_path,
        file_name: record.file_name.clone(),
        mime_type: record.mime_type.clone(),
        size,
        is_encrypted: true,
        created_at: Some(record.created_at),
    }
}

/// Insert `replacement`, then drop `old`. Either both happen or, as far as
/// the store allows, neither: a failed step undoes the earlier ones and
/// anything that cannot be undone lands in `report.cleanup_failures`.
async fn replace_record(
    vault: &FileVault,
    session: &SessionContext,
    old: &FileRecord,
    replacement: NewFileRecord,
    new_object: Option<&str>,
    report: &mut MigrationReport,
) -> VaultResult<()> {
    let storage = vault.storage();

    let inserted = match storage.insert_record(replacement).await {
        Ok(r) => r,
        Err(e) => {
            if let Some(path) = new_object {
                discard_object(vault, path, report).await;
            }
            return Err(e);
        }
    };

    if let Err(e) = storage.delete_record(session.user_id(), &old.id).await {
        match storage.delete_record(session.user_id(), &inserted.id).await {
            Ok(_) => {
                if let Some(path) = new_object {
                    discard_object(vault, path, report).await;
                }
            }
            Err(undo) => {
                log::error!("Duplicate record {} for file {}: {}", inserted.id, old.id, undo);
                report.cleanup_failures.push((inserted.id.clone(), undo.to_string()));
            }
        }
        return Err(e);
    }
    Ok(())
}

async fn discard_object(vault: &FileVault, path: &str, report: &mut MigrationReport) {
    if let Err(e) = vault.storage().delete_object(path).await {
        log::warn!("Rollback could not remove object {}: {}", path, e);
        report.cleanup_failures.push((path.to_string(), e.to_string()));
    }
}
