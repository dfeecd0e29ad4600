//! Durable write-ahead log for rename transactions.
//!
//! Entries live outside the vault (a per-user configuration directory by
//! default) so that vault sync clients never upload, merge or race with them.
//! One pretty-printed JSON file per transaction, named
//! `{timestamp}-rename-{correlation id}.wal.json`, rewritten in place as the
//! transaction advances and deleted once it succeeds or is fully rolled back.

use crate::error::WalError;
use crate::manifest::{TransactionManifest, TransactionPhase};
use crate::vault::write_file_atomic;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

pub const WAL_SCHEMA_VERSION: &str = "1.0";

/// Entries younger than this are assumed to belong to a transaction that is
/// still running in this process and are left out of [`WalStore::scan_pending`].
pub const PENDING_QUIESCENCE: Duration = Duration::from_secs(60);

const WAL_SUFFIX: &str = ".wal.json";
const README_NAME: &str = "README.md";

const README: &str = "# Rename write-ahead log

Each `*.wal.json` file in this directory records one note rename that has not
finished. Files are written by the notes assistant before it touches the vault
and removed as soon as the rename commits or is rolled back cleanly.

## Format

JSON, schema version `1.0`:

- `correlationId`: UUID v4 naming the transaction
- `timestamp`: when the transaction started (UTC)
- `vaultPath`: absolute path of the vault being modified
- `phase`: last phase reached (`prepare`, `validate`, `commit`, `abort`)
- `manifest.noteRename`: origin (`from`), destination (`to`), content hash,
  staged copy (`stagedPath`) and whether the rename was committed
- `manifest.linkUpdates`: every document whose links were being rewritten,
  with its original content hash, staged copy and commit flag
- `pid`: process that wrote the entry

## Recovery

A file older than a minute whose process is gone marks an interrupted rename.

1. Open the vault at `vaultPath`.
2. If `noteRename.completed` is false, the original note is untouched; delete
   its `stagedPath` if present. If it is true, the note already lives at `to`.
3. For each link update with `completed` false, delete its `stagedPath`; the
   document still has its original content. Entries with `completed` true were
   already rewritten to point at the new name.
4. Compare documents against the recorded hashes (SHA-256) to spot edits made
   after the rename was planned.
5. Delete the `.wal.json` file once the vault is consistent.
";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalOperation {
    RenameNote,
}

/// One persisted transaction snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalEntry {
    pub version: String,
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
    pub vault_path: PathBuf,
    pub phase: TransactionPhase,
    pub operation: WalOperation,
    pub manifest: TransactionManifest,
    pub pid: u32,
}

impl WalEntry {
    pub fn new(
        correlation_id: &str,
        timestamp: DateTime<Utc>,
        vault_path: &Path,
        phase: TransactionPhase,
        manifest: TransactionManifest,
    ) -> Self {
        Self {
            version: WAL_SCHEMA_VERSION.to_string(),
            correlation_id: correlation_id.to_string(),
            timestamp,
            vault_path: vault_path.to_path_buf(),
            phase,
            operation: WalOperation::RenameNote,
            manifest,
            pid: std::process::id(),
        }
    }

    pub fn age(&self) -> Duration {
        (Utc::now() - self.timestamp).to_std().unwrap_or_default()
    }
}

/// A log entry found on disk by [`WalStore::scan_pending`].
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub path: PathBuf,
    pub entry: WalEntry,
}

/// Directory of write-ahead log entries.
#[derive(Debug, Clone)]
pub struct WalStore {
    dir: PathBuf,
}

impl WalStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<config dir>/notes-vault/wal`, e.g. `~/.config/notes-vault/wal` on Linux.
    pub fn default_dir() -> Result<PathBuf, WalError> {
        dirs::config_dir()
            .map(|dir| dir.join("notes-vault").join("wal"))
            .ok_or(WalError::NoConfigDir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File location for an entry. Pure; touches nothing on disk.
    pub fn resolve_path(&self, entry: &WalEntry) -> PathBuf {
        let stamp = entry
            .timestamp
            .to_rfc3339_opts(SecondsFormat::Millis, true)
            .replace([':', '.'], "-");
        self.dir.join(format!(
            "{}-rename-{}{}",
            stamp, entry.correlation_id, WAL_SUFFIX
        ))
    }

    /// Persist an entry (creating or replacing its file) and return where it went.
    pub fn write(&self, entry: &WalEntry) -> Result<PathBuf, WalError> {
        validate_correlation_id(&entry.correlation_id)?;
        self.ensure_dir()?;

        let path = self.resolve_path(entry);
        let json = serde_json::to_vec_pretty(entry).map_err(|source| WalError::Malformed {
            path: path.clone(),
            source,
        })?;
        write_file_atomic(&path, &json).map_err(|source| WalError::Io {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(
            "Wrote write-ahead log entry {} (phase {})",
            path.display(),
            entry.phase
        );
        Ok(path)
    }

    pub fn read(&self, path: &Path) -> Result<WalEntry, WalError> {
        let raw = fs::read_to_string(path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                WalError::NotFound(path.to_path_buf())
            } else {
                WalError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        let value: serde_json::Value =
            serde_json::from_str(&raw).map_err(|source| WalError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;
        let version = value
            .get("version")
            .and_then(|v| v.as_str())
            .unwrap_or("<missing>");
        if version != WAL_SCHEMA_VERSION {
            return Err(WalError::UnsupportedSchema {
                found: version.to_string(),
                expected: WAL_SCHEMA_VERSION.to_string(),
            });
        }

        serde_json::from_value(value).map_err(|source| WalError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Remove an entry. Missing files are fine.
    pub fn delete(&self, path: &Path) -> Result<(), WalError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(WalError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Entries older than [`PENDING_QUIESCENCE`], oldest first.
    pub fn scan_pending(&self) -> Result<Vec<PendingEntry>, WalError> {
        self.scan_pending_older_than(PENDING_QUIESCENCE)
    }

    /// Entries at least `min_age` old, oldest first. Unparsable files are
    /// logged and skipped.
    pub fn scan_pending_older_than(&self, min_age: Duration) -> Result<Vec<PendingEntry>, WalError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(WalError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut pending = Vec::new();
        for dir_entry in entries {
            let dir_entry = match dir_entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Skipping unreadable entry in {}: {}", self.dir.display(), e);
                    continue;
                }
            };
            let path = dir_entry.path();
            let is_wal = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(WAL_SUFFIX))
                .unwrap_or(false);
            if !is_wal {
                continue;
            }

            match self.read(&path) {
                Ok(entry) if entry.age() >= min_age => pending.push(PendingEntry { path, entry }),
                Ok(_) => {}
                Err(e) => tracing::warn!("Ignoring write-ahead log file {}: {}", path.display(), e),
            }
        }

        pending.sort_by(|a, b| a.entry.timestamp.cmp(&b.entry.timestamp));
        Ok(pending)
    }

    fn ensure_dir(&self) -> Result<(), WalError> {
        fs::create_dir_all(&self.dir).map_err(|source| WalError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let readme = self.dir.join(README_NAME);
        if !readme.exists() {
            write_file_atomic(&readme, README.as_bytes()).map_err(|source| WalError::Io {
                path: readme.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

fn validate_correlation_id(id: &str) -> Result<(), WalError> {
    match Uuid::parse_str(id) {
        Ok(uuid)
            if id.len() == 36
                && uuid.get_version() == Some(uuid::Version::Random)
                && uuid.get_variant() == uuid::Variant::RFC4122 =>
        {
            Ok(())
        }
        _ => Err(WalError::InvalidCorrelationId(id.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::NoteRename;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn entry_at(timestamp: DateTime<Utc>) -> WalEntry {
        let manifest = TransactionManifest::new(
            NoteRename {
                from: "Old.md".into(),
                to: "New.md".into(),
                hash: "abc".into(),
                staged_path: None,
                rewritten_content: None,
                completed: false,
            },
            Vec::new(),
        );
        WalEntry::new(
            &Uuid::new_v4().to_string(),
            timestamp,
            Path::new("/vault"),
            TransactionPhase::Prepare,
            manifest,
        )
    }

    #[test]
    fn resolve_path_replaces_colons_and_dots() {
        let store = WalStore::new("/wal");
        let mut entry = entry_at(Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap());
        entry.correlation_id = "0f3c2a8e-6b1d-4c5e-9a7f-1b2c3d4e5f60".into();
        assert_eq!(
            store.resolve_path(&entry),
            PathBuf::from(
                "/wal/2024-03-05T14-07-09-000Z-rename-0f3c2a8e-6b1d-4c5e-9a7f-1b2c3d4e5f60.wal.json"
            )
        );
    }

    #[test]
    fn write_then_read_returns_same_entry() {
        let dir = TempDir::new().unwrap();
        let store = WalStore::new(dir.path().join("wal"));
        let entry = entry_at(Utc::now());

        let path = store.write(&entry).unwrap();
        assert_eq!(path, store.resolve_path(&entry));
        assert_eq!(store.read(&path).unwrap(), entry);

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"correlationId\""));
        assert!(raw.contains("\"operation\": \"rename_note\""));
    }

    #[test]
    fn first_write_creates_directory_and_readme() {
        let dir = TempDir::new().unwrap();
        let wal_dir = dir.path().join("nested").join("wal");
        let store = WalStore::new(&wal_dir);
        store.write(&entry_at(Utc::now())).unwrap();

        let readme = fs::read_to_string(wal_dir.join(README_NAME)).unwrap();
        assert!(readme.contains("Recovery"));

        // A second write leaves the existing readme alone
        fs::write(wal_dir.join(README_NAME), "edited").unwrap();
        store.write(&entry_at(Utc::now())).unwrap();
        assert_eq!(fs::read_to_string(wal_dir.join(README_NAME)).unwrap(), "edited");
    }

    #[test]
    fn rejects_malformed_correlation_ids() {
        let dir = TempDir::new().unwrap();
        let store = WalStore::new(dir.path());
        for bad in [
            "not-a-uuid",
            "",
            // valid UUID, but version 1
            "6ba7b810-9dad-11d1-80b4-00c04fd430c8",
        ] {
            let mut entry = entry_at(Utc::now());
            entry.correlation_id = bad.to_string();
            let err = store.write(&entry).unwrap_err();
            assert!(matches!(err, WalError::InvalidCorrelationId(_)), "{}", bad);
        }
    }

    #[test]
    fn read_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = WalStore::new(dir.path());
        let err = store.read(&dir.path().join("nope.wal.json")).unwrap_err();
        assert!(matches!(err, WalError::NotFound(_)));
    }

    #[test]
    fn read_rejects_unknown_schema_version() {
        let dir = TempDir::new().unwrap();
        let store = WalStore::new(dir.path());
        let entry = entry_at(Utc::now());
        let path = store.write(&entry).unwrap();

        let mut value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        value["version"] = serde_json::json!("2.0");
        fs::write(&path, value.to_string()).unwrap();

        match store.read(&path).unwrap_err() {
            WalError::UnsupportedSchema { found, expected } => {
                assert_eq!(found, "2.0");
                assert_eq!(expected, "1.0");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = WalStore::new(dir.path());
        let path = store.write(&entry_at(Utc::now())).unwrap();
        store.delete(&path).unwrap();
        assert!(!path.exists());
        store.delete(&path).unwrap();
    }

    #[test]
    fn scan_pending_skips_young_and_corrupt_entries() {
        let dir = TempDir::new().unwrap();
        let store = WalStore::new(dir.path());

        let old = entry_at(Utc::now() - chrono::Duration::minutes(5));
        let older = entry_at(Utc::now() - chrono::Duration::minutes(10));
        let fresh = entry_at(Utc::now());
        store.write(&old).unwrap();
        store.write(&older).unwrap();
        store.write(&fresh).unwrap();
        fs::write(dir.path().join("garbage.wal.json"), "{ not json").unwrap();

        let pending = store.scan_pending().unwrap();
        let ids: Vec<&str> = pending.iter().map(|p| p.entry.correlation_id.as_str()).collect();
        assert_eq!(ids, vec![older.correlation_id.as_str(), old.correlation_id.as_str()]);

        let everything = store.scan_pending_older_than(Duration::ZERO).unwrap();
        assert_eq!(everything.len(), 3);
    }

    #[test]
    fn scan_pending_on_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = WalStore::new(dir.path().join("never-created"));
        assert!(store.scan_pending().unwrap().is_empty());
    }
}
