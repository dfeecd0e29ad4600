//! Undoing a rename transaction that failed part way.
//!
//! Rollback never returns an error: every problem is recorded as a
//! [`RollbackFailure`] so the caller always gets a structured result, and any
//! failure turns into manual recovery instructions.
//!
//! Link updates that were already committed are not restored. Their original
//! content is not kept anywhere, so each one is reported as a failure and the
//! write-ahead log entry is retained for manual repair.

use crate::manifest::TransactionManifest;
use crate::vault::Vault;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackItemKind {
    NoteRename,
    /// Original content of a self-linking note, restored after the move back
    NoteContent,
    LinkUpdate,
}

/// Something rollback dealt with successfully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RolledBackItem {
    pub kind: RollbackItemKind,
    pub path: String,
    /// True when committed content was moved back; false when only an
    /// uncommitted staged copy was discarded.
    pub restored: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackFailure {
    pub kind: RollbackItemKind,
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollbackResult {
    pub success: bool,
    pub rolled_back: Vec<RolledBackItem>,
    pub failures: Vec<RollbackFailure>,
    /// Some items rolled back, some did not
    pub partial_recovery: bool,
    pub manual_recovery_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_instructions: Option<Vec<String>>,
}

impl RollbackResult {
    fn finish(rolled_back: Vec<RolledBackItem>, failures: Vec<RollbackFailure>) -> Self {
        let success = failures.is_empty();
        Self {
            success,
            partial_recovery: !rolled_back.is_empty() && !failures.is_empty(),
            manual_recovery_required: !success,
            rolled_back,
            failures,
            recovery_instructions: None,
        }
    }
}

/// Undo whatever part of `manifest` has happened, updating its completion
/// flags to match what is left on disk.
///
/// `original_origin_content` is the renamed note's content at plan time. It is
/// only needed when the note linked to itself and was committed with rewritten
/// self-links.
pub fn roll_back(
    vault: &Vault,
    manifest: &mut TransactionManifest,
    original_origin_content: Option<&str>,
) -> RollbackResult {
    let mut rolled_back = Vec::new();
    let mut failures = Vec::new();

    let note = &mut manifest.note_rename;
    if note.completed {
        match fs::rename(vault.absolute(&note.to), vault.absolute(&note.from)) {
            Ok(()) => {
                tracing::info!("Rolled back rename: {} restored from {}", note.from, note.to);
                note.completed = false;
                rolled_back.push(RolledBackItem {
                    kind: RollbackItemKind::NoteRename,
                    path: note.from.clone(),
                    restored: true,
                });

                if let (Some(_), Some(original)) = (&note.rewritten_content, original_origin_content) {
                    match vault.write_atomic(&note.from, original) {
                        Ok(()) => rolled_back.push(RolledBackItem {
                            kind: RollbackItemKind::NoteContent,
                            path: note.from.clone(),
                            restored: true,
                        }),
                        Err(e) => {
                            tracing::error!("Could not restore the original content of {}: {}", note.from, e);
                            failures.push(RollbackFailure {
                                kind: RollbackItemKind::NoteContent,
                                path: note.from.clone(),
                                error: format!("could not restore original content: {}", e),
                            });
                        }
                    }
                }
            }
            Err(e) => {
                tracing::error!("Could not move {} back to {}: {}", note.to, note.from, e);
                failures.push(RollbackFailure {
                    kind: RollbackItemKind::NoteRename,
                    path: note.from.clone(),
                    error: format!("could not move {} back: {}", note.to, e),
                });
            }
        }
    } else if let Some(staged) = &note.staged_path {
        match remove_if_exists(&vault.absolute(staged)) {
            Ok(()) => rolled_back.push(RolledBackItem {
                kind: RollbackItemKind::NoteRename,
                path: note.from.clone(),
                restored: false,
            }),
            Err(e) => {
                tracing::error!("Could not remove staged copy {}: {}", staged, e);
                failures.push(RollbackFailure {
                    kind: RollbackItemKind::NoteRename,
                    path: staged.clone(),
                    error: format!("could not remove staged copy: {}", e),
                });
            }
        }
    }

    for update in &manifest.link_updates {
        if update.completed {
            tracing::error!(
                "Link update in {} was already committed and cannot be rolled back",
                update.path
            );
            failures.push(RollbackFailure {
                kind: RollbackItemKind::LinkUpdate,
                path: update.path.clone(),
                error: "rollback not implemented for committed link updates".to_string(),
            });
            continue;
        }
        let Some(staged) = &update.staged_path else {
            continue;
        };
        match remove_if_exists(&vault.absolute(staged)) {
            Ok(()) => rolled_back.push(RolledBackItem {
                kind: RollbackItemKind::LinkUpdate,
                path: update.path.clone(),
                restored: false,
            }),
            Err(e) => {
                tracing::error!("Could not remove staged copy {}: {}", staged, e);
                failures.push(RollbackFailure {
                    kind: RollbackItemKind::LinkUpdate,
                    path: staged.clone(),
                    error: format!("could not remove staged copy: {}", e),
                });
            }
        }
    }

    RollbackResult::finish(rolled_back, failures)
}

pub(crate) fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Ordered, human-readable steps for repairing the vault by hand.
pub fn recovery_instructions(
    correlation_id: &str,
    vault: &Vault,
    manifest: &TransactionManifest,
    failures: &[RollbackFailure],
    wal_path: Option<&Path>,
) -> Vec<String> {
    let old_name = crate::vault::note_name(&manifest.note_rename.from);
    let new_name = crate::vault::note_name(&manifest.note_rename.to);
    let mut steps = Vec::new();

    steps.push(format!(
        "Rename transaction {} could not be fully rolled back ({} -> {}).",
        correlation_id, manifest.note_rename.from, manifest.note_rename.to
    ));
    match wal_path {
        Some(path) => steps.push(format!(
            "The write-ahead log was kept at {}; it lists every file this rename touched and their original SHA-256 hashes.",
            path.display()
        )),
        None => steps.push(
            "No write-ahead log was written for this transaction; the files below are the only ones affected."
                .to_string(),
        ),
    }

    for failure in failures {
        let absolute = vault.absolute(&failure.path);
        let step = match failure.kind {
            RollbackItemKind::NoteRename if manifest.note_rename.completed => format!(
                "Move {} back to {} ({}).",
                vault.absolute(&manifest.note_rename.to).display(),
                vault.absolute(&manifest.note_rename.from).display(),
                failure.error
            ),
            RollbackItemKind::NoteRename => format!(
                "Delete the leftover staged file {} ({}).",
                absolute.display(),
                failure.error
            ),
            RollbackItemKind::NoteContent => format!(
                "{} is back in place but its links to itself still point at [[{}]]; change them back to [[{}]] ({}).",
                absolute.display(),
                new_name,
                old_name,
                failure.error
            ),
            RollbackItemKind::LinkUpdate if failure.path.ends_with(".staged") => format!(
                "Delete the leftover staged file {} ({}).",
                absolute.display(),
                failure.error
            ),
            RollbackItemKind::LinkUpdate => format!(
                "{} already links to [[{}]]; change those links back to [[{}]] or keep the note under its new name.",
                absolute.display(),
                new_name,
                old_name
            ),
        };
        steps.push(step);
    }

    steps.push(
        "Once the vault is consistent again, delete the write-ahead log file so it is no longer reported as pending."
            .to_string(),
    );
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{LinkUpdate, NoteRename};
    use tempfile::TempDir;

    fn setup(files: &[(&str, &str)]) -> (TempDir, Vault) {
        let dir = TempDir::new().unwrap();
        for (path, content) in files {
            fs::write(dir.path().join(path), content).unwrap();
        }
        let vault = Vault::open(dir.path()).unwrap();
        (dir, vault)
    }

    fn manifest(note_completed: bool, link_completed: bool) -> TransactionManifest {
        TransactionManifest::new(
            NoteRename {
                from: "Old.md".into(),
                to: "New.md".into(),
                hash: "h".into(),
                staged_path: Some(".New.md.x.staged".into()),
                rewritten_content: None,
                completed: note_completed,
            },
            vec![LinkUpdate {
                path: "A.md".into(),
                hash: "h".into(),
                content: Some("[[New]]".into()),
                staged_path: Some(".A.md.x.staged".into()),
                reference_count: 1,
                completed: link_completed,
            }],
        )
    }

    #[test]
    fn uncommitted_transaction_discards_staged_files() {
        let (dir, vault) = setup(&[
            ("Old.md", "body"),
            ("A.md", "[[Old]]"),
            (".New.md.x.staged", "body"),
            (".A.md.x.staged", "[[New]]"),
        ]);
        let mut m = manifest(false, false);
        let result = roll_back(&vault, &mut m, None);

        assert!(result.success);
        assert!(!result.manual_recovery_required);
        assert!(!result.partial_recovery);
        assert_eq!(result.rolled_back.len(), 2);
        assert!(result.rolled_back.iter().all(|i| !i.restored));
        assert!(!dir.path().join(".New.md.x.staged").exists());
        assert!(!dir.path().join(".A.md.x.staged").exists());
        assert_eq!(fs::read_to_string(dir.path().join("Old.md")).unwrap(), "body");
    }

    #[test]
    fn committed_note_is_moved_back() {
        let (dir, vault) = setup(&[("New.md", "body"), (".A.md.x.staged", "[[New]]")]);
        let mut m = manifest(true, false);
        let result = roll_back(&vault, &mut m, None);

        assert!(result.success);
        assert!(!m.note_rename.completed);
        assert!(result.rolled_back[0].restored);
        assert_eq!(fs::read_to_string(dir.path().join("Old.md")).unwrap(), "body");
        assert!(!dir.path().join("New.md").exists());
    }

    #[test]
    fn committed_link_update_needs_manual_recovery() {
        let (_dir, vault) = setup(&[("New.md", "body"), ("A.md", "[[New]]")]);
        let mut m = manifest(true, true);
        let mut result = roll_back(&vault, &mut m, None);

        assert!(!result.success);
        assert!(result.partial_recovery);
        assert!(result.manual_recovery_required);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].kind, RollbackItemKind::LinkUpdate);
        assert_eq!(result.failures[0].path, "A.md");
        assert!(result.failures[0].error.contains("not implemented"));

        let wal = Path::new("/tmp/wal/entry.wal.json");
        result.recovery_instructions = Some(recovery_instructions(
            "id-1",
            &vault,
            &m,
            &result.failures,
            Some(wal),
        ));
        let steps = result.recovery_instructions.unwrap();
        assert!(steps[0].contains("id-1"));
        assert!(steps[1].contains("/tmp/wal/entry.wal.json"));
        assert!(steps[2].contains("A.md") && steps[2].contains("[[Old]]"));
        assert!(steps.last().unwrap().contains("delete the write-ahead log"));
    }

    #[test]
    fn missing_destination_is_reported_not_thrown() {
        let (_dir, vault) = setup(&[]);
        let mut m = manifest(true, false);
        let result = roll_back(&vault, &mut m, None);

        assert!(!result.success);
        assert!(result.partial_recovery);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].kind, RollbackItemKind::NoteRename);
        assert!(m.note_rename.completed);
    }

    #[test]
    fn self_linking_note_gets_original_content_back() {
        let (dir, vault) = setup(&[("New.md", "see [[New]]")]);
        let mut m = manifest(true, false);
        m.note_rename.rewritten_content = Some("see [[New]]".into());
        m.link_updates.clear();
        let result = roll_back(&vault, &mut m, Some("see [[Old]]"));

        assert!(result.success);
        assert_eq!(result.rolled_back.len(), 2);
        assert_eq!(result.rolled_back[1].kind, RollbackItemKind::NoteContent);
        assert_eq!(
            fs::read_to_string(dir.path().join("Old.md")).unwrap(),
            "see [[Old]]"
        );
    }

    #[test]
    fn content_restore_failure_gets_its_own_instruction() {
        let (_dir, vault) = setup(&[]);
        let mut m = manifest(false, false);
        m.link_updates.clear();
        let failures = vec![RollbackFailure {
            kind: RollbackItemKind::NoteContent,
            path: "Old.md".into(),
            error: "could not restore original content: disk full".into(),
        }];

        let steps = recovery_instructions("id-3", &vault, &m, &failures, None);
        assert!(steps[2].contains("Old.md"));
        assert!(steps[2].contains("[[New]]") && steps[2].contains("[[Old]]"));
        assert!(steps[2].contains("disk full"));
        assert!(!steps.iter().any(|s| s.starts_with("Move ")));
    }
}
