//! Renaming a note together with every link that points at it.
//!
//! A rename runs through five phases:
//!
//! 1. **plan** resolves both paths, renders the link rewrites in memory and
//!    hashes every file it is about to replace.
//! 2. **prepare** writes hidden `*.staged` copies next to their final
//!    locations and records the manifest in the write-ahead log.
//! 3. **validate** re-hashes the originals. Anything edited since plan aborts
//!    the rename.
//! 4. **commit** renames each staged copy over its target.
//! 5. **success** removes leftovers and the log entry, or **abort** rolls back
//!    and keeps the log entry when rollback was incomplete.
//!
//! One coordinator per vault. Nothing here locks against a second coordinator
//! or process working on the same files.

use crate::error::{ErrorKind, TransactionError, WalError};
use crate::link_rewriter::LinkRewriter;
use crate::manifest::{LinkUpdate, NoteRename, TransactionManifest, TransactionPhase};
use crate::rollback::{recovery_instructions, remove_if_exists, roll_back, RollbackResult};
use crate::vault::{content_hash, note_name, Vault};
use crate::wal::{WalEntry, WalStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use uuid::Uuid;

/// Everything one `execute` call knows about its rename.
#[derive(Debug, Clone)]
pub struct TransactionState {
    pub correlation_id: String,
    pub phase: TransactionPhase,
    pub started_at: DateTime<Utc>,
    pub vault_root: PathBuf,
    pub manifest: TransactionManifest,
    pub wal_path: Option<PathBuf>,
    pub update_references: bool,
    origin: String,
    destination: String,
    /// Origin content as read during plan, kept for rollback of self-links
    origin_content: Option<String>,
    self_references: usize,
    ambiguous_skipped: usize,
    /// Folders prepare created for the destination, deepest first
    created_dirs: Vec<PathBuf>,
}

impl TransactionState {
    fn new(vault_root: &Path, origin: &str, destination: &str, update_references: bool) -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            phase: TransactionPhase::Plan,
            started_at: Utc::now(),
            vault_root: vault_root.to_path_buf(),
            manifest: TransactionManifest::new(
                NoteRename {
                    from: origin.to_string(),
                    to: destination.to_string(),
                    hash: String::new(),
                    staged_path: None,
                    rewritten_content: None,
                    completed: false,
                },
                Vec::new(),
            ),
            wal_path: None,
            update_references,
            origin: origin.to_string(),
            destination: destination.to_string(),
            origin_content: None,
            self_references: 0,
            ambiguous_skipped: 0,
            created_dirs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenameOutcome {
    pub from: String,
    pub to: String,
    pub completed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReferenceUpdateSummary {
    pub files_updated: usize,
    pub references_updated: usize,
    /// Links by base name left unchanged because another note shares it
    pub ambiguous_skipped: usize,
}

/// Wall-clock milliseconds spent in each phase that ran.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PhaseMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prepare_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validate_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_ms: Option<u64>,
    pub total_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionFailure {
    pub kind: ErrorKind,
    /// Phase that failed
    pub phase: TransactionPhase,
    pub message: String,
}

/// What the caller gets back from [`TransactionCoordinator::execute`].
#[derive(Debug, Clone, Serialize)]
pub struct TransactionResult {
    pub success: bool,
    pub correlation_id: String,
    /// Final phase reached: `success` or `abort`
    pub phase: TransactionPhase,
    pub rename: RenameOutcome,
    /// Present on success when references were updated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_updates: Option<ReferenceUpdateSummary>,
    /// Present on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TransactionFailure>,
    /// Write-ahead log entry kept for manual recovery
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wal_path: Option<PathBuf>,
    pub metrics: PhaseMetrics,
}

pub struct TransactionCoordinator {
    vault: Arc<Vault>,
    wal: WalStore,
}

impl TransactionCoordinator {
    pub fn new(vault: Arc<Vault>, wal: WalStore) -> Self {
        Self { vault, wal }
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn wal(&self) -> &WalStore {
        &self.wal
    }

    /// Rename `origin` to `destination`, rewriting links to it across the
    /// vault when `update_references` is set. Never panics or returns early:
    /// every failure is rolled back and described in the result.
    pub fn execute(&self, origin: &str, destination: &str, update_references: bool) -> TransactionResult {
        let started = Instant::now();
        let mut metrics = PhaseMetrics::default();
        let mut state = TransactionState::new(self.vault.root(), origin, destination, update_references);
        tracing::info!(
            "Rename {} started: {} -> {} (update links: {})",
            state.correlation_id,
            origin,
            destination,
            update_references
        );

        let outcome = self.run_phases(&mut state, &mut metrics);

        let mut result = match outcome {
            Ok(()) => {
                let cleanup = Instant::now();
                self.finish_success(&mut state);
                metrics.cleanup_ms = Some(millis(cleanup.elapsed()));
                self.success_result(&state)
            }
            Err(err) => {
                let failed_phase = state.phase;
                tracing::warn!(
                    "Rename {} failed during {}: {}",
                    state.correlation_id,
                    failed_phase,
                    err
                );
                let rollback_started = Instant::now();
                let rollback = self.abort(&mut state);
                metrics.rollback_ms = Some(millis(rollback_started.elapsed()));
                self.failure_result(&state, failed_phase, &err, rollback)
            }
        };

        metrics.total_ms = millis(started.elapsed());
        result.metrics = metrics;
        tracing::info!(
            "Rename {} finished in {} ms (phase {})",
            result.correlation_id,
            result.metrics.total_ms,
            result.phase
        );
        result
    }

    fn run_phases(&self, state: &mut TransactionState, metrics: &mut PhaseMetrics) -> Result<(), TransactionError> {
        state.phase = TransactionPhase::Plan;
        timed(&mut metrics.plan_ms, || self.plan(state))?;

        state.phase = TransactionPhase::Prepare;
        timed(&mut metrics.prepare_ms, || self.prepare(state))?;

        state.phase = TransactionPhase::Validate;
        timed(&mut metrics.validate_ms, || self.validate(state))?;

        state.phase = TransactionPhase::Commit;
        timed(&mut metrics.commit_ms, || self.commit(state))?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Phases
    // ---------------------------------------------------------------------

    fn plan(&self, state: &mut TransactionState) -> Result<(), TransactionError> {
        // Documents may have appeared since the last listing.
        self.vault.invalidate_cache();

        let from = self.vault.resolve(&state.origin)?;
        let to = self.vault.resolve(&state.destination)?;
        if from == to {
            return Err(TransactionError::PlanFailed(format!(
                "{} is already at that path",
                from
            )));
        }
        if !self.vault.exists(&from) {
            return Err(TransactionError::NotFound(from));
        }
        if self.vault.absolute(&to).exists() {
            return Err(TransactionError::AlreadyExists(to));
        }

        let content = self
            .vault
            .read(&from)
            .map_err(|e| TransactionError::from_io(&from, &e, TransactionError::PlanFailed))?;
        let hash = content_hash(&content);

        let mut note = NoteRename {
            from: from.clone(),
            to: to.clone(),
            hash: hash.clone(),
            staged_path: None,
            rewritten_content: None,
            completed: false,
        };
        let mut link_updates = Vec::new();

        if state.update_references {
            let mut rendered = LinkRewriter::new(&self.vault)
                .render(&note_name(&from), &note_name(&to))
                .map_err(|e| TransactionError::PlanFailed(e.to_string()))?;
            state.ambiguous_skipped = rendered.ambiguous_skipped;

            for path in std::mem::take(&mut rendered.affected_paths) {
                let (Some(rewritten), Some(source_hash)) = (
                    rendered.contents.remove(&path),
                    rendered.source_hashes.remove(&path),
                ) else {
                    continue;
                };
                let reference_count = rendered.reference_counts.get(&path).copied().unwrap_or(0);

                if path == from {
                    // The note links to itself; its staged copy carries the rewrite.
                    if source_hash != hash {
                        return Err(TransactionError::StaleContent { paths: vec![from] });
                    }
                    note.rewritten_content = Some(rewritten);
                    state.self_references = reference_count;
                    continue;
                }

                link_updates.push(LinkUpdate {
                    path,
                    hash: source_hash,
                    content: Some(rewritten),
                    staged_path: None,
                    reference_count,
                    completed: false,
                });
            }
        }

        state.manifest = TransactionManifest::new(note, link_updates);
        state.origin_content = Some(content);
        tracing::info!(
            "Rename {} planned: {} operations, {} references",
            state.correlation_id,
            state.manifest.total_operations,
            state.manifest.reference_count() + state.self_references
        );
        Ok(())
    }

    fn prepare(&self, state: &mut TransactionState) -> Result<(), TransactionError> {
        // Guards delete their file on drop, so an early return below leaves
        // nothing staged behind.
        let mut guards: Vec<NamedTempFile> = Vec::new();

        let from = state.manifest.note_rename.from.clone();
        let to = state.manifest.note_rename.to.clone();
        let destination = self.vault.absolute(&to);
        if let Some(parent) = destination.parent() {
            state.created_dirs = missing_dirs(parent, self.vault.root());
            fs::create_dir_all(parent).map_err(|e| prepare_failed(&to, &e))?;
        }

        let body = match (&state.manifest.note_rename.rewritten_content, &state.origin_content) {
            (Some(rewritten), _) => rewritten.clone(),
            (None, Some(original)) => original.clone(),
            (None, None) => {
                return Err(TransactionError::PrepareFailed(format!(
                    "no content captured for {}",
                    from
                )))
            }
        };
        let staged = self.stage(&to, &from, &body, &state.correlation_id)?;
        state.manifest.note_rename.staged_path = Some(self.staged_name(&staged)?);
        guards.push(staged);

        for update in &mut state.manifest.link_updates {
            let content = update.content.as_deref().ok_or_else(|| {
                TransactionError::PrepareFailed(format!("no rewritten content for {}", update.path))
            })?;
            let staged = self.stage(&update.path, &update.path, content, &state.correlation_id)?;
            update.staged_path = Some(self.staged_name(&staged)?);
            guards.push(staged);
        }

        let wal_path = self
            .persist(state, TransactionPhase::Prepare)
            .map_err(|e| TransactionError::PrepareFailed(e.to_string()))?;

        // The log now lists every staged file, so they may outlive this call.
        for guard in guards {
            guard
                .keep()
                .map_err(|e| TransactionError::PrepareFailed(e.to_string()))?;
        }

        tracing::info!(
            "Rename {} prepared: {} files staged, log at {}",
            state.correlation_id,
            state.manifest.staged_paths().len(),
            wal_path.display()
        );
        Ok(())
    }

    fn validate(&self, state: &mut TransactionState) -> Result<(), TransactionError> {
        let mut stale = Vec::new();

        let note = &state.manifest.note_rename;
        match self.vault.read(&note.from) {
            Ok(content) if content_hash(&content) != note.hash => stale.push(note.from.clone()),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(TransactionError::VerifyFailed(format!(
                    "{} no longer exists",
                    note.from
                )))
            }
            Err(e) => return Err(TransactionError::from_io(&note.from, &e, TransactionError::VerifyFailed)),
        }
        if self.vault.absolute(&note.to).exists() {
            return Err(TransactionError::VerifyFailed(format!(
                "{} was created after the rename was planned",
                note.to
            )));
        }

        let mut vanished = Vec::new();
        for update in &state.manifest.link_updates {
            match self.vault.read(&update.path) {
                Ok(content) if content_hash(&content) != update.hash => stale.push(update.path.clone()),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => vanished.push(update.path.clone()),
                Err(e) => {
                    return Err(TransactionError::from_io(&update.path, &e, TransactionError::VerifyFailed))
                }
            }
        }

        if !stale.is_empty() {
            return Err(TransactionError::StaleContent { paths: stale });
        }

        if !vanished.is_empty() {
            for update in state.manifest.link_updates.iter().filter(|u| vanished.contains(&u.path)) {
                tracing::warn!(
                    "Rename {}: {} was deleted after planning; its links are no longer updated",
                    state.correlation_id,
                    update.path
                );
                if let Some(staged) = &update.staged_path {
                    if let Err(e) = remove_if_exists(&self.vault.absolute(staged)) {
                        tracing::warn!("Could not remove staged copy {}: {}", staged, e);
                    }
                }
            }
            let note = state.manifest.note_rename.clone();
            let kept = std::mem::take(&mut state.manifest.link_updates)
                .into_iter()
                .filter(|u| !vanished.contains(&u.path))
                .collect();
            state.manifest = TransactionManifest::new(note, kept);
        }

        self.persist(state, TransactionPhase::Validate)
            .map_err(|e| TransactionError::VerifyFailed(e.to_string()))?;
        tracing::info!("Rename {} validated", state.correlation_id);
        Ok(())
    }

    fn commit(&self, state: &mut TransactionState) -> Result<(), TransactionError> {
        self.persist(state, TransactionPhase::Commit)
            .map_err(|e| TransactionError::CommitFailed(e.to_string()))?;

        let note = &mut state.manifest.note_rename;
        let staged = note
            .staged_path
            .clone()
            .ok_or_else(|| TransactionError::CommitFailed(format!("{} was never staged", note.from)))?;
        if let Err(e) = fs::rename(self.vault.absolute(&staged), self.vault.absolute(&note.to)) {
            // Nothing has moved yet; leave the links alone.
            return Err(TransactionError::CommitFailed(format!(
                "moving {} into place: {}",
                note.to, e
            )));
        }
        note.completed = true;

        let mut failures = Vec::new();
        if let Err(e) = fs::remove_file(self.vault.absolute(&note.from)) {
            failures.push(format!("removing {}: {}", note.from, e));
        }

        for update in &mut state.manifest.link_updates {
            let Some(staged) = &update.staged_path else {
                failures.push(format!("{} was never staged", update.path));
                continue;
            };
            match fs::rename(self.vault.absolute(staged), self.vault.absolute(&update.path)) {
                Ok(()) => {
                    update.completed = true;
                    tracing::debug!("Committed link update to {}", update.path);
                }
                Err(e) => {
                    tracing::error!("Could not commit link update to {}: {}", update.path, e);
                    failures.push(format!("updating {}: {}", update.path, e));
                }
            }
        }
        self.vault.invalidate_cache();

        if let Err(e) = self.persist(state, TransactionPhase::Commit) {
            tracing::warn!(
                "Rename {}: could not record commit progress: {}",
                state.correlation_id,
                e
            );
        }

        if !failures.is_empty() {
            return Err(TransactionError::CommitFailed(failures.join("; ")));
        }
        tracing::info!(
            "Rename {} committed: {} operations",
            state.correlation_id,
            state.manifest.completed_operations()
        );
        Ok(())
    }

    /// Best-effort cleanup after a successful commit. Failures are logged only.
    fn finish_success(&self, state: &mut TransactionState) {
        state.phase = TransactionPhase::Success;
        for staged in state.manifest.staged_paths() {
            if let Err(e) = remove_if_exists(&self.vault.absolute(staged)) {
                tracing::warn!("Could not remove leftover staged file {}: {}", staged, e);
            }
        }
        if let Some(path) = state.wal_path.take() {
            if let Err(e) = self.wal.delete(&path) {
                tracing::warn!("Could not delete write-ahead log entry {}: {}", path.display(), e);
            }
        }
        self.vault.invalidate_cache();
    }

    fn abort(&self, state: &mut TransactionState) -> RollbackResult {
        state.phase = TransactionPhase::Abort;
        let mut rollback = roll_back(&self.vault, &mut state.manifest, state.origin_content.as_deref());
        if !state.manifest.note_rename.completed {
            self.remove_created_dirs(state);
        }
        self.vault.invalidate_cache();

        if rollback.success {
            if let Some(path) = state.wal_path.take() {
                if let Err(e) = self.wal.delete(&path) {
                    tracing::warn!("Could not delete write-ahead log entry {}: {}", path.display(), e);
                }
            }
            tracing::info!("Rename {} rolled back", state.correlation_id);
            return rollback;
        }

        if state.wal_path.is_some() {
            if let Err(e) = self.persist(state, TransactionPhase::Abort) {
                tracing::error!(
                    "Rename {}: could not record abort in the write-ahead log: {}",
                    state.correlation_id,
                    e
                );
            }
        }
        tracing::error!(
            "Rename {} needs manual recovery: {} items could not be rolled back",
            state.correlation_id,
            rollback.failures.len()
        );
        rollback.recovery_instructions = Some(recovery_instructions(
            &state.correlation_id,
            &self.vault,
            &state.manifest,
            &rollback.failures,
            state.wal_path.as_deref(),
        ));
        rollback
    }

    // ---------------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------------

    /// Remove the destination folders prepare created, stopping at the first
    /// one that is no longer empty.
    fn remove_created_dirs(&self, state: &mut TransactionState) {
        for dir in std::mem::take(&mut state.created_dirs) {
            match fs::remove_dir(&dir) {
                Ok(()) => tracing::debug!("Removed folder {}", dir.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!("Leaving folder {} in place: {}", dir.display(), e);
                    break;
                }
            }
        }
    }

    /// Write the current manifest to the log under `phase`.
    fn persist(&self, state: &mut TransactionState, phase: TransactionPhase) -> Result<PathBuf, WalError> {
        let entry = WalEntry::new(
            &state.correlation_id,
            state.started_at,
            &state.vault_root,
            phase,
            state.manifest.clone(),
        );
        let path = self.wal.write(&entry)?;
        state.wal_path = Some(path.clone());
        Ok(path)
    }

    /// Create a hidden staged copy beside `target` holding `content`, with the
    /// permissions of `permissions_from`.
    fn stage(
        &self,
        target: &str,
        permissions_from: &str,
        content: &str,
        correlation_id: &str,
    ) -> Result<NamedTempFile, TransactionError> {
        let absolute = self.vault.absolute(target);
        let (Some(dir), Some(file_name)) = (absolute.parent(), absolute.file_name()) else {
            return Err(TransactionError::PrepareFailed(format!("cannot stage {}", target)));
        };
        let prefix = format!(
            ".{}.{}.",
            file_name.to_string_lossy(),
            correlation_id.get(..8).unwrap_or(correlation_id)
        );

        let mut file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".staged")
            .tempfile_in(dir)
            .map_err(|e| prepare_failed(target, &e))?;
        file.write_all(content.as_bytes())
            .map_err(|e| prepare_failed(target, &e))?;
        if let Ok(metadata) = fs::metadata(self.vault.absolute(permissions_from)) {
            file.as_file()
                .set_permissions(metadata.permissions())
                .map_err(|e| prepare_failed(target, &e))?;
        }
        file.as_file()
            .sync_all()
            .map_err(|e| prepare_failed(target, &e))?;
        tracing::debug!("Staged {} at {}", target, file.path().display());
        Ok(file)
    }

    fn staged_name(&self, file: &NamedTempFile) -> Result<String, TransactionError> {
        self.vault.relative(file.path()).ok_or_else(|| {
            TransactionError::PrepareFailed(format!(
                "staged file {} is outside the vault",
                file.path().display()
            ))
        })
    }

    fn success_result(&self, state: &TransactionState) -> TransactionResult {
        let manifest = &state.manifest;
        TransactionResult {
            success: true,
            correlation_id: state.correlation_id.clone(),
            phase: TransactionPhase::Success,
            rename: RenameOutcome {
                from: manifest.note_rename.from.clone(),
                to: manifest.note_rename.to.clone(),
                completed: manifest.note_rename.completed,
            },
            link_updates: state.update_references.then(|| ReferenceUpdateSummary {
                files_updated: manifest.link_updates.iter().filter(|u| u.completed).count(),
                references_updated: manifest.reference_count() + state.self_references,
                ambiguous_skipped: state.ambiguous_skipped,
            }),
            rollback: None,
            error: None,
            wal_path: None,
            metrics: PhaseMetrics::default(),
        }
    }

    fn failure_result(
        &self,
        state: &TransactionState,
        failed_phase: TransactionPhase,
        err: &TransactionError,
        rollback: RollbackResult,
    ) -> TransactionResult {
        TransactionResult {
            success: false,
            correlation_id: state.correlation_id.clone(),
            phase: TransactionPhase::Abort,
            rename: RenameOutcome {
                from: state.manifest.note_rename.from.clone(),
                to: state.manifest.note_rename.to.clone(),
                completed: state.manifest.note_rename.completed,
            },
            link_updates: None,
            rollback: Some(rollback),
            error: Some(TransactionFailure {
                kind: err.kind(),
                phase: failed_phase,
                message: err.to_string(),
            }),
            wal_path: state.wal_path.clone(),
            metrics: PhaseMetrics::default(),
        }
    }
}

fn prepare_failed(path: &str, err: &io::Error) -> TransactionError {
    match err.kind() {
        io::ErrorKind::PermissionDenied => TransactionError::PermissionDenied(format!("{}: {}", path, err)),
        _ => TransactionError::PrepareFailed(format!("{}: {}", path, err)),
    }
}

/// Ancestors of `dir` (itself included) that do not exist yet, deepest first,
/// never climbing above `root`.
fn missing_dirs(dir: &Path, root: &Path) -> Vec<PathBuf> {
    let mut missing = Vec::new();
    let mut current = Some(dir);
    while let Some(path) = current {
        if path == root || !path.starts_with(root) || path.exists() {
            break;
        }
        missing.push(path.to_path_buf());
        current = path.parent();
    }
    missing
}

fn timed<T>(slot: &mut Option<u64>, f: impl FnOnce() -> T) -> T {
    let started = Instant::now();
    let out = f();
    *slot = Some(millis(started.elapsed()));
    out
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
