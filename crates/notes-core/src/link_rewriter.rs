//! Rewrite wikilinks after a note is renamed.
//!
//! Two-step use (render, then commit) lets the caller stage, validate and
//! atomically promote the rewritten documents. `rewrite_in_place` is the older
//! single pass that reads, rewrites and writes each document in turn.
//!
//! When several documents share the renamed note's base name, only links
//! written with the full path are rewritten. A bare `[[Budget]]` could mean
//! any of them, so it is left alone and counted in `ambiguous_skipped`.
//!
//! Render and commit hold every affected document's full rewritten content in
//! memory at once, so memory use grows with the total size of the documents
//! that link to the renamed note. Nothing bounds it internally.

use crate::error::LinkRewriteError;
use crate::link_parser::{apply_edits, rename_edits_by_form, MatchForm, TextEdit};
use crate::link_scanner::{find_references, ScanOptions, ScanReport};
use crate::vault::{content_hash, Vault};
use std::collections::BTreeMap;

/// Rewritten documents computed by [`LinkRewriter::render`]; nothing has been written.
#[derive(Debug, Clone, Default)]
pub struct RenderedRewrite {
    /// Vault-relative path -> full replacement content
    pub contents: BTreeMap<String, String>,
    /// Documents whose content changed, in scan order
    pub affected_paths: Vec<String>,
    /// Number of links rewritten across all documents
    pub reference_count: usize,
    /// Links rewritten per document
    pub reference_counts: BTreeMap<String, usize>,
    /// SHA-256 of the content each rewrite was computed from
    pub source_hashes: BTreeMap<String, String>,
    /// Documents the scan reported but which could not be read
    pub skipped: Vec<String>,
    /// Another document shares the old note's base name
    pub ambiguous: bool,
    /// Base-name links left unchanged because of that ambiguity
    pub ambiguous_skipped: usize,
}

/// Outcome of writing rewritten documents back to the vault.
#[derive(Debug, Clone, Default)]
pub struct CommitReport {
    pub updated: Vec<String>,
    /// (path, error message)
    pub failed: Vec<(String, String)>,
    pub reference_count: usize,
    /// Base-name links left unchanged because the old name was ambiguous
    pub ambiguous_skipped: usize,
}

impl CommitReport {
    pub fn files_updated(&self) -> usize {
        self.updated.len()
    }

    pub fn files_failed(&self) -> usize {
        self.failed.len()
    }
}

pub struct LinkRewriter<'a> {
    vault: &'a Vault,
    options: ScanOptions,
}

impl<'a> LinkRewriter<'a> {
    pub fn new(vault: &'a Vault) -> Self {
        Self {
            vault,
            options: ScanOptions::default(),
        }
    }

    /// Compute the rewritten content of every document linking to `old_name`.
    /// Performs reads only.
    pub fn render(&self, old_name: &str, new_name: &str) -> Result<RenderedRewrite, LinkRewriteError> {
        let report = self.scan(old_name, new_name)?;
        let mut rendered = RenderedRewrite {
            ambiguous: report.ambiguous,
            ..RenderedRewrite::default()
        };

        for path in report.affected_paths() {
            let content = match self.vault.read(&path) {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!("Skipping {} while rendering link rewrite: {}", path, e);
                    rendered.skipped.push(path);
                    continue;
                }
            };

            let (edits, held) = self.edits(&content, old_name, new_name, report.ambiguous);
            rendered.ambiguous_skipped += held;
            if edits.is_empty() {
                continue;
            }
            rendered.reference_count += edits.len();
            rendered.reference_counts.insert(path.clone(), edits.len());
            rendered.source_hashes.insert(path.clone(), content_hash(&content));
            rendered.contents.insert(path.clone(), apply_edits(&content, &edits));
            rendered.affected_paths.push(path);
        }

        if rendered.ambiguous_skipped > 0 {
            tracing::warn!(
                "{} links to {:?} use a base name shared by several documents; left unchanged",
                rendered.ambiguous_skipped,
                old_name
            );
        }
        tracing::debug!(
            "Rendered {} link rewrites across {} documents ({} -> {})",
            rendered.reference_count,
            rendered.affected_paths.len(),
            old_name,
            new_name
        );
        Ok(rendered)
    }

    /// Write precomputed content back to each document's own path. A failure on
    /// one path is recorded and the remaining paths are still written.
    pub fn commit(
        &self,
        contents: Option<&BTreeMap<String, String>>,
        reference_count: usize,
    ) -> Result<CommitReport, LinkRewriteError> {
        let contents = contents.ok_or(LinkRewriteError::MissingCommitInput)?;
        let mut report = CommitReport {
            reference_count,
            ..CommitReport::default()
        };

        for (path, content) in contents {
            match self.vault.write_atomic(path, content) {
                Ok(()) => report.updated.push(path.clone()),
                Err(e) => {
                    tracing::error!("Failed to write rewritten links to {}: {}", path, e);
                    report.failed.push((path.clone(), e.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// Scan, then read-rewrite-write each affected document in a single pass.
    pub fn rewrite_in_place(&self, old_name: &str, new_name: &str) -> Result<CommitReport, LinkRewriteError> {
        let report = self.scan(old_name, new_name)?;
        let mut result = CommitReport::default();

        for path in report.affected_paths() {
            let outcome = self.vault.read(&path).and_then(|content| {
                let (edits, held) = self.edits(&content, old_name, new_name, report.ambiguous);
                result.ambiguous_skipped += held;
                if edits.is_empty() {
                    return Ok(0);
                }
                self.vault.write_atomic(&path, &apply_edits(&content, &edits))?;
                Ok(edits.len())
            });

            match outcome {
                Ok(0) => {}
                Ok(count) => {
                    result.reference_count += count;
                    result.updated.push(path);
                }
                Err(e) => {
                    tracing::error!("Failed to update links in {}: {}", path, e);
                    result.failed.push((path, e.to_string()));
                }
            }
        }
        Ok(result)
    }

    /// Rename edits for one document, plus the number of base-name links
    /// held back when the old name is ambiguous.
    fn edits(&self, content: &str, old_name: &str, new_name: &str, ambiguous: bool) -> (Vec<TextEdit>, usize) {
        let mut held = 0;
        let edits = rename_edits_by_form(content, old_name, new_name, self.options.exclusion_rules())
            .into_iter()
            .filter_map(|(form, edit)| {
                if ambiguous && form == MatchForm::Base {
                    held += 1;
                    None
                } else {
                    Some(edit)
                }
            })
            .collect();
        (edits, held)
    }

    fn scan(&self, old_name: &str, new_name: &str) -> Result<ScanReport, LinkRewriteError> {
        if old_name.trim().is_empty() || new_name.trim().is_empty() {
            return Err(LinkRewriteError::MissingArguments);
        }
        Ok(find_references(self.vault, old_name, &self.options)?)
    }
}
