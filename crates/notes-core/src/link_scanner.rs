//! Find every wikilink that points at a given note.

use crate::error::LinkScanError;
use crate::link_parser::{
    excluded_lines, lines_with_offsets, parse_wikilinks, ExclusionRules, TargetMatcher,
};
use crate::vault::{base_name, note_name, Vault};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Knobs for [`find_references`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    /// Report `![[embeds]]` as well as plain links
    pub include_embeds: bool,
    /// Compare target names case-sensitively
    pub case_sensitive: bool,
    /// Ignore links inside fenced code blocks
    pub skip_code_blocks: bool,
    /// Ignore links inside a leading frontmatter block
    pub skip_frontmatter: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            include_embeds: true,
            case_sensitive: false,
            skip_code_blocks: true,
            skip_frontmatter: true,
        }
    }
}

impl ScanOptions {
    pub fn exclusion_rules(&self) -> ExclusionRules {
        ExclusionRules {
            skip_frontmatter: self.skip_frontmatter,
            skip_code_blocks: self.skip_code_blocks,
        }
    }
}

/// One occurrence of a wikilink to the scanned note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkReference {
    /// Vault-relative path of the document containing the link
    pub source_path: String,
    /// Note name of that document (path without `.md`)
    pub source_name: String,
    /// The link exactly as written, e.g. `![[Trip Report#^abc|see]]`
    pub matched_text: String,
    /// Target as written inside the link, without `.md`
    pub target: String,
    pub alias: Option<String>,
    pub heading: Option<String>,
    /// Block id without the leading `^`
    pub block_ref: Option<String>,
    pub embed: bool,
    /// 1-indexed line number
    pub line: usize,
    /// 1-indexed character column where the link starts
    pub column_start: usize,
    /// 1-indexed character column one past the link's last character
    pub column_end: usize,
    /// More than one document in the vault shares the target's base name
    pub ambiguous: bool,
}

/// Result of scanning the whole vault.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub references: Vec<LinkReference>,
    pub documents_scanned: usize,
    pub ambiguous: bool,
    /// The document listing came from the vault's enumeration cache
    pub cache_used: bool,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl ScanReport {
    /// Distinct source documents, in scan order.
    pub fn affected_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = Vec::new();
        for reference in &self.references {
            if !paths.contains(&reference.source_path) {
                paths.push(reference.source_path.clone());
            }
        }
        paths
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Scan every document in the vault for links to `target`.
///
/// `target` is a vault-relative note name without extension (`Projects/Trip Report`);
/// a trailing `.md` is tolerated. Documents that cannot be read are logged and
/// skipped. Ambiguity is informational only: when several documents share the
/// target's base name every returned reference is flagged, and the scan continues.
pub fn find_references(
    vault: &Vault,
    target: &str,
    options: &ScanOptions,
) -> Result<ScanReport, LinkScanError> {
    if target.trim().is_empty() {
        return Err(LinkScanError::InvalidTarget);
    }
    let started = Instant::now();

    let listing = vault
        .list_documents()
        .map_err(|source| LinkScanError::VaultAccess {
            path: vault.root().to_path_buf(),
            source,
        })?;

    let ambiguous = count_base_name(&listing.paths, &base_name(target), options.case_sensitive) > 1;
    if ambiguous {
        tracing::info!("Target {:?} is ambiguous: several documents share its base name", target);
    }

    let mut references = Vec::new();
    let mut documents_scanned = 0;
    for path in &listing.paths {
        let content = match vault.read(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("Skipping unreadable document {}: {}", path, e);
                continue;
            }
        };
        documents_scanned += 1;
        references.extend(find_references_in_text(path, &content, target, options, ambiguous));
    }

    let elapsed = started.elapsed();
    tracing::debug!(
        "Scanned {} documents for {:?}: {} references in {:?} (cache: {})",
        documents_scanned,
        target,
        references.len(),
        elapsed,
        listing.cached
    );

    Ok(ScanReport {
        references,
        documents_scanned,
        ambiguous,
        cache_used: listing.cached,
        elapsed,
    })
}

/// Find links to `target` inside one document's text. Pure; no I/O.
pub fn find_references_in_text(
    source_path: &str,
    content: &str,
    target: &str,
    options: &ScanOptions,
    ambiguous: bool,
) -> Vec<LinkReference> {
    let matcher = TargetMatcher::new(target, options.case_sensitive);
    let source_name = note_name(source_path);

    let lines = lines_with_offsets(content);
    let texts: Vec<&str> = lines.iter().map(|(_, l)| *l).collect();
    let excluded = excluded_lines(&texts, options.exclusion_rules());

    let mut references = Vec::new();
    for (idx, (line, skip)) in texts.iter().zip(excluded).enumerate() {
        if skip {
            continue;
        }
        for link in parse_wikilinks(line) {
            if link.embed && !options.include_embeds {
                continue;
            }
            if matcher.matches(&link.target).is_none() {
                continue;
            }
            let column_start = line[..link.start].chars().count() + 1;
            let matched_text = &line[link.start..link.end];
            references.push(LinkReference {
                source_path: source_path.to_string(),
                source_name: source_name.clone(),
                matched_text: matched_text.to_string(),
                heading: link.heading().map(str::to_string),
                block_ref: link.block_ref().map(str::to_string),
                target: link.target,
                alias: link.alias,
                embed: link.embed,
                line: idx + 1,
                column_start,
                column_end: column_start + matched_text.chars().count(),
                ambiguous,
            });
        }
    }
    references
}

fn count_base_name(paths: &[String], base: &str, case_sensitive: bool) -> usize {
    paths
        .iter()
        .filter(|p| {
            let candidate = base_name(p);
            if case_sensitive {
                candidate == base
            } else {
                candidate.to_lowercase() == base.to_lowercase()
            }
        })
        .count()
}
