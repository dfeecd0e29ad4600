use crate::error::VaultPathError;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;
use std::thread;
use std::time::Duration;
use walkdir::{DirEntry, WalkDir};

const WRITE_ATTEMPTS: u32 = 3;
const WRITE_BACKOFF: Duration = Duration::from_millis(50);

/// Markdown documents found under the vault root.
#[derive(Debug, Clone)]
pub struct DocumentListing {
    /// Vault-relative paths with `/` separators, sorted.
    pub paths: Vec<String>,
    /// True when the listing came from the enumeration cache.
    pub cached: bool,
}

/// Read/write primitives over a directory of markdown notes.
///
/// Paths handed to and returned from a `Vault` are vault-relative and use `/`
/// separators regardless of platform (`Notes/Ideas.md`). The document listing is
/// cached after the first walk; anything that creates, removes or renames a
/// document must call [`Vault::invalidate_cache`].
pub struct Vault {
    root: PathBuf,
    documents: RwLock<Option<Vec<String>>>,
}

impl Vault {
    pub fn open(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = fs::canonicalize(root.as_ref())?;
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("vault root is not a directory: {}", root.display()),
            ));
        }
        Ok(Self {
            root,
            documents: RwLock::new(None),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute filesystem path for a vault-relative path.
    pub fn absolute(&self, relative: &str) -> PathBuf {
        let mut path = self.root.clone();
        for segment in relative.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path
    }

    /// Vault-relative form of an absolute path under the root.
    pub fn relative(&self, path: &Path) -> Option<String> {
        path.strip_prefix(&self.root).ok().map(to_vault_path)
    }

    /// Normalize a user supplied document path into vault-relative form.
    ///
    /// Accepts `Notes/Idea.md`, `/Notes/Idea.md` (vault-rooted), `./Notes/Idea.md`
    /// and absolute paths that live under the vault root. Rejects anything that
    /// climbs out of the vault or does not name a `.md` file.
    pub fn resolve(&self, path: &str) -> Result<String, VaultPathError> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(VaultPathError::Empty);
        }

        let unified = trimmed.replace('\\', "/");
        let candidate = Path::new(&unified);
        let relative = match candidate.strip_prefix(&self.root) {
            Ok(inside) => inside.to_path_buf(),
            Err(_) => candidate.to_path_buf(),
        };

        let mut segments: Vec<String> = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => segments.push(part.to_string_lossy().into_owned()),
                Component::CurDir | Component::RootDir => {}
                Component::ParentDir => {
                    if segments.pop().is_none() {
                        return Err(VaultPathError::EscapesVault(trimmed.to_string()));
                    }
                }
                Component::Prefix(_) => return Err(VaultPathError::Absolute(trimmed.to_string())),
            }
        }

        if segments.is_empty() {
            return Err(VaultPathError::Empty);
        }
        let joined = segments.join("/");
        if !joined.to_lowercase().ends_with(".md") {
            return Err(VaultPathError::NotMarkdown(trimmed.to_string()));
        }
        Ok(joined)
    }

    /// List every markdown document in the vault, skipping hidden files and folders.
    ///
    /// Errors below the root are logged and skipped; only a failure to read the
    /// root itself is returned.
    pub fn list_documents(&self) -> io::Result<DocumentListing> {
        {
            let cache = self.documents.read().unwrap_or_else(|e| e.into_inner());
            if let Some(paths) = cache.as_ref() {
                return Ok(DocumentListing {
                    paths: paths.clone(),
                    cached: true,
                });
            }
        }

        let mut paths = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.depth() == 0 => return Err(err.into()),
                Err(err) => {
                    tracing::warn!("Skipping unreadable vault entry: {}", err);
                    continue;
                }
            };
            if !entry.file_type().is_file() || !has_markdown_extension(entry.path()) {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(&self.root) {
                paths.push(to_vault_path(relative));
            }
        }
        paths.sort();

        let mut cache = self.documents.write().unwrap_or_else(|e| e.into_inner());
        *cache = Some(paths.clone());
        Ok(DocumentListing {
            paths,
            cached: false,
        })
    }

    pub fn invalidate_cache(&self) {
        let mut cache = self.documents.write().unwrap_or_else(|e| e.into_inner());
        *cache = None;
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.absolute(relative).is_file()
    }

    pub fn read(&self, relative: &str) -> io::Result<String> {
        fs::read_to_string(self.absolute(relative))
    }

    /// Replace a document's content atomically, retrying transient failures
    /// (sync clients briefly holding the file, interrupted syscalls).
    pub fn write_atomic(&self, relative: &str, content: &str) -> io::Result<()> {
        let path = self.absolute(relative);
        let mut attempt = 1;
        loop {
            match write_file_atomic(&path, content.as_bytes()) {
                Ok(()) => return Ok(()),
                Err(err) if attempt < WRITE_ATTEMPTS && is_transient(&err) => {
                    tracing::debug!(
                        "Transient write failure on {} (attempt {}): {}",
                        relative,
                        attempt,
                        err
                    );
                    thread::sleep(WRITE_BACKOFF * attempt);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Write `content` to a temporary file beside `path`, fsync it, then rename it
/// into place. Readers of `path` see either the old file or the complete new one.
/// An existing file keeps its permissions.
pub fn write_file_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let dir = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("no parent directory for {}", path.display()),
        )
    })?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    if let Ok(existing) = fs::metadata(path) {
        tmp.as_file().set_permissions(existing.permissions())?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

fn has_markdown_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("md"))
        .unwrap_or(false)
}

fn to_vault_path(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Note name used inside wikilinks: the vault-relative path without `.md`.
///
/// `Projects/Trip Report.md` -> `Projects/Trip Report`
pub fn note_name(relative: &str) -> String {
    let trimmed = relative.trim().trim_start_matches('/');
    let len = trimmed.len();
    if len >= 3 && trimmed[len - 3..].eq_ignore_ascii_case(".md") {
        trimmed[..len - 3].to_string()
    } else {
        trimmed.to_string()
    }
}

/// Last path segment of a note name or path, without `.md`.
///
/// `Projects/Trip Report.md` -> `Trip Report`
pub fn base_name(relative: &str) -> String {
    let name = note_name(relative);
    match name.rsplit('/').next() {
        Some(last) => last.to_string(),
        None => name,
    }
}

/// Lowercase hex SHA-256 of the document's UTF-8 content.
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn vault_with(files: &[(&str, &str)]) -> (TempDir, Vault) {
        let dir = TempDir::new().unwrap();
        for (path, content) in files {
            let full = dir.path().join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, content).unwrap();
        }
        let vault = Vault::open(dir.path()).unwrap();
        (dir, vault)
    }

    #[test]
    fn lists_markdown_documents_only() {
        let (_dir, vault) = vault_with(&[
            ("A.md", "a"),
            ("Notes/B.md", "b"),
            ("image.png", ""),
            (".obsidian/workspace.md", "hidden"),
            ("Notes/.C.md.tmp", "staged"),
        ]);
        let listing = vault.list_documents().unwrap();
        assert_eq!(listing.paths, vec!["A.md", "Notes/B.md"]);
        assert!(!listing.cached);
    }

    #[test]
    fn second_listing_uses_cache_until_invalidated() {
        let (dir, vault) = vault_with(&[("A.md", "a")]);
        vault.list_documents().unwrap();

        fs::write(dir.path().join("B.md"), "b").unwrap();
        let cached = vault.list_documents().unwrap();
        assert!(cached.cached);
        assert_eq!(cached.paths, vec!["A.md"]);

        vault.invalidate_cache();
        let fresh = vault.list_documents().unwrap();
        assert!(!fresh.cached);
        assert_eq!(fresh.paths, vec!["A.md", "B.md"]);
    }

    #[test]
    fn resolve_accepts_vault_rooted_and_dot_paths() {
        let (_dir, vault) = vault_with(&[]);
        assert_eq!(vault.resolve("Notes/Idea.md").unwrap(), "Notes/Idea.md");
        assert_eq!(vault.resolve("/Notes/Idea.md").unwrap(), "Notes/Idea.md");
        assert_eq!(vault.resolve("./Notes/../Idea.md").unwrap(), "Idea.md");
    }

    #[test]
    fn resolve_accepts_absolute_path_inside_vault() {
        let (_dir, vault) = vault_with(&[]);
        let absolute = vault.root().join("Notes").join("Idea.md");
        assert_eq!(
            vault.resolve(absolute.to_str().unwrap()).unwrap(),
            "Notes/Idea.md"
        );
    }

    #[test]
    fn resolve_rejects_escapes_and_non_markdown() {
        let (_dir, vault) = vault_with(&[]);
        assert_eq!(
            vault.resolve("../outside.md"),
            Err(VaultPathError::EscapesVault("../outside.md".into()))
        );
        assert_eq!(
            vault.resolve("Notes/picture.png"),
            Err(VaultPathError::NotMarkdown("Notes/picture.png".into()))
        );
        assert_eq!(vault.resolve("   "), Err(VaultPathError::Empty));
    }

    #[test]
    fn relative_maps_back_into_vault() {
        let (_dir, vault) = vault_with(&[]);
        let inside = vault.absolute("Notes/Idea.md");
        assert_eq!(vault.relative(&inside).as_deref(), Some("Notes/Idea.md"));
        assert_eq!(vault.relative(Path::new("/elsewhere/x.md")), None);
    }

    #[test]
    fn write_atomic_replaces_content() {
        let (_dir, vault) = vault_with(&[("A.md", "old")]);
        vault.write_atomic("A.md", "new content").unwrap();
        assert_eq!(vault.read("A.md").unwrap(), "new content");
    }

    #[test]
    fn note_and_base_names() {
        assert_eq!(note_name("Projects/Trip Report.md"), "Projects/Trip Report");
        assert_eq!(note_name("/Trip Report.MD"), "Trip Report");
        assert_eq!(base_name("Projects/Trip Report.md"), "Trip Report");
        assert_eq!(base_name("Budget"), "Budget");
    }

    #[test]
    fn hash_is_stable_sha256_hex() {
        assert_eq!(
            content_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_ne!(content_hash("a"), content_hash("b"));
    }
}
