use serde::{Deserialize, Serialize};

/// Phases of a rename transaction, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionPhase {
    Plan,
    Prepare,
    Validate,
    Commit,
    Success,
    Abort,
}

impl std::fmt::Display for TransactionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransactionPhase::Plan => "plan",
            TransactionPhase::Prepare => "prepare",
            TransactionPhase::Validate => "validate",
            TransactionPhase::Commit => "commit",
            TransactionPhase::Success => "success",
            TransactionPhase::Abort => "abort",
        };
        f.write_str(s)
    }
}

/// The note being renamed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteRename {
    /// Vault-relative origin path
    pub from: String,
    /// Vault-relative destination path
    pub to: String,
    /// SHA-256 of the origin's content when the rename was planned
    pub hash: String,
    /// Temporary copy beside the destination, once prepared
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staged_path: Option<String>,
    /// Origin content with its own self-links rewritten, when it links to itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewritten_content: Option<String>,
    #[serde(default)]
    pub completed: bool,
}

/// One document whose links to the renamed note are rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkUpdate {
    pub path: String,
    /// SHA-256 of the document's content when the rename was planned
    pub hash: String,
    /// Rewritten document content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staged_path: Option<String>,
    pub reference_count: usize,
    #[serde(default)]
    pub completed: bool,
}

/// Everything one rename transaction intends to do, with the content hashes
/// captured at plan time. A later hash mismatch means the file went stale,
/// not that the manifest is wrong.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionManifest {
    pub note_rename: NoteRename,
    #[serde(default)]
    pub link_updates: Vec<LinkUpdate>,
    pub total_operations: usize,
}

impl TransactionManifest {
    pub fn new(note_rename: NoteRename, link_updates: Vec<LinkUpdate>) -> Self {
        let total_operations = 1 + link_updates.len();
        Self {
            note_rename,
            link_updates,
            total_operations,
        }
    }

    pub fn reference_count(&self) -> usize {
        self.link_updates.iter().map(|u| u.reference_count).sum()
    }

    pub fn completed_operations(&self) -> usize {
        usize::from(self.note_rename.completed)
            + self.link_updates.iter().filter(|u| u.completed).count()
    }

    /// Every staged file recorded in the manifest.
    pub fn staged_paths(&self) -> Vec<&str> {
        self.note_rename
            .staged_path
            .iter()
            .chain(self.link_updates.iter().filter_map(|u| u.staged_path.as_ref()))
            .map(String::as_str)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> TransactionManifest {
        TransactionManifest::new(
            NoteRename {
                from: "Old.md".into(),
                to: "New.md".into(),
                hash: "abc".into(),
                staged_path: Some(".New.md.1.staged".into()),
                rewritten_content: None,
                completed: true,
            },
            vec![
                LinkUpdate {
                    path: "A.md".into(),
                    hash: "def".into(),
                    content: Some("[[New]]".into()),
                    staged_path: Some(".A.md.1.staged".into()),
                    reference_count: 2,
                    completed: false,
                },
                LinkUpdate {
                    path: "B.md".into(),
                    hash: "ghi".into(),
                    content: None,
                    staged_path: None,
                    reference_count: 1,
                    completed: true,
                },
            ],
        )
    }

    #[test]
    fn counts_operations_and_references() {
        let m = manifest();
        assert_eq!(m.total_operations, 3);
        assert_eq!(m.reference_count(), 3);
        assert_eq!(m.completed_operations(), 2);
        assert_eq!(m.staged_paths(), vec![".New.md.1.staged", ".A.md.1.staged"]);
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let json = serde_json::to_value(manifest()).unwrap();
        assert!(json.get("noteRename").is_some());
        assert!(json.get("linkUpdates").is_some());
        assert_eq!(json["totalOperations"], 3);
        assert_eq!(json["linkUpdates"][0]["referenceCount"], 2);
        assert_eq!(json["noteRename"]["stagedPath"], ".New.md.1.staged");
        assert!(json["linkUpdates"][1].get("stagedPath").is_none());
    }
}
