//! Transactional note renames for a vault of markdown documents.
//!
//! [`TransactionCoordinator`] renames one note and rewrites every wikilink
//! pointing at it, staging all writes, logging them to a write-ahead log and
//! rolling back when anything goes wrong.

pub mod error;
pub mod link_parser;
pub mod link_rewriter;
pub mod link_scanner;
pub mod manifest;
pub mod rollback;
pub mod transaction;
pub mod vault;
pub mod wal;

pub use error::{ErrorKind, LinkRewriteError, LinkScanError, TransactionError, VaultPathError, WalError};
pub use link_rewriter::{CommitReport, LinkRewriter, RenderedRewrite};
pub use link_scanner::{find_references, LinkReference, ScanOptions, ScanReport};
pub use manifest::{LinkUpdate, NoteRename, TransactionManifest, TransactionPhase};
pub use rollback::{RollbackFailure, RollbackItemKind, RollbackResult, RolledBackItem};
pub use transaction::{
    PhaseMetrics, ReferenceUpdateSummary, RenameOutcome, TransactionCoordinator, TransactionFailure,
    TransactionResult, TransactionState,
};
pub use vault::{content_hash, Vault};
pub use wal::{PendingEntry, WalEntry, WalStore, PENDING_QUIESCENCE, WAL_SCHEMA_VERSION};
