//! Tool entry points shared by the CLI and assistant integrations.
//!
//! Each tool takes JSON arguments and returns either rendered output or an
//! error message, never a Rust error type.

pub mod get_links;
pub mod pending;
pub mod rename_note;

use notes_core::{TransactionCoordinator, Vault, WalStore};
use serde_json::Value;
use std::sync::Arc;

/// Services the tools run against.
pub struct Context {
    coordinator: TransactionCoordinator,
    /// Used when a rename call does not say whether to update links
    pub update_links: bool,
}

impl Context {
    pub fn new(vault: Arc<Vault>, wal: WalStore, update_links: bool) -> Self {
        Self {
            coordinator: TransactionCoordinator::new(vault, wal),
            update_links,
        }
    }

    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.coordinator
    }

    pub fn vault(&self) -> &Vault {
        self.coordinator.vault()
    }

    pub fn wal(&self) -> &WalStore {
        self.coordinator.wal()
    }
}

pub const TOOL_NAMES: &[&str] = &["rename_note", "get_links", "list_pending"];

/// Run the named tool.
pub fn call(ctx: &Context, name: &str, arguments: &Value) -> Result<String, String> {
    tracing::debug!("Calling tool {}", name);
    match name {
        "rename_note" => rename_note::execute(ctx, arguments),
        "get_links" => get_links::execute(ctx, arguments),
        "list_pending" => pending::execute(ctx, arguments),
        other => Err(format!(
            "Unknown tool: {}. Available: {}",
            other,
            TOOL_NAMES.join(", ")
        )),
    }
}

/// Read a required string argument.
pub(crate) fn required_str<'a>(arguments: &'a Value, name: &str) -> Result<&'a str, String> {
    arguments
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("Missing required parameter: {}", name))
}

/// True when the caller asked for `"format": "json"`.
pub(crate) fn wants_json(arguments: &Value) -> bool {
    arguments.get("format").and_then(|v| v.as_str()) == Some("json")
}


#[cfg(test)]
mod tests {
    use super::test_support::vault_with;
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_tool_lists_available_ones() {
        let tv = vault_with(&[]);
        let err = call(&tv.ctx, "delete_everything", &json!({})).unwrap_err();
        assert!(err.contains("Unknown tool: delete_everything"));
        assert!(err.contains("rename_note"));
    }

    #[test]
    fn missing_parameters_are_reported() {
        let tv = vault_with(&[]);
        let err = call(&tv.ctx, "rename_note", &json!({"from": "A.md"})).unwrap_err();
        assert_eq!(err, "Missing required parameter: to");
    }
}
