use super::{required_str, wants_json, Context};
use colored::Colorize;
use notes_core::TransactionResult;
use serde_json::Value;

/// Execute the `rename_note` tool: rename a note and, unless disabled, rewrite
/// every wikilink that points to it.
///
/// Arguments: `from`, `to` (vault-relative `.md` paths), optional
/// `update_links` (bool) and `format` (`"text"` or `"json"`). A failed rename
/// comes back as `Err` with the same rendering as a successful one.
pub fn execute(ctx: &Context, arguments: &Value) -> Result<String, String> {
    let from = required_str(arguments, "from")?;
    let to = required_str(arguments, "to")?;
    let update_links = arguments
        .get("update_links")
        .and_then(|v| v.as_bool())
        .unwrap_or(ctx.update_links);

    let result = ctx.coordinator().execute(from, to, update_links);

    let output = if wants_json(arguments) {
        serde_json::to_string_pretty(&result).map_err(|e| e.to_string())?
    } else {
        render_text(&result)
    };
    if result.success {
        Ok(output)
    } else {
        Err(output)
    }
}

fn render_text(result: &TransactionResult) -> String {
    let mut out = String::new();

    if result.success {
        out.push_str(&format!(
            "{} {} -> {}\n",
            "Renamed".green().bold(),
            result.rename.from,
            result.rename.to
        ));
        if let Some(links) = &result.link_updates {
            out.push_str(&format!(
                "{} links rewritten in {} documents\n",
                links.references_updated, links.files_updated
            ));
            if links.ambiguous_skipped > 0 {
                out.push_str(&format!(
                    "{} {} links use a name shared by several notes and were left unchanged\n",
                    "Warning:".yellow().bold(),
                    links.ambiguous_skipped
                ));
            }
        }
    } else {
        out.push_str(&format!(
            "{} {} -> {}\n",
            "Rename failed:".red().bold(),
            result.rename.from,
            result.rename.to
        ));
        if let Some(error) = &result.error {
            out.push_str(&format!("{} during {}: {}\n", error.kind, error.phase, error.message));
        }
        if let Some(rollback) = &result.rollback {
            if rollback.success {
                out.push_str("Rolled back; the vault is unchanged.\n");
            } else {
                out.push_str(&format!(
                    "{}\n",
                    "Rollback incomplete, manual recovery required:".yellow().bold()
                ));
                for (i, step) in rollback.recovery_instructions.iter().flatten().enumerate() {
                    out.push_str(&format!("  {}. {}\n", i + 1, step));
                }
            }
        }
    }

    out.push_str(&format!(
        "{}",
        format!(
            "transaction {} ({} ms)",
            result.correlation_id, result.metrics.total_ms
        )
        .dimmed()
    ));
    out
}
