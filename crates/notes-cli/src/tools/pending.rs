use super::{wants_json, Context};
use colored::Colorize;
use notes_core::PENDING_QUIESCENCE;
use serde_json::{json, Value};
use std::time::Duration;

/// Execute the `list_pending` tool: list write-ahead log entries old enough
/// that no live rename can still own them.
///
/// Arguments: optional `older_than_secs` (defaults to the quiescence window)
/// and `format`.
pub fn execute(ctx: &Context, arguments: &Value) -> Result<String, String> {
    let min_age = arguments
        .get("older_than_secs")
        .and_then(|v| v.as_u64())
        .map(Duration::from_secs)
        .unwrap_or(PENDING_QUIESCENCE);

    let pending = ctx
        .wal()
        .scan_pending_older_than(min_age)
        .map_err(|e| format!("Error: {}", e))?;

    if wants_json(arguments) {
        let entries: Vec<Value> = pending
            .iter()
            .map(|p| {
                json!({
                    "path": p.path,
                    "correlationId": p.entry.correlation_id,
                    "phase": p.entry.phase,
                    "timestamp": p.entry.timestamp,
                    "vaultPath": p.entry.vault_path,
                    "from": p.entry.manifest.note_rename.from,
                    "to": p.entry.manifest.note_rename.to,
                    "ageSecs": p.entry.age().as_secs(),
                })
            })
            .collect();
        return serde_json::to_string_pretty(&entries).map_err(|e| e.to_string());
    }

    if pending.is_empty() {
        return Ok(format!(
            "No pending write-ahead log entries in {}",
            ctx.wal().dir().display()
        ));
    }

    let mut output = format!(
        "{} pending write-ahead log entries (manual recovery may be needed):\n",
        pending.len().to_string().yellow().bold()
    );
    for p in &pending {
        let manifest = &p.entry.manifest;
        output.push_str(&format!(
            "- {} [{}] {} -> {} ({}/{} operations completed, {} s old)\n  {}\n",
            p.entry.correlation_id,
            p.entry.phase,
            manifest.note_rename.from,
            manifest.note_rename.to,
            manifest.completed_operations(),
            manifest.total_operations,
            p.entry.age().as_secs(),
            p.path.display()
        ));
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::vault_with;
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use notes_core::{NoteRename, TransactionManifest, TransactionPhase, WalEntry};

    fn write_entry(ctx: &Context, minutes_old: i64) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let manifest = TransactionManifest::new(
            NoteRename {
                from: "Old.md".into(),
                to: "New.md".into(),
                hash: "h".into(),
                staged_path: None,
                rewritten_content: None,
                completed: true,
            },
            Vec::new(),
        );
        let entry = WalEntry::new(
            &id,
            Utc::now() - ChronoDuration::minutes(minutes_old),
            ctx.vault().root(),
            TransactionPhase::Abort,
            manifest,
        );
        ctx.wal().write(&entry).unwrap();
        id
    }

    #[test]
    fn empty_log_directory() {
        let tv = vault_with(&[]);
        let out = execute(&tv.ctx, &json!({})).unwrap();
        assert!(out.starts_with("No pending write-ahead log entries"));
        assert!(out.contains(&tv.wal_dir.path().display().to_string()));
    }

    #[test]
    fn recent_entries_are_not_pending() {
        let tv = vault_with(&[]);
        write_entry(&tv.ctx, 0);
        let out = execute(&tv.ctx, &json!({})).unwrap();
        assert!(out.starts_with("No pending"), "{}", out);
    }

    #[test]
    fn lists_old_entries() {
        let tv = vault_with(&[]);
        let id = write_entry(&tv.ctx, 10);
        let out = execute(&tv.ctx, &json!({})).unwrap();
        assert!(out.contains(&id), "{}", out);
        assert!(out.contains("[abort] Old.md -> New.md (1/1 operations completed"), "{}", out);

        let json_out = execute(&tv.ctx, &json!({"format": "json", "older_than_secs": 0})).unwrap();
        let value: Value = serde_json::from_str(&json_out).unwrap();
        assert_eq!(value[0]["correlationId"], id.as_str());
        assert_eq!(value[0]["phase"], "abort");
    }
}
