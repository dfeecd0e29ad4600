use super::{required_str, Context};
use notes_core::link_parser::{extract_wikilinks, TargetMatcher};
use notes_core::vault::note_name;
use notes_core::{find_references, ScanOptions, Vault};
use serde_json::Value;

/// Execute the `get_links` tool: return backlinks and forward links for a note.
pub fn execute(ctx: &Context, arguments: &Value) -> Result<String, String> {
    let file_path = required_str(arguments, "file_path")?;

    let vault = ctx.vault();
    let path = vault
        .resolve(file_path)
        .map_err(|e| format!("Error: {}", e))?;
    if !vault.exists(&path) {
        return Err(format!("Error: Document not found: {}", file_path));
    }

    // --- Backlinks ---
    let backlinks = read_backlinks(vault, &path)?;

    // --- Forward links ---
    let content = vault
        .read(&path)
        .map_err(|e| format!("Error: could not read {}: {}", path, e))?;
    let forward_links = resolve_forward_links(vault, &content)?;

    let mut output = String::new();
    output.push_str("Backlinks (documents linking to this):\n");
    if backlinks.is_empty() {
        output.push_str("- (none)\n");
    } else {
        for line in &backlinks {
            output.push_str(&format!("- {}\n", line));
        }
    }

    output.push_str("\nForward links (documents this links to):\n");
    if forward_links.is_empty() {
        output.push_str("- (none)\n");
    } else {
        for line in &forward_links {
            output.push_str(&format!("- {}\n", line));
        }
    }

    Ok(output)
}

/// One entry per linking document, with the lines the links are on.
fn read_backlinks(vault: &Vault, path: &str) -> Result<Vec<String>, String> {
    let report = find_references(vault, &note_name(path), &ScanOptions::default())
        .map_err(|e| format!("Error: {}", e))?;

    let mut entries: Vec<(String, Vec<usize>)> = Vec::new();
    for reference in report.references.iter().filter(|r| r.source_path != path) {
        match entries.iter_mut().find(|(p, _)| *p == reference.source_path) {
            Some((_, lines)) => lines.push(reference.line),
            None => entries.push((reference.source_path.clone(), vec![reference.line])),
        }
    }

    Ok(entries
        .into_iter()
        .map(|(source, lines)| {
            let lines: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
            let marker = if report.ambiguous { " (ambiguous)" } else { "" };
            format!("{} (line {}){}", source, lines.join(", "), marker)
        })
        .collect())
}

/// Resolve each link target to a vault document: an exact note name wins,
/// then a unique base name match. Anything else is listed as unresolved.
fn resolve_forward_links(vault: &Vault, content: &str) -> Result<Vec<String>, String> {
    let link_names = extract_wikilinks(content);
    if link_names.is_empty() {
        return Ok(Vec::new());
    }
    let listing = vault
        .list_documents()
        .map_err(|e| format!("Error: could not list vault documents: {}", e))?;

    let mut forward_links: Vec<String> = Vec::new();
    for link_name in &link_names {
        let resolved = resolve_link(&listing.paths, link_name);
        let line = match resolved {
            Some(path) => path,
            None => format!("{} (unresolved)", link_name),
        };
        if !forward_links.contains(&line) {
            forward_links.push(line);
        }
    }
    forward_links.sort();
    Ok(forward_links)
}

fn resolve_link(paths: &[String], link_name: &str) -> Option<String> {
    let wanted = link_name.trim().trim_start_matches('/').to_lowercase();
    if let Some(exact) = paths.iter().find(|p| note_name(p).to_lowercase() == wanted) {
        return Some(exact.clone());
    }

    let mut base_matches = paths.iter().filter(|p| {
        TargetMatcher::new(&note_name(p), false)
            .matches(link_name)
            .is_some()
    });
    match (base_matches.next(), base_matches.next()) {
        (Some(only), None) => Some(only.clone()),
        _ => None,
    }
}
