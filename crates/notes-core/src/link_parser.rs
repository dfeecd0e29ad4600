#[cfg(test)]
mod tests {
    use super::*;

    // === parse_wikilinks ===

    #[test]
    fn parses_simple_wikilink() {
        let links = parse_wikilinks("See [[Note]] here");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target, "Note");
        assert_eq!(links[0].start, 4);
        assert_eq!(links[0].end, 12);
        assert!(!links[0].embed);
        assert_eq!(links[0].anchor, None);
        assert_eq!(links[0].alias, None);
    }

    #[test]
    fn parses_heading_anchor_and_alias() {
        let links = parse_wikilinks("[[Note#Section|Display]]");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target, "Note");
        assert_eq!(links[0].anchor, Some(Anchor::Heading("Section".into())));
        assert_eq!(links[0].alias.as_deref(), Some("Display"));
    }

    #[test]
    fn caret_anchor_is_block_reference() {
        let links = parse_wikilinks("![[Note#^abc123]]");
        assert_eq!(links.len(), 1);
        assert!(links[0].embed);
        assert_eq!(links[0].anchor, Some(Anchor::Block("abc123".into())));
        assert_eq!(links[0].block_ref(), Some("abc123"));
        assert_eq!(links[0].heading(), None);
    }

    #[test]
    fn strips_markdown_extension_from_target() {
        let links = parse_wikilinks("[[Folder/Note.md|x]]");
        assert_eq!(links[0].target, "Folder/Note");
        assert_eq!(links[0].raw_target, "Folder/Note.md");
    }

    #[test]
    fn ignores_empty_and_heading_only_links() {
        assert!(parse_wikilinks("[[]] and [[#Local heading]]").is_empty());
    }

    #[test]
    fn parses_multiple_links_on_one_line() {
        let links = parse_wikilinks("[[One]] and ![[Two]] and [[Three|3]]");
        let targets: Vec<&str> = links.iter().map(|l| l.target.as_str()).collect();
        assert_eq!(targets, vec!["One", "Two", "Three"]);
    }

    #[test]
    fn render_preserves_every_component() {
        let link = &parse_wikilinks("![[Old#^blk|Label]]")[0];
        assert_eq!(link.render("New"), "![[New#^blk|Label]]");
        let link = &parse_wikilinks("[[Old#Section]]")[0];
        assert_eq!(link.render("New"), "[[New#Section]]");
    }

    // === excluded_lines ===

    #[test]
    fn frontmatter_only_excluded_when_opening_on_first_line() {
        let lines = vec!["---", "tags: [a]", "---", "body"];
        let rules = ExclusionRules::default();
        assert_eq!(excluded_lines(&lines, rules), vec![true, true, true, false]);

        let lines = vec!["intro", "---", "not frontmatter", "---"];
        assert_eq!(excluded_lines(&lines, rules), vec![false; 4]);
    }

    #[test]
    fn unterminated_frontmatter_runs_to_end_of_file() {
        let lines = vec!["---", "title: x", "[[Link]]"];
        assert_eq!(
            excluded_lines(&lines, ExclusionRules::default()),
            vec![true, true, true]
        );
    }

    #[test]
    fn fenced_code_regions_are_excluded() {
        let lines = vec!["a", "```rust", "[[Code]]", "```", "b", "~~~", "[[Tilde]]"];
        assert_eq!(
            excluded_lines(&lines, ExclusionRules::default()),
            vec![false, true, true, true, false, true, true]
        );
    }

    #[test]
    fn fence_must_close_with_same_marker() {
        let lines = vec!["````", "```", "[[Inside]]", "````", "[[Outside]]"];
        assert_eq!(
            excluded_lines(&lines, ExclusionRules::default()),
            vec![true, true, true, true, false]
        );
    }

    #[test]
    fn exclusion_rules_can_be_disabled() {
        let lines = vec!["---", "x", "---", "```", "y", "```"];
        let rules = ExclusionRules {
            skip_frontmatter: false,
            skip_code_blocks: false,
        };
        assert_eq!(excluded_lines(&lines, rules), vec![false; 6]);
    }

    // === extract_wikilinks ===

    #[test]
    fn extract_returns_targets_outside_code() {
        let markdown = "```\n[[CodeLink]]\n```\nOutside [[RealLink#Part]] and [[Other|alias]]";
        assert_eq!(extract_wikilinks(markdown), vec!["RealLink", "Other"]);
    }

    // === TargetMatcher ===

    #[test]
    fn matcher_accepts_full_name_and_base_name() {
        let matcher = TargetMatcher::new("Projects/Trip Report", false);
        assert_eq!(matcher.matches("projects/trip report"), Some(MatchForm::Full));
        assert_eq!(matcher.matches("Trip Report"), Some(MatchForm::Base));
        assert_eq!(matcher.matches("Trip"), None);
    }

    #[test]
    fn case_sensitive_matcher() {
        let matcher = TargetMatcher::new("Budget", true);
        assert_eq!(matcher.matches("Budget"), Some(MatchForm::Full));
        assert_eq!(matcher.matches("budget"), None);
    }

    // === compute_wikilink_rename_edits ===

    #[test]
    fn rename_edit_replaces_whole_link() {
        let edits = compute_wikilink_rename_edits(
            "See [[Foo#Sec|Alias]] here",
            "Foo",
            "Bar",
            ExclusionRules::default(),
        );
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].offset, 4);
        assert_eq!(edits[0].remove_len, "[[Foo#Sec|Alias]]".len());
        assert_eq!(edits[0].insert_text, "[[Bar#Sec|Alias]]");
    }

    #[test]
    fn rename_edits_in_reverse_offset_order() {
        let edits = compute_wikilink_rename_edits(
            "[[Foo]] and\n[[Foo]]",
            "Foo",
            "Bar",
            ExclusionRules::default(),
        );
        assert_eq!(edits.len(), 2);
        assert!(edits[0].offset > edits[1].offset);
    }

    #[test]
    fn rename_keeps_other_links_and_code_blocks() {
        let text = "[[Foo]] [[Food]]\n```\n[[Foo]]\n```\n![[foo#^x]]\n";
        let edits = compute_wikilink_rename_edits(text, "Foo", "Bar", ExclusionRules::default());
        assert_eq!(
            apply_edits(text, &edits),
            "[[Bar]] [[Food]]\n```\n[[Foo]]\n```\n![[Bar#^x]]\n"
        );
    }

    #[test]
    fn rename_base_form_uses_new_base_name() {
        let text = "[[Trip]] and [[Projects/Trip|t]]";
        let edits = compute_wikilink_rename_edits(
            text,
            "Projects/Trip",
            "Archive/Trip 2024",
            ExclusionRules::default(),
        );
        assert_eq!(
            apply_edits(text, &edits),
            "[[Trip 2024]] and [[Archive/Trip 2024|t]]"
        );
    }

    #[test]
    fn rename_edits_report_link_form() {
        let text = "[[Trip]] and [[Projects/Trip|t]]";
        let forms: Vec<MatchForm> = rename_edits_by_form(
            text,
            "Projects/Trip",
            "Projects/Trip 2024",
            ExclusionRules::default(),
        )
        .into_iter()
        .map(|(form, _)| form)
        .collect();
        assert_eq!(forms, vec![MatchForm::Full, MatchForm::Base]);
    }

    #[test]
    fn rename_keeps_explicit_extension() {
        let text = "[[Foo.md]]";
        let edits = compute_wikilink_rename_edits(text, "Foo", "Bar", ExclusionRules::default());
        assert_eq!(apply_edits(text, &edits), "[[Bar.md]]");
    }

    #[test]
    fn handles_crlf_and_multibyte_text() {
        let text = "héllo [[Foo]]\r\nçà [[Foo|ü]]\r\n";
        let edits = compute_wikilink_rename_edits(text, "Foo", "Bar", ExclusionRules::default());
        assert_eq!(apply_edits(text, &edits), "héllo [[Bar]]\r\nçà [[Bar|ü]]\r\n");
    }
}

use regex::Regex;
use std::sync::LazyLock;

// `!?[[target#anchor|alias]]`, none of the parts may contain brackets
static WIKILINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(!)?\[\[([^\[\]|#]*)(?:#([^\[\]|]*))?(?:\|([^\[\]]*))?\]\]").unwrap()
});

/// The `#...` part of a wikilink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anchor {
    /// `[[Note#Heading]]`
    Heading(String),
    /// `[[Note#^block-id]]`, stored without the caret
    Block(String),
}

/// One wikilink found in a line of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wikilink {
    /// Byte offset of the first character (`!` for embeds, otherwise `[`)
    pub start: usize,
    /// Byte offset one past the closing `]]`
    pub end: usize,
    /// Target exactly as written between `[[` and `#`/`|`/`]]`
    pub raw_target: String,
    /// Trimmed target with any `.md` suffix removed
    pub target: String,
    pub anchor: Option<Anchor>,
    /// Alias text exactly as written after `|`
    pub alias: Option<String>,
    pub embed: bool,
}

impl Wikilink {
    pub fn heading(&self) -> Option<&str> {
        match &self.anchor {
            Some(Anchor::Heading(h)) => Some(h),
            _ => None,
        }
    }

    pub fn block_ref(&self) -> Option<&str> {
        match &self.anchor {
            Some(Anchor::Block(b)) => Some(b),
            _ => None,
        }
    }

    /// Rebuild this link pointing at `target`, keeping embed marker, anchor and
    /// alias exactly as they were written.
    pub fn render(&self, target: &str) -> String {
        let mut out = String::with_capacity(self.end - self.start + target.len());
        if self.embed {
            out.push('!');
        }
        out.push_str("[[");
        out.push_str(target);
        match &self.anchor {
            Some(Anchor::Heading(h)) => {
                out.push('#');
                out.push_str(h);
            }
            Some(Anchor::Block(b)) => {
                out.push_str("#^");
                out.push_str(b);
            }
            None => {}
        }
        if let Some(alias) = &self.alias {
            out.push('|');
            out.push_str(alias);
        }
        out.push_str("]]");
        out
    }

    fn has_md_extension(&self) -> bool {
        let raw = self.raw_target.trim();
        raw.len() >= 3 && raw[raw.len() - 3..].eq_ignore_ascii_case(".md")
    }
}

/// Parse every wikilink in a single line. Offsets are relative to `line`.
pub fn parse_wikilinks(line: &str) -> Vec<Wikilink> {
    let mut links = Vec::new();

    for cap in WIKILINK_RE.captures_iter(line) {
        let Some(full) = cap.get(0) else { continue };
        let raw_target = cap.get(2).map(|m| m.as_str()).unwrap_or("");
        let target = strip_md_extension(raw_target.trim());

        // Skip empty and same-document heading links
        if target.is_empty() {
            continue;
        }

        let anchor = cap.get(3).map(|m| {
            let text = m.as_str();
            match text.strip_prefix('^') {
                Some(block) => Anchor::Block(block.to_string()),
                None => Anchor::Heading(text.to_string()),
            }
        });

        links.push(Wikilink {
            start: full.start(),
            end: full.end(),
            raw_target: raw_target.to_string(),
            target: target.to_string(),
            anchor,
            alias: cap.get(4).map(|m| m.as_str().to_string()),
            embed: cap.get(1).is_some(),
        });
    }

    links
}

fn strip_md_extension(name: &str) -> &str {
    let len = name.len();
    if len >= 3 && name[len - 3..].eq_ignore_ascii_case(".md") {
        &name[..len - 3]
    } else {
        name
    }
}

/// Which regions of a document are not scanned for links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExclusionRules {
    /// Skip a `---` metadata block that opens on the first line
    pub skip_frontmatter: bool,
    /// Skip ``` and ~~~ fenced code blocks
    pub skip_code_blocks: bool,
}

impl Default for ExclusionRules {
    fn default() -> Self {
        Self {
            skip_frontmatter: true,
            skip_code_blocks: true,
        }
    }
}

/// Mark which lines are inside frontmatter or fenced code.
///
/// Frontmatter only counts when `---` is the very first line; both frontmatter
/// and fences left open run to the end of the document. Delimiter lines are
/// excluded along with their contents.
pub fn excluded_lines(lines: &[&str], rules: ExclusionRules) -> Vec<bool> {
    let mut excluded = vec![false; lines.len()];
    let mut i = 0;

    if rules.skip_frontmatter && lines.first().map(|l| l.trim_end() == "---").unwrap_or(false) {
        excluded[0] = true;
        i = 1;
        while i < lines.len() {
            excluded[i] = true;
            let line = lines[i].trim_end();
            i += 1;
            if line == "---" || line == "..." {
                break;
            }
        }
    }

    if !rules.skip_code_blocks {
        return excluded;
    }

    let mut open_fence: Option<(char, usize)> = None;
    while i < lines.len() {
        let trimmed = lines[i].trim_start();
        match open_fence {
            None => {
                if let Some(fence) = fence_marker(trimmed) {
                    open_fence = Some(fence);
                    excluded[i] = true;
                }
            }
            Some((ch, len)) => {
                excluded[i] = true;
                if let Some((close_ch, close_len)) = fence_marker(trimmed) {
                    let rest = trimmed.trim_start_matches(close_ch);
                    if close_ch == ch && close_len >= len && rest.trim().is_empty() {
                        open_fence = None;
                    }
                }
            }
        }
        i += 1;
    }

    excluded
}

/// Fence character and run length when `line` opens with ``` or ~~~.
fn fence_marker(line: &str) -> Option<(char, usize)> {
    let ch = line.chars().next()?;
    if ch != '`' && ch != '~' {
        return None;
    }
    let len = line.chars().take_while(|c| *c == ch).count();
    if len >= 3 {
        Some((ch, len))
    } else {
        None
    }
}

/// Split text into lines with the byte offset where each starts.
/// Line terminators (`\n` and a preceding `\r`) are not part of the line.
pub fn lines_with_offsets(text: &str) -> Vec<(usize, &str)> {
    let mut lines = Vec::new();
    let mut offset = 0;
    for raw in text.split_inclusive('\n') {
        let line = raw
            .strip_suffix('\n')
            .map(|l| l.strip_suffix('\r').unwrap_or(l))
            .unwrap_or(raw);
        lines.push((offset, line));
        offset += raw.len();
    }
    lines
}

/// Extract wikilink targets from markdown text, skipping frontmatter and code.
/// Returns target names only (anchors and aliases stripped).
pub fn extract_wikilinks(markdown: &str) -> Vec<String> {
    let lines = lines_with_offsets(markdown);
    let texts: Vec<&str> = lines.iter().map(|(_, l)| *l).collect();
    let excluded = excluded_lines(&texts, ExclusionRules::default());

    texts
        .iter()
        .zip(excluded)
        .filter(|(_, skip)| !skip)
        .flat_map(|(line, _)| parse_wikilinks(line))
        .map(|link| link.target)
        .collect()
}

/// How a link named the note it matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchForm {
    /// Full vault-relative name, `[[Projects/Trip Report]]`
    Full,
    /// Base name only, `[[Trip Report]]`
    Base,
}

/// Decides whether a link target refers to a given note name.
#[derive(Debug, Clone)]
pub struct TargetMatcher {
    full: String,
    base: String,
    case_sensitive: bool,
}

impl TargetMatcher {
    pub fn new(name: &str, case_sensitive: bool) -> Self {
        let full = strip_md_extension(name.trim().trim_start_matches('/')).to_string();
        let base = full.rsplit('/').next().unwrap_or(&full).to_string();
        Self {
            full: fold(&full, case_sensitive),
            base: fold(&base, case_sensitive),
            case_sensitive,
        }
    }

    pub fn matches(&self, link_target: &str) -> Option<MatchForm> {
        let candidate = fold(link_target.trim().trim_start_matches('/'), self.case_sensitive);
        if candidate == self.full {
            Some(MatchForm::Full)
        } else if candidate == self.base {
            Some(MatchForm::Base)
        } else {
            None
        }
    }
}

fn fold(s: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        s.to_string()
    } else {
        s.to_lowercase()
    }
}

/// A text edit: replace `remove_len` bytes at `offset` with `insert_text`.
#[derive(Debug, PartialEq, Eq)]
pub struct TextEdit {
    /// Byte offset in source
    pub offset: usize,
    /// Number of bytes to remove
    pub remove_len: usize,
    /// Replacement text
    pub insert_text: String,
}

/// Find every wikilink to `old_name` (case-insensitive) and return edits that
/// rebuild it around `new_name`. Links written with the base name receive the
/// new base name, links written with the full path the new full path.
/// Returns edits in reverse offset order for safe sequential application.
pub fn compute_wikilink_rename_edits(
    markdown: &str,
    old_name: &str,
    new_name: &str,
    rules: ExclusionRules,
) -> Vec<TextEdit> {
    rename_edits_by_form(markdown, old_name, new_name, rules)
        .into_iter()
        .map(|(_, edit)| edit)
        .collect()
}

/// [`compute_wikilink_rename_edits`], with each edit tagged by how the link
/// named the old note.
pub fn rename_edits_by_form(
    markdown: &str,
    old_name: &str,
    new_name: &str,
    rules: ExclusionRules,
) -> Vec<(MatchForm, TextEdit)> {
    let matcher = TargetMatcher::new(old_name, false);
    let new_full = strip_md_extension(new_name.trim().trim_start_matches('/'));
    let new_base = new_full.rsplit('/').next().unwrap_or(new_full);

    let lines = lines_with_offsets(markdown);
    let texts: Vec<&str> = lines.iter().map(|(_, l)| *l).collect();
    let excluded = excluded_lines(&texts, rules);

    let mut edits = Vec::new();
    for ((line_offset, line), skip) in lines.iter().zip(excluded) {
        if skip {
            continue;
        }
        for link in parse_wikilinks(line) {
            let Some(form) = matcher.matches(&link.target) else {
                continue;
            };
            let name = match form {
                MatchForm::Full => new_full,
                MatchForm::Base => new_base,
            };
            let target = if link.has_md_extension() {
                format!("{}.md", name)
            } else {
                name.to_string()
            };
            edits.push((
                form,
                TextEdit {
                    offset: line_offset + link.start,
                    remove_len: link.end - link.start,
                    insert_text: link.render(&target),
                },
            ));
        }
    }

    // Sort in reverse offset order for safe sequential application
    edits.sort_by(|a, b| b.1.offset.cmp(&a.1.offset));
    edits
}

/// Apply edits produced by [`compute_wikilink_rename_edits`] (reverse offset order).
pub fn apply_edits(text: &str, edits: &[TextEdit]) -> String {
    let mut out = text.to_string();
    for edit in edits {
        out.replace_range(edit.offset..edit.offset + edit.remove_len, &edit.insert_text);
    }
    out
}
