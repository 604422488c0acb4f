//! Patch operations.
//!
//! Every operation is `(document, target, payload) -> Result<String, PatchError>`.
//! The output ends with a newline iff the input did; a freshly created
//! section always ends with one.

use ctxpack_core::error::PatchError;
use ctxpack_core::intent::{Edit, PatchOp};

use crate::section::{find_section, join_lines, split_lines};

/// Apply one typed patch operation.
pub fn apply_patch(document: &str, op: &PatchOp) -> Result<String, PatchError> {
    match op {
        PatchOp::Append { heading, content } => Ok(append(document, heading, content)),
        PatchOp::Prepend { heading, content } => Ok(prepend(document, heading, content)),
        PatchOp::Replace { heading, content } => replace(document, heading, content),
        PatchOp::MarkComplete { item } => mark_complete(document, item),
        PatchOp::RemoveItem { item } => remove_item(document, item),
    }
}

/// Resolve an edit against the current working content of a file.
///
/// `put` ignores the current content; patches start from it (or from an
/// empty document when the file does not exist).
pub fn apply_edit(current: Option<&str>, edit: &Edit) -> Result<String, PatchError> {
    match edit {
        Edit::Put { content } => Ok(content.clone()),
        Edit::Patch(op) => apply_patch(current.unwrap_or(""), op),
    }
}

/// Insert `content` after the last non-blank line of the section body.
///
/// Creates the section at the end of the document (or as the whole document
/// when it is blank) if the heading is absent.
pub fn append(document: &str, heading: &str, content: &str) -> String {
    let (mut lines, trailing) = split_lines(document);
    let Some(section) = find_section(&lines, heading) else {
        return create_section(&lines, heading, content);
    };

    let insert_at = section
        .body()
        .rev()
        .find(|&i| !lines[i].trim().is_empty())
        .map(|i| i + 1)
        .unwrap_or(section.heading_end);

    lines.splice(insert_at..insert_at, content_lines(content));
    join_lines(&lines, trailing)
}

/// Insert `content` immediately after the heading line.
///
/// Same creation rule as [`append`] when the heading is absent.
pub fn prepend(document: &str, heading: &str, content: &str) -> String {
    let (mut lines, trailing) = split_lines(document);
    let Some(section) = find_section(&lines, heading) else {
        return create_section(&lines, heading, content);
    };

    let at = section.heading_end;
    lines.splice(at..at, content_lines(content));
    join_lines(&lines, trailing)
}

/// Replace the whole section body, leaving the heading line untouched.
///
/// When another heading follows, one blank separator line is kept before it.
pub fn replace(document: &str, heading: &str, content: &str) -> Result<String, PatchError> {
    let (mut lines, trailing) = split_lines(document);
    let section = find_section(&lines, heading).ok_or_else(|| PatchError::SectionNotFound {
        heading: heading.to_string(),
    })?;

    let mut body = content_lines(content);
    let followed = section.end < lines.len();
    if followed && body.last().is_some_and(|l| !l.trim().is_empty()) {
        body.push("");
    }
    lines.splice(section.body(), body);
    Ok(join_lines(&lines, trailing))
}

/// Flip the first list item whose text equals `item` from `[ ]` to `[x]`.
///
/// Bullet and checkbox syntax are stripped before comparing. A matching item
/// that is already complete is left as is.
pub fn mark_complete(document: &str, item: &str) -> Result<String, PatchError> {
    let (mut lines, trailing) = split_lines(document);
    let want = item.trim();

    let (index, parsed) = lines
        .iter()
        .enumerate()
        .map(|(i, l)| (i, ListLine::parse(*l)))
        .find(|(_, p)| p.text == want)
        .ok_or_else(|| PatchError::ItemNotFound {
            item: item.to_string(),
        })?;

    let Some(at) = parsed.open_checkbox else {
        tracing::debug!(item = want, "Item already complete or has no checkbox");
        return Ok(document.to_string());
    };

    let line = lines[index];
    let flipped = format!("{}[x]{}", &line[..at], &line[at + 3..]);
    lines[index] = &flipped;
    Ok(join_lines(&lines, trailing))
}

/// Delete the first line equal to `item` (trailing whitespace ignored).
pub fn remove_item(document: &str, item: &str) -> Result<String, PatchError> {
    let (mut lines, trailing) = split_lines(document);
    let want = item.trim_end();
    let index = lines
        .iter()
        .position(|l| l.trim_end() == want)
        .ok_or_else(|| PatchError::ItemNotFound {
            item: item.to_string(),
        })?;
    lines.remove(index);
    Ok(join_lines(&lines, trailing))
}

// ── helpers ───────────────────────────────────────────────────────────────

fn content_lines(content: &str) -> Vec<&str> {
    let trimmed = content.trim_end_matches(['\n', '\r']);
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed.split('\n').collect()
}

fn create_section(lines: &[&str], heading: &str, content: &str) -> String {
    let mut out: Vec<&str> = Vec::with_capacity(lines.len() + 4);
    if lines.iter().any(|l| !l.trim().is_empty()) {
        out.extend_from_slice(lines);
        if out.last().is_some_and(|l| !l.trim().is_empty()) {
            out.push("");
        }
    }
    out.push(heading.trim_end());
    out.extend(content_lines(content));
    join_lines(&out, true)
}

/// A line viewed as a (possibly checkbox) list item.
struct ListLine<'a> {
    /// Item text with bullet and checkbox stripped, trimmed.
    text: &'a str,
    /// Byte offset of an unchecked `[ ]` marker.
    open_checkbox: Option<usize>,
}

impl<'a> ListLine<'a> {
    fn parse(line: &'a str) -> Self {
        let indent = line.len() - line.trim_start().len();
        let mut rest = &line[indent..];
        let mut offset = indent;

        if let Some(after) = strip_bullet(rest) {
            offset += rest.len() - after.len();
            rest = after;
        }

        let mut open_checkbox = None;
        for (marker, open) in [("[ ]", true), ("[x]", false), ("[X]", false)] {
            if let Some(after) = rest.strip_prefix(marker)
                && (after.is_empty() || after.starts_with([' ', '\t']))
            {
                if open {
                    open_checkbox = Some(offset);
                }
                rest = after;
                break;
            }
        }

        Self {
            text: rest.trim(),
            open_checkbox,
        }
    }
}

/// Strip `- `, `* `, `+ ` or `1. ` / `1) ` from the front of `s`.
fn strip_bullet(s: &str) -> Option<&str> {
    for bullet in ["- ", "* ", "+ "] {
        if let Some(rest) = s.strip_prefix(bullet) {
            return Some(rest.trim_start());
        }
    }
    let digits = s.bytes().take_while(u8::is_ascii_digit).count();
    if digits > 0 {
        let rest = &s[digits..];
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return Some(rest.trim_start());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "# Inbox\n\n## Open Loops\n- [ ] Buy milk\n- [ ] Call mom\n\n## Captures\n- 09:00 | first\n\n## Notes\ntext\n";

    #[test]
    fn mark_complete_scenario() {
        let out = mark_complete("## Open Loops\n- [ ] Buy milk\n", "Buy milk").unwrap();
        assert_eq!(out, "## Open Loops\n- [x] Buy milk\n");
    }

    #[test]
    fn append_to_empty_document_scenario() {
        let out = append("", "## Captures", "- 10:00 | note");
        assert_eq!(out, "## Captures\n- 10:00 | note\n");
    }

    #[test]
    fn append_after_last_non_blank_line() {
        let out = append(DOC, "## Captures", "- 10:00 | second");
        assert!(out.contains("- 09:00 | first\n- 10:00 | second\n\n## Notes"));
    }

    #[test]
    fn append_keeps_missing_trailing_newline() {
        let out = append("## A\nx", "## A", "y");
        assert_eq!(out, "## A\nx\ny");
    }

    #[test]
    fn append_keeps_nested_subsections_inside() {
        let doc = "## A\n### A.1\nx\n## B\n";
        let out = append(doc, "## A", "- new");
        assert_eq!(out, "## A\n### A.1\nx\n- new\n## B\n");
    }

    #[test]
    fn append_creates_missing_section_at_end() {
        let out = append("# Inbox\ntext\n", "## Captures", "- a");
        assert_eq!(out, "# Inbox\ntext\n\n## Captures\n- a\n");
    }

    #[test]
    fn append_twice_equals_single_pass() {
        let one = append(&append(DOC, "## Captures", "- a"), "## Captures", "- b");
        let both = append(DOC, "## Captures", "- a\n- b");
        assert_eq!(one, both);
    }

    #[test]
    fn append_multiline_content() {
        let out = append("## A\n", "## A", "- x\n  more\n");
        assert_eq!(out, "## A\n- x\n  more\n");
    }

    #[test]
    fn prepend_inserts_after_heading() {
        let out = prepend(DOC, "## Captures", "- 08:00 | earliest");
        assert!(out.contains("## Captures\n- 08:00 | earliest\n- 09:00 | first\n"));
    }

    #[test]
    fn prepend_creates_missing_section() {
        assert_eq!(prepend("", "## Log", "- x"), "## Log\n- x\n");
    }

    #[test]
    fn replace_keeps_heading_and_outside_bytes() {
        let out = replace(DOC, "## Captures", "- only").unwrap();
        assert_eq!(
            out,
            "# Inbox\n\n## Open Loops\n- [ ] Buy milk\n- [ ] Call mom\n\n## Captures\n- only\n\n## Notes\ntext\n"
        );
    }

    #[test]
    fn replace_preserves_every_byte_outside_section() {
        let (lines, _) = split_lines(DOC);
        let s = find_section(&lines, "## Open Loops").unwrap();
        let before = lines[..s.heading_end].join("\n");
        let after = lines[s.end..].join("\n");

        let out = replace(DOC, "## Open Loops", "- [x] done").unwrap();
        assert!(out.starts_with(&before));
        assert!(out.ends_with(&format!("{after}\n")));
    }

    #[test]
    fn replace_missing_section_errors() {
        let err = replace(DOC, "## Missing", "x").unwrap_err();
        assert_eq!(
            err,
            PatchError::SectionNotFound {
                heading: "## Missing".into()
            }
        );
    }

    #[test]
    fn replace_last_section() {
        let out = replace("## A\nold\nold2\n", "## A", "new").unwrap();
        assert_eq!(out, "## A\nnew\n");
    }

    #[test]
    fn mark_complete_matches_stripped_text_only() {
        let err = mark_complete(DOC, "Buy").unwrap_err();
        assert!(matches!(err, PatchError::ItemNotFound { .. }));
        let out = mark_complete(DOC, "  Call mom ").unwrap();
        assert!(out.contains("- [x] Call mom"));
        assert!(out.contains("- [ ] Buy milk"));
    }

    #[test]
    fn mark_complete_on_complete_item_is_noop() {
        let doc = "- [x] Done thing\n";
        assert_eq!(mark_complete(doc, "Done thing").unwrap(), doc);
    }

    #[test]
    fn mark_complete_handles_numbered_and_star_bullets() {
        let out = mark_complete("1. [ ] first\n* [ ] second\n", "second").unwrap();
        assert_eq!(out, "1. [ ] first\n* [x] second\n");
    }

    #[test]
    fn remove_item_exact_line() {
        let out = remove_item(DOC, "- [ ] Call mom").unwrap();
        assert!(!out.contains("Call mom"));
        assert!(out.contains("- [ ] Buy milk\n\n## Captures"));
    }

    #[test]
    fn remove_item_does_not_strip_bullets() {
        let err = remove_item(DOC, "Call mom").unwrap_err();
        assert_eq!(
            err,
            PatchError::ItemNotFound {
                item: "Call mom".into()
            }
        );
    }

    #[test]
    fn apply_is_deterministic() {
        let op = PatchOp::Append {
            heading: "## Captures".into(),
            content: "- x".into(),
        };
        assert_eq!(apply_patch(DOC, &op).unwrap(), apply_patch(DOC, &op).unwrap());
    }

    #[test]
    fn apply_edit_put_ignores_current() {
        let edit = Edit::Put {
            content: "fresh".into(),
        };
        assert_eq!(apply_edit(Some("old"), &edit).unwrap(), "fresh");
    }

    #[test]
    fn apply_edit_patch_on_missing_file_starts_empty() {
        let edit = Edit::Patch(PatchOp::Append {
            heading: "## Captures".into(),
            content: "- 10:00 | note".into(),
        });
        assert_eq!(
            apply_edit(None, &edit).unwrap(),
            "## Captures\n- 10:00 | note\n"
        );
    }
}
