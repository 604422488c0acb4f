//! Context disaggregator — the inverse of the aggregator.
//!
//! Walks the pack's level-2 sections and turns every section tagged with a
//! concrete `<!-- Source: path -->` marker back into that file's content.
//! Inline and combined sections stay in the pack. Planning is pure; the
//! session validates the targets, commits them and records completion.

use chrono::{DateTime, Utc};
use ctxpack_core::pack::{Provenance, is_placeholder};
use ctxpack_tools::{sections_at_level, split_lines};
use serde::Serialize;

/// One file to write back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionWrite {
    pub heading: String,
    /// Root-relative path from the provenance marker
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    NoMarker,
    Inline,
    Combined,
    Placeholder,
    /// Target path failed validation
    Rejected(String),
    /// Identical to the file in the store
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedSection {
    pub heading: String,
    pub reason: SkipReason,
}

/// What a decompose would write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecomposePlan {
    pub writes: Vec<SectionWrite>,
    pub skipped: Vec<SkippedSection>,
}

/// Split `pack` into per-file writes.
pub fn plan(pack: &str) -> DecomposePlan {
    let (lines, _) = split_lines(pack);
    let mut plan = DecomposePlan::default();

    for section in sections_at_level(&lines, 2) {
        let heading = lines[section.start].trim_end().to_string();
        let body = &lines[section.body()];

        let marker = body
            .iter()
            .position(|l| !l.trim().is_empty())
            .and_then(|i| Provenance::parse(body[i]).map(|p| (i, p)));

        let (index, path) = match marker {
            None => {
                plan.skip(heading, SkipReason::NoMarker);
                continue;
            }
            Some((_, Provenance::Inline)) => {
                plan.skip(heading, SkipReason::Inline);
                continue;
            }
            Some((_, Provenance::Combined(_))) => {
                plan.skip(heading, SkipReason::Combined);
                continue;
            }
            Some((i, Provenance::File(path))) => (i, path),
        };

        // Placeholders are generated text, never part of the file
        let rest = &body[index + 1..];
        let kept: Vec<&str> = rest.iter().copied().filter(|l| !is_placeholder(l)).collect();
        if kept.len() < rest.len() && kept.iter().all(|l| l.trim().is_empty()) {
            plan.skip(heading, SkipReason::Placeholder);
            continue;
        }
        let content = file_content(&kept);
        plan.writes.push(SectionWrite {
            heading,
            path,
            content,
        });
    }
    plan
}

impl DecomposePlan {
    fn skip(&mut self, heading: String, reason: SkipReason) {
        self.skipped.push(SkippedSection { heading, reason });
    }
}

/// Body lines with trailing blank lines dropped and one final newline.
fn file_content(lines: &[&str]) -> String {
    let end = lines
        .iter()
        .rposition(|l| !l.trim().is_empty())
        .map_or(0, |i| i + 1);
    if end == 0 {
        return String::new();
    }
    let mut content = lines[..end].join("\n");
    content.push('\n');
    content
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DecomposeStatus {
    /// Files were written (or all were already current)
    Applied,
    /// A previous run completed for this stamp hash
    AlreadyDone { at: DateTime<Utc> },
    /// The pack was built from sources; nothing to re-derive
    BuiltFromSources,
    /// The pack carries no version stamp
    Unstamped,
}

/// Result of one decompose invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecomposeOutcome {
    pub status: DecomposeStatus,
    pub stamp_hash: Option<String>,
    pub commit_id: Option<String>,
    /// Store paths written
    pub written: Vec<String>,
    pub skipped: Vec<SkippedSection>,
}

impl DecomposeOutcome {
    pub fn nothing(status: DecomposeStatus, stamp_hash: Option<String>) -> Self {
        Self {
            status,
            stamp_hash,
            commit_id: None,
            written: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{Sources, assemble};
    use ctxpack_core::pack::{Direction, PackLayout, VersionStamp};

    #[test]
    fn file_sections_are_extracted() {
        let pack = "# Context Pack\n\
                    <!-- context_pack_version: abc source_ref: c1 direction: decompose -->\n\n\
                    ## Weekly Plan\n<!-- Source: plans/weekly.md -->\n- ship\n- review\n\n\n\
                    ## Captures\n<!-- Managed inline - preserved during rebuild -->\n- note\n";
        let plan = plan(pack);
        assert_eq!(
            plan.writes,
            vec![SectionWrite {
                heading: "## Weekly Plan".into(),
                path: "plans/weekly.md".into(),
                content: "- ship\n- review\n".into(),
            }]
        );
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].reason, SkipReason::Inline);
    }

    #[test]
    fn combined_unmarked_and_placeholder_sections_are_skipped() {
        let pack = "## Identity\n<!-- Source: identity/*.md (combined) -->\n### Mission\nm\n\n\
                    ## Loose\njust text\n\n\
                    ## Projects\n<!-- Source: projects/index.md -->\n_(empty: projects/index.md does not exist yet)_\n";
        let plan = plan(pack);
        assert!(plan.writes.is_empty());
        let reasons: Vec<&SkipReason> = plan.skipped.iter().map(|s| &s.reason).collect();
        assert_eq!(
            reasons,
            vec![
                &SkipReason::Combined,
                &SkipReason::NoMarker,
                &SkipReason::Placeholder
            ]
        );
    }

    #[test]
    fn placeholder_line_is_not_written_back() {
        let pack = "## Daily Stream\n<!-- Source: stream/daily.md -->\n\
                    _(empty: stream/daily.md does not exist yet)_\n- 10:00 | note\n";
        let plan = plan(pack);
        assert_eq!(plan.writes.len(), 1);
        assert_eq!(plan.writes[0].content, "- 10:00 | note\n");
    }

    #[test]
    fn nested_subsections_stay_in_the_file() {
        let pack = "## Projects\n<!-- Source: projects/index.md -->\n### Alpha\n- a\n### Beta\n- b\n";
        let plan = plan(pack);
        assert_eq!(plan.writes[0].content, "### Alpha\n- a\n### Beta\n- b\n");
    }

    #[test]
    fn empty_section_body_is_empty_file() {
        let plan = plan("## Weekly Plan\n<!-- Source: plans/weekly.md -->\n\n");
        assert_eq!(plan.writes[0].content, "");
    }

    #[test]
    fn decompose_inverts_aggregate() {
        let layout = PackLayout::default();
        let sources: Sources = [
            ("plans/monthly.md", "### March\n- [ ] launch\n"),
            ("plans/weekly.md", "\nMonday: write\n  - indented\n"),
            ("projects/index.md", "### Alpha\nstatus: green\n"),
            ("stream/daily.md", "- 09:00 | standup\n"),
            ("memory/learned.md", "- prefers mornings\n"),
        ]
        .into_iter()
        .map(|(p, c)| (p.to_string(), Some(c.to_string())))
        .collect();

        let assembled = assemble(&layout, &sources, None);
        let (pack, _) = VersionStamp::apply(&assembled.body, "c3", Direction::Build);
        let plan = plan(&pack);

        assert_eq!(plan.writes.len(), 5);
        for write in &plan.writes {
            assert_eq!(
                Some(&write.content),
                sources[&write.path].as_ref(),
                "section {}",
                write.heading
            );
        }
    }
}
