//! Context aggregator — assembles the pack from its canonical sources.
//!
//! Section layout, in configured order:
//!
//! ```text
//! ## Monthly Plan
//! <!-- Source: plans/monthly.md -->
//! <file content, trailing whitespace trimmed>
//! ```
//!
//! Inline sections keep their body from the previous pack. Combined sections
//! concatenate their parts under `###` subheadings, separated by `---`.
//! Assembly itself is pure; [`collect_sources`] is the only part that
//! touches the store.

use std::collections::BTreeMap;

use ctxpack_core::error::Result;
use ctxpack_core::pack::{
    INLINE_PLACEHOLDER, PackLayout, Provenance, SectionSource, SectionSpec, is_placeholder,
    missing_file_placeholder,
};
use ctxpack_core::path::PathRules;
use ctxpack_core::store::RemoteStore;
use ctxpack_tools::{find_section, heading_level, join_lines, sections_at_level, split_lines};
use tracing::{debug, warn};

const PART_SEPARATOR: &str = "\n\n---\n\n";

/// Source file contents keyed by root-relative path; `None` when absent.
pub type Sources = BTreeMap<String, Option<String>>;

/// An assembled, unstamped pack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembled {
    pub body: String,
    /// Root-relative source paths that do not exist yet
    pub missing: Vec<String>,
}

/// Every source path the layout reads, root-relative.
pub fn source_paths(layout: &PackLayout) -> Vec<&str> {
    let mut paths = Vec::new();
    for section in &layout.sections {
        match &section.source {
            SectionSource::File { path } => paths.push(path.as_str()),
            SectionSource::Inline => {}
            SectionSource::Combined { parts, .. } => {
                paths.extend(parts.iter().map(|p| p.path.as_str()))
            }
        }
    }
    paths
}

/// Read every source file the layout needs.
pub async fn collect_sources(
    store: &dyn RemoteStore,
    layout: &PackLayout,
    rules: &PathRules,
) -> Result<Sources> {
    let mut sources = Sources::new();
    for path in source_paths(layout) {
        if sources.contains_key(path) {
            continue;
        }
        let file = store.read_file(&rules.resolve(path)).await?;
        debug!(path, found = file.is_some(), "Read pack source");
        if let Some(f) = &file
            && f.content.lines().any(|l| heading_level(l).is_some_and(|lv| lv <= 2))
        {
            warn!(path, "Pack source has a level 1-2 heading; it will split the pack on decompose");
        }
        sources.insert(path.to_string(), file.map(|f| f.content));
    }
    Ok(sources)
}

/// Assemble the pack body (no stamp) from sources and the previous pack.
pub fn assemble(layout: &PackLayout, sources: &Sources, previous: Option<&str>) -> Assembled {
    let mut missing = Vec::new();
    let mut rendered = Vec::with_capacity(layout.sections.len());

    for section in &layout.sections {
        let body = match &section.source {
            SectionSource::File { path } => source_body(sources, path, &mut missing),
            SectionSource::Inline => inline_body(previous, &section.heading),
            SectionSource::Combined { parts, .. } => parts
                .iter()
                .map(|part| {
                    format!(
                        "{}\n{}",
                        part.heading.trim_end(),
                        source_body(sources, &part.path, &mut missing)
                    )
                })
                .collect::<Vec<_>>()
                .join(PART_SEPARATOR),
        };
        rendered.push(render_section(section, &body));
    }

    let mut body = format!("{}\n\n", layout.title.trim_end());
    body.push_str(&rendered.join("\n"));
    Assembled { body, missing }
}

fn render_section(section: &SectionSpec, body: &str) -> String {
    let marker = section.provenance().marker();
    if body.is_empty() {
        format!("{}\n{marker}\n", section.heading.trim_end())
    } else {
        format!("{}\n{marker}\n{body}\n", section.heading.trim_end())
    }
}

fn source_body(sources: &Sources, path: &str, missing: &mut Vec<String>) -> String {
    match sources.get(path) {
        Some(Some(content)) => content.trim_end().to_string(),
        _ => {
            if !missing.iter().any(|m| m == path) {
                missing.push(path.to_string());
            }
            missing_file_placeholder(path)
        }
    }
}

/// Body of an inline section in the previous pack, without its marker and
/// trailing blank lines.
fn inline_body(previous: Option<&str>, heading: &str) -> String {
    let Some(previous) = previous else {
        return INLINE_PLACEHOLDER.to_string();
    };
    let (lines, _) = split_lines(previous);
    let Some(section) = find_section(&lines, heading) else {
        return INLINE_PLACEHOLDER.to_string();
    };

    let mut body: Vec<&str> = lines[section.body()].to_vec();
    if let Some(first) = body.iter().position(|l| !l.trim().is_empty())
        && Provenance::parse(body[first]) == Some(Provenance::Inline)
    {
        body.drain(..=first);
    }
    body.retain(|l| !is_placeholder(l));
    while body.first().is_some_and(|l| l.trim().is_empty()) {
        body.remove(0);
    }
    while body.last().is_some_and(|l| l.trim().is_empty()) {
        body.pop();
    }

    if body.is_empty() {
        INLINE_PLACEHOLDER.to_string()
    } else {
        body.join("\n")
    }
}

/// Drop placeholder lines from file and inline sections that have gained
/// real content, e.g. after a capture was appended under one.
///
/// Combined sections keep theirs: a missing part stays visible next to the
/// parts that exist.
pub fn drop_filled_placeholders(pack: &str) -> String {
    let (lines, trailing) = split_lines(pack);
    let mut stale = Vec::new();

    for section in sections_at_level(&lines, 2) {
        let body = section.body();
        let mut content = lines[body.clone()]
            .iter()
            .filter(|l| !l.trim().is_empty());
        if content
            .clone()
            .next()
            .and_then(|l| Provenance::parse(l))
            .is_some_and(|p| matches!(p, Provenance::Combined(_)))
        {
            continue;
        }
        let filled = content.any(|l| !is_placeholder(l) && Provenance::parse(l).is_none());
        if filled {
            stale.extend(body.filter(|&i| is_placeholder(lines[i])));
        }
    }

    if stale.is_empty() {
        return pack.to_string();
    }
    let kept: Vec<&str> = lines
        .iter()
        .enumerate()
        .filter(|(i, _)| !stale.contains(i))
        .map(|(_, l)| *l)
        .collect();
    join_lines(&kept, trailing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxpack_core::pack::{CombinedPart, INLINE_MARKER};
    use ctxpack_store::InMemoryStore;

    fn layout() -> PackLayout {
        PackLayout {
            title: "# Context Pack".into(),
            pack_path: "context_pack.md".into(),
            sections: vec![
                SectionSpec {
                    heading: "## Identity".into(),
                    source: SectionSource::Combined {
                        glob: "identity/*.md".into(),
                        parts: vec![
                            CombinedPart {
                                heading: "### Mission".into(),
                                path: "identity/mission.md".into(),
                            },
                            CombinedPart {
                                heading: "### Roles".into(),
                                path: "identity/roles.md".into(),
                            },
                        ],
                    },
                },
                SectionSpec::file("## Weekly Plan", "plans/weekly.md"),
                SectionSpec::inline("## Captures"),
            ],
        }
    }

    fn sources(entries: &[(&str, Option<&str>)]) -> Sources {
        entries
            .iter()
            .map(|(p, c)| (p.to_string(), c.map(str::to_string)))
            .collect()
    }

    #[test]
    fn assembles_all_section_kinds() {
        let sources = sources(&[
            ("identity/mission.md", Some("Build calm tools.\n")),
            ("identity/roles.md", Some("- Engineer\n")),
            ("plans/weekly.md", Some("- ship v1\n\n")),
        ]);
        let assembled = assemble(&layout(), &sources, None);
        assert_eq!(
            assembled.body,
            "# Context Pack\n\n\
             ## Identity\n<!-- Source: identity/*.md (combined) -->\n\
             ### Mission\nBuild calm tools.\n\n---\n\n### Roles\n- Engineer\n\n\
             ## Weekly Plan\n<!-- Source: plans/weekly.md -->\n- ship v1\n\n\
             ## Captures\n<!-- Managed inline - preserved during rebuild -->\n_(nothing here yet)_\n"
        );
        assert!(assembled.missing.is_empty());
    }

    #[test]
    fn missing_sources_get_placeholders() {
        let assembled = assemble(&layout(), &Sources::new(), None);
        assert!(
            assembled
                .body
                .contains("_(empty: plans/weekly.md does not exist yet)_")
        );
        assert_eq!(
            assembled.missing,
            vec!["identity/mission.md", "identity/roles.md", "plans/weekly.md"]
        );
    }

    #[test]
    fn inline_sections_carry_forward_verbatim() {
        let previous = format!(
            "# Context Pack\n\n## Captures\n{INLINE_MARKER}\n- 09:00 | one\n  detail\n\n- 10:00 | two\n\n\n"
        );
        let assembled = assemble(&layout(), &Sources::new(), Some(&previous));
        assert!(assembled.body.ends_with(&format!(
            "## Captures\n{INLINE_MARKER}\n- 09:00 | one\n  detail\n\n- 10:00 | two\n"
        )));
    }

    #[test]
    fn inline_placeholder_is_not_carried_forward() {
        let previous =
            format!("## Captures\n{INLINE_MARKER}\n_(nothing here yet)_\n- 10:00 | cap\n");
        let assembled = assemble(&layout(), &Sources::new(), Some(&previous));
        assert!(
            assembled
                .body
                .ends_with(&format!("## Captures\n{INLINE_MARKER}\n- 10:00 | cap\n"))
        );
    }

    #[test]
    fn filled_sections_lose_their_placeholders() {
        let pack = format!(
            "# Context Pack\n\n\
             ## Identity\n<!-- Source: identity/*.md (combined) -->\n\
             ### Mission\nCalm.\n\n---\n\n### Roles\n_(empty: identity/roles.md does not exist yet)_\n\n\
             ## Daily Stream\n<!-- Source: stream/daily.md -->\n\
             _(empty: stream/daily.md does not exist yet)_\n- 10:00 | note\n\n\
             ## Weekly Plan\n<!-- Source: plans/weekly.md -->\n\
             _(empty: plans/weekly.md does not exist yet)_\n\n\
             ## Captures\n{INLINE_MARKER}\n_(nothing here yet)_\n- 10:00 | cap\n"
        );
        let cleaned = drop_filled_placeholders(&pack);
        assert!(
            cleaned.contains("## Daily Stream\n<!-- Source: stream/daily.md -->\n- 10:00 | note\n")
        );
        assert!(cleaned.contains(&format!("## Captures\n{INLINE_MARKER}\n- 10:00 | cap\n")));
        // Untouched placeholders stay
        assert!(cleaned.contains("_(empty: plans/weekly.md does not exist yet)_"));
        assert!(cleaned.contains("_(empty: identity/roles.md does not exist yet)_"));
        assert_eq!(drop_filled_placeholders(&cleaned), cleaned);
    }

    #[test]
    fn inline_section_without_marker_gains_one() {
        let previous = "## Captures\n- note\n";
        let assembled = assemble(&layout(), &Sources::new(), Some(previous));
        assert!(
            assembled
                .body
                .ends_with(&format!("## Captures\n{INLINE_MARKER}\n- note\n"))
        );
    }

    #[test]
    fn assembly_is_idempotent_over_inline_sections() {
        let sources = sources(&[("plans/weekly.md", Some("- a\n"))]);
        let first = assemble(&layout(), &sources, Some("## Captures\n- kept\n"));
        let second = assemble(&layout(), &sources, Some(&first.body));
        assert_eq!(first.body, second.body);
    }

    #[tokio::test]
    async fn collects_sources_under_document_root() {
        let store = InMemoryStore::with_files([
            ("data/plans/weekly.md", "- a\n"),
            ("data/identity/mission.md", "m\n"),
        ]);
        let sources = collect_sources(&store, &layout(), &PathRules::default())
            .await
            .unwrap();
        assert_eq!(sources["plans/weekly.md"].as_deref(), Some("- a\n"));
        assert_eq!(sources["identity/mission.md"].as_deref(), Some("m\n"));
        assert_eq!(sources["identity/roles.md"], None);
    }
}
