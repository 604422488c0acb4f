//! Context pack vocabulary — version stamps, provenance markers and layout.
//!
//! The pack is a single markdown document:
//!
//! ```text
//! # Context Pack
//! <!-- context_pack_version: 3f9a0c1d2e4b source_ref: 9c1e... direction: build -->
//!
//! ## Monthly Plan
//! <!-- Source: plans/monthly.md -->
//! ...
//! ```
//!
//! Every top-level (`##`) section may open with a provenance marker that says
//! where its content canonically lives. The stamp hash is always computed
//! over the pack with every stamp line removed, so it never hashes itself.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Leading text of every version stamp line.
pub const STAMP_PREFIX: &str = "<!-- context_pack_version:";

/// Marker for sections that live only inside the pack.
pub const INLINE_MARKER: &str = "<!-- Managed inline - preserved during rebuild -->";

/// Body used for inline sections when no previous pack exists.
pub const INLINE_PLACEHOLDER: &str = "_(nothing here yet)_";

/// Length of the hex-encoded content hash.
pub const HASH_LEN: usize = 12;

/// Deepest markdown heading level.
pub const MAX_LEVEL: usize = 6;

/// Level of a markdown heading line, or `None` for non-heading lines.
///
/// `## Plans` → 2; `#hashtag` and `####### x` are not headings.
pub fn heading_level(line: &str) -> Option<usize> {
    let hashes = line.bytes().take_while(|b| *b == b'#').count();
    if hashes == 0 || hashes > MAX_LEVEL {
        return None;
    }
    match line.as_bytes().get(hashes) {
        None | Some(b' ') | Some(b'\t') => Some(hashes),
        Some(b'\r') if line.len() == hashes + 1 => Some(hashes),
        _ => None,
    }
}

/// Placeholder body for a file-sourced section whose file is absent.
pub fn missing_file_placeholder(path: &str) -> String {
    format!("_(empty: {path} does not exist yet)_")
}

/// Whether `line` is one of the generated placeholder bodies.
pub fn is_placeholder(line: &str) -> bool {
    let line = line.trim();
    line == INLINE_PLACEHOLDER
        || line
            .strip_prefix("_(empty: ")
            .is_some_and(|rest| rest.ends_with(" does not exist yet)_"))
}

// ── Direction ─────────────────────────────────────────────────────────────

/// Which side of the sync last produced the pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Regenerated from the canonical sources.
    Build,
    /// Edited directly; sources should be re-derived from it.
    Decompose,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Decompose => "decompose",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "build" => Some(Self::Build),
            "decompose" => Some(Self::Decompose),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Version stamp ─────────────────────────────────────────────────────────

/// Metadata embedded in the pack right after its title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionStamp {
    pub content_hash: String,
    pub source_ref: String,
    pub direction: Direction,
}

impl VersionStamp {
    /// Render as the single stamp line (no trailing newline).
    pub fn to_line(&self) -> String {
        format!(
            "{STAMP_PREFIX} {} source_ref: {} direction: {} -->",
            self.content_hash, self.source_ref, self.direction
        )
    }

    /// Parse one stamp line. Returns `None` for anything malformed.
    pub fn parse_line(line: &str) -> Option<Self> {
        let inner = line
            .trim()
            .strip_prefix(STAMP_PREFIX)?
            .strip_suffix("-->")?
            .trim();
        let (hash, rest) = inner.split_once(" source_ref: ")?;
        let (source_ref, direction) = rest.split_once(" direction: ")?;
        Some(Self {
            content_hash: hash.trim().to_string(),
            source_ref: source_ref.trim().to_string(),
            direction: Direction::parse(direction.trim())?,
        })
    }

    /// The first stamp found in `pack`, if any.
    pub fn find(pack: &str) -> Option<Self> {
        pack.lines()
            .filter(|l| is_stamp_line(l))
            .find_map(Self::parse_line)
    }

    /// Hash of stamp-free pack content.
    pub fn hash(stamp_free: &str) -> String {
        let mut h = Sha256::new();
        h.update(stamp_free.as_bytes());
        let mut digest = hex::encode(h.finalize());
        digest.truncate(HASH_LEN);
        digest
    }

    /// Strip any prior stamp, hash the remainder and insert a fresh stamp.
    ///
    /// Returns the stamped pack and the stamp that was embedded.
    pub fn apply(pack: &str, source_ref: &str, direction: Direction) -> (String, Self) {
        let mut body = strip_stamp(pack);
        if !body.is_empty() && !body.ends_with('\n') {
            body.push('\n');
        }
        let stamp = Self {
            content_hash: Self::hash(&body),
            source_ref: source_ref.to_string(),
            direction,
        };
        (insert_stamp_line(&body, &stamp.to_line()), stamp)
    }

    /// Whether the embedded stamp matches the pack's current content.
    pub fn verify(pack: &str) -> bool {
        Self::find(pack).is_some_and(|s| s.content_hash == Self::hash(&strip_stamp(pack)))
    }
}

fn is_stamp_line(line: &str) -> bool {
    line.trim_start().starts_with(STAMP_PREFIX)
}

/// Remove every stamp line, leaving all other bytes untouched.
pub fn strip_stamp(pack: &str) -> String {
    pack.split_inclusive('\n')
        .filter(|l| !is_stamp_line(l))
        .collect()
}

/// Insert `line` after a leading `# ` title, or at the very top.
fn insert_stamp_line(body: &str, line: &str) -> String {
    let mut out = String::with_capacity(body.len() + line.len() + 1);
    match body.split_inclusive('\n').next() {
        Some(first) if first.starts_with("# ") => {
            out.push_str(first);
            out.push_str(line);
            out.push('\n');
            out.push_str(&body[first.len()..]);
        }
        _ => {
            out.push_str(line);
            out.push('\n');
            out.push_str(body);
        }
    }
    out
}

// ── Provenance ────────────────────────────────────────────────────────────

/// Where a pack section's content canonically lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    /// A single canonical file, relative to the document root.
    File(String),
    /// Lives only in the pack.
    Inline,
    /// A combined view of several files; never decomposed.
    Combined(String),
}

impl Provenance {
    /// Render as the marker line (no trailing newline).
    pub fn marker(&self) -> String {
        match self {
            Self::File(path) => format!("<!-- Source: {path} -->"),
            Self::Inline => INLINE_MARKER.to_string(),
            Self::Combined(glob) => format!("<!-- Source: {glob} (combined) -->"),
        }
    }

    /// Parse a marker line. A `Source:` marker naming a glob counts as combined.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line == INLINE_MARKER {
            return Some(Self::Inline);
        }
        let inner = line
            .strip_prefix("<!-- Source:")?
            .strip_suffix("-->")?
            .trim();
        if let Some(glob) = inner.strip_suffix("(combined)") {
            return Some(Self::Combined(glob.trim().to_string()));
        }
        if inner.is_empty() {
            return None;
        }
        if inner.contains(['*', '?', '[']) {
            return Some(Self::Combined(inner.to_string()));
        }
        Some(Self::File(inner.to_string()))
    }

    /// Only concrete file sections are written back by decompose.
    pub fn decompose_target(&self) -> Option<&str> {
        match self {
            Self::File(path) => Some(path),
            Self::Inline | Self::Combined(_) => None,
        }
    }
}

// ── Layout ────────────────────────────────────────────────────────────────

/// One part of a combined section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinedPart {
    /// Subheading the part is placed under, e.g. `### Mission`
    pub heading: String,
    /// Source path relative to the document root
    pub path: String,
}

/// Where a layout section gets its content from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SectionSource {
    File { path: String },
    Inline,
    Combined { glob: String, parts: Vec<CombinedPart> },
}

/// A named pack section and its source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionSpec {
    /// Full heading line, e.g. `## Monthly Plan`
    pub heading: String,
    #[serde(flatten)]
    pub source: SectionSource,
}

impl SectionSpec {
    pub fn file(heading: &str, path: &str) -> Self {
        Self {
            heading: heading.into(),
            source: SectionSource::File { path: path.into() },
        }
    }

    pub fn inline(heading: &str) -> Self {
        Self {
            heading: heading.into(),
            source: SectionSource::Inline,
        }
    }

    pub fn provenance(&self) -> Provenance {
        match &self.source {
            SectionSource::File { path } => Provenance::File(path.clone()),
            SectionSource::Inline => Provenance::Inline,
            SectionSource::Combined { glob, .. } => Provenance::Combined(glob.clone()),
        }
    }
}

/// The fixed, ordered list of sections the pack is assembled from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackLayout {
    /// Title line, e.g. `# Context Pack`
    pub title: String,
    /// Pack location relative to the document root
    pub pack_path: String,
    pub sections: Vec<SectionSpec>,
}

impl Default for PackLayout {
    fn default() -> Self {
        Self {
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
                            CombinedPart {
                                heading: "### Values".into(),
                                path: "identity/values.md".into(),
                            },
                        ],
                    },
                },
                SectionSpec::file("## Monthly Plan", "plans/monthly.md"),
                SectionSpec::file("## Weekly Plan", "plans/weekly.md"),
                SectionSpec::file("## Projects", "projects/index.md"),
                SectionSpec::file("## Daily Stream", "stream/daily.md"),
                SectionSpec::file("## Learned Context", "memory/learned.md"),
                SectionSpec::inline("## Open Loops"),
                SectionSpec::inline("## Captures"),
            ],
        }
    }
}

impl PackLayout {
    pub fn inline_sections(&self) -> impl Iterator<Item = &SectionSpec> {
        self.sections
            .iter()
            .filter(|s| matches!(s.source, SectionSource::Inline))
    }
}
