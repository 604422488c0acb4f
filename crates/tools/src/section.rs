//! Section location by heading.

pub use ctxpack_core::pack::{MAX_LEVEL, heading_level};

/// A contiguous line range of a document: `[start, heading_end, end)`.
///
/// `start` is the heading line, `heading_end` the first body line and `end`
/// the first line after the section (the next heading at the same or a
/// shallower level, or the line count).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub start: usize,
    pub heading_end: usize,
    pub end: usize,
    pub level: usize,
}

impl Section {
    /// Body line indices (everything after the heading).
    pub fn body(&self) -> std::ops::Range<usize> {
        self.heading_end..self.end
    }
}

/// Find the first section whose heading line equals `heading`.
///
/// Trailing whitespace is ignored on both sides. The first occurrence wins,
/// even when a later heading has identical text. A target that is not itself
/// a heading is treated as deeper than any heading, so the next heading of
/// any level ends it.
pub fn find_section<S: AsRef<str>>(lines: &[S], heading: &str) -> Option<Section> {
    let target = heading.trim_end();
    let level = heading_level(target).unwrap_or(MAX_LEVEL + 1);

    let start = lines.iter().position(|l| l.as_ref().trim_end() == target)?;
    let end = lines[start + 1..]
        .iter()
        .position(|l| heading_level(l.as_ref()).is_some_and(|lv| lv <= level))
        .map(|offset| start + 1 + offset)
        .unwrap_or(lines.len());

    Some(Section {
        start,
        heading_end: start + 1,
        end,
        level,
    })
}

/// Every section whose heading is exactly `level`, in document order.
///
/// Each section still ends at the next heading of level ≤ `level`, so a
/// shallower heading closes the current section without starting a new one.
pub fn sections_at_level<S: AsRef<str>>(lines: &[S], level: usize) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut open: Option<usize> = None;

    for (i, line) in lines.iter().enumerate() {
        let Some(lv) = heading_level(line.as_ref()) else {
            continue;
        };
        if lv > level {
            continue;
        }
        if let Some(start) = open.take() {
            sections.push(Section {
                start,
                heading_end: start + 1,
                end: i,
                level,
            });
        }
        if lv == level {
            open = Some(i);
        }
    }
    if let Some(start) = open {
        sections.push(Section {
            start,
            heading_end: start + 1,
            end: lines.len(),
            level,
        });
    }
    sections
}

/// Split a document into lines, remembering whether it ended with `\n`.
///
/// Unlike `str::lines`, carriage returns are kept, so joining back is
/// byte-exact.
pub fn split_lines(document: &str) -> (Vec<&str>, bool) {
    if document.is_empty() {
        return (Vec::new(), false);
    }
    let trailing = document.ends_with('\n');
    let body = if trailing {
        &document[..document.len() - 1]
    } else {
        document
    };
    (body.split('\n').collect(), trailing)
}

/// Inverse of [`split_lines`].
pub fn join_lines<S: AsRef<str>>(lines: &[S], trailing_newline: bool) -> String {
    let mut out = String::new();
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(line.as_ref());
    }
    if trailing_newline && !lines.is_empty() {
        out.push('\n');
    }
    out
}
