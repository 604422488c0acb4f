//! Context pruner — fits a copy of the pack into a size budget.
//!
//! Applies a fixed cascade, re-checking the budget after each step and
//! stopping as soon as the pack fits:
//!
//! 1. **Identity** — keep only the configured subsections (mission, roles)
//! 2. **Learned context** — keep the N most recently appended entries
//! 3. **Daily stream** — keep the last N bullet entries
//! 4. **Monthly plan** — keep heading and list lines, capped
//! 5. **Hard truncate** — cut at a character boundary and append a notice
//!
//! The budget is measured in bytes. Pruning is deterministic and
//! side-effect-free; its output is only ever handed to a consumer, never
//! written back.

use ctxpack_config::PruneConfig;
use ctxpack_tools::{find_section, heading_level, join_lines, sections_at_level, split_lines};
use serde::Serialize;
use tracing::debug;

/// One step of the cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PruneStep {
    CollapseIdentity,
    CapLearned,
    CapStream,
    CapMonthly,
    HardTruncate,
}

/// What pruning did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub budget: usize,
    pub original_len: usize,
    pub final_len: usize,
    /// Steps that changed the pack, in order
    pub steps: Vec<PruneStep>,
}

impl PruneReport {
    pub fn pruned(&self) -> bool {
        !self.steps.is_empty()
    }
}

/// Stateless pruner over a configuration.
pub struct Pruner<'a> {
    config: &'a PruneConfig,
}

impl<'a> Pruner<'a> {
    pub fn new(config: &'a PruneConfig) -> Self {
        Self { config }
    }

    /// Fit `pack` into `budget` bytes.
    pub fn prune(&self, pack: &str, budget: usize) -> (String, PruneReport) {
        let mut report = PruneReport {
            budget,
            original_len: pack.len(),
            final_len: pack.len(),
            steps: Vec::new(),
        };
        let mut current = pack.to_string();

        for step in [
            PruneStep::CollapseIdentity,
            PruneStep::CapLearned,
            PruneStep::CapStream,
            PruneStep::CapMonthly,
        ] {
            if current.len() <= budget {
                break;
            }
            let next = match step {
                PruneStep::CollapseIdentity => self.collapse_identity(&current),
                PruneStep::CapLearned => self.keep_last_entries(
                    &current,
                    &self.config.learned_heading,
                    self.config.learned_keep,
                ),
                PruneStep::CapStream => self.keep_last_entries(
                    &current,
                    &self.config.stream_heading,
                    self.config.stream_keep,
                ),
                PruneStep::CapMonthly => self.cap_monthly(&current),
                PruneStep::HardTruncate => None,
            };
            if let Some(next) = next
                && next != current
            {
                debug!(?step, before = current.len(), after = next.len(), "Pruned pack");
                current = next;
                report.steps.push(step);
            }
        }

        if current.len() > budget {
            current = self.hard_truncate(&current, budget);
            report.steps.push(PruneStep::HardTruncate);
        }

        report.final_len = current.len();
        (current, report)
    }

    fn collapse_identity(&self, pack: &str) -> Option<String> {
        let keep = &self.config.identity_keep;
        rewrite_section(pack, &self.config.identity_heading, |body| {
            let subsections = sections_at_level(body, 3);
            let preamble_end = subsections.first().map_or(body.len(), |s| s.start);

            let mut out: Vec<&str> = body[..preamble_end].to_vec();
            for sub in &subsections {
                let heading = body[sub.start].trim_end();
                if keep.iter().any(|k| k.trim_end() == heading) {
                    out.extend_from_slice(&body[sub.start..sub.end]);
                }
            }
            while out
                .last()
                .is_some_and(|l| l.trim().is_empty() || l.trim() == "---")
            {
                out.pop();
            }
            out
        })
    }

    fn keep_last_entries(&self, pack: &str, heading: &str, keep: usize) -> Option<String> {
        rewrite_section(pack, heading, |body| {
            let first = body.iter().position(|l| is_entry_start(l));
            let Some(first) = first else {
                return body.to_vec();
            };

            let content_end = body
                .iter()
                .rposition(|l| !l.trim().is_empty())
                .map_or(body.len(), |i| i + 1);
            let starts: Vec<usize> = (first..content_end)
                .filter(|&i| is_entry_start(body[i]))
                .collect();
            if starts.len() <= keep {
                return body.to_vec();
            }

            let from = if keep == 0 {
                content_end
            } else {
                starts[starts.len() - keep]
            };
            let mut out: Vec<&str> = body[..first].to_vec();
            out.extend_from_slice(&body[from..content_end]);
            out
        })
    }

    fn cap_monthly(&self, pack: &str) -> Option<String> {
        let max = self.config.monthly_max_lines;
        rewrite_section(pack, &self.config.monthly_heading, |body| {
            body.iter()
                .copied()
                .filter(|l| heading_level(l).is_some() || is_list_line(l))
                .take(max)
                .collect()
        })
    }

    fn hard_truncate(&self, pack: &str, budget: usize) -> String {
        let notice = self.config.truncation_notice.as_str();
        let (room, notice) = if notice.len() < budget {
            (budget - notice.len(), notice)
        } else {
            (budget, "")
        };
        let mut cut = room.min(pack.len());
        while cut > 0 && !pack.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}{notice}", &pack[..cut])
    }
}

/// Replace a section's body with `f(body)`, keeping one blank line before a
/// following heading. `None` when the section does not exist.
fn rewrite_section<F>(pack: &str, heading: &str, f: F) -> Option<String>
where
    F: for<'l> FnOnce(&[&'l str]) -> Vec<&'l str>,
{
    let (lines, trailing) = split_lines(pack);
    let section = find_section(&lines, heading)?;

    let mut body = f(&lines[section.body()]);
    while body.last().is_some_and(|l| l.trim().is_empty()) {
        body.pop();
    }
    if section.end < lines.len() {
        body.push("");
    }

    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    out.extend_from_slice(&lines[..section.heading_end]);
    out.extend(body);
    out.extend_from_slice(&lines[section.end..]);
    Some(join_lines(&out, trailing))
}

/// A top-level bullet starts a new entry; indented lines continue it.
fn is_entry_start(line: &str) -> bool {
    ["- ", "* ", "+ "].iter().any(|b| line.starts_with(b))
}

fn is_list_line(line: &str) -> bool {
    let t = line.trim_start();
    if ["- ", "* ", "+ "].iter().any(|b| t.starts_with(b)) {
        return true;
    }
    let digits = t.bytes().take_while(u8::is_ascii_digit).count();
    digits > 0 && (t[digits..].starts_with(". ") || t[digits..].starts_with(") "))
}
