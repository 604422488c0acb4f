//! Write intents — proposed edits produced by upstream decision logic.
//!
//! A [`WriteIntent`] is the wire form: loosely typed strings, exactly as an
//! LLM tool call or a JSON file hands them over. [`validate_batch`] turns a
//! list of them into typed [`ValidatedIntent`]s, partitioning out the
//! invalid ones with a human-readable reason. Invalidity is a value, not a
//! control-flow signal: nothing here returns `Err` or panics on bad input.

use serde::{Deserialize, Serialize};

use crate::pack::heading_level;
use crate::path::PathRules;

/// Default cap on intent content, in bytes.
pub const MAX_CONTENT_BYTES: usize = 64 * 1024;

/// A single proposed edit to one file (wire schema).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteIntent {
    /// Store path, e.g. `data/plans/weekly.md`
    pub path: String,

    /// `put` or `patch`
    pub op: String,

    /// Patch operation name (patch intents only)
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<String>,

    /// Target heading, including its `#` level marker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,

    /// Target item text for mark-complete / remove-item
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Blob hash the author based this edit on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_ref_sha: Option<String>,
}

impl WriteIntent {
    /// Replace a whole file. Oversized content is truncated.
    pub fn put(path: impl Into<String>, content: impl Into<String>) -> Self {
        let (content, _) = truncate_content(content.into(), MAX_CONTENT_BYTES);
        Self {
            path: path.into(),
            op: "put".into(),
            patch_type: None,
            heading: None,
            item: None,
            content: Some(content),
            base_ref_sha: None,
        }
    }

    /// Apply one patch operation to a file. Oversized content is truncated.
    pub fn patch(path: impl Into<String>, op: PatchOp) -> Self {
        let kind = op.kind();
        let (heading, item, content) = match op {
            PatchOp::Append { heading, content }
            | PatchOp::Prepend { heading, content }
            | PatchOp::Replace { heading, content } => (Some(heading), None, Some(content)),
            PatchOp::MarkComplete { item } | PatchOp::RemoveItem { item } => {
                (None, Some(item), None)
            }
        };
        Self {
            path: path.into(),
            op: "patch".into(),
            patch_type: Some(kind.as_str().into()),
            heading,
            item,
            content: content.map(|c| truncate_content(c, MAX_CONTENT_BYTES).0),
            base_ref_sha: None,
        }
    }

    /// Attach the blob hash this edit was based on.
    pub fn with_base_ref(mut self, sha: impl Into<String>) -> Self {
        self.base_ref_sha = Some(sha.into());
        self
    }

    /// Validate a single intent into its typed form.
    ///
    /// Returns the reason string on failure.
    pub fn validate(
        &self,
        rules: &PathRules,
        max_content: usize,
    ) -> Result<ValidatedIntent, String> {
        rules.validate(&self.path).map_err(|e| e.to_string())?;

        let (content, truncated) =
            truncate_content(self.content.clone().unwrap_or_default(), max_content);

        let edit = match self.op.as_str() {
            "put" => Edit::Put { content },
            "patch" => {
                let type_name = self
                    .patch_type
                    .as_deref()
                    .ok_or_else(|| "patch intent is missing 'type'".to_string())?;
                let kind = PatchKind::parse(type_name)
                    .ok_or_else(|| format!("unknown patch type '{type_name}'"))?;
                Edit::Patch(self.patch_op(kind, content)?)
            }
            other => return Err(format!("unknown op '{other}' (expected 'put' or 'patch')")),
        };

        Ok(ValidatedIntent {
            path: self.path.clone(),
            edit,
            base_ref_sha: self.base_ref_sha.clone(),
            truncated,
        })
    }

    fn patch_op(&self, kind: PatchKind, content: String) -> Result<PatchOp, String> {
        let heading = || -> Result<String, String> {
            let heading = self
                .heading
                .as_deref()
                .map(str::trim_end)
                .filter(|h| !h.trim().is_empty())
                .ok_or_else(|| format!("{} requires a 'heading'", kind.as_str()))?;
            if heading_level(heading).is_none() {
                return Err(format!(
                    "heading '{heading}' must start with 1-6 '#' followed by a space"
                ));
            }
            Ok(heading.to_string())
        };
        let item = || {
            self.item
                .as_deref()
                .filter(|i| !i.trim().is_empty())
                .map(str::to_string)
                .ok_or_else(|| format!("{} requires an 'item'", kind.as_str()))
        };

        Ok(match kind {
            PatchKind::Append => PatchOp::Append {
                heading: heading()?,
                content,
            },
            PatchKind::Prepend => PatchOp::Prepend {
                heading: heading()?,
                content,
            },
            PatchKind::Replace => PatchOp::Replace {
                heading: heading()?,
                content,
            },
            PatchKind::MarkComplete => PatchOp::MarkComplete { item: item()? },
            PatchKind::RemoveItem => PatchOp::RemoveItem { item: item()? },
        })
    }
}

/// The closed set of patch operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatchKind {
    Append,
    Prepend,
    Replace,
    MarkComplete,
    RemoveItem,
}

impl PatchKind {
    pub const ALL: [PatchKind; 5] = [
        PatchKind::Append,
        PatchKind::Prepend,
        PatchKind::Replace,
        PatchKind::MarkComplete,
        PatchKind::RemoveItem,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Append => "append",
            Self::Prepend => "prepend",
            Self::Replace => "replace",
            Self::MarkComplete => "mark-complete",
            Self::RemoveItem => "remove-item",
        }
    }

    /// Parse a wire name. Accepts `_` in place of `-`.
    pub fn parse(name: &str) -> Option<Self> {
        let normalized = name.trim().replace('_', "-");
        Self::ALL.into_iter().find(|k| k.as_str() == normalized)
    }
}

impl std::fmt::Display for PatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed patch operation with its required parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOp {
    Append { heading: String, content: String },
    Prepend { heading: String, content: String },
    Replace { heading: String, content: String },
    MarkComplete { item: String },
    RemoveItem { item: String },
}

impl PatchOp {
    pub fn kind(&self) -> PatchKind {
        match self {
            Self::Append { .. } => PatchKind::Append,
            Self::Prepend { .. } => PatchKind::Prepend,
            Self::Replace { .. } => PatchKind::Replace,
            Self::MarkComplete { .. } => PatchKind::MarkComplete,
            Self::RemoveItem { .. } => PatchKind::RemoveItem,
        }
    }
}

/// What a validated intent does to its file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    Put { content: String },
    Patch(PatchOp),
}

/// An intent that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedIntent {
    pub path: String,
    pub edit: Edit,
    pub base_ref_sha: Option<String>,
    /// Content was capped at the configured maximum.
    pub truncated: bool,
}

/// An intent that failed validation, with its position in the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedIntent {
    pub index: usize,
    pub intent: WriteIntent,
    pub reason: String,
}

/// Result of validating a batch: every intent lands in exactly one list.
#[derive(Debug, Clone, Default)]
pub struct BatchValidation {
    pub valid: Vec<ValidatedIntent>,
    pub invalid: Vec<RejectedIntent>,
}

impl BatchValidation {
    pub fn is_valid(&self) -> bool {
        self.invalid.is_empty()
    }
}

/// Partition a batch into valid and invalid intents, preserving order.
pub fn validate_batch(
    intents: &[WriteIntent],
    rules: &PathRules,
    max_content: usize,
) -> BatchValidation {
    let mut result = BatchValidation::default();
    for (index, intent) in intents.iter().enumerate() {
        match intent.validate(rules, max_content) {
            Ok(valid) => {
                if valid.truncated {
                    tracing::warn!(
                        path = %valid.path,
                        max_bytes = max_content,
                        "Intent content truncated"
                    );
                }
                result.valid.push(valid);
            }
            Err(reason) => result.invalid.push(RejectedIntent {
                index,
                intent: intent.clone(),
                reason,
            }),
        }
    }
    result
}

/// Cap `content` at `max` bytes, cutting on a character boundary.
pub fn truncate_content(mut content: String, max: usize) -> (String, bool) {
    if content.len() <= max {
        return (content, false);
    }
    let mut cut = max;
    while cut > 0 && !content.is_char_boundary(cut) {
        cut -= 1;
    }
    content.truncate(cut);
    (content, true)
}
