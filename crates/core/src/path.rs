//! Path validation — sandboxing intents to the logical document root.
//!
//! Store paths are repository-relative and never touch the local
//! filesystem, so validation is purely lexical: a path must sit under the
//! document root, contain no traversal or empty segments, and stay out of
//! the read-only subtrees (the identity files).

use serde::{Deserialize, Serialize};

/// Error returned when path validation fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathValidationError {
    #[error("Path '{path}' is outside the document root '{root}'")]
    OutsideRoot { path: String, root: String },

    #[error("Path '{path}' is inside read-only subtree '{subtree}'")]
    ReadOnly { path: String, subtree: String },

    #[error("Path traversal detected in '{path}'")]
    PathTraversal { path: String },

    #[error("Malformed path '{path}': {reason}")]
    Malformed { path: String, reason: String },
}

/// Where intents may write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRules {
    /// Logical document root, e.g. `data`.
    pub root: String,
    /// Subtrees under the root that intents must never target.
    pub read_only: Vec<String>,
}

impl Default for PathRules {
    fn default() -> Self {
        Self {
            root: "data".into(),
            read_only: vec!["data/identity".into()],
        }
    }
}

impl PathRules {
    pub fn new(root: impl Into<String>, read_only: Vec<String>) -> Self {
        Self {
            root: trim_slashes(&root.into()).to_string(),
            read_only: read_only
                .into_iter()
                .map(|s| trim_slashes(&s).to_string())
                .collect(),
        }
    }

    /// Join a root-relative path (as used in provenance markers) onto the root.
    pub fn resolve(&self, relative: &str) -> String {
        let relative = trim_slashes(relative);
        if self.root.is_empty() {
            relative.to_string()
        } else {
            format!("{}/{}", self.root, relative)
        }
    }

    /// Strip the root prefix, yielding the root-relative form.
    pub fn relative<'a>(&self, path: &'a str) -> Option<&'a str> {
        if self.root.is_empty() {
            return Some(path);
        }
        path.strip_prefix(self.root.as_str())?.strip_prefix('/')
    }

    /// Validate that an intent path is safe to write.
    ///
    /// Checks, in order:
    /// 1. No backslashes, no absolute paths
    /// 2. No `..` segments
    /// 3. No empty or `.` segments
    /// 4. Inside the document root
    /// 5. Not inside a read-only subtree
    pub fn validate(&self, path: &str) -> Result<(), PathValidationError> {
        if path.is_empty() {
            return Err(malformed(path, "empty path"));
        }
        if path.contains('\\') {
            return Err(malformed(path, "backslash separators are not allowed"));
        }
        if path.starts_with('/') {
            return Err(malformed(path, "absolute paths are not allowed"));
        }

        let segments: Vec<&str> = path.split('/').collect();
        if segments.iter().any(|s| *s == "..") {
            return Err(PathValidationError::PathTraversal { path: path.into() });
        }
        if segments.iter().any(|s| s.is_empty() || *s == ".") {
            return Err(malformed(path, "empty or '.' segment"));
        }

        if !is_within(path, &self.root) || path == self.root {
            return Err(PathValidationError::OutsideRoot {
                path: path.into(),
                root: self.root.clone(),
            });
        }

        for subtree in &self.read_only {
            if is_within(path, subtree) {
                return Err(PathValidationError::ReadOnly {
                    path: path.into(),
                    subtree: subtree.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Segment-wise prefix check: `data/identity2` is not within `data/identity`.
fn is_within(path: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn trim_slashes(s: &str) -> &str {
    s.trim_matches('/')
}

fn malformed(path: &str, reason: &str) -> PathValidationError {
    PathValidationError::Malformed {
        path: path.into(),
        reason: reason.into(),
    }
}
