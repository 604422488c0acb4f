//! Section patch engine for ctxpack.
//!
//! Pure functions that locate a heading-delimited section in a markdown
//! document and apply one of a fixed set of patch operations to it. No I/O,
//! no clocks, no randomness: identical inputs always produce byte-identical
//! output, which is what lets the commit coordinator apply several patches
//! to the same in-memory content before committing.
//!
//! Parsing is explicit line scanning with a level comparison rule, not a
//! markdown grammar:
//!
//! - a heading is a line starting with 1–6 `#` followed by a space (or
//!   nothing else)
//! - a section ends at the next heading whose level is equal to or
//!   shallower than its own

pub mod apply;
pub mod section;

pub use apply::{append, apply_edit, apply_patch, mark_complete, prepend, remove_item, replace};
pub use section::{Section, find_section, heading_level, join_lines, sections_at_level, split_lines};
