//! Helpers for the relative-path strings used as tree keys.
//!
//! Relative paths never start or end with a separator; the empty string
//! denotes the implicit tree root.

/// Everything before the last separator, or "" for a top-level path.
pub fn parent_of(rel: &str) -> &str {
    match rel.rfind('/') {
        Some(i) => &rel[..i],
        None => "",
    }
}

/// The last path component.
pub fn file_name_of(rel: &str) -> &str {
    match rel.rfind('/') {
        Some(i) => &rel[i + 1..],
        None => rel,
    }
}

/// `parent/name`, collapsing the empty parent.
pub fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}
