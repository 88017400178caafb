//! Slash-delimited path handling.
//!
//! Paths are sequences of non-empty segments joined by `/`. Leading, trailing
//! and repeated separators carry no meaning, so `"/a//b/"` and `"a/b"` name the
//! same entry. The root is the empty path.
//!
//! Nothing here fails: malformed input degrades to its normalized form.

/// Path separator.
pub const SEPARATOR: char = '/';

/// Splits a path into its non-empty segments.
///
/// # Examples
///
/// ```rust
/// use kvtree::path::split;
///
/// assert_eq!(split("/a//b/"), vec!["a", "b"]);
/// assert!(split("///").is_empty());
/// ```
#[must_use]
pub fn split(path: &str) -> Vec<&str> {
    path.split(SEPARATOR).filter(|s| !s.is_empty()).collect()
}

/// Joins segments with single separators, trimming stray separators from each.
///
/// Segments that are empty after trimming are dropped.
#[must_use]
pub fn join<S: AsRef<str>>(segments: &[S]) -> String {
    let mut out = String::new();
    for segment in segments {
        for part in split(segment.as_ref()) {
            if !out.is_empty() {
                out.push(SEPARATOR);
            }
            out.push_str(part);
        }
    }
    out
}

/// Returns the canonical form of a path.
///
/// Idempotent: `normalize(&normalize(p)) == normalize(p)`.
///
/// # Examples
///
/// ```rust
/// use kvtree::path::normalize;
///
/// assert_eq!(normalize("//a/b///c/"), "a/b/c");
/// assert_eq!(normalize("/"), "");
/// ```
#[must_use]
pub fn normalize(path: &str) -> String {
    join(&split(path))
}

/// Returns the normalized parent path. The parent of a top-level entry and of
/// the root is the root.
#[must_use]
pub fn parent(path: &str) -> String {
    let segments = split(path);
    match segments.split_last() {
        Some((_, init)) => join(init),
        None => String::new(),
    }
}

/// Returns the last segment, or the empty string for the root.
#[must_use]
pub fn leaf_name(path: &str) -> &str {
    split(path).last().copied().unwrap_or("")
}

/// Appends a child segment to an already normalized parent path.
pub(crate) fn child(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}{SEPARATOR}{name}")
    }
}

/// Returns true if the path names the root.
#[must_use]
pub fn is_root(path: &str) -> bool {
    split(path).is_empty()
}
