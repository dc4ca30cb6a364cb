//! Virtual path normalization.
//!
//! Every session-provided path passes through here before it reaches an
//! agent. Virtual paths are always absolute, `/`-separated, and free of
//! drive letters; Windows agents map `/C/...` onto `C:\...` themselves.

use crate::{Error, Result};

/// Normalize a virtual path.
///
/// - Empty input is the root `/`.
/// - Backslashes become slashes; relative paths are anchored at `/`.
/// - Any `:` is rejected (use `/C/...` on Windows).
/// - `.` segments and empty segments are dropped; `..` is rejected.
/// - The result has a single leading `/` and no trailing `/` except root.
pub fn normalize_virtual_path(input: &str) -> Result<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok("/".to_string());
    }

    let mut path = trimmed.replace('\\', "/");
    if !path.starts_with('/') {
        path.insert(0, '/');
    }

    if path.contains(':') {
        return Err(Error::PathFormat);
    }

    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(Error::PathTraversal),
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return Ok("/".to_string());
    }
    Ok(format!("/{}", segments.join("/")))
}

/// Whether `path` lies within `root`. Both must already be normalized.
///
/// The root `/` grants everything; otherwise the path must equal the root
/// or extend it by whole segments.
pub fn is_within_root(root: &str, path: &str) -> bool {
    root == "/" || path == root || path.starts_with(&format!("{}/", root))
}

/// Normalize a path and require it to stay inside the session root.
pub fn resolve_in_root(root: &str, input: &str) -> Result<String> {
    let path = normalize_virtual_path(input)?;
    if !is_within_root(root, &path) {
        return Err(Error::PathOutsideRoot { path });
    }
    Ok(path)
}
