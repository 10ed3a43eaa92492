//! POSIX path normalization helpers.
//!
//! Every path stored by the filesystem and the module caches is kept
//! in canonical form: absolute, no `.` or `..` segments, no empty
//! segments, no trailing slash except on the root itself. The
//! functions here are pure and never touch the node tree.

use crate::error::{Result, RuntimeError};

/// Normalizes `path` into canonical form.
///
/// Relative input is interpreted against the root, so `a/b` becomes
/// `/a/b`. `..` segments above the root are dropped.
pub fn normalize(path: &str) -> Result<String> {
    if path.is_empty() {
        return Err(RuntimeError::invalid_argument("path must be a non-empty string"));
    }
    let mut stack: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            name => stack.push(name),
        }
    }
    if stack.is_empty() {
        return Ok("/".to_owned());
    }
    let mut out = String::with_capacity(path.len());
    for name in stack {
        out.push('/');
        out.push_str(name);
    }
    Ok(out)
}

/// Joins path fragments with `/` and normalizes late, so `..` in a
/// later fragment can climb out of an earlier one.
pub fn join(parts: &[&str]) -> Result<String> {
    if parts.is_empty() {
        return Err(RuntimeError::invalid_argument("join requires at least one fragment"));
    }
    normalize(&parts.join("/"))
}

/// Splits a canonical path into `(parent, name)` such that
/// `join(&[parent, name])` reproduces the input for any non-root path.
pub fn split(path: &str) -> Result<(String, String)> {
    let path = normalize(path)?;
    if path == "/" {
        return Ok(("/".to_owned(), String::new()));
    }
    let cut = path.rfind('/').unwrap_or(0);
    let parent = if cut == 0 { "/".to_owned() } else { path[..cut].to_owned() };
    let name = path[cut + 1..].to_owned();
    Ok((parent, name))
}

/// Parent directory of `path`; the root is its own parent.
pub fn dirname(path: &str) -> Result<String> {
    split(path).map(|(parent, _)| parent)
}

/// Final component of `path`; empty for the root.
pub fn basename(path: &str) -> Result<String> {
    split(path).map(|(_, name)| name)
}

/// Extension of the final component, including the leading dot.
///
/// Mirrors POSIX rules: the substring from the last `.` of the
/// basename, unless the name is empty, starts with its only dot, or
/// consists entirely of dots.
pub fn extname(path: &str) -> Result<String> {
    let name = basename(path)?;
    if name.chars().all(|c| c == '.') {
        return Ok(String::new());
    }
    match name.rfind('.') {
        Some(0) | None => Ok(String::new()),
        Some(idx) => Ok(name[idx..].to_owned()),
    }
}
