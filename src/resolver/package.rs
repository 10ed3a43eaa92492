//! package.json interpretation: `exports`, `main` and `module`.

use serde_json::Value;

use crate::path;
use crate::vfs::MemFs;

use super::probe_file;

/// Host condition preference for `exports` resolution.
pub const DEFAULT_CONDITIONS: [&str; 4] = ["browser", "import", "require", "default"];

/// Reads and parses a package manifest. A missing or malformed
/// `package.json` reads as absent; resolution then falls through to
/// the next step instead of failing.
pub fn read_manifest(vfs: &MemFs, package_dir: &str) -> Option<Value> {
    let manifest_path = path::join(&[package_dir, "package.json"]).ok()?;
    let text = vfs.read_to_string(&manifest_path).ok()?;
    serde_json::from_str(&text).ok()
}

/// Resolves `subpath` (`.` or `./…`) inside `package_dir`.
///
/// Order: a recognized `exports` field (checked against the host
/// conditions, accepted only when the mapped file exists), then for
/// the root subpath `main` and `module`, then direct probing of the
/// subpath location.
pub fn resolve_in_package(
    vfs: &MemFs,
    package_dir: &str,
    subpath: &str,
    conditions: &[&str],
) -> Option<String> {
    let manifest = read_manifest(vfs, package_dir);

    if let Some(exports) = manifest.as_ref().and_then(|m| m.get("exports")) {
        if let Some(target) = resolve_exports(exports, subpath, conditions) {
            if let Ok(full) = path::join(&[package_dir, target.trim_start_matches("./")]) {
                if vfs.stat(&full).map(|s| s.is_file()).unwrap_or(false) {
                    return Some(full);
                }
            }
        }
    }

    if subpath == "." {
        for field in ["main", "module"] {
            if let Some(entry) = manifest.as_ref().and_then(|m| m.get(field)).and_then(Value::as_str)
            {
                let candidate = path::join(&[package_dir, entry]).ok()?;
                if let Some(found) = probe_file(vfs, &candidate) {
                    return Some(found);
                }
            }
        }
    }

    let direct = path::join(&[package_dir, subpath.trim_start_matches("./")]).ok()?;
    probe_file(vfs, &direct)
}

/// Pure recursive walk of an `exports` value.
///
/// Strings match only the root subpath. Arrays take the first
/// non-null match. An object whose keys carry no leading dot is a
/// conditions map, valid only for the root subpath: the first host
/// condition present wins. An object with dotted keys is a subpath
/// map, consulted first for an exact key and then for single-`*`
/// patterns whose prefix and suffix bracket the subpath; the matched
/// middle substitutes into the target's `*`. Patterns with more than
/// one `*` never match.
pub fn resolve_exports(exports: &Value, subpath: &str, conditions: &[&str]) -> Option<String> {
    match exports {
        Value::String(target) => (subpath == ".").then(|| target.clone()),
        Value::Array(options) => {
            options.iter().find_map(|option| resolve_exports(option, subpath, conditions))
        }
        Value::Object(map) => {
            let is_subpath_map = map.keys().any(|key| key.starts_with('.'));
            if !is_subpath_map {
                if subpath != "." {
                    return None;
                }
                for condition in conditions {
                    if let Some(value) = map.get(*condition) {
                        return resolve_exports(value, ".", conditions);
                    }
                }
                return None;
            }
            if let Some(value) = map.get(subpath) {
                return resolve_exports(value, ".", conditions);
            }
            for (pattern, value) in map {
                let Some(star) = pattern.find('*') else { continue };
                if pattern[star + 1..].contains('*') {
                    continue;
                }
                let prefix = &pattern[..star];
                let suffix = &pattern[star + 1..];
                if subpath.len() >= prefix.len() + suffix.len()
                    && subpath.starts_with(prefix)
                    && subpath.ends_with(suffix)
                {
                    let middle = &subpath[prefix.len()..subpath.len() - suffix.len()];
                    if let Value::String(target) = value {
                        return Some(target.replacen('*', middle, 1));
                    }
                }
            }
            None
        }
        _ => None,
    }
}
