//! Module format detection.

use crate::path;
use crate::vfs::MemFs;

/// How a module's source should be interpreted.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ModuleFormat {
    CommonJs,
    EsModule,
}

/// Detects the format of the file at `file_path`.
///
/// `.mjs`/`.mts` force ES modules and `.cjs`/`.cts` force CommonJS.
/// Anything else is decided by the nearest `package.json` walking up
/// from the file's directory: ES module iff its `type` field equals
/// `"module"`. A `package.json` that fails to parse decides CommonJS.
pub fn detect(vfs: &MemFs, file_path: &str) -> ModuleFormat {
    let ext = path::extname(file_path).unwrap_or_default();
    match ext.as_str() {
        ".mjs" | ".mts" => return ModuleFormat::EsModule,
        ".cjs" | ".cts" => return ModuleFormat::CommonJs,
        _ => {}
    }

    let mut dir = match path::dirname(file_path) {
        Ok(dir) => dir,
        Err(_) => return ModuleFormat::CommonJs,
    };
    loop {
        let manifest = match path::join(&[&dir, "package.json"]) {
            Ok(p) => p,
            Err(_) => return ModuleFormat::CommonJs,
        };
        if vfs.stat(&manifest).map(|s| s.is_file()).unwrap_or(false) {
            let Ok(text) = vfs.read_to_string(&manifest) else {
                return ModuleFormat::CommonJs;
            };
            return match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(json) if json.get("type").and_then(|t| t.as_str()) == Some("module") => {
                    ModuleFormat::EsModule
                }
                _ => ModuleFormat::CommonJs,
            };
        }
        if dir == "/" {
            return ModuleFormat::CommonJs;
        }
        dir = match path::dirname(&dir) {
            Ok(parent) => parent,
            Err(_) => return ModuleFormat::CommonJs,
        };
    }
}
