//! Source transforms --- [`TransformPipeline`].
//!
//! The pipeline holds one [`Transformer`] hook (replaceable by
//! plugins) and memoizes its output keyed by a 32-bit FNV-1a hash of
//! the raw source. The stock transformer rewrites ES-module syntax
//! into script-style code so the CommonJS executor can run it; it
//! covers the common single-line declaration forms and intentionally
//! leaves exotic syntax to a full transformer plugin.

use std::sync::{Arc, RwLock};

use moka::sync::Cache;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ErrorKind, Result, RuntimeError};

/// Result of one transform run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutput {
    pub code: String,
    pub source_map: Option<String>,
}

impl TransformOutput {
    pub fn passthrough(source: &str) -> Self {
        Self { code: source.to_owned(), source_map: None }
    }
}

/// A pure, deterministic source-to-source conversion.
pub trait Transformer: Send + Sync {
    fn transform(&self, source: &str, filename: &str) -> Result<TransformOutput>;
}

/// 32-bit FNV-1a over the raw source bytes.
pub fn fnv1a(data: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in data.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Transformer hook plus the hash-keyed output cache. The cache is
/// independent of the module cache; clearing one leaves the other
/// untouched.
pub struct TransformPipeline {
    cache: Cache<u32, Arc<TransformOutput>>,
    transformer: RwLock<Arc<dyn Transformer>>,
}

impl Default for TransformPipeline {
    fn default() -> Self {
        Self { cache: Cache::new(1024), transformer: RwLock::new(Arc::new(EsmToCjs)) }
    }
}

impl TransformPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the transformer hook (a transform plugin calls this
    /// at install time). Cached outputs of the previous hook are
    /// dropped since they no longer describe the pipeline.
    pub fn set_transformer(&self, transformer: Arc<dyn Transformer>) {
        *self.transformer.write().expect("transform hook poisoned") = transformer;
        self.cache.invalidate_all();
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    pub fn transform(&self, source: &str, filename: &str) -> Result<Arc<TransformOutput>> {
        let key = fnv1a(source);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }
        let hook = Arc::clone(&*self.transformer.read().expect("transform hook poisoned"));
        let output = Arc::new(hook.transform(source, filename)?);
        self.cache.insert(key, Arc::clone(&output));
        Ok(output)
    }
}

static ESM_SYNTAX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(import|export)\b").expect("static regex"));
static IMPORT_FROM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*import\s+(.+?)\s+from\s+['"]([^'"]+)['"]\s*;?\s*$"#).expect("static regex")
});
static IMPORT_BARE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*import\s+['"]([^'"]+)['"]\s*;?\s*$"#).expect("static regex")
});
static EXPORT_FROM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*export\s+\{([^}]*)\}\s*from\s+['"]([^'"]+)['"]\s*;?\s*$"#)
        .expect("static regex")
});
static EXPORT_STAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*export\s+\*\s+from\s+['"]([^'"]+)['"]\s*;?\s*$"#).expect("static regex")
});
static EXPORT_BRACES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*export\s+\{([^}]*)\}\s*;?\s*$").expect("static regex"));
static EXPORT_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\s*)export\s+(const|let|var)\s+([A-Za-z_$][A-Za-z0-9_$]*)(.*)$")
        .expect("static regex")
});
static EXPORT_NAMED_VALUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\s*)export\s+(async\s+function|function|class)\s+([A-Za-z_$][A-Za-z0-9_$]*)(.*)$")
        .expect("static regex")
});
static EXPORT_DEFAULT_NAMED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(\s*)export\s+default\s+(async\s+function|function|class)\s+([A-Za-z_$][A-Za-z0-9_$]*)(.*)$",
    )
    .expect("static regex")
});
static EXPORT_DEFAULT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\s*)export\s+default\s+(.*)$").expect("static regex"));

/// Whether a source uses ES-module syntax at statement level.
pub fn has_esm_syntax(source: &str) -> bool {
    ESM_SYNTAX.is_match(source)
}

const INTEROP_HELPER: &str = "var __jsbox_interop = function (m) { return m && m.__esModule ? m[\"default\"] : m; };";
const ESM_MARKER: &str = "Object.defineProperty(exports, \"__esModule\", { value: true });";

/// `a, b as c` --> `a, b: c` for destructuring requires.
fn braces_to_destructure(inner: &str) -> String {
    inner
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once(" as ") {
            Some((source, alias)) => format!("{}: {}", source.trim(), alias.trim()),
            None => part.to_owned(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Export list entries as `(exported name, local expression)` pairs.
fn braces_to_exports(inner: &str) -> Vec<(String, String)> {
    inner
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once(" as ") {
            Some((local, exported)) => (exported.trim().to_owned(), local.trim().to_owned()),
            None => (part.to_owned(), part.to_owned()),
        })
        .collect()
}

/// Stock ES-module-to-script conversion.
pub struct EsmToCjs;

struct Conversion {
    lines: Vec<String>,
    tail: Vec<String>,
    temp_counter: usize,
    needs_interop: bool,
    converted: bool,
}

impl Conversion {
    fn temp(&mut self) -> String {
        let name = format!("__jsbox_import_{}", self.temp_counter);
        self.temp_counter += 1;
        name
    }
}

impl Transformer for EsmToCjs {
    fn transform(&self, source: &str, filename: &str) -> Result<TransformOutput> {
        if !has_esm_syntax(source) {
            return Ok(TransformOutput::passthrough(source));
        }

        let mut conv = Conversion {
            lines: Vec::new(),
            tail: Vec::new(),
            temp_counter: 0,
            needs_interop: false,
            converted: false,
        };

        for line in source.lines() {
            convert_line(line, &mut conv).map_err(|err| err.with_context(filename))?;
        }

        if !conv.converted {
            return Ok(TransformOutput::passthrough(source));
        }

        let mut out = Vec::with_capacity(conv.lines.len() + conv.tail.len() + 2);
        out.push(ESM_MARKER.to_owned());
        if conv.needs_interop {
            out.push(INTEROP_HELPER.to_owned());
        }
        out.extend(conv.lines);
        out.extend(conv.tail);
        Ok(TransformOutput { code: out.join("\n"), source_map: None })
    }
}

fn convert_line(line: &str, conv: &mut Conversion) -> Result<()> {
    if let Some(captures) = IMPORT_BARE.captures(line) {
        conv.converted = true;
        conv.lines.push(format!("require({:?});", &captures[1]));
        return Ok(());
    }

    if let Some(captures) = IMPORT_FROM.captures(line) {
        conv.converted = true;
        let clause = captures[1].trim().to_owned();
        let spec = captures[2].to_owned();
        return convert_import_clause(&clause, &spec, conv);
    }

    if let Some(captures) = EXPORT_FROM.captures(line) {
        conv.converted = true;
        let temp = conv.temp();
        conv.lines.push(format!("const {temp} = require({:?});", &captures[2]));
        for (exported, local) in braces_to_exports(&captures[1]) {
            conv.lines.push(format!("exports.{exported} = {temp}.{local};"));
        }
        return Ok(());
    }

    if let Some(captures) = EXPORT_STAR.captures(line) {
        conv.converted = true;
        let temp = conv.temp();
        conv.lines.push(format!("const {temp} = require({:?});", &captures[1]));
        conv.lines.push(format!(
            "Object.keys({temp}).forEach(function (k) {{ if (k !== \"default\") exports[k] = {temp}[k]; }});"
        ));
        return Ok(());
    }

    if let Some(captures) = EXPORT_BRACES.captures(line) {
        conv.converted = true;
        for (exported, local) in braces_to_exports(&captures[1]) {
            conv.lines.push(format!("exports.{exported} = {local};"));
        }
        return Ok(());
    }

    if let Some(captures) = EXPORT_DEFAULT_NAMED.captures(line) {
        conv.converted = true;
        let indent = &captures[1];
        let keyword = &captures[2];
        let name = captures[3].to_owned();
        let rest = &captures[4];
        conv.lines.push(format!("{indent}{keyword} {name}{rest}"));
        conv.tail.push(format!("exports.default = {name};"));
        return Ok(());
    }

    if let Some(captures) = EXPORT_DEFAULT.captures(line) {
        conv.converted = true;
        conv.lines.push(format!("{}exports.default = {}", &captures[1], &captures[2]));
        return Ok(());
    }

    if let Some(captures) = EXPORT_DECL.captures(line) {
        conv.converted = true;
        let name = captures[3].to_owned();
        conv.lines.push(format!("{}{} {}{}", &captures[1], &captures[2], name, &captures[4]));
        conv.tail.push(format!("exports.{name} = {name};"));
        return Ok(());
    }

    if let Some(captures) = EXPORT_NAMED_VALUE.captures(line) {
        conv.converted = true;
        let name = captures[3].to_owned();
        conv.lines.push(format!("{}{} {}{}", &captures[1], &captures[2], name, &captures[4]));
        conv.tail.push(format!("exports.{name} = {name};"));
        return Ok(());
    }

    conv.lines.push(line.to_owned());
    Ok(())
}

fn convert_import_clause(clause: &str, spec: &str, conv: &mut Conversion) -> Result<()> {
    if let Some(inner) = clause.strip_prefix('{').and_then(|c| c.strip_suffix('}')) {
        conv.lines
            .push(format!("const {{ {} }} = require({spec:?});", braces_to_destructure(inner)));
        return Ok(());
    }

    if let Some(ns) = clause.strip_prefix("* as ") {
        conv.lines.push(format!("const {} = require({spec:?});", ns.trim()));
        return Ok(());
    }

    if let Some((default_name, rest)) = clause.split_once(',') {
        let default_name = default_name.trim();
        let rest = rest.trim();
        let temp = conv.temp();
        conv.needs_interop = true;
        conv.lines.push(format!("const {temp} = require({spec:?});"));
        conv.lines.push(format!("const {default_name} = __jsbox_interop({temp});"));
        if let Some(inner) = rest.strip_prefix('{').and_then(|c| c.strip_suffix('}')) {
            conv.lines
                .push(format!("const {{ {} }} = {temp};", braces_to_destructure(inner)));
        } else if let Some(ns) = rest.strip_prefix("* as ") {
            conv.lines.push(format!("const {} = {temp};", ns.trim()));
        } else {
            return Err(RuntimeError::new(
                ErrorKind::TransformError,
                format!("unsupported import clause: {clause}"),
            ));
        }
        return Ok(());
    }

    if clause.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$') && !clause.is_empty() {
        conv.needs_interop = true;
        conv.lines.push(format!("const {clause} = __jsbox_interop(require({spec:?}));"));
        return Ok(());
    }

    Err(RuntimeError::new(
        ErrorKind::TransformError,
        format!("unsupported import clause: {clause}"),
    ))
}
