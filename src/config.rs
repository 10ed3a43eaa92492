//! Runtime configuration record.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, Result, RuntimeError};

/// How much the host trusts executed code. The kernel records the
/// mode; enforcement lives in the sandbox collaborators.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustMode {
    Trusted,
    Worker,
    Sandbox,
    Locked,
}

impl Default for TrustMode {
    fn default() -> Self {
        TrustMode::Trusted
    }
}

/// Immutable configuration fixed at kernel creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Working directory for top-level `require`/`import` calls.
    pub cwd: String,
    /// Environment mapping surfaced to `process.env` shims.
    pub env: HashMap<String, String>,
    pub mode: TrustMode,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { cwd: "/".to_owned(), env: HashMap::new(), mode: TrustMode::default() }
    }
}

impl RuntimeConfig {
    /// Parses a TOML document; missing fields take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| {
            RuntimeError::new(ErrorKind::Parse, format!("invalid runtime config: {err}"))
        })
    }

    /// Loads configuration from a TOML file on the host filesystem.
    pub fn from_toml_path(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            RuntimeError::new(ErrorKind::InvalidArgument, format!("cannot read config: {err}"))
                .with_context(path.display().to_string())
        })?;
        Self::from_toml_str(&text)
    }

    /// The `from` path used for top-level loads: the cwd with a
    /// trailing slash so relative specifiers resolve inside it.
    pub fn require_base(&self) -> String {
        if self.cwd.ends_with('/') {
            self.cwd.clone()
        } else {
            format!("{}/", self.cwd)
        }
    }
}
