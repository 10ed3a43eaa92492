//! Tagged runtime errors shared by every subsystem.

use std::fmt;

/// Result of runtime operations with error type [`RuntimeError`].
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Filesystem precondition failures carried by [`ErrorKind::Fs`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FsErrorKind {
    /// A path component was missing while following the path.
    NotFound,
    /// A file operation was applied to a directory.
    IsDirectory,
    /// A directory operation was applied to a non-directory.
    NotDirectory,
    /// A create operation hit an already existing node.
    AlreadyExists,
    /// A non-recursive directory removal hit a non-empty directory.
    NotEmpty,
}

impl fmt::Display for FsErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FsErrorKind::NotFound => "NotFound",
            FsErrorKind::IsDirectory => "IsDirectory",
            FsErrorKind::NotDirectory => "NotDirectory",
            FsErrorKind::AlreadyExists => "AlreadyExists",
            FsErrorKind::NotEmpty => "NotEmpty",
        };
        f.write_str(name)
    }
}

/// Closed set of error tags.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A specifier did not resolve to a file or builtin, or a resolved
    /// file disappeared before it could be read.
    ModuleNotFound,
    /// Source text could not be parsed.
    Parse,
    /// A module body raised while executing.
    Execution,
    /// A filesystem precondition was violated.
    Fs(FsErrorKind),
    /// A filesystem operation is forbidden on its target, for example
    /// `unlink` on a directory or non-recursive removal of the root.
    FsPermission,
    /// General plugin fault, including access to the VFS before the
    /// VFS plugin registered it.
    PluginError,
    /// A plugin dependency is missing, cyclic, or still depended upon.
    PluginDependency,
    /// A plugin name was registered twice.
    PluginDuplicate,
    /// A collaborator-side network fault.
    NetworkError,
    /// The transform pipeline rejected a source.
    TransformError,
    /// An argument failed validation before any work happened.
    InvalidArgument,
    /// The operation is not supported by this build or mode.
    NotSupported,
    /// Symlink resolution exceeded the hop budget.
    TooManyLinks,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::ModuleNotFound => f.write_str("ModuleNotFound"),
            ErrorKind::Parse => f.write_str("Parse"),
            ErrorKind::Execution => f.write_str("Execution"),
            ErrorKind::Fs(reason) => write!(f, "FSError({reason})"),
            ErrorKind::FsPermission => f.write_str("FSPermission"),
            ErrorKind::PluginError => f.write_str("PluginError"),
            ErrorKind::PluginDependency => f.write_str("PluginDependency"),
            ErrorKind::PluginDuplicate => f.write_str("PluginDuplicate"),
            ErrorKind::NetworkError => f.write_str("NetworkError"),
            ErrorKind::TransformError => f.write_str("TransformError"),
            ErrorKind::InvalidArgument => f.write_str("InvalidArgument"),
            ErrorKind::NotSupported => f.write_str("NotSupported"),
            ErrorKind::TooManyLinks => f.write_str("TooManyLinks"),
        }
    }
}

/// Error value carried through every runtime code path.
///
/// The tag identifies the failure class, `context` names the locus
/// (usually a file path or plugin name) and `hint` is an optional
/// human-facing suggestion produced by [`fix_hint`].
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
    pub context: Option<String>,
    pub hint: Option<String>,
}

impl RuntimeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let hint = fix_hint(kind, &message);
        Self { kind, message, context: None, hint }
    }

    /// Attach the locus of the failure.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Override the suggested fix.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn module_not_found(specifier: &str) -> Self {
        Self::new(ErrorKind::ModuleNotFound, format!("Cannot find module '{specifier}'"))
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn fs(reason: FsErrorKind, message: impl Into<String>, path: &str) -> Self {
        Self::new(ErrorKind::Fs(reason), message).with_context(path)
    }

    pub fn not_found(path: &str) -> Self {
        Self::fs(FsErrorKind::NotFound, format!("no such file or directory: {path}"), path)
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)?;
        if let Some(context) = &self.context {
            write!(f, " ({context})")?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

/// Maps well-known message patterns to canned fix suggestions.
pub fn fix_hint(kind: ErrorKind, message: &str) -> Option<String> {
    match kind {
        ErrorKind::ModuleNotFound => {
            let name = message.strip_prefix("Cannot find module '")?.strip_suffix('\'')?;
            if name.starts_with('.') || name.starts_with('/') {
                Some(format!("Check that the file '{name}' exists in the filesystem"))
            } else {
                Some(format!("Install with: runtime.npm.install('{name}')"))
            }
        }
        ErrorKind::PluginDependency => {
            Some("Register the missing plugin before the one that depends on it".into())
        }
        ErrorKind::TooManyLinks => {
            Some("A symlink chain exceeds 40 hops; look for a symlink loop".into())
        }
        _ => None,
    }
}
