//! Error kinds for the preprocess pipeline
//!
//! Every stage returns on first error; the kind survives to the process
//! exit code so callers can tell a manifest parse failure from a failed
//! subprocess without scraping stderr.

use std::io;
use std::path::Path;
use thiserror::Error;

/// Errors produced by the preprocess pipeline.
#[derive(Error, Debug)]
pub enum WeaveError {
    /// The environment forbids module-aware builds.
    #[error("modules are disabled: {0}")]
    NotModularized(String),

    /// Structural failure: module, main package, or bootstrap location.
    #[error("preprocess failed: {0}")]
    Preprocess(String),

    /// Manifest or source parse failure.
    #[error("parse failed: {0}")]
    Parse(String),

    /// Open/create/mkdir/copy failure.
    #[error("{context}: {source}")]
    FileIo {
        context: String,
        #[source]
        source: io::Error,
    },

    /// A driver/tidy/vendor/build subprocess exited non-zero.
    #[error("command `{command}` failed:\n{output}")]
    Subprocess { command: String, output: String },

    /// A subprocess could not even be launched.
    #[error("failed to launch `{command}`: {source}")]
    RunCmd {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// Result type for preprocess operations.
pub type Result<T> = std::result::Result<T, WeaveError>;

impl WeaveError {
    /// Stable per-kind process exit code (0 is success, 1 is reserved for
    /// pass-through children that died without a code).
    pub fn exit_code(&self) -> i32 {
        match self {
            WeaveError::NotModularized(_) => 2,
            WeaveError::Preprocess(_) => 3,
            WeaveError::Parse(_) => 4,
            WeaveError::FileIo { .. } => 5,
            WeaveError::Subprocess { .. } => 6,
            WeaveError::RunCmd { .. } => 7,
        }
    }

    /// Wrap an I/O error with the path and operation that produced it.
    pub fn file_io(op: &str, path: &Path, source: io::Error) -> Self {
        WeaveError::FileIo {
            context: format!("{} {}", op, path.display()),
            source,
        }
    }
}

impl From<serde_json::Error> for WeaveError {
    fn from(err: serde_json::Error) -> Self {
        WeaveError::Parse(err.to_string())
    }
}
