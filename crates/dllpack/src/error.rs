//! Error taxonomy shared by the vendor, build and watch pipelines.
//!
//! Library code returns these typed errors so callers (and tests) can tell a
//! configuration problem from a resolution or transform failure. The binary wraps
//! them in `anyhow` at the top level.

use std::path::PathBuf;

use thiserror::Error;

/// Failure of a source-to-source transform or of the tokenizer underneath it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    /// Malformed input (unterminated literal, unbalanced JSX, stray token)
    #[error("syntax error at {line}:{column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    /// Valid modern syntax that the down-levelling pass does not handle
    #[error("unsupported {construct} at line {line}")]
    Unsupported { construct: &'static str, line: usize },

    /// The linker met a module request that was never assigned an id
    #[error("module request '{0}' has no assigned id")]
    UnknownRequest(String),
}

impl TransformError {
    pub fn syntax(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            line,
            column,
            message: message.into(),
        }
    }

    pub fn unsupported(construct: &'static str, line: usize) -> Self {
        Self::Unsupported { construct, line }
    }
}

/// Errors surfaced by a build pass or by the watch loop.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A referenced manifest, entry file or watch directory is missing or invalid.
    /// Raised before any work starts.
    #[error("configuration error: {0}")]
    Config(String),

    /// An import matched neither the local file system nor the vendor manifest
    #[error("cannot resolve '{specifier}' from {}", importer.display())]
    Resolution { specifier: String, importer: PathBuf },

    #[error("failed to transform {}: {source}", path.display())]
    Transform {
        path: PathBuf,
        #[source]
        source: TransformError,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn transform(path: impl Into<PathBuf>, source: TransformError) -> Self {
        Self::Transform {
            path: path.into(),
            source,
        }
    }

    /// Check if this is a configuration error
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Check if this is a resolution error
    pub fn is_resolution(&self) -> bool {
        matches!(self, Self::Resolution { .. })
    }
}

pub type BuildResult<T> = Result<T, BuildError>;
