//! Error types for the path tracer.
//!
//! Every fallible operation returns [`Result`]. Callers that need to decide
//! between shutting down and degrading to a default ask [`Error::severity`]
//! instead of matching on variants.

use std::path::PathBuf;
use thiserror::Error;

/// How the frame loop reacts to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Rendering cannot continue; log and exit.
    Fatal,
    /// Log and fall back to a well-defined default (build fresh, use defaults).
    Recoverable,
}

/// Main error type.
#[derive(Error, Debug)]
pub enum Error {
    /// File does not exist or cannot be accessed
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// Hierarchy cache file is corrupt or belongs to another triangle set
    #[error("Invalid hierarchy cache: {0}")]
    InvalidCache(String),

    /// Saved state file is truncated
    #[error("Invalid state file: {0}")]
    InvalidState(String),

    /// Mesh extension is not one of the supported formats
    #[error("Unsupported mesh format: {0}")]
    UnsupportedFormat(String),

    /// Mesh file could not be parsed
    #[error("Mesh parse error: {0}")]
    MeshParse(String),

    /// Scene contains no triangles
    #[error("Scene has no triangles: {0}")]
    EmptyScene(PathBuf),

    /// Environment map missing, undecodable or black
    #[error("Environment map unusable: {0}")]
    EnvMap(String),

    /// Compute backend failed while executing a stage
    #[error("Backend failure in {stage}: {message}")]
    Backend { stage: &'static str, message: String },

    /// Memory mapping failed
    #[error("Memory mapping failed: {0}")]
    MmapFailed(String),

    /// Image encode/decode error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// OBJ loader error
    #[error("OBJ load error: {0}")]
    Obj(#[from] tobj::LoadError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a backend failure for the named stage.
    pub fn backend(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Backend { stage, message: message.into() }
    }

    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create an invalid cache error.
    pub fn invalid_cache(msg: impl Into<String>) -> Self {
        Self::InvalidCache(msg.into())
    }

    /// Map an I/O open failure, turning `NotFound` into [`Error::FileNotFound`].
    pub fn from_open(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::FileNotFound(path.into())
        } else {
            Self::Io(err)
        }
    }

    /// Only compute backend faults stop the renderer.
    pub fn severity(&self) -> Severity {
        match self {
            Self::Backend { .. } => Severity::Fatal,
            _ => Severity::Recoverable,
        }
    }

    #[inline]
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::backend("extend", "device lost");
        assert!(e.to_string().contains("extend"));
        assert!(e.to_string().contains("device lost"));

        let e = Error::FileNotFound(PathBuf::from("state_abc.dat"));
        assert!(e.to_string().contains("state_abc.dat"));
    }

    #[test]
    fn test_severity() {
        assert_eq!(Error::backend("splat", "x").severity(), Severity::Fatal);
        assert!(Error::backend("splat", "x").is_fatal());
        assert_eq!(Error::FileNotFound("a".into()).severity(), Severity::Recoverable);
        assert_eq!(Error::invalid_cache("bad magic").severity(), Severity::Recoverable);
        assert_eq!(Error::EnvMap("black".into()).severity(), Severity::Recoverable);
    }

    #[test]
    fn test_from_open() {
        let nf = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(Error::from_open(nf, "x.bin"), Error::FileNotFound(_)));

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no");
        assert!(matches!(Error::from_open(denied, "x.bin"), Error::Io(_)));
    }
}
