//! Sidecar error types.
//!
//! Every failure the sidecar can hit is a [`SidecarError`] variant.  The
//! variants fall into two groups: configuration errors, which are fatal and
//! surface immediately, and transient errors (connectivity, file I/O, store
//! calls), which a worker logs before moving on to its next cycle.
//! [`SidecarError::is_retryable`] draws that line.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by configuration, connectors and workers.
#[derive(Debug, Error)]
pub enum SidecarError {
    /// A descriptor names a stream type the dispatcher does not know.
    #[error("unknown stream type `{kind}` for {}", file.display())]
    UnknownStreamType { file: PathBuf, kind: String },

    /// A descriptor is missing a field its stream type requires.
    #[error("stream {} of type `{kind}` is missing required field `{field}`", file.display())]
    MissingField {
        file: PathBuf,
        kind: String,
        field: &'static str,
    },

    /// A push or check interval of zero seconds.
    #[error("stream {}: `{field}` must be greater than zero", file.display())]
    InvalidInterval { file: PathBuf, field: &'static str },

    /// The backup regex does not compile.
    #[error("stream {}: invalid regexPattern `{pattern}`", file.display())]
    InvalidPattern {
        file: PathBuf,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// The candidate glob built from a backup path does not compile.
    #[error("stream {}: cannot build scan pattern: {message}", file.display())]
    InvalidGlob { file: PathBuf, message: String },

    /// The source path has no final file name component.
    #[error("path {} has no file name", path.display())]
    NoFileName { path: PathBuf },

    /// The streams file could not be read or parsed.
    #[error("cannot load streams file {}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// Every bounded connection attempt failed.
    #[error("object store unavailable after {attempts} attempts: {last}")]
    StoreUnavailable { attempts: u32, last: String },

    /// Local file I/O failed (read, stat, delete).
    #[error("I/O error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Walking the filesystem for backup candidates failed.
    #[error("scan of {} failed: {message}", path.display())]
    Scan { path: PathBuf, message: String },

    /// An object store call failed.
    #[error("object store error")]
    Store(#[source] anyhow::Error),

    /// A worker task panicked or was aborted.
    #[error("worker task failed: {message}")]
    WorkerPanicked { message: String },
}

impl SidecarError {
    /// Whether a worker may log this error and carry on with its next cycle.
    ///
    /// Configuration errors are deterministic: retrying cannot fix them, so
    /// they are surfaced instead.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SidecarError::StoreUnavailable { .. }
                | SidecarError::Io { .. }
                | SidecarError::Scan { .. }
                | SidecarError::Store(_)
        )
    }

    /// Short, stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SidecarError::UnknownStreamType { .. } => "unknown_stream_type",
            SidecarError::MissingField { .. } => "missing_field",
            SidecarError::InvalidInterval { .. } => "invalid_interval",
            SidecarError::InvalidPattern { .. } => "invalid_pattern",
            SidecarError::InvalidGlob { .. } => "invalid_glob",
            SidecarError::NoFileName { .. } => "no_file_name",
            SidecarError::Config { .. } => "config",
            SidecarError::StoreUnavailable { .. } => "store_unavailable",
            SidecarError::Io { .. } => "io",
            SidecarError::Scan { .. } => "scan",
            SidecarError::Store(_) => "store",
            SidecarError::WorkerPanicked { .. } => "worker_panicked",
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SidecarError::Io {
            path: path.into(),
            source,
        }
    }
}
