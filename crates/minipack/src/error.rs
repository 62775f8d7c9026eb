//! Error types for a bundle build.
//!
//! Any single failure aborts the whole build. Every variant that concerns a
//! file carries its path so the CLI can report what failed and where.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for build operations.
pub type Result<T> = std::result::Result<T, BundleError>;

/// Failures reported by a [`SourceTransformer`](crate::transformer::SourceTransformer).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    /// The source text could not be parsed.
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    /// The source parsed but could not be rewritten for the target runtime.
    #[error("{message}")]
    Transform { message: String },

    /// The source uses a construct the bundler deliberately does not handle.
    #[error("line {line}: unsupported {construct}")]
    Unsupported { line: usize, construct: String },
}

/// Errors that abort a build.
#[derive(Error, Debug)]
pub enum BundleError {
    /// A unit's file is missing or unreadable.
    #[error("io error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The source transformer rejected a unit.
    #[error("{} error in {}: {source}", kind_of(source), path.display())]
    Transform {
        path: PathBuf,
        #[source]
        source: TransformError,
    },

    /// A file imports itself through its own chain of importers.
    #[error("import cycle detected: {}", format_chain(chain))]
    Cycle { chain: Vec<PathBuf> },

    /// The graph grew past the configured unit budget.
    #[error("unit budget of {limit} exceeded while loading {}", path.display())]
    UnitBudgetExceeded { limit: usize, path: PathBuf },

    /// The worker pool for parallel loads could not be created.
    #[error("failed to create worker pool: {message}")]
    ThreadPool { message: String },
}

impl BundleError {
    /// Stable name of the failure kind, used in user-facing reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io { .. } => "io",
            Self::Transform { source, .. } => kind_of(source),
            Self::Cycle { .. } => "cycle",
            Self::UnitBudgetExceeded { .. } => "budget",
            Self::ThreadPool { .. } => "thread-pool",
        }
    }

    /// The file the failure is attributed to, if any.
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::Io { path, .. }
            | Self::Transform { path, .. }
            | Self::UnitBudgetExceeded { path, .. } => Some(path),
            Self::Cycle { chain } => chain.last().map(PathBuf::as_path),
            Self::ThreadPool { .. } => None,
        }
    }
}

fn kind_of(error: &TransformError) -> &'static str {
    match error {
        TransformError::Parse { .. } => "parse",
        TransformError::Transform { .. } | TransformError::Unsupported { .. } => "transform",
    }
}

fn format_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}
