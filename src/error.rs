//! Error types for Trueno-MLRepo
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People)

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Trueno-MLRepo error types
#[derive(Error, Debug)]
pub enum Error {
    /// Name or version absent from the repository
    #[error("Object not found: {name}{}", version.map(|v| format!(" (version {v})")).unwrap_or_default())]
    NotFound {
        /// Requested object name
        name: String,
        /// Requested version, if a concrete one was asked for
        version: Option<u64>,
    },

    /// Commit rejected before any write (version monotonicity, category map, lineage)
    #[error("Integrity check failed: {0}\nNothing was written")]
    Integrity(String),

    /// Appended payload rows do not match the stored trailing dimensions
    #[error("Shape mismatch on field '{field}': stored trailing shape {expected:?}, appended {actual:?}")]
    ShapeMismatch {
        /// Payload field name
        field: String,
        /// Trailing dimensions of the stored array
        expected: Vec<usize>,
        /// Trailing dimensions of the appended rows
        actual: Vec<usize>,
    },

    /// Label id already bound to a different model version
    #[error("Label '{label}' is already bound to {model} version {version}")]
    DuplicateLabel {
        /// Label id
        label: String,
        /// Model the label currently points at
        model: String,
        /// Pinned model version
        version: u64,
    },

    /// Every iteration of a batch stage failed
    #[error("Stage {stage} failed for all {} target(s):\n{}", failures.len(), failures.join("\n"))]
    StageExecution {
        /// Stage name (evaluation, training, measures)
        stage: String,
        /// One line per failed target
        failures: Vec<String>,
    },

    /// Remote mirror unreachable or merge failed; local state unchanged
    #[error("Remote sync failed: {0}\nLocal repository state was left unchanged")]
    RemoteSync(String),

    /// A single-object lookup matched more than one version
    #[error("Ambiguous lookup for '{name}': {count} versions match the modifier filter")]
    AmbiguousMatch {
        /// Object name
        name: String,
        /// Number of matching versions
        count: usize,
    },

    /// Another stage is already running on this repository instance
    #[error("Stage {0} is already running on this repository")]
    StageInProgress(String),

    /// Object or derived name violates the naming rules
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// Invalid argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Storage backend error (KV records, payload files)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Numeric reduction failed
    #[error("Compute error: {0}")]
    Compute(String),

    /// Record (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a missing name/version.
    pub fn not_found(name: impl Into<String>, version: Option<u64>) -> Self {
        Self::NotFound {
            name: name.into(),
            version,
        }
    }

    /// True if this error reports an absent object.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
