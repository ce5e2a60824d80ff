use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for the BDSIM regression harness.
///
/// Per-test outcomes (a comparator mismatch, a timeout, a missing output
/// file) are *not* errors: they are recorded as run statuses. Variants here
/// describe conditions that stop a harness operation outright.
#[derive(Error, Debug)]
pub enum RegressError {
    // === Filesystem ===
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A directory the pipeline depends on could not be created.
    #[error("cannot create directory '{path}': {source}")]
    DirectoryCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A required input file does not exist.
    #[error("file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    // === Parameter model ===
    /// The parameter tables violate a structural invariant.
    #[error("invalid parameter set: {detail}")]
    InvalidParameterSet { detail: String },

    /// Component type name not known to the harness.
    #[error("unknown component type: {name}")]
    UnknownComponent { name: String },

    /// Parameter not part of a component's schema.
    #[error("parameter '{param}' is not valid for component '{component}'")]
    UnknownParameter { component: String, param: String },

    /// Two mutually exclusive parameters were set on one component.
    #[error("parameters '{first}' and '{second}' are mutually exclusive for '{component}'")]
    ExclusiveParameters {
        component: String,
        first: String,
        second: String,
    },

    /// A test file name does not follow the naming grammar.
    #[error("invalid test file name '{name}': {detail}")]
    InvalidFileName { name: String, detail: String },

    // === Process orchestration ===
    /// An external program could not be started.
    #[error("failed to spawn '{program}': {detail}")]
    Spawn { program: String, detail: String },

    /// A worker thread panicked or disconnected.
    #[error("worker pool failure: {0}")]
    WorkerPool(String),

    // === Configuration / persistence ===
    /// Configuration rejected during validation.
    #[error("invalid configuration: {detail}")]
    InvalidConfig { detail: String },

    /// JSON encode/decode failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Persisted results were written with a different schema.
    #[error("unsupported results schema: expected {expected}, got {found}")]
    SchemaMismatch { expected: u32, found: u32 },

    // === Internal ===
    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result alias used by every harness crate.
pub type Result<T> = std::result::Result<T, RegressError>;

impl RegressError {
    /// Process exit code the CLI runner reports for this error.
    ///
    /// Codes 0 and 1 are reserved for "all passed" and "some tests failed".
    #[allow(clippy::match_same_arms)]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InvalidConfig { .. } => 2,
            Self::FileNotFound { .. } => 3,
            Self::InvalidParameterSet { .. }
            | Self::UnknownComponent { .. }
            | Self::UnknownParameter { .. }
            | Self::ExclusiveParameters { .. }
            | Self::InvalidFileName { .. } => 4,
            Self::Io(_) | Self::DirectoryCreate { .. } => 5,
            Self::Spawn { .. } | Self::WorkerPool(_) => 6,
            Self::Serialization(_) | Self::SchemaMismatch { .. } => 7,
            Self::Internal(_) => 70,
        }
    }

    /// Whether the suite pipeline must stop immediately on this error.
    ///
    /// Every later stage depends on the generated files and directories, so
    /// filesystem setup and configuration problems are never retried.
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DirectoryCreate { .. }
                | Self::InvalidConfig { .. }
                | Self::InvalidParameterSet { .. }
                | Self::WorkerPool(_)
                | Self::Internal(_)
        )
    }

    /// Human-friendly suggestion for fixing this error.
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::DirectoryCreate { .. } => {
                Some("Check permissions and free space for the output directory")
            }
            Self::Spawn { .. } => Some("Check that the simulator and comparator are on PATH"),
            Self::SchemaMismatch { .. } => {
                Some("Re-run the suite to regenerate the results file")
            }
            Self::UnknownComponent { .. } | Self::UnknownParameter { .. } => {
                Some("Compare the parameter set against the supported component list")
            }
            _ => None,
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a configuration error.
    pub fn config(detail: impl Into<String>) -> Self {
        Self::InvalidConfig {
            detail: detail.into(),
        }
    }

    /// Create a parameter-set error.
    pub fn parameter_set(detail: impl Into<String>) -> Self {
        Self::InvalidParameterSet {
            detail: detail.into(),
        }
    }
}

impl From<serde_json::Error> for RegressError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
