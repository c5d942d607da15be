use std::path::PathBuf;
use thiserror::Error;

/// Error type external constructors and filters may hand back.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Build-time failure turning a [`FilterSpec`](super::FilterSpec) into a filter.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("unknown filter kind: {name}")]
    UnknownKind { name: String },

    #[error("failed to load external filter module {}: {source}", .path.display())]
    ModuleLoad {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("entry point `{symbol}` not found in external filter module {}", .path.display())]
    EntryPointMissing { path: PathBuf, symbol: &'static str },

    #[error(
        "entry point `{symbol}` in {} has the wrong shape: expected {expected}, found {found}",
        .path.display()
    )]
    EntryPointMismatch {
        path: PathBuf,
        symbol: &'static str,
        expected: String,
        found: String,
    },

    #[error("external filter constructor in {} failed: {source}", .path.display())]
    Constructor {
        path: PathBuf,
        #[source]
        source: BoxError,
    },
}

/// Per-request failure raised by a filter while processing a context.
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("{filter} is misconfigured: {reason}")]
    Misconfigured { filter: String, reason: String },

    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("{0}")]
    Internal(String),

    #[error(transparent)]
    Plugin(#[from] BoxError),
}

impl FilterError {
    pub fn internal(msg: impl Into<String>) -> Self {
        FilterError::Internal(msg.into())
    }
}
