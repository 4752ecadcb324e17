use std::{fmt, path::PathBuf};

use thiserror::Error;

/// Core error type for the research pipeline.
///
/// Variants map onto the error kinds a run can surface to its caller
/// (`InvalidArgument`, `ExternalUnavailable`, `Timeout`, `Parse`,
/// `Internal`), plus the configuration/secret errors the ambient config
/// loader needs before a run can even start.
#[derive(Debug, Error)]
pub enum HdrpError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("external service unavailable: {0}")]
    ExternalUnavailable(String),
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("failed to parse response: {0}")]
    Parse(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HdrpError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }

    /// The error kind name as it appears in structured log payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::ExternalUnavailable(_) => "external_unavailable",
            Self::Timeout(_) => "timeout",
            Self::Parse(_) => "parse",
            Self::Internal(_) => "internal",
            Self::InvalidConfiguration(_) => "invalid_configuration",
            Self::MissingSecret(_) => "missing_secret",
            Self::ConfigIo { .. } => "config_io",
            Self::Other(_) => "internal",
        }
    }

    /// Generic, user-facing rendering; technical detail stays in the log.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidArgument(field) => format!("Invalid request: {field}."),
            Self::ExternalUnavailable(_) => {
                "Search service temporarily unavailable. Continuing with partial results…"
                    .to_string()
            }
            Self::Timeout(_) => "The request took too long and was cancelled.".to_string(),
            _ => "An unexpected error occurred. Continuing with partial results…".to_string(),
        }
    }
}

/// The kind of failure a single DAG node dispatch can produce.
///
/// Distinct from [`HdrpError`]: node failures are caught and isolated by
/// the executor (§4.2), never bubbled up as-is to the run boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeFailureKind {
    Validation,
    Timeout,
    ExternalUnavailable,
    Internal,
}

impl fmt::Display for NodeFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Timeout => "timeout",
            Self::ExternalUnavailable => "external_unavailable",
            Self::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

/// Error representing a single node's failure within the DAG executor.
#[derive(Debug, Clone)]
pub struct NodeFailure {
    pub kind: NodeFailureKind,
    pub reason: String,
}

impl NodeFailure {
    pub fn new(kind: NodeFailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    pub fn external_unavailable(reason: impl Into<String>) -> Self {
        Self::new(NodeFailureKind::ExternalUnavailable, reason)
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::new(NodeFailureKind::Internal, reason)
    }
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure: {}", self.kind, self.reason)
    }
}

impl std::error::Error for NodeFailure {}
