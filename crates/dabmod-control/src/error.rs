//! Error types for the control client.
//!
//! Every fallible operation returns [`Result<T>`]. Nothing is retried
//! internally; each variant reaches the caller as-is.

use std::path::PathBuf;

use crate::wire::WireError;

/// The error type for all control-client operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The connection could not be opened or the liveness probe failed.
    #[error("could not ping engine at {endpoint}: {reason}")]
    Connection { endpoint: String, reason: String },

    /// The exchange failed after the probe succeeded.
    #[error("exchange {message:?} failed: {reason}")]
    Transport { message: String, reason: String },

    /// An argument was outside its accepted range. Raised before any I/O.
    #[error("invalid value: {0}")]
    Validation(String),

    /// The coefficient file violates its layout.
    #[error("incorrect coef file format in {}: {issue}", path.display())]
    Format { path: PathBuf, issue: FormatIssue },

    /// AM/PM coefficient sequences do not pair up.
    #[error("coefficient invariant violated: {0}")]
    Invariant(String),

    /// A scalar reply could not be read as the expected type.
    #[error("cannot parse reply {reply:?} to {command:?} as {expected}")]
    Parse {
        command: String,
        reply: Vec<String>,
        expected: &'static str,
    },

    /// The engine answered with `fail`.
    #[error("engine rejected {command:?}: {reason}")]
    Rejected { command: String, reason: String },

    /// The client's shutdown signal fired while an exchange was in flight.
    #[error("exchange cancelled")]
    Cancelled,

    /// Invalid client configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Malformed ZMTP traffic.
    #[error("wire protocol error: {0}")]
    Wire(#[from] WireError),

    /// Socket-level I/O failure.
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),

    /// Filesystem failure on the coefficient file.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What exactly is wrong with a coefficient file.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FormatIssue {
    #[error("file is empty, expected a coefficient count")]
    MissingCount,

    #[error("line 1: {0:?} is not a coefficient count")]
    BadCount(String),

    #[error("line {line}: {text:?} is not a number")]
    BadValue { line: usize, text: String },

    #[error("too many coefficients, should be {expected}, coefs are {coefs:?}")]
    TooMany { expected: usize, coefs: Vec<f64> },

    #[error("too few coefficients, should be {expected} pairs, found {found} values")]
    TooFew { expected: usize, found: usize },
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
