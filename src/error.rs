use crate::ir::{BlockId, StmtId};
use miette::Diagnostic;
use thiserror::Error;

/// Result type for IR analysis and transform operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while analyzing or rewriting kernel IR.
///
/// Everything except `Io` and `Json` indicates a malformed tree handed over by
/// an upstream pass; compilation of the current kernel is aborted.
#[derive(Error, Debug, Diagnostic, Clone, PartialEq)]
pub enum Error {
    #[error("I/O error: {0}")]
    #[diagnostic(code(kernel_cfg::io_error))]
    Io(String),

    #[error("JSON error: {message}")]
    #[diagnostic(code(kernel_cfg::json_error))]
    Json { message: String },

    #[error("Exit {stmt} targets {scope}, which is not an enclosing loop or offloaded task")]
    #[diagnostic(
        code(kernel_cfg::invalid_scope),
        help("the inlining pass must only scope exits to ancestors of the exit statement")
    )]
    InvalidScope { stmt: StmtId, scope: StmtId },

    #[error("Statement {stmt} is not attached to any block")]
    #[diagnostic(code(kernel_cfg::detached_statement))]
    Detached { stmt: StmtId },

    #[error("Malformed IR tree: {message}")]
    #[diagnostic(code(kernel_cfg::malformed_tree))]
    MalformedTree { message: String },

    #[error("CFG invariant violated in {block:?}: {message}")]
    #[diagnostic(code(kernel_cfg::invariant_violation))]
    InvariantViolation {
        block: Option<BlockId>,
        message: String,
    },

    #[error("Internal error: {message}")]
    #[diagnostic(code(kernel_cfg::internal_error))]
    Internal { message: String },
}

impl Error {
    /// Create a malformed-tree error
    pub fn malformed(message: impl Into<String>) -> Self {
        Error::MalformedTree {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json {
            message: err.to_string(),
        }
    }
}
