//! Error classification for the execution core.
//!
//! Two layers exist. [`ErrorKind`] classifies language-level errors, which are
//! thrown as ordinary script values and can be caught by handlers. [`VmError`]
//! is what an embedder sees when a top-level invocation does not complete
//! normally.

use crate::{StackFrame, Value};
use serde::{Deserialize, Serialize};

/// The kind of a language-level error object.
///
/// These correspond to the built-in error constructors; each kind has its own
/// prototype carrying the `name` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Plain `Error`
    Error,
    /// Syntax error reported by a front end
    SyntaxError,
    /// Type error (e.g., calling a non-function)
    TypeError,
    /// Reference to an unresolvable name
    ReferenceError,
    /// Value out of allowed range, including call stack exhaustion
    RangeError,
    /// Error in eval()
    EvalError,
    /// Error in URI handling functions
    URIError,
    /// Internal engine error surfaced to scripts
    InternalError,
}

impl ErrorKind {
    /// Every kind, in prototype installation order.
    pub const ALL: [ErrorKind; 8] = [
        ErrorKind::Error,
        ErrorKind::SyntaxError,
        ErrorKind::TypeError,
        ErrorKind::ReferenceError,
        ErrorKind::RangeError,
        ErrorKind::EvalError,
        ErrorKind::URIError,
        ErrorKind::InternalError,
    ];

    /// The constructor name scripts observe through `error.name`.
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ReferenceError => "ReferenceError",
            ErrorKind::RangeError => "RangeError",
            ErrorKind::EvalError => "EvalError",
            ErrorKind::URIError => "URIError",
            ErrorKind::InternalError => "InternalError",
        }
    }

    /// Inverse of [`ErrorKind::name`].
    pub fn from_name(name: &str) -> Option<ErrorKind> {
        ErrorKind::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

/// A rendered language error with the stack captured when it was thrown.
///
/// Produced for embedders that want a readable report of an uncaught
/// exception; scripts never see this type.
///
/// # Examples
///
/// ```
/// use core_types::{JsError, ErrorKind};
///
/// let error = JsError {
///     kind: ErrorKind::TypeError,
///     message: "undefined is not a function".to_string(),
///     stack: vec![],
///     source_position: None,
/// };
///
/// assert_eq!(error.to_string(), "TypeError: undefined is not a function");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsError {
    /// The type of error
    pub kind: ErrorKind,
    /// Human-readable error message
    pub message: String,
    /// Stack trace (call stack at the time of the throw)
    pub stack: Vec<StackFrame>,
    /// Source position where the error occurred
    pub source_position: Option<crate::SourcePosition>,
}

impl std::fmt::Display for JsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.name(), self.message)?;
        for frame in &self.stack {
            write!(f, "\n    at {}", frame)?;
        }
        Ok(())
    }
}

/// Abnormal completion of a top-level invocation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VmError {
    /// A script exception reached the invocation boundary uncaught.
    #[error("uncaught exception: {0}")]
    Exception(Value),
    /// The heap limit was exceeded even after a full collection.
    #[error("out of memory: heap limit of {limit} bytes exceeded")]
    OutOfMemory {
        /// Configured hard limit in bytes
        limit: usize,
    },
    /// Execution was cancelled through the interrupt flag or the watchdog.
    #[error("execution interrupted")]
    Interrupted,
    /// The bytecode failed validation and was never run.
    #[error("invalid bytecode: {0}")]
    InvalidBytecode(String),
    /// A handle passed by the embedder refers to a cell that no longer exists.
    #[error("stale cell handle")]
    StaleHandle,
}

impl VmError {
    /// The thrown value for script exceptions.
    pub fn exception(&self) -> Option<Value> {
        match self {
            VmError::Exception(value) => Some(*value),
            _ => None,
        }
    }

    /// Whether script handlers are allowed to observe this failure.
    pub fn is_catchable(&self) -> bool {
        matches!(self, VmError::Exception(_))
    }
}
