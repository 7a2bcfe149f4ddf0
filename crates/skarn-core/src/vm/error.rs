//! Runtime errors for the Skarn virtual machine

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// A runtime error that occurred during VM execution
#[derive(Debug, Clone)]
pub struct RuntimeError {
    /// The kind of error
    pub kind: RuntimeErrorKind,

    /// Stack trace at the point of error, newest frame first
    pub stack_trace: Vec<TraceFrame>,
}

impl RuntimeError {
    /// Create a new runtime error with an empty trace
    #[must_use]
    pub fn new(kind: RuntimeErrorKind) -> Self {
        Self {
            kind,
            stack_trace: Vec::new(),
        }
    }

    /// Attach a stack trace, replacing any existing one
    #[must_use]
    pub fn with_trace(mut self, trace: Vec<TraceFrame>) -> Self {
        self.stack_trace = trace;
        self
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "runtime error: {}", self.kind)?;
        for frame in &self.stack_trace {
            write!(f, "\n  at {} (line {})", frame.function, frame.line)?;
            if let Some(source) = &frame.source {
                write!(f, " in {}", source.display())?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

/// One entry of a runtime stack trace
#[derive(Debug, Clone)]
pub struct TraceFrame {
    /// The function name
    pub function: String,

    /// The source line number
    pub line: u32,

    /// The source file, if locatable
    pub source: Option<PathBuf>,
}

/// The kind of runtime error
#[derive(Error, Debug, Clone)]
pub enum RuntimeErrorKind {
    #[error("type error: {operation} expected {expected}, got {got}")]
    TypeError {
        expected: &'static str,
        got: &'static str,
        operation: &'static str,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("undefined variable '{0}'")]
    UndefinedVariable(String),

    #[error("module '{module}' has no member '{name}'")]
    UndefinedAttribute { module: String, name: String },

    #[error("{0} is not callable")]
    NotCallable(&'static str),

    #[error("expected {expected} arguments, got {got}")]
    ArityMismatch { expected: u8, got: u8 },

    #[error("stack underflow")]
    StackUnderflow,

    #[error("call stack overflow")]
    StackOverflow,

    #[error("invalid opcode: {0}")]
    InvalidOpcode(u8),

    #[error("no module named '{0}'")]
    ImportNotFound(String),

    #[error("cannot load module '{name}': {message}")]
    ImportFailed { name: String, message: String },

    #[error("input error: {0}")]
    Io(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for VM operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;
