//! Error types for the debugger

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the debugger's command surface
#[derive(Error, Debug, Clone)]
pub enum DebugError {
    #[error("a breakpoint already exists at {}:{line}", file.display())]
    BreakpointExists { file: PathBuf, line: u32 },

    #[error("no target frame at depth {0}")]
    NoSuchFrame(usize),

    #[error("cannot load {}: {message}", path.display())]
    Load { path: PathBuf, message: String },

    #[error("evaluation failed: {0}")]
    Eval(String),
}

/// Result type for debugger operations
pub type DebugResult<T> = Result<T, DebugError>;
