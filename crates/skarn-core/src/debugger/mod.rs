//! Debugger module - the bytecode-rewriting debug engine
//!
//! The engine instruments every code object of a target program so that a
//! probe runs before each source line, then coordinates that probe with an
//! interactive interface:
//!
//! - `rewriter`: inserts the probe call sequence and re-targets jumps
//! - `breakpoints`: the `(file, line) -> condition` table
//! - `control`: the shared state machine (mode, run state, step-over
//!   anchor, stop snapshot) both threads synchronize through
//! - `probe`: the suspension point, and the prompt handed to the interface
//! - `loader`: the import interceptor that rewrites loaded modules
//! - `session`: orchestration of one debugging run
//! - `source_map`: canonical paths and executable-line queries

mod breakpoints;
mod control;
mod error;
mod loader;
mod probe;
mod rewriter;
mod session;
mod source_map;

pub use breakpoints::{Breakpoint, BreakpointTable};
pub use control::{DebugControl, DebugMode, FrameSummary, RunState};
pub use error::{DebugError, DebugResult};
pub use loader::DebugLoader;
pub use probe::{DebugInterface, DebugPrompt, Probe};
pub use rewriter::{instrument, RewriteError, PROBE_GLOBAL};
pub use session::{DebugSession, SessionConfig, ENTRY_SENTINEL};
pub use source_map::{canonical_path, executable_lines, source_lines};
