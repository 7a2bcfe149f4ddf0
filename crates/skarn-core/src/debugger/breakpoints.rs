//! The breakpoint table

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::error::{DebugError, DebugResult};

/// A source breakpoint
///
/// Identity is `(file, line)`; the condition is payload, not identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    /// Canonical absolute path of the source file
    pub file: PathBuf,

    /// 1-indexed source line
    pub line: u32,

    /// Optional condition expression in the target language; the probe
    /// stops only when it evaluates truthy in the stopped frame
    pub condition: Option<String>,
}

/// Keyed breakpoint lookup
///
/// Two-level map: line first, then file. The probe always knows the
/// current line for free, so the line level discards almost all candidates
/// before any path comparison happens.
#[derive(Debug, Default)]
pub struct BreakpointTable {
    by_line: HashMap<u32, HashMap<PathBuf, Breakpoint>>,
}

impl BreakpointTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a breakpoint
    ///
    /// Fails when a breakpoint already exists at `(file, line)`.
    pub fn add(
        &mut self,
        file: PathBuf,
        line: u32,
        condition: Option<String>,
    ) -> DebugResult<()> {
        let per_file = self.by_line.entry(line).or_default();
        if per_file.contains_key(&file) {
            return Err(DebugError::BreakpointExists { file, line });
        }
        per_file.insert(
            file.clone(),
            Breakpoint {
                file,
                line,
                condition,
            },
        );
        Ok(())
    }

    /// Remove the breakpoint at `(file, line)`
    ///
    /// Removing an absent breakpoint is a no-op: user interfaces issue
    /// removes wholesale when files close.
    pub fn remove(&mut self, file: &Path, line: u32) {
        if let Some(per_file) = self.by_line.get_mut(&line) {
            per_file.remove(file);
            if per_file.is_empty() {
                self.by_line.remove(&line);
            }
        }
    }

    /// Look up the breakpoint at `(file, line)`
    #[must_use]
    pub fn lookup(&self, file: &Path, line: u32) -> Option<&Breakpoint> {
        self.by_line.get(&line)?.get(file)
    }

    /// All breakpoints, ordered by line then file
    #[must_use]
    pub fn enumerate(&self) -> Vec<Breakpoint> {
        let mut all: Vec<Breakpoint> = self
            .by_line
            .values()
            .flat_map(|per_file| per_file.values().cloned())
            .collect();
        all.sort_by(|a, b| (a.line, &a.file).cmp(&(b.line, &b.file)));
        all
    }

    /// Number of breakpoints in the table
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_line.values().map(HashMap::len).sum()
    }

    /// True when the table holds no breakpoints
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_line.is_empty()
    }
}
