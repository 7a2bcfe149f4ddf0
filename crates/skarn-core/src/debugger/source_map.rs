//! Source resolution - canonical paths and executable lines
//!
//! Breakpoints are keyed by absolute canonical path, and both sides of
//! every comparison (frames, breakpoints, user input) are normalized here
//! so a file reached through different spellings still matches.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use crate::bytecode::{Function, Value};

/// Canonical absolute form of a path
///
/// Falls back to making the path absolute against the current directory
/// when it cannot be canonicalized (e.g. it does not exist yet).
#[must_use]
pub fn canonical_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// The set of source lines a code object can execute
///
/// Collects every line appearing in the chunk's line table, including those
/// of nested function constants. Line 0 marks synthesized instructions and
/// is excluded. UIs use this to decide where a breakpoint can bind.
#[must_use]
pub fn executable_lines(function: &Function) -> BTreeSet<u32> {
    let mut lines = BTreeSet::new();
    collect_lines(function, &mut lines);
    lines
}

fn collect_lines(function: &Function, lines: &mut BTreeSet<u32>) {
    lines.extend(function.chunk.marked_lines().filter(|line| *line != 0));
    for constant in function.chunk.constants() {
        if let Value::Function(nested) = constant {
            collect_lines(nested, lines);
        }
    }
}

/// Read a source file as display lines for the code-context view
pub fn source_lines(path: &Path) -> io::Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    Ok(text.lines().map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Compiler;
    use crate::parser::Parser;

    #[test]
    fn test_executable_lines_spans_nested_functions() {
        let source = "a = 0\nfn f() {\n  return 1\n}\nb = 2\n";
        let module = Parser::parse_module(source).unwrap();
        let function = Compiler::new()
            .compile_module(&module, Some(Path::new("/tmp/t.skn")))
            .unwrap();
        let lines = executable_lines(&function);
        assert!(lines.contains(&1));
        assert!(lines.contains(&3)); // inside f
        assert!(lines.contains(&5));
    }

    #[test]
    fn test_canonical_path_resolves_relative_segments() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("m.skn");
        std::fs::write(&file, "a = 1").unwrap();
        let indirect = dir.path().join(".").join("m.skn");
        assert_eq!(canonical_path(&indirect), canonical_path(&file));
    }
}
