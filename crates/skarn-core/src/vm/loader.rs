//! Module loading - the resolver and the default filesystem loader
//!
//! `import` resolves through an ordered chain of `ModuleLoader`s held by the
//! VM. A loader that cannot locate a module answers `Ok(None)` so the next
//! loader in the chain gets a chance; the chain always ends with
//! `FsLoader`. The debugger installs its rewriting loader at the head of
//! the chain for the duration of a session.

use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::bytecode::{Compiler, Value};
use crate::parser::Parser;

use super::error::{RuntimeError, RuntimeErrorKind, RuntimeResult};
use super::Vm;

/// File extension of Skarn source files
pub const SOURCE_EXTENSION: &str = "skn";

/// Initializer file of a directory module
pub const PACKAGE_INIT: &str = "init.skn";

/// A resolver/loader for one way of turning a module name into a module value
pub trait ModuleLoader {
    /// Attempt to load `name`
    ///
    /// Returns `Ok(None)` when this loader cannot locate the module, letting
    /// resolution continue down the chain. Errors after the module has been
    /// located (unreadable file, compile failure, runtime failure of the
    /// module body) abort the import.
    fn load(&self, vm: &mut Vm, name: &str) -> RuntimeResult<Option<Value>>;
}

/// A located module file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModule {
    /// The source file to load
    pub file: PathBuf,
    /// For directory modules, the directory to add to the search path so
    /// nested imports resolve
    pub package_dir: Option<PathBuf>,
}

/// Resolve the leaf segment of a dotted module name against a search path
///
/// For each directory: a subdirectory `leaf/` containing the initializer
/// file wins over a plain `leaf.skn` file.
#[must_use]
pub fn resolve_module_file(name: &str, search_path: &[PathBuf]) -> Option<ResolvedModule> {
    let leaf = name.rsplit('.').next().unwrap_or(name);
    for entry in search_path {
        let dir = entry.join(leaf);
        if dir.is_dir() {
            let init = dir.join(PACKAGE_INIT);
            if init.is_file() {
                return Some(ResolvedModule {
                    file: init,
                    package_dir: Some(dir),
                });
            }
        }
        let file = entry.join(format!("{leaf}.{SOURCE_EXTENSION}"));
        if file.is_file() {
            return Some(ResolvedModule {
                file,
                package_dir: None,
            });
        }
    }
    None
}

/// Read, parse, and compile a module source file
///
/// The chunk's source path is the canonical form of `path`.
pub fn compile_module_file(name: &str, path: &Path) -> RuntimeResult<crate::bytecode::Function> {
    let import_failed = |message: String| {
        RuntimeError::new(RuntimeErrorKind::ImportFailed {
            name: name.to_string(),
            message,
        })
    };

    let source = fs::read_to_string(path).map_err(|e| import_failed(e.to_string()))?;
    let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let module = Parser::parse_module(&source).map_err(|e| import_failed(e.to_string()))?;
    Compiler::new()
        .compile_module(&module, Some(&canonical))
        .map_err(|e| import_failed(e.to_string()))
}

/// The default filesystem loader
pub struct FsLoader;

impl ModuleLoader for FsLoader {
    fn load(&self, vm: &mut Vm, name: &str) -> RuntimeResult<Option<Value>> {
        let Some(resolved) = resolve_module_file(name, vm.search_path()) else {
            return Ok(None);
        };

        let function = compile_module_file(name, &resolved.file)?;
        if let Some(dir) = resolved.package_dir {
            vm.add_search_path(dir);
        }

        let globals = vm.base_globals();
        vm.run_module(Rc::new(function), globals.clone())?;
        Ok(Some(vm.make_module_value(name, &resolved.file, globals)))
    }
}
