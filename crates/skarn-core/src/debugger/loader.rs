//! The import interceptor - rewrites every module the target imports
//!
//! Installed at the head of the VM's loader chain for the lifetime of a
//! debug session, so a module imported by the target is compiled, run
//! through the bytecode rewriter, given the `debug` probe binding, and only
//! then executed. Modules the interceptor cannot locate fall through to
//! the rest of the chain.

use std::rc::Rc;

use crate::bytecode::{NativeFunction, Value};
use crate::vm::{compile_module_file, resolve_module_file, ModuleLoader, RuntimeResult, Vm};

use super::rewriter::{instrument, PROBE_GLOBAL};

/// The rewriting module loader
pub struct DebugLoader {
    /// The session's probe, bound as `debug` in every loaded module
    probe: NativeFunction,
}

impl DebugLoader {
    /// Create an interceptor binding the given probe
    #[must_use]
    pub fn new(probe: NativeFunction) -> Self {
        Self { probe }
    }
}

impl ModuleLoader for DebugLoader {
    fn load(&self, vm: &mut Vm, name: &str) -> RuntimeResult<Option<Value>> {
        let Some(resolved) = resolve_module_file(name, vm.search_path()) else {
            // Not ours; let the rest of the chain try
            return Ok(None);
        };
        tracing::debug!(module = name, file = %resolved.file.display(), "loading under debug");

        let function = compile_module_file(name, &resolved.file)?;
        let function = instrument(&function);
        if let Some(dir) = resolved.package_dir {
            vm.add_search_path(dir);
        }

        let globals = vm.base_globals();
        globals
            .borrow_mut()
            .insert(PROBE_GLOBAL.to_string(), Value::Native(self.probe.clone()));
        vm.run_module(Rc::new(function), globals.clone())?;
        Ok(Some(vm.make_module_value(name, &resolved.file, globals)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Compiler;
    use crate::parser::Parser;
    use std::cell::Cell;
    use std::fs;

    fn import_with(vm: &mut Vm, source: &str) {
        let module = Parser::parse_module(source).unwrap();
        let function = Compiler::new().compile_module(&module, None).unwrap();
        let globals = vm.base_globals();
        vm.run_module(Rc::new(function), globals).unwrap();
    }

    #[test]
    fn test_imported_module_runs_probe() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("lib.skn"), "a = 1\nb = 2\n").unwrap();

        let hits = Rc::new(Cell::new(0));
        let probe = {
            let hits = hits.clone();
            NativeFunction::new(PROBE_GLOBAL, Some(0), move |_, _| {
                hits.set(hits.get() + 1);
                Ok(Value::Null)
            })
        };

        let mut vm = Vm::new();
        vm.add_search_path(dir.path().to_path_buf());
        vm.install_loader(Rc::new(DebugLoader::new(probe)));
        import_with(&mut vm, "import lib");

        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn test_uninstall_restores_plain_imports() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("lib.skn"), "a = 1\n").unwrap();

        let hits = Rc::new(Cell::new(0));
        let probe = {
            let hits = hits.clone();
            NativeFunction::new(PROBE_GLOBAL, Some(0), move |_, _| {
                hits.set(hits.get() + 1);
                Ok(Value::Null)
            })
        };

        let mut vm = Vm::new();
        vm.add_search_path(dir.path().to_path_buf());
        vm.install_loader(Rc::new(DebugLoader::new(probe)));
        import_with(&mut vm, "import lib");
        assert_eq!(hits.get(), 1);

        // Teardown: remove the interceptor and drop cached modules
        vm.uninstall_loader();
        vm.invalidate_module_cache();

        import_with(&mut vm, "import lib");
        // The fresh import went through the plain loader: no new probe hits
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_unresolvable_module_falls_through() {
        let probe = NativeFunction::new(PROBE_GLOBAL, Some(0), |_, _| Ok(Value::Null));
        let mut vm = Vm::new();
        vm.install_loader(Rc::new(DebugLoader::new(probe)));

        let module = Parser::parse_module("import nothing_here").unwrap();
        let function = Compiler::new().compile_module(&module, None).unwrap();
        let globals = vm.base_globals();
        let err = vm.run_module(Rc::new(function), globals).unwrap_err();
        assert!(matches!(
            err.kind,
            crate::vm::RuntimeErrorKind::ImportNotFound(_)
        ));
    }
}
