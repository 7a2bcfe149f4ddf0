//! Debug sessions - orchestration of one debugging run
//!
//! A session takes an entry file and a `DebugInterface`, compiles and
//! rewrites the entry code, installs the import interceptor, and executes
//! the target under scoped streams, working directory, and argument
//! vector. `run` hosts the target on the calling thread (the console
//! embedding); `start` spawns a dedicated target thread (the UI
//! embedding). Only one session should be active per process: the working
//! directory substitution is process-global.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::bytecode::{Compiler, Value};
use crate::parser::Parser;
use crate::vm::{Console, InputSource, OutputSink, Vm};

use super::control::{DebugControl, DebugMode};
use super::loader::DebugLoader;
use super::probe::{DebugInterface, Probe};
use super::rewriter::{instrument, PROBE_GLOBAL};
use super::source_map::canonical_path;

/// Global marking the entry module of a debugged program
pub const ENTRY_SENTINEL: &str = "__main__";

/// Configuration of a debug session
pub struct SessionConfig {
    /// Initial debug mode
    pub mode: DebugMode,

    /// Target stdout; defaults to the host stream
    pub stdout: Arc<dyn OutputSink>,

    /// Target stderr; defaults to the host stream
    pub stderr: Arc<dyn OutputSink>,

    /// Target stdin; defaults to the host stream
    pub stdin: Arc<dyn InputSource>,

    /// Invoked after the target finishes, for embedder cleanup
    pub after_stop: Option<Box<dyn FnOnce() + Send>>,

    /// Working directory for the run; defaults to the host's current
    /// directory
    pub working_dir: Option<PathBuf>,

    /// Arguments passed to the target (the leading program entry is
    /// synthesized from the working directory)
    pub argv: Vec<String>,

    /// Breakpoints installed before the target starts
    pub breakpoints: Vec<(PathBuf, u32, Option<String>)>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let console = Console::host();
        Self {
            mode: DebugMode::Step,
            stdout: console.out,
            stderr: console.err,
            stdin: console.input,
            after_stop: None,
            working_dir: None,
            argv: Vec::new(),
            breakpoints: Vec::new(),
        }
    }
}

/// A debugging run with its target on a dedicated thread
pub struct DebugSession {
    control: Arc<DebugControl>,
    handle: Option<JoinHandle<()>>,
}

impl DebugSession {
    /// Run a session on the calling thread, returning its control core
    /// once the target has finished
    pub fn run(
        interface: Arc<dyn DebugInterface>,
        entry: impl Into<PathBuf>,
        config: SessionConfig,
    ) -> Arc<DebugControl> {
        let control = prepare_control(&config);
        run_target(interface, entry.into(), config, control.clone());
        control
    }

    /// Start a session with the target on its own thread
    pub fn start(
        interface: Arc<dyn DebugInterface>,
        entry: impl Into<PathBuf>,
        config: SessionConfig,
    ) -> io::Result<Self> {
        let control = prepare_control(&config);
        let entry = entry.into();
        let thread_control = control.clone();
        let handle = thread::Builder::new()
            .name("skarn-target".into())
            .spawn(move || run_target(interface, entry, config, thread_control))?;
        Ok(Self {
            control,
            handle: Some(handle),
        })
    }

    /// The session's shared control core
    #[must_use]
    pub fn control(&self) -> &Arc<DebugControl> {
        &self.control
    }

    /// Request teardown: a stopped target is released, a running target is
    /// left to finish on its own
    pub fn stop(&self) {
        self.control.finish();
    }

    /// Wait for the target thread to finish
    pub fn wait(mut self) -> thread::Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

/// Build the control core and install pre-run breakpoints
fn prepare_control(config: &SessionConfig) -> Arc<DebugControl> {
    let control = Arc::new(DebugControl::new(config.mode));
    for (file, line, condition) in &config.breakpoints {
        if let Err(error) = control.add_breakpoint(file.clone(), *line, condition.clone()) {
            config.stderr.write_text(&format!("{error}\n"));
        }
    }
    control
}

/// The body of a debugging run
fn run_target(
    interface: Arc<dyn DebugInterface>,
    entry: PathBuf,
    mut config: SessionConfig,
    control: Arc<DebugControl>,
) {
    let console = Console {
        out: config.stdout.clone(),
        err: config.stderr.clone(),
        input: config.stdin.clone(),
    };
    let after_stop = config.after_stop.take();

    let finish = |after_stop: Option<Box<dyn FnOnce() + Send>>| {
        if let Some(callback) = after_stop {
            callback();
        }
        control.finish();
    };

    // Scoped working directory; restored when the guard drops
    let _cwd_guard = match &config.working_dir {
        Some(dir) => match WorkingDirGuard::change(dir) {
            Ok(guard) => Some(guard),
            Err(error) => {
                console.error_line(&format!(
                    "cannot enter working directory {}: {error}",
                    dir.display()
                ));
                finish(after_stop);
                return;
            }
        },
        None => None,
    };

    let entry = canonical_path(&entry);
    let function = match compile_entry(&entry) {
        Ok(function) => function,
        Err(message) => {
            console.error_line(&format!("cannot load {}: {message}", entry.display()));
            finish(after_stop);
            return;
        }
    };
    let instrumented = instrument(&function);

    let mut vm = Vm::with_console(console.clone());
    vm.set_argv(target_argv(&entry, &config));
    if let Some(parent) = entry.parent() {
        vm.add_search_path(parent.to_path_buf());
    }
    match &config.working_dir {
        Some(dir) => vm.add_search_path(dir.clone()),
        None => {
            if let Ok(cwd) = std::env::current_dir() {
                vm.add_search_path(cwd);
            }
        }
    }

    control.set_baseline_depth(vm.frame_count());

    let probe = Rc::new(Probe::new(control.clone(), interface, console.clone()));
    let probe_native = Probe::native(probe);
    vm.install_loader(Rc::new(DebugLoader::new(probe_native.clone())));

    let globals = vm.base_globals();
    {
        let mut map = globals.borrow_mut();
        map.insert(PROBE_GLOBAL.to_string(), Value::Native(probe_native));
        map.insert(ENTRY_SENTINEL.to_string(), Value::Bool(true));
    }

    tracing::info!(entry = %entry.display(), "debug session started");
    if let Err(error) = vm.run_module(Rc::new(instrumented), globals) {
        // The target raised; print the diagnostic and tear down
        console.error_line(&error.to_string());
    }

    if let Some(callback) = after_stop {
        callback();
    }
    vm.uninstall_loader();
    vm.invalidate_module_cache();
    control.finish();
    tracing::info!(entry = %entry.display(), "debug session finished");
}

/// Read, parse, and compile the entry file
fn compile_entry(entry: &Path) -> Result<crate::bytecode::Function, String> {
    let source = fs::read_to_string(entry).map_err(|e| e.to_string())?;
    let module = Parser::parse_module(&source).map_err(|e| e.to_string())?;
    Compiler::new()
        .compile_module(&module, Some(entry))
        .map_err(|e| e.to_string())
}

/// The target's argument vector: a synthesized program entry followed by
/// the configured arguments
fn target_argv(entry: &Path, config: &SessionConfig) -> Vec<String> {
    let base = config
        .working_dir
        .clone()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_default();
    let program = entry
        .file_name()
        .map_or_else(|| base.clone(), |name| base.join(name));
    let mut argv = vec![program.to_string_lossy().into_owned()];
    argv.extend(config.argv.iter().cloned());
    argv
}

/// Restores the previous working directory when dropped
struct WorkingDirGuard {
    previous: PathBuf,
}

impl WorkingDirGuard {
    fn change(to: &Path) -> io::Result<Self> {
        let previous = std::env::current_dir()?;
        std::env::set_current_dir(to)?;
        Ok(Self { previous })
    }
}

impl Drop for WorkingDirGuard {
    fn drop(&mut self) {
        let _ = std::env::set_current_dir(&self.previous);
    }
}
