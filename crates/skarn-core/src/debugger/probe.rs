//! The debug probe and the command surface it hands to the interface
//!
//! The probe is the zero-argument native bound as the global `debug` in
//! every rewritten module. It is the sole suspension point of a debugged
//! target: invoked before every source line, it decides whether to stop,
//! synchronously hands control to the `DebugInterface` while stopped, and
//! blocks until a command resumes the target.

use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use crate::bytecode::{Compiler, NativeFunction, Value};
use crate::parser::Parser;
use crate::vm::{Console, FrameView, Vm};

use super::control::{DebugControl, DebugMode, FrameSummary, RunState};
use super::error::{DebugError, DebugResult};
use super::rewriter::PROBE_GLOBAL;
use super::source_map;

/// The interactive half of a debug session
///
/// Invoked synchronously by the probe each time the target stops. The
/// implementation reads and mutates the session through the prompt and
/// returns when it has issued a resume command (or wants the target to
/// stay stopped until another thread resumes it).
pub trait DebugInterface: Send + Sync {
    /// The target is stopped; drive it
    fn on_stop(&self, prompt: &mut DebugPrompt<'_>);
}

/// The probe: captures frames, applies stop policy, and blocks the target
pub struct Probe {
    control: Arc<DebugControl>,
    interface: Arc<dyn DebugInterface>,
    console: Console,
    /// Guards against the probe re-entering itself on the same thread when
    /// evaluation runs instrumented target code
    active: Cell<bool>,
}

impl Probe {
    /// Create the probe for a session
    #[must_use]
    pub fn new(
        control: Arc<DebugControl>,
        interface: Arc<dyn DebugInterface>,
        console: Console,
    ) -> Self {
        Self {
            control,
            interface,
            console,
            active: Cell::new(false),
        }
    }

    /// Wrap the probe as the native function the rewriter's sequence calls
    #[must_use]
    pub fn native(probe: Rc<Probe>) -> NativeFunction {
        NativeFunction::new(PROBE_GLOBAL, Some(0), move |vm, _args| {
            probe.enter(vm);
            Ok(Value::Null)
        })
    }

    /// One probe invocation; never propagates an error into the target
    fn enter(&self, vm: &mut Vm) {
        if self.control.is_finished() || self.active.get() {
            return;
        }
        self.active.set(true);
        self.run(vm);
        self.active.set(false);
    }

    fn run(&self, vm: &mut Vm) {
        let snapshot = self.capture_stacktrace(vm);
        let Some(top) = snapshot.first().cloned() else {
            return;
        };

        let stop = match self.control.mode() {
            DebugMode::Step => true,
            DebugMode::RunToBreakpoint => self.should_stop_on_breakpoint(vm, &top),
        };
        if !stop {
            return;
        }

        self.control.mark_stopped(snapshot);
        {
            let mut prompt = DebugPrompt {
                vm,
                control: &self.control,
                console: self.console.clone(),
            };
            self.interface.on_stop(&mut prompt);
        }
        self.control.wait_while_stopped();
    }

    /// The frame chain newest-first, trimmed of everything at or below the
    /// session baseline
    fn capture_stacktrace(&self, vm: &Vm) -> Vec<FrameSummary> {
        let baseline = self.control.baseline_depth();
        let views = vm.frame_views();
        views
            .into_iter()
            .skip(baseline)
            .rev()
            .map(|view| FrameSummary {
                file: view.source,
                line: view.line,
                function: view.function,
            })
            .collect()
    }

    /// Stop policy below `Step` mode: step-over anchor first, then the
    /// breakpoint table
    fn should_stop_on_breakpoint(&self, vm: &mut Vm, top: &FrameSummary) -> bool {
        let Some(file) = &top.file else {
            return false;
        };

        if self.control.take_anchor_hit(file, &top.function) {
            return true;
        }

        let Some(breakpoint) = self.control.breakpoint_at(file, top.line) else {
            return false;
        };
        let Some(condition) = &breakpoint.condition else {
            return true;
        };

        match self.eval_condition(vm, condition) {
            Ok(truthy) => truthy,
            Err(message) => {
                // A broken condition must not hide its breakpoint
                self.console.error_line(&format!(
                    "breakpoint condition '{condition}' at {}:{} failed: {message}. Stopping.",
                    file.display(),
                    top.line
                ));
                true
            }
        }
    }

    /// Evaluate a condition expression in the stopped frame
    fn eval_condition(&self, vm: &mut Vm, condition: &str) -> Result<bool, String> {
        let expr = Parser::parse_expression(condition).map_err(|e| e.to_string())?;
        let function = Compiler::new()
            .compile_eval_expression(&expr)
            .map_err(|e| e.to_string())?;
        let frame = vm
            .frame_view_at(0)
            .ok_or_else(|| "no target frame".to_string())?;
        let value = vm
            .run_eval(Rc::new(function), frame.globals, frame.locals)
            .map_err(|e| e.to_string())?;
        Ok(value.is_truthy())
    }
}

/// The command surface handed to the interface while the target is stopped
///
/// Resume commands and breakpoint edits are also available on the shared
/// `DebugControl`, so a UI thread can issue them after `on_stop` returns;
/// the prompt adds the commands that need the live VM - bindings
/// inspection and in-frame evaluation.
pub struct DebugPrompt<'a> {
    vm: &'a mut Vm,
    control: &'a Arc<DebugControl>,
    console: Console,
}

impl DebugPrompt<'_> {
    /// The session's shared control core
    #[must_use]
    pub fn control(&self) -> &Arc<DebugControl> {
        self.control
    }

    // ===== Resume commands =====

    /// Resume in step mode
    pub fn step(&self) {
        self.control.step();
    }

    /// Resume until the next breakpoint
    pub fn continue_run(&self) {
        self.control.continue_run();
    }

    /// Resume, stopping at the next line in this function or its caller
    pub fn step_over(&self) {
        self.control.step_over();
    }

    /// The current debug mode
    #[must_use]
    pub fn mode(&self) -> DebugMode {
        self.control.mode()
    }

    /// Change the debug mode without resuming
    pub fn set_mode(&self, mode: DebugMode) {
        self.control.set_mode(mode);
    }

    /// Whether the target is still stopped
    #[must_use]
    pub fn run_state(&self) -> RunState {
        self.control.run_state()
    }

    // ===== Breakpoints =====

    /// Add a breakpoint
    pub fn add_breakpoint(
        &self,
        file: impl Into<PathBuf>,
        line: u32,
        condition: Option<String>,
    ) -> DebugResult<()> {
        self.control.add_breakpoint(file, line, condition)
    }

    /// Remove a breakpoint; absent breakpoints are ignored
    pub fn remove_breakpoint(&self, file: impl Into<PathBuf>, line: u32) {
        self.control.remove_breakpoint(file, line);
    }

    /// All breakpoints
    #[must_use]
    pub fn breakpoints(&self) -> Vec<super::breakpoints::Breakpoint> {
        self.control.breakpoints()
    }

    // ===== Frame inspection =====

    /// The stopped frame
    #[must_use]
    pub fn frame(&self) -> Option<FrameSummary> {
        self.control.current_frame()
    }

    /// The captured stacktrace, newest frame first
    #[must_use]
    pub fn stacktrace(&self) -> Vec<FrameSummary> {
        self.control.stacktrace().unwrap_or_default()
    }

    /// Globals and locals of the stopped frame as sorted name/value pairs
    ///
    /// A module-level frame has no separate locals; its globals double as
    /// both mappings.
    #[must_use]
    pub fn globals_and_locals(&self) -> (Vec<(String, Value)>, Vec<(String, Value)>) {
        let Some(view) = self.vm.frame_view_at(0) else {
            return (Vec::new(), Vec::new());
        };
        let collect = |bindings: &crate::bytecode::Bindings| {
            let mut pairs: Vec<(String, Value)> = bindings
                .borrow()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            pairs.sort_by(|a, b| a.0.cmp(&b.0));
            pairs
        };
        let globals = collect(&view.globals);
        let locals = match &view.locals {
            Some(locals) => collect(locals),
            None => globals.clone(),
        };
        (globals, locals)
    }

    /// Source lines of the stopped file together with the current line
    pub fn code_context(&self) -> DebugResult<(Vec<String>, u32)> {
        let frame = self
            .control
            .current_frame()
            .ok_or(DebugError::NoSuchFrame(0))?;
        let file = frame.file.ok_or(DebugError::NoSuchFrame(0))?;
        let lines = source_map::source_lines(&file).map_err(|e| DebugError::Load {
            path: file,
            message: e.to_string(),
        })?;
        Ok((lines, frame.line))
    }

    // ===== Evaluation =====

    /// Compile and run a statement fragment against the frame at `depth`
    ///
    /// Depth 0 is the stopped frame. Failures are reported on the error
    /// stream and returned; the target stays stopped either way.
    pub fn eval_in_frame(&mut self, code: &str, depth: usize) -> DebugResult<()> {
        let result = self.try_eval(code, depth);
        if let Err(error) = &result {
            self.console.error_line(&format!("{error}"));
        }
        result
    }

    fn try_eval(&mut self, code: &str, depth: usize) -> DebugResult<()> {
        let stmts = Parser::parse_fragment(code).map_err(|e| DebugError::Eval(e.to_string()))?;
        let function = Compiler::new()
            .compile_eval_fragment(&stmts)
            .map_err(|e| DebugError::Eval(e.to_string()))?;

        // Depth is relative to the stopped frame and must stay above the
        // session baseline
        let target_frames = self
            .vm
            .frame_count()
            .saturating_sub(self.control.baseline_depth());
        if depth >= target_frames {
            return Err(DebugError::NoSuchFrame(depth));
        }
        let view = self
            .vm
            .frame_view_at(depth)
            .ok_or(DebugError::NoSuchFrame(depth))?;

        self.vm
            .run_eval(Rc::new(function), view.globals, view.locals)
            .map(|_| ())
            .map_err(|e| DebugError::Eval(e.to_string()))
    }

    /// View of the frame at `depth`, for embedders that render their own
    /// variable displays
    #[must_use]
    pub fn frame_view_at(&self, depth: usize) -> Option<FrameView> {
        self.vm.frame_view_at(depth)
    }
}
