//! Debug control state - the state machine the probe and the interface share
//!
//! One `DebugControl` lives per debug session, shared between the target
//! thread (which runs the probe) and whatever thread hosts the debug
//! interface. All mutable state sits behind a single mutex so a command
//! issued by the interface is visible to the probe's next decision, and the
//! probe's wait is a condition variable, so a stopped target consumes no
//! CPU.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};

use super::breakpoints::{Breakpoint, BreakpointTable};
use super::error::DebugResult;
use super::source_map::canonical_path;

/// How the probe decides whether to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugMode {
    /// Stop at every instrumented line
    Step,
    /// Run until a breakpoint (or the step-over anchor) fires
    RunToBreakpoint,
}

/// Whether the target is currently allowed to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Stopped,
}

/// One frame of a captured stacktrace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSummary {
    /// Canonical source file, when locatable
    pub file: Option<PathBuf>,
    /// Current source line
    pub line: u32,
    /// Function name (`<module>` for top-level code)
    pub function: String,
}

/// Mutable state guarded by the control mutex
struct ControlState {
    mode: DebugMode,
    run_state: RunState,
    /// `(file, function)` pairs that force a stop when the probe runs in
    /// one of them; cleared as a whole on the first hit
    step_anchor: HashSet<(PathBuf, String)>,
    /// Stacktrace captured at the current stop, newest frame first.
    /// `Some` exactly while the target is stopped.
    snapshot: Option<Vec<FrameSummary>>,
}

/// Shared control core of a debug session
pub struct DebugControl {
    state: Mutex<ControlState>,
    resumed: Condvar,
    breakpoints: Mutex<BreakpointTable>,
    /// Session teardown flag; once set the probe never blocks again
    finished: AtomicBool,
    /// Frame-chain depth recorded before the target started; stacktraces
    /// drop this many of their oldest frames
    baseline_depth: AtomicUsize,
}

impl DebugControl {
    /// Create a control core starting in the given mode
    #[must_use]
    pub fn new(mode: DebugMode) -> Self {
        Self {
            state: Mutex::new(ControlState {
                mode,
                run_state: RunState::Running,
                step_anchor: HashSet::new(),
                snapshot: None,
            }),
            resumed: Condvar::new(),
            breakpoints: Mutex::new(BreakpointTable::new()),
            finished: AtomicBool::new(false),
            baseline_depth: AtomicUsize::new(0),
        }
    }

    // ===== Mode and run state =====

    /// The current debug mode
    #[must_use]
    pub fn mode(&self) -> DebugMode {
        self.state.lock().mode
    }

    /// Change the debug mode without resuming
    pub fn set_mode(&self, mode: DebugMode) {
        self.state.lock().mode = mode;
    }

    /// The current run state
    #[must_use]
    pub fn run_state(&self) -> RunState {
        self.state.lock().run_state
    }

    /// Resume in step mode: the target stops again at the next line
    pub fn step(&self) {
        let mut state = self.state.lock();
        state.mode = DebugMode::Step;
        state.run_state = RunState::Running;
        self.resumed.notify_all();
    }

    /// Resume until the next breakpoint
    pub fn continue_run(&self) {
        let mut state = self.state.lock();
        state.mode = DebugMode::RunToBreakpoint;
        state.run_state = RunState::Running;
        self.resumed.notify_all();
    }

    /// Resume, stopping at the next line in the current function or - if it
    /// returns first - at the next line in its caller
    ///
    /// Anchors both the stopped frame and its immediate caller, then runs
    /// to breakpoint. Without a current stop this is just `continue_run`.
    pub fn step_over(&self) {
        let mut state = self.state.lock();
        let mut anchor = HashSet::new();
        if let Some(snapshot) = &state.snapshot {
            for frame in snapshot.iter().take(2) {
                if let Some(file) = &frame.file {
                    anchor.insert((file.clone(), frame.function.clone()));
                }
            }
        }
        state.step_anchor = anchor;
        state.mode = DebugMode::RunToBreakpoint;
        state.run_state = RunState::Running;
        self.resumed.notify_all();
    }

    // ===== Probe side =====

    /// Record a stop: run state becomes `Stopped` and the snapshot is set
    pub(crate) fn mark_stopped(&self, snapshot: Vec<FrameSummary>) {
        let mut state = self.state.lock();
        state.run_state = RunState::Stopped;
        state.snapshot = Some(snapshot);
    }

    /// Block until a command resumes the target or the session finishes
    pub(crate) fn wait_while_stopped(&self) {
        let mut state = self.state.lock();
        while state.run_state == RunState::Stopped && !self.finished.load(Ordering::Acquire) {
            self.resumed.wait(&mut state);
        }
        // The stop is over; the snapshot goes with it
        state.snapshot = None;
        state.run_state = RunState::Running;
    }

    /// Consume an anchor hit for `(file, function)`
    ///
    /// Returns true (clearing the whole anchor set) when the pair is
    /// anchored.
    pub(crate) fn take_anchor_hit(&self, file: &PathBuf, function: &str) -> bool {
        let mut state = self.state.lock();
        if state
            .step_anchor
            .contains(&(file.clone(), function.to_string()))
        {
            state.step_anchor.clear();
            true
        } else {
            false
        }
    }

    // ===== Stop inspection =====

    /// The stopped frame, if the target is stopped
    #[must_use]
    pub fn current_frame(&self) -> Option<FrameSummary> {
        self.state
            .lock()
            .snapshot
            .as_ref()
            .and_then(|frames| frames.first().cloned())
    }

    /// The captured stacktrace, newest frame first, if the target is stopped
    #[must_use]
    pub fn stacktrace(&self) -> Option<Vec<FrameSummary>> {
        self.state.lock().snapshot.clone()
    }

    // ===== Breakpoints =====

    /// Add a breakpoint; the file is canonicalized before keying
    pub fn add_breakpoint(
        &self,
        file: impl Into<PathBuf>,
        line: u32,
        condition: Option<String>,
    ) -> DebugResult<()> {
        let file = canonical_path(&file.into());
        self.breakpoints.lock().add(file, line, condition)
    }

    /// Remove a breakpoint; absent breakpoints are ignored
    pub fn remove_breakpoint(&self, file: impl Into<PathBuf>, line: u32) {
        let file = canonical_path(&file.into());
        self.breakpoints.lock().remove(&file, line);
    }

    /// The breakpoint at `(file, line)`, if any
    #[must_use]
    pub fn breakpoint_at(&self, file: &PathBuf, line: u32) -> Option<Breakpoint> {
        self.breakpoints.lock().lookup(file, line).cloned()
    }

    /// All breakpoints, ordered by line then file
    #[must_use]
    pub fn breakpoints(&self) -> Vec<Breakpoint> {
        self.breakpoints.lock().enumerate()
    }

    // ===== Session lifecycle =====

    /// Record the frame-chain depth the target starts above
    pub(crate) fn set_baseline_depth(&self, depth: usize) {
        self.baseline_depth.store(depth, Ordering::Release);
    }

    /// Frame-chain depth recorded at session start
    #[must_use]
    pub fn baseline_depth(&self) -> usize {
        self.baseline_depth.load(Ordering::Acquire)
    }

    /// Mark the session finished and release a blocked probe
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Release);
        let mut state = self.state.lock();
        state.snapshot = None;
        state.run_state = RunState::Running;
        self.resumed.notify_all();
    }

    /// True once the session has been torn down or stop was requested
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn frame(file: &str, function: &str, line: u32) -> FrameSummary {
        FrameSummary {
            file: Some(PathBuf::from(file)),
            line,
            function: function.to_string(),
        }
    }

    #[test]
    fn test_step_and_continue_switch_modes() {
        let control = DebugControl::new(DebugMode::Step);
        control.continue_run();
        assert_eq!(control.mode(), DebugMode::RunToBreakpoint);
        control.step();
        assert_eq!(control.mode(), DebugMode::Step);
        assert_eq!(control.run_state(), RunState::Running);
    }

    #[test]
    fn test_snapshot_set_exactly_while_stopped() {
        let control = DebugControl::new(DebugMode::Step);
        assert!(control.current_frame().is_none());

        control.mark_stopped(vec![frame("/src/a.skn", "<module>", 2)]);
        assert_eq!(control.current_frame().unwrap().line, 2);
        assert_eq!(control.run_state(), RunState::Stopped);

        control.continue_run();
        control.wait_while_stopped();
        assert!(control.current_frame().is_none());
    }

    #[test]
    fn test_step_over_anchors_top_two_frames() {
        let control = DebugControl::new(DebugMode::Step);
        control.mark_stopped(vec![
            frame("/src/a.skn", "inner", 5),
            frame("/src/a.skn", "outer", 9),
            frame("/src/a.skn", "<module>", 12),
        ]);
        control.step_over();

        // A frame deeper in some other function is not anchored
        assert!(!control.take_anchor_hit(&PathBuf::from("/src/a.skn"), "helper"));
        // The caller is anchored; hitting it clears the whole set
        assert!(control.take_anchor_hit(&PathBuf::from("/src/a.skn"), "outer"));
        assert!(!control.take_anchor_hit(&PathBuf::from("/src/a.skn"), "inner"));
    }

    #[test]
    fn test_finish_releases_blocked_probe() {
        let control = Arc::new(DebugControl::new(DebugMode::Step));
        control.mark_stopped(vec![frame("/src/a.skn", "<module>", 1)]);

        let waiter = {
            let control = control.clone();
            std::thread::spawn(move || control.wait_while_stopped())
        };
        control.finish();
        waiter.join().unwrap();
        assert!(control.is_finished());
    }

    #[test]
    fn test_wait_observes_cross_thread_resume() {
        let control = Arc::new(DebugControl::new(DebugMode::Step));
        control.mark_stopped(vec![frame("/src/a.skn", "<module>", 1)]);

        let waiter = {
            let control = control.clone();
            std::thread::spawn(move || control.wait_while_stopped())
        };
        // The command mutation must become visible to the waiting probe
        control.continue_run();
        waiter.join().unwrap();
        assert_eq!(control.mode(), DebugMode::RunToBreakpoint);
    }
}
