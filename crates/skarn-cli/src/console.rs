//! Interactive console debugger
//!
//! The console implementation of `DebugInterface`: a small command loop
//! entered every time the probe stops the target. Commands mirror the
//! debugger's control surface - stepping, breakpoints, variable and
//! context display, in-frame evaluation.

use std::path::PathBuf;

use anyhow::Result;
use parking_lot::Mutex;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use skarn_core::bytecode::Value;
use skarn_core::debugger::{DebugInterface, DebugMode, DebugPrompt, ENTRY_SENTINEL, PROBE_GLOBAL};

/// Prompt shown while the target is stopped
const PROMPT: &str = "(sdb) ";

/// The interactive console interface
pub struct ConsoleInterface {
    editor: Mutex<DefaultEditor>,
}

impl ConsoleInterface {
    /// Create a console interface with line editing
    pub fn new() -> Result<Self> {
        Ok(Self {
            editor: Mutex::new(DefaultEditor::new()?),
        })
    }
}

impl DebugInterface for ConsoleInterface {
    fn on_stop(&self, prompt: &mut DebugPrompt<'_>) {
        if let Some(frame) = prompt.frame() {
            let file = frame
                .file
                .as_ref()
                .map_or_else(|| "<unknown>".to_string(), |f| f.display().to_string());
            println!("stopped at {}:{} in {}", file, frame.line, frame.function);
        }

        loop {
            let line = match self.editor.lock().readline(PROMPT) {
                Ok(line) => line,
                Err(ReadlineError::Interrupted | ReadlineError::Eof) => {
                    prompt.control().finish();
                    return;
                }
                Err(error) => {
                    eprintln!("input error: {error}");
                    prompt.control().finish();
                    return;
                }
            };
            let _ = self.editor.lock().add_history_entry(&line);

            let line = line.trim();
            let (command, rest) = match line.split_once(' ') {
                Some((command, rest)) => (command, rest.trim()),
                None => (line, ""),
            };

            match command {
                "" => {}
                "help" | "?" => print_commands(),
                "step" | "s" => {
                    prompt.step();
                    return;
                }
                "continue" | "c" => {
                    prompt.continue_run();
                    return;
                }
                "over" | "o" => {
                    prompt.step_over();
                    return;
                }
                "context" | "ctx" => show_context(prompt),
                "vars" | "v" => show_variables(prompt),
                "stack" | "bt" => show_stacktrace(prompt),
                "break" | "b" => add_breakpoint(prompt, rest),
                "clear" => remove_breakpoint(prompt, rest),
                "breaks" => show_breakpoints(prompt),
                "mode" => handle_mode(prompt, rest),
                "eval" | "p" => {
                    if rest.is_empty() {
                        eprintln!("usage: eval <code>");
                    } else {
                        // Failures are already reported on the error stream
                        let _ = prompt.eval_in_frame(rest, 0);
                    }
                }
                "quit" | "q" => {
                    prompt.control().finish();
                    return;
                }
                unknown => eprintln!("no command '{unknown}'; try 'help'"),
            }
        }
    }
}

fn print_commands() {
    println!("step (s)            run to the next line");
    println!("over (o)            run to the next line in this function or its caller");
    println!("continue (c)        run to the next breakpoint");
    println!("context (ctx)       show source around the current line");
    println!("vars (v)            show globals and locals");
    println!("stack (bt)          show the stacktrace");
    println!("break <loc> [cond]  add a breakpoint at LINE or FILE:LINE");
    println!("clear <loc>         remove the breakpoint at LINE or FILE:LINE");
    println!("breaks              list breakpoints");
    println!("mode [step|run]     show or set the debug mode");
    println!("eval (p) <code>     evaluate code in the stopped frame");
    println!("quit (q)            stop debugging and let the target finish");
}

fn show_context(prompt: &DebugPrompt<'_>) {
    match prompt.code_context() {
        Ok((lines, current)) => {
            for (number, text) in (1u32..).zip(lines.iter()) {
                let marker = if number == current { " < ----- current line" } else { "" };
                println!("{number:4} {text}{marker}");
            }
        }
        Err(error) => eprintln!("{error}"),
    }
}

fn show_variables(prompt: &DebugPrompt<'_>) {
    let (globals, locals) = prompt.globals_and_locals();
    println!("GLOBALS:");
    print_bindings(&globals);
    if globals != locals {
        println!("LOCALS:");
        print_bindings(&locals);
    }
}

/// Print name/value pairs, hiding the debugger's own bindings and the
/// native built-ins
fn print_bindings(pairs: &[(String, Value)]) {
    for (name, value) in pairs {
        if name == PROBE_GLOBAL || name == ENTRY_SENTINEL {
            continue;
        }
        if matches!(value, Value::Native(_)) {
            continue;
        }
        println!("  {name} = {value}");
    }
}

fn show_stacktrace(prompt: &DebugPrompt<'_>) {
    for (depth, frame) in prompt.stacktrace().iter().enumerate() {
        let file = frame
            .file
            .as_ref()
            .map_or_else(|| "<unknown>".to_string(), |f| f.display().to_string());
        println!("#{depth} {} at {}:{}", frame.function, file, frame.line);
    }
}

fn add_breakpoint(prompt: &DebugPrompt<'_>, rest: &str) {
    let (location, condition) = match rest.split_once(' ') {
        Some((location, condition)) => (location, Some(condition.trim().to_string())),
        None => (rest, None),
    };
    let Some((file, line)) = parse_location(prompt, location) else {
        eprintln!("usage: break <line> [cond] or break <file>:<line> [cond]");
        return;
    };
    match prompt.add_breakpoint(file, line, condition) {
        Ok(()) => println!("breakpoint set at line {line}"),
        Err(error) => eprintln!("{error}"),
    }
}

fn remove_breakpoint(prompt: &DebugPrompt<'_>, rest: &str) {
    let Some((file, line)) = parse_location(prompt, rest) else {
        eprintln!("usage: clear <line> or clear <file>:<line>");
        return;
    };
    prompt.remove_breakpoint(file, line);
}

/// Parse `LINE` (current file) or `FILE:LINE`
fn parse_location(prompt: &DebugPrompt<'_>, text: &str) -> Option<(PathBuf, u32)> {
    if text.is_empty() {
        return None;
    }
    if let Ok(line) = text.parse::<u32>() {
        let file = prompt.frame()?.file?;
        return Some((file, line));
    }
    let (file, line) = text.rsplit_once(':')?;
    let line = line.parse::<u32>().ok()?;
    Some((PathBuf::from(file), line))
}

fn show_breakpoints(prompt: &DebugPrompt<'_>) {
    let breakpoints = prompt.breakpoints();
    if breakpoints.is_empty() {
        println!("no breakpoints");
        return;
    }
    for breakpoint in breakpoints {
        match &breakpoint.condition {
            Some(condition) => println!(
                "{}:{} if {condition}",
                breakpoint.file.display(),
                breakpoint.line
            ),
            None => println!("{}:{}", breakpoint.file.display(), breakpoint.line),
        }
    }
}

fn handle_mode(prompt: &DebugPrompt<'_>, rest: &str) {
    match rest {
        "" => match prompt.mode() {
            DebugMode::Step => println!("step"),
            DebugMode::RunToBreakpoint => println!("run"),
        },
        "step" => prompt.set_mode(DebugMode::Step),
        "run" => prompt.set_mode(DebugMode::RunToBreakpoint),
        other => eprintln!("no mode '{other}'; use 'step' or 'run'"),
    }
}
