//! Skarn CLI - command-line interface for the Skarn scripting language

use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser as ClapParser, Subcommand};
use skarn_core::bytecode::{disassemble_chunk, Compiler, Value};
use skarn_core::debugger::{canonical_path, DebugMode, DebugSession, SessionConfig};
use skarn_core::parser::Parser;
use skarn_core::vm::Vm;

mod console;

#[derive(ClapParser)]
#[command(name = "skarn")]
#[command(version = skarn_core::VERSION)]
#[command(about = "The Skarn scripting language", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script
    Run {
        /// Script to run
        file: PathBuf,

        /// Print the compiled bytecode instead of running
        #[arg(long)]
        disassemble: bool,

        /// Arguments passed to the script
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },

    /// Debug a script with the interactive console debugger
    Debug {
        /// Script to debug
        file: PathBuf,

        /// Run to the first breakpoint instead of stopping at the first line
        #[arg(long)]
        run: bool,

        /// Breakpoints to set before the target starts
        #[arg(long = "break", value_name = "FILE:LINE[:COND]")]
        breakpoints: Vec<String>,

        /// Arguments passed to the script
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Commands::Run {
            file,
            disassemble,
            args,
        } => run_script(&file, disassemble, args),
        Commands::Debug {
            file,
            run,
            breakpoints,
            args,
        } => debug_script(&file, run, &breakpoints, args),
    }
}

fn run_script(file: &Path, disassemble: bool, args: Vec<String>) -> Result<()> {
    let path = canonical_path(file);
    let source = std::fs::read_to_string(&path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let module = Parser::parse_module(&source)
        .with_context(|| format!("cannot parse {}", path.display()))?;
    let function = Compiler::new()
        .compile_module(&module, Some(&path))
        .with_context(|| format!("cannot compile {}", path.display()))?;

    if disassemble {
        print!("{}", disassemble_chunk(&function.chunk, &function.name));
        for constant in function.chunk.constants() {
            if let Value::Function(nested) = constant {
                print!("{}", disassemble_chunk(&nested.chunk, &nested.name));
            }
        }
        return Ok(());
    }

    let mut vm = Vm::new();
    let mut argv = vec![path.to_string_lossy().into_owned()];
    argv.extend(args);
    vm.set_argv(argv);
    if let Some(parent) = path.parent() {
        vm.add_search_path(parent.to_path_buf());
    }
    let globals = vm.base_globals();
    if let Err(error) = vm.run_module(Rc::new(function), globals) {
        bail!("{error}");
    }
    Ok(())
}

fn debug_script(file: &Path, run: bool, breakpoints: &[String], args: Vec<String>) -> Result<()> {
    let mut config = SessionConfig {
        mode: if run {
            DebugMode::RunToBreakpoint
        } else {
            DebugMode::Step
        },
        argv: args,
        ..SessionConfig::default()
    };
    for spec in breakpoints {
        config.breakpoints.push(parse_breakpoint(spec)?);
    }

    let interface = Arc::new(console::ConsoleInterface::new()?);
    println!("Skarn debugger. Type 'help' at the prompt for commands.");
    // Console embedding: the target runs on this thread and the prompt is
    // re-entered synchronously from the probe
    DebugSession::run(interface, file, config);
    Ok(())
}

/// Parse `FILE:LINE` or `FILE:LINE:CONDITION`
fn parse_breakpoint(spec: &str) -> Result<(PathBuf, u32, Option<String>)> {
    let mut parts = spec.splitn(3, ':');
    let file = parts.next().filter(|s| !s.is_empty());
    let line = parts.next().and_then(|s| s.parse::<u32>().ok());
    let (Some(file), Some(line)) = (file, line) else {
        bail!("invalid breakpoint '{spec}'; expected FILE:LINE or FILE:LINE:COND");
    };
    let condition = parts.next().map(str::to_string);
    Ok((PathBuf::from(file), line, condition))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_breakpoint_forms() {
        let (file, line, cond) = parse_breakpoint("src/m.skn:4").unwrap();
        assert_eq!(file, PathBuf::from("src/m.skn"));
        assert_eq!(line, 4);
        assert!(cond.is_none());

        let (_, line, cond) = parse_breakpoint("m.skn:2:a == 1").unwrap();
        assert_eq!(line, 2);
        assert_eq!(cond.as_deref(), Some("a == 1"));

        assert!(parse_breakpoint("m.skn").is_err());
        assert!(parse_breakpoint(":7").is_err());
    }
}
