//! Skarn Core - Language engine and debugger for the Skarn scripting language
//!
//! This crate provides the core functionality:
//! - Lexer: Tokenization of source code
//! - AST: Abstract syntax tree definitions
//! - Parser: AST construction from token stream
//! - Bytecode: Instruction set and compiler
//! - VM: Bytecode execution with named-binding frames
//! - Debugger: Bytecode-rewriting debug engine (probes, breakpoints,
//!   stepping, import interception, debug sessions)

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Lexer module - tokenization of Skarn source code
pub mod lexer;

/// Abstract Syntax Tree - parsed representation of Skarn source code
pub mod ast;

/// Parser module - converts tokens into AST
pub mod parser;

/// Bytecode module - instruction set and compiler
pub mod bytecode;

/// Virtual Machine module - bytecode execution
pub mod vm;

/// Debugger module - the bytecode-rewriting debug engine
pub mod debugger;

/// Convenience re-export of lexer
pub use lexer::Lexer;

/// Convenience re-export of parser
pub use parser::Parser;

/// Convenience re-export of bytecode compiler
pub use bytecode::Compiler;

/// Convenience re-export of VM
pub use vm::Vm;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Value;

    #[test]
    fn version_exists() {
        assert!(!VERSION.is_empty());
    }

    /// Helper to compile and run a Skarn module, returning its globals
    fn run_source(source: &str) -> Result<std::collections::HashMap<String, Value>, String> {
        let module = Parser::parse_module(source).map_err(|e| e.to_string())?;
        let function = Compiler::new()
            .compile_module(&module, None)
            .map_err(|e| e.to_string())?;
        let mut vm = Vm::new();
        let globals = vm.base_globals();
        vm.run_module(std::rc::Rc::new(function), globals.clone())
            .map_err(|e| e.to_string())?;
        let map = globals.borrow().clone();
        Ok(map)
    }

    #[test]
    fn test_straight_line_assignments() {
        let globals = run_source("a = 1\nb = a + 2\n").unwrap();
        assert_eq!(globals.get("a"), Some(&Value::Int(1)));
        assert_eq!(globals.get("b"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_function_call_updates_global() {
        let source = "fn bump(n) { global total\n total = total + n }\ntotal = 0\nbump(5)\nbump(2)\n";
        let globals = run_source(source).unwrap();
        assert_eq!(globals.get("total"), Some(&Value::Int(7)));
    }

    #[test]
    fn test_while_loop() {
        let globals = run_source("n = 5\nacc = 0\nwhile n > 0 { acc = acc + n\n n = n - 1 }\n").unwrap();
        assert_eq!(globals.get("acc"), Some(&Value::Int(15)));
    }
}
