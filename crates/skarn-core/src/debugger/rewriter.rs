//! Bytecode rewriting - inserts the debug probe before every source line
//!
//! The rewriter turns a compiled code object `C` into `C'` where the first
//! instruction of every distinct source line is preceded by the probe
//! sequence
//!
//! ```text
//! LoadGlobal 'debug'
//! Call 0
//! Pop
//! ```
//!
//! Rewriting decodes the instruction stream, plans one probe per line,
//! re-encodes with every relative jump re-targeted so that control entering
//! a line always runs its probe first, and recurses into nested function
//! constants whose source is locatable. The sequence is stack-neutral, so
//! the rewritten code computes exactly what the original computed.

use std::collections::HashSet;
use std::rc::Rc;

use thiserror::Error;

use crate::bytecode::{Chunk, Function, OpCode, OperandKind, Value};

/// Name of the global binding the probe sequence calls
///
/// The probe must be reachable from raw rewritten code with no environment
/// of its own, so it lives in module globals under this fixed name. The
/// debug session binds it in the entry module; the loader interceptor binds
/// it in every module it loads.
pub const PROBE_GLOBAL: &str = "debug";

/// Encoded size of the probe sequence
const PROBE_BYTES: usize = 6;

/// Internal rewrite failures
///
/// These never escape to the target: a chunk that cannot be rewritten is
/// used as-is.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RewriteError {
    #[error("instruction stream ends inside an instruction")]
    TruncatedChunk,

    #[error("unknown opcode {0} in instruction stream")]
    UnknownOpcode(u8),

    #[error("jump lands inside an instruction")]
    BadJumpTarget,

    #[error("constant pool overflow while instrumenting")]
    ConstantPoolFull,

    #[error("instrumented jump distance exceeds bytecode limits")]
    JumpTooFar,
}

/// A decoded instruction
struct Instr {
    op: OpCode,
    operand: Operand,
    line: u32,
    /// For relative jumps: index of the target instruction
    /// (`instrs.len()` addresses the end of the chunk)
    target: Option<usize>,
}

/// A decoded inline operand
#[derive(Clone, Copy)]
enum Operand {
    None,
    Byte(u8),
    Short(u16),
    Rel(i16),
}

/// Rewrite a code object so the probe runs before every source line
///
/// Code without a locatable source is returned untouched, as is code the
/// rewriter cannot decode; both cases leave the target runnable. Nested
/// function constants are rewritten recursively, each falling back to its
/// original form on failure without affecting the outer rewrite.
#[must_use]
pub fn instrument(function: &Function) -> Function {
    if function.chunk.source().is_none() {
        return function.clone();
    }
    match try_instrument(function) {
        Ok(rewritten) => rewritten,
        Err(error) => {
            tracing::warn!(function = %function.name, %error, "skipping instrumentation");
            function.clone()
        }
    }
}

fn try_instrument(function: &Function) -> Result<Function, RewriteError> {
    let chunk = &function.chunk;
    let instrs = decode(chunk)?;

    // One probe per distinct source line, at its first instruction.
    // Line 0 marks synthesized code and is never instrumented.
    let mut seen_lines: HashSet<u32> = HashSet::new();
    let probe_before: Vec<Option<u32>> = instrs
        .iter()
        .map(|instr| (instr.line != 0 && seen_lines.insert(instr.line)).then_some(instr.line))
        .collect();

    // Rebuild the constant pool in order, instrumenting nested code objects
    let mut out = match chunk.source() {
        Some(source) => Chunk::with_source(source),
        None => Chunk::new(),
    };
    for constant in chunk.constants() {
        let value = match constant {
            Value::Function(nested) if nested.chunk.source().is_some() => {
                match try_instrument(nested) {
                    Ok(rewritten) => Value::Function(Rc::new(rewritten)),
                    Err(error) => {
                        tracing::debug!(
                            function = %nested.name,
                            %error,
                            "keeping nested code object uninstrumented"
                        );
                        constant.clone()
                    }
                }
            }
            other => other.clone(),
        };
        out.add_constant(value)
            .map_err(|_| RewriteError::ConstantPoolFull)?;
    }
    let probe_index = out
        .add_constant(Value::from(PROBE_GLOBAL))
        .map_err(|_| RewriteError::ConstantPoolFull)?;

    // Layout pass: where every instruction (and its probe, if any) lands.
    // A jump into instruction `i` resolves to `start_of[i]`, which is the
    // probe when one is inserted there.
    let mut start_of = Vec::with_capacity(instrs.len() + 1);
    let mut acc = 0usize;
    for (i, instr) in instrs.iter().enumerate() {
        start_of.push(acc);
        if probe_before[i].is_some() {
            acc += PROBE_BYTES;
        }
        acc += instr.op.encoded_len();
    }
    start_of.push(acc);

    // Emission pass
    for (i, instr) in instrs.iter().enumerate() {
        if let Some(line) = probe_before[i] {
            out.emit_with_index(OpCode::LoadGlobal, probe_index, line);
            out.emit_with_byte(OpCode::Call, 0, line);
            out.emit(OpCode::Pop, line);
        }
        match instr.operand {
            Operand::None => out.emit(instr.op, instr.line),
            Operand::Byte(value) => out.emit_with_byte(instr.op, value, instr.line),
            Operand::Short(value) => out.emit_with_index(instr.op, value, instr.line),
            Operand::Rel(_) => {
                let target = instr.target.ok_or(RewriteError::BadJumpTarget)?;
                let after_operand = out.position() + 3;
                let distance = start_of[target] as isize - after_operand as isize;
                let rel = i16::try_from(distance).map_err(|_| RewriteError::JumpTooFar)?;
                out.emit_with_rel(instr.op, rel, instr.line);
            }
        }
    }

    Ok(Function {
        name: function.name.clone(),
        arity: function.arity,
        params: function.params.clone(),
        chunk: out,
    })
}

/// Decode a chunk into instructions with resolved jump targets
fn decode(chunk: &Chunk) -> Result<Vec<Instr>, RewriteError> {
    let mut instrs = Vec::new();
    let mut offsets = Vec::new();

    let mut offset = 0;
    while offset < chunk.len() {
        let byte = chunk.byte_at(offset).ok_or(RewriteError::TruncatedChunk)?;
        let op = OpCode::try_from(byte).map_err(|e| RewriteError::UnknownOpcode(e.0))?;
        let operand = match op.operand_kind() {
            OperandKind::None => Operand::None,
            OperandKind::Byte => Operand::Byte(
                chunk
                    .byte_at(offset + 1)
                    .ok_or(RewriteError::TruncatedChunk)?,
            ),
            OperandKind::Short => Operand::Short(
                chunk
                    .u16_at(offset + 1)
                    .ok_or(RewriteError::TruncatedChunk)?,
            ),
            OperandKind::Rel => Operand::Rel(
                chunk
                    .i16_at(offset + 1)
                    .ok_or(RewriteError::TruncatedChunk)?,
            ),
        };
        offsets.push(offset);
        instrs.push(Instr {
            op,
            operand,
            line: chunk.line_at(offset),
            target: None,
        });
        offset += op.encoded_len();
    }

    // Resolve relative jumps to instruction indices
    for i in 0..instrs.len() {
        if let Operand::Rel(rel) = instrs[i].operand {
            let after_operand = offsets[i] + instrs[i].op.encoded_len();
            let target_offset = after_operand as isize + rel as isize;
            if target_offset < 0 || target_offset as usize > chunk.len() {
                return Err(RewriteError::BadJumpTarget);
            }
            let target_offset = target_offset as usize;
            let index = if target_offset == chunk.len() {
                instrs.len()
            } else {
                offsets
                    .binary_search(&target_offset)
                    .map_err(|_| RewriteError::BadJumpTarget)?
            };
            instrs[i].target = Some(index);
        }
    }

    Ok(instrs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Bindings, Compiler, NativeFunction};
    use crate::parser::Parser;
    use crate::vm::Vm;
    use std::cell::Cell;
    use std::path::Path;

    fn compile_with_source(source: &str) -> Function {
        let module = Parser::parse_module(source).unwrap();
        Compiler::new()
            .compile_module(&module, Some(Path::new("/tmp/rewriter_test.skn")))
            .unwrap()
    }

    /// Count probe call sites (LoadGlobal 'debug' instructions) in a chunk
    fn count_probe_sites(function: &Function) -> usize {
        let chunk = &function.chunk;
        decode(chunk)
            .unwrap()
            .iter()
            .filter(|instr| {
                instr.op == OpCode::LoadGlobal
                    && matches!(instr.operand, Operand::Short(idx)
                        if chunk.constant(idx) == Some(&Value::from(PROBE_GLOBAL)))
            })
            .count()
    }

    fn run_with_probe(function: &Function, probe: NativeFunction) -> (Vm, Bindings) {
        let mut vm = Vm::new();
        let globals = vm.base_globals();
        globals
            .borrow_mut()
            .insert(PROBE_GLOBAL.to_string(), Value::Native(probe));
        vm.run_module(Rc::new(function.clone()), globals.clone())
            .unwrap();
        (vm, globals)
    }

    fn counting_probe(counter: Rc<Cell<usize>>) -> NativeFunction {
        NativeFunction::new(PROBE_GLOBAL, Some(0), move |_, _| {
            counter.set(counter.get() + 1);
            Ok(Value::Null)
        })
    }

    #[test]
    fn test_sourceless_code_is_untouched() {
        let module = Parser::parse_module("a = 1\nb = 2").unwrap();
        let function = Compiler::new().compile_module(&module, None).unwrap();
        let rewritten = instrument(&function);
        assert_eq!(rewritten.chunk.code(), function.chunk.code());
    }

    #[test]
    fn test_one_probe_per_distinct_line() {
        let function = compile_with_source("a = 0\nb = 1\nc = 2\nd = 3");
        let rewritten = instrument(&function);
        assert_eq!(count_probe_sites(&function), 0);
        assert_eq!(count_probe_sites(&rewritten), 4);
    }

    #[test]
    fn test_noop_probe_preserves_behavior() {
        let source = "a = 1\nb = a + 1\nwhile b < 10 { b = b * 2 }\nif a == 1 { c = b } else { c = 0 }";
        let function = compile_with_source(source);
        let rewritten = instrument(&function);

        let noop = NativeFunction::new(PROBE_GLOBAL, Some(0), |_, _| Ok(Value::Null));
        let (_, plain) = run_with_probe(&function, noop.clone());
        let (_, probed) = run_with_probe(&rewritten, noop);

        for name in ["a", "b", "c"] {
            assert_eq!(
                plain.borrow().get(name),
                probed.borrow().get(name),
                "global '{name}' diverged"
            );
        }
        assert_eq!(probed.borrow().get("c"), Some(&Value::Int(16)));
    }

    #[test]
    fn test_probe_fires_once_per_line_execution() {
        let source = "n = 3\ntotal = 0\nwhile n > 0 {\n  total = total + n\n  n = n - 1\n}\ndone = 1";
        let function = compile_with_source(source);
        let rewritten = instrument(&function);

        let counter = Rc::new(Cell::new(0));
        let (_, globals) = run_with_probe(&rewritten, counting_probe(counter.clone()));

        assert_eq!(globals.borrow().get("total"), Some(&Value::Int(6)));
        // line 1 once, line 2 once, line 3 four times (three iterations
        // plus the final false check), lines 4 and 5 three times each,
        // line 7 once
        assert_eq!(counter.get(), 1 + 1 + 4 + 3 + 3 + 1);
    }

    #[test]
    fn test_branch_targets_still_run_probes() {
        let source = "a = 0\nif a == 1 {\n  b = 1\n} else {\n  b = 2\n}\nc = 3";
        let function = compile_with_source(source);
        let rewritten = instrument(&function);

        let counter = Rc::new(Cell::new(0));
        let (_, globals) = run_with_probe(&rewritten, counting_probe(counter.clone()));

        assert_eq!(globals.borrow().get("b"), Some(&Value::Int(2)));
        assert_eq!(globals.borrow().get("c"), Some(&Value::Int(3)));
        // lines 1, 2, 5, 7 execute exactly once each; line 3 never runs
        assert_eq!(counter.get(), 4);
    }

    #[test]
    fn test_nested_functions_are_instrumented() {
        let source = "fn twice(x) {\n  return x + x\n}\nr = twice(4)";
        let function = compile_with_source(source);
        let rewritten = instrument(&function);

        let Value::Function(nested) = &rewritten.chunk.constants()[0] else {
            panic!("expected nested function constant");
        };
        assert_eq!(count_probe_sites(nested), 1);

        let counter = Rc::new(Cell::new(0));
        let (_, globals) = run_with_probe(&rewritten, counting_probe(counter.clone()));
        assert_eq!(globals.borrow().get("r"), Some(&Value::Int(8)));
        // module lines 1 and 4, plus function body line 2
        assert_eq!(counter.get(), 3);
    }

    #[test]
    fn test_sourceless_nested_constant_is_kept() {
        let mut function = Function::new("<module>");
        function.chunk = Chunk::with_source("/tmp/outer.skn");
        let inner = Rc::new(Function::new("<eval>"));
        let index = function
            .chunk
            .add_constant(Value::Function(inner.clone()))
            .unwrap();
        function.chunk.emit_with_index(OpCode::Const, index, 1);
        function.chunk.emit(OpCode::Pop, 1);
        function.chunk.emit(OpCode::Null, 1);
        function.chunk.emit(OpCode::Return, 1);

        let rewritten = instrument(&function);
        let Value::Function(kept) = &rewritten.chunk.constants()[0] else {
            panic!("expected function constant");
        };
        assert!(Rc::ptr_eq(kept, &inner));
    }

    #[test]
    fn test_arity_and_params_preserved() {
        let function = compile_with_source("fn add(a, b) {\n  return a + b\n}\nr = add(1, 2)");
        let rewritten = instrument(&function);
        let Value::Function(nested) = &rewritten.chunk.constants()[0] else {
            panic!("expected nested function constant");
        };
        assert_eq!(nested.arity, 2);
        assert_eq!(nested.params, vec!["a", "b"]);
        assert_eq!(nested.name, "add");
    }
}
