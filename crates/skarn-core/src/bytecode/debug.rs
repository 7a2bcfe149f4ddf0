//! Bytecode disassembler for debugging and tests

use std::fmt::Write;

use super::chunk::Chunk;
use super::opcode::{OpCode, OperandKind};
use super::value::Value;

/// Disassemble a chunk to a string
///
/// Nested function constants are listed by name but not expanded; call
/// `disassemble_chunk` on their chunks to inspect them.
#[must_use]
pub fn disassemble_chunk(chunk: &Chunk, name: &str) -> String {
    let mut output = String::new();

    writeln!(output, "== {name} ==").unwrap();

    let mut offset = 0;
    while offset < chunk.len() {
        offset = disassemble_instruction(chunk, offset, &mut output);
    }

    output
}

/// Disassemble a single instruction, returning the next offset
fn disassemble_instruction(chunk: &Chunk, offset: usize, output: &mut String) -> usize {
    write!(output, "{offset:04} ").unwrap();

    // Line number, or | when unchanged from the previous instruction
    let line = chunk.line_at(offset);
    if offset > 0 && line == chunk.line_at(offset - 1) {
        write!(output, "   | ").unwrap();
    } else {
        write!(output, "{line:4} ").unwrap();
    }

    let Some(byte) = chunk.byte_at(offset) else {
        writeln!(output, "<truncated>").unwrap();
        return offset + 1;
    };

    let Ok(opcode) = OpCode::try_from(byte) else {
        writeln!(output, "<unknown opcode {byte}>").unwrap();
        return offset + 1;
    };

    match opcode.operand_kind() {
        OperandKind::None => {
            writeln!(output, "{opcode:?}").unwrap();
            offset + 1
        }
        OperandKind::Byte => {
            let operand = chunk.byte_at(offset + 1).unwrap_or(0);
            writeln!(output, "{opcode:?} {operand}").unwrap();
            offset + 2
        }
        OperandKind::Short => {
            let operand = chunk.u16_at(offset + 1).unwrap_or(0);
            match chunk.constant(operand) {
                Some(Value::Str(s)) => writeln!(output, "{opcode:?} {operand} '{s}'").unwrap(),
                Some(constant) => writeln!(output, "{opcode:?} {operand} ({constant})").unwrap(),
                None => writeln!(output, "{opcode:?} {operand}").unwrap(),
            }
            offset + 3
        }
        OperandKind::Rel => {
            let operand = chunk.i16_at(offset + 1).unwrap_or(0);
            let target = offset as isize + 3 + operand as isize;
            writeln!(output, "{opcode:?} {operand} -> {target:04}").unwrap();
            offset + 3
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disassemble_includes_names_and_targets() {
        let mut chunk = Chunk::new();
        let name = chunk.add_constant(Value::from("debug")).unwrap();
        chunk.emit_with_index(OpCode::LoadGlobal, name, 1);
        chunk.emit_with_byte(OpCode::Call, 0, 1);
        chunk.emit(OpCode::Pop, 1);
        let patch = chunk.emit_jump(OpCode::Jump, 2);
        assert!(chunk.patch_jump(patch));
        chunk.emit(OpCode::Return, 3);

        let text = disassemble_chunk(&chunk, "probe");
        assert!(text.contains("== probe =="));
        assert!(text.contains("LoadGlobal 0 'debug'"));
        assert!(text.contains("Call 0"));
        assert!(text.contains("Jump 0 -> 0009"));
    }
}
