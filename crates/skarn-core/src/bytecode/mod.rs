//! Bytecode module - instruction set, chunks, values, and the compiler

mod chunk;
mod compiler;
mod debug;
mod error;
mod opcode;
mod value;

pub use chunk::{Chunk, ConstantPoolFull};
pub use compiler::Compiler;
pub use debug::disassemble_chunk;
pub use error::{CompileError, CompileErrorKind, CompileResult};
pub use opcode::{InvalidOpcode, OpCode, OperandKind};
pub use value::{
    new_bindings, Bindings, Closure, Function, ModuleUnit, NativeFunction, NativeImpl, Value,
};
