//! Virtual Machine for the Skarn programming language
//!
//! A stack-based bytecode interpreter with named-binding frames. Each frame
//! exposes its globals and locals as name → value mappings, which is the
//! introspection surface the debugger builds on: the current line of every
//! frame is recoverable from the chunk's line table, and evaluation
//! fragments can run against any frame's bindings.

pub mod console;
mod error;
mod loader;
mod natives;

pub use console::{
    BufferSink, Console, HostStderr, HostStdin, HostStdout, InputSource, OutputSink,
    ScriptedInput,
};
pub use error::{RuntimeError, RuntimeErrorKind, RuntimeResult, TraceFrame};
pub use loader::{
    compile_module_file, resolve_module_file, FsLoader, ModuleLoader, ResolvedModule,
    PACKAGE_INIT, SOURCE_EXTENSION,
};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::bytecode::{
    new_bindings, Bindings, Closure, Function, ModuleUnit, OpCode, Value,
};

/// Maximum call stack depth
const MAX_FRAMES: usize = 256;

/// A call frame on the call stack
struct CallFrame {
    /// The function being executed
    function: Rc<Function>,

    /// Instruction pointer (index into chunk code)
    ip: usize,

    /// Global bindings of the module the code runs in
    globals: Bindings,

    /// Local bindings; absent for module-level frames, whose locals are
    /// their globals
    locals: Option<Bindings>,
}

/// A read-only view of one call frame, newest-first position independent
///
/// This is what the debugger sees: enough to name the frame, find its
/// source line, and reach its bindings.
#[derive(Clone)]
pub struct FrameView {
    /// Name of the executing function (`<module>` for top-level code)
    pub function: String,

    /// Source file of the executing chunk, if locatable
    pub source: Option<PathBuf>,

    /// Current source line
    pub line: u32,

    /// The frame's global bindings
    pub globals: Bindings,

    /// The frame's local bindings; `None` for module-level frames
    pub locals: Option<Bindings>,
}

/// The Skarn virtual machine
pub struct Vm {
    /// Value stack
    stack: Vec<Value>,

    /// Call stack
    frames: Vec<CallFrame>,

    /// Loaded module cache, keyed by dotted import name
    modules: HashMap<String, Value>,

    /// Module loader chain, tried front to back
    loaders: Vec<Rc<dyn ModuleLoader>>,

    /// Stream adapters used by I/O natives
    console: Console,

    /// Directories searched by the filesystem loader
    search_path: Vec<PathBuf>,

    /// The target program's argument vector
    argv: Vec<String>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    /// Create a VM with host-process streams
    #[must_use]
    pub fn new() -> Self {
        Self::with_console(Console::host())
    }

    /// Create a VM with the given stream adapters
    #[must_use]
    pub fn with_console(console: Console) -> Self {
        Self {
            stack: Vec::new(),
            frames: Vec::new(),
            modules: HashMap::new(),
            loaders: vec![Rc::new(FsLoader)],
            console,
            search_path: Vec::new(),
            argv: Vec::new(),
        }
    }

    /// The VM's stream adapters
    #[must_use]
    pub fn console(&self) -> &Console {
        &self.console
    }

    /// Set the target's argument vector
    pub fn set_argv(&mut self, argv: Vec<String>) {
        self.argv = argv;
    }

    /// The target's argument vector
    #[must_use]
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Append a directory to the module search path
    pub fn add_search_path(&mut self, dir: PathBuf) {
        if !self.search_path.contains(&dir) {
            self.search_path.push(dir);
        }
    }

    /// The module search path
    #[must_use]
    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    /// Install a loader at the head of the loader chain
    pub fn install_loader(&mut self, loader: Rc<dyn ModuleLoader>) {
        self.loaders.insert(0, loader);
    }

    /// Remove the loader most recently installed with `install_loader`
    ///
    /// The default filesystem loader at the end of the chain is never
    /// removed.
    pub fn uninstall_loader(&mut self) {
        if self.loaders.len() > 1 {
            self.loaders.remove(0);
        }
    }

    /// Drop all cached modules so subsequent imports load fresh code
    pub fn invalidate_module_cache(&mut self) {
        self.modules.clear();
    }

    /// Fresh global bindings with the native functions installed
    #[must_use]
    pub fn base_globals(&self) -> Bindings {
        let globals = new_bindings();
        natives::install(&globals);
        globals
    }

    /// Wrap executed module globals into a module value
    #[must_use]
    pub fn make_module_value(&self, name: &str, path: &Path, globals: Bindings) -> Value {
        Value::Module(Rc::new(ModuleUnit {
            name: name.to_string(),
            path: path.to_path_buf(),
            globals,
        }))
    }

    /// Number of live frames
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Views of all live frames, oldest first
    #[must_use]
    pub fn frame_views(&self) -> Vec<FrameView> {
        self.frames.iter().map(Self::view_of).collect()
    }

    /// View of the frame `depth` calls below the newest frame
    #[must_use]
    pub fn frame_view_at(&self, depth: usize) -> Option<FrameView> {
        let index = self.frames.len().checked_sub(depth + 1)?;
        self.frames.get(index).map(Self::view_of)
    }

    fn view_of(frame: &CallFrame) -> FrameView {
        FrameView {
            function: frame.function.name.clone(),
            source: frame.function.chunk.source().map(Path::to_path_buf),
            line: frame.function.chunk.line_at(frame.ip),
            globals: frame.globals.clone(),
            locals: frame.locals.clone(),
        }
    }

    /// Execute module-level code in the given globals
    pub fn run_module(&mut self, function: Rc<Function>, globals: Bindings) -> RuntimeResult<Value> {
        self.run_in_frame(function, globals, None)
    }

    /// Execute a code object against explicit bindings
    ///
    /// Used for evaluation fragments: `locals` of the stopped frame (if
    /// any) and its globals become the new frame's bindings.
    pub fn run_eval(
        &mut self,
        function: Rc<Function>,
        globals: Bindings,
        locals: Option<Bindings>,
    ) -> RuntimeResult<Value> {
        self.run_in_frame(function, globals, locals)
    }

    fn run_in_frame(
        &mut self,
        function: Rc<Function>,
        globals: Bindings,
        locals: Option<Bindings>,
    ) -> RuntimeResult<Value> {
        let floor = self.frames.len();
        let stack_floor = self.stack.len();
        self.push_frame(CallFrame {
            function,
            ip: 0,
            globals,
            locals,
        })?;
        match self.execute(floor) {
            Ok(value) => Ok(value),
            Err(mut error) => {
                // Keep the innermost trace when the failure crossed a nested
                // run (module body, evaluation fragment)
                if error.stack_trace.is_empty() {
                    error = error.with_trace(self.capture_trace(floor));
                }
                self.frames.truncate(floor);
                self.stack.truncate(stack_floor);
                Err(error)
            }
        }
    }

    /// Stack trace of the frames above `floor`, newest first
    fn capture_trace(&self, floor: usize) -> Vec<TraceFrame> {
        self.frames[floor..]
            .iter()
            .rev()
            .map(|frame| TraceFrame {
                function: frame.function.name.clone(),
                line: frame.function.chunk.line_at(frame.ip.saturating_sub(1)),
                source: frame.function.chunk.source().map(Path::to_path_buf),
            })
            .collect()
    }

    fn push_frame(&mut self, frame: CallFrame) -> RuntimeResult<()> {
        if self.frames.len() >= MAX_FRAMES {
            return Err(RuntimeError::new(RuntimeErrorKind::StackOverflow));
        }
        self.frames.push(frame);
        Ok(())
    }

    // ===== Dispatch loop =====

    fn execute(&mut self, floor: usize) -> RuntimeResult<Value> {
        loop {
            let op_byte = self.fetch_byte()?;
            let op = OpCode::try_from(op_byte)
                .map_err(|e| RuntimeError::new(RuntimeErrorKind::InvalidOpcode(e.0)))?;

            match op {
                OpCode::Const => {
                    let index = self.fetch_u16()?;
                    let constant = self
                        .current_constant(index)?
                        .clone();
                    let value = match constant {
                        // Function constants close over the running module's
                        // globals the moment they are materialized
                        Value::Function(function) => Value::Closure(Rc::new(Closure {
                            function,
                            globals: self.top_frame()?.globals.clone(),
                        })),
                        other => other,
                    };
                    self.stack.push(value);
                }
                OpCode::Null => self.stack.push(Value::Null),
                OpCode::True => self.stack.push(Value::Bool(true)),
                OpCode::False => self.stack.push(Value::Bool(false)),
                OpCode::Pop => {
                    self.pop()?;
                }

                OpCode::LoadLocal => {
                    let name = self.fetch_name()?;
                    let frame = self.top_frame()?;
                    let locals = frame.locals.as_ref().ok_or_else(|| {
                        RuntimeError::new(RuntimeErrorKind::Internal(
                            "local access outside a function frame".into(),
                        ))
                    })?;
                    let value = locals.borrow().get(&name).cloned().ok_or_else(|| {
                        RuntimeError::new(RuntimeErrorKind::UndefinedVariable(name.clone()))
                    })?;
                    self.stack.push(value);
                }
                OpCode::StoreLocal => {
                    let name = self.fetch_name()?;
                    let value = self.pop()?;
                    let frame = self.top_frame()?;
                    let locals = frame.locals.as_ref().ok_or_else(|| {
                        RuntimeError::new(RuntimeErrorKind::Internal(
                            "local access outside a function frame".into(),
                        ))
                    })?;
                    locals.borrow_mut().insert(name, value);
                }
                OpCode::LoadGlobal => {
                    let name = self.fetch_name()?;
                    let frame = self.top_frame()?;
                    let value = frame.globals.borrow().get(&name).cloned().ok_or_else(|| {
                        RuntimeError::new(RuntimeErrorKind::UndefinedVariable(name.clone()))
                    })?;
                    self.stack.push(value);
                }
                OpCode::StoreGlobal => {
                    let name = self.fetch_name()?;
                    let value = self.pop()?;
                    self.top_frame()?.globals.borrow_mut().insert(name, value);
                }
                OpCode::LoadName => {
                    let name = self.fetch_name()?;
                    let frame = self.top_frame()?;
                    let local = frame
                        .locals
                        .as_ref()
                        .and_then(|locals| locals.borrow().get(&name).cloned());
                    let value = match local {
                        Some(value) => value,
                        None => frame.globals.borrow().get(&name).cloned().ok_or_else(|| {
                            RuntimeError::new(RuntimeErrorKind::UndefinedVariable(name.clone()))
                        })?,
                    };
                    self.stack.push(value);
                }
                OpCode::StoreName => {
                    let name = self.fetch_name()?;
                    let value = self.pop()?;
                    let frame = self.top_frame()?;
                    match &frame.locals {
                        Some(locals) => locals.borrow_mut().insert(name, value),
                        None => frame.globals.borrow_mut().insert(name, value),
                    };
                }
                OpCode::GetAttr => {
                    let name = self.fetch_name()?;
                    let object = self.pop()?;
                    let module = match object {
                        Value::Module(module) => module,
                        other => {
                            return Err(RuntimeError::new(RuntimeErrorKind::TypeError {
                                expected: "module",
                                got: other.type_name(),
                                operation: "attribute access",
                            }));
                        }
                    };
                    let value = module.globals.borrow().get(&name).cloned().ok_or_else(|| {
                        RuntimeError::new(RuntimeErrorKind::UndefinedAttribute {
                            module: module.name.clone(),
                            name,
                        })
                    })?;
                    self.stack.push(value);
                }

                OpCode::Add
                | OpCode::Sub
                | OpCode::Mul
                | OpCode::Div
                | OpCode::Mod
                | OpCode::Lt
                | OpCode::Le
                | OpCode::Gt
                | OpCode::Ge => {
                    let right = self.pop()?;
                    let left = self.pop()?;
                    let result = binary_op(op, &left, &right)?;
                    self.stack.push(result);
                }
                OpCode::Eq => {
                    let right = self.pop()?;
                    let left = self.pop()?;
                    self.stack.push(Value::Bool(left == right));
                }
                OpCode::Ne => {
                    let right = self.pop()?;
                    let left = self.pop()?;
                    self.stack.push(Value::Bool(left != right));
                }
                OpCode::Neg => {
                    let value = self.pop()?;
                    let result = match value {
                        Value::Int(n) => Value::Int(-n),
                        Value::Float(n) => Value::Float(-n),
                        other => {
                            return Err(RuntimeError::new(RuntimeErrorKind::TypeError {
                                expected: "number",
                                got: other.type_name(),
                                operation: "negation",
                            }));
                        }
                    };
                    self.stack.push(result);
                }
                OpCode::Not => {
                    let value = self.pop()?;
                    self.stack.push(Value::Bool(!value.is_truthy()));
                }

                OpCode::Jump => {
                    let rel = self.fetch_i16()?;
                    self.jump(rel)?;
                }
                OpCode::JumpIfFalse => {
                    let rel = self.fetch_i16()?;
                    if !self.pop()?.is_truthy() {
                        self.jump(rel)?;
                    }
                }
                OpCode::JumpIfTrue => {
                    let rel = self.fetch_i16()?;
                    if self.pop()?.is_truthy() {
                        self.jump(rel)?;
                    }
                }
                OpCode::Loop => {
                    let rel = self.fetch_i16()?;
                    self.jump(rel)?;
                }

                OpCode::Call => {
                    let argc = self.fetch_byte()? as usize;
                    self.call_value(argc)?;
                }
                OpCode::Return => {
                    let value = self.pop()?;
                    self.frames.pop();
                    if self.frames.len() == floor {
                        return Ok(value);
                    }
                    self.stack.push(value);
                }

                OpCode::Import => {
                    let name = self.fetch_name()?;
                    let value = self.import_module(&name)?;
                    self.stack.push(value);
                }
            }
        }
    }

    fn call_value(&mut self, argc: usize) -> RuntimeResult<()> {
        let callee_index = self
            .stack
            .len()
            .checked_sub(argc + 1)
            .ok_or_else(|| RuntimeError::new(RuntimeErrorKind::StackUnderflow))?;
        let callee = self.stack[callee_index].clone();

        match callee {
            Value::Closure(closure) => {
                check_arity(closure.function.arity, argc)?;
                let args = self.stack.split_off(callee_index + 1);
                self.stack.pop();

                let locals = new_bindings();
                {
                    let mut map = locals.borrow_mut();
                    for (param, arg) in closure.function.params.iter().zip(args) {
                        map.insert(param.clone(), arg);
                    }
                }
                self.push_frame(CallFrame {
                    function: closure.function.clone(),
                    ip: 0,
                    globals: closure.globals.clone(),
                    locals: Some(locals),
                })?;
                Ok(())
            }
            Value::Native(native) => {
                if let Some(expected) = native.arity {
                    check_arity(expected, argc)?;
                }
                let args = self.stack.split_off(callee_index + 1);
                self.stack.pop();
                let result = native.call(self, &args)?;
                self.stack.push(result);
                Ok(())
            }
            other => Err(RuntimeError::new(RuntimeErrorKind::NotCallable(
                other.type_name(),
            ))),
        }
    }

    fn import_module(&mut self, name: &str) -> RuntimeResult<Value> {
        if let Some(cached) = self.modules.get(name) {
            return Ok(cached.clone());
        }
        let loaders = self.loaders.clone();
        for loader in loaders {
            if let Some(value) = loader.load(self, name)? {
                self.modules.insert(name.to_string(), value.clone());
                return Ok(value);
            }
        }
        Err(RuntimeError::new(RuntimeErrorKind::ImportNotFound(
            name.to_string(),
        )))
    }

    // ===== Fetch helpers =====

    fn top_frame(&self) -> RuntimeResult<&CallFrame> {
        self.frames
            .last()
            .ok_or_else(|| RuntimeError::new(RuntimeErrorKind::Internal("no active frame".into())))
    }

    fn fetch_byte(&mut self) -> RuntimeResult<u8> {
        let frame = self.frames.last_mut().ok_or_else(|| {
            RuntimeError::new(RuntimeErrorKind::Internal("no active frame".into()))
        })?;
        let byte = frame.function.chunk.byte_at(frame.ip).ok_or_else(|| {
            RuntimeError::new(RuntimeErrorKind::Internal(
                "instruction pointer past end of chunk".into(),
            ))
        })?;
        frame.ip += 1;
        Ok(byte)
    }

    fn fetch_u16(&mut self) -> RuntimeResult<u16> {
        let frame = self.frames.last_mut().ok_or_else(|| {
            RuntimeError::new(RuntimeErrorKind::Internal("no active frame".into()))
        })?;
        let value = frame.function.chunk.u16_at(frame.ip).ok_or_else(|| {
            RuntimeError::new(RuntimeErrorKind::Internal(
                "instruction pointer past end of chunk".into(),
            ))
        })?;
        frame.ip += 2;
        Ok(value)
    }

    fn fetch_i16(&mut self) -> RuntimeResult<i16> {
        self.fetch_u16().map(|u| u as i16)
    }

    /// Read a u16 constant index and resolve it to a string constant
    fn fetch_name(&mut self) -> RuntimeResult<String> {
        let index = self.fetch_u16()?;
        match self.current_constant(index)? {
            Value::Str(s) => Ok(s.to_string()),
            other => Err(RuntimeError::new(RuntimeErrorKind::Internal(format!(
                "expected name constant, found {}",
                other.type_name()
            )))),
        }
    }

    fn current_constant(&self, index: u16) -> RuntimeResult<&Value> {
        self.top_frame()?
            .function
            .chunk
            .constant(index)
            .ok_or_else(|| {
                RuntimeError::new(RuntimeErrorKind::Internal(format!(
                    "constant index {index} out of range"
                )))
            })
    }

    fn jump(&mut self, rel: i16) -> RuntimeResult<()> {
        let frame = self.frames.last_mut().ok_or_else(|| {
            RuntimeError::new(RuntimeErrorKind::Internal("no active frame".into()))
        })?;
        let target = frame.ip as isize + rel as isize;
        if target < 0 || target as usize > frame.function.chunk.len() {
            return Err(RuntimeError::new(RuntimeErrorKind::Internal(
                "jump target out of range".into(),
            )));
        }
        frame.ip = target as usize;
        Ok(())
    }

    fn pop(&mut self) -> RuntimeResult<Value> {
        self.stack
            .pop()
            .ok_or_else(|| RuntimeError::new(RuntimeErrorKind::StackUnderflow))
    }
}

fn check_arity(expected: u8, got: usize) -> RuntimeResult<()> {
    if got == expected as usize {
        Ok(())
    } else {
        #[allow(clippy::cast_possible_truncation)]
        Err(RuntimeError::new(RuntimeErrorKind::ArityMismatch {
            expected,
            got: got.min(u8::MAX as usize) as u8,
        }))
    }
}

/// Arithmetic and ordering on numbers (plus string concatenation and
/// comparison)
fn binary_op(op: OpCode, left: &Value, right: &Value) -> RuntimeResult<Value> {
    use Value::{Float, Int, Str};

    let type_error = |expected: &'static str, got: &'static str| {
        RuntimeError::new(RuntimeErrorKind::TypeError {
            expected,
            got,
            operation: match op {
                OpCode::Add => "+",
                OpCode::Sub => "-",
                OpCode::Mul => "*",
                OpCode::Div => "/",
                OpCode::Mod => "%",
                OpCode::Lt => "<",
                OpCode::Le => "<=",
                OpCode::Gt => ">",
                OpCode::Ge => ">=",
                _ => "binary operation",
            },
        })
    };

    // String cases first
    if let (Str(a), Str(b)) = (left, right) {
        return Ok(match op {
            OpCode::Add => Value::from(format!("{a}{b}")),
            OpCode::Lt => Value::Bool(a < b),
            OpCode::Le => Value::Bool(a <= b),
            OpCode::Gt => Value::Bool(a > b),
            OpCode::Ge => Value::Bool(a >= b),
            _ => return Err(type_error("number", "string")),
        });
    }

    // Integer fast path
    if let (Int(a), Int(b)) = (left, right) {
        return Ok(match op {
            OpCode::Add => Int(a.wrapping_add(*b)),
            OpCode::Sub => Int(a.wrapping_sub(*b)),
            OpCode::Mul => Int(a.wrapping_mul(*b)),
            OpCode::Div => {
                if *b == 0 {
                    return Err(RuntimeError::new(RuntimeErrorKind::DivisionByZero));
                }
                Int(a.wrapping_div(*b))
            }
            OpCode::Mod => {
                if *b == 0 {
                    return Err(RuntimeError::new(RuntimeErrorKind::DivisionByZero));
                }
                Int(a.wrapping_rem(*b))
            }
            OpCode::Lt => Value::Bool(a < b),
            OpCode::Le => Value::Bool(a <= b),
            OpCode::Gt => Value::Bool(a > b),
            OpCode::Ge => Value::Bool(a >= b),
            _ => return Err(type_error("number", "int")),
        });
    }

    // Mixed numeric promotes to float
    #[allow(clippy::cast_precision_loss)]
    let as_float = |value: &Value| match value {
        Int(n) => Some(*n as f64),
        Float(n) => Some(*n),
        _ => None,
    };
    let (Some(a), Some(b)) = (as_float(left), as_float(right)) else {
        let offender = if as_float(left).is_none() { left } else { right };
        return Err(type_error("number", offender.type_name()));
    };

    Ok(match op {
        OpCode::Add => Float(a + b),
        OpCode::Sub => Float(a - b),
        OpCode::Mul => Float(a * b),
        OpCode::Div => {
            if b == 0.0 {
                return Err(RuntimeError::new(RuntimeErrorKind::DivisionByZero));
            }
            Float(a / b)
        }
        OpCode::Mod => {
            if b == 0.0 {
                return Err(RuntimeError::new(RuntimeErrorKind::DivisionByZero));
            }
            Float(a % b)
        }
        OpCode::Lt => Value::Bool(a < b),
        OpCode::Le => Value::Bool(a <= b),
        OpCode::Gt => Value::Bool(a > b),
        OpCode::Ge => Value::Bool(a >= b),
        _ => return Err(type_error("number", left.type_name())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Compiler;
    use crate::parser::Parser;
    use std::fs;
    use std::io::Write as _;
    use std::sync::Arc;

    fn run(source: &str) -> (Vm, Bindings) {
        let module = Parser::parse_module(source).unwrap();
        let function = Compiler::new().compile_module(&module, None).unwrap();
        let mut vm = Vm::new();
        let globals = vm.base_globals();
        vm.run_module(Rc::new(function), globals.clone()).unwrap();
        (vm, globals)
    }

    fn global(globals: &Bindings, name: &str) -> Value {
        globals.borrow().get(name).cloned().unwrap()
    }

    #[test]
    fn test_arithmetic_and_comparison() {
        let (_, globals) = run("a = 2 + 3 * 4\nb = 10 / 4\nc = 10.0 / 4\nd = 7 % 3\ne = 2 < 3");
        assert_eq!(global(&globals, "a"), Value::Int(14));
        assert_eq!(global(&globals, "b"), Value::Int(2));
        assert_eq!(global(&globals, "c"), Value::Float(2.5));
        assert_eq!(global(&globals, "d"), Value::Int(1));
        assert_eq!(global(&globals, "e"), Value::Bool(true));
    }

    #[test]
    fn test_string_concat() {
        let (_, globals) = run("s = \"foo\" + \"bar\"");
        assert_eq!(global(&globals, "s"), Value::from("foobar"));
    }

    #[test]
    fn test_function_call_and_locals() {
        let (_, globals) = run("fn add(a, b) { return a + b }\nresult = add(1, 2)");
        assert_eq!(global(&globals, "result"), Value::Int(3));
    }

    #[test]
    fn test_global_declaration_in_function() {
        let (_, globals) = run("fn t(v) { global a; a = v }\na = 0\nt(5)");
        assert_eq!(global(&globals, "a"), Value::Int(5));
    }

    #[test]
    fn test_if_else_and_logic() {
        let (_, globals) = run("a = 1\nif a == 1 && a > 0 { b = 2 } else { b = 3 }");
        assert_eq!(global(&globals, "b"), Value::Int(2));
    }

    #[test]
    fn test_recursion() {
        let (_, globals) =
            run("fn fact(n) { if n <= 1 { return 1 }\nreturn n * fact(n - 1) }\nr = fact(6)");
        assert_eq!(global(&globals, "r"), Value::Int(720));
    }

    #[test]
    fn test_undefined_variable_error() {
        let module = Parser::parse_module("a = missing + 1").unwrap();
        let function = Compiler::new().compile_module(&module, None).unwrap();
        let mut vm = Vm::new();
        let globals = vm.base_globals();
        let err = vm.run_module(Rc::new(function), globals).unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::UndefinedVariable(_)));
        // Frames are unwound after the failure
        assert_eq!(vm.frame_count(), 0);
    }

    #[test]
    fn test_error_carries_stack_trace() {
        let module =
            Parser::parse_module("fn inner() { return 1 / 0 }\nfn outer() { return inner() }\nouter()")
                .unwrap();
        let function = Compiler::new().compile_module(&module, None).unwrap();
        let mut vm = Vm::new();
        let globals = vm.base_globals();
        let err = vm.run_module(Rc::new(function), globals).unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::DivisionByZero));
        let names: Vec<&str> = err.stack_trace.iter().map(|f| f.function.as_str()).collect();
        assert_eq!(names, vec!["inner", "outer", "<module>"]);
    }

    #[test]
    fn test_println_goes_through_console() {
        let out = Arc::new(BufferSink::new());
        let console = Console {
            out: out.clone(),
            err: Arc::new(BufferSink::new()),
            input: Arc::new(ScriptedInput::default()),
        };
        let module = Parser::parse_module("println(\"hello\", 42)").unwrap();
        let function = Compiler::new().compile_module(&module, None).unwrap();
        let mut vm = Vm::with_console(console);
        let globals = vm.base_globals();
        vm.run_module(Rc::new(function), globals).unwrap();
        assert_eq!(out.contents(), "hello 42\n");
    }

    #[test]
    fn test_import_binds_module_value() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = fs::File::create(dir.path().join("helper.skn")).unwrap();
        writeln!(file, "value = 41\nfn bump(n) {{ return n + 1 }}").unwrap();

        let module = Parser::parse_module("import helper\nr = helper.bump(helper.value)").unwrap();
        let function = Compiler::new().compile_module(&module, None).unwrap();
        let mut vm = Vm::new();
        vm.add_search_path(dir.path().to_path_buf());
        let globals = vm.base_globals();
        vm.run_module(Rc::new(function), globals.clone()).unwrap();
        assert_eq!(global(&globals, "r"), Value::Int(42));
    }

    #[test]
    fn test_import_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = fs::File::create(dir.path().join("counter.skn")).unwrap();
        writeln!(file, "hits = 1").unwrap();

        let module = Parser::parse_module("import counter\nimport counter").unwrap();
        let function = Compiler::new().compile_module(&module, None).unwrap();
        let mut vm = Vm::new();
        vm.add_search_path(dir.path().to_path_buf());
        let globals = vm.base_globals();
        vm.run_module(Rc::new(function), globals.clone()).unwrap();

        let first = global(&globals, "counter");
        let Value::Module(unit) = &first else {
            panic!("expected module value");
        };
        assert_eq!(unit.globals.borrow().get("hits"), Some(&Value::Int(1)));
        // After invalidation a fresh import reloads the module
        vm.invalidate_module_cache();
        let module = Parser::parse_module("import counter").unwrap();
        let function = Compiler::new().compile_module(&module, None).unwrap();
        vm.run_module(Rc::new(function), globals.clone()).unwrap();
        let second = global(&globals, "counter");
        assert_ne!(first, second);
    }

    #[test]
    fn test_eval_fragment_against_module_frame() {
        let (mut vm, globals) = run("a = 0\nb = 1");
        let stmts = Parser::parse_fragment("b = 0.02").unwrap();
        let eval = Compiler::new().compile_eval_fragment(&stmts).unwrap();
        vm.run_eval(Rc::new(eval), globals.clone(), None).unwrap();
        assert_eq!(global(&globals, "b"), Value::Float(0.02));
    }

    #[test]
    fn test_deep_recursion_overflows() {
        let module = Parser::parse_module("fn f(n) { return f(n + 1) }\nf(0)").unwrap();
        let function = Compiler::new().compile_module(&module, None).unwrap();
        let mut vm = Vm::new();
        let globals = vm.base_globals();
        let err = vm.run_module(Rc::new(function), globals).unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::StackOverflow));
    }
}
