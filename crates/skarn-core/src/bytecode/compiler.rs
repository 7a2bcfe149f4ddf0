//! Bytecode compiler - transforms AST into bytecode

use std::collections::HashSet;
use std::path::Path;
use std::rc::Rc;

use crate::ast::{BinOp, Expr, ExprKind, FnDef, Literal, Module, Stmt, StmtKind, UnaryOp};

use super::chunk::Chunk;
use super::error::{CompileError, CompileErrorKind, CompileResult};
use super::opcode::OpCode;
use super::value::{Function, Value};

/// The kind of scope being compiled
///
/// Name resolution differs per scope: module-level names are globals,
/// function bodies distinguish locals from declared globals, and evaluation
/// fragments defer all resolution to runtime so they can run against the
/// bindings of an arbitrary frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    /// Top-level module code
    Module,
    /// A function body
    Function,
    /// A fragment evaluated against an existing frame
    Eval,
}

/// The Skarn bytecode compiler
#[derive(Default)]
pub struct Compiler;

impl Compiler {
    /// Create a new compiler
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Compile a parsed module into its top-level code object
    ///
    /// `source` is the path of the originating file; it is recorded on the
    /// chunk (and every nested function's chunk) so that tooling can find
    /// the source again. Code compiled without a source path is invisible
    /// to the bytecode rewriter.
    pub fn compile_module(&self, module: &Module, source: Option<&Path>) -> CompileResult<Function> {
        let mut ctx = FnContext::new("<module>", ScopeKind::Module, source);
        ctx.compile_body(&module.body)?;
        ctx.finish()
    }

    /// Compile a statement fragment for evaluation against a frame
    ///
    /// All name loads and stores resolve dynamically at runtime, and the
    /// resulting chunk carries no source path.
    pub fn compile_eval_fragment(&self, body: &[Stmt]) -> CompileResult<Function> {
        let mut ctx = FnContext::new("<eval>", ScopeKind::Eval, None);
        ctx.compile_body(body)?;
        ctx.finish()
    }

    /// Compile a single expression for evaluation against a frame
    ///
    /// The expression's value becomes the function's return value. Used for
    /// breakpoint conditions.
    pub fn compile_eval_expression(&self, expr: &Expr) -> CompileResult<Function> {
        let mut ctx = FnContext::new("<eval>", ScopeKind::Eval, None);
        ctx.expression(expr)?;
        ctx.chunk().emit(OpCode::Return, expr.line);
        Ok(ctx.function)
    }
}

/// Compiler state for a single function
struct FnContext<'src> {
    /// The function being compiled
    function: Function,

    /// Scope kind for name resolution
    scope: ScopeKind,

    /// Names that are locals of this function (parameters and assignees)
    locals: HashSet<String>,

    /// Names declared `global` in this function
    declared_globals: HashSet<String>,

    /// Source path propagated to nested functions
    source: Option<&'src Path>,
}

impl<'src> FnContext<'src> {
    fn new(name: &str, scope: ScopeKind, source: Option<&'src Path>) -> Self {
        let mut function = Function::new(name);
        function.chunk = match source {
            Some(path) => Chunk::with_source(path),
            None => Chunk::new(),
        };
        Self {
            function,
            scope,
            locals: HashSet::new(),
            declared_globals: HashSet::new(),
            source,
        }
    }

    fn chunk(&mut self) -> &mut Chunk {
        &mut self.function.chunk
    }

    /// Terminate the chunk with an implicit `return null`
    fn finish(mut self) -> CompileResult<Function> {
        let line = self.function.chunk.last_line();
        self.chunk().emit(OpCode::Null, line);
        self.chunk().emit(OpCode::Return, line);
        Ok(self.function)
    }

    // ===== Scope analysis =====

    /// Collect assigned names and `global` declarations from a function body
    ///
    /// Recurses into `if`/`while` blocks but not into nested functions,
    /// which open scopes of their own. An assignment anywhere in the body
    /// makes the name local to the whole function unless it was declared
    /// global first.
    fn scan_scope(
        body: &[Stmt],
        assigned: &mut HashSet<String>,
        globals: &mut HashSet<String>,
    ) -> CompileResult<()> {
        for stmt in body {
            match &stmt.kind {
                StmtKind::Assign { name, .. } => {
                    if !globals.contains(name) {
                        assigned.insert(name.clone());
                    }
                }
                StmtKind::Global { names } => {
                    for name in names {
                        if assigned.contains(name) {
                            return Err(CompileError::new(
                                CompileErrorKind::GlobalAfterAssignment(name.clone()),
                                stmt.line,
                            ));
                        }
                        globals.insert(name.clone());
                    }
                }
                StmtKind::FnDef(def) => {
                    // The function value is bound like an assignment
                    if !globals.contains(&def.name) {
                        assigned.insert(def.name.clone());
                    }
                }
                StmtKind::Import { name } => {
                    let leaf = name.rsplit('.').next().unwrap_or(name);
                    if !globals.contains(leaf) {
                        assigned.insert(leaf.to_string());
                    }
                }
                StmtKind::If {
                    then_body,
                    else_body,
                    ..
                } => {
                    Self::scan_scope(then_body, assigned, globals)?;
                    if let Some(else_body) = else_body {
                        Self::scan_scope(else_body, assigned, globals)?;
                    }
                }
                StmtKind::While { body, .. } => {
                    Self::scan_scope(body, assigned, globals)?;
                }
                StmtKind::Return(_) | StmtKind::Expr(_) => {}
            }
        }
        Ok(())
    }

    // ===== Statements =====

    fn compile_body(&mut self, body: &[Stmt]) -> CompileResult<()> {
        if self.scope == ScopeKind::Function {
            let mut assigned: HashSet<String> = self.locals.clone();
            let mut globals = HashSet::new();
            Self::scan_scope(body, &mut assigned, &mut globals)?;
            self.locals = assigned;
            self.declared_globals = globals;
        }
        for stmt in body {
            self.statement(stmt)?;
        }
        Ok(())
    }

    fn statement(&mut self, stmt: &Stmt) -> CompileResult<()> {
        let line = stmt.line;
        match &stmt.kind {
            StmtKind::Assign { name, value } => {
                self.expression(value)?;
                self.store_name(name, line)?;
            }
            StmtKind::Global { .. } => {
                // Handled during scope analysis; emits no code
            }
            StmtKind::FnDef(def) => {
                let function = self.compile_function(def, line)?;
                let index = self.add_constant(Value::Function(Rc::new(function)), line)?;
                self.chunk().emit_with_index(OpCode::Const, index, line);
                self.store_name(&def.name, line)?;
            }
            StmtKind::Return(value) => {
                match value {
                    Some(expr) => self.expression(expr)?,
                    None => self.chunk().emit(OpCode::Null, line),
                }
                self.chunk().emit(OpCode::Return, line);
            }
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => {
                self.expression(cond)?;
                let to_else = self.chunk().emit_jump(OpCode::JumpIfFalse, line);
                for stmt in then_body {
                    self.statement(stmt)?;
                }
                match else_body {
                    Some(else_body) => {
                        let to_end = self.chunk().emit_jump(OpCode::Jump, line);
                        self.patch_jump(to_else, line)?;
                        for stmt in else_body {
                            self.statement(stmt)?;
                        }
                        self.patch_jump(to_end, line)?;
                    }
                    None => {
                        self.patch_jump(to_else, line)?;
                    }
                }
            }
            StmtKind::While { cond, body } => {
                let loop_start = self.chunk().position();
                self.expression(cond)?;
                let to_exit = self.chunk().emit_jump(OpCode::JumpIfFalse, line);
                for stmt in body {
                    self.statement(stmt)?;
                }
                if !self.chunk().emit_loop(loop_start, line) {
                    return Err(CompileError::new(CompileErrorKind::JumpTooFar, line));
                }
                self.patch_jump(to_exit, line)?;
            }
            StmtKind::Import { name } => {
                let index = self.add_constant(Value::from(name.as_str()), line)?;
                self.chunk().emit_with_index(OpCode::Import, index, line);
                let leaf = name.rsplit('.').next().unwrap_or(name).to_string();
                self.store_name(&leaf, line)?;
            }
            StmtKind::Expr(expr) => {
                self.expression(expr)?;
                self.chunk().emit(OpCode::Pop, line);
            }
        }
        Ok(())
    }

    fn compile_function(&mut self, def: &FnDef, line: u32) -> CompileResult<Function> {
        if def.params.len() > u8::MAX as usize {
            return Err(CompileError::new(CompileErrorKind::TooManyParameters, line));
        }
        let mut seen = HashSet::new();
        for param in &def.params {
            if !seen.insert(param.as_str()) {
                return Err(CompileError::new(
                    CompileErrorKind::DuplicateParameter(param.clone()),
                    line,
                ));
            }
        }

        let mut ctx = FnContext::new(&def.name, ScopeKind::Function, self.source);
        #[allow(clippy::cast_possible_truncation)]
        {
            ctx.function.arity = def.params.len() as u8;
        }
        ctx.function.params = def.params.clone();
        ctx.locals = def.params.iter().cloned().collect();
        ctx.compile_body(&def.body)?;
        ctx.finish()
    }

    // ===== Expressions =====

    fn expression(&mut self, expr: &Expr) -> CompileResult<()> {
        let line = expr.line;
        match &expr.kind {
            ExprKind::Literal(literal) => match literal {
                Literal::Null => self.chunk().emit(OpCode::Null, line),
                Literal::Bool(true) => self.chunk().emit(OpCode::True, line),
                Literal::Bool(false) => self.chunk().emit(OpCode::False, line),
                Literal::Int(n) => {
                    let index = self.add_constant(Value::Int(*n), line)?;
                    self.chunk().emit_with_index(OpCode::Const, index, line);
                }
                Literal::Float(n) => {
                    let index = self.add_constant(Value::Float(*n), line)?;
                    self.chunk().emit_with_index(OpCode::Const, index, line);
                }
                Literal::Str(s) => {
                    let index = self.add_constant(Value::from(s.as_str()), line)?;
                    self.chunk().emit_with_index(OpCode::Const, index, line);
                }
            },
            ExprKind::Name(name) => {
                self.load_name(name, line)?;
            }
            ExprKind::Attr { object, name } => {
                self.expression(object)?;
                let index = self.add_constant(Value::from(name.as_str()), line)?;
                self.chunk().emit_with_index(OpCode::GetAttr, index, line);
            }
            ExprKind::Call { callee, args } => {
                if args.len() > u8::MAX as usize {
                    return Err(CompileError::new(CompileErrorKind::TooManyArguments, line));
                }
                self.expression(callee)?;
                for arg in args {
                    self.expression(arg)?;
                }
                #[allow(clippy::cast_possible_truncation)]
                self.chunk().emit_with_byte(OpCode::Call, args.len() as u8, line);
            }
            ExprKind::Unary { op, operand } => {
                self.expression(operand)?;
                let opcode = match op {
                    UnaryOp::Neg => OpCode::Neg,
                    UnaryOp::Not => OpCode::Not,
                };
                self.chunk().emit(opcode, line);
            }
            ExprKind::Binary { op, left, right } => match op {
                BinOp::And => self.logical(left, right, OpCode::JumpIfFalse, line)?,
                BinOp::Or => self.logical(left, right, OpCode::JumpIfTrue, line)?,
                _ => {
                    self.expression(left)?;
                    self.expression(right)?;
                    let opcode = match op {
                        BinOp::Add => OpCode::Add,
                        BinOp::Sub => OpCode::Sub,
                        BinOp::Mul => OpCode::Mul,
                        BinOp::Div => OpCode::Div,
                        BinOp::Mod => OpCode::Mod,
                        BinOp::Eq => OpCode::Eq,
                        BinOp::Ne => OpCode::Ne,
                        BinOp::Lt => OpCode::Lt,
                        BinOp::Le => OpCode::Le,
                        BinOp::Gt => OpCode::Gt,
                        BinOp::Ge => OpCode::Ge,
                        BinOp::And | BinOp::Or => unreachable!("handled above"),
                    };
                    self.chunk().emit(opcode, line);
                }
            },
        }
        Ok(())
    }

    /// Short-circuit `&&` / `||`, yielding a boolean
    ///
    /// `short_on` is the jump taken when the short-circuit value is decided
    /// early (`JumpIfFalse` for and, `JumpIfTrue` for or).
    fn logical(
        &mut self,
        left: &Expr,
        right: &Expr,
        short_on: OpCode,
        line: u32,
    ) -> CompileResult<()> {
        self.expression(left)?;
        let early = self.chunk().emit_jump(short_on, line);
        self.expression(right)?;
        let late = self.chunk().emit_jump(short_on, line);
        let long_result = short_on != OpCode::JumpIfFalse;
        self.chunk().emit(
            if long_result { OpCode::False } else { OpCode::True },
            line,
        );
        let to_end = self.chunk().emit_jump(OpCode::Jump, line);
        self.patch_jump(early, line)?;
        self.patch_jump(late, line)?;
        self.chunk().emit(
            if long_result { OpCode::True } else { OpCode::False },
            line,
        );
        self.patch_jump(to_end, line)?;
        Ok(())
    }

    // ===== Name resolution =====

    fn load_name(&mut self, name: &str, line: u32) -> CompileResult<()> {
        let op = match self.scope {
            ScopeKind::Eval => OpCode::LoadName,
            ScopeKind::Module => OpCode::LoadGlobal,
            ScopeKind::Function => {
                if self.locals.contains(name) && !self.declared_globals.contains(name) {
                    OpCode::LoadLocal
                } else {
                    OpCode::LoadGlobal
                }
            }
        };
        let index = self.add_constant(Value::from(name), line)?;
        self.chunk().emit_with_index(op, index, line);
        Ok(())
    }

    fn store_name(&mut self, name: &str, line: u32) -> CompileResult<()> {
        let op = match self.scope {
            ScopeKind::Eval => OpCode::StoreName,
            ScopeKind::Module => OpCode::StoreGlobal,
            ScopeKind::Function => {
                if self.declared_globals.contains(name) {
                    OpCode::StoreGlobal
                } else {
                    OpCode::StoreLocal
                }
            }
        };
        let index = self.add_constant(Value::from(name), line)?;
        self.chunk().emit_with_index(op, index, line);
        Ok(())
    }

    // ===== Emission helpers =====

    fn add_constant(&mut self, value: Value, line: u32) -> CompileResult<u16> {
        self.chunk()
            .add_constant(value)
            .map_err(|_| CompileError::new(CompileErrorKind::TooManyConstants, line))
    }

    fn patch_jump(&mut self, patch_offset: usize, line: u32) -> CompileResult<()> {
        if self.chunk().patch_jump(patch_offset) {
            Ok(())
        } else {
            Err(CompileError::new(CompileErrorKind::JumpTooFar, line))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn compile(source: &str) -> Function {
        let module = Parser::parse_module(source).unwrap();
        Compiler::new().compile_module(&module, None).unwrap()
    }

    fn ops(function: &Function) -> Vec<OpCode> {
        let chunk = &function.chunk;
        let mut offset = 0;
        let mut out = Vec::new();
        while offset < chunk.len() {
            let op = OpCode::try_from(chunk.byte_at(offset).unwrap()).unwrap();
            out.push(op);
            offset += op.encoded_len();
        }
        out
    }

    #[test]
    fn test_module_assignment_uses_globals() {
        let function = compile("a = 0");
        assert_eq!(
            ops(&function),
            vec![
                OpCode::Const,
                OpCode::StoreGlobal,
                OpCode::Null,
                OpCode::Return
            ]
        );
    }

    #[test]
    fn test_function_locals_and_declared_globals() {
        let function = compile("fn t(v) { global a; a = v; b = 2 }");
        let Value::Function(inner) = &function.chunk.constants()[0] else {
            panic!("expected nested function constant");
        };
        let body_ops = ops(inner);
        // a = v: LoadLocal v, StoreGlobal a; b = 2: Const, StoreLocal b
        assert_eq!(
            body_ops,
            vec![
                OpCode::LoadLocal,
                OpCode::StoreGlobal,
                OpCode::Const,
                OpCode::StoreLocal,
                OpCode::Null,
                OpCode::Return
            ]
        );
    }

    #[test]
    fn test_nested_function_inherits_source() {
        let module = Parser::parse_module("fn f() { return 1 }").unwrap();
        let function = Compiler::new()
            .compile_module(&module, Some(Path::new("/tmp/m.skn")))
            .unwrap();
        assert!(function.chunk.source().is_some());
        let Value::Function(inner) = &function.chunk.constants()[0] else {
            panic!("expected nested function constant");
        };
        assert!(inner.chunk.source().is_some());
    }

    #[test]
    fn test_eval_fragment_uses_name_ops() {
        let stmts = Parser::parse_fragment("b = 0.02").unwrap();
        let function = Compiler::new().compile_eval_fragment(&stmts).unwrap();
        assert_eq!(
            ops(&function),
            vec![
                OpCode::Const,
                OpCode::StoreName,
                OpCode::Null,
                OpCode::Return
            ]
        );
        assert!(function.chunk.source().is_none());
    }

    #[test]
    fn test_eval_expression_returns_value() {
        let expr = Parser::parse_expression("a == 1").unwrap();
        let function = Compiler::new().compile_eval_expression(&expr).unwrap();
        assert_eq!(
            ops(&function),
            vec![OpCode::LoadName, OpCode::Const, OpCode::Eq, OpCode::Return]
        );
    }

    #[test]
    fn test_global_after_assignment_rejected() {
        let module = Parser::parse_module("fn f() { a = 1; global a }").unwrap();
        let err = Compiler::new().compile_module(&module, None).unwrap_err();
        assert!(matches!(
            err.kind,
            CompileErrorKind::GlobalAfterAssignment(_)
        ));
    }

    #[test]
    fn test_while_emits_backward_loop() {
        let function = compile("n = 2\nwhile n > 0 { n = n - 1 }");
        assert!(ops(&function).contains(&OpCode::Loop));
    }

    #[test]
    fn test_line_info_tracks_statements() {
        let function = compile("a = 0\nb = 1\nc = 2\nd = 3");
        let chunk = &function.chunk;
        // Each assignment is Const (3 bytes) + StoreGlobal (3 bytes)
        assert_eq!(chunk.line_at(0), 1);
        assert_eq!(chunk.line_at(6), 2);
        assert_eq!(chunk.line_at(12), 3);
        assert_eq!(chunk.line_at(18), 4);
    }

    #[test]
    fn test_duplicate_parameter_rejected() {
        let module = Parser::parse_module("fn f(x, x) { return x }").unwrap();
        let err = Compiler::new().compile_module(&module, None).unwrap_err();
        assert!(matches!(err.kind, CompileErrorKind::DuplicateParameter(_)));
    }
}
