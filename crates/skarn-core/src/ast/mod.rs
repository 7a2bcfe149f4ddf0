//! Abstract Syntax Tree - parsed representation of Skarn source code

/// A parsed module: the ordered top-level statements of one source file
#[derive(Debug, Clone, Default)]
pub struct Module {
    /// Top-level statements, including function definitions
    pub body: Vec<Stmt>,
}

/// A statement with its source line
#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: u32,
}

/// The kind of statement
#[derive(Debug, Clone)]
pub enum StmtKind {
    /// `name = value`
    Assign { name: String, value: Expr },

    /// `global a, b` - declares names as globals inside a function body
    Global { names: Vec<String> },

    /// `fn name(params) { body }`
    FnDef(FnDef),

    /// `return` / `return value`
    Return(Option<Expr>),

    /// `if cond { ... } else { ... }`
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Option<Vec<Stmt>>,
    },

    /// `while cond { ... }`
    While { cond: Expr, body: Vec<Stmt> },

    /// `import a.b.c`
    Import { name: String },

    /// A bare expression evaluated for its side effects
    Expr(Expr),
}

/// A function definition
#[derive(Debug, Clone)]
pub struct FnDef {
    /// Function name
    pub name: String,
    /// Parameter names
    pub params: Vec<String>,
    /// Body statements
    pub body: Vec<Stmt>,
}

/// An expression with its source line
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub line: u32,
}

/// The kind of expression
#[derive(Debug, Clone)]
pub enum ExprKind {
    /// A literal value
    Literal(Literal),

    /// A name reference
    Name(String),

    /// Attribute access: `object.name` (module members)
    Attr { object: Box<Expr>, name: String },

    /// A call: `callee(args...)`
    Call { callee: Box<Expr>, args: Vec<Expr> },

    /// A unary operation
    Unary { op: UnaryOp, operand: Box<Expr> },

    /// A binary operation
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

/// A literal value
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Arithmetic negation: `-x`
    Neg,
    /// Logical negation: `!x`
    Not,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Short-circuit logical and, yielding a boolean
    And,
    /// Short-circuit logical or, yielding a boolean
    Or,
}
