//! Parser for the Skarn programming language
//!
//! A recursive-descent parser with precedence climbing for expressions.
//! Statements are self-delimiting; `;` is accepted as an optional separator.
//!
//! # Example
//!
//! ```
//! use skarn_core::parser::Parser;
//!
//! let module = Parser::parse_module("fn add(a, b) { return a + b }\nx = add(1, 2)\n");
//! assert!(module.is_ok());
//!
//! let expr = Parser::parse_expression("a == 1");
//! assert!(expr.is_ok());
//! ```

mod error;

pub use error::{ParseError, ParseErrorKind, ParseResult};

use crate::ast::{BinOp, Expr, ExprKind, FnDef, Literal, Module, Stmt, StmtKind, UnaryOp};
use crate::lexer::{unescape_string, Lexer, Token, TokenKind};

/// The Skarn parser
pub struct Parser {
    /// All tokens from the source, ending with `Eof`
    tokens: Vec<Token>,
    /// Current position in the token stream
    position: usize,
}

impl Parser {
    fn new(source: &str) -> ParseResult<Self> {
        let (tokens, lex_errors) = Lexer::tokenize(source);
        if let Some(first) = lex_errors.into_iter().next() {
            return Err(ParseError::new(
                ParseErrorKind::Lex(first.error),
                first.line,
            ));
        }
        Ok(Self {
            tokens,
            position: 0,
        })
    }

    /// Parse a complete module
    pub fn parse_module(source: &str) -> ParseResult<Module> {
        let mut parser = Self::new(source)?;
        let body = parser.statements_until(TokenKind::Eof)?;
        Ok(Module { body })
    }

    /// Parse a single expression (the whole input must be one expression)
    ///
    /// Used for breakpoint conditions.
    pub fn parse_expression(source: &str) -> ParseResult<Expr> {
        let mut parser = Self::new(source)?;
        let expr = parser.expression()?;
        parser.expect(TokenKind::Eof, "end of expression")?;
        Ok(expr)
    }

    /// Parse a statement fragment (zero or more statements)
    ///
    /// Used for code evaluated against a stopped frame.
    pub fn parse_fragment(source: &str) -> ParseResult<Vec<Stmt>> {
        let mut parser = Self::new(source)?;
        parser.statements_until(TokenKind::Eof)
    }

    // ===== Statements =====

    fn statements_until(&mut self, end: TokenKind) -> ParseResult<Vec<Stmt>> {
        let mut body = Vec::new();
        while self.peek_kind() != end {
            body.push(self.statement()?);
            // Optional separator between statements
            self.matches(TokenKind::Semicolon);
        }
        Ok(body)
    }

    fn statement(&mut self) -> ParseResult<Stmt> {
        let line = self.peek().line;
        let kind = match self.peek_kind() {
            TokenKind::Fn => self.fn_def()?,
            TokenKind::Return => self.return_stmt()?,
            TokenKind::If => self.if_stmt()?,
            TokenKind::While => self.while_stmt()?,
            TokenKind::Global => self.global_stmt()?,
            TokenKind::Import => self.import_stmt()?,
            TokenKind::Ident if self.peek_ahead_kind(1) == TokenKind::Assign => {
                let name = self.expect_ident()?;
                self.advance(); // '='
                let value = self.expression()?;
                StmtKind::Assign { name, value }
            }
            _ => StmtKind::Expr(self.expression()?),
        };
        Ok(Stmt { kind, line })
    }

    fn fn_def(&mut self) -> ParseResult<StmtKind> {
        self.advance(); // 'fn'
        let name = self.expect_ident()?;
        self.expect(TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        if self.peek_kind() != TokenKind::RParen {
            loop {
                params.push(self.expect_ident()?);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        let body = self.block()?;
        Ok(StmtKind::FnDef(FnDef { name, params, body }))
    }

    fn return_stmt(&mut self) -> ParseResult<StmtKind> {
        self.advance(); // 'return'
        let value = if self.starts_expression() {
            Some(self.expression()?)
        } else {
            None
        };
        Ok(StmtKind::Return(value))
    }

    fn if_stmt(&mut self) -> ParseResult<StmtKind> {
        self.advance(); // 'if'
        let cond = self.expression()?;
        let then_body = self.block()?;
        let else_body = if self.matches(TokenKind::Else) {
            if self.peek_kind() == TokenKind::If {
                // `else if` chains nest as a single-statement else body
                let line = self.peek().line;
                let kind = self.if_stmt()?;
                Some(vec![Stmt { kind, line }])
            } else {
                Some(self.block()?)
            }
        } else {
            None
        };
        Ok(StmtKind::If {
            cond,
            then_body,
            else_body,
        })
    }

    fn while_stmt(&mut self) -> ParseResult<StmtKind> {
        self.advance(); // 'while'
        let cond = self.expression()?;
        let body = self.block()?;
        Ok(StmtKind::While { cond, body })
    }

    fn global_stmt(&mut self) -> ParseResult<StmtKind> {
        self.advance(); // 'global'
        let mut names = vec![self.expect_ident()?];
        while self.matches(TokenKind::Comma) {
            names.push(self.expect_ident()?);
        }
        Ok(StmtKind::Global { names })
    }

    fn import_stmt(&mut self) -> ParseResult<StmtKind> {
        self.advance(); // 'import'
        let mut name = self.expect_ident()?;
        while self.matches(TokenKind::Dot) {
            name.push('.');
            name.push_str(&self.expect_ident()?);
        }
        Ok(StmtKind::Import { name })
    }

    fn block(&mut self) -> ParseResult<Vec<Stmt>> {
        self.expect(TokenKind::LBrace, "'{'")?;
        let body = self.statements_until(TokenKind::RBrace)?;
        self.expect(TokenKind::RBrace, "'}'")?;
        Ok(body)
    }

    // ===== Expressions (precedence climbing) =====

    fn expression(&mut self) -> ParseResult<Expr> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> ParseResult<Expr> {
        let mut left = self.and_expr()?;
        while self.peek_kind() == TokenKind::OrOr {
            let line = self.advance().line;
            let right = self.and_expr()?;
            left = binary(BinOp::Or, left, right, line);
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> ParseResult<Expr> {
        let mut left = self.equality()?;
        while self.peek_kind() == TokenKind::AndAnd {
            let line = self.advance().line;
            let right = self.equality()?;
            left = binary(BinOp::And, left, right, line);
        }
        Ok(left)
    }

    fn equality(&mut self) -> ParseResult<Expr> {
        let mut left = self.comparison()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::EqEq => BinOp::Eq,
                TokenKind::NotEq => BinOp::Ne,
                _ => break,
            };
            let line = self.advance().line;
            let right = self.comparison()?;
            left = binary(op, left, right, line);
        }
        Ok(left)
    }

    fn comparison(&mut self) -> ParseResult<Expr> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Lt => BinOp::Lt,
                TokenKind::LtEq => BinOp::Le,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::GtEq => BinOp::Ge,
                _ => break,
            };
            let line = self.advance().line;
            let right = self.term()?;
            left = binary(op, left, right, line);
        }
        Ok(left)
    }

    fn term(&mut self) -> ParseResult<Expr> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            let line = self.advance().line;
            let right = self.factor()?;
            left = binary(op, left, right, line);
        }
        Ok(left)
    }

    fn factor(&mut self) -> ParseResult<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Percent => BinOp::Mod,
                _ => break,
            };
            let line = self.advance().line;
            let right = self.unary()?;
            left = binary(op, left, right, line);
        }
        Ok(left)
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        let op = match self.peek_kind() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Bang => UnaryOp::Not,
            _ => return self.postfix(),
        };
        let line = self.advance().line;
        let operand = self.unary()?;
        Ok(Expr {
            kind: ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            line,
        })
    }

    fn postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            match self.peek_kind() {
                TokenKind::LParen => {
                    let line = self.advance().line;
                    let mut args = Vec::new();
                    if self.peek_kind() != TokenKind::RParen {
                        loop {
                            args.push(self.expression()?);
                            if !self.matches(TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(TokenKind::RParen, "')'")?;
                    expr = Expr {
                        kind: ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        line,
                    };
                }
                TokenKind::Dot => {
                    let line = self.advance().line;
                    let name = self.expect_ident()?;
                    expr = Expr {
                        kind: ExprKind::Attr {
                            object: Box::new(expr),
                            name,
                        },
                        line,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let token = self.peek().clone();
        let kind = match token.kind {
            TokenKind::Null => {
                self.advance();
                ExprKind::Literal(Literal::Null)
            }
            TokenKind::True => {
                self.advance();
                ExprKind::Literal(Literal::Bool(true))
            }
            TokenKind::False => {
                self.advance();
                ExprKind::Literal(Literal::Bool(false))
            }
            TokenKind::Int => {
                self.advance();
                let value = token.lexeme.parse::<i64>().map_err(|_| {
                    ParseError::new(
                        ParseErrorKind::InvalidNumber(token.lexeme.clone()),
                        token.line,
                    )
                })?;
                ExprKind::Literal(Literal::Int(value))
            }
            TokenKind::Float => {
                self.advance();
                let value = token.lexeme.parse::<f64>().map_err(|_| {
                    ParseError::new(
                        ParseErrorKind::InvalidNumber(token.lexeme.clone()),
                        token.line,
                    )
                })?;
                ExprKind::Literal(Literal::Float(value))
            }
            TokenKind::Str => {
                self.advance();
                let value = unescape_string(&token.lexeme)
                    .map_err(|e| ParseError::new(ParseErrorKind::Lex(e), token.line))?;
                ExprKind::Literal(Literal::Str(value))
            }
            TokenKind::Ident => {
                self.advance();
                ExprKind::Name(token.lexeme.clone())
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect(TokenKind::RParen, "')'")?;
                return Ok(inner);
            }
            TokenKind::Eof => {
                return Err(ParseError::new(ParseErrorKind::UnexpectedEof, token.line));
            }
            found => {
                return Err(ParseError::new(
                    ParseErrorKind::UnexpectedToken {
                        found,
                        expected: "expression",
                    },
                    token.line,
                ));
            }
        };
        Ok(Expr {
            kind,
            line: token.line,
        })
    }

    // ===== Token stream helpers =====

    fn peek(&self) -> &Token {
        // The stream always ends with Eof, so position stays in range
        &self.tokens[self.position.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn peek_ahead_kind(&self, n: usize) -> TokenKind {
        self.tokens
            .get(self.position + n)
            .map_or(TokenKind::Eof, |t| t.kind)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.position < self.tokens.len() - 1 {
            self.position += 1;
        }
        token
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.peek_kind() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, expected: &'static str) -> ParseResult<Token> {
        if self.peek_kind() == kind {
            Ok(self.advance())
        } else {
            let token = self.peek();
            Err(ParseError::new(
                ParseErrorKind::UnexpectedToken {
                    found: token.kind,
                    expected,
                },
                token.line,
            ))
        }
    }

    fn expect_ident(&mut self) -> ParseResult<String> {
        let token = self.expect(TokenKind::Ident, "identifier")?;
        Ok(token.lexeme)
    }

    fn starts_expression(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Ident
                | TokenKind::Int
                | TokenKind::Float
                | TokenKind::Str
                | TokenKind::True
                | TokenKind::False
                | TokenKind::Null
                | TokenKind::LParen
                | TokenKind::Minus
                | TokenKind::Bang
        )
    }
}

fn binary(op: BinOp, left: Expr, right: Expr, line: u32) -> Expr {
    Expr {
        kind: ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assignments() {
        let module = Parser::parse_module("a = 0\nb = 1\n").unwrap();
        assert_eq!(module.body.len(), 2);
        assert!(matches!(&module.body[0].kind, StmtKind::Assign { name, .. } if name == "a"));
        assert_eq!(module.body[1].line, 2);
    }

    #[test]
    fn test_parse_function_definition() {
        let module = Parser::parse_module("fn t(v) { global a; a = v }").unwrap();
        assert_eq!(module.body.len(), 1);
        let StmtKind::FnDef(def) = &module.body[0].kind else {
            panic!("expected fn def");
        };
        assert_eq!(def.name, "t");
        assert_eq!(def.params, vec!["v"]);
        assert_eq!(def.body.len(), 2);
        assert!(matches!(&def.body[0].kind, StmtKind::Global { names } if names == &["a"]));
    }

    #[test]
    fn test_parse_precedence() {
        let expr = Parser::parse_expression("1 + 2 * 3 == 7").unwrap();
        let ExprKind::Binary { op: BinOp::Eq, .. } = expr.kind else {
            panic!("expected == at the top");
        };
    }

    #[test]
    fn test_parse_call_and_attr() {
        let expr = Parser::parse_expression("m.helper(1, 2)").unwrap();
        let ExprKind::Call { callee, args } = expr.kind else {
            panic!("expected call");
        };
        assert_eq!(args.len(), 2);
        assert!(matches!(callee.kind, ExprKind::Attr { .. }));
    }

    #[test]
    fn test_parse_if_else_chain() {
        let module =
            Parser::parse_module("if a < 1 { b = 1 } else if a < 2 { b = 2 } else { b = 3 }")
                .unwrap();
        let StmtKind::If { else_body, .. } = &module.body[0].kind else {
            panic!("expected if");
        };
        let nested = else_body.as_ref().unwrap();
        assert!(matches!(&nested[0].kind, StmtKind::If { .. }));
    }

    #[test]
    fn test_parse_import_dotted() {
        let module = Parser::parse_module("import pkg.helpers").unwrap();
        assert!(
            matches!(&module.body[0].kind, StmtKind::Import { name } if name == "pkg.helpers")
        );
    }

    #[test]
    fn test_parse_fragment_statements() {
        let stmts = Parser::parse_fragment("b = 0.02").unwrap();
        assert_eq!(stmts.len(), 1);
        let stmts = Parser::parse_fragment("t(5)").unwrap();
        assert!(matches!(&stmts[0].kind, StmtKind::Expr(_)));
    }

    #[test]
    fn test_parse_error_reports_line() {
        let err = Parser::parse_module("a = 1\nb = =\n").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_expression_rejects_trailing_tokens() {
        assert!(Parser::parse_expression("a == 1 b").is_err());
    }
}
