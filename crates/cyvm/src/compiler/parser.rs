use crate::compiler::ast::{BinaryOp, Expr, ExprKind, FuncDecl, Stmt, UnaryOp};
use crate::compiler::token::{Pos, Token, TokenKind};
use crate::compiler::{Stage, SyntaxError};
use smol_str::SmolStr;

type ParseResult<T> = Result<T, SyntaxError>;

/// Maximum nesting of parenthesized expressions, unary operators and blocks.
pub const MAX_NESTING: u32 = 100;
/// Maximum depth of an expression tree, including left-associative chains
/// such as `a + b + c`.
pub const MAX_EXPR_DEPTH: u32 = 400;

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    /// Parser recursion levels currently entered.
    levels: u32,
    /// Depth of the tree being built at the cursor.
    depth: u32,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens,
            current: 0,
            levels: 0,
            depth: 0,
        }
    }

    pub fn parse_program(mut self) -> ParseResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        while !self.check(TokenKind::Eof) {
            if self.eat(TokenKind::Newline) {
                continue;
            }
            stmts.push(self.parse_statement()?);
        }
        Ok(stmts)
    }

    // ============ Token cursor ============

    #[inline]
    fn peek(&self) -> &Token {
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    #[inline]
    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.current < self.tokens.len() - 1 {
            self.current += 1;
        }
        token
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, context: &str) -> ParseResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            let found = self.peek();
            Err(self.error_at(
                format!(
                    "Expected {} {}, found {}.",
                    kind.describe(),
                    context,
                    found.kind.describe()
                ),
                found.pos,
            ))
        }
    }

    fn expect_name(&mut self, context: &str) -> ParseResult<(SmolStr, Pos)> {
        let token = self.expect(TokenKind::Name, context)?;
        Ok((token.text, token.pos))
    }

    fn error_at(&self, message: impl Into<String>, pos: Pos) -> SyntaxError {
        SyntaxError::new(Stage::Parse, message, pos)
    }

    // ============ Nesting limits ============
    // The parser, codegen and AST drop all recurse per level, so deep input
    // is rejected here before it can exhaust the native stack.

    fn enter_level(&mut self) -> ParseResult<()> {
        self.levels += 1;
        self.depth += 1;
        if self.levels > MAX_NESTING {
            return Err(self.error_at("Too many nested levels.", self.peek().pos));
        }
        self.check_depth()
    }

    fn leave_level(&mut self) {
        self.levels -= 1;
        self.depth -= 1;
    }

    /// One more node on the left spine of a chain.
    fn grow(&mut self) -> ParseResult<()> {
        self.depth += 1;
        self.check_depth()
    }

    fn check_depth(&self) -> ParseResult<()> {
        if self.depth > MAX_EXPR_DEPTH {
            return Err(self.error_at("Too many nested levels.", self.peek().pos));
        }
        Ok(())
    }

    /// A simple statement ends at a newline, before a dedent, or at end of input.
    fn end_statement(&mut self) -> ParseResult<()> {
        match self.peek().kind {
            TokenKind::Newline => {
                self.advance();
                Ok(())
            }
            TokenKind::Dedent | TokenKind::Eof => Ok(()),
            other => Err(self.error_at(
                format!("Expected end of statement, found {}.", other.describe()),
                self.peek().pos,
            )),
        }
    }

    // ============ Statements ============

    fn parse_statement(&mut self) -> ParseResult<Stmt> {
        match self.peek().kind {
            TokenKind::Func => self.parse_func(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::Indent => Err(self.error_at("Unexpected indentation.", self.peek().pos)),
            _ => {
                let stmt = self.parse_simple_statement()?;
                self.end_statement()?;
                Ok(stmt)
            }
        }
    }

    fn parse_simple_statement(&mut self) -> ParseResult<Stmt> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Import => {
                self.advance();
                let (name, _) = self.expect_name("after `import`")?;
                Ok(Stmt::Import {
                    name,
                    pos: token.pos,
                })
            }
            TokenKind::Var => {
                self.advance();
                let (name, _) = self.expect_name("after `var`")?;
                self.expect(TokenKind::Assign, "in variable declaration")?;
                let value = self.parse_expr()?;
                Ok(Stmt::Assign {
                    name,
                    value,
                    declare: true,
                    pos: token.pos,
                })
            }
            TokenKind::Return => {
                self.advance();
                let value = if matches!(
                    self.peek().kind,
                    TokenKind::Newline | TokenKind::Dedent | TokenKind::Eof
                ) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                Ok(Stmt::Return {
                    value,
                    pos: token.pos,
                })
            }
            TokenKind::Break => {
                self.advance();
                Ok(Stmt::Break(token.pos))
            }
            TokenKind::Pass => {
                self.advance();
                Ok(Stmt::Pass)
            }
            TokenKind::Func | TokenKind::If | TokenKind::While => Err(self.error_at(
                format!("{} is not allowed in a single-line block.", token.kind.describe()),
                token.pos,
            )),
            _ => self.parse_expr_statement(),
        }
    }

    fn parse_expr_statement(&mut self) -> ParseResult<Stmt> {
        let expr = self.parse_expr()?;
        if !self.check(TokenKind::Assign) {
            return Ok(Stmt::Expr(expr));
        }

        let assign_pos = self.advance().pos;
        let value = self.parse_expr()?;
        match expr.kind {
            ExprKind::Name(name) => Ok(Stmt::Assign {
                name,
                value,
                declare: false,
                pos: expr.pos,
            }),
            ExprKind::Index { object, index } => Ok(Stmt::SetIndex {
                object: *object,
                index: *index,
                value,
                pos: assign_pos,
            }),
            _ => Err(self.error_at("Invalid assignment target.", expr.pos)),
        }
    }

    /// `:` followed by either an indented block or a single simple statement.
    fn parse_block(&mut self, context: &str) -> ParseResult<Vec<Stmt>> {
        self.enter_level()?;
        let body = self.parse_block_body(context)?;
        self.leave_level();
        Ok(body)
    }

    fn parse_block_body(&mut self, context: &str) -> ParseResult<Vec<Stmt>> {
        self.expect(TokenKind::Colon, context)?;

        if !self.eat(TokenKind::Newline) {
            let stmt = self.parse_simple_statement()?;
            self.end_statement()?;
            return Ok(vec![stmt]);
        }

        let indent = self.peek().clone();
        if indent.kind != TokenKind::Indent {
            return Err(self.error_at("Expected an indented block.", indent.pos));
        }
        self.advance();

        let mut body = Vec::new();
        while !self.check(TokenKind::Dedent) && !self.check(TokenKind::Eof) {
            if self.eat(TokenKind::Newline) {
                continue;
            }
            body.push(self.parse_statement()?);
        }
        self.eat(TokenKind::Dedent);
        Ok(body)
    }

    fn parse_func(&mut self) -> ParseResult<Stmt> {
        let pos = self.advance().pos;
        let (name, _) = self.expect_name("after `func`")?;
        self.expect(TokenKind::LeftParen, "after function name")?;

        let mut params = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                params.push(self.expect_name("in parameter list")?);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RightParen, "to close parameter list")?;

        let body = self.parse_block("after function signature")?;
        Ok(Stmt::Func(FuncDecl {
            name,
            params,
            body,
            pos,
        }))
    }

    fn parse_if(&mut self) -> ParseResult<Stmt> {
        self.advance();
        let cond = self.parse_expr()?;
        let body = self.parse_block("after `if` condition")?;
        let mut branches = vec![(cond, body)];
        let mut else_body = None;

        while self.check(TokenKind::Else) {
            self.advance();
            if self.eat(TokenKind::If) {
                let cond = self.parse_expr()?;
                let body = self.parse_block("after `else if` condition")?;
                branches.push((cond, body));
            } else {
                else_body = Some(self.parse_block("after `else`")?);
                break;
            }
        }

        Ok(Stmt::If {
            branches,
            else_body,
        })
    }

    fn parse_while(&mut self) -> ParseResult<Stmt> {
        self.advance();
        let cond = self.parse_expr()?;
        let body = self.parse_block("after `while` condition")?;
        Ok(Stmt::While { cond, body })
    }

    // ============ Expressions ============

    pub fn parse_expr(&mut self) -> ParseResult<Expr> {
        self.enter_level()?;
        let expr = self.parse_or()?;
        self.leave_level();
        Ok(expr)
    }

    fn parse_or(&mut self) -> ParseResult<Expr> {
        let start = self.depth;
        let mut lhs = self.parse_and()?;
        while self.check(TokenKind::Or) {
            let pos = self.advance().pos;
            self.grow()?;
            let rhs = self.parse_and()?;
            lhs = Expr {
                kind: ExprKind::Or(Box::new(lhs), Box::new(rhs)),
                pos,
            };
        }
        self.depth = start;
        Ok(lhs)
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let start = self.depth;
        let mut lhs = self.parse_not()?;
        while self.check(TokenKind::And) {
            let pos = self.advance().pos;
            self.grow()?;
            let rhs = self.parse_not()?;
            lhs = Expr {
                kind: ExprKind::And(Box::new(lhs), Box::new(rhs)),
                pos,
            };
        }
        self.depth = start;
        Ok(lhs)
    }

    fn parse_not(&mut self) -> ParseResult<Expr> {
        if self.check(TokenKind::Not) {
            let pos = self.advance().pos;
            self.enter_level()?;
            let operand = self.parse_not()?;
            self.leave_level();
            return Ok(Expr {
                kind: ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                pos,
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> ParseResult<Expr> {
        let start = self.depth;
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::NotEq => BinaryOp::Ne,
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Le => BinaryOp::Le,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::Ge => BinaryOp::Ge,
                _ => {
                    self.depth = start;
                    return Ok(lhs);
                }
            };
            let pos = self.advance().pos;
            self.grow()?;
            let rhs = self.parse_additive()?;
            lhs = binary(op, lhs, rhs, pos);
        }
    }

    fn parse_additive(&mut self) -> ParseResult<Expr> {
        let start = self.depth;
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => {
                    self.depth = start;
                    return Ok(lhs);
                }
            };
            let pos = self.advance().pos;
            self.grow()?;
            let rhs = self.parse_multiplicative()?;
            lhs = binary(op, lhs, rhs, pos);
        }
    }

    fn parse_multiplicative(&mut self) -> ParseResult<Expr> {
        let start = self.depth;
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => {
                    self.depth = start;
                    return Ok(lhs);
                }
            };
            let pos = self.advance().pos;
            self.grow()?;
            let rhs = self.parse_unary()?;
            lhs = binary(op, lhs, rhs, pos);
        }
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        if self.check(TokenKind::Minus) {
            let pos = self.advance().pos;
            self.enter_level()?;
            let operand = self.parse_unary()?;
            self.leave_level();
            return Ok(Expr {
                kind: ExprKind::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                },
                pos,
            });
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> ParseResult<Expr> {
        let base = self.parse_postfix()?;
        if self.check(TokenKind::Caret) {
            let pos = self.advance().pos;
            // right associative, binds tighter than unary minus on the left
            self.enter_level()?;
            let exponent = self.parse_unary()?;
            self.leave_level();
            return Ok(binary(BinaryOp::Pow, base, exponent, pos));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> ParseResult<Expr> {
        let start = self.depth;
        let mut expr = self.parse_primary()?;
        loop {
            if matches!(
                self.peek().kind,
                TokenKind::LeftParen | TokenKind::LeftBracket | TokenKind::Dot
            ) {
                self.grow()?;
            }
            match self.peek().kind {
                TokenKind::LeftParen => {
                    let pos = self.advance().pos;
                    let args = self.parse_list_items(TokenKind::RightParen, "to close call")?;
                    expr = Expr {
                        kind: ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        pos,
                    };
                }
                TokenKind::LeftBracket => {
                    let pos = self.advance().pos;
                    let index = self.parse_expr()?;
                    self.expect(TokenKind::RightBracket, "to close index")?;
                    expr = Expr {
                        kind: ExprKind::Index {
                            object: Box::new(expr),
                            index: Box::new(index),
                        },
                        pos,
                    };
                }
                TokenKind::Dot => {
                    let pos = self.advance().pos;
                    let (name, _) = self.expect_name("after `.`")?;
                    expr = Expr {
                        kind: ExprKind::Member {
                            object: Box::new(expr),
                            name,
                        },
                        pos,
                    };
                }
                _ => {
                    self.depth = start;
                    return Ok(expr);
                }
            }
        }
    }

    fn parse_list_items(&mut self, close: TokenKind, context: &str) -> ParseResult<Vec<Expr>> {
        let mut items = Vec::new();
        if !self.check(close) {
            loop {
                items.push(self.parse_expr()?);
                if !self.eat(TokenKind::Comma) || self.check(close) {
                    break;
                }
            }
        }
        self.expect(close, context)?;
        Ok(items)
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let token = self.peek().clone();
        let kind = match token.kind {
            TokenKind::Number => {
                self.advance();
                ExprKind::Number(parse_number(&token.text).ok_or_else(|| {
                    SyntaxError::new(Stage::Token, "Malformed number literal.", token.pos)
                })?)
            }
            TokenKind::String => {
                self.advance();
                ExprKind::Str(token.text)
            }
            TokenKind::True => {
                self.advance();
                ExprKind::True
            }
            TokenKind::False => {
                self.advance();
                ExprKind::False
            }
            TokenKind::None => {
                self.advance();
                ExprKind::None
            }
            TokenKind::Name => {
                self.advance();
                ExprKind::Name(token.text)
            }
            TokenKind::LeftParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RightParen, "to close parenthesized expression")?;
                return Ok(inner);
            }
            TokenKind::LeftBracket => {
                self.advance();
                ExprKind::List(self.parse_list_items(TokenKind::RightBracket, "to close list")?)
            }
            other => {
                return Err(self.error_at(
                    format!("Expected expression, found {}.", other.describe()),
                    token.pos,
                ));
            }
        };
        Ok(Expr {
            kind,
            pos: token.pos,
        })
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr, pos: Pos) -> Expr {
    Expr {
        kind: ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        pos,
    }
}

fn parse_number(text: &str) -> Option<f64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        // accumulate in f64 so long literals round instead of overflowing
        return hex
            .chars()
            .try_fold(0.0f64, |acc, ch| ch.to_digit(16).map(|d| acc * 16.0 + d as f64));
    }
    text.parse::<f64>().ok()
}

pub fn parse(tokens: Vec<Token>) -> Result<Vec<Stmt>, SyntaxError> {
    Parser::new(tokens).parse_program()
}
