use crate::compiler::token::Pos;
use smol_str::SmolStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Number(f64),
    Str(SmolStr),
    True,
    False,
    None,
    List(Vec<Expr>),
    Name(SmolStr),
    Member {
        object: Box<Expr>,
        name: SmolStr,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncDecl {
    pub name: SmolStr,
    pub params: Vec<(SmolStr, Pos)>,
    pub body: Vec<Stmt>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    /// `name = value`, or `var name = value` when `declare` is set.
    Assign {
        name: SmolStr,
        value: Expr,
        declare: bool,
        pos: Pos,
    },
    SetIndex {
        object: Expr,
        index: Expr,
        value: Expr,
        pos: Pos,
    },
    Import {
        name: SmolStr,
        pos: Pos,
    },
    Func(FuncDecl),
    Return {
        value: Option<Expr>,
        pos: Pos,
    },
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        else_body: Option<Vec<Stmt>>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    Break(Pos),
    Pass,
}
