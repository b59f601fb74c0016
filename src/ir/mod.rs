pub mod canon;
mod dump;

use strum::{EnumCount, EnumIter};

use crate::common::{Label, Temp};

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Expr {
    Const(i64),
    Name(Label),
    Temp(Temp),
    BinOp(BinOp, Box<Expr>, Box<Expr>),
    Mem(Box<Expr>),
    /// Callee, arguments and the optional static link passed to a nested function.
    Call(Box<Expr>, Vec<Expr>, Option<Box<Expr>>),
    ESeq(Box<Stmt>, Box<Expr>),
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Stmt {
    Move(Box<Expr>, Box<Expr>),
    Expr(Box<Expr>),
    Jump(Box<Expr>, Vec<Label>),
    CJump(RelOp, Box<Expr>, Box<Expr>, Label, Label),
    Seq(Vec<Stmt>),
    Label(Label),
}

impl Expr {
    pub fn binop(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::BinOp(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn mem(addr: Expr) -> Expr {
        Expr::Mem(Box::new(addr))
    }

    pub fn call(callee: Expr, args: Vec<Expr>) -> Expr {
        Expr::Call(Box::new(callee), args, None)
    }

    pub fn call_nested(callee: Expr, args: Vec<Expr>, static_link: Expr) -> Expr {
        Expr::Call(Box::new(callee), args, Some(Box::new(static_link)))
    }

    pub fn eseq(stmt: Stmt, expr: Expr) -> Expr {
        Expr::ESeq(Box::new(stmt), Box::new(expr))
    }

    /// `base + offset`, the shape every frame access uses.
    pub fn offset(base: Expr, offset: i64) -> Expr {
        Expr::binop(BinOp::Plus, base, Expr::Const(offset))
    }
}

impl Stmt {
    pub fn seq(stmts: Vec<Stmt>) -> Stmt {
        match stmts.len() {
            0 => Stmt::nop(),
            1 => stmts.into_iter().next().unwrap_or_else(Stmt::nop),
            _ => Stmt::Seq(stmts),
        }
    }

    pub fn nop() -> Stmt {
        Stmt::Expr(Box::new(Expr::Const(0)))
    }

    pub fn is_nop(&self) -> bool {
        matches!(self, Stmt::Expr(e) if matches!(e.as_ref(), Expr::Const(_) | Expr::Name(_)))
    }

    pub fn mov(dst: Expr, src: Expr) -> Stmt {
        Stmt::Move(Box::new(dst), Box::new(src))
    }

    pub fn expr(expr: Expr) -> Stmt {
        Stmt::Expr(Box::new(expr))
    }

    pub fn jump(label: Label) -> Stmt {
        Stmt::Jump(Box::new(Expr::Name(label.clone())), vec![label])
    }

    pub fn cjump(op: RelOp, lhs: Expr, rhs: Expr, t: Label, f: Label) -> Stmt {
        Stmt::CJump(op, Box::new(lhs), Box::new(rhs), t, f)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, EnumCount, EnumIter)]
pub enum BinOp {
    Plus,
    Minus,
    Mul,
    Div,
    And,
    Or,
    XOr,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, EnumCount, EnumIter)]
pub enum RelOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

impl RelOp {
    pub fn negate(self) -> RelOp {
        match self {
            RelOp::Eq => RelOp::Ne,
            RelOp::Ne => RelOp::Eq,
            RelOp::Lt => RelOp::Ge,
            RelOp::Ge => RelOp::Lt,
            RelOp::Le => RelOp::Gt,
            RelOp::Gt => RelOp::Le,
            RelOp::Ult => RelOp::Uge,
            RelOp::Uge => RelOp::Ult,
            RelOp::Ule => RelOp::Ugt,
            RelOp::Ugt => RelOp::Ule,
        }
    }
}

/// What a function computes: a value left in the result register, or nothing.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Body {
    Expr(Expr),
    Stmt(Stmt),
}

#[derive(Debug)]
pub struct Function<F> {
    pub name: Label,
    pub frame: F,
    pub body: Body,
}

/// Every function of a program plus the program body, which is emitted as `main`.
#[derive(Debug)]
pub struct Program<F> {
    pub functions: Vec<Function<F>>,
    pub main: Function<F>,
}
