use strum::EnumCount;

use crate::{
    common::{Context, Temp},
    ir::{BinOp, Expr, RelOp, Stmt},
};

/// An IR fragment with wildcard leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprPattern {
    /// `Int(0)` matches any constant, anything else only that value.
    Int(i64),
    /// A constant small enough to be an address displacement with either sign.
    Disp,
    Label,
    /// Matches a register, or any other expression computed into a fresh one first.
    Reg,
    BinOp(BinOp, Box<ExprPattern>, Box<ExprPattern>),
    Mem(Box<ExprPattern>),
    /// Arguments always travel in registers, only the callee is matched.
    Call(Box<ExprPattern>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StmtPattern {
    Move(ExprPattern, ExprPattern),
    Jump(ExprPattern),
    CJump(RelOp, ExprPattern, ExprPattern),
}

/// Subtrees that a match could not absorb, each paired with the register its
/// value has to be computed into before the matched instruction runs.
pub type Glued = Vec<(Temp, Expr)>;

impl ExprPattern {
    pub fn binop(op: BinOp, lhs: ExprPattern, rhs: ExprPattern) -> Self {
        ExprPattern::BinOp(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn mem(addr: ExprPattern) -> Self {
        ExprPattern::Mem(Box::new(addr))
    }

    pub fn call(callee: ExprPattern) -> Self {
        ExprPattern::Call(Box::new(callee))
    }

    /// Number of IR nodes the pattern covers, `None` when it does not match.
    /// Glued subtrees count for nothing.
    pub fn score(&self, expr: &Expr) -> Option<usize> {
        match (self, expr) {
            (ExprPattern::Reg, Expr::Temp(_)) => Some(1),
            (ExprPattern::Reg, _) => Some(0),
            (ExprPattern::Int(v), Expr::Const(c)) if *v == 0 || v == c => Some(1),
            (ExprPattern::Disp, Expr::Const(c)) if is_displacement(*c) => Some(1),
            (ExprPattern::Label, Expr::Name(_)) => Some(1),
            (ExprPattern::BinOp(op, lhs, rhs), Expr::BinOp(eop, elhs, erhs)) if op == eop => {
                Some(1 + lhs.score(elhs)? + rhs.score(erhs)?)
            }
            (ExprPattern::Mem(addr), Expr::Mem(eaddr)) => Some(1 + addr.score(eaddr)?),
            (ExprPattern::Call(callee), Expr::Call(ecallee, _, _)) => {
                Some(1 + callee.score(ecallee)?)
            }
            _ => None,
        }
    }

    /// Copies `expr` along the pattern, replacing glued subtrees by fresh
    /// registers. `expr` must be matched by the pattern.
    pub fn instantiate(&self, expr: Expr, ctx: &mut Context, glued: &mut Glued) -> Expr {
        match (self, expr) {
            (ExprPattern::Reg, e @ Expr::Temp(_)) => e,
            (ExprPattern::Reg, e) => glue(e, ctx, glued),
            (ExprPattern::BinOp(_, lhs, rhs), Expr::BinOp(op, elhs, erhs)) => {
                let lhs = lhs.instantiate(*elhs, ctx, glued);
                let rhs = rhs.instantiate(*erhs, ctx, glued);
                Expr::binop(op, lhs, rhs)
            }
            (ExprPattern::Mem(addr), Expr::Mem(eaddr)) => {
                Expr::mem(addr.instantiate(*eaddr, ctx, glued))
            }
            (ExprPattern::Call(callee), Expr::Call(ecallee, args, static_link)) => {
                let callee = callee.instantiate(*ecallee, ctx, glued);
                let args = args
                    .into_iter()
                    .map(|arg| match arg {
                        arg @ Expr::Temp(_) => arg,
                        arg => glue(arg, ctx, glued),
                    })
                    .collect();
                Expr::Call(Box::new(callee), args, static_link)
            }
            (_, e) => e,
        }
    }
}

/// Both `c` and `-c` fit a signed 32-bit field.
pub fn is_displacement(c: i64) -> bool {
    c.unsigned_abs() <= i32::MAX as u64
}

fn glue(expr: Expr, ctx: &mut Context, glued: &mut Glued) -> Expr {
    let t = ctx.new_temp();
    glued.push((t, expr));
    Expr::Temp(t)
}

impl StmtPattern {
    pub fn score(&self, stmt: &Stmt) -> Option<usize> {
        match (self, stmt) {
            (StmtPattern::Move(dst, src), Stmt::Move(edst, esrc)) => {
                let dst = match (dst, edst.as_ref()) {
                    (ExprPattern::Reg, Expr::Temp(_)) => 1,
                    // a destination cannot be computed into a register first.
                    (ExprPattern::Reg, _) => return None,
                    (dst, edst) => dst.score(edst)?,
                };
                Some(1 + dst + src.score(esrc)?)
            }
            (StmtPattern::Jump(dst), Stmt::Jump(edst, _)) => Some(1 + dst.score(edst)?),
            (StmtPattern::CJump(op, lhs, rhs), Stmt::CJump(eop, elhs, erhs, _, _))
                if op == eop =>
            {
                Some(1 + lhs.score(elhs)? + rhs.score(erhs)?)
            }
            _ => None,
        }
    }

    pub fn instantiate(&self, stmt: Stmt, ctx: &mut Context, glued: &mut Glued) -> Stmt {
        match (self, stmt) {
            (StmtPattern::Move(dst, src), Stmt::Move(edst, esrc)) => {
                let dst = dst.instantiate(*edst, ctx, glued);
                let src = src.instantiate(*esrc, ctx, glued);
                Stmt::mov(dst, src)
            }
            (StmtPattern::Jump(dst), Stmt::Jump(edst, labels)) => {
                Stmt::Jump(Box::new(dst.instantiate(*edst, ctx, glued)), labels)
            }
            (StmtPattern::CJump(_, lhs, rhs), Stmt::CJump(op, elhs, erhs, t, f)) => {
                let lhs = lhs.instantiate(*elhs, ctx, glued);
                let rhs = rhs.instantiate(*erhs, ctx, glued);
                Stmt::cjump(op, lhs, rhs, t, f)
            }
            (_, s) => s,
        }
    }
}

/// Every instruction pattern of a target, partitioned by the kind of the
/// root node and, for operators, by operator.
#[derive(Debug)]
pub struct TemplateLibrary {
    consts: Vec<ExprPattern>,
    labels: Vec<ExprPattern>,
    regs: Vec<ExprPattern>,
    mems: Vec<ExprPattern>,
    calls: Vec<ExprPattern>,
    binops: Vec<Vec<ExprPattern>>,
    moves: Vec<StmtPattern>,
    jumps: Vec<StmtPattern>,
    cjumps: Vec<Vec<StmtPattern>>,
}

impl Default for TemplateLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateLibrary {
    pub fn new() -> Self {
        TemplateLibrary {
            consts: Vec::new(),
            labels: Vec::new(),
            regs: Vec::new(),
            mems: Vec::new(),
            calls: Vec::new(),
            binops: vec![Vec::new(); BinOp::COUNT],
            moves: Vec::new(),
            jumps: Vec::new(),
            cjumps: vec![Vec::new(); RelOp::COUNT],
        }
    }

    pub fn add_expr(&mut self, pattern: ExprPattern) {
        let bucket = match &pattern {
            ExprPattern::Int(_) | ExprPattern::Disp => &mut self.consts,
            ExprPattern::Label => &mut self.labels,
            ExprPattern::Reg => &mut self.regs,
            ExprPattern::BinOp(op, _, _) => &mut self.binops[*op as usize],
            ExprPattern::Mem(_) => &mut self.mems,
            ExprPattern::Call(_) => &mut self.calls,
        };
        bucket.push(pattern);
    }

    pub fn add_stmt(&mut self, pattern: StmtPattern) {
        let bucket = match &pattern {
            StmtPattern::Move(_, _) => &mut self.moves,
            StmtPattern::Jump(_) => &mut self.jumps,
            StmtPattern::CJump(op, _, _) => &mut self.cjumps[*op as usize],
        };
        bucket.push(pattern);
    }

    pub fn len(&self) -> usize {
        [
            &self.consts,
            &self.labels,
            &self.regs,
            &self.mems,
            &self.calls,
        ]
        .iter()
        .map(|b| b.len())
        .chain(self.binops.iter().map(Vec::len))
        .chain([self.moves.len(), self.jumps.len()])
        .chain(self.cjumps.iter().map(Vec::len))
        .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The template covering the most nodes of `expr`. The first one
    /// registered wins a tie.
    pub fn find_expr(&self, expr: &Expr) -> Option<&ExprPattern> {
        let bucket: &[ExprPattern] = match expr {
            Expr::Const(_) => &self.consts,
            Expr::Name(_) => &self.labels,
            Expr::Temp(_) => &self.regs,
            Expr::BinOp(op, _, _) => &self.binops[*op as usize],
            Expr::Mem(_) => &self.mems,
            Expr::Call(_, _, _) => &self.calls,
            Expr::ESeq(_, _) => &[],
        };
        best(bucket, |p| p.score(expr))
    }

    pub fn find_stmt(&self, stmt: &Stmt) -> Option<&StmtPattern> {
        let bucket: &[StmtPattern] = match stmt {
            Stmt::Move(_, _) => &self.moves,
            Stmt::Jump(_, _) => &self.jumps,
            Stmt::CJump(op, _, _, _, _) => &self.cjumps[*op as usize],
            Stmt::Expr(_) | Stmt::Seq(_) | Stmt::Label(_) => &[],
        };
        best(bucket, |p| p.score(stmt))
    }
}

fn best<P>(candidates: &[P], score: impl Fn(&P) -> Option<usize>) -> Option<&P> {
    let mut best: Option<(usize, &P)> = None;
    for candidate in candidates {
        if let Some(s) = score(candidate) {
            if best.map_or(true, |(b, _)| s > b) {
                best = Some((s, candidate));
            }
        }
    }
    best.map(|(_, p)| p)
}
