use crate::{common::Context, Error};

use super::{Body, Expr, Stmt};

pub use blocks::{basic_blocks, Block};
pub use linearize::{canonicalize_expression, canonicalize_statement};
pub use trace::trace_schedule;

/// Canonicalizes a function body and orders its blocks for fall-through.
pub fn canonicalize_body(ctx: &mut Context, body: Body) -> Result<Body, Error> {
    match body {
        Body::Stmt(stmt) => {
            let stmts = linearize::linearize(ctx, stmt)?;
            Ok(Body::Stmt(Stmt::Seq(arrange(ctx, stmts))))
        }
        Body::Expr(expr) => {
            let (stmts, expr) = linearize::linearize_expr(ctx, expr)?;
            if stmts.is_empty() {
                return Ok(Body::Expr(expr));
            }
            let stmts = arrange(ctx, stmts);
            Ok(Body::Expr(Expr::eseq(Stmt::Seq(stmts), expr)))
        }
    }
}

fn arrange(ctx: &mut Context, stmts: Vec<Stmt>) -> Vec<Stmt> {
    let (blocks, done) = basic_blocks(ctx, stmts);
    trace_schedule(ctx, blocks, done)
}

mod linearize {
    use crate::{
        common::Context,
        ir::{Expr, Stmt},
        Error,
    };

    /// Where an expression's value goes. A call may stay in place only when
    /// its parent consumes the result directly.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Parent {
        Root,
        Discard,
        MoveToTemp,
        MoveToLabel,
        Operand,
    }

    pub fn canonicalize_statement(ctx: &mut Context, stmt: Stmt) -> Result<Stmt, Error> {
        Ok(Stmt::Seq(linearize(ctx, stmt)?))
    }

    pub fn canonicalize_expression(ctx: &mut Context, expr: Expr) -> Result<Expr, Error> {
        let (stmts, expr) = linearize_expr(ctx, expr)?;
        if stmts.is_empty() {
            Ok(expr)
        } else {
            Ok(Expr::eseq(Stmt::Seq(stmts), expr))
        }
    }

    pub(super) fn linearize(ctx: &mut Context, stmt: Stmt) -> Result<Vec<Stmt>, Error> {
        let mut out = Vec::new();
        do_stmt(ctx, stmt, &mut out)?;
        Ok(out)
    }

    pub(super) fn linearize_expr(
        ctx: &mut Context,
        expr: Expr,
    ) -> Result<(Vec<Stmt>, Expr), Error> {
        let mut out = Vec::new();
        let expr = do_expr(ctx, expr, Parent::Root, &mut out)?;
        Ok((out, expr))
    }

    fn commute(expr: &Expr, stmts: &[Stmt]) -> bool {
        matches!(expr, Expr::Const(_) | Expr::Name(_)) || stmts.iter().all(Stmt::is_nop)
    }

    fn save(ctx: &mut Context, expr: &mut Expr, out: &mut Vec<Stmt>) {
        let t = ctx.new_temp();
        let value = std::mem::replace(expr, Expr::Temp(t));
        out.push(Stmt::mov(Expr::Temp(t), value));
    }

    /// Pulls the statements out of both operands. The left value is saved
    /// to a fresh register when the right operand's statements could change it.
    fn reorder2(
        ctx: &mut Context,
        lhs: Expr,
        rhs: Expr,
        out: &mut Vec<Stmt>,
    ) -> Result<(Expr, Expr), Error> {
        let mut lhs = do_expr(ctx, lhs, Parent::Operand, out)?;
        let mut stmts = Vec::new();
        let rhs = do_expr(ctx, rhs, Parent::Operand, &mut stmts)?;
        if !commute(&lhs, &stmts) {
            save(ctx, &mut lhs, out);
        }
        out.extend(stmts);
        Ok((lhs, rhs))
    }

    /// Same as `reorder2` for any number of operands, evaluated left to right.
    fn reorder(
        ctx: &mut Context,
        exprs: Vec<Expr>,
        out: &mut Vec<Stmt>,
    ) -> Result<Vec<Expr>, Error> {
        let mut result: Vec<Expr> = Vec::with_capacity(exprs.len());
        let mut saved = 0;
        for expr in exprs {
            let mut stmts = Vec::new();
            let expr = do_expr(ctx, expr, Parent::Operand, &mut stmts)?;
            if !stmts.iter().all(Stmt::is_nop) {
                for prev in &mut result[saved..] {
                    if !commute(prev, &stmts) {
                        save(ctx, prev, out);
                    }
                }
                saved = result.len();
                out.extend(stmts);
            }
            result.push(expr);
        }
        Ok(result)
    }

    fn do_stmt(ctx: &mut Context, stmt: Stmt, out: &mut Vec<Stmt>) -> Result<(), Error> {
        match stmt {
            Stmt::Seq(stmts) => {
                for stmt in stmts {
                    do_stmt(ctx, stmt, out)?;
                }
            }
            label @ Stmt::Label(_) => out.push(label),
            Stmt::Jump(dst, labels) => {
                let dst = do_expr(ctx, *dst, Parent::Operand, out)?;
                out.push(Stmt::Jump(Box::new(dst), labels));
            }
            Stmt::CJump(op, lhs, rhs, t, f) => {
                let (lhs, rhs) = reorder2(ctx, *lhs, *rhs, out)?;
                out.push(Stmt::cjump(op, lhs, rhs, t, f));
            }
            Stmt::Expr(e) => {
                let e = do_expr(ctx, *e, Parent::Discard, out)?;
                let stmt = Stmt::expr(e);
                if !stmt.is_nop() {
                    out.push(stmt);
                }
            }
            Stmt::Move(dst, src) => match *dst {
                Expr::Temp(t) => {
                    let src = do_expr(ctx, *src, Parent::MoveToTemp, out)?;
                    out.push(Stmt::mov(Expr::Temp(t), src));
                }
                Expr::Mem(addr) => match *addr {
                    Expr::Name(label) => {
                        let src = do_expr(ctx, *src, Parent::MoveToLabel, out)?;
                        out.push(Stmt::mov(Expr::mem(Expr::Name(label)), src));
                    }
                    addr => {
                        let (addr, src) = reorder2(ctx, addr, *src, out)?;
                        out.push(Stmt::mov(Expr::mem(addr), src));
                    }
                },
                Expr::ESeq(stmt, dst) => {
                    do_stmt(ctx, *stmt, out)?;
                    do_stmt(ctx, Stmt::Move(dst, src), out)?;
                }
                other => {
                    return Err(Error::InvalidIr(format!(
                        "move into something that is neither a register nor memory:\n{}",
                        other
                    )))
                }
            },
        }
        Ok(())
    }

    fn do_expr(
        ctx: &mut Context,
        expr: Expr,
        parent: Parent,
        out: &mut Vec<Stmt>,
    ) -> Result<Expr, Error> {
        match expr {
            e @ (Expr::Const(_) | Expr::Name(_) | Expr::Temp(_)) => Ok(e),
            Expr::BinOp(op, lhs, rhs) => {
                let (lhs, rhs) = reorder2(ctx, *lhs, *rhs, out)?;
                Ok(Expr::binop(op, lhs, rhs))
            }
            Expr::Mem(addr) => Ok(Expr::mem(do_expr(ctx, *addr, Parent::Operand, out)?)),
            Expr::ESeq(stmt, expr) => {
                do_stmt(ctx, *stmt, out)?;
                do_expr(ctx, *expr, parent, out)
            }
            Expr::Call(callee, args, static_link) => {
                let mut operands = Vec::with_capacity(args.len() + 1);
                operands.push(*callee);
                operands.extend(args);

                let mut operands = reorder(ctx, operands, out)?;
                let callee = operands.remove(0);
                // the static link is a plain frame-pointer expression and is kept as is.
                let call = Expr::Call(Box::new(callee), operands, static_link);

                match parent {
                    Parent::Root | Parent::Discard | Parent::MoveToTemp | Parent::MoveToLabel => {
                        Ok(call)
                    }
                    Parent::Operand => {
                        let t = ctx.new_temp();
                        out.push(Stmt::mov(Expr::Temp(t), call));
                        Ok(Expr::Temp(t))
                    }
                }
            }
        }
    }
}

mod blocks {
    use crate::{
        common::{Context, Label},
        ir::Stmt,
    };

    /// A basic block: starts with a label, ends with its only jump.
    pub type Block = Vec<Stmt>;

    /// Splits linear statements into blocks. Also returns the label that the
    /// last block jumps to when control falls off the end.
    pub fn basic_blocks(ctx: &mut Context, stmts: Vec<Stmt>) -> (Vec<Block>, Label) {
        let done = ctx.new_label();
        let mut builder = BlockBuilder {
            ctx,
            done: done.clone(),
            result: Vec::new(),
            cur_block: Vec::new(),
        };
        for stmt in stmts {
            builder.push(stmt);
        }
        builder.finish();
        (builder.result, done)
    }

    struct BlockBuilder<'a> {
        ctx: &'a mut Context,
        done: Label,
        result: Vec<Block>,
        cur_block: Block,
    }

    impl BlockBuilder<'_> {
        fn push(&mut self, stmt: Stmt) {
            match stmt {
                Stmt::Label(label) => {
                    if !self.cur_block.is_empty() {
                        self.cur_block.push(Stmt::jump(label.clone()));
                        self.end_block();
                    }
                    self.cur_block.push(Stmt::Label(label));
                }
                jump @ (Stmt::Jump(_, _) | Stmt::CJump(_, _, _, _, _)) => {
                    self.start_block();
                    self.cur_block.push(jump);
                    self.end_block();
                }
                stmt => {
                    self.start_block();
                    self.cur_block.push(stmt);
                }
            }
        }

        fn start_block(&mut self) {
            if self.cur_block.is_empty() {
                let label = self.ctx.new_label();
                self.cur_block.push(Stmt::Label(label));
            }
        }

        fn end_block(&mut self) {
            let block = std::mem::take(&mut self.cur_block);
            self.result.push(block);
        }

        fn finish(&mut self) {
            if !self.cur_block.is_empty() {
                self.cur_block.push(Stmt::jump(self.done.clone()));
                self.end_block();
            }
        }
    }
}

mod trace {
    use std::collections::HashMap;

    use crate::{
        common::{Context, Label},
        ir::{Expr, Stmt},
    };

    use super::Block;

    /// Orders blocks into traces and fixes up the jumps between them. The
    /// `done` label is placed last.
    pub fn trace_schedule(ctx: &mut Context, mut blocks: Vec<Block>, done: Label) -> Vec<Stmt> {
        let order = schedule(&blocks, &done);

        let mut result = Vec::new();
        for idx in order {
            let block = std::mem::take(&mut blocks[idx]);
            if let Some(Stmt::Label(label)) = block.first() {
                let label = label.clone();
                connect(ctx, &mut result, &label);
            }
            result.extend(block);
        }
        connect(ctx, &mut result, &done);
        result.push(Stmt::Label(done));

        result
    }

    fn successor(block: &Block) -> Option<&Label> {
        match block.last() {
            Some(Stmt::Jump(_, labels)) => labels.first(),
            Some(Stmt::CJump(_, _, _, _, f)) => Some(f),
            _ => None,
        }
    }

    /// Greedy traces: take the first unplaced block and keep following its
    /// jump target (the false label for a conditional jump).
    fn schedule(blocks: &[Block], done: &Label) -> Vec<usize> {
        let table: HashMap<&Label, usize> = blocks
            .iter()
            .enumerate()
            .filter_map(|(idx, block)| match block.first() {
                Some(Stmt::Label(label)) => Some((label, idx)),
                _ => None,
            })
            .collect();

        let mut seen = vec![false; blocks.len()];
        let mut order = Vec::with_capacity(blocks.len());
        for start in 0..blocks.len() {
            let mut idx = start;
            while !seen[idx] {
                seen[idx] = true;
                order.push(idx);
                match successor(&blocks[idx])
                    .filter(|label| *label != done)
                    .and_then(|label| table.get(label))
                {
                    Some(&next) => idx = next,
                    None => break,
                }
            }
        }
        order
    }

    /// Makes the last emitted statement fall through to `next` where it can.
    fn connect(ctx: &mut Context, result: &mut Vec<Stmt>, next: &Label) {
        let jumps_to_next = matches!(
            result.last(),
            Some(Stmt::Jump(dst, _)) if matches!(dst.as_ref(), Expr::Name(l) if l == next)
        );
        if jumps_to_next {
            result.pop();
            return;
        }

        if let Some(Stmt::CJump(op, _, _, t, f)) = result.last_mut() {
            if f == next {
                return;
            }
            if t == next {
                *op = op.negate();
                std::mem::swap(t, f);
                return;
            }
            let label = ctx.new_label();
            let target = std::mem::replace(f, label.clone());
            result.push(Stmt::Label(label));
            result.push(Stmt::jump(target));
        }
    }
}
