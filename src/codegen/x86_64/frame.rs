use std::collections::HashMap;

use crate::{
    common::{Context, Label, Temp},
    frame::{Access, Frame},
    ir::{Expr, Stmt},
};

const PTR_SIZE: i64 = 8;

/// Frame of one x86-64 function.
///
/// The frame pointer is the stack pointer at entry. Locals and spill slots
/// grow downwards from it, arguments past the sixth sit above the return
/// address, and the outgoing argument area is at the bottom of the frame.
#[derive(Debug, Clone)]
pub struct X86Frame {
    name: Label,
    fp: Temp,
    formals: Vec<Access>,
    parameter_registers: Vec<Temp>,
    parent_fp: Option<Temp>,
    pointer: i64,
    outgoing: usize,
    prespilled: HashMap<Temp, i64>,
    entry: Vec<Stmt>,
}

impl X86Frame {
    pub(super) fn new(
        ctx: &mut Context,
        name: Label,
        fp: Temp,
        formals: &[bool],
        register_params: usize,
        nested: bool,
    ) -> Self {
        let mut frame = X86Frame {
            name,
            fp,
            formals: Vec::with_capacity(formals.len()),
            parameter_registers: Vec::new(),
            parent_fp: None,
            pointer: 0,
            outgoing: 0,
            prespilled: HashMap::new(),
            entry: Vec::new(),
        };

        if nested {
            let parent_fp = ctx.new_temp();
            frame.prespill(parent_fp);
            frame.parent_fp = Some(parent_fp);
        }

        for (idx, is_escape) in formals.iter().enumerate() {
            let access = if idx < register_params {
                let param = ctx.new_temp();
                frame.parameter_registers.push(param);
                if *is_escape {
                    Access::InFrame(frame.prespill(param))
                } else {
                    Access::InReg(param)
                }
            } else {
                let slot = (idx - register_params) as i64;
                Access::InFrame(PTR_SIZE + slot * PTR_SIZE)
            };
            frame.formals.push(access);
        }

        frame
    }

    fn alloc_slot(&mut self) -> i64 {
        self.pointer += PTR_SIZE;
        -self.pointer
    }

    /// Gives `temp` a slot of its own and stores it there on entry.
    fn prespill(&mut self, temp: Temp) -> i64 {
        let offset = self.alloc_slot();
        self.prespilled.insert(temp, offset);
        self.entry.push(Stmt::mov(
            Expr::mem(Expr::offset(Expr::Temp(self.fp), offset)),
            Expr::Temp(temp),
        ));
        offset
    }
}

impl Frame for X86Frame {
    const WORD_SIZE: i64 = PTR_SIZE;

    fn name(&self) -> &Label {
        &self.name
    }

    fn frame_pointer(&self) -> Temp {
        self.fp
    }

    fn formals(&self) -> &[Access] {
        &self.formals
    }

    fn parameter_registers(&self) -> &[Temp] {
        &self.parameter_registers
    }

    fn parent_frame_pointer(&self) -> Option<Temp> {
        self.parent_fp
    }

    fn alloc_local(&mut self, ctx: &mut Context, is_escape: bool) -> Access {
        if is_escape {
            Access::InFrame(self.alloc_slot())
        } else {
            Access::InReg(ctx.new_temp())
        }
    }

    fn alloc_spill_slot(&mut self) -> i64 {
        self.alloc_slot()
    }

    fn prespilled(&self, temp: Temp) -> Option<i64> {
        self.prespilled.get(&temp).copied()
    }

    fn reserve_outgoing_args(&mut self, count: usize) {
        self.outgoing = self.outgoing.max(count);
    }

    /// Keeps the stack pointer 16-byte aligned at every call: the return
    /// address already takes 8 bytes.
    fn size(&self) -> i64 {
        let size = self.pointer + self.outgoing as i64 * PTR_SIZE;
        size + (24 - size % 16) % 16
    }

    fn entry_stmts(&self) -> Vec<Stmt> {
        self.entry.clone()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn frame(ctx: &mut Context, formals: &[bool], nested: bool) -> X86Frame {
        let name = ctx.fn_label("f");
        let fp = ctx.named_temp("fp");
        X86Frame::new(ctx, name, fp, formals, 6, nested)
    }

    #[test]
    fn test_size_is_aligned() {
        let mut ctx = Context::new();
        let mut frame = frame(&mut ctx, &[], false);
        assert_eq!(frame.size(), 8);

        frame.alloc_spill_slot();
        assert_eq!(frame.size(), 8);

        frame.alloc_local(&mut ctx, true);
        assert_eq!(frame.size(), 24);

        frame.reserve_outgoing_args(3);
        frame.reserve_outgoing_args(1);
        assert_eq!(frame.size(), 40);
    }

    #[test]
    fn test_formals() {
        let mut ctx = Context::new();
        let formals = [false, true, false, false, false, false, false, true];
        let frame = frame(&mut ctx, &formals, true);

        let params = frame.parameter_registers().to_vec();
        assert_eq!(params.len(), 6);
        assert_eq!(frame.formals()[0], Access::InReg(params[0]));
        assert_eq!(frame.formals()[1], Access::InFrame(-16));
        assert_eq!(frame.formals()[6], Access::InFrame(8));
        assert_eq!(frame.formals()[7], Access::InFrame(16));

        let parent_fp = frame.parent_frame_pointer().unwrap();
        assert_eq!(frame.prespilled(parent_fp), Some(-8));
        assert_eq!(frame.prespilled(params[1]), Some(-16));
        assert_eq!(frame.prespilled(params[0]), None);

        let fp = frame.frame_pointer();
        assert_eq!(
            frame.entry_stmts(),
            vec![
                Stmt::mov(
                    Expr::mem(Expr::offset(Expr::Temp(fp), -8)),
                    Expr::Temp(parent_fp)
                ),
                Stmt::mov(
                    Expr::mem(Expr::offset(Expr::Temp(fp), -16)),
                    Expr::Temp(params[1])
                ),
            ]
        );
    }
}
