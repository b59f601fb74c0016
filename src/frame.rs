use crate::{
    common::{Context, Label, Temp},
    ir::{Expr, Stmt},
};

/// Where a variable lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Offset from the frame pointer.
    InFrame(i64),
    InReg(Temp),
}

pub trait Frame {
    /// Machine specific word size.
    const WORD_SIZE: i64;

    /// Return frame name
    fn name(&self) -> &Label;

    /// Pseudo register standing for the frame pointer. Never allocated; the
    /// target rewrites it once the frame size is known.
    fn frame_pointer(&self) -> Temp;

    /// Return `Access` for formals.
    fn formals(&self) -> &[Access];

    /// Registers the incoming argument registers are copied into, in argument order.
    fn parameter_registers(&self) -> &[Temp];

    /// Register receiving the static link of a nested function.
    fn parent_frame_pointer(&self) -> Option<Temp>;

    /// Allocate new local variable with given escape information.
    /// Returns the `Access` to the created variable.
    fn alloc_local(&mut self, ctx: &mut Context, is_escape: bool) -> Access;

    /// Grows the frame by one word for a spilled register and returns its offset.
    fn alloc_spill_slot(&mut self) -> i64;

    /// The fixed slot of a register that must also be visible in memory.
    fn prespilled(&self, temp: Temp) -> Option<i64>;

    /// Makes room at the bottom of the frame for arguments passed on the stack.
    fn reserve_outgoing_args(&mut self, count: usize);

    /// Final frame size, valid once allocation stopped spilling.
    fn size(&self) -> i64;

    /// Statements run at function entry, after the incoming registers are copied.
    fn entry_stmts(&self) -> Vec<Stmt>;

    /// Convert an `Access` to IR Tree.
    /// The second argument means frame pointer in which `Access` is allocated.
    fn exp(access: Access, frame_pointer: Expr) -> Expr {
        match access {
            Access::InFrame(offset) => Expr::mem(Expr::offset(frame_pointer, offset)),
            Access::InReg(temp) => Expr::Temp(temp),
        }
    }
}
