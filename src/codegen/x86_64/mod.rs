pub mod frame;

use once_cell::sync::Lazy;
use strum::{Display, EnumCount, EnumIter, IntoEnumIterator};

use crate::{
    asm::Instruction,
    common::{Context, Label, Temp},
    frame::Frame as _,
    ir::{BinOp, Expr, RelOp, Stmt},
    Error,
};

use super::{
    template::{ExprPattern, StmtPattern, TemplateLibrary},
    Codegen, Emitter,
};
pub use frame::X86Frame;

/// Registers in color order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumCount, EnumIter, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Register {
    Rax,
    Rdx,
    Rcx,
    Rbx,
    Rsi,
    Rdi,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
    Rbp,
    Rsp,
}

use Register::*;

/// Everything but the stack pointer can be handed out.
pub const MAX_PALETTE: usize = Register::COUNT - 1;

const PARAMS: [Register; 6] = [Rdi, Rsi, Rdx, Rcx, R8, R9];
const RESULT: Register = Rax;
const STATIC_LINK: Register = R10;
const CALLER_SAVE: [Register; 9] = [Rdi, Rsi, Rdx, Rcx, R8, R9, Rax, R10, R11];
const CALLEE_SAVE: [Register; 6] = [Rbx, Rbp, R12, R13, R14, R15];

static TEMPLATES: Lazy<TemplateLibrary> = Lazy::new(templates);

fn memory_shapes() -> Vec<ExprPattern> {
    use ExprPattern::{Disp, Reg};
    vec![
        ExprPattern::Label,
        Reg,
        ExprPattern::binop(BinOp::Plus, Reg, Disp),
        ExprPattern::binop(BinOp::Plus, Disp, Reg),
        ExprPattern::binop(BinOp::Minus, Reg, Disp),
    ]
}

fn templates() -> TemplateLibrary {
    use ExprPattern::{Int, Reg};
    let mem = ExprPattern::mem;
    let shapes = memory_shapes();
    let mut lib = TemplateLibrary::new();

    lib.add_expr(Int(0));
    lib.add_expr(ExprPattern::Label);
    lib.add_expr(Reg);
    for shape in &shapes {
        lib.add_expr(mem(shape.clone()));
    }

    for op in BinOp::iter() {
        lib.add_expr(ExprPattern::binop(op, Reg, Int(0)));
        lib.add_expr(ExprPattern::binop(op, Reg, Reg));
        for shape in &shapes {
            lib.add_expr(ExprPattern::binop(op, Reg, mem(shape.clone())));
            lib.add_expr(ExprPattern::binop(op, Int(0), mem(shape.clone())));
            lib.add_expr(ExprPattern::binop(op, mem(shape.clone()), Reg));
            lib.add_expr(ExprPattern::binop(op, mem(shape.clone()), Int(0)));
        }
        for lhs in &shapes {
            for rhs in &shapes {
                lib.add_expr(ExprPattern::binop(op, mem(lhs.clone()), mem(rhs.clone())));
            }
        }
    }

    for op in RelOp::iter() {
        lib.add_stmt(StmtPattern::CJump(op, Reg, Int(0)));
        lib.add_stmt(StmtPattern::CJump(op, Reg, Reg));
        for shape in &shapes {
            lib.add_stmt(StmtPattern::CJump(op, Reg, mem(shape.clone())));
            lib.add_stmt(StmtPattern::CJump(op, mem(shape.clone()), Reg));
            lib.add_stmt(StmtPattern::CJump(op, mem(shape.clone()), Int(0)));
        }
    }

    lib.add_stmt(StmtPattern::Move(Reg, Int(0)));
    lib.add_stmt(StmtPattern::Move(Reg, ExprPattern::Label));
    lib.add_stmt(StmtPattern::Move(Reg, Reg));
    for shape in &shapes {
        lib.add_stmt(StmtPattern::Move(Reg, mem(shape.clone())));
        if let ExprPattern::BinOp(..) = shape {
            lib.add_stmt(StmtPattern::Move(Reg, shape.clone()));
        }
        lib.add_stmt(StmtPattern::Move(mem(shape.clone()), Reg));
        lib.add_stmt(StmtPattern::Move(mem(shape.clone()), Int(0)));
    }

    lib.add_expr(ExprPattern::call(ExprPattern::Label));
    lib.add_expr(ExprPattern::call(Reg));
    lib.add_stmt(StmtPattern::Jump(ExprPattern::Label));
    lib.add_stmt(StmtPattern::Jump(Reg));

    lib
}

fn fits_i32(value: i64) -> bool {
    i32::try_from(value).is_ok()
}

fn jump_mnemonic(op: RelOp) -> &'static str {
    match op {
        RelOp::Eq => "je",
        RelOp::Ne => "jne",
        RelOp::Lt => "jl",
        RelOp::Le => "jle",
        RelOp::Gt => "jg",
        RelOp::Ge => "jge",
        RelOp::Ult => "jb",
        RelOp::Ule => "jbe",
        RelOp::Ugt => "ja",
        RelOp::Uge => "jae",
    }
}

/// Operand text with `&iN` placeholders, and the registers it reads.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Operand {
    text: String,
    inputs: Vec<Temp>,
}

impl Operand {
    fn new(text: impl Into<String>, inputs: Vec<Temp>) -> Self {
        Operand {
            text: text.into(),
            inputs,
        }
    }
}

/// `base(&iN)` with the displacement left out when it is zero.
fn displacement(offset: i64, placeholder: &str) -> String {
    if offset == 0 {
        format!("({})", placeholder)
    } else {
        format!("{}({})", offset, placeholder)
    }
}

/// Memory operand for one of the address shapes. Inputs are numbered from `base`.
fn address(addr: &Expr, base: usize) -> Result<Operand, Error> {
    let placeholder = format!("&i{}", base);
    let (temp, offset) = match addr {
        Expr::Name(label) => return Ok(Operand::new(format!("{}(%rip)", label), vec![])),
        Expr::Temp(temp) => (*temp, 0),
        Expr::BinOp(BinOp::Plus, lhs, rhs) => match (lhs.as_ref(), rhs.as_ref()) {
            (Expr::Temp(temp), Expr::Const(c)) | (Expr::Const(c), Expr::Temp(temp)) => {
                (*temp, *c)
            }
            _ => return Err(Error::AddressMode(addr.to_string())),
        },
        Expr::BinOp(BinOp::Minus, lhs, rhs) => match (lhs.as_ref(), rhs.as_ref()) {
            (Expr::Temp(temp), Expr::Const(c)) => match c.checked_neg() {
                Some(offset) => (*temp, offset),
                None => return Err(Error::AddressMode(addr.to_string())),
            },
            _ => return Err(Error::AddressMode(addr.to_string())),
        },
        _ => return Err(Error::AddressMode(addr.to_string())),
    };
    if !fits_i32(offset) {
        return Err(Error::AddressMode(addr.to_string()));
    }
    Ok(Operand::new(displacement(offset, &placeholder), vec![temp]))
}

/// The x86-64 target.
#[derive(Debug)]
pub struct X86_64 {
    registers: Vec<Temp>,
    fp: Temp,
    palette: usize,
}

impl X86_64 {
    /// Creates the machine registers in `ctx`. The allocator may use the
    /// first `palette` of them.
    pub fn new(ctx: &mut Context, palette: usize) -> Self {
        let registers = Register::iter()
            .map(|r| ctx.named_temp(format!("%{}", r)))
            .collect();
        let fp = ctx.named_temp("fp");
        X86_64 {
            registers,
            fp,
            palette: palette.clamp(2, MAX_PALETTE),
        }
    }

    pub fn reg(&self, register: Register) -> Temp {
        self.registers[register as usize]
    }

    fn regs<'a>(&'a self, registers: &'a [Register]) -> impl Iterator<Item = Temp> + 'a {
        registers.iter().map(|r| self.reg(*r))
    }

    /// Operand for a value read by an instruction. Inputs are numbered from
    /// `base`. Constants too wide for an immediate are loaded first.
    fn operand(
        &self,
        e: &mut Emitter<'_, X86Frame>,
        expr: &Expr,
        base: usize,
    ) -> Result<Operand, Error> {
        let placeholder = format!("&i{}", base);
        match expr {
            Expr::Const(value) if fits_i32(*value) => Ok(Operand::new(format!("${}", value), vec![])),
            Expr::Const(_) | Expr::Name(_) => {
                let temp = e.new_temp();
                self.load(e, expr, temp)?;
                Ok(Operand::new(placeholder, vec![temp]))
            }
            Expr::Temp(temp) => Ok(Operand::new(placeholder, vec![*temp])),
            Expr::Mem(addr) => address(addr, base),
            _ => Err(Error::AddressMode(expr.to_string())),
        }
    }

    /// Operand for instructions that take no immediate.
    fn register_or_memory(
        &self,
        e: &mut Emitter<'_, X86Frame>,
        expr: &Expr,
    ) -> Result<Operand, Error> {
        match expr {
            Expr::Const(_) => {
                let temp = e.new_temp();
                self.load(e, expr, temp)?;
                Ok(Operand::new("&i0", vec![temp]))
            }
            _ => self.operand(e, expr, 0),
        }
    }

    /// `dst := src` for a leaf or a memory read.
    fn load(&self, e: &mut Emitter<'_, X86Frame>, src: &Expr, dst: Temp) -> Result<(), Error> {
        let instruction = match src {
            Expr::Temp(temp) => Instruction::mov("movq &i0, &o0", *temp, dst),
            Expr::Const(value) if fits_i32(*value) => {
                Instruction::oper(format!("movq ${}, &o0", value), vec![], vec![dst])
            }
            Expr::Const(value) => {
                Instruction::oper(format!("movabsq ${}, &o0", value), vec![], vec![dst])
            }
            Expr::Name(label) => {
                Instruction::oper(format!("leaq {}(%rip), &o0", label), vec![], vec![dst])
            }
            Expr::Mem(addr) => {
                let addr = address(addr, 0)?;
                Instruction::oper(format!("movq {}, &o0", addr.text), addr.inputs, vec![dst])
            }
            _ => return Err(Error::UnexpectedShape(src.to_string())),
        };
        e.emit(instruction);
        Ok(())
    }

    fn arithmetic(
        &self,
        e: &mut Emitter<'_, X86Frame>,
        op: BinOp,
        lhs: Expr,
        rhs: Expr,
        dst: Temp,
    ) -> Result<(), Error> {
        let (rax, rdx) = (self.reg(Rax), self.reg(Rdx));
        let mnemonic = match op {
            BinOp::Plus => "addq",
            BinOp::Minus => "subq",
            BinOp::And => "andq",
            BinOp::Or => "orq",
            BinOp::XOr => "xorq",
            BinOp::Mul => {
                self.load(e, &lhs, rax)?;
                let rhs = self.register_or_memory(e, &rhs)?;
                let mut inputs = rhs.inputs;
                inputs.push(rax);
                e.emit(Instruction::oper(
                    format!("imulq {}", rhs.text),
                    inputs,
                    vec![rax, rdx],
                ));
                e.emit(Instruction::mov("movq &i0, &o0", rax, dst));
                return Ok(());
            }
            BinOp::Div => {
                self.load(e, &lhs, rax)?;
                e.emit(Instruction::oper("cqo", vec![rax], vec![rdx]));
                let rhs = self.register_or_memory(e, &rhs)?;
                let mut inputs = rhs.inputs;
                inputs.extend([rax, rdx]);
                e.emit(Instruction::oper(
                    format!("idivq {}", rhs.text),
                    inputs,
                    vec![rax, rdx],
                ));
                e.emit(Instruction::mov("movq &i0, &o0", rax, dst));
                return Ok(());
            }
        };

        self.load(e, &lhs, dst)?;
        let rhs = self.operand(e, &rhs, 0)?;
        let mut inputs = rhs.inputs;
        inputs.push(dst);
        e.emit(Instruction::oper(
            format!("{} {}, &o0", mnemonic, rhs.text),
            inputs,
            vec![dst],
        ));
        Ok(())
    }

    fn call(
        &self,
        e: &mut Emitter<'_, X86Frame>,
        callee: Expr,
        args: Vec<Expr>,
        static_link: Option<Expr>,
        dst: Option<Temp>,
    ) -> Result<(), Error> {
        let link = match static_link {
            Some(link) => {
                let temp = e.new_temp();
                self.translate_expression(e, link, Some(temp))?;
                Some(temp)
            }
            None => None,
        };

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                Expr::Temp(temp) => values.push(temp),
                arg => return Err(Error::UnexpectedShape(arg.to_string())),
            }
        }

        if values.len() > PARAMS.len() {
            e.frame.reserve_outgoing_args(values.len() - PARAMS.len());
            for (slot, value) in values[PARAMS.len()..].iter().enumerate() {
                e.emit(Instruction::oper(
                    format!("movq &i0, {}(%rsp)", slot as i64 * X86Frame::WORD_SIZE),
                    vec![*value],
                    vec![],
                ));
            }
        }

        let mut inputs = Vec::new();
        let notation = match callee {
            Expr::Name(label) => format!("call {}", label),
            Expr::Temp(temp) => {
                inputs.push(temp);
                "call *&i0".to_string()
            }
            callee => return Err(Error::UnexpectedShape(callee.to_string())),
        };

        for (value, param) in values.iter().zip(self.regs(&PARAMS)) {
            e.emit(Instruction::mov("movq &i0, &o0", *value, param));
            inputs.push(param);
        }
        if let Some(link) = link {
            let r10 = self.reg(STATIC_LINK);
            e.emit(Instruction::mov("movq &i0, &o0", link, r10));
            inputs.push(r10);
        }

        e.emit(Instruction::oper(
            notation,
            inputs,
            self.regs(&CALLER_SAVE).collect(),
        ));
        if let Some(dst) = dst {
            e.emit(Instruction::mov("movq &i0, &o0", self.reg(RESULT), dst));
        }
        Ok(())
    }

    fn cjump(
        &self,
        e: &mut Emitter<'_, X86Frame>,
        op: RelOp,
        lhs: Expr,
        rhs: Expr,
        t: Label,
    ) -> Result<(), Error> {
        if let Expr::Const(_) = lhs {
            return Err(Error::AddressMode(lhs.to_string()));
        }
        let rhs = self.operand(e, &rhs, 0)?;
        let lhs = self.operand(e, &lhs, rhs.inputs.len())?;

        let mut inputs = rhs.inputs;
        inputs.extend(lhs.inputs);
        e.emit(Instruction::oper(
            format!("cmpq {}, {}", rhs.text, lhs.text),
            inputs,
            vec![],
        ));
        e.emit(Instruction::jump(
            format!("{} {}", jump_mnemonic(op), t),
            vec![],
            vec![None, Some(t)],
        ));
        Ok(())
    }

    fn store(
        &self,
        e: &mut Emitter<'_, X86Frame>,
        addr: &Expr,
        src: &Expr,
    ) -> Result<(), Error> {
        let src = match src {
            Expr::Temp(_) | Expr::Const(_) => self.operand(e, src, 0)?,
            _ => return Err(Error::UnexpectedShape(src.to_string())),
        };
        let addr = address(addr, src.inputs.len())?;

        let mut inputs = src.inputs;
        inputs.extend(addr.inputs);
        e.emit(Instruction::oper(
            format!("movq {}, {}", src.text, addr.text),
            inputs,
            vec![],
        ));
        Ok(())
    }
}

/// Rewrites every `off(placeholder)` to `off+size(placeholder)`. `None` when
/// the placeholder is used other than as a base register.
fn rebase(notation: &str, placeholder: &str, size: i64) -> Option<String> {
    let mut result = String::with_capacity(notation.len() + 4);
    let mut rest = notation;

    while let Some(pos) = find_placeholder(rest, placeholder) {
        let before = rest[..pos].strip_suffix('(')?;
        let start = before
            .trim_end_matches(|c: char| c.is_ascii_digit() || c == '-')
            .len();
        let offset: i64 = match &before[start..] {
            "" => 0,
            digits => digits.parse().ok()?,
        };
        result.push_str(&before[..start]);
        result.push_str(&format!("{}({}", offset + size, placeholder));
        rest = &rest[pos + placeholder.len()..];
    }

    result.push_str(rest);
    Some(result)
}

/// Position of `placeholder` not followed by another digit, so `&i1` is not
/// found in `&i12`.
fn find_placeholder(notation: &str, placeholder: &str) -> Option<usize> {
    notation.match_indices(placeholder).map(|(pos, _)| pos).find(|pos| {
        !notation[pos + placeholder.len()..]
            .starts_with(|c: char| c.is_ascii_digit())
    })
}

fn count_placeholder(notation: &str, placeholder: &str) -> usize {
    notation
        .match_indices(placeholder)
        .filter(|(pos, _)| {
            !notation[pos + placeholder.len()..].starts_with(|c: char| c.is_ascii_digit())
        })
        .count()
}

/// Reads `reg` straight from its slot when the instruction can take a
/// memory operand in that position.
fn fold_use(instruction: &mut Instruction, reg: Temp, fp: Temp, offset: i64) -> bool {
    if instruction.notation.starts_with('#') || instruction.notation.contains('(') {
        return false;
    }
    let positions: Vec<_> = instruction
        .inputs
        .iter()
        .enumerate()
        .filter(|(_, t)| **t == reg)
        .map(|(k, _)| k)
        .collect();
    let k = match positions.as_slice() {
        [k] => *k,
        _ => return false,
    };

    let placeholder = format!("&i{}", k);
    if count_placeholder(&instruction.notation, &placeholder) != 1 {
        return false;
    }
    let pos = match find_placeholder(&instruction.notation, &placeholder) {
        Some(pos) => pos,
        None => return false,
    };

    instruction.notation.replace_range(
        pos..pos + placeholder.len(),
        &displacement(offset, &placeholder),
    );
    instruction.inputs[k] = fp;
    instruction.is_move = false;
    true
}

/// Turns `movq x, reg` into a store to the slot.
fn fold_def(instruction: &mut Instruction, reg: Temp, fp: Temp, offset: i64) -> bool {
    let notation = &instruction.notation;
    if instruction.outputs != [reg]
        || !notation.starts_with("movq ")
        || !notation.ends_with("&o0")
        || notation.contains('(')
        || instruction.inputs.contains(&fp)
    {
        return false;
    }

    let placeholder = format!("&i{}", instruction.inputs.len());
    let prefix = &notation[..notation.len() - "&o0".len()];
    instruction.notation = format!("{}{}", prefix, displacement(offset, &placeholder));
    instruction.inputs.push(fp);
    instruction.outputs.clear();
    instruction.is_move = false;
    true
}

impl Codegen for X86_64 {
    type Frame = X86Frame;
    const MAIN_SYMBOL: &'static str = "main";

    fn templates(&self) -> &TemplateLibrary {
        &TEMPLATES
    }

    fn registers(&self) -> &[Temp] {
        &self.registers
    }

    fn palette(&self) -> usize {
        self.palette
    }

    fn frame_pointer(&self) -> Temp {
        self.fp
    }

    fn new_frame(
        &self,
        ctx: &mut Context,
        name: Label,
        formals: &[bool],
        nested: bool,
    ) -> X86Frame {
        X86Frame::new(ctx, name, self.fp, formals, PARAMS.len(), nested)
    }

    fn lower_expr(
        &self,
        e: &mut Emitter<'_, X86Frame>,
        expr: Expr,
        dst: Option<Temp>,
    ) -> Result<(), Error> {
        match expr {
            Expr::Const(_) | Expr::Name(_) | Expr::Temp(_) | Expr::Mem(_) => match dst {
                Some(dst) => self.load(e, &expr, dst),
                None => Ok(()),
            },
            Expr::BinOp(op, lhs, rhs) => {
                let dst = dst.unwrap_or_else(|| e.new_temp());
                self.arithmetic(e, op, *lhs, *rhs, dst)
            }
            Expr::Call(callee, args, static_link) => {
                self.call(e, *callee, args, static_link.map(|link| *link), dst)
            }
            Expr::ESeq(_, _) => Err(Error::UnexpectedShape(expr.to_string())),
        }
    }

    fn lower_stmt(&self, e: &mut Emitter<'_, X86Frame>, stmt: Stmt) -> Result<(), Error> {
        match stmt {
            Stmt::Move(dst, src) => match (*dst, *src) {
                (Expr::Temp(dst), src @ Expr::BinOp(..)) => {
                    let addr = address(&src, 0)?;
                    e.emit(Instruction::oper(
                        format!("leaq {}, &o0", addr.text),
                        addr.inputs,
                        vec![dst],
                    ));
                    Ok(())
                }
                (Expr::Temp(dst), src) => self.load(e, &src, dst),
                (Expr::Mem(addr), src) => self.store(e, &addr, &src),
                (dst, _) => Err(Error::UnexpectedShape(dst.to_string())),
            },
            Stmt::Jump(target, labels) => {
                let mut destinations: Vec<_> = labels.into_iter().map(Some).collect();
                let instruction = match *target {
                    Expr::Name(label) => {
                        if destinations.is_empty() {
                            destinations.push(Some(label.clone()));
                        }
                        Instruction::jump(format!("jmp {}", label), vec![], destinations)
                    }
                    // an empty list would read as a fall-through.
                    Expr::Temp(_) if destinations.is_empty() => {
                        return Err(Error::MalformedInstruction("jmp *&i0".to_string()));
                    }
                    Expr::Temp(temp) => Instruction::jump("jmp *&i0", vec![temp], destinations),
                    target => return Err(Error::UnexpectedShape(target.to_string())),
                };
                e.emit(instruction);
                Ok(())
            }
            Stmt::CJump(op, lhs, rhs, t, _) => self.cjump(e, op, *lhs, *rhs, t),
            stmt => Err(Error::UnexpectedShape(stmt.to_string())),
        }
    }

    fn prologue(&self, e: &mut Emitter<'_, X86Frame>) -> Result<(), Error> {
        e.emit(Instruction::oper(
            "# callee-save registers",
            vec![],
            self.regs(&CALLEE_SAVE).collect(),
        ));
        for reg in self.regs(&CALLEE_SAVE) {
            let keep = e.new_temp();
            e.emit(Instruction::mov("movq &i0, &o0", reg, keep));
            e.saved.push((reg, keep));
        }

        let params = e.frame.parameter_registers().to_vec();
        for (reg, param) in self.regs(&PARAMS).zip(params) {
            e.emit(Instruction::mov("movq &i0, &o0", reg, param));
        }
        if let Some(parent_fp) = e.frame.parent_frame_pointer() {
            e.emit(Instruction::mov(
                "movq &i0, &o0",
                self.reg(STATIC_LINK),
                parent_fp,
            ));
        }

        for stmt in e.frame.entry_stmts() {
            self.translate_statement(e, stmt)?;
        }
        Ok(())
    }

    fn epilogue(&self, e: &mut Emitter<'_, X86Frame>, result: Option<Temp>) {
        let mut live: Vec<Temp> = self.regs(&CALLEE_SAVE).collect();
        if let Some(result) = result {
            let rax = self.reg(RESULT);
            e.emit(Instruction::mov("movq &i0, &o0", result, rax));
            live.push(rax);
        }
        for (reg, keep) in std::mem::take(&mut e.saved) {
            e.emit(Instruction::mov("movq &i0, &o0", keep, reg));
        }
        e.emit(Instruction::oper("# restored registers", live, vec![]));
    }

    fn frame_prologue(&self, size: i64) -> Vec<Instruction> {
        vec![Instruction::oper(
            format!("subq ${}, %rsp", size),
            vec![],
            vec![],
        )]
    }

    fn frame_epilogue(&self, size: i64) -> Vec<Instruction> {
        vec![Instruction::oper(
            format!("addq ${}, %rsp", size),
            vec![],
            vec![],
        )]
    }

    fn implement_frame_pointer(
        &self,
        mut instruction: Instruction,
        size: i64,
    ) -> Result<Instruction, Error> {
        if instruction.outputs.contains(&self.fp) {
            return Err(Error::FramePointerWrite(instruction.notation));
        }

        let rsp = self.reg(Rsp);
        for k in 0..instruction.inputs.len() {
            if instruction.inputs[k] != self.fp {
                continue;
            }
            let placeholder = format!("&i{}", k);
            instruction.notation = match rebase(&instruction.notation, &placeholder, size) {
                Some(notation) => notation,
                None if instruction.is_move
                    && instruction.notation == format!("movq {}, &o0", placeholder) =>
                {
                    instruction.is_move = false;
                    format!("leaq {}({}), &o0", size, placeholder)
                }
                None => return Err(Error::AddressMode(instruction.notation)),
            };
            instruction.inputs[k] = rsp;
        }
        Ok(instruction)
    }

    fn finish_function(
        &self,
        frame: &X86Frame,
        code: Vec<Instruction>,
        is_main: bool,
    ) -> Vec<Instruction> {
        let mut result = Vec::with_capacity(code.len() + 3);
        result.push(Instruction::label(frame.name().clone()));
        result.extend(code);
        if is_main {
            result.push(Instruction::oper("movq $0, %rax", vec![], vec![]));
        }
        result.push(Instruction::oper("ret", vec![], vec![]));
        result
    }

    fn spill_register(
        &self,
        ctx: &mut Context,
        frame: &mut X86Frame,
        code: Vec<Instruction>,
        reg: Temp,
    ) -> (Vec<Instruction>, Vec<Temp>) {
        let fp = self.fp;
        let (offset, prespilled) = match frame.prespilled(reg) {
            Some(offset) => (offset, true),
            None => (frame.alloc_spill_slot(), false),
        };
        let own_store = format!("movq &i0, {}", displacement(offset, "&i1"));

        let mut result = Vec::with_capacity(code.len());
        let mut introduced = Vec::new();
        for mut instruction in code {
            let uses = instruction.inputs.contains(&reg);
            let defs = instruction.outputs.contains(&reg);
            if !uses && !defs {
                result.push(instruction);
                continue;
            }

            if prespilled
                && instruction.inputs == [reg, fp]
                && instruction.outputs.is_empty()
                && instruction.notation == own_store
            {
                continue;
            }
            if (!defs && fold_use(&mut instruction, reg, fp, offset))
                || (!uses && fold_def(&mut instruction, reg, fp, offset))
            {
                result.push(instruction);
                continue;
            }

            let temp = ctx.new_temp();
            introduced.push(temp);
            if uses {
                result.push(Instruction::oper(
                    format!("movq {}, &o0", displacement(offset, "&i0")),
                    vec![fp],
                    vec![temp],
                ));
            }
            for t in instruction
                .inputs
                .iter_mut()
                .chain(instruction.outputs.iter_mut())
            {
                if *t == reg {
                    *t = temp;
                }
            }
            result.push(instruction);
            if defs {
                result.push(Instruction::oper(own_store.clone(), vec![temp, fp], vec![]));
            }
        }

        (result, introduced)
    }
}
