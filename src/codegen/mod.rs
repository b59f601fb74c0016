use std::fmt::Write as _;

use log::debug;

use crate::{
    asm::{self, Instruction},
    common::{Context, Label, Temp},
    frame::Frame,
    ir::{canon, Body, Expr, Function, Program, Stmt},
    Error,
};

use template::{Glued, TemplateLibrary};

pub(super) mod color;
pub(super) mod flow;
mod graph;
pub(super) mod liveness;
pub mod reg_alloc;
pub mod template;
pub mod x86_64;

/// Collects the instructions of one function while it is being selected.
pub struct Emitter<'a, F> {
    pub ctx: &'a mut Context,
    pub frame: &'a mut F,
    code: Vec<Instruction>,
    /// Callee-save registers paired with the registers keeping their entry values.
    pub saved: Vec<(Temp, Temp)>,
}

impl<'a, F> Emitter<'a, F> {
    pub fn new(ctx: &'a mut Context, frame: &'a mut F) -> Self {
        Emitter {
            ctx,
            frame,
            code: Vec::new(),
            saved: Vec::new(),
        }
    }

    pub fn emit(&mut self, instruction: Instruction) {
        self.code.push(instruction);
    }

    pub fn new_temp(&mut self) -> Temp {
        self.ctx.new_temp()
    }

    pub fn finish(self) -> Vec<Instruction> {
        self.code
    }
}

/// A target machine. The required methods describe the machine; the provided
/// ones drive selection, allocation and rendering for it.
pub trait Codegen {
    type Frame: Frame;
    const MAIN_SYMBOL: &'static str;

    fn templates(&self) -> &TemplateLibrary;

    /// Machine registers. A register's position is its color.
    fn registers(&self) -> &[Temp];

    /// How many registers, from the front of `registers`, the allocator may hand out.
    fn palette(&self) -> usize;

    fn frame_pointer(&self) -> Temp;

    /// `formals` holds the escape flag of every parameter. A nested frame also
    /// receives the static link.
    fn new_frame(
        &self,
        ctx: &mut Context,
        name: Label,
        formals: &[bool],
        nested: bool,
    ) -> Self::Frame;

    /// Lowers a matched expression whose glued children already sit in registers.
    /// `dst` is `None` when the value is discarded.
    fn lower_expr(
        &self,
        e: &mut Emitter<'_, Self::Frame>,
        expr: Expr,
        dst: Option<Temp>,
    ) -> Result<(), Error>;

    fn lower_stmt(&self, e: &mut Emitter<'_, Self::Frame>, stmt: Stmt) -> Result<(), Error>;

    fn prologue(&self, e: &mut Emitter<'_, Self::Frame>) -> Result<(), Error>;

    fn epilogue(&self, e: &mut Emitter<'_, Self::Frame>, result: Option<Temp>);

    fn frame_prologue(&self, size: i64) -> Vec<Instruction>;

    fn frame_epilogue(&self, size: i64) -> Vec<Instruction>;

    /// Replaces the frame pointer of one allocated instruction by the stack pointer.
    fn implement_frame_pointer(&self, instruction: Instruction, size: i64)
        -> Result<Instruction, Error>;

    fn finish_function(
        &self,
        frame: &Self::Frame,
        code: Vec<Instruction>,
        is_main: bool,
    ) -> Vec<Instruction>;

    /// Moves `reg` to memory. Returns the rewritten code and the registers the
    /// rewrite introduced.
    fn spill_register(
        &self,
        ctx: &mut Context,
        frame: &mut Self::Frame,
        code: Vec<Instruction>,
        reg: Temp,
    ) -> (Vec<Instruction>, Vec<Temp>);

    fn translate_expression(
        &self,
        e: &mut Emitter<'_, Self::Frame>,
        mut expr: Expr,
        dst: Option<Temp>,
    ) -> Result<(), Error> {
        while let Expr::ESeq(stmt, inner) = expr {
            self.translate_statement(e, *stmt)?;
            expr = *inner;
        }

        let pattern = self.templates().find_expr(&expr).ok_or_else(|| {
            debug!("no template for expression {:?}", expr);
            Error::NoTemplate(expr.to_string())
        })?;
        let mut glued = Glued::new();
        let expr = pattern.instantiate(expr, e.ctx, &mut glued);
        for (temp, child) in glued {
            self.translate_expression(e, child, Some(temp))?;
        }

        self.lower_expr(e, expr, dst)
    }

    fn translate_statement(
        &self,
        e: &mut Emitter<'_, Self::Frame>,
        stmt: Stmt,
    ) -> Result<(), Error> {
        match stmt {
            Stmt::Seq(stmts) => {
                for stmt in stmts {
                    self.translate_statement(e, stmt)?;
                }
                Ok(())
            }
            Stmt::Expr(expr) => self.translate_expression(e, *expr, None),
            Stmt::Label(label) => {
                e.emit(Instruction::label(label));
                Ok(())
            }
            stmt => {
                let pattern = self.templates().find_stmt(&stmt).ok_or_else(|| {
                    debug!("no template for statement {:?}", stmt);
                    Error::NoTemplate(stmt.to_string())
                })?;
                let mut glued = Glued::new();
                let stmt = pattern.instantiate(stmt, e.ctx, &mut glued);
                for (temp, child) in glued {
                    self.translate_expression(e, child, Some(temp))?;
                }
                self.lower_stmt(e, stmt)
            }
        }
    }

    /// Selects instructions for a canonical body, surrounded by the prologue
    /// and epilogue. The frame pointer is still symbolic.
    fn translate_function(
        &self,
        ctx: &mut Context,
        frame: &mut Self::Frame,
        body: Body,
    ) -> Result<Vec<Instruction>, Error> {
        let mut e = Emitter::new(ctx, frame);
        self.prologue(&mut e)?;

        let result = match body {
            Body::Stmt(stmt) => {
                self.translate_statement(&mut e, stmt)?;
                None
            }
            Body::Expr(expr) => {
                let result = e.new_temp();
                self.translate_expression(&mut e, expr, Some(result))?;
                Some(result)
            }
        };

        self.epilogue(&mut e, result);
        Ok(e.finish())
    }

    /// Second pass once the frame stopped growing.
    fn implement_frame_size(
        &self,
        frame: &Self::Frame,
        code: Vec<Instruction>,
    ) -> Result<Vec<Instruction>, Error> {
        let size = frame.size();
        let mut result = self.frame_prologue(size);
        for instruction in code {
            result.push(self.implement_frame_pointer(instruction, size)?);
        }
        result.extend(self.frame_epilogue(size));
        Ok(result)
    }

    fn generate_function(
        &self,
        ctx: &mut Context,
        function: Function<Self::Frame>,
        is_main: bool,
        dump_ir: bool,
    ) -> Result<String, Error> {
        let Function {
            name,
            mut frame,
            body,
        } = function;
        let body = canon::canonicalize_body(ctx, body)?;

        let mut out = String::new();
        if dump_ir {
            let text = match &body {
                Body::Expr(expr) => expr.to_string(),
                Body::Stmt(stmt) => stmt.to_string(),
            };
            let _ = writeln!(out, "# {}", name);
            for line in text.lines() {
                let _ = writeln!(out, "#   {}", line);
            }
        }

        let code = self.translate_function(ctx, &mut frame, body)?;
        debug!("{}: {} instructions selected", name, code.len());

        let allocation = reg_alloc::alloc(self, ctx, &mut frame, code)?;
        let code = self.implement_frame_size(&frame, allocation.code)?;
        let code = self.finish_function(&frame, code, is_main);

        out.push_str(&asm::render_function(&code, &allocation.map, ctx)?);
        Ok(out)
    }

    fn generate_program(
        &self,
        ctx: &mut Context,
        program: Program<Self::Frame>,
        dump_ir: bool,
    ) -> Result<String, Error> {
        let mut out = format!(".text\n.global {}\n", Self::MAIN_SYMBOL);
        for function in program.functions {
            out.push_str(&self.generate_function(ctx, function, false, dump_ir)?);
        }
        out.push_str(&self.generate_function(ctx, program.main, true, dump_ir)?);
        out.push_str(&asm::render_blobs(ctx));
        Ok(out)
    }
}
