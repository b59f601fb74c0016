pub mod asm;
pub mod codegen;
pub mod common;
pub mod demo;
pub mod frame;
pub mod ir;

use std::io::{self, Write};

use thiserror::Error;

use crate::{
    codegen::{
        x86_64::{X86Frame, MAX_PALETTE, X86_64},
        Codegen,
    },
    common::Context,
    ir::Program,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("no instruction template matches:\n{0}")]
    NoTemplate(String),

    #[error("unexpected IR shape reached the target:\n{0}")]
    UnexpectedShape(String),

    #[error("invalid IR: {0}")]
    InvalidIr(String),

    #[error("malformed instruction `{0}`")]
    MalformedInstruction(String),

    #[error("unsupported addressing mode: {0}")]
    AddressMode(String),

    #[error("frame pointer is written by `{0}`")]
    FramePointerWrite(String),

    #[error("{first} and {second} are live together but both got {register}")]
    ColorConflict {
        first: String,
        second: String,
        register: String,
    },

    #[error("{0} was introduced by a spill and cannot be spilled again")]
    Unallocatable(String),

    #[error("unknown program `{0}`")]
    UnknownProgram(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct CompilerOptions {
    registers: usize,
    dump_ir: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        CompilerOptions {
            registers: MAX_PALETTE,
            dump_ir: false,
        }
    }
}

impl CompilerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets the allocator use only the first `registers` machine registers.
    pub fn registers(mut self, registers: usize) -> Self {
        self.registers = registers;
        self
    }

    /// Writes the canonical IR of every function as comments ahead of its code.
    pub fn dump_ir(mut self, dump_ir: bool) -> Self {
        self.dump_ir = dump_ir;
        self
    }
}

/// Compiles IR programs to x86-64 assembly.
///
/// Nothing is written unless the whole program compiles.
pub struct Compiler<W: Write> {
    w: W,
    options: CompilerOptions,
}

impl<W: Write> Compiler<W> {
    pub fn new(w: W) -> Self {
        Compiler {
            w,
            options: CompilerOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CompilerOptions) -> Self {
        self.options = options;
        self
    }

    /// Compiles one of [`demo::PROGRAMS`].
    pub fn compile(self, program: &str) -> Result<(), Error> {
        self.compile_with(|target, ctx| demo::program(target, ctx, program))
    }

    /// Compiles the program `build` creates for the target.
    pub fn compile_with<B>(mut self, build: B) -> Result<(), Error>
    where
        B: FnOnce(&X86_64, &mut Context) -> Result<Program<X86Frame>, Error>,
    {
        let mut ctx = Context::new();
        let target = X86_64::new(&mut ctx, self.options.registers);
        let program = build(&target, &mut ctx)?;

        let asm = target.generate_program(&mut ctx, program, self.options.dump_ir)?;
        self.w.write_all(asm.as_bytes())?;
        self.w.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_writes_assembly() {
        let mut out = Vec::new();
        Compiler::new(&mut out).compile("arith").unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with(".text\n.global main\n"));
        assert!(text.contains("main:"));
        assert!(text.contains(".section\t.rodata"));
    }

    #[test]
    fn test_failed_compile_writes_nothing() {
        let mut out = Vec::new();
        let result = Compiler::new(&mut out).compile("missing");
        assert!(matches!(result, Err(Error::UnknownProgram(_))));
        assert!(out.is_empty());
    }

    struct Full;

    impl Write for Full {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::WriteZero, "full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_failure_is_io_error() {
        let result = Compiler::new(Full).compile("arith");
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_dump_ir_is_commented() {
        let mut out = Vec::new();
        Compiler::new(&mut out)
            .with_options(CompilerOptions::new().dump_ir(true))
            .compile("loop")
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("# main\n"));
        assert!(text
            .lines()
            .skip_while(|line| !line.starts_with("# main"))
            .take_while(|line| line.starts_with('#'))
            .count() > 1);
    }
}
