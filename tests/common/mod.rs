//! A small x86-64 interpreter for the assembly the compiler renders.
//!
//! It understands the subset of AT&T syntax the x86-64 target emits. Calls to
//! `trace` record `%rdi` and clobber every caller-save register. Calls to the
//! program's own labels check stack alignment and callee-save preservation.
#![allow(dead_code)]

use std::collections::HashMap;

use anyhow::{anyhow, bail, ensure, Context as _, Result};
use tiger_backend::{
    codegen::x86_64::{X86Frame, X86_64},
    common::Context,
    ir::Program,
    Compiler, CompilerOptions,
};

const STACK_TOP: i64 = 0x7fff_0000;
const DATA_START: i64 = 0x1000_0000;
const RETURN_TO_HOST: i64 = -1;
const STEP_LIMIT: usize = 1_000_000;
const POISON: i64 = 0x5eed_0000_0bad;

const CALLER_SAVE: [&str; 9] = [
    "rdi", "rsi", "rdx", "rcx", "r8", "r9", "rax", "r10", "r11",
];
const CALLEE_SAVE: [&str; 6] = ["rbx", "rbp", "r12", "r13", "r14", "r15"];
const ALL_REGISTERS: [&str; 16] = [
    "rax", "rdx", "rcx", "rbx", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12", "r13", "r14",
    "r15", "rbp", "rsp",
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operand {
    Imm(i64),
    Reg(String),
    Mem { base: String, disp: i64 },
    Rip(String),
    Label(String),
    Indirect(String),
}

#[derive(Debug, Clone)]
struct Line {
    mnemonic: String,
    operands: Vec<Operand>,
    text: String,
}

#[derive(Debug)]
pub struct Run {
    pub traces: Vec<i64>,
    pub rax: i64,
    pub steps: usize,
}

struct Frame {
    return_to: i64,
    callee_save: Vec<i64>,
    rsp: i64,
}

struct Machine {
    code: Vec<Line>,
    labels: HashMap<String, usize>,
    data: HashMap<String, i64>,
    data_end: i64,
    regs: HashMap<String, i64>,
    memory: HashMap<i64, i64>,
    cmp: (i64, i64),
    frames: Vec<Frame>,
    traces: Vec<i64>,
}

fn parse_register(text: &str) -> Result<String> {
    let name = text
        .strip_prefix('%')
        .ok_or_else(|| anyhow!("expected a register, found `{}`", text))?;
    ensure!(
        ALL_REGISTERS.contains(&name),
        "unknown register `{}`",
        text
    );
    Ok(name.to_string())
}

fn parse_operand(text: &str) -> Result<Operand> {
    let text = text.trim();
    if let Some(imm) = text.strip_prefix('$') {
        return Ok(Operand::Imm(imm.parse().context("bad immediate")?));
    }
    if let Some(reg) = text.strip_prefix("*") {
        return Ok(Operand::Indirect(parse_register(reg)?));
    }
    if text.starts_with('%') {
        return Ok(Operand::Reg(parse_register(text)?));
    }
    if let Some(open) = text.find('(') {
        let inner = text[open + 1..]
            .strip_suffix(')')
            .ok_or_else(|| anyhow!("unbalanced memory operand `{}`", text))?;
        let prefix = &text[..open];
        if inner == "%rip" {
            return Ok(Operand::Rip(prefix.to_string()));
        }
        let disp = if prefix.is_empty() {
            0
        } else {
            prefix.parse().context("bad displacement")?
        };
        return Ok(Operand::Mem {
            base: parse_register(inner)?,
            disp,
        });
    }
    Ok(Operand::Label(text.to_string()))
}

/// Lays a finished blob out in memory, zero-padded to whole words.
fn flush_blob(blob: &mut Option<(i64, Vec<u8>)>, memory: &mut HashMap<i64, i64>) {
    if let Some((addr, mut bytes)) = blob.take() {
        while bytes.len() % 8 != 0 {
            bytes.push(0);
        }
        for (n, word) in bytes.chunks(8).enumerate() {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(word);
            memory.insert(addr + 8 * n as i64, i64::from_le_bytes(buf));
        }
    }
}

impl Machine {
    fn load(asm: &str) -> Result<Machine> {
        let mut code = Vec::new();
        let mut labels = HashMap::new();
        let mut data = HashMap::new();
        let mut memory = HashMap::new();
        let mut in_data = false;
        let mut blob: Option<(i64, Vec<u8>)> = None;
        let mut next_data = DATA_START;

        for raw in asm.lines() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            if let Some(label) = line.strip_suffix(':') {
                if in_data {
                    flush_blob(&mut blob, &mut memory);
                    data.insert(label.to_string(), next_data);
                    blob = Some((next_data, Vec::new()));
                } else {
                    ensure!(
                        labels.insert(label.to_string(), code.len()).is_none(),
                        "duplicate label {}",
                        label
                    );
                }
                continue;
            }

            let (mnemonic, rest) = match line.split_once(char::is_whitespace) {
                Some((m, rest)) => (m, rest.trim()),
                None => (line, ""),
            };
            match mnemonic {
                ".text" | ".global" | ".globl" => {}
                ".section" => in_data = true,
                ".byte" => {
                    let value = rest.trim_start_matches("0x");
                    let byte = u8::from_str_radix(value, 16).context("bad byte")?;
                    let (start, bytes) = blob
                        .as_mut()
                        .ok_or_else(|| anyhow!("`.byte` outside a blob"))?;
                    bytes.push(byte);
                    next_data = (*start + bytes.len() as i64 + 7) / 8 * 8;
                }
                m if m.starts_with('.') => bail!("unknown directive {}", m),
                _ => {
                    let operands = if rest.is_empty() {
                        vec![]
                    } else {
                        rest.split(',')
                            .map(parse_operand)
                            .collect::<Result<_>>()
                            .with_context(|| format!("in `{}`", line))?
                    };
                    code.push(Line {
                        mnemonic: mnemonic.to_string(),
                        operands,
                        text: line.to_string(),
                    });
                }
            }
        }
        flush_blob(&mut blob, &mut memory);

        let regs = ALL_REGISTERS
            .iter()
            .enumerate()
            .map(|(n, r)| (r.to_string(), POISON + n as i64))
            .collect();

        Ok(Machine {
            code,
            labels,
            data,
            data_end: next_data,
            regs,
            memory,
            cmp: (0, 0),
            frames: Vec::new(),
            traces: Vec::new(),
        })
    }

    fn reg(&self, name: &str) -> i64 {
        self.regs[name]
    }

    fn set_reg(&mut self, name: &str, value: i64) {
        self.regs.insert(name.to_string(), value);
    }

    fn address(&self, operand: &Operand) -> Result<i64> {
        match operand {
            Operand::Mem { base, disp } => Ok(self.reg(base).wrapping_add(*disp)),
            Operand::Rip(label) => self
                .data
                .get(label)
                .copied()
                .ok_or_else(|| anyhow!("unknown data label {}", label)),
            _ => bail!("{:?} is not a memory operand", operand),
        }
    }

    fn read_memory(&self, addr: i64) -> Result<i64> {
        ensure!(addr % 8 == 0, "unaligned read at {:#x}", addr);
        self.memory
            .get(&addr)
            .copied()
            .ok_or_else(|| anyhow!("read of uninitialized memory at {:#x}", addr))
    }

    fn write_memory(&mut self, addr: i64, value: i64) -> Result<()> {
        ensure!(addr % 8 == 0, "unaligned write at {:#x}", addr);
        ensure!(
            addr < DATA_START || addr >= self.data_end,
            "write to read-only data at {:#x}",
            addr
        );
        self.memory.insert(addr, value);
        Ok(())
    }

    fn read(&self, operand: &Operand) -> Result<i64> {
        match operand {
            Operand::Imm(value) => Ok(*value),
            Operand::Reg(name) => Ok(self.reg(name)),
            Operand::Mem { .. } | Operand::Rip(_) => self.read_memory(self.address(operand)?),
            _ => bail!("cannot read {:?}", operand),
        }
    }

    fn write(&mut self, operand: &Operand, value: i64) -> Result<()> {
        match operand {
            Operand::Reg(name) => {
                self.set_reg(name, value);
                Ok(())
            }
            Operand::Mem { .. } => {
                let addr = self.address(operand)?;
                self.write_memory(addr, value)
            }
            _ => bail!("cannot write {:?}", operand),
        }
    }

    fn push(&mut self, value: i64) -> Result<()> {
        let rsp = self.reg("rsp") - 8;
        self.set_reg("rsp", rsp);
        self.write_memory(rsp, value)
    }

    fn target(&self, label: &str) -> Result<usize> {
        self.labels
            .get(label)
            .copied()
            .ok_or_else(|| anyhow!("unknown label {}", label))
    }

    fn condition(&self, mnemonic: &str) -> Option<bool> {
        let (lhs, rhs) = self.cmp;
        let (ulhs, urhs) = (lhs as u64, rhs as u64);
        Some(match mnemonic {
            "je" => lhs == rhs,
            "jne" => lhs != rhs,
            "jl" => lhs < rhs,
            "jle" => lhs <= rhs,
            "jg" => lhs > rhs,
            "jge" => lhs >= rhs,
            "jb" => ulhs < urhs,
            "jbe" => ulhs <= urhs,
            "ja" => ulhs > urhs,
            "jae" => ulhs >= urhs,
            _ => return None,
        })
    }

    fn enter(&mut self, return_to: i64, pc: usize) -> Result<usize> {
        ensure!(
            self.reg("rsp") % 16 == 0,
            "misaligned stack at call {}",
            self.code[pc].text
        );
        self.push(return_to)?;
        let callee_save = CALLEE_SAVE.iter().map(|r| self.reg(r)).collect();
        self.frames.push(Frame {
            return_to,
            callee_save,
            rsp: self.reg("rsp"),
        });
        Ok(pc)
    }

    fn trace(&mut self) {
        self.traces.push(self.reg("rdi"));
        for (n, r) in CALLER_SAVE.iter().enumerate() {
            self.set_reg(r, POISON - n as i64);
        }
    }

    /// Runs from `entry` until it returns to the host.
    fn run(mut self, entry: &str) -> Result<Run> {
        let mut pc = self.target(entry)?;
        self.set_reg("rsp", STACK_TOP);
        self.enter(RETURN_TO_HOST, pc)?;
        let mut steps = 0;

        loop {
            steps += 1;
            ensure!(steps <= STEP_LIMIT, "step limit exceeded");
            let line = self
                .code
                .get(pc)
                .cloned()
                .ok_or_else(|| anyhow!("fell off the end of the code"))?;
            let ops = &line.operands;
            let mut next = pc + 1;

            match (line.mnemonic.as_str(), ops.as_slice()) {
                ("movq" | "movabsq", [src, dst]) => {
                    let value = self.read(src)?;
                    self.write(dst, value)?;
                }
                ("leaq", [src, dst]) => {
                    let addr = self.address(src)?;
                    self.write(dst, addr)?;
                }
                (op @ ("addq" | "subq" | "andq" | "orq" | "xorq"), [src, dst]) => {
                    let (a, b) = (self.read(dst)?, self.read(src)?);
                    let value = match op {
                        "addq" => a.wrapping_add(b),
                        "subq" => a.wrapping_sub(b),
                        "andq" => a & b,
                        "orq" => a | b,
                        _ => a ^ b,
                    };
                    self.write(dst, value)?;
                }
                ("imulq", [src]) => {
                    let product = self.reg("rax") as i128 * self.read(src)? as i128;
                    self.set_reg("rax", product as i64);
                    self.set_reg("rdx", (product >> 64) as i64);
                }
                ("cqo", []) => {
                    let sign = if self.reg("rax") < 0 { -1 } else { 0 };
                    self.set_reg("rdx", sign);
                }
                ("idivq", [src]) => {
                    let divisor = self.read(src)? as i128;
                    ensure!(divisor != 0, "division by zero");
                    let dividend =
                        ((self.reg("rdx") as i128) << 64) | (self.reg("rax") as u64 as i128);
                    let quotient = i64::try_from(dividend / divisor)
                        .map_err(|_| anyhow!("division overflow"))?;
                    self.set_reg("rax", quotient);
                    self.set_reg("rdx", (dividend % divisor) as i64);
                }
                ("cmpq", [src, dst]) => self.cmp = (self.read(dst)?, self.read(src)?),
                ("jmp", [Operand::Label(label)]) => next = self.target(label)?,
                (jcc, [Operand::Label(label)]) if self.condition(jcc).is_some() => {
                    if self.condition(jcc) == Some(true) {
                        next = self.target(label)?;
                    }
                }
                ("call", [Operand::Label(label)]) if label == "trace" => {
                    ensure!(self.reg("rsp") % 16 == 0, "misaligned stack at trace");
                    self.trace();
                }
                ("call", [Operand::Label(label)]) => {
                    let callee = self.target(label)?;
                    next = self.enter(pc as i64 + 1, callee)?;
                }
                ("ret", []) => {
                    let frame = self
                        .frames
                        .pop()
                        .ok_or_else(|| anyhow!("return without a call"))?;
                    let rsp = self.reg("rsp");
                    ensure!(rsp == frame.rsp, "stack pointer not restored at ret");
                    ensure!(self.read_memory(rsp)? == frame.return_to, "return address clobbered");
                    for (r, value) in CALLEE_SAVE.iter().zip(&frame.callee_save) {
                        ensure!(self.reg(r) == *value, "callee-save %{} not restored", r);
                    }
                    self.set_reg("rsp", rsp + 8);
                    if frame.return_to == RETURN_TO_HOST {
                        let rax = self.reg("rax");
                        return Ok(Run {
                            traces: self.traces,
                            rax,
                            steps,
                        });
                    }
                    next = frame.return_to as usize;
                }
                _ => bail!("unsupported instruction `{}`", line.text),
            }
            pc = next;
        }
    }
}

/// Runs `main`.
pub fn run(asm: &str) -> Result<Run> {
    Machine::load(asm)?.run("main")
}

/// Runs one function on its own and returns what it left in `%rax`.
pub fn run_function(asm: &str, label: &str) -> Result<Run> {
    Machine::load(asm)?.run(label)
}

pub fn compile(program: &str, registers: usize) -> Result<String> {
    compile_with(registers, |target, ctx| {
        tiger_backend::demo::program(target, ctx, program)
    })
}

pub fn compile_with<B>(registers: usize, build: B) -> Result<String>
where
    B: FnOnce(&X86_64, &mut Context) -> Result<Program<X86Frame>, tiger_backend::Error>,
{
    let mut out = Vec::new();
    Compiler::new(&mut out)
        .with_options(CompilerOptions::new().registers(registers))
        .compile_with(build)?;
    Ok(String::from_utf8(out)?)
}

/// The lines of one function, from its label to the next function label.
pub fn function_body<'a>(asm: &'a str, label: &str) -> Vec<&'a str> {
    let head = format!("{}:", label);
    asm.lines()
        .skip_while(|line| !line.starts_with(&head))
        .skip(1)
        .take_while(|line| line.starts_with(' ') || line.starts_with(".L"))
        .collect()
}
