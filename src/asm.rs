use std::{collections::HashMap, fmt::Write as _};

use itertools::Itertools;

use crate::{
    common::{Context, Label, Temp},
    Error,
};

/// Virtual register to machine register.
pub type RegisterMap = HashMap<Temp, Temp>;

const COMMENT_COLUMN: usize = 35;

/// One target instruction. `notation` is the assembly text with `&iN` and
/// `&oN` standing for `inputs[N]` and `outputs[N]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub notation: String,
    pub inputs: Vec<Temp>,
    pub outputs: Vec<Temp>,
    pub is_move: bool,
    /// Successors. Empty means the next instruction; `None` in a non-empty
    /// list also means the next instruction.
    pub destinations: Vec<Option<Label>>,
    pub label: Option<Label>,
}

impl Instruction {
    pub fn oper(notation: impl Into<String>, inputs: Vec<Temp>, outputs: Vec<Temp>) -> Self {
        Instruction {
            notation: notation.into(),
            inputs,
            outputs,
            is_move: false,
            destinations: Vec::new(),
            label: None,
        }
    }

    /// Register to register copy, a coalescing candidate.
    pub fn mov(notation: impl Into<String>, src: Temp, dst: Temp) -> Self {
        Instruction {
            is_move: true,
            ..Self::oper(notation, vec![src], vec![dst])
        }
    }

    pub fn label(label: Label) -> Self {
        Instruction {
            label: Some(label.clone()),
            ..Self::oper(format!("{}:", label), Vec::new(), Vec::new())
        }
    }

    pub fn jump(
        notation: impl Into<String>,
        inputs: Vec<Temp>,
        destinations: Vec<Option<Label>>,
    ) -> Self {
        Instruction {
            destinations,
            ..Self::oper(notation, inputs, Vec::new())
        }
    }

    pub fn input(&self, n: usize) -> Option<Temp> {
        self.inputs.get(n).copied()
    }

    pub fn output(&self, n: usize) -> Option<Temp> {
        self.outputs.get(n).copied()
    }

    /// Substitutes every placeholder with the name of the mapped register.
    pub fn render(&self, map: &RegisterMap, ctx: &Context) -> Result<String, Error> {
        let mut result = String::with_capacity(self.notation.len());
        let mut chars = self.notation.char_indices().peekable();

        while let Some((_, c)) = chars.next() {
            let kind = match (c, chars.peek()) {
                ('&', Some(&(_, k @ ('i' | 'o')))) => k,
                _ => {
                    result.push(c);
                    continue;
                }
            };
            chars.next();

            let mut digits = String::new();
            while let Some(&(_, d)) = chars.peek() {
                if !d.is_ascii_digit() {
                    break;
                }
                digits.push(d);
                chars.next();
            }
            let index: usize = digits
                .parse()
                .map_err(|_| Error::MalformedInstruction(self.notation.clone()))?;

            let temp = if kind == 'i' {
                self.input(index)
            } else {
                self.output(index)
            }
            .ok_or_else(|| Error::MalformedInstruction(self.notation.clone()))?;

            let register = map
                .get(&temp)
                .ok_or_else(|| Error::MalformedInstruction(self.notation.clone()))?;
            result.push_str(&ctx.temp_name(*register));
        }

        Ok(result)
    }

    /// True for a register copy that the allocation turned into a no-op.
    fn is_self_move(&self, map: &RegisterMap) -> bool {
        match (self.is_move, self.input(0), self.output(0)) {
            (true, Some(src), Some(dst)) => {
                matches!((map.get(&src), map.get(&dst)), (Some(a), Some(b)) if a == b)
            }
            _ => false,
        }
    }
}

/// Renders one function's code as assembly text with a trailing comment on
/// every line describing its register use.
pub fn render_function(
    code: &[Instruction],
    map: &RegisterMap,
    ctx: &Context,
) -> Result<String, Error> {
    let mut out = String::new();

    for (idx, instruction) in code.iter().enumerate() {
        if instruction.is_self_move(map) {
            continue;
        }

        let text = instruction.render(map, ctx)?;
        let mut line = if text.ends_with(':') {
            text
        } else {
            format!("    {}", text)
        };
        if line.len() < COMMENT_COLUMN {
            line.push_str(&" ".repeat(COMMENT_COLUMN - line.len()));
        }

        let _ = write!(line, " # {:2} ", idx);
        if instruction.is_move {
            line.push_str("MOVE ");
        }
        if instruction.inputs.is_empty() && instruction.outputs.is_empty() {
            line.push_str("no register use");
        } else {
            if !instruction.inputs.is_empty() {
                let _ = write!(
                    line,
                    "<- {} ",
                    instruction.inputs.iter().map(|t| ctx.temp_name(*t)).join(" ")
                );
            }
            if !instruction.outputs.is_empty() {
                let _ = write!(
                    line,
                    "-> {} ",
                    instruction.outputs.iter().map(|t| ctx.temp_name(*t)).join(" ")
                );
            }
        }

        out.push_str(line.trim_end());
        out.push('\n');
    }

    Ok(out)
}

/// Read-only data section holding every blob of the program.
pub fn render_blobs(ctx: &Context) -> String {
    if ctx.blobs().is_empty() {
        return String::new();
    }

    let mut out = String::from(".section\t.rodata\n");
    for (label, bytes) in ctx.blobs() {
        let _ = writeln!(out, "{}:", label);
        for byte in bytes {
            let _ = writeln!(out, "    .byte 0x{:x}", byte);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn setup() -> (Context, Temp, Temp, Temp, RegisterMap) {
        let mut ctx = Context::new();
        let rax = ctx.named_temp("%rax");
        let a = ctx.new_temp();
        let b = ctx.new_temp();
        let map = RegisterMap::from([(rax, rax), (a, rax), (b, rax)]);
        (ctx, rax, a, b, map)
    }

    #[test]
    fn test_render_substitutes_placeholders() {
        let (ctx, _, a, b, map) = setup();
        let instruction = Instruction::oper("addq &i0, &o0", vec![a, b], vec![b]);
        assert_eq!(instruction.render(&map, &ctx).unwrap(), "addq %rax, %rax");
    }

    #[test]
    fn test_render_rejects_missing_operand() {
        let (ctx, _, a, _, map) = setup();
        let instruction = Instruction::oper("movq &i1, &o0", vec![a], vec![a]);
        assert!(matches!(
            instruction.render(&map, &ctx),
            Err(Error::MalformedInstruction(_))
        ));
    }

    #[test]
    fn test_render_function_skips_self_moves() {
        let (mut ctx, _, a, b, map) = setup();
        let label = ctx.new_label();
        let code = vec![
            Instruction::label(label),
            Instruction::mov("movq &i0, &o0", a, b),
            Instruction::oper("movq $4, &o0", vec![], vec![a]),
            Instruction::oper("ret", vec![], vec![]),
        ];

        let text = render_function(&code, &map, &ctx).unwrap();

        let expected = "\
.L0:                                #  0 no register use
    movq $4, %rax                   #  2 -> t1
    ret                             #  3 no register use
";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_render_blobs() {
        let mut ctx = Context::new();
        ctx.add_blob(b"ok".to_vec());
        assert_eq!(
            render_blobs(&ctx),
            ".section\t.rodata\n.L0:\n    .byte 0x6f\n    .byte 0x6b\n"
        );
    }
}
