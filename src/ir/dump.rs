use std::fmt::{self, Display, Formatter};

use super::{BinOp, Expr, RelOp, Stmt};

const INDENT: usize = 2;

fn line(f: &mut Formatter<'_>, depth: usize, text: impl Display) -> fmt::Result {
    writeln!(f, "{:width$}{}", "", text, width = depth * INDENT)
}

fn write_expr(f: &mut Formatter<'_>, expr: &Expr, depth: usize) -> fmt::Result {
    match expr {
        Expr::Const(v) => line(f, depth, format_args!("CONST {}", v)),
        Expr::Name(l) => line(f, depth, format_args!("NAME {}", l)),
        Expr::Temp(t) => line(f, depth, format_args!("TEMP {}", t)),
        Expr::BinOp(op, lhs, rhs) => {
            line(f, depth, format_args!("BINOP {}", binop_name(*op)))?;
            write_expr(f, lhs, depth + 1)?;
            write_expr(f, rhs, depth + 1)
        }
        Expr::Mem(addr) => {
            line(f, depth, "MEM")?;
            write_expr(f, addr, depth + 1)
        }
        Expr::Call(callee, args, static_link) => {
            line(f, depth, "CALL")?;
            write_expr(f, callee, depth + 1)?;
            if let Some(link) = static_link {
                line(f, depth + 1, "STATIC LINK")?;
                write_expr(f, link, depth + 2)?;
            }
            for arg in args {
                write_expr(f, arg, depth + 1)?;
            }
            Ok(())
        }
        Expr::ESeq(stmt, expr) => {
            line(f, depth, "ESEQ")?;
            write_stmt(f, stmt, depth + 1)?;
            write_expr(f, expr, depth + 1)
        }
    }
}

fn write_stmt(f: &mut Formatter<'_>, stmt: &Stmt, depth: usize) -> fmt::Result {
    match stmt {
        Stmt::Move(dst, src) => {
            line(f, depth, "MOVE")?;
            write_expr(f, dst, depth + 1)?;
            write_expr(f, src, depth + 1)
        }
        Stmt::Expr(e) => {
            line(f, depth, "EXP")?;
            write_expr(f, e, depth + 1)
        }
        Stmt::Jump(dst, labels) => {
            let targets: Vec<String> = labels.iter().map(|l| l.to_string()).collect();
            line(f, depth, format_args!("JUMP [{}]", targets.join(", ")))?;
            write_expr(f, dst, depth + 1)
        }
        Stmt::CJump(op, lhs, rhs, t, fl) => {
            line(
                f,
                depth,
                format_args!("CJUMP {} {} {}", relop_name(*op), t, fl),
            )?;
            write_expr(f, lhs, depth + 1)?;
            write_expr(f, rhs, depth + 1)
        }
        Stmt::Seq(stmts) => {
            line(f, depth, "SEQ")?;
            for s in stmts {
                write_stmt(f, s, depth + 1)?;
            }
            Ok(())
        }
        Stmt::Label(l) => line(f, depth, format_args!("LABEL {}", l)),
    }
}

fn binop_name(op: BinOp) -> &'static str {
    match op {
        BinOp::Plus => "PLUS",
        BinOp::Minus => "MINUS",
        BinOp::Mul => "MUL",
        BinOp::Div => "DIV",
        BinOp::And => "AND",
        BinOp::Or => "OR",
        BinOp::XOr => "XOR",
    }
}

fn relop_name(op: RelOp) -> &'static str {
    match op {
        RelOp::Eq => "EQUAL",
        RelOp::Ne => "NONEQUAL",
        RelOp::Lt => "LESS",
        RelOp::Le => "LESSEQUAL",
        RelOp::Gt => "GREATER",
        RelOp::Ge => "GREATEQUAL",
        RelOp::Ult => "ULESS",
        RelOp::Ule => "ULESSEQUAL",
        RelOp::Ugt => "UGREATER",
        RelOp::Uge => "UGREATEQUAL",
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write_expr(f, self, 0)
    }
}

impl Display for Stmt {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write_stmt(f, self, 0)
    }
}
