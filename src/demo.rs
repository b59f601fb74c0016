//! Sample programs in IR form, built for any target.
//!
//! Every program reports its results through the external `trace` routine,
//! which receives one integer argument.

use crate::{
    codegen::Codegen,
    common::{Context, Label, Temp},
    frame::{Access, Frame},
    ir::{BinOp, Body, Expr, Function, Program, RelOp, Stmt},
    Error,
};

pub const PROGRAMS: [&str; 6] = ["arith", "nested", "order", "loop", "args", "pressure"];

/// The name of the routine every program reports its values to.
pub const TRACE_SYMBOL: &str = "trace";

pub fn program<C: Codegen>(
    target: &C,
    ctx: &mut Context,
    name: &str,
) -> Result<Program<C::Frame>, Error> {
    match name {
        "arith" => Ok(arith(target, ctx)),
        "nested" => nested(target, ctx),
        "order" => order(target, ctx),
        "loop" => Ok(loops(target, ctx)),
        "args" => args(target, ctx),
        "pressure" => Ok(pressure(target, ctx)),
        _ => Err(Error::UnknownProgram(name.to_string())),
    }
}

pub fn trace(value: Expr) -> Stmt {
    Stmt::expr(Expr::call(
        Expr::Name(Label::with_named_fn(TRACE_SYMBOL)),
        vec![value],
    ))
}

pub fn main_function<C: Codegen>(
    target: &C,
    ctx: &mut Context,
    body: Vec<Stmt>,
) -> Function<C::Frame> {
    let name = Label::with_named_fn(C::MAIN_SYMBOL);
    let frame = target.new_frame(ctx, name.clone(), &[], false);
    Function {
        name,
        frame,
        body: Body::Stmt(Stmt::seq(body)),
    }
}

fn bin(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::binop(op, lhs, rhs)
}

fn temps(ctx: &mut Context, n: usize) -> Vec<Temp> {
    (0..n).map(|_| ctx.new_temp()).collect()
}

/// Value of the `n`th parameter seen from inside its own function.
fn param<F: Frame>(frame: &F, n: usize) -> Result<Expr, Error> {
    let access = frame
        .formals()
        .get(n)
        .copied()
        .ok_or_else(|| Error::InvalidIr(format!("{} has no parameter {}", frame.name(), n)))?;
    Ok(F::exp(access, Expr::Temp(frame.frame_pointer())))
}

fn parent_frame_pointer<F: Frame>(frame: &F) -> Result<Temp, Error> {
    frame
        .parent_frame_pointer()
        .ok_or_else(|| Error::InvalidIr(format!("{} has no static link", frame.name())))
}

/// Every operator over 2, 3 and 4, plus a wide constant and a word of read-only data.
fn arith<C: Codegen>(target: &C, ctx: &mut Context) -> Program<C::Frame> {
    let t = temps(ctx, 3);
    let (a, b, c) = (Expr::Temp(t[0]), Expr::Temp(t[1]), Expr::Temp(t[2]));
    let answer = ctx.add_blob(42i64.to_le_bytes());

    let body = vec![
        Stmt::mov(a.clone(), Expr::Const(2)),
        Stmt::mov(b.clone(), Expr::Const(3)),
        Stmt::mov(c.clone(), Expr::Const(4)),
        // 14
        trace(bin(
            BinOp::Plus,
            a.clone(),
            bin(BinOp::Mul, b.clone(), c.clone()),
        )),
        // 65
        trace(bin(
            BinOp::Div,
            bin(
                BinOp::Minus,
                bin(BinOp::Mul, a.clone(), Expr::Const(100)),
                c.clone(),
            ),
            b.clone(),
        )),
        // -6, division truncates towards zero
        trace(bin(
            BinOp::Div,
            bin(
                BinOp::Minus,
                a.clone(),
                bin(BinOp::Mul, c.clone(), Expr::Const(5)),
            ),
            b.clone(),
        )),
        trace(bin(BinOp::Minus, a.clone(), c.clone())),
        trace(bin(BinOp::XOr, a.clone(), c.clone())),
        trace(bin(BinOp::And, b.clone(), c.clone())),
        trace(bin(BinOp::Or, a.clone(), b)),
        trace(bin(BinOp::Plus, Expr::Const(1 << 40), a)),
        trace(Expr::mem(Expr::Name(answer))),
    ];

    Program {
        functions: vec![],
        main: main_function(target, ctx, body),
    }
}

/// `outer` keeps an escaping local that `inner` reads through its static
/// link and `deep` reads through two of them.
fn nested<C: Codegen>(target: &C, ctx: &mut Context) -> Result<Program<C::Frame>, Error> {
    let outer_name = ctx.fn_label("outer");
    let inner_name = ctx.fn_label("inner");
    let deep_name = ctx.fn_label("deep");

    let mut outer = target.new_frame(ctx, outer_name.clone(), &[false], false);
    let inner = target.new_frame(ctx, inner_name.clone(), &[false], true);
    let deep = target.new_frame(ctx, deep_name.clone(), &[], true);

    let y = outer.alloc_local(ctx, true);
    let outer_fp = Expr::Temp(outer.frame_pointer());
    let outer_body = Expr::eseq(
        Stmt::mov(
            C::Frame::exp(y, outer_fp.clone()),
            bin(BinOp::Plus, param(&outer, 0)?, Expr::Const(1)),
        ),
        Expr::call_nested(Expr::Name(inner_name.clone()), vec![Expr::Const(10)], outer_fp),
    );

    let inner_link = parent_frame_pointer(&inner)?;
    let inner_body = Expr::eseq(
        trace(Expr::call_nested(
            Expr::Name(deep_name.clone()),
            vec![],
            Expr::Temp(inner.frame_pointer()),
        )),
        bin(
            BinOp::Plus,
            C::Frame::exp(y, Expr::Temp(inner_link)),
            param(&inner, 0)?,
        ),
    );

    let deep_link = parent_frame_pointer(&deep)?;
    let link_slot = inner
        .prespilled(inner_link)
        .ok_or_else(|| Error::InvalidIr(format!("{} keeps no static link slot", inner_name)))?;
    let outer_fp_from_deep = C::Frame::exp(Access::InFrame(link_slot), Expr::Temp(deep_link));
    let deep_body = C::Frame::exp(y, outer_fp_from_deep);

    let functions = vec![
        Function {
            name: outer_name.clone(),
            frame: outer,
            body: Body::Expr(outer_body),
        },
        Function {
            name: inner_name,
            frame: inner,
            body: Body::Expr(inner_body),
        },
        Function {
            name: deep_name,
            frame: deep,
            body: Body::Expr(deep_body),
        },
    ];
    let body = vec![trace(Expr::call(
        Expr::Name(outer_name),
        vec![Expr::Const(30)],
    ))];

    Ok(Program {
        functions,
        main: main_function(target, ctx, body),
    })
}

/// Side effects inside operands must happen left to right.
fn order<C: Codegen>(target: &C, ctx: &mut Context) -> Result<Program<C::Frame>, Error> {
    let echo_name = ctx.fn_label("echo");
    let echo = target.new_frame(ctx, echo_name.clone(), &[false], false);
    let x = param(&echo, 0)?;
    let echo_body = Expr::eseq(trace(x.clone()), x);

    let echo_of = |n| Expr::call(Expr::Name(echo_name.clone()), vec![Expr::Const(n)]);
    let body = vec![
        trace(bin(BinOp::Plus, echo_of(1), echo_of(2))),
        trace(bin(
            BinOp::Minus,
            Expr::eseq(trace(Expr::Const(3)), Expr::Const(10)),
            echo_of(4),
        )),
    ];

    Ok(Program {
        functions: vec![Function {
            name: echo_name.clone(),
            frame: echo,
            body: Body::Expr(echo_body),
        }],
        main: main_function(target, ctx, body),
    })
}

/// A counted sum and an unsigned bounded loop.
fn loops<C: Codegen>(target: &C, ctx: &mut Context) -> Program<C::Frame> {
    let t = temps(ctx, 3);
    let (i, sum, k) = (Expr::Temp(t[0]), Expr::Temp(t[1]), Expr::Temp(t[2]));
    let (test, body, done) = (ctx.new_label(), ctx.new_label(), ctx.new_label());
    let (test2, body2, done2) = (ctx.new_label(), ctx.new_label(), ctx.new_label());

    let stmts = vec![
        Stmt::mov(i.clone(), Expr::Const(1)),
        Stmt::mov(sum.clone(), Expr::Const(0)),
        Stmt::Label(test.clone()),
        Stmt::cjump(
            RelOp::Le,
            i.clone(),
            Expr::Const(10),
            body.clone(),
            done.clone(),
        ),
        Stmt::Label(body),
        Stmt::mov(sum.clone(), bin(BinOp::Plus, sum.clone(), i.clone())),
        Stmt::mov(i.clone(), bin(BinOp::Plus, i, Expr::Const(1))),
        Stmt::jump(test),
        Stmt::Label(done),
        trace(sum),
        Stmt::mov(k.clone(), Expr::Const(0)),
        Stmt::Label(test2.clone()),
        Stmt::cjump(
            RelOp::Ult,
            k.clone(),
            Expr::Const(3),
            body2.clone(),
            done2.clone(),
        ),
        Stmt::Label(body2),
        trace(bin(BinOp::Mul, k.clone(), k.clone())),
        Stmt::mov(k.clone(), bin(BinOp::Plus, k, Expr::Const(1))),
        Stmt::jump(test2),
        Stmt::Label(done2),
    ];

    Program {
        functions: vec![],
        main: main_function(target, ctx, stmts),
    }
}

/// Eight arguments: two of them travel on the stack.
fn args<C: Codegen>(target: &C, ctx: &mut Context) -> Result<Program<C::Frame>, Error> {
    let name = ctx.fn_label("sum8");
    let frame = target.new_frame(ctx, name.clone(), &[false; 8], false);

    let mut sum = param(&frame, 0)?;
    for n in 1..8 {
        sum = bin(BinOp::Plus, sum, param(&frame, n)?);
    }

    let body = vec![trace(Expr::call(
        Expr::Name(name.clone()),
        (1..=8).map(Expr::Const).collect(),
    ))];

    Ok(Program {
        functions: vec![Function {
            name,
            frame,
            body: Body::Expr(sum),
        }],
        main: main_function(target, ctx, body),
    })
}

/// Twenty values live at once, two of them across a call.
fn pressure<C: Codegen>(target: &C, ctx: &mut Context) -> Program<C::Frame> {
    let squares = temps(ctx, 20);
    let sum = Expr::Temp(ctx.new_temp());

    let mut body: Vec<_> = squares
        .iter()
        .zip(1..)
        .map(|(t, n)| {
            Stmt::mov(
                Expr::Temp(*t),
                bin(BinOp::Mul, Expr::Const(n), Expr::Const(n)),
            )
        })
        .collect();
    body.push(Stmt::mov(sum.clone(), Expr::Const(0)));
    for t in &squares {
        body.push(Stmt::mov(
            sum.clone(),
            bin(BinOp::Plus, sum.clone(), Expr::Temp(*t)),
        ));
    }
    body.push(trace(sum));
    body.push(trace(bin(
        BinOp::Plus,
        Expr::Temp(squares[0]),
        Expr::Temp(squares[19]),
    )));

    Program {
        functions: vec![],
        main: main_function(target, ctx, body),
    }
}
