use std::collections::HashSet;

use log::debug;

use crate::{
    asm::{Instruction, RegisterMap},
    common::{Context, Temp},
    Error,
};

use super::{color::Coloring, flow::FlowGraph, liveness, Codegen};

#[derive(Debug)]
pub struct Allocation {
    /// The code after every spill rewrite.
    pub code: Vec<Instruction>,
    /// Every register of `code`, machine registers included, to its machine register.
    pub map: RegisterMap,
    pub spilled: Vec<Temp>,
    pub rounds: usize,
}

/// Colors the registers of one function, spilling and starting over until
/// every register gets a color.
pub fn alloc<C: Codegen + ?Sized>(
    target: &C,
    ctx: &mut Context,
    frame: &mut C::Frame,
    mut code: Vec<Instruction>,
) -> Result<Allocation, Error> {
    let registers = target.registers();
    let fp = target.frame_pointer();
    let k = target.palette();

    let mut introduced = HashSet::new();
    let mut spilled = Vec::new();
    let mut rounds = 0;

    loop {
        rounds += 1;
        let flow_graph = FlowGraph::convert(&code, fp)?;
        let liveness = liveness::analyze(&flow_graph);

        let precolored: Vec<_> = registers
            .iter()
            .enumerate()
            .filter_map(|(color, reg)| liveness.index_of(*reg).map(|r| (r, color)))
            .collect();
        let mut coloring = Coloring::build(&liveness, k, &precolored);
        for temp in &introduced {
            if let Some(r) = liveness.index_of(*temp) {
                coloring.avoid_spilling(r);
            }
        }
        coloring.run();

        let round_spills: Vec<Temp> = coloring
            .spilled()
            .into_iter()
            .map(|r| liveness.temp(r))
            .collect();
        debug!(
            "round {}: {} instructions, {} registers, {} spilled",
            rounds,
            code.len(),
            liveness.temps().len(),
            round_spills.len()
        );

        if round_spills.is_empty() {
            coloring.check_colors(&liveness).map_err(|(a, b)| {
                let register = coloring
                    .color(a)
                    .and_then(|c| registers.get(c))
                    .map(|r| ctx.temp_name(*r))
                    .unwrap_or_default();
                Error::ColorConflict {
                    first: ctx.temp_name(liveness.temp(a)),
                    second: ctx.temp_name(liveness.temp(b)),
                    register,
                }
            })?;

            let mut map: RegisterMap = registers.iter().map(|r| (*r, *r)).collect();
            for (r, temp) in liveness.temps().iter().enumerate() {
                if let Some(reg) = coloring.color(r).and_then(|c| registers.get(c)) {
                    map.insert(*temp, *reg);
                }
            }

            return Ok(Allocation {
                code,
                map,
                spilled,
                rounds,
            });
        }

        for reg in round_spills {
            if introduced.contains(&reg) {
                return Err(Error::Unallocatable(ctx.temp_name(reg)));
            }
            debug!("spill {}", ctx.temp_name(reg));

            let (rewritten, temps) = target.spill_register(ctx, frame, code, reg);
            code = rewritten;
            introduced.extend(temps);
            spilled.push(reg);
        }
    }
}
