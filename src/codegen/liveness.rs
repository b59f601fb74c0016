use std::collections::{BTreeSet, HashMap};

use crate::common::Temp;

use super::flow::FlowGraph;

/// Liveness of one function. Registers are numbered densely in order of
/// first appearance; every table below is indexed by those numbers.
#[derive(Debug)]
pub struct Liveness {
    temps: Vec<Temp>,
    index: HashMap<Temp, usize>,
    uses: Vec<Vec<usize>>,
    defs: Vec<Vec<usize>>,
    moves: Vec<bool>,
    live_out: Vec<BTreeSet<usize>>,
    invocations: Vec<usize>,
}

pub fn analyze(flow_graph: &FlowGraph) -> Liveness {
    let mut liveness = Liveness::new(flow_graph);
    liveness.propagate(flow_graph);
    liveness
}

impl Liveness {
    fn new(flow_graph: &FlowGraph) -> Self {
        let nodes = flow_graph.graph_ref().nodes();
        let mut temps = Vec::new();
        let mut index = HashMap::new();
        let mut intern = |temp: Temp| -> usize {
            *index.entry(temp).or_insert_with(|| {
                temps.push(temp);
                temps.len() - 1
            })
        };

        let mut uses = Vec::with_capacity(nodes.len());
        let mut defs = Vec::with_capacity(nodes.len());
        let mut moves = Vec::with_capacity(nodes.len());
        for node in nodes {
            let node = node.val();
            uses.push(node.uses.iter().map(|t| intern(*t)).collect::<Vec<_>>());
            defs.push(node.defs.iter().map(|t| intern(*t)).collect::<Vec<_>>());
            moves.push(node.is_move);
        }

        let mut invocations = vec![0; temps.len()];
        for r in uses.iter().chain(defs.iter()).flatten() {
            invocations[*r] += 1;
        }

        Liveness {
            live_out: vec![BTreeSet::new(); nodes.len()],
            temps,
            index,
            uses,
            defs,
            moves,
            invocations,
        }
    }

    /// A used register is live after every predecessor, walking backwards
    /// until a node defines it or already has it live.
    fn propagate(&mut self, flow_graph: &FlowGraph) {
        let graph = flow_graph.graph_ref();
        for node in graph.nodes() {
            for &r in &self.uses[node.id().index()] {
                let mut work: Vec<_> = node.pred().collect();
                while let Some(p) = work.pop() {
                    let p = p.index();
                    if self.live_out[p].insert(r) && !self.defs[p].contains(&r) {
                        work.extend(graph.nodes()[p].pred());
                    }
                }
            }
        }
    }

    pub fn temps(&self) -> &[Temp] {
        &self.temps
    }

    pub fn temp(&self, r: usize) -> Temp {
        self.temps[r]
    }

    pub fn index_of(&self, temp: Temp) -> Option<usize> {
        self.index.get(&temp).copied()
    }

    pub fn node_count(&self) -> usize {
        self.uses.len()
    }

    pub fn uses(&self, node: usize) -> &[usize] {
        &self.uses[node]
    }

    pub fn defs(&self, node: usize) -> &[usize] {
        &self.defs[node]
    }

    pub fn is_move(&self, node: usize) -> bool {
        self.moves[node]
    }

    pub fn live_out(&self, node: usize) -> &BTreeSet<usize> {
        &self.live_out[node]
    }

    /// Uses plus definitions of a register, the numerator of the spill cost.
    pub fn invocations(&self, r: usize) -> usize {
        self.invocations[r]
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::{asm::Instruction, common::Context};

    use super::*;

    #[test]
    fn test_liveness() {
        // a := 0
        // L1: b := a + 1
        //     c := c + b
        //     a := b * 2
        //     if a < N goto L1
        // return c
        let mut ctx = Context::new();
        let fp = ctx.named_temp("fp");
        let (a, b, c) = (ctx.new_temp(), ctx.new_temp(), ctx.new_temp());
        let l1 = ctx.new_label();
        let code = vec![
            Instruction::oper("movq $0, &o0", vec![], vec![a]),
            Instruction::label(l1.clone()),
            Instruction::oper("leaq 1(&i0), &o0", vec![a], vec![b]),
            Instruction::oper("addq &i0, &o0", vec![b, c], vec![c]),
            Instruction::oper("leaq (&i0,&i0), &o0", vec![b], vec![a]),
            Instruction::jump("jl .L0", vec![a], vec![None, Some(l1)]),
            Instruction::oper("ret", vec![c], vec![]),
        ];
        let flow = FlowGraph::convert(&code, fp).unwrap();

        let liveness = analyze(&flow);

        assert_eq!(liveness.temps(), &[a, b, c]);
        let (a, b, c) = (0, 1, 2);
        let expected_live_out = vec![
            BTreeSet::from([a, c]),
            BTreeSet::from([a, c]),
            BTreeSet::from([b, c]),
            BTreeSet::from([b, c]),
            BTreeSet::from([a, c]),
            BTreeSet::from([a, c]),
            BTreeSet::from([]),
        ];
        let live_out: Vec<_> = (0..liveness.node_count())
            .map(|n| liveness.live_out(n).clone())
            .collect();
        assert_eq!(live_out, expected_live_out);

        assert_eq!(liveness.invocations(a), 4);
        assert_eq!(liveness.invocations(b), 3);
        assert_eq!(liveness.invocations(c), 3);
    }

    #[test]
    fn test_dead_definition_is_not_live() {
        let mut ctx = Context::new();
        let fp = ctx.named_temp("fp");
        let (a, b) = (ctx.new_temp(), ctx.new_temp());
        let code = vec![
            Instruction::oper("movq $1, &o0", vec![], vec![a]),
            Instruction::oper("movq $2, &o0", vec![], vec![b]),
            Instruction::oper("ret", vec![a], vec![]),
        ];
        let flow = FlowGraph::convert(&code, fp).unwrap();

        let liveness = analyze(&flow);

        let a = liveness.index_of(a).unwrap();
        assert_eq!(liveness.live_out(0), &BTreeSet::from([a]));
        assert_eq!(liveness.live_out(1), &BTreeSet::from([a]));
        assert!(liveness.live_out(2).is_empty());
    }
}
