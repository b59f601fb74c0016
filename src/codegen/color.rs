use std::collections::BTreeSet;

use log::trace;
use strum::Display;

use super::liveness::Liveness;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Unprocessed,
    Precolored,
    Removable,
    Freezeable,
    Spillable,
    Selected,
    Coalesced,
    Colored,
    Spilled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MoveStatus {
    Unprocessed,
    Coalescable,
    Constrained,
    Frozen,
    Active,
    Coalesced,
}

#[derive(Debug, Clone, Copy)]
struct Move {
    dst: usize,
    src: usize,
    status: MoveStatus,
}

type Color = usize;

/// Interference graph plus the simplify/coalesce/freeze/spill state machine
/// over it. Nodes are the dense register numbers of a `Liveness`.
#[derive(Debug)]
pub struct Coloring {
    k: usize,
    n: usize,
    table: Vec<bool>,
    // precolored nodes have no list, only table entries.
    adj_list: Vec<Vec<usize>>,
    degree: Vec<usize>,
    original_degree: Vec<usize>,
    status: Vec<NodeStatus>,
    color: Vec<Option<Color>>,
    alias: Vec<usize>,
    moves: Vec<Move>,
    node_moves: Vec<Vec<usize>>,
    select_stack: Vec<usize>,
    invocations: Vec<usize>,
    keep: Vec<bool>,
}

impl Coloring {
    /// `precolored` pairs a register number with its fixed color. Colors
    /// `0..k` form the palette; a precolored register may carry a color
    /// outside it, which nothing else can take.
    pub fn build(liveness: &Liveness, k: usize, precolored: &[(usize, Color)]) -> Self {
        let n = liveness.temps().len();
        let mut coloring = Coloring {
            k,
            n,
            table: vec![false; n * n],
            adj_list: vec![Vec::new(); n],
            degree: vec![0; n],
            original_degree: Vec::new(),
            status: vec![NodeStatus::Unprocessed; n],
            color: vec![None; n],
            alias: (0..n).collect(),
            moves: Vec::new(),
            node_moves: vec![Vec::new(); n],
            select_stack: Vec::new(),
            invocations: (0..n).map(|r| liveness.invocations(r)).collect(),
            keep: vec![false; n],
        };

        for &(r, c) in precolored {
            coloring.status[r] = NodeStatus::Precolored;
            coloring.color[r] = Some(c);
            coloring.degree[r] = usize::MAX;
        }

        for node in 0..liveness.node_count() {
            let source = if liveness.is_move(node) {
                match (liveness.defs(node), liveness.uses(node)) {
                    (&[dst], &[src]) => {
                        if dst != src {
                            coloring.add_move(dst, src);
                        }
                        Some(src)
                    }
                    _ => None,
                }
            } else {
                None
            };

            for &d in liveness.defs(node) {
                for &l in liveness.live_out(node) {
                    if l != d && Some(l) != source {
                        coloring.add_edge(d, l);
                    }
                }
            }
        }
        coloring.original_degree = coloring.degree.clone();

        for m in &mut coloring.moves {
            m.status = MoveStatus::Coalescable;
        }
        for r in 0..n {
            if coloring.status[r] == NodeStatus::Unprocessed {
                coloring.classify(r);
            }
        }

        coloring
    }

    /// Makes `r` the last choice for an optimistic spill. Used for the short
    /// lived registers a spill rewrite introduced.
    pub fn avoid_spilling(&mut self, r: usize) {
        self.keep[r] = true;
    }

    fn add_move(&mut self, dst: usize, src: usize) {
        let idx = self.moves.len();
        self.moves.push(Move {
            dst,
            src,
            status: MoveStatus::Unprocessed,
        });
        self.node_moves[dst].push(idx);
        self.node_moves[src].push(idx);
    }

    fn add_edge(&mut self, a: usize, b: usize) {
        if a == b || self.table[a * self.n + b] {
            return;
        }
        self.table[a * self.n + b] = true;
        self.table[b * self.n + a] = true;

        for (x, y) in [(a, b), (b, a)] {
            if self.status[x] != NodeStatus::Precolored {
                self.adj_list[x].push(y);
                self.degree[x] += 1;
            }
        }
    }

    fn interferes(&self, a: usize, b: usize) -> bool {
        self.table[a * self.n + b]
    }

    fn is_precolored(&self, r: usize) -> bool {
        self.status[r] == NodeStatus::Precolored
    }

    fn classify(&mut self, r: usize) {
        self.status[r] = if self.degree[r] >= self.k {
            NodeStatus::Spillable
        } else if self.move_related(r) {
            NodeStatus::Freezeable
        } else {
            NodeStatus::Removable
        };
    }

    /// Neighbours still in the graph.
    fn adjacent(&self, r: usize) -> Vec<usize> {
        self.adj_list[r]
            .iter()
            .copied()
            .filter(|m| {
                !matches!(
                    self.status[*m],
                    NodeStatus::Selected | NodeStatus::Coalesced
                )
            })
            .collect()
    }

    fn move_related(&self, r: usize) -> bool {
        self.node_moves[r].iter().any(|m| {
            matches!(
                self.moves[*m].status,
                MoveStatus::Coalescable | MoveStatus::Active
            )
        })
    }

    fn alias(&self, mut r: usize) -> usize {
        while self.status[r] == NodeStatus::Coalesced {
            r = self.alias[r];
        }
        r
    }

    pub fn status(&self, r: usize) -> NodeStatus {
        self.status[r]
    }

    pub fn color(&self, r: usize) -> Option<Color> {
        self.color[r]
    }

    pub fn degree(&self, r: usize) -> usize {
        self.degree[r]
    }

    pub fn move_statuses(&self) -> Vec<MoveStatus> {
        self.moves.iter().map(|m| m.status).collect()
    }

    /// Registers that found no color.
    pub fn spilled(&self) -> Vec<usize> {
        (0..self.n)
            .filter(|r| self.status[*r] == NodeStatus::Spilled)
            .collect()
    }

    /// Runs the state machine until the graph is empty, then assigns colors.
    pub fn run(&mut self) {
        loop {
            if let Some(r) = self.find(NodeStatus::Removable) {
                self.simplify(r);
            } else if let Some(m) = self
                .moves
                .iter()
                .position(|m| m.status == MoveStatus::Coalescable)
            {
                self.coalesce(m);
            } else if let Some(r) = self.find(NodeStatus::Freezeable) {
                self.freeze(r);
            } else if let Some(r) = self.cheapest_spill() {
                self.prespill(r);
            } else {
                break;
            }
        }
        self.assign_colors();
    }

    fn find(&self, status: NodeStatus) -> Option<usize> {
        self.status.iter().position(|s| *s == status)
    }

    pub(super) fn simplify(&mut self, r: usize) {
        self.status[r] = NodeStatus::Selected;
        self.select_stack.push(r);
        for m in self.adjacent(r) {
            self.decrement_degree(m);
        }
    }

    fn decrement_degree(&mut self, r: usize) {
        if self.is_precolored(r) {
            return;
        }
        let d = self.degree[r];
        self.degree[r] = d - 1;
        if d == self.k {
            let mut nodes = self.adjacent(r);
            nodes.push(r);
            for node in nodes {
                self.enable_moves(node);
            }
            if self.status[r] == NodeStatus::Spillable {
                self.status[r] = if self.move_related(r) {
                    NodeStatus::Freezeable
                } else {
                    NodeStatus::Removable
                };
            }
        }
    }

    fn enable_moves(&mut self, r: usize) {
        for &m in &self.node_moves[r] {
            if self.moves[m].status == MoveStatus::Active {
                self.moves[m].status = MoveStatus::Coalescable;
            }
        }
    }

    /// A node that lost its last move and has a low degree can be simplified.
    fn possibly_unfreeze(&mut self, r: usize) {
        if self.status[r] == NodeStatus::Freezeable
            && !self.move_related(r)
            && self.degree[r] < self.k
        {
            self.status[r] = NodeStatus::Removable;
        }
    }

    pub(super) fn coalesce(&mut self, m: usize) {
        let x = self.alias(self.moves[m].dst);
        let y = self.alias(self.moves[m].src);
        let (u, v) = if self.is_precolored(y) { (y, x) } else { (x, y) };

        if u == v {
            self.moves[m].status = MoveStatus::Coalesced;
            self.possibly_unfreeze(u);
        } else if self.is_precolored(v)
            || self.interferes(u, v)
            || (self.is_precolored(u) && self.color[u].map_or(true, |c| c >= self.k))
        {
            self.moves[m].status = MoveStatus::Constrained;
            self.possibly_unfreeze(u);
            self.possibly_unfreeze(v);
        } else if (self.is_precolored(u) && self.george(u, v))
            || (!self.is_precolored(u) && self.briggs(u, v))
        {
            trace!("coalesce {} into {}", v, u);
            self.moves[m].status = MoveStatus::Coalesced;
            self.combine(u, v);
            self.possibly_unfreeze(u);
        } else {
            self.moves[m].status = MoveStatus::Active;
        }
    }

    /// Every neighbour of `v` is harmless to the precolored `u`.
    fn george(&self, u: usize, v: usize) -> bool {
        self.adjacent(v).into_iter().all(|t| {
            self.degree[t] < self.k || self.is_precolored(t) || self.interferes(t, u)
        })
    }

    /// The merged node has fewer than k neighbours of significant degree.
    fn briggs(&self, u: usize, v: usize) -> bool {
        let neighbours: BTreeSet<usize> = self
            .adjacent(u)
            .into_iter()
            .chain(self.adjacent(v))
            .collect();
        neighbours
            .into_iter()
            .filter(|t| self.degree[*t] >= self.k)
            .count()
            < self.k
    }

    fn combine(&mut self, u: usize, v: usize) {
        self.status[v] = NodeStatus::Coalesced;
        self.alias[v] = u;
        let moved = std::mem::take(&mut self.node_moves[v]);
        self.node_moves[u].extend(moved.iter().copied());
        self.node_moves[v] = moved;
        self.enable_moves(v);

        for t in self.adjacent(v) {
            self.add_edge(t, u);
            self.decrement_degree(t);
        }
        if self.degree[u] >= self.k && self.status[u] == NodeStatus::Freezeable {
            self.status[u] = NodeStatus::Spillable;
        }
    }

    pub(super) fn freeze(&mut self, r: usize) {
        self.status[r] = NodeStatus::Removable;
        self.freeze_moves(r);
    }

    fn freeze_moves(&mut self, u: usize) {
        for m in self.node_moves[u].clone() {
            if !matches!(
                self.moves[m].status,
                MoveStatus::Coalescable | MoveStatus::Active
            ) {
                continue;
            }
            self.moves[m].status = MoveStatus::Frozen;

            let x = self.alias(self.moves[m].dst);
            let y = self.alias(self.moves[m].src);
            let v = if y == self.alias(u) { x } else { y };
            self.possibly_unfreeze(v);
        }
    }

    /// The spillable node with the fewest uses per interference.
    pub(super) fn cheapest_spill(&self) -> Option<usize> {
        let cost = |r: usize| {
            if self.keep[r] {
                f64::INFINITY
            } else {
                self.invocations[r] as f64 / self.original_degree[r].max(1) as f64
            }
        };
        (0..self.n)
            .filter(|r| self.status[*r] == NodeStatus::Spillable)
            .min_by(|a, b| cost(*a).total_cmp(&cost(*b)))
    }

    /// Optimistically treats a high-degree node as removable. It only
    /// becomes a real spill if no color is left for it.
    pub(super) fn prespill(&mut self, r: usize) {
        trace!("potential spill {}", r);
        self.status[r] = NodeStatus::Removable;
        self.freeze_moves(r);
    }

    pub(super) fn assign_colors(&mut self) {
        while let Some(r) = self.select_stack.pop() {
            let mut used = vec![false; self.k];
            for w in (0..self.n).filter(|w| self.interferes(r, *w)) {
                let w = self.alias(w);
                if matches!(
                    self.status[w],
                    NodeStatus::Precolored | NodeStatus::Colored
                ) {
                    if let Some(c) = self.color[w].filter(|c| *c < self.k) {
                        used[c] = true;
                    }
                }
            }

            match used.iter().position(|u| !u) {
                Some(c) => {
                    self.status[r] = NodeStatus::Colored;
                    self.color[r] = Some(c);
                }
                None => self.status[r] = NodeStatus::Spilled,
            }
        }

        for r in 0..self.n {
            if self.status[r] == NodeStatus::Coalesced {
                self.color[r] = self.color[self.alias(r)];
            }
        }
    }

    /// Looks for two registers live at the same time that share a color.
    pub fn check_colors(&self, liveness: &Liveness) -> Result<(), (usize, usize)> {
        for node in 0..liveness.node_count() {
            let source = match (liveness.is_move(node), liveness.uses(node)) {
                (true, &[src]) => Some(src),
                _ => None,
            };
            for &d in liveness.defs(node) {
                for &l in liveness.live_out(node) {
                    if l == d || Some(l) == source {
                        continue;
                    }
                    if let (Some(a), Some(b)) = (self.color[d], self.color[l]) {
                        if a == b {
                            return Err((d, l));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::{
        asm::Instruction,
        codegen::{flow::FlowGraph, liveness},
        common::{Context, Temp},
    };

    use super::*;

    fn liveness_of(code: &[Instruction], fp: Temp) -> Liveness {
        liveness::analyze(&FlowGraph::convert(code, fp).unwrap())
    }

    fn def(t: Temp) -> Instruction {
        Instruction::oper("movq $1, &o0", vec![], vec![t])
    }

    fn sink(ts: Vec<Temp>) -> Instruction {
        Instruction::oper("# sink", ts, vec![])
    }

    #[test]
    fn test_path_needs_two_colors() {
        let mut ctx = Context::new();
        let fp = ctx.new_temp();
        let (a, b, c) = (ctx.new_temp(), ctx.new_temp(), ctx.new_temp());
        let code = vec![
            def(a),
            def(b),
            Instruction::oper("addq &i0, &o0", vec![a, b], vec![b]),
            def(c),
            Instruction::oper("addq &i0, &o0", vec![b, c], vec![c]),
            sink(vec![c]),
        ];
        let liveness = liveness_of(&code, fp);
        let idx = |t| liveness.index_of(t).unwrap();

        let mut coloring = Coloring::build(&liveness, 2, &[]);
        assert_eq!(coloring.degree(idx(b)), 2);
        coloring.run();

        assert!(coloring.spilled().is_empty());
        assert_ne!(coloring.color(idx(a)), coloring.color(idx(b)));
        assert_ne!(coloring.color(idx(b)), coloring.color(idx(c)));
        assert_eq!(coloring.check_colors(&liveness), Ok(()));
    }

    #[test]
    fn test_triangle_spills_with_two_colors() {
        let mut ctx = Context::new();
        let fp = ctx.new_temp();
        let (a, b, c) = (ctx.new_temp(), ctx.new_temp(), ctx.new_temp());
        let code = vec![def(a), def(b), def(c), sink(vec![a, b, c])];
        let liveness = liveness_of(&code, fp);

        let mut coloring = Coloring::build(&liveness, 2, &[]);
        for r in 0..3 {
            assert_eq!(coloring.status(r), NodeStatus::Spillable);
        }
        coloring.run();

        assert_eq!(coloring.spilled(), vec![liveness.index_of(a).unwrap()]);
    }

    #[test]
    fn test_cheapest_spill() {
        let mut ctx = Context::new();
        let fp = ctx.new_temp();
        let (a, b, c) = (ctx.new_temp(), ctx.new_temp(), ctx.new_temp());
        let code = vec![
            def(a),
            def(b),
            def(c),
            sink(vec![a]),
            sink(vec![a]),
            sink(vec![a, b, c]),
        ];
        let liveness = liveness_of(&code, fp);

        let coloring = Coloring::build(&liveness, 2, &[]);

        assert_eq!(coloring.cheapest_spill(), liveness.index_of(b));
    }

    #[test]
    fn test_cheapest_spill_skips_avoided() {
        let mut ctx = Context::new();
        let fp = ctx.new_temp();
        let (a, b, c) = (ctx.new_temp(), ctx.new_temp(), ctx.new_temp());
        let code = vec![
            def(a),
            def(b),
            def(c),
            sink(vec![a]),
            sink(vec![a]),
            sink(vec![a, b, c]),
        ];
        let liveness = liveness_of(&code, fp);
        let (b, c) = (liveness.index_of(b).unwrap(), liveness.index_of(c).unwrap());

        let mut coloring = Coloring::build(&liveness, 2, &[]);
        coloring.avoid_spilling(b);
        assert_eq!(coloring.cheapest_spill(), Some(c));

        coloring.avoid_spilling(c);
        assert_eq!(coloring.cheapest_spill(), liveness.index_of(a));
    }

    #[test]
    fn test_simplify_lowers_neighbour_degree() {
        let mut ctx = Context::new();
        let fp = ctx.new_temp();
        let (a, b, c) = (ctx.new_temp(), ctx.new_temp(), ctx.new_temp());
        let code = vec![def(a), def(b), def(c), sink(vec![a, b, c])];
        let liveness = liveness_of(&code, fp);
        let (a, b, c) = (0, 1, 2);

        let mut coloring = Coloring::build(&liveness, 2, &[]);
        coloring.prespill(a);
        assert_eq!(coloring.status(a), NodeStatus::Removable);

        coloring.simplify(a);

        assert_eq!(coloring.status(a), NodeStatus::Selected);
        assert_eq!(coloring.degree(b), 1);
        assert_eq!(coloring.status(b), NodeStatus::Removable);
        assert_eq!(coloring.status(c), NodeStatus::Removable);
    }

    #[test]
    fn test_briggs_coalesce() {
        let mut ctx = Context::new();
        let fp = ctx.new_temp();
        let (a, b) = (ctx.new_temp(), ctx.new_temp());
        let code = vec![
            def(a),
            Instruction::mov("movq &i0, &o0", a, b),
            sink(vec![b]),
        ];
        let liveness = liveness_of(&code, fp);
        let (a, b) = (liveness.index_of(a).unwrap(), liveness.index_of(b).unwrap());

        let mut coloring = Coloring::build(&liveness, 1, &[]);
        assert_eq!(coloring.status(a), NodeStatus::Freezeable);

        coloring.coalesce(0);
        assert_eq!(coloring.move_statuses(), vec![MoveStatus::Coalesced]);
        assert_eq!(coloring.status(a), NodeStatus::Coalesced);
        assert_eq!(coloring.status(b), NodeStatus::Removable);

        coloring.run();
        assert_eq!(coloring.color(a), Some(0));
        assert_eq!(coloring.color(b), Some(0));
    }

    #[test]
    fn test_george_coalesce_with_machine_register() {
        let mut ctx = Context::new();
        let fp = ctx.new_temp();
        let (rax, t) = (ctx.new_temp(), ctx.new_temp());
        let code = vec![
            def(t),
            Instruction::mov("movq &i0, &o0", t, rax),
            sink(vec![rax]),
        ];
        let liveness = liveness_of(&code, fp);
        let (rax, t) = (
            liveness.index_of(rax).unwrap(),
            liveness.index_of(t).unwrap(),
        );

        let mut coloring = Coloring::build(&liveness, 2, &[(rax, 1)]);
        coloring.run();

        assert_eq!(coloring.move_statuses(), vec![MoveStatus::Coalesced]);
        assert_eq!(coloring.status(t), NodeStatus::Coalesced);
        assert_eq!(coloring.color(t), Some(1));
    }

    #[test]
    fn test_interfering_move_is_constrained() {
        let mut ctx = Context::new();
        let fp = ctx.new_temp();
        let (t, u) = (ctx.new_temp(), ctx.new_temp());
        let code = vec![
            def(t),
            Instruction::mov("movq &i0, &o0", t, u),
            Instruction::oper("addq $1, &o0", vec![t], vec![t]),
            sink(vec![u, t]),
        ];
        let liveness = liveness_of(&code, fp);

        let mut coloring = Coloring::build(&liveness, 2, &[]);
        coloring.run();

        assert_eq!(coloring.move_statuses(), vec![MoveStatus::Constrained]);
        assert!(coloring.spilled().is_empty());
        assert_eq!(coloring.check_colors(&liveness), Ok(()));
    }

    #[test]
    fn test_freeze_gives_up_moves() {
        let mut ctx = Context::new();
        let fp = ctx.new_temp();
        let (a, b) = (ctx.new_temp(), ctx.new_temp());
        let code = vec![
            def(a),
            Instruction::mov("movq &i0, &o0", a, b),
            sink(vec![b]),
        ];
        let liveness = liveness_of(&code, fp);
        let (a, b) = (liveness.index_of(a).unwrap(), liveness.index_of(b).unwrap());

        let mut coloring = Coloring::build(&liveness, 1, &[]);
        coloring.freeze(b);

        assert_eq!(coloring.move_statuses(), vec![MoveStatus::Frozen]);
        assert_eq!(coloring.status(b), NodeStatus::Removable);
        assert_eq!(coloring.status(a), NodeStatus::Removable);
    }

    #[test]
    fn test_check_colors_finds_conflict() {
        let mut ctx = Context::new();
        let fp = ctx.new_temp();
        let (a, b) = (ctx.new_temp(), ctx.new_temp());
        let code = vec![def(a), def(b), sink(vec![a, b])];
        let liveness = liveness_of(&code, fp);

        let mut coloring = Coloring::build(&liveness, 2, &[(0, 0), (1, 0)]);
        coloring.run();

        assert_eq!(coloring.check_colors(&liveness), Err((1, 0)));
    }
}
