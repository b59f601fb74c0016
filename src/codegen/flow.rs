use std::collections::HashMap;

use itertools::Itertools;

use crate::{asm::Instruction, common::Temp, Error};

use super::graph::{Graph, ID};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub uses: Vec<Temp>,
    pub defs: Vec<Temp>,
    pub is_move: bool,
}

/// One node per instruction, in program order.
#[derive(Debug)]
pub struct FlowGraph {
    pub(super) graph: Graph<Node>,
}

impl FlowGraph {
    pub fn graph_ref(&self) -> &Graph<Node> {
        &self.graph
    }

    /// `ignored` (the frame pointer) never shows up in a node's uses and
    /// must never be written.
    pub fn convert(code: &[Instruction], ignored: Temp) -> Result<Self, Error> {
        let mut graph = Graph::with_capacity(code.len());
        let mut labels = HashMap::new();

        for instruction in code {
            if instruction.outputs.contains(&ignored) {
                return Err(Error::FramePointerWrite(instruction.notation.clone()));
            }

            let node = Node {
                uses: instruction
                    .inputs
                    .iter()
                    .copied()
                    .filter(|t| *t != ignored)
                    .unique()
                    .collect(),
                defs: instruction.outputs.iter().copied().unique().collect(),
                is_move: instruction.is_move && instruction.input(0) != Some(ignored),
            };
            let id = graph.insert(node);

            if let Some(label) = &instruction.label {
                labels.insert(label.clone(), id);
            }
        }

        let ids: Vec<ID> = graph.nodes().iter().map(|node| node.id()).collect();
        for (idx, instruction) in code.iter().enumerate() {
            let next = ids.get(idx + 1).copied();
            if instruction.destinations.is_empty() {
                if let Some(next) = next {
                    graph.link(ids[idx], next);
                }
                continue;
            }

            for destination in &instruction.destinations {
                let to = match destination {
                    None => next,
                    Some(label) => Some(
                        *labels
                            .get(label)
                            .ok_or_else(|| Error::MalformedInstruction(instruction.notation.clone()))?,
                    ),
                };
                if let Some(to) = to {
                    graph.link(ids[idx], to);
                }
            }
        }

        Ok(FlowGraph { graph })
    }
}
