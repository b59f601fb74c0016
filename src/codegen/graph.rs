#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ID(usize);

impl ID {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug)]
pub struct Node<T> {
    id: ID,
    val: T,
    succ: Vec<ID>,
    pred: Vec<ID>,
}

impl<T> Node<T> {
    pub fn id(&self) -> ID {
        self.id
    }

    pub fn val(&self) -> &T {
        &self.val
    }

    fn new(val: T, id: ID) -> Self {
        Node {
            id,
            val,
            succ: Vec::new(),
            pred: Vec::new(),
        }
    }

    pub fn succ(&self) -> impl Iterator<Item = ID> + '_ {
        self.succ.iter().copied()
    }

    pub fn pred(&self) -> impl Iterator<Item = ID> + '_ {
        self.pred.iter().copied()
    }
}

/// Directed graph whose edges keep insertion order, so every walk over it
/// is deterministic.
#[derive(Debug)]
pub struct Graph<T> {
    nodes: Vec<Node<T>>,
}

impl<T> Graph<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Graph {
            nodes: Vec::with_capacity(capacity),
        }
    }

    pub fn insert(&mut self, val: T) -> ID {
        let id = ID(self.nodes.len());
        self.nodes.push(Node::new(val, id));
        id
    }

    /// Returns false when the edge already existed.
    pub fn link(&mut self, from: ID, to: ID) -> bool {
        if self.nodes[from.0].succ.contains(&to) {
            return false;
        }
        self.nodes[from.0].succ.push(to);
        self.nodes[to.0].pred.push(from);
        true
    }

    pub fn nodes(&self) -> &[Node<T>] {
        &self.nodes
    }
}
