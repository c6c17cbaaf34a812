/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! The per-block schedule: a doubly linked total order of the real
//! (non-projection) nodes of each block. Projections are never
//! scheduled; their position is that of their parent.

use crate::graph::Graph;
use crate::{Block, Node};

pub struct Schedule {
    prev: Vec<Node>,
    next: Vec<Node>,
    block: Vec<Block>,
    in_sched: Vec<bool>,
    first: Vec<Node>,
    last: Vec<Node>,
}

impl Schedule {
    pub fn new(graph: &Graph) -> Self {
        Self {
            prev: vec![Node::invalid(); graph.num_nodes()],
            next: vec![Node::invalid(); graph.num_nodes()],
            block: vec![Block::invalid(); graph.num_nodes()],
            in_sched: vec![false; graph.num_nodes()],
            first: vec![Node::invalid(); graph.num_blocks()],
            last: vec![Node::invalid(); graph.num_blocks()],
        }
    }

    fn ensure(&mut self, n: Node) {
        if n.index() >= self.in_sched.len() {
            let len = n.index() + 1;
            self.prev.resize(len, Node::invalid());
            self.next.resize(len, Node::invalid());
            self.block.resize(len, Block::invalid());
            self.in_sched.resize(len, false);
        }
    }

    #[inline(always)]
    pub fn is_scheduled(&self, n: Node) -> bool {
        n.index() < self.in_sched.len() && self.in_sched[n.index()]
    }

    pub fn block_of(&self, n: Node) -> Block {
        debug_assert!(self.is_scheduled(n));
        self.block[n.index()]
    }

    pub fn prev(&self, n: Node) -> Option<Node> {
        debug_assert!(self.is_scheduled(n));
        let p = self.prev[n.index()];
        if p.is_valid() {
            Some(p)
        } else {
            None
        }
    }

    pub fn next(&self, n: Node) -> Option<Node> {
        debug_assert!(self.is_scheduled(n));
        let nx = self.next[n.index()];
        if nx.is_valid() {
            Some(nx)
        } else {
            None
        }
    }

    pub fn first(&self, block: Block) -> Option<Node> {
        let f = self.first[block.index()];
        if f.is_valid() {
            Some(f)
        } else {
            None
        }
    }

    pub fn last(&self, block: Block) -> Option<Node> {
        let l = self.last[block.index()];
        if l.is_valid() {
            Some(l)
        } else {
            None
        }
    }

    /// Append `n` at the end of `block`.
    pub fn append(&mut self, block: Block, n: Node) {
        self.ensure(n);
        debug_assert!(!self.in_sched[n.index()]);
        let old_last = self.last[block.index()];
        self.prev[n.index()] = old_last;
        self.next[n.index()] = Node::invalid();
        if old_last.is_valid() {
            self.next[old_last.index()] = n;
        } else {
            self.first[block.index()] = n;
        }
        self.last[block.index()] = n;
        self.block[n.index()] = block;
        self.in_sched[n.index()] = true;
    }

    pub fn insert_after(&mut self, point: Node, n: Node) {
        self.ensure(n);
        debug_assert!(self.is_scheduled(point));
        debug_assert!(!self.in_sched[n.index()]);
        let block = self.block[point.index()];
        let after = self.next[point.index()];
        self.prev[n.index()] = point;
        self.next[n.index()] = after;
        self.next[point.index()] = n;
        if after.is_valid() {
            self.prev[after.index()] = n;
        } else {
            self.last[block.index()] = n;
        }
        self.block[n.index()] = block;
        self.in_sched[n.index()] = true;
    }

    pub fn insert_before(&mut self, point: Node, n: Node) {
        self.ensure(n);
        debug_assert!(self.is_scheduled(point));
        debug_assert!(!self.in_sched[n.index()]);
        let block = self.block[point.index()];
        let before = self.prev[point.index()];
        self.next[n.index()] = point;
        self.prev[n.index()] = before;
        self.prev[point.index()] = n;
        if before.is_valid() {
            self.next[before.index()] = n;
        } else {
            self.first[block.index()] = n;
        }
        self.block[n.index()] = block;
        self.in_sched[n.index()] = true;
    }

    pub fn remove(&mut self, n: Node) {
        debug_assert!(self.is_scheduled(n));
        let block = self.block[n.index()];
        let p = self.prev[n.index()];
        let nx = self.next[n.index()];
        if p.is_valid() {
            self.next[p.index()] = nx;
        } else {
            self.first[block.index()] = nx;
        }
        if nx.is_valid() {
            self.prev[nx.index()] = p;
        } else {
            self.last[block.index()] = p;
        }
        self.prev[n.index()] = Node::invalid();
        self.next[n.index()] = Node::invalid();
        self.block[n.index()] = Block::invalid();
        self.in_sched[n.index()] = false;
    }

    /// Is `b` scheduled strictly after `a` (same block)?
    pub fn strictly_before(&self, a: Node, b: Node) -> bool {
        if a == b {
            return false;
        }
        let mut cur = self.next[a.index()];
        while cur.is_valid() {
            if cur == b {
                return true;
            }
            cur = self.next[cur.index()];
        }
        false
    }

    pub fn iter_block<'a>(&'a self, block: Block) -> impl Iterator<Item = Node> + 'a {
        let mut cur = self.first[block.index()];
        std::iter::from_fn(move || {
            if cur.is_valid() {
                let n = cur;
                cur = self.next[n.index()];
                Some(n)
            } else {
                None
            }
        })
    }

    pub fn iter_block_rev<'a>(&'a self, block: Block) -> impl Iterator<Item = Node> + 'a {
        let mut cur = self.last[block.index()];
        std::iter::from_fn(move || {
            if cur.is_valid() {
                let n = cur;
                cur = self.prev[n.index()];
                Some(n)
            } else {
                None
            }
        })
    }
}
