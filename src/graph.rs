/*
 * Released under the terms of the Apache 2.0 license with LLVM
 * exception. See `LICENSE` for details.
 */

//! The IR graph: an arena of nodes with coherent operand and user
//! edges. All edge mutation goes through [`Graph::set_input`] (or the
//! constructors), which keep the users lists in sync.

use crate::{Block, Mode, Node, NodeFlags, Reg, RegClass, RegReq};
use smallvec::SmallVec;

/// What a node is, as far as this layer cares. Ordinary machine
/// instructions are opaque (`Inst`); the lowering-relevant operators
/// are explicit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// An opaque machine instruction.
    Inst,
    /// Simultaneous register permutation; tuple-mode, one projection
    /// per slot.
    Perm,
    /// Register-to-register copy of its single operand.
    Copy,
    /// Zero-semantics node whose inputs are kept live up to this
    /// schedule position.
    Keep,
    /// A copy of input 0 that additionally keeps inputs 1.. alive.
    CopyKeep,
    /// Single-output selector on a tuple-mode parent.
    Proj(u32),
    Phi,
}

/// One use of a value: the using node and the operand position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Use {
    pub node: Node,
    pub pos: u32,
}

struct NodeData {
    kind: NodeKind,
    ins: SmallVec<[Node; 4]>,
    users: Vec<Use>,
    block: Block,
    mode: Mode,
    cls: Option<RegClass>,
    reg: Option<Reg>,
    flags: NodeFlags,
    req: RegReq,
    /// Register class requirement applied to the keep inputs of a
    /// Keep/CopyKeep node.
    in_cls: Option<RegClass>,
    dead: bool,
}

struct BlockData {
    preds: Vec<Block>,
    succs: Vec<Block>,
}

pub struct Graph {
    nodes: Vec<NodeData>,
    blocks: Vec<BlockData>,
    entry: Block,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            nodes: vec![],
            blocks: vec![],
            entry: Block::new(0),
        }
    }

    // -------
    // Blocks
    // -------

    pub fn add_block(&mut self) -> Block {
        let b = Block::new(self.blocks.len());
        self.blocks.push(BlockData {
            preds: vec![],
            succs: vec![],
        });
        b
    }

    pub fn add_block_edge(&mut self, from: Block, to: Block) {
        self.blocks[from.index()].succs.push(to);
        self.blocks[to.index()].preds.push(from);
    }

    pub fn set_entry(&mut self, block: Block) {
        self.entry = block;
    }

    pub fn entry_block(&self) -> Block {
        self.entry
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn block_succs(&self, block: Block) -> &[Block] {
        &self.blocks[block.index()].succs
    }

    pub fn block_preds(&self, block: Block) -> &[Block] {
        &self.blocks[block.index()].preds
    }

    // ------
    // Nodes
    // ------

    fn add_node(&mut self, kind: NodeKind, block: Block, mode: Mode, ins: &[Node]) -> Node {
        let n = Node::new(self.nodes.len());
        self.nodes.push(NodeData {
            kind,
            ins: SmallVec::from_slice(ins),
            users: vec![],
            block,
            mode,
            cls: None,
            reg: None,
            flags: NodeFlags::default(),
            req: RegReq::default(),
            in_cls: None,
            dead: false,
        });
        for (pos, &input) in ins.iter().enumerate() {
            debug_assert!(!self.nodes[input.index()].dead);
            self.nodes[input.index()].users.push(Use {
                node: n,
                pos: pos as u32,
            });
        }
        n
    }

    /// An opaque data-producing instruction.
    pub fn new_inst(&mut self, block: Block, cls: RegClass, ins: &[Node]) -> Node {
        let n = self.add_node(NodeKind::Inst, block, Mode::Data, ins);
        self.nodes[n.index()].cls = Some(cls);
        n
    }

    /// An opaque multi-output instruction; outputs are selected by
    /// projections.
    pub fn new_tuple_inst(&mut self, block: Block, ins: &[Node]) -> Node {
        self.add_node(NodeKind::Inst, block, Mode::Tuple, ins)
    }

    /// An opaque instruction with no register-relevant output
    /// (branches, returns, stores).
    pub fn new_control_inst(&mut self, block: Block, ins: &[Node]) -> Node {
        self.add_node(NodeKind::Inst, block, Mode::Control, ins)
    }

    pub fn new_perm(&mut self, cls: RegClass, block: Block, ins: &[Node]) -> Node {
        let n = self.add_node(NodeKind::Perm, block, Mode::Tuple, ins);
        self.nodes[n.index()].cls = Some(cls);
        n
    }

    pub fn new_proj(&mut self, parent: Node, cls: RegClass, index: u32) -> Node {
        debug_assert_eq!(self.mode(parent), Mode::Tuple);
        let block = self.block_of(parent);
        let n = self.add_node(NodeKind::Proj(index), block, Mode::Data, &[parent]);
        self.nodes[n.index()].cls = Some(cls);
        n
    }

    pub fn new_copy(&mut self, block: Block, op: Node) -> Node {
        let cls = self.cls(op);
        let n = self.add_node(NodeKind::Copy, block, Mode::Data, &[op]);
        self.nodes[n.index()].cls = cls;
        n
    }

    pub fn new_keep(&mut self, block: Block, ins: &[Node]) -> Node {
        self.add_node(NodeKind::Keep, block, Mode::Control, ins)
    }

    /// A copy of `op` that also keeps `keeps` alive at its schedule
    /// position.
    pub fn new_copy_keep(&mut self, block: Block, op: Node, keeps: &[Node]) -> Node {
        let cls = self.cls(op);
        let mut ins: SmallVec<[Node; 4]> = SmallVec::with_capacity(1 + keeps.len());
        ins.push(op);
        ins.extend_from_slice(keeps);
        let n = self.add_node(NodeKind::CopyKeep, block, Mode::Data, &ins);
        self.nodes[n.index()].cls = cls;
        n
    }

    pub fn new_phi(&mut self, block: Block, cls: RegClass, ins: &[Node]) -> Node {
        let n = self.add_node(NodeKind::Phi, block, Mode::Data, ins);
        self.nodes[n.index()].cls = Some(cls);
        n
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// All live nodes, in creation order.
    pub fn nodes<'a>(&'a self) -> impl Iterator<Item = Node> + 'a {
        (0..self.nodes.len())
            .map(Node::new)
            .filter(move |n| !self.nodes[n.index()].dead)
    }

    // ----------
    // Accessors
    // ----------

    #[inline(always)]
    pub fn kind(&self, n: Node) -> NodeKind {
        self.nodes[n.index()].kind
    }

    #[inline(always)]
    pub fn mode(&self, n: Node) -> Mode {
        self.nodes[n.index()].mode
    }

    #[inline(always)]
    pub fn block_of(&self, n: Node) -> Block {
        self.nodes[n.index()].block
    }

    #[inline(always)]
    pub fn arity(&self, n: Node) -> usize {
        self.nodes[n.index()].ins.len()
    }

    #[inline(always)]
    pub fn ins(&self, n: Node) -> &[Node] {
        &self.nodes[n.index()].ins
    }

    #[inline(always)]
    pub fn input(&self, n: Node, pos: usize) -> Node {
        self.nodes[n.index()].ins[pos]
    }

    #[inline(always)]
    pub fn users(&self, n: Node) -> &[Use] {
        &self.nodes[n.index()].users
    }

    #[inline(always)]
    pub fn has_users(&self, n: Node) -> bool {
        !self.nodes[n.index()].users.is_empty()
    }

    #[inline(always)]
    pub fn reg(&self, n: Node) -> Option<Reg> {
        self.nodes[n.index()].reg
    }

    pub fn set_reg(&mut self, n: Node, reg: Reg) {
        self.nodes[n.index()].reg = Some(reg);
    }

    #[inline(always)]
    pub fn cls(&self, n: Node) -> Option<RegClass> {
        self.nodes[n.index()].cls
    }

    #[inline(always)]
    pub fn flags(&self, n: Node) -> NodeFlags {
        self.nodes[n.index()].flags
    }

    pub fn flags_mut(&mut self, n: Node) -> &mut NodeFlags {
        &mut self.nodes[n.index()].flags
    }

    #[inline(always)]
    pub fn req(&self, n: Node) -> RegReq {
        self.nodes[n.index()].req
    }

    pub fn set_req(&mut self, n: Node, req: RegReq) {
        self.nodes[n.index()].req = req;
    }

    #[inline(always)]
    pub fn in_cls(&self, n: Node) -> Option<RegClass> {
        self.nodes[n.index()].in_cls
    }

    /// Set the class requirement for the keep inputs of a
    /// Keep/CopyKeep node.
    pub fn set_in_cls(&mut self, n: Node, cls: RegClass) {
        debug_assert!(matches!(
            self.nodes[n.index()].kind,
            NodeKind::Keep | NodeKind::CopyKeep
        ));
        self.nodes[n.index()].in_cls = Some(cls);
    }

    #[inline(always)]
    pub fn is_dead(&self, n: Node) -> bool {
        self.nodes[n.index()].dead
    }

    pub fn proj_index(&self, n: Node) -> u32 {
        match self.nodes[n.index()].kind {
            NodeKind::Proj(i) => i,
            k => panic!("proj_index on non-Proj {} ({:?})", n, k),
        }
    }

    /// The unprojected node: a Proj's parent, anything else itself.
    #[inline(always)]
    pub fn skip_proj(&self, n: Node) -> Node {
        match self.nodes[n.index()].kind {
            NodeKind::Proj(_) => self.nodes[n.index()].ins[0],
            _ => n,
        }
    }

    /// The projections of a tuple-mode node, sorted by slot index.
    pub fn projs(&self, n: Node) -> SmallVec<[Node; 4]> {
        let mut out: SmallVec<[Node; 4]> = self
            .users(n)
            .iter()
            .map(|u| u.node)
            .filter(|&u| matches!(self.kind(u), NodeKind::Proj(_)))
            .collect();
        out.sort_by_key(|&p| self.proj_index(p));
        out
    }

    // ---------
    // Mutation
    // ---------

    fn unlink_use(&mut self, target: Node, user: Use) {
        let users = &mut self.nodes[target.index()].users;
        let at = users
            .iter()
            .position(|u| *u == user)
            .expect("user edge out of sync");
        users.remove(at);
    }

    /// Point operand `pos` of `n` at `target`, maintaining user lists.
    pub fn set_input(&mut self, n: Node, pos: usize, target: Node) {
        let old = self.nodes[n.index()].ins[pos];
        if old == target {
            return;
        }
        self.unlink_use(
            old,
            Use {
                node: n,
                pos: pos as u32,
            },
        );
        self.nodes[n.index()].ins[pos] = target;
        self.nodes[target.index()].users.push(Use {
            node: n,
            pos: pos as u32,
        });
    }

    /// Replace the whole input array of `n`.
    pub fn set_ins(&mut self, n: Node, ins: &[Node]) {
        let old: SmallVec<[Node; 4]> = self.nodes[n.index()].ins.clone();
        for (pos, &input) in old.iter().enumerate() {
            self.unlink_use(
                input,
                Use {
                    node: n,
                    pos: pos as u32,
                },
            );
        }
        self.nodes[n.index()].ins = SmallVec::from_slice(ins);
        for (pos, &input) in ins.iter().enumerate() {
            self.nodes[input.index()].users.push(Use {
                node: n,
                pos: pos as u32,
            });
        }
    }

    /// Re-parent a projection: new tuple parent, new slot index, same
    /// node identity (users are untouched).
    pub fn set_proj(&mut self, proj: Node, parent: Node, index: u32) {
        debug_assert!(matches!(self.kind(proj), NodeKind::Proj(_)));
        self.set_input(proj, 0, parent);
        self.nodes[proj.index()].kind = NodeKind::Proj(index);
        self.nodes[proj.index()].block = self.block_of(parent);
    }

    /// Splice all users of `old` onto `new`. `old` keeps its own
    /// operand edges; callers that are done with it follow up with
    /// [`Graph::kill`].
    pub fn exchange(&mut self, old: Node, new: Node) {
        if old == new {
            return;
        }
        let users = std::mem::take(&mut self.nodes[old.index()].users);
        for u in &users {
            self.nodes[u.node.index()].ins[u.pos as usize] = new;
        }
        self.nodes[new.index()].users.extend(users);
    }

    /// Remove `n` from the graph. It must have no remaining users.
    pub fn kill(&mut self, n: Node) {
        assert!(
            self.nodes[n.index()].users.is_empty(),
            "killing {} which still has users",
            n
        );
        let ins: SmallVec<[Node; 4]> = std::mem::take(&mut self.nodes[n.index()].ins);
        for (pos, &input) in ins.iter().enumerate() {
            self.unlink_use(
                input,
                Use {
                    node: n,
                    pos: pos as u32,
                },
            );
        }
        self.nodes[n.index()].dead = true;
    }
}
