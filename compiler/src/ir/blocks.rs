//! MIR Basic Blocks
//!
//! Basic blocks are sequences of instructions with a single entry point and a
//! single terminator. They form the nodes of a function's control flow graph.

use super::{IrArgs, IrCallee, IrFunctionType, IrId, IrInstruction, IrSourceLocation, IrType, Lifetime};
use fxhash::FxHashSet;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A basic block in the MIR
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrBasicBlock {
    /// Unique identifier for this block
    pub id: IrBlockId,

    /// Human-readable label (for debugging)
    pub label: Option<String>,

    /// Phi nodes at the beginning of this block
    pub phi_nodes: Vec<IrPhiNode>,

    /// Instructions in this block (executed sequentially)
    pub instructions: Vec<IrInstruction>,

    /// Terminator; `None` only while the block is still being built
    pub terminator: Option<IrTerminator>,

    /// Source location for debugging
    pub source_location: IrSourceLocation,

    /// Predecessors in the CFG, in edge creation order
    pub predecessors: Vec<IrBlockId>,
}

/// Unique identifier for basic blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IrBlockId(pub u32);

impl IrBlockId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn entry() -> Self {
        Self(0)
    }
}

impl std::fmt::Display for IrBlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// Phi node for merging values from different control flow paths
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrPhiNode {
    /// Destination register for the phi result
    pub dest: IrId,

    /// Incoming values from predecessor blocks
    pub incoming: Vec<(IrBlockId, IrId)>,

    /// Type of the phi node
    pub ty: IrType,
}

/// Terminator instructions that end a basic block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IrTerminator {
    /// Unconditional branch to another block
    Branch { target: IrBlockId },

    /// Conditional branch based on a boolean value
    CondBranch {
        condition: IrId,
        true_target: IrBlockId,
        false_target: IrBlockId,
    },

    /// Return from function
    Return { value: Option<IrId> },

    /// Call whose exceptions unwind into `unwind` instead of the caller.
    /// `dest` is defined on the `normal` edge only.
    Invoke {
        dest: Option<IrId>,
        callee: IrCallee,
        args: IrArgs,
        signature: IrFunctionType,
        lifetime: Lifetime,
        normal: IrBlockId,
        unwind: IrBlockId,
    },

    /// Control never reaches the end of this block
    Unreachable,
}

impl IrTerminator {
    /// Successor blocks in edge order
    pub fn successors(&self) -> Vec<IrBlockId> {
        match self {
            IrTerminator::Branch { target } => vec![*target],
            IrTerminator::CondBranch {
                true_target,
                false_target,
                ..
            } => vec![*true_target, *false_target],
            IrTerminator::Invoke { normal, unwind, .. } => vec![*normal, *unwind],
            IrTerminator::Return { .. } | IrTerminator::Unreachable => Vec::new(),
        }
    }

    /// Registers read by this terminator
    pub fn uses(&self) -> Vec<IrId> {
        match self {
            IrTerminator::CondBranch { condition, .. } => vec![*condition],
            IrTerminator::Return { value } => value.iter().copied().collect(),
            IrTerminator::Invoke { callee, args, .. } => {
                let mut uses = Vec::with_capacity(args.len() + 1);
                if let IrCallee::Indirect(ptr) = callee {
                    uses.push(*ptr);
                }
                uses.extend(args.iter().copied());
                uses
            }
            IrTerminator::Branch { .. } | IrTerminator::Unreachable => Vec::new(),
        }
    }

    /// Register defined by this terminator, if any
    pub fn dest(&self) -> Option<IrId> {
        match self {
            IrTerminator::Invoke { dest, .. } => *dest,
            _ => None,
        }
    }
}

impl IrBasicBlock {
    /// Create a new basic block
    pub fn new(id: IrBlockId) -> Self {
        Self {
            id,
            label: None,
            phi_nodes: Vec::new(),
            instructions: Vec::new(),
            terminator: None,
            source_location: IrSourceLocation::unknown(),
            predecessors: Vec::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Add an instruction to this block
    pub fn add_instruction(&mut self, inst: IrInstruction) {
        self.instructions.push(inst);
    }

    /// Add a phi node to this block
    pub fn add_phi(&mut self, phi: IrPhiNode) {
        self.phi_nodes.push(phi);
    }

    /// Get all successor blocks based on the terminator
    pub fn successors(&self) -> Vec<IrBlockId> {
        self.terminator
            .as_ref()
            .map(IrTerminator::successors)
            .unwrap_or_default()
    }

    /// Check if this block is terminated
    pub fn is_terminated(&self) -> bool {
        self.terminator.is_some()
    }
}

/// Control flow graph of a single function
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrControlFlowGraph {
    /// All basic blocks, in creation order
    pub blocks: IndexMap<IrBlockId, IrBasicBlock>,

    /// Entry block ID
    pub entry_block: IrBlockId,

    /// Next available block ID
    pub next_block_id: u32,
}

impl Default for IrControlFlowGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl IrControlFlowGraph {
    /// Create a new CFG with an entry block
    pub fn new() -> Self {
        let mut blocks = IndexMap::new();
        let entry_block = IrBlockId::entry();
        blocks.insert(entry_block, IrBasicBlock::new(entry_block).with_label("entry"));

        Self {
            blocks,
            entry_block,
            next_block_id: 1,
        }
    }

    /// Create a new basic block
    pub fn create_block(&mut self) -> IrBlockId {
        let id = IrBlockId::new(self.next_block_id);
        self.next_block_id += 1;
        self.blocks.insert(id, IrBasicBlock::new(id));
        id
    }

    /// Get a block by ID
    pub fn get_block(&self, id: IrBlockId) -> Option<&IrBasicBlock> {
        self.blocks.get(&id)
    }

    /// Get a mutable block by ID
    pub fn get_block_mut(&mut self, id: IrBlockId) -> Option<&mut IrBasicBlock> {
        self.blocks.get_mut(&id)
    }

    /// Connect two blocks (update predecessors)
    pub fn connect_blocks(&mut self, from: IrBlockId, to: IrBlockId) {
        if let Some(to_block) = self.blocks.get_mut(&to) {
            if !to_block.predecessors.contains(&from) {
                to_block.predecessors.push(from);
            }
        }
    }

    /// Blocks reachable from the entry, in depth-first preorder
    pub fn reachable_blocks(&self) -> Vec<IrBlockId> {
        let mut visited = FxHashSet::default();
        let mut order = Vec::new();
        let mut stack = vec![self.entry_block];

        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            order.push(id);
            if let Some(block) = self.blocks.get(&id) {
                for succ in block.successors().into_iter().rev() {
                    if !visited.contains(&succ) {
                        stack.push(succ);
                    }
                }
            }
        }

        order
    }

    /// Remove blocks that cannot be reached from the entry.
    ///
    /// Predecessor lists and phi incoming edges that mention a removed block
    /// are cleaned up as well. Returns the number of removed blocks.
    pub fn prune_unreachable(&mut self) -> usize {
        let reachable: FxHashSet<IrBlockId> = self.reachable_blocks().into_iter().collect();
        let before = self.blocks.len();
        self.blocks.retain(|id, _| reachable.contains(id));

        for block in self.blocks.values_mut() {
            block.predecessors.retain(|pred| reachable.contains(pred));
            for phi in &mut block.phi_nodes {
                phi.incoming.retain(|(pred, _)| reachable.contains(pred));
            }
        }

        before - self.blocks.len()
    }

    /// Structural check: every block terminated, successors exist, phi
    /// edges name real predecessors. Full verification lives in
    /// [`validation`](super::validation).
    pub fn verify(&self) -> Result<(), String> {
        if !self.blocks.contains_key(&self.entry_block) {
            return Err("Entry block not found".to_string());
        }

        for (id, block) in &self.blocks {
            if !block.is_terminated() {
                return Err(format!("Block {} is not terminated", id));
            }

            for succ in block.successors() {
                if !self.blocks.contains_key(&succ) {
                    return Err(format!(
                        "Block {} references non-existent successor {}",
                        id, succ
                    ));
                }
            }

            for phi in &block.phi_nodes {
                for (pred_block, _) in &phi.incoming {
                    if !block.predecessors.contains(pred_block) {
                        return Err(format!(
                            "Phi node in block {} references non-predecessor block {}",
                            id, pred_block
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}
