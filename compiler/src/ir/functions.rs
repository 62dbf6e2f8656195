//! MIR Functions
//!
//! Function representation in the MIR: the native signature, the register
//! allocator and the body as a control flow graph.

use super::{IrBlockId, IrControlFlowGraph, IrFunctionType, IrId, IrSourceLocation, IrType, Linkage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// MIR function representation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrFunction {
    /// Unique identifier for this function
    pub id: IrFunctionId,

    /// Symbol name (mangled if necessary)
    pub name: String,

    /// Function signature
    pub signature: IrFunctionSignature,

    /// Control flow graph (function body)
    pub cfg: IrControlFlowGraph,

    /// Type information for all registers (parameters and intermediate values)
    pub register_types: HashMap<IrId, IrType>,

    /// Linkage type
    pub linkage: Linkage,

    /// Source location for debugging
    pub source_location: IrSourceLocation,

    /// Next available register ID
    pub next_reg_id: u32,
}

/// Unique identifier for functions, shared by defined and extern functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IrFunctionId(pub u32);

impl std::fmt::Display for IrFunctionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fn{}", self.0)
    }
}

/// Function signature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrFunctionSignature {
    /// Parameter types and names
    pub parameters: Vec<IrParameter>,

    /// Return type
    pub return_type: IrType,
}

impl IrFunctionSignature {
    pub fn new(parameters: Vec<IrParameter>, return_type: IrType) -> Self {
        Self {
            parameters,
            return_type,
        }
    }

    /// Native function type of this signature
    pub fn function_type(&self) -> IrFunctionType {
        IrFunctionType::new(
            self.parameters.iter().map(|p| p.ty.clone()).collect(),
            self.return_type.clone(),
        )
    }
}

/// Function parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrParameter {
    /// Parameter name
    pub name: String,

    /// Parameter type
    pub ty: IrType,

    /// Register assigned to this parameter
    pub reg: IrId,
}

impl IrParameter {
    pub fn new(name: impl Into<String>, ty: IrType) -> Self {
        Self {
            name: name.into(),
            ty,
            reg: IrId::invalid(),
        }
    }
}

impl IrFunction {
    /// Create a new MIR function; parameter registers are allocated first.
    pub fn new(id: IrFunctionId, name: String, signature: IrFunctionSignature) -> Self {
        let mut function = Self {
            id,
            name,
            signature,
            cfg: IrControlFlowGraph::new(),
            register_types: HashMap::new(),
            linkage: Linkage::Public,
            source_location: IrSourceLocation::unknown(),
            next_reg_id: 0,
        };

        for i in 0..function.signature.parameters.len() {
            let reg = function.alloc_reg();
            let param_ty = function.signature.parameters[i].ty.clone();
            function.signature.parameters[i].reg = reg;
            function.register_types.insert(reg, param_ty);
        }

        function
    }

    /// Allocate a new register
    pub fn alloc_reg(&mut self) -> IrId {
        let id = IrId::new(self.next_reg_id);
        self.next_reg_id += 1;
        id
    }

    /// Get the entry block
    pub fn entry_block(&self) -> IrBlockId {
        self.cfg.entry_block
    }

    /// Get parameter register by index
    pub fn get_param_reg(&self, index: usize) -> Option<IrId> {
        self.signature.parameters.get(index).map(|p| p.reg)
    }

    /// Native function type of this function
    pub fn function_type(&self) -> IrFunctionType {
        self.signature.function_type()
    }

    /// Check if this function is a leaf function (doesn't call other functions)
    pub fn is_leaf(&self) -> bool {
        use super::{IrInstruction, IrTerminator};

        self.cfg.blocks.values().all(|block| {
            !block
                .instructions
                .iter()
                .any(|inst| matches!(inst, IrInstruction::Call { .. }))
                && !matches!(block.terminator, Some(IrTerminator::Invoke { .. }))
        })
    }

    /// Compute statistics for this function
    pub fn compute_stats(&self) -> FunctionStats {
        let mut stats = FunctionStats {
            block_count: self.cfg.blocks.len(),
            ..FunctionStats::default()
        };

        for block in self.cfg.blocks.values() {
            stats.instruction_count += block.instructions.len();
            stats.phi_count += block.phi_nodes.len();
        }

        stats
    }
}

/// Function statistics, logged after lowering
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FunctionStats {
    /// Number of basic blocks
    pub block_count: usize,

    /// Number of instructions
    pub instruction_count: usize,

    /// Number of phi nodes
    pub phi_count: usize,
}
