//! MIR Instructions
//!
//! Defines the non-terminating instruction set. Control transfer lives in
//! [`IrTerminator`](super::IrTerminator); everything here falls through.

use super::{IrFunctionId, IrFunctionType, IrId, IrType, IrValue};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Argument list of a call; most calls take few arguments.
pub type IrArgs = SmallVec<[IrId; 4]>;

/// MIR instruction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IrInstruction {
    // === Value Operations ===
    /// Load constant value
    Const { dest: IrId, value: IrValue },

    // === Memory Operations ===
    /// Stack slot for a mutable local; only emitted in the entry prologue
    Alloc { dest: IrId, ty: IrType },

    /// Load value from memory
    Load { dest: IrId, ptr: IrId, ty: IrType },

    /// Store value to memory
    Store { ptr: IrId, value: IrId },

    /// Address of an element inside an aggregate pointed to by `ptr`
    GetElementPtr {
        dest: IrId,
        ptr: IrId,
        indices: Vec<u32>,
        ty: IrType,
    },

    // === Arithmetic Operations ===
    /// Binary arithmetic operation
    BinOp {
        dest: IrId,
        op: BinaryOp,
        left: IrId,
        right: IrId,
    },

    /// Unary operation
    UnOp { dest: IrId, op: UnaryOp, operand: IrId },

    /// Compare operation
    Cmp {
        dest: IrId,
        op: CompareOp,
        left: IrId,
        right: IrId,
    },

    // === Type Operations ===
    /// Representation change between native types
    Cast {
        dest: IrId,
        src: IrId,
        kind: CastKind,
        to_ty: IrType,
    },

    // === Calls ===
    /// Call that cannot transfer control to a landing pad
    Call {
        dest: Option<IrId>,
        callee: IrCallee,
        args: IrArgs,
        signature: IrFunctionType,
        lifetime: Lifetime,
    },

    // === Exception Handling ===
    /// First instruction of a landing pad: the native exception record
    LandingPad { dest: IrId },
}

/// Call target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IrCallee {
    /// Function known at compile time (defined or extern)
    Direct(IrFunctionId),
    /// Function pointer computed at runtime
    Indirect(IrId),
}

/// Lifetime hint forwarded to the memory manager; never interpreted here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Lifetime {
    Local,
    ReturnValue,
    Global,
    Escaping,
    #[default]
    Irrelevant,
}

/// Binary operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Rem,

    // Bitwise
    And,
    Or,
    Xor,
    Shl,
    Shr,

    // Floating point
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
}

/// Unary operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
    FNeg,
}

/// Comparison operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    // Integer / pointer comparisons
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    // Floating point comparisons
    FEq,
    FNe,
    FLt,
    FLe,
    FGt,
    FGe,
}

/// Native conversions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CastKind {
    Trunc,
    SignExtend,
    ZeroExtend,
    IntToFloat,
    FloatToInt,
    FloatResize,
    BitCast,
}

impl IrInstruction {
    /// Get the destination register if this instruction produces a value
    pub fn dest(&self) -> Option<IrId> {
        match self {
            IrInstruction::Const { dest, .. }
            | IrInstruction::Alloc { dest, .. }
            | IrInstruction::Load { dest, .. }
            | IrInstruction::GetElementPtr { dest, .. }
            | IrInstruction::BinOp { dest, .. }
            | IrInstruction::UnOp { dest, .. }
            | IrInstruction::Cmp { dest, .. }
            | IrInstruction::Cast { dest, .. }
            | IrInstruction::LandingPad { dest } => Some(*dest),

            IrInstruction::Call { dest, .. } => *dest,

            IrInstruction::Store { .. } => None,
        }
    }

    /// Get all registers used by this instruction
    pub fn uses(&self) -> Vec<IrId> {
        match self {
            IrInstruction::Const { .. } | IrInstruction::Alloc { .. } | IrInstruction::LandingPad { .. } => {
                vec![]
            }
            IrInstruction::Load { ptr, .. } => vec![*ptr],
            IrInstruction::Store { ptr, value } => vec![*ptr, *value],
            IrInstruction::GetElementPtr { ptr, .. } => vec![*ptr],
            IrInstruction::BinOp { left, right, .. } => vec![*left, *right],
            IrInstruction::UnOp { operand, .. } => vec![*operand],
            IrInstruction::Cmp { left, right, .. } => vec![*left, *right],
            IrInstruction::Cast { src, .. } => vec![*src],
            IrInstruction::Call { callee, args, .. } => {
                let mut uses = Vec::with_capacity(args.len() + 1);
                if let IrCallee::Indirect(ptr) = callee {
                    uses.push(*ptr);
                }
                uses.extend(args.iter().copied());
                uses
            }
        }
    }

    /// Check if this instruction has side effects
    pub fn has_side_effects(&self) -> bool {
        matches!(
            self,
            IrInstruction::Store { .. } | IrInstruction::Call { .. } | IrInstruction::LandingPad { .. }
        )
    }
}
