//! Lowered values

use crate::hir::HirType;
use crate::ir::IrId;

/// Result of lowering an expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Value {
    pub repr: ValueRepr,
    pub ty: HirType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueRepr {
    Register(IrId),
    /// The unit singleton; materialized only when a register is needed
    Unit,
    /// The expression never completes normally
    Unreachable,
}

impl Value {
    pub fn register(reg: IrId, ty: HirType) -> Self {
        Self {
            repr: ValueRepr::Register(reg),
            ty,
        }
    }

    pub fn unit() -> Self {
        Self {
            repr: ValueRepr::Unit,
            ty: HirType::Unit,
        }
    }

    pub fn unreachable(ty: HirType) -> Self {
        Self {
            repr: ValueRepr::Unreachable,
            ty,
        }
    }

    pub fn is_unreachable(&self) -> bool {
        self.repr == ValueRepr::Unreachable
    }

    pub fn reg(&self) -> Option<IrId> {
        match self.repr {
            ValueRepr::Register(reg) => Some(reg),
            _ => None,
        }
    }

    /// The same value viewed at another static type
    pub fn with_type(self, ty: HirType) -> Self {
        Self { ty, ..self }
    }
}
