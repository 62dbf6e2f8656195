//! Continuation blocks
//!
//! The single merge mechanism of the lowering: a block where several
//! control-flow paths join, with a phi placeholder carrying the merged value
//! unless the merged type has no values. Used by `when`, `try`, loops,
//! inlined-body returns, instance checks and the singleton guard.

use super::value::Value;
use super::Lowerer;
use crate::error::LoweringResult;
use crate::hir::HirType;
use crate::ir::{IrBlockId, IrId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContinuationBlock {
    pub block: IrBlockId,
    pub phi: Option<IrId>,
    pub ty: HirType,
}

impl ContinuationBlock {
    /// Value available at the head of the block
    pub fn value(&self) -> Value {
        match self.phi {
            Some(phi) => Value::register(phi, self.ty),
            None => Value::unit().with_type(self.ty),
        }
    }
}

impl<'a> Lowerer<'a> {
    /// Allocate a continuation block for values of type `ty`
    pub(crate) fn continuation(&mut self, ty: HirType, label: &str) -> LoweringResult<ContinuationBlock> {
        let block = self.builder.create_block_with_label(label)?;
        let phi = if ty.is_valueless() {
            None
        } else {
            Some(self.builder.build_phi(block, ty.storage_type())?)
        };
        Ok(ContinuationBlock { block, phi, ty })
    }

    /// Branch to `target`, recording `value` as the incoming value of the
    /// current block. Does nothing on a dead path.
    pub(crate) fn jump(&mut self, target: &ContinuationBlock, value: Value) -> LoweringResult<()> {
        if self.builder.is_terminated() {
            return Ok(());
        }
        let from = self.builder.insertion_block()?;
        let incoming = match target.phi {
            Some(_) => Some(self.materialize(value)?),
            None => None,
        };
        self.builder.build_branch(target.block)?;
        if let (Some(phi), Some(incoming)) = (target.phi, incoming) {
            self.builder
                .add_phi_incoming(target.block, phi, from, incoming)?;
        }
        Ok(())
    }

    /// Continue lowering at `target`. A continuation nothing jumps to is dead:
    /// it gets an `unreachable` terminator and the result is unreachable.
    pub(crate) fn resume_at(&mut self, target: &ContinuationBlock) -> LoweringResult<Value> {
        if self.enter_block(target.block)? {
            Ok(target.value())
        } else {
            Ok(Value::unreachable(target.ty))
        }
    }

    /// Switch to `block`; returns false (after terminating it) when the block
    /// has no predecessors
    pub(crate) fn enter_block(&mut self, block: IrBlockId) -> LoweringResult<bool> {
        self.builder.switch_to_block(block);
        let live = self
            .builder
            .current_function()
            .and_then(|f| f.cfg.get_block(block))
            .map(|b| !b.predecessors.is_empty())
            .unwrap_or(false);
        if !live && !self.builder.is_terminated() {
            self.builder.build_unreachable()?;
        }
        Ok(live)
    }
}
