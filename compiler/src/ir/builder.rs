//! MIR Builder
//!
//! Builder interface for constructing MIR. The builder owns the module under
//! construction and keeps an insertion point (current function and block).
//! Appending to a block that already has a terminator is an error.

use tracing::debug;

use super::{
    BinaryOp, CastKind, CompareOp, IrArgs, IrBlockId, IrCallee, IrFunction, IrFunctionId,
    IrFunctionSignature, IrFunctionType, IrId, IrInstruction, IrModule, IrPhiNode, IrTerminator,
    IrType, IrValue, Lifetime, UnaryOp,
};
use crate::error::{LoweringError, LoweringResult};

/// MIR builder for constructing IR modules
pub struct IrBuilder {
    /// The module being built
    pub module: IrModule,

    /// Current function being built
    pub(crate) current_function: Option<IrFunctionId>,

    /// Current basic block being built
    pub(crate) current_block: Option<IrBlockId>,

    /// Attach labels to created blocks
    emit_labels: bool,
}

impl IrBuilder {
    /// Create a new IR builder
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module: IrModule::new(module_name),
            current_function: None,
            current_block: None,
            emit_labels: true,
        }
    }

    pub fn set_emit_labels(&mut self, emit: bool) {
        self.emit_labels = emit;
    }

    /// Consume the builder, returning the module
    pub fn finish(self) -> IrModule {
        self.module
    }

    // === Function Building ===

    /// Add a new function to the module without entering it
    pub fn declare_function(&mut self, name: String, signature: IrFunctionSignature) -> IrFunctionId {
        let id = self.module.alloc_function_id();
        self.module.add_function(IrFunction::new(id, name, signature))
    }

    /// Start building a new function
    pub fn start_function(&mut self, name: String, signature: IrFunctionSignature) -> IrFunctionId {
        let id = self.declare_function(name, signature);
        self.current_function = Some(id);
        self.current_block = Some(IrBlockId::entry());
        id
    }

    /// Enter a previously declared function at its entry block
    pub fn begin_function(&mut self, id: IrFunctionId) -> LoweringResult<()> {
        let entry = self
            .module
            .functions
            .get(&id)
            .map(|f| f.entry_block())
            .ok_or_else(|| LoweringError::internal(format!("function {} is not declared", id)))?;
        debug!("begin function {}", id);
        self.current_function = Some(id);
        self.current_block = Some(entry);
        Ok(())
    }

    /// Finish building the current function
    pub fn finish_function(&mut self) {
        self.current_function = None;
        self.current_block = None;
    }

    /// Get the current function
    pub fn current_function(&self) -> Option<&IrFunction> {
        self.current_function.and_then(|id| self.module.functions.get(&id))
    }

    /// Get the current function mutably
    pub fn current_function_mut(&mut self) -> Option<&mut IrFunction> {
        self.current_function
            .and_then(move |id| self.module.functions.get_mut(&id))
    }

    fn function_mut(&mut self) -> LoweringResult<&mut IrFunction> {
        self.current_function_mut()
            .ok_or_else(|| LoweringError::internal("no function is being built"))
    }

    fn function_name(&self) -> String {
        self.current_function()
            .map(|f| f.name.clone())
            .unwrap_or_default()
    }

    // === Block Building ===

    /// Create a new basic block in the current function
    pub fn create_block(&mut self) -> LoweringResult<IrBlockId> {
        let id = self.function_mut()?.cfg.create_block();
        debug!("created block {}", id);
        Ok(id)
    }

    /// Create a new basic block with a label
    pub fn create_block_with_label(&mut self, label: &str) -> LoweringResult<IrBlockId> {
        let emit_labels = self.emit_labels;
        let block_id = self.create_block()?;
        if emit_labels {
            if let Some(block) = self.function_mut()?.cfg.get_block_mut(block_id) {
                block.label = Some(label.to_string());
            }
        }
        Ok(block_id)
    }

    /// Switch to building in a different block
    pub fn switch_to_block(&mut self, block: IrBlockId) {
        self.current_block = Some(block);
    }

    /// Get the current block
    pub fn current_block(&self) -> Option<IrBlockId> {
        self.current_block
    }

    /// Get the current block, failing when there is no insertion point
    pub fn insertion_block(&self) -> LoweringResult<IrBlockId> {
        self.current_block
            .ok_or_else(|| LoweringError::internal("no insertion block"))
    }

    /// Whether the given block already ends in a terminator
    pub fn block_is_terminated(&self, block: IrBlockId) -> bool {
        self.current_function()
            .and_then(|f| f.cfg.get_block(block))
            .map(|b| b.is_terminated())
            .unwrap_or(true)
    }

    /// Whether the current insertion point is dead (terminated or absent)
    pub fn is_terminated(&self) -> bool {
        match self.current_block {
            Some(block) => self.block_is_terminated(block),
            None => true,
        }
    }

    // === Register Management ===

    /// Allocate a new register of the given type in the current function
    pub fn alloc_reg(&mut self, ty: IrType) -> LoweringResult<IrId> {
        let func = self.function_mut()?;
        let reg = func.alloc_reg();
        func.register_types.insert(reg, ty);
        Ok(reg)
    }

    /// Get the type of a register
    pub fn get_register_type(&self, reg: IrId) -> Option<IrType> {
        self.current_function()?.register_types.get(&reg).cloned()
    }

    // === Instruction Building ===

    /// Add an instruction to the current block
    fn add_instruction(&mut self, inst: IrInstruction) -> LoweringResult<()> {
        let block_id = self.insertion_block()?;
        let function = self.function_name();
        let block = self
            .function_mut()?
            .cfg
            .get_block_mut(block_id)
            .ok_or_else(|| LoweringError::internal(format!("block {} does not exist", block_id)))?;
        if block.is_terminated() {
            return Err(LoweringError::TerminatedBlock {
                function,
                block: block_id,
            });
        }
        block.add_instruction(inst);
        Ok(())
    }

    /// Build a constant instruction
    pub fn build_const(&mut self, value: IrValue) -> LoweringResult<IrId> {
        let dest = self.alloc_reg(value.ty())?;
        self.add_instruction(IrInstruction::Const { dest, value })?;
        Ok(dest)
    }

    /// Build a constant with an explicit type (used for `undef` of any type)
    pub fn build_typed_const(&mut self, value: IrValue, ty: IrType) -> LoweringResult<IrId> {
        let dest = self.alloc_reg(ty)?;
        self.add_instruction(IrInstruction::Const { dest, value })?;
        Ok(dest)
    }

    /// Build a stack slot in the entry block prologue.
    ///
    /// Slots always go before any non-alloc instruction of the entry block so
    /// they dominate every use regardless of where the variable is declared.
    pub fn build_alloc(&mut self, ty: IrType) -> LoweringResult<IrId> {
        let dest = self.alloc_reg(IrType::Ptr)?;
        let func = self.function_mut()?;
        let entry = func.entry_block();
        let block = func
            .cfg
            .get_block_mut(entry)
            .ok_or_else(|| LoweringError::internal("function has no entry block"))?;
        let position = block
            .instructions
            .iter()
            .take_while(|inst| matches!(inst, IrInstruction::Alloc { .. }))
            .count();
        block
            .instructions
            .insert(position, IrInstruction::Alloc { dest, ty });
        Ok(dest)
    }

    /// Build a load instruction
    pub fn build_load(&mut self, ptr: IrId, ty: IrType) -> LoweringResult<IrId> {
        let dest = self.alloc_reg(ty.clone())?;
        self.add_instruction(IrInstruction::Load { dest, ptr, ty })?;
        Ok(dest)
    }

    /// Build a store instruction
    pub fn build_store(&mut self, ptr: IrId, value: IrId) -> LoweringResult<()> {
        self.add_instruction(IrInstruction::Store { ptr, value })
    }

    /// Build an element address computation
    pub fn build_gep(&mut self, ptr: IrId, indices: Vec<u32>, ty: IrType) -> LoweringResult<IrId> {
        let dest = self.alloc_reg(IrType::Ptr)?;
        self.add_instruction(IrInstruction::GetElementPtr {
            dest,
            ptr,
            indices,
            ty,
        })?;
        Ok(dest)
    }

    /// Build a binary operation; the result has the type of the left operand
    pub fn build_binop(&mut self, op: BinaryOp, left: IrId, right: IrId) -> LoweringResult<IrId> {
        let ty = self
            .get_register_type(left)
            .or_else(|| self.get_register_type(right))
            .unwrap_or(IrType::I32);
        let dest = self.alloc_reg(ty)?;
        self.add_instruction(IrInstruction::BinOp {
            dest,
            op,
            left,
            right,
        })?;
        Ok(dest)
    }

    /// Build a unary operation
    pub fn build_unop(&mut self, op: UnaryOp, operand: IrId) -> LoweringResult<IrId> {
        let ty = self.get_register_type(operand).unwrap_or(IrType::I32);
        let dest = self.alloc_reg(ty)?;
        self.add_instruction(IrInstruction::UnOp { dest, op, operand })?;
        Ok(dest)
    }

    /// Build a comparison operation
    pub fn build_cmp(&mut self, op: CompareOp, left: IrId, right: IrId) -> LoweringResult<IrId> {
        let dest = self.alloc_reg(IrType::Bool)?;
        self.add_instruction(IrInstruction::Cmp {
            dest,
            op,
            left,
            right,
        })?;
        Ok(dest)
    }

    /// Build a representation change
    pub fn build_cast(&mut self, src: IrId, kind: CastKind, to_ty: IrType) -> LoweringResult<IrId> {
        let dest = self.alloc_reg(to_ty.clone())?;
        self.add_instruction(IrInstruction::Cast {
            dest,
            src,
            kind,
            to_ty,
        })?;
        Ok(dest)
    }

    /// Build a bitcast
    pub fn build_bitcast(&mut self, src: IrId, to_ty: IrType) -> LoweringResult<IrId> {
        self.build_cast(src, CastKind::BitCast, to_ty)
    }

    /// Build a call; returns the result register unless the signature is void
    pub fn build_call(
        &mut self,
        callee: IrCallee,
        args: IrArgs,
        signature: IrFunctionType,
        lifetime: Lifetime,
    ) -> LoweringResult<Option<IrId>> {
        let dest = if signature.returns_void() {
            None
        } else {
            Some(self.alloc_reg((*signature.return_type).clone())?)
        };
        self.add_instruction(IrInstruction::Call {
            dest,
            callee,
            args,
            signature,
            lifetime,
        })?;
        Ok(dest)
    }

    /// Build the landing pad head instruction
    pub fn build_landing_pad(&mut self) -> LoweringResult<IrId> {
        let dest = self.alloc_reg(IrType::Ptr)?;
        self.add_instruction(IrInstruction::LandingPad { dest })?;
        Ok(dest)
    }

    // === Terminator Building ===

    /// Set the terminator for the current block and record CFG edges
    fn set_terminator(&mut self, term: IrTerminator) -> LoweringResult<()> {
        let block_id = self.insertion_block()?;
        let function = self.function_name();
        let func = self.function_mut()?;
        let block = func
            .cfg
            .get_block_mut(block_id)
            .ok_or_else(|| LoweringError::internal(format!("block {} does not exist", block_id)))?;
        if block.is_terminated() {
            return Err(LoweringError::TerminatedBlock {
                function,
                block: block_id,
            });
        }

        let successors = term.successors();
        debug!("terminate {} -> {:?}", block_id, successors);
        block.terminator = Some(term);
        for succ in successors {
            func.cfg.connect_blocks(block_id, succ);
        }
        Ok(())
    }

    /// Build an unconditional branch
    pub fn build_branch(&mut self, target: IrBlockId) -> LoweringResult<()> {
        self.set_terminator(IrTerminator::Branch { target })
    }

    /// Build a conditional branch
    pub fn build_cond_branch(
        &mut self,
        condition: IrId,
        true_target: IrBlockId,
        false_target: IrBlockId,
    ) -> LoweringResult<()> {
        self.set_terminator(IrTerminator::CondBranch {
            condition,
            true_target,
            false_target,
        })
    }

    /// Build a return instruction
    pub fn build_return(&mut self, value: Option<IrId>) -> LoweringResult<()> {
        self.set_terminator(IrTerminator::Return { value })
    }

    /// Build an invoke terminator; the result register is defined on the
    /// normal edge
    #[allow(clippy::too_many_arguments)]
    pub fn build_invoke(
        &mut self,
        callee: IrCallee,
        args: IrArgs,
        signature: IrFunctionType,
        lifetime: Lifetime,
        normal: IrBlockId,
        unwind: IrBlockId,
    ) -> LoweringResult<Option<IrId>> {
        let dest = if signature.returns_void() {
            None
        } else {
            Some(self.alloc_reg((*signature.return_type).clone())?)
        };
        self.set_terminator(IrTerminator::Invoke {
            dest,
            callee,
            args,
            signature,
            lifetime,
            normal,
            unwind,
        })?;
        Ok(dest)
    }

    /// Build an unreachable terminator
    pub fn build_unreachable(&mut self) -> LoweringResult<()> {
        self.set_terminator(IrTerminator::Unreachable)
    }

    // === Phi Node Building ===

    /// Add a phi node to a block
    pub fn build_phi(&mut self, block: IrBlockId, ty: IrType) -> LoweringResult<IrId> {
        let dest = self.alloc_reg(ty.clone())?;
        let phi = IrPhiNode {
            dest,
            incoming: Vec::new(),
            ty,
        };

        self.function_mut()?
            .cfg
            .get_block_mut(block)
            .ok_or_else(|| LoweringError::internal(format!("block {} does not exist", block)))?
            .add_phi(phi);

        Ok(dest)
    }

    /// Add an incoming value to a phi node
    pub fn add_phi_incoming(
        &mut self,
        block: IrBlockId,
        phi_dest: IrId,
        from_block: IrBlockId,
        value: IrId,
    ) -> LoweringResult<()> {
        self.function_mut()?
            .cfg
            .get_block_mut(block)
            .and_then(|b| b.phi_nodes.iter_mut().find(|p| p.dest == phi_dest))
            .map(|phi| phi.incoming.push((from_block, value)))
            .ok_or_else(|| LoweringError::internal(format!("phi {} not found in {}", phi_dest, block)))
    }

    // === Convenience Methods ===

    /// Build an integer constant of the given native type
    pub fn build_int(&mut self, value: i64, ty: &IrType) -> LoweringResult<IrId> {
        let ir_value = match ty {
            IrType::I8 => IrValue::I8(value as i8),
            IrType::I16 => IrValue::I16(value as i16),
            IrType::I32 => IrValue::I32(value as i32),
            IrType::I64 => IrValue::I64(value),
            other => {
                return Err(LoweringError::TypeMismatch {
                    expected: "integer".to_string(),
                    found: other.to_string(),
                    location: Default::default(),
                })
            }
        };
        self.build_const(ir_value)
    }

    /// Build a boolean constant
    pub fn build_bool(&mut self, value: bool) -> LoweringResult<IrId> {
        self.build_const(IrValue::Bool(value))
    }

    /// Build a null pointer constant
    pub fn build_null(&mut self) -> LoweringResult<IrId> {
        self.build_const(IrValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IrParameter;

    #[test]
    fn test_build_simple_function() {
        let mut builder = IrBuilder::new("test_module");

        let sig = IrFunctionSignature::new(
            vec![IrParameter::new("a", IrType::I32), IrParameter::new("b", IrType::I32)],
            IrType::I32,
        );
        let func_id = builder.start_function("add".to_string(), sig);

        let a = builder.current_function().unwrap().get_param_reg(0).unwrap();
        let b = builder.current_function().unwrap().get_param_reg(1).unwrap();
        let sum = builder.build_binop(BinaryOp::Add, a, b).unwrap();
        builder.build_return(Some(sum)).unwrap();
        builder.finish_function();

        let func = &builder.module.functions[&func_id];
        assert_eq!(func.cfg.blocks.len(), 1);
        assert_eq!(func.register_types[&sum], IrType::I32);
        assert!(func.cfg.verify().is_ok());
    }

    #[test]
    fn test_append_after_terminator_fails() {
        let mut builder = IrBuilder::new("test_module");
        builder.start_function("f".to_string(), IrFunctionSignature::new(Vec::new(), IrType::Void));
        builder.build_return(None).unwrap();

        assert!(builder.is_terminated());
        assert!(matches!(
            builder.build_bool(true),
            Err(LoweringError::TerminatedBlock { .. })
        ));
        assert!(matches!(
            builder.build_unreachable(),
            Err(LoweringError::TerminatedBlock { .. })
        ));
    }

    #[test]
    fn test_allocs_stay_in_entry_prologue() {
        let mut builder = IrBuilder::new("test_module");
        let id = builder.start_function("f".to_string(), IrFunctionSignature::new(Vec::new(), IrType::Void));
        let one = builder.build_int(1, &IrType::I32).unwrap();
        let next = builder.create_block().unwrap();
        builder.build_branch(next).unwrap();
        builder.switch_to_block(next);
        let slot = builder.build_alloc(IrType::I32).unwrap();
        builder.build_store(slot, one).unwrap();
        builder.build_return(None).unwrap();

        let entry = &builder.module.functions[&id].cfg.blocks[&IrBlockId::entry()];
        assert!(matches!(entry.instructions[0], IrInstruction::Alloc { dest, .. } if dest == slot));
        assert_eq!(
            builder.module.functions[&id].cfg.blocks[&next].predecessors,
            vec![IrBlockId::entry()]
        );
    }

    #[test]
    fn test_phi_incoming() {
        let mut builder = IrBuilder::new("test_module");
        builder.start_function("f".to_string(), IrFunctionSignature::new(Vec::new(), IrType::I32));
        let merge = builder.create_block().unwrap();
        let phi = builder.build_phi(merge, IrType::I32).unwrap();
        let value = builder.build_int(7, &IrType::I32).unwrap();
        builder.build_branch(merge).unwrap();
        builder
            .add_phi_incoming(merge, phi, IrBlockId::entry(), value)
            .unwrap();
        builder.switch_to_block(merge);
        builder.build_return(Some(phi)).unwrap();

        let func = builder.current_function().unwrap();
        assert_eq!(
            func.cfg.blocks[&merge].phi_nodes[0].incoming,
            vec![(IrBlockId::entry(), value)]
        );
    }
}
