//! Structured control flow: `when`, loops, blocks, non-local exits and
//! inlined bodies

use super::scope::{ScopeKind, Slot};
use super::value::Value;
use super::Lowerer;
use crate::error::LoweringResult;
use crate::hir::{FunctionId, HirBranch, HirExpr, HirStatement, HirType, LoopId, VarId};
use crate::ir::IrValue;

impl<'a> Lowerer<'a> {
    /// Branches are tested in order. The merge block is omitted only when the
    /// `when` is exhaustive and of type `Nothing`, since then no path reaches
    /// it.
    pub(crate) fn lower_when(&mut self, expr: &'a HirExpr, branches: &'a [HirBranch]) -> LoweringResult<Value> {
        let exhaustive = branches.last().map_or(false, HirBranch::is_unconditional);
        let merge = if expr.ty.is_nothing() && exhaustive {
            None
        } else {
            Some(self.continuation(expr.ty, "when.merge")?)
        };

        for branch in branches {
            if branch.is_unconditional() {
                let value = self.lower_expr(&branch.result)?;
                if let Some(merge) = &merge {
                    self.jump(merge, value)?;
                }
                break;
            }

            let Some(condition) = self.eval(&branch.condition)? else {
                break;
            };
            let condition = self.materialize(condition)?;
            let then_block = self.builder.create_block_with_label("when.then")?;
            let next_block = self.builder.create_block_with_label("when.next")?;
            self.builder
                .build_cond_branch(condition, then_block, next_block)?;

            self.builder.switch_to_block(then_block);
            let value = self.lower_expr(&branch.result)?;
            if let Some(merge) = &merge {
                self.jump(merge, value)?;
            }
            self.builder.switch_to_block(next_block);
        }

        match merge {
            Some(merge) => {
                // Fallthrough of a non-exhaustive `when` carries no value
                if !exhaustive && !self.builder.is_terminated() {
                    let fallthrough = match merge.phi {
                        Some(_) => {
                            let undef = self
                                .builder
                                .build_typed_const(IrValue::Undef, expr.ty.storage_type())?;
                            Value::register(undef, expr.ty)
                        }
                        None => Value::unit(),
                    };
                    self.jump(&merge, fallthrough)?;
                }
                self.resume_at(&merge)
            }
            None => {
                if !self.builder.is_terminated() {
                    self.builder.build_unreachable()?;
                }
                Ok(Value::unreachable(expr.ty))
            }
        }
    }

    /// `br check; check: condbr body, exit; body: ...; br check`
    pub(crate) fn lower_while(
        &mut self,
        loop_id: LoopId,
        condition: &'a HirExpr,
        body: &'a HirExpr,
    ) -> LoweringResult<Value> {
        let check = self.builder.create_block_with_label("while.check")?;
        let body_block = self.builder.create_block_with_label("while.body")?;
        let exit = self.continuation(HirType::Unit, "while.exit")?;
        self.builder.build_branch(check)?;

        self.with_scope(ScopeKind::Loop { loop_id, exit, check }, |this| {
            this.builder.switch_to_block(check);
            let Some(condition) = this.eval(condition)? else {
                return Ok(());
            };
            let condition = this.materialize(condition)?;
            this.builder
                .build_cond_branch(condition, body_block, exit.block)?;

            this.builder.switch_to_block(body_block);
            if this.eval(body)?.is_some() {
                this.builder.build_branch(check)?;
            }
            Ok(())
        })?;

        self.resume_at(&exit)
    }

    /// `br body; body: ...; br check; check: condbr body, exit`
    pub(crate) fn lower_do_while(
        &mut self,
        loop_id: LoopId,
        body: &'a HirExpr,
        condition: &'a HirExpr,
    ) -> LoweringResult<Value> {
        let body_block = self.builder.create_block_with_label("do.body")?;
        let check = self.builder.create_block_with_label("do.check")?;
        let exit = self.continuation(HirType::Unit, "do.exit")?;
        self.builder.build_branch(body_block)?;

        self.with_scope(ScopeKind::Loop { loop_id, exit, check }, |this| {
            this.builder.switch_to_block(body_block);
            if this.eval(body)?.is_some() {
                this.builder.build_branch(check)?;
            }

            if !this.enter_block(check)? {
                return Ok(());
            }
            let Some(condition) = this.eval(condition)? else {
                return Ok(());
            };
            let condition = this.materialize(condition)?;
            this.builder
                .build_cond_branch(condition, body_block, exit.block)
        })?;

        self.resume_at(&exit)
    }

    /// Statements run in a fresh variable scope. The value is the value of
    /// the last expression statement unless the block is of type `Unit`.
    pub(crate) fn lower_block(&mut self, expr: &'a HirExpr, statements: &'a [HirStatement]) -> LoweringResult<Value> {
        self.with_scope(ScopeKind::variable(), |this| {
            let mut last = Value::unit();
            for statement in statements {
                if this.builder.is_terminated() {
                    return Ok(Value::unreachable(expr.ty));
                }
                last = match statement {
                    HirStatement::Expression(e) => this.lower_expr(e)?,
                    HirStatement::Variable {
                        id,
                        ty,
                        mutable,
                        initializer,
                        ..
                    } => {
                        this.lower_variable(*id, *ty, *mutable, initializer.as_ref())?;
                        Value::unit()
                    }
                };
            }

            if this.builder.is_terminated() || last.is_unreachable() {
                Ok(Value::unreachable(expr.ty))
            } else if expr.ty.is_unit() {
                Ok(Value::unit())
            } else {
                Ok(last.with_type(expr.ty))
            }
        })
    }

    /// Mutable variables, and variables without an initializer, get a stack
    /// slot in the entry block; the others are bound to their value.
    fn lower_variable(
        &mut self,
        id: VarId,
        ty: HirType,
        mutable: bool,
        initializer: Option<&'a HirExpr>,
    ) -> LoweringResult<()> {
        let value = match initializer {
            Some(init) => match self.eval(init)? {
                Some(value) => Some(value.with_type(ty)),
                None => return Ok(()),
            },
            None => None,
        };

        match value {
            Some(value) if !mutable => {
                self.declare_variable(id, Slot::Value(value))?;
            }
            _ => {
                let ptr = self.builder.build_alloc(ty.storage_type())?;
                let initial = match value {
                    Some(value) => self.materialize(value)?,
                    None => self.builder.build_const(ty.storage_type().default_value())?,
                };
                self.builder.build_store(ptr, initial)?;
                self.declare_variable(id, Slot::Stack { ptr, ty })?;
            }
        }
        Ok(())
    }

    pub(crate) fn lower_return(&mut self, target: FunctionId, value: &'a HirExpr) -> LoweringResult<Value> {
        if let Some(value) = self.eval(value)? {
            self.gen_return(target, value)?;
        }
        Ok(Value::unreachable(HirType::NOTHING))
    }

    pub(crate) fn lower_break(&mut self, loop_id: LoopId) -> LoweringResult<Value> {
        self.gen_break(loop_id)?;
        Ok(Value::unreachable(HirType::NOTHING))
    }

    pub(crate) fn lower_continue(&mut self, loop_id: LoopId) -> LoweringResult<Value> {
        self.gen_continue(loop_id)?;
        Ok(Value::unreachable(HirType::NOTHING))
    }

    /// Returns targeting `function` inside the body resume after it
    pub(crate) fn lower_inlined_body(
        &mut self,
        expr: &'a HirExpr,
        function: FunctionId,
        body: &'a HirExpr,
    ) -> LoweringResult<Value> {
        let exit = self.continuation(expr.ty, "inline.exit")?;
        self.with_scope(ScopeKind::InlinedBody { function, exit }, |this| {
            if let Some(value) = this.eval(body)? {
                this.jump(&exit, value)?;
            }
            Ok(())
        })?;
        self.resume_at(&exit)
    }
}
