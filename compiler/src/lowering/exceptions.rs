//! Exception handling and finalization
//!
//! `try` lowers into nested scopes: a finalizing scope (when a `finally` is
//! present) around a catching scope (when there are catch clauses) around
//! the guarded body. Landing pads and handlers are created lazily by the
//! scopes on the first throwing call or `throw` inside them.

use super::collaborators::RuntimeFunction;
use super::continuation::ContinuationBlock;
use super::scope::{FinallyScope, Guard, ScopeKind, Slot};
use super::value::Value;
use super::Lowerer;
use crate::error::{LoweringError, LoweringResult};
use crate::hir::{HirCatch, HirExpr, HirType};
use crate::ir::{IrId, Lifetime};
use log::debug;
use smallvec::smallvec;

impl<'a> Lowerer<'a> {
    pub(crate) fn lower_try(
        &mut self,
        expr: &'a HirExpr,
        body: &'a HirExpr,
        catches: &'a [HirCatch],
        finally: Option<&'a HirExpr>,
    ) -> LoweringResult<Value> {
        let Some(finalizer) = finally else {
            return self.lower_catching(expr.ty, body, catches);
        };

        // Normal completion passes through its own cleanup continuation
        let normal = self.continuation(expr.ty, "finally.normal")?;
        let handler = self.with_scope(ScopeKind::Finally(FinallyScope::new(finalizer)), |this| {
            let value = this.lower_catching(expr.ty, body, catches)?;
            if !value.is_unreachable() {
                this.jump(&normal, value)?;
            }
            Ok(this.handler_of(this.current_scope))
        })?;

        // Exceptional completion: run the finalizer, then rethrow outwards
        if let Some(handler) = handler {
            debug!("finally handler {}", handler.block);
            let scope = self.current_scope;
            self.at_block(handler.block, scope, |this| {
                let exception = this.materialize(handler.value())?;
                if this.eval(finalizer)?.is_some() {
                    this.gen_throw(exception)?;
                }
                Ok(())
            })?;
        }

        let value = self.resume_at(&normal)?;
        if value.is_unreachable() {
            return Ok(value);
        }
        match self.eval(finalizer)? {
            Some(_) => Ok(value),
            None => Ok(Value::unreachable(expr.ty)),
        }
    }

    /// Guarded body plus catch dispatch
    fn lower_catching(
        &mut self,
        ty: HirType,
        body: &'a HirExpr,
        catches: &'a [HirCatch],
    ) -> LoweringResult<Value> {
        if catches.is_empty() {
            return self.lower_expr(body).map(|v| v.with_type(ty));
        }

        let result = self.continuation(ty, "try.result")?;
        let handler = self.with_scope(ScopeKind::Catch(Guard::default()), |this| {
            let value = this.lower_expr(body)?;
            if !value.is_unreachable() {
                this.jump(&result, value)?;
            }
            Ok(this.handler_of(this.current_scope))
        })?;

        if let Some(handler) = handler {
            self.dispatch_catches(&handler, catches, &result)?;
        }
        self.resume_at(&result)
    }

    /// Test the clauses in declaration order; the first match binds the
    /// exception and runs its body. Without a match the exception is thrown
    /// to the enclosing context.
    fn dispatch_catches(
        &mut self,
        handler: &ContinuationBlock,
        catches: &'a [HirCatch],
        result: &ContinuationBlock,
    ) -> LoweringResult<()> {
        if !self.enter_block(handler.block)? {
            return Ok(());
        }
        let exception = self.materialize(handler.value())?;

        for clause in catches {
            if clause.ty.is_any() {
                return self.lower_catch_body(clause, exception, result);
            }
            let class = clause.ty.class_id().ok_or_else(|| LoweringError::TypeMismatch {
                expected: "class type in catch clause".to_string(),
                found: clause.ty.to_string(),
                location: clause.body.location,
            })?;
            let type_info = self.type_info_ref(class)?;
            let matches = self
                .call_runtime(RuntimeFunction::IsInstance, &[exception, type_info])?
                .ok_or_else(|| LoweringError::internal("instance check produced no value"))?;
            let body = self.builder.create_block_with_label("catch.body")?;
            let next = self.builder.create_block_with_label("catch.next")?;
            self.builder.build_cond_branch(matches, body, next)?;

            self.builder.switch_to_block(body);
            self.lower_catch_body(clause, exception, result)?;
            self.builder.switch_to_block(next);
        }

        self.gen_throw(exception)
    }

    fn lower_catch_body(
        &mut self,
        clause: &'a HirCatch,
        exception: IrId,
        result: &ContinuationBlock,
    ) -> LoweringResult<()> {
        self.with_scope(ScopeKind::variable(), |this| {
            this.declare_variable(
                clause.parameter,
                Slot::Value(Value::register(exception, clause.ty)),
            )?;
            let value = this.lower_expr(&clause.body)?;
            if !value.is_unreachable() {
                this.jump(result, value)?;
            }
            Ok(())
        })
    }

    /// Exception object of a landing pad record; leaves the native catch
    pub(crate) fn begin_catch(&mut self, record: IrId) -> LoweringResult<IrId> {
        let exception = self
            .call_runtime(RuntimeFunction::BeginCatch, &[record])?
            .ok_or_else(|| LoweringError::internal("begin-catch produced no value"))?;
        self.call_runtime(RuntimeFunction::EndCatch, &[])?;
        Ok(exception)
    }

    /// Raise `exception` out of the current function
    pub(crate) fn throw_to_caller(&mut self, exception: IrId) -> LoweringResult<()> {
        let target = self.runtime_function(RuntimeFunction::ThrowException);
        self.builder
            .build_call(target.callee, smallvec![exception], target.signature, Lifetime::Irrelevant)?;
        Ok(())
    }

    pub(crate) fn lower_throw(&mut self, exception: &'a HirExpr) -> LoweringResult<Value> {
        let Some(value) = self.eval(exception)? else {
            return Ok(Value::unreachable(HirType::NOTHING));
        };
        let reg = self.materialize(value)?;
        self.gen_throw(reg)?;
        Ok(Value::unreachable(HirType::NOTHING))
    }
}
