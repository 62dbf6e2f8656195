//! Scope chain
//!
//! Scopes form a stack-discipline chain stored in an arena on the lowerer;
//! each scope knows its parent by index. A capability request (variable
//! lookup, `return`, `break`, `continue`, `throw`, call) starts at the active
//! scope and walks towards the root until a scope handles it. The root
//! sentinel handles nothing and fails every request.

use super::continuation::ContinuationBlock;
use super::value::Value;
use super::Lowerer;
use crate::error::{LoweringError, LoweringResult};
use crate::hir::{FunctionId, HirExpr, HirType, LoopId, VarId};
use crate::ir::{IrArgs, IrBlockId, IrCallee, IrFunctionType, IrId, IrSourceLocation, Lifetime};
use fxhash::FxHashMap;
use log::{debug, trace};

pub type ScopeId = usize;

/// Storage of a declared variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Immutable variable bound to its SSA value
    Value(Value),
    /// Mutable variable living in an entry-block stack slot
    Stack { ptr: IrId, ty: HirType },
}

/// Lazily created landing pad and handler of a catching scope
#[derive(Debug, Clone, Default)]
pub struct Guard {
    pub landing_pad: Option<IrBlockId>,
    /// Receives the exception object
    pub handler: Option<ContinuationBlock>,
}

/// Non-local exits redirected through a finalizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Exit {
    Return(FunctionId),
    Break(LoopId),
    Continue(LoopId),
}

#[derive(Debug, Clone)]
pub struct FinallyScope<'a> {
    pub guard: Guard,
    pub finalizer: &'a HirExpr,
    /// One cleanup continuation per exit, shared by every jump to that exit
    pub cleanups: FxHashMap<Exit, ContinuationBlock>,
}

impl<'a> FinallyScope<'a> {
    pub fn new(finalizer: &'a HirExpr) -> Self {
        Self {
            guard: Guard::default(),
            finalizer,
            cleanups: FxHashMap::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ScopeKind<'a> {
    /// Root sentinel
    TopLevel,
    Function {
        /// `None` for synthesized functions (unit initializers)
        function: Option<FunctionId>,
        slots: FxHashMap<VarId, Slot>,
        returns_void: bool,
        /// Dispatch receiver of members and constructors
        this: Option<Value>,
    },
    Variable {
        slots: FxHashMap<VarId, Slot>,
    },
    Loop {
        loop_id: LoopId,
        exit: ContinuationBlock,
        check: IrBlockId,
    },
    Catch(Guard),
    Finally(FinallyScope<'a>),
    InlinedBody {
        function: FunctionId,
        exit: ContinuationBlock,
    },
}

impl<'a> ScopeKind<'a> {
    pub fn function(function: Option<FunctionId>, returns_void: bool, this: Option<Value>) -> Self {
        ScopeKind::Function {
            function,
            slots: FxHashMap::default(),
            returns_void,
            this,
        }
    }

    pub fn variable() -> Self {
        ScopeKind::Variable {
            slots: FxHashMap::default(),
        }
    }

    fn slots(&self) -> Option<&FxHashMap<VarId, Slot>> {
        match self {
            ScopeKind::Function { slots, .. } | ScopeKind::Variable { slots } => Some(slots),
            _ => None,
        }
    }

    fn slots_mut(&mut self) -> Option<&mut FxHashMap<VarId, Slot>> {
        match self {
            ScopeKind::Function { slots, .. } | ScopeKind::Variable { slots } => Some(slots),
            _ => None,
        }
    }

    fn guard(&self) -> Option<&Guard> {
        match self {
            ScopeKind::Catch(guard) => Some(guard),
            ScopeKind::Finally(finally) => Some(&finally.guard),
            _ => None,
        }
    }

    fn guard_mut(&mut self) -> Option<&mut Guard> {
        match self {
            ScopeKind::Catch(guard) => Some(guard),
            ScopeKind::Finally(finally) => Some(&mut finally.guard),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Scope<'a> {
    pub parent: Option<ScopeId>,
    pub kind: ScopeKind<'a>,
}

impl<'a> Scope<'a> {
    pub fn top_level() -> Self {
        Self {
            parent: None,
            kind: ScopeKind::TopLevel,
        }
    }
}

/// Insertion point of the lowering: active scope and insertion block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub scope: ScopeId,
    pub block: Option<IrBlockId>,
}

/// Resolved call target
#[derive(Debug, Clone)]
pub struct CallTarget {
    pub callee: IrCallee,
    pub signature: IrFunctionType,
    pub can_throw: bool,
}

fn sentinel(operation: &'static str) -> LoweringError {
    LoweringError::InvalidControlTransfer { operation }
}

impl<'a> Lowerer<'a> {
    pub(crate) fn cursor(&self) -> Cursor {
        Cursor {
            scope: self.current_scope,
            block: self.builder.current_block(),
        }
    }

    fn restore(&mut self, cursor: Cursor) {
        self.current_scope = cursor.scope;
        self.builder.current_block = cursor.block;
    }

    fn parent_of(&self, scope: ScopeId) -> LoweringResult<ScopeId> {
        self.scopes[scope]
            .parent
            .ok_or_else(|| LoweringError::internal("scope has no parent"))
    }

    /// Run `f` inside a new scope. The active scope is restored on every exit
    /// path; on error the insertion block is restored as well.
    pub(crate) fn with_scope<R>(
        &mut self,
        kind: ScopeKind<'a>,
        f: impl FnOnce(&mut Self) -> LoweringResult<R>,
    ) -> LoweringResult<R> {
        let saved = self.cursor();
        let depth = self.scopes.len();
        self.scopes.push(Scope {
            parent: Some(saved.scope),
            kind,
        });
        self.current_scope = depth;

        let result = f(self);

        self.scopes.truncate(depth);
        self.current_scope = saved.scope;
        if result.is_err() {
            self.builder.current_block = saved.block;
        }
        result
    }

    /// Run `f` at `block` with `scope` active, then restore the cursor.
    /// Used to fill lazily created blocks in the middle of other code.
    pub(crate) fn at_block<R>(
        &mut self,
        block: IrBlockId,
        scope: ScopeId,
        f: impl FnOnce(&mut Self) -> LoweringResult<R>,
    ) -> LoweringResult<R> {
        let saved = self.cursor();
        self.current_scope = scope;
        self.builder.switch_to_block(block);
        let result = f(self);
        self.restore(saved);
        result
    }

    // === Variables ===

    /// Bind `var` in the nearest scope owning a slot table; returns the bound
    /// slot
    pub(crate) fn declare_variable(&mut self, var: VarId, slot: Slot) -> LoweringResult<Slot> {
        let mut current = Some(self.current_scope);
        while let Some(id) = current {
            if let Some(slots) = self.scopes[id].kind.slots_mut() {
                trace!("declare {} in scope {}", var, id);
                slots.insert(var, slot);
                return Ok(slot);
            }
            current = self.scopes[id].parent;
        }
        Err(sentinel("declare variable"))
    }

    pub(crate) fn declared_slot(&self, var: VarId) -> Option<Slot> {
        let mut current = Some(self.current_scope);
        while let Some(id) = current {
            if let Some(slot) = self.scopes[id].kind.slots().and_then(|s| s.get(&var)) {
                return Some(*slot);
            }
            current = self.scopes[id].parent;
        }
        None
    }

    pub(crate) fn get_value(&mut self, var: VarId, location: IrSourceLocation) -> LoweringResult<Value> {
        match self.declared_slot(var) {
            Some(Slot::Value(value)) => Ok(value),
            Some(Slot::Stack { ptr, ty }) => {
                let reg = self.builder.build_load(ptr, ty.storage_type())?;
                Ok(Value::register(reg, ty))
            }
            None => Err(LoweringError::UnboundVariable { var, location }),
        }
    }

    /// Scope of the function being lowered
    pub(crate) fn owner_function_scope(&self) -> LoweringResult<ScopeId> {
        let mut current = Some(self.current_scope);
        while let Some(id) = current {
            if matches!(self.scopes[id].kind, ScopeKind::Function { .. }) {
                return Ok(id);
            }
            current = self.scopes[id].parent;
        }
        Err(sentinel("owner function"))
    }

    pub(crate) fn function_receiver(&self) -> LoweringResult<Option<Value>> {
        let scope = self.owner_function_scope()?;
        match &self.scopes[scope].kind {
            ScopeKind::Function { this, .. } => Ok(*this),
            _ => Ok(None),
        }
    }

    // === Non-local exits ===

    pub(crate) fn gen_return(&mut self, target: FunctionId, value: Value) -> LoweringResult<()> {
        let mut current = Some(self.current_scope);
        while let Some(id) = current {
            match &self.scopes[id].kind {
                ScopeKind::TopLevel => return Err(sentinel("return")),
                ScopeKind::Function {
                    function: Some(function),
                    returns_void,
                    ..
                } if *function == target => {
                    if *returns_void {
                        return self.builder.build_return(None);
                    }
                    let reg = self.materialize(value)?;
                    return self.builder.build_return(Some(reg));
                }
                ScopeKind::InlinedBody { function, exit } if *function == target => {
                    let exit = *exit;
                    return self.jump(&exit, value);
                }
                ScopeKind::Finally(_) => return self.exit_through_finally(id, Exit::Return(target), value),
                _ => {}
            }
            current = self.scopes[id].parent;
        }
        Err(sentinel("return"))
    }

    pub(crate) fn gen_break(&mut self, loop_id: LoopId) -> LoweringResult<()> {
        let mut current = Some(self.current_scope);
        while let Some(id) = current {
            match &self.scopes[id].kind {
                ScopeKind::TopLevel => break,
                ScopeKind::Loop { loop_id: l, exit, .. } if *l == loop_id => {
                    let exit = *exit;
                    return self.jump(&exit, Value::unit());
                }
                ScopeKind::Finally(_) => {
                    return self.exit_through_finally(id, Exit::Break(loop_id), Value::unit())
                }
                _ => {}
            }
            current = self.scopes[id].parent;
        }
        Err(sentinel("break"))
    }

    pub(crate) fn gen_continue(&mut self, loop_id: LoopId) -> LoweringResult<()> {
        let mut current = Some(self.current_scope);
        while let Some(id) = current {
            match &self.scopes[id].kind {
                ScopeKind::TopLevel => break,
                ScopeKind::Loop { loop_id: l, check, .. } if *l == loop_id => {
                    let check = *check;
                    if self.builder.is_terminated() {
                        return Ok(());
                    }
                    return self.builder.build_branch(check);
                }
                ScopeKind::Finally(_) => {
                    return self.exit_through_finally(id, Exit::Continue(loop_id), Value::unit())
                }
                _ => {}
            }
            current = self.scopes[id].parent;
        }
        Err(sentinel("continue"))
    }

    /// Redirect an exit through the finalizer of `scope`: the memoized cleanup
    /// runs the finalizer in the enclosing scope, then performs the exit
    /// there.
    fn exit_through_finally(&mut self, scope: ScopeId, exit: Exit, value: Value) -> LoweringResult<()> {
        let (cached, finalizer) = match &self.scopes[scope].kind {
            ScopeKind::Finally(finally) => (finally.cleanups.get(&exit).copied(), finally.finalizer),
            _ => return Err(LoweringError::internal("not a finalizing scope")),
        };
        if let Some(cleanup) = cached {
            return self.jump(&cleanup, value);
        }

        let ty = match exit {
            Exit::Return(_) => value.ty,
            Exit::Break(_) | Exit::Continue(_) => HirType::Unit,
        };
        let cleanup = self.continuation(ty, "finally.cleanup")?;
        if let ScopeKind::Finally(finally) = &mut self.scopes[scope].kind {
            finally.cleanups.insert(exit, cleanup);
        }
        debug!("cleanup {:?} through {}", exit, cleanup.block);
        self.jump(&cleanup, value)?;

        let parent = self.parent_of(scope)?;
        self.at_block(cleanup.block, parent, |this| {
            if this.eval(finalizer)?.is_none() {
                return Ok(());
            }
            match exit {
                Exit::Return(target) => this.gen_return(target, cleanup.value()),
                Exit::Break(loop_id) => this.gen_break(loop_id),
                Exit::Continue(loop_id) => this.gen_continue(loop_id),
            }
        })
    }

    // === Exceptions and calls ===

    /// Nearest catching scope inside the current function
    fn catching_scope(&self, operation: &'static str) -> LoweringResult<Option<ScopeId>> {
        let mut current = Some(self.current_scope);
        while let Some(id) = current {
            match &self.scopes[id].kind {
                ScopeKind::TopLevel => return Err(sentinel(operation)),
                ScopeKind::Function { .. } => return Ok(None),
                ScopeKind::Catch(_) | ScopeKind::Finally(_) => return Ok(Some(id)),
                _ => {}
            }
            current = self.scopes[id].parent;
        }
        Err(sentinel(operation))
    }

    pub(crate) fn handler_of(&self, scope: ScopeId) -> Option<ContinuationBlock> {
        self.scopes[scope].kind.guard().and_then(|g| g.handler)
    }

    fn ensure_handler(&mut self, scope: ScopeId) -> LoweringResult<ContinuationBlock> {
        if let Some(handler) = self.handler_of(scope) {
            return Ok(handler);
        }
        let handler = self.continuation(HirType::ANY, "catch.handler")?;
        if let Some(guard) = self.scopes[scope].kind.guard_mut() {
            guard.handler = Some(handler);
        }
        Ok(handler)
    }

    /// Landing pad of a catching scope: extract the exception object through
    /// the runtime and hand it to the scope's handler
    fn ensure_landing_pad(&mut self, scope: ScopeId) -> LoweringResult<IrBlockId> {
        if let Some(pad) = self.scopes[scope].kind.guard().and_then(|g| g.landing_pad) {
            return Ok(pad);
        }
        let pad = self.builder.create_block_with_label("landing.pad")?;
        if let Some(guard) = self.scopes[scope].kind.guard_mut() {
            guard.landing_pad = Some(pad);
        }
        let handler = self.ensure_handler(scope)?;
        self.at_block(pad, scope, |this| {
            let record = this.builder.build_landing_pad()?;
            let exception = this.begin_catch(record)?;
            this.jump(&handler, Value::register(exception, HirType::ANY))
        })?;
        debug!("landing pad {} for scope {}", pad, scope);
        Ok(pad)
    }

    /// Emit a call. Inside a catching scope a throwing call becomes an
    /// `invoke` unwinding to the scope's landing pad.
    pub(crate) fn gen_call(
        &mut self,
        target: CallTarget,
        args: IrArgs,
        lifetime: Lifetime,
    ) -> LoweringResult<Option<IrId>> {
        let catching = self.catching_scope("call")?;
        match catching {
            Some(scope) if target.can_throw => {
                let unwind = self.ensure_landing_pad(scope)?;
                let normal = self.builder.create_block_with_label("invoke.normal")?;
                let dest = self.builder.build_invoke(
                    target.callee,
                    args,
                    target.signature,
                    lifetime,
                    normal,
                    unwind,
                )?;
                self.builder.switch_to_block(normal);
                Ok(dest)
            }
            _ => self
                .builder
                .build_call(target.callee, args, target.signature, lifetime),
        }
    }

    /// Throw `exception`: jump to the nearest handler, or unwind out of the
    /// function through the runtime
    pub(crate) fn gen_throw(&mut self, exception: IrId) -> LoweringResult<()> {
        match self.catching_scope("throw")? {
            Some(scope) => {
                let handler = self.ensure_handler(scope)?;
                self.jump(&handler, Value::register(exception, HirType::ANY))
            }
            None => {
                self.throw_to_caller(exception)?;
                self.builder.build_unreachable()
            }
        }
    }
}
