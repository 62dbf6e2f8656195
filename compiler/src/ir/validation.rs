//! MIR Validation
//!
//! Structural verification run after a function has been lowered: every
//! reachable block has a terminator, successors exist, each phi has exactly one
//! incoming value per reachable predecessor edge, registers are defined once,
//! every use is dominated by its definition and calls pass one operand per
//! callee parameter.

use super::{
    IrArgs, IrBlockId, IrControlFlowGraph, IrFunction, IrFunctionId, IrFunctionType, IrId, IrInstruction, IrModule,
    IrTerminator,
};
use fxhash::{FxHashMap, FxHashSet};
use std::fmt;

/// Validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub function: Option<IrFunctionId>,
    pub block: Option<IrBlockId>,
}

/// Types of validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// Register used but never defined
    UndefinedRegister { register: IrId },

    /// Register used where its definition does not dominate
    UseNotDominated { register: IrId },

    /// Register defined multiple times
    MultipleDefinitions { register: IrId },

    /// Missing terminator in a reachable basic block
    MissingTerminator,

    /// Invalid control flow edge
    InvalidControlFlow { to: IrBlockId, reason: String },

    /// Phi node inconsistency
    InvalidPhiNode { phi: IrId, reason: String },

    /// Return does not match the function signature
    SignatureMismatch { reason: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(block) = self.block {
            write!(f, "{}: ", block)?;
        }
        match &self.kind {
            ValidationErrorKind::UndefinedRegister { register } => {
                write!(f, "register {} is never defined", register)
            }
            ValidationErrorKind::UseNotDominated { register } => {
                write!(f, "use of {} is not dominated by its definition", register)
            }
            ValidationErrorKind::MultipleDefinitions { register } => {
                write!(f, "register {} is defined more than once", register)
            }
            ValidationErrorKind::MissingTerminator => write!(f, "block has no terminator"),
            ValidationErrorKind::InvalidControlFlow { to, reason } => {
                write!(f, "invalid edge to {}: {}", to, reason)
            }
            ValidationErrorKind::InvalidPhiNode { phi, reason } => {
                write!(f, "phi {}: {}", phi, reason)
            }
            ValidationErrorKind::SignatureMismatch { reason } => write!(f, "{}", reason),
        }
    }
}

/// Immediate dominators of the reachable blocks of a CFG
/// (Cooper, Harvey and Kennedy's iterative algorithm).
#[derive(Debug, Clone)]
pub struct DominatorTree {
    idom: FxHashMap<IrBlockId, IrBlockId>,
    entry: IrBlockId,
}

impl DominatorTree {
    pub fn compute(cfg: &IrControlFlowGraph) -> Self {
        let rpo = reverse_postorder(cfg);
        let order: FxHashMap<IrBlockId, usize> =
            rpo.iter().enumerate().map(|(i, b)| (*b, i)).collect();
        let preds = reachable_predecessors(cfg, &order);

        let mut idom: FxHashMap<IrBlockId, IrBlockId> = FxHashMap::default();
        idom.insert(cfg.entry_block, cfg.entry_block);

        let mut changed = true;
        while changed {
            changed = false;
            for &block in rpo.iter().skip(1) {
                let mut new_idom: Option<IrBlockId> = None;
                for &pred in preds.get(&block).map(Vec::as_slice).unwrap_or(&[]) {
                    if !idom.contains_key(&pred) {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => intersect(&idom, &order, pred, current),
                    });
                }
                if let Some(new_idom) = new_idom {
                    if idom.get(&block) != Some(&new_idom) {
                        idom.insert(block, new_idom);
                        changed = true;
                    }
                }
            }
        }

        Self {
            idom,
            entry: cfg.entry_block,
        }
    }

    /// Immediate dominator; `None` for the entry and unreachable blocks
    pub fn idom(&self, block: IrBlockId) -> Option<IrBlockId> {
        if block == self.entry {
            return None;
        }
        self.idom.get(&block).copied()
    }

    pub fn is_reachable(&self, block: IrBlockId) -> bool {
        self.idom.contains_key(&block)
    }

    /// Whether `a` dominates `b` (reflexive)
    pub fn dominates(&self, a: IrBlockId, b: IrBlockId) -> bool {
        if !self.is_reachable(b) {
            return false;
        }
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            match self.idom(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }
}

fn intersect(
    idom: &FxHashMap<IrBlockId, IrBlockId>,
    order: &FxHashMap<IrBlockId, usize>,
    mut a: IrBlockId,
    mut b: IrBlockId,
) -> IrBlockId {
    while a != b {
        while order[&a] > order[&b] {
            a = idom[&a];
        }
        while order[&b] > order[&a] {
            b = idom[&b];
        }
    }
    a
}

fn reverse_postorder(cfg: &IrControlFlowGraph) -> Vec<IrBlockId> {
    let mut visited = FxHashSet::default();
    let mut postorder = Vec::new();
    // (block, next successor index)
    let mut stack = vec![(cfg.entry_block, 0usize)];
    visited.insert(cfg.entry_block);

    while let Some((block, index)) = stack.pop() {
        let succs = cfg
            .get_block(block)
            .map(|b| b.successors())
            .unwrap_or_default();
        if index < succs.len() {
            stack.push((block, index + 1));
            let succ = succs[index];
            if cfg.get_block(succ).is_some() && visited.insert(succ) {
                stack.push((succ, 0));
            }
        } else {
            postorder.push(block);
        }
    }

    postorder.reverse();
    postorder
}

fn reachable_predecessors(
    cfg: &IrControlFlowGraph,
    order: &FxHashMap<IrBlockId, usize>,
) -> FxHashMap<IrBlockId, Vec<IrBlockId>> {
    let mut preds: FxHashMap<IrBlockId, Vec<IrBlockId>> = FxHashMap::default();
    for block in order.keys() {
        if let Some(b) = cfg.get_block(*block) {
            for succ in b.successors() {
                let entry = preds.entry(succ).or_default();
                if !entry.contains(block) {
                    entry.push(*block);
                }
            }
        }
    }
    preds
}

#[derive(Debug, Clone, Copy)]
enum DefSite {
    Param,
    Phi(IrBlockId),
    Instruction(IrBlockId, usize),
    /// Result of an invoke, available on its normal edge only
    InvokeResult { normal: IrBlockId },
}

struct FunctionValidator<'a> {
    function: &'a IrFunction,
    doms: DominatorTree,
    defs: FxHashMap<IrId, DefSite>,
    errors: Vec<ValidationError>,
}

impl<'a> FunctionValidator<'a> {
    fn new(function: &'a IrFunction) -> Self {
        Self {
            function,
            doms: DominatorTree::compute(&function.cfg),
            defs: FxHashMap::default(),
            errors: Vec::new(),
        }
    }

    fn error(&mut self, block: Option<IrBlockId>, kind: ValidationErrorKind) {
        self.errors.push(ValidationError {
            kind,
            function: Some(self.function.id),
            block,
        });
    }

    fn define(&mut self, reg: IrId, site: DefSite, block: Option<IrBlockId>) {
        if self.defs.insert(reg, site).is_some() {
            self.error(block, ValidationErrorKind::MultipleDefinitions { register: reg });
        }
    }

    fn reachable_blocks(&self) -> Vec<IrBlockId> {
        self.function
            .cfg
            .blocks
            .keys()
            .copied()
            .filter(|b| self.doms.is_reachable(*b))
            .collect()
    }

    fn run(mut self) -> Vec<ValidationError> {
        let function = self.function;
        let cfg = &function.cfg;
        let blocks = self.reachable_blocks();

        for param in &function.signature.parameters {
            self.define(param.reg, DefSite::Param, None);
        }

        // Definitions and terminators
        for &id in &blocks {
            let Some(block) = cfg.get_block(id) else { continue };
            for phi in &block.phi_nodes {
                self.define(phi.dest, DefSite::Phi(id), Some(id));
            }
            for (index, inst) in block.instructions.iter().enumerate() {
                if let Some(dest) = inst.dest() {
                    self.define(dest, DefSite::Instruction(id, index), Some(id));
                }
            }
            match &block.terminator {
                None => self.error(Some(id), ValidationErrorKind::MissingTerminator),
                Some(IrTerminator::Invoke {
                    dest: Some(dest),
                    normal,
                    ..
                }) => {
                    let normal = *normal;
                    self.define(*dest, DefSite::InvokeResult { normal }, Some(id));
                }
                Some(_) => {}
            }
            for succ in block.successors() {
                if cfg.get_block(succ).is_none() {
                    self.error(
                        Some(id),
                        ValidationErrorKind::InvalidControlFlow {
                            to: succ,
                            reason: "successor does not exist".to_string(),
                        },
                    );
                } else if succ == cfg.entry_block {
                    self.error(
                        Some(id),
                        ValidationErrorKind::InvalidControlFlow {
                            to: succ,
                            reason: "the entry block cannot be a branch target".to_string(),
                        },
                    );
                }
            }
        }

        let order: FxHashMap<IrBlockId, usize> =
            blocks.iter().enumerate().map(|(i, b)| (*b, i)).collect();
        let preds = reachable_predecessors(cfg, &order);

        // Uses, phi completeness and returns
        for &id in &blocks {
            let Some(block) = cfg.get_block(id) else { continue };
            let block_preds = preds.get(&id).cloned().unwrap_or_default();

            for phi in &block.phi_nodes {
                self.check_phi(id, phi.dest, &phi.incoming, &block_preds);
            }

            for (index, inst) in block.instructions.iter().enumerate() {
                for reg in inst.uses() {
                    self.check_use(reg, id, index);
                }
                if let IrInstruction::Call { args, signature, .. } = inst {
                    self.check_call(id, args, signature);
                }
            }

            if let Some(term) = &block.terminator {
                for reg in term.uses() {
                    self.check_use(reg, id, block.instructions.len());
                }
                if let IrTerminator::Invoke { args, signature, .. } = term {
                    self.check_call(id, args, signature);
                }
                if let IrTerminator::Return { value } = term {
                    let returns_void = function.signature.return_type.is_void();
                    if returns_void != value.is_none() {
                        self.error(
                            Some(id),
                            ValidationErrorKind::SignatureMismatch {
                                reason: format!(
                                    "return {} in a function returning {}",
                                    if value.is_some() { "with a value" } else { "without a value" },
                                    function.signature.return_type
                                ),
                            },
                        );
                    }
                }
            }
        }

        self.errors
    }

    fn check_phi(
        &mut self,
        block: IrBlockId,
        phi: IrId,
        incoming: &[(IrBlockId, IrId)],
        preds: &[IrBlockId],
    ) {
        let mut seen = FxHashSet::default();
        for (pred, value) in incoming {
            if !self.doms.is_reachable(*pred) {
                continue;
            }
            if !preds.contains(pred) {
                self.error(
                    Some(block),
                    ValidationErrorKind::InvalidPhiNode {
                        phi,
                        reason: format!("incoming edge from non-predecessor {}", pred),
                    },
                );
            }
            if !seen.insert(*pred) {
                self.error(
                    Some(block),
                    ValidationErrorKind::InvalidPhiNode {
                        phi,
                        reason: format!("duplicate incoming edge from {}", pred),
                    },
                );
            }
            if !self.available_at_end(*value, *pred, block) {
                self.error(
                    Some(block),
                    ValidationErrorKind::UseNotDominated { register: *value },
                );
            }
        }
        for pred in preds {
            if !seen.contains(pred) {
                self.error(
                    Some(block),
                    ValidationErrorKind::InvalidPhiNode {
                        phi,
                        reason: format!("no incoming value from predecessor {}", pred),
                    },
                );
            }
        }
    }

    /// A call or invoke passes exactly one operand per callee parameter
    fn check_call(&mut self, block: IrBlockId, args: &IrArgs, signature: &IrFunctionType) {
        if args.len() != signature.params.len() {
            self.error(
                Some(block),
                ValidationErrorKind::SignatureMismatch {
                    reason: format!("call to {} passes {} arguments", signature, args.len()),
                },
            );
        }
    }

    fn check_use(&mut self, reg: IrId, block: IrBlockId, index: usize) {
        let available = match self.defs.get(&reg) {
            None => {
                self.error(Some(block), ValidationErrorKind::UndefinedRegister { register: reg });
                return;
            }
            Some(DefSite::Param) => true,
            Some(DefSite::Phi(def_block)) => self.doms.dominates(*def_block, block),
            Some(DefSite::Instruction(def_block, def_index)) => {
                if *def_block == block {
                    *def_index < index
                } else {
                    self.doms.dominates(*def_block, block)
                }
            }
            Some(DefSite::InvokeResult { normal }) => self.doms.dominates(*normal, block),
        };
        if !available {
            self.error(Some(block), ValidationErrorKind::UseNotDominated { register: reg });
        }
    }

    /// Whether `reg` is available on the edge `pred -> succ`
    fn available_at_end(&mut self, reg: IrId, pred: IrBlockId, succ: IrBlockId) -> bool {
        match self.defs.get(&reg) {
            None => {
                self.error(Some(succ), ValidationErrorKind::UndefinedRegister { register: reg });
                true
            }
            Some(DefSite::Param) => true,
            Some(DefSite::Phi(def_block)) | Some(DefSite::Instruction(def_block, _)) => {
                self.doms.dominates(*def_block, pred)
            }
            Some(DefSite::InvokeResult { normal }) => {
                *normal == succ || self.doms.dominates(*normal, pred)
            }
        }
    }
}

/// Validate a single function
pub fn validate_function(function: &IrFunction) -> Result<(), Vec<ValidationError>> {
    let errors = FunctionValidator::new(function).run();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate every function of a module
pub fn validate_module(module: &IrModule) -> Result<(), Vec<ValidationError>> {
    let errors: Vec<ValidationError> = module
        .functions
        .values()
        .filter_map(|f| validate_function(f).err())
        .flatten()
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IrBuilder, IrCallee, IrFunctionSignature, IrParameter, IrType, Lifetime};
    use smallvec::smallvec;

    #[test]
    fn test_validate_simple_function() {
        let mut builder = IrBuilder::new("test");
        let sig = IrFunctionSignature::new(vec![IrParameter::new("x", IrType::I32)], IrType::I32);
        let id = builder.start_function("f".to_string(), sig);
        let x = builder.current_function().unwrap().get_param_reg(0).unwrap();
        builder.build_return(Some(x)).unwrap();

        assert!(validate_function(&builder.module.functions[&id]).is_ok());
    }

    #[test]
    fn test_missing_phi_edge_is_reported() {
        let mut builder = IrBuilder::new("test");
        let sig = IrFunctionSignature::new(vec![IrParameter::new("c", IrType::Bool)], IrType::I32);
        let id = builder.start_function("f".to_string(), sig);
        let c = builder.current_function().unwrap().get_param_reg(0).unwrap();
        let left = builder.create_block().unwrap();
        let right = builder.create_block().unwrap();
        let merge = builder.create_block().unwrap();
        let phi = builder.build_phi(merge, IrType::I32).unwrap();
        builder.build_cond_branch(c, left, right).unwrap();

        builder.switch_to_block(left);
        let one = builder.build_int(1, &IrType::I32).unwrap();
        builder.build_branch(merge).unwrap();
        builder.add_phi_incoming(merge, phi, left, one).unwrap();

        builder.switch_to_block(right);
        builder.build_branch(merge).unwrap();

        builder.switch_to_block(merge);
        builder.build_return(Some(phi)).unwrap();

        let errors = validate_function(&builder.module.functions[&id]).unwrap_err();
        assert!(errors.iter().any(|e| matches!(
            e.kind,
            ValidationErrorKind::InvalidPhiNode { .. }
        )));
    }

    #[test]
    fn test_call_arity_must_match_signature() {
        let mut builder = IrBuilder::new("test");
        let callee_sig = IrFunctionSignature::new(vec![IrParameter::new("x", IrType::I32)], IrType::Void);
        let callee = builder.declare_function("g".to_string(), callee_sig.clone());
        let id = builder.start_function("f".to_string(), IrFunctionSignature::new(Vec::new(), IrType::Void));
        let one = builder.build_int(1, &IrType::I32).unwrap();
        let two = builder.build_int(2, &IrType::I32).unwrap();
        builder
            .build_call(
                IrCallee::Direct(callee),
                smallvec![one, two],
                callee_sig.function_type(),
                Lifetime::Irrelevant,
            )
            .unwrap();
        builder.build_return(None).unwrap();

        let errors = validate_function(&builder.module.functions[&id]).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0].kind, ValidationErrorKind::SignatureMismatch { .. }));
        assert!(errors[0].to_string().contains("passes 2 arguments"));
    }

    #[test]
    fn test_use_across_sibling_branch_is_not_dominated() {
        let mut builder = IrBuilder::new("test");
        let sig = IrFunctionSignature::new(vec![IrParameter::new("c", IrType::Bool)], IrType::I32);
        let id = builder.start_function("f".to_string(), sig);
        let c = builder.current_function().unwrap().get_param_reg(0).unwrap();
        let left = builder.create_block().unwrap();
        let right = builder.create_block().unwrap();
        builder.build_cond_branch(c, left, right).unwrap();

        builder.switch_to_block(left);
        let one = builder.build_int(1, &IrType::I32).unwrap();
        builder.build_return(Some(one)).unwrap();

        builder.switch_to_block(right);
        builder.build_return(Some(one)).unwrap();

        let errors = validate_function(&builder.module.functions[&id]).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].kind,
            ValidationErrorKind::UseNotDominated { register: one }
        );
    }

    #[test]
    fn test_dominator_tree_diamond() {
        let mut builder = IrBuilder::new("test");
        let sig = IrFunctionSignature::new(vec![IrParameter::new("c", IrType::Bool)], IrType::Void);
        let id = builder.start_function("f".to_string(), sig);
        let c = builder.current_function().unwrap().get_param_reg(0).unwrap();
        let left = builder.create_block().unwrap();
        let right = builder.create_block().unwrap();
        let merge = builder.create_block().unwrap();
        builder.build_cond_branch(c, left, right).unwrap();
        builder.switch_to_block(left);
        builder.build_branch(merge).unwrap();
        builder.switch_to_block(right);
        builder.build_branch(merge).unwrap();
        builder.switch_to_block(merge);
        builder.build_return(None).unwrap();

        let doms = DominatorTree::compute(&builder.module.functions[&id].cfg);
        assert_eq!(doms.idom(merge), Some(IrBlockId::entry()));
        assert!(doms.dominates(IrBlockId::entry(), left));
        assert!(!doms.dominates(left, merge));
    }
}
