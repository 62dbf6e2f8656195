//! Shared helpers for the lowering integration tests: a small builder for
//! HIR programs and queries over the produced MIR.

#![allow(dead_code)]

use blockgen::hir::{
    FunctionId, HirDeclarations, HirExpr, HirFile, HirFunction, HirFunctionBody, HirParameter, HirType, VarId,
};
use blockgen::ir::{IrBasicBlock, IrBlockId, IrCallee, IrFunction, IrInstruction, IrModule, IrTerminator};
use blockgen::{logging, lower_module, LoweringConfig, LoweringResult};
use fxhash::FxHashSet;

/// A program under construction; function bodies go to the last unit
pub struct Program {
    pub decls: HirDeclarations,
    pub files: Vec<HirFile>,
}

impl Program {
    pub fn new() -> Self {
        logging::init_test();
        Self {
            decls: HirDeclarations::new(),
            files: vec![HirFile::new("main")],
        }
    }

    /// Start a new compilation unit
    pub fn unit(&mut self, name: &str) {
        self.files.push(HirFile::new(name));
    }

    pub fn file(&mut self) -> &mut HirFile {
        self.files.last_mut().expect("program has a unit")
    }

    /// Declare a function and define its body in the current unit
    pub fn define(&mut self, function: HirFunction, body: HirExpr) -> FunctionId {
        let id = self.decls.add_function(function);
        self.file().functions.push(HirFunctionBody { function: id, body });
        id
    }

    /// Declare a function defined elsewhere
    pub fn declare(&mut self, function: HirFunction) -> FunctionId {
        self.decls.add_function(function)
    }

    /// Declare a `() -> Unit` function defined elsewhere
    pub fn marker(&mut self, id: u32, name: &str) -> FunctionId {
        self.declare(HirFunction::top_level(FunctionId(id), name, Vec::new(), HirType::Unit))
    }

    pub fn try_lower(&self) -> LoweringResult<IrModule> {
        self.try_lower_with(&LoweringConfig::development())
    }

    pub fn try_lower_with(&self, config: &LoweringConfig) -> LoweringResult<IrModule> {
        lower_module(&self.files, &self.decls, config)
    }

    pub fn lower(&self) -> IrModule {
        match self.try_lower() {
            Ok(module) => module,
            Err(e) => panic!("lowering failed: {}", e),
        }
    }
}

pub fn param(id: u32, name: &str, ty: HirType) -> HirParameter {
    HirParameter::new(VarId(id), name, ty)
}

/// Call of a `() -> Unit` function
pub fn call_unit(function: FunctionId) -> HirExpr {
    HirExpr::call(function, Vec::new(), HirType::Unit)
}

pub fn function<'m>(module: &'m IrModule, name: &str) -> &'m IrFunction {
    module
        .find_function(name)
        .unwrap_or_else(|| panic!("no function {} in module", name))
}

pub fn block(function: &IrFunction, id: IrBlockId) -> &IrBasicBlock {
    function
        .cfg
        .get_block(id)
        .unwrap_or_else(|| panic!("no block {} in {}", id, function.name))
}

pub fn terminator(block: &IrBasicBlock) -> &IrTerminator {
    block
        .terminator
        .as_ref()
        .unwrap_or_else(|| panic!("block {} is not terminated", block.id))
}

/// Blocks with the given label, in creation order
pub fn blocks_labelled<'f>(function: &'f IrFunction, label: &str) -> Vec<&'f IrBasicBlock> {
    function
        .cfg
        .blocks
        .values()
        .filter(|b| b.label.as_deref() == Some(label))
        .collect()
}

/// The only block with the given label
pub fn block_labelled<'f>(function: &'f IrFunction, label: &str) -> &'f IrBasicBlock {
    let blocks = blocks_labelled(function, label);
    assert_eq!(blocks.len(), 1, "expected one `{}` block in {}", label, function.name);
    blocks[0]
}

pub fn callee_name(module: &IrModule, callee: &IrCallee) -> Option<String> {
    match callee {
        IrCallee::Direct(id) => module
            .functions
            .get(id)
            .map(|f| f.name.clone())
            .or_else(|| module.extern_functions.get(id).map(|f| f.name.clone())),
        IrCallee::Indirect(_) => None,
    }
}

/// Direct callees of a block in execution order, including an invoke
pub fn block_calls(module: &IrModule, block: &IrBasicBlock) -> Vec<String> {
    let mut names: Vec<String> = block
        .instructions
        .iter()
        .filter_map(|inst| match inst {
            IrInstruction::Call { callee, .. } => callee_name(module, callee),
            _ => None,
        })
        .collect();
    if let Some(IrTerminator::Invoke { callee, .. }) = &block.terminator {
        names.extend(callee_name(module, callee));
    }
    names
}

/// Direct callees of a function, block by block in creation order
pub fn calls(module: &IrModule, function: &IrFunction) -> Vec<String> {
    function
        .cfg
        .blocks
        .values()
        .flat_map(|b| block_calls(module, b))
        .collect()
}

pub fn count_calls(module: &IrModule, function: &IrFunction, name: &str) -> usize {
    calls(module, function).iter().filter(|c| c.as_str() == name).count()
}

/// Walk from the entry along the first successor of every block. Returns
/// the calls made along the way and the block the walk stops in.
pub fn trace_first_path<'f>(module: &IrModule, function: &'f IrFunction) -> (Vec<String>, &'f IrBasicBlock) {
    let mut visited = FxHashSet::default();
    let mut calls = Vec::new();
    let mut current = block(function, function.cfg.entry_block);
    loop {
        visited.insert(current.id);
        calls.extend(block_calls(module, current));
        match terminator(current).successors().first() {
            Some(next) if !visited.contains(next) => current = block(function, *next),
            _ => return (calls, current),
        }
    }
}

/// Every instruction of a function, block by block
pub fn instructions(function: &IrFunction) -> Vec<&IrInstruction> {
    function
        .cfg
        .blocks
        .values()
        .flat_map(|b| b.instructions.iter())
        .collect()
}

/// Terminators of all blocks of a function
pub fn terminators(function: &IrFunction) -> Vec<&IrTerminator> {
    function.cfg.blocks.values().map(terminator).collect()
}
