//! HIR to MIR lowering
//!
//! Converts typed, resolved HIR into block-structured MIR. Lowering runs in
//! two phases over the units of a module:
//!
//! 1. Declare: every function with a body gets its MIR function and every
//!    static field its global, so bodies can reference each other in any
//!    order.
//! 2. Lower: per unit, function bodies in declaration order, then the unit's
//!    static initializers.
//!
//! Expressions are lowered depth-first with a single insertion point. Names,
//! non-local exits and exception routing are resolved through the scope
//! chain (see [`scope`]).

pub mod call;
pub mod collaborators;
pub mod continuation;
pub mod control_flow;
pub mod exceptions;
pub mod expr;
pub mod globals;
pub mod scope;
pub mod value;

pub use collaborators::{
    InterningStaticData, RuntimeFunction, SequentialLayout, StaticDataBuilder, TypeLayoutProvider,
};
pub use value::{Value, ValueRepr};

use crate::config::LoweringConfig;
use crate::error::{LoweringError, LoweringResult};
use crate::hir::{ClassId, FieldId, FunctionId, HirDeclarations, HirFile, HirFunctionBody};
use crate::ir::dump::{dump_function, dump_module};
use crate::ir::validation::validate_function;
use crate::ir::{IrBuilder, IrFunction, IrFunctionId, IrGlobalId, IrModule};
use fxhash::FxHashMap;
use log::{debug, error, info, warn};
use scope::{Scope, ScopeId, ScopeKind, Slot};

/// Declarations mapped to emitted symbols
#[derive(Debug, Default)]
pub(crate) struct SymbolTable {
    pub functions: FxHashMap<FunctionId, IrFunctionId>,
    pub fields: FxHashMap<FieldId, IrGlobalId>,
    pub type_infos: FxHashMap<ClassId, IrGlobalId>,
    pub instances: FxHashMap<ClassId, IrGlobalId>,
    pub unit_instance: Option<IrGlobalId>,
}

/// Lowering state for one module
pub struct Lowerer<'a> {
    pub(crate) builder: IrBuilder,
    pub(crate) decls: &'a HirDeclarations,
    pub(crate) config: &'a LoweringConfig,
    pub(crate) layout: &'a dyn TypeLayoutProvider,
    pub(crate) static_data: &'a mut dyn StaticDataBuilder,
    pub(crate) symbols: SymbolTable,
    /// Scope arena; index 0 is the root sentinel
    pub(crate) scopes: Vec<Scope<'a>>,
    pub(crate) current_scope: ScopeId,
}

impl<'a> Lowerer<'a> {
    pub fn new(
        decls: &'a HirDeclarations,
        config: &'a LoweringConfig,
        layout: &'a dyn TypeLayoutProvider,
        static_data: &'a mut dyn StaticDataBuilder,
    ) -> Self {
        let mut builder = IrBuilder::new(config.module_name.clone());
        builder.set_emit_labels(config.emit_block_labels);
        Self {
            builder,
            decls,
            config,
            layout,
            static_data,
            symbols: SymbolTable::default(),
            scopes: vec![Scope::top_level()],
            current_scope: 0,
        }
    }

    pub(crate) fn reset_scopes(&mut self) {
        self.scopes.clear();
        self.scopes.push(Scope::top_level());
        self.current_scope = 0;
    }

    /// Lower the given units into one module
    pub fn lower_files(mut self, files: &'a [HirFile]) -> LoweringResult<IrModule> {
        info!("declaring {} units", files.len());
        for file in files {
            for body in &file.functions {
                self.declare_function(body.function)?;
            }
            self.declare_static_fields(file)?;
        }

        for file in files {
            info!("lowering unit {}", file.name);
            for body in &file.functions {
                self.lower_function(body)?;
            }
            self.lower_unit_initializers(file)?;
        }

        let module = self.builder.finish();
        let stats = module.stats();
        info!(
            "lowered module {}: {} functions, {} externs, {} globals, {} constructors",
            module.name,
            stats.function_count,
            stats.extern_function_count,
            stats.global_count,
            stats.global_ctor_count
        );
        Ok(module)
    }

    fn declare_function(&mut self, id: FunctionId) -> LoweringResult<IrFunctionId> {
        let function = self.decls.function(id)?;
        let symbol = self.decls.function_symbol(function);
        let signature = self.native_signature(function);
        let ir_id = self.builder.declare_function(symbol, signature);
        self.symbols.functions.insert(id, ir_id);
        Ok(ir_id)
    }

    fn lower_function(&mut self, body: &'a HirFunctionBody) -> LoweringResult<()> {
        let function = self.decls.function(body.function)?;
        let ir_id = self.function_ref(body.function)?;
        debug!("lowering function {} as {}", function.name, ir_id);

        self.builder.begin_function(ir_id)?;
        if let Some(ir_function) = self.builder.current_function_mut() {
            ir_function.source_location = body.body.location;
        }
        self.reset_scopes();

        let params: Vec<_> = self
            .builder
            .current_function()
            .map(|f| f.signature.parameters.iter().map(|p| p.reg).collect())
            .unwrap_or_default();
        let bindings: Vec<_> = function.all_parameters().zip(params).collect();
        if bindings.len() != function.all_parameters().count() {
            return Err(LoweringError::internal(format!(
                "parameter count mismatch in {}",
                function.name
            )));
        }
        let receiver = function
            .dispatch_receiver
            .as_ref()
            .and_then(|param| bindings.first().map(|(_, reg)| Value::register(*reg, param.ty)));
        let returns_void = function.is_constructor() || function.return_type.is_valueless();

        self.with_scope(
            ScopeKind::function(Some(function.id), returns_void, receiver),
            |this| {
                for (parameter, reg) in &bindings {
                    this.declare_variable(parameter.id, Slot::Value(Value::register(*reg, parameter.ty)))?;
                }
                this.lower_expr(&body.body)?;
                // Falling off the end
                if !this.builder.is_terminated() {
                    if returns_void {
                        this.builder.build_return(None)?;
                    } else {
                        this.builder.build_unreachable()?;
                    }
                }
                Ok(())
            },
        )?;

        self.finish_function(ir_id)
    }

    /// Leave the current function; prune and verify it as configured
    pub(crate) fn finish_function(&mut self, id: IrFunctionId) -> LoweringResult<()> {
        self.builder.finish_function();
        let function = self
            .builder
            .module
            .functions
            .get_mut(&id)
            .ok_or_else(|| LoweringError::internal(format!("function {} vanished", id)))?;

        if self.config.prune_unreachable_blocks {
            let removed = function.cfg.prune_unreachable();
            if removed > 0 {
                debug!("pruned {} unreachable blocks from {}", removed, function.name);
            }
        }

        if self.config.verify_functions {
            let function = &self.builder.module.functions[&id];
            verify_function(function, &self.builder.module, self.config)?;
        }
        Ok(())
    }
}

/// Verify a lowered function. On failure the function (and, when
/// configured, module) dumps are logged before the error is returned.
pub fn verify_function(function: &IrFunction, module: &IrModule, config: &LoweringConfig) -> LoweringResult<()> {
    let Err(errors) = validate_function(function) else {
        return Ok(());
    };
    let message = errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    let dump = dump_function(function);

    warn!("verification of {} failed: {}", function.name, message);
    if config.dump_on_verification_failure {
        error!("function dump:\n{}", dump);
        error!("module dump:\n{}", dump_module(module));
    }
    Err(LoweringError::Verification {
        function: function.name.clone(),
        message,
        dump,
    })
}

/// Lower `files` into a module using the default layout and static data
/// placement
pub fn lower_module(files: &[HirFile], decls: &HirDeclarations, config: &LoweringConfig) -> LoweringResult<IrModule> {
    let layout = SequentialLayout::new(decls);
    let mut static_data = InterningStaticData::new();
    lower_module_with(files, decls, config, &layout, &mut static_data)
}

/// Lower `files` into a module with custom collaborators
pub fn lower_module_with<'a>(
    files: &'a [HirFile],
    decls: &'a HirDeclarations,
    config: &'a LoweringConfig,
    layout: &'a dyn TypeLayoutProvider,
    static_data: &'a mut dyn StaticDataBuilder,
) -> LoweringResult<IrModule> {
    Lowerer::new(decls, config, layout, static_data).lower_files(files)
}
