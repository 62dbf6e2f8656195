//! Globals: static fields, type descriptors, singletons and per-unit
//! initialization
//!
//! Static fields with a constant initializer get it as their initial value.
//! The remaining initializers of a unit run, in declaration order, in one
//! `<unit>$init_globals` function. A static init-list node references that
//! function and a `<unit>$init_ctor` wrapper, registered in the module's
//! global-constructors table, links the node into the runtime's initializer
//! list at load time.

use super::collaborators::{RuntimeFunction, UNIT_INSTANCE_SYMBOL};
use super::scope::ScopeKind;
use super::value::Value;
use super::Lowerer;
use crate::error::LoweringResult;
use crate::hir::{ClassId, FieldId, HirExpr, HirFile, HirType};
use crate::ir::{CompareOp, IrFunctionSignature, IrGlobalId, IrId, IrType, IrValue, Lifetime, Linkage};
use log::{debug, info};
use smallvec::smallvec;

/// Layout of a static init-list node: initializer function, next node
fn init_node_type() -> IrType {
    IrType::Struct {
        name: "InitNode".to_string(),
        fields: vec![IrType::Ptr, IrType::Ptr],
    }
}

impl<'a> Lowerer<'a> {
    /// Global of a static field. Fields of this module are defined when their
    /// unit is declared; others are declared external on first use.
    pub(crate) fn static_field_ref(&mut self, field: FieldId) -> LoweringResult<IrGlobalId> {
        if let Some(global) = self.symbols.fields.get(&field) {
            return Ok(*global);
        }
        let decl = self.decls.field(field)?;
        let symbol = self.decls.field_symbol(decl);
        let global = self.builder.module.define_global(
            &symbol,
            decl.ty.storage_type(),
            None,
            true,
            Linkage::External,
        );
        self.symbols.fields.insert(field, global);
        Ok(global)
    }

    /// Define the globals of the static fields of a unit
    pub(crate) fn declare_static_fields(&mut self, file: &'a HirFile) -> LoweringResult<()> {
        for field_id in &file.static_fields {
            let field = self.decls.field(*field_id)?;
            let storage = field.ty.storage_type();
            let initial = match &field.constant_initializer {
                Some(constant) => self.constant_value(constant),
                None => storage.default_value(),
            };
            let linkage = if field.is_external {
                Linkage::External
            } else {
                Linkage::Public
            };
            let symbol = self.decls.field_symbol(field);
            let global = self
                .builder
                .module
                .define_global(&symbol, storage, Some(initial), true, linkage);
            self.symbols.fields.insert(*field_id, global);
        }
        Ok(())
    }

    /// Address of the type descriptor of a class
    pub(crate) fn type_info_ref(&mut self, class: ClassId) -> LoweringResult<IrId> {
        let global = match self.symbols.type_infos.get(&class) {
            Some(global) => *global,
            None => {
                let decl = self.decls.class(class)?;
                let linkage = if decl.is_external {
                    Linkage::External
                } else {
                    Linkage::Public
                };
                let ty = self.layout.type_info_type(class)?;
                let global = self.builder.module.define_global(
                    &format!("{}$typeinfo", decl.name),
                    ty,
                    None,
                    false,
                    linkage,
                );
                self.symbols.type_infos.insert(class, global);
                global
            }
        };
        self.builder.build_const(IrValue::Global(global))
    }

    /// Shared unit singleton provided by the runtime
    pub(crate) fn unit_instance(&mut self) -> IrGlobalId {
        if let Some(global) = self.symbols.unit_instance {
            return global;
        }
        let global = self.builder.module.define_global(
            UNIT_INSTANCE_SYMBOL,
            IrType::Ptr,
            None,
            false,
            Linkage::External,
        );
        self.symbols.unit_instance = Some(global);
        global
    }

    fn instance_slot(&mut self, class: ClassId) -> LoweringResult<IrGlobalId> {
        if let Some(global) = self.symbols.instances.get(&class) {
            return Ok(*global);
        }
        let decl = self.decls.class(class)?;
        let (initializer, linkage) = if decl.is_external {
            (None, Linkage::External)
        } else {
            (Some(IrValue::Null), Linkage::Public)
        };
        let global = self.builder.module.define_global(
            &format!("{}$instance", decl.name),
            IrType::Ptr,
            initializer,
            true,
            linkage,
        );
        self.symbols.instances.insert(class, global);
        Ok(global)
    }

    /// Singleton access: create the instance on first use. The guard is a
    /// plain load-test-store and is not safe against concurrent first use.
    pub(crate) fn lower_object_instance(&mut self, expr: &'a HirExpr, class: ClassId) -> LoweringResult<Value> {
        let slot = self.instance_slot(class)?;
        let slot_ptr = self.builder.build_const(IrValue::Global(slot))?;
        let current = self.builder.build_load(slot_ptr, IrType::Ptr)?;
        // Defined and initialized by another module
        if self.decls.class(class)?.is_external {
            return Ok(Value::register(current, expr.ty));
        }

        let merge = self.continuation(HirType::class(class), "object.ready")?;
        let init_block = self.builder.create_block_with_label("object.init")?;
        let ready_block = self.builder.create_block_with_label("object.loaded")?;
        let null = self.builder.build_null()?;
        let is_null = self.builder.build_cmp(CompareOp::Eq, current, null)?;
        self.builder
            .build_cond_branch(is_null, init_block, ready_block)?;

        self.builder.switch_to_block(ready_block);
        self.jump(&merge, Value::register(current, expr.ty))?;

        self.builder.switch_to_block(init_block);
        let object = self.allocate_instance(class)?;
        let constructor = self.decls.default_constructor(class)?.id;
        let target = self.direct_target(constructor)?;
        self.gen_call(target, smallvec![object], Lifetime::Irrelevant)?;
        if !self.builder.is_terminated() {
            self.builder.build_store(slot_ptr, object)?;
            self.jump(&merge, Value::register(object, expr.ty))?;
        }

        Ok(self.resume_at(&merge)?.with_type(expr.ty))
    }

    /// Emit the initializer function, init-list node and constructor wrapper
    /// of a unit, when it has non-constant static initializers
    pub(crate) fn lower_unit_initializers(&mut self, file: &'a HirFile) -> LoweringResult<()> {
        let mut pending = Vec::new();
        for field_id in &file.static_fields {
            let field = self.decls.field(*field_id)?;
            if let (None, Some(initializer)) = (&field.constant_initializer, &field.initializer) {
                pending.push((*field_id, initializer));
            }
        }
        if pending.is_empty() {
            return Ok(());
        }
        info!("lowering {} static initializers of {}", pending.len(), file.name);

        let signature = IrFunctionSignature::new(Vec::new(), IrType::Void);
        let init = self
            .builder
            .start_function(format!("{}$init_globals", file.name), signature.clone());
        self.reset_scopes();
        self.with_scope(ScopeKind::function(None, true, None), |this| {
            for (field, initializer) in pending {
                let Some(value) = this.eval(initializer)? else {
                    return Ok(());
                };
                let reg = this.materialize(value)?;
                let global = this.static_field_ref(field)?;
                let ptr = this.builder.build_const(IrValue::Global(global))?;
                this.builder.build_store(ptr, reg)?;
            }
            this.builder.build_return(None)
        })?;
        self.finish_function(init)?;

        let node = self.builder.module.define_global(
            &format!("{}$init_node", file.name),
            init_node_type(),
            Some(IrValue::Aggregate(vec![IrValue::Function(init), IrValue::Null])),
            true,
            Linkage::Private,
        );

        let ctor = self
            .builder
            .start_function(format!("{}$init_ctor", file.name), signature);
        let node_ptr = self.builder.build_const(IrValue::Global(node))?;
        self.call_runtime(RuntimeFunction::AppendToInitializersTail, &[node_ptr])?;
        self.builder.build_return(None)?;
        self.finish_function(ctor)?;

        self.builder.module.global_ctors.push(ctor);
        debug!("registered global constructor {} for {}", ctor, file.name);
        Ok(())
    }
}
