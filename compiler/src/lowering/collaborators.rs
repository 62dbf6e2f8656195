//! Contracts of the services lowering relies on, with default implementations.
//!
//! * [`TypeLayoutProvider`]: object body layouts, field indices, vtable slots.
//! * [`StaticDataBuilder`]: interning of constant data.
//! * [`RuntimeFunction`]: the fixed runtime support surface called by
//!   generated code.

use crate::error::{LoweringError, LoweringResult};
use crate::hir::{ClassId, ClassKind, FieldId, FunctionId, FunctionKind, HirDeclarations};
use crate::ir::{
    IrConstantData, IrConstantId, IrFunctionSignature, IrModule, IrParameter, IrType, IrValue,
};
use fxhash::FxHashMap;

/// Object and type descriptor layouts
pub trait TypeLayoutProvider {
    /// Layout of an object body; field 0 is the type descriptor header
    fn body_type(&self, class: ClassId) -> LoweringResult<IrType>;

    /// Index of an instance field inside its owner's body layout
    fn field_index(&self, field: FieldId) -> LoweringResult<u32>;

    /// Vtable slot of an overridable method
    fn vtable_slot(&self, function: FunctionId) -> LoweringResult<u32>;

    /// Index of the first vtable entry inside a type descriptor
    fn vtable_base_offset(&self) -> u32;

    /// Layout of the type descriptor of a class
    fn type_info_type(&self, class: ClassId) -> LoweringResult<IrType>;
}

/// Sequential layout: superclass fields first, then own fields in
/// declaration order. Vtables inherit the superclass slots; an override
/// reuses the slot of the overridden method and new overridable methods are
/// appended.
#[derive(Debug, Clone, Default)]
pub struct SequentialLayout {
    bodies: FxHashMap<ClassId, IrType>,
    field_indices: FxHashMap<FieldId, u32>,
    vtables: FxHashMap<ClassId, Vec<FunctionId>>,
    slots: FxHashMap<FunctionId, u32>,
}

/// Type descriptor header: superclass, open-method table, open-method count
const TYPE_INFO_HEADER: [IrType; 3] = [IrType::Ptr, IrType::Ptr, IrType::I32];

impl SequentialLayout {
    pub fn new(decls: &HirDeclarations) -> Self {
        let mut layout = Self::default();
        for class in decls.classes.keys() {
            layout.layout_class(decls, *class, 0);
        }
        layout
    }

    fn layout_class(&mut self, decls: &HirDeclarations, id: ClassId, depth: usize) {
        if self.bodies.contains_key(&id) || depth > decls.classes.len() {
            return;
        }
        let Some(class) = decls.classes.get(&id) else {
            return;
        };

        let (mut fields, mut vtable) = match class.superclass {
            Some(superclass) => {
                self.layout_class(decls, superclass, depth + 1);
                let inherited = match self.bodies.get(&superclass) {
                    Some(IrType::Struct { fields, .. }) => fields.clone(),
                    _ => vec![IrType::Ptr],
                };
                (inherited, self.vtables.get(&superclass).cloned().unwrap_or_default())
            }
            None => (vec![IrType::Ptr], Vec::new()),
        };

        for field_id in &class.fields {
            if let Some(field) = decls.fields.get(field_id) {
                self.field_indices.insert(*field_id, fields.len() as u32);
                fields.push(field.ty.storage_type());
            }
        }

        if class.kind != ClassKind::Interface {
            let methods = decls.functions.values().filter(|f| {
                f.owner == Some(id)
                    && f.kind == FunctionKind::Method
                    && (f.is_overridable || f.overrides.is_some())
            });
            for method in methods {
                let inherited_slot = method
                    .overrides
                    .and_then(|o| vtable.iter().position(|entry| *entry == o));
                let slot = match inherited_slot {
                    Some(slot) => {
                        vtable[slot] = method.id;
                        slot
                    }
                    None => {
                        vtable.push(method.id);
                        vtable.len() - 1
                    }
                };
                self.slots.insert(method.id, slot as u32);
            }
        }

        self.bodies.insert(
            id,
            IrType::Struct {
                name: class.name.clone(),
                fields,
            },
        );
        self.vtables.insert(id, vtable);
    }
}

impl TypeLayoutProvider for SequentialLayout {
    fn body_type(&self, class: ClassId) -> LoweringResult<IrType> {
        self.bodies
            .get(&class)
            .cloned()
            .ok_or_else(|| LoweringError::unresolved(format!("layout of {}", class)))
    }

    fn field_index(&self, field: FieldId) -> LoweringResult<u32> {
        self.field_indices
            .get(&field)
            .copied()
            .ok_or_else(|| LoweringError::unresolved(format!("layout of {}", field)))
    }

    fn vtable_slot(&self, function: FunctionId) -> LoweringResult<u32> {
        self.slots
            .get(&function)
            .copied()
            .ok_or_else(|| LoweringError::unresolved(format!("vtable slot of {}", function)))
    }

    fn vtable_base_offset(&self) -> u32 {
        TYPE_INFO_HEADER.len() as u32
    }

    fn type_info_type(&self, class: ClassId) -> LoweringResult<IrType> {
        let vtable_len = self
            .vtables
            .get(&class)
            .map(Vec::len)
            .ok_or_else(|| LoweringError::unresolved(format!("type descriptor of {}", class)))?;
        let name = match self.bodies.get(&class) {
            Some(IrType::Struct { name, .. }) => name.clone(),
            _ => class.to_string(),
        };
        let mut fields = TYPE_INFO_HEADER.to_vec();
        fields.extend(std::iter::repeat(IrType::Ptr).take(vtable_len));
        Ok(IrType::Struct {
            name: format!("{}$TypeInfo", name),
            fields,
        })
    }
}

/// Placement of constant data
pub trait StaticDataBuilder {
    /// Intern a string literal; equal strings share one constant
    fn intern_string(&mut self, module: &mut IrModule, value: &str) -> IrConstantId;

    /// Place a constant array
    fn constant_array(
        &mut self,
        module: &mut IrModule,
        element_ty: IrType,
        elements: Vec<IrValue>,
    ) -> IrConstantId;

    /// Place a constant record
    fn constant_aggregate(&mut self, module: &mut IrModule, values: Vec<IrValue>) -> IrConstantId;
}

/// Default static data placement into the module's constant table
#[derive(Debug, Default)]
pub struct InterningStaticData {
    strings: FxHashMap<String, IrConstantId>,
}

impl InterningStaticData {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StaticDataBuilder for InterningStaticData {
    fn intern_string(&mut self, module: &mut IrModule, value: &str) -> IrConstantId {
        if let Some(id) = self.strings.get(value) {
            return *id;
        }
        let name = format!("str.{}", self.strings.len());
        let id = module.add_constant(
            name,
            IrType::Ptr,
            IrConstantData::String(value.to_string()),
        );
        self.strings.insert(value.to_string(), id);
        id
    }

    fn constant_array(
        &mut self,
        module: &mut IrModule,
        element_ty: IrType,
        elements: Vec<IrValue>,
    ) -> IrConstantId {
        let name = format!("array.{}", module.next_constant_id);
        module.add_constant(
            name,
            IrType::Ptr,
            IrConstantData::Array {
                element_ty,
                elements,
            },
        )
    }

    fn constant_aggregate(&mut self, module: &mut IrModule, values: Vec<IrValue>) -> IrConstantId {
        let name = format!("aggregate.{}", module.next_constant_id);
        module.add_constant(name, IrType::Ptr, IrConstantData::Aggregate(values))
    }
}

/// Entry points of the runtime support library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeFunction {
    /// `(type_info) -> object`
    AllocInstance,
    /// `(element_size, length) -> array`
    AllocArray,
    /// `(exception) -> !`
    ThrowException,
    /// `(exception_record) -> exception`, entered from a landing pad
    BeginCatch,
    /// `()`, leaves the native catch
    EndCatch,
    /// `(object, type_info)`, throws when the object is not an instance
    CheckCast,
    /// `(object, type_info) -> bool`
    IsInstance,
    /// `(type_info, signature_hash) -> function pointer`
    LookupOpenMethod,
    /// `(init_node)`, links a unit initializer into the process-wide list
    AppendToInitializersTail,
    /// `(array) -> length`
    ArraySize,
    /// `(source, source_index, destination, destination_index, count)`
    ArrayCopy,
    /// `(array, index) -> element address`
    ArrayElementAddress,
}

impl RuntimeFunction {
    pub fn symbol(self) -> &'static str {
        match self {
            RuntimeFunction::AllocInstance => "rt_alloc_instance",
            RuntimeFunction::AllocArray => "rt_alloc_array",
            RuntimeFunction::ThrowException => "rt_throw_exception",
            RuntimeFunction::BeginCatch => "rt_begin_catch",
            RuntimeFunction::EndCatch => "rt_end_catch",
            RuntimeFunction::CheckCast => "rt_check_cast",
            RuntimeFunction::IsInstance => "rt_is_instance",
            RuntimeFunction::LookupOpenMethod => "rt_lookup_open_method",
            RuntimeFunction::AppendToInitializersTail => "rt_append_to_initializers_tail",
            RuntimeFunction::ArraySize => "rt_array_size",
            RuntimeFunction::ArrayCopy => "rt_array_copy",
            RuntimeFunction::ArrayElementAddress => "rt_array_element_address",
        }
    }

    pub fn signature(self) -> IrFunctionSignature {
        let (params, ret): (&[(&str, IrType)], IrType) = match self {
            RuntimeFunction::AllocInstance => (&[("type_info", IrType::Ptr)], IrType::Ptr),
            RuntimeFunction::AllocArray => (
                &[("element_size", IrType::I32), ("length", IrType::I32)],
                IrType::Ptr,
            ),
            RuntimeFunction::ThrowException => (&[("exception", IrType::Ptr)], IrType::Void),
            RuntimeFunction::BeginCatch => (&[("record", IrType::Ptr)], IrType::Ptr),
            RuntimeFunction::EndCatch => (&[], IrType::Void),
            RuntimeFunction::CheckCast => (
                &[("object", IrType::Ptr), ("type_info", IrType::Ptr)],
                IrType::Void,
            ),
            RuntimeFunction::IsInstance => (
                &[("object", IrType::Ptr), ("type_info", IrType::Ptr)],
                IrType::Bool,
            ),
            RuntimeFunction::LookupOpenMethod => (
                &[("type_info", IrType::Ptr), ("hash", IrType::I64)],
                IrType::Ptr,
            ),
            RuntimeFunction::AppendToInitializersTail => (&[("node", IrType::Ptr)], IrType::Void),
            RuntimeFunction::ArraySize => (&[("array", IrType::Ptr)], IrType::I32),
            RuntimeFunction::ArrayCopy => (
                &[
                    ("source", IrType::Ptr),
                    ("source_index", IrType::I32),
                    ("destination", IrType::Ptr),
                    ("destination_index", IrType::I32),
                    ("count", IrType::I32),
                ],
                IrType::Void,
            ),
            RuntimeFunction::ArrayElementAddress => (
                &[("array", IrType::Ptr), ("index", IrType::I32)],
                IrType::Ptr,
            ),
        };
        IrFunctionSignature::new(
            params
                .iter()
                .map(|(name, ty)| IrParameter::new(*name, ty.clone()))
                .collect(),
            ret,
        )
    }

    /// Whether an exception can escape a call to this entry point
    pub fn can_throw(self) -> bool {
        matches!(self, RuntimeFunction::ThrowException | RuntimeFunction::CheckCast)
    }
}

/// Symbol of the shared unit singleton object
pub const UNIT_INSTANCE_SYMBOL: &str = "rt_unit_instance";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{HirClass, HirField, HirFunction, HirType};

    fn class(id: u32, name: &str, superclass: Option<u32>, fields: Vec<u32>) -> HirClass {
        HirClass {
            id: ClassId(id),
            name: name.to_string(),
            kind: ClassKind::Class,
            superclass: superclass.map(ClassId),
            fields: fields.into_iter().map(FieldId).collect(),
            is_external: false,
        }
    }

    fn method(id: u32, owner: u32, overrides: Option<u32>) -> HirFunction {
        let mut f = HirFunction::top_level(FunctionId(id), "m", Vec::new(), HirType::Unit);
        f.owner = Some(ClassId(owner));
        f.kind = FunctionKind::Method;
        f.is_overridable = true;
        f.overrides = overrides.map(FunctionId);
        f
    }

    fn hierarchy() -> HirDeclarations {
        let mut decls = HirDeclarations::new();
        // Derived is declared first to exercise out-of-order layout
        decls.add_class(class(1, "Derived", Some(0), vec![1]));
        decls.add_class(class(0, "Base", None, vec![0]));
        decls.add_field(HirField::instance(FieldId(0), "x", ClassId(0), HirType::INT));
        decls.add_field(HirField::instance(FieldId(1), "y", ClassId(1), HirType::LONG));
        decls.add_function(method(10, 0, None));
        decls.add_function(method(11, 0, None));
        decls.add_function(method(12, 1, Some(11)));
        decls.add_function(method(13, 1, None));
        decls
    }

    #[test]
    fn test_fields_follow_superclass_fields() {
        let layout = SequentialLayout::new(&hierarchy());
        assert_eq!(layout.field_index(FieldId(0)).unwrap(), 1);
        assert_eq!(layout.field_index(FieldId(1)).unwrap(), 2);
        assert_eq!(
            layout.body_type(ClassId(1)).unwrap(),
            IrType::Struct {
                name: "Derived".to_string(),
                fields: vec![IrType::Ptr, IrType::I32, IrType::I64],
            }
        );
    }

    #[test]
    fn test_overrides_reuse_vtable_slots() {
        let layout = SequentialLayout::new(&hierarchy());
        assert_eq!(layout.vtable_slot(FunctionId(10)).unwrap(), 0);
        assert_eq!(layout.vtable_slot(FunctionId(11)).unwrap(), 1);
        assert_eq!(layout.vtable_slot(FunctionId(12)).unwrap(), 1);
        assert_eq!(layout.vtable_slot(FunctionId(13)).unwrap(), 2);

        match layout.type_info_type(ClassId(1)).unwrap() {
            IrType::Struct { fields, .. } => assert_eq!(fields.len(), 3 + 3),
            other => panic!("unexpected type info layout {:?}", other),
        }
    }

    #[test]
    fn test_strings_are_interned() {
        let mut module = IrModule::new("m");
        let mut data = InterningStaticData::new();
        let a = data.intern_string(&mut module, "hello");
        let b = data.intern_string(&mut module, "hello");
        let c = data.intern_string(&mut module, "world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(module.constants.len(), 2);
    }

    #[test]
    fn test_runtime_signatures() {
        let sig = RuntimeFunction::LookupOpenMethod.signature();
        assert_eq!(sig.parameters.len(), 2);
        assert_eq!(sig.return_type, IrType::Ptr);
        assert!(RuntimeFunction::CheckCast.can_throw());
        assert!(!RuntimeFunction::IsInstance.can_throw());
    }
}
