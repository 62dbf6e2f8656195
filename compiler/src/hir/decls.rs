//! HIR declarations and compilation units
//!
//! [`HirDeclarations`] is the declaration table shared by every unit of a
//! module: classes, functions and fields by identity.

use super::{ClassId, FieldId, FunctionId, HirConstant, HirExpr, HirType, VarId};
use crate::error::{LoweringError, LoweringResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassKind {
    Class,
    Interface,
    /// Singleton `object` declaration
    Object,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HirClass {
    pub id: ClassId,
    pub name: String,
    pub kind: ClassKind,
    pub superclass: Option<ClassId>,
    /// Instance fields in declaration order
    pub fields: Vec<FieldId>,
    /// Defined in another module; only referenced here
    pub is_external: bool,
}

impl HirClass {
    pub fn new(id: ClassId, name: &str, kind: ClassKind) -> Self {
        Self {
            id,
            name: name.to_string(),
            kind,
            superclass: None,
            fields: Vec::new(),
            is_external: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionKind {
    TopLevel,
    Method,
    Constructor,
}

/// Operators with a direct native lowering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intrinsic {
    Plus,
    Minus,
    Times,
    Div,
    Rem,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    /// Value equality of primitives
    Equals,
    /// Reference identity
    IdentityEquals,
    /// Boolean negation
    Not,
    /// Non-short-circuit boolean and / bitwise and
    And,
    Or,
    Xor,
    Shl,
    Shr,
    UnaryMinus,
    Inc,
    Dec,
}

/// Standard library factories whose calls may be folded into static data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstantFactory {
    ListOf,
    ArrayOf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HirParameter {
    pub id: VarId,
    pub name: String,
    pub ty: HirType,
}

impl HirParameter {
    pub fn new(id: VarId, name: &str, ty: HirType) -> Self {
        Self {
            id,
            name: name.to_string(),
            ty,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HirFunction {
    pub id: FunctionId,
    pub name: String,
    pub owner: Option<ClassId>,
    pub kind: FunctionKind,
    /// `this` of member functions and constructors
    pub dispatch_receiver: Option<HirParameter>,
    pub extension_receiver: Option<HirParameter>,
    pub parameters: Vec<HirParameter>,
    pub return_type: HirType,
    pub is_overridable: bool,
    /// Function in a supertype this one overrides
    pub overrides: Option<FunctionId>,
    pub intrinsic: Option<Intrinsic>,
    pub constant_factory: Option<ConstantFactory>,
    pub is_external: bool,
    /// Native symbol name; derived from owner and name when absent
    pub symbol_name: Option<String>,
}

impl HirFunction {
    /// A non-overridable function with no receivers
    pub fn top_level(id: FunctionId, name: &str, parameters: Vec<HirParameter>, return_type: HirType) -> Self {
        Self {
            id,
            name: name.to_string(),
            owner: None,
            kind: FunctionKind::TopLevel,
            dispatch_receiver: None,
            extension_receiver: None,
            parameters,
            return_type,
            is_overridable: false,
            overrides: None,
            intrinsic: None,
            constant_factory: None,
            is_external: false,
            symbol_name: None,
        }
    }

    /// A member function of `owner` receiving `this` in `receiver`
    pub fn method(
        id: FunctionId,
        name: &str,
        owner: ClassId,
        receiver: VarId,
        parameters: Vec<HirParameter>,
        return_type: HirType,
    ) -> Self {
        Self {
            owner: Some(owner),
            kind: FunctionKind::Method,
            dispatch_receiver: Some(HirParameter::new(receiver, "this", HirType::class(owner))),
            ..Self::top_level(id, name, parameters, return_type)
        }
    }

    /// A constructor of `owner`; it initializes the object passed in
    /// `receiver`
    pub fn constructor(id: FunctionId, owner: ClassId, receiver: VarId, parameters: Vec<HirParameter>) -> Self {
        Self {
            kind: FunctionKind::Constructor,
            ..Self::method(id, "<init>", owner, receiver, parameters, HirType::Unit)
        }
    }

    pub fn is_constructor(&self) -> bool {
        self.kind == FunctionKind::Constructor
    }

    /// All receiver and value parameters in native order
    pub fn all_parameters(&self) -> impl Iterator<Item = &HirParameter> {
        self.dispatch_receiver
            .iter()
            .chain(self.extension_receiver.iter())
            .chain(self.parameters.iter())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HirField {
    pub id: FieldId,
    pub name: String,
    pub owner: Option<ClassId>,
    pub is_static: bool,
    pub ty: HirType,
    /// Compile-time constant initial value
    pub constant_initializer: Option<HirConstant>,
    /// Initializer evaluated by the unit's initializer function
    pub initializer: Option<HirExpr>,
    pub is_external: bool,
}

impl HirField {
    pub fn instance(id: FieldId, name: &str, owner: ClassId, ty: HirType) -> Self {
        Self {
            id,
            name: name.to_string(),
            owner: Some(owner),
            is_static: false,
            ty,
            constant_initializer: None,
            initializer: None,
            is_external: false,
        }
    }

    pub fn global(id: FieldId, name: &str, ty: HirType) -> Self {
        Self {
            id,
            name: name.to_string(),
            owner: None,
            is_static: true,
            ty,
            constant_initializer: None,
            initializer: None,
            is_external: false,
        }
    }
}

/// Body of a function defined in a unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HirFunctionBody {
    pub function: FunctionId,
    pub body: HirExpr,
}

/// A compilation unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HirFile {
    pub name: String,
    /// Function bodies in declaration order
    pub functions: Vec<HirFunctionBody>,
    /// Static fields in declaration order
    pub static_fields: Vec<FieldId>,
}

impl HirFile {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            functions: Vec::new(),
            static_fields: Vec::new(),
        }
    }
}

/// Declaration table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HirDeclarations {
    pub classes: IndexMap<ClassId, HirClass>,
    pub functions: IndexMap<FunctionId, HirFunction>,
    pub fields: IndexMap<FieldId, HirField>,
}

impl HirDeclarations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_class(&mut self, class: HirClass) -> ClassId {
        let id = class.id;
        self.classes.insert(id, class);
        id
    }

    pub fn add_function(&mut self, function: HirFunction) -> FunctionId {
        let id = function.id;
        self.functions.insert(id, function);
        id
    }

    pub fn add_field(&mut self, field: HirField) -> FieldId {
        let id = field.id;
        self.fields.insert(id, field);
        id
    }

    pub fn class(&self, id: ClassId) -> LoweringResult<&HirClass> {
        self.classes
            .get(&id)
            .ok_or_else(|| LoweringError::unresolved(id.to_string()))
    }

    pub fn function(&self, id: FunctionId) -> LoweringResult<&HirFunction> {
        self.functions
            .get(&id)
            .ok_or_else(|| LoweringError::unresolved(id.to_string()))
    }

    pub fn field(&self, id: FieldId) -> LoweringResult<&HirField> {
        self.fields
            .get(&id)
            .ok_or_else(|| LoweringError::unresolved(id.to_string()))
    }

    /// Zero-argument constructor of a class, used for singletons
    pub fn default_constructor(&self, class: ClassId) -> LoweringResult<&HirFunction> {
        self.functions
            .values()
            .find(|f| f.is_constructor() && f.owner == Some(class) && f.parameters.is_empty())
            .ok_or_else(|| LoweringError::unresolved(format!("default constructor of {}", class)))
    }

    /// Native symbol name of a function
    pub fn function_symbol(&self, function: &HirFunction) -> String {
        if let Some(symbol) = &function.symbol_name {
            return symbol.clone();
        }
        let name = if function.is_constructor() {
            "<init>"
        } else {
            function.name.as_str()
        };
        match function.owner.and_then(|owner| self.classes.get(&owner)) {
            Some(owner) => format!("{}.{}", owner.name, name),
            None => name.to_string(),
        }
    }

    /// Native symbol name of a static field
    pub fn field_symbol(&self, field: &HirField) -> String {
        match field.owner.and_then(|owner| self.classes.get(&owner)) {
            Some(owner) => format!("{}.{}", owner.name, field.name),
            None => field.name.clone(),
        }
    }
}
