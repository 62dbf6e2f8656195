//! MIR Modules
//!
//! The output unit of lowering: defined and extern functions, global storage,
//! static constant data and the global-constructors table.

use super::{IrFunction, IrFunctionId, IrFunctionSignature, IrSourceLocation, IrType, IrValue, Linkage};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// MIR module
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrModule {
    /// Module name
    pub name: String,

    /// Functions defined in this module
    pub functions: IndexMap<IrFunctionId, IrFunction>,

    /// External function declarations
    pub extern_functions: IndexMap<IrFunctionId, IrExternFunction>,

    /// Global variables (defined and external)
    pub globals: IndexMap<IrGlobalId, IrGlobal>,

    /// Static constant data
    pub constants: IndexMap<IrConstantId, IrConstant>,

    /// Functions run before program start, in registration order
    pub global_ctors: Vec<IrFunctionId>,

    /// Next available IDs
    pub next_function_id: u32,
    pub next_global_id: u32,
    pub next_constant_id: u32,
}

/// Global variable identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IrGlobalId(pub u32);

impl std::fmt::Display for IrGlobalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Static constant identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IrConstantId(pub u32);

impl std::fmt::Display for IrConstantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Global variable definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrGlobal {
    /// Global identifier
    pub id: IrGlobalId,

    /// Symbol name
    pub name: String,

    /// Variable type
    pub ty: IrType,

    /// Initial value; `None` for external globals
    pub initializer: Option<IrValue>,

    /// Whether this is mutable
    pub mutable: bool,

    /// Linkage type
    pub linkage: Linkage,

    /// Source location
    pub source_location: IrSourceLocation,
}

/// External function declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrExternFunction {
    /// Function ID
    pub id: IrFunctionId,

    /// Native symbol name
    pub name: String,

    /// Function signature
    pub signature: IrFunctionSignature,

    /// Whether a call can transmit an exception to the caller
    pub can_throw: bool,
}

/// Static constant definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrConstant {
    pub id: IrConstantId,
    pub name: String,
    pub ty: IrType,
    pub data: IrConstantData,
}

/// Contents of a static constant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IrConstantData {
    /// UTF-8 string literal
    String(String),
    /// Homogeneous array of constants
    Array { element_ty: IrType, elements: Vec<IrValue> },
    /// Heterogeneous record of constants
    Aggregate(Vec<IrValue>),
}

impl IrModule {
    /// Create a new MIR module
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: IndexMap::new(),
            extern_functions: IndexMap::new(),
            globals: IndexMap::new(),
            constants: IndexMap::new(),
            global_ctors: Vec::new(),
            next_function_id: 0,
            next_global_id: 0,
            next_constant_id: 0,
        }
    }

    /// Allocate a new function ID
    pub fn alloc_function_id(&mut self) -> IrFunctionId {
        let id = IrFunctionId(self.next_function_id);
        self.next_function_id += 1;
        id
    }

    /// Add a function to the module
    pub fn add_function(&mut self, function: IrFunction) -> IrFunctionId {
        let id = function.id;
        self.functions.insert(id, function);
        self.next_function_id = self.next_function_id.max(id.0 + 1);
        id
    }

    /// Declare an external function, reusing an existing declaration with
    /// the same symbol name
    pub fn declare_extern_function(
        &mut self,
        name: &str,
        signature: IrFunctionSignature,
        can_throw: bool,
    ) -> IrFunctionId {
        if let Some(id) = self.find_extern_function(name) {
            return id;
        }
        let id = self.alloc_function_id();
        self.extern_functions.insert(
            id,
            IrExternFunction {
                id,
                name: name.to_string(),
                signature,
                can_throw,
            },
        );
        id
    }

    pub fn find_extern_function(&self, name: &str) -> Option<IrFunctionId> {
        self.extern_functions
            .values()
            .find(|f| f.name == name)
            .map(|f| f.id)
    }

    /// Look up a defined function by symbol name
    pub fn find_function(&self, name: &str) -> Option<&IrFunction> {
        self.functions.values().find(|f| f.name == name)
    }

    /// Allocate a new global ID
    pub fn alloc_global_id(&mut self) -> IrGlobalId {
        let id = IrGlobalId(self.next_global_id);
        self.next_global_id += 1;
        id
    }

    /// Add a global variable
    pub fn add_global(&mut self, global: IrGlobal) -> IrGlobalId {
        let id = global.id;
        self.globals.insert(id, global);
        self.next_global_id = self.next_global_id.max(id.0 + 1);
        id
    }

    /// Define (or declare, when `initializer` is `None`) a named global
    pub fn define_global(
        &mut self,
        name: &str,
        ty: IrType,
        initializer: Option<IrValue>,
        mutable: bool,
        linkage: Linkage,
    ) -> IrGlobalId {
        let id = self.alloc_global_id();
        self.add_global(IrGlobal {
            id,
            name: name.to_string(),
            ty,
            initializer,
            mutable,
            linkage,
            source_location: IrSourceLocation::unknown(),
        })
    }

    pub fn find_global(&self, name: &str) -> Option<IrGlobalId> {
        self.globals.values().find(|g| g.name == name).map(|g| g.id)
    }

    /// Add a static constant
    pub fn add_constant(&mut self, name: String, ty: IrType, data: IrConstantData) -> IrConstantId {
        let id = IrConstantId(self.next_constant_id);
        self.next_constant_id += 1;
        self.constants.insert(id, IrConstant { id, name, ty, data });
        id
    }

    /// Get module statistics
    pub fn stats(&self) -> ModuleStats {
        ModuleStats {
            function_count: self.functions.len(),
            global_count: self.globals.len(),
            constant_count: self.constants.len(),
            extern_function_count: self.extern_functions.len(),
            global_ctor_count: self.global_ctors.len(),
        }
    }
}

/// Module statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleStats {
    pub function_count: usize,
    pub global_count: usize,
    pub constant_count: usize,
    pub extern_function_count: usize,
    pub global_ctor_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_creation() {
        let module = IrModule::new("test");
        assert_eq!(module.name, "test");
        assert!(module.functions.is_empty());
        assert!(module.global_ctors.is_empty());
    }

    #[test]
    fn test_extern_declarations_are_deduplicated() {
        let mut module = IrModule::new("test");
        let sig = IrFunctionSignature::new(Vec::new(), IrType::Void);
        let a = module.declare_extern_function("rt_throw", sig.clone(), true);
        let b = module.declare_extern_function("rt_throw", sig, true);
        assert_eq!(a, b);
        assert_eq!(module.extern_functions.len(), 1);
        assert_eq!(module.stats().extern_function_count, 1);
    }

    #[test]
    fn test_function_and_extern_ids_do_not_collide() {
        let mut module = IrModule::new("test");
        let defined = module.alloc_function_id();
        let sig = IrFunctionSignature::new(Vec::new(), IrType::Void);
        let ext = module.declare_extern_function("rt_alloc", sig, false);
        assert_ne!(defined, ext);
    }
}
