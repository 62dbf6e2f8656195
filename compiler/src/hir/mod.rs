//! High-level Intermediate Representation (HIR)
//!
//! The typed, fully resolved tree consumed by lowering. Every expression
//! carries its static type and every reference points at a declaration by
//! identity; no name resolution or inference happens past this point.

pub mod decls;
pub mod expr;

pub use decls::*;
pub use expr::*;

use crate::ir::IrType;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! hir_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

hir_id!(
    /// Local variable or parameter
    VarId,
    "var"
);
hir_id!(FunctionId, "fun");
hir_id!(ClassId, "class");
hir_id!(FieldId, "field");
hir_id!(
    /// Identity of a loop, targeted by `break` and `continue`
    LoopId,
    "loop"
);

/// Primitive value kinds with a fixed native representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveKind {
    Boolean,
    Char,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
}

impl PrimitiveKind {
    pub fn ir_type(self) -> IrType {
        match self {
            PrimitiveKind::Boolean => IrType::Bool,
            PrimitiveKind::Byte => IrType::I8,
            PrimitiveKind::Char | PrimitiveKind::Short => IrType::I16,
            PrimitiveKind::Int => IrType::I32,
            PrimitiveKind::Long => IrType::I64,
            PrimitiveKind::Float => IrType::F32,
            PrimitiveKind::Double => IrType::F64,
        }
    }

    pub fn is_floating(self) -> bool {
        matches!(self, PrimitiveKind::Float | PrimitiveKind::Double)
    }
}

/// Static type of an expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HirType {
    /// The unit type; its only value is the shared unit singleton
    Unit,
    /// The empty type: an expression of this type never completes normally
    Nothing { nullable: bool },
    Primitive(PrimitiveKind),
    /// Top of the reference type hierarchy
    Any { nullable: bool },
    Class { class: ClassId, nullable: bool },
}

impl HirType {
    pub const INT: HirType = HirType::Primitive(PrimitiveKind::Int);
    pub const LONG: HirType = HirType::Primitive(PrimitiveKind::Long);
    pub const BOOLEAN: HirType = HirType::Primitive(PrimitiveKind::Boolean);
    pub const NOTHING: HirType = HirType::Nothing { nullable: false };
    pub const ANY: HirType = HirType::Any { nullable: false };
    pub const NULLABLE_ANY: HirType = HirType::Any { nullable: true };

    pub fn class(class: ClassId) -> Self {
        HirType::Class {
            class,
            nullable: false,
        }
    }

    pub fn nullable_class(class: ClassId) -> Self {
        HirType::Class {
            class,
            nullable: true,
        }
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, HirType::Unit)
    }

    /// `Nothing` (not `Nothing?`, whose only value is null)
    pub fn is_nothing(&self) -> bool {
        matches!(self, HirType::Nothing { nullable: false })
    }

    pub fn is_any(&self) -> bool {
        matches!(self, HirType::Any { .. })
    }

    pub fn is_nullable(&self) -> bool {
        match self {
            HirType::Nothing { nullable } | HirType::Any { nullable } => *nullable,
            HirType::Class { nullable, .. } => *nullable,
            HirType::Unit | HirType::Primitive(_) => false,
        }
    }

    pub fn primitive(&self) -> Option<PrimitiveKind> {
        match self {
            HirType::Primitive(kind) => Some(*kind),
            _ => None,
        }
    }

    pub fn class_id(&self) -> Option<ClassId> {
        match self {
            HirType::Class { class, .. } => Some(*class),
            _ => None,
        }
    }

    /// Whether a merge point of this type carries no value
    pub fn is_valueless(&self) -> bool {
        self.is_unit() || self.is_nothing()
    }

    /// Native type used to store a value of this type (variables, fields,
    /// parameters, phi nodes). Unit values are the unit singleton reference.
    pub fn storage_type(&self) -> IrType {
        match self {
            HirType::Primitive(kind) => kind.ir_type(),
            HirType::Unit | HirType::Nothing { .. } | HirType::Any { .. } | HirType::Class { .. } => {
                IrType::Ptr
            }
        }
    }

    /// Native type used as a function return type
    pub fn return_type(&self) -> IrType {
        if self.is_valueless() {
            IrType::Void
        } else {
            self.storage_type()
        }
    }
}

impl fmt::Display for HirType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (name, nullable) = match self {
            HirType::Unit => ("Unit".to_string(), false),
            HirType::Nothing { nullable } => ("Nothing".to_string(), *nullable),
            HirType::Primitive(kind) => (format!("{:?}", kind), false),
            HirType::Any { nullable } => ("Any".to_string(), *nullable),
            HirType::Class { class, nullable } => (class.to_string(), *nullable),
        };
        write!(f, "{}{}", name, if nullable { "?" } else { "" })
    }
}
