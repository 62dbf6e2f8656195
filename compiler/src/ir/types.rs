//! MIR Type System
//!
//! Types of the block-structured target representation. They are lower-level
//! than HIR types and map directly onto native representations: every object
//! reference is an opaque `Ptr`, every primitive has a fixed bit width.

use super::{IrConstantId, IrFunctionId, IrGlobalId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// MIR type representation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IrType {
    /// Void type (no value)
    Void,

    /// Boolean type (1 bit)
    Bool,

    /// Integer types
    I8,
    I16,
    I32,
    I64,

    /// Floating point types
    F32,
    F64,

    /// Object reference or raw pointer
    Ptr,

    /// Function type (used for function pointer casts)
    Function(IrFunctionType),

    /// Structure type (object body layouts, static aggregates)
    Struct {
        name: String,
        fields: Vec<IrType>,
    },
}

/// Native function signature
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IrFunctionType {
    pub params: Vec<IrType>,
    pub return_type: Box<IrType>,
}

impl IrFunctionType {
    pub fn new(params: Vec<IrType>, return_type: IrType) -> Self {
        Self {
            params,
            return_type: Box::new(return_type),
        }
    }

    /// Whether a call through this signature produces no native value
    pub fn returns_void(&self) -> bool {
        *self.return_type == IrType::Void
    }
}

impl IrType {
    /// Get the size of the type in bytes (pointers are 8 bytes wide)
    pub fn size(&self) -> usize {
        match self {
            IrType::Void => 0,
            IrType::Bool | IrType::I8 => 1,
            IrType::I16 => 2,
            IrType::I32 | IrType::F32 => 4,
            IrType::I64 | IrType::F64 | IrType::Ptr | IrType::Function(_) => 8,
            IrType::Struct { fields, .. } => fields.iter().map(|f| f.size()).sum(),
        }
    }

    /// Bit width of integer-like types
    pub fn bit_width(&self) -> Option<u32> {
        match self {
            IrType::Bool => Some(1),
            IrType::I8 => Some(8),
            IrType::I16 => Some(16),
            IrType::I32 => Some(32),
            IrType::I64 => Some(64),
            _ => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, IrType::I8 | IrType::I16 | IrType::I32 | IrType::I64)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, IrType::F32 | IrType::F64)
    }

    pub fn is_void(&self) -> bool {
        matches!(self, IrType::Void)
    }

    /// Zero value for this type, used for constant global initializers
    pub fn default_value(&self) -> IrValue {
        match self {
            IrType::Void => IrValue::Undef,
            IrType::Bool => IrValue::Bool(false),
            IrType::I8 => IrValue::I8(0),
            IrType::I16 => IrValue::I16(0),
            IrType::I32 => IrValue::I32(0),
            IrType::I64 => IrValue::I64(0),
            IrType::F32 => IrValue::F32(0.0),
            IrType::F64 => IrValue::F64(0.0),
            IrType::Ptr | IrType::Function(_) => IrValue::Null,
            IrType::Struct { fields, .. } => {
                IrValue::Aggregate(fields.iter().map(|f| f.default_value()).collect())
            }
        }
    }
}

/// Constant operand values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IrValue {
    /// Undefined value; never a representable runtime value
    Undef,
    /// Null reference
    Null,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    /// Address of a function
    Function(IrFunctionId),
    /// Address of a global
    Global(IrGlobalId),
    /// Reference to interned static data
    Constant(IrConstantId),
    /// Aggregate of constants (static initializers)
    Aggregate(Vec<IrValue>),
}

impl IrValue {
    /// Native type of this constant
    pub fn ty(&self) -> IrType {
        match self {
            IrValue::Undef => IrType::Ptr,
            IrValue::Null => IrType::Ptr,
            IrValue::Bool(_) => IrType::Bool,
            IrValue::I8(_) => IrType::I8,
            IrValue::I16(_) => IrType::I16,
            IrValue::I32(_) => IrType::I32,
            IrValue::I64(_) => IrType::I64,
            IrValue::F32(_) => IrType::F32,
            IrValue::F64(_) => IrType::F64,
            IrValue::Function(_) | IrValue::Global(_) | IrValue::Constant(_) => IrType::Ptr,
            IrValue::Aggregate(values) => IrType::Struct {
                name: String::new(),
                fields: values.iter().map(|v| v.ty()).collect(),
            },
        }
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrType::Void => write!(f, "void"),
            IrType::Bool => write!(f, "bool"),
            IrType::I8 => write!(f, "i8"),
            IrType::I16 => write!(f, "i16"),
            IrType::I32 => write!(f, "i32"),
            IrType::I64 => write!(f, "i64"),
            IrType::F32 => write!(f, "f32"),
            IrType::F64 => write!(f, "f64"),
            IrType::Ptr => write!(f, "ptr"),
            IrType::Function(sig) => write!(f, "{}", sig),
            IrType::Struct { name, fields } => {
                write!(f, "struct {} {{", name)?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", field)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl fmt::Display for IrFunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param)?;
        }
        write!(f, ") -> {}", self.return_type)
    }
}

impl fmt::Display for IrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrValue::Undef => write!(f, "undef"),
            IrValue::Null => write!(f, "null"),
            IrValue::Bool(b) => write!(f, "{}", b),
            IrValue::I8(v) => write!(f, "{}i8", v),
            IrValue::I16(v) => write!(f, "{}i16", v),
            IrValue::I32(v) => write!(f, "{}", v),
            IrValue::I64(v) => write!(f, "{}i64", v),
            IrValue::F32(v) => write!(f, "{}f32", v),
            IrValue::F64(v) => write!(f, "{}f64", v),
            IrValue::Function(id) => write!(f, "@{}", id),
            IrValue::Global(id) => write!(f, "@{}", id),
            IrValue::Constant(id) => write!(f, "@{}", id),
            IrValue::Aggregate(values) => {
                write!(f, "{{")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_size() {
        assert_eq!(IrType::I32.size(), 4);
        assert_eq!(IrType::Bool.size(), 1);
        assert_eq!(IrType::Ptr.size(), 8);
        let body = IrType::Struct {
            name: "Point".to_string(),
            fields: vec![IrType::Ptr, IrType::I32, IrType::I32],
        };
        assert_eq!(body.size(), 16);
    }

    #[test]
    fn test_type_display() {
        assert_eq!(format!("{}", IrType::I32), "i32");
        let sig = IrFunctionType::new(vec![IrType::Ptr, IrType::I64], IrType::Void);
        assert_eq!(format!("{}", IrType::Function(sig)), "fn(ptr, i64) -> void");
    }

    #[test]
    fn test_bit_widths() {
        assert_eq!(IrType::I8.bit_width(), Some(8));
        assert_eq!(IrType::I64.bit_width(), Some(64));
        assert_eq!(IrType::Ptr.bit_width(), None);
        assert!(IrType::I16.is_integer());
        assert!(!IrType::F64.is_integer());
    }

    #[test]
    fn test_default_values() {
        assert_eq!(IrType::Ptr.default_value(), IrValue::Null);
        assert_eq!(IrType::I64.default_value(), IrValue::I64(0));
    }
}
