//! HIR expressions and statements

use super::{ClassId, FieldId, FunctionId, HirType, LoopId, VarId};
use crate::ir::{IrSourceLocation, Lifetime};
use serde::{Deserialize, Serialize};

/// An expression with its static result type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HirExpr {
    pub kind: HirExprKind,
    pub ty: HirType,
    pub location: IrSourceLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HirExprKind {
    Call(HirCall),

    /// `this(...)` / `super(...)` inside a constructor body
    DelegatingConstructorCall {
        constructor: FunctionId,
        arguments: Vec<Option<HirExpr>>,
    },

    GetVariable(VarId),

    SetVariable {
        var: VarId,
        value: Box<HirExpr>,
    },

    /// Instance field read (with receiver) or static field read
    GetField {
        field: FieldId,
        receiver: Option<Box<HirExpr>>,
    },

    SetField {
        field: FieldId,
        receiver: Option<Box<HirExpr>>,
        value: Box<HirExpr>,
    },

    Constant(HirConstant),

    /// Return from `target`, which is the enclosing function or an inlined body
    Return {
        target: FunctionId,
        value: Box<HirExpr>,
    },

    /// Multi-branch conditional; a branch whose condition is the constant
    /// `true` is unconditional and ends the list
    When { branches: Vec<HirBranch> },

    Throw(Box<HirExpr>),

    Try {
        body: Box<HirExpr>,
        catches: Vec<HirCatch>,
        finally: Option<Box<HirExpr>>,
    },

    /// Body of an inlined call; returns targeting `function` resume after it
    InlinedBody {
        function: FunctionId,
        body: Box<HirExpr>,
    },

    /// Statement container; its value is the value of the last expression
    /// statement unless the container type is `Unit`
    Block { statements: Vec<HirStatement> },

    While {
        loop_id: LoopId,
        condition: Box<HirExpr>,
        body: Box<HirExpr>,
    },

    DoWhile {
        loop_id: LoopId,
        body: Box<HirExpr>,
        condition: Box<HirExpr>,
    },

    /// Array literal passed to a variadic parameter
    Vararg {
        element_type: HirType,
        elements: Vec<HirVarargElement>,
    },

    Break(LoopId),

    Continue(LoopId),

    /// Instance of an `object` declaration
    GetObjectInstance(ClassId),

    /// Reference to a function as a value
    FunctionReference(FunctionId),

    TypeOperator {
        operator: TypeOperator,
        operand: Box<HirExpr>,
        type_operand: HirType,
    },
}

/// Call of a declared function
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HirCall {
    pub function: FunctionId,
    pub dispatch_receiver: Option<Box<HirExpr>>,
    pub extension_receiver: Option<Box<HirExpr>>,
    /// Value arguments in parameter order; `None` marks an argument that was
    /// never supplied
    pub arguments: Vec<Option<HirExpr>>,
    /// `super<T>.f()`: binds statically to the implementation in `T`
    pub super_qualifier: Option<ClassId>,
    pub lifetime: Lifetime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HirBranch {
    pub condition: HirExpr,
    pub result: HirExpr,
}

impl HirBranch {
    /// Whether the branch is taken without a test
    pub fn is_unconditional(&self) -> bool {
        matches!(
            self.condition.kind,
            HirExprKind::Constant(HirConstant::Boolean(true))
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HirCatch {
    /// Variable bound to the caught exception inside `body`
    pub parameter: VarId,
    pub ty: HirType,
    pub body: HirExpr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HirVarargElement {
    Element(HirExpr),
    /// `*array`: all elements of another array
    Spread(HirExpr),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HirConstant {
    Null,
    Boolean(bool),
    Char(u16),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeOperator {
    /// Checked cast; fails at runtime
    Cast,
    /// Cast already proven by the front end
    ImplicitCast,
    InstanceOf,
    NotInstanceOf,
    /// Integer widening / narrowing between primitive kinds
    IntegerCoercion,
    /// Evaluate and discard, yielding unit
    CoercionToUnit,
    /// `as?`; must be lowered before this pass
    SafeCast,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HirStatement {
    Expression(HirExpr),
    Variable {
        id: VarId,
        name: String,
        ty: HirType,
        mutable: bool,
        initializer: Option<HirExpr>,
    },
}

impl HirExpr {
    pub fn new(kind: HirExprKind, ty: HirType) -> Self {
        Self {
            kind,
            ty,
            location: IrSourceLocation::unknown(),
        }
    }

    pub fn at(mut self, location: IrSourceLocation) -> Self {
        self.location = location;
        self
    }

    /// Name of the node kind, for diagnostics
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            HirExprKind::Call(_) => "Call",
            HirExprKind::DelegatingConstructorCall { .. } => "DelegatingConstructorCall",
            HirExprKind::GetVariable(_) => "GetVariable",
            HirExprKind::SetVariable { .. } => "SetVariable",
            HirExprKind::GetField { .. } => "GetField",
            HirExprKind::SetField { .. } => "SetField",
            HirExprKind::Constant(_) => "Constant",
            HirExprKind::Return { .. } => "Return",
            HirExprKind::When { .. } => "When",
            HirExprKind::Throw(_) => "Throw",
            HirExprKind::Try { .. } => "Try",
            HirExprKind::InlinedBody { .. } => "InlinedBody",
            HirExprKind::Block { .. } => "Block",
            HirExprKind::While { .. } => "While",
            HirExprKind::DoWhile { .. } => "DoWhile",
            HirExprKind::Vararg { .. } => "Vararg",
            HirExprKind::Break(_) => "Break",
            HirExprKind::Continue(_) => "Continue",
            HirExprKind::GetObjectInstance(_) => "GetObjectInstance",
            HirExprKind::FunctionReference(_) => "FunctionReference",
            HirExprKind::TypeOperator { operator, .. } => match operator {
                TypeOperator::SafeCast => "SafeCast",
                _ => "TypeOperator",
            },
        }
    }

    // === Construction helpers ===

    pub fn unit() -> Self {
        Self::block(Vec::new(), HirType::Unit)
    }

    pub fn constant(value: HirConstant, ty: HirType) -> Self {
        Self::new(HirExprKind::Constant(value), ty)
    }

    pub fn int(value: i32) -> Self {
        Self::constant(HirConstant::Int(value), HirType::INT)
    }

    pub fn boolean(value: bool) -> Self {
        Self::constant(HirConstant::Boolean(value), HirType::BOOLEAN)
    }

    pub fn null() -> Self {
        Self::constant(HirConstant::Null, HirType::Nothing { nullable: true })
    }

    pub fn get_var(var: VarId, ty: HirType) -> Self {
        Self::new(HirExprKind::GetVariable(var), ty)
    }

    pub fn set_var(var: VarId, value: HirExpr) -> Self {
        Self::new(
            HirExprKind::SetVariable {
                var,
                value: Box::new(value),
            },
            HirType::Unit,
        )
    }

    pub fn ret(target: FunctionId, value: HirExpr) -> Self {
        Self::new(
            HirExprKind::Return {
                target,
                value: Box::new(value),
            },
            HirType::NOTHING,
        )
    }

    pub fn block(statements: Vec<HirStatement>, ty: HirType) -> Self {
        Self::new(HirExprKind::Block { statements }, ty)
    }

    pub fn when(branches: Vec<HirBranch>, ty: HirType) -> Self {
        Self::new(HirExprKind::When { branches }, ty)
    }

    /// `if (condition) then else otherwise`
    pub fn if_else(condition: HirExpr, then: HirExpr, otherwise: HirExpr, ty: HirType) -> Self {
        Self::when(
            vec![
                HirBranch {
                    condition,
                    result: then,
                },
                HirBranch {
                    condition: HirExpr::boolean(true),
                    result: otherwise,
                },
            ],
            ty,
        )
    }

    /// `if (condition) then` without an else branch
    pub fn if_then(condition: HirExpr, then: HirExpr) -> Self {
        Self::when(
            vec![HirBranch {
                condition,
                result: then,
            }],
            HirType::Unit,
        )
    }

    pub fn while_loop(loop_id: LoopId, condition: HirExpr, body: HirExpr) -> Self {
        Self::new(
            HirExprKind::While {
                loop_id,
                condition: Box::new(condition),
                body: Box::new(body),
            },
            HirType::Unit,
        )
    }

    pub fn do_while(loop_id: LoopId, body: HirExpr, condition: HirExpr) -> Self {
        Self::new(
            HirExprKind::DoWhile {
                loop_id,
                body: Box::new(body),
                condition: Box::new(condition),
            },
            HirType::Unit,
        )
    }

    pub fn brk(loop_id: LoopId) -> Self {
        Self::new(HirExprKind::Break(loop_id), HirType::NOTHING)
    }

    pub fn cont(loop_id: LoopId) -> Self {
        Self::new(HirExprKind::Continue(loop_id), HirType::NOTHING)
    }

    pub fn throw(exception: HirExpr) -> Self {
        Self::new(HirExprKind::Throw(Box::new(exception)), HirType::NOTHING)
    }

    pub fn try_catch(
        body: HirExpr,
        catches: Vec<HirCatch>,
        finally: Option<HirExpr>,
        ty: HirType,
    ) -> Self {
        Self::new(
            HirExprKind::Try {
                body: Box::new(body),
                catches,
                finally: finally.map(Box::new),
            },
            ty,
        )
    }

    pub fn call(function: FunctionId, arguments: Vec<HirExpr>, ty: HirType) -> Self {
        Self::new(
            HirExprKind::Call(HirCall {
                function,
                dispatch_receiver: None,
                extension_receiver: None,
                arguments: arguments.into_iter().map(Some).collect(),
                super_qualifier: None,
                lifetime: Lifetime::Irrelevant,
            }),
            ty,
        )
    }

    pub fn method_call(
        function: FunctionId,
        receiver: HirExpr,
        arguments: Vec<HirExpr>,
        ty: HirType,
    ) -> Self {
        Self::new(
            HirExprKind::Call(HirCall {
                function,
                dispatch_receiver: Some(Box::new(receiver)),
                extension_receiver: None,
                arguments: arguments.into_iter().map(Some).collect(),
                super_qualifier: None,
                lifetime: Lifetime::Irrelevant,
            }),
            ty,
        )
    }

    pub fn type_op(operator: TypeOperator, operand: HirExpr, type_operand: HirType, ty: HirType) -> Self {
        Self::new(
            HirExprKind::TypeOperator {
                operator,
                operand: Box::new(operand),
                type_operand,
            },
            ty,
        )
    }

    pub fn get_field(field: FieldId, receiver: Option<HirExpr>, ty: HirType) -> Self {
        Self::new(
            HirExprKind::GetField {
                field,
                receiver: receiver.map(Box::new),
            },
            ty,
        )
    }

    pub fn set_field(field: FieldId, receiver: Option<HirExpr>, value: HirExpr) -> Self {
        Self::new(
            HirExprKind::SetField {
                field,
                receiver: receiver.map(Box::new),
                value: Box::new(value),
            },
            HirType::Unit,
        )
    }
}

impl HirStatement {
    pub fn expr(expr: HirExpr) -> Self {
        HirStatement::Expression(expr)
    }

    pub fn val(id: VarId, name: &str, ty: HirType, initializer: HirExpr) -> Self {
        HirStatement::Variable {
            id,
            name: name.to_string(),
            ty,
            mutable: false,
            initializer: Some(initializer),
        }
    }

    pub fn var(id: VarId, name: &str, ty: HirType, initializer: HirExpr) -> Self {
        HirStatement::Variable {
            id,
            name: name.to_string(),
            ty,
            mutable: true,
            initializer: Some(initializer),
        }
    }
}
