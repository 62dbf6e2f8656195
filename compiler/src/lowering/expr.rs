//! Expression evaluator
//!
//! One routine per node kind. Lowering an expression appends its code at the
//! insertion point and returns its [`Value`]; code after a terminated path is
//! never emitted.

use super::collaborators::RuntimeFunction;
use super::scope::Slot;
use super::value::{Value, ValueRepr};
use super::Lowerer;
use crate::error::{LoweringError, LoweringResult};
use crate::hir::{
    FieldId, HirConstant, HirExpr, HirExprKind, HirType, HirVarargElement, PrimitiveKind,
    TypeOperator, VarId,
};
use crate::ir::{BinaryOp, CastKind, CompareOp, IrId, IrSourceLocation, IrType, IrValue, UnaryOp};
use log::trace;

impl<'a> Lowerer<'a> {
    pub(crate) fn lower_expr(&mut self, expr: &'a HirExpr) -> LoweringResult<Value> {
        if self.builder.is_terminated() {
            return Ok(Value::unreachable(expr.ty));
        }
        trace!("lower {} : {} at {}", expr.kind_name(), expr.ty, expr.location);

        match &expr.kind {
            HirExprKind::Call(call) => self.lower_call(expr, call),
            HirExprKind::DelegatingConstructorCall {
                constructor,
                arguments,
            } => self.lower_delegating_constructor_call(*constructor, arguments),
            HirExprKind::GetVariable(var) => self.get_value(*var, expr.location),
            HirExprKind::SetVariable { var, value } => self.lower_set_variable(expr, *var, value),
            HirExprKind::GetField { field, receiver } => {
                self.lower_get_field(expr, *field, receiver.as_deref())
            }
            HirExprKind::SetField {
                field,
                receiver,
                value,
            } => self.lower_set_field(*field, receiver.as_deref(), value),
            HirExprKind::Constant(constant) => self.lower_constant(constant, expr.ty),
            HirExprKind::Return { target, value } => self.lower_return(*target, value),
            HirExprKind::When { branches } => self.lower_when(expr, branches),
            HirExprKind::Throw(exception) => self.lower_throw(exception),
            HirExprKind::Try {
                body,
                catches,
                finally,
            } => self.lower_try(expr, body, catches, finally.as_deref()),
            HirExprKind::InlinedBody { function, body } => {
                self.lower_inlined_body(expr, *function, body)
            }
            HirExprKind::Block { statements } => self.lower_block(expr, statements),
            HirExprKind::While {
                loop_id,
                condition,
                body,
            } => self.lower_while(*loop_id, condition, body),
            HirExprKind::DoWhile {
                loop_id,
                body,
                condition,
            } => self.lower_do_while(*loop_id, body, condition),
            HirExprKind::Vararg {
                element_type,
                elements,
            } => self.lower_vararg(expr, *element_type, elements),
            HirExprKind::Break(loop_id) => self.lower_break(*loop_id),
            HirExprKind::Continue(loop_id) => self.lower_continue(*loop_id),
            HirExprKind::GetObjectInstance(class) => self.lower_object_instance(expr, *class),
            HirExprKind::FunctionReference(function) => {
                let target = self.function_ref(*function)?;
                let reg = self.builder.build_const(IrValue::Function(target))?;
                Ok(Value::register(reg, expr.ty))
            }
            HirExprKind::TypeOperator {
                operator,
                operand,
                type_operand,
            } => self.lower_type_operator(expr, *operator, operand, *type_operand),
        }
    }

    /// Lower `expr`; `None` when control does not continue after it
    pub(crate) fn eval(&mut self, expr: &'a HirExpr) -> LoweringResult<Option<Value>> {
        let value = self.lower_expr(expr)?;
        if value.is_unreachable() || self.builder.is_terminated() {
            Ok(None)
        } else {
            Ok(Some(value))
        }
    }

    /// Register holding `value`
    pub(crate) fn materialize(&mut self, value: Value) -> LoweringResult<IrId> {
        match value.repr {
            ValueRepr::Register(reg) => Ok(reg),
            ValueRepr::Unit => {
                let unit = self.unit_instance();
                self.builder.build_const(IrValue::Global(unit))
            }
            ValueRepr::Unreachable => Err(LoweringError::internal(
                "materializing the value of an expression that does not complete",
            )),
        }
    }

    fn lower_set_variable(&mut self, expr: &'a HirExpr, var: VarId, value: &'a HirExpr) -> LoweringResult<Value> {
        let Some(value) = self.eval(value)? else {
            return Ok(Value::unreachable(HirType::Unit));
        };
        match self.declared_slot(var) {
            Some(Slot::Stack { ptr, .. }) => {
                let reg = self.materialize(value)?;
                self.builder.build_store(ptr, reg)?;
                Ok(Value::unit())
            }
            Some(Slot::Value(_)) => Err(LoweringError::internal(format!(
                "assignment to immutable variable {} at {}",
                var, expr.location
            ))),
            None => Err(LoweringError::UnboundVariable {
                var,
                location: expr.location,
            }),
        }
    }

    // === Fields ===

    /// Address of a field: the global of a static field, or the element of
    /// the receiver's object body
    fn field_address(&mut self, field: FieldId, receiver: Option<&'a HirExpr>) -> LoweringResult<Option<IrId>> {
        let decl = self.decls.field(field)?;
        if decl.is_static {
            let global = self.static_field_ref(field)?;
            return Ok(Some(self.builder.build_const(IrValue::Global(global))?));
        }

        let receiver = match receiver {
            Some(receiver) => match self.eval(receiver)? {
                Some(value) => self.materialize(value)?,
                None => return Ok(None),
            },
            // Implicit `this`
            None => {
                let this = self
                    .function_receiver()?
                    .ok_or_else(|| LoweringError::internal(format!("no receiver for {}", field)))?;
                self.materialize(this)?
            }
        };
        let owner = decl
            .owner
            .ok_or_else(|| LoweringError::unresolved(format!("owner of {}", field)))?;
        let body = self.layout.body_type(owner)?;
        let index = self.layout.field_index(field)?;
        Ok(Some(self.builder.build_gep(receiver, vec![index], body)?))
    }

    fn lower_get_field(
        &mut self,
        expr: &'a HirExpr,
        field: FieldId,
        receiver: Option<&'a HirExpr>,
    ) -> LoweringResult<Value> {
        let Some(address) = self.field_address(field, receiver)? else {
            return Ok(Value::unreachable(expr.ty));
        };
        let ty = self.decls.field(field)?.ty;
        let reg = self.builder.build_load(address, ty.storage_type())?;
        Ok(Value::register(reg, expr.ty))
    }

    fn lower_set_field(
        &mut self,
        field: FieldId,
        receiver: Option<&'a HirExpr>,
        value: &'a HirExpr,
    ) -> LoweringResult<Value> {
        let Some(address) = self.field_address(field, receiver)? else {
            return Ok(Value::unreachable(HirType::Unit));
        };
        let Some(value) = self.eval(value)? else {
            return Ok(Value::unreachable(HirType::Unit));
        };
        let reg = self.materialize(value)?;
        self.builder.build_store(address, reg)?;
        Ok(Value::unit())
    }

    // === Constants ===

    pub(crate) fn constant_value(&mut self, constant: &HirConstant) -> IrValue {
        match constant {
            HirConstant::Null => IrValue::Null,
            HirConstant::Boolean(b) => IrValue::Bool(*b),
            HirConstant::Char(c) => IrValue::I16(*c as i16),
            HirConstant::Byte(b) => IrValue::I8(*b),
            HirConstant::Short(s) => IrValue::I16(*s),
            HirConstant::Int(i) => IrValue::I32(*i),
            HirConstant::Long(l) => IrValue::I64(*l),
            HirConstant::Float(f) => IrValue::F32(*f),
            HirConstant::Double(d) => IrValue::F64(*d),
            HirConstant::String(s) => {
                IrValue::Constant(self.static_data.intern_string(&mut self.builder.module, s))
            }
        }
    }

    fn lower_constant(&mut self, constant: &HirConstant, ty: HirType) -> LoweringResult<Value> {
        let value = self.constant_value(constant);
        let reg = self.builder.build_const(value)?;
        Ok(Value::register(reg, ty))
    }

    // === Type operators ===

    fn lower_type_operator(
        &mut self,
        expr: &'a HirExpr,
        operator: TypeOperator,
        operand: &'a HirExpr,
        type_operand: HirType,
    ) -> LoweringResult<Value> {
        if operator == TypeOperator::SafeCast {
            return Err(LoweringError::Unsupported {
                node: expr.kind_name(),
                location: expr.location,
            });
        }
        let Some(value) = self.eval(operand)? else {
            return Ok(Value::unreachable(expr.ty));
        };

        match operator {
            TypeOperator::ImplicitCast => Ok(value.with_type(expr.ty)),
            TypeOperator::CoercionToUnit => Ok(Value::unit()),
            TypeOperator::Cast => self.lower_checked_cast(value, type_operand, expr.ty, expr.location),
            TypeOperator::InstanceOf => self.lower_instance_of(value, type_operand),
            TypeOperator::NotInstanceOf => {
                let is = self.lower_instance_of(value, type_operand)?;
                if is.is_unreachable() {
                    return Ok(is);
                }
                let is = self.materialize(is)?;
                let not = self.builder.build_unop(UnaryOp::Not, is)?;
                Ok(Value::register(not, HirType::BOOLEAN))
            }
            TypeOperator::IntegerCoercion => self.lower_numeric_coercion(expr, value, type_operand),
            TypeOperator::SafeCast => Err(LoweringError::Unsupported {
                node: expr.kind_name(),
                location: expr.location,
            }),
        }
    }

    /// Runtime check against the class descriptor; the value passes through
    /// unchanged. Null passes when the target is nullable and casts to `Any`
    /// need no check.
    fn lower_checked_cast(
        &mut self,
        value: Value,
        target: HirType,
        ty: HirType,
        location: IrSourceLocation,
    ) -> LoweringResult<Value> {
        if target.is_any() || value.ty.primitive().is_some() {
            return Ok(value.with_type(ty));
        }
        let class = target.class_id().ok_or_else(|| LoweringError::TypeMismatch {
            expected: "class type".to_string(),
            found: target.to_string(),
            location,
        })?;
        let object = self.materialize(value)?;

        if !target.is_nullable() {
            let type_info = self.type_info_ref(class)?;
            self.call_runtime(RuntimeFunction::CheckCast, &[object, type_info])?;
            return Ok(Value::register(object, ty));
        }

        let check = self.builder.create_block_with_label("cast.check")?;
        let done = self.continuation(HirType::Unit, "cast.done")?;
        let null = self.builder.build_null()?;
        let is_null = self.builder.build_cmp(CompareOp::Eq, object, null)?;
        self.builder.build_cond_branch(is_null, done.block, check)?;

        self.builder.switch_to_block(check);
        let type_info = self.type_info_ref(class)?;
        self.call_runtime(RuntimeFunction::CheckCast, &[object, type_info])?;
        self.jump(&done, Value::unit())?;

        self.resume_at(&done)?;
        Ok(Value::register(object, ty))
    }

    /// Null test first, then the runtime instance query, merged by a
    /// two-predecessor phi
    fn lower_instance_of(&mut self, value: Value, target: HirType) -> LoweringResult<Value> {
        if let Some(kind) = value.ty.primitive() {
            let reg = self.builder.build_bool(target.primitive() == Some(kind))?;
            return Ok(Value::register(reg, HirType::BOOLEAN));
        }
        let object = self.materialize(value)?;

        let merge = self.continuation(HirType::BOOLEAN, "is.merge")?;
        let null_block = self.builder.create_block_with_label("is.null")?;
        let test_block = self.builder.create_block_with_label("is.test")?;
        let null = self.builder.build_null()?;
        let is_null = self.builder.build_cmp(CompareOp::Eq, object, null)?;
        self.builder
            .build_cond_branch(is_null, null_block, test_block)?;

        self.builder.switch_to_block(null_block);
        let on_null = self.builder.build_bool(target.is_nullable())?;
        self.jump(&merge, Value::register(on_null, HirType::BOOLEAN))?;

        self.builder.switch_to_block(test_block);
        let result = match target {
            HirType::Any { .. } => self.builder.build_bool(true)?,
            HirType::Class { class, .. } => {
                let type_info = self.type_info_ref(class)?;
                self.call_runtime(RuntimeFunction::IsInstance, &[object, type_info])?
                    .ok_or_else(|| LoweringError::internal("instance check produced no value"))?
            }
            _ => self.builder.build_bool(false)?,
        };
        self.jump(&merge, Value::register(result, HirType::BOOLEAN))?;

        self.resume_at(&merge)
    }

    /// Representation change between primitive kinds
    fn lower_numeric_coercion(&mut self, expr: &'a HirExpr, value: Value, target: HirType) -> LoweringResult<Value> {
        let mismatch = |found: HirType| LoweringError::TypeMismatch {
            expected: "primitive type".to_string(),
            found: found.to_string(),
            location: expr.location,
        };
        let from = value.ty.primitive().ok_or_else(|| mismatch(value.ty))?;
        let to = target.primitive().ok_or_else(|| mismatch(target))?;
        let reg = self.materialize(value)?;
        let (from_ty, to_ty) = (from.ir_type(), to.ir_type());

        let cast = match (from.is_floating(), to.is_floating()) {
            (false, false) => {
                let (from_bits, to_bits) = (
                    from_ty.bit_width().unwrap_or(32),
                    to_ty.bit_width().unwrap_or(32),
                );
                if from_bits > to_bits {
                    Some(CastKind::Trunc)
                } else if from_bits < to_bits {
                    // Characters and booleans are unsigned
                    if matches!(from, PrimitiveKind::Char | PrimitiveKind::Boolean) {
                        Some(CastKind::ZeroExtend)
                    } else {
                        Some(CastKind::SignExtend)
                    }
                } else {
                    None
                }
            }
            (false, true) => Some(CastKind::IntToFloat),
            (true, false) => Some(CastKind::FloatToInt),
            (true, true) if from != to => Some(CastKind::FloatResize),
            (true, true) => None,
        };

        match cast {
            Some(kind) => {
                let converted = self.builder.build_cast(reg, kind, to_ty)?;
                Ok(Value::register(converted, expr.ty))
            }
            None => Ok(Value::register(reg, expr.ty)),
        }
    }

    // === Variadic literals ===

    /// Array literal of a variadic argument. Spread elements are copied
    /// through the runtime; the array is sized by the sum of element counts.
    fn lower_vararg(
        &mut self,
        expr: &'a HirExpr,
        element_type: HirType,
        elements: &'a [HirVarargElement],
    ) -> LoweringResult<Value> {
        let mut lowered = Vec::with_capacity(elements.len());
        for element in elements {
            let (e, spread) = match element {
                HirVarargElement::Element(e) => (e, false),
                HirVarargElement::Spread(e) => (e, true),
            };
            let Some(value) = self.eval(e)? else {
                return Ok(Value::unreachable(expr.ty));
            };
            lowered.push((self.materialize(value)?, spread));
        }

        // Total length
        let fixed = lowered.iter().filter(|(_, spread)| !spread).count() as i64;
        let mut length = self.builder.build_int(fixed, &IrType::I32)?;
        let mut spread_sizes = Vec::new();
        for (reg, spread) in &lowered {
            if *spread {
                let size = self
                    .call_runtime(RuntimeFunction::ArraySize, &[*reg])?
                    .ok_or_else(|| LoweringError::internal("array size produced no value"))?;
                length = self
                    .builder
                    .build_binop(BinaryOp::Add, length, size)?;
                spread_sizes.push(size);
            }
        }

        let storage = element_type.storage_type();
        let element_size = self.builder.build_int(storage.size() as i64, &IrType::I32)?;
        let array = self
            .call_runtime(RuntimeFunction::AllocArray, &[element_size, length])?
            .ok_or_else(|| LoweringError::internal("array allocation produced no value"))?;

        let one = self.builder.build_int(1, &IrType::I32)?;
        let mut index = self.builder.build_int(0, &IrType::I32)?;
        let mut sizes = spread_sizes.into_iter();
        for (reg, spread) in lowered {
            if spread {
                let count = sizes
                    .next()
                    .ok_or_else(|| LoweringError::internal("spread size missing"))?;
                let zero = self.builder.build_int(0, &IrType::I32)?;
                self.call_runtime(RuntimeFunction::ArrayCopy, &[reg, zero, array, index, count])?;
                index = self
                    .builder
                    .build_binop(BinaryOp::Add, index, count)?;
            } else {
                let address = self
                    .call_runtime(RuntimeFunction::ArrayElementAddress, &[array, index])?
                    .ok_or_else(|| LoweringError::internal("element address produced no value"))?;
                self.builder.build_store(address, reg)?;
                index = self
                    .builder
                    .build_binop(BinaryOp::Add, index, one)?;
            }
        }

        Ok(Value::register(array, expr.ty))
    }
}
