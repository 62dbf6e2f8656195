//! Calls: argument evaluation, intrinsics, constructors, dispatch and
//! constant-factory folding

use super::collaborators::RuntimeFunction;
use super::scope::CallTarget;
use super::value::Value;
use super::Lowerer;
use crate::error::{LoweringError, LoweringResult};
use crate::hir::{
    ClassId, ClassKind, ConstantFactory, FunctionId, HirCall, HirExpr, HirExprKind, HirFunction, HirType,
    HirVarargElement, Intrinsic,
};
use crate::ir::{
    BinaryOp, CompareOp, IrArgs, IrCallee, IrFunctionId, IrFunctionSignature, IrId, IrParameter,
    IrType, IrValue, Lifetime, UnaryOp,
};
use log::trace;

/// How a call reaches its implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatch {
    Direct,
    /// Through the vtable of the receiver's class
    Virtual,
    /// Through the runtime open-method lookup
    Interface,
}

fn dispatch_of(function: &HirFunction, owner_kind: Option<ClassKind>, call: &HirCall) -> Dispatch {
    if call.super_qualifier.is_some()
        || function.is_constructor()
        || function.dispatch_receiver.is_none()
        || !function.is_overridable
    {
        return Dispatch::Direct;
    }
    match owner_kind {
        Some(ClassKind::Interface) => Dispatch::Interface,
        _ => Dispatch::Virtual,
    }
}

fn pick<T>(is_float: bool, int_op: T, float_op: T) -> T {
    if is_float {
        float_op
    } else {
        int_op
    }
}

/// Key hashed for interface lookups: name and parameter types
fn signature_key(function: &HirFunction) -> String {
    let params: Vec<String> = function
        .extension_receiver
        .iter()
        .chain(function.parameters.iter())
        .map(|p| p.ty.to_string())
        .collect();
    format!("{}({}):{}", function.name, params.join(","), function.return_type)
}

impl<'a> Lowerer<'a> {
    /// Native signature of a declared function: receivers first, then value
    /// parameters; constructors return nothing
    pub(crate) fn native_signature(&self, function: &HirFunction) -> IrFunctionSignature {
        let parameters = function
            .all_parameters()
            .map(|p| IrParameter::new(p.name.clone(), p.ty.storage_type()))
            .collect();
        let return_type = if function.is_constructor() {
            IrType::Void
        } else {
            function.return_type.return_type()
        };
        IrFunctionSignature::new(parameters, return_type)
    }

    /// Symbol of a declared function. Functions without a body in this
    /// module are declared as externs on first use.
    pub(crate) fn function_ref(&mut self, id: FunctionId) -> LoweringResult<IrFunctionId> {
        if let Some(function) = self.symbols.functions.get(&id) {
            return Ok(*function);
        }
        let function = self.decls.function(id)?;
        let symbol = self.decls.function_symbol(function);
        let signature = self.native_signature(function);
        let ir_id = self
            .builder
            .module
            .declare_extern_function(&symbol, signature, true);
        trace!("extern {} -> {}", symbol, ir_id);
        self.symbols.functions.insert(id, ir_id);
        Ok(ir_id)
    }

    pub(crate) fn direct_target(&mut self, id: FunctionId) -> LoweringResult<CallTarget> {
        let function = self.decls.function(id)?;
        let signature = self.native_signature(function).function_type();
        let ir_id = self.function_ref(id)?;
        Ok(CallTarget {
            callee: IrCallee::Direct(ir_id),
            signature,
            can_throw: true,
        })
    }

    pub(crate) fn runtime_function(&mut self, function: RuntimeFunction) -> CallTarget {
        let signature = function.signature();
        let function_type = signature.function_type();
        let id = self.builder.module.declare_extern_function(
            function.symbol(),
            signature,
            function.can_throw(),
        );
        CallTarget {
            callee: IrCallee::Direct(id),
            signature: function_type,
            can_throw: function.can_throw(),
        }
    }

    /// Call into the runtime; only entry points that can throw are routed
    /// through the enclosing catching scope
    pub(crate) fn call_runtime(&mut self, function: RuntimeFunction, args: &[IrId]) -> LoweringResult<Option<IrId>> {
        let target = self.runtime_function(function);
        let args: IrArgs = args.iter().copied().collect();
        if target.can_throw {
            self.gen_call(target, args, Lifetime::Irrelevant)
        } else {
            self.builder
                .build_call(target.callee, args, target.signature, Lifetime::Irrelevant)
        }
    }

    /// Evaluate value arguments left to right. A missing or surplus
    /// argument is fatal.
    fn lower_arguments(
        &mut self,
        function: &HirFunction,
        arguments: &'a [Option<HirExpr>],
        args: &mut IrArgs,
    ) -> LoweringResult<bool> {
        if arguments.len() > function.parameters.len() {
            return Err(LoweringError::ExtraArguments {
                callee: self.decls.function_symbol(function),
                expected: function.parameters.len(),
                found: arguments.len(),
            });
        }
        if let Some(index) = arguments
            .iter()
            .position(Option::is_none)
            .or_else(|| (arguments.len() < function.parameters.len()).then_some(arguments.len()))
        {
            return Err(LoweringError::MissingArgument {
                callee: self.decls.function_symbol(function),
                index,
            });
        }
        for argument in arguments.iter().flatten() {
            let Some(value) = self.eval(argument)? else {
                return Ok(false);
            };
            args.push(self.materialize(value)?);
        }
        Ok(true)
    }

    pub(crate) fn lower_call(&mut self, expr: &'a HirExpr, call: &'a HirCall) -> LoweringResult<Value> {
        let function = self.decls.function(call.function)?;

        if let Some(factory) = function.constant_factory {
            if let Some(value) = self.fold_constant_factory(expr, factory, call)? {
                return Ok(value);
            }
        }

        // Receivers first, then value arguments
        let mut args = IrArgs::new();
        for receiver in [&call.dispatch_receiver, &call.extension_receiver].into_iter().flatten() {
            let Some(value) = self.eval(receiver)? else {
                return Ok(Value::unreachable(expr.ty));
            };
            args.push(self.materialize(value)?);
        }
        if !self.lower_arguments(function, &call.arguments, &mut args)? {
            return Ok(Value::unreachable(expr.ty));
        }

        if let Some(intrinsic) = function.intrinsic {
            return self.lower_intrinsic(expr, intrinsic, &args);
        }

        if function.is_constructor() && call.dispatch_receiver.is_none() {
            return self.lower_constructor_call(expr, function, args, call.lifetime);
        }

        let owner_kind = match function.owner {
            Some(owner) => Some(self.decls.class(owner)?.kind),
            None => None,
        };
        let target = match dispatch_of(function, owner_kind, call) {
            Dispatch::Direct => self.direct_target(call.function)?,
            Dispatch::Virtual => self.virtual_target(function, &args)?,
            Dispatch::Interface => self.interface_target(function, &args)?,
        };
        let result = self.gen_call(target, args, call.lifetime)?;
        self.call_result(expr, function, result)
    }

    fn call_result(&mut self, expr: &'a HirExpr, function: &HirFunction, result: Option<IrId>) -> LoweringResult<Value> {
        if function.return_type.is_nothing() {
            if !self.builder.is_terminated() {
                self.builder.build_unreachable()?;
            }
            return Ok(Value::unreachable(expr.ty));
        }
        match result {
            Some(reg) => Ok(Value::register(reg, expr.ty)),
            None => Ok(Value::unit()),
        }
    }

    /// Allocate the object, run the constructor on it; the object is the
    /// result
    fn lower_constructor_call(
        &mut self,
        expr: &'a HirExpr,
        constructor: &HirFunction,
        args: IrArgs,
        lifetime: Lifetime,
    ) -> LoweringResult<Value> {
        let class = constructor
            .owner
            .ok_or_else(|| LoweringError::unresolved(format!("class of {}", constructor.name)))?;
        let object = self.allocate_instance(class)?;

        let mut full_args = IrArgs::new();
        full_args.push(object);
        full_args.extend(args);
        let target = self.direct_target(constructor.id)?;
        self.gen_call(target, full_args, lifetime)?;
        Ok(Value::register(object, expr.ty))
    }

    pub(crate) fn allocate_instance(&mut self, class: ClassId) -> LoweringResult<IrId> {
        let type_info = self.type_info_ref(class)?;
        self.call_runtime(RuntimeFunction::AllocInstance, &[type_info])?
            .ok_or_else(|| LoweringError::internal("instance allocation produced no value"))
    }

    /// `this(...)` / `super(...)`: run another constructor on the receiver
    /// of the enclosing constructor
    pub(crate) fn lower_delegating_constructor_call(
        &mut self,
        constructor: FunctionId,
        arguments: &'a [Option<HirExpr>],
    ) -> LoweringResult<Value> {
        let this = self
            .function_receiver()?
            .ok_or(LoweringError::InvalidControlTransfer {
                operation: "delegating constructor call",
            })?;
        let function = self.decls.function(constructor)?;

        let mut args = IrArgs::new();
        args.push(self.materialize(this)?);
        if !self.lower_arguments(function, arguments, &mut args)? {
            return Ok(Value::unreachable(HirType::Unit));
        }
        let target = self.direct_target(constructor)?;
        self.gen_call(target, args, Lifetime::Irrelevant)?;
        Ok(Value::unit())
    }

    /// Type descriptor of the receiver, read from the object header
    fn receiver_type_info(&mut self, function: &HirFunction, args: &IrArgs) -> LoweringResult<IrId> {
        let receiver = *args
            .first()
            .ok_or_else(|| LoweringError::internal(format!("{} called without a receiver", function.name)))?;
        let owner = function
            .owner
            .ok_or_else(|| LoweringError::unresolved(format!("owner of {}", function.name)))?;
        let body = self.layout.body_type(owner)?;
        let header = self.builder.build_gep(receiver, vec![0], body)?;
        self.builder.build_load(header, IrType::Ptr)
    }

    fn indirect_target(&mut self, function: &HirFunction, pointer: IrId) -> LoweringResult<CallTarget> {
        let signature = self.native_signature(function).function_type();
        let typed = self
            .builder
            .build_bitcast(pointer, IrType::Function(signature.clone()))?;
        Ok(CallTarget {
            callee: IrCallee::Indirect(typed),
            signature,
            can_throw: true,
        })
    }

    fn virtual_target(&mut self, function: &HirFunction, args: &IrArgs) -> LoweringResult<CallTarget> {
        let type_info = self.receiver_type_info(function, args)?;
        let owner = function
            .owner
            .ok_or_else(|| LoweringError::unresolved(format!("owner of {}", function.name)))?;
        let slot = self.layout.vtable_base_offset() + self.layout.vtable_slot(function.id)?;
        let descriptor = self.layout.type_info_type(owner)?;
        let entry = self.builder.build_gep(type_info, vec![slot], descriptor)?;
        let pointer = self.builder.build_load(entry, IrType::Ptr)?;
        self.indirect_target(function, pointer)
    }

    fn interface_target(&mut self, function: &HirFunction, args: &IrArgs) -> LoweringResult<CallTarget> {
        let type_info = self.receiver_type_info(function, args)?;
        let hash = fxhash::hash64(signature_key(function).as_str());
        let hash = self.builder.build_const(IrValue::I64(hash as i64))?;
        let pointer = self
            .call_runtime(RuntimeFunction::LookupOpenMethod, &[type_info, hash])?
            .ok_or_else(|| LoweringError::internal("open method lookup produced no value"))?;
        self.indirect_target(function, pointer)
    }

    fn lower_intrinsic(&mut self, expr: &'a HirExpr, intrinsic: Intrinsic, args: &IrArgs) -> LoweringResult<Value> {
        let operand = |index: usize| {
            args.get(index).copied().ok_or_else(|| {
                LoweringError::internal(format!("intrinsic {:?} expects operand {}", intrinsic, index))
            })
        };
        let lhs = operand(0)?;
        let is_float = self
            .builder
            .get_register_type(lhs)
            .map_or(false, |ty| ty.is_float());

        let reg = match intrinsic {
            Intrinsic::Plus => self.builder.build_binop(pick(is_float, BinaryOp::Add, BinaryOp::FAdd), lhs, operand(1)?)?,
            Intrinsic::Minus => self.builder.build_binop(pick(is_float, BinaryOp::Sub, BinaryOp::FSub), lhs, operand(1)?)?,
            Intrinsic::Times => self.builder.build_binop(pick(is_float, BinaryOp::Mul, BinaryOp::FMul), lhs, operand(1)?)?,
            Intrinsic::Div => self.builder.build_binop(pick(is_float, BinaryOp::Div, BinaryOp::FDiv), lhs, operand(1)?)?,
            Intrinsic::Rem => self.builder.build_binop(pick(is_float, BinaryOp::Rem, BinaryOp::FRem), lhs, operand(1)?)?,
            Intrinsic::And => self.builder.build_binop(BinaryOp::And, lhs, operand(1)?)?,
            Intrinsic::Or => self.builder.build_binop(BinaryOp::Or, lhs, operand(1)?)?,
            Intrinsic::Xor => self.builder.build_binop(BinaryOp::Xor, lhs, operand(1)?)?,
            Intrinsic::Shl => self.builder.build_binop(BinaryOp::Shl, lhs, operand(1)?)?,
            Intrinsic::Shr => self.builder.build_binop(BinaryOp::Shr, lhs, operand(1)?)?,
            Intrinsic::Less => self.builder.build_cmp(pick(is_float, CompareOp::Lt, CompareOp::FLt), lhs, operand(1)?)?,
            Intrinsic::LessOrEqual => self.builder.build_cmp(pick(is_float, CompareOp::Le, CompareOp::FLe), lhs, operand(1)?)?,
            Intrinsic::Greater => self.builder.build_cmp(pick(is_float, CompareOp::Gt, CompareOp::FGt), lhs, operand(1)?)?,
            Intrinsic::GreaterOrEqual => self.builder.build_cmp(pick(is_float, CompareOp::Ge, CompareOp::FGe), lhs, operand(1)?)?,
            Intrinsic::Equals => self.builder.build_cmp(pick(is_float, CompareOp::Eq, CompareOp::FEq), lhs, operand(1)?)?,
            Intrinsic::IdentityEquals => self.builder.build_cmp(CompareOp::Eq, lhs, operand(1)?)?,
            Intrinsic::Not => self.builder.build_unop(UnaryOp::Not, lhs)?,
            Intrinsic::UnaryMinus => self.builder.build_unop(pick(is_float, UnaryOp::Neg, UnaryOp::FNeg), lhs)?,
            Intrinsic::Inc | Intrinsic::Dec => {
                let ty = self.builder.get_register_type(lhs).unwrap_or(IrType::I32);
                let one = match ty {
                    IrType::F32 => self.builder.build_const(IrValue::F32(1.0))?,
                    IrType::F64 => self.builder.build_const(IrValue::F64(1.0))?,
                    ref int => self.builder.build_int(1, int)?,
                };
                let op = match (intrinsic, is_float) {
                    (Intrinsic::Inc, false) => BinaryOp::Add,
                    (Intrinsic::Inc, true) => BinaryOp::FAdd,
                    (_, false) => BinaryOp::Sub,
                    (_, true) => BinaryOp::FSub,
                };
                self.builder.build_binop(op, lhs, one)?
            }
        };
        Ok(Value::register(reg, expr.ty))
    }

    /// `listOf(...)` / `arrayOf(...)` over constant elements become static
    /// data. Returns `None` when the call does not qualify.
    fn fold_constant_factory(
        &mut self,
        expr: &'a HirExpr,
        factory: ConstantFactory,
        call: &'a HirCall,
    ) -> LoweringResult<Option<Value>> {
        if !self.config.fold_constant_factories || call.arguments.len() != 1 {
            return Ok(None);
        }
        let Some(HirExprKind::Vararg {
            element_type,
            elements,
        }) = call.arguments[0].as_ref().map(|a| &a.kind)
        else {
            return Ok(None);
        };

        let mut constants = Vec::with_capacity(elements.len());
        for element in elements {
            match element {
                HirVarargElement::Element(HirExpr {
                    kind: HirExprKind::Constant(constant),
                    ..
                }) => constants.push(self.constant_value(constant)),
                _ => return Ok(None),
            }
        }

        let element_ty = element_type.storage_type();
        let length = constants.len() as i32;
        let array = self
            .static_data
            .constant_array(&mut self.builder.module, element_ty, constants);
        let data = match factory {
            ConstantFactory::ArrayOf => array,
            ConstantFactory::ListOf => self.static_data.constant_aggregate(
                &mut self.builder.module,
                vec![IrValue::I32(length), IrValue::Constant(array)],
            ),
        };
        trace!("folded {:?} into {}", factory, data);
        let reg = self.builder.build_const(IrValue::Constant(data))?;
        Ok(Some(Value::register(reg, expr.ty)))
    }
}
