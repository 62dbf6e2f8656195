//! MIR Dump Utility
//!
//! Pretty-prints MIR in a human-readable format similar to LLVM IR.
//! Used in verification failure diagnostics and in tests.

use super::{
    BinaryOp, CastKind, CompareOp, IrBasicBlock, IrCallee, IrConstantData, IrControlFlowGraph,
    IrFunction, IrId, IrInstruction, IrModule, IrPhiNode, IrTerminator, Lifetime, UnaryOp,
};
use std::fmt::Write;

/// Dump an entire module to a string.
pub fn dump_module(module: &IrModule) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "; Module: {}", module.name);
    let _ = writeln!(out, "; Functions: {}", module.functions.len());
    let _ = writeln!(out);

    for ext in module.extern_functions.values() {
        let _ = writeln!(
            out,
            "declare @{} {}{}",
            ext.name,
            ext.signature.function_type(),
            if ext.can_throw { "" } else { " nothrow" }
        );
    }

    for global in module.globals.values() {
        let init = global
            .initializer
            .as_ref()
            .map(|v| format!(" = {}", v))
            .unwrap_or_else(|| " external".to_string());
        let _ = writeln!(
            out,
            "@{} ({}): {} {}{}",
            global.name,
            global.id,
            if global.mutable { "global" } else { "constant" },
            global.ty,
            init
        );
    }

    for constant in module.constants.values() {
        let data = match &constant.data {
            IrConstantData::String(s) => format!("{:?}", s),
            IrConstantData::Array { element_ty, elements } => format!(
                "[{} x {}] [{}]",
                elements.len(),
                element_ty,
                elements.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(", ")
            ),
            IrConstantData::Aggregate(values) => format!(
                "{{{}}}",
                values.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(", ")
            ),
        };
        let _ = writeln!(out, "@{} ({}) = data {}", constant.name, constant.id, data);
    }

    if !module.global_ctors.is_empty() {
        let ctors: Vec<String> = module.global_ctors.iter().map(|id| id.to_string()).collect();
        let _ = writeln!(out, "global_ctors = [{}]", ctors.join(", "));
    }
    let _ = writeln!(out);

    for func in module.functions.values() {
        let _ = writeln!(out, "{}", dump_function(func));
    }

    out
}

/// Dump a single function to a string.
pub fn dump_function(func: &IrFunction) -> String {
    let mut out = String::new();

    let params: Vec<String> = func
        .signature
        .parameters
        .iter()
        .map(|p| format!("{}: {}", p.reg, p.ty))
        .collect();

    let _ = writeln!(
        out,
        "fn @{}({}) -> {} {{ ; {}",
        func.name,
        params.join(", "),
        func.signature.return_type,
        func.id
    );
    let _ = write!(out, "{}", dump_cfg(&func.cfg));
    let _ = writeln!(out, "}}");
    out
}

/// Dump a CFG to a string, blocks in creation order.
pub fn dump_cfg(cfg: &IrControlFlowGraph) -> String {
    let mut out = String::new();
    for block in cfg.blocks.values() {
        let _ = write!(out, "{}", dump_block(block));
    }
    out
}

/// Dump a basic block to a string.
pub fn dump_block(block: &IrBasicBlock) -> String {
    let mut out = String::new();

    let label = block
        .label
        .as_ref()
        .map(|l| format!(" ; {}", l))
        .unwrap_or_default();
    let _ = writeln!(out, "  {}:{}", block.id, label);

    if !block.predecessors.is_empty() {
        let preds: Vec<String> = block.predecessors.iter().map(|p| p.to_string()).collect();
        let _ = writeln!(out, "    ; preds: {}", preds.join(", "));
    }

    for phi in &block.phi_nodes {
        let _ = writeln!(out, "    {}", dump_phi(phi));
    }

    for inst in &block.instructions {
        let _ = writeln!(out, "    {}", dump_instruction(inst));
    }

    match &block.terminator {
        Some(term) => {
            let _ = writeln!(out, "    {}", dump_terminator(term));
        }
        None => {
            let _ = writeln!(out, "    ; <no terminator>");
        }
    }

    out
}

/// Dump a phi node to a string.
pub fn dump_phi(phi: &IrPhiNode) -> String {
    let incoming: Vec<String> = phi
        .incoming
        .iter()
        .map(|(block, val)| format!("[{}: {}]", block, val))
        .collect();

    format!("{} = phi {} {}", phi.dest, phi.ty, incoming.join(", "))
}

fn dump_callee(callee: &IrCallee) -> String {
    match callee {
        IrCallee::Direct(id) => format!("@{}", id),
        IrCallee::Indirect(reg) => reg.to_string(),
    }
}

fn dump_args(args: &[IrId]) -> String {
    args.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", ")
}

fn dump_lifetime(lifetime: Lifetime) -> &'static str {
    match lifetime {
        Lifetime::Local => " !local",
        Lifetime::ReturnValue => " !return",
        Lifetime::Global => " !global",
        Lifetime::Escaping => " !escaping",
        Lifetime::Irrelevant => "",
    }
}

/// Dump an instruction to a string.
pub fn dump_instruction(inst: &IrInstruction) -> String {
    match inst {
        IrInstruction::Const { dest, value } => format!("{} = const {}", dest, value),
        IrInstruction::Alloc { dest, ty } => format!("{} = alloca {}", dest, ty),
        IrInstruction::Load { dest, ptr, ty } => format!("{} = load {}, {}", dest, ty, ptr),
        IrInstruction::Store { ptr, value } => format!("store {}, {}", value, ptr),
        IrInstruction::GetElementPtr {
            dest,
            ptr,
            indices,
            ty,
        } => {
            let indices: Vec<String> = indices.iter().map(|i| i.to_string()).collect();
            format!("{} = gep {}, {}, [{}]", dest, ty, ptr, indices.join(", "))
        }
        IrInstruction::BinOp {
            dest,
            op,
            left,
            right,
        } => format!("{} = {} {}, {}", dest, dump_binop(op), left, right),
        IrInstruction::UnOp { dest, op, operand } => {
            format!("{} = {} {}", dest, dump_unaryop(op), operand)
        }
        IrInstruction::Cmp {
            dest,
            op,
            left,
            right,
        } => format!("{} = cmp {} {}, {}", dest, dump_cmpop(op), left, right),
        IrInstruction::Cast {
            dest,
            src,
            kind,
            to_ty,
        } => format!("{} = {} {} to {}", dest, dump_cast(kind), src, to_ty),
        IrInstruction::Call {
            dest,
            callee,
            args,
            signature,
            lifetime,
        } => {
            let call = format!(
                "call {} {}({}){}",
                signature,
                dump_callee(callee),
                dump_args(args),
                dump_lifetime(*lifetime)
            );
            match dest {
                Some(dest) => format!("{} = {}", dest, call),
                None => call,
            }
        }
        IrInstruction::LandingPad { dest } => format!("{} = landingpad", dest),
    }
}

/// Dump a terminator to a string.
pub fn dump_terminator(term: &IrTerminator) -> String {
    match term {
        IrTerminator::Branch { target } => format!("br {}", target),
        IrTerminator::CondBranch {
            condition,
            true_target,
            false_target,
        } => format!("br_if {}, {}, {}", condition, true_target, false_target),
        IrTerminator::Return { value } => match value {
            Some(v) => format!("ret {}", v),
            None => "ret void".to_string(),
        },
        IrTerminator::Invoke {
            dest,
            callee,
            args,
            signature,
            lifetime,
            normal,
            unwind,
        } => {
            let call = format!(
                "invoke {} {}({}){} to {} unwind {}",
                signature,
                dump_callee(callee),
                dump_args(args),
                dump_lifetime(*lifetime),
                normal,
                unwind
            );
            match dest {
                Some(dest) => format!("{} = {}", dest, call),
                None => call,
            }
        }
        IrTerminator::Unreachable => "unreachable".to_string(),
    }
}

pub fn dump_binop(op: &BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "add",
        BinaryOp::Sub => "sub",
        BinaryOp::Mul => "mul",
        BinaryOp::Div => "sdiv",
        BinaryOp::Rem => "srem",
        BinaryOp::And => "and",
        BinaryOp::Or => "or",
        BinaryOp::Xor => "xor",
        BinaryOp::Shl => "shl",
        BinaryOp::Shr => "ashr",
        BinaryOp::FAdd => "fadd",
        BinaryOp::FSub => "fsub",
        BinaryOp::FMul => "fmul",
        BinaryOp::FDiv => "fdiv",
        BinaryOp::FRem => "frem",
    }
}

pub fn dump_unaryop(op: &UnaryOp) -> &'static str {
    match op {
        UnaryOp::Neg => "neg",
        UnaryOp::Not => "not",
        UnaryOp::FNeg => "fneg",
    }
}

pub fn dump_cmpop(op: &CompareOp) -> &'static str {
    match op {
        CompareOp::Eq => "eq",
        CompareOp::Ne => "ne",
        CompareOp::Lt => "slt",
        CompareOp::Le => "sle",
        CompareOp::Gt => "sgt",
        CompareOp::Ge => "sge",
        CompareOp::FEq => "oeq",
        CompareOp::FNe => "one",
        CompareOp::FLt => "olt",
        CompareOp::FLe => "ole",
        CompareOp::FGt => "ogt",
        CompareOp::FGe => "oge",
    }
}

fn dump_cast(kind: &CastKind) -> &'static str {
    match kind {
        CastKind::Trunc => "trunc",
        CastKind::SignExtend => "sext",
        CastKind::ZeroExtend => "zext",
        CastKind::IntToFloat => "sitofp",
        CastKind::FloatToInt => "fptosi",
        CastKind::FloatResize => "fpcast",
        CastKind::BitCast => "bitcast",
    }
}

/// Dump a specific function by name from a module.
pub fn dump_function_by_name(module: &IrModule, name: &str) -> Option<String> {
    module.find_function(name).map(dump_function)
}

/// Serialize a module to pretty JSON
pub fn to_json(module: &IrModule) -> serde_json::Result<String> {
    serde_json::to_string_pretty(module)
}
