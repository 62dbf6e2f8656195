mod common;

use blockgen::hir::{
    ClassId, ClassKind, FunctionId, HirCatch, HirClass, HirExpr, HirFunction, HirStatement, HirType, LoopId, VarId,
};
use blockgen::ir::{IrBlockId, IrTerminator};
use common::*;

#[test]
fn test_return_runs_finalizers_innermost_first() {
    let mut program = Program::new();
    let inner_done = program.marker(10, "inner_done");
    let outer_done = program.marker(11, "outer_done");
    let f = FunctionId(0);
    // try { try { return 1 } finally { inner_done() } } finally { outer_done() }
    let inner = HirExpr::try_catch(
        HirExpr::ret(f, HirExpr::int(1)),
        Vec::new(),
        Some(call_unit(inner_done)),
        HirType::NOTHING,
    );
    let outer = HirExpr::try_catch(inner, Vec::new(), Some(call_unit(outer_done)), HirType::NOTHING);
    program.define(HirFunction::top_level(f, "f", Vec::new(), HirType::INT), outer);

    let module = program.lower();
    let func = function(&module, "f");

    let (path, last) = trace_first_path(&module, func);
    assert_eq!(path, vec!["inner_done".to_string(), "outer_done".to_string()]);
    assert!(matches!(terminator(last), IrTerminator::Return { value: Some(_) }));

    // The inner finalizer runs inside the outer region, so an exception it
    // raises still runs the outer finalizer once before leaving
    assert_eq!(count_calls(&module, func, "inner_done"), 1);
    assert_eq!(count_calls(&module, func, "outer_done"), 2);
    let handler = block_labelled(func, "catch.handler");
    assert_eq!(
        block_calls(&module, handler),
        vec!["outer_done".to_string(), "rt_throw_exception".to_string()]
    );
    assert!(matches!(terminator(handler), IrTerminator::Unreachable));

    let pad = block_labelled(func, "landing.pad");
    assert_eq!(
        block_calls(&module, pad),
        vec!["rt_begin_catch".to_string(), "rt_end_catch".to_string()]
    );
}

#[test]
fn test_break_runs_finalizer_before_leaving_loop() {
    let mut program = Program::new();
    let done = program.marker(10, "done");
    let l = LoopId(0);
    // while (c) { try { break } finally { done() } }
    let body = HirExpr::try_catch(HirExpr::brk(l), Vec::new(), Some(call_unit(done)), HirType::NOTHING);
    program.define(
        HirFunction::top_level(FunctionId(0), "f", vec![param(0, "c", HirType::BOOLEAN)], HirType::Unit),
        HirExpr::while_loop(l, HirExpr::get_var(VarId(0), HirType::BOOLEAN), body),
    );

    let module = program.lower();
    let func = function(&module, "f");
    let exit = block_labelled(func, "while.exit");
    let cleanup = block_labelled(func, "finally.cleanup");
    assert_eq!(block_calls(&module, cleanup), vec!["done".to_string()]);
    assert!(matches!(terminator(cleanup), IrTerminator::Branch { target } if *target == exit.id));
    assert_eq!(count_calls(&module, func, "done"), 1);
}

#[test]
fn test_repeated_exits_share_one_cleanup() {
    let mut program = Program::new();
    let done = program.marker(10, "done");
    let f = FunctionId(0);
    // try { if (c) return 1; return 2 } finally { done() }
    let body = HirExpr::block(
        vec![
            HirStatement::expr(HirExpr::if_then(
                HirExpr::get_var(VarId(0), HirType::BOOLEAN),
                HirExpr::ret(f, HirExpr::int(1)),
            )),
            HirStatement::expr(HirExpr::ret(f, HirExpr::int(2))),
        ],
        HirType::NOTHING,
    );
    program.define(
        HirFunction::top_level(f, "f", vec![param(0, "c", HirType::BOOLEAN)], HirType::INT),
        HirExpr::try_catch(body, Vec::new(), Some(call_unit(done)), HirType::NOTHING),
    );

    let module = program.lower();
    let func = function(&module, "f");
    let cleanup = block_labelled(func, "finally.cleanup");
    assert_eq!(cleanup.phi_nodes[0].incoming.len(), 2);
    assert_eq!(count_calls(&module, func, "done"), 1);
    assert!(matches!(
        terminator(cleanup),
        IrTerminator::Return { value: Some(v) } if *v == cleanup.phi_nodes[0].dest
    ));
}

fn exception_classes(program: &mut Program) -> (ClassId, ClassId) {
    let a = program
        .decls
        .add_class(HirClass::new(ClassId(0), "IoError", ClassKind::Class));
    let b = program
        .decls
        .add_class(HirClass::new(ClassId(1), "StateError", ClassKind::Class));
    (a, b)
}

#[test]
fn test_catch_clauses_tried_in_declaration_order() {
    let mut program = Program::new();
    let (io, state) = exception_classes(&mut program);
    let risky = program.marker(10, "risky");
    let on_io = program.marker(11, "on_io");
    let on_state = program.marker(12, "on_state");
    let catches = vec![
        HirCatch {
            parameter: VarId(1),
            ty: HirType::class(io),
            body: call_unit(on_io),
        },
        HirCatch {
            parameter: VarId(2),
            ty: HirType::class(state),
            body: call_unit(on_state),
        },
    ];
    program.define(
        HirFunction::top_level(FunctionId(0), "guarded", Vec::new(), HirType::Unit),
        HirExpr::try_catch(call_unit(risky), catches, None, HirType::Unit),
    );

    let module = program.lower();
    let func = function(&module, "guarded");
    let pad = block_labelled(func, "landing.pad");
    assert!(matches!(
        terminator(block(func, IrBlockId::entry())),
        IrTerminator::Invoke { unwind, .. } if *unwind == pad.id
    ));

    let handler = block_labelled(func, "catch.handler");
    assert_eq!(block_calls(&module, handler), vec!["rt_is_instance".to_string()]);

    let bodies = blocks_labelled(func, "catch.body");
    assert_eq!(block_calls(&module, bodies[0]), vec!["on_io".to_string()]);
    assert_eq!(block_calls(&module, bodies[1]), vec!["on_state".to_string()]);
    assert!(matches!(
        terminator(handler),
        IrTerminator::CondBranch { true_target, .. } if *true_target == bodies[0].id
    ));

    // No clause matched: the exception leaves the function
    let next = blocks_labelled(func, "catch.next");
    assert_eq!(block_calls(&module, next[0]), vec!["rt_is_instance".to_string()]);
    assert_eq!(block_calls(&module, next[1]), vec!["rt_throw_exception".to_string()]);
    assert!(matches!(terminator(next[1]), IrTerminator::Unreachable));

    assert!(module.find_global("IoError$typeinfo").is_some());
    assert!(module.find_global("StateError$typeinfo").is_some());
}

#[test]
fn test_catch_any_with_finalizer_runs_catch_body_first() {
    let mut program = Program::new();
    let recovered = program.marker(10, "recovered");
    let count = program.marker(11, "count");
    // try { throw e } catch (x: Any) { recovered() } finally { count() }
    let catches = vec![HirCatch {
        parameter: VarId(1),
        ty: HirType::ANY,
        body: call_unit(recovered),
    }];
    let guarded = HirExpr::try_catch(
        HirExpr::throw(HirExpr::get_var(VarId(0), HirType::ANY)),
        catches,
        Some(call_unit(count)),
        HirType::Unit,
    );
    program.define(
        HirFunction::top_level(FunctionId(0), "f", vec![param(0, "e", HirType::ANY)], HirType::Unit),
        guarded,
    );

    let module = program.lower();
    let func = function(&module, "f");

    let (path, last) = trace_first_path(&module, func);
    assert_eq!(path, vec!["recovered".to_string(), "count".to_string()]);
    assert!(matches!(terminator(last), IrTerminator::Return { value: None }));

    // The exit is reachable only through the catch body
    let normal = block_labelled(func, "finally.normal");
    let result = block_labelled(func, "try.result");
    assert_eq!(normal.predecessors, vec![result.id]);
    assert_eq!(result.predecessors.len(), 1);
    let resumed = block(func, result.predecessors[0]);
    assert_eq!(resumed.label.as_deref(), Some("invoke.normal"));

    // Once on the way out, once for an exception escaping the catch body
    assert_eq!(count_calls(&module, func, "count"), 2);
}

#[test]
fn test_unmatched_exception_reaches_enclosing_handler() {
    let mut program = Program::new();
    let (io, _) = exception_classes(&mut program);
    let risky = program.marker(10, "risky");
    let on_io = program.marker(11, "on_io");
    let fallback = program.marker(12, "fallback");
    let inner = HirExpr::try_catch(
        call_unit(risky),
        vec![HirCatch {
            parameter: VarId(1),
            ty: HirType::class(io),
            body: call_unit(on_io),
        }],
        None,
        HirType::Unit,
    );
    let outer = HirExpr::try_catch(
        inner,
        vec![HirCatch {
            parameter: VarId(2),
            ty: HirType::NULLABLE_ANY,
            body: call_unit(fallback),
        }],
        None,
        HirType::Unit,
    );
    program.define(
        HirFunction::top_level(FunctionId(0), "f", Vec::new(), HirType::Unit),
        outer,
    );

    let module = program.lower();
    let func = function(&module, "f");
    let handlers = blocks_labelled(func, "catch.handler");
    assert_eq!(handlers.len(), 2);
    let outer_handler = handlers[1];

    let unmatched = block_labelled(func, "catch.next");
    assert!(matches!(
        terminator(unmatched),
        IrTerminator::Branch { target } if *target == outer_handler.id
    ));
    assert_eq!(count_calls(&module, func, "rt_throw_exception"), 0);
}

#[test]
fn test_invoke_result_merges_on_normal_edge() {
    let mut program = Program::new();
    let compute = program.declare(HirFunction::top_level(FunctionId(10), "compute", Vec::new(), HirType::INT));
    let guarded = HirExpr::try_catch(
        HirExpr::call(compute, Vec::new(), HirType::INT),
        vec![HirCatch {
            parameter: VarId(1),
            ty: HirType::ANY,
            body: HirExpr::int(0),
        }],
        None,
        HirType::INT,
    );
    let f = FunctionId(0);
    program.define(
        HirFunction::top_level(f, "f", Vec::new(), HirType::INT),
        HirExpr::ret(f, guarded),
    );

    let module = program.lower();
    let func = function(&module, "f");
    let (dest, normal) = match terminator(block(func, IrBlockId::entry())) {
        IrTerminator::Invoke {
            dest: Some(dest),
            normal,
            ..
        } => (*dest, *normal),
        other => panic!("expected an invoke, found {:?}", other),
    };
    let result = block_labelled(func, "try.result");
    let phi = &result.phi_nodes[0];
    assert!(phi.incoming.contains(&(normal, dest)));
    assert_eq!(phi.incoming.len(), 2);
}

#[test]
fn test_throw_outside_try_unwinds_to_caller() {
    let mut program = Program::new();
    program.define(
        HirFunction::top_level(FunctionId(0), "raise", vec![param(0, "e", HirType::ANY)], HirType::NOTHING),
        HirExpr::throw(HirExpr::get_var(VarId(0), HirType::ANY)),
    );

    let module = program.lower();
    let func = function(&module, "raise");
    assert_eq!(func.cfg.blocks.len(), 1);
    let entry = block(func, IrBlockId::entry());
    assert_eq!(block_calls(&module, entry), vec!["rt_throw_exception".to_string()]);
    assert!(matches!(terminator(entry), IrTerminator::Unreachable));
}
