mod common;

use blockgen::hir::{FunctionId, HirBranch, HirExpr, HirExprKind, HirFunction, HirStatement, HirType, LoopId, VarId};
use blockgen::ir::{IrBlockId, IrInstruction, IrTerminator, IrValue};
use common::*;

#[test]
fn test_return_parameter_is_single_block() {
    let mut program = Program::new();
    let f = FunctionId(0);
    program.define(
        HirFunction::top_level(f, "f", vec![param(0, "x", HirType::INT)], HirType::INT),
        HirExpr::ret(f, HirExpr::get_var(VarId(0), HirType::INT)),
    );

    let module = program.lower();
    let func = function(&module, "f");
    assert_eq!(func.cfg.blocks.len(), 1);

    let entry = block(func, IrBlockId::entry());
    assert!(entry.instructions.is_empty());
    let x = func.signature.parameters[0].reg;
    assert!(matches!(terminator(entry), IrTerminator::Return { value: Some(v) } if *v == x));
}

#[test]
fn test_when_merges_every_branch() {
    let mut program = Program::new();
    let f = FunctionId(0);
    let when = HirExpr::if_else(
        HirExpr::get_var(VarId(0), HirType::BOOLEAN),
        HirExpr::int(1),
        HirExpr::int(2),
        HirType::INT,
    );
    program.define(
        HirFunction::top_level(f, "pick", vec![param(0, "c", HirType::BOOLEAN)], HirType::INT),
        HirExpr::ret(f, when),
    );

    let module = program.lower();
    let func = function(&module, "pick");
    let merge = block_labelled(func, "when.merge");
    assert_eq!(merge.phi_nodes.len(), 1);
    let phi = &merge.phi_nodes[0];
    assert_eq!(phi.incoming.len(), 2);
    assert_ne!(phi.incoming[0].0, phi.incoming[1].0);
    for (pred, _) in &phi.incoming {
        assert!(matches!(
            terminator(block(func, *pred)),
            IrTerminator::Branch { target } if *target == merge.id
        ));
    }
    assert!(matches!(terminator(merge), IrTerminator::Return { value: Some(v) } if *v == phi.dest));
}

#[test]
fn test_when_merge_has_one_edge_per_completing_branch() {
    let mut program = Program::new();
    let f = FunctionId(0);
    // if (c) return 0 else 5
    let when = HirExpr::if_else(
        HirExpr::get_var(VarId(0), HirType::BOOLEAN),
        HirExpr::ret(f, HirExpr::int(0)),
        HirExpr::int(5),
        HirType::INT,
    );
    program.define(
        HirFunction::top_level(f, "early", vec![param(0, "c", HirType::BOOLEAN)], HirType::INT),
        HirExpr::ret(f, when),
    );

    let module = program.lower();
    let func = function(&module, "early");
    let merge = block_labelled(func, "when.merge");
    assert_eq!(merge.predecessors.len(), 1);
    assert_eq!(merge.phi_nodes[0].incoming.len(), 1);

    let returns = terminators(func)
        .into_iter()
        .filter(|t| matches!(t, IrTerminator::Return { .. }))
        .count();
    assert_eq!(returns, 2);
}

#[test]
fn test_non_exhaustive_when_falls_through_with_undef() {
    let mut program = Program::new();
    let f = FunctionId(0);
    // when { c -> 1 } used as a value, no else branch
    let when = HirExpr::when(
        vec![HirBranch {
            condition: HirExpr::get_var(VarId(0), HirType::BOOLEAN),
            result: HirExpr::int(1),
        }],
        HirType::INT,
    );
    program.define(
        HirFunction::top_level(f, "partial", vec![param(0, "c", HirType::BOOLEAN)], HirType::INT),
        HirExpr::ret(f, when),
    );

    let module = program.lower();
    let func = function(&module, "partial");
    let merge = block_labelled(func, "when.merge");
    let phi = &merge.phi_nodes[0];
    assert_eq!(phi.incoming.len(), 2);

    let then_block = block_labelled(func, "when.then");
    let next_block = block_labelled(func, "when.next");
    let (_, fallthrough) = phi
        .incoming
        .iter()
        .find(|(pred, _)| *pred == next_block.id)
        .expect("edge from the fallthrough block");
    assert!(next_block.instructions.iter().any(|i| matches!(
        i,
        IrInstruction::Const { dest, value: IrValue::Undef } if dest == fallthrough
    )));
    assert!(phi.incoming.iter().any(|(pred, _)| *pred == then_block.id));
    assert!(matches!(terminator(merge), IrTerminator::Return { value: Some(v) } if *v == phi.dest));
}

#[test]
fn test_call_returning_nothing_ends_the_block() {
    let mut program = Program::new();
    let fail = program.declare(HirFunction::top_level(FunctionId(10), "fail", Vec::new(), HirType::NOTHING));
    let after = program.marker(11, "after");
    program.define(
        HirFunction::top_level(FunctionId(0), "f", Vec::new(), HirType::Unit),
        HirExpr::block(
            vec![
                HirStatement::expr(HirExpr::call(fail, Vec::new(), HirType::NOTHING)),
                HirStatement::expr(call_unit(after)),
            ],
            HirType::Unit,
        ),
    );

    let module = program.lower();
    let func = function(&module, "f");
    assert_eq!(func.cfg.blocks.len(), 1);
    let entry = block(func, func.cfg.entry_block);
    assert_eq!(block_calls(&module, entry), vec!["fail".to_string()]);
    assert!(matches!(terminator(entry), IrTerminator::Unreachable));
    assert!(module.find_extern_function("after").is_none());
}

#[test]
fn test_exhaustive_nothing_when_has_no_merge() {
    let mut program = Program::new();
    let when = HirExpr::if_else(
        HirExpr::get_var(VarId(0), HirType::BOOLEAN),
        HirExpr::throw(HirExpr::get_var(VarId(1), HirType::ANY)),
        HirExpr::throw(HirExpr::get_var(VarId(2), HirType::ANY)),
        HirType::NOTHING,
    );
    program.define(
        HirFunction::top_level(
            FunctionId(0),
            "fail",
            vec![
                param(0, "c", HirType::BOOLEAN),
                param(1, "a", HirType::ANY),
                param(2, "b", HirType::ANY),
            ],
            HirType::NOTHING,
        ),
        when,
    );

    let module = program.lower();
    let func = function(&module, "fail");
    assert!(blocks_labelled(func, "when.merge").is_empty());
    assert_eq!(count_calls(&module, func, "rt_throw_exception"), 2);
    assert!(terminators(func)
        .iter()
        .all(|t| matches!(t, IrTerminator::CondBranch { .. } | IrTerminator::Unreachable)));
}

#[test]
fn test_while_break_branches_straight_to_exit() {
    let mut program = Program::new();
    let work = program.marker(10, "work");
    let l = LoopId(0);
    // while (c) { if (p) break; work() }
    let body = HirExpr::block(
        vec![
            HirStatement::expr(HirExpr::if_then(
                HirExpr::get_var(VarId(1), HirType::BOOLEAN),
                HirExpr::brk(l),
            )),
            HirStatement::expr(call_unit(work)),
        ],
        HirType::Unit,
    );
    program.define(
        HirFunction::top_level(
            FunctionId(0),
            "spin",
            vec![param(0, "c", HirType::BOOLEAN), param(1, "p", HirType::BOOLEAN)],
            HirType::Unit,
        ),
        HirExpr::while_loop(l, HirExpr::get_var(VarId(0), HirType::BOOLEAN), body),
    );

    let module = program.lower();
    let func = function(&module, "spin");
    let check = block_labelled(func, "while.check");
    let body = block_labelled(func, "while.body");
    let exit = block_labelled(func, "while.exit");

    assert!(matches!(
        terminator(block(func, IrBlockId::entry())),
        IrTerminator::Branch { target } if *target == check.id
    ));
    assert!(matches!(
        terminator(check),
        IrTerminator::CondBranch { true_target, false_target, .. }
            if *true_target == body.id && *false_target == exit.id
    ));

    // The break test sits in the body; break goes to the exit, not the check
    let breaking = block_labelled(func, "when.then");
    assert!(matches!(terminator(breaking), IrTerminator::Branch { target } if *target == exit.id));
    assert_eq!(exit.predecessors.len(), 2);
    assert!(exit.predecessors.contains(&check.id));
    assert!(exit.predecessors.contains(&breaking.id));

    let rest = block_labelled(func, "when.merge");
    assert_eq!(block_calls(&module, rest), vec!["work".to_string()]);
    assert!(matches!(terminator(rest), IrTerminator::Branch { target } if *target == check.id));
    assert!(matches!(terminator(exit), IrTerminator::Return { value: None }));
}

#[test]
fn test_labelled_break_leaves_both_loops() {
    let mut program = Program::new();
    let work = program.marker(10, "work");
    let (outer, inner) = (LoopId(0), LoopId(1));
    let inner_loop = HirExpr::while_loop(
        inner,
        HirExpr::get_var(VarId(1), HirType::BOOLEAN),
        HirExpr::block(vec![HirStatement::expr(HirExpr::brk(outer))], HirType::Unit),
    );
    let outer_body = HirExpr::block(
        vec![HirStatement::expr(inner_loop), HirStatement::expr(call_unit(work))],
        HirType::Unit,
    );
    program.define(
        HirFunction::top_level(
            FunctionId(0),
            "nested",
            vec![param(0, "c", HirType::BOOLEAN), param(1, "p", HirType::BOOLEAN)],
            HirType::Unit,
        ),
        HirExpr::while_loop(outer, HirExpr::get_var(VarId(0), HirType::BOOLEAN), outer_body),
    );

    let module = program.lower();
    let func = function(&module, "nested");
    let bodies = blocks_labelled(func, "while.body");
    let exits = blocks_labelled(func, "while.exit");
    assert_eq!(bodies.len(), 2);
    assert_eq!(exits.len(), 2);
    let (outer_exit, inner_exit) = (exits[0], exits[1]);

    let inner_body = bodies[1];
    assert!(matches!(
        terminator(inner_body),
        IrTerminator::Branch { target } if *target == outer_exit.id
    ));
    assert!(!inner_exit.predecessors.contains(&inner_body.id));
    assert!(outer_exit.predecessors.contains(&inner_body.id));
}

#[test]
fn test_continue_branches_to_condition() {
    let mut program = Program::new();
    let work = program.marker(10, "work");
    let l = LoopId(0);
    // do { if (p) continue; work() } while (c)
    let body = HirExpr::block(
        vec![
            HirStatement::expr(HirExpr::if_then(
                HirExpr::get_var(VarId(1), HirType::BOOLEAN),
                HirExpr::cont(l),
            )),
            HirStatement::expr(call_unit(work)),
        ],
        HirType::Unit,
    );
    program.define(
        HirFunction::top_level(
            FunctionId(0),
            "repeat",
            vec![param(0, "c", HirType::BOOLEAN), param(1, "p", HirType::BOOLEAN)],
            HirType::Unit,
        ),
        HirExpr::do_while(l, body, HirExpr::get_var(VarId(0), HirType::BOOLEAN)),
    );

    let module = program.lower();
    let func = function(&module, "repeat");
    let body = block_labelled(func, "do.body");
    let check = block_labelled(func, "do.check");
    let exit = block_labelled(func, "do.exit");

    let continuing = block_labelled(func, "when.then");
    assert!(matches!(terminator(continuing), IrTerminator::Branch { target } if *target == check.id));
    assert!(matches!(
        terminator(check),
        IrTerminator::CondBranch { true_target, false_target, .. }
            if *true_target == body.id && *false_target == exit.id
    ));
    assert_eq!(check.predecessors.len(), 2);
}

#[test]
fn test_mutable_variable_lives_in_entry_slot() {
    let mut program = Program::new();
    let f = FunctionId(0);
    let x = VarId(1);
    program.define(
        HirFunction::top_level(f, "counter", Vec::new(), HirType::INT),
        HirExpr::block(
            vec![
                HirStatement::var(x, "x", HirType::INT, HirExpr::int(0)),
                HirStatement::expr(HirExpr::set_var(x, HirExpr::int(1))),
                HirStatement::expr(HirExpr::ret(f, HirExpr::get_var(x, HirType::INT))),
            ],
            HirType::INT,
        ),
    );

    let module = program.lower();
    let func = function(&module, "counter");
    let entry = block(func, IrBlockId::entry());
    let slot = match &entry.instructions[0] {
        IrInstruction::Alloc { dest, .. } => *dest,
        other => panic!("expected a stack slot first, found {:?}", other),
    };

    let stores = entry
        .instructions
        .iter()
        .filter(|i| matches!(i, IrInstruction::Store { ptr, .. } if *ptr == slot))
        .count();
    assert_eq!(stores, 2);

    let loaded = entry.instructions.iter().find_map(|i| match i {
        IrInstruction::Load { dest, ptr, .. } if *ptr == slot => Some(*dest),
        _ => None,
    });
    assert!(loaded.is_some());
    assert!(matches!(terminator(entry), IrTerminator::Return { value } if *value == loaded));
}

#[test]
fn test_inlined_return_resumes_after_body() {
    let mut program = Program::new();
    let f = FunctionId(0);
    let inlined = FunctionId(9);
    // val r = inline { if (c) return@inlined 1; 2 }; return r
    let body = HirExpr::block(
        vec![
            HirStatement::expr(HirExpr::if_then(
                HirExpr::get_var(VarId(0), HirType::BOOLEAN),
                HirExpr::ret(inlined, HirExpr::int(1)),
            )),
            HirStatement::expr(HirExpr::int(2)),
        ],
        HirType::INT,
    );
    let inline = HirExpr::new(
        HirExprKind::InlinedBody {
            function: inlined,
            body: Box::new(body),
        },
        HirType::INT,
    );
    program.define(
        HirFunction::top_level(f, "caller", vec![param(0, "c", HirType::BOOLEAN)], HirType::INT),
        HirExpr::block(
            vec![
                HirStatement::val(VarId(1), "r", HirType::INT, inline),
                HirStatement::expr(HirExpr::ret(f, HirExpr::get_var(VarId(1), HirType::INT))),
            ],
            HirType::INT,
        ),
    );

    let module = program.lower();
    let func = function(&module, "caller");
    let exit = block_labelled(func, "inline.exit");
    let phi = &exit.phi_nodes[0];
    assert_eq!(phi.incoming.len(), 2);

    let returns: Vec<_> = terminators(func)
        .into_iter()
        .filter_map(|t| match t {
            IrTerminator::Return { value } => Some(*value),
            _ => None,
        })
        .collect();
    assert_eq!(returns, vec![Some(phi.dest)]);
}
