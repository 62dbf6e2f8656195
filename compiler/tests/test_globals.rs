mod common;

use blockgen::hir::{
    ClassId, ClassKind, FieldId, FunctionId, HirClass, HirConstant, HirExpr, HirExprKind, HirField, HirFunction,
    HirType, VarId,
};
use blockgen::ir::{IrModule, IrTerminator, IrValue, Linkage};
use common::*;

fn constant_field(program: &mut Program, id: u32, name: &str, value: i32) -> FieldId {
    let mut field = HirField::global(FieldId(id), name, HirType::INT);
    field.constant_initializer = Some(HirConstant::Int(value));
    let field = program.decls.add_field(field);
    program.file().static_fields.push(field);
    field
}

fn computed_field(program: &mut Program, id: u32, name: &str, initializer: HirExpr) -> FieldId {
    let mut field = HirField::global(FieldId(id), name, HirType::INT);
    field.initializer = Some(initializer);
    let field = program.decls.add_field(field);
    program.file().static_fields.push(field);
    field
}

fn producer(program: &mut Program, id: u32, name: &str) -> HirExpr {
    let f = program.declare(HirFunction::top_level(FunctionId(id), name, Vec::new(), HirType::INT));
    HirExpr::call(f, Vec::new(), HirType::INT)
}

fn global_initializer<'m>(module: &'m IrModule, name: &str) -> Option<&'m IrValue> {
    let id = module
        .find_global(name)
        .unwrap_or_else(|| panic!("no global {}", name));
    module.globals[&id].initializer.as_ref()
}

#[test]
fn test_constant_initializers_need_no_init_function() {
    let mut program = Program::new();
    let limit = constant_field(&mut program, 0, "limit", 10);
    let counter = program
        .decls
        .add_field(HirField::global(FieldId(1), "counter", HirType::INT));
    program.file().static_fields.push(counter);
    let f = FunctionId(0);
    program.define(
        HirFunction::top_level(f, "read", Vec::new(), HirType::INT),
        HirExpr::ret(f, HirExpr::get_field(limit, None, HirType::INT)),
    );

    let module = program.lower();
    assert_eq!(global_initializer(&module, "limit"), Some(&IrValue::I32(10)));
    assert_eq!(global_initializer(&module, "counter"), Some(&IrValue::I32(0)));
    assert!(module.find_function("main$init_globals").is_none());
    assert!(module.global_ctors.is_empty());

    // Reads go through the global, never through an initializer call
    let read = function(&module, "read");
    assert!(calls(&module, read).is_empty());
}

#[test]
fn test_unit_initializers_run_in_declaration_order() {
    let mut program = Program::new();
    let first = producer(&mut program, 10, "make_first");
    let last = producer(&mut program, 11, "make_last");
    computed_field(&mut program, 0, "first", first);
    constant_field(&mut program, 1, "middle", 3);
    computed_field(&mut program, 2, "last", last);

    let module = program.lower();
    let init = function(&module, "main$init_globals");
    assert_eq!(
        calls(&module, init),
        vec!["make_first".to_string(), "make_last".to_string()]
    );
    assert_eq!(global_initializer(&module, "middle"), Some(&IrValue::I32(3)));

    let node = module.find_global("main$init_node").expect("init node");
    assert_eq!(
        module.globals[&node].initializer,
        Some(IrValue::Aggregate(vec![IrValue::Function(init.id), IrValue::Null]))
    );
    assert_eq!(module.globals[&node].linkage, Linkage::Private);

    let ctor = function(&module, "main$init_ctor");
    assert_eq!(
        calls(&module, ctor),
        vec!["rt_append_to_initializers_tail".to_string()]
    );
    assert_eq!(module.global_ctors, vec![ctor.id]);
}

#[test]
fn test_units_register_constructors_in_unit_order() {
    let mut program = Program::new();
    let a = producer(&mut program, 10, "make_a");
    let b = producer(&mut program, 11, "make_b");
    computed_field(&mut program, 0, "a", a);
    program.unit("second");
    computed_field(&mut program, 1, "b", b);
    // A unit with only constants registers nothing
    program.unit("third");
    constant_field(&mut program, 2, "c", 1);

    let module = program.lower();
    let names: Vec<_> = module
        .global_ctors
        .iter()
        .map(|id| module.functions[id].name.as_str())
        .collect();
    assert_eq!(names, vec!["main$init_ctor", "second$init_ctor"]);
    assert!(module.find_function("third$init_globals").is_none());
}

const CONFIG: ClassId = ClassId(0);

fn config_object(program: &mut Program, external: bool) {
    let mut config = HirClass::new(CONFIG, "Config", ClassKind::Object);
    config.is_external = external;
    program.decls.add_class(config);
    program.declare(HirFunction::constructor(FunctionId(1), CONFIG, VarId(100), Vec::new()));
    let f = FunctionId(0);
    program.define(
        HirFunction::top_level(f, "config", Vec::new(), HirType::class(CONFIG)),
        HirExpr::ret(
            f,
            HirExpr::new(HirExprKind::GetObjectInstance(CONFIG), HirType::class(CONFIG)),
        ),
    );
}

#[test]
fn test_singleton_created_on_first_access() {
    let mut program = Program::new();
    config_object(&mut program, false);

    let module = program.lower();
    let func = function(&module, "config");
    let init = block_labelled(func, "object.init");
    let loaded = block_labelled(func, "object.loaded");
    let ready = block_labelled(func, "object.ready");

    assert_eq!(
        block_calls(&module, init),
        vec!["rt_alloc_instance".to_string(), "Config.<init>".to_string()]
    );
    assert!(block_calls(&module, loaded).is_empty());

    let phi = &ready.phi_nodes[0];
    assert_eq!(phi.incoming.len(), 2);
    assert!(phi.incoming.iter().any(|(pred, _)| *pred == init.id));
    assert!(phi.incoming.iter().any(|(pred, _)| *pred == loaded.id));
    assert!(matches!(terminator(ready), IrTerminator::Return { value: Some(v) } if *v == phi.dest));

    assert_eq!(global_initializer(&module, "Config$instance"), Some(&IrValue::Null));
}

#[test]
fn test_external_singleton_is_loaded_directly() {
    let mut program = Program::new();
    config_object(&mut program, true);

    let module = program.lower();
    let func = function(&module, "config");
    assert_eq!(func.cfg.blocks.len(), 1);
    assert!(calls(&module, func).is_empty());

    let slot = module.find_global("Config$instance").expect("instance slot");
    assert_eq!(module.globals[&slot].linkage, Linkage::External);
    assert!(module.globals[&slot].initializer.is_none());
}
