//! Shape of the code produced for operators, places and calls.

use ember_compiler::compiler::ast::{Arg, BinaryOp, CallTarget, Expr, ExprKind, FunctionDecl, Name, Stmt, TypeMask};
use ember_compiler::compiler::bytecode::{CompiledFunction, Instr, Module};
use ember_compiler::compiler::callsite::{DelegateRef, ParamRole};
use ember_compiler::compiler::carrier::CarrierType;
use ember_compiler::compiler::lower::Lowerer;
use ember_compiler::compiler::runtime_fns::RuntimeFn;
use ember_compiler::{compile, compile_with_options, Compilation, CompileError, EmitOptions, LowerError};

fn lower_one(f: FunctionDecl) -> CompiledFunction {
    let comp = Compilation::new(EmitOptions::default());
    comp.compile_function(&f).unwrap()
}

fn result_carrier(f: &FunctionDecl, expr: &Expr) -> CarrierType {
    let comp = Compilation::new(EmitOptions::default());
    let mut l = Lowerer::new(&comp, f);
    l.emit(expr).unwrap()
}

fn is_strict_call(f: &RuntimeFn) -> bool {
    f.name().starts_with("strict_eq") || f.name().starts_with("compare")
}

// ── Operators ───────────────────────────────────────────────────────

#[test]
fn test_int_plus_int_widens_to_number() {
    let f = FunctionDecl::new("f").param("x", CarrierType::Int).param("y", CarrierType::Int);
    let sum = Expr::binary(BinaryOp::Add, Expr::var("x"), Expr::var("y"));
    assert_eq!(result_carrier(&f, &sum), CarrierType::Number);

    let compiled = lower_one(f.stmt(Stmt::Return(Some(sum))));
    assert_eq!(
        compiled.body.runtime_calls(),
        vec![RuntimeFn::AddIntInt, RuntimeFn::NumberToValue]
    );
}

#[test]
fn test_float_plus_int_is_native() {
    let f = FunctionDecl::new("f").param("x", CarrierType::Float).param("y", CarrierType::Int);
    let sum = Expr::binary(BinaryOp::Add, Expr::var("x"), Expr::var("y"));
    assert_eq!(result_carrier(&f, &sum), CarrierType::Float);
    let compiled = lower_one(f.stmt(Stmt::Return(Some(sum))));
    assert_eq!(compiled.body.runtime_calls(), vec![RuntimeFn::FloatToValue]);
}

#[test]
fn test_division_always_goes_through_number() {
    let f = FunctionDecl::new("f").param("x", CarrierType::Int).param("y", CarrierType::Int);
    let div = Expr::binary(BinaryOp::Div, Expr::var("x"), Expr::var("y"));
    assert_eq!(result_carrier(&f, &div), CarrierType::Number);
    let compiled = lower_one(f.stmt(Stmt::Return(Some(div))));
    assert!(compiled.body.runtime_calls().contains(&RuntimeFn::DivNumberNumber));
}

#[test]
fn test_untyped_operands_use_the_dynamic_rule() {
    let f = FunctionDecl::new("f")
        .param("a", CarrierType::DynamicValue)
        .param("b", CarrierType::DynamicValue);
    let sum = Expr::binary(BinaryOp::Add, Expr::var("a"), Expr::var("b"));
    assert_eq!(result_carrier(&f, &sum), CarrierType::DynamicValue);
    let compiled = lower_one(f.stmt(Stmt::Return(Some(sum))));
    assert_eq!(compiled.body.runtime_calls(), vec![RuntimeFn::AddValueValue]);
}

#[test]
fn test_object_left_operand_falls_back_to_dynamic() {
    let f = FunctionDecl::new("f")
        .param("o", CarrierType::Object)
        .param("n", CarrierType::Int);
    let diff = Expr::binary(BinaryOp::Sub, Expr::var("o"), Expr::var("n"));
    assert_eq!(result_carrier(&f, &diff), CarrierType::Number);
    let calls = lower_one(f.stmt(Stmt::Return(Some(diff)))).body.runtime_calls();
    assert_eq!(calls[0], RuntimeFn::ObjectToValue);
    assert!(calls.contains(&RuntimeFn::SubValueInt));
}

#[test]
fn test_bool_identical_array_folds_to_false() {
    let f = FunctionDecl::new("f")
        .param("b", CarrierType::Bool)
        .param("arr", CarrierType::Array);
    let cmp = Expr::binary(BinaryOp::Identical, Expr::var("b"), Expr::var("arr"));
    assert_eq!(result_carrier(&f, &cmp), CarrierType::Bool);
    let compiled = lower_one(f.stmt(Stmt::Return(Some(cmp))));
    let calls = compiled.body.runtime_calls();
    assert!(!calls.iter().any(is_strict_call), "unexpected comparison: {:?}", calls);
    assert!(compiled.body.instrs.contains(&Instr::LdBool(false)));
}

#[test]
fn test_int_identical_string_folds_to_true_for_not_identical() {
    let f = FunctionDecl::new("f").param("n", CarrierType::Int);
    let cmp = Expr::binary(BinaryOp::NotIdentical, Expr::var("n"), Expr::string("1"));
    let compiled = lower_one(f.stmt(Stmt::Return(Some(cmp))));
    assert!(!compiled.body.runtime_calls().iter().any(is_strict_call));
}

#[test]
fn test_equality_with_null_literal_uses_null_check() {
    let f = FunctionDecl::new("f").param("v", CarrierType::DynamicValue);
    let cmp = Expr::binary(BinaryOp::Eq, Expr::var("v"), Expr::null());
    let compiled = lower_one(f.stmt(Stmt::Return(Some(cmp))));
    assert_eq!(compiled.body.runtime_calls()[0], RuntimeFn::EqNull);
}

#[test]
fn test_typed_string_null_check_differs_from_empty() {
    let f = FunctionDecl::new("f").param("s", CarrierType::String);
    let cmp = Expr::binary(BinaryOp::NotEq, Expr::null(), Expr::var("s"));
    let compiled = lower_one(f.clone().stmt(Stmt::Return(Some(cmp))));
    assert_eq!(compiled.body.runtime_calls()[0], RuntimeFn::StringEqNull);

    let compiled = lower_one(f.stmt(Stmt::Return(Some(Expr::empty(Expr::var("s"))))));
    assert_eq!(compiled.body.runtime_calls()[0], RuntimeFn::StringIsEmpty);
}

#[test]
fn test_short_circuit_branches_over_right_operand() {
    let f = FunctionDecl::new("f").param("a", CarrierType::Bool);
    let and = Expr::binary(BinaryOp::And, Expr::var("a"), Expr::call("side_effect", vec![]));
    let compiled = lower_one(f.stmt(Stmt::Return(Some(and))));
    let instrs = &compiled.body.instrs;
    let branch = instrs.iter().position(|i| matches!(i, Instr::BrFalse(_))).unwrap();
    let call = instrs.iter().position(|i| matches!(i, Instr::InvokeCallSite(_))).unwrap();
    assert!(branch < call);
}

#[test]
fn test_hint_narrows_dynamic_operand() {
    let f = FunctionDecl::new("f")
        .param("a", CarrierType::DynamicValue)
        .param("b", CarrierType::DynamicValue);
    let lt = Expr::binary(
        BinaryOp::Lt,
        Expr::var("a").with_mask(TypeMask::FLOAT),
        Expr::var("b").with_mask(TypeMask::FLOAT),
    );
    assert_eq!(result_carrier(&f, &lt), CarrierType::Bool);
    let compiled = lower_one(f.stmt(Stmt::Return(Some(lt))));
    assert_eq!(
        compiled.body.runtime_calls(),
        vec![RuntimeFn::ValueToFloat, RuntimeFn::ValueToFloat, RuntimeFn::BoolToValue]
    );
}

// ── Places ──────────────────────────────────────────────────────────

#[test]
fn test_compound_assignment_evaluates_index_once() {
    let f = FunctionDecl::new("f").param("a", CarrierType::DynamicValue).stmt(Stmt::expr(Expr::compound(
        BinaryOp::Add,
        Expr::item(Expr::var("a"), Some(Expr::call("key", vec![]))),
        Expr::int(1),
    )));
    let compiled = lower_one(f);
    let sites = compiled
        .body
        .instrs
        .iter()
        .filter(|i| matches!(i, Instr::LdCallSite(_)))
        .count();
    assert_eq!(sites, 1);
    let calls = compiled.body.runtime_calls();
    assert!(calls.contains(&RuntimeFn::EnsureArrayRef));
    assert!(calls.contains(&RuntimeFn::ArrayLikeGet));
    assert!(calls.contains(&RuntimeFn::ArrayLikeSet));
}

#[test]
fn test_nested_write_autovivifies() {
    let f = FunctionDecl::new("f").stmt(Stmt::expr(Expr::assign(
        Expr::item(Expr::item(Expr::var("a"), Some(Expr::string("x"))), None),
        Expr::int(1),
    )));
    let calls = lower_one(f).body.runtime_calls();
    assert_eq!(
        calls,
        vec![
            RuntimeFn::EnsureArrayRef,
            RuntimeFn::StringToValue,
            RuntimeFn::ArrayLikeEnsureItemArray,
            RuntimeFn::IntToValue,
            RuntimeFn::ArrayLikeAdd,
        ]
    );
}

#[test]
fn test_typed_array_uses_encoded_keys() {
    let f = FunctionDecl::new("f")
        .param("arr", CarrierType::Array)
        .stmt(Stmt::Return(Some(Expr::item(Expr::var("arr"), Some(Expr::string("7"))))));
    let compiled = lower_one(f);
    assert!(compiled.body.instrs.contains(&Instr::LdIntKey(7)));
    assert_eq!(compiled.body.runtime_calls(), vec![RuntimeFn::ArrayGetKey]);
}

#[test]
fn test_quiet_index_on_int_has_no_rule() {
    let f = FunctionDecl::new("f")
        .param("n", CarrierType::Int)
        .stmt(Stmt::Return(Some(Expr::isset(vec![Expr::item(Expr::var("n"), Some(Expr::int(0)))]))));
    let err = compile(&[f]).unwrap_err();
    assert!(matches!(
        err,
        CompileError::Lower {
            error: LowerError::NoRule { .. },
            ..
        }
    ));
}

#[test]
fn test_list_place_cannot_be_read() {
    let f = FunctionDecl::new("f").stmt(Stmt::Return(Some(Expr::list(vec![]))));
    let err = compile(&[f]).unwrap_err();
    assert!(matches!(
        err,
        CompileError::Lower {
            error: LowerError::InvalidAccess { .. },
            ..
        }
    ));
}

#[test]
fn test_errors_from_several_functions_are_collected() {
    let bad = |name: &str| FunctionDecl::new(name).stmt(Stmt::Echo(vec![Expr::var("missing")]));
    let err = compile(&[bad("a"), bad("b")]).unwrap_err();
    let CompileError::Multiple(errors) = err else {
        panic!("expected multiple errors");
    };
    assert_eq!(errors.len(), 2);
}

// ── Call sites ──────────────────────────────────────────────────────

#[test]
fn test_method_call_shape_with_by_ref_and_unpack() {
    let f = FunctionDecl::new("f")
        .param("o", CarrierType::DynamicValue)
        .param("x", CarrierType::DynamicValue)
        .param("rest", CarrierType::DynamicValue)
        .stmt(Stmt::Return(Some(Expr::method_call(
            Expr::var("o"),
            Name::Static("run".to_string()),
            vec![Arg::new(Expr::var("x")), Arg::unpacked(Expr::var("rest"))],
        ))));
    let module = compile(&[f]).unwrap();
    assert_eq!(module.call_sites.len(), 1);
    let site = &module.call_sites[0];
    assert_eq!(site.name, "call_run");
    let roles: Vec<ParamRole> = site.shape.params.iter().map(|p| p.role).collect();
    assert_eq!(
        roles,
        vec![ParamRole::Instance, ParamRole::Context, ParamRole::Arg, ParamRole::Unpacked]
    );
    assert_eq!(site.shape.params[2].carrier, CarrierType::ValueRef);
    assert!(site.shape.params[2].by_ref);
    assert_eq!(site.shape.params[3].carrier, CarrierType::Unpacking);
    assert_eq!(site.delegate, DelegateRef::Synthesized(0));
    assert_eq!(module.delegates.len(), 1);
}

#[test]
fn test_descriptor_order_for_static_call() {
    let options = EmitOptions {
        class_context: Some("Caller".to_string()),
        ..EmitOptions::default()
    };
    let call = Expr::new(ExprKind::Call {
        target: CallTarget::Static {
            class: Name::Dynamic(Box::new(Expr::string("Widget"))),
            name: Name::Dynamic(Box::new(Expr::string("make"))),
        },
        args: vec![Arg::new(Expr::int(1))],
        type_args: vec!["int".to_string()],
    });
    let f = FunctionDecl::new("f").stmt(Stmt::Return(Some(call)));
    let module = compile_with_options(&[f], options).unwrap();
    let roles: Vec<ParamRole> = module.call_sites[0].shape.params.iter().map(|p| p.role).collect();
    assert_eq!(
        roles,
        vec![
            ParamRole::TargetType,
            ParamRole::Name,
            ParamRole::Context,
            ParamRole::TypeArgs,
            ParamRole::CallerType,
            ParamRole::Arg,
        ]
    );
    assert_eq!(module.call_sites[0].shape.params[5].carrier, CarrierType::Int);
    assert_eq!(module.call_sites[0].name, "call_dynamic");
}

#[test]
fn test_typed_local_argument_is_passed_by_value() {
    let f = FunctionDecl::new("f")
        .param("n", CarrierType::Int)
        .stmt(Stmt::expr(Expr::call("g", vec![Arg::new(Expr::var("n"))])));
    let module = compile(&[f]).unwrap();
    let site = &module.call_sites[0];
    assert!(!site.shape.has_by_ref());
    assert_eq!(site.shape.ret, CarrierType::Void);
    assert!(matches!(site.delegate, DelegateRef::WellKnown { .. }));
}

#[test]
fn test_missing_call_site_types_is_a_binding_error() {
    let options = EmitOptions {
        call_sites_available: false,
        ..EmitOptions::default()
    };
    let f = FunctionDecl::new("f").stmt(Stmt::expr(Expr::call("g", vec![])));
    let err = compile_with_options(&[f], options).unwrap_err();
    assert!(matches!(
        err,
        CompileError::Lower {
            error: LowerError::MissingWellKnownType { .. },
            ..
        }
    ));
}

// ── Idempotence ─────────────────────────────────────────────────────

#[test]
fn test_lowering_twice_is_byte_identical() {
    let f = FunctionDecl::new("f")
        .param("a", CarrierType::DynamicValue)
        .stmt(Stmt::expr(Expr::compound(
            BinaryOp::Concat,
            Expr::item(Expr::var("a"), Some(Expr::call("key", vec![]))),
            Expr::constant("SUFFIX"),
        )))
        .stmt(Stmt::Return(Some(Expr::binary(
            BinaryOp::Coalesce,
            Expr::item(Expr::var("a"), Some(Expr::string("k"))),
            Expr::int(0),
        ))));
    let comp = Compilation::new(EmitOptions::default());
    let first = comp.compile_function(&f).unwrap();
    let second = comp.compile_function(&f).unwrap();
    assert_eq!(first.body.fingerprint(), second.body.fingerprint());
    assert_eq!(comp.call_site_count(), 1);
}

#[test]
fn test_module_survives_json() {
    let f = FunctionDecl::new("f").stmt(Stmt::Return(Some(Expr::call("g", vec![Arg::new(Expr::int(1))]))));
    let module = compile(&[f]).unwrap();
    let json = module.to_json().unwrap();
    let back = Module::from_json(&json).unwrap();
    assert_eq!(back.call_sites, module.call_sites);
    assert_eq!(back.functions[0].body.fingerprint(), module.functions[0].body.fingerprint());
}
