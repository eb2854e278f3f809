//! Compile functions and run them.

use ember_compiler::compiler::ast::{Arg, ArrayItem, BinaryOp, Expr, ExprKind, FunctionDecl, ListItem, Name, Stmt};
use ember_compiler::compiler::bytecode::{CodeBody, CompiledFunction, Instr, Module};
use ember_compiler::compiler::callsite::{
    BinderKind, BinderSpec, CallSiteDecl, DelegateFamily, DelegateRef, DelegateShape,
};
use ember_compiler::compiler::carrier::CarrierType;
use ember_compiler::compile;
use ember_core::{ArrayKey, ArrayObject, PhpArray, PhpObject, Value};
use ember_vm::{HostFunction, VmError, VmOptions, VM};
use std::cell::Cell;
use std::rc::Rc;

fn vm_for(functions: &[FunctionDecl]) -> VM {
    let module = compile(functions).expect("functions should compile");
    let mut vm = VM::new();
    vm.load(module);
    vm
}

fn counting(name: &str, result: Value) -> (HostFunction, Rc<Cell<usize>>) {
    let count = Rc::new(Cell::new(0));
    let seen = count.clone();
    let f = HostFunction::new(name, move |_| {
        seen.set(seen.get() + 1);
        Ok(result.clone())
    });
    (f, count)
}

fn array_of(items: &[(&str, Value)]) -> Value {
    Value::new_array(
        items
            .iter()
            .map(|(k, v)| (ArrayKey::from_str_key(k), v.clone()))
            .collect::<PhpArray>(),
    )
}

fn item(value: &Value, key: &str) -> Value {
    let arr = value.as_array().expect("array result");
    let value = arr.borrow().get_item_value(&ArrayKey::from_str_key(key));
    value
}

// ── Operators ───────────────────────────────────────────────────────

#[test]
fn test_short_circuit_skips_right_operand() {
    let f = FunctionDecl::new("main").param("a", CarrierType::Bool).stmt(Stmt::Return(Some(Expr::binary(
        BinaryOp::And,
        Expr::var("a"),
        Expr::call("side_effect", vec![]),
    ))));
    let mut vm = vm_for(&[f]);
    let (side_effect, count) = counting("side_effect", Value::Bool(true));
    vm.register_function(side_effect);

    let result = vm.execute("main", vec![Value::Bool(false)]).unwrap();
    assert!(matches!(result, Value::Bool(false)));
    assert_eq!(count.get(), 0);

    let result = vm.execute("main", vec![Value::Bool(true)]).unwrap();
    assert!(matches!(result, Value::Bool(true)));
    assert_eq!(count.get(), 1);
}

#[test]
fn test_or_short_circuit_skips_right_operand() {
    let f = FunctionDecl::new("main").param("a", CarrierType::Bool).stmt(Stmt::Return(Some(Expr::binary(
        BinaryOp::Or,
        Expr::var("a"),
        Expr::call("side_effect", vec![]),
    ))));
    let mut vm = vm_for(&[f]);
    let (side_effect, count) = counting("side_effect", Value::Bool(false));
    vm.register_function(side_effect);

    let result = vm.execute("main", vec![Value::Bool(true)]).unwrap();
    assert!(matches!(result, Value::Bool(true)));
    assert_eq!(count.get(), 0);

    let result = vm.execute("main", vec![Value::Bool(false)]).unwrap();
    assert!(matches!(result, Value::Bool(false)));
    assert_eq!(count.get(), 1);
}

#[test]
fn test_typed_string_equals_null_only_when_empty() {
    let f = FunctionDecl::new("main")
        .param("s", CarrierType::String)
        .stmt(Stmt::Return(Some(Expr::binary(BinaryOp::Eq, Expr::var("s"), Expr::null()))));
    let mut vm = vm_for(&[f]);
    for (s, expected) in [("", true), ("0", false), ("a", false)] {
        let result = vm.execute("main", vec![Value::string(s)]).unwrap();
        assert!(matches!(result, Value::Bool(b) if b == expected), "{:?}", s);
    }
}

#[test]
fn test_empty_on_typed_string_treats_zero_as_empty() {
    let f = FunctionDecl::new("main")
        .param("s", CarrierType::String)
        .stmt(Stmt::Return(Some(Expr::empty(Expr::var("s")))));
    let mut vm = vm_for(&[f]);
    for (s, expected) in [("", true), ("0", true), ("00", false)] {
        let result = vm.execute("main", vec![Value::string(s)]).unwrap();
        assert!(matches!(result, Value::Bool(b) if b == expected), "{:?}", s);
    }
}

#[test]
fn test_coalesce_is_quiet_on_missing_key() {
    let f = FunctionDecl::new("main")
        .param("a", CarrierType::DynamicValue)
        .stmt(Stmt::Return(Some(Expr::binary(
            BinaryOp::Coalesce,
            Expr::item(Expr::var("a"), Some(Expr::string("k"))),
            Expr::int(0),
        ))));
    let mut vm = vm_for(&[f]);

    let result = vm.execute("main", vec![array_of(&[])]).unwrap();
    assert!(matches!(result, Value::Int(0)));
    let result = vm.execute("main", vec![array_of(&[("k", Value::Int(5))])]).unwrap();
    assert!(matches!(result, Value::Int(5)));
    assert!(vm.warnings.is_empty(), "{:?}", vm.warnings);
}

#[test]
fn test_coalesce_evaluates_left_once() {
    let f = FunctionDecl::new("main").stmt(Stmt::Return(Some(Expr::binary(
        BinaryOp::Coalesce,
        Expr::call("left", vec![]),
        Expr::call("right", vec![]),
    ))));
    let mut vm = vm_for(&[f]);
    let (left, left_count) = counting("left", Value::Int(5));
    let (right, right_count) = counting("right", Value::Int(9));
    vm.register_function(left);
    vm.register_function(right);
    assert!(matches!(vm.execute("main", vec![]).unwrap(), Value::Int(5)));
    assert_eq!(left_count.get(), 1);
    assert_eq!(right_count.get(), 0);
}

#[test]
fn test_missing_key_read_warns() {
    let f = FunctionDecl::new("main")
        .param("a", CarrierType::DynamicValue)
        .stmt(Stmt::Return(Some(Expr::item(Expr::var("a"), Some(Expr::string("missing"))))));
    let mut vm = vm_for(&[f]);
    let result = vm.execute("main", vec![array_of(&[])]).unwrap();
    assert!(matches!(result, Value::Null));
    assert_eq!(vm.warnings, vec!["Undefined array key \"missing\"".to_string()]);
}

#[test]
fn test_echo_converts_to_string() {
    let f = FunctionDecl::new("main").stmt(Stmt::Echo(vec![Expr::string("n="), Expr::int(7), Expr::float(0.5)]));
    let mut vm = vm_for(&[f]);
    vm.execute("main", vec![]).unwrap();
    assert_eq!(vm.output_text(), "n=70.5");
}

// ── Places ──────────────────────────────────────────────────────────

#[test]
fn test_compound_assignment_evaluates_index_once() {
    let f = FunctionDecl::new("main")
        .param("a", CarrierType::DynamicValue)
        .stmt(Stmt::expr(Expr::compound(
            BinaryOp::Add,
            Expr::item(Expr::var("a"), Some(Expr::call("key", vec![]))),
            Expr::int(1),
        )))
        .stmt(Stmt::Return(Some(Expr::var("a"))));
    let mut vm = vm_for(&[f]);
    let (key, count) = counting("key", Value::string("k"));
    vm.register_function(key);

    let result = vm.execute("main", vec![array_of(&[("k", Value::Int(41))])]).unwrap();
    assert!(matches!(item(&result, "k"), Value::Int(42)));
    assert_eq!(count.get(), 1);
}

#[test]
fn test_nested_write_autovivifies() {
    let f = FunctionDecl::new("main")
        .stmt(Stmt::expr(Expr::assign(
            Expr::item(Expr::item(Expr::var("a"), Some(Expr::string("x"))), None),
            Expr::int(1),
        )))
        .stmt(Stmt::Return(Some(Expr::var("a"))));
    let mut vm = vm_for(&[f]);
    let result = vm.execute("main", vec![]).unwrap();
    let inner = item(&result, "x");
    let inner = inner.as_array().expect("inner array");
    assert_eq!(inner.borrow().len(), 1);
    assert!(matches!(inner.borrow().get_item_value(&ArrayKey::Int(0)), Value::Int(1)));
}

#[test]
fn test_item_round_trip_through_typed_array_local() {
    let f = FunctionDecl::new("main")
        .local("a", CarrierType::Array)
        .stmt(Stmt::expr(Expr::assign(
            Expr::item(Expr::var("a"), Some(Expr::string("k"))),
            Expr::int(5),
        )))
        .stmt(Stmt::Return(Some(Expr::item(Expr::var("a"), Some(Expr::string("k"))))));
    let mut vm = vm_for(&[f]);
    assert!(matches!(vm.execute("main", vec![]).unwrap(), Value::Int(5)));
    assert!(vm.warnings.is_empty(), "{:?}", vm.warnings);
}

#[test]
fn test_offset_round_trip_through_mutable_string_local() {
    let f = FunctionDecl::new("main")
        .local("s", CarrierType::MutableString)
        .stmt(Stmt::expr(Expr::assign(Expr::var("s"), Expr::string("abc"))))
        .stmt(Stmt::expr(Expr::assign(
            Expr::item(Expr::var("s"), Some(Expr::int(1))),
            Expr::string("x"),
        )))
        .stmt(Stmt::Return(Some(Expr::concat(vec![
            Expr::item(Expr::var("s"), Some(Expr::int(1))),
            Expr::string(":"),
            Expr::var("s"),
        ]))));
    let mut vm = vm_for(&[f]);
    let result = vm.execute("main", vec![]).unwrap();
    assert_eq!(result.string_bytes(), Some(b"x:axc".to_vec()));
}

#[test]
fn test_item_round_trip_through_indexable_object() {
    let f = FunctionDecl::new("main")
        .param("o", CarrierType::DynamicValue)
        .stmt(Stmt::expr(Expr::assign(
            Expr::item(Expr::var("o"), Some(Expr::string("k"))),
            Expr::int(5),
        )))
        .stmt(Stmt::Return(Some(Expr::item(Expr::var("o"), Some(Expr::string("k"))))));
    let mut vm = vm_for(&[f]);
    let obj = PhpObject::with_indexer("ArrayObject", Rc::new(ArrayObject::new()));
    assert!(matches!(vm.execute("main", vec![Value::Object(obj)]).unwrap(), Value::Int(5)));
}

#[test]
fn test_list_destructuring_stores_each_position() {
    let f = FunctionDecl::new("main")
        .param("a", CarrierType::DynamicValue)
        .local("x", CarrierType::DynamicValue)
        .local("y", CarrierType::DynamicValue)
        .stmt(Stmt::expr(Expr::assign(
            Expr::list(vec![
                Some(ListItem {
                    key: None,
                    target: Expr::var("x"),
                }),
                Some(ListItem {
                    key: None,
                    target: Expr::var("y"),
                }),
            ]),
            Expr::var("a"),
        )))
        .stmt(Stmt::Return(Some(Expr::binary(BinaryOp::Sub, Expr::var("y"), Expr::var("x")))));
    let mut vm = vm_for(&[f]);
    let arr = Value::new_array(vec![Value::Int(3), Value::Int(10)].into_iter().collect::<PhpArray>());
    assert!(matches!(vm.execute("main", vec![arr]).unwrap(), Value::Int(7)));
}

#[test]
fn test_literal_arrays_are_copied_per_use() {
    let f = FunctionDecl::new("main")
        .stmt(Stmt::expr(Expr::assign(
            Expr::var("a"),
            Expr::new(ExprKind::ArrayLiteral(vec![ArrayItem {
                key: None,
                value: Expr::int(1),
            }])),
        )))
        .stmt(Stmt::expr(Expr::assign(Expr::item(Expr::var("a"), None), Expr::int(2))))
        .stmt(Stmt::Return(Some(Expr::var("a"))));
    let mut vm = vm_for(&[f]);
    let first = vm.execute("main", vec![]).unwrap();
    let second = vm.execute("main", vec![]).unwrap();
    assert_eq!(first.as_array().unwrap().borrow().len(), 2);
    assert_eq!(second.as_array().unwrap().borrow().len(), 2);
}

// ── Calls ───────────────────────────────────────────────────────────

fn double() -> FunctionDecl {
    FunctionDecl::new("double")
        .param("x", CarrierType::DynamicValue)
        .stmt(Stmt::Return(Some(Expr::binary(BinaryOp::Add, Expr::var("x"), Expr::var("x")))))
}

#[test]
fn test_call_site_binds_compiled_function_once() {
    let main = FunctionDecl::new("main").stmt(Stmt::Return(Some(Expr::call("double", vec![Arg::new(Expr::int(21))]))));
    let mut vm = vm_for(&[main, double()]);
    for _ in 0..3 {
        assert!(matches!(vm.execute("main", vec![]).unwrap(), Value::Int(42)));
    }
    assert_eq!(vm.stats().binders_constructed, 1);
}

#[test]
fn test_indirect_call_through_string() {
    let main = FunctionDecl::new("main")
        .stmt(Stmt::expr(Expr::assign(Expr::var("f"), Expr::string("DOUBLE"))))
        .stmt(Stmt::Return(Some(Expr::call_indirect(
            Expr::var("f"),
            vec![Arg::new(Expr::int(4))],
        ))));
    let mut vm = vm_for(&[main, double()]);
    assert!(matches!(vm.execute("main", vec![]).unwrap(), Value::Int(8)));
}

#[test]
fn test_by_ref_host_argument_updates_local() {
    let main = FunctionDecl::new("main")
        .stmt(Stmt::expr(Expr::assign(Expr::var("x"), Expr::int(1))))
        .stmt(Stmt::expr(Expr::call("inc", vec![Arg::new(Expr::var("x"))])))
        .stmt(Stmt::Return(Some(Expr::var("x"))));
    let mut vm = vm_for(&[main]);
    vm.register_function(
        HostFunction::new("inc", |args| {
            match args.first() {
                Some(Value::Alias(alias)) => {
                    let next = match alias.get() {
                        Value::Int(n) => n + 1,
                        _ => 0,
                    };
                    alias.set(Value::Int(next));
                }
                _ => return Err(VmError::TypeError("inc expects a reference".to_string())),
            }
            Ok(Value::Null)
        })
        .by_ref(0),
    );
    assert!(matches!(vm.execute("main", vec![]).unwrap(), Value::Int(2)));
}

#[test]
fn test_by_value_host_argument_is_a_copy() {
    let main = FunctionDecl::new("main")
        .param("a", CarrierType::DynamicValue)
        .stmt(Stmt::expr(Expr::call("mutate", vec![Arg::new(Expr::var("a"))])))
        .stmt(Stmt::Return(Some(Expr::var("a"))));
    let mut vm = vm_for(&[main]);
    vm.register_function(HostFunction::new("mutate", |args| {
        if let Some(arr) = args.first().and_then(Value::as_array) {
            arr.borrow_mut().add_value(Value::Int(99))?;
        }
        Ok(Value::Null)
    }));
    let result = vm.execute("main", vec![array_of(&[("0", Value::Int(1))])]).unwrap();
    assert_eq!(result.as_array().unwrap().borrow().len(), 1);
}

#[test]
fn test_method_call_on_host_class() {
    let main = FunctionDecl::new("main")
        .param("o", CarrierType::DynamicValue)
        .stmt(Stmt::Return(Some(Expr::method_call(
            Expr::var("o"),
            Name::Static("add".to_string()),
            vec![Arg::new(Expr::int(2))],
        ))));
    let mut vm = vm_for(&[main]);
    vm.register_method(
        "Counter",
        HostFunction::new("add", |args| match args {
            [Value::Object(this), Value::Int(n)] => {
                let base = match this.get_property("base") {
                    Value::Int(b) => b,
                    _ => 0,
                };
                Ok(Value::Int(base + n))
            }
            _ => Err(VmError::TypeError("bad arguments".to_string())),
        }),
    );
    let obj = PhpObject::new("Counter");
    obj.set_property("base", Value::Int(40));
    assert!(matches!(vm.execute("main", vec![Value::Object(obj)]).unwrap(), Value::Int(42)));

    let err = vm.execute("main", vec![Value::Object(PhpObject::new("Other"))]).unwrap_err();
    assert!(matches!(err, VmError::UndefinedMethod { .. }));
}

#[test]
fn test_unknown_function_is_an_error() {
    let main = FunctionDecl::new("main").stmt(Stmt::expr(Expr::call("nope", vec![])));
    let mut vm = vm_for(&[main]);
    let err = vm.execute("main", vec![]).unwrap_err();
    assert!(matches!(err, VmError::UndefinedFunction(name) if name == "nope"));
}

#[test]
fn test_recursion_depth_is_bounded() {
    let main = FunctionDecl::new("main").stmt(Stmt::Return(Some(Expr::call("main", vec![]))));
    let module = compile(&[main]).unwrap();
    let mut vm = VM::with_options(VmOptions {
        max_call_depth: 16,
        ..VmOptions::default()
    });
    vm.load(module);
    assert!(matches!(vm.execute("main", vec![]), Err(VmError::StackOverflow(16))));
}

fn self_referencing_site() -> Module {
    let mut init = CodeBody::new();
    init.instrs = vec![Instr::LdCallSite(0), Instr::StCallSite(0), Instr::Ret];
    let mut body = CodeBody::new();
    body.instrs = vec![Instr::LdCallSite(0), Instr::Pop, Instr::LdNull, Instr::Ret];
    Module {
        functions: vec![CompiledFunction {
            name: "main".to_string(),
            param_count: 0,
            body,
        }],
        call_sites: vec![CallSiteDecl {
            name: "call_loop".to_string(),
            function: "main".to_string(),
            delegate: DelegateRef::WellKnown {
                family: DelegateFamily::Func,
                arity: 1,
            },
            shape: DelegateShape {
                params: Vec::new(),
                ret: CarrierType::DynamicValue,
            },
            binder: BinderSpec {
                kind: BinderKind::Function,
                name: Some("loop".to_string()),
                class: None,
                caller: None,
            },
            init,
        }],
        ..Module::default()
    }
}

#[test]
fn test_reentrant_site_construction_fails_and_resets() {
    let mut vm = VM::new();
    vm.load(self_referencing_site());
    for _ in 0..2 {
        let err = vm.execute("main", vec![]).unwrap_err();
        assert!(matches!(err, VmError::CallSiteReentrancy(ref site) if site == "call_loop"), "{}", err);
    }
    assert_eq!(vm.stats().binders_constructed, 0);
}

// ── Constants ───────────────────────────────────────────────────────

#[test]
fn test_constants_resolve_per_context() {
    let main = FunctionDecl::new("main").stmt(Stmt::Return(Some(Expr::constant("ANSWER"))));
    let mut vm = vm_for(&[main]);
    vm.define_constant("ANSWER", Value::Int(42), false).unwrap();
    assert!(matches!(vm.execute("main", vec![]).unwrap(), Value::Int(42)));
    assert!(!vm.define_constant("ANSWER", Value::Int(1), false).unwrap());
}

#[test]
fn test_undefined_constant_evaluates_to_its_name() {
    let main = FunctionDecl::new("main").stmt(Stmt::Return(Some(Expr::constant("MISSING"))));
    let mut vm = vm_for(&[main]);
    let result = vm.execute("main", vec![]).unwrap();
    assert!(matches!(result, Value::String(ref s) if &**s == "MISSING"));
    assert_eq!(vm.warnings.len(), 1);
}

// ── Loading ─────────────────────────────────────────────────────────

#[test]
fn test_module_loads_from_json() {
    let module = compile(&[double()]).unwrap();
    let json = module.to_json().unwrap();
    let mut vm = VM::new();
    vm.load_json(&json).unwrap();
    assert!(matches!(vm.execute("double", vec![Value::Float(1.25)]).unwrap(), Value::Float(f) if f == 2.5));
    assert!(matches!(vm.load_json("{"), Err(VmError::Config(_))));
}
