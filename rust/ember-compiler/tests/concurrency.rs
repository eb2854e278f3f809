//! Functions lowered on several threads against one compilation.

use ember_compiler::compiler::ast::{Arg, Expr, FunctionDecl, Stmt};
use ember_compiler::{Compilation, EmitOptions};
use std::collections::HashSet;

fn caller(name: &str) -> FunctionDecl {
    FunctionDecl::new(name)
        .stmt(Stmt::expr(Expr::call("shared", vec![Arg::new(Expr::int(1))])))
        .stmt(Stmt::expr(Expr::call("shared", vec![])))
        .stmt(Stmt::Echo(vec![Expr::constant("PHP_EOL")]))
}

#[test]
fn test_parallel_lowering_assigns_unique_site_names() {
    let comp = Compilation::new(EmitOptions::default());
    let functions: Vec<FunctionDecl> = (0..8).map(|i| caller(&format!("f{}", i))).collect();

    let compiled = std::thread::scope(|scope| {
        let handles: Vec<_> = functions
            .iter()
            .map(|f| {
                let comp = &comp;
                scope.spawn(move || comp.compile_function(f).unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>()
    });

    let module = comp.finish(compiled);
    assert_eq!(module.functions.len(), 8);
    assert_eq!(module.call_sites.len(), 16);
    let names: HashSet<&str> = module.call_sites.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names.len(), 16);
    assert!(names.contains("call_shared"));
    assert!(names.contains("call_shared'15"));
    assert_eq!(module.const_slots, vec!["PHP_EOL".to_string()]);
}

#[test]
fn test_site_indices_match_their_init_bodies() {
    use ember_compiler::compiler::bytecode::Instr;

    let comp = Compilation::new(EmitOptions::default());
    std::thread::scope(|scope| {
        for i in 0..4 {
            let comp = &comp;
            scope.spawn(move || comp.compile_function(&caller(&format!("g{}", i))).unwrap());
        }
    });
    let module = comp.finish(Vec::new());
    for (index, site) in module.call_sites.iter().enumerate() {
        assert!(site.init.instrs.contains(&Instr::StCallSite(index as u32)));
    }
}
