use ember_core::consts::{ConstRegistry, ContextConsts, Scalar};
use ember_core::registry::KeyedRegistry;
use ember_core::Value;
use std::sync::Arc;

#[test]
fn test_keyed_registry_assigns_one_index_per_key_across_threads() {
    let reg: Arc<KeyedRegistry<String, String>> = Arc::new(KeyedRegistry::new());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let reg = Arc::clone(&reg);
            std::thread::spawn(move || {
                (0..50)
                    .map(|i| reg.get_or_register(format!("k{}", i), |idx| format!("v{}", idx)).0)
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let results: Vec<Vec<usize>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for r in &results[1..] {
        assert_eq!(r, &results[0]);
    }
    assert_eq!(reg.len(), 50);
    for i in 0..50 {
        let idx = reg.lookup(&format!("k{}", i)).unwrap();
        assert_eq!(reg.get(idx), Some(&format!("v{}", idx)));
    }
}

#[test]
fn test_unique_names_never_collide_under_contention() {
    let reg: Arc<KeyedRegistry<String, String>> = Arc::new(KeyedRegistry::new());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let reg = Arc::clone(&reg);
            std::thread::spawn(move || {
                for _ in 0..25 {
                    reg.register_unique("call_f", |_, name| name.to_string());
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    let mut names: Vec<String> = reg.iter().cloned().collect();
    assert_eq!(names.len(), 100);
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 100);
    assert!(names.contains(&"call_f".to_string()));
    assert!(names.contains(&"call_f'99".to_string()));
}

#[test]
fn test_constant_ids_agree_across_threads() {
    let reg = Arc::new(ConstRegistry::new());
    reg.define_app_constant("SHARED", Scalar::Int(7), false).unwrap();
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let reg = Arc::clone(&reg);
            std::thread::spawn(move || {
                let mut ctx = ContextConsts::new(Arc::clone(&reg));
                ctx.define(&format!("T{}", t), Value::Int(t), false).unwrap();
                ctx.define("COMMON", Value::Int(t), false).unwrap();
                (reg.resolve("COMMON"), ctx.get("COMMON").to_string(), ctx.get("SHARED").to_string())
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let common_id = results[0].0;
    for (t, (id, common, shared)) in results.iter().enumerate() {
        assert_eq!(*id, common_id);
        assert_eq!(common, &t.to_string());
        assert_eq!(shared, "7");
    }
}
