//! End-to-end pipeline scenarios: whole compilations checked through
//! the container decoder.

use dexopt::prelude::*;

/// An enum, a user of the enum and an entry point, wired so the enum is
/// provably closed.
fn enum_program(pools: &Pools) -> dexopt::Result<CompilationInputs> {
    let wk = *pools.types.well_known();
    let enum_root = pools.types.intern("Ljava/lang/Enum;")?;
    let color = pools.class_type("Lapp/Color;")?;
    let red = pools.field(color, "RED", color);
    let green = pools.field(color, "GREEN", color);
    let ordinal = pools.method(enum_root, "ordinal", wk.int, &[]);

    let mut color_class = ClassDef::new(
        color,
        ClassFlags::PUBLIC | ClassFlags::ENUM | ClassFlags::FINAL,
        Some(enum_root),
    );
    for field in [red, green] {
        color_class.fields.push(FieldDef {
            reference: field,
            flags: FieldFlags::PUBLIC | FieldFlags::STATIC | FieldFlags::FINAL | FieldFlags::ENUM,
            static_value: None,
        });
    }

    let main_ty = pools.class_type("Lapp/Main;")?;
    let entry = pools.method(main_ty, "main", wk.int, &[]);
    let mut main = ClassDef::new(main_ty, ClassFlags::PUBLIC, Some(wk.object));
    main.methods.push(MethodDef {
        reference: entry,
        flags: MethodFlags::PUBLIC | MethodFlags::STATIC,
        code: Some(StackCode::new(
            0,
            vec![
                StackOp::GetStatic(green),
                StackOp::Invoke(InvokeKind::Virtual, ordinal),
                StackOp::Return,
            ],
        )),
    });

    Ok(CompilationInputs {
        classes: vec![color_class, main],
        library: vec![LibraryClass::new(
            enum_root,
            ClassFlags::PUBLIC,
            Some(wk.object),
        )],
        keep: vec![KeepRule::member("Lapp/Main;", "main")],
    })
}

#[test]
fn test_enum_unboxing_end_to_end() -> dexopt::Result<()> {
    let pools = Pools::new();
    let inputs = enum_program(&pools)?;
    let program = compile(pools, inputs, CompileOptions::default())?;

    assert_eq!(program.containers.len(), 1);
    let decoded = read_container(&program.containers[0].bytes)?;

    // The enum class is gone; only Main survives.
    let names: Vec<&str> = decoded
        .classes
        .iter()
        .map(|c| decoded.pools.types.descriptor(c.ty))
        .collect();
    assert_eq!(names, vec!["Lapp/Main;"]);

    // GREEN is ordinal one; the field load and the ordinal() call both
    // collapsed into a constant.
    let entry = decoded.classes[0].methods[0].reference;
    let body = &decoded.codes[&entry];
    assert!(body
        .ops
        .iter()
        .any(|op| matches!(op, dexopt::encode::RegOp::Const { value: 1, .. })));
    assert!(!body
        .ops
        .iter()
        .any(|op| matches!(op, dexopt::encode::RegOp::Invoke { .. })));
    Ok(())
}

#[test]
fn test_class_merging_produces_mapping() -> dexopt::Result<()> {
    let pools = Pools::new();
    let wk = *pools.types.well_known();

    let mut classes = Vec::new();
    let mut callees = Vec::new();
    for (descriptor, name) in [("Lapp/A;", "fa"), ("Lapp/B;", "fb")] {
        let ty = pools.class_type(descriptor)?;
        let method = pools.method(ty, name, wk.int, &[]);
        let mut class = ClassDef::new(ty, ClassFlags::PUBLIC, Some(wk.object));
        class.methods.push(MethodDef {
            reference: method,
            flags: MethodFlags::PUBLIC | MethodFlags::STATIC,
            code: Some(StackCode::new(
                0,
                vec![StackOp::PushInt(1), StackOp::Return],
            )),
        });
        classes.push(class);
        callees.push(method);
    }

    let main_ty = pools.class_type("Lapp/Main;")?;
    let entry = pools.method(main_ty, "main", wk.int, &[]);
    let mut main = ClassDef::new(main_ty, ClassFlags::PUBLIC, Some(wk.object));
    main.methods.push(MethodDef {
        reference: entry,
        flags: MethodFlags::PUBLIC | MethodFlags::STATIC,
        code: Some(StackCode::new(
            0,
            vec![
                StackOp::Invoke(InvokeKind::Static, callees[0]),
                StackOp::Pop,
                StackOp::Invoke(InvokeKind::Static, callees[1]),
                StackOp::Return,
            ],
        )),
    });
    classes.push(main);

    // Inlining off so both callees stay observable in the output.
    let options = CompileOptions {
        enable_inlining: false,
        enable_enum_unboxing: false,
        ..CompileOptions::default()
    };
    let inputs = CompilationInputs {
        classes,
        library: Vec::new(),
        keep: vec![KeepRule::member("Lapp/Main;", "main")],
    };
    let program = compile(pools, inputs, options)?;

    let mapping = program.mapping.expect("merging must produce a mapping");
    assert!(mapping.contains("Lapp/A; -> Lapp/A$$Holder$"));
    assert!(mapping.contains("Lapp/B; -> Lapp/A$$Holder$"));
    assert!(mapping.contains("Lapp/A;->fa()I ->"));

    let decoded = read_container(&program.containers[0].bytes)?;
    let names: Vec<&str> = decoded
        .classes
        .iter()
        .map(|c| decoded.pools.types.descriptor(c.ty))
        .collect();
    assert_eq!(names.len(), 2, "main plus the merged holder: {names:?}");
    assert!(names.iter().any(|n| n.starts_with("Lapp/A$$Holder$")));
    Ok(())
}

#[test]
fn test_merged_name_collision_keeps_calls_distinct() -> dexopt::Result<()> {
    let pools = Pools::new();
    let wk = *pools.types.well_known();

    // Two static classes defining the same signature with different
    // bodies. After merging, the calls must still reach different code.
    let mut classes = Vec::new();
    let mut callees = Vec::new();
    for (descriptor, value) in [("Lapp/A;", 1), ("Lapp/B;", 2)] {
        let ty = pools.class_type(descriptor)?;
        let method = pools.method(ty, "get", wk.int, &[]);
        let mut class = ClassDef::new(ty, ClassFlags::PUBLIC, Some(wk.object));
        class.methods.push(MethodDef {
            reference: method,
            flags: MethodFlags::PUBLIC | MethodFlags::STATIC,
            code: Some(StackCode::new(
                0,
                vec![StackOp::PushInt(value), StackOp::Return],
            )),
        });
        classes.push(class);
        callees.push(method);
    }

    let main_ty = pools.class_type("Lapp/Main;")?;
    let entry = pools.method(main_ty, "main", wk.int, &[]);
    let mut main = ClassDef::new(main_ty, ClassFlags::PUBLIC, Some(wk.object));
    main.methods.push(MethodDef {
        reference: entry,
        flags: MethodFlags::PUBLIC | MethodFlags::STATIC,
        code: Some(StackCode::new(
            0,
            vec![
                StackOp::Invoke(InvokeKind::Static, callees[0]),
                StackOp::Pop,
                StackOp::Invoke(InvokeKind::Static, callees[1]),
                StackOp::Return,
            ],
        )),
    });
    classes.push(main);

    let options = CompileOptions {
        enable_inlining: false,
        enable_enum_unboxing: false,
        ..CompileOptions::default()
    };
    let inputs = CompilationInputs {
        classes,
        library: Vec::new(),
        keep: vec![KeepRule::member("Lapp/Main;", "main")],
    };
    let program = compile(pools, inputs, options)?;
    let decoded = read_container(&program.containers[0].bytes)?;

    let main_class = decoded
        .classes
        .iter()
        .find(|c| decoded.pools.types.descriptor(c.ty) == "Lapp/Main;")
        .expect("entry class survives");
    let body = &decoded.codes[&main_class.methods[0].reference];
    let targets: Vec<_> = body
        .ops
        .iter()
        .filter_map(|op| match op {
            dexopt::encode::RegOp::Invoke { method, .. } => Some(*method),
            _ => None,
        })
        .collect();
    assert_eq!(targets.len(), 2);
    assert_ne!(targets[0], targets[1], "colliding merged methods aliased");

    let mut names: Vec<String> = targets
        .iter()
        .map(|&m| decoded.pools.method_name(m).to_owned())
        .collect();
    names.sort();
    assert_eq!(names, ["get", "get$1"]);

    // Each renamed method kept its own body.
    let holder_class = decoded
        .classes
        .iter()
        .find(|c| decoded.pools.types.descriptor(c.ty).starts_with("Lapp/A$$Holder$"))
        .expect("holder survives");
    let mut returned: Vec<i32> = holder_class
        .methods
        .iter()
        .filter_map(|m| {
            decoded.codes[&m.reference].ops.iter().find_map(|op| match op {
                dexopt::encode::RegOp::Const { value, .. } => Some(*value),
                _ => None,
            })
        })
        .collect();
    returned.sort_unstable();
    assert_eq!(returned, [1, 2]);
    Ok(())
}

#[test]
fn test_round_trip_preserves_classes_and_code() -> dexopt::Result<()> {
    let pools = Pools::new();
    let wk = *pools.types.well_known();
    let main_ty = pools.class_type("Lapp/Main;")?;
    let entry = pools.method(main_ty, "sum", wk.int, &[wk.int, wk.int]);
    let mut main = ClassDef::new(main_ty, ClassFlags::PUBLIC, Some(wk.object));
    main.methods.push(MethodDef {
        reference: entry,
        flags: MethodFlags::PUBLIC | MethodFlags::STATIC,
        code: Some(StackCode::new(
            2,
            vec![
                StackOp::Load(0),
                StackOp::Load(1),
                StackOp::Binary(BinaryOp::Add),
                StackOp::Return,
            ],
        )),
    });
    let inputs = CompilationInputs {
        classes: vec![main],
        library: Vec::new(),
        keep: vec![KeepRule::class("Lapp/Main;")],
    };

    let program = compile(pools, inputs, CompileOptions::minimal())?;
    let decoded = read_container(&program.containers[0].bytes)?;

    assert_eq!(decoded.classes.len(), 1);
    let class = &decoded.classes[0];
    assert_eq!(decoded.pools.types.descriptor(class.ty), "Lapp/Main;");
    let method = class.methods[0].reference;
    assert_eq!(decoded.pools.method_name(method), "sum");

    let body = &decoded.codes[&method];
    assert!(body
        .ops
        .iter()
        .any(|op| matches!(op, dexopt::encode::RegOp::Binary { .. })));
    assert!(matches!(
        body.ops.last(),
        Some(dexopt::encode::RegOp::Return { .. })
    ));
    Ok(())
}

mod capacity {
    use std::collections::HashMap;
    use std::sync::Arc;

    use dexopt::encode::{distribute, INDEX_LIMIT};
    use dexopt::prelude::*;
    use dexopt::trace::CallGraph;
    use dexopt::Error;

    /// A class whose fields reference `count` distinct names.
    fn wide_class(pools: &Pools, descriptor: &str, prefix: &str, count: usize) -> ClassDef {
        let wk = *pools.types.well_known();
        let ty = pools.class_type(descriptor).unwrap();
        let mut class = ClassDef::new(ty, ClassFlags::PUBLIC, Some(wk.object));
        for i in 0..count {
            let field = pools.field(ty, &format!("{prefix}{i}"), wk.int);
            class.fields.push(FieldDef {
                reference: field,
                flags: FieldFlags::PUBLIC | FieldFlags::STATIC,
                static_value: None,
            });
        }
        class
    }

    #[test]
    fn test_overflow_without_multidex_is_capacity_error() {
        let pools = Pools::new();
        let count = INDEX_LIMIT / 2 + 1024;
        let a = wide_class(&pools, "Lapp/WideA;", "a", count);
        let b = wide_class(&pools, "Lapp/WideB;", "b", count);
        let app = Application::build(Arc::clone(&pools), vec![a, b], Vec::new()).unwrap();

        let bodies = HashMap::new();
        let callgraph = CallGraph::default();

        let err = distribute(
            &app,
            &bodies,
            &callgraph,
            PackingStrategy::Greedy,
            false,
            &pools,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Capacity { .. }), "{err}");

        // The same input spills cleanly once multidex is allowed.
        let containers = distribute(
            &app,
            &bodies,
            &callgraph,
            PackingStrategy::Greedy,
            true,
            &pools,
        )
        .unwrap();
        assert_eq!(containers.len(), 2);
    }

    #[test]
    fn test_single_oversized_class_is_file_overflow() {
        let pools = Pools::new();
        let class = wide_class(&pools, "Lapp/Huge;", "f", INDEX_LIMIT + 1);
        let app =
            Application::build(Arc::clone(&pools), vec![class], Vec::new()).unwrap();

        let err = distribute(
            &app,
            &HashMap::new(),
            &CallGraph::default(),
            PackingStrategy::Greedy,
            true,
            &pools,
        )
        .unwrap_err();
        assert!(matches!(err, Error::FileOverflow { .. }), "{err}");
    }
}
