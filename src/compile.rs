//! The compilation driver.
//!
//! One call runs the whole pipeline: model build, reachability trace,
//! optimization waves, dead-item sweep, register lowering, container
//! packing and serialization. Output is all-or-nothing; any failure, or
//! any error-severity diagnostic, aborts before a single container byte
//! is handed out.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use tracing::{debug, info, info_span};

use crate::{
    diagnostics::Diagnostic,
    encode::{distribute, lower_method, write_container, EncodedContainer, LoweredMethod},
    mapping::MappingSnapshot,
    model::{Application, ClassDef, Hierarchy, LibraryClass, MethodRef, Phase, Pools, Type},
    optimize::{default_pipeline, CompilerContext},
    options::CompileOptions,
    trace::{ConservativePolicy, Enqueuer, KeepRule, KeepRules, ReflectionPolicy},
    Error, Result,
};

/// Everything one compilation consumes.
///
/// All handles must come from the `pools` passed to [`compile`].
#[derive(Debug, Default)]
pub struct CompilationInputs {
    /// Program classes, in canonical input order.
    pub classes: Vec<ClassDef>,
    /// Read-only platform classes.
    pub library: Vec<LibraryClass>,
    /// Entry points that must survive under their original identity.
    pub keep: Vec<KeepRule>,
}

/// The finished output of a successful compilation.
#[derive(Debug)]
pub struct CompiledProgram {
    /// Serialized containers, in packing order.
    pub containers: Vec<EncodedContainer>,
    /// Original-to-final name mapping, when anything was renamed.
    pub mapping: Option<String>,
    /// Every diagnostic collected across the pipeline.
    pub diagnostics: Vec<Diagnostic>,
    /// Optimization waves run before the fixpoint.
    pub waves: usize,
}

/// Compiles a program with the conservative reflection policy.
///
/// # Errors
///
/// Any pipeline stage's error, [`Error::Empty`] for an empty input, or
/// [`Error::Malformed`] when a phase reported an error diagnostic.
pub fn compile(
    pools: Arc<Pools>,
    inputs: CompilationInputs,
    options: CompileOptions,
) -> Result<CompiledProgram> {
    compile_with_policy(pools, inputs, options, &ConservativePolicy)
}

/// Compiles and hands each serialized container to `consumer`.
///
/// Every container is fully encoded before the first callback, so a
/// failing compilation never feeds the consumer anything.
///
/// # Errors
///
/// As [`compile`], plus whatever the consumer returns.
pub fn compile_with_consumer(
    pools: Arc<Pools>,
    inputs: CompilationInputs,
    options: CompileOptions,
    mut consumer: impl FnMut(&EncodedContainer) -> Result<()>,
) -> Result<CompiledProgram> {
    let program = compile(pools, inputs, options)?;
    for container in &program.containers {
        consumer(container)?;
    }
    Ok(program)
}

/// [`compile`] with a caller-chosen reflection policy.
///
/// # Errors
///
/// As [`compile`].
pub fn compile_with_policy(
    pools: Arc<Pools>,
    inputs: CompilationInputs,
    options: CompileOptions,
    policy: &dyn ReflectionPolicy,
) -> Result<CompiledProgram> {
    let span = info_span!("compile", classes = inputs.classes.len());
    let _guard = span.enter();
    if inputs.classes.is_empty() {
        return Err(Error::Empty);
    }

    let mut app = Application::build(Arc::clone(&pools), inputs.classes, inputs.library)?;
    let hierarchy = Hierarchy::build(&app);
    let keep = KeepRules::new(inputs.keep);
    let ctx = CompilerContext::new(Arc::clone(&pools), options.clone());

    {
        let _trace = info_span!("trace").entered();
        Enqueuer::new(
            &app,
            &hierarchy,
            &keep,
            &ctx.facts,
            &ctx.callgraph,
            &ctx.ir_bodies,
            policy,
            &ctx.diagnostics,
        )
        .trace()?;
    }
    fail_on_error_diagnostics(&ctx, "trace")?;
    info!(
        live_methods = ctx.facts.live_method_count(),
        "reachability trace complete"
    );

    // Captured while every class still has its input name.
    let snapshot = MappingSnapshot::capture(&app);

    app.set_phase(Phase::Optimization);
    let waves = {
        let _optimize = info_span!("optimize").entered();
        let mut scheduler = default_pipeline(&options);
        scheduler.run_pipeline(&ctx, &mut app)?
    };
    ctx.synthetics.commit(&mut app)?;
    fail_on_error_diagnostics(&ctx, "optimization")?;

    sweep_dead_items(&mut app, &ctx);
    app.set_phase(Phase::Frozen);

    let lens = ctx.lens()?;
    let bodies = {
        let _lower = info_span!("lower").entered();
        let mut bodies: HashMap<MethodRef, LoweredMethod> = HashMap::new();
        for class in app.classes() {
            for method in &class.methods {
                let Some(body) = ctx.ir_bodies.get(&method.reference) else {
                    if method.code.is_some() {
                        return Err(internal_error!(
                            "surviving method {} has code but no body",
                            pools.describe_method(method.reference)
                        ));
                    }
                    continue;
                };
                bodies.insert(method.reference, lower_method(&body, &pools, &lens)?);
            }
        }
        bodies
    };
    debug!(methods = bodies.len(), "lowering complete");

    let mapping = snapshot.render(&lens, &pools);

    let containers = {
        let _encode = info_span!("encode").entered();
        let mut containers = distribute(
            &app,
            &bodies,
            &ctx.callgraph,
            options.packing,
            options.multidex,
            &pools,
        )?;
        let mut encoded = Vec::with_capacity(containers.len());
        for container in &mut containers {
            encoded.push(write_container(container, &app, &bodies, &pools)?);
        }
        encoded
    };
    fail_on_error_diagnostics(&ctx, "encode")?;
    info!(containers = containers.len(), waves, "compilation complete");

    Ok(CompiledProgram {
        containers,
        mapping,
        diagnostics: ctx.diagnostics.events(),
        waves,
    })
}

/// Drops classes and members the facts no longer justify. Pinned
/// classes keep every member; everything else keeps only what the
/// trace, minus retractions, still supports. Class liveness is
/// recomputed from the surviving members, so a class whose last method
/// was inlined away disappears with it; program supertypes of a
/// surviving class always stay.
fn sweep_dead_items(app: &mut Application, ctx: &CompilerContext) {
    let facts = &ctx.facts;
    let mut keep: HashSet<Type> = HashSet::new();
    for class in app.classes() {
        let needed = facts.pinned.contains(&class.ty)
            || facts.instantiated.contains(&class.ty)
            || class.methods.iter().any(|m| facts.is_live(m.reference))
            || class
                .fields
                .iter()
                .any(|f| facts.field_referenced(f.reference));
        if needed {
            keep.insert(class.ty);
        }
    }
    let mut frontier: Vec<Type> = keep.iter().copied().collect();
    while let Some(ty) = frontier.pop() {
        let Some(class) = app.class(ty) else {
            continue;
        };
        let supertypes: Vec<Type> = class
            .superclass
            .into_iter()
            .chain(class.interfaces.iter().copied())
            .collect();
        for sup in supertypes {
            if app.is_program_type(sup) && keep.insert(sup) {
                frontier.push(sup);
            }
        }
    }
    app.retain_classes(|class| keep.contains(&class.ty));

    let types: Vec<Type> = app.class_types().collect();
    let mut removed = 0usize;
    for ty in types {
        if ctx.facts.pinned.contains(&ty) {
            continue;
        }
        let Some(class) = app.class_mut(ty) else {
            continue;
        };
        let before = class.methods.len() + class.fields.len();
        class.methods.retain(|m| ctx.facts.is_live(m.reference));
        class
            .fields
            .retain(|f| ctx.facts.field_referenced(f.reference));
        removed += before - (class.methods.len() + class.fields.len());
    }
    if removed > 0 {
        debug!(removed, "swept dead members");
    }
}

fn fail_on_error_diagnostics(ctx: &CompilerContext, phase: &str) -> Result<()> {
    if !ctx.diagnostics.has_errors() {
        return Ok(());
    }
    let first = ctx
        .diagnostics
        .events()
        .into_iter()
        .find(|d| d.severity == crate::diagnostics::Severity::Error)
        .map(|d| d.message)
        .unwrap_or_default();
    Err(malformed_error!("{phase} failed: {first}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{InvokeKind, StackCode, StackOp};
    use crate::model::{ClassFlags, MethodDef, MethodFlags};

    fn one_method_inputs(pools: &Pools) -> CompilationInputs {
        let wk = *pools.types.well_known();
        let main_ty = pools.class_type("Lapp/Main;").unwrap();
        let entry = pools.method(main_ty, "main", wk.int, &[]);
        let mut main = ClassDef::new(main_ty, ClassFlags::PUBLIC, Some(wk.object));
        main.methods.push(MethodDef {
            reference: entry,
            flags: MethodFlags::PUBLIC | MethodFlags::STATIC,
            code: Some(StackCode::new(
                0,
                vec![StackOp::PushInt(7), StackOp::Return],
            )),
        });
        CompilationInputs {
            classes: vec![main],
            library: Vec::new(),
            keep: vec![KeepRule::member("Lapp/Main;", "main")],
        }
    }

    #[test]
    fn test_empty_input_rejected() {
        let pools = Pools::new();
        let result = compile(pools, CompilationInputs::default(), CompileOptions::default());
        assert!(matches!(result, Err(Error::Empty)));
    }

    #[test]
    fn test_single_method_program_compiles() {
        let pools = Pools::new();
        let inputs = one_method_inputs(&pools);
        let program = compile(pools, inputs, CompileOptions::minimal()).unwrap();
        assert_eq!(program.containers.len(), 1);
        assert!(program.mapping.is_none());
        assert_eq!(program.containers[0].classes, vec!["Lapp/Main;".to_owned()]);
    }

    /// Main calls `Util.helper`; `Util.unused` is never reached.
    fn main_and_util_inputs(pools: &Pools) -> CompilationInputs {
        let wk = *pools.types.well_known();
        let util_ty = pools.class_type("Lapp/Util;").unwrap();
        let helper = pools.method(util_ty, "helper", wk.int, &[]);
        let unused = pools.method(util_ty, "unused", wk.int, &[]);
        let mut util = ClassDef::new(util_ty, ClassFlags::PUBLIC, Some(wk.object));
        for (reference, value) in [(helper, 7), (unused, 9)] {
            util.methods.push(MethodDef {
                reference,
                flags: MethodFlags::PUBLIC | MethodFlags::STATIC,
                code: Some(StackCode::new(
                    0,
                    vec![StackOp::PushInt(value), StackOp::Return],
                )),
            });
        }

        let main_ty = pools.class_type("Lapp/Main;").unwrap();
        let entry = pools.method(main_ty, "main", wk.int, &[]);
        let mut main = ClassDef::new(main_ty, ClassFlags::PUBLIC, Some(wk.object));
        main.methods.push(MethodDef {
            reference: entry,
            flags: MethodFlags::PUBLIC | MethodFlags::STATIC,
            code: Some(StackCode::new(
                0,
                vec![
                    StackOp::Invoke(InvokeKind::Static, helper),
                    StackOp::Return,
                ],
            )),
        });
        CompilationInputs {
            classes: vec![main, util],
            library: Vec::new(),
            keep: vec![KeepRule::member("Lapp/Main;", "main")],
        }
    }

    fn class_method_names(decoded: &crate::encode::DecodedContainer) -> Vec<(String, Vec<String>)> {
        decoded
            .classes
            .iter()
            .map(|class| {
                (
                    decoded.pools.types.descriptor(class.ty).to_owned(),
                    class
                        .methods
                        .iter()
                        .map(|m| decoded.pools.method_name(m.reference).to_owned())
                        .collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_dead_method_swept() {
        let pools = Pools::new();
        let inputs = main_and_util_inputs(&pools);
        let program = compile(Arc::clone(&pools), inputs, CompileOptions::minimal()).unwrap();

        let decoded = crate::encode::read_container(&program.containers[0].bytes).unwrap();
        let classes = class_method_names(&decoded);
        assert_eq!(classes.len(), 2);
        let util = classes
            .iter()
            .find(|(name, _)| name == "Lapp/Util;")
            .unwrap();
        assert_eq!(util.1, vec!["helper".to_owned()]);
    }

    #[test]
    fn test_call_chain_inlined_end_to_end() {
        let pools = Pools::new();
        let inputs = main_and_util_inputs(&pools);
        let options = CompileOptions {
            enable_class_merging: false,
            enable_enum_unboxing: false,
            ..CompileOptions::default()
        };
        let program = compile(Arc::clone(&pools), inputs, options).unwrap();

        // The helper was inlined into main and died with its class.
        let decoded = crate::encode::read_container(&program.containers[0].bytes).unwrap();
        let classes = class_method_names(&decoded);
        assert_eq!(
            classes,
            vec![("Lapp/Main;".to_owned(), vec!["main".to_owned()])]
        );
    }
}
