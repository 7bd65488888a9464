//! Whole-program reachability trace.
//!
//! Starting from the keep-rule roots, the enqueuer discovers every
//! method, field and class the application can reach, building SSA
//! bodies for live methods on first contact. Work proceeds in waves:
//! each wave's items are processed in parallel, emitting follow-up
//! items; the fact sets arbitrate races, so an item that loses the
//! insert simply emits nothing. Waves repeat to a fixpoint.
//!
//! Virtual dispatch is handled pessimistically-then-precisely: a call
//! site through a virtual or interface method records the site, and
//! every later growth of the instantiated set re-resolves all recorded
//! sites against the hierarchy. The result is the least fixpoint over
//! both facts together.

use dashmap::{DashMap, DashSet};
use rayon::prelude::*;
use tracing::debug;

use crate::{
    bytecode::InvokeKind,
    diagnostics::DiagnosticSink,
    ir::{Instr, IrBuilder, IrCode},
    model::{Application, Hierarchy, MethodFlags, MethodRef, Pools, Resolution, Type},
    trace::{CallGraph, KeepRules, LivenessFacts, Reason},
    Result,
};

/// How reflective operations and native methods affect the trace.
///
/// The conservative default treats any reflective entry point as able
/// to reach the whole program; callers with stronger knowledge can
/// substitute a policy that trusts the input.
pub trait ReflectionPolicy: Sync {
    /// Called for every resolved call into library code. Returns `true`
    /// when the callee can reflectively reach arbitrary program code.
    fn is_reflective(&self, callee: MethodRef, pools: &Pools) -> bool;

    /// Whether native methods pin the whole program, as reflective
    /// callbacks from native code could reach anything.
    fn native_pins_program(&self) -> bool;
}

/// Treats `Class.forName`, `Class.newInstance` and native methods as
/// able to reach every program class.
#[derive(Debug, Default)]
pub struct ConservativePolicy;

impl ReflectionPolicy for ConservativePolicy {
    fn is_reflective(&self, callee: MethodRef, pools: &Pools) -> bool {
        let data = pools.method_data(callee);
        if pools.types.descriptor(data.holder) != "Ljava/lang/Class;" {
            return false;
        }
        let name = pools.strings.get(data.name);
        name == "forName" || name == "newInstance"
    }

    fn native_pins_program(&self) -> bool {
        true
    }
}

/// Assumes the input performs no reflection. Useful under test and for
/// inputs produced by a closed-world toolchain.
#[derive(Debug, Default)]
pub struct TrustingPolicy;

impl ReflectionPolicy for TrustingPolicy {
    fn is_reflective(&self, _callee: MethodRef, _pools: &Pools) -> bool {
        false
    }

    fn native_pins_program(&self) -> bool {
        false
    }
}

/// One unit of tracing work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum WorkItem {
    /// The class identity is reachable.
    MarkClassLive(Type),
    /// The class was observed at an allocation site.
    MarkInstantiated(Type),
    /// The method is callable for the given reason.
    MarkMethodLive(MethodRef, Reason),
    /// Re-resolve one recorded virtual site against the grown
    /// instantiated set.
    ResolveVirtualSite(Type, MethodRef),
}

/// The reachability tracer.
pub struct Enqueuer<'a> {
    app: &'a Application,
    hierarchy: &'a Hierarchy,
    keep: &'a KeepRules,
    facts: &'a LivenessFacts,
    callgraph: &'a CallGraph,
    ir_bodies: &'a DashMap<MethodRef, IrCode>,
    policy: &'a dyn ReflectionPolicy,
    diagnostics: &'a DiagnosticSink,
    /// Classes already fully processed as live.
    class_seen: DashSet<Type>,
    /// Methods whose bodies have been traced.
    traced: DashSet<MethodRef>,
    /// Set once reflection has pinned the whole program.
    world_pinned: DashSet<()>,
}

impl<'a> Enqueuer<'a> {
    /// Wires a tracer over the shared compilation state.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        app: &'a Application,
        hierarchy: &'a Hierarchy,
        keep: &'a KeepRules,
        facts: &'a LivenessFacts,
        callgraph: &'a CallGraph,
        ir_bodies: &'a DashMap<MethodRef, IrCode>,
        policy: &'a dyn ReflectionPolicy,
        diagnostics: &'a DiagnosticSink,
    ) -> Self {
        Self {
            app,
            hierarchy,
            keep,
            facts,
            callgraph,
            ir_bodies,
            policy,
            diagnostics,
            class_seen: DashSet::new(),
            traced: DashSet::new(),
            world_pinned: DashSet::new(),
        }
    }

    /// Runs the trace to its fixpoint.
    ///
    /// # Errors
    ///
    /// Fails when a live method's body cannot be converted to SSA.
    pub fn trace(&self) -> Result<()> {
        let pools = self.app.pools();
        let mut frontier = Vec::new();
        for &ty in &self.keep.matched_classes(self.app) {
            // Kept items survive under their original identity.
            self.facts.pinned.insert(ty);
            frontier.push(WorkItem::MarkClassLive(ty));
            let Some(class) = self.app.class(ty) else {
                continue;
            };
            // A class-level rule keeps the class instantiable from
            // outside.
            frontier.push(WorkItem::MarkInstantiated(ty));
            for method in self.keep.kept_methods(class, pools) {
                frontier.push(WorkItem::MarkMethodLive(method, Reason::KeepRule));
            }
            for field in self.keep.kept_fields(class, pools) {
                self.facts.fields_read.insert(field);
                self.facts.fields_written.insert(field);
            }
        }
        if frontier.is_empty() {
            self.diagnostics
                .warning("no keep rules matched any class; output will be empty");
        }

        let mut wave = 0usize;
        while !frontier.is_empty() {
            frontier.sort_unstable();
            frontier.dedup();
            debug!(wave, items = frontier.len(), "trace wave");

            let results: Vec<Result<Vec<WorkItem>>> = frontier
                .par_iter()
                .map(|item| self.process(item))
                .collect();
            frontier.clear();
            for result in results {
                frontier.extend(result?);
            }
            wave += 1;
        }
        debug!(
            live_methods = self.facts.live_method_count(),
            "trace complete"
        );
        Ok(())
    }

    fn process(&self, item: &WorkItem) -> Result<Vec<WorkItem>> {
        match *item {
            WorkItem::MarkClassLive(ty) => Ok(self.mark_class_live(ty)),
            WorkItem::MarkInstantiated(ty) => self.mark_instantiated(ty),
            WorkItem::MarkMethodLive(method, reason) => self.mark_method_live(method, reason),
            WorkItem::ResolveVirtualSite(receiver, method) => {
                Ok(self.resolve_virtual_site(receiver, method))
            }
        }
    }

    fn mark_class_live(&self, ty: Type) -> Vec<WorkItem> {
        self.facts.live_classes.insert(ty);
        if !self.class_seen.insert(ty) {
            return Vec::new();
        }
        let mut out = Vec::new();
        let Some(class) = self.app.class(ty) else {
            // Library types carry no program obligations.
            return out;
        };
        if let Some(sup) = class.superclass {
            if self.app.is_program_type(sup) {
                out.push(WorkItem::MarkClassLive(sup));
            }
        }
        for &iface in &class.interfaces {
            if self.app.is_program_type(iface) {
                out.push(WorkItem::MarkClassLive(iface));
            }
        }
        for method in &class.methods {
            let name = self.app.pools().method_name(method.reference);
            if name == "<clinit>" {
                out.push(WorkItem::MarkMethodLive(
                    method.reference,
                    Reason::ClassInitializer(ty),
                ));
            }
        }
        out
    }

    fn mark_instantiated(&self, ty: Type) -> Result<Vec<WorkItem>> {
        if !self.facts.instantiated.insert(ty) {
            return Ok(Vec::new());
        }
        let mut out = vec![WorkItem::MarkClassLive(ty)];
        // Instantiation can turn previously unreachable overrides live;
        // every recorded site gets another look.
        for site in self.facts.virtual_sites.iter() {
            let (receiver, method) = *site;
            out.push(WorkItem::ResolveVirtualSite(receiver, method));
        }
        Ok(out)
    }

    fn mark_method_live(&self, method: MethodRef, reason: Reason) -> Result<Vec<WorkItem>> {
        self.facts.justify(method, reason);
        if !self.traced.insert(method) {
            return Ok(Vec::new());
        }

        let pools = self.app.pools();
        let mut out = vec![WorkItem::MarkClassLive(pools.method_data(method).holder)];
        let definition = self.app.definition_of(method)?;

        if definition.flags.contains(MethodFlags::NATIVE) && self.policy.native_pins_program() {
            out.extend(self.pin_whole_program("native method"));
        }
        let Some(code) = &definition.code else {
            return Ok(out);
        };

        // First contact builds the SSA body.
        if let Some(body) = self.ir_bodies.get(&method) {
            out.extend(self.trace_body(method, &body)?);
        } else {
            let builder = IrBuilder::new(pools, self.hierarchy);
            let body = builder.build(method, definition.flags, code)?;
            out.extend(self.trace_body(method, &body)?);
            self.ir_bodies.insert(method, body);
        }
        Ok(out)
    }

    fn trace_body(&self, method: MethodRef, body: &IrCode) -> Result<Vec<WorkItem>> {
        let pools = self.app.pools();
        let mut out = Vec::new();
        for (_, instr) in body.instructions() {
            match instr {
                Instr::NewInstance { ty, .. } => {
                    out.push(WorkItem::MarkInstantiated(*ty));
                }
                Instr::NewArray { ty, .. } => {
                    if let Some(element) = pools.types.element_of(*ty)? {
                        if self.app.is_program_type(element) {
                            out.push(WorkItem::MarkClassLive(element));
                        }
                    }
                }
                Instr::CheckCast { ty, .. } | Instr::InstanceOf { ty, .. } => {
                    if self.app.is_program_type(*ty) {
                        out.push(WorkItem::MarkClassLive(*ty));
                    }
                }
                Instr::StaticGet { field, .. } => {
                    self.facts.fields_read.insert(*field);
                    out.push(WorkItem::MarkClassLive(pools.field_data(*field).holder));
                }
                Instr::StaticPut { field, .. } => {
                    self.facts.fields_written.insert(*field);
                    out.push(WorkItem::MarkClassLive(pools.field_data(*field).holder));
                }
                Instr::InstanceGet { field, .. } => {
                    self.facts.fields_read.insert(*field);
                }
                Instr::InstancePut { field, .. } => {
                    self.facts.fields_written.insert(*field);
                }
                Instr::Invoke {
                    kind,
                    method: callee,
                    ..
                } => {
                    out.extend(self.trace_invoke(method, *kind, *callee));
                }
                _ => {}
            }
        }
        Ok(out)
    }

    fn trace_invoke(
        &self,
        caller: MethodRef,
        kind: InvokeKind,
        callee: MethodRef,
    ) -> Vec<WorkItem> {
        let pools = self.app.pools();
        let mut out = Vec::new();
        match kind {
            InvokeKind::Static | InvokeKind::Direct => match self.app.resolve_method(callee) {
                Resolution::Program(target) => {
                    self.callgraph.add_edge(caller, target);
                    out.push(WorkItem::MarkMethodLive(target, Reason::DirectCall(caller)));
                }
                Resolution::Library => {
                    if self.policy.is_reflective(callee, pools) {
                        out.extend(self.pin_whole_program("reflective call"));
                    }
                }
                Resolution::Unknown => {
                    self.diagnostics.warning(format!(
                        "call to undefined method {}",
                        pools.describe_method(callee)
                    ));
                }
            },
            InvokeKind::Virtual | InvokeKind::Interface => {
                let receiver = pools.method_data(callee).holder;
                self.facts.virtual_sites.insert((receiver, callee));
                out.push(WorkItem::ResolveVirtualSite(receiver, callee));
                if self.policy.is_reflective(callee, pools) {
                    out.extend(self.pin_whole_program("reflective call"));
                }
            }
        }
        out
    }

    fn resolve_virtual_site(&self, receiver: Type, method: MethodRef) -> Vec<WorkItem> {
        let instantiated = self.facts.instantiated_snapshot();
        self.hierarchy
            .dispatch_targets(receiver, method, self.app, &instantiated)
            .into_iter()
            .map(|target| WorkItem::MarkMethodLive(target, Reason::Dispatch(receiver)))
            .collect()
    }

    /// Reflection escape hatch: everything in the program stays.
    fn pin_whole_program(&self, cause: &str) -> Vec<WorkItem> {
        if !self.world_pinned.insert(()) {
            return Vec::new();
        }
        self.diagnostics.warning(format!(
            "{cause} may reach arbitrary classes; keeping the whole program"
        ));
        let mut out = Vec::new();
        for class in self.app.classes() {
            self.facts.pinned.insert(class.ty);
            out.push(WorkItem::MarkClassLive(class.ty));
            out.push(WorkItem::MarkInstantiated(class.ty));
            for method in &class.methods {
                out.push(WorkItem::MarkMethodLive(method.reference, Reason::KeepRule));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{InvokeKind, StackCode, StackOp};
    use crate::model::{ClassDef, ClassFlags, MethodDef, Pools};
    use crate::trace::KeepRule;

    struct Fixture {
        app: Application,
        hierarchy: Hierarchy,
        keep: KeepRules,
    }

    fn trace_fixture(fixture: &Fixture) -> (LivenessFacts, CallGraph, DashMap<MethodRef, IrCode>) {
        let facts = LivenessFacts::default();
        let callgraph = CallGraph::default();
        let ir = DashMap::new();
        let diagnostics = DiagnosticSink::default();
        let policy = TrustingPolicy;
        Enqueuer::new(
            &fixture.app,
            &fixture.hierarchy,
            &fixture.keep,
            &facts,
            &callgraph,
            &ir,
            &policy,
            &diagnostics,
        )
        .trace()
        .unwrap();
        (facts, callgraph, ir)
    }

    fn two_class_fixture() -> (Fixture, MethodRef, MethodRef, MethodRef) {
        let pools = Pools::new();
        let wk = *pools.types.well_known();

        let main_ty = pools.class_type("Lapp/Main;").unwrap();
        let util_ty = pools.class_type("Lapp/Util;").unwrap();

        let helper = pools.method(util_ty, "helper", wk.int, &[]);
        let unused = pools.method(util_ty, "unused", wk.int, &[]);
        let mut util = ClassDef::new(util_ty, ClassFlags::PUBLIC, Some(wk.object));
        util.methods.push(MethodDef {
            reference: helper,
            flags: MethodFlags::PUBLIC | MethodFlags::STATIC,
            code: Some(StackCode::new(
                0,
                vec![StackOp::PushInt(7), StackOp::Return],
            )),
        });
        util.methods.push(MethodDef {
            reference: unused,
            flags: MethodFlags::PUBLIC | MethodFlags::STATIC,
            code: Some(StackCode::new(
                0,
                vec![StackOp::PushInt(9), StackOp::Return],
            )),
        });

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

        let app = Application::build(pools, vec![main, util], Vec::new()).unwrap();
        let hierarchy = Hierarchy::build(&app);
        let keep = KeepRules::new(vec![KeepRule::member("Lapp/Main;", "main")]);
        (
            Fixture {
                app,
                hierarchy,
                keep,
            },
            entry,
            helper,
            unused,
        )
    }

    #[test]
    fn test_direct_call_chain_becomes_live() {
        let (fixture, entry, helper, unused) = two_class_fixture();
        let (facts, callgraph, ir) = trace_fixture(&fixture);

        assert!(facts.is_live(entry));
        assert!(facts.is_live(helper));
        assert!(!facts.is_live(unused));
        assert_eq!(callgraph.callees(entry), vec![helper]);
        assert!(ir.contains_key(&helper));
        assert!(!ir.contains_key(&unused));
    }

    #[test]
    fn test_trace_is_idempotent() {
        let (fixture, ..) = two_class_fixture();
        let (first, _, _) = trace_fixture(&fixture);
        let (second, _, _) = trace_fixture(&fixture);
        assert_eq!(first.live_method_count(), second.live_method_count());
        assert_eq!(
            first.instantiated_snapshot(),
            second.instantiated_snapshot()
        );
    }

    #[test]
    fn test_virtual_dispatch_needs_instantiation() {
        let pools = Pools::new();
        let wk = *pools.types.well_known();

        let base_ty = pools.class_type("Lapp/Base;").unwrap();
        let derived_ty = pools.class_type("Lapp/Derived;").unwrap();
        let base_run = pools.method(base_ty, "run", wk.void, &[]);
        let derived_run = pools.method(derived_ty, "run", wk.void, &[]);
        let derived_init = pools.method(derived_ty, "<init>", wk.void, &[]);

        let mut base = ClassDef::new(base_ty, ClassFlags::PUBLIC, Some(wk.object));
        base.methods.push(MethodDef {
            reference: base_run,
            flags: MethodFlags::PUBLIC,
            code: Some(StackCode::new(1, vec![StackOp::ReturnVoid])),
        });
        let mut derived = ClassDef::new(derived_ty, ClassFlags::PUBLIC, Some(base_ty));
        derived.methods.push(MethodDef {
            reference: derived_run,
            flags: MethodFlags::PUBLIC,
            code: Some(StackCode::new(1, vec![StackOp::ReturnVoid])),
        });
        derived.methods.push(MethodDef {
            reference: derived_init,
            flags: MethodFlags::PUBLIC | MethodFlags::CONSTRUCTOR,
            code: Some(StackCode::new(1, vec![StackOp::ReturnVoid])),
        });

        let main_ty = pools.class_type("Lapp/Main;").unwrap();
        let entry = pools.method(main_ty, "main", wk.void, &[]);
        let mut main = ClassDef::new(main_ty, ClassFlags::PUBLIC, Some(wk.object));
        main.methods.push(MethodDef {
            reference: entry,
            flags: MethodFlags::PUBLIC | MethodFlags::STATIC,
            code: Some(StackCode::new(
                1,
                vec![
                    StackOp::New(derived_ty),
                    StackOp::Dup,
                    StackOp::Invoke(InvokeKind::Direct, derived_init),
                    StackOp::Invoke(InvokeKind::Virtual, base_run),
                    StackOp::ReturnVoid,
                ],
            )),
        });

        let app = Application::build(pools, vec![base, derived, main], Vec::new()).unwrap();
        let hierarchy = Hierarchy::build(&app);
        let keep = KeepRules::new(vec![KeepRule::member("Lapp/Main;", "main")]);
        let fixture = Fixture {
            app,
            hierarchy,
            keep,
        };
        let (facts, _, _) = trace_fixture(&fixture);

        // Only Derived is instantiated, so only its override is live.
        assert!(facts.is_live(derived_run));
        assert!(!facts.is_live(base_run));
    }
}
