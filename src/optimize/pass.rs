//! The pass interface.

use crate::{
    ir::IrCode,
    model::{Application, MethodRef},
    optimize::CompilerContext,
    Result,
};

/// One optimization pass.
///
/// Per-method passes implement [`run_on_method`](IrPass::run_on_method)
/// and run in parallel, each holding exclusive ownership of the body it
/// was given. Global passes implement [`run_global`](IrPass::run_global)
/// instead and run alone, with mutable access to the application model;
/// they are how structural changes (merging, unboxing) happen.
pub trait IrPass: Send + Sync {
    /// Stable pass name for logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Whether the pass needs exclusive, global access.
    fn is_global(&self) -> bool {
        false
    }

    /// Called once before the pass's first wave.
    fn initialize(&mut self, _ctx: &CompilerContext, _app: &Application) -> Result<()> {
        Ok(())
    }

    /// Transforms one method body. Returns `true` when anything
    /// changed, which keeps the wave loop running toward fixpoint.
    fn run_on_method(
        &self,
        _body: &mut IrCode,
        _method: MethodRef,
        _ctx: &CompilerContext,
        _app: &Application,
    ) -> Result<bool> {
        Ok(false)
    }

    /// Transforms the whole application. Returns `true` when anything
    /// changed.
    fn run_global(&mut self, _ctx: &CompilerContext, _app: &mut Application) -> Result<bool> {
        Ok(false)
    }

    /// Called once after the pass's last wave.
    fn finalize(&mut self, _ctx: &CompilerContext, _app: &Application) -> Result<()> {
        Ok(())
    }
}
