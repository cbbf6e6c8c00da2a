//! The execution backend seam.

use crate::context::PluginContext;
use crate::error::SpResult;
use crate::types::Cell;

/// Executes script code on behalf of a context.
///
/// [`PluginContext::execute`] pushes the parameter-count prologue, opens a
/// tracer chain and then hands control here. An engine reads its arguments
/// from the stack (see [`PluginContext::pop_params`]), dispatches natives
/// through [`PluginContext::invoke_native`], and while the context is
/// debugging calls [`PluginContext::debug_break`] between instructions.
///
/// On success the engine must have popped the prologue and the arguments,
/// and left `hp` where it found it. On failure the context restores both.
pub trait ExecutionEngine {
    fn execute(&self, ctx: &mut PluginContext, code_addr: u32) -> SpResult<Cell>;
}
