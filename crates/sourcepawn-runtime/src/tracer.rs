//! Cross-context call-stack tracing for error reports.
//!
//! Every top-level [`PluginContext::execute`] opens a *chain*. While an
//! engine steps through code with debugging enabled it reports frame and
//! instruction pointers, which grow and shrink the chain as calls are
//! entered and left. When the execution fails, the chain is handed to the
//! [`DebugListener`] as a [`ContextTrace`] and then discarded.

use crate::context::{ContextId, PluginContext};
use crate::debug::DebugLookup;
use crate::error::{error_message, SpError};
use tracing::warn;

/// Sentinel for a position that has not been recorded yet.
pub const INVALID_CIP: u32 = u32::MAX;

/// One traced call frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TracedCall {
    pub context: ContextId,
    pub cip: u32,
    pub frame: u32,
    pub chain: u32,
}

/// Stack of traced calls partitioned into chains.
#[derive(Debug, Default)]
pub struct CallStackTracer {
    calls: Vec<TracedCall>,
    cur_chain: u32,
}

impl CallStackTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new chain for `context`.
    pub fn push(&mut self, context: ContextId) {
        self.cur_chain += 1;
        self.calls.push(TracedCall {
            context,
            cip: INVALID_CIP,
            frame: INVALID_CIP,
            chain: self.cur_chain,
        });
    }

    /// Record the position of the running code in the current chain.
    pub fn run(&mut self, context: ContextId, frame: u32, cip: u32) {
        let cur_chain = self.cur_chain;
        let Some(top) = self.calls.last_mut() else {
            debug_assert!(false, "tracer ran with no open chain");
            return;
        };
        debug_assert_eq!(top.context, context);
        debug_assert_eq!(top.chain, cur_chain);

        if top.cip == INVALID_CIP {
            top.cip = cip;
            top.frame = frame;
            return;
        }

        let top_frame = top.frame;
        if top_frame > frame {
            // Stack grows down: a lower frame is a nested call.
            self.calls.push(TracedCall {
                context,
                cip,
                frame,
                chain: cur_chain,
            });
        } else if top_frame < frame {
            let len = self.calls.len();
            let is_root = len < 2 || self.calls[len - 2].chain != cur_chain;
            if !is_root {
                self.calls.pop();
            }
        }

        if let Some(top) = self.calls.last_mut() {
            top.cip = cip;
        }
    }

    /// Frames of the current chain, innermost first.
    pub fn chain_frames(&self) -> Vec<TracedCall> {
        self.calls
            .iter()
            .rev()
            .take_while(|c| c.chain == self.cur_chain)
            .copied()
            .collect()
    }

    /// Discard every frame of the current chain and close it.
    pub fn pop_chain(&mut self) {
        debug_assert!(!self.calls.is_empty(), "tracer popped with no open chain");
        while self
            .calls
            .last()
            .is_some_and(|c| c.chain == self.cur_chain)
        {
            self.calls.pop();
        }
        self.cur_chain = self.cur_chain.saturating_sub(1);
    }

    /// Number of chains currently open.
    pub fn context_call_count(&self) -> u32 {
        self.calls.last().map_or(0, |c| c.chain)
    }

    /// Total traced frames across all chains.
    pub fn depth(&self) -> usize {
        self.calls.len()
    }

    pub fn top(&self) -> Option<&TracedCall> {
        self.calls.last()
    }
}

/// One resolved frame of a trace. Each part is `None` when its own lookup
/// failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallStackInfo<'a> {
    pub filename: Option<&'a str>,
    pub function: Option<&'a str>,
    pub line: Option<u32>,
}

/// Error report for a failed execution, with a restartable frame iterator.
pub struct ContextTrace<'a> {
    context: &'a PluginContext,
    error: SpError,
    message: Option<&'a str>,
    native: Option<u32>,
    frames: Vec<TracedCall>,
    cursor: usize,
}

impl<'a> ContextTrace<'a> {
    pub fn new(
        context: &'a PluginContext,
        error: SpError,
        message: Option<&'a str>,
        native: Option<u32>,
        frames: Vec<TracedCall>,
    ) -> Self {
        Self {
            context,
            error,
            message,
            native,
            frames,
            cursor: 0,
        }
    }

    pub fn error_code(&self) -> i32 {
        self.error.code()
    }

    pub fn error(&self) -> SpError {
        self.error
    }

    pub fn error_string(&self) -> &'static str {
        error_message(self.error.code()).unwrap_or("Invalid error code")
    }

    /// Message supplied by the failing native, if any.
    pub fn custom_error_string(&self) -> Option<&'a str> {
        self.message
    }

    pub fn debug_info_available(&self) -> bool {
        self.context.debug_info().is_some()
    }

    /// Index and name of the native that raised the error.
    pub fn last_native(&self) -> Option<(u32, &'a str)> {
        let index = self.native?;
        let entry = self.context.natives().get_native_by_index(index).ok()?;
        Some((index, entry.name.as_str()))
    }

    /// Restart frame iteration from the innermost frame.
    pub fn reset_trace(&mut self) {
        self.cursor = 0;
    }

    /// Number of recorded frames, resolvable or not.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

impl<'a> Iterator for ContextTrace<'a> {
    type Item = CallStackInfo<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let frame = *self.frames.get(self.cursor)?;
        if frame.cip == INVALID_CIP {
            return None;
        }
        let info = self.context.debug_info()?;
        self.cursor += 1;
        Some(CallStackInfo {
            filename: info.lookup_file(frame.cip).ok(),
            function: info.lookup_function(frame.cip).ok(),
            line: info.lookup_line(frame.cip).ok(),
        })
    }
}

/// Receiver of execution error reports.
pub trait DebugListener {
    /// Called once per failed top-level execution.
    fn on_context_execute_error(&self, context: &PluginContext, trace: &mut ContextTrace<'_>);

    /// Called for problems detected around an execution, such as leaks.
    fn on_code_error(&self, context: &PluginContext, code_addr: u32, error: SpError, message: &str) {
        warn!(
            context = %context.id(),
            code_addr,
            error = error.code(),
            "{}",
            message
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: ContextId = ContextId(1);
    const B: ContextId = ContextId(2);

    #[test]
    fn test_first_run_records_position() {
        let mut t = CallStackTracer::new();
        t.push(A);
        t.run(A, 1000, 40);
        assert_eq!(t.depth(), 1);
        assert_eq!(t.top().unwrap().cip, 40);
        assert_eq!(t.top().unwrap().frame, 1000);
    }

    #[test]
    fn test_deeper_frame_pushes_and_shallower_pops() {
        let mut t = CallStackTracer::new();
        t.push(A);
        t.run(A, 1000, 8);
        t.run(A, 900, 64);
        assert_eq!(t.depth(), 2);
        t.run(A, 900, 72);
        assert_eq!(t.depth(), 2);
        assert_eq!(t.top().unwrap().cip, 72);
        t.run(A, 1000, 16);
        assert_eq!(t.depth(), 1);
        assert_eq!(t.top().unwrap().cip, 16);
    }

    #[test]
    fn test_chain_root_is_never_popped() {
        let mut t = CallStackTracer::new();
        t.push(A);
        t.run(A, 1000, 8);
        t.push(B);
        t.run(B, 500, 4);
        t.run(B, 600, 12);
        assert_eq!(t.depth(), 2);
        assert_eq!(t.top().unwrap().context, B);
    }

    #[test]
    fn test_nested_chain_unwinds_alone() {
        let mut t = CallStackTracer::new();
        t.push(A);
        t.run(A, 1000, 8);
        t.run(A, 900, 32);
        t.push(B);
        t.run(B, 400, 4);
        t.run(B, 300, 20);
        assert_eq!(t.context_call_count(), 2);

        let frames = t.chain_frames();
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.context == B));
        assert_eq!(frames[0].cip, 20);

        t.pop_chain();
        assert_eq!(t.context_call_count(), 1);
        assert_eq!(t.depth(), 2);
        t.run(A, 1000, 12);
        assert_eq!(t.depth(), 1);
        assert_eq!(t.top().unwrap().cip, 12);
    }
}
