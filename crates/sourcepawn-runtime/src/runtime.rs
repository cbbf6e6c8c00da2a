//! Process-wide runtime: engine, tracer and debug listener shared by every
//! context it creates.

use crate::config::RuntimeConfig;
use crate::context::{ContextId, PluginContext};
use crate::engine::ExecutionEngine;
use crate::error::{SpError, SpResult};
use crate::image::PluginImage;
use crate::tracer::{CallStackTracer, ContextTrace, DebugListener};
use std::cell::{Cell as StdCell, RefCell};
use std::fmt;
use std::path::Path;
use std::rc::Rc;
use tracing::{debug, info, warn};

/// Owner of the collaborators every context calls into.
///
/// A runtime and its contexts live on one thread. Contexts hold an `Rc`
/// back to the runtime that created them.
pub struct Runtime {
    config: RuntimeConfig,
    engine: Box<dyn ExecutionEngine>,
    tracer: RefCell<CallStackTracer>,
    listener: RefCell<Option<Rc<dyn DebugListener>>>,
    next_context: StdCell<u32>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("tracer", &self.tracer)
            .field("has_listener", &self.listener.borrow().is_some())
            .finish()
    }
}

impl Runtime {
    pub fn new(config: RuntimeConfig, engine: Box<dyn ExecutionEngine>) -> Rc<Self> {
        info!(debug = config.debug, report_leaks = config.report_leaks, "Runtime started");
        Rc::new(Self {
            config,
            engine,
            tracer: RefCell::new(CallStackTracer::new()),
            listener: RefCell::new(None),
            next_context: StdCell::new(1),
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn engine(&self) -> &dyn ExecutionEngine {
        self.engine.as_ref()
    }

    /// Install the listener for error reports and return the previous one.
    pub fn set_debug_listener(&self, listener: Option<Rc<dyn DebugListener>>) -> Option<Rc<dyn DebugListener>> {
        std::mem::replace(&mut *self.listener.borrow_mut(), listener)
    }

    pub fn debug_listener(&self) -> Option<Rc<dyn DebugListener>> {
        self.listener.borrow().clone()
    }

    /// Create a context running `image`.
    pub fn create_context(self: &Rc<Self>, image: Rc<PluginImage>) -> SpResult<PluginContext> {
        let id = ContextId(self.next_context.get());
        self.next_context.set(id.0.wrapping_add(1));
        PluginContext::new(id, Rc::clone(self), image)
    }

    /// Load the image at `path` and create a context for it.
    pub fn load_plugin(self: &Rc<Self>, path: &Path) -> SpResult<PluginContext> {
        let image = PluginImage::load_file(path)?;
        self.create_context(Rc::new(image))
    }

    // ---- tracing ------------------------------------------------------

    pub(crate) fn push_tracer(&self, context: ContextId) {
        self.tracer.borrow_mut().push(context);
    }

    pub(crate) fn run_tracer(&self, context: ContextId, frame: u32, cip: u32) {
        self.tracer.borrow_mut().run(context, frame, cip);
    }

    /// Close the current chain, reporting `error` to the listener first.
    pub(crate) fn pop_tracer(&self, context: &PluginContext, error: Option<SpError>, message: Option<&str>) {
        if let Some(error) = error {
            let frames = self.tracer.borrow().chain_frames();
            let listener = self.debug_listener();
            match listener {
                Some(listener) => {
                    let mut trace =
                        ContextTrace::new(context, error, message, context.failing_native(), frames);
                    listener.on_context_execute_error(context, &mut trace);
                }
                None => debug!(
                    context = %context.id(),
                    error = error.code(),
                    "Execution failed with no debug listener installed"
                ),
            }
        }
        self.tracer.borrow_mut().pop_chain();
    }

    /// Number of executions currently nested on this runtime.
    pub fn context_call_count(&self) -> u32 {
        self.tracer.borrow().context_call_count()
    }

    pub(crate) fn report_code_error(&self, context: &PluginContext, code_addr: u32, error: SpError, message: &str) {
        match self.debug_listener() {
            Some(listener) => listener.on_code_error(context, code_addr, error, message),
            None => warn!(context = %context.id(), code_addr, error = error.code(), "{}", message),
        }
    }
}
