//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use sourcepawn_runtime::debug::{DebugFile, DebugLine, DebugSymbol};
use sourcepawn_runtime::image::format::SYMBOL_FUNCTION;
use sourcepawn_runtime::{
    Cell, ContextTrace, DebugListener, DebugTables, ExecutionEngine, ImageBuilder, PluginContext,
    PluginImage, Runtime, RuntimeConfig, SpError, SpResult,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub type Script = Box<dyn Fn(&mut PluginContext) -> SpResult<Cell>>;

/// Engine that runs a Rust closure per code address.
#[derive(Default)]
pub struct ScriptedEngine {
    scripts: HashMap<u32, Script>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script<F>(mut self, code_addr: u32, f: F) -> Self
    where
        F: Fn(&mut PluginContext) -> SpResult<Cell> + 'static,
    {
        self.scripts.insert(code_addr, Box::new(f));
        self
    }
}

impl ExecutionEngine for ScriptedEngine {
    fn execute(&self, ctx: &mut PluginContext, code_addr: u32) -> SpResult<Cell> {
        match self.scripts.get(&code_addr) {
            Some(script) => script(ctx),
            None => Err(SpError::InvalidAddress),
        }
    }
}

pub fn runtime(engine: ScriptedEngine) -> Rc<Runtime> {
    Runtime::new(RuntimeConfig::default(), Box::new(engine))
}

pub fn debug_runtime(engine: ScriptedEngine) -> Rc<Runtime> {
    let config = RuntimeConfig {
        debug: true,
        ..RuntimeConfig::default()
    };
    Runtime::new(config, Box::new(engine))
}

/// A 16-byte data section inside 1 KiB of memory.
pub fn base_builder() -> ImageBuilder {
    ImageBuilder::new()
        .code(vec![0; 0x80])
        .data(vec![0; 16], 1024)
}

pub fn load(builder: &ImageBuilder) -> Rc<PluginImage> {
    let bytes = builder.build().unwrap();
    Rc::new(PluginImage::load_bytes(bytes).unwrap())
}

pub fn sample_debug_tables() -> DebugTables {
    DebugTables {
        files: vec![DebugFile {
            addr: 0,
            name: "plugin.sp".to_string(),
        }],
        lines: vec![
            DebugLine { addr: 0x10, line: 11 },
            DebugLine { addr: 0x18, line: 12 },
            DebugLine { addr: 0x40, line: 30 },
        ],
        symbols: vec![
            DebugSymbol {
                addr: 0x10,
                tag_id: 0,
                code_start: 0x10,
                code_end: 0x40,
                ident: SYMBOL_FUNCTION,
                vclass: 0,
                name: "OnPluginStart".to_string(),
                dims: vec![],
            },
            DebugSymbol {
                addr: 0x40,
                tag_id: 0,
                code_start: 0x40,
                code_end: 0x80,
                ident: SYMBOL_FUNCTION,
                vclass: 0,
                name: "Helper".to_string(),
                dims: vec![],
            },
        ],
    }
}

/// One resolved frame as seen by a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub file: Option<String>,
    pub function: Option<String>,
    pub line: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecReport {
    pub context: u32,
    pub error: SpError,
    pub message: Option<String>,
    pub native: Option<String>,
    pub debug_available: bool,
    pub frames: Vec<Frame>,
    pub call_depth: u32,
}

/// Listener that records everything it is told.
#[derive(Default)]
pub struct RecordingListener {
    pub executions: RefCell<Vec<ExecReport>>,
    pub code_errors: RefCell<Vec<(SpError, String)>>,
}

impl DebugListener for RecordingListener {
    fn on_context_execute_error(&self, context: &PluginContext, trace: &mut ContextTrace<'_>) {
        let frames = trace
            .by_ref()
            .map(|f| Frame {
                file: f.filename.map(str::to_string),
                function: f.function.map(str::to_string),
                line: f.line,
            })
            .collect();
        self.executions.borrow_mut().push(ExecReport {
            context: context.id().0,
            error: trace.error(),
            message: trace.custom_error_string().map(str::to_string),
            native: trace.last_native().map(|(_, name)| name.to_string()),
            debug_available: trace.debug_info_available(),
            frames,
            call_depth: context.runtime().context_call_count(),
        });
    }

    fn on_code_error(&self, _context: &PluginContext, _code_addr: u32, error: SpError, message: &str) {
        self.code_errors
            .borrow_mut()
            .push((error, message.to_string()));
    }
}

pub fn listen(runtime: &Runtime) -> Rc<RecordingListener> {
    let listener = Rc::new(RecordingListener::default());
    runtime.set_debug_listener(Some(listener.clone() as Rc<dyn DebugListener>));
    listener
}
