//! Fixtures shared by the host integration tests.

#![allow(dead_code)]

use sourcepawn_runtime::debug::{DebugFile, DebugLine, DebugSymbol};
use sourcepawn_runtime::image::format::SYMBOL_FUNCTION;
use sourcepawn_runtime::{
    Cell, DebugTables, ExecutionEngine, ImageBuilder, PluginContext, Runtime, RuntimeConfig,
    SpError, SpResult,
};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

type Script = Box<dyn Fn(&mut PluginContext) -> SpResult<Cell>>;

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

/// Pops the arguments and forwards them to the native named `name`.
pub fn forward_to(name: &'static str) -> impl Fn(&mut PluginContext) -> SpResult<Cell> {
    move |ctx| {
        let params = ctx.pop_params()?;
        let index = ctx.find_native_by_name(name)?;
        ctx.invoke_native(index, &params)
    }
}

/// Pops the arguments and returns their sum.
pub fn sum_params(ctx: &mut PluginContext) -> SpResult<Cell> {
    Ok(ctx.pop_params()?.iter().sum())
}

/// 128 bytes of code, 16 bytes of data inside 1 KiB of memory.
pub fn base_builder() -> ImageBuilder {
    ImageBuilder::new()
        .code(vec![0; 0x80])
        .data(vec![0; 16], 1024)
}

/// Write an image built from `builder` to `dir/filename`.
pub fn write_plugin(dir: &Path, filename: &str, builder: &ImageBuilder) -> PathBuf {
    let path = dir.join(filename);
    fs::write(&path, builder.build().unwrap()).unwrap();
    path
}

/// One file, two functions: OnPluginStart at 0x10..0x40 and Helper at
/// 0x40..0x80.
pub fn sample_debug_tables() -> DebugTables {
    let function = |name: &str, start: u32, end: u32| DebugSymbol {
        addr: start as i32,
        tag_id: 0,
        code_start: start,
        code_end: end,
        ident: SYMBOL_FUNCTION,
        vclass: 0,
        name: name.to_string(),
        dims: vec![],
    };
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
            function("OnPluginStart", 0x10, 0x40),
            function("Helper", 0x40, 0x80),
        ],
    }
}
