//! # sourcepawn-runtime
//!
//! Runtime for executing compiled SourcePawn plugins inside a host process.
//!
//! This crate provides:
//! - Loading of the SPFF binary image format (plain or zlib-compressed)
//! - A per-plugin execution arena holding globals, heap and stack
//! - Native binding and name/address lookup tables
//! - Call marshalling into script functions with by-reference copy-back
//! - A call-stack tracer that feeds error reports to a debug listener
//!
//! ## Collaborators
//!
//! Opcode dispatch is not part of this crate. A backend implements
//! [`ExecutionEngine`] and is handed to the [`Runtime`], which every
//! [`PluginContext`] calls into from [`PluginContext::execute`].
//!
//! ```text
//!   PluginImage ──▶ Runtime::create_context ──▶ PluginContext
//!                                                   │
//!           CallableFunction::prepare ──▶ Invocation┤
//!                                                   ▼
//!                        CallStackTracer ◀── execute ──▶ ExecutionEngine
//!                               │
//!                               ▼
//!                         DebugListener
//! ```

pub mod arena;
pub mod config;
pub mod context;
pub mod debug;
pub mod engine;
pub mod error;
pub mod function;
pub mod image;
pub mod natives;
pub mod runtime;
pub mod symbols;
pub mod tracer;
pub mod types;

pub use arena::Arena;
pub use config::RuntimeConfig;
pub use context::{ContextId, PluginContext};
pub use debug::{DebugLookup, DebugTables};
pub use engine::ExecutionEngine;
pub use error::{error_message, ConfigError, SpError, SpResult};
pub use function::{CallableFunction, Invocation, StringFlags};
pub use image::{Compression, ImageBuilder, PluginImage};
pub use natives::{NativeEntry, NativeFn, NativeInfo, NativeStatus, NativeTable};
pub use runtime::Runtime;
pub use tracer::{CallStackInfo, CallStackTracer, ContextTrace, DebugListener, TracedCall};
pub use types::{Cell, FuncId, UCell, CELL_SIZE, MAX_EXEC_PARAMS, STACK_MARGIN};
