//! Execution context: one running instance of a plugin image.

use crate::arena::Arena;
use crate::debug::DebugTables;
use crate::error::{SpError, SpResult};
use crate::function::CallableFunction;
use crate::image::PluginImage;
use crate::natives::{NativeEntry, NativeFn, NativeInfo, NativeTable};
use crate::runtime::Runtime;
use crate::symbols::{public_func_id, public_index, PublicInfo, PubvarInfo};
use crate::types::{Cell, FuncId, CELL_SIZE};
use std::borrow::Cow;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, trace};

/// Identifier of a context, unique within its [`Runtime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u32);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Host hook invoked on every debug break, after the tracer has run.
pub type DebugBreakFn = Rc<dyn Fn(&PluginContext, u32, u32)>;

/// A plugin instance: memory arena, natives, and call state.
pub struct PluginContext {
    id: ContextId,
    runtime: Rc<Runtime>,
    image: Rc<PluginImage>,
    arena: Arena,
    natives: NativeTable,
    functions: Vec<Option<CallableFunction>>,
    generation: u32,
    debugging: bool,
    paused: bool,
    pushcount: u32,
    native_error: Option<SpError>,
    native_index: Option<u32>,
    in_exec: bool,
    custom_message: Option<String>,
    null_string: Option<Cell>,
    null_vector: Option<Cell>,
    debug_break: Option<DebugBreakFn>,
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("id", &self.id)
            .field("arena", &self.arena)
            .field("debugging", &self.debugging)
            .field("paused", &self.paused)
            .field("in_exec", &self.in_exec)
            .finish()
    }
}

fn pubvar_address(image: &PluginImage, name: &str) -> Option<Cell> {
    let symbols = image.symbols();
    let index = symbols.find_pubvar_by_name(name).ok()?;
    symbols
        .get_pubvar_by_index(index)
        .ok()
        .map(|p| p.offset as Cell)
}

impl PluginContext {
    pub(crate) fn new(id: ContextId, runtime: Rc<Runtime>, image: Rc<PluginImage>) -> SpResult<Self> {
        let arena = Arena::new(image.data(), image.memory_size())?;
        let natives = NativeTable::from_names(image.natives());
        let debugging = runtime.config().debug && image.debug().is_some();

        debug!(
            context = %id,
            memory = image.memory_size(),
            natives = natives.natives_num(),
            debugging,
            "Created plugin context"
        );

        Ok(Self {
            id,
            functions: vec![None; image.symbols().publics_num() as usize],
            null_string: pubvar_address(&image, "NULL_STRING"),
            null_vector: pubvar_address(&image, "NULL_VECTOR"),
            runtime,
            image,
            arena,
            natives,
            generation: 0,
            debugging,
            paused: false,
            pushcount: 0,
            native_error: None,
            native_index: None,
            in_exec: false,
            custom_message: None,
            debug_break: None,
        })
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn runtime(&self) -> &Rc<Runtime> {
        &self.runtime
    }

    pub fn image(&self) -> &Rc<PluginImage> {
        &self.image
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut Arena {
        &mut self.arena
    }

    pub fn is_debugging(&self) -> bool {
        self.debugging
    }

    /// Debug tables, available only while debugging.
    pub fn debug_info(&self) -> Option<&DebugTables> {
        if self.debugging {
            self.image.debug()
        } else {
            None
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_in_exec(&self) -> bool {
        self.in_exec
    }

    /// Pushes not yet consumed by an execution.
    pub fn pushcount(&self) -> u32 {
        self.pushcount
    }

    /// Error recorded by the last native in the current execution.
    pub fn native_error(&self) -> Option<SpError> {
        self.native_error
    }

    /// Slot of the native that raised the current error, if one did.
    pub(crate) fn failing_native(&self) -> Option<u32> {
        self.native_error.and(self.native_index)
    }

    // ---- memory -------------------------------------------------------

    pub fn heap_alloc(&mut self, cells: u32) -> SpResult<Cell> {
        self.arena.heap_alloc(cells)
    }

    pub fn heap_pop(&mut self, local_addr: Cell) -> SpResult<()> {
        self.arena.heap_pop(local_addr)
    }

    pub fn heap_release(&mut self, local_addr: Cell) -> SpResult<()> {
        self.arena.heap_release(local_addr)
    }

    pub fn local_to_phys_addr(&self, local_addr: Cell) -> SpResult<usize> {
        self.arena.check_address(local_addr)
    }

    pub fn local_to_string(&self, local_addr: Cell) -> SpResult<Cow<'_, str>> {
        self.arena
            .read_string(local_addr)
            .map(String::from_utf8_lossy)
    }

    /// As [`PluginContext::local_to_string`], but the `NULL_STRING` pubvar
    /// reads as no string at all.
    pub fn local_to_string_null(&self, local_addr: Cell) -> SpResult<Option<Cow<'_, str>>> {
        let s = self.local_to_string(local_addr)?;
        if Some(local_addr) == self.null_string {
            return Ok(None);
        }
        Ok(Some(s))
    }

    pub fn string_to_local(&mut self, local_addr: Cell, max_bytes: usize, source: &str) -> SpResult<()> {
        self.arena
            .write_string(local_addr, max_bytes, source.as_bytes())
            .map(|_| ())
    }

    /// Returns the number of bytes written, excluding the terminator.
    pub fn string_to_local_utf8(&mut self, local_addr: Cell, max_bytes: usize, source: &str) -> SpResult<usize> {
        self.arena.write_string_utf8(local_addr, max_bytes, source)
    }

    /// Address of the `NULL_VECTOR` pubvar, if the image exports one.
    pub fn null_vector(&self) -> Option<Cell> {
        self.null_vector
    }

    pub fn null_string(&self) -> Option<Cell> {
        self.null_string
    }

    // ---- pushing ------------------------------------------------------

    pub fn push_cell(&mut self, value: Cell) -> SpResult<()> {
        self.arena.push(value)?;
        self.pushcount += 1;
        Ok(())
    }

    /// Push every cell of `cells` in order; nothing stays pushed on failure.
    pub fn push_cells_from_array(&mut self, cells: &[Cell]) -> SpResult<()> {
        let save_sp = self.arena.sp();
        let save_count = self.pushcount;
        for &cell in cells {
            if let Err(err) = self.push_cell(cell) {
                self.arena.restore(save_sp, self.arena.hp());
                self.pushcount = save_count;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Copy `cells` into a fresh heap allocation and push its address.
    pub fn push_cell_array(&mut self, cells: &[Cell]) -> SpResult<Cell> {
        let local = self.heap_alloc(cells.len() as u32)?;
        self.arena.write_cells(local, cells)?;
        if let Err(err) = self.push_cell(local) {
            self.arena.heap_release(local)?;
            return Err(err);
        }
        Ok(local)
    }

    /// Copy `string` into a fresh heap allocation and push its address.
    pub fn push_string(&mut self, string: &str) -> SpResult<Cell> {
        let len = string.len();
        let cells = (len + CELL_SIZE as usize) / CELL_SIZE as usize;
        let local = self.heap_alloc(cells as u32)?;
        self.arena.write_string(local, len + 1, string.as_bytes())?;
        if let Err(err) = self.push_cell(local) {
            self.arena.heap_release(local)?;
            return Err(err);
        }
        Ok(local)
    }

    // ---- execution ----------------------------------------------------

    /// Run the code at `code_addr` with the pending pushes as arguments.
    ///
    /// On failure the stack and heap are restored to where they were before
    /// the arguments were pushed. On success they are expected to be back
    /// there already; a mismatch is reported as a leak, not corrected.
    pub fn execute(&mut self, code_addr: u32) -> SpResult<Cell> {
        if self.paused {
            self.discard_pushes();
            return Err(SpError::NotRunnable);
        }

        let pushcount = self.pushcount;
        if let Err(err) = self.push_cell(pushcount as Cell) {
            self.discard_pushes();
            self.runtime.report_code_error(
                self,
                code_addr,
                err,
                "Stack error; cannot complete execution!",
            );
            return Err(SpError::NotRunnable);
        }
        self.pushcount = 0;

        let save_sp = self.arena.sp() + (pushcount as Cell + 1) * CELL_SIZE;
        let save_hp = self.arena.hp();
        let save_native = self.native_index;
        let was_exec = self.in_exec;

        self.native_error = None;
        self.native_index = None;
        self.in_exec = true;
        self.custom_message = None;

        trace!(context = %self.id, code_addr, params = pushcount, "Executing");

        let runtime = Rc::clone(&self.runtime);
        runtime.push_tracer(self.id);
        let result = runtime.engine().execute(self, code_addr);
        self.in_exec = was_exec;

        let message = self.custom_message.take();
        runtime.pop_tracer(self, result.err(), message.as_deref());

        match result {
            Ok(_) if runtime.config().report_leaks => {
                let (sp, hp) = (self.arena.sp(), self.arena.hp());
                if sp != save_sp {
                    runtime.report_code_error(
                        self,
                        code_addr,
                        SpError::StackLeak,
                        &format!("Stack leak detected: sp:{} should be {}!", sp, save_sp),
                    );
                }
                if hp != save_hp {
                    runtime.report_code_error(
                        self,
                        code_addr,
                        SpError::HeapLeak,
                        &format!("Heap leak detected: hp:{} should be {}!", hp, save_hp),
                    );
                }
            }
            Ok(_) => {}
            Err(_) => self.arena.restore(save_sp, save_hp),
        }

        self.native_index = save_native;
        self.native_error = None;
        self.custom_message = None;

        result
    }

    /// Drop the pending pushes of a call that will not run.
    fn discard_pushes(&mut self) {
        let sp = self.arena.sp() + self.pushcount as Cell * CELL_SIZE;
        self.arena.restore(sp, self.arena.hp());
        self.pushcount = 0;
    }

    /// Record a native failure with a custom message. Ignored outside an
    /// execution. Returns the value the native should return.
    pub fn throw_native_error(&mut self, message: impl Into<String>) -> Cell {
        self.throw_native_error_ex(SpError::Native, Some(message.into()))
    }

    pub fn throw_native_error_ex(&mut self, error: SpError, message: Option<String>) -> Cell {
        if !self.in_exec {
            return 0;
        }
        self.native_error = Some(error);
        if message.is_some() {
            self.custom_message = message;
        }
        0
    }

    /// Call the native bound at `index` with `args`, as an engine does for
    /// a native call instruction.
    pub fn invoke_native(&mut self, index: u32, args: &[Cell]) -> SpResult<Cell> {
        self.native_index = Some(index);
        let func = match self.natives.function(index) {
            Ok(func) => func,
            Err(err) => {
                self.native_error = Some(err);
                return Err(err);
            }
        };

        let save_sp = self.arena.sp();
        let save_hp = self.arena.hp();
        self.native_error = None;

        let mut params = Vec::with_capacity(args.len() + 1);
        params.push(args.len() as Cell);
        params.extend_from_slice(args);

        let result = func(self, &params);

        if self.native_error.is_none() {
            if self.arena.sp() != save_sp {
                self.native_error = Some(SpError::StackLeak);
            } else if self.arena.hp() != save_hp {
                self.native_error = Some(SpError::HeapLeak);
            }
        }
        match self.native_error {
            Some(err) => Err(err),
            None => Ok(result),
        }
    }

    /// Pop the argument-count prologue and the arguments it announces.
    pub fn pop_params(&mut self) -> SpResult<Vec<Cell>> {
        let count = self.arena.pop()?;
        if count < 0 {
            return Err(SpError::InvalidInstruction);
        }
        (0..count).map(|_| self.arena.pop()).collect()
    }

    /// Debug hook for engines, called between instructions while debugging.
    pub fn debug_break(&self, frame: u32, cip: u32) {
        self.runtime.run_tracer(self.id, frame, cip);
        if let Some(hook) = &self.debug_break {
            hook(self, frame, cip);
        }
    }

    /// Install a debug break hook and return the previous one.
    pub fn set_debug_break(&mut self, hook: Option<DebugBreakFn>) -> SpResult<Option<DebugBreakFn>> {
        if !self.debugging {
            return Err(SpError::NotDebugging);
        }
        Ok(std::mem::replace(&mut self.debug_break, hook))
    }

    // ---- natives ------------------------------------------------------

    pub fn natives(&self) -> &NativeTable {
        &self.natives
    }

    pub fn natives_mut(&mut self) -> &mut NativeTable {
        &mut self.natives
    }

    pub fn find_native_by_name(&self, name: &str) -> SpResult<u32> {
        self.natives.find_native_by_name(name)
    }

    pub fn get_native_by_index(&self, index: u32) -> SpResult<&NativeEntry> {
        self.natives.get_native_by_index(index)
    }

    pub fn natives_num(&self) -> u32 {
        self.natives.natives_num()
    }

    pub fn bind_natives(&mut self, natives: &[NativeInfo], overwrite: bool) {
        self.natives.bind_natives(natives, overwrite)
    }

    pub fn bind_native(&mut self, native: &NativeInfo) -> SpResult<()> {
        self.natives.bind_native(native)
    }

    pub fn bind_native_to_index(&mut self, index: u32, func: NativeFn) -> SpResult<()> {
        self.natives.bind_native_to_index(index, func)
    }

    pub fn bind_native_to_any(&mut self, func: NativeFn) {
        self.natives.bind_native_to_any(func)
    }

    // ---- publics and pubvars ------------------------------------------

    pub fn find_public_by_name(&self, name: &str) -> SpResult<u32> {
        self.image.symbols().find_public_by_name(name)
    }

    pub fn get_public_by_index(&self, index: u32) -> SpResult<&PublicInfo> {
        self.image.symbols().get_public_by_index(index)
    }

    pub fn publics_num(&self) -> u32 {
        self.image.symbols().publics_num()
    }

    pub fn find_pubvar_by_name(&self, name: &str) -> SpResult<u32> {
        self.image.symbols().find_pubvar_by_name(name)
    }

    pub fn get_pubvar_by_index(&self, index: u32) -> SpResult<&PubvarInfo> {
        self.image.symbols().get_pubvar_by_index(index)
    }

    /// Local address of the pubvar at `index`.
    pub fn get_pubvar_addrs(&self, index: u32) -> SpResult<Cell> {
        let pubvar = self.get_pubvar_by_index(index)?;
        let local = pubvar.offset as Cell;
        self.arena.check_address(local)?;
        Ok(local)
    }

    pub fn pubvars_num(&self) -> u32 {
        self.image.symbols().pubvars_num()
    }

    // ---- functions ----------------------------------------------------

    /// Resolve a public function id through the function cache, refreshing
    /// an entry invalidated by a reload.
    pub fn get_function_by_id(&mut self, func_id: FuncId) -> Option<CallableFunction> {
        let index = public_index(func_id)?;
        let code_offset = self.get_public_by_index(index).ok()?.code_offset;
        let slot = self.functions.get_mut(index as usize)?;
        match slot {
            Some(f) if !f.is_invalidated() => {}
            _ => {
                *slot = Some(CallableFunction::new(
                    self.id,
                    func_id,
                    code_offset,
                    self.generation,
                ))
            }
        }
        *slot
    }

    pub fn get_function_by_name(&mut self, name: &str) -> Option<CallableFunction> {
        let index = self.find_public_by_name(name).ok()?;
        self.get_function_by_id(public_func_id(index))
    }

    /// Current code address of `function` in this context.
    pub(crate) fn resolve_function(&mut self, function: &CallableFunction) -> SpResult<u32> {
        if function.context() != self.id {
            return Err(SpError::Param);
        }
        if function.generation() == self.generation {
            return Ok(function.code_addr());
        }
        self.get_function_by_id(function.func_id())
            .map(|f| f.code_addr())
            .ok_or(SpError::NotRunnable)
    }

    /// Whether `function` was resolved against the current image.
    pub fn is_function_current(&self, function: &CallableFunction) -> bool {
        function.context() == self.id && function.generation() == self.generation
    }

    /// Swap in a new image for this context.
    ///
    /// Memory is rebuilt from the new image, native bindings carry over by
    /// name, and cached functions are invalidated rather than dropped.
    pub fn reload(&mut self, image: Rc<PluginImage>) -> SpResult<()> {
        if self.in_exec {
            return Err(SpError::NotRunnable);
        }

        let arena = Arena::new(image.data(), image.memory_size())?;
        let mut natives = NativeTable::from_names(image.natives());
        natives.inherit_bindings(&self.natives);

        self.functions
            .resize(image.symbols().publics_num() as usize, None);
        for f in self.functions.iter_mut().flatten() {
            f.invalidate();
        }

        self.generation += 1;
        self.arena = arena;
        self.natives = natives;
        self.null_string = pubvar_address(&image, "NULL_STRING");
        self.null_vector = pubvar_address(&image, "NULL_VECTOR");
        self.debugging = self.runtime.config().debug && image.debug().is_some();
        if !self.debugging {
            self.debug_break = None;
        }
        self.image = image;
        self.pushcount = 0;
        self.native_error = None;
        self.native_index = None;
        self.custom_message = None;

        debug!(context = %self.id, generation = self.generation, "Reloaded plugin context");
        Ok(())
    }
}
