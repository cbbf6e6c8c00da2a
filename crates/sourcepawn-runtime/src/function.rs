//! Calling script functions from the host.
//!
//! A [`CallableFunction`] is a cached handle on a public function. Calls are
//! built with [`CallableFunction::prepare`], which returns an [`Invocation`]
//! collecting up to [`MAX_EXEC_PARAMS`] parameters. By-reference parameters
//! borrow caller memory and receive the script's changes after a successful
//! call.
//!
//! ```ignore
//! let func = ctx.get_function_by_name("OnClientSay").unwrap();
//! let mut health = 100;
//! let mut call = func.prepare(&mut ctx);
//! call.push_cell(client)?;
//! call.push_cell_by_ref(&mut health, true)?;
//! call.push_string("hello")?;
//! let result = call.execute()?;
//! ```

use crate::context::{ContextId, PluginContext};
use crate::error::{SpError, SpResult};
use crate::types::{Cell, FuncId, CELL_SIZE, MAX_EXEC_PARAMS};
use std::ops::BitOr;
use tracing::debug;

/// How a string parameter is placed in script memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StringFlags(u32);

impl StringFlags {
    /// Allocate only; do not copy the buffer in.
    pub const NONE: StringFlags = StringFlags(0);
    /// Copy the buffer contents in as a NUL-terminated string.
    pub const COPY: StringFlags = StringFlags(1 << 0);
    /// Truncate on UTF-8 character boundaries.
    pub const UTF8: StringFlags = StringFlags(1 << 1);
    /// Copy the whole buffer verbatim, embedded NULs included.
    pub const BINARY: StringFlags = StringFlags(1 << 2);

    pub fn contains(self, other: StringFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for StringFlags {
    type Output = StringFlags;

    fn bitor(self, rhs: StringFlags) -> StringFlags {
        StringFlags(self.0 | rhs.0)
    }
}

/// Handle on a public function of one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallableFunction {
    context: ContextId,
    func_id: FuncId,
    code_addr: u32,
    generation: u32,
    invalidated: bool,
}

impl CallableFunction {
    pub(crate) fn new(context: ContextId, func_id: FuncId, code_addr: u32, generation: u32) -> Self {
        Self {
            context,
            func_id,
            code_addr,
            generation,
            invalidated: false,
        }
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn func_id(&self) -> FuncId {
        self.func_id
    }

    pub fn code_addr(&self) -> u32 {
        self.code_addr
    }

    pub(crate) fn generation(&self) -> u32 {
        self.generation
    }

    /// Set on cached entries when the owning image is reloaded.
    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    pub(crate) fn invalidate(&mut self) {
        self.invalidated = true;
    }

    pub fn is_runnable(&self, ctx: &PluginContext) -> bool {
        !ctx.is_paused()
    }

    /// Start building a call.
    pub fn prepare<'a>(&self, ctx: &'a mut PluginContext) -> Invocation<'a> {
        Invocation {
            ctx,
            function: *self,
            params: Vec::new(),
            error: None,
        }
    }

    /// Call with plain cell parameters.
    pub fn call_function(&self, ctx: &mut PluginContext, params: &[Cell]) -> SpResult<Cell> {
        if !self.is_runnable(ctx) {
            return Err(SpError::NotRunnable);
        }
        if params.len() > MAX_EXEC_PARAMS {
            return Err(SpError::ParamsMax);
        }
        let code_addr = ctx.resolve_function(self)?;
        let values: Vec<Cell> = params.iter().rev().copied().collect();
        ctx.push_cells_from_array(&values)?;
        ctx.execute(code_addr)
    }
}

/// Where a parameter's final contents go after the call.
enum CopyBack<'a> {
    None,
    Cell(&'a mut Cell),
    Float(&'a mut f32),
    Cells(&'a mut [Cell]),
    Bytes(&'a mut [u8]),
}

struct Param<'a> {
    value: Cell,
    /// Heap allocation backing the parameter, if any.
    alloc: Option<Cell>,
    copy_back: CopyBack<'a>,
}

/// A call under construction.
///
/// Dropping an invocation without executing it releases every heap
/// allocation its parameters made.
pub struct Invocation<'a> {
    ctx: &'a mut PluginContext,
    function: CallableFunction,
    params: Vec<Param<'a>>,
    error: Option<SpError>,
}

impl<'a> Invocation<'a> {
    fn fail<T>(&mut self, err: SpError) -> SpResult<T> {
        self.error = Some(err);
        Err(err)
    }

    fn check_room(&mut self) -> SpResult<()> {
        if self.params.len() >= MAX_EXEC_PARAMS {
            return self.fail(SpError::ParamsMax);
        }
        Ok(())
    }

    fn alloc(&mut self, cells: u32) -> SpResult<Cell> {
        match self.ctx.heap_alloc(cells) {
            Ok(local) => Ok(local),
            Err(err) => self.fail(err),
        }
    }

    /// Context the call will run in, for preparing reserved buffers.
    pub fn context_mut(&mut self) -> &mut PluginContext {
        self.ctx
    }

    /// Number of parameters pushed so far.
    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn push_cell(&mut self, value: Cell) -> SpResult<()> {
        self.check_room()?;
        self.params.push(Param {
            value,
            alloc: None,
            copy_back: CopyBack::None,
        });
        Ok(())
    }

    pub fn push_float(&mut self, value: f32) -> SpResult<()> {
        self.push_cell(value.to_bits() as Cell)
    }

    /// Pass `cell` by reference, copying the script's value back if
    /// `copy_back` is set.
    pub fn push_cell_by_ref(&mut self, cell: &'a mut Cell, copy_back: bool) -> SpResult<()> {
        let local = self.push_alloc(&[*cell])?;
        self.params.push(Param {
            value: local,
            alloc: Some(local),
            copy_back: if copy_back {
                CopyBack::Cell(cell)
            } else {
                CopyBack::None
            },
        });
        Ok(())
    }

    pub fn push_float_by_ref(&mut self, value: &'a mut f32, copy_back: bool) -> SpResult<()> {
        let local = self.push_alloc(&[value.to_bits() as Cell])?;
        self.params.push(Param {
            value: local,
            alloc: Some(local),
            copy_back: if copy_back {
                CopyBack::Float(value)
            } else {
                CopyBack::None
            },
        });
        Ok(())
    }

    /// Pass a copy of `array`, mirroring the script's changes back into it
    /// if `copy_back` is set. Returns the local address of the copy.
    pub fn push_array(&mut self, array: &'a mut [Cell], copy_back: bool) -> SpResult<Cell> {
        let local = self.push_alloc(array)?;
        self.params.push(Param {
            value: local,
            alloc: Some(local),
            copy_back: if copy_back {
                CopyBack::Cells(array)
            } else {
                CopyBack::None
            },
        });
        Ok(local)
    }

    /// Pass a read-only copy of `array`.
    pub fn push_const_array(&mut self, array: &[Cell]) -> SpResult<Cell> {
        let local = self.push_alloc(array)?;
        self.params.push(Param {
            value: local,
            alloc: Some(local),
            copy_back: CopyBack::None,
        });
        Ok(local)
    }

    /// Pass a zeroed array of `cells` cells with no host counterpart.
    pub fn reserve_array(&mut self, cells: u32) -> SpResult<Cell> {
        self.check_room()?;
        let local = self.alloc(cells)?;
        let zeroed = vec![0; cells as usize];
        if let Err(err) = self.ctx.arena_mut().write_cells(local, &zeroed) {
            let _ = self.ctx.heap_release(local);
            return self.fail(err);
        }
        self.params.push(Param {
            value: local,
            alloc: Some(local),
            copy_back: CopyBack::None,
        });
        Ok(local)
    }

    fn push_alloc(&mut self, cells: &[Cell]) -> SpResult<Cell> {
        self.check_room()?;
        let local = self.alloc(cells.len() as u32)?;
        if let Err(err) = self.ctx.arena_mut().write_cells(local, cells) {
            let _ = self.ctx.heap_release(local);
            return self.fail(err);
        }
        Ok(local)
    }

    /// Pass a copy of `string` as a NUL-terminated string.
    pub fn push_string(&mut self, string: &str) -> SpResult<Cell> {
        let len = string.len() + 1;
        let local = self.place_string(string.as_bytes(), len, StringFlags::COPY)?;
        self.params.push(Param {
            value: local,
            alloc: Some(local),
            copy_back: CopyBack::None,
        });
        Ok(local)
    }

    /// Pass `buffer` as a string buffer of `buffer.len()` bytes.
    ///
    /// With [`StringFlags::COPY`] the buffer's string is copied in; with
    /// [`StringFlags::BINARY`] the whole buffer is. If `copy_back` is set
    /// the script's buffer is copied back over `buffer` after the call.
    pub fn push_string_ex(&mut self, buffer: &'a mut [u8], flags: StringFlags, copy_back: bool) -> SpResult<Cell> {
        let local = self.place_string(buffer, buffer.len(), flags)?;
        self.params.push(Param {
            value: local,
            alloc: Some(local),
            copy_back: if copy_back {
                CopyBack::Bytes(buffer)
            } else {
                CopyBack::None
            },
        });
        Ok(local)
    }

    fn place_string(&mut self, source: &[u8], len: usize, flags: StringFlags) -> SpResult<Cell> {
        self.check_room()?;
        let cells = len.div_ceil(CELL_SIZE as usize);
        let local = self.alloc(cells as u32)?;

        let written = if flags.contains(StringFlags::BINARY) {
            self.ctx
                .arena_mut()
                .bytes_mut(local, len)
                .map(|dest| dest.copy_from_slice(&source[..len]))
        } else if flags.contains(StringFlags::COPY) {
            let end = source.iter().position(|&b| b == 0).unwrap_or(source.len());
            let text = &source[..end];
            match (flags.contains(StringFlags::UTF8), std::str::from_utf8(text)) {
                (true, Ok(s)) => self.ctx.string_to_local_utf8(local, len, s).map(|_| ()),
                _ => self
                    .ctx
                    .arena_mut()
                    .write_string(local, len, text)
                    .map(|_| ()),
            }
        } else {
            Ok(())
        };

        if let Err(err) = written {
            let _ = self.ctx.heap_release(local);
            return self.fail(err);
        }
        Ok(local)
    }

    /// Local address of a pushed parameter's heap copy.
    pub fn get_address_of_pushed_param(&self, index: usize) -> Option<Cell> {
        if self.error.is_some() {
            return None;
        }
        self.params.get(index)?.alloc
    }

    /// Run the call. Parameters are consumed whether or not it succeeds.
    pub fn execute(mut self) -> SpResult<Cell> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if !self.function.is_runnable(self.ctx) {
            return Err(SpError::NotRunnable);
        }
        let code_addr = self.ctx.resolve_function(&self.function)?;

        let values: Vec<Cell> = self.params.iter().rev().map(|p| p.value).collect();
        self.ctx.push_cells_from_array(&values)?;
        let mut params = std::mem::take(&mut self.params);

        let result = self.ctx.execute(code_addr);

        if result.is_ok() {
            for param in &mut params {
                if let Some(local) = param.alloc {
                    copy_back(self.ctx, local, &mut param.copy_back);
                }
            }
        }

        for param in params.iter().rev() {
            if let Some(local) = param.alloc {
                if let Err(err) = self.ctx.heap_pop(local) {
                    debug!(context = %self.ctx.id(), local, error = %err, "Parameter was not on top of the heap");
                }
            }
        }

        result
    }
}

fn copy_back(ctx: &PluginContext, local: Cell, target: &mut CopyBack<'_>) {
    let arena = ctx.arena();
    let copied = match target {
        CopyBack::None => Ok(()),
        CopyBack::Cell(cell) => arena.read_cell(local).map(|v| **cell = v),
        CopyBack::Float(f) => arena.read_cell(local).map(|v| **f = f32::from_bits(v as u32)),
        CopyBack::Cells(cells) => arena.read_cells(local, cells.len()).map(|v| cells.copy_from_slice(&v)),
        CopyBack::Bytes(bytes) => arena
            .bytes(local, bytes.len())
            .map(|v| bytes.copy_from_slice(v)),
    };
    if let Err(err) = copied {
        debug!(context = %ctx.id(), local, error = %err, "Copy-back failed");
    }
}

impl Drop for Invocation<'_> {
    fn drop(&mut self) {
        for param in self.params.drain(..).rev() {
            if let Some(local) = param.alloc {
                let _ = self.ctx.heap_release(local);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_flags() {
        let flags = StringFlags::COPY | StringFlags::UTF8;
        assert!(flags.contains(StringFlags::COPY));
        assert!(flags.contains(StringFlags::UTF8));
        assert!(!flags.contains(StringFlags::BINARY));
        assert!(StringFlags::NONE.contains(StringFlags::NONE));
    }

    #[test]
    fn test_handle_invalidation() {
        let mut f = CallableFunction::new(ContextId(3), 1, 64, 0);
        assert!(!f.is_invalidated());
        f.invalidate();
        assert!(f.is_invalidated());
        assert_eq!(f.code_addr(), 64);
    }
}
