//! Primitive runtime types shared by every component.

/// The fixed-width addressable unit of plugin memory.
pub type Cell = i32;

/// Unsigned view of a [`Cell`].
pub type UCell = u32;

/// Encoded function identifier. Public functions encode `(index << 1) | 1`.
pub type FuncId = u32;

/// Size of a cell in bytes. Local addresses are cell-aligned byte offsets.
pub const CELL_SIZE: Cell = 4;

/// Minimum free gap that must remain between `hp` and `sp`.
pub const STACK_MARGIN: Cell = 16 * CELL_SIZE;

/// Maximum number of parameters a single script call may carry.
pub const MAX_EXEC_PARAMS: usize = 32;

/// Largest cell count a single heap allocation may request.
pub const CELL_BOUND_MAX: u32 = (i32::MAX as u32) / (CELL_SIZE as u32);
