//! Per-context execution memory.
//!
//! One contiguous buffer laid out low to high as:
//!
//! ```text
//! 0           heap_base        hp                sp          mem_size
//! | globals    | heap ->        |   free gap      | <- stack  |
//! ```
//!
//! Every accessor validates addresses against the layout and leaves the
//! arena untouched on failure. Addresses are local byte offsets; physical
//! memory is only reachable through borrows scoped to the arena.

use crate::error::{SpError, SpResult};
use crate::types::{Cell, CELL_BOUND_MAX, CELL_SIZE, STACK_MARGIN};
use byteorder::{ByteOrder, LittleEndian};

const CELL_BYTES: usize = CELL_SIZE as usize;

#[derive(Debug, Clone)]
pub struct Arena {
    memory: Vec<u8>,
    heap_base: Cell,
    hp: Cell,
    sp: Cell,
    stack_top: Cell,
}

impl Arena {
    /// Create an arena of `mem_size` bytes with `data` copied to its base.
    pub fn new(data: &[u8], mem_size: u32) -> SpResult<Self> {
        let size = Cell::try_from(mem_size).map_err(|_| SpError::FileFormat)?;
        let heap_base = Cell::try_from(data.len()).map_err(|_| SpError::FileFormat)?;
        if size < CELL_SIZE || heap_base > size - CELL_SIZE {
            return Err(SpError::FileFormat);
        }

        let mut memory = vec![0u8; mem_size as usize];
        memory[..data.len()].copy_from_slice(data);

        Ok(Self {
            memory,
            heap_base,
            hp: heap_base,
            sp: size - CELL_SIZE,
            stack_top: size - CELL_SIZE,
        })
    }

    pub fn mem_size(&self) -> Cell {
        self.memory.len() as Cell
    }

    pub fn heap_base(&self) -> Cell {
        self.heap_base
    }

    pub fn hp(&self) -> Cell {
        self.hp
    }

    pub fn sp(&self) -> Cell {
        self.sp
    }

    /// Initial stack pointer; the stack is empty when `sp == stack_top`.
    pub fn stack_top(&self) -> Cell {
        self.stack_top
    }

    /// Whether `addr` is a readable, writable local address.
    ///
    /// Addresses inside the free gap `[hp, sp)` are rejected even though
    /// they are inside the buffer.
    pub fn check_address(&self, addr: Cell) -> SpResult<usize> {
        if (addr >= self.hp && addr < self.sp) || addr < 0 || addr >= self.mem_size() {
            return Err(SpError::InvalidAddress);
        }
        Ok(addr as usize)
    }

    /// Validate `[addr, addr + len)` as one span that does not reach into
    /// the free gap.
    fn check_span(&self, addr: Cell, len: usize) -> SpResult<usize> {
        let start = self.check_address(addr)?;
        let limit = if addr < self.hp {
            self.hp as usize
        } else {
            self.memory.len()
        };
        match start.checked_add(len) {
            Some(end) if end <= limit => Ok(start),
            _ => Err(SpError::InvalidAddress),
        }
    }

    /// Unchecked-by-layout access for runtime internals; still bounded by
    /// the buffer.
    fn raw_cell(&self, pos: usize) -> SpResult<Cell> {
        self.memory
            .get(pos..pos + CELL_BYTES)
            .map(LittleEndian::read_i32)
            .ok_or(SpError::InvalidAddress)
    }

    fn set_raw_cell(&mut self, pos: usize, value: Cell) -> SpResult<()> {
        let slot = self
            .memory
            .get_mut(pos..pos + CELL_BYTES)
            .ok_or(SpError::InvalidAddress)?;
        LittleEndian::write_i32(slot, value);
        Ok(())
    }

    pub fn read_cell(&self, addr: Cell) -> SpResult<Cell> {
        let pos = self.check_span(addr, CELL_BYTES)?;
        self.raw_cell(pos)
    }

    pub fn write_cell(&mut self, addr: Cell, value: Cell) -> SpResult<()> {
        let pos = self.check_span(addr, CELL_BYTES)?;
        self.set_raw_cell(pos, value)
    }

    pub fn read_cells(&self, addr: Cell, count: usize) -> SpResult<Vec<Cell>> {
        let len = count.checked_mul(CELL_BYTES).ok_or(SpError::InvalidAddress)?;
        let pos = self.check_span(addr, len)?;
        Ok(self.memory[pos..pos + len]
            .chunks_exact(CELL_BYTES)
            .map(LittleEndian::read_i32)
            .collect())
    }

    pub fn write_cells(&mut self, addr: Cell, cells: &[Cell]) -> SpResult<()> {
        let len = cells.len() * CELL_BYTES;
        let pos = self.check_span(addr, len)?;
        for (slot, value) in self.memory[pos..pos + len]
            .chunks_exact_mut(CELL_BYTES)
            .zip(cells)
        {
            LittleEndian::write_i32(slot, *value);
        }
        Ok(())
    }

    pub fn bytes(&self, addr: Cell, len: usize) -> SpResult<&[u8]> {
        let pos = self.check_span(addr, len)?;
        Ok(&self.memory[pos..pos + len])
    }

    pub fn bytes_mut(&mut self, addr: Cell, len: usize) -> SpResult<&mut [u8]> {
        let pos = self.check_span(addr, len)?;
        Ok(&mut self.memory[pos..pos + len])
    }

    /// NUL-terminated string at `addr`, without the terminator. An
    /// unterminated string runs to the end of its region.
    pub fn read_string(&self, addr: Cell) -> SpResult<&[u8]> {
        let start = self.check_address(addr)?;
        let end = if addr < self.hp {
            self.hp as usize
        } else {
            self.memory.len()
        };
        let region = &self.memory[start..end];
        let len = region.iter().position(|&b| b == 0).unwrap_or(region.len());
        Ok(&region[..len])
    }

    /// Copy `source` to `addr`, truncated to `max_bytes - 1` bytes and
    /// NUL-terminated. Returns the bytes written, excluding the terminator.
    pub fn write_string(&mut self, addr: Cell, max_bytes: usize, source: &[u8]) -> SpResult<usize> {
        self.check_address(addr)?;
        if max_bytes == 0 {
            return Ok(0);
        }
        let len = source.len().min(max_bytes - 1);
        let dest = self.bytes_mut(addr, len + 1)?;
        dest[..len].copy_from_slice(&source[..len]);
        dest[len] = 0;
        Ok(len)
    }

    /// As [`Arena::write_string`], but a truncation never splits a
    /// multi-byte UTF-8 sequence.
    pub fn write_string_utf8(&mut self, addr: Cell, max_bytes: usize, source: &str) -> SpResult<usize> {
        self.check_address(addr)?;
        if max_bytes == 0 {
            return Ok(0);
        }
        let bytes = source.as_bytes();
        let mut len = bytes.len();
        if len >= max_bytes {
            len = max_bytes - 1;
            if len > 0 && bytes[len - 1] & 0x80 != 0 {
                len -= incomplete_tail(&bytes[..len]);
            }
        }
        let dest = self.bytes_mut(addr, len + 1)?;
        dest[..len].copy_from_slice(&bytes[..len]);
        dest[len] = 0;
        Ok(len)
    }

    /// Allocate `cells` cells on the heap behind a one-cell size header.
    /// Returns the local address of the payload.
    ///
    /// Fails with [`SpError::HeapLow`] unless at least [`STACK_MARGIN`]
    /// bytes stay free between the heap and the stack afterwards. The header
    /// cell is included in that check, so the limit is one cell stricter
    /// than counting the payload alone.
    pub fn heap_alloc(&mut self, cells: u32) -> SpResult<Cell> {
        if cells >= CELL_BOUND_MAX {
            return Err(SpError::HeapLow);
        }
        let realmem = cells as i64 * CELL_SIZE as i64;
        if self.sp as i64 - self.hp as i64 - realmem - (CELL_SIZE as i64) < STACK_MARGIN as i64 {
            return Err(SpError::HeapLow);
        }

        let header = self.hp;
        self.set_raw_cell(header as usize, cells as Cell)?;
        let local = header + CELL_SIZE;
        self.hp = local + realmem as Cell;
        Ok(local)
    }

    /// Release the topmost heap allocation. `local_addr` must be exactly the
    /// address [`Arena::heap_alloc`] returned for it.
    pub fn heap_pop(&mut self, local_addr: Cell) -> SpResult<()> {
        let header = local_addr as i64 - CELL_SIZE as i64;
        if header < self.heap_base as i64 || header >= self.sp as i64 {
            return Err(SpError::InvalidAddress);
        }
        let count = self.raw_cell(header as usize)? as i64;
        if self.hp as i64 - count * CELL_SIZE as i64 - CELL_SIZE as i64 != header {
            return Err(SpError::InvalidAddress);
        }
        self.hp = header as Cell;
        Ok(())
    }

    /// Rewind the heap to the header of `local_addr` regardless of
    /// allocation order. Any allocation made after it is abandoned.
    pub fn heap_release(&mut self, local_addr: Cell) -> SpResult<()> {
        let header = local_addr as i64 - CELL_SIZE as i64;
        if header < self.heap_base as i64 || header > self.sp as i64 {
            return Err(SpError::InvalidAddress);
        }
        self.hp = header as Cell;
        Ok(())
    }

    /// Push one cell onto the stack.
    pub fn push(&mut self, value: Cell) -> SpResult<()> {
        if self.hp as i64 + STACK_MARGIN as i64 > self.sp as i64 - CELL_SIZE as i64 {
            return Err(SpError::StackLow);
        }
        let sp = self.sp - CELL_SIZE;
        self.set_raw_cell(sp as usize, value)?;
        self.sp = sp;
        Ok(())
    }

    /// Pop one cell off the stack.
    pub fn pop(&mut self) -> SpResult<Cell> {
        if self.sp >= self.stack_top {
            return Err(SpError::StackMin);
        }
        let value = self.raw_cell(self.sp as usize)?;
        self.sp += CELL_SIZE;
        Ok(value)
    }

    /// Move the stack pointer, as an engine does when entering or leaving
    /// a frame.
    pub fn set_sp(&mut self, sp: Cell) -> SpResult<()> {
        if sp > self.stack_top {
            return Err(SpError::StackMin);
        }
        if sp < self.hp {
            return Err(SpError::StackLow);
        }
        self.sp = sp;
        Ok(())
    }

    /// Move the heap pointer, as an engine does for scratch heap space.
    pub fn set_hp(&mut self, hp: Cell) -> SpResult<()> {
        if hp < self.heap_base {
            return Err(SpError::HeapMin);
        }
        if hp > self.sp {
            return Err(SpError::HeapLow);
        }
        self.hp = hp;
        Ok(())
    }

    /// Restore a pointer pair captured from this arena.
    pub(crate) fn restore(&mut self, sp: Cell, hp: Cell) {
        debug_assert!(self.heap_base <= hp && hp <= sp && sp <= self.stack_top);
        self.sp = sp;
        self.hp = hp;
    }
}

/// Number of trailing bytes to drop so `bytes` does not end inside an
/// incomplete UTF-8 sequence. `bytes` must end with a non-ASCII byte.
fn incomplete_tail(bytes: &[u8]) -> usize {
    let mut lead = bytes.len() - 1;
    let mut count = 1;
    while bytes[lead] & 0xC0 == 0x80 {
        if lead == 0 {
            return count;
        }
        lead -= 1;
        count += 1;
    }
    let expected = match bytes[lead] & 0xF0 {
        0xC0 | 0xD0 => 2,
        0xE0 => 3,
        0xF0 => 4,
        _ => 0,
    };
    if expected == count {
        0
    } else {
        count
    }
}
