//! Debug tables and reverse address lookups.

use crate::error::{SpError, SpResult};
use crate::image::format::SYMBOL_FUNCTION;
use crate::types::UCell;
use serde::Serialize;

/// Source file covering code from `addr` up to the next entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebugFile {
    pub addr: UCell,
    pub name: String,
}

/// Line number attached to the instruction at `addr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DebugLine {
    pub addr: UCell,
    pub line: u32,
}

/// One dimension of an array symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArrayDim {
    pub tag_id: i16,
    pub size: u32,
}

/// A debug symbol with its code range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebugSymbol {
    pub addr: i32,
    pub tag_id: i16,
    pub code_start: UCell,
    pub code_end: UCell,
    /// Symbol kind (`SYMBOL_*` in [`crate::image::format`]).
    pub ident: u8,
    pub vclass: u8,
    pub name: String,
    pub dims: Vec<ArrayDim>,
}

impl DebugSymbol {
    pub fn is_function(&self) -> bool {
        self.ident == SYMBOL_FUNCTION
    }

    pub fn contains(&self, addr: UCell) -> bool {
        self.code_start <= addr && addr < self.code_end
    }
}

/// Address-sorted debug information decoded from an image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DebugTables {
    pub files: Vec<DebugFile>,
    pub lines: Vec<DebugLine>,
    pub symbols: Vec<DebugSymbol>,
}

/// Address to source resolution.
///
/// Each lookup fails independently with [`SpError::NotFound`].
pub trait DebugLookup {
    /// File whose range contains `addr`.
    fn lookup_file(&self, addr: UCell) -> SpResult<&str>;

    /// Name of the function whose code range contains `addr`.
    fn lookup_function(&self, addr: UCell) -> SpResult<&str>;

    /// Source line for the instruction at `addr`.
    fn lookup_line(&self, addr: UCell) -> SpResult<u32>;
}

/// Index of the last entry whose address is `<= addr`.
fn predecessor<T>(entries: &[T], addr: UCell, key: impl Fn(&T) -> UCell) -> Option<usize> {
    entries.partition_point(|e| key(e) <= addr).checked_sub(1)
}

impl DebugLookup for DebugTables {
    fn lookup_file(&self, addr: UCell) -> SpResult<&str> {
        predecessor(&self.files, addr, |f| f.addr)
            .map(|i| self.files[i].name.as_str())
            .ok_or(SpError::NotFound)
    }

    fn lookup_function(&self, addr: UCell) -> SpResult<&str> {
        self.symbols
            .iter()
            .find(|s| s.is_function() && s.contains(addr))
            .map(|s| s.name.as_str())
            .ok_or(SpError::NotFound)
    }

    fn lookup_line(&self, addr: UCell) -> SpResult<u32> {
        // The recorded address precedes the statement, hence the +1.
        predecessor(&self.lines, addr, |l| l.addr)
            .map(|i| self.lines[i].line.saturating_add(1))
            .ok_or(SpError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::format::SYMBOL_VARIABLE;

    fn tables() -> DebugTables {
        DebugTables {
            files: vec![
                DebugFile {
                    addr: 0,
                    name: "main.sp".to_string(),
                },
                DebugFile {
                    addr: 100,
                    name: "include/util.inc".to_string(),
                },
            ],
            lines: vec![
                DebugLine { addr: 10, line: 1 },
                DebugLine { addr: 20, line: 2 },
                DebugLine { addr: 30, line: 3 },
            ],
            symbols: vec![
                DebugSymbol {
                    addr: 8,
                    tag_id: 0,
                    code_start: 0,
                    code_end: 200,
                    ident: SYMBOL_VARIABLE,
                    vclass: 1,
                    name: "g_Counter".to_string(),
                    dims: vec![],
                },
                DebugSymbol {
                    addr: 8,
                    tag_id: 0,
                    code_start: 8,
                    code_end: 60,
                    ident: SYMBOL_FUNCTION,
                    vclass: 0,
                    name: "OnPluginStart".to_string(),
                    dims: vec![],
                },
            ],
        }
    }

    #[test]
    fn test_line_lookup_predecessor_plus_one() {
        let t = tables();
        assert_eq!(t.lookup_line(15), Ok(2));
        assert_eq!(t.lookup_line(20), Ok(3));
        assert_eq!(t.lookup_line(5), Err(SpError::NotFound));
        assert_eq!(t.lookup_line(35), Ok(4));
    }

    #[test]
    fn test_file_lookup() {
        let t = tables();
        assert_eq!(t.lookup_file(0), Ok("main.sp"));
        assert_eq!(t.lookup_file(99), Ok("main.sp"));
        assert_eq!(t.lookup_file(150), Ok("include/util.inc"));
    }

    #[test]
    fn test_function_lookup_skips_non_functions() {
        let t = tables();
        assert_eq!(t.lookup_function(8), Ok("OnPluginStart"));
        assert_eq!(t.lookup_function(59), Ok("OnPluginStart"));
        assert_eq!(t.lookup_function(60), Err(SpError::NotFound));
        assert_eq!(t.lookup_function(4), Err(SpError::NotFound));
    }

    #[test]
    fn test_empty_tables_miss() {
        let t = DebugTables::default();
        assert_eq!(t.lookup_file(0), Err(SpError::NotFound));
        assert_eq!(t.lookup_line(0), Err(SpError::NotFound));
    }
}
