//! Name-sorted lookup tables for publics and pubvars.

use crate::error::{SpError, SpResult};
use crate::types::{FuncId, UCell};
use serde::Serialize;

/// A script function exported by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicInfo {
    /// Code offset of the function entry.
    pub code_offset: UCell,
    pub name: String,
}

/// A script global exported by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PubvarInfo {
    /// Local address of the variable inside the arena.
    pub offset: UCell,
    pub name: String,
}

/// Encode the function id of the public at `index`.
pub fn public_func_id(index: u32) -> FuncId {
    (index << 1) | 1
}

/// Decode a public function id back to its table index.
pub fn public_index(func_id: FuncId) -> Option<u32> {
    (func_id & 1 == 1).then_some(func_id >> 1)
}

/// Binary search over a table sorted by the producing toolchain.
pub(crate) fn find_sorted<T>(entries: &[T], name: &str, key: impl Fn(&T) -> &str) -> SpResult<u32> {
    entries
        .binary_search_by(|e| key(e).as_bytes().cmp(name.as_bytes()))
        .map(|i| i as u32)
        .map_err(|_| SpError::NotFound)
}

/// Publics and pubvars of one image.
#[derive(Debug, Clone, Default)]
pub struct SymbolTables {
    publics: Vec<PublicInfo>,
    pubvars: Vec<PubvarInfo>,
}

impl SymbolTables {
    pub fn new(publics: Vec<PublicInfo>, pubvars: Vec<PubvarInfo>) -> Self {
        Self { publics, pubvars }
    }

    pub fn find_public_by_name(&self, name: &str) -> SpResult<u32> {
        find_sorted(&self.publics, name, |p| &p.name)
    }

    pub fn get_public_by_index(&self, index: u32) -> SpResult<&PublicInfo> {
        self.publics.get(index as usize).ok_or(SpError::Index)
    }

    pub fn publics_num(&self) -> u32 {
        self.publics.len() as u32
    }

    pub fn publics(&self) -> &[PublicInfo] {
        &self.publics
    }

    pub fn find_pubvar_by_name(&self, name: &str) -> SpResult<u32> {
        find_sorted(&self.pubvars, name, |p| &p.name)
    }

    pub fn get_pubvar_by_index(&self, index: u32) -> SpResult<&PubvarInfo> {
        self.pubvars.get(index as usize).ok_or(SpError::Index)
    }

    pub fn pubvars_num(&self) -> u32 {
        self.pubvars.len() as u32
    }

    pub fn pubvars(&self) -> &[PubvarInfo] {
        &self.pubvars
    }
}
