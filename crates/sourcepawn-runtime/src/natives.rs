//! Native (host-implemented) function slots.

use crate::context::PluginContext;
use crate::error::{SpError, SpResult};
use crate::symbols::find_sorted;
use crate::types::Cell;
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// A host function callable from script.
///
/// `args[0]` is the argument count; the arguments follow it.
pub type NativeFn = Rc<dyn Fn(&mut PluginContext, &[Cell]) -> Cell>;

/// The plugin can run without this native being bound.
pub const NATIVE_FLAG_OPTIONAL: u32 = 1 << 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeStatus {
    Unbound,
    Bound,
}

/// One slot of a context's native table.
#[derive(Clone)]
pub struct NativeEntry {
    pub name: String,
    pub status: NativeStatus,
    pub flags: u32,
    pub user_data: Option<Rc<dyn Any>>,
    func: Option<NativeFn>,
}

impl NativeEntry {
    fn unbound(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: NativeStatus::Unbound,
            flags: 0,
            user_data: None,
            func: None,
        }
    }

    fn bind(&mut self, func: NativeFn) {
        self.func = Some(func);
        self.status = NativeStatus::Bound;
    }

    pub fn is_bound(&self) -> bool {
        self.status == NativeStatus::Bound
    }

    pub fn is_optional(&self) -> bool {
        self.flags & NATIVE_FLAG_OPTIONAL != 0
    }
}

impl fmt::Debug for NativeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeEntry")
            .field("name", &self.name)
            .field("status", &self.status)
            .field("flags", &self.flags)
            .finish()
    }
}

/// A (name, function) pair offered for binding.
#[derive(Clone)]
pub struct NativeInfo {
    pub name: String,
    pub func: NativeFn,
}

impl NativeInfo {
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(&mut PluginContext, &[Cell]) -> Cell + 'static,
    {
        Self {
            name: name.to_string(),
            func: Rc::new(func),
        }
    }
}

impl fmt::Debug for NativeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeInfo").field("name", &self.name).finish()
    }
}

/// Native slots of one context, in image order (sorted by name).
#[derive(Debug, Clone, Default)]
pub struct NativeTable {
    entries: Vec<NativeEntry>,
}

impl NativeTable {
    pub fn from_names(names: &[String]) -> Self {
        Self {
            entries: names.iter().map(|n| NativeEntry::unbound(n)).collect(),
        }
    }

    pub fn find_native_by_name(&self, name: &str) -> SpResult<u32> {
        find_sorted(&self.entries, name, |e| &e.name)
    }

    pub fn get_native_by_index(&self, index: u32) -> SpResult<&NativeEntry> {
        self.entries.get(index as usize).ok_or(SpError::Index)
    }

    pub fn get_native_by_index_mut(&mut self, index: u32) -> SpResult<&mut NativeEntry> {
        self.entries.get_mut(index as usize).ok_or(SpError::Index)
    }

    pub fn natives_num(&self) -> u32 {
        self.entries.len() as u32
    }

    pub fn iter(&self) -> impl Iterator<Item = &NativeEntry> {
        self.entries.iter()
    }

    /// Bind every slot whose name appears in `natives`. Bound slots are
    /// skipped unless `overwrite` is set; a later duplicate in `natives`
    /// wins over an earlier one.
    pub fn bind_natives(&mut self, natives: &[NativeInfo], overwrite: bool) {
        for entry in &mut self.entries {
            if entry.is_bound() && !overwrite {
                continue;
            }
            if let Some(info) = natives.iter().rev().find(|n| n.name == entry.name) {
                entry.bind(info.func.clone());
            }
        }
    }

    pub fn bind_native(&mut self, native: &NativeInfo) -> SpResult<()> {
        let index = self.find_native_by_name(&native.name)?;
        self.bind_native_to_index(index, native.func.clone())
    }

    pub fn bind_native_to_index(&mut self, index: u32, func: NativeFn) -> SpResult<()> {
        self.get_native_by_index_mut(index)?.bind(func);
        Ok(())
    }

    /// Fill every still-unbound slot with `func`.
    pub fn bind_native_to_any(&mut self, func: NativeFn) {
        for entry in self.entries.iter_mut().filter(|e| !e.is_bound()) {
            entry.bind(func.clone());
        }
    }

    /// Carry bindings and flags over from `previous` by name.
    pub(crate) fn inherit_bindings(&mut self, previous: &NativeTable) {
        for old in previous.entries.iter().filter(|e| e.is_bound()) {
            if let Ok(index) = self.find_native_by_name(&old.name) {
                let entry = &mut self.entries[index as usize];
                entry.func = old.func.clone();
                entry.status = old.status;
                entry.flags = old.flags;
                entry.user_data = old.user_data.clone();
            }
        }
    }

    /// Slots that are still unbound.
    pub fn unbound(&self) -> impl Iterator<Item = &NativeEntry> {
        self.entries.iter().filter(|e| !e.is_bound())
    }

    /// The function bound at `index`.
    pub fn function(&self, index: u32) -> SpResult<NativeFn> {
        self.get_native_by_index(index)?
            .func
            .clone()
            .ok_or(SpError::InvalidNative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> NativeTable {
        let names: Vec<String> = ["CloseHandle", "GetClientName", "PrintToServer"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        NativeTable::from_names(&names)
    }

    fn returning(value: Cell) -> NativeFn {
        Rc::new(move |_: &mut PluginContext, _: &[Cell]| value)
    }

    #[test]
    fn test_find_exact_and_neighbours() {
        let t = table();
        assert_eq!(t.find_native_by_name("CloseHandle"), Ok(0));
        assert_eq!(t.find_native_by_name("PrintToServer"), Ok(2));
        assert_eq!(t.find_native_by_name("GetClientNam"), Err(SpError::NotFound));
        assert_eq!(t.find_native_by_name("GetClientNamex"), Err(SpError::NotFound));
        assert_eq!(t.find_native_by_name("Zzz"), Err(SpError::NotFound));
    }

    #[test]
    fn test_bind_natives_respects_overwrite() {
        let mut t = table();
        let first = returning(1);
        t.bind_native_to_index(0, first.clone()).unwrap();
        let list = vec![NativeInfo::new("CloseHandle", |_, _| 2)];
        t.bind_natives(&list, false);
        assert!(Rc::ptr_eq(&t.function(0).unwrap(), &first));
        assert_eq!(t.unbound().count(), 2);

        t.bind_natives(&list, true);
        assert!(Rc::ptr_eq(&t.function(0).unwrap(), &list[0].func));
    }

    #[test]
    fn test_bind_to_any_keeps_bound_slots() {
        let mut t = table();
        let first = returning(1);
        t.bind_native_to_index(2, first.clone()).unwrap();
        let fallback = returning(-1);
        t.bind_native_to_any(fallback.clone());

        assert!(Rc::ptr_eq(&t.function(2).unwrap(), &first));
        assert!(Rc::ptr_eq(&t.function(0).unwrap(), &fallback));
        assert!(Rc::ptr_eq(&t.function(1).unwrap(), &fallback));
    }

    #[test]
    fn test_unbound_slot_is_invalid_native() {
        let t = table();
        assert!(matches!(t.function(1), Err(SpError::InvalidNative)));
        assert!(matches!(t.function(9), Err(SpError::Index)));
    }

    #[test]
    fn test_bind_single_and_any() {
        let mut t = table();
        assert_eq!(
            t.bind_native(&NativeInfo::new("Missing", |_, _| 0)),
            Err(SpError::NotFound)
        );
        t.bind_native(&NativeInfo::new("GetClientName", |_, _| 0)).unwrap();
        assert_eq!(t.bind_native_to_index(5, returning(0)), Err(SpError::Index));
        t.bind_native_to_any(returning(-1));
        assert_eq!(t.unbound().count(), 0);
    }
}
