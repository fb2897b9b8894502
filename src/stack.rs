//! The operand stack: one growable region holding values interleaved with
//! the auxiliary records control constructs push (iterator cursors, saved
//! module handles, saved bindings, settings overlays). Every pop is
//! type-checked; a mismatch is a compiler bug surfacing, not a user error.

use anyhow::{bail, Result};

use crate::list::StringList;
use crate::module::{ModuleRef, SavedBinding};

/// Iterator state for a `for` loop, kept on the stack between
/// `ForInit` and the final `ForNext`.
pub struct Cursor {
    pub list: StringList,
    pub index: usize,
}

pub enum Entry {
    Value(StringList),
    Cursor(Cursor),
    Module(ModuleRef),
    Binding(SavedBinding),
    /// All bindings of one settings push, restored together.
    Overlay(Vec<SavedBinding>),
}

impl Entry {
    fn kind(&self) -> &'static str {
        match self {
            Entry::Value(_) => "value",
            Entry::Cursor(_) => "cursor",
            Entry::Module(_) => "module",
            Entry::Binding(_) => "binding",
            Entry::Overlay(_) => "overlay",
        }
    }
}

#[derive(Default)]
pub struct OperandStack {
    entries: Vec<Entry>,
}

impl OperandStack {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    /// Drops the backing allocation; the engine's shutdown path.
    pub fn release(&mut self) {
        self.entries = Vec::new();
    }

    #[inline]
    pub fn push_value(&mut self, value: StringList) {
        self.entries.push(Entry::Value(value));
    }

    pub fn pop_value(&mut self) -> Result<StringList> {
        match self.entries.pop() {
            Some(Entry::Value(value)) => Ok(value),
            other => bail!("expected a value on the stack, found {}", kind_of(other)),
        }
    }

    pub fn peek_value(&self) -> Result<&StringList> {
        match self.entries.last() {
            Some(Entry::Value(value)) => Ok(value),
            other => bail!(
                "expected a value on the stack, found {}",
                other.map_or("nothing", Entry::kind)
            ),
        }
    }

    pub fn push_cursor(&mut self, cursor: Cursor) {
        self.entries.push(Entry::Cursor(cursor));
    }

    pub fn pop_cursor(&mut self) -> Result<Cursor> {
        match self.entries.pop() {
            Some(Entry::Cursor(cursor)) => Ok(cursor),
            other => bail!("expected a cursor on the stack, found {}", kind_of(other)),
        }
    }

    pub fn peek_cursor_mut(&mut self) -> Result<&mut Cursor> {
        match self.entries.last_mut() {
            Some(Entry::Cursor(cursor)) => Ok(cursor),
            _ => bail!("expected a cursor on the stack"),
        }
    }

    pub fn push_module(&mut self, module: ModuleRef) {
        self.entries.push(Entry::Module(module));
    }

    pub fn pop_module(&mut self) -> Result<ModuleRef> {
        match self.entries.pop() {
            Some(Entry::Module(module)) => Ok(module),
            other => bail!(
                "expected a saved module on the stack, found {}",
                kind_of(other)
            ),
        }
    }

    pub fn push_binding(&mut self, binding: SavedBinding) {
        self.entries.push(Entry::Binding(binding));
    }

    pub fn pop_binding(&mut self) -> Result<SavedBinding> {
        match self.entries.pop() {
            Some(Entry::Binding(binding)) => Ok(binding),
            other => bail!("expected a binding on the stack, found {}", kind_of(other)),
        }
    }

    pub fn push_overlay(&mut self, overlay: Vec<SavedBinding>) {
        self.entries.push(Entry::Overlay(overlay));
    }

    pub fn pop_overlay(&mut self) -> Result<Vec<SavedBinding>> {
        match self.entries.pop() {
            Some(Entry::Overlay(overlay)) => Ok(overlay),
            other => bail!("expected an overlay on the stack, found {}", kind_of(other)),
        }
    }

    /// Exchanges the top two entries.
    pub fn swap(&mut self) -> Result<()> {
        let len = self.entries.len();
        if len < 2 {
            bail!("swap on a stack of depth {len}");
        }
        self.entries.swap(len - 1, len - 2);
        Ok(())
    }
}

fn kind_of(entry: Option<Entry>) -> &'static str {
    entry.as_ref().map_or("nothing", Entry::kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::Interner;

    #[test]
    fn typed_pops_catch_mismatches() {
        let mut interner = Interner::new();
        let mut stack = OperandStack::new();
        stack.push_value(StringList::single(interner.intern("x")));
        assert!(stack.pop_cursor().is_err());
        // the mismatching pop consumed the entry
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn swap_exchanges_top_two() {
        let mut interner = Interner::new();
        let mut stack = OperandStack::new();
        stack.push_value(StringList::single(interner.intern("under")));
        stack.push_value(StringList::single(interner.intern("top")));
        stack.swap().unwrap();
        assert_eq!(stack.pop_value().unwrap().join(" "), "under");
        assert_eq!(stack.pop_value().unwrap().join(" "), "top");
    }
}
