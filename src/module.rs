//! Modules: the engine's variable namespaces. A module holds a name-keyed
//! variable table plus a dense fixed-slot array filled in by the
//! specializer; reads and writes by name stay coherent with slot-registered
//! variables by indirecting through the slot table first.
//!
//! Variable scoping is dynamic: a binding saves the previous value into a
//! `SavedBinding` that the matching unbind restores, in strict LIFO order.

use std::cell::RefCell;
use std::rc::Rc;

use fxhash::FxHashMap;
use indexmap::IndexMap;

use crate::atom::{Atom, Interner};
use crate::list::StringList;

pub type ModuleRef = Rc<RefCell<Module>>;

#[derive(Debug)]
pub struct Module {
    name: Atom,
    vars: FxHashMap<Atom, StringList>,
    /// Variable name → fixed-slot index, in registration order.
    slots: IndexMap<Atom, usize>,
    /// Dense storage for slot-registered variables. `None` is unset.
    fixed: Vec<Option<StringList>>,
    /// Opaque class-composition link: the module this one imports member
    /// rules from when it represents a class instance.
    class_parent: Option<Atom>,
}

impl Module {
    fn new(name: Atom) -> Self {
        Module {
            name,
            vars: FxHashMap::default(),
            slots: IndexMap::new(),
            fixed: Vec::new(),
            class_parent: None,
        }
    }

    #[inline]
    pub fn name(&self) -> &Atom {
        &self.name
    }

    #[inline]
    pub fn class_parent(&self) -> Option<&Atom> {
        self.class_parent.as_ref()
    }

    pub fn set_class_parent(&mut self, parent: Atom) {
        self.class_parent = Some(parent);
    }

    /// Reads a variable; unset and empty are indistinguishable to
    /// expansion, but `get_opt` preserves the difference for bindings.
    pub fn get(&self, name: &Atom) -> StringList {
        self.get_opt(name).unwrap_or_default()
    }

    pub fn get_opt(&self, name: &Atom) -> Option<StringList> {
        match self.slots.get(name) {
            Some(&slot) => self.fixed[slot].clone(),
            None => self.vars.get(name).cloned(),
        }
    }

    pub fn set(&mut self, name: &Atom, value: StringList) {
        match self.slots.get(name) {
            Some(&slot) => self.fixed[slot] = Some(value),
            None => {
                self.vars.insert(name.clone(), value);
            }
        }
    }

    /// Restores a binding's saved state; `None` removes the variable.
    pub fn set_opt(&mut self, name: &Atom, value: Option<StringList>) {
        match value {
            Some(value) => self.set(name, value),
            None => match self.slots.get(name) {
                Some(&slot) => self.fixed[slot] = None,
                None => {
                    self.vars.remove(name);
                }
            },
        }
    }

    pub fn append(&mut self, name: &Atom, value: &StringList) {
        let appended = self.get(name).concat(value);
        self.set(name, appended);
    }

    /// `?=`: only takes effect while the variable is empty.
    pub fn set_default(&mut self, name: &Atom, value: StringList) {
        if self.get(name).is_empty() {
            self.set(name, value);
        }
    }

    /// Registers `name` in the dense slot table, assigning the next free
    /// index on first sight, and migrates any existing value.
    pub fn ensure_slot(&mut self, name: &Atom) -> usize {
        if let Some(&slot) = self.slots.get(name) {
            return slot;
        }
        let slot = self.fixed.len();
        let existing = self.vars.remove(name);
        self.fixed.push(existing);
        self.slots.insert(name.clone(), slot);
        slot
    }

    /// The name registered at a slot. Slots are only addressed by code the
    /// specializer produced against this module, so the index is valid.
    pub fn slot_name(&self, slot: usize) -> Option<&Atom> {
        self.slots.get_index(slot).map(|(name, _)| name)
    }

    pub fn slot_get(&self, slot: usize) -> StringList {
        self.fixed
            .get(slot)
            .and_then(Clone::clone)
            .unwrap_or_default()
    }

    pub fn slot_set(&mut self, slot: usize, value: StringList) {
        self.fixed[slot] = Some(value);
    }

    pub fn slot_append(&mut self, slot: usize, value: &StringList) {
        let appended = self.slot_get(slot).concat(value);
        self.fixed[slot] = Some(appended);
    }

    pub fn slot_default(&mut self, slot: usize, value: StringList) {
        if self.slot_get(slot).is_empty() {
            self.fixed[slot] = Some(value);
        }
    }
}

/// The saved half of a dynamic-scope binding. Every push-path operation
/// that creates one must run its matching restore exactly once.
#[derive(Clone, Debug)]
pub struct SavedBinding {
    pub module: ModuleRef,
    pub name: Atom,
    pub previous: Option<StringList>,
}

impl SavedBinding {
    /// Saves the current value of `name` and installs `value` in its place.
    pub fn bind(module: &ModuleRef, name: &Atom, value: StringList) -> SavedBinding {
        let mut inner = module.borrow_mut();
        let previous = inner.get_opt(name);
        inner.set(name, value);
        SavedBinding {
            module: module.clone(),
            name: name.clone(),
            previous,
        }
    }

    pub fn restore(self) {
        self.module
            .borrow_mut()
            .set_opt(&self.name, self.previous);
    }
}

/// The module registry: bind-by-name with creation on demand, plus the
/// root module every lookup chain ends at. Stands in for the host's
/// namespace registry.
pub struct Modules {
    table: FxHashMap<Atom, ModuleRef>,
    root: ModuleRef,
    root_name: Atom,
}

impl Modules {
    pub fn new(interner: &mut Interner) -> Self {
        let root_name = interner.intern("");
        let root = Rc::new(RefCell::new(Module::new(root_name.clone())));
        let mut table = FxHashMap::default();
        table.insert(root_name.clone(), root.clone());
        Modules {
            table,
            root,
            root_name,
        }
    }

    #[inline]
    pub fn root(&self) -> ModuleRef {
        self.root.clone()
    }

    #[inline]
    pub fn root_name(&self) -> &Atom {
        &self.root_name
    }

    pub fn bind(&mut self, name: &Atom) -> ModuleRef {
        if let Some(module) = self.table.get(name) {
            return module.clone();
        }
        let module = Rc::new(RefCell::new(Module::new(name.clone())));
        self.table.insert(name.clone(), module.clone());
        module
    }

    pub fn lookup(&self, name: &Atom) -> Option<ModuleRef> {
        self.table.get(name).cloned()
    }

    /// Binds a class module, recording its first base for member-rule
    /// import. Full base composition is the class system's concern; the
    /// engine only follows the parent link when resolving member rules.
    pub fn bind_class(&mut self, name: &Atom, bases: &StringList) -> ModuleRef {
        let module = self.bind(name);
        if let Some(base) = bases.first() {
            module.borrow_mut().set_class_parent(base.clone());
        }
        module
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Interner, Modules) {
        let mut interner = Interner::new();
        let modules = Modules::new(&mut interner);
        (interner, modules)
    }

    #[test]
    fn bind_and_restore_round_trip() {
        let (mut interner, modules) = setup();
        let module = modules.root();
        let x = interner.intern("x");
        let old = StringList::single(interner.intern("old"));
        let new = StringList::single(interner.intern("new"));

        module.borrow_mut().set(&x, old.clone());
        let saved = SavedBinding::bind(&module, &x, new.clone());
        assert_eq!(module.borrow().get(&x), new);
        saved.restore();
        assert_eq!(module.borrow().get(&x), old);
    }

    #[test]
    fn restore_of_unset_removes() {
        let (mut interner, modules) = setup();
        let module = modules.root();
        let x = interner.intern("x");
        let value = StringList::single(interner.intern("v"));

        let saved = SavedBinding::bind(&module, &x, value);
        saved.restore();
        assert!(module.borrow().get_opt(&x).is_none());
    }

    #[test]
    fn slot_registration_migrates_value() {
        let (mut interner, modules) = setup();
        let module = modules.root();
        let x = interner.intern("x");
        let value = StringList::single(interner.intern("v"));

        module.borrow_mut().set(&x, value.clone());
        let slot = module.borrow_mut().ensure_slot(&x);
        assert_eq!(slot, 0);
        assert_eq!(module.borrow().slot_get(slot), value);
        // by-name access still sees the migrated value
        assert_eq!(module.borrow().get(&x), value);
        // re-registration is stable
        assert_eq!(module.borrow_mut().ensure_slot(&x), slot);
    }

    #[test]
    fn default_only_fills_empty() {
        let (mut interner, modules) = setup();
        let module = modules.root();
        let x = interner.intern("x");
        let a = StringList::single(interner.intern("a"));
        let b = StringList::single(interner.intern("b"));

        module.borrow_mut().set_default(&x, a.clone());
        module.borrow_mut().set_default(&x, b);
        assert_eq!(module.borrow().get(&x), a);
    }
}
