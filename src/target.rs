//! Targets and their settings overlays: the variable overrides consulted
//! by `on $(target) …` constructs. Settings iterate in insertion order so
//! overlay pushes bind deterministically.
//!
//! The read path (settings push, `GetOn`) consults only the first listed
//! target; the write path updates every listed target. The asymmetry is
//! observed engine behavior, preserved as-is.

use std::cell::RefCell;
use std::rc::Rc;

use fxhash::FxHashMap;
use indexmap::IndexMap;

use crate::atom::Atom;
use crate::list::StringList;

pub type TargetRef = Rc<RefCell<Target>>;

pub struct Target {
    name: Atom,
    settings: IndexMap<Atom, StringList>,
}

impl Target {
    fn new(name: Atom) -> Self {
        Target {
            name,
            settings: IndexMap::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> &Atom {
        &self.name
    }

    pub fn get(&self, name: &Atom) -> Option<StringList> {
        self.settings.get(name).cloned()
    }

    pub fn set(&mut self, name: &Atom, value: StringList) {
        self.settings.insert(name.clone(), value);
    }

    pub fn append(&mut self, name: &Atom, value: &StringList) {
        let appended = self
            .settings
            .get(name)
            .cloned()
            .unwrap_or_default()
            .concat(value);
        self.settings.insert(name.clone(), appended);
    }

    pub fn set_default(&mut self, name: &Atom, value: StringList) {
        let empty = self.settings.get(name).map_or(true, StringList::is_empty);
        if empty {
            self.settings.insert(name.clone(), value);
        }
    }

    /// Snapshot of the overlay in insertion order, for settings pushes.
    pub fn settings(&self) -> Vec<(Atom, StringList)> {
        self.settings
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// The target registry: bind-by-name with creation on demand. Stands in
/// for the host's target binding service.
#[derive(Default)]
pub struct Targets {
    table: FxHashMap<Atom, TargetRef>,
}

impl Targets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: &Atom) -> TargetRef {
        if let Some(target) = self.table.get(name) {
            return target.clone();
        }
        let target = Rc::new(RefCell::new(Target::new(name.clone())));
        self.table.insert(name.clone(), target.clone());
        target
    }

    pub fn lookup(&self, name: &Atom) -> Option<TargetRef> {
        self.table.get(name).cloned()
    }

    /// The settings-stack read primitive: a named override on a target, if
    /// one is present.
    pub fn settings_lookup(&self, name: &Atom, var: &Atom) -> Option<StringList> {
        self.table.get(name).and_then(|t| t.borrow().get(var))
    }
}
