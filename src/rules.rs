//! The rule registry: named procedures per module, lookup through the
//! class-parent chain with the root module as the final fallback, and the
//! member-rule import path that lazily specializes a parent's rule for the
//! instance module it is first called on.

use std::rc::Rc;

use fxhash::FxHashMap;
use tracing::debug;

use crate::atom::Atom;
use crate::bytecode::{ActionDef, NativeFn, NativeProcedure, Procedure};
use crate::formals::FormalGroups;
use crate::module::{ModuleRef, Modules};
use crate::specialize::specialize;

/// How deep a class-parent chain may go before lookup gives up; guards
/// against accidental parent cycles.
const MAX_PARENT_DEPTH: usize = 64;

#[derive(Clone)]
pub struct RuleEntry {
    pub procedure: Procedure,
    /// The module the rule executes in.
    pub module: ModuleRef,
    pub exported: bool,
}

#[derive(Default)]
pub struct Rules {
    rules: FxHashMap<Atom, FxHashMap<Atom, RuleEntry>>,
    actions: FxHashMap<Atom, FxHashMap<Atom, ActionDef>>,
}

impl Rules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines a rule in `module`. Binding an interpreted procedure into a
    /// module is the lazy trigger for fixed-slot specialization.
    pub fn define(&mut self, module: &ModuleRef, name: &Atom, procedure: Procedure, exported: bool) {
        let procedure = match procedure {
            Procedure::Interpreted(body) => Procedure::Interpreted(specialize(&body, module)),
            native => native,
        };
        let module_name = module.borrow().name().clone();
        debug!(rule = %name, module = %module_name, "defining rule");
        self.rules.entry(module_name).or_default().insert(
            name.clone(),
            RuleEntry {
                procedure,
                module: module.clone(),
                exported,
            },
        );
    }

    pub fn define_native(
        &mut self,
        module: &ModuleRef,
        name: &Atom,
        func: NativeFn,
        flags: u32,
        formals: Option<FormalGroups>,
    ) {
        let native = NativeProcedure {
            name: name.clone(),
            func,
            flags,
            formals,
        };
        self.define(module, name, Procedure::Native(Rc::new(native)), true);
    }

    pub fn define_actions(&mut self, module: &ModuleRef, def: ActionDef) {
        let module_name = module.borrow().name().clone();
        debug!(actions = %def.name, module = %module_name, "defining actions");
        self.actions
            .entry(module_name)
            .or_default()
            .insert(def.name.clone(), def);
    }

    /// Resolves a rule visible from `module`: its own table, then the
    /// class-parent chain, then the root module.
    pub fn lookup(&self, module: &ModuleRef, name: &Atom, modules: &Modules) -> Option<RuleEntry> {
        let mut current = module.clone();
        for _ in 0..MAX_PARENT_DEPTH {
            if let Some(entry) = self.in_module(&current, name) {
                return Some(entry);
            }
            let parent = current.borrow().class_parent().cloned();
            match parent.and_then(|p| modules.lookup(&p)) {
                Some(parent) => current = parent,
                None => break,
            }
        }
        let root = modules.root();
        if Rc::ptr_eq(&root, module) {
            None
        } else {
            self.in_module(&root, name)
        }
    }

    /// Member-rule resolution: like `lookup`, but a rule found through the
    /// parent chain is imported into the instance (specialized for it from
    /// the generic source) so the method executes against the instance's
    /// variables.
    pub fn lookup_or_import(
        &mut self,
        instance: &ModuleRef,
        name: &Atom,
        modules: &Modules,
    ) -> Option<RuleEntry> {
        let found = self.lookup(instance, name, modules)?;
        if Rc::ptr_eq(&found.module, instance) {
            return Some(found);
        }
        let imported = match &found.procedure {
            Procedure::Interpreted(body) => {
                let generic = body.generic.clone().unwrap_or_else(|| body.clone());
                Procedure::Interpreted(specialize(&generic, instance))
            }
            native => native.clone(),
        };
        self.define(instance, name, imported, false);
        self.in_module(instance, name)
    }

    pub fn find_action(&self, module: &ModuleRef, name: &Atom) -> Option<ActionDef> {
        let module_name = module.borrow().name().clone();
        if let Some(def) = self.actions.get(&module_name).and_then(|t| t.get(name)) {
            return Some(def.clone());
        }
        // the root module's table key is the empty name
        self.actions.get("").and_then(|t| t.get(name)).cloned()
    }

    fn in_module(&self, module: &ModuleRef, name: &Atom) -> Option<RuleEntry> {
        let module_name = module.borrow().name().clone();
        self.rules.get(&module_name).and_then(|t| t.get(name)).cloned()
    }
}
