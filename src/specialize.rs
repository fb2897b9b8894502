//! The fixed-slot optimizer: rewrites by-name variable access into dense
//! per-module slot indices for procedures that always run against one
//! module.
//!
//! Nested module and class regions are skipped wholesale, since their
//! contents may execute against a different module and keep by-name
//! semantics. The region-entry instructions carry the offset of their
//! matching exit, so the skip is a single jump. A handful of ever-changing
//! special names is never slotted.

use std::rc::Rc;

use fxhash::FxHashSet;
use once_cell::sync::Lazy;
use tracing::debug;

use crate::bytecode::{Op, ProcedureBody};
use crate::module::ModuleRef;

static FIXED_SLOT_DENYLIST: Lazy<FxHashSet<&'static str>> = Lazy::new(|| {
    ["TMPDIR", "TMPNAME", "TMPFILE", "STDOUT", "STDERR"]
        .into_iter()
        .collect()
});

/// Produces a copy of `body` whose eligible variable instructions address
/// `module`'s slot table directly. The copy shares the original's constant
/// pool and nested tables and keeps the original as its generic fallback;
/// specializing an already-specialized body restarts from that fallback,
/// so every module's copy derives from the same generic source.
pub fn specialize(body: &Rc<ProcedureBody>, module: &ModuleRef) -> Rc<ProcedureBody> {
    let module_name = module.borrow().name().clone();
    if body.specialized_for.as_ref() == Some(&module_name) {
        return body.clone();
    }
    let generic = body.generic.clone().unwrap_or_else(|| body.clone());
    debug!(module = %module_name, file = %generic.file, "specializing procedure");

    let mut code = generic.code.clone();
    let mut i = 0usize;
    while i < code.len() {
        if let Op::PushModule(skip) | Op::PushClass(skip) = code[i] {
            // jump straight to the matching PopModule; everything inside
            // may run against a different module
            i = (i as i64 + 1 + i64::from(skip)) as usize;
            continue;
        }
        let replaced = match &code[i] {
            Op::PushVar(c) => slot_for(&generic, module, *c).map(Op::PushVarFixed),
            Op::PushLocal(c) => slot_for(&generic, module, *c).map(Op::PushLocalFixed),
            Op::PopLocal(c) => slot_for(&generic, module, *c).map(Op::PopLocalFixed),
            Op::Set(c) => slot_for(&generic, module, *c).map(Op::SetFixed),
            Op::Append(c) => slot_for(&generic, module, *c).map(Op::AppendFixed),
            Op::Default(c) => slot_for(&generic, module, *c).map(Op::DefaultFixed),
            _ => None,
        };
        if let Some(op) = replaced {
            code[i] = op;
        }
        i += 1;
    }

    Rc::new(ProcedureBody {
        code,
        constants: generic.constants.clone(),
        subprocedures: generic.subprocedures.clone(),
        actions: generic.actions.clone(),
        formals: generic.formals.clone(),
        file: generic.file.clone(),
        line: generic.line,
        specialized_for: Some(module_name),
        generic: Some(generic.clone()),
    })
}

fn slot_for(body: &ProcedureBody, module: &ModuleRef, constant: usize) -> Option<usize> {
    let name = body.constant(constant);
    if FIXED_SLOT_DENYLIST.contains(name.as_str()) {
        return None;
    }
    Some(module.borrow_mut().ensure_slot(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast;
    use crate::atom::Interner;
    use crate::compile::Compiler;
    use crate::host::MemoryDiagnostics;
    use crate::module::Modules;

    fn compile(stmts: &[ast::Stmt]) -> (Interner, Modules, Rc<ProcedureBody>) {
        let mut interner = Interner::new();
        let modules = Modules::new(&mut interner);
        let mut diag = MemoryDiagnostics::default();
        let procedure = Compiler::new(&mut interner, &mut diag).compile(stmts);
        let body = procedure.body().unwrap().clone();
        (interner, modules, body)
    }

    #[test]
    fn rewrites_by_name_access() {
        let stmts = [ast::set("x", &["$(y)"])];
        let (_, modules, body) = compile(&stmts);
        let module = modules.root();
        let fixed = specialize(&body, &module);

        let listing = fixed.disassemble();
        assert!(listing.contains("push-var-fixed #0"), "{listing}");
        assert!(listing.contains("set-fixed #1"), "{listing}");
        assert!(fixed.specialized_for.is_some());
        assert!(Rc::ptr_eq(&fixed.constants, &body.constants));
        assert!(Rc::ptr_eq(fixed.generic.as_ref().unwrap(), &body));
    }

    #[test]
    fn denylisted_names_stay_by_name() {
        let stmts = [ast::set("STDOUT", &["$(TMPDIR)"])];
        let (_, modules, body) = compile(&stmts);
        let fixed = specialize(&body, &modules.root());
        let listing = fixed.disassemble();
        assert!(listing.contains("push-var \"TMPDIR\""), "{listing}");
        assert!(listing.contains("set \"STDOUT\""), "{listing}");
    }

    #[test]
    fn module_regions_are_skipped() {
        let stmts = [
            ast::set("outer", &["1"]),
            ast::Stmt::new(ast::StmtKind::Module {
                name: ast::ListExpr::word("m"),
                body: vec![ast::set("inner", &["2"])],
            }),
        ];
        let (_, modules, body) = compile(&stmts);
        let fixed = specialize(&body, &modules.root());
        let listing = fixed.disassemble();
        assert!(listing.contains("set-fixed #0"), "{listing}");
        // the nested module's write keeps by-name semantics
        assert!(listing.contains("set \"inner\""), "{listing}");
    }

    #[test]
    fn respecialization_derives_from_generic() {
        let mut interner = Interner::new();
        let stmts = [ast::set("x", &["v"])];
        let (_, _, body) = compile(&stmts);
        let mut modules = Modules::new(&mut interner);
        let a = modules.bind(&interner.intern("a"));
        let b = modules.bind(&interner.intern("b"));

        let for_a = specialize(&body, &a);
        let for_b = specialize(&for_a, &b);
        assert!(Rc::ptr_eq(for_b.generic.as_ref().unwrap(), &body));
        // same module returns the same copy untouched
        assert!(Rc::ptr_eq(&specialize(&for_a, &a), &for_a));
    }
}
