//! Formal parameter lists: compilation from the syntax tree, call-time
//! binding against dynamically-scoped variables, and the check-only path
//! used for native procedures.
//!
//! Binding returns the `Vec<SavedBinding>` that the mandatory matching
//! `unbind` consumes; every exit path of a call must run it exactly once.

use std::fmt;

use crate::ast::{Cardinality, Param};
use crate::atom::{Atom, Interner};
use crate::error::ArgumentError;
use crate::host::Diagnostics;
use crate::list::StringList;
use crate::module::{ModuleRef, SavedBinding};

#[derive(Clone, Debug)]
pub struct Formal {
    pub name: Atom,
    pub cardinality: Cardinality,
    pub type_check: Option<Atom>,
}

/// Parameter groups, one per argument list of the call syntax.
#[derive(Clone, Debug)]
pub struct FormalGroups {
    groups: Vec<Vec<Formal>>,
}

/// A type check to run once binding is in place: the check rule, the
/// parameter it guards, and one consumed element as a one-element list.
#[derive(Debug)]
pub struct PendingCheck {
    pub check: Atom,
    pub parameter: Atom,
    pub value: StringList,
}

impl FormalGroups {
    pub fn compile(
        params: &[Vec<Param>],
        interner: &mut Interner,
        diag: &mut dyn Diagnostics,
        file: &str,
        line: u32,
    ) -> FormalGroups {
        let mut seen_rest = false;
        let groups = params
            .iter()
            .map(|group| {
                group
                    .iter()
                    .enumerate()
                    .map(|(i, param)| {
                        if param.cardinality == Cardinality::Rest {
                            if seen_rest {
                                diag.report(file, line, "duplicate rest parameter");
                            }
                            if i + 1 != group.len() {
                                diag.report(
                                    file,
                                    line,
                                    "rest parameter must be last in its argument group",
                                );
                            }
                            seen_rest = true;
                        }
                        Formal {
                            name: interner.intern(&param.name),
                            cardinality: param.cardinality,
                            type_check: param.type_check.as_deref().map(|t| interner.intern(t)),
                        }
                    })
                    .collect()
            })
            .collect();
        FormalGroups { groups }
    }

    #[inline]
    pub fn groups(&self) -> &[Vec<Formal>] {
        &self.groups
    }

    /// Binds actual argument groups into `module`, saving every touched
    /// variable. On error nothing stays bound.
    pub fn bind(
        &self,
        rule: &Atom,
        module: &ModuleRef,
        actuals: &[StringList],
    ) -> Result<(Vec<SavedBinding>, Vec<PendingCheck>), ArgumentError> {
        let mut saved = Vec::new();
        let mut checks = Vec::new();
        let outcome = self.consume(rule, actuals, &mut checks, |formal, value| {
            saved.push(SavedBinding::bind(module, &formal.name, value));
        });
        match outcome {
            Ok(()) => Ok((saved, checks)),
            Err(error) => {
                Self::unbind(saved);
                Err(error)
            }
        }
    }

    /// The check-only path: cardinality and type checks with no binding
    /// side effects. Native procedures with declared formals go through
    /// this.
    pub fn typecheck(
        &self,
        rule: &Atom,
        actuals: &[StringList],
    ) -> Result<Vec<PendingCheck>, ArgumentError> {
        let mut checks = Vec::new();
        self.consume(rule, actuals, &mut checks, |_, _| {})?;
        Ok(checks)
    }

    pub fn unbind(saved: Vec<SavedBinding>) {
        for binding in saved.into_iter().rev() {
            binding.restore();
        }
    }

    /// Walks formals against actuals, handing each formal its consumed
    /// value. A `Rest` formal swallows the remainder of every group and
    /// ends all further checking.
    fn consume(
        &self,
        rule: &Atom,
        actuals: &[StringList],
        checks: &mut Vec<PendingCheck>,
        mut take: impl FnMut(&Formal, StringList),
    ) -> Result<(), ArgumentError> {
        let empty = StringList::new();
        for (index, formals) in self.groups.iter().enumerate() {
            let group = actuals.get(index).unwrap_or(&empty);
            let mut next = 0usize;
            for formal in formals {
                let remaining = group.len() - next;
                let count = match formal.cardinality {
                    Cardinality::One => {
                        if remaining == 0 {
                            return Err(self.missing(rule, formal));
                        }
                        1
                    }
                    Cardinality::Optional => remaining.min(1),
                    Cardinality::OneOrMore => {
                        if remaining == 0 {
                            return Err(self.missing(rule, formal));
                        }
                        remaining
                    }
                    Cardinality::ZeroOrMore | Cardinality::Rest => remaining,
                };
                let value: StringList =
                    group.iter().skip(next).take(count).cloned().collect();
                next += count;
                if let Some(check) = &formal.type_check {
                    for element in value.iter() {
                        checks.push(PendingCheck {
                            check: check.clone(),
                            parameter: formal.name.clone(),
                            value: StringList::single(element.clone()),
                        });
                    }
                }
                take(formal, value);
                if formal.cardinality == Cardinality::Rest {
                    return Ok(());
                }
            }
            if next < group.len() {
                return Err(ArgumentError::Extra {
                    rule: rule.as_str().to_owned(),
                });
            }
        }
        for group in actuals.iter().skip(self.groups.len()) {
            if !group.is_empty() {
                return Err(ArgumentError::Extra {
                    rule: rule.as_str().to_owned(),
                });
            }
        }
        Ok(())
    }

    fn missing(&self, rule: &Atom, formal: &Formal) -> ArgumentError {
        ArgumentError::Missing {
            rule: rule.as_str().to_owned(),
            parameter: formal.name.as_str().to_owned(),
        }
    }
}

impl fmt::Display for FormalGroups {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, group) in self.groups.iter().enumerate() {
            if i > 0 {
                write!(f, " :")?;
            }
            for formal in group {
                if let Some(check) = &formal.type_check {
                    write!(f, " [{check}]")?;
                }
                write!(f, " {}", formal.name)?;
                let marker = formal.cardinality.marker();
                if !marker.is_empty() {
                    write!(f, " {marker}")?;
                }
            }
        }
        write!(f, " )")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryDiagnostics;
    use crate::module::Modules;

    struct Fixture {
        interner: Interner,
        modules: Modules,
        diag: MemoryDiagnostics,
    }

    impl Fixture {
        fn new() -> Self {
            let mut interner = Interner::new();
            let modules = Modules::new(&mut interner);
            Fixture {
                interner,
                modules,
                diag: MemoryDiagnostics::default(),
            }
        }

        fn formals(&mut self, params: &[Vec<Param>]) -> FormalGroups {
            FormalGroups::compile(params, &mut self.interner, &mut self.diag, "test", 1)
        }

        fn list(&mut self, items: &[&str]) -> StringList {
            items.iter().map(|s| self.interner.intern(s)).collect()
        }
    }

    #[test]
    fn bind_unbind_round_trip_with_rest() {
        let mut fx = Fixture::new();
        let formals = fx.formals(&[vec![
            Param::new("first", Cardinality::One),
            Param::new("second", Cardinality::Optional),
            Param::new("rest", Cardinality::ZeroOrMore),
        ]]);
        let module = fx.modules.root();
        let rule = fx.interner.intern("r");
        let rest_name = fx.interner.intern("rest");
        let before = fx.list(&["untouched"]);
        module.borrow_mut().set(&rest_name, before.clone());

        let actuals = vec![fx.list(&["x", "y", "z", "w"])];
        let (saved, checks) = formals.bind(&rule, &module, &actuals).unwrap();
        assert!(checks.is_empty());
        assert_eq!(module.borrow().get(&rest_name).join(" "), "z w");
        assert_eq!(
            module.borrow().get(&fx.interner.intern("first")).join(" "),
            "x"
        );

        FormalGroups::unbind(saved);
        assert_eq!(module.borrow().get(&rest_name), before);
        assert!(module
            .borrow()
            .get_opt(&fx.interner.intern("first"))
            .is_none());
    }

    #[test]
    fn missing_and_extra_arguments() {
        let mut fx = Fixture::new();
        let formals = fx.formals(&[vec![Param::new("only", Cardinality::One)]]);
        let module = fx.modules.root();
        let rule = fx.interner.intern("r");

        let err = formals.bind(&rule, &module, &[]).unwrap_err();
        assert!(matches!(err, ArgumentError::Missing { parameter, .. }
            if parameter == "only"));

        let actuals = vec![fx.list(&["a", "b"])];
        let err = formals.bind(&rule, &module, &actuals).unwrap_err();
        assert!(matches!(err, ArgumentError::Extra { .. }));
        // a failed bind leaves nothing bound
        assert!(module
            .borrow()
            .get_opt(&fx.interner.intern("only"))
            .is_none());
    }

    #[test]
    fn extra_argument_group_rejected() {
        let mut fx = Fixture::new();
        let formals = fx.formals(&[vec![Param::new("a", Cardinality::ZeroOrMore)]]);
        let module = fx.modules.root();
        let rule = fx.interner.intern("r");
        let actuals = vec![fx.list(&["ok"]), fx.list(&["stray"])];
        let err = formals.bind(&rule, &module, &actuals).unwrap_err();
        assert!(matches!(err, ArgumentError::Extra { .. }));
    }

    #[test]
    fn rest_ends_all_checking() {
        let mut fx = Fixture::new();
        let formals = fx.formals(&[vec![
            Param::new("a", Cardinality::One),
            Param::new("rest", Cardinality::Rest),
        ]]);
        let module = fx.modules.root();
        let rule = fx.interner.intern("r");
        // the stray second group would be an error without the rest escape
        let actuals = vec![fx.list(&["x", "y"]), fx.list(&["stray"])];
        let (saved, _) = formals.bind(&rule, &module, &actuals).unwrap();
        FormalGroups::unbind(saved);
    }

    #[test]
    fn type_checks_collect_per_element() {
        let mut fx = Fixture::new();
        let formals = fx.formals(&[vec![Param::checked(
            "files",
            Cardinality::ZeroOrMore,
            "path",
        )]]);
        let rule = fx.interner.intern("r");
        let actuals = vec![fx.list(&["a", "b"])];
        let checks = formals.typecheck(&rule, &actuals).unwrap();
        assert_eq!(checks.len(), 2);
        assert_eq!(checks[0].check.as_str(), "path");
        assert_eq!(checks[1].value.join(" "), "b");
    }

    #[test]
    fn signature_rendering() {
        let mut fx = Fixture::new();
        let formals = fx.formals(&[
            vec![Param::new("sources", Cardinality::OneOrMore)],
            vec![Param::checked("flags", Cardinality::ZeroOrMore, "flag")],
        ]);
        assert_eq!(formals.to_string(), "( sources + : [flag] flags * )");
    }

    #[test]
    fn misplaced_rest_is_diagnosed() {
        let mut fx = Fixture::new();
        let _ = fx.formals(&[vec![
            Param::new("rest", Cardinality::Rest),
            Param::new("after", Cardinality::One),
        ]]);
        let messages = fx.diag.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("must be last"));
    }
}
