//! Call frames: per-invocation records chained through the host call
//! stack. Frames exist for diagnostics and for resolving the positional
//! pseudo-variables `<`, `>` and `1`…`19`.

use std::rc::Rc;

use crate::atom::Atom;
use crate::list::StringList;
use crate::module::ModuleRef;

pub struct Frame<'a> {
    pub caller: Option<&'a Frame<'a>>,
    /// The nearest caller that is interpreted code, for backtraces that
    /// skip native trampolines.
    pub user_caller: Option<&'a Frame<'a>>,
    pub module: ModuleRef,
    /// Actual argument groups, one list per argument list of the call.
    pub args: Vec<StringList>,
    pub file: Rc<str>,
    pub line: u32,
    pub rule_name: Atom,
    pub native: bool,
}

impl<'a> Frame<'a> {
    /// The top-level frame of an evaluation.
    pub fn root(module: ModuleRef, rule_name: Atom) -> Frame<'static> {
        Frame {
            caller: None,
            user_caller: None,
            module,
            args: Vec::new(),
            file: Rc::from(""),
            line: 0,
            rule_name,
            native: false,
        }
    }

    /// A callee frame chained onto `self`.
    pub fn child(
        &'a self,
        module: ModuleRef,
        args: Vec<StringList>,
        rule_name: Atom,
        file: Rc<str>,
        line: u32,
        native: bool,
    ) -> Frame<'a> {
        let user_caller = if self.native {
            self.user_caller
        } else {
            Some(self)
        };
        Frame {
            caller: Some(self),
            user_caller,
            module,
            args,
            file,
            line,
            rule_name,
            native,
        }
    }

    /// A positional argument group; absent groups read as empty.
    pub fn arg(&self, group: usize) -> StringList {
        self.args.get(group).cloned().unwrap_or_default()
    }

    /// One line per frame, innermost first.
    pub fn backtrace(&self) -> String {
        let mut out = String::new();
        let mut frame = Some(self);
        while let Some(f) = frame {
            out.push_str(&format!("{}:{}: in {}\n", f.file, f.line, f.rule_name));
            frame = f.caller;
        }
        out
    }
}
