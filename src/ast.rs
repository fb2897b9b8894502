//! The syntax tree the compiler consumes. The build-language lexer and
//! parser live outside this crate; they hand over statements in this shape.
//! Raw words still carry their embedded expansion syntax (`$(…)`, `@(…)`)
//! and are run through the expansion parser during lowering.

use std::rc::Rc;

use strum::Display;

/// Flags carried on an `actions` definition, for the action-execution
/// layer's benefit; the engine stores and forwards them.
pub type ActionFlags = u32;

pub const ACTION_UPDATED: ActionFlags = 1 << 0;
pub const ACTION_TOGETHER: ActionFlags = 1 << 1;
pub const ACTION_IGNORE: ActionFlags = 1 << 2;
pub const ACTION_QUIETLY: ActionFlags = 1 << 3;
pub const ACTION_PIECEMEAL: ActionFlags = 1 << 4;
pub const ACTION_EXISTING: ActionFlags = 1 << 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum AssignOp {
    #[strum(serialize = "=")]
    Set,
    #[strum(serialize = "+=")]
    Append,
    #[strum(serialize = "?=")]
    Default,
}

/// How many actuals a formal parameter consumes from its argument group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Optional,
    OneOrMore,
    ZeroOrMore,
    /// Swallows the rest of every group and ends checking; the escape hatch
    /// for natively-variadic procedures. At most one per parameter list,
    /// and it must be last in its group.
    Rest,
}

impl Cardinality {
    /// The marker rendered after a parameter name in signatures.
    pub fn marker(&self) -> &'static str {
        match self {
            Cardinality::One => "",
            Cardinality::Optional => "?",
            Cardinality::OneOrMore => "+",
            Cardinality::ZeroOrMore => "*",
            Cardinality::Rest => "...",
        }
    }
}

/// One formal parameter: an optional type-check rule name, the parameter
/// name, and how many actuals it consumes.
#[derive(Clone, Debug)]
pub struct Param {
    pub name: String,
    pub cardinality: Cardinality,
    pub type_check: Option<String>,
}

impl Param {
    pub fn new(name: &str, cardinality: Cardinality) -> Self {
        Param {
            name: name.to_owned(),
            cardinality,
            type_check: None,
        }
    }

    pub fn checked(name: &str, cardinality: Cardinality, type_check: &str) -> Self {
        Param {
            name: name.to_owned(),
            cardinality,
            type_check: Some(type_check.to_owned()),
        }
    }
}

/// A list-valued expression: raw words and bracketed rule invocations, in
/// source order. Evaluation concatenates the expansion of every item.
#[derive(Clone, Debug, Default)]
pub struct ListExpr {
    pub items: Vec<ListItem>,
}

#[derive(Clone, Debug)]
pub enum ListItem {
    /// A raw token, expansion syntax and all.
    Word(String),
    /// A `[ rule args… ]` invocation whose result splices into the list.
    Invoke(Box<Invocation>),
}

impl ListExpr {
    pub fn words(words: &[&str]) -> Self {
        ListExpr {
            items: words.iter().map(|w| ListItem::Word((*w).to_owned())).collect(),
        }
    }

    pub fn word(word: &str) -> Self {
        Self::words(&[word])
    }

    pub fn invocation(invocation: Invocation) -> Self {
        ListExpr {
            items: vec![ListItem::Invoke(Box::new(invocation))],
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// A rule call: the callee name expression and the actual argument groups.
#[derive(Clone, Debug)]
pub struct Invocation {
    pub rule: ListExpr,
    pub args: Vec<ListExpr>,
}

impl Invocation {
    pub fn new(rule: ListExpr, args: Vec<ListExpr>) -> Self {
        Invocation { rule, args }
    }

    pub fn named(rule: &str, args: Vec<ListExpr>) -> Self {
        Invocation {
            rule: ListExpr::word(rule),
            args,
        }
    }
}

/// Boolean conditions. These never materialize as values; the compiler
/// lowers them straight to conditional branches.
#[derive(Clone, Debug)]
pub enum Cond {
    /// Non-empty test.
    Truthy(ListExpr),
    Eq(ListExpr, ListExpr),
    Ne(ListExpr, ListExpr),
    Lt(ListExpr, ListExpr),
    Le(ListExpr, ListExpr),
    Gt(ListExpr, ListExpr),
    Ge(ListExpr, ListExpr),
    /// Every element of the left list glob-matches some element of the right.
    In(ListExpr, ListExpr),
    Not(Box<Cond>),
    And(Box<Cond>, Box<Cond>),
    Or(Box<Cond>, Box<Cond>),
}

#[derive(Clone, Debug)]
pub struct SwitchCase {
    pub pattern: String,
    pub body: Vec<Stmt>,
}

/// Source position carried on every statement and refreshed into frames
/// for diagnostics.
#[derive(Clone, Debug)]
pub struct SourceLoc {
    pub file: Rc<str>,
    pub line: u32,
}

impl Default for SourceLoc {
    fn default() -> Self {
        SourceLoc {
            file: Rc::from(""),
            line: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Stmt {
    pub kind: StmtKind,
    pub location: SourceLoc,
}

impl Stmt {
    pub fn new(kind: StmtKind) -> Self {
        Stmt {
            kind,
            location: SourceLoc::default(),
        }
    }

    pub fn at(kind: StmtKind, file: &Rc<str>, line: u32) -> Self {
        Stmt {
            kind,
            location: SourceLoc {
                file: file.clone(),
                line,
            },
        }
    }
}

#[derive(Clone, Debug)]
pub enum StmtKind {
    /// Braced sequencing; only the final statement computes a value for the
    /// enclosing context.
    Block(Vec<Stmt>),
    Invoke(Invocation),
    Set {
        vars: ListExpr,
        op: AssignOp,
        value: ListExpr,
    },
    /// `vars on targets op value`: per-target settings overlay update.
    SetOn {
        vars: ListExpr,
        targets: ListExpr,
        op: AssignOp,
        value: ListExpr,
    },
    /// `local vars [= value]` scoping the remainder of the block.
    Local {
        vars: ListExpr,
        value: Option<ListExpr>,
        body: Vec<Stmt>,
    },
    If {
        cond: Cond,
        then_branch: Vec<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    While {
        cond: Cond,
        body: Vec<Stmt>,
    },
    For {
        var: String,
        local: bool,
        list: ListExpr,
        body: Vec<Stmt>,
    },
    Switch {
        value: ListExpr,
        cases: Vec<SwitchCase>,
    },
    Module {
        name: ListExpr,
        body: Vec<Stmt>,
    },
    Class {
        name: ListExpr,
        bases: ListExpr,
        body: Vec<Stmt>,
    },
    /// `on targets statement`: evaluate with the first target's settings
    /// overlaid.
    On {
        targets: ListExpr,
        body: Box<Stmt>,
    },
    Rule {
        name: String,
        params: Vec<Vec<Param>>,
        body: Vec<Stmt>,
        local: bool,
    },
    Actions {
        name: String,
        flags: ActionFlags,
        bind: Option<ListExpr>,
        text: String,
    },
    /// Stages the procedure result; execution continues (classic Jam
    /// semantics: `return` is not an early exit).
    Return(ListExpr),
}

/// Convenience constructors used by embedders and tests.
pub fn set(var: &str, value: &[&str]) -> Stmt {
    Stmt::new(StmtKind::Set {
        vars: ListExpr::word(var),
        op: AssignOp::Set,
        value: ListExpr::words(value),
    })
}

pub fn append(var: &str, value: &[&str]) -> Stmt {
    Stmt::new(StmtKind::Set {
        vars: ListExpr::word(var),
        op: AssignOp::Append,
        value: ListExpr::words(value),
    })
}

pub fn invoke(rule: &str, args: Vec<ListExpr>) -> Stmt {
    Stmt::new(StmtKind::Invoke(Invocation::named(rule, args)))
}

pub fn ret(value: ListExpr) -> Stmt {
    Stmt::new(StmtKind::Return(value))
}
