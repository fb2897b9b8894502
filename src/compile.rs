//! Tree-to-bytecode lowering.
//!
//! Statements compile under a result-location discipline: a statement
//! either discards its value, leaves it on the stack, or stages it as the
//! procedure result. Only the final statement of a sequence computes a
//! value with the caller's discipline. Conditions never materialize as
//! values; they lower directly to conditional branches against a target
//! label with a branch-when-true flag.

use std::rc::Rc;

use tracing::debug;

use crate::ast::{AssignOp, Cond, Invocation, ListExpr, ListItem, Stmt, StmtKind};
use crate::atom::{Atom, Interner};
use crate::bytecode::{ActionDef, Op, Procedure, ProcedureBody, SubProc};
use crate::expand::{ExpandParser, Node, NodeGroup, VarRef};
use crate::formals::FormalGroups;
use crate::host::Diagnostics;

#[derive(Clone, Copy, PartialEq, Eq)]
enum ResultLoc {
    Ignore,
    Stack,
    Return,
}

#[derive(Clone, Copy)]
struct Label(usize);

/// Forward branches register their use sites and get patched in one pass
/// when the label lands; backward branches resolve immediately.
enum LabelState {
    Pending(Vec<usize>),
    Resolved(usize),
}

pub struct Compiler<'a> {
    interner: &'a mut Interner,
    diag: &'a mut dyn Diagnostics,
    code: Vec<Op>,
    constants: Vec<Atom>,
    subprocedures: Vec<SubProc>,
    actions: Vec<ActionDef>,
    labels: Vec<LabelState>,
    file: Rc<str>,
    line: u32,
}

impl<'a> Compiler<'a> {
    pub fn new(interner: &'a mut Interner, diag: &'a mut dyn Diagnostics) -> Self {
        Compiler {
            interner,
            diag,
            code: Vec::new(),
            constants: Vec::new(),
            subprocedures: Vec::new(),
            actions: Vec::new(),
            labels: Vec::new(),
            file: Rc::from(""),
            line: 0,
        }
    }

    /// Compiles a statement sequence into a procedure whose result is the
    /// final statement's value.
    pub fn compile(mut self, stmts: &[Stmt]) -> Procedure {
        if let Some(first) = stmts.first() {
            self.file = first.location.file.clone();
            self.line = first.location.line;
        }
        debug!(statements = stmts.len(), "compiling procedure");
        self.block(stmts, ResultLoc::Return);
        Procedure::Interpreted(Rc::new(self.finish(None)))
    }

    /// Compiles action text: tokens expand into the output buffer, then
    /// the buffer flushes to the stdio proxy.
    pub fn compile_action_body(mut self, text: &str, file: &str, line: u32) -> Procedure {
        self.file = Rc::from(file);
        self.line = line;
        debug!(file, line, "compiling action body");
        self.action_text(text);
        Procedure::Interpreted(Rc::new(self.finish(None)))
    }

    fn nested(&mut self, file: Rc<str>, line: u32) -> Compiler<'_> {
        Compiler {
            interner: &mut *self.interner,
            diag: &mut *self.diag,
            code: Vec::new(),
            constants: Vec::new(),
            subprocedures: Vec::new(),
            actions: Vec::new(),
            labels: Vec::new(),
            file,
            line,
        }
    }

    fn finish(mut self, formals: Option<FormalGroups>) -> ProcedureBody {
        self.emit(Op::Return);
        for state in &self.labels {
            assert!(
                matches!(state, LabelState::Resolved(_)),
                "unresolved label in compiled procedure"
            );
        }
        ProcedureBody {
            code: self.code,
            constants: Rc::new(self.constants),
            subprocedures: Rc::new(self.subprocedures),
            actions: Rc::new(self.actions),
            formals,
            file: self.file,
            line: self.line,
            specialized_for: None,
            generic: None,
        }
    }

    // ---- emission helpers ----

    fn emit(&mut self, op: Op) -> usize {
        self.code.push(op);
        self.code.len() - 1
    }

    /// Appends to the constant pool; duplicates are allowed.
    fn constant_atom(&mut self, atom: Atom) -> usize {
        self.constants.push(atom);
        self.constants.len() - 1
    }

    fn constant(&mut self, text: &str) -> usize {
        let atom = self.interner.intern(text);
        self.constant_atom(atom)
    }

    fn new_label(&mut self) -> Label {
        self.labels.push(LabelState::Pending(Vec::new()));
        Label(self.labels.len() - 1)
    }

    fn branch(&mut self, label: Label, make: impl FnOnce(i32) -> Op) {
        let site = self.code.len();
        let resolved = match &self.labels[label.0] {
            LabelState::Resolved(position) => Some(*position),
            LabelState::Pending(_) => None,
        };
        match resolved {
            Some(position) => {
                let offset = position as i64 - (site as i64 + 1);
                self.code.push(make(offset as i32));
            }
            None => {
                self.code.push(make(0));
                if let LabelState::Pending(uses) = &mut self.labels[label.0] {
                    uses.push(site);
                }
            }
        }
    }

    fn place(&mut self, label: Label) {
        let position = self.code.len();
        let state = std::mem::replace(&mut self.labels[label.0], LabelState::Resolved(position));
        match state {
            LabelState::Pending(uses) => {
                for site in uses {
                    let offset = (position as i64 - (site as i64 + 1)) as i32;
                    *self.code[site]
                        .branch_offset_mut()
                        .expect("branch instruction at recorded use site") = offset;
                }
            }
            LabelState::Resolved(_) => unreachable!("label placed twice"),
        }
    }

    fn empty_result(&mut self, res: ResultLoc) {
        match res {
            ResultLoc::Ignore => {}
            ResultLoc::Stack => {
                self.emit(Op::PushEmpty);
            }
            ResultLoc::Return => {
                self.emit(Op::PushEmpty);
                self.emit(Op::SetResult);
            }
        }
    }

    /// Disposes of a value the previous instruction left on the stack.
    fn settle_value(&mut self, res: ResultLoc) {
        match res {
            ResultLoc::Ignore => {
                self.emit(Op::Discard);
            }
            ResultLoc::Stack => {}
            ResultLoc::Return => {
                self.emit(Op::SetResult);
            }
        }
    }

    // ---- statements ----

    fn block(&mut self, stmts: &[Stmt], res: ResultLoc) {
        match stmts.split_last() {
            None => self.empty_result(res),
            Some((last, rest)) => {
                for stmt in rest {
                    self.stmt(stmt, ResultLoc::Ignore);
                }
                self.stmt(last, res);
            }
        }
    }

    fn stmt(&mut self, stmt: &Stmt, res: ResultLoc) {
        if stmt.location.line != 0 {
            self.line = stmt.location.line;
            if !stmt.location.file.is_empty() {
                self.file = stmt.location.file.clone();
            }
        }
        match &stmt.kind {
            StmtKind::Block(stmts) => self.block(stmts, res),
            StmtKind::Invoke(invocation) => self.invocation(invocation, res),
            StmtKind::Set { vars, op, value } => {
                self.list_expr(value);
                match self.names_operand(vars) {
                    Some(name) => {
                        let index = self.constant_atom(name);
                        self.emit(match op {
                            AssignOp::Set => Op::Set(index),
                            AssignOp::Append => Op::Append(index),
                            AssignOp::Default => Op::Default(index),
                        });
                    }
                    None => {
                        self.emit(match op {
                            AssignOp::Set => Op::SetGroup,
                            AssignOp::Append => Op::AppendGroup,
                            AssignOp::Default => Op::DefaultGroup,
                        });
                    }
                }
                self.settle_value(res);
            }
            StmtKind::SetOn {
                vars,
                targets,
                op,
                value,
            } => {
                self.list_expr(value);
                match self.names_operand(vars) {
                    Some(name) => {
                        let index = self.constant_atom(name);
                        self.list_expr(targets);
                        self.emit(match op {
                            AssignOp::Set => Op::SetOn(index),
                            AssignOp::Append => Op::AppendOn(index),
                            AssignOp::Default => Op::DefaultOn(index),
                        });
                    }
                    None => {
                        self.list_expr(targets);
                        self.emit(match op {
                            AssignOp::Set => Op::SetOnGroup,
                            AssignOp::Append => Op::AppendOnGroup,
                            AssignOp::Default => Op::DefaultOnGroup,
                        });
                    }
                }
                self.settle_value(res);
            }
            StmtKind::Local { vars, value, body } => {
                match value {
                    Some(value) => self.list_expr(value),
                    None => {
                        self.emit(Op::PushEmpty);
                    }
                }
                let body_res = if res == ResultLoc::Ignore {
                    ResultLoc::Ignore
                } else {
                    ResultLoc::Return
                };
                match self.names_operand(vars) {
                    Some(name) => {
                        let index = self.constant_atom(name);
                        self.emit(Op::PushLocal(index));
                        self.block(body, body_res);
                        self.emit(Op::PopLocal(index));
                    }
                    None => {
                        self.emit(Op::PushLocalGroup);
                        self.block(body, body_res);
                        self.emit(Op::PopLocalGroup);
                    }
                }
                if res == ResultLoc::Stack {
                    self.emit(Op::PushResult);
                }
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let else_label = self.new_label();
                self.cond(cond, else_label, false);
                self.block(then_branch, res);
                if else_branch.is_some() || res != ResultLoc::Ignore {
                    let end = self.new_label();
                    self.branch(end, Op::Jump);
                    self.place(else_label);
                    match else_branch {
                        Some(stmt) => self.stmt(stmt, res),
                        None => self.empty_result(res),
                    }
                    self.place(end);
                } else {
                    self.place(else_label);
                }
            }
            StmtKind::While { cond, body } => {
                // Pre-seed the result so zero iterations yields empty.
                if res != ResultLoc::Ignore {
                    self.emit(Op::PushEmpty);
                    self.emit(Op::SetResult);
                }
                let body_res = if res == ResultLoc::Ignore {
                    ResultLoc::Ignore
                } else {
                    ResultLoc::Return
                };
                let top = self.new_label();
                let test = self.new_label();
                self.branch(test, Op::Jump);
                self.place(top);
                self.block(body, body_res);
                self.place(test);
                self.cond(cond, top, true);
                if res == ResultLoc::Stack {
                    self.emit(Op::PushResult);
                }
            }
            StmtKind::For {
                var,
                local,
                list,
                body,
            } => {
                if res == ResultLoc::Return {
                    self.emit(Op::PushEmpty);
                    self.emit(Op::SetResult);
                }
                let var_index = self.constant(var);
                if *local {
                    self.emit(Op::PushEmpty);
                    self.emit(Op::PushLocal(var_index));
                }
                self.list_expr(list);
                self.emit(Op::ForInit);
                let top = self.new_label();
                let end = self.new_label();
                self.place(top);
                self.branch(end, Op::ForNext);
                self.emit(Op::Set(var_index));
                self.emit(Op::Discard);
                self.block(body, ResultLoc::Ignore);
                self.branch(top, Op::Jump);
                self.place(end);
                if *local {
                    self.emit(Op::PopLocal(var_index));
                }
                if res == ResultLoc::Stack {
                    self.emit(Op::PushEmpty);
                }
            }
            StmtKind::Switch { value, cases } => {
                self.list_expr(value);
                let end = self.new_label();
                for case in cases {
                    let next = self.new_label();
                    let pattern = self.constant(&case.pattern);
                    self.emit(Op::PushConstant(pattern));
                    self.branch(next, Op::JumpNotGlob);
                    // drop the subject on the way out of the matched case
                    match res {
                        ResultLoc::Ignore | ResultLoc::Return => {
                            self.block(&case.body, res);
                            self.emit(Op::Discard);
                        }
                        ResultLoc::Stack => {
                            self.block(&case.body, ResultLoc::Stack);
                            self.emit(Op::Swap);
                            self.emit(Op::Discard);
                        }
                    }
                    self.branch(end, Op::Jump);
                    self.place(next);
                }
                self.emit(Op::Discard);
                self.empty_result(res);
                self.place(end);
            }
            StmtKind::Module { name, body } => {
                let body_res = if res == ResultLoc::Ignore {
                    ResultLoc::Ignore
                } else {
                    ResultLoc::Return
                };
                self.list_expr(name);
                let leave = self.new_label();
                self.branch(leave, Op::PushModule);
                self.block(body, body_res);
                self.place(leave);
                self.emit(Op::PopModule);
                if res == ResultLoc::Stack {
                    self.emit(Op::PushResult);
                }
            }
            StmtKind::Class { name, bases, body } => {
                self.list_expr(bases);
                self.list_expr(name);
                let leave = self.new_label();
                self.branch(leave, Op::PushClass);
                self.block(body, ResultLoc::Ignore);
                self.place(leave);
                self.emit(Op::PopModule);
                self.empty_result(res);
            }
            StmtKind::On { targets, body } => self.on_stmt(targets, body, res),
            StmtKind::Rule {
                name,
                params,
                body,
                local,
            } => {
                let file = self.file.clone();
                let line = self.line;
                let formals = if params.is_empty() {
                    None
                } else {
                    Some(FormalGroups::compile(
                        params,
                        &mut *self.interner,
                        &mut *self.diag,
                        &file,
                        line,
                    ))
                };
                let procedure = {
                    let mut nested = self.nested(file, line);
                    nested.block(body, ResultLoc::Return);
                    Procedure::Interpreted(Rc::new(nested.finish(formals)))
                };
                let name = self.interner.intern(name);
                self.subprocedures.push(SubProc {
                    name,
                    procedure,
                    local: *local,
                });
                let index = self.subprocedures.len() - 1;
                self.emit(Op::DefineRule(index));
                self.empty_result(res);
            }
            StmtKind::Actions {
                name,
                flags,
                bind,
                text,
            } => {
                let file = self.file.clone();
                let line = self.line;
                let body = {
                    let mut nested = self.nested(file, line);
                    nested.action_text(text);
                    Procedure::Interpreted(Rc::new(nested.finish(None)))
                };
                let bind = self.bind_list(bind);
                let name = self.interner.intern(name);
                self.actions.push(ActionDef {
                    name,
                    body,
                    flags: *flags,
                    bind,
                });
                let index = self.actions.len() - 1;
                self.emit(Op::DefineActions(index));
                self.empty_result(res);
            }
            StmtKind::Return(value) => {
                self.list_expr(value);
                self.emit(Op::SetResult);
                if res == ResultLoc::Stack {
                    self.emit(Op::PushResult);
                }
            }
        }
    }

    /// `on targets statement`, with the classic single-variable-return
    /// fast path compiled to a direct settings read.
    fn on_stmt(&mut self, targets: &ListExpr, body: &Stmt, res: ResultLoc) {
        if let Some(name) = self.on_return_var(body) {
            self.list_expr(targets);
            let index = self.constant_atom(name);
            self.emit(Op::GetOn(index));
            self.emit(Op::SetResult);
            if res == ResultLoc::Stack {
                self.emit(Op::PushResult);
            }
            return;
        }
        let body_res = if res == ResultLoc::Ignore {
            ResultLoc::Ignore
        } else {
            ResultLoc::Return
        };
        self.list_expr(targets);
        self.emit(Op::PushSettings);
        self.stmt(body, body_res);
        self.emit(Op::PopSettings);
        if res == ResultLoc::Stack {
            self.emit(Op::PushResult);
        }
    }

    /// Matches `return $(var)` with a static, unmodified, non-positional
    /// variable name.
    fn on_return_var(&mut self, body: &Stmt) -> Option<Atom> {
        let StmtKind::Return(value) = &body.kind else {
            return None;
        };
        let [ListItem::Word(word)] = value.items.as_slice() else {
            return None;
        };
        let group = self.parse_word(word);
        let [Node::Variable(var)] = group.0.as_slice() else {
            return None;
        };
        if var.subscript.is_some() || !var.modifiers.is_empty() {
            return None;
        }
        let name = var.name.as_literal()?;
        if positional_index(name.as_str()).is_some() {
            return None;
        }
        Some(name.clone())
    }

    // ---- conditions ----

    fn cond(&mut self, cond: &Cond, target: Label, jump_if_true: bool) {
        match cond {
            Cond::Truthy(expr) => {
                self.list_expr(expr);
                self.branch(
                    target,
                    if jump_if_true {
                        Op::JumpNotEmpty
                    } else {
                        Op::JumpEmpty
                    },
                );
            }
            Cond::Eq(a, b) => self.compare(a, b, target, jump_if_true, Op::JumpEq, Op::JumpNe),
            Cond::Ne(a, b) => self.compare(a, b, target, jump_if_true, Op::JumpNe, Op::JumpEq),
            Cond::Lt(a, b) => self.compare(a, b, target, jump_if_true, Op::JumpLt, Op::JumpGe),
            Cond::Le(a, b) => self.compare(a, b, target, jump_if_true, Op::JumpLe, Op::JumpGt),
            Cond::Gt(a, b) => self.compare(a, b, target, jump_if_true, Op::JumpGt, Op::JumpLe),
            Cond::Ge(a, b) => self.compare(a, b, target, jump_if_true, Op::JumpGe, Op::JumpLt),
            Cond::In(a, b) => self.compare(a, b, target, jump_if_true, Op::JumpIn, Op::JumpNotIn),
            Cond::Not(inner) => self.cond(inner, target, !jump_if_true),
            Cond::And(left, right) => {
                if jump_if_true {
                    let fall = self.new_label();
                    self.cond(left, fall, false);
                    self.cond(right, target, true);
                    self.place(fall);
                } else {
                    self.cond(left, target, false);
                    self.cond(right, target, false);
                }
            }
            Cond::Or(left, right) => {
                if jump_if_true {
                    self.cond(left, target, true);
                    self.cond(right, target, true);
                } else {
                    let fall = self.new_label();
                    self.cond(left, fall, true);
                    self.cond(right, target, false);
                    self.place(fall);
                }
            }
        }
    }

    fn compare(
        &mut self,
        a: &ListExpr,
        b: &ListExpr,
        target: Label,
        jump_if_true: bool,
        when_true: fn(i32) -> Op,
        when_false: fn(i32) -> Op,
    ) {
        self.list_expr(a);
        self.list_expr(b);
        self.branch(target, if jump_if_true { when_true } else { when_false });
    }

    // ---- expressions ----

    fn parse_word(&mut self, word: &str) -> NodeGroup {
        let file = self.file.clone();
        ExpandParser::new(&mut *self.interner, &mut *self.diag, &file, self.line).parse(word)
    }

    fn list_expr(&mut self, expr: &ListExpr) {
        if expr.items.is_empty() {
            self.emit(Op::PushEmpty);
            return;
        }
        for (i, item) in expr.items.iter().enumerate() {
            match item {
                ListItem::Word(word) => {
                    let group = self.parse_word(word);
                    self.node_group(&group);
                }
                ListItem::Invoke(invocation) => self.invocation(invocation, ResultLoc::Stack),
            }
            if i > 0 {
                self.emit(Op::AppendList);
            }
        }
    }

    /// The single-statically-known-name fast path shared by assignment
    /// forms: returns the name when there is exactly one literal name,
    /// otherwise pushes the name list and returns `None`.
    fn names_operand(&mut self, expr: &ListExpr) -> Option<Atom> {
        if let [ListItem::Word(word)] = expr.items.as_slice() {
            let group = self.parse_word(word);
            if let Some(name) = group.as_literal() {
                return Some(name.clone());
            }
            self.node_group(&group);
            return None;
        }
        self.list_expr(expr);
        None
    }

    fn node_group(&mut self, group: &NodeGroup) {
        match group.0.as_slice() {
            [] => {
                self.emit(Op::PushEmpty);
            }
            [node] => self.node(node),
            nodes => {
                for node in nodes {
                    self.node(node);
                }
                self.emit(Op::Combine(nodes.len()));
            }
        }
    }

    fn node(&mut self, node: &Node) {
        match node {
            Node::Literal(atom) => {
                let index = self.constant_atom(atom.clone());
                self.emit(Op::PushConstant(index));
            }
            Node::Variable(var) => self.variable(var),
            Node::File(file) => {
                self.emit(Op::BufferBegin);
                self.node_group(&file.contents);
                self.emit(Op::BufferAppend);
                self.node_group(&file.filename);
                self.emit(Op::BufferFlush);
            }
        }
    }

    fn variable(&mut self, var: &VarRef) {
        match var.name.as_literal() {
            Some(name) => match positional_index(name.as_str()) {
                Some(group) => {
                    self.emit(Op::PushArg(group));
                }
                None => {
                    let index = self.constant_atom(name.clone());
                    self.emit(Op::PushVar(index));
                }
            },
            None => {
                self.node_group(&var.name);
                self.emit(Op::PushVars);
            }
        }
        if let Some(subscript) = &var.subscript {
            self.node_group(subscript);
            self.emit(Op::ApplySubscript);
        }
        if !var.modifiers.is_empty() {
            for modifier in &var.modifiers {
                self.node_group(modifier);
            }
            self.emit(Op::ApplyModifiers(var.modifiers.len()));
        }
    }

    fn invocation(&mut self, invocation: &Invocation, res: ResultLoc) {
        let groups = invocation.args.len();
        for arg in &invocation.args {
            self.list_expr(arg);
        }
        let mut lowered_member = false;
        if let [ListItem::Word(word)] = invocation.rule.items.as_slice() {
            let group = self.parse_word(word);
            if let Some(method) = member_method(&group) {
                // object-oriented dot-call sugar: resolve through the
                // object's grist
                self.node(&group.0[0]);
                self.emit(Op::GetGrist);
                let method = self.constant(&method);
                self.emit(Op::CallMember { method, groups });
                lowered_member = true;
            } else {
                self.node_group(&group);
            }
        } else {
            self.list_expr(&invocation.rule);
        }
        if !lowered_member {
            self.emit(Op::CallRule(groups));
        }
        self.settle_value(res);
    }

    /// Actions bind lists are literal variable names; anything dynamic is
    /// reported and skipped.
    fn bind_list(&mut self, bind: &Option<ListExpr>) -> Vec<Atom> {
        let Some(bind) = bind else {
            return Vec::new();
        };
        let mut names = Vec::new();
        for item in &bind.items {
            match item {
                ListItem::Word(word) if !word.contains("$(") => {
                    names.push(self.interner.intern(word));
                }
                _ => {
                    let file = self.file.clone();
                    self.diag
                        .report(&file, self.line, "actions bind list entries must be literal");
                }
            }
        }
        names
    }

    fn action_text(&mut self, text: &str) {
        let file = self.file.clone();
        let groups = {
            let mut parser =
                ExpandParser::new(&mut *self.interner, &mut *self.diag, &file, self.line);
            parser.parse_action_text(text)
        };
        self.emit(Op::BufferBegin);
        for group in &groups {
            self.node_group(group);
            self.emit(Op::BufferAppend);
        }
        // expanded action text goes to the stdio proxy
        let stdout = self.constant("STDOUT");
        self.emit(Op::PushConstant(stdout));
        self.emit(Op::BufferFlush);
        self.emit(Op::Discard);
    }
}

/// `<` and `>` are argument groups 0 and 1; `1`…`19` address groups by
/// number, with `$(1)` aliasing `$(<)`.
fn positional_index(name: &str) -> Option<usize> {
    match name {
        "<" => Some(0),
        ">" => Some(1),
        _ => name
            .parse::<usize>()
            .ok()
            .filter(|n| (1..=19).contains(n))
            .map(|n| n - 1),
    }
}

/// Detects the member-call shape: exactly two parts, the second a literal
/// `.method` with a non-empty method name.
fn member_method(group: &NodeGroup) -> Option<String> {
    if group.0.len() != 2 {
        return None;
    }
    let Node::Literal(lit) = &group.0[1] else {
        return None;
    };
    let method = lit.as_str().strip_prefix('.')?;
    (!method.is_empty()).then(|| method.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast;
    use crate::host::MemoryDiagnostics;
    use expect_test::expect;

    fn disassemble(stmts: &[Stmt]) -> String {
        let mut interner = Interner::new();
        let mut diag = MemoryDiagnostics::default();
        let procedure = Compiler::new(&mut interner, &mut diag).compile(stmts);
        let messages = diag.messages();
        assert!(messages.is_empty(), "diagnostics: {messages:?}");
        procedure.body().unwrap().disassemble()
    }

    #[test]
    fn assignment_lowering() {
        let stmts = [ast::set("x", &["a"])];
        expect![[r#"
            0000: push-constant "a"
            0001: set "x"
            0002: set-result
            0003: return
        "#]]
        .assert_eq(&disassemble(&stmts));
    }

    #[test]
    fn if_else_lowering() {
        let stmts = [Stmt::new(StmtKind::If {
            cond: Cond::Truthy(ListExpr::word("$(x)")),
            then_branch: vec![ast::set("y", &["1"])],
            else_branch: Some(Box::new(Stmt::new(StmtKind::Block(vec![ast::set(
                "y",
                &["2"],
            )])))),
        })];
        expect![[r#"
            0000: push-var "x"
            0001: jump-empty +4
            0002: push-constant "1"
            0003: set "y"
            0004: set-result
            0005: jump +3
            0006: push-constant "2"
            0007: set "y"
            0008: set-result
            0009: return
        "#]]
        .assert_eq(&disassemble(&stmts));
    }

    #[test]
    fn foreach_lowering() {
        let stmts = [Stmt::new(StmtKind::For {
            var: "v".to_owned(),
            local: false,
            list: ListExpr::word("$(items)"),
            body: vec![ast::append("out", &["$(v)"])],
        })];
        expect![[r#"
            0000: push-empty
            0001: set-result
            0002: push-var "items"
            0003: for-init
            0004: for-next +6
            0005: set "v"
            0006: discard
            0007: push-var "v"
            0008: append "out"
            0009: discard
            0010: jump -7
            0011: return
        "#]]
        .assert_eq(&disassemble(&stmts));
    }

    #[test]
    fn short_circuit_and_lowering() {
        let stmts = [Stmt::new(StmtKind::While {
            cond: Cond::And(
                Box::new(Cond::Truthy(ListExpr::word("$(a)"))),
                Box::new(Cond::Truthy(ListExpr::word("$(b)"))),
            ),
            body: vec![ast::set("x", &["1"])],
        })];
        // body res is Return (final statement); the loop pre-seeds empty
        expect![[r#"
            0000: push-empty
            0001: set-result
            0002: jump +3
            0003: push-constant "1"
            0004: set "x"
            0005: set-result
            0006: push-var "a"
            0007: jump-empty +2
            0008: push-var "b"
            0009: jump-not-empty -7
            0010: return
        "#]]
        .assert_eq(&disassemble(&stmts));
    }

    #[test]
    fn member_call_detection() {
        let stmts = [Stmt::new(StmtKind::Invoke(Invocation::named(
            "$(obj).configure",
            vec![ListExpr::word("arg")],
        )))];
        let listing = disassemble(&stmts);
        assert!(listing.contains("get-grist"), "{listing}");
        assert!(listing.contains("call-member \"configure\" 1"), "{listing}");
    }

    #[test]
    fn plain_dotted_name_is_not_member_call() {
        let stmts = [Stmt::new(StmtKind::Invoke(Invocation::named(
            "a.b",
            vec![],
        )))];
        let listing = disassemble(&stmts);
        assert!(listing.contains("call-rule 0"), "{listing}");
        assert!(!listing.contains("call-member"), "{listing}");
    }

    #[test]
    fn unresolved_reference_still_compiles() {
        let mut interner = Interner::new();
        let mut diag = MemoryDiagnostics::default();
        let stmts = [ast::set("x", &["$(broken"])];
        let procedure = Compiler::new(&mut interner, &mut diag).compile(&stmts);
        assert_eq!(diag.messages().len(), 1);
        assert!(procedure.body().is_some());
    }
}
