//! The interpreter: a single-threaded dispatch loop over a procedure's
//! instruction array, executing against the operand stack and the current
//! call frame. Procedure calls are plain nested invocations of the same
//! loop; recursion depth is bounded by the host call stack.

use anyhow::anyhow;
use itertools::Itertools;
use tracing::trace;

use crate::atom::Atom;
use crate::bytecode::{Op, Procedure, ProcedureBody};
use crate::engine::Engine;
use crate::error::{ArgumentError, EngineError};
use crate::expand::edit::{Subscript, VarEdit};
use crate::formals::{FormalGroups, PendingCheck};
use crate::frame::Frame;
use crate::list::StringList;
use crate::module::{ModuleRef, SavedBinding};
use crate::rules::RuleEntry;
use crate::stack::{Cursor, OperandStack};

impl Engine {
    /// Invokes a procedure against a prepared frame: binds and checks
    /// declared formals, runs the body, and guarantees the matching unbind
    /// on every exit path.
    pub(crate) fn invoke(
        &mut self,
        procedure: &Procedure,
        frame: &Frame<'_>,
        stack: &mut OperandStack,
    ) -> Result<StringList, EngineError> {
        match procedure {
            Procedure::Native(native) => {
                if let Some(formals) = &native.formals {
                    let checks = formals
                        .typecheck(&frame.rule_name, &frame.args)
                        .map_err(|e| self.argument_failure(e, formals, frame))?;
                    self.run_checks(checks, formals, frame, stack)?;
                }
                (native.func)(self, frame)
            }
            Procedure::Interpreted(body) => match &body.formals {
                Some(formals) => {
                    let (saved, checks) = formals
                        .bind(&frame.rule_name, &frame.module, &frame.args)
                        .map_err(|e| self.argument_failure(e, formals, frame))?;
                    let result = self
                        .run_checks(checks, formals, frame, stack)
                        .and_then(|()| self.exec(body, frame, stack));
                    FormalGroups::unbind(saved);
                    result
                }
                None => self.exec(body, frame, stack),
            },
        }
    }

    /// Calls a named rule visible from `module`.
    pub(crate) fn call_rule(
        &mut self,
        name: &Atom,
        args: Vec<StringList>,
        caller: &Frame<'_>,
        stack: &mut OperandStack,
        module: &ModuleRef,
    ) -> Result<StringList, EngineError> {
        let Some(entry) = self.rules.lookup(module, name, &self.modules) else {
            // a bare actions body is invocable; scheduling the command is
            // the build layer's concern, the call itself yields nothing
            if self.rules.find_action(module, name).is_some() {
                return Ok(StringList::new());
            }
            return Err(EngineError::UnknownRule {
                rule: name.as_str().to_owned(),
                module: module.borrow().name().as_str().to_owned(),
            });
        };
        self.call_entry(&entry, args, name, caller, stack)
    }

    fn call_entry(
        &mut self,
        entry: &RuleEntry,
        args: Vec<StringList>,
        name: &Atom,
        caller: &Frame<'_>,
        stack: &mut OperandStack,
    ) -> Result<StringList, EngineError> {
        let (file, line, native) = match &entry.procedure {
            Procedure::Interpreted(body) => (body.file.clone(), body.line, false),
            Procedure::Native(_) => (caller.file.clone(), caller.line, true),
        };
        let child = caller.child(entry.module.clone(), args, name.clone(), file, line, native);
        self.invoke(&entry.procedure, &child, stack)
    }

    /// Runs collected type checks through user-level rules in the
    /// well-known `typecheck` module. A missing checker accepts the value
    /// with a warning; a non-empty checker result is a fatal argument
    /// error.
    fn run_checks(
        &mut self,
        checks: Vec<PendingCheck>,
        formals: &FormalGroups,
        frame: &Frame<'_>,
        stack: &mut OperandStack,
    ) -> Result<(), EngineError> {
        if checks.is_empty() {
            return Ok(());
        }
        let tc_module_name = self.interner.intern("typecheck");
        let tc_module = self.modules.bind(&tc_module_name);
        for check in checks {
            let Some(entry) = self.rules.lookup(&tc_module, &check.check, &self.modules) else {
                self.diag.report(
                    &frame.file,
                    frame.line,
                    &format!("type check rule {} not found; value accepted", check.check),
                );
                continue;
            };
            let verdict =
                self.call_entry(&entry, vec![check.value.clone()], &check.check, frame, stack)?;
            if !verdict.is_empty() {
                let error = ArgumentError::TypeCheck {
                    rule: frame.rule_name.as_str().to_owned(),
                    check: check.check.as_str().to_owned(),
                    parameter: check.parameter.as_str().to_owned(),
                    message: verdict.join(" "),
                };
                return Err(self.argument_failure(error, formals, frame));
            }
        }
        Ok(())
    }

    /// Renders the fail-fast argument diagnostic: the error, the formal
    /// signature, the actuals received, and the call backtrace.
    fn argument_failure(
        &mut self,
        error: ArgumentError,
        formals: &FormalGroups,
        frame: &Frame<'_>,
    ) -> EngineError {
        let mut message = error.to_string();
        message.push_str(&format!("\nrule {} {}\n", frame.rule_name, formals));
        for (i, group) in frame.args.iter().enumerate() {
            message.push_str(&format!("  argument list {}: {}\n", i + 1, group));
        }
        message.push_str("backtrace:\n");
        message.push_str(&frame.backtrace());
        self.diag.report(&frame.file, frame.line, &message);
        EngineError::Argument(error)
    }

    fn exec(
        &mut self,
        body: &ProcedureBody,
        frame: &Frame<'_>,
        stack: &mut OperandStack,
    ) -> Result<StringList, EngineError> {
        let entry_depth = stack.depth();
        let mut pc = 0usize;
        let mut result = StringList::new();
        let mut module = frame.module.clone();
        let mut buffers: Vec<String> = Vec::new();

        loop {
            let op = body
                .code
                .get(pc)
                .cloned()
                .ok_or_else(|| anyhow!("program counter {pc} out of bounds"))?;
            trace!(pc, op = ?op, "dispatch");
            pc += 1;
            match op {
                Op::PushEmpty => stack.push_value(StringList::new()),
                Op::PushConstant(c) => {
                    stack.push_value(StringList::single(body.constant(c).clone()))
                }
                Op::PushArg(group) => stack.push_value(frame.arg(group)),
                Op::PushVar(c) => {
                    let value = module.borrow().get(body.constant(c));
                    stack.push_value(value);
                }
                Op::PushVarFixed(slot) => {
                    let value = module.borrow().slot_get(slot);
                    stack.push_value(value);
                }
                Op::PushVars => {
                    let names = stack.pop_value()?;
                    let mut out = StringList::new();
                    for name in names.iter() {
                        out = out.concat(&module.borrow().get(name));
                    }
                    stack.push_value(out);
                }
                Op::AppendList => {
                    let right = stack.pop_value()?;
                    let left = stack.pop_value()?;
                    stack.push_value(left.concat(&right));
                }
                Op::Swap => stack.swap()?,
                Op::Discard => {
                    stack.pop_value()?;
                }

                Op::Jump(off) => pc = offset_pc(pc, off),
                Op::JumpEmpty(off) => {
                    if stack.pop_value()?.is_empty() {
                        pc = offset_pc(pc, off);
                    }
                }
                Op::JumpNotEmpty(off) => {
                    if !stack.pop_value()?.is_empty() {
                        pc = offset_pc(pc, off);
                    }
                }
                Op::JumpEq(off) => pc = self.compare_branch(stack, pc, off, |o| o.is_eq())?,
                Op::JumpNe(off) => pc = self.compare_branch(stack, pc, off, |o| o.is_ne())?,
                Op::JumpLt(off) => pc = self.compare_branch(stack, pc, off, |o| o.is_lt())?,
                Op::JumpLe(off) => pc = self.compare_branch(stack, pc, off, |o| o.is_le())?,
                Op::JumpGt(off) => pc = self.compare_branch(stack, pc, off, |o| o.is_gt())?,
                Op::JumpGe(off) => pc = self.compare_branch(stack, pc, off, |o| o.is_ge())?,
                Op::JumpIn(off) => {
                    let patterns = stack.pop_value()?;
                    let subject = stack.pop_value()?;
                    if self.in_test(&subject, &patterns) {
                        pc = offset_pc(pc, off);
                    }
                }
                Op::JumpNotIn(off) => {
                    let patterns = stack.pop_value()?;
                    let subject = stack.pop_value()?;
                    if !self.in_test(&subject, &patterns) {
                        pc = offset_pc(pc, off);
                    }
                }
                Op::JumpNotGlob(off) => {
                    let pattern = stack.pop_value()?;
                    let matched = {
                        let subject = stack.peek_value()?;
                        let subject = subject.first().map_or("", Atom::as_str);
                        let pattern = pattern.first().map_or("", Atom::as_str);
                        self.glob.matches(pattern, subject)
                    };
                    if !matched {
                        pc = offset_pc(pc, off);
                    }
                }

                Op::ForInit => {
                    let list = stack.pop_value()?;
                    stack.push_cursor(Cursor { list, index: 0 });
                }
                Op::ForNext(off) => {
                    let next = {
                        let cursor = stack.peek_cursor_mut()?;
                        let atom = cursor.list.get(cursor.index).cloned();
                        if atom.is_some() {
                            cursor.index += 1;
                        }
                        atom
                    };
                    match next {
                        Some(atom) => stack.push_value(StringList::single(atom)),
                        None => {
                            stack.pop_cursor()?;
                            pc = offset_pc(pc, off);
                        }
                    }
                }

                Op::SetResult => result = stack.pop_value()?,
                Op::PushResult => stack.push_value(result.clone()),
                Op::Return => break,

                Op::PushLocal(c) => {
                    let value = stack.pop_value()?;
                    let binding = SavedBinding::bind(&module, body.constant(c), value);
                    stack.push_binding(binding);
                }
                Op::PopLocal(_) => stack.pop_binding()?.restore(),
                Op::PushLocalFixed(slot) => {
                    let value = stack.pop_value()?;
                    let name = module
                        .borrow()
                        .slot_name(slot)
                        .cloned()
                        .ok_or_else(|| anyhow!("fixed slot {slot} has no registered name"))?;
                    stack.push_binding(SavedBinding::bind(&module, &name, value));
                }
                Op::PopLocalFixed(_) => stack.pop_binding()?.restore(),
                Op::PushLocalGroup => {
                    let names = stack.pop_value()?;
                    let value = stack.pop_value()?;
                    for name in names.iter() {
                        stack.push_binding(SavedBinding::bind(&module, name, value.clone()));
                    }
                    stack.push_value(names);
                }
                Op::PopLocalGroup => {
                    let names = stack.pop_value()?;
                    for _ in names.iter() {
                        stack.pop_binding()?.restore();
                    }
                }

                Op::Set(c) => {
                    let value = stack.peek_value()?.clone();
                    module.borrow_mut().set(body.constant(c), value);
                }
                Op::Append(c) => {
                    let value = stack.peek_value()?.clone();
                    module.borrow_mut().append(body.constant(c), &value);
                }
                Op::Default(c) => {
                    let value = stack.peek_value()?.clone();
                    module.borrow_mut().set_default(body.constant(c), value);
                }
                Op::SetFixed(slot) => {
                    let value = stack.peek_value()?.clone();
                    module.borrow_mut().slot_set(slot, value);
                }
                Op::AppendFixed(slot) => {
                    let value = stack.peek_value()?.clone();
                    module.borrow_mut().slot_append(slot, &value);
                }
                Op::DefaultFixed(slot) => {
                    let value = stack.peek_value()?.clone();
                    module.borrow_mut().slot_default(slot, value);
                }
                Op::SetGroup | Op::AppendGroup | Op::DefaultGroup => {
                    let names = stack.pop_value()?;
                    let value = stack.peek_value()?.clone();
                    let mut inner = module.borrow_mut();
                    for name in names.iter() {
                        match op {
                            Op::SetGroup => inner.set(name, value.clone()),
                            Op::AppendGroup => inner.append(name, &value),
                            _ => inner.set_default(name, value.clone()),
                        }
                    }
                }

                Op::SetOn(c) | Op::AppendOn(c) | Op::DefaultOn(c) => {
                    let targets = stack.pop_value()?;
                    let value = stack.peek_value()?.clone();
                    let name = body.constant(c).clone();
                    self.write_on(&targets, &[name], &value, &op);
                }
                Op::SetOnGroup | Op::AppendOnGroup | Op::DefaultOnGroup => {
                    let targets = stack.pop_value()?;
                    let names = stack.pop_value()?;
                    let value = stack.peek_value()?.clone();
                    let names: Vec<Atom> = names.iter().cloned().collect();
                    self.write_on(&targets, &names, &value, &op);
                }

                Op::PushSettings => {
                    let targets = stack.pop_value()?;
                    let mut saved = Vec::new();
                    // read path: only the first listed target's overlay
                    if let Some(first) = targets.first() {
                        let target = self.targets.bind(first);
                        let settings = target.borrow().settings();
                        for (name, value) in settings {
                            saved.push(SavedBinding::bind(&module, &name, value));
                        }
                    }
                    stack.push_overlay(saved);
                }
                Op::PopSettings => {
                    let overlay = stack.pop_overlay()?;
                    for binding in overlay.into_iter().rev() {
                        binding.restore();
                    }
                }
                Op::GetOn(c) => {
                    let targets = stack.pop_value()?;
                    let name = body.constant(c);
                    let value = targets
                        .first()
                        .and_then(|t| self.targets.settings_lookup(t, name))
                        .unwrap_or_else(|| module.borrow().get(name));
                    stack.push_value(value);
                }

                Op::CallRule(groups) => {
                    let names = stack.pop_value()?;
                    let args = pop_groups(stack, groups)?;
                    if names.is_empty() {
                        self.diag.report(
                            &body.file,
                            body.line,
                            "rule name expanded to nothing; call skipped",
                        );
                        stack.push_value(StringList::new());
                    } else {
                        let mut out = StringList::new();
                        for name in names.iter() {
                            let value =
                                self.call_rule(name, args.clone(), frame, stack, &module)?;
                            out = out.concat(&value);
                        }
                        stack.push_value(out);
                    }
                }
                Op::CallMember { method, groups } => {
                    let objects = stack.pop_value()?;
                    let args = pop_groups(stack, groups)?;
                    let method = body.constant(method).clone();
                    if objects.is_empty() {
                        self.diag.report(
                            &body.file,
                            body.line,
                            "member call receiver expanded to nothing; call skipped",
                        );
                        stack.push_value(StringList::new());
                    } else {
                        let mut out = StringList::new();
                        for object in objects.iter() {
                            let instance = self.modules.bind(object);
                            let entry = self
                                .rules
                                .lookup_or_import(&instance, &method, &self.modules)
                                .ok_or_else(|| EngineError::UnknownRule {
                                    rule: method.as_str().to_owned(),
                                    module: object.as_str().to_owned(),
                                })?;
                            let value =
                                self.call_entry(&entry, args.clone(), &method, frame, stack)?;
                            out = out.concat(&value);
                        }
                        stack.push_value(out);
                    }
                }
                Op::DefineRule(index) => {
                    let sub = body
                        .subprocedures
                        .get(index)
                        .cloned()
                        .ok_or_else(|| anyhow!("subprocedure index {index} out of bounds"))?;
                    self.rules
                        .define(&module, &sub.name, sub.procedure, !sub.local);
                }
                Op::DefineActions(index) => {
                    let def = body
                        .actions
                        .get(index)
                        .cloned()
                        .ok_or_else(|| anyhow!("actions index {index} out of bounds"))?;
                    self.rules.define_actions(&module, def);
                }

                Op::PushModule(_) => {
                    let names = stack.pop_value()?;
                    let entered = match names.first() {
                        Some(name) => self.modules.bind(name),
                        None => self.modules.root(),
                    };
                    stack.push_module(module.clone());
                    module = entered;
                }
                Op::PushClass(_) => {
                    let names = stack.pop_value()?;
                    let bases = stack.pop_value()?;
                    let entered = match names.first() {
                        Some(name) => self.modules.bind_class(name, &bases),
                        None => {
                            self.diag.report(
                                &body.file,
                                body.line,
                                "class name expanded to nothing; using root module",
                            );
                            self.modules.root()
                        }
                    };
                    stack.push_module(module.clone());
                    module = entered;
                }
                Op::PopModule => module = stack.pop_module()?,

                Op::Combine(count) => {
                    let mut lists = Vec::with_capacity(count);
                    for _ in 0..count {
                        lists.push(stack.pop_value()?);
                    }
                    lists.reverse();
                    stack.push_value(self.combine(&lists));
                }
                Op::ApplySubscript => {
                    let subscript = stack.pop_value()?;
                    let value = stack.pop_value()?;
                    let parsed = subscript
                        .first()
                        .and_then(|spec| Subscript::parse(spec.as_str()));
                    match parsed {
                        Some(subscript) => stack.push_value(subscript.select(&value)),
                        None => {
                            self.diag.report(
                                &body.file,
                                body.line,
                                &format!("malformed subscript [{subscript}]"),
                            );
                            stack.push_value(StringList::new());
                        }
                    }
                }
                Op::ApplyModifiers(count) => {
                    let mut clauses = Vec::with_capacity(count);
                    for _ in 0..count {
                        clauses.push(stack.pop_value()?);
                    }
                    clauses.reverse();
                    let value = stack.pop_value()?;
                    let edit =
                        VarEdit::parse(clauses.iter().flat_map(|c| c.iter()).map(Atom::as_str));
                    let edited = edit.apply(&*self.paths, &mut self.interner, &value);
                    stack.push_value(edited);
                }
                Op::GetGrist => {
                    let value = stack.pop_value()?;
                    let mut out = StringList::new();
                    for atom in value.iter() {
                        let text = atom.as_str();
                        let gristed = text
                            .strip_prefix('<')
                            .and_then(|rest| rest.split_once('>'))
                            .map(|(grist, _)| grist);
                        match gristed {
                            Some(grist) => out.push(self.interner.intern(grist)),
                            None => out.push(atom.clone()),
                        }
                    }
                    stack.push_value(out);
                }

                Op::BufferBegin => buffers.push(String::new()),
                Op::BufferAppend => {
                    let value = stack.pop_value()?;
                    let buffer = buffers
                        .last_mut()
                        .ok_or_else(|| anyhow!("buffer append without an open buffer"))?;
                    buffer.push_str(&value.join(" "));
                }
                Op::BufferFlush => {
                    let filename = stack.pop_value()?;
                    let text = buffers
                        .pop()
                        .ok_or_else(|| anyhow!("buffer flush without an open buffer"))?;
                    match filename.first().map(Atom::as_str) {
                        Some("STDOUT") => {
                            self.sink.write_stdout(&text);
                            stack.push_value(filename);
                        }
                        Some("STDERR") => {
                            self.sink.write_stderr(&text);
                            stack.push_value(filename);
                        }
                        Some(name) => {
                            self.sink.write_file(name, &text).map_err(|source| {
                                EngineError::FileWrite {
                                    name: name.to_owned(),
                                    source,
                                }
                            })?;
                            stack.push_value(filename);
                        }
                        None => {
                            let temp = self.paths.temp_file();
                            self.sink.write_file(&temp, &text).map_err(|source| {
                                EngineError::FileWrite {
                                    name: temp.clone(),
                                    source,
                                }
                            })?;
                            stack.push_value(StringList::single(self.interner.intern(&temp)));
                        }
                    }
                }
            }
        }

        debug_assert_eq!(
            stack.depth(),
            entry_depth,
            "operand stack imbalance on return from {}",
            frame.rule_name
        );
        Ok(result)
    }

    fn compare_branch(
        &mut self,
        stack: &mut OperandStack,
        pc: usize,
        off: i32,
        take: fn(std::cmp::Ordering) -> bool,
    ) -> Result<usize, EngineError> {
        let right = stack.pop_value()?;
        let left = stack.pop_value()?;
        if take(left.compare(&right)) {
            Ok(offset_pc(pc, off))
        } else {
            Ok(pc)
        }
    }

    /// Set membership: every element of `subject` glob-matches some
    /// element of `patterns`. An empty subject is vacuously in any list.
    fn in_test(&self, subject: &StringList, patterns: &StringList) -> bool {
        subject.iter().all(|element| {
            patterns
                .iter()
                .any(|pattern| self.glob.matches(pattern.as_str(), element.as_str()))
        })
    }

    /// Cartesian product concatenation: the leftmost list varies slowest.
    /// Any empty operand collapses the whole product to empty.
    fn combine(&mut self, lists: &[StringList]) -> StringList {
        if lists.iter().any(StringList::is_empty) {
            return StringList::new();
        }
        let mut out = StringList::new();
        for combo in lists.iter().map(StringList::iter).multi_cartesian_product() {
            let mut text = String::new();
            for atom in combo {
                text.push_str(atom.as_str());
            }
            out.push(self.interner.intern(&text));
        }
        out
    }

    fn write_on(&mut self, targets: &StringList, names: &[Atom], value: &StringList, op: &Op) {
        // write path: every listed target is updated
        for target_name in targets.iter() {
            let target = self.targets.bind(target_name);
            let mut inner = target.borrow_mut();
            for name in names {
                match op {
                    Op::SetOn(_) | Op::SetOnGroup => inner.set(name, value.clone()),
                    Op::AppendOn(_) | Op::AppendOnGroup => inner.append(name, value),
                    _ => inner.set_default(name, value.clone()),
                }
            }
        }
    }
}

fn offset_pc(pc: usize, off: i32) -> usize {
    (pc as i64 + i64::from(off)) as usize
}

fn pop_groups(stack: &mut OperandStack, groups: usize) -> anyhow::Result<Vec<StringList>> {
    let mut args = Vec::with_capacity(groups);
    for _ in 0..groups {
        args.push(stack.pop_value()?);
    }
    args.reverse();
    Ok(args)
}
