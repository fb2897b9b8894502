//! Compiled form: the instruction set, procedure bodies and the native
//! procedure bridge.
//!
//! Every instruction payload is self-describing: a constant-pool index, a
//! relative branch offset, or an operand count, each in its own variant.
//! No opcode reinterprets a generic immediate.

use std::fmt;
use std::rc::Rc;

use crate::ast::ActionFlags;
use crate::atom::Atom;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::formals::FormalGroups;
use crate::frame::Frame;
use crate::list::StringList;

/// Branch payloads are relative: the next pc is `pc + 1 + offset`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    // stack manipulation
    PushEmpty,
    PushConstant(usize),
    /// Positional pseudo-variables: group index into the frame's actuals.
    PushArg(usize),
    PushVar(usize),
    PushVarFixed(usize),
    /// Pops a name list, concatenates every named variable's value.
    PushVars,
    AppendList,
    Swap,
    Discard,
    // comparison and control branches
    Jump(i32),
    JumpEmpty(i32),
    JumpNotEmpty(i32),
    JumpEq(i32),
    JumpNe(i32),
    JumpLt(i32),
    JumpLe(i32),
    JumpGt(i32),
    JumpGe(i32),
    JumpIn(i32),
    JumpNotIn(i32),
    /// Switch-case probe: pops the pattern, peeks the subject.
    JumpNotGlob(i32),
    // loop primitives
    ForInit,
    ForNext(i32),
    // result staging
    SetResult,
    PushResult,
    Return,
    // scoped bindings
    PushLocal(usize),
    PopLocal(usize),
    PushLocalFixed(usize),
    PopLocalFixed(usize),
    PushLocalGroup,
    PopLocalGroup,
    // variable writes (value is peeked, not popped)
    Set(usize),
    Append(usize),
    Default(usize),
    SetFixed(usize),
    AppendFixed(usize),
    DefaultFixed(usize),
    SetGroup,
    AppendGroup,
    DefaultGroup,
    // per-target settings writes (targets popped, value peeked)
    SetOn(usize),
    AppendOn(usize),
    DefaultOn(usize),
    SetOnGroup,
    AppendOnGroup,
    DefaultOnGroup,
    // settings overlays
    PushSettings,
    PopSettings,
    GetOn(usize),
    // calls and definitions
    CallRule(usize),
    CallMember { method: usize, groups: usize },
    DefineRule(usize),
    DefineActions(usize),
    // module and class regions; the payload is the relative offset of the
    // matching PopModule, so region skipping is a single jump
    PushModule(i32),
    PopModule,
    PushClass(i32),
    // expansion primitives
    Combine(usize),
    ApplySubscript,
    ApplyModifiers(usize),
    GetGrist,
    // output buffer
    BufferBegin,
    BufferAppend,
    BufferFlush,
}

impl Op {
    /// The patchable branch payload, when this instruction has one.
    pub(crate) fn branch_offset_mut(&mut self) -> Option<&mut i32> {
        match self {
            Op::Jump(o)
            | Op::JumpEmpty(o)
            | Op::JumpNotEmpty(o)
            | Op::JumpEq(o)
            | Op::JumpNe(o)
            | Op::JumpLt(o)
            | Op::JumpLe(o)
            | Op::JumpGt(o)
            | Op::JumpGe(o)
            | Op::JumpIn(o)
            | Op::JumpNotIn(o)
            | Op::JumpNotGlob(o)
            | Op::ForNext(o)
            | Op::PushModule(o)
            | Op::PushClass(o) => Some(o),
            _ => None,
        }
    }
}

/// A nested rule definition awaiting registration at execution time.
#[derive(Clone)]
pub struct SubProc {
    pub name: Atom,
    pub procedure: Procedure,
    pub local: bool,
}

/// An `actions` body: compiled text expansion plus the flags and bind list
/// the action-execution layer consumes.
#[derive(Clone)]
pub struct ActionDef {
    pub name: Atom,
    pub body: Procedure,
    pub flags: ActionFlags,
    pub bind: Vec<Atom>,
}

/// One compiled, interpreted procedure.
///
/// The constant pool and the nested tables are `Rc`-shared with any
/// specialized copies, so dropping a derived copy never frees data the
/// generic original still owns. `code` always ends in `Return`.
pub struct ProcedureBody {
    pub code: Vec<Op>,
    pub constants: Rc<Vec<Atom>>,
    pub subprocedures: Rc<Vec<SubProc>>,
    pub actions: Rc<Vec<ActionDef>>,
    pub formals: Option<FormalGroups>,
    pub file: Rc<str>,
    pub line: u32,
    /// The module this copy's fixed-slot indices belong to.
    pub specialized_for: Option<Atom>,
    /// Back-link from a specialized copy to the by-name original.
    pub generic: Option<Rc<ProcedureBody>>,
}

impl ProcedureBody {
    pub fn constant(&self, index: usize) -> &Atom {
        &self.constants[index]
    }

    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        for (i, op) in self.code.iter().enumerate() {
            out.push_str(&format!("{i:04}: {}\n", self.render(op)));
        }
        for (i, sub) in self.subprocedures.iter().enumerate() {
            out.push_str(&format!("sub {i}: rule {}\n", sub.name));
        }
        for (i, action) in self.actions.iter().enumerate() {
            out.push_str(&format!("act {i}: actions {}\n", action.name));
        }
        out
    }

    fn render(&self, op: &Op) -> String {
        let c = |index: &usize| format!("{:?}", self.constants[*index].as_str());
        match op {
            Op::PushEmpty => "push-empty".into(),
            Op::PushConstant(i) => format!("push-constant {}", c(i)),
            Op::PushArg(i) => format!("push-arg {i}"),
            Op::PushVar(i) => format!("push-var {}", c(i)),
            Op::PushVarFixed(s) => format!("push-var-fixed #{s}"),
            Op::PushVars => "push-vars".into(),
            Op::AppendList => "append-list".into(),
            Op::Swap => "swap".into(),
            Op::Discard => "discard".into(),
            Op::Jump(o) => format!("jump {o:+}"),
            Op::JumpEmpty(o) => format!("jump-empty {o:+}"),
            Op::JumpNotEmpty(o) => format!("jump-not-empty {o:+}"),
            Op::JumpEq(o) => format!("jump-eq {o:+}"),
            Op::JumpNe(o) => format!("jump-ne {o:+}"),
            Op::JumpLt(o) => format!("jump-lt {o:+}"),
            Op::JumpLe(o) => format!("jump-le {o:+}"),
            Op::JumpGt(o) => format!("jump-gt {o:+}"),
            Op::JumpGe(o) => format!("jump-ge {o:+}"),
            Op::JumpIn(o) => format!("jump-in {o:+}"),
            Op::JumpNotIn(o) => format!("jump-not-in {o:+}"),
            Op::JumpNotGlob(o) => format!("jump-not-glob {o:+}"),
            Op::ForInit => "for-init".into(),
            Op::ForNext(o) => format!("for-next {o:+}"),
            Op::SetResult => "set-result".into(),
            Op::PushResult => "push-result".into(),
            Op::Return => "return".into(),
            Op::PushLocal(i) => format!("push-local {}", c(i)),
            Op::PopLocal(i) => format!("pop-local {}", c(i)),
            Op::PushLocalFixed(s) => format!("push-local-fixed #{s}"),
            Op::PopLocalFixed(s) => format!("pop-local-fixed #{s}"),
            Op::PushLocalGroup => "push-local-group".into(),
            Op::PopLocalGroup => "pop-local-group".into(),
            Op::Set(i) => format!("set {}", c(i)),
            Op::Append(i) => format!("append {}", c(i)),
            Op::Default(i) => format!("default {}", c(i)),
            Op::SetFixed(s) => format!("set-fixed #{s}"),
            Op::AppendFixed(s) => format!("append-fixed #{s}"),
            Op::DefaultFixed(s) => format!("default-fixed #{s}"),
            Op::SetGroup => "set-group".into(),
            Op::AppendGroup => "append-group".into(),
            Op::DefaultGroup => "default-group".into(),
            Op::SetOn(i) => format!("set-on {}", c(i)),
            Op::AppendOn(i) => format!("append-on {}", c(i)),
            Op::DefaultOn(i) => format!("default-on {}", c(i)),
            Op::SetOnGroup => "set-on-group".into(),
            Op::AppendOnGroup => "append-on-group".into(),
            Op::DefaultOnGroup => "default-on-group".into(),
            Op::PushSettings => "push-settings".into(),
            Op::PopSettings => "pop-settings".into(),
            Op::GetOn(i) => format!("get-on {}", c(i)),
            Op::CallRule(n) => format!("call-rule {n}"),
            Op::CallMember { method, groups } => {
                format!("call-member {} {groups}", c(method))
            }
            Op::DefineRule(i) => format!("define-rule {i}"),
            Op::DefineActions(i) => format!("define-actions {i}"),
            Op::PushModule(o) => format!("push-module {o:+}"),
            Op::PopModule => "pop-module".into(),
            Op::PushClass(o) => format!("push-class {o:+}"),
            Op::Combine(n) => format!("combine {n}"),
            Op::ApplySubscript => "apply-subscript".into(),
            Op::ApplyModifiers(n) => format!("apply-modifiers {n}"),
            Op::GetGrist => "get-grist".into(),
            Op::BufferBegin => "buffer-begin".into(),
            Op::BufferAppend => "buffer-append".into(),
            Op::BufferFlush => "buffer-flush".into(),
        }
    }
}

impl fmt::Debug for ProcedureBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProcedureBody[{}:{}]", self.file, self.line)?;
        if let Some(module) = &self.specialized_for {
            write!(f, " specialized for \"{module}\"")?;
        }
        Ok(())
    }
}

/// Host-provided callable invoked like a compiled procedure. Declared
/// formals are still type-checked before the call.
pub type NativeFn = fn(&mut Engine, &Frame<'_>) -> Result<StringList, EngineError>;

pub struct NativeProcedure {
    pub name: Atom,
    pub func: NativeFn,
    pub flags: u32,
    pub formals: Option<FormalGroups>,
}

#[derive(Clone)]
pub enum Procedure {
    Interpreted(Rc<ProcedureBody>),
    Native(Rc<NativeProcedure>),
}

impl Procedure {
    pub fn body(&self) -> Option<&Rc<ProcedureBody>> {
        match self {
            Procedure::Interpreted(body) => Some(body),
            Procedure::Native(_) => None,
        }
    }

    pub fn formals(&self) -> Option<&FormalGroups> {
        match self {
            Procedure::Interpreted(body) => body.formals.as_ref(),
            Procedure::Native(native) => native.formals.as_ref(),
        }
    }
}
