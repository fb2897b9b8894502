//! The engine: the collaborator bundle and the public entry points for
//! compiling and running procedures, plus the fail-fast boundary that
//! turns an argument error into the host's process abort.

use crate::ast::Stmt;
use crate::atom::Interner;
use crate::bytecode::Procedure;
use crate::compile::Compiler;
use crate::error::EngineError;
use crate::frame::Frame;
use crate::host::{Diagnostics, DiskSink, FileSink, Glob, ShellGlob, StderrDiagnostics};
use crate::list::StringList;
use crate::module::Modules;
use crate::pathspec::{DefaultPaths, Paths};
use crate::rules::Rules;
use crate::stack::OperandStack;
use crate::target::Targets;

/// The exit code handed to the diagnostics collaborator when an
/// evaluation aborts.
pub const ABORT_EXIT_CODE: i32 = 1;

/// One evaluation context: the interning table, the module/target/rule
/// registries, and the host collaborators. Single-threaded by design;
/// concurrent evaluations need an engine and an operand stack each.
pub struct Engine {
    pub interner: Interner,
    pub modules: Modules,
    pub targets: Targets,
    pub rules: Rules,
    pub diag: Box<dyn Diagnostics>,
    pub glob: Box<dyn Glob>,
    pub paths: Box<dyn Paths>,
    pub sink: Box<dyn FileSink>,
    scratch: OperandStack,
}

impl Engine {
    pub fn new() -> Self {
        let mut interner = Interner::new();
        let modules = Modules::new(&mut interner);
        Engine {
            interner,
            modules,
            targets: Targets::new(),
            rules: Rules::new(),
            diag: Box::new(StderrDiagnostics),
            glob: Box::new(ShellGlob),
            paths: Box::new(DefaultPaths),
            sink: Box::new(DiskSink),
            scratch: OperandStack::new(),
        }
    }

    /// Compiles a statement tree into a procedure.
    pub fn compile(&mut self, stmts: &[Stmt]) -> Procedure {
        Compiler::new(&mut self.interner, &mut *self.diag).compile(stmts)
    }

    /// Compiles raw action text in whitespace-tokenized mode.
    pub fn compile_action_body(&mut self, text: &str, file: &str, line: u32) -> Procedure {
        Compiler::new(&mut self.interner, &mut *self.diag).compile_action_body(text, file, line)
    }

    /// Runs a procedure against a prepared frame. Argument errors come
    /// back as typed errors; they are unrecoverable within the evaluation
    /// but composable at this boundary.
    pub fn run(
        &mut self,
        procedure: &Procedure,
        frame: &Frame<'_>,
        stack: &mut OperandStack,
    ) -> Result<StringList, EngineError> {
        self.invoke(procedure, frame, stack)
    }

    /// For action bodies: the value is discarded, only the output-buffer
    /// side effects matter.
    pub fn run_discarding_result(
        &mut self,
        procedure: &Procedure,
        frame: &Frame<'_>,
        stack: &mut OperandStack,
    ) -> Result<(), EngineError> {
        self.invoke(procedure, frame, stack).map(|_| ())
    }

    /// The fail-fast entry point: any evaluation error becomes the
    /// diagnostics collaborator's process abort.
    pub fn run_or_abort(
        &mut self,
        procedure: &Procedure,
        frame: &Frame<'_>,
        stack: &mut OperandStack,
    ) -> StringList {
        match self.invoke(procedure, frame, stack) {
            Ok(value) => value,
            Err(error) => {
                self.diag.report("", 0, &error.to_string());
                self.diag.abort(ABORT_EXIT_CODE)
            }
        }
    }

    /// Convenience entry: call a rule by name at the root module with the
    /// engine's own scratch stack.
    pub fn call(&mut self, rule: &str, args: Vec<StringList>) -> Result<StringList, EngineError> {
        let name = self.interner.intern(rule);
        let root = self.modules.root();
        let frame = Frame::root(root.clone(), name.clone());
        let mut stack = std::mem::take(&mut self.scratch);
        let result = self.call_rule(&name, args, &frame, &mut stack, &root);
        if result.is_err() {
            // a failed evaluation may leave operands behind
            stack.release();
        }
        self.scratch = stack;
        result
    }

    /// Releases the engine's operand-stack allocation.
    pub fn shutdown(&mut self) {
        self.scratch.release();
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
