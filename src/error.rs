use thiserror::Error;

/// Errors surfaced by `Engine::run`. Argument errors are unrecoverable
/// within an evaluation by policy; `run_or_abort` converts them into the
/// diagnostics collaborator's process abort at the boundary.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Argument(#[from] ArgumentError),
    #[error("unknown rule \"{rule}\" in module \"{module}\"")]
    UnknownRule { rule: String, module: String },
    #[error("error writing response file \"{name}\": {source}")]
    FileWrite {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Argument-binding failures: missing or extra actuals, or a declared
/// type-check rejecting a consumed value.
#[derive(Error, Debug, Clone)]
pub enum ArgumentError {
    #[error("missing argument {parameter} to rule {rule}")]
    Missing { rule: String, parameter: String },
    #[error("extra argument to rule {rule}")]
    Extra { rule: String },
    #[error("type check {check} failed for argument {parameter} to rule {rule}: {message}")]
    TypeCheck {
        rule: String,
        check: String,
        parameter: String,
        message: String,
    },
}
