#![doc = include_str!("../README.md")]
#![deny(unreachable_pub)]

pub mod ast;
pub mod atom;
pub mod bytecode;
pub mod compile;
pub mod engine;
pub mod error;
pub mod expand;
pub mod formals;
pub mod frame;
pub mod host;
pub mod list;
pub mod module;
pub mod pathspec;
pub mod rules;
pub mod specialize;
pub mod stack;
pub mod target;
mod vm;

pub use atom::{Atom, Interner};
pub use engine::Engine;
pub use error::{ArgumentError, EngineError};
pub use frame::Frame;
pub use list::StringList;
pub use stack::OperandStack;
