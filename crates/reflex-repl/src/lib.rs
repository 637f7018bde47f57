//! Reflex REPL - interactive shell over a running Reflex program
//!
//! Loads a program, then lets the user inspect types and versions, create
//! instances, evaluate expressions and mutate types either immediately or
//! inside an explicit transaction.

pub mod repl;

pub use repl::{DefaultNotifier, Repl, ReplCommand, ReplNotifier};
