// flo language interpreter library
//
// Indentation-sensitive scripting language: lexer, parser, tree-walking
// interpreter and the builtin environment.

pub mod ast;
pub mod environment;
pub mod error;
pub mod evaluator;
pub mod lexer;
pub mod native;
pub mod operators;
pub mod parser;
pub mod repl;
pub mod runner;
pub mod stack;
pub mod value;

// Re-export commonly used items
pub use ast::{Expr, Mode, Program, Stmt};
pub use environment::Environment;
pub use error::{ErrorKind, FloError, Span};
pub use evaluator::{interpret, Interpreter, InterpreterConfig, Signal};
pub use lexer::{tokenize, Token, TokenType};
pub use native::default_environment;
pub use parser::parse;
pub use value::{HostValue, Value};

// Re-export main functions
pub use repl::start as start_repl;
pub use runner::{eval, run, RunOptions};
