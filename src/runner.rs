use crate::ast::Mode;
use crate::error::{FloError, Span};
use crate::evaluator::{Interpreter, InterpreterConfig};
use crate::lexer::tokenize;
use crate::native::default_environment;
use crate::parser::parse;
use crate::value::Value;

/// How a source file is run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config: InterpreterConfig,
    /// Run as a script even without a `#!script` line.
    pub force_script: bool,
    /// Exposed to the program as `__argv`.
    pub argv: Vec<String>,
}

/// Lex, parse and run `source` in a fresh default environment.
pub fn execute(source: &str, filename: &str, options: &RunOptions) -> Result<Value, FloError> {
    let tokens = tokenize(source, filename)?;
    tracing::debug!(tokens = tokens.len(), filename, "lexed");

    let mut program = parse(tokens)?;
    if options.force_script {
        program.mode = Mode::Script;
    }
    tracing::debug!(statements = program.statements.len(), mode = ?program.mode, "parsed");

    let mut interpreter = Interpreter::with_config(options.config.clone());
    let env = default_environment(&mut interpreter)?;
    let argv = options.argv.iter().map(|arg| Value::str(arg.as_str())).collect();
    env.declare_global("__argv", Value::list(argv), false, Span::default())?;

    interpreter.interpret(&program, &env)
}

/// Run a file, reporting any error to stderr. Returns whether it succeeded.
pub fn run(source: &str, filename: Option<&str>, options: &RunOptions) -> bool {
    match execute(source, filename.unwrap_or("<input>"), options) {
        Ok(_) => true,
        Err(error) => {
            error.report(source, filename);
            false
        }
    }
}

/// Evaluate `source` as a script and return its last value.
pub fn eval(source: &str) -> Result<Value, FloError> {
    let options = RunOptions {
        force_script: true,
        ..RunOptions::default()
    };
    execute(source, "<eval>", &options)
}
