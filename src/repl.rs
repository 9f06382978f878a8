use crate::ast::Mode;
use crate::environment::Environment;
use crate::error::FloError;
use crate::evaluator::{Interpreter, InterpreterConfig};
use crate::lexer::tokenize;
use crate::native::default_environment;
use crate::parser::parse;
use crate::value::Value;
use std::io::{self, BufRead, Write};

/// Interactive session. Declarations persist between entries; every entry
/// runs in script mode.
pub fn start(config: InterpreterConfig) {
    println!("flo {}", env!("CARGO_PKG_VERSION"));
    println!("Type 'exit' or press Ctrl+D to quit");
    println!();

    let mut interpreter = Interpreter::with_config(config);
    let env = match default_environment(&mut interpreter) {
        Ok(env) => env,
        Err(error) => {
            eprintln!("{}", error);
            return;
        }
    };

    let stdin = io::stdin();
    let mut input = stdin.lock();
    loop {
        let source = match read_entry(&mut input) {
            Ok(Some(source)) => source,
            Ok(None) => {
                println!();
                break;
            }
            Err(error) => {
                eprintln!("Error reading input: {}", error);
                break;
            }
        };

        let trimmed = source.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == "exit" || trimmed == "quit" {
            break;
        }

        match eval_entry(&mut interpreter, &env, &source) {
            Ok(Value::None) => {}
            Ok(value) => println!("{}", value),
            Err(error) => error.report(&source, None),
        }
    }
}

/// Run one entry against the session's root scope.
pub fn eval_entry(interpreter: &mut Interpreter, env: &Environment, source: &str) -> Result<Value, FloError> {
    let mut program = parse(tokenize(source, "<stdin>")?)?;
    program.mode = Mode::Script;
    interpreter.interpret(&program, env)
}

/// One line, or a whole block when the line opens one with `:`. A block
/// entry ends at the first empty line. `None` at end of input.
fn read_entry(input: &mut impl BufRead) -> io::Result<Option<String>> {
    prompt("> ")?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    if !line.trim_end().ends_with(':') {
        return Ok(Some(line));
    }

    let mut source = line;
    loop {
        prompt("... ")?;
        let mut next = String::new();
        if input.read_line(&mut next)? == 0 || next.trim().is_empty() {
            return Ok(Some(source));
        }
        source.push_str(&next);
    }
}

fn prompt(text: &str) -> io::Result<()> {
    let mut stdout = io::stdout();
    write!(stdout, "{}", text)?;
    stdout.flush()
}
