//! Builtins: host-backed natives, constants, and a prelude written in flo.

use crate::environment::Environment;
use crate::error::{FloError, Span};
use crate::evaluator::Interpreter;
use crate::lexer::tokenize;
use crate::parser::parse;
use crate::value::{NativeFn, NativeFunction, Value};
use rand::Rng;
use std::io::{BufRead, Write};
use std::rc::Rc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const PRELUDE: &str = r#"#!script

static float pi = 3.141592653589793
static float euler = 2.718281828459045
static float tau = 6.283185307179586

static int RAND_MAX = 2**31 - 1

fn floor(float x) int:
    return x // 1

fn int(float x) int:
    return round(x // 1)

fn rand() int:
    return (RAND_MAX * __rand_value__()) // 1

fn srand(int seed):
    __rand_seed__(seed)

fn sqrt(float x) float:
    return x ** 0.5

fn degrees(float x) float:
    return x / pi * 180

fn radians(float x) float:
    return x * pi / 180

fn abs(float value) float:
    if value >= 0:
        return value
    return -value

fn pow(float base, float exponent) float:
    return base ** exponent

fn max(float a, float b) float:
    if a > b:
        return a
    return b

fn min(float a, float b) float:
    if a < b:
        return a
    return b
"#;

/// A root scope with every builtin declared and the prelude already run.
pub fn default_environment(interpreter: &mut Interpreter) -> Result<Environment, FloError> {
    let env = Environment::new();

    register(&env, "print", None, native_print)?;
    register(&env, "time", Some(0), native_time)?;
    register(&env, "sin", Some(1), native_sin)?;
    register(&env, "cos", Some(1), native_cos)?;
    register(&env, "tan", Some(1), native_tan)?;
    register(&env, "asin", Some(1), native_asin)?;
    register(&env, "acos", Some(1), native_acos)?;
    register(&env, "atan", Some(1), native_atan)?;
    register(&env, "atan2", Some(2), native_atan2)?;
    register(&env, "round", Some(1), native_round)?;
    register(&env, "isnan", Some(1), native_isnan)?;
    register(&env, "isinf", Some(1), native_isinf)?;
    register(&env, "sleep", Some(1), native_sleep)?;
    register(&env, "input", Some(0), native_input)?;
    register(&env, "__rand_seed__", Some(1), native_rand_seed)?;
    register(&env, "__rand_value__", Some(0), native_rand_value)?;

    let span = Span::default();
    env.declare_global("None", Value::None, false, span)?;
    env.declare_global("True", Value::Bool(true), false, span)?;
    env.declare_global("False", Value::Bool(false), false, span)?;
    env.declare_global("inf", Value::Float(f64::INFINITY), false, span)?;
    env.declare_global("nan", Value::Float(f64::NAN), false, span)?;

    let program = parse(tokenize(PRELUDE, "<prelude>")?)?;
    interpreter.interpret(&program, &env)?;

    tracing::debug!(names = env.local_names().len(), "default environment ready");
    Ok(env)
}

fn register(env: &Environment, name: &str, arity: Option<usize>, func: NativeFn) -> Result<(), FloError> {
    tracing::trace!(name, ?arity, "registering native");
    let native = NativeFunction {
        name: name.to_string(),
        arity,
        func,
    };
    env.declare_global(name, Value::NativeFunction(Rc::new(native)), false, Span::default())
}

fn number_arg(function: &str, args: &[Value], index: usize, span: &Span) -> Result<f64, FloError> {
    match args.get(index) {
        Some(value) => value.as_f64().ok_or_else(|| {
            FloError::runtime_error(
                *span,
                format!("{}() expects a number, found '{}'", function, value.type_name()),
            )
        }),
        None => Err(FloError::runtime_error(
            *span,
            format!("{}() is missing argument {}", function, index + 1),
        )),
    }
}

fn native_print(interpreter: &mut Interpreter, args: &[Value], span: &Span) -> Result<Value, FloError> {
    let line: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
    writeln!(interpreter.output(), "{}", line.join(" "))
        .map_err(|error| FloError::runtime_error(*span, format!("print failed: {}", error)))?;
    Ok(Value::None)
}

fn native_time(_: &mut Interpreter, _: &[Value], span: &Span) -> Result<Value, FloError> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|error| FloError::runtime_error(*span, format!("time failed: {}", error)))?;
    Ok(Value::Float(elapsed.as_secs_f64()))
}

fn native_sin(_: &mut Interpreter, args: &[Value], span: &Span) -> Result<Value, FloError> {
    Ok(Value::Float(number_arg("sin", args, 0, span)?.sin()))
}

fn native_cos(_: &mut Interpreter, args: &[Value], span: &Span) -> Result<Value, FloError> {
    Ok(Value::Float(number_arg("cos", args, 0, span)?.cos()))
}

fn native_tan(_: &mut Interpreter, args: &[Value], span: &Span) -> Result<Value, FloError> {
    Ok(Value::Float(number_arg("tan", args, 0, span)?.tan()))
}

fn native_asin(_: &mut Interpreter, args: &[Value], span: &Span) -> Result<Value, FloError> {
    Ok(Value::Float(number_arg("asin", args, 0, span)?.asin()))
}

fn native_acos(_: &mut Interpreter, args: &[Value], span: &Span) -> Result<Value, FloError> {
    Ok(Value::Float(number_arg("acos", args, 0, span)?.acos()))
}

fn native_atan(_: &mut Interpreter, args: &[Value], span: &Span) -> Result<Value, FloError> {
    Ok(Value::Float(number_arg("atan", args, 0, span)?.atan()))
}

fn native_atan2(_: &mut Interpreter, args: &[Value], span: &Span) -> Result<Value, FloError> {
    let y = number_arg("atan2", args, 0, span)?;
    let x = number_arg("atan2", args, 1, span)?;
    Ok(Value::Float(y.atan2(x)))
}

/// Nearest int, halves to even.
fn native_round(_: &mut Interpreter, args: &[Value], span: &Span) -> Result<Value, FloError> {
    let x = number_arg("round", args, 0, span)?;
    if !x.is_finite() {
        return Err(FloError::runtime_error(
            *span,
            format!("Cannot round {} to an int", crate::value::format_float(x)),
        ));
    }
    let mut rounded = x.round();
    if (x - x.trunc()).abs() == 0.5 {
        rounded = 2.0 * (x / 2.0).round();
    }
    // out-of-range results wrap like every other int
    Ok(Value::Int(rounded as i64 as i32))
}

fn native_isnan(_: &mut Interpreter, args: &[Value], span: &Span) -> Result<Value, FloError> {
    Ok(Value::Bool(number_arg("isnan", args, 0, span)?.is_nan()))
}

fn native_isinf(_: &mut Interpreter, args: &[Value], span: &Span) -> Result<Value, FloError> {
    Ok(Value::Bool(number_arg("isinf", args, 0, span)?.is_infinite()))
}

/// Sleep for a number of milliseconds.
fn native_sleep(_: &mut Interpreter, args: &[Value], span: &Span) -> Result<Value, FloError> {
    let millis = number_arg("sleep", args, 0, span)?;
    if millis.is_finite() && millis > 0.0 {
        std::thread::sleep(Duration::from_secs_f64(millis / 1000.0));
    }
    Ok(Value::None)
}

fn native_input(_: &mut Interpreter, _: &[Value], span: &Span) -> Result<Value, FloError> {
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|error| FloError::runtime_error(*span, format!("input failed: {}", error)))?;
    let trimmed = line.trim_end_matches(['\n', '\r']);
    Ok(Value::Str(trimmed.to_string()))
}

fn native_rand_seed(interpreter: &mut Interpreter, args: &[Value], span: &Span) -> Result<Value, FloError> {
    let seed = match args.first() {
        Some(Value::Int(n)) => *n as u64,
        Some(Value::Bool(b)) => u64::from(*b),
        Some(other) => {
            return Err(FloError::runtime_error(
                *span,
                format!("srand() expects an int seed, found '{}'", other.type_name()),
            ))
        }
        None => 0,
    };
    interpreter.reseed(seed);
    Ok(Value::None)
}

fn native_rand_value(interpreter: &mut Interpreter, _: &[Value], _: &Span) -> Result<Value, FloError> {
    Ok(Value::Float(interpreter.rng().gen::<f64>()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prelude_parses_as_script() {
        let program = parse(tokenize(PRELUDE, "<prelude>").unwrap()).unwrap();
        assert_eq!(program.mode, crate::ast::Mode::Script);
    }

    #[test]
    fn round_halves_to_even() {
        let mut interpreter = Interpreter::new();
        let span = Span::default();
        let round = |interpreter: &mut Interpreter, x: f64| {
            native_round(interpreter, &[Value::Float(x)], &span).unwrap()
        };
        assert_eq!(round(&mut interpreter, 0.5), Value::Int(0));
        assert_eq!(round(&mut interpreter, 1.5), Value::Int(2));
        assert_eq!(round(&mut interpreter, 2.4), Value::Int(2));
        assert_eq!(round(&mut interpreter, -2.6), Value::Int(-3));
        assert!(native_round(&mut interpreter, &[Value::Float(f64::NAN)], &span).is_err());
    }
}
