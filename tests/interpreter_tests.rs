// End-to-end language semantics: source in, value or error out.

use flo::runner::{execute, RunOptions};
use flo::{default_environment, eval, parse, tokenize, ErrorKind, FloError, Interpreter, InterpreterConfig, Mode, Value};
use pretty_assertions::assert_eq;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

fn script(source: &str) -> Value {
    match eval(source) {
        Ok(value) => value,
        Err(error) => panic!("{}", error.render(source, Some("<test>"))),
    }
}

fn script_error(source: &str) -> FloError {
    match eval(source) {
        Ok(value) => panic!("expected an error, got {}", value),
        Err(error) => error,
    }
}

fn program(source: &str) -> Result<Value, FloError> {
    execute(source, "<test>", &RunOptions::default())
}

// ============================================================================
// Arithmetic
// ============================================================================

#[test]
fn int_arithmetic_wraps_around() {
    assert_eq!(script("0x7FFFFFFF + 1"), Value::Int(-2147483648));
    assert_eq!(script("-2147483648 - 1"), Value::Int(2147483647));
    assert_eq!(script("65536 * 65536"), Value::Int(0));
}

#[test]
fn mixed_arithmetic_promotes_to_float() {
    assert_eq!(script("1 + 1.0"), Value::Float(2.0));
    assert_eq!(script("1 + 1"), Value::Int(2));
    assert_eq!(script("1 + 1.0").to_string(), "2.0");
}

#[test]
fn division_forms() {
    assert_eq!(script("7 / 2"), Value::Float(3.5));
    assert_eq!(script("7 // 2"), Value::Int(3));
    assert_eq!(script("-7 // 2"), Value::Int(-4));
    assert_eq!(script("-7 % 3"), Value::Int(2));
    assert_eq!(script("2 ** 10"), Value::Int(1024));
    assert_eq!(script("2 ** -1"), Value::Float(0.5));

    let error = script_error("1 / 0");
    assert_eq!(error.kind, ErrorKind::RuntimeError);
    assert_eq!(error.message, "Division by zero");
}

#[test]
fn incompatible_operands_fail() {
    let error = script_error("1 + \"a\"");
    assert_eq!(error.kind, ErrorKind::RuntimeError);
    assert_eq!(error.message, "Unsupported operand types for +: 'int' and 'str'");
    assert_eq!(script("\"a\" + \"b\""), Value::str("ab"));
}

#[test]
fn logical_operators_short_circuit() {
    assert_eq!(script("0 or 5"), Value::Bool(true));
    assert_eq!(script("0 and missing"), Value::Bool(false));
    assert_eq!(script("1 or missing"), Value::Bool(true));
    assert_eq!(script("not 0"), Value::Bool(true));
    assert_eq!(script("3 > 2 ? \"yes\" : \"no\""), Value::str("yes"));
}

// ============================================================================
// Bindings and scopes
// ============================================================================

#[test]
fn immutable_bindings_reject_assignment() {
    let error = script_error("let int a = 1\na = 2");
    assert_eq!(error.kind, ErrorKind::RuntimeError);
    assert_eq!(error.message, "Cannot assign to immutable variable 'a'");

    assert_eq!(script("let mut int a = 1\na = 2\na"), Value::Int(2));
}

#[test]
fn immutable_containers_reject_member_writes() {
    let error = script_error("let xs = [1]\nxs[0] = 2");
    assert_eq!(error.message, "Cannot modify a member of immutable variable 'xs'");
    assert_eq!(script("let mut xs = [1]\nxs[0] = 2\nxs"), Value::list(vec![Value::Int(2)]));
}

#[test]
fn block_declarations_do_not_leak() {
    let error = script_error("if 1:\n    let int y = 2\ny");
    assert_eq!(error.message, "Variable 'y' is not defined");
}

#[test]
fn shadowing_is_allowed() {
    let source = "let int x = 1\nif 1:\n    let int x = 2\nx";
    assert_eq!(script(source), Value::Int(1));
}

#[test]
fn redeclaration_in_one_scope_fails() {
    let error = script_error("let x = 1\nlet x = 2");
    assert_eq!(error.message, "Variable 'x' is already declared in this scope");
}

#[test]
fn static_declarations_reach_the_function_scope() {
    let source = "\
fn setup():
    if 1:
        static int answer = 42
    return answer
setup()";
    assert_eq!(script(source), Value::Int(42));
}

#[test]
fn update_operators() {
    assert_eq!(script("let mut int x = 5\nx++"), Value::Int(5));
    assert_eq!(script("let mut int x = 5\n++x"), Value::Int(6));
    assert_eq!(script("let mut int x = 5\nx--\nx"), Value::Int(4));
    assert_eq!(script("let mut x = 1\nx += 2\nx *= 10\nx"), Value::Int(30));
    assert!(eval("let int x = 5\nx++").is_err());
}

#[test]
fn delete_unbinds() {
    let error = script_error("let mut x = 1\ndelete x\nx");
    assert_eq!(error.message, "Variable 'x' is not defined");

    assert_eq!(
        script("let mut o = {a: 1, b: 2}\ndelete o.a\no").to_string(),
        "{b: 2}"
    );
    assert_eq!(script("let mut xs = [1, 2, 3]\ndelete xs[0]\nxs").to_string(), "[2, 3]");
}

// ============================================================================
// Containers
// ============================================================================

#[test]
fn lists_and_objects() {
    assert_eq!(script("let xs = [10, 20, 30]\nxs[-1]"), Value::Int(30));
    assert_eq!(script("let o = {name: \"flo\"}\no.name"), Value::str("flo"));
    assert_eq!(script("let o = {\"a b\": 1}\no[\"a b\"]"), Value::Int(1));
    assert_eq!(script("\"hey\"[1]"), Value::str("e"));
    assert_eq!(script("let mut o = {}\no.x = 1\no").to_string(), "{x: 1}");

    let error = script_error("[1, 2][5]");
    assert_eq!(error.message, "Index 5 out of range for length 2");
    let error = script_error("let o = {}\no.missing");
    assert_eq!(error.message, "Object has no key 'missing'");
}

#[test]
fn self_containing_containers_compare() {
    let source = "\
let mut a = [0]
a[0] = a
let mut b = [0]
b[0] = b
a == b";
    assert_eq!(script(source), Value::Bool(true));

    let source = "\
let mut a = {}
a.me = a
let mut b = {}
b.me = b
b.extra = 1
a == b";
    assert_eq!(script(source), Value::Bool(false));
}

#[test]
fn containers_share_by_reference() {
    let source = "let mut a = [1]\nlet mut b = a\nb[0] = 9\na[0]";
    assert_eq!(script(source), Value::Int(9));
}

#[test]
fn structural_equality() {
    assert_eq!(script("[1, [2]] == [1, [2.0]]"), Value::Bool(true));
    assert_eq!(script("{a: 1} == {a: 2}"), Value::Bool(false));
    assert_eq!(script("1 == \"1\""), Value::Bool(false));
}

// ============================================================================
// Control flow
// ============================================================================

#[test]
fn break_leaves_innermost_loop_only() {
    let source = "\
let mut int total = 0
for i in 3:
    for j in 3:
        if j == 1:
            break
        total += 1
total";
    assert_eq!(script(source), Value::Int(3));
}

#[test]
fn continue_skips_to_next_iteration() {
    let source = "\
let mut int total = 0
for i in 5:
    if i % 2 == 0:
        continue
    total += i
total";
    assert_eq!(script(source), Value::Int(4));
}

#[test]
fn return_leaves_nested_loops_at_once() {
    let source = "\
fn find() int:
    for i in 10:
        for j in 10:
            if i * j == 6:
                return i * 10 + j
    return -1
find()";
    assert_eq!(script(source), Value::Int(16));
}

#[test]
fn for_loop_forms() {
    let sum = |header: &str| script(&format!("let mut int n = 0\nfor i in {}:\n    n += i\nn", header));
    assert_eq!(sum("4"), Value::Int(6));
    assert_eq!(sum("0..4"), Value::Int(6));
    assert_eq!(sum("2..4"), Value::Int(5));
    assert_eq!(sum("[1, 2, 3]"), Value::Int(6));
    assert_eq!(sum("[]"), Value::Int(0));
    assert_eq!(sum("0"), Value::Int(0));
}

#[test]
fn for_loop_iterates_strings_and_object_keys() {
    let source = "let mut s = \"\"\nfor c in \"abc\":\n    s = c + s\ns";
    assert_eq!(script(source), Value::str("cba"));

    let source = "let mut s = \"\"\nfor k in {b: 1, a: 2}:\n    s += k\ns";
    assert_eq!(script(source), Value::str("ab"));
}

#[test]
fn for_loop_counts_lazily() {
    let source = "\
let mut int n = 0
for i in 0x7FFFFFFF:
    n += 1
    break
n";
    assert_eq!(script(source), Value::Int(1));

    let source = "\
let mut int last = 0
for i in 2147483640..0x7FFFFFFF:
    last = i
last";
    assert_eq!(script(source), Value::Int(2147483646));
}

#[test]
fn for_loop_works_on_a_snapshot() {
    let source = "\
let mut xs = [1, 2]
let mut int count = 0
for x in xs:
    xs[0] = 100
    count += 1
count";
    assert_eq!(script(source), Value::Int(2));
}

#[test]
fn while_loop_counts_down() {
    assert_eq!(script("let mut int i = 10\nwhile i > 0: i -= 1\ni"), Value::Int(0));
}

#[test]
fn break_outside_loop_fails() {
    let source = "fn f():\n    break\nf()";
    let error = script_error(source);
    assert_eq!(error.kind, ErrorKind::RuntimeError);
    assert_eq!(error.message, "'break' not allowed outside loop");
}

#[test]
fn unreachable_is_a_compile_error() {
    let error = script_error("if 1:\n    unreachable");
    assert_eq!(error.kind, ErrorKind::CompileError);
}

#[test]
fn dead_code_fails_to_parse() {
    let error = script_error("fn f() int:\n    return 1\n    return 2");
    assert_eq!(error.kind, ErrorKind::ParseError);
    assert_eq!(error.message, "Unreachable code");
}

#[test]
fn class_and_enum_are_rejected_at_runtime() {
    let error = script_error("class Point:\n    let int x = 0");
    assert_eq!(error.kind, ErrorKind::CompileError);
    let error = script_error("enum Color:\n    RED");
    assert_eq!(error.kind, ErrorKind::CompileError);
}

#[test]
fn eval_is_not_callable() {
    let error = script_error("eval(\"1\")");
    assert_eq!(error.kind, ErrorKind::CompileError);
}

// ============================================================================
// Functions
// ============================================================================

#[test]
fn add_function() {
    assert_eq!(script("fn add(int a, int b) int: return a + b\nadd(2, 3)"), Value::Int(5));
}

#[test]
fn recursion() {
    let source = "\
fn fib(int n) int:
    if n < 2:
        return n
    return fib(n - 1) + fib(n - 2)
fib(15)";
    assert_eq!(script(source), Value::Int(610));
}

#[test]
fn defaults_are_evaluated_once() {
    let source = "\
let mut int calls = 0
fn next() int:
    calls += 1
    return calls
fn f(int x = next()) int:
    return x
f()
f()
[f(), calls]";
    assert_eq!(script(source), Value::list(vec![Value::Int(1), Value::Int(1)]));
}

#[test]
fn call_arity_errors() {
    let error = script_error("fn f(a, b):\n    pass\nf(1)");
    assert_eq!(error.message, "Missing argument 'b' in call to 'f'");
    let error = script_error("fn f(a):\n    pass\nf(1, 2)");
    assert_eq!(error.message, "Function 'f' takes at most 1 argument(s), got 2");
    let error = script_error("let x = 1\nx()");
    assert_eq!(error.message, "'int' is not callable");
}

#[test]
fn functions_see_top_level_names() {
    let source = "\
let mut int counter = 0
fn bump():
    counter += 1
bump()
bump()
counter";
    assert_eq!(script(source), Value::Int(2));
}

#[test]
fn returned_inner_function_can_be_called() {
    let source = "\
fn make():
    fn inner() int:
        return 1
    return inner
let f = make()
f()";
    assert_eq!(script(source), Value::Int(1));
}

#[test]
fn callee_sees_the_callers_locals() {
    let source = "\
fn f() int:
    return x
fn g() int:
    let int x = 5
    return f()
g()";
    assert_eq!(script(source), Value::Int(5));
}

#[test]
fn script_returns_last_value_or_top_level_return() {
    assert_eq!(script("1\n2\n3"), Value::Int(3));
    assert_eq!(script("let x = 1"), Value::None);
    assert_eq!(script("if 1:\n    return 7\n8"), Value::Int(7));
}

// ============================================================================
// Program mode
// ============================================================================

#[test]
fn program_result_is_main_value() {
    let source = "\
fn helper() int:
    return 20
fn main() int:
    return helper() + 1";
    assert_eq!(program(source).unwrap(), Value::Int(21));
}

#[test]
fn program_functions_resolve_regardless_of_order() {
    let source = "\
fn main() int:
    return later()
fn later() int:
    return 3";
    assert_eq!(program(source).unwrap(), Value::Int(3));
}

#[test]
fn bare_top_level_call_is_a_compile_error() {
    let error = program("fn main():\n    pass\nmain()").unwrap_err();
    assert_eq!(error.kind, ErrorKind::CompileError);
}

#[test]
fn missing_main_is_reported() {
    let error = program("let x = 1").unwrap_err();
    assert_eq!(error.kind, ErrorKind::RuntimeError);
    assert_eq!(error.message, "Function 'main' is not defined");
}

#[test]
fn defaults_may_call_functions_in_program_mode() {
    let source = "\
fn seven() int:
    return 7
fn f(int x = seven()) int:
    return x
fn main() int:
    return f()";
    assert_eq!(program(source).unwrap(), Value::Int(7));
}

#[test]
fn shebang_selects_script_mode() {
    let tokens = tokenize("#!script\nprint(1)", "<test>").unwrap();
    assert_eq!(parse(tokens).unwrap().mode, Mode::Script);
    let tokens = tokenize("fn main():\n    pass", "<test>").unwrap();
    assert_eq!(parse(tokens).unwrap().mode, Mode::Program);
}

// ============================================================================
// Limits and diagnostics
// ============================================================================

#[test]
fn max_call_depth_stops_runaway_recursion() {
    let options = RunOptions {
        config: InterpreterConfig {
            max_call_depth: 50,
            ..InterpreterConfig::default()
        },
        force_script: true,
        ..RunOptions::default()
    };
    let source = "fn r(int n) int:\n    return r(n + 1)\nr(0)";
    let error = execute(source, "<test>", &options).unwrap_err();
    assert_eq!(error.kind, ErrorKind::RuntimeError);
    assert_eq!(error.message, "Maximum call depth of 50 exceeded");
}

#[test]
fn cancellation_flag_aborts_a_loop() {
    let mut interpreter = Interpreter::new();
    let env = default_environment(&mut interpreter).unwrap();
    let program = parse(tokenize("#!script\nwhile 1:\n    pass", "<test>").unwrap()).unwrap();

    let flag = interpreter.cancel_flag();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        flag.store(true, Ordering::SeqCst);
    });

    let error = interpreter.interpret(&program, &env).unwrap_err();
    canceller.join().unwrap();
    assert_eq!(error.kind, ErrorKind::RuntimeError);
    assert_eq!(error.message, "execution interrupted");
}

#[test]
fn render_places_caret_under_span() {
    let source = "#!script\nlet int a = 1\na = 2\n";
    let error = eval(source).unwrap_err();
    let text = error.render(source, Some("t.flo"));
    assert!(
        text.starts_with("File \"t.flo\", line 3.\na = 2\n^^^^^\nRuntime Error: Cannot assign to immutable variable 'a'"),
        "{}",
        text
    );
}

#[test]
fn to_host_copies_results() {
    use flo::HostValue;
    let value = script("[1, 2.5, \"x\", None]");
    assert_eq!(
        value.to_host(),
        HostValue::List(vec![
            HostValue::Int(1),
            HostValue::Float(2.5),
            HostValue::Str("x".to_string()),
            HostValue::None,
        ])
    );
}
