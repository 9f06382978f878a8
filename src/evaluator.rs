use crate::ast::{DeclScope, Expr, ForIterable, LogicalOp, Mode, Program, Stmt, UpdateOp};
use crate::environment::{Environment, ScopeKind};
use crate::error::{ErrorKind, FloError, Span};
use crate::operators;
use crate::stack::ensure_sufficient_stack;
use crate::value::{RuntimeFunction, Value};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::io::{self, Write};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct InterpreterConfig {
    /// Deepest allowed nesting of flo function calls.
    pub max_call_depth: usize,
    /// Seed for the generator behind `rand()`.
    pub seed: u64,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 10_000,
            seed: 0,
        }
    }
}

/// Outcome of executing a statement. Anything but `Run` unwinds until a
/// loop or function call consumes it.
#[derive(Debug, Clone)]
pub enum Signal {
    Run(Value),
    Break(Span),
    Continue(Span),
    Return(Value),
}

/// Execution context: current scope, call depth, PRNG and the
/// cancellation flag.
pub struct Interpreter {
    config: InterpreterConfig,
    environment: Environment,
    call_depth: usize,
    cancelled: Arc<AtomicBool>,
    rng: StdRng,
    output: Box<dyn Write>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_config(InterpreterConfig::default())
    }

    pub fn with_config(config: InterpreterConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            environment: Environment::new(),
            call_depth: 0,
            cancelled: Arc::new(AtomicBool::new(false)),
            rng,
            output: Box::new(io::stdout()),
        }
    }

    /// Scope that expressions are currently evaluated in.
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Setting the returned flag stops the running program at its next
    /// statement with a runtime error. It stays set until cleared.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Where `print` writes. Defaults to stdout.
    pub fn set_output(&mut self, output: Box<dyn Write>) {
        self.output = output;
    }

    pub fn output(&mut self) -> &mut dyn Write {
        self.output.as_mut()
    }

    /// Run `program` with `env` as its top-level scope.
    pub fn interpret(&mut self, program: &Program, env: &Environment) -> Result<Value, FloError> {
        tracing::debug!(
            mode = ?program.mode,
            statements = program.statements.len(),
            "interpreting program"
        );

        let previous = std::mem::replace(&mut self.environment, env.clone());
        let result = match program.mode {
            Mode::Script => self.run_script(program),
            Mode::Program => self.run_program(program),
        };
        self.environment = previous;
        result
    }

    fn run_script(&mut self, program: &Program) -> Result<Value, FloError> {
        let mut last = Value::None;
        for statement in &program.statements {
            match self.execute(statement)? {
                Signal::Run(value) => last = value,
                Signal::Return(value) => return Ok(value),
                Signal::Break(span) => return Err(misplaced("break", span)),
                Signal::Continue(span) => return Err(misplaced("continue", span)),
            }
        }
        Ok(last)
    }

    fn run_program(&mut self, program: &Program) -> Result<Value, FloError> {
        // checked up front, so nothing runs when the program is rejected
        for statement in &program.statements {
            if let Stmt::Expression {
                expr: Expr::Call { .. },
                span,
            } = statement
            {
                return Err(FloError::new_with_help(
                    ErrorKind::CompileError,
                    *span,
                    "Function calls are not allowed at the top level of a program".to_string(),
                    "Call it from main(), or start the file with #!script to run statements directly."
                        .to_string(),
                ));
            }
        }

        for statement in &program.statements {
            match self.execute(statement)? {
                Signal::Run(_) => {}
                Signal::Return(value) => return Ok(value),
                Signal::Break(span) => return Err(misplaced("break", span)),
                Signal::Continue(span) => return Err(misplaced("continue", span)),
            }
        }

        let end = program
            .statements
            .last()
            .map(|stmt| stmt.span().end)
            .unwrap_or(0);
        let span = Span::new(end, end);
        let main = self.environment.get("main").ok_or_else(|| {
            FloError::runtime_error_with_help(
                span,
                "Function 'main' is not defined".to_string(),
                "Programs start at fn main(): ... Use #!script to run statements directly."
                    .to_string(),
            )
        })?;
        self.call_function(&main, Vec::new(), span)
    }

    pub fn execute(&mut self, stmt: &Stmt) -> Result<Signal, FloError> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(FloError::runtime_error(
                *stmt.span(),
                "execution interrupted".to_string(),
            ));
        }
        ensure_sufficient_stack(|| self.execute_statement(stmt))
    }

    fn execute_statement(&mut self, stmt: &Stmt) -> Result<Signal, FloError> {
        match stmt {
            Stmt::VarDecl {
                scope,
                mutable,
                name,
                initializer,
                span,
                ..
            } => {
                let value = match initializer {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::None,
                };
                match scope {
                    DeclScope::Global => self.environment.declare_global(name, value, *mutable, *span)?,
                    DeclScope::Local | DeclScope::Dynamic | DeclScope::Member => {
                        self.environment.declare_local(name, value, *mutable, *span)?
                    }
                }
                Ok(Signal::Run(Value::None))
            }
            Stmt::Function(decl) => {
                let mut defaults = Vec::with_capacity(decl.params.len());
                for param in &decl.params {
                    let default = match &param.default {
                        Some(expr) => Some(self.evaluate(expr)?),
                        None => None,
                    };
                    defaults.push(default);
                }

                let function = RuntimeFunction {
                    decl: Rc::clone(decl),
                    defaults,
                };
                self.environment.declare_local(
                    &decl.name,
                    Value::RuntimeFunction(Rc::new(function)),
                    false,
                    decl.span,
                )?;
                Ok(Signal::Run(Value::None))
            }
            Stmt::Class { name, span, .. } => Err(FloError::new_with_help(
                ErrorKind::CompileError,
                *span,
                format!("Class '{}' cannot be evaluated", name),
                "Class declarations are parsed but have no runtime behavior yet.".to_string(),
            )),
            Stmt::Enum { name, span, .. } => Err(FloError::new_with_help(
                ErrorKind::CompileError,
                *span,
                format!("Enum '{}' cannot be evaluated", name),
                "Enum declarations are parsed but have no runtime behavior yet.".to_string(),
            )),
            Stmt::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.execute(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.execute(else_branch)
                } else {
                    Ok(Signal::Run(Value::None))
                }
            }
            Stmt::While { condition, body, .. } => {
                while self.evaluate(condition)?.is_truthy() {
                    match self.execute(body)? {
                        Signal::Break(_) => break,
                        Signal::Return(value) => return Ok(Signal::Return(value)),
                        Signal::Run(_) | Signal::Continue(_) => {}
                    }
                }
                Ok(Signal::Run(Value::None))
            }
            Stmt::For {
                variable,
                iterable,
                body,
                span,
                ..
            } => {
                let items = self.iteration_values(iterable, *span)?;
                for item in items {
                    let scope = self.environment.child(ScopeKind::Block);
                    scope.declare_local(variable, item, true, *span)?;
                    match self.execute_in(body, scope)? {
                        Signal::Break(_) => break,
                        Signal::Return(value) => return Ok(Signal::Return(value)),
                        Signal::Run(_) | Signal::Continue(_) => {}
                    }
                }
                Ok(Signal::Run(Value::None))
            }
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::None,
                };
                Ok(Signal::Return(value))
            }
            Stmt::Break { span } => Ok(Signal::Break(*span)),
            Stmt::Continue { span } => Ok(Signal::Continue(*span)),
            Stmt::Unreachable { span } => Err(FloError::compile_error(
                *span,
                "Reached unreachable code".to_string(),
            )),
            Stmt::Delete { target, span } => {
                self.delete(target, *span)?;
                Ok(Signal::Run(Value::None))
            }
            Stmt::Pass { .. } => Ok(Signal::Run(Value::None)),
            Stmt::Block { statements, .. } => {
                let scope = self.environment.child(ScopeKind::Block);
                self.execute_block(statements, scope)
            }
            Stmt::Expression { expr, .. } => Ok(Signal::Run(self.evaluate(expr)?)),
        }
    }

    /// Run `statements` in `scope`, stopping at the first non-`Run` signal.
    pub fn execute_block(&mut self, statements: &[Stmt], scope: Environment) -> Result<Signal, FloError> {
        let previous = std::mem::replace(&mut self.environment, scope);
        let result = self.run_statements(statements);
        self.environment = previous;
        result
    }

    fn run_statements(&mut self, statements: &[Stmt]) -> Result<Signal, FloError> {
        let mut last = Value::None;
        for statement in statements {
            match self.execute(statement)? {
                Signal::Run(value) => last = value,
                signal => return Ok(signal),
            }
        }
        Ok(Signal::Run(last))
    }

    fn execute_in(&mut self, stmt: &Stmt, scope: Environment) -> Result<Signal, FloError> {
        let previous = std::mem::replace(&mut self.environment, scope);
        let result = self.execute(stmt);
        self.environment = previous;
        result
    }

    /// Values a `for` loop binds. Counts are produced one at a time;
    /// containers are snapshotted before the first iteration.
    fn iteration_values(&mut self, iterable: &ForIterable, span: Span) -> Result<Iteration, FloError> {
        match iterable {
            ForIterable::Range { start, end } => {
                let from = self.evaluate(start)?;
                let to = self.evaluate(end)?;
                let (Some(from), Some(to)) = (as_int(&from), as_int(&to)) else {
                    return Err(FloError::runtime_error(
                        span,
                        format!(
                            "Range bounds must be int, found '{}' and '{}'",
                            from.type_name(),
                            to.type_name()
                        ),
                    ));
                };
                Ok(Iteration::Count { next: from, end: to })
            }
            ForIterable::Value(expr) => {
                let value = self.evaluate(expr)?;
                let items: Vec<Value> = match &value {
                    // a snapshot, changing the list inside the loop does not affect it
                    Value::List(items) => items.borrow().clone(),
                    Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
                    Value::Object(entries) => {
                        let mut keys: Vec<String> = entries.borrow().keys().cloned().collect();
                        keys.sort();
                        keys.into_iter().map(Value::Str).collect()
                    }
                    other => match as_int(other) {
                        Some(count) => return Ok(Iteration::Count { next: 0, end: count }),
                        None => {
                            return Err(FloError::runtime_error(
                                *expr.span(),
                                format!("Cannot iterate over '{}'", other.type_name()),
                            ))
                        }
                    },
                };
                Ok(Iteration::Items(items.into_iter()))
            }
        }
    }

    fn delete(&mut self, target: &Expr, span: Span) -> Result<(), FloError> {
        match target {
            Expr::Identifier { name, .. } => {
                self.environment.remove(name, span)?;
                Ok(())
            }
            Expr::Member { .. } => {
                let Place::Member { container, key } = self.resolve_place(target)? else {
                    return Err(FloError::runtime_error(span, "Invalid delete target".to_string()));
                };
                match (&container, &key) {
                    (Value::Object(entries), Value::Str(name)) => {
                        let removed = entries.borrow_mut().remove(name);
                        if removed.is_none() {
                            return Err(FloError::runtime_error(
                                span,
                                format!("Object has no key '{}'", name),
                            ));
                        }
                    }
                    (Value::List(items), index) => {
                        let len = items.borrow().len();
                        let index = list_index(index, len, span)?;
                        items.borrow_mut().remove(index);
                    }
                    _ => {
                        return Err(FloError::runtime_error(
                            span,
                            format!(
                                "Cannot delete '{}' key from '{}'",
                                key.type_name(),
                                container.type_name()
                            ),
                        ))
                    }
                }
                Ok(())
            }
            _ => Err(FloError::runtime_error(span, "Invalid delete target".to_string())),
        }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> Result<Value, FloError> {
        ensure_sufficient_stack(|| self.evaluate_expression(expr))
    }

    fn evaluate_expression(&mut self, expr: &Expr) -> Result<Value, FloError> {
        match expr {
            Expr::Identifier { name, span } => self.environment.lookup(name, *span),
            Expr::Number { value, .. } => Ok(Value::Int(*value)),
            Expr::Float { value, .. } => Ok(Value::Float(*value)),
            Expr::Str { value, .. } => Ok(Value::Str(value.clone())),
            Expr::List { elements, .. } => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    items.push(self.evaluate(element)?);
                }
                Ok(Value::list(items))
            }
            Expr::Object { entries, .. } => {
                let mut values = HashMap::new();
                for (key, value) in entries {
                    values.insert(key.clone(), self.evaluate(value)?);
                }
                Ok(Value::object(values))
            }
            Expr::Elvis {
                condition,
                then_expr,
                else_expr,
                ..
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.evaluate(then_expr)
                } else {
                    self.evaluate(else_expr)
                }
            }
            Expr::Logical {
                left,
                operator,
                right,
                ..
            } => {
                let left = self.evaluate(left)?.is_truthy();
                let result = match operator {
                    LogicalOp::And => left && self.evaluate(right)?.is_truthy(),
                    LogicalOp::Or => left || self.evaluate(right)?.is_truthy(),
                };
                Ok(Value::Bool(result))
            }
            Expr::Binary {
                left,
                operator,
                right,
                span,
            } => {
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                operators::binary(*operator, &left, &right, *span)
            }
            Expr::Unary {
                operator,
                operand,
                span,
            } => {
                let operand = self.evaluate(operand)?;
                operators::unary(*operator, &operand, *span)
            }
            Expr::Assign {
                target,
                operator,
                value,
                span,
            } => {
                let place = self.resolve_place(target)?;
                let new_value = match operator {
                    Some(op) => {
                        let current = self.read_place(&place, *target.span())?;
                        let rhs = self.evaluate(value)?;
                        operators::binary(*op, &current, &rhs, *span)?
                    }
                    None => self.evaluate(value)?,
                };
                self.write_place(place, new_value.clone(), *span)?;
                Ok(new_value)
            }
            Expr::Update {
                operator,
                prefix,
                target,
                span,
            } => {
                let place = self.resolve_place(target)?;
                let old = self.read_place(&place, *target.span())?;
                let new = operators::step(*operator, &old, *span)?;
                self.write_place(place, new.clone(), *span)?;
                Ok(if *prefix { new } else { old })
            }
            Expr::Call { callee, args, span } => {
                if let Expr::Identifier { name, .. } = callee.as_ref() {
                    if name == "eval" {
                        return Err(FloError::compile_error(
                            *span,
                            "eval() is not supported".to_string(),
                        ));
                    }
                }

                let function = self.evaluate(callee)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.evaluate(arg)?);
                }
                self.call_function(&function, values, *span)
            }
            Expr::Member {
                object,
                property,
                computed,
                span,
            } => {
                let container = self.evaluate(object)?;
                let key = self.member_key(property, *computed)?;
                get_member(&container, &key, *span)
            }
        }
    }

    /// Call a function value with already evaluated arguments.
    pub fn call_function(&mut self, callee: &Value, args: Vec<Value>, span: Span) -> Result<Value, FloError> {
        match callee {
            Value::NativeFunction(native) => {
                if let Some(arity) = native.arity {
                    if args.len() != arity {
                        return Err(FloError::runtime_error(
                            span,
                            format!(
                                "Function '{}' expects {} argument(s), got {}",
                                native.name,
                                arity,
                                args.len()
                            ),
                        ));
                    }
                }
                tracing::trace!(function = %native.name, args = args.len(), "native call");
                (native.func)(self, &args, &span)
            }
            Value::RuntimeFunction(function) => self.call_runtime(function, args, span),
            other => Err(FloError::runtime_error(
                span,
                format!("'{}' is not callable", other.type_name()),
            )),
        }
    }

    fn call_runtime(&mut self, function: &Rc<RuntimeFunction>, args: Vec<Value>, span: Span) -> Result<Value, FloError> {
        let decl = &function.decl;
        if args.len() > decl.params.len() {
            return Err(FloError::runtime_error(
                span,
                format!(
                    "Function '{}' takes at most {} argument(s), got {}",
                    decl.name,
                    decl.params.len(),
                    args.len()
                ),
            ));
        }
        if self.call_depth >= self.config.max_call_depth {
            return Err(FloError::runtime_error_with_help(
                span,
                format!("Maximum call depth of {} exceeded", self.config.max_call_depth),
                "Check for recursion without a base case.".to_string(),
            ));
        }

        // the call scope hangs off the caller's scope, so the callee sees the caller's names
        let scope = self.environment.child(ScopeKind::Function);

        let mut args = args.into_iter();
        for (param, default) in decl.params.iter().zip(&function.defaults) {
            let value = match (args.next(), default) {
                (Some(value), _) => value,
                (None, Some(default)) => default.clone(),
                (None, None) => {
                    return Err(FloError::runtime_error(
                        span,
                        format!(
                            "Missing argument '{}' in call to '{}'",
                            param.name, decl.name
                        ),
                    ))
                }
            };
            scope.declare_local(&param.name, value, true, param.span)?;
        }

        tracing::trace!(function = %decl.name, depth = self.call_depth, "call");
        self.call_depth += 1;
        let result = self.execute_block(&decl.body, scope);
        self.call_depth -= 1;

        match result? {
            Signal::Run(_) => Ok(Value::None),
            Signal::Return(value) => Ok(value),
            Signal::Break(span) => Err(misplaced("break", span)),
            Signal::Continue(span) => Err(misplaced("continue", span)),
        }
    }

    fn member_key(&mut self, property: &Expr, computed: bool) -> Result<Value, FloError> {
        match property {
            Expr::Identifier { name, .. } if !computed => Ok(Value::Str(name.clone())),
            _ => self.evaluate(property),
        }
    }

    /// Evaluate the container and key of an assignment target once, so
    /// `f().x += 1` calls `f` a single time.
    fn resolve_place(&mut self, target: &Expr) -> Result<Place, FloError> {
        match target {
            Expr::Identifier { name, .. } => Ok(Place::Variable(name.clone())),
            Expr::Member {
                object,
                property,
                computed,
                ..
            } => {
                self.check_member_mutable(object)?;
                let container = self.evaluate(object)?;
                let key = self.member_key(property, *computed)?;
                Ok(Place::Member { container, key })
            }
            _ => Err(FloError::runtime_error(
                *target.span(),
                "Invalid assignment target".to_string(),
            )),
        }
    }

    fn read_place(&self, place: &Place, span: Span) -> Result<Value, FloError> {
        match place {
            Place::Variable(name) => self.environment.lookup(name, span),
            Place::Member { container, key } => get_member(container, key, span),
        }
    }

    fn write_place(&mut self, place: Place, value: Value, span: Span) -> Result<(), FloError> {
        match place {
            Place::Variable(name) => self.environment.assign(&name, value, span),
            Place::Member { container, key } => set_member(&container, key, value, span),
        }
    }

    /// Members may only change through a mutable variable.
    fn check_member_mutable(&self, object: &Expr) -> Result<(), FloError> {
        let mut base = object;
        while let Expr::Member { object, .. } = base {
            base = object.as_ref();
        }
        if let Expr::Identifier { name, span } = base {
            if self.environment.is_mutable(name) == Some(false) {
                return Err(FloError::runtime_error_with_help(
                    *span,
                    format!("Cannot modify a member of immutable variable '{}'", name),
                    format!("Declare it as mutable: let mut {} = ...", name),
                ));
            }
        }
        Ok(())
    }
}

/// What a `for` loop walks over.
enum Iteration {
    Count { next: i32, end: i32 },
    Items(std::vec::IntoIter<Value>),
}

impl Iterator for Iteration {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            Iteration::Count { next, end } => {
                if *next >= *end {
                    return None;
                }
                let current = *next;
                *next += 1;
                Some(Value::Int(current))
            }
            Iteration::Items(items) => items.next(),
        }
    }
}

/// Storage location written by assignment, `++`/`--` and `delete`.
enum Place {
    Variable(String),
    Member { container: Value, key: Value },
}

/// Run `program` in `env` with a default-configured interpreter.
pub fn interpret(program: &Program, env: &Environment) -> Result<Value, FloError> {
    Interpreter::new().interpret(program, env)
}

fn misplaced(keyword: &str, span: Span) -> FloError {
    FloError::runtime_error(span, format!("'{}' not allowed outside loop", keyword))
}

fn as_int(value: &Value) -> Option<i32> {
    match value {
        Value::Bool(b) => Some(i32::from(*b)),
        Value::Int(n) => Some(*n),
        _ => None,
    }
}

/// Resolve a possibly negative index against a sequence of `len` items.
fn list_index(key: &Value, len: usize, span: Span) -> Result<usize, FloError> {
    let Some(index) = as_int(key) else {
        return Err(FloError::runtime_error(
            span,
            format!("Indices must be int, found '{}'", key.type_name()),
        ));
    };
    let resolved = if index < 0 {
        len as i64 + i64::from(index)
    } else {
        i64::from(index)
    };
    if resolved < 0 || resolved >= len as i64 {
        return Err(FloError::runtime_error(
            span,
            format!("Index {} out of range for length {}", index, len),
        ));
    }
    Ok(resolved as usize)
}

fn get_member(container: &Value, key: &Value, span: Span) -> Result<Value, FloError> {
    match (container, key) {
        (Value::Object(entries), Value::Str(name)) => entries
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| FloError::runtime_error(span, format!("Object has no key '{}'", name))),
        (Value::List(items), key) => {
            let items = items.borrow();
            let index = list_index(key, items.len(), span)?;
            Ok(items[index].clone())
        }
        (Value::Str(s), key) => {
            let chars: Vec<char> = s.chars().collect();
            let index = list_index(key, chars.len(), span)?;
            Ok(Value::Str(chars[index].to_string()))
        }
        _ => Err(FloError::runtime_error(
            span,
            format!(
                "Cannot access '{}' member of '{}'",
                key.type_name(),
                container.type_name()
            ),
        )),
    }
}

fn set_member(container: &Value, key: Value, value: Value, span: Span) -> Result<(), FloError> {
    match (container, key) {
        (Value::Object(entries), Value::Str(name)) => {
            entries.borrow_mut().insert(name, value);
            Ok(())
        }
        (Value::List(items), key) => {
            let len = items.borrow().len();
            let index = list_index(&key, len, span)?;
            items.borrow_mut()[index] = value;
            Ok(())
        }
        (Value::Str(_), _) => Err(FloError::runtime_error(
            span,
            "Strings cannot be modified in place".to_string(),
        )),
        (other, key) => Err(FloError::runtime_error(
            span,
            format!(
                "Cannot set '{}' member of '{}'",
                key.type_name(),
                other.type_name()
            ),
        )),
    }
}
