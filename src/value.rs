use crate::ast::FunctionDecl;
use crate::error::{FloError, Span};
use crate::evaluator::Interpreter;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

/// Host callback behind a native function.
pub type NativeFn = fn(&mut Interpreter, &[Value], &Span) -> Result<Value, FloError>;

pub struct NativeFunction {
    pub name: String,
    /// `None` accepts any number of arguments.
    pub arity: Option<usize>,
    pub func: NativeFn,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<native fn {}>", self.name)
    }
}

/// A function declared in flo source.
pub struct RuntimeFunction {
    pub decl: Rc<FunctionDecl>,
    /// One entry per parameter, evaluated once when the function was declared.
    pub defaults: Vec<Option<Value>>,
}

impl RuntimeFunction {
    pub fn name(&self) -> &str {
        &self.decl.name
    }
}

impl fmt::Debug for RuntimeFunction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<fn {}>", self.decl.name)
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i32),
    Float(f64),
    Str(String),
    List(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<HashMap<String, Value>>>),
    NativeFunction(Rc<NativeFunction>),
    RuntimeFunction(Rc<RuntimeFunction>),
}

impl Value {
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn object(entries: HashMap<String, Value>) -> Self {
        Value::Object(Rc::new(RefCell::new(entries)))
    }

    pub fn str(text: impl Into<String>) -> Self {
        Value::Str(text.into())
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Object(entries) => !entries.borrow().is_empty(),
            Value::NativeFunction(_) | Value::RuntimeFunction(_) => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Object(_) => "obj",
            Value::NativeFunction(_) => "native function",
            Value::RuntimeFunction(_) => "function",
        }
    }

    /// Number as `f64`, with `bool` promoted like `int`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(f64::from(u8::from(*b))),
            Value::Int(n) => Some(f64::from(*n)),
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// Plain data copy for the embedding application. Containers are
    /// copied deeply; a container that contains itself is cut off as `None`.
    pub fn to_host(&self) -> HostValue {
        self.to_host_inner(&mut Vec::new())
    }

    fn to_host_inner(&self, seen: &mut Vec<usize>) -> HostValue {
        match self {
            Value::None => HostValue::None,
            Value::Bool(b) => HostValue::Bool(*b),
            Value::Int(n) => HostValue::Int(*n),
            Value::Float(n) => HostValue::Float(*n),
            Value::Str(s) => HostValue::Str(s.clone()),
            Value::List(items) => {
                let id = Rc::as_ptr(items) as usize;
                if seen.contains(&id) {
                    return HostValue::None;
                }
                seen.push(id);
                let host = items.borrow().iter().map(|v| v.to_host_inner(seen)).collect();
                seen.pop();
                HostValue::List(host)
            }
            Value::Object(entries) => {
                let id = Rc::as_ptr(entries) as usize;
                if seen.contains(&id) {
                    return HostValue::None;
                }
                seen.push(id);
                let host = entries
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_host_inner(seen)))
                    .collect();
                seen.pop();
                HostValue::Object(host)
            }
            Value::NativeFunction(native) => HostValue::Function(native.name.clone()),
            Value::RuntimeFunction(function) => HostValue::Function(function.name().to_string()),
        }
    }

    fn fmt_nested(&self, f: &mut fmt::Formatter, seen: &mut Vec<usize>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{:?}", s),
            Value::List(items) => {
                let id = Rc::as_ptr(items) as usize;
                if seen.contains(&id) {
                    return write!(f, "[...]");
                }
                seen.push(id);
                write!(f, "[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    item.fmt_nested(f, seen)?;
                }
                seen.pop();
                write!(f, "]")
            }
            Value::Object(entries) => {
                let id = Rc::as_ptr(entries) as usize;
                if seen.contains(&id) {
                    return write!(f, "{{...}}");
                }
                seen.push(id);
                let entries = entries.borrow();
                // sorted, so output does not depend on hash order
                let mut keys: Vec<&String> = entries.keys().collect();
                keys.sort();
                write!(f, "{{")?;
                for (i, key) in keys.into_iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: ", key)?;
                    if let Some(value) = entries.get(key) {
                        value.fmt_nested(f, seen)?;
                    }
                }
                seen.pop();
                write!(f, "}}")
            }
            other => write!(f, "{}", other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", format_float(*n)),
            Value::Str(s) => write!(f, "{}", s),
            Value::List(_) | Value::Object(_) => self.fmt_nested(f, &mut Vec::new()),
            Value::NativeFunction(native) => write!(f, "<native fn {}>", native.name),
            Value::RuntimeFunction(function) => write!(f, "<fn {}>", function.name()),
        }
    }
}

/// Floats always show a fractional part: `2.0`, not `2`.
pub fn format_float(n: f64) -> String {
    if n.is_nan() {
        "nan".to_string()
    } else if n == f64::INFINITY {
        "inf".to_string()
    } else if n == f64::NEG_INFINITY {
        "-inf".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e16 {
        format!("{:.1}", n)
    } else {
        format!("{}", n)
    }
}

/// Strict equality: same variant and same contents. Language-level `==`
/// (which compares `1 == 1.0` numerically) lives in `operators`.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::NativeFunction(a), Value::NativeFunction(b)) => Rc::ptr_eq(a, b),
            (Value::RuntimeFunction(a), Value::RuntimeFunction(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

/// Owned, plain-data view of a [`Value`] for code embedding the interpreter.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    None,
    Bool(bool),
    Int(i32),
    Float(f64),
    Str(String),
    List(Vec<HostValue>),
    Object(BTreeMap<String, HostValue>),
    /// Functions cross over by name only.
    Function(String),
}
