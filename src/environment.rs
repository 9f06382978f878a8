use crate::error::{FloError, Span};
use crate::value::Value;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Root,
    Function,
    Block,
}

#[derive(Debug)]
struct Scope {
    kind: ScopeKind,
    values: HashMap<String, Value>,
    mutable: HashSet<String>,
    parent: Option<Environment>,
}

/// A scope in the scope tree. Cloning shares the scope.
#[derive(Debug, Clone)]
pub struct Environment(Rc<RefCell<Scope>>);

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    /// A fresh root scope.
    pub fn new() -> Self {
        Self::with_parent(ScopeKind::Root, None)
    }

    fn with_parent(kind: ScopeKind, parent: Option<Environment>) -> Self {
        Environment(Rc::new(RefCell::new(Scope {
            kind,
            values: HashMap::new(),
            mutable: HashSet::new(),
            parent,
        })))
    }

    pub fn child(&self, kind: ScopeKind) -> Self {
        Self::with_parent(kind, Some(self.clone()))
    }

    pub fn kind(&self) -> ScopeKind {
        self.0.borrow().kind
    }

    pub fn parent(&self) -> Option<Environment> {
        self.0.borrow().parent.clone()
    }

    /// Bind `name` in this scope. A name can be declared once per scope;
    /// shadowing an outer scope is fine.
    pub fn declare_local(
        &self,
        name: &str,
        value: Value,
        mutable: bool,
        span: Span,
    ) -> Result<(), FloError> {
        let mut scope = self.0.borrow_mut();
        if scope.values.contains_key(name) {
            return Err(FloError::runtime_error_with_help(
                span,
                format!("Variable '{}' is already declared in this scope", name),
                format!("Assign to it instead: {} = ...", name),
            ));
        }
        scope.values.insert(name.to_string(), value);
        if mutable {
            scope.mutable.insert(name.to_string());
        }
        Ok(())
    }

    /// Bind `name` in the nearest function or root scope.
    pub fn declare_global(
        &self,
        name: &str,
        value: Value,
        mutable: bool,
        span: Span,
    ) -> Result<(), FloError> {
        self.function_scope().declare_local(name, value, mutable, span)
    }

    fn function_scope(&self) -> Environment {
        let mut current = self.clone();
        loop {
            if current.kind() != ScopeKind::Block {
                return current;
            }
            match current.parent() {
                Some(parent) => current = parent,
                None => return current,
            }
        }
    }

    /// The scope that binds `name`, searching outwards.
    fn resolve(&self, name: &str) -> Option<Environment> {
        let mut current = self.clone();
        loop {
            if current.0.borrow().values.contains_key(name) {
                return Some(current);
            }
            current = current.parent()?;
        }
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        let scope = self.resolve(name)?;
        let value = scope.0.borrow().values.get(name).cloned();
        value
    }

    pub fn lookup(&self, name: &str, span: Span) -> Result<Value, FloError> {
        self.get(name)
            .ok_or_else(|| FloError::runtime_error(span, format!("Variable '{}' is not defined", name)))
    }

    /// `Some(mutable)` for a bound name, `None` when unbound.
    pub fn is_mutable(&self, name: &str) -> Option<bool> {
        let scope = self.resolve(name)?;
        let mutable = scope.0.borrow().mutable.contains(name);
        Some(mutable)
    }

    pub fn assign(&self, name: &str, value: Value, span: Span) -> Result<(), FloError> {
        let Some(scope) = self.resolve(name) else {
            return Err(FloError::runtime_error_with_help(
                span,
                format!("Variable '{}' is not defined", name),
                format!("Declare it first: let mut {} = ...", name),
            ));
        };

        let mut scope = scope.0.borrow_mut();
        if !scope.mutable.contains(name) {
            return Err(FloError::runtime_error_with_help(
                span,
                format!("Cannot assign to immutable variable '{}'", name),
                format!("Declare it as mutable: let mut {} = ...", name),
            ));
        }
        scope.values.insert(name.to_string(), value);
        Ok(())
    }

    /// Unbind `name` from the nearest scope that has it.
    pub fn remove(&self, name: &str, span: Span) -> Result<Value, FloError> {
        let scope = self
            .resolve(name)
            .ok_or_else(|| FloError::runtime_error(span, format!("Variable '{}' is not defined", name)))?;

        let mut scope = scope.0.borrow_mut();
        scope.mutable.remove(name);
        scope
            .values
            .remove(name)
            .ok_or_else(|| FloError::runtime_error(span, format!("Variable '{}' is not defined", name)))
    }

    /// Names bound directly in this scope, sorted.
    pub fn local_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.0.borrow().values.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn span() -> Span {
        Span::new(0, 1)
    }

    #[test]
    fn lookup_walks_outwards() {
        let root = Environment::new();
        root.declare_local("x", Value::Int(1), false, span()).unwrap();
        let block = root.child(ScopeKind::Block);
        assert_eq!(block.lookup("x", span()).unwrap(), Value::Int(1));
    }

    #[test]
    fn undefined_lookup() {
        let root = Environment::new();
        let error = root.lookup("missing", span()).unwrap_err();
        assert_eq!(error.kind, ErrorKind::RuntimeError);
        assert_eq!(error.message, "Variable 'missing' is not defined");
    }

    #[test]
    fn redeclaration_in_same_scope_fails() {
        let root = Environment::new();
        root.declare_local("x", Value::Int(1), false, span()).unwrap();
        assert!(root.declare_local("x", Value::Int(2), false, span()).is_err());
    }

    #[test]
    fn shadowing_in_child_scope() {
        let root = Environment::new();
        root.declare_local("x", Value::Int(1), false, span()).unwrap();
        let block = root.child(ScopeKind::Block);
        block.declare_local("x", Value::Int(2), false, span()).unwrap();
        assert_eq!(block.lookup("x", span()).unwrap(), Value::Int(2));
        assert_eq!(root.lookup("x", span()).unwrap(), Value::Int(1));
    }

    #[test]
    fn immutable_assignment_fails() {
        let root = Environment::new();
        root.declare_local("x", Value::Int(1), false, span()).unwrap();
        let error = root.assign("x", Value::Int(2), span()).unwrap_err();
        assert_eq!(error.message, "Cannot assign to immutable variable 'x'");
        assert_eq!(root.is_mutable("x"), Some(false));
    }

    #[test]
    fn assignment_reaches_defining_scope() {
        let root = Environment::new();
        root.declare_local("x", Value::Int(1), true, span()).unwrap();
        let block = root.child(ScopeKind::Block);
        block.assign("x", Value::Int(5), span()).unwrap();
        assert_eq!(root.lookup("x", span()).unwrap(), Value::Int(5));
    }

    #[test]
    fn global_declaration_skips_blocks() {
        let root = Environment::new();
        let function = root.child(ScopeKind::Function);
        let block = function.child(ScopeKind::Block).child(ScopeKind::Block);
        block.declare_global("g", Value::Int(7), false, span()).unwrap();
        assert_eq!(function.local_names(), vec!["g".to_string()]);
        assert!(root.get("g").is_none());
    }

    #[test]
    fn remove_unbinds() {
        let root = Environment::new();
        root.declare_local("x", Value::Int(1), true, span()).unwrap();
        let block = root.child(ScopeKind::Block);
        assert_eq!(block.remove("x", span()).unwrap(), Value::Int(1));
        assert!(root.get("x").is_none());
        assert!(block.remove("x", span()).is_err());
        // the name can be declared again afterwards
        root.declare_local("x", Value::Int(2), false, span()).unwrap();
    }
}
