use crate::error::Span;
use std::fmt;
use std::rc::Rc;

/// How a program is run: statement by statement, or through `main()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Program,
    Script,
}

#[derive(Debug, Clone)]
pub struct Program {
    pub statements: Vec<Stmt>,
    pub mode: Mode,
}

/// A type annotation such as `int`, `Foo`, `int[]` or `list<int, str>[][]`.
/// Recorded by the parser, never enforced.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeName {
    pub name: String,
    pub builtin: bool,
    pub generics: Vec<TypeName>,
    pub array_depth: usize,
    pub span: Span,
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.generics.is_empty() {
            let generics: Vec<String> = self.generics.iter().map(|g| g.to_string()).collect();
            write!(f, "<{}>", generics.join(", "))?;
        }
        for _ in 0..self.array_depth {
            write!(f, "[]")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclScope {
    /// `let`: bound in the current scope.
    Local,
    /// `static`: bound in the nearest function or root scope.
    Global,
    /// `@alloc name`: a mutable local starting out as `None`.
    Dynamic,
    /// `let`/`static` inside a class body.
    Member,
}

#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub type_name: Option<TypeName>,
    pub default: Option<Expr>,
    pub span: Span,
}

#[derive(Debug)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Parameter>,
    pub return_type: Option<TypeName>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct EnumVariant {
    pub name: String,
    pub value: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ForIterable {
    /// `for x in a..b`
    Range { start: Expr, end: Expr },
    /// `for x in n` or `for x in items`, decided by the runtime value.
    Value(Expr),
}

#[derive(Debug, Clone)]
pub enum Stmt {
    VarDecl {
        scope: DeclScope,
        mutable: bool,
        type_name: Option<TypeName>,
        name: String,
        initializer: Option<Expr>,
        span: Span,
    },
    /// Function bodies are shared with every function value created from them.
    Function(Rc<FunctionDecl>),
    Class {
        name: String,
        body: Vec<Stmt>,
        span: Span,
    },
    Enum {
        name: String,
        variants: Vec<EnumVariant>,
        span: Span,
    },
    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
        span: Span,
    },
    While {
        condition: Expr,
        body: Box<Stmt>,
        span: Span,
    },
    For {
        variable: String,
        type_name: Option<TypeName>,
        iterable: ForIterable,
        body: Box<Stmt>,
        span: Span,
    },
    Return {
        value: Option<Expr>,
        span: Span,
    },
    Break {
        span: Span,
    },
    Continue {
        span: Span,
    },
    Unreachable {
        span: Span,
    },
    Delete {
        target: Expr,
        span: Span,
    },
    Pass {
        span: Span,
    },
    Block {
        statements: Vec<Stmt>,
        span: Span,
    },
    Expression {
        expr: Expr,
        span: Span,
    },
}

impl Stmt {
    pub fn span(&self) -> &Span {
        match self {
            Stmt::VarDecl { span, .. } => span,
            Stmt::Function(decl) => &decl.span,
            Stmt::Class { span, .. } => span,
            Stmt::Enum { span, .. } => span,
            Stmt::If { span, .. } => span,
            Stmt::While { span, .. } => span,
            Stmt::For { span, .. } => span,
            Stmt::Return { span, .. } => span,
            Stmt::Break { span } => span,
            Stmt::Continue { span } => span,
            Stmt::Unreachable { span } => span,
            Stmt::Delete { span, .. } => span,
            Stmt::Pass { span } => span,
            Stmt::Block { span, .. } => span,
            Stmt::Expression { span, .. } => span,
        }
    }

    /// True for statements after which nothing else in the block can run.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Stmt::Return { .. } | Stmt::Break { .. } | Stmt::Continue { .. } | Stmt::Unreachable { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    /// `target = value`, or a compound form like `target += value`.
    Assign {
        target: Box<Expr>,
        operator: Option<BinaryOp>,
        value: Box<Expr>,
        span: Span,
    },
    Binary {
        left: Box<Expr>,
        operator: BinaryOp,
        right: Box<Expr>,
        span: Span,
    },
    Logical {
        left: Box<Expr>,
        operator: LogicalOp,
        right: Box<Expr>,
        span: Span,
    },
    Unary {
        operator: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },
    Update {
        operator: UpdateOp,
        prefix: bool,
        target: Box<Expr>,
        span: Span,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        span: Span,
    },
    /// `object.name` (not computed, property is an `Identifier`) or
    /// `object[expr]` (computed).
    Member {
        object: Box<Expr>,
        property: Box<Expr>,
        computed: bool,
        span: Span,
    },
    Identifier {
        name: String,
        span: Span,
    },
    Number {
        value: i32,
        span: Span,
    },
    Float {
        value: f64,
        span: Span,
    },
    Str {
        value: String,
        span: Span,
    },
    List {
        elements: Vec<Expr>,
        span: Span,
    },
    Object {
        entries: Vec<(String, Expr)>,
        span: Span,
    },
    /// `condition ? then_expr : else_expr`
    Elvis {
        condition: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> &Span {
        match self {
            Expr::Assign { span, .. } => span,
            Expr::Binary { span, .. } => span,
            Expr::Logical { span, .. } => span,
            Expr::Unary { span, .. } => span,
            Expr::Update { span, .. } => span,
            Expr::Call { span, .. } => span,
            Expr::Member { span, .. } => span,
            Expr::Identifier { span, .. } => span,
            Expr::Number { span, .. } => span,
            Expr::Float { span, .. } => span,
            Expr::Str { span, .. } => span,
            Expr::List { span, .. } => span,
            Expr::Object { span, .. } => span,
            Expr::Elvis { span, .. } => span,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    FloorDivide,
    Modulo,
    Power,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::FloorDivide => "//",
            BinaryOp::Modulo => "%",
            BinaryOp::Power => "**",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::ShiftLeft => "<<",
            BinaryOp::ShiftRight => ">>",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Plus,
    Not,
    BitNot,
}

impl UnaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOp::Negate => "-",
            UnaryOp::Plus => "+",
            UnaryOp::Not => "not",
            UnaryOp::BitNot => "~",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
    Increment,
    Decrement,
}
