//! Host syntax tree.
//!
//! Stencils are written in Python, so the front-end first parses the whole
//! module into this tree. It covers the commonly used part of Python's statement
//! and expression grammar; DSL-level restrictions are applied later by the
//! translator, which is why the tree is deliberately broader than the DSL.

use serde::{Deserialize, Serialize};

pub mod layout;
pub mod parser;

pub use parser::parse_module;

/// A byte range in the original source text.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Smallest span covering both.
    pub fn to(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub body: Vec<Stmt>,
}

// ============================================================================
// STATEMENTS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    FunctionDef(FunctionDef),
    ClassDef {
        name: String,
        decorators: Vec<Expr>,
        bases: Vec<Argument>,
        body: Vec<Stmt>,
    },
    /// `a = b = value`
    Assign {
        targets: Vec<Expr>,
        value: Expr,
    },
    AugAssign {
        target: Expr,
        op: BinOp,
        value: Expr,
    },
    AnnAssign {
        target: Expr,
        annotation: Expr,
        value: Option<Expr>,
    },
    Expr(Expr),
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    For {
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    With {
        items: Vec<WithItem>,
        body: Vec<Stmt>,
    },
    AsyncFor {
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    AsyncWith {
        items: Vec<WithItem>,
        body: Vec<Stmt>,
    },
    Try {
        body: Vec<Stmt>,
        handlers: Vec<ExceptHandler>,
        orelse: Vec<Stmt>,
        finalbody: Vec<Stmt>,
    },
    Match {
        subject: Expr,
        cases: Vec<MatchCase>,
    },
    Return(Option<Expr>),
    Pass,
    Break,
    Continue,
    Import(Vec<Alias>),
    ImportFrom {
        module: String,
        names: Vec<Alias>,
    },
    Assert {
        test: Expr,
        msg: Option<Expr>,
    },
    Raise {
        exc: Option<Expr>,
        cause: Option<Expr>,
    },
    Delete(Vec<Expr>),
    Global(Vec<String>),
    /// `type Name = value`
    TypeAlias {
        name: String,
        value: Expr,
    },
}

impl StmtKind {
    /// Human-readable name used in diagnostics.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::FunctionDef(_) => "nested function definition",
            Self::ClassDef { .. } => "class definition",
            Self::Assign { .. } => "assignment",
            Self::AugAssign { .. } => "augmented assignment",
            Self::AnnAssign { .. } => "annotated assignment",
            Self::Expr(_) => "expression statement",
            Self::If { .. } => "if statement",
            Self::For { .. } => "for loop",
            Self::While { .. } => "while loop",
            Self::With { .. } => "with statement",
            Self::AsyncFor { .. } => "async for loop",
            Self::AsyncWith { .. } => "async with statement",
            Self::Try { .. } => "try statement",
            Self::Match { .. } => "match statement",
            Self::Return(_) => "return statement",
            Self::Pass => "pass statement",
            Self::Break => "break statement",
            Self::Continue => "continue statement",
            Self::Import(_) | Self::ImportFrom { .. } => "import statement",
            Self::Assert { .. } => "assert statement",
            Self::Raise { .. } => "raise statement",
            Self::Delete(_) => "del statement",
            Self::Global(_) => "global declaration",
            Self::TypeAlias { .. } => "type alias",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub is_async: bool,
    pub decorators: Vec<Expr>,
    pub params: Vec<Param>,
    pub returns: Option<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// declared before a `/` marker
    PositionalOnly,
    /// `name`, possibly with annotation and default
    Positional,
    /// `*name`, or a bare `*` separating keyword-only parameters
    VarArgs,
    /// declared after `*`
    KeywordOnly,
    /// `**name`
    KwArgs,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: Option<String>,
    pub kind: ParamKind,
    pub annotation: Option<Expr>,
    pub default: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WithItem {
    pub context: Expr,
    pub target: Option<Expr>,
}

/// One `except` clause; `group` marks `except*`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptHandler {
    pub typ: Option<Expr>,
    pub name: Option<String>,
    pub group: bool,
    pub body: Vec<Stmt>,
    pub span: Span,
}

/// One `case` block. Patterns are kept in expression form.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCase {
    pub pattern: Expr,
    pub capture: Option<String>,
    pub guard: Option<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alias {
    pub name: String,
    pub asname: Option<String>,
}

// ============================================================================
// EXPRESSIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Name(String),
    Constant(Constant),
    Attribute {
        value: Box<Expr>,
        attr: String,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Argument>,
    },
    BinOp {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    BoolOp {
        op: BoolOp,
        values: Vec<Expr>,
    },
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOp>,
        comparators: Vec<Expr>,
    },
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Lambda {
        params: Vec<Param>,
        body: Box<Expr>,
    },
    /// `name := value`
    NamedExpr {
        target: String,
        value: Box<Expr>,
    },
    Await(Box<Expr>),
    Yield(Option<Box<Expr>>),
    YieldFrom(Box<Expr>),
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    Set(Vec<Expr>),
    /// A `None` key is a `**mapping` entry.
    Dict(Vec<(Option<Expr>, Expr)>),
    GeneratorExp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    ListComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    SetComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    DictComp {
        key: Box<Expr>,
        value: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    Starred(Box<Expr>),
}

impl ExprKind {
    /// Human-readable name used in diagnostics.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Name(_) => "name",
            Self::Constant(c) => c.describe(),
            Self::Attribute { .. } => "attribute access",
            Self::Subscript { .. } => "subscript",
            Self::Slice { .. } => "slice",
            Self::Call { .. } => "function call",
            Self::BinOp { .. } => "binary operation",
            Self::UnaryOp { .. } => "unary operation",
            Self::BoolOp { .. } => "boolean operation",
            Self::Compare { .. } => "comparison",
            Self::IfExp { .. } => "conditional expression",
            Self::Lambda { .. } => "lambda expression",
            Self::NamedExpr { .. } => "assignment expression",
            Self::Await(_) => "await expression",
            Self::Yield(_) | Self::YieldFrom(_) => "yield expression",
            Self::Tuple(_) => "tuple",
            Self::List(_) => "list display",
            Self::Set(_) => "set display",
            Self::Dict(_) => "dict display",
            Self::GeneratorExp { .. } => "generator expression",
            Self::ListComp { .. } => "list comprehension",
            Self::SetComp { .. } => "set comprehension",
            Self::DictComp { .. } => "dict comprehension",
            Self::Starred(_) => "starred expression",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(i64),
    /// Integer literal outside the `i64` range, as written.
    BigInt(String),
    Float(f64),
    Imaginary(f64),
    Str(String),
    Bool(bool),
    None,
    Ellipsis,
}

impl Constant {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Int(_) => "integer literal",
            Self::BigInt(_) => "integer literal wider than 64 bits",
            Self::Float(_) => "float literal",
            Self::Imaginary(_) => "imaginary literal",
            Self::Str(_) => "string literal",
            Self::Bool(_) => "boolean literal",
            Self::None => "None",
            Self::Ellipsis => "ellipsis",
        }
    }
}

/// A call argument: positional, `name=value`, `*value` (as `Starred`) or `**value`.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Positional(Expr),
    Keyword { name: String, value: Expr },
    DoubleStarred(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    pub is_async: bool,
    pub target: Expr,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mult,
    MatMult,
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
}

impl BinOp {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "+" => Self::Add,
            "-" => Self::Sub,
            "*" => Self::Mult,
            "@" => Self::MatMult,
            "/" => Self::Div,
            "//" => Self::FloorDiv,
            "%" => Self::Mod,
            "**" => Self::Pow,
            "<<" => Self::LShift,
            ">>" => Self::RShift,
            "|" => Self::BitOr,
            "^" => Self::BitXor,
            "&" => Self::BitAnd,
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mult => "*",
            Self::MatMult => "@",
            Self::Div => "/",
            Self::FloorDiv => "//",
            Self::Mod => "%",
            Self::Pow => "**",
            Self::LShift => "<<",
            Self::RShift => ">>",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::BitAnd => "&",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
    Invert,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    In,
    NotIn,
    Is,
    IsNot,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtE => "<=",
            Self::Gt => ">",
            Self::GtE => ">=",
            Self::In => "in",
            Self::NotIn => "not in",
            Self::Is => "is",
            Self::IsNot => "is not",
        }
    }
}

impl Expr {
    /// The identifier, if this is a bare name.
    pub fn as_name(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Name(name) => Some(name),
            _ => None,
        }
    }
}
