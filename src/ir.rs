//! Stencil intermediate representation.
//!
//! The document produced by a translation run. Everything here is plain owned
//! data: built once by the translator, never mutated afterwards, and
//! serialized as-is for the code-generation backend.

use serde::{Deserialize, Serialize};

pub mod location;

pub use location::{is_valid_neighbor_relation, LocationType, NEIGHBOR_RELATIONS};

/// 1-based line and column of a construct in the translated source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GridType {
    Unstructured,
}

/// All stencils translated from one source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StencilIrDocument {
    pub filename: String,
    pub grid_type: GridType,
    pub stencils: Vec<StencilDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StencilDef {
    pub name: String,
    pub loc: SourceLocation,
    pub vertical: VerticalOrder,
    pub fields: Vec<Field>,
    pub body: Vec<Statement>,
}

impl StencilDef {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Iteration order over vertical levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VerticalOrder {
    #[default]
    Parallel,
    Forward,
    Backward,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub location: LocationType,
    pub intent: Intent,
    pub element: ElementType,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intent {
    Input,
    Output,
    InputOutput,
}

impl Intent {
    pub fn is_writable(self) -> bool {
        !matches!(self, Self::Input)
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Input => "In",
            Self::Output => "Out",
            Self::InputOutput => "InOut",
        })
    }
}

/// Element type of a field. Only `float` exists today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ElementType {
    #[default]
    Float,
}

// ============================================================================
// STATEMENTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Statement {
    Assignment {
        target: AssignTarget,
        value: Expression,
        loc: SourceLocation,
    },
    /// Reduce `value` over the `neighbor` elements adjacent to the current
    /// `target` element into `accumulator`.
    LoopOverNeighbors {
        accumulator: AssignTarget,
        reduction: Reduction,
        target: LocationType,
        neighbor: LocationType,
        init: Option<Expression>,
        body: Vec<Statement>,
        value: Expression,
        loc: SourceLocation,
    },
    Conditional {
        condition: Expression,
        then_body: Vec<Statement>,
        else_body: Vec<Statement>,
        loc: SourceLocation,
    },
    Return {
        loc: SourceLocation,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum AssignTarget {
    Field { name: String },
    /// `declares` marks the first binding of the local in its scope.
    Local { name: String, declares: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reduction {
    Sum,
    Min,
    Max,
    Product,
}

impl Reduction {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "sum" => Self::Sum,
            "min" => Self::Min,
            "max" => Self::Max,
            "product" => Self::Product,
            _ => return None,
        })
    }
}

// ============================================================================
// EXPRESSIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Expression {
    /// `neighbor` is set when the access reads the current neighbor element
    /// of the enclosing reduction instead of the center element.
    FieldAccess {
        name: String,
        neighbor: bool,
    },
    Literal {
        value: LiteralValue,
    },
    BinaryOp {
        op: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    UnaryOp {
        op: UnaryOperator,
        operand: Box<Expression>,
    },
    VariableRef {
        name: String,
    },
    ReductionResult {
        reduction: Reduction,
        target: LocationType,
        neighbor: LocationType,
        init: Option<Box<Expression>>,
        value: Box<Expression>,
    },
    FunctionCall {
        function: MathFunction,
        args: Vec<Expression>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LiteralValue {
    Float(f64),
    Integer(i64),
    Boolean(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOperator {
    Neg,
    Pos,
    Not,
}

/// Scalar math functions callable from stencil expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MathFunction {
    Sqrt,
    Exp,
    Log,
    Sin,
    Cos,
    Tan,
    Abs,
    Floor,
    Ceil,
    Min,
    Max,
    Pow,
}

impl MathFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "sqrt" => Self::Sqrt,
            "exp" => Self::Exp,
            "log" => Self::Log,
            "sin" => Self::Sin,
            "cos" => Self::Cos,
            "tan" => Self::Tan,
            "abs" => Self::Abs,
            "floor" => Self::Floor,
            "ceil" => Self::Ceil,
            "min" => Self::Min,
            "max" => Self::Max,
            "pow" => Self::Pow,
            _ => return None,
        })
    }

    pub fn arity(self) -> usize {
        match self {
            Self::Min | Self::Max | Self::Pow => 2,
            _ => 1,
        }
    }
}

impl Expression {
    /// Nesting depth of the expression tree; a leaf has depth 1.
    pub fn depth(&self) -> usize {
        match self {
            Self::FieldAccess { .. } | Self::Literal { .. } | Self::VariableRef { .. } => 1,
            Self::BinaryOp { left, right, .. } => 1 + left.depth().max(right.depth()),
            Self::UnaryOp { operand, .. } => 1 + operand.depth(),
            Self::ReductionResult { init, value, .. } => {
                1 + value.depth().max(init.as_ref().map_or(0, |i| i.depth()))
            }
            Self::FunctionCall { args, .. } => {
                1 + args.iter().map(Expression::depth).max().unwrap_or(0)
            }
        }
    }
}
