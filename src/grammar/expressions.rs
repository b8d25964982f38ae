//! Expression lowering and shape checking.

use super::scope::Shape;
use super::StencilTranslator;
use crate::errors::{DuskError, ErrorKind, ErrorReporting};
use crate::ir::{
    is_valid_neighbor_relation, BinaryOperator, Expression, LiteralValue, LocationType,
    MathFunction, Reduction, UnaryOperator,
};
use crate::syntax::{Argument, BinOp, BoolOp, CmpOp, Constant, Expr, ExprKind, Span, UnaryOp};

/// A lowered expression and its shape.
pub(super) struct Lowered {
    pub expr: Expression,
    pub shape: Shape,
}

/// `sum(<generator>, init=...)` as written in the host tree.
pub(super) struct ReductionCall<'e> {
    reduction: Reduction,
    generator: &'e Expr,
    init: Option<&'e Expr>,
    span: Span,
}

/// A lowered generator reduction.
pub(super) struct ReductionParts {
    pub reduction: Reduction,
    pub target: LocationType,
    pub neighbor: LocationType,
    pub init: Option<Expression>,
    pub value: Expression,
}

impl StencilTranslator<'_> {
    pub(super) fn expr(&mut self, expr: &Expr) -> Result<Lowered, DuskError> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Name(name) => self.name(name, span),
            ExprKind::Constant(constant) => self.literal(constant, span),
            ExprKind::Subscript { value, index } => self.neighbor_access(value, index, span),

            ExprKind::BinOp { left, op, right } => {
                let op = binary_operator(*op).ok_or_else(|| {
                    self.source
                        .unsupported(format!("operator '{}'", op.symbol()), span)
                })?;
                self.binary(op, left, right, span)
            }

            ExprKind::UnaryOp { op, operand } => {
                let op = match op {
                    UnaryOp::Neg => UnaryOperator::Neg,
                    UnaryOp::Pos => UnaryOperator::Pos,
                    UnaryOp::Not => UnaryOperator::Not,
                    UnaryOp::Invert => return Err(self.source.unsupported("operator '~'", span)),
                };
                let operand = self.expr(operand)?;
                Ok(Lowered {
                    expr: Expression::UnaryOp {
                        op,
                        operand: Box::new(operand.expr),
                    },
                    shape: operand.shape,
                })
            }

            ExprKind::BoolOp { op, values } => {
                let op = match op {
                    BoolOp::And => BinaryOperator::And,
                    BoolOp::Or => BinaryOperator::Or,
                };
                let mut values = values.iter();
                let first = values
                    .next()
                    .ok_or_else(|| self.source.invalid("empty boolean operation", span))?;
                let mut acc = self.expr(first)?;
                for value in values {
                    let right = self.expr(value)?;
                    acc = self.join(op, acc, right, span)?;
                }
                Ok(acc)
            }

            ExprKind::Compare {
                left,
                ops,
                comparators,
            } => {
                let ([op], [right]) = (ops.as_slice(), comparators.as_slice()) else {
                    return Err(self.source.unsupported("chained comparison", span));
                };
                let op = comparison_operator(*op).ok_or_else(|| {
                    self.source
                        .unsupported(format!("operator '{}'", op.symbol()), span)
                })?;
                self.binary(op, left, right, span)
            }

            ExprKind::Call { func, args } => self.call(expr, func, args),

            ExprKind::GeneratorExp { .. } => Err(self.source.invalid_reduction(
                "a generator expression must be the argument of sum, min, max or product",
                span,
            )),

            other => Err(self.source.unsupported(other.describe(), span)),
        }
    }

    // ------------------------------------------------------------------
    // leaves
    // ------------------------------------------------------------------

    fn name(&mut self, name: &str, span: Span) -> Result<Lowered, DuskError> {
        if let Some(ctx) = &self.in_loop {
            if ctx.variable.as_deref() == Some(name) {
                return Err(self.source.invalid(
                    format!("loop variable '{name}' can only index a field, as in f[{name}]"),
                    span,
                ));
            }
        }
        if let Some(index) = self.field_index(name) {
            return self.field_access(index, false, span);
        }

        let Some((frame, shape)) = self.scopes.lookup(name) else {
            return Err(self.source.undeclared_field(name, span));
        };
        if let Some(ctx) = &self.in_loop {
            let outer = frame < ctx.scope_floor;
            if let Some(location) = shape.location.filter(|l| outer && *l != ctx.target) {
                return Err(self.source.shape_mismatch(
                    format!(
                        "local '{name}' holds a {location} value and cannot be read in a reduction around {} elements",
                        ctx.target
                    ),
                    span,
                ));
            }
        }
        Ok(Lowered {
            expr: Expression::VariableRef {
                name: name.to_string(),
            },
            shape,
        })
    }

    /// Read a field. Inside a reduction, fields on the neighbor location are
    /// per-neighbor reads and fields on the target location are center reads.
    fn field_access(&mut self, index: usize, indexed: bool, span: Span) -> Result<Lowered, DuskError> {
        let name = self.fields[index].field.name.clone();
        let location = self.fields[index].field.location;

        let shape = match &self.in_loop {
            None => Shape::center(location),
            Some(ctx) if location == ctx.neighbor => Shape::neighbor(location),
            Some(ctx) if indexed => {
                return Err(self.source.shape_mismatch(
                    format!(
                        "field '{name}' is located on {location}; only {} fields can be indexed by the loop variable",
                        ctx.neighbor
                    ),
                    span,
                ))
            }
            Some(ctx) if location == ctx.target => Shape::center(location),
            Some(ctx) => {
                return Err(self.source.shape_mismatch(
                    format!(
                        "field '{name}' is located on {location} and cannot be read in a reduction over the {} neighbors of a {}",
                        ctx.neighbor, ctx.target
                    ),
                    span,
                ))
            }
        };

        self.fields[index].read = true;
        Ok(Lowered {
            expr: Expression::FieldAccess {
                name,
                neighbor: shape.per_neighbor,
            },
            shape,
        })
    }

    /// `field[e]` where `e` is the loop variable of the enclosing reduction.
    fn neighbor_access(&mut self, value: &Expr, index: &Expr, span: Span) -> Result<Lowered, DuskError> {
        let (Some(name), Some(variable)) = (value.as_name(), index.as_name()) else {
            return Err(self.source.unsupported("subscript", span));
        };
        match &self.in_loop {
            None => {
                return Err(self.source.shape_mismatch(
                    format!("'{name}[{variable}]' indexes a neighbor outside of a reduction"),
                    span,
                ))
            }
            Some(ctx) if ctx.variable.as_deref() != Some(variable) => {
                return Err(self.source.invalid(
                    format!("'{variable}' is not the loop variable of the enclosing reduction"),
                    index.span,
                ))
            }
            Some(_) => {}
        }
        match self.field_index(name) {
            Some(field) => self.field_access(field, true, span),
            None if self.scopes.lookup(name).is_some() => Err(self.source.shape_mismatch(
                format!("local '{name}' cannot be indexed by a neighbor; only fields can"),
                span,
            )),
            None => Err(self.source.undeclared_field(name, value.span)),
        }
    }

    fn literal(&self, constant: &Constant, span: Span) -> Result<Lowered, DuskError> {
        let value = match constant {
            Constant::Int(value) => LiteralValue::Integer(*value),
            Constant::Float(value) if value.is_finite() => LiteralValue::Float(*value),
            Constant::Float(_) => {
                return Err(self.source.invalid("float literal is not finite", span))
            }
            Constant::Bool(value) => LiteralValue::Boolean(*value),
            other => return Err(self.source.unsupported(other.describe(), span)),
        };
        Ok(Lowered {
            expr: Expression::Literal { value },
            shape: Shape::SCALAR,
        })
    }

    // ------------------------------------------------------------------
    // operators
    // ------------------------------------------------------------------

    fn binary(
        &mut self,
        op: BinaryOperator,
        left: &Expr,
        right: &Expr,
        span: Span,
    ) -> Result<Lowered, DuskError> {
        let left = self.expr(left)?;
        let right = self.expr(right)?;
        self.join(op, left, right, span)
    }

    fn join(
        &self,
        op: BinaryOperator,
        left: Lowered,
        right: Lowered,
        span: Span,
    ) -> Result<Lowered, DuskError> {
        let shape = left.shape.combine(right.shape).ok_or_else(|| {
            self.source.shape_mismatch(
                format!("cannot combine a {} with a {}", left.shape, right.shape),
                span,
            )
        })?;
        Ok(Lowered {
            expr: Expression::BinaryOp {
                op,
                left: Box::new(left.expr),
                right: Box::new(right.expr),
            },
            shape,
        })
    }

    // ------------------------------------------------------------------
    // calls
    // ------------------------------------------------------------------

    fn call(&mut self, expr: &Expr, func: &Expr, args: &[Argument]) -> Result<Lowered, DuskError> {
        let span = expr.span;
        if let Some(call) = self.reduction_call(expr)? {
            let parts = self.reduction(call)?;
            return Ok(Lowered {
                shape: Shape::center(parts.target),
                expr: Expression::ReductionResult {
                    reduction: parts.reduction,
                    target: parts.target,
                    neighbor: parts.neighbor,
                    init: parts.init.map(Box::new),
                    value: Box::new(parts.value),
                },
            });
        }

        let Some(name) = func.as_name() else {
            return Err(self.source.unsupported("method call", span));
        };
        if let Some(function) = MathFunction::from_name(name) {
            return self.math_call(function, name, args, span);
        }
        if Reduction::from_name(name).is_some() {
            return Err(self.source.invalid_reduction(
                format!("'{name}' expects a generator over neighbors, as in {name}(f for e in edges(cell))"),
                span,
            ));
        }
        if name == "reduce" {
            return Err(self.source.invalid_reduction(
                "reduce(...) is only valid as the context of a with statement",
                span,
            ));
        }
        if LocationType::from_iteration_name(name).is_some() {
            return Err(self.source.invalid_reduction(
                format!("'{name}(...)' can only be iterated inside a reduction"),
                span,
            ));
        }
        Err(self.source.unsupported(format!("call to '{name}'"), span))
    }

    fn math_call(
        &mut self,
        function: MathFunction,
        name: &str,
        args: &[Argument],
        span: Span,
    ) -> Result<Lowered, DuskError> {
        let mut lowered = Vec::with_capacity(args.len());
        let mut shape = Shape::SCALAR;
        for arg in args {
            let Argument::Positional(arg) = arg else {
                return Err(self
                    .source
                    .unsupported(format!("keyword or unpacked argument to '{name}'"), span));
            };
            let arg = self.expr(arg)?;
            shape = shape.combine(arg.shape).ok_or_else(|| {
                self.source.shape_mismatch(
                    format!("arguments of '{name}' mix a {shape} with a {}", arg.shape),
                    span,
                )
            })?;
            lowered.push(arg.expr);
        }
        if lowered.len() != function.arity() {
            return Err(self.source.invalid(
                format!(
                    "'{name}' takes {} argument(s) but {} were given",
                    function.arity(),
                    lowered.len()
                ),
                span,
            ));
        }
        Ok(Lowered {
            expr: Expression::FunctionCall {
                function,
                args: lowered,
            },
            shape,
        })
    }

    // ------------------------------------------------------------------
    // reductions
    // ------------------------------------------------------------------

    /// Recognize `sum|min|max|product(<generator>, init=...)`.
    pub(super) fn reduction_call<'e>(
        &self,
        expr: &'e Expr,
    ) -> Result<Option<ReductionCall<'e>>, DuskError> {
        let ExprKind::Call { func, args } = &expr.kind else {
            return Ok(None);
        };
        let Some(reduction) = func.as_name().and_then(Reduction::from_name) else {
            return Ok(None);
        };
        let generator = match args.first() {
            Some(Argument::Positional(first)) if matches!(first.kind, ExprKind::GeneratorExp { .. }) => {
                first
            }
            _ => return Ok(None),
        };

        let mut init = None;
        for arg in &args[1..] {
            match arg {
                Argument::Keyword { name, value } if name == "init" => init = Some(value),
                Argument::Keyword { name, value } => {
                    return Err(self
                        .source
                        .invalid_reduction(format!("unexpected keyword '{name}'"), value.span))
                }
                Argument::Positional(extra) | Argument::DoubleStarred(extra) => {
                    return Err(self.source.invalid_reduction(
                        "pass the initial value of a reduction as init=...",
                        extra.span,
                    ))
                }
            }
        }

        Ok(Some(ReductionCall {
            reduction,
            generator,
            init,
            span: expr.span,
        }))
    }

    pub(super) fn reduction(&mut self, call: ReductionCall<'_>) -> Result<ReductionParts, DuskError> {
        if self.in_loop.is_some() {
            return Err(self
                .source
                .invalid_reduction("nested reductions are not supported", call.span));
        }
        let ExprKind::GeneratorExp { elt, generators } = &call.generator.kind else {
            return Err(self.source.invalid_reduction(
                "expected a generator over neighbors",
                call.generator.span,
            ));
        };
        let [generator] = generators.as_slice() else {
            return Err(self.source.invalid_reduction(
                "a reduction iterates a single neighbor set; several 'for' clauses are not supported",
                call.generator.span,
            ));
        };
        if let Some(filter) = generator.ifs.first() {
            return Err(self
                .source
                .invalid_reduction("filters are not supported in reductions", filter.span));
        }
        let variable = generator.target.as_name().ok_or_else(|| {
            self.source
                .invalid_reduction("the loop target must be a single name", generator.target.span)
        })?;
        if self.field_index(variable).is_some() || self.scopes.lookup(variable).is_some() {
            return Err(self.source.invalid(
                format!("loop variable '{variable}' shadows a field or local of the same name"),
                generator.target.span,
            ));
        }

        let (target, neighbor) = self.iteration(&generator.iter)?;
        let init = call.init.map(|init| self.init_value(init, target)).transpose()?;
        let value = self.in_reduction(target, neighbor, Some(variable.to_string()), |t| t.expr(elt))?;

        Ok(ReductionParts {
            reduction: call.reduction,
            target,
            neighbor,
            init,
            value: value.expr,
        })
    }

    /// `edges(cell)`: (target, neighbor) = (Cell, Edge).
    pub(super) fn iteration(&self, expr: &Expr) -> Result<(LocationType, LocationType), DuskError> {
        let malformed = || {
            self.source.invalid_reduction(
                "expected a neighbor iteration such as edges(cell), with vertices, edges or cells",
                expr.span,
            )
        };
        let ExprKind::Call { func, args } = &expr.kind else {
            return Err(malformed());
        };
        let neighbor = func
            .as_name()
            .and_then(LocationType::from_iteration_name)
            .ok_or_else(malformed)?;
        let [Argument::Positional(element)] = args.as_slice() else {
            return Err(self.source.invalid_reduction(
                format!("'{}' takes a single element: vertex, edge or cell", neighbor.iteration_name()),
                expr.span,
            ));
        };
        let target = element
            .as_name()
            .and_then(LocationType::from_element_name)
            .ok_or_else(|| {
                self.source.invalid_reduction(
                    format!("'{}' takes a single element: vertex, edge or cell", neighbor.iteration_name()),
                    element.span,
                )
            })?;

        if !is_valid_neighbor_relation(target, neighbor) {
            return Err(self
                .source
                .report(ErrorKind::InvalidNeighborRelation { target, neighbor }, expr.span));
        }
        Ok((target, neighbor))
    }

    /// The explicit initial value of a reduction around `target` elements.
    pub(super) fn init_value(&mut self, expr: &Expr, target: LocationType) -> Result<Expression, DuskError> {
        let init = self.expr(expr)?;
        match init.shape.location {
            Some(location) if location != target => Err(self.source.shape_mismatch(
                format!("initial value is a {location} value but the reduction runs around {target} elements"),
                expr.span,
            )),
            _ => Ok(init.expr),
        }
    }
}

fn binary_operator(op: BinOp) -> Option<BinaryOperator> {
    Some(match op {
        BinOp::Add => BinaryOperator::Add,
        BinOp::Sub => BinaryOperator::Sub,
        BinOp::Mult => BinaryOperator::Mul,
        BinOp::Div => BinaryOperator::Div,
        BinOp::Mod => BinaryOperator::Mod,
        BinOp::Pow => BinaryOperator::Pow,
        BinOp::MatMult
        | BinOp::FloorDiv
        | BinOp::LShift
        | BinOp::RShift
        | BinOp::BitOr
        | BinOp::BitXor
        | BinOp::BitAnd => return None,
    })
}

fn comparison_operator(op: CmpOp) -> Option<BinaryOperator> {
    Some(match op {
        CmpOp::Eq => BinaryOperator::Eq,
        CmpOp::NotEq => BinaryOperator::NotEq,
        CmpOp::Lt => BinaryOperator::Lt,
        CmpOp::LtE => BinaryOperator::LtE,
        CmpOp::Gt => BinaryOperator::Gt,
        CmpOp::GtE => BinaryOperator::GtE,
        CmpOp::In | CmpOp::NotIn | CmpOp::Is | CmpOp::IsNot => return None,
    })
}
