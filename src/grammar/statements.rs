//! Statement lowering.

use super::scope::Shape;
use super::StencilTranslator;
use crate::errors::{DuskError, ErrorKind, ErrorReporting};
use crate::ir::{AssignTarget, LocationType, Reduction, Statement, VerticalOrder};
use crate::syntax::{Argument, BinOp, Constant, Expr, ExprKind, Span, Stmt, StmtKind, WithItem};

impl StencilTranslator<'_> {
    /// Vertical order and the statements it governs.
    pub(super) fn vertical_region<'b>(&self, body: &'b [Stmt]) -> (VerticalOrder, &'b [Stmt]) {
        let body = strip_docstring(body);
        let mut significant = body.iter().filter(|s| !matches!(s.kind, StmtKind::Pass));
        if let (Some(stmt), None) = (significant.next(), significant.next()) {
            if let StmtKind::With { items, body: inner } = &stmt.kind {
                if let [item] = items.as_slice() {
                    if let (Some(order), None) = (vertical_order(&item.context), &item.target) {
                        return (order, strip_docstring(inner));
                    }
                }
            }
        }
        (VerticalOrder::Parallel, body)
    }

    pub(super) fn block(&mut self, stmts: &[Stmt]) -> Result<Vec<Statement>, DuskError> {
        let mut lowered = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            if let Some(statement) = self.statement(stmt)? {
                lowered.push(statement);
            }
        }
        Ok(lowered)
    }

    fn statement(&mut self, stmt: &Stmt) -> Result<Option<Statement>, DuskError> {
        let statement = match &stmt.kind {
            StmtKind::Pass => return Ok(None),
            StmtKind::Assign { targets, value } => match targets.as_slice() {
                [target] => self.assignment(target, value, stmt.span)?,
                _ => return Err(self.source.unsupported("chained assignment", stmt.span)),
            },
            StmtKind::AugAssign { target, op, value } => {
                self.augmented_assignment(target, *op, value, stmt.span)?
            }
            StmtKind::If { test, body, orelse } => {
                self.conditional(test, body, orelse, stmt.span)?
            }
            StmtKind::With { items, body } => self.with_block(items, body, stmt.span)?,
            StmtKind::Return(value) => self.return_statement(value.as_ref(), stmt.span)?,
            other => return Err(self.source.unsupported(other.describe(), stmt.span)),
        };
        Ok(Some(statement))
    }

    // ------------------------------------------------------------------
    // assignments
    // ------------------------------------------------------------------

    fn assignment(&mut self, target: &Expr, value: &Expr, span: Span) -> Result<Statement, DuskError> {
        let name = assigned_name(target).map_err(|construct| self.source.unsupported(construct, target.span))?;
        let loc = self.location(span);

        if let Some(index) = self.field_index(name) {
            self.check_field_write(index, target.span)?;
        }

        if let Some(call) = self.reduction_call(value)? {
            let parts = self.reduction(call)?;
            let accumulator = self.accumulator(name, target.span, parts.target)?;
            return Ok(Statement::LoopOverNeighbors {
                accumulator,
                reduction: parts.reduction,
                target: parts.target,
                neighbor: parts.neighbor,
                init: parts.init,
                body: Vec::new(),
                value: parts.value,
                loc,
            });
        }

        let value = self.expr(value)?;
        let target = self.store(name, target.span, value.shape)?;
        Ok(Statement::Assignment {
            target,
            value: value.expr,
            loc,
        })
    }

    /// `x op= v` is `x = x op v`.
    fn augmented_assignment(
        &mut self,
        target: &Expr,
        op: BinOp,
        value: &Expr,
        span: Span,
    ) -> Result<Statement, DuskError> {
        let name = assigned_name(target).map_err(|construct| self.source.unsupported(construct, target.span))?;
        if self.field_index(name).is_none() && self.scopes.lookup(name).is_none() {
            return Err(self.source.undeclared_field(name, target.span));
        }
        let desugared = Expr {
            kind: ExprKind::BinOp {
                left: Box::new(target.clone()),
                op,
                right: Box::new(value.clone()),
            },
            span: target.span.to(value.span),
        };
        self.assignment(target, &desugared, span)
    }

    /// Intent and context checks for writing a field.
    fn check_field_write(&self, index: usize, span: Span) -> Result<(), DuskError> {
        let field = &self.fields[index].field;
        if self.in_loop.is_some() {
            return Err(self.source.invalid(
                format!("field '{}' cannot be written inside a reduction body", field.name),
                span,
            ));
        }
        if !field.intent.is_writable() {
            return Err(self.source.report(
                ErrorKind::IntentViolation {
                    field: field.name.clone(),
                    intent: field.intent,
                },
                span,
            ));
        }
        Ok(())
    }

    fn check_guard(&self, location: LocationType, span: Span) -> Result<(), DuskError> {
        match self.guard {
            Some(guard) if guard != location => Err(self.source.shape_mismatch(
                format!("a condition on {guard} values cannot guard a write to a {location} field"),
                span,
            )),
            _ => Ok(()),
        }
    }

    /// Write a field or bind a local with a value of `shape`.
    fn store(&mut self, name: &str, span: Span, shape: Shape) -> Result<AssignTarget, DuskError> {
        if let Some(index) = self.field_index(name) {
            self.check_field_write(index, span)?;
            let location = self.fields[index].field.location;
            if let Some(found) = shape.location.filter(|found| *found != location) {
                return Err(self.source.shape_mismatch(
                    format!("cannot assign a {found} value to field '{name}' located on {location}"),
                    span,
                ));
            }
            self.check_guard(location, span)?;
            self.fields[index].written = true;
            return Ok(AssignTarget::Field {
                name: name.to_string(),
            });
        }

        self.check_local_name(name, span)?;
        match self.scopes.lookup(name) {
            Some((frame, existing)) => {
                if let Some(ctx) = &self.in_loop {
                    if frame < ctx.scope_floor {
                        return Err(self.source.invalid(
                            format!("'{name}' is defined outside the reduction and cannot be assigned inside it"),
                            span,
                        ));
                    }
                }
                let merged = existing.unify(shape).ok_or_else(|| {
                    self.source.shape_mismatch(
                        format!("local '{name}' holds a {existing} and cannot be assigned a {shape}"),
                        span,
                    )
                })?;
                self.scopes.update(frame, name, merged);
                Ok(AssignTarget::Local {
                    name: name.to_string(),
                    declares: false,
                })
            }
            None => {
                self.scopes.bind(name, shape);
                Ok(AssignTarget::Local {
                    name: name.to_string(),
                    declares: true,
                })
            }
        }
    }

    /// Field or local receiving the result of a reduction over `target` elements.
    fn accumulator(
        &mut self,
        name: &str,
        span: Span,
        target: LocationType,
    ) -> Result<AssignTarget, DuskError> {
        let Some(index) = self.field_index(name) else {
            return self.store(name, span, Shape::center(target));
        };
        self.check_field_write(index, span)?;
        let location = self.fields[index].field.location;
        if location != target {
            return Err(self.source.invalid_reduction(
                format!(
                    "a reduction over {target} elements cannot be stored in field '{name}' located on {location}"
                ),
                span,
            ));
        }
        self.check_guard(location, span)?;
        self.fields[index].written = true;
        Ok(AssignTarget::Field {
            name: name.to_string(),
        })
    }

    fn check_local_name(&self, name: &str, span: Span) -> Result<(), DuskError> {
        let is_loop_variable = self
            .in_loop
            .as_ref()
            .is_some_and(|ctx| ctx.variable.as_deref() == Some(name));
        if is_loop_variable {
            return Err(self
                .source
                .invalid(format!("cannot assign to loop variable '{name}'"), span));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // control flow
    // ------------------------------------------------------------------

    fn conditional(
        &mut self,
        test: &Expr,
        body: &[Stmt],
        orelse: &[Stmt],
        span: Span,
    ) -> Result<Statement, DuskError> {
        let condition = self.expr(test)?;
        let saved_guard = self.guard;

        if self.in_loop.is_none() {
            if let Some(location) = condition.shape.location {
                if let Some(outer) = saved_guard.filter(|outer| *outer != location) {
                    return Err(self.source.shape_mismatch(
                        format!("a condition on {location} values is nested in a condition on {outer} values"),
                        test.span,
                    ));
                }
                self.guard = Some(location);
            }
        }

        let branches = self.branches(body, orelse);
        self.guard = saved_guard;
        let (then_body, else_body) = branches?;

        Ok(Statement::Conditional {
            condition: condition.expr,
            then_body,
            else_body,
            loc: self.location(span),
        })
    }

    /// Each branch of a conditional is its own scope.
    fn branches(
        &mut self,
        body: &[Stmt],
        orelse: &[Stmt],
    ) -> Result<(Vec<Statement>, Vec<Statement>), DuskError> {
        let then_body = self.scoped(|t| t.block(body))?;
        let else_body = self.scoped(|t| t.block(orelse))?;
        Ok((then_body, else_body))
    }

    fn return_statement(&self, value: Option<&Expr>, span: Span) -> Result<Statement, DuskError> {
        if self.in_loop.is_some() {
            return Err(self.source.invalid("return inside a reduction body", span));
        }
        match value.map(|v| &v.kind) {
            None | Some(ExprKind::Constant(Constant::None)) => Ok(Statement::Return {
                loc: self.location(span),
            }),
            Some(_) => Err(self.source.invalid("a stencil cannot return a value", span)),
        }
    }

    // ------------------------------------------------------------------
    // with blocks
    // ------------------------------------------------------------------

    fn with_block(&mut self, items: &[WithItem], body: &[Stmt], span: Span) -> Result<Statement, DuskError> {
        let [item] = items else {
            return Err(self
                .source
                .unsupported("with statement over several context managers", span));
        };
        if vertical_order(&item.context).is_some() {
            return Err(self.source.invalid(
                "a vertical order block must be the only statement of a stencil",
                item.context.span,
            ));
        }
        match &item.context.kind {
            ExprKind::Call { func, args } if func.as_name() == Some("reduce") => {
                self.block_reduction(args, item, body, span)
            }
            _ => Err(self.source.unsupported("with statement", span)),
        }
    }

    /// `with reduce(edges(cell), sum, init=0.0) as acc:` followed by local
    /// assignments and a final expression giving the per-neighbor value.
    fn block_reduction(
        &mut self,
        args: &[Argument],
        item: &WithItem,
        body: &[Stmt],
        span: Span,
    ) -> Result<Statement, DuskError> {
        const USAGE: &str =
            "expected `with reduce(<neighbors>(<element>), <sum|min|max|product>, init=...) as <name>:`";

        if self.in_loop.is_some() {
            return Err(self
                .source
                .invalid_reduction("nested reductions are not supported", span));
        }

        let mut positional = Vec::new();
        let mut init = None;
        for arg in args {
            match arg {
                Argument::Positional(expr) => positional.push(expr),
                Argument::Keyword { name, value } if name == "init" => init = Some(value),
                _ => return Err(self.source.invalid_reduction(USAGE, item.context.span)),
            }
        }
        let [over, reduction] = positional.as_slice() else {
            return Err(self.source.invalid_reduction(USAGE, item.context.span));
        };
        let reduction = reduction
            .as_name()
            .and_then(Reduction::from_name)
            .ok_or_else(|| {
                self.source.invalid_reduction(
                    "unknown reduction (expected sum, min, max or product)",
                    reduction.span,
                )
            })?;
        let (target, neighbor) = self.iteration(over)?;

        let Some(accumulator) = item.target.as_ref() else {
            return Err(self.source.invalid_reduction(USAGE, item.context.span));
        };
        let acc_name = accumulator
            .as_name()
            .ok_or_else(|| self.source.invalid_reduction(USAGE, accumulator.span))?;
        if let Some(index) = self.field_index(acc_name) {
            self.check_field_write(index, accumulator.span)?;
        }

        let init = init.map(|expr| self.init_value(expr, target)).transpose()?;

        let stmts: Vec<&Stmt> = strip_docstring(body)
            .iter()
            .filter(|s| !matches!(s.kind, StmtKind::Pass))
            .collect();
        let Some((last, leading)) = stmts.split_last() else {
            return Err(self.missing_block_value(span));
        };
        let StmtKind::Expr(value) = &last.kind else {
            return Err(self.missing_block_value(last.span));
        };

        let (statements, value) = self.in_reduction(target, neighbor, None, |t| {
            let mut statements = Vec::with_capacity(leading.len());
            for stmt in leading {
                if let Some(statement) = t.statement(stmt)? {
                    statements.push(statement);
                }
            }
            let value = t.expr(value)?;
            Ok((statements, value))
        })?;

        let accumulator = self.accumulator(acc_name, accumulator.span, target)?;
        Ok(Statement::LoopOverNeighbors {
            accumulator,
            reduction,
            target,
            neighbor,
            init,
            body: statements,
            value: value.expr,
            loc: self.location(span),
        })
    }

    fn missing_block_value(&self, span: Span) -> DuskError {
        self.source.invalid_reduction(
            "a reduction block must end with an expression giving the per-neighbor value",
            span,
        )
    }
}

/// Name assigned by a target expression, or a description of the
/// unsupported target.
fn assigned_name(target: &Expr) -> Result<&str, String> {
    match &target.kind {
        ExprKind::Name(name) => Ok(name),
        ExprKind::Subscript { .. } => Err("assignment to a subscript".into()),
        ExprKind::Attribute { .. } => Err("assignment to an attribute".into()),
        ExprKind::Tuple(_) | ExprKind::List(_) => Err("tuple unpacking".into()),
        other => Err(format!("assignment to a {}", other.describe())),
    }
}

fn vertical_order(context: &Expr) -> Option<VerticalOrder> {
    match context.as_name()? {
        "levels_upward" => Some(VerticalOrder::Forward),
        "levels_downward" => Some(VerticalOrder::Backward),
        "levels_parallel" => Some(VerticalOrder::Parallel),
        _ => None,
    }
}

fn strip_docstring(body: &[Stmt]) -> &[Stmt] {
    match body.first().map(|s| &s.kind) {
        Some(StmtKind::Expr(Expr {
            kind: ExprKind::Constant(Constant::Str(_)),
            ..
        })) => &body[1..],
        _ => body,
    }
}
