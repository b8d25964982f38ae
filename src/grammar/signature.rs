//! Parameter annotations to fields.
//!
//! Accepted annotation shapes, optionally wrapped in `In[...]`, `Out[...]` or
//! `InOut[...]`:
//!
//! ```text
//! Cell    Field[Cell]    Field[Cell, float]
//! ```

use super::{FieldSlot, StencilTranslator};
use crate::errors::{DuskError, ErrorKind, ErrorReporting};
use crate::ir::{ElementType, Field, Intent, LocationType};
use crate::syntax::{Constant, Expr, ExprKind, FunctionDef, Span};

impl StencilTranslator<'_> {
    pub(super) fn signature(&self, def: &FunctionDef) -> Result<Vec<FieldSlot>, DuskError> {
        let mut slots: Vec<FieldSlot> = Vec::with_capacity(def.params.len());

        for param in &def.params {
            let name = param.name.clone().unwrap_or_default();
            if slots.iter().any(|slot| slot.field.name == name) {
                return Err(self
                    .source
                    .invalid(format!("duplicate parameter '{name}'"), param.span));
            }
            let annotation = param.annotation.as_ref().ok_or_else(|| {
                self.malformed(&name, "a field parameter needs a type annotation", param.span)
            })?;
            let (location, intent) = self.field_type(&name, annotation)?;

            slots.push(FieldSlot {
                field: Field {
                    name,
                    location,
                    intent,
                    element: ElementType::Float,
                    loc: self.location(param.span),
                },
                read: false,
                written: false,
            });
        }

        if let Some(returns) = &def.returns {
            if !matches!(returns.kind, ExprKind::Constant(Constant::None)) {
                return Err(self.malformed(
                    "return",
                    "a stencil does not return a value; annotate it with `-> None` or nothing",
                    returns.span,
                ));
            }
        }

        Ok(slots)
    }

    fn field_type(&self, param: &str, annotation: &Expr) -> Result<(LocationType, Intent), DuskError> {
        if let ExprKind::Subscript { value, index } = &annotation.kind {
            let intent = match type_name(value) {
                Some("In") => Some(Intent::Input),
                Some("Out") => Some(Intent::Output),
                Some("InOut") => Some(Intent::InputOutput),
                _ => None,
            };
            if let Some(intent) = intent {
                return Ok((self.location_type(param, index)?, intent));
            }
        }
        Ok((self.location_type(param, annotation)?, Intent::InputOutput))
    }

    fn location_type(&self, param: &str, expr: &Expr) -> Result<LocationType, DuskError> {
        let ExprKind::Subscript { value, index } = &expr.kind else {
            return self.location_name(param, expr);
        };
        if type_name(value) != Some("Field") {
            let found = type_name(value).unwrap_or_else(|| value.kind.describe());
            return Err(self.malformed(param, format!("unknown type '{found}'"), value.span));
        }

        let (location, element) = match &index.kind {
            ExprKind::Tuple(items) => match items.as_slice() {
                [location, element] => (location, Some(element)),
                _ => {
                    return Err(self.malformed(
                        param,
                        "Field[...] takes a location and an optional element type",
                        index.span,
                    ))
                }
            },
            _ => (index.as_ref(), None),
        };
        if let Some(element) = element {
            if type_name(element) != Some("float") {
                let found = type_name(element).unwrap_or_else(|| element.kind.describe());
                return Err(self.malformed(
                    param,
                    format!("unsupported element type '{found}' (only float is supported)"),
                    element.span,
                ));
            }
        }
        self.location_name(param, location)
    }

    fn location_name(&self, param: &str, expr: &Expr) -> Result<LocationType, DuskError> {
        match type_name(expr) {
            Some(name) => LocationType::from_type_name(name).ok_or_else(|| {
                self.malformed(
                    param,
                    format!("unknown location type '{name}' (expected Vertex, Edge or Cell)"),
                    expr.span,
                )
            }),
            None => Err(self.malformed(
                param,
                format!("expected a location type, found a {}", expr.kind.describe()),
                expr.span,
            )),
        }
    }

    fn malformed(&self, parameter: &str, detail: impl Into<String>, span: Span) -> DuskError {
        self.source.report(
            ErrorKind::MalformedAnnotation {
                parameter: parameter.to_string(),
                detail: detail.into(),
            },
            span,
        )
    }
}

/// `Name` or the last component of `module.Name`.
fn type_name(expr: &Expr) -> Option<&str> {
    match &expr.kind {
        ExprKind::Name(name) => Some(name),
        ExprKind::Attribute { attr, .. } => Some(attr),
        _ => None,
    }
}
