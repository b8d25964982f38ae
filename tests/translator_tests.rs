//! End-to-end translation of stencil sources into the IR.

mod common;

use common::{translate, translate_one, warnings};
use dusk::ir::{
    AssignTarget, BinaryOperator, ElementType, Expression, GridType, Intent, LiteralValue,
    LocationType, MathFunction, Reduction, SourceLocation, Statement, UnaryOperator,
    VerticalOrder,
};
use dusk::transpile::to_json;

// ============================================================================
// HELPERS
// ============================================================================

fn field(name: &str, neighbor: bool) -> Expression {
    Expression::FieldAccess {
        name: name.to_string(),
        neighbor,
    }
}

fn var(name: &str) -> Expression {
    Expression::VariableRef {
        name: name.to_string(),
    }
}

fn float(value: f64) -> Expression {
    Expression::Literal {
        value: LiteralValue::Float(value),
    }
}

fn binary(op: BinaryOperator, left: Expression, right: Expression) -> Expression {
    Expression::BinaryOp {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn field_target(name: &str) -> AssignTarget {
    AssignTarget::Field {
        name: name.to_string(),
    }
}

fn local_target(name: &str, declares: bool) -> AssignTarget {
    AssignTarget::Local {
        name: name.to_string(),
        declares,
    }
}

/// The value of an `Assignment`, panicking on any other statement.
fn assigned_value(statement: &Statement) -> &Expression {
    match statement {
        Statement::Assignment { value, .. } => value,
        other => panic!("expected an assignment, got {other:?}"),
    }
}

// ============================================================================
// NEIGHBOR REDUCTIONS
// ============================================================================

const REDUCE_EDGES: &str = r#"from dusk import *

@stencil
def reduce_edges(cell_field: Field[Cell], edge_field: Field[Edge]):
    cell_field = sum(edge_field for e in edges(cell))
"#;

#[test]
fn edge_to_cell_sum_becomes_a_neighbor_loop() {
    let document = translate(REDUCE_EDGES);
    assert_eq!(document.filename, common::FILENAME);
    assert_eq!(document.grid_type, GridType::Unstructured);
    assert_eq!(document.stencils.len(), 1);

    let stencil = &document.stencils[0];
    assert_eq!(stencil.name, "reduce_edges");
    assert_eq!(stencil.loc, SourceLocation { line: 3, column: 1 });
    assert_eq!(stencil.vertical, VerticalOrder::Parallel);

    let names: Vec<_> = stencil.fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["cell_field", "edge_field"]);
    let cell_field = stencil.field("cell_field").unwrap();
    assert_eq!(cell_field.location, LocationType::Cell);
    assert_eq!(cell_field.intent, Intent::InputOutput);
    assert_eq!(cell_field.element, ElementType::Float);
    assert_eq!(stencil.field("edge_field").unwrap().location, LocationType::Edge);

    assert_eq!(
        stencil.body,
        vec![Statement::LoopOverNeighbors {
            accumulator: field_target("cell_field"),
            reduction: Reduction::Sum,
            target: LocationType::Cell,
            neighbor: LocationType::Edge,
            init: None,
            body: Vec::new(),
            value: field("edge_field", true),
            loc: SourceLocation { line: 5, column: 5 },
        }]
    );
    assert!(warnings(REDUCE_EDGES).is_empty());
}

#[test]
fn reductions_take_an_explicit_initial_value() {
    let stencil = translate_one(
        r#"@stencil
def smallest(out: Out[Vertex], f: In[Edge]):
    out = min(f for e in edges(vertex), init=1000.0)
"#,
    );
    match &stencil.body[0] {
        Statement::LoopOverNeighbors {
            reduction,
            target,
            neighbor,
            init,
            ..
        } => {
            assert_eq!(*reduction, Reduction::Min);
            assert_eq!(*target, LocationType::Vertex);
            assert_eq!(*neighbor, LocationType::Edge);
            assert_eq!(init.as_ref(), Some(&float(1000.0)));
        }
        other => panic!("expected a neighbor loop, got {other:?}"),
    }
}

#[test]
fn center_and_neighbor_values_mix_inside_a_reduction() {
    let stencil = translate_one(
        r#"@stencil
def weighted(out: Out[Cell], weight: In[Cell], flux: In[Edge]):
    out = sum(flux * weight for e in edges(cell))
"#,
    );
    match &stencil.body[0] {
        Statement::LoopOverNeighbors { value, .. } => assert_eq!(
            *value,
            binary(
                BinaryOperator::Mul,
                field("flux", true),
                field("weight", false)
            )
        ),
        other => panic!("expected a neighbor loop, got {other:?}"),
    }
}

#[test]
fn loop_variable_indexes_same_location_neighbors() {
    let stencil = translate_one(
        r#"@stencil
def smooth(out: Out[Cell], f: In[Cell]):
    out = sum(f[c] for c in cells(cell))
"#,
    );
    match &stencil.body[0] {
        Statement::LoopOverNeighbors {
            target,
            neighbor,
            value,
            ..
        } => {
            assert_eq!((*target, *neighbor), (LocationType::Cell, LocationType::Cell));
            assert_eq!(*value, field("f", true));
        }
        other => panic!("expected a neighbor loop, got {other:?}"),
    }
}

#[test]
fn reduction_inside_a_larger_expression() {
    let stencil = translate_one(
        r#"@stencil
def mean(out: Out[Cell], f: In[Edge]):
    out = 0.5 * sum(f for e in edges(cell))
"#,
    );
    let expected = binary(
        BinaryOperator::Mul,
        float(0.5),
        Expression::ReductionResult {
            reduction: Reduction::Sum,
            target: LocationType::Cell,
            neighbor: LocationType::Edge,
            init: None,
            value: Box::new(field("f", true)),
        },
    );
    assert_eq!(*assigned_value(&stencil.body[0]), expected);
}

#[test]
fn block_reduction_with_locals() {
    let stencil = translate_one(
        r#"@stencil
def gradient(out: Out[Cell], f: In[Edge], w: In[Edge]):
    with reduce(edges(cell), sum, init=0.0) as acc:
        scaled = f * w
        scaled * scaled
    out = acc
"#,
    );
    assert_eq!(stencil.body.len(), 2);
    match &stencil.body[0] {
        Statement::LoopOverNeighbors {
            accumulator,
            reduction,
            init,
            body,
            value,
            loc,
            ..
        } => {
            assert_eq!(*accumulator, local_target("acc", true));
            assert_eq!(*reduction, Reduction::Sum);
            assert_eq!(init.as_ref(), Some(&float(0.0)));
            assert_eq!(
                *body,
                vec![Statement::Assignment {
                    target: local_target("scaled", true),
                    value: binary(BinaryOperator::Mul, field("f", true), field("w", true)),
                    loc: SourceLocation { line: 4, column: 9 },
                }]
            );
            assert_eq!(
                *value,
                binary(BinaryOperator::Mul, var("scaled"), var("scaled"))
            );
            assert_eq!(*loc, SourceLocation { line: 3, column: 5 });
        }
        other => panic!("expected a neighbor loop, got {other:?}"),
    }
    assert_eq!(*assigned_value(&stencil.body[1]), var("acc"));
}

// ============================================================================
// STATEMENTS AND EXPRESSIONS
// ============================================================================

#[test]
fn locals_are_declared_on_first_assignment() {
    let stencil = translate_one(
        r#"@stencil
def scale(a: In[Vertex], out: Out[Vertex]):
    tmp = a * 2.0
    tmp = tmp + 1.0
    out = tmp
"#,
    );
    let targets: Vec<_> = stencil
        .body
        .iter()
        .map(|s| match s {
            Statement::Assignment { target, .. } => target.clone(),
            other => panic!("expected an assignment, got {other:?}"),
        })
        .collect();
    assert_eq!(
        targets,
        [
            local_target("tmp", true),
            local_target("tmp", false),
            field_target("out"),
        ]
    );
}

#[test]
fn augmented_assignment_reads_and_writes_the_target() {
    let stencil = translate_one(
        r#"@stencil
def accumulate(acc: InOut[Edge], inc: In[Edge]):
    acc += inc
"#,
    );
    assert_eq!(
        stencil.body,
        vec![Statement::Assignment {
            target: field_target("acc"),
            value: binary(BinaryOperator::Add, field("acc", false), field("inc", false)),
            loc: SourceLocation { line: 3, column: 5 },
        }]
    );
}

#[test]
fn nested_literal_expression_keeps_its_depth() {
    let stencil = translate_one(
        r#"@stencil
def constant(out: Out[Cell]):
    out = (1.0 + 2.0) * (3.0 - (4.0 / 5.0))
"#,
    );
    let value = assigned_value(&stencil.body[0]);
    assert_eq!(value.depth(), 4);
    assert_eq!(
        *value,
        binary(
            BinaryOperator::Mul,
            binary(BinaryOperator::Add, float(1.0), float(2.0)),
            binary(
                BinaryOperator::Sub,
                float(3.0),
                binary(BinaryOperator::Div, float(4.0), float(5.0))
            )
        )
    );
}

#[test]
fn unary_and_literal_kinds() {
    let stencil = translate_one(
        r#"@stencil
def flip(out: Out[Cell], a: In[Cell]):
    out = -a + 2 ** 3
"#,
    );
    let expected = binary(
        BinaryOperator::Add,
        Expression::UnaryOp {
            op: UnaryOperator::Neg,
            operand: Box::new(field("a", false)),
        },
        binary(
            BinaryOperator::Pow,
            Expression::Literal {
                value: LiteralValue::Integer(2),
            },
            Expression::Literal {
                value: LiteralValue::Integer(3),
            },
        ),
    );
    assert_eq!(*assigned_value(&stencil.body[0]), expected);
}

#[test]
fn math_functions_lower_to_calls() {
    let stencil = translate_one(
        r#"@stencil
def clamp(out: Out[Edge], a: In[Edge]):
    out = sqrt(max(a, 0.0))
"#,
    );
    let expected = Expression::FunctionCall {
        function: MathFunction::Sqrt,
        args: vec![Expression::FunctionCall {
            function: MathFunction::Max,
            args: vec![field("a", false), float(0.0)],
        }],
    };
    assert_eq!(*assigned_value(&stencil.body[0]), expected);
}

#[test]
fn conditionals_keep_both_branches() {
    let stencil = translate_one(
        r#"@stencil
def limit(out: Out[Cell], a: In[Cell]):
    if a > 1.0 and a < 5.0:
        out = a
    elif a >= 5.0:
        out = 5.0
    else:
        out = 1.0
"#,
    );
    let Statement::Conditional {
        condition,
        then_body,
        else_body,
        loc,
    } = &stencil.body[0]
    else {
        panic!("expected a conditional");
    };
    assert_eq!(*loc, SourceLocation { line: 3, column: 5 });
    assert!(matches!(
        condition,
        Expression::BinaryOp {
            op: BinaryOperator::And,
            ..
        }
    ));
    assert_eq!(then_body.len(), 1);
    // elif nests as a conditional in the else branch
    match else_body.as_slice() {
        [Statement::Conditional {
            then_body,
            else_body,
            ..
        }] => {
            assert_eq!(*assigned_value(&then_body[0]), float(5.0));
            assert_eq!(*assigned_value(&else_body[0]), float(1.0));
        }
        other => panic!("expected a nested conditional, got {other:?}"),
    }
}

#[test]
fn bare_return_docstring_and_pass() {
    let stencil = translate_one(
        r#"@stencil
def early(out: Out[Cell], a: In[Cell]) -> None:
    """Copies a into out."""
    pass
    out = a
    return
"#,
    );
    assert_eq!(stencil.body.len(), 2);
    assert!(matches!(stencil.body[1], Statement::Return { .. }));
}

#[test]
fn vertical_order_blocks() {
    for (block, order) in [
        ("levels_upward", VerticalOrder::Forward),
        ("levels_downward", VerticalOrder::Backward),
        ("levels_parallel", VerticalOrder::Parallel),
    ] {
        let source = format!(
            "@stencil\ndef column(out: Out[Cell], a: In[Cell]):\n    with {block}:\n        out = a\n"
        );
        let stencil = translate_one(&source);
        assert_eq!(stencil.vertical, order, "{block}");
        assert_eq!(stencil.body.len(), 1);
    }
}

// ============================================================================
// SIGNATURES
// ============================================================================

#[test]
fn annotation_forms() {
    let stencil = translate_one(
        r#"import dusk

@dusk.stencil
def forms(a: Vertex, b: Field[Edge, float], c: In[Field[Cell]], d: Out[dusk.Cell], e: InOut[Edge]):
    d = c
    e = b
    a = a
"#,
    );
    let shape: Vec<_> = stencil
        .fields
        .iter()
        .map(|f| (f.name.as_str(), f.location, f.intent))
        .collect();
    assert_eq!(
        shape,
        [
            ("a", LocationType::Vertex, Intent::InputOutput),
            ("b", LocationType::Edge, Intent::InputOutput),
            ("c", LocationType::Cell, Intent::Input),
            ("d", LocationType::Cell, Intent::Output),
            ("e", LocationType::Edge, Intent::InputOutput),
        ]
    );
    assert_eq!(
        stencil.fields[1].loc,
        SourceLocation { line: 4, column: 22 }
    );
}

#[test]
fn input_fields_may_be_read_but_never_assigned() {
    let stencil = translate_one(
        r#"@stencil
def copy(src: In[Cell], dst: Out[Cell]):
    dst = src
"#,
    );
    assert_eq!(stencil.field("src").unwrap().intent, Intent::Input);
}

// ============================================================================
// DOCUMENT ASSEMBLY
// ============================================================================

const TWO_STENCILS: &str = r#"import math

def helper(x):
    return x * 2

@stencil
def second(b: Out[Edge], a: In[Edge]):
    b = a

@stencil
def first(d: Out[Cell], c: In[Cell]):
    d = c
"#;

#[test]
fn stencils_keep_declaration_order_and_helpers_are_skipped() {
    let document = translate(TWO_STENCILS);
    let names: Vec<_> = document.stencils.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["second", "first"]);
}

#[test]
fn decorated_functions_with_bad_parameters_are_skipped() {
    let document = translate(
        r#"@stencil
def variadic(*fields):
    pass

@stencil
def defaulted(a: Cell = None):
    pass

@stencil
def fine(a: Cell):
    a = a
"#,
    );
    let names: Vec<_> = document.stencils.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["fine"]);
}

const HOST_PYTHON: &str = r#"from dusk import *

try:
    import numpy as np
except ImportError:
    np = None
finally:
    LIMIT = 123456789012345678901234567890

type Scalar = float

async def fetch(session, url):
    async with session.get(url) as response:
        return await response.read()

def chunks(items, size=2, /):
    while (n := len(items)) > size:
        yield items[:size]
        items = items[size:]
    yield from [items]

def describe(value):
    match value:
        case {"kind": kind, **rest}:
            return kind
        case [first, *others] if others:
            return first
        case _:
            return {k: v for k, v in enumerate(value)}

@stencil
def copy(src: In[Edge], dst: Out[Edge]):
    dst = src
"#;

#[test]
fn helpers_may_use_any_python_syntax() {
    let document = translate(HOST_PYTHON);
    let names: Vec<_> = document.stencils.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["copy"]);
    assert_eq!(
        document.stencils[0].body,
        vec![Statement::Assignment {
            target: field_target("dst"),
            value: field("src", false),
            loc: SourceLocation { line: 33, column: 5 },
        }]
    );
}

#[test]
fn file_without_stencils_gives_an_empty_document() {
    let document = translate("x = 1\n\ndef f(a):\n    return a\n");
    assert!(document.stencils.is_empty());
}

#[test]
fn serialization_is_deterministic() {
    let first = to_json(&translate(TWO_STENCILS)).unwrap();
    let second = to_json(&translate(TWO_STENCILS)).unwrap();
    assert_eq!(first, second);
    assert!(first.ends_with('\n'));

    let parsed: serde_json::Value = serde_json::from_str(&first).unwrap();
    assert_eq!(parsed["grid_type"], "Unstructured");
    assert_eq!(parsed["stencils"][0]["name"], "second");
    assert_eq!(parsed["stencils"][0]["body"][0]["kind"], "Assignment");
}

#[test]
fn ir_round_trips_through_json() {
    let document = translate(REDUCE_EDGES);
    let json = to_json(&document).unwrap();
    let restored: dusk::ir::StencilIrDocument = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, document);
}

// ============================================================================
// WARNINGS
// ============================================================================

#[test]
fn unused_fields_and_unwritten_outputs_warn() {
    let found = warnings(
        r#"@stencil
def partial(out: Out[Cell], spare: In[Edge], a: In[Cell]):
    tmp = a * out
"#,
    );
    let messages: Vec<_> = found.iter().map(|w| w.message.as_str()).collect();
    assert_eq!(
        messages,
        [
            "output field 'out' is never written in stencil 'partial'",
            "field 'spare' is never used in stencil 'partial'",
        ]
    );
    assert_eq!(found[0].stencil, "partial");
    assert_eq!(
        found[1].to_string(),
        "stencils.py:2:29: field 'spare' is never used in stencil 'partial'"
    );
}
