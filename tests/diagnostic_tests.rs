//! Rejected stencils: error kinds, positions and rendered diagnostics.

mod common;

use common::{error_kind, translate_err};
use dusk::errors::{ErrorCategory, ErrorKind};
use dusk::ir::{Intent, LocationType};
use miette::{GraphicalReportHandler, GraphicalTheme};

/// Wraps a stencil body in a signature with one field per location.
fn stencil(body: &str) -> String {
    format!(
        "@stencil\ndef s(out: Out[Cell], c: In[Cell], e: In[Edge], v: In[Vertex]):\n{body}"
    )
}

fn assert_unsupported(body: &str, expected: &str) {
    match error_kind(&stencil(body)) {
        ErrorKind::UnsupportedConstruct { construct } => assert_eq!(construct, expected, "{body}"),
        other => panic!("expected unsupported {expected}, got {other:?}"),
    }
}

fn assert_shape_mismatch(body: &str) {
    let kind = error_kind(&stencil(body));
    assert!(
        matches!(kind, ErrorKind::ShapeMismatch { .. }),
        "{body}: got {kind:?}"
    );
}

fn assert_invalid_reduction(body: &str) {
    let kind = error_kind(&stencil(body));
    assert!(
        matches!(kind, ErrorKind::InvalidReduction { .. }),
        "{body}: got {kind:?}"
    );
}

fn render(error: dusk::DuskError) -> String {
    let mut out = String::new();
    GraphicalReportHandler::new_themed(GraphicalTheme::unicode_nocolor())
        .render_report(&mut out, &error)
        .unwrap();
    out
}

// ============================================================================
// UNDECLARED FIELDS
// ============================================================================

#[test]
fn undeclared_field_is_located() {
    let error = translate_err(&stencil("    out = missing + 1.0\n"));
    assert_eq!(
        error.kind,
        ErrorKind::UndeclaredField {
            name: "missing".into()
        }
    );
    assert_eq!(error.category(), ErrorCategory::DslSyntax);
    assert_eq!(error.location(), Some((3, 11)));
    assert_eq!(error.diagnostic_info.error_code, "dusk::dsl::undeclared_field");
    assert_eq!(
        error.to_string(),
        "stencils.py:3:11: DSL syntax error: reference to undeclared name or field 'missing'"
    );
}

#[test]
fn rendered_diagnostic_shows_code_label_and_help() {
    let rendered = render(translate_err(&stencil("    out = missing + 1.0\n")));
    assert!(rendered.contains("dusk::dsl::undeclared_field"), "{rendered}");
    assert!(rendered.contains("not a field or a local in scope"), "{rendered}");
    assert!(rendered.contains("stencils.py"), "{rendered}");
    assert!(
        rendered.contains("help: declare 'missing' as a stencil parameter"),
        "{rendered}"
    );
}

#[test]
fn local_bound_only_inside_branches_is_out_of_scope_after_them() {
    let error = translate_err(&stencil(
        "    if c > 0.0:\n        t = c\n    else:\n        t = 0.0\n    out = t\n",
    ));
    assert_eq!(error.kind, ErrorKind::UndeclaredField { name: "t".into() });
    assert_eq!(error.location(), Some((7, 11)));
    assert!(
        error.to_string().ends_with("reference to undeclared name or field 't'"),
        "{error}"
    );
    let help = error.diagnostic_info.help.unwrap_or_default();
    assert!(help.contains("enclosing one before reading it"), "{help}");
}

#[test]
fn first_error_aborts_the_file() {
    let source = format!(
        "{}\n@stencil\ndef t(a: Cell):\n    a = nope\n",
        stencil("    out = first_missing\n")
    );
    assert_eq!(
        error_kind(&source),
        ErrorKind::UndeclaredField {
            name: "first_missing".into()
        }
    );
}

// ============================================================================
// INTENTS AND ANNOTATIONS
// ============================================================================

#[test]
fn writing_an_input_field_is_an_intent_violation() {
    let error = translate_err(&stencil("    c = out\n"));
    assert_eq!(
        error.kind,
        ErrorKind::IntentViolation {
            field: "c".into(),
            intent: Intent::Input,
        }
    );
    assert_eq!(error.location(), Some((3, 5)));
}

#[test]
fn malformed_annotations() {
    let cases = [
        ("def s(a):", "a"),
        ("def s(a: Field[Face]):", "a"),
        ("def s(a: Field[Cell, int]):", "a"),
        ("def s(a: Cell, b: Out[int]):", "b"),
        ("def s(a: Cell) -> float:", "return"),
    ];
    for (header, parameter) in cases {
        let source = format!("@stencil\n{header}\n    pass\n");
        match error_kind(&source) {
            ErrorKind::MalformedAnnotation { parameter: found, .. } => {
                assert_eq!(found, parameter, "{header}")
            }
            other => panic!("{header}: expected a malformed annotation, got {other:?}"),
        }
    }
}

#[test]
fn unknown_location_names_the_culprit() {
    let error = translate_err("@stencil\ndef s(a: Field[Face]):\n    pass\n");
    assert_eq!(error.location(), Some((2, 16)));
    assert!(error.to_string().contains("unknown location type 'Face'"));
    let help = error.diagnostic_info.help.unwrap_or_default();
    assert!(help.contains("`Field[Cell, float]`"), "{help}");
    assert!(help.contains("`InOut[...]`"), "{help}");
}

// ============================================================================
// UNSUPPORTED CONSTRUCTS
// ============================================================================

#[test]
fn unsupported_statements() {
    assert_unsupported("    for i in range(3):\n        out = c\n", "for loop");
    assert_unsupported("    while c > 0.0:\n        out = c\n", "while loop");
    assert_unsupported("    import math\n", "import statement");
    assert_unsupported("    def inner(x):\n        return x\n", "nested function definition");
    assert_unsupported("    del out\n", "del statement");
    assert_unsupported("    c + 1.0\n", "expression statement");
    assert_unsupported("    out = tmp = c\n", "chained assignment");
    assert_unsupported("    out[0] = c\n", "assignment to a subscript");
    assert_unsupported("    out.x = c\n", "assignment to an attribute");
    assert_unsupported("    async with lock:\n        out = c\n", "async with statement");
    assert_unsupported("    type Scalar = float\n", "type alias");
}

#[test]
fn newer_python_statements_are_dsl_errors() {
    let cases = [
        ("    try:\n        out = c\n    except ValueError:\n        pass\n", "try statement"),
        ("    try:\n        out = c\n    finally:\n        pass\n", "try statement"),
        ("    match c:\n        case 0.0:\n            out = c\n", "match statement"),
    ];
    for (body, construct) in cases {
        let error = translate_err(&stencil(body));
        assert_eq!(error.category(), ErrorCategory::DslSyntax, "{body}");
        assert_eq!(
            error.kind,
            ErrorKind::UnsupportedConstruct {
                construct: construct.into()
            }
        );
        assert_eq!(error.location(), Some((3, 5)), "{body}");
    }
}

#[test]
fn unsupported_expressions() {
    assert_unsupported("    out = \"text\"\n", "string literal");
    assert_unsupported("    out = c if c > 0.0 else 0.0\n", "conditional expression");
    assert_unsupported("    out = lambda x: x\n", "lambda expression");
    assert_unsupported("    out = [c]\n", "list display");
    assert_unsupported("    out = c // 2.0\n", "operator '//'");
    assert_unsupported("    out = c.real\n", "attribute access");
    assert_unsupported("    out = None\n", "None");
    assert_unsupported("    out = print(c)\n", "call to 'print'");
    assert_unsupported("    out = (t := c)\n", "assignment expression");
    assert_unsupported("    out = 2j\n", "imaginary literal");
    assert_unsupported(
        "    out = 123456789012345678901234567890\n",
        "integer literal wider than 64 bits",
    );
}

#[test]
fn chained_comparison_is_rejected() {
    let error = translate_err(&stencil("    if 0.0 < c < 1.0:\n        out = c\n"));
    assert_eq!(
        error.kind,
        ErrorKind::UnsupportedConstruct {
            construct: "chained comparison".into()
        }
    );
    assert_eq!(error.location(), Some((3, 8)));
}

#[test]
fn non_finite_literal_is_rejected() {
    let kind = error_kind(&stencil("    out = 1e999\n"));
    assert!(matches!(kind, ErrorKind::InvalidConstruct { .. }), "{kind:?}");
}

#[test]
fn returning_a_value_is_rejected() {
    let kind = error_kind(&stencil("    return c\n"));
    assert!(matches!(kind, ErrorKind::InvalidConstruct { .. }), "{kind:?}");
}

#[test]
fn vertical_order_must_be_alone() {
    let kind = error_kind(&stencil(
        "    out = c\n    with levels_upward:\n        out = c\n",
    ));
    assert!(matches!(kind, ErrorKind::InvalidConstruct { .. }), "{kind:?}");
}

// ============================================================================
// SHAPES
// ============================================================================

#[test]
fn values_on_different_locations_do_not_mix() {
    assert_shape_mismatch("    out = e\n");
    assert_shape_mismatch("    out = c + e\n");
    assert_shape_mismatch("    tmp = c\n    tmp = v\n");
    assert_shape_mismatch("    out = max(c, v)\n");
}

#[test]
fn neighbor_index_outside_a_reduction() {
    assert_shape_mismatch("    out = e[x]\n");
}

#[test]
fn unrelated_location_inside_a_reduction() {
    assert_shape_mismatch("    out = sum(v for x in edges(cell))\n");
}

#[test]
fn condition_location_guards_writes() {
    let source = "@stencil\ndef s(out: Out[Cell], flag: In[Edge], e_out: Out[Edge]):\n    if flag > 0.0:\n        out = 1.0\n";
    assert!(matches!(error_kind(source), ErrorKind::ShapeMismatch { .. }));
}

// ============================================================================
// REDUCTIONS
// ============================================================================

#[test]
fn edge_to_edge_is_not_a_neighbor_relation() {
    let error = translate_err(
        "@stencil\ndef s(out: Out[Edge], f: In[Edge]):\n    out = sum(f for x in edges(edge))\n",
    );
    assert_eq!(
        error.kind,
        ErrorKind::InvalidNeighborRelation {
            target: LocationType::Edge,
            neighbor: LocationType::Edge,
        }
    );
    assert_eq!(error.location(), Some((3, 26)));
    assert_eq!(
        error.diagnostic_info.error_code,
        "dusk::dsl::invalid_neighbor_relation"
    );
    let rendered = render(error);
    assert!(
        rendered.contains("valid neighbor iterations here: vertices(edge), cells(edge)"),
        "{rendered}"
    );
}

#[test]
fn reduction_result_must_land_on_its_target_location() {
    let error = translate_err(
        "@stencil\ndef s(out: Out[Vertex], f: In[Edge]):\n    out = sum(f for x in edges(cell))\n",
    );
    assert!(matches!(error.kind, ErrorKind::InvalidReduction { .. }));
}

#[test]
fn malformed_reductions() {
    assert_invalid_reduction("    out = sum(sum(v for y in vertices(edge)) for x in edges(cell))\n");
    assert_invalid_reduction("    out = sum(e for x in edges(cell) if e > 0.0)\n");
    assert_invalid_reduction("    out = sum(e for x in edges(cell) for y in edges(cell))\n");
    assert_invalid_reduction("    out = sum(e for x in faces(cell))\n");
    assert_invalid_reduction("    out = sum(e for x in edges(cell), 0.0)\n");
    assert_invalid_reduction("    out = sum(e for x in edges(cell), start=0.0)\n");
    assert_invalid_reduction("    out = sum(e)\n");
    assert_invalid_reduction("    out = edges(cell)\n");
    assert_invalid_reduction("    with reduce(edges(cell), mean) as acc:\n        e\n    out = acc\n");
    assert_invalid_reduction("    with reduce(edges(cell), sum) as acc:\n        tmp = e\n    out = acc\n");
}

#[test]
fn reduction_bodies_cannot_write_outside() {
    let kind = error_kind(&stencil(
        "    with reduce(edges(cell), sum) as acc:\n        out = e\n        e\n",
    ));
    assert!(matches!(kind, ErrorKind::InvalidConstruct { .. }), "{kind:?}");

    let kind = error_kind(&stencil(
        "    tmp = c\n    with reduce(edges(cell), sum) as acc:\n        tmp = e\n        e\n    out = acc\n",
    ));
    assert!(matches!(kind, ErrorKind::InvalidConstruct { .. }), "{kind:?}");
}

#[test]
fn loop_variable_only_indexes_fields() {
    let kind = error_kind(&stencil("    out = sum(x for x in edges(cell))\n"));
    assert!(matches!(kind, ErrorKind::InvalidConstruct { .. }), "{kind:?}");
}

// ============================================================================
// HOST SYNTAX
// ============================================================================

#[test]
fn host_syntax_errors_are_not_dsl_errors() {
    let error = translate_err("@stencil\ndef s(a: Cell)\n    pass\n");
    assert_eq!(error.category(), ErrorCategory::HostSyntax);
    assert_eq!(error.diagnostic_info.error_code, "dusk::host::syntax");
    assert!(error.location().is_some());
}

#[test]
fn inconsistent_indentation_is_a_host_error() {
    let error = translate_err("@stencil\ndef s(a: Cell):\n        a = a\n    a = a\n");
    assert_eq!(error.category(), ErrorCategory::HostSyntax);
}
