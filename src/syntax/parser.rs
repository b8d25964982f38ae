//! Python front-end parser.
//!
//! Converts source text into the host syntax tree with byte spans. The layout
//! pass provides logical lines and their indentation; each line is parsed with
//! the pest grammar, and blocks are rebuilt from the indentation levels.
//! This parser is purely syntactic: DSL rules are enforced by the translator.

use std::iter::Peekable;

use pest::{
    error::{Error, ErrorVariant, InputLocation},
    iterators::{Pair, Pairs},
    Parser,
};
use pest_derive::Parser;

use super::layout::{self, LogicalLine};
use super::*;
use crate::errors::{DuskError, ErrorKind, ErrorReporting, SourceContext};

#[derive(Parser)]
#[grammar = "syntax/grammar.pest"]
struct PythonParser;

// ============================================================================
// PUBLIC API
// ============================================================================

/// Parse a whole Python module.
pub fn parse_module(source: &SourceContext) -> Result<Module, DuskError> {
    let lines = layout::logical_lines(&source.content).map_err(|e| {
        source.report(ErrorKind::HostSyntax { message: e.message }, e.span)
    })?;

    let parsed = lines
        .iter()
        .map(|line| parse_line(source, line))
        .collect::<Result<Vec<_>, _>>()?;

    let mut blocks = BlockBuilder {
        source,
        lines: parsed.into_iter().peekable(),
        indents: Vec::new(),
    };
    let body = blocks.parse_block(0)?;
    if let Some(line) = blocks.lines.peek() {
        return Err(host_error(source, "unexpected indent", line.span));
    }
    Ok(Module { body })
}

// ============================================================================
// BLOCK STRUCTURE
// ============================================================================

struct ParsedLine {
    indent: usize,
    span: Span,
    content: LineContent,
}

enum LineContent {
    Decorator(Expr),
    Compound {
        header: Header,
        inline: Option<Vec<Stmt>>,
    },
    Simple(Vec<Stmt>),
}

enum Header {
    Def {
        name: String,
        params: Vec<Param>,
        returns: Option<Expr>,
        is_async: bool,
    },
    Class {
        name: String,
        bases: Vec<Argument>,
    },
    If(Expr),
    Elif(Expr),
    Else,
    For {
        target: Expr,
        iter: Expr,
        is_async: bool,
    },
    While(Expr),
    With {
        items: Vec<WithItem>,
        is_async: bool,
    },
    Try,
    Except {
        typ: Option<Expr>,
        name: Option<String>,
        group: bool,
    },
    Finally,
    Match(Expr),
    Case {
        pattern: Expr,
        capture: Option<String>,
        guard: Option<Expr>,
    },
}

impl Header {
    /// Message for a clause that cannot open a statement of its own.
    fn clause_error(&self) -> Option<&'static str> {
        match self {
            Header::Elif(_) => Some("'elif' without a matching 'if'"),
            Header::Else => Some("'else' without a matching statement"),
            Header::Except { .. } => Some("'except' without a matching 'try'"),
            Header::Finally => Some("'finally' without a matching 'try'"),
            Header::Case { .. } => Some("'case' outside a 'match' statement"),
            _ => None,
        }
    }
}

struct BlockBuilder<'a> {
    source: &'a SourceContext,
    lines: Peekable<std::vec::IntoIter<ParsedLine>>,
    indents: Vec<usize>,
}

impl BlockBuilder<'_> {
    fn parse_block(&mut self, indent: usize) -> Result<Vec<Stmt>, DuskError> {
        self.indents.push(indent);
        let mut body = Vec::new();

        while let Some(line) = self.lines.peek() {
            if line.indent < indent {
                if !self.indents.contains(&line.indent) {
                    return Err(host_error(
                        self.source,
                        "unindent does not match any outer indentation level",
                        line.span,
                    ));
                }
                break;
            }
            if line.indent > indent {
                return Err(host_error(self.source, "unexpected indent", line.span));
            }
            body.extend(self.parse_statement()?);
        }

        self.indents.pop();
        Ok(body)
    }

    fn next_line(&mut self) -> Result<ParsedLine, DuskError> {
        self.lines.next().ok_or_else(|| {
            let end = self.source.content.len();
            host_error(self.source, "unexpected end of file", Span::new(end, end))
        })
    }

    /// Take the next line if it is a clause header at `indent` accepted by `accept`.
    fn next_clause(
        &mut self,
        indent: usize,
        accept: impl Fn(&Header) -> bool,
    ) -> Option<ParsedLine> {
        let found = matches!(
            self.lines.peek(),
            Some(ParsedLine {
                indent: i,
                content: LineContent::Compound { header, .. },
                ..
            }) if *i == indent && accept(header)
        );
        if found {
            self.lines.next()
        } else {
            None
        }
    }

    fn parse_statement(&mut self) -> Result<Vec<Stmt>, DuskError> {
        let line = self.next_line()?;
        match line.content {
            LineContent::Simple(stmts) => Ok(stmts),
            LineContent::Decorator(decorator) => {
                let stmt = self.parse_decorated(line.indent, line.span, decorator)?;
                Ok(vec![stmt])
            }
            LineContent::Compound { header, inline } => {
                let stmt = self.parse_compound(line.indent, line.span, header, inline)?;
                Ok(vec![stmt])
            }
        }
    }

    fn parse_decorated(
        &mut self,
        indent: usize,
        start: Span,
        first: Expr,
    ) -> Result<Stmt, DuskError> {
        let mut decorators = vec![first];
        loop {
            let follows = matches!(self.lines.peek(), Some(next) if next.indent == indent);
            if !follows {
                return Err(host_error(
                    self.source,
                    "decorator must be followed by a function or class definition",
                    start,
                ));
            }
            let line = self.next_line()?;
            match line.content {
                LineContent::Decorator(expr) => decorators.push(expr),
                LineContent::Compound {
                    header: header @ (Header::Def { .. } | Header::Class { .. }),
                    inline,
                } => {
                    let mut stmt = self.parse_compound(indent, line.span, header, inline)?;
                    stmt.span = start.to(stmt.span);
                    match &mut stmt.kind {
                        StmtKind::FunctionDef(def) => def.decorators = decorators,
                        StmtKind::ClassDef {
                            decorators: slot, ..
                        } => *slot = decorators,
                        _ => {}
                    }
                    return Ok(stmt);
                }
                _ => {
                    return Err(host_error(
                        self.source,
                        "decorator must be followed by a function or class definition",
                        line.span,
                    ))
                }
            }
        }
    }

    fn parse_compound(
        &mut self,
        indent: usize,
        span: Span,
        header: Header,
        inline: Option<Vec<Stmt>>,
    ) -> Result<Stmt, DuskError> {
        if let Header::Match(subject) = header {
            return self.parse_match(indent, span, subject, inline);
        }
        if let Some(message) = header.clause_error() {
            return Err(host_error(self.source, message, span));
        }

        let body = self.parse_suite(indent, span, inline)?;
        let kind = match header {
            Header::Def {
                name,
                params,
                returns,
                is_async,
            } => StmtKind::FunctionDef(FunctionDef {
                name,
                is_async,
                decorators: Vec::new(),
                params,
                returns,
                body,
            }),
            Header::Class { name, bases } => StmtKind::ClassDef {
                name,
                decorators: Vec::new(),
                bases,
                body,
            },
            Header::If(test) => {
                let orelse = self.parse_else_chain(indent)?;
                StmtKind::If { test, body, orelse }
            }
            Header::For {
                target,
                iter,
                is_async,
            } => {
                let orelse = self.parse_else(indent)?;
                if is_async {
                    StmtKind::AsyncFor {
                        target,
                        iter,
                        body,
                        orelse,
                    }
                } else {
                    StmtKind::For {
                        target,
                        iter,
                        body,
                        orelse,
                    }
                }
            }
            Header::While(test) => {
                let orelse = self.parse_else(indent)?;
                StmtKind::While { test, body, orelse }
            }
            Header::With { items, is_async } if is_async => StmtKind::AsyncWith { items, body },
            Header::With { items, .. } => StmtKind::With { items, body },
            Header::Try => self.parse_try(indent, span, body)?,
            other => {
                let message = other.clause_error().unwrap_or("misplaced clause");
                return Err(host_error(self.source, message, span));
            }
        };
        let span = span_through(span, &kind);
        Ok(Stmt { kind, span })
    }

    fn parse_suite(
        &mut self,
        indent: usize,
        header_span: Span,
        inline: Option<Vec<Stmt>>,
    ) -> Result<Vec<Stmt>, DuskError> {
        if let Some(stmts) = inline {
            return Ok(stmts);
        }
        match self.lines.peek() {
            Some(next) if next.indent > indent => {
                let nested = next.indent;
                self.parse_block(nested)
            }
            _ => Err(host_error(
                self.source,
                "expected an indented block",
                header_span,
            )),
        }
    }

    /// Suite of a clause line taken by `next_clause`.
    fn clause_suite(&mut self, indent: usize, line: ParsedLine) -> Result<Vec<Stmt>, DuskError> {
        match line.content {
            LineContent::Compound { inline, .. } => self.parse_suite(indent, line.span, inline),
            _ => Ok(Vec::new()),
        }
    }

    /// `elif`/`else` continuation of an `if` at the same indentation.
    fn parse_else_chain(&mut self, indent: usize) -> Result<Vec<Stmt>, DuskError> {
        let Some(line) = self.next_clause(indent, |h| matches!(h, Header::Elif(_) | Header::Else))
        else {
            return Ok(Vec::new());
        };
        match line.content {
            LineContent::Compound {
                header: Header::Elif(test),
                inline,
            } => {
                let body = self.parse_suite(indent, line.span, inline)?;
                let orelse = self.parse_else_chain(indent)?;
                let kind = StmtKind::If { test, body, orelse };
                let span = span_through(line.span, &kind);
                Ok(vec![Stmt { kind, span }])
            }
            _ => self.clause_suite(indent, line),
        }
    }

    /// `else` clause of a loop or `try`.
    fn parse_else(&mut self, indent: usize) -> Result<Vec<Stmt>, DuskError> {
        match self.next_clause(indent, |h| matches!(h, Header::Else)) {
            Some(line) => self.clause_suite(indent, line),
            None => Ok(Vec::new()),
        }
    }

    /// `except`, `else` and `finally` clauses following a `try` body.
    fn parse_try(
        &mut self,
        indent: usize,
        span: Span,
        body: Vec<Stmt>,
    ) -> Result<StmtKind, DuskError> {
        let mut handlers = Vec::new();
        while let Some(line) = self.next_clause(indent, |h| matches!(h, Header::Except { .. })) {
            let LineContent::Compound {
                header: Header::Except { typ, name, group },
                inline,
            } = line.content
            else {
                continue;
            };
            let body = self.parse_suite(indent, line.span, inline)?;
            let span = body.last().map_or(line.span, |last| line.span.to(last.span));
            handlers.push(ExceptHandler {
                typ,
                name,
                group,
                body,
                span,
            });
        }

        let orelse = if handlers.is_empty() {
            Vec::new()
        } else {
            self.parse_else(indent)?
        };
        let finally = self.next_clause(indent, |h| matches!(h, Header::Finally));
        if handlers.is_empty() && finally.is_none() {
            return Err(host_error(
                self.source,
                "expected 'except' or 'finally' block",
                span,
            ));
        }
        let finalbody = match finally {
            Some(line) => self.clause_suite(indent, line)?,
            None => Vec::new(),
        };

        Ok(StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        })
    }

    /// A `match` statement: an indented block holding only `case` clauses.
    fn parse_match(
        &mut self,
        indent: usize,
        span: Span,
        subject: Expr,
        inline: Option<Vec<Stmt>>,
    ) -> Result<Stmt, DuskError> {
        let nested = match self.lines.peek() {
            Some(next) if inline.is_none() && next.indent > indent => next.indent,
            _ => {
                return Err(host_error(
                    self.source,
                    "expected an indented block of 'case' clauses",
                    span,
                ))
            }
        };

        self.indents.push(nested);
        let mut cases = Vec::new();
        let mut end = span;
        while let Some(line) = self.next_clause(nested, |h| matches!(h, Header::Case { .. })) {
            let LineContent::Compound {
                header:
                    Header::Case {
                        pattern,
                        capture,
                        guard,
                    },
                inline,
            } = line.content
            else {
                continue;
            };
            let body = self.parse_suite(nested, line.span, inline)?;
            end = body.last().map_or(line.span, |last| last.span);
            cases.push(MatchCase {
                pattern,
                capture,
                guard,
                body,
            });
        }
        self.indents.pop();

        let stray = self
            .lines
            .peek()
            .filter(|line| line.indent == nested)
            .map(|line| line.span);
        if let Some(stray) = stray {
            return Err(host_error(self.source, "expected a 'case' clause", stray));
        }

        Ok(Stmt {
            kind: StmtKind::Match { subject, cases },
            span: span.to(end),
        })
    }
}

/// Extend a header span through the last nested statement.
fn span_through(header: Span, kind: &StmtKind) -> Span {
    let last = match kind {
        StmtKind::FunctionDef(def) => def.body.last(),
        StmtKind::ClassDef { body, .. }
        | StmtKind::With { body, .. }
        | StmtKind::AsyncWith { body, .. } => body.last(),
        StmtKind::If { body, orelse, .. }
        | StmtKind::For { body, orelse, .. }
        | StmtKind::AsyncFor { body, orelse, .. }
        | StmtKind::While { body, orelse, .. } => orelse.last().or(body.last()),
        StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => finalbody
            .last()
            .or(orelse.last())
            .or(handlers.last().and_then(|h| h.body.last()))
            .or(body.last()),
        _ => None,
    };
    match last {
        Some(stmt) => header.to(stmt.span),
        None => header,
    }
}

// ============================================================================
// LINE PARSING
// ============================================================================

fn parse_line(source: &SourceContext, line: &LogicalLine) -> Result<ParsedLine, DuskError> {
    let text = line.text(&source.content);
    let mut pairs = PythonParser::parse(Rule::line, text)
        .map_err(|e| convert_parse_error(e, text, line.start, source))?;

    let builder = Builder {
        source,
        offset: line.start,
    };
    let span = Span::new(line.start, line.end);
    let line_pair = builder.next(&mut pairs, "line", span)?;
    let content = builder.next(&mut line_pair.into_inner(), "statement", span)?;

    let content = match content.as_rule() {
        Rule::decorator => {
            let expr = builder.single(content, "decorator")?;
            LineContent::Decorator(builder.expr(expr)?)
        }
        Rule::compound_stmt => {
            let mut inner = content.into_inner();
            let header = builder.header(builder.next(&mut inner, "header", span)?)?;
            let inline = match inner.next() {
                Some(stmts) => Some(builder.simple_stmts(stmts)?),
                None => None,
            };
            LineContent::Compound { header, inline }
        }
        Rule::simple_stmts => LineContent::Simple(builder.simple_stmts(content)?),
        rule => return Err(builder.malformed(&format!("{rule:?}"), span)),
    };

    Ok(ParsedLine {
        indent: line.indent,
        span,
        content,
    })
}

/// Builds host nodes from the pairs of one logical line.
struct Builder<'a> {
    source: &'a SourceContext,
    offset: usize,
}

impl Builder<'_> {
    // ------------------------------------------------------------------
    // headers and statements
    // ------------------------------------------------------------------

    fn header(&self, pair: Pair<Rule>) -> Result<Header, DuskError> {
        let span = self.span(&pair);
        let rule = pair.as_rule();
        let is_async = starts_async(&pair);
        let mut inner = significant(pair.into_inner());
        Ok(match rule {
            Rule::def_header => {
                let name = self.next(&mut inner, "function name", span)?.as_str().to_string();
                let mut params = Vec::new();
                let mut returns = None;
                for part in inner {
                    match part.as_rule() {
                        Rule::param_list => params = self.params(part)?,
                        Rule::return_annotation => returns = Some(self.single_expr(part)?),
                        _ => return Err(self.malformed("function header", span)),
                    }
                }
                Header::Def {
                    name,
                    params,
                    returns,
                    is_async,
                }
            }
            Rule::class_header => {
                let name = self.next(&mut inner, "class name", span)?.as_str().to_string();
                let bases = match inner.next() {
                    Some(args) => self.arguments(args)?,
                    None => Vec::new(),
                };
                Header::Class { name, bases }
            }
            Rule::if_header => Header::If(self.expr(self.next(&mut inner, "condition", span)?)?),
            Rule::elif_header => {
                Header::Elif(self.expr(self.next(&mut inner, "condition", span)?)?)
            }
            Rule::else_header => Header::Else,
            Rule::while_header => {
                Header::While(self.expr(self.next(&mut inner, "condition", span)?)?)
            }
            Rule::for_header => {
                let target = self.target_list(self.next(&mut inner, "loop target", span)?)?;
                let iter = self.expr_list(self.next(&mut inner, "loop iterable", span)?)?;
                Header::For {
                    target,
                    iter,
                    is_async,
                }
            }
            Rule::with_header => {
                let items = inner
                    .map(|item| {
                        let item_span = self.span(&item);
                        let mut parts = significant(item.into_inner());
                        let context = self.expr(self.next(&mut parts, "context", item_span)?)?;
                        let target = match parts.next() {
                            Some(target) => Some(self.target(target)?),
                            None => None,
                        };
                        Ok(WithItem { context, target })
                    })
                    .collect::<Result<Vec<_>, DuskError>>()?;
                Header::With { items, is_async }
            }
            Rule::try_header => Header::Try,
            Rule::finally_header => Header::Finally,
            Rule::except_header => {
                let (mut typ, mut name, mut group) = (None, None, false);
                for part in inner {
                    match part.as_rule() {
                        Rule::except_group => group = true,
                        Rule::identifier => name = Some(part.as_str().to_string()),
                        _ => typ = Some(self.expr(part)?),
                    }
                }
                Header::Except { typ, name, group }
            }
            Rule::match_header => {
                Header::Match(self.expr_list(self.next(&mut inner, "match subject", span)?)?)
            }
            Rule::case_header => {
                let pattern = self.expr_list(self.next(&mut inner, "case pattern", span)?)?;
                let (mut capture, mut guard) = (None, None);
                for part in inner {
                    match part.as_rule() {
                        Rule::case_capture => {
                            capture = Some(self.single(part, "capture name")?.as_str().to_string())
                        }
                        _ => guard = Some(self.single_expr(part)?),
                    }
                }
                Header::Case {
                    pattern,
                    capture,
                    guard,
                }
            }
            _ => return Err(self.malformed("compound statement", span)),
        })
    }

    fn params(&self, pair: Pair<Rule>) -> Result<Vec<Param>, DuskError> {
        let mut params: Vec<Param> = Vec::new();
        let mut keyword_only = false;

        for part in pair.into_inner() {
            let span = self.span(&part);
            let rule = part.as_rule();
            if rule == Rule::positional_marker {
                for param in &mut params {
                    if param.kind == ParamKind::Positional {
                        param.kind = ParamKind::PositionalOnly;
                    }
                }
                continue;
            }
            let mut name = None;
            let mut annotation = None;
            let mut default = None;
            for piece in part.into_inner() {
                match piece.as_rule() {
                    Rule::identifier => name = Some(piece.as_str().to_string()),
                    Rule::param_annotation => annotation = Some(self.single_expr(piece)?),
                    Rule::param_default => default = Some(self.single_expr(piece)?),
                    _ => return Err(self.malformed("parameter", span)),
                }
            }
            let kind = match rule {
                Rule::plain_param | Rule::lambda_plain if keyword_only => ParamKind::KeywordOnly,
                Rule::plain_param | Rule::lambda_plain => ParamKind::Positional,
                Rule::varargs_param | Rule::lambda_varargs => {
                    keyword_only = true;
                    ParamKind::VarArgs
                }
                Rule::kwargs_param | Rule::lambda_kwargs => ParamKind::KwArgs,
                _ => return Err(self.malformed("parameter", span)),
            };
            params.push(Param {
                name,
                kind,
                annotation,
                default,
                span,
            });
        }

        Ok(params)
    }

    fn simple_stmts(&self, pair: Pair<Rule>) -> Result<Vec<Stmt>, DuskError> {
        pair.into_inner().map(|stmt| self.simple_stmt(stmt)).collect()
    }

    fn simple_stmt(&self, pair: Pair<Rule>) -> Result<Stmt, DuskError> {
        let span = self.span(&pair);
        let rule = pair.as_rule();
        let mut inner = significant(pair.into_inner());

        let kind = match rule {
            Rule::pass_stmt => StmtKind::Pass,
            Rule::break_stmt => StmtKind::Break,
            Rule::continue_stmt => StmtKind::Continue,
            Rule::return_stmt => match inner.next() {
                Some(value) => StmtKind::Return(Some(self.expr_list(value)?)),
                None => StmtKind::Return(None),
            },
            Rule::import_stmt => {
                let names = inner
                    .map(|alias| self.alias(alias))
                    .collect::<Result<Vec<_>, _>>()?;
                StmtKind::Import(names)
            }
            Rule::from_import_stmt => {
                let module = self.next(&mut inner, "module", span)?.as_str().to_string();
                let targets = self.next(&mut inner, "imported names", span)?;
                let mut names = Vec::new();
                for target in targets.into_inner() {
                    match target.as_rule() {
                        Rule::import_star => names.push(Alias {
                            name: "*".into(),
                            asname: None,
                        }),
                        Rule::import_names => {
                            for alias in target.into_inner() {
                                names.push(self.alias(alias)?);
                            }
                        }
                        _ => return Err(self.malformed("import", span)),
                    }
                }
                StmtKind::ImportFrom { module, names }
            }
            Rule::assert_stmt => {
                let test = self.expr(self.next(&mut inner, "assertion", span)?)?;
                let msg = inner.next().map(|m| self.expr(m)).transpose()?;
                StmtKind::Assert { test, msg }
            }
            Rule::raise_stmt => {
                let exc = inner.next().map(|e| self.expr(e)).transpose()?;
                let cause = inner.next().map(|c| self.expr(c)).transpose()?;
                StmtKind::Raise { exc, cause }
            }
            Rule::del_stmt => {
                let targets = self.next(&mut inner, "del target", span)?;
                let (targets, _) = self.targets(targets)?;
                StmtKind::Delete(targets)
            }
            Rule::global_stmt => {
                StmtKind::Global(inner.map(|name| name.as_str().to_string()).collect())
            }
            Rule::type_alias_stmt => {
                let name = self.next(&mut inner, "alias name", span)?.as_str().to_string();
                let value = self.expr(self.next(&mut inner, "aliased type", span)?)?;
                StmtKind::TypeAlias { name, value }
            }
            Rule::aug_assign_stmt => {
                let target = self.target(self.next(&mut inner, "target", span)?)?;
                let op_pair = self.next(&mut inner, "operator", span)?;
                let symbol = op_pair.as_str().trim_end_matches('=');
                let op = BinOp::from_symbol(symbol)
                    .ok_or_else(|| self.malformed("augmented assignment", span))?;
                let value = self.expr_list(self.next(&mut inner, "value", span)?)?;
                StmtKind::AugAssign { target, op, value }
            }
            Rule::ann_assign_stmt => {
                let target = self.target(self.next(&mut inner, "target", span)?)?;
                let annotation = self.expr(self.next(&mut inner, "annotation", span)?)?;
                let value = inner
                    .find(|p| p.as_rule() != Rule::assign_eq)
                    .map(|v| self.expr_list(v))
                    .transpose()?;
                StmtKind::AnnAssign {
                    target,
                    annotation,
                    value,
                }
            }
            Rule::assign_stmt => {
                let mut parts = inner
                    .filter(|p| p.as_rule() != Rule::assign_eq)
                    .map(|p| self.expr_list(p))
                    .collect::<Result<Vec<_>, _>>()?;
                let value = parts
                    .pop()
                    .ok_or_else(|| self.malformed("assignment", span))?;
                StmtKind::Assign {
                    targets: parts,
                    value,
                }
            }
            Rule::expr_stmt => {
                StmtKind::Expr(self.expr_list(self.next(&mut inner, "expression", span)?)?)
            }
            _ => return Err(self.malformed("statement", span)),
        };

        Ok(Stmt { kind, span })
    }

    fn alias(&self, pair: Pair<Rule>) -> Result<Alias, DuskError> {
        let span = self.span(&pair);
        let mut inner = significant(pair.into_inner());
        let name = self.next(&mut inner, "name", span)?.as_str().to_string();
        let asname = inner.next().map(|a| a.as_str().to_string());
        Ok(Alias { name, asname })
    }

    // ------------------------------------------------------------------
    // expressions
    // ------------------------------------------------------------------

    fn expr(&self, pair: Pair<Rule>) -> Result<Expr, DuskError> {
        let span = self.span(&pair);
        let rule = pair.as_rule();

        match rule {
            Rule::expr | Rule::not_test => self.single_expr(pair),

            Rule::lambda_expr => {
                let mut params = Vec::new();
                let mut body = None;
                for part in significant(pair.into_inner()) {
                    match part.as_rule() {
                        Rule::lambda_params => params = self.params(part)?,
                        _ => body = Some(self.expr(part)?),
                    }
                }
                let body = body.ok_or_else(|| self.malformed("lambda", span))?;
                Ok(make(
                    ExprKind::Lambda {
                        params,
                        body: Box::new(body),
                    },
                    span,
                ))
            }

            Rule::yield_expr => match significant(pair.into_inner()).next() {
                None => Ok(make(ExprKind::Yield(None), span)),
                Some(from) if from.as_rule() == Rule::yield_from => Ok(make(
                    ExprKind::YieldFrom(Box::new(self.single_expr(from)?)),
                    span,
                )),
                Some(values) => Ok(make(
                    ExprKind::Yield(Some(Box::new(self.expr_list(values)?))),
                    span,
                )),
            },

            Rule::named_expr => {
                let mut inner = pair.into_inner();
                let target = self.next(&mut inner, "assignment target", span)?.as_str().to_string();
                let value = self.expr(self.next(&mut inner, "assigned value", span)?)?;
                Ok(make(
                    ExprKind::NamedExpr {
                        target,
                        value: Box::new(value),
                    },
                    span,
                ))
            }

            Rule::await_expr => Ok(make(
                ExprKind::Await(Box::new(self.single_expr(pair)?)),
                span,
            )),

            Rule::star_expr => Ok(make(
                ExprKind::Starred(Box::new(self.single_expr(pair)?)),
                span,
            )),

            Rule::ternary => {
                let mut parts = significant(pair.into_inner());
                let body = self.expr(self.next(&mut parts, "expression", span)?)?;
                let Some(test) = parts.next() else {
                    return Ok(body);
                };
                let test = self.expr(test)?;
                let orelse = self.expr(self.next(&mut parts, "else branch", span)?)?;
                Ok(make(
                    ExprKind::IfExp {
                        test: Box::new(test),
                        body: Box::new(body),
                        orelse: Box::new(orelse),
                    },
                    span,
                ))
            }

            Rule::or_test | Rule::and_test => {
                let mut values = significant(pair.into_inner())
                    .map(|p| self.expr(p))
                    .collect::<Result<Vec<_>, _>>()?;
                if values.len() == 1 {
                    return values.pop().ok_or_else(|| self.malformed("expression", span));
                }
                let op = if rule == Rule::or_test {
                    BoolOp::Or
                } else {
                    BoolOp::And
                };
                Ok(make(ExprKind::BoolOp { op, values }, span))
            }

            Rule::not_expr => {
                let operand = self.single_expr(pair)?;
                Ok(make(
                    ExprKind::UnaryOp {
                        op: UnaryOp::Not,
                        operand: Box::new(operand),
                    },
                    span,
                ))
            }

            Rule::comparison => {
                let mut inner = pair.into_inner();
                let left = self.expr(self.next(&mut inner, "operand", span)?)?;
                let mut ops = Vec::new();
                let mut comparators = Vec::new();
                while let Some(op) = inner.next() {
                    ops.push(self.comparison_op(op)?);
                    comparators.push(self.expr(self.next(&mut inner, "operand", span)?)?);
                }
                if ops.is_empty() {
                    return Ok(left);
                }
                Ok(make(
                    ExprKind::Compare {
                        left: Box::new(left),
                        ops,
                        comparators,
                    },
                    span,
                ))
            }

            Rule::bitor | Rule::bitxor | Rule::bitand | Rule::shift | Rule::arith | Rule::term => {
                let mut inner = pair.into_inner();
                let mut left = self.expr(self.next(&mut inner, "operand", span)?)?;
                while let Some(op) = inner.next() {
                    let op = BinOp::from_symbol(op.as_str())
                        .ok_or_else(|| self.malformed("operator", span))?;
                    let right = self.expr(self.next(&mut inner, "operand", span)?)?;
                    let joined = left.span.to(right.span);
                    left = make(
                        ExprKind::BinOp {
                            left: Box::new(left),
                            op,
                            right: Box::new(right),
                        },
                        joined,
                    );
                }
                Ok(left)
            }

            Rule::factor => {
                let mut inner = pair.into_inner();
                let first = self.next(&mut inner, "operand", span)?;
                if first.as_rule() != Rule::unary_op {
                    return self.expr(first);
                }
                let op = match first.as_str() {
                    "-" => UnaryOp::Neg,
                    "+" => UnaryOp::Pos,
                    _ => UnaryOp::Invert,
                };
                let operand = self.expr(self.next(&mut inner, "operand", span)?)?;
                Ok(make(
                    ExprKind::UnaryOp {
                        op,
                        operand: Box::new(operand),
                    },
                    span,
                ))
            }

            Rule::power => {
                let mut inner = pair.into_inner();
                let base = self.expr(self.next(&mut inner, "operand", span)?)?;
                match inner.next() {
                    Some(exponent) => Ok(make(
                        ExprKind::BinOp {
                            left: Box::new(base),
                            op: BinOp::Pow,
                            right: Box::new(self.expr(exponent)?),
                        },
                        span,
                    )),
                    None => Ok(base),
                }
            }

            Rule::primary => {
                let mut inner = pair.into_inner();
                let mut value = self.expr(self.next(&mut inner, "operand", span)?)?;
                for trailer in inner {
                    value = self.trailer(value, trailer)?;
                }
                Ok(value)
            }

            Rule::identifier => Ok(make(ExprKind::Name(pair.as_str().to_string()), span)),
            Rule::kw_none => Ok(make(ExprKind::Constant(Constant::None), span)),
            Rule::kw_true => Ok(make(ExprKind::Constant(Constant::Bool(true)), span)),
            Rule::kw_false => Ok(make(ExprKind::Constant(Constant::Bool(false)), span)),
            Rule::ellipsis => Ok(make(ExprKind::Constant(Constant::Ellipsis), span)),
            Rule::number => self.number(pair.as_str(), span),
            Rule::strings => {
                let mut text = String::new();
                for string in pair.into_inner() {
                    text.push_str(&unescape_string(string.as_str()));
                }
                Ok(make(ExprKind::Constant(Constant::Str(text)), span))
            }

            Rule::paren_atom => match pair.into_inner().next() {
                None => Ok(make(ExprKind::Tuple(Vec::new()), span)),
                Some(inner) if inner.as_rule() == Rule::generator_body => {
                    let (elt, generators) = self.generator_body(inner)?;
                    Ok(make(ExprKind::GeneratorExp { elt, generators }, span))
                }
                Some(inner) => {
                    let (items, trailing) = self.items(inner)?;
                    Ok(sequence(items, trailing, span))
                }
            },

            Rule::list_atom => match pair.into_inner().next() {
                None => Ok(make(ExprKind::List(Vec::new()), span)),
                Some(inner) if inner.as_rule() == Rule::generator_body => {
                    let (elt, generators) = self.generator_body(inner)?;
                    Ok(make(ExprKind::ListComp { elt, generators }, span))
                }
                Some(inner) => {
                    let (items, _) = self.items(inner)?;
                    Ok(make(ExprKind::List(items), span))
                }
            },

            Rule::brace_atom => match pair.into_inner().next() {
                None => Ok(make(ExprKind::Dict(Vec::new()), span)),
                Some(inner) if inner.as_rule() == Rule::dict_items => {
                    let entries = inner
                        .into_inner()
                        .map(|entry| match entry.as_rule() {
                            Rule::dict_unpack => Ok((None, self.single_expr(entry)?)),
                            _ => {
                                let (key, value) = self.dict_item(entry)?;
                                Ok((Some(key), value))
                            }
                        })
                        .collect::<Result<Vec<_>, DuskError>>()?;
                    Ok(make(ExprKind::Dict(entries), span))
                }
                Some(inner) if inner.as_rule() == Rule::dict_comp => {
                    let mut parts = inner.into_inner();
                    let (key, value) = self.dict_item(self.next(&mut parts, "entry", span)?)?;
                    let generators = parts
                        .map(|comp| self.comprehension(comp))
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(make(
                        ExprKind::DictComp {
                            key: Box::new(key),
                            value: Box::new(value),
                            generators,
                        },
                        span,
                    ))
                }
                Some(inner) if inner.as_rule() == Rule::generator_body => {
                    let (elt, generators) = self.generator_body(inner)?;
                    Ok(make(ExprKind::SetComp { elt, generators }, span))
                }
                Some(inner) => {
                    let (items, _) = self.items(inner)?;
                    Ok(make(ExprKind::Set(items), span))
                }
            },

            Rule::expr_list => self.expr_list(pair),

            _ => Err(self.malformed("expression", span)),
        }
    }

    fn trailer(&self, value: Expr, trailer: Pair<Rule>) -> Result<Expr, DuskError> {
        let span = value.span.to(self.span(&trailer));
        match trailer.as_rule() {
            Rule::call => {
                let args = match trailer.into_inner().next() {
                    Some(args) => self.arguments(args)?,
                    None => Vec::new(),
                };
                Ok(make(
                    ExprKind::Call {
                        func: Box::new(value),
                        args,
                    },
                    span,
                ))
            }
            Rule::subscript => {
                let slices = self.next(&mut trailer.into_inner(), "index", span)?;
                let slices_span = self.span(&slices);
                let mut items = Vec::new();
                let mut trailing = false;
                for item in slices.into_inner() {
                    match item.as_rule() {
                        Rule::trailing_comma => trailing = true,
                        Rule::slice => items.push(self.slice(item)?),
                        _ => items.push(self.expr(item)?),
                    }
                }
                let index = sequence(items, trailing, slices_span);
                Ok(make(
                    ExprKind::Subscript {
                        value: Box::new(value),
                        index: Box::new(index),
                    },
                    span,
                ))
            }
            Rule::attribute => {
                let attr = self.next(&mut trailer.into_inner(), "attribute name", span)?;
                Ok(make(
                    ExprKind::Attribute {
                        value: Box::new(value),
                        attr: attr.as_str().to_string(),
                    },
                    span,
                ))
            }
            _ => Err(self.malformed("trailer", span)),
        }
    }

    fn slice(&self, pair: Pair<Rule>) -> Result<Expr, DuskError> {
        let span = self.span(&pair);
        let (mut lower, mut upper, mut step) = (None, None, None);
        for bound in pair.into_inner() {
            let slot = match bound.as_rule() {
                Rule::slice_lower => &mut lower,
                Rule::slice_upper => &mut upper,
                _ => &mut step,
            };
            *slot = Some(Box::new(self.single_expr(bound)?));
        }
        Ok(make(ExprKind::Slice { lower, upper, step }, span))
    }

    fn arguments(&self, pair: Pair<Rule>) -> Result<Vec<Argument>, DuskError> {
        pair.into_inner()
            .map(|arg| {
                let span = self.span(&arg);
                match arg.as_rule() {
                    Rule::keyword_argument => {
                        let mut inner = arg
                            .into_inner()
                            .filter(|p| p.as_rule() != Rule::assign_eq);
                        let name = inner
                            .next()
                            .ok_or_else(|| self.malformed("keyword argument", span))?;
                        let value = inner
                            .next()
                            .ok_or_else(|| self.malformed("keyword argument", span))?;
                        Ok(Argument::Keyword {
                            name: name.as_str().to_string(),
                            value: self.expr(value)?,
                        })
                    }
                    Rule::double_star_argument => Ok(Argument::DoubleStarred(self.single_expr(arg)?)),
                    Rule::star_argument => {
                        let value = self.single_expr(arg)?;
                        Ok(Argument::Positional(make(
                            ExprKind::Starred(Box::new(value)),
                            span,
                        )))
                    }
                    Rule::generator_argument => {
                        let (elt, generators) = self.generator_body(arg)?;
                        Ok(Argument::Positional(make(
                            ExprKind::GeneratorExp { elt, generators },
                            span,
                        )))
                    }
                    _ => Ok(Argument::Positional(self.single_expr(arg)?)),
                }
            })
            .collect()
    }

    fn generator_body(
        &self,
        pair: Pair<Rule>,
    ) -> Result<(Box<Expr>, Vec<Comprehension>), DuskError> {
        let span = self.span(&pair);
        let mut inner = pair.into_inner();
        let elt = self.expr(self.next(&mut inner, "element", span)?)?;
        let generators = inner
            .map(|comp| self.comprehension(comp))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((Box::new(elt), generators))
    }

    fn comprehension(&self, pair: Pair<Rule>) -> Result<Comprehension, DuskError> {
        let span = self.span(&pair);
        let is_async = starts_async(&pair);
        let mut parts = significant(pair.into_inner());
        let target = self.target_list(self.next(&mut parts, "target", span)?)?;
        let iter = self.expr(self.next(&mut parts, "iterable", span)?)?;
        let ifs = parts
            .map(|cond| self.single_expr(cond))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Comprehension {
            is_async,
            target,
            iter,
            ifs,
        })
    }

    fn dict_item(&self, pair: Pair<Rule>) -> Result<(Expr, Expr), DuskError> {
        let span = self.span(&pair);
        let mut kv = pair.into_inner();
        let key = self.expr(self.next(&mut kv, "key", span)?)?;
        let value = self.expr(self.next(&mut kv, "value", span)?)?;
        Ok((key, value))
    }

    fn comparison_op(&self, pair: Pair<Rule>) -> Result<CmpOp, DuskError> {
        let span = self.span(&pair);
        let op = self.next(&mut pair.into_inner(), "comparison operator", span)?;
        Ok(match op.as_rule() {
            Rule::op_not_in => CmpOp::NotIn,
            Rule::op_is_not => CmpOp::IsNot,
            Rule::op_in => CmpOp::In,
            Rule::op_is => CmpOp::Is,
            _ => match op.as_str() {
                "==" => CmpOp::Eq,
                "!=" => CmpOp::NotEq,
                "<=" => CmpOp::LtE,
                ">=" => CmpOp::GtE,
                "<" => CmpOp::Lt,
                ">" => CmpOp::Gt,
                _ => return Err(self.malformed("comparison operator", span)),
            },
        })
    }

    fn number(&self, text: &str, span: Span) -> Result<Expr, DuskError> {
        let digits: String = text.chars().filter(|c| *c != '_').collect();
        let lower = digits.to_ascii_lowercase();

        if let Some(imag) = lower.strip_suffix('j') {
            return match imag.parse::<f64>() {
                Ok(value) => Ok(make(ExprKind::Constant(Constant::Imaginary(value)), span)),
                Err(_) => Err(self.malformed("imaginary literal", span)),
            };
        }

        let radix = match lower.get(..2) {
            Some("0x") => Some(16),
            Some("0o") => Some(8),
            Some("0b") => Some(2),
            _ => None,
        };
        let constant = if let Some(radix) = radix {
            i64::from_str_radix(&lower[2..], radix).map(Constant::Int).ok()
        } else if lower.contains(['.', 'e']) {
            lower.parse::<f64>().map(Constant::Float).ok()
        } else {
            lower.parse::<i64>().map(Constant::Int).ok()
        };

        // Only overflow fails here.
        let constant = constant.unwrap_or_else(|| Constant::BigInt(text.to_string()));
        Ok(make(ExprKind::Constant(constant), span))
    }

    // ------------------------------------------------------------------
    // lists and targets
    // ------------------------------------------------------------------

    /// Items of an `expr_list`, plus whether it had a trailing comma.
    fn items(&self, pair: Pair<Rule>) -> Result<(Vec<Expr>, bool), DuskError> {
        let mut items = Vec::new();
        let mut trailing = false;
        for item in pair.into_inner() {
            match item.as_rule() {
                Rule::trailing_comma => trailing = true,
                _ => items.push(self.expr(item)?),
            }
        }
        Ok((items, trailing))
    }

    fn expr_list(&self, pair: Pair<Rule>) -> Result<Expr, DuskError> {
        let span = self.span(&pair);
        let (items, trailing) = self.items(pair)?;
        Ok(sequence(items, trailing, span))
    }

    fn targets(&self, pair: Pair<Rule>) -> Result<(Vec<Expr>, bool), DuskError> {
        let mut items = Vec::new();
        let mut trailing = false;
        for item in pair.into_inner() {
            match item.as_rule() {
                Rule::trailing_comma => trailing = true,
                _ => items.push(self.target(item)?),
            }
        }
        Ok((items, trailing))
    }

    fn target_list(&self, pair: Pair<Rule>) -> Result<Expr, DuskError> {
        let span = self.span(&pair);
        let (items, trailing) = self.targets(pair)?;
        Ok(sequence(items, trailing, span))
    }

    fn target(&self, pair: Pair<Rule>) -> Result<Expr, DuskError> {
        let span = self.span(&pair);
        match pair.as_rule() {
            Rule::starred_target => {
                let value = self.single_expr(pair)?;
                Ok(make(ExprKind::Starred(Box::new(value)), span))
            }
            _ => self.expr(pair),
        }
    }

    // ------------------------------------------------------------------
    // utilities
    // ------------------------------------------------------------------

    fn span(&self, pair: &Pair<Rule>) -> Span {
        let span = pair.as_span();
        Span::new(self.offset + span.start(), self.offset + span.end())
    }

    /// Lower the only significant child of `pair`.
    fn single_expr(&self, pair: Pair<Rule>) -> Result<Expr, DuskError> {
        let inner = self.single(pair, "expression")?;
        self.expr(inner)
    }

    fn single<'i>(&self, pair: Pair<'i, Rule>, what: &str) -> Result<Pair<'i, Rule>, DuskError> {
        let span = self.span(&pair);
        significant(pair.into_inner())
            .next()
            .ok_or_else(|| self.malformed(what, span))
    }

    fn next<'i>(
        &self,
        pairs: &mut impl Iterator<Item = Pair<'i, Rule>>,
        what: &str,
        span: Span,
    ) -> Result<Pair<'i, Rule>, DuskError> {
        pairs.next().ok_or_else(|| self.malformed(what, span))
    }

    fn malformed(&self, what: &str, span: Span) -> DuskError {
        host_error(self.source, format!("malformed {what}"), span)
    }
}

fn make(kind: ExprKind, span: Span) -> Expr {
    Expr { kind, span }
}

/// A single item stays itself; several items (or a trailing comma) form a tuple.
fn sequence(mut items: Vec<Expr>, trailing: bool, span: Span) -> Expr {
    if items.len() == 1 && !trailing {
        if let Some(item) = items.pop() {
            return item;
        }
    }
    make(ExprKind::Tuple(items), span)
}

/// Children of a pair without keyword and `=` tokens.
fn significant(pairs: Pairs<'_, Rule>) -> impl Iterator<Item = Pair<'_, Rule>> {
    pairs.filter(|p| !is_token(p.as_rule()))
}

fn is_token(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::assign_eq
            | Rule::kw_and
            | Rule::kw_as
            | Rule::kw_assert
            | Rule::kw_async
            | Rule::kw_await
            | Rule::kw_break
            | Rule::kw_case
            | Rule::kw_class
            | Rule::kw_continue
            | Rule::kw_def
            | Rule::kw_del
            | Rule::kw_elif
            | Rule::kw_else
            | Rule::kw_except
            | Rule::kw_finally
            | Rule::kw_for
            | Rule::kw_from
            | Rule::kw_global
            | Rule::kw_if
            | Rule::kw_import
            | Rule::kw_in
            | Rule::kw_is
            | Rule::kw_lambda
            | Rule::kw_match
            | Rule::kw_nonlocal
            | Rule::kw_not
            | Rule::kw_or
            | Rule::kw_pass
            | Rule::kw_raise
            | Rule::kw_return
            | Rule::kw_try
            | Rule::kw_type
            | Rule::kw_while
            | Rule::kw_with
            | Rule::kw_yield
    )
}

/// Whether a header or comprehension opens with `async`.
fn starts_async(pair: &Pair<Rule>) -> bool {
    matches!(pair.clone().into_inner().next(), Some(first) if first.as_rule() == Rule::kw_async)
}

fn unescape_string(text: &str) -> String {
    let prefix_len = text.find(['\'', '"']).unwrap_or(0);
    let raw = text[..prefix_len].contains(['r', 'R']);
    let body = &text[prefix_len..];
    let quote_len = if body.starts_with("\"\"\"") || body.starts_with("'''") {
        3
    } else {
        1
    };
    let inner = body
        .get(quote_len..body.len().saturating_sub(quote_len))
        .unwrap_or("");
    if raw {
        return inner.to_string();
    }

    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            result.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('t') => result.push('\t'),
            Some('r') => result.push('\r'),
            Some('0') => result.push('\0'),
            Some('\\') => result.push('\\'),
            Some('\'') => result.push('\''),
            Some('"') => result.push('"'),
            Some('\n') => {}
            Some(other) => {
                result.push('\\');
                result.push(other);
            }
            None => result.push('\\'),
        }
    }
    result
}

// ============================================================================
// ERROR HANDLING
// ============================================================================

fn host_error(source: &SourceContext, message: impl Into<String>, span: Span) -> DuskError {
    source.report(
        ErrorKind::HostSyntax {
            message: message.into(),
        },
        span,
    )
}

fn convert_parse_error(
    error: Error<Rule>,
    text: &str,
    offset: usize,
    source: &SourceContext,
) -> DuskError {
    let (start, end) = match error.location {
        InputLocation::Pos(pos) => (pos, pos),
        InputLocation::Span((start, end)) => (start, end),
    };

    let message = match &error.variant {
        ErrorVariant::CustomError { message } => message.clone(),
        ErrorVariant::ParsingError { .. } => match text.get(start..).and_then(|s| s.chars().next()) {
            Some(found) => format!("invalid syntax near '{found}'"),
            None => "invalid syntax: unexpected end of line".to_string(),
        },
    };

    let end = end.max(start + usize::from(start < text.len()));
    host_error(source, message, Span::new(offset + start, offset + end))
}
