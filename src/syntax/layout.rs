//! Logical line layout.
//!
//! Python's block structure lives in indentation, which a PEG grammar handles
//! poorly. This pass cuts the source into logical lines (joining bracketed and
//! backslash continuations, skipping blank and comment-only lines) and records
//! the indentation width of each one. The pest grammar then only ever sees a
//! single logical line.

use super::Span;

const TAB_WIDTH: usize = 8;

/// One logical line: `source[start..end]`, indented by `indent` columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogicalLine {
    pub indent: usize,
    pub start: usize,
    pub end: usize,
}

impl LogicalLine {
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutError {
    pub message: String,
    pub span: Span,
}

impl LayoutError {
    fn new(message: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            message: message.into(),
            span: Span::new(start, end),
        }
    }
}

/// Split `source` into logical lines.
pub fn logical_lines(source: &str) -> Result<Vec<LogicalLine>, LayoutError> {
    let bytes = source.as_bytes();
    let len = bytes.len();
    let mut lines = Vec::new();
    let mut pos = 0;

    while pos < len {
        let (indent, first) = measure_indent(bytes, pos);
        if first >= len {
            break;
        }
        match bytes[first] {
            b'\n' | b'\r' => {
                pos = first + 1;
                continue;
            }
            b'#' => {
                pos = skip_comment(bytes, first);
                continue;
            }
            _ => {}
        }

        let (end, next) = scan_line(bytes, first)?;
        let mut end = end;
        while end > first && matches!(bytes[end - 1], b' ' | b'\t' | b'\r' | b'\x0c') {
            end -= 1;
        }
        lines.push(LogicalLine {
            indent,
            start: first,
            end,
        });
        pos = next;
    }

    Ok(lines)
}

fn measure_indent(bytes: &[u8], mut pos: usize) -> (usize, usize) {
    let mut indent = 0;
    while pos < bytes.len() {
        match bytes[pos] {
            b' ' => indent += 1,
            b'\t' => indent = (indent / TAB_WIDTH + 1) * TAB_WIDTH,
            b'\x0c' => indent = 0,
            _ => break,
        }
        pos += 1;
    }
    (indent, pos)
}

/// Offset of the newline ending the comment at `pos` (or end of input).
fn skip_comment(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && bytes[pos] != b'\n' {
        pos += 1;
    }
    pos
}

/// Scan one logical line starting at `start`; returns (end, next line start).
fn scan_line(bytes: &[u8], start: usize) -> Result<(usize, usize), LayoutError> {
    let len = bytes.len();
    let mut open: Vec<usize> = Vec::new();
    let mut pos = start;

    while pos < len {
        match bytes[pos] {
            b'#' => {
                pos = skip_comment(bytes, pos);
                continue;
            }
            b'\'' | b'"' => {
                pos = skip_string(bytes, pos)?;
                continue;
            }
            b'(' | b'[' | b'{' => open.push(pos),
            b')' | b']' | b'}' => {
                if open.pop().is_none() {
                    return Err(LayoutError::new(
                        format!("unmatched '{}'", bytes[pos] as char),
                        pos,
                        pos + 1,
                    ));
                }
            }
            b'\\' => {
                if bytes.get(pos + 1) == Some(&b'\n') {
                    pos += 2;
                    continue;
                }
                if bytes.get(pos + 1) == Some(&b'\r') && bytes.get(pos + 2) == Some(&b'\n') {
                    pos += 3;
                    continue;
                }
            }
            b'\n' if open.is_empty() => return Ok((pos, pos + 1)),
            _ => {}
        }
        pos += 1;
    }

    match open.last() {
        Some(&bracket) => Err(LayoutError::new(
            format!("'{}' was never closed", bytes[bracket] as char),
            bracket,
            bracket + 1,
        )),
        None => Ok((len, len)),
    }
}

/// Offset just past the string literal whose opening quote is at `pos`.
fn skip_string(bytes: &[u8], pos: usize) -> Result<usize, LayoutError> {
    let quote = bytes[pos];
    let triple = bytes.get(pos + 1) == Some(&quote) && bytes.get(pos + 2) == Some(&quote);
    let mut p = if triple { pos + 3 } else { pos + 1 };

    while p < bytes.len() {
        match bytes[p] {
            b'\\' => p += 2,
            b'\n' if !triple => break,
            c if c == quote => {
                if !triple {
                    return Ok(p + 1);
                }
                if bytes.get(p + 1) == Some(&quote) && bytes.get(p + 2) == Some(&quote) {
                    return Ok(p + 3);
                }
                p += 1;
            }
            _ => p += 1,
        }
    }

    let message = if triple {
        "unterminated triple-quoted string literal"
    } else {
        "unterminated string literal"
    };
    Err(LayoutError::new(message, pos, p.min(bytes.len())))
}
