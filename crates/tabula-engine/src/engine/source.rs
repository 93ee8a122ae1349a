//! Top-level shape of cell source text.
//!
//! A cell holds either one expression or one assignment `name = expr`.
//! [`classify`] scans the text for top-level `;` and bare `=` tokens, ignoring
//! anything inside strings, comments and brackets, and reports which form it
//! has. A top-level block such as `if c { .. }` ends a statement without a
//! `;`, so code that starts right after one opens the next statement.
//! Everything else is left to the evaluator's own parser.

use std::sync::OnceLock;

use regex::Regex;

use super::value::EvalError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Statement<'a> {
    /// Only whitespace, comments or separators.
    Empty,
    /// `target = expression` with a plain identifier on the left.
    Assignment {
        target: &'a str,
        expression: &'a str,
    },
    /// Anything else, evaluated as written.
    Expression,
}

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex must compile")
    })
}

pub fn is_identifier(text: &str) -> bool {
    identifier_re().is_match(text)
}

#[derive(Default)]
struct Segment {
    start: usize,
    end: usize,
    has_code: bool,
    assigns: Vec<usize>,
}

/// Whether code right after a closed top-level block starts a new statement
/// rather than continuing the expression (`else`, operators, `.field`).
fn starts_statement(rest: &[u8]) -> bool {
    match rest.first() {
        Some(b'"' | b'\'' | b'`' | b'{' | b'#') => true,
        Some(&b) if b.is_ascii_alphanumeric() || b == b'_' => {
            let word = rest
                .iter()
                .take_while(|c| c.is_ascii_alphanumeric() || **c == b'_')
                .count();
            !matches!(&rest[..word], b"else" | b"in")
        }
        _ => false,
    }
}

/// Split `source` into top-level statements.
fn scan(source: &str) -> Vec<Segment> {
    let bytes = source.as_bytes();
    let mut segments = Vec::new();
    let mut current = Segment::default();
    let mut depth = 0usize;
    let mut block_closed = false;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let comment = b == b'/' && matches!(bytes.get(i + 1), Some(b'/' | b'*'));
        if block_closed && !comment && !b.is_ascii_whitespace() {
            block_closed = false;
            if starts_statement(&bytes[i..]) {
                current.end = i;
                segments.push(std::mem::take(&mut current));
                current.start = i;
            }
        }
        match b {
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    i += 1;
                }
                i += 2;
                continue;
            }
            b'"' | b'\'' | b'`' => {
                current.has_code = true;
                i += 1;
                while i < bytes.len() && bytes[i] != b {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
                i += 1;
                continue;
            }
            b'(' | b'[' | b'{' => {
                current.has_code = true;
                depth += 1;
            }
            b')' | b']' | b'}' => {
                current.has_code = true;
                depth = depth.saturating_sub(1);
                block_closed = b == b'}' && depth == 0;
            }
            b';' if depth == 0 => {
                current.end = i;
                segments.push(std::mem::take(&mut current));
                current.start = i + 1;
            }
            b'=' if depth == 0 => {
                current.has_code = true;
                let prev = i.checked_sub(1).map(|p| bytes[p]);
                let next = bytes.get(i + 1).copied();
                let compound = matches!(
                    prev,
                    Some(b'=' | b'!' | b'<' | b'>' | b'+' | b'-' | b'*' | b'/' | b'%' | b'|' | b'&' | b'^')
                );
                if !compound && !matches!(next, Some(b'=' | b'>')) {
                    current.assigns.push(i);
                }
            }
            _ if !b.is_ascii_whitespace() => current.has_code = true,
            _ => {}
        }
        i += 1;
    }
    current.end = source.len();
    segments.push(current);
    segments.retain(|s| s.has_code);
    segments
}

/// Decide whether `source` is empty, a single assignment or an expression.
///
/// More than one statement, or an assignment with more than one target, is
/// a parse error.
pub fn classify(source: &str) -> Result<Statement<'_>, EvalError> {
    let segments = scan(source);
    let segment = match segments.as_slice() {
        [] => return Ok(Statement::Empty),
        [segment] => segment,
        _ => return Err(EvalError::parse("More than one expression or assignment.")),
    };

    let Some(&first) = segment.assigns.first() else {
        return Ok(Statement::Expression);
    };
    let target = source[segment.start..first].trim();
    if target.starts_with("let ") || target.starts_with("const ") {
        return Ok(Statement::Expression);
    }
    if target.contains(',') || segment.assigns.len() > 1 {
        return Err(EvalError::parse("More than one assignment target."));
    }
    if !is_identifier(target) {
        return Ok(Statement::Expression);
    }
    let expression = source[first + 1..segment.end].trim();
    if expression.is_empty() {
        return Err(EvalError::parse(format!("Missing expression after '{} ='.", target)));
    }
    Ok(Statement::Assignment { target, expression })
}
