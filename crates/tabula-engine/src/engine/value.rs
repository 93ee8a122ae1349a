//! Evaluation results.
//!
//! Evaluation never fails the caller. Whatever happens inside the evaluator
//! comes back as a [`CellValue`], either an ordinary value or a tagged error.

use std::fmt;

use rhai::Dynamic;

use super::format::format_dynamic;

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum EvalErrorKind {
    Parse,
    Runtime,
    Timeout,
    Circular,
}

impl EvalErrorKind {
    /// Short marker shown in place of a value.
    pub fn tag(self) -> &'static str {
        match self {
            EvalErrorKind::Parse => "#PARSE!",
            EvalErrorKind::Runtime => "#ERR!",
            EvalErrorKind::Timeout => "#TIMEOUT!",
            EvalErrorKind::Circular => "#CYCLE!",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EvalError {
    pub kind: EvalErrorKind,
    pub message: String,
}

impl EvalError {
    pub fn new(kind: EvalErrorKind, message: impl Into<String>) -> Self {
        EvalError {
            kind,
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        EvalError::new(EvalErrorKind::Parse, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        EvalError::new(EvalErrorKind::Runtime, message)
    }

    pub fn timeout(seconds: f64) -> Self {
        EvalError::new(EvalErrorKind::Timeout, format!("Timeout after {} s.", seconds))
    }

    pub fn circular(message: impl Into<String>) -> Self {
        EvalError::new(EvalErrorKind::Circular, message)
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            f.write_str(self.kind.tag())
        } else {
            write!(f, "{} {}", self.kind.tag(), self.message)
        }
    }
}

impl std::error::Error for EvalError {}

pub type EvalResult = Result<Dynamic, EvalError>;

/// Result of reading a cell.
#[derive(Clone, Debug)]
pub enum CellValue {
    Value(Dynamic),
    Error(EvalError),
}

impl CellValue {
    pub fn is_error(&self) -> bool {
        matches!(self, CellValue::Error(_))
    }

    pub fn as_error(&self) -> Option<&EvalError> {
        match self {
            CellValue::Error(err) => Some(err),
            CellValue::Value(_) => None,
        }
    }

    pub fn as_dynamic(&self) -> Option<&Dynamic> {
        match self {
            CellValue::Value(value) => Some(value),
            CellValue::Error(_) => None,
        }
    }

    /// Display text for the value.
    pub fn render(&self) -> String {
        match self {
            CellValue::Value(value) => format_dynamic(value),
            CellValue::Error(err) => err.to_string(),
        }
    }
}

impl From<EvalResult> for CellValue {
    fn from(result: EvalResult) -> Self {
        match result {
            Ok(value) => CellValue::Value(value),
            Err(err) => CellValue::Error(err),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_values_render_with_tag() {
        let value = CellValue::from(Err(EvalError::runtime("Variable not found: q")));
        assert!(value.is_error());
        assert_eq!(value.render(), "#ERR! Variable not found: q");
    }

    #[test]
    fn test_timeout_message() {
        let err = EvalError::timeout(2.5);
        assert_eq!(err.kind, EvalErrorKind::Timeout);
        assert_eq!(err.message, "Timeout after 2.5 s.");
    }

    #[test]
    fn test_plain_values_render_like_format_dynamic() {
        let value = CellValue::from(Ok(Dynamic::from(6_i64)));
        assert_eq!(value.render(), "6");
        assert!(value.as_error().is_none());
    }
}
