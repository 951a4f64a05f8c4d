//=====================================================
// File: diagnostics.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Uniform diagnostics for every pipeline stage
// Objective: Flatten lexer, parser, checker and VM errors into one record
//            with a stable error code for terminal and JSON output
//=====================================================

use std::fmt;

use serde::Serialize;
use strata_core::vm::error::{VmError, VmErrorKind};

use crate::checker::{TypeError, TypeErrorKind};
use crate::parser::ParseError;
use crate::tokenizer::LexError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => f.write_str("error"),
            Severity::Warning => f.write_str("warning"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Lex,
    Syntax,
    TypeMismatch,
    UndefinedSymbol,
    ArityMismatch,
    UnsatisfiedConstraint,
    NullSafetyViolation,
    UnreachableCode,
    Redeclaration,
    InvalidAssignment,
    MissingReturn,
    DivisionByZero,
    IndexOutOfRange,
    NullDereference,
    InvalidCast,
    StackOverflow,
    Uncaught,
    Cancelled,
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Lex => "E001",
            ErrorCode::Syntax => "E002",
            ErrorCode::TypeMismatch => "E101",
            ErrorCode::UndefinedSymbol => "E102",
            ErrorCode::ArityMismatch => "E103",
            ErrorCode::UnsatisfiedConstraint => "E104",
            ErrorCode::NullSafetyViolation => "E105",
            ErrorCode::UnreachableCode => "E106",
            ErrorCode::Redeclaration => "E107",
            ErrorCode::InvalidAssignment => "E108",
            ErrorCode::MissingReturn => "E109",
            ErrorCode::DivisionByZero => "E301",
            ErrorCode::IndexOutOfRange => "E302",
            ErrorCode::NullDereference => "E303",
            ErrorCode::InvalidCast => "E304",
            ErrorCode::StackOverflow => "E305",
            ErrorCode::Uncaught => "E306",
            ErrorCode::Cancelled => "E307",
            ErrorCode::Internal => "E399",
        }
    }
}

impl From<TypeErrorKind> for ErrorCode {
    fn from(kind: TypeErrorKind) -> Self {
        match kind {
            TypeErrorKind::TypeMismatch => ErrorCode::TypeMismatch,
            TypeErrorKind::UndefinedSymbol => ErrorCode::UndefinedSymbol,
            TypeErrorKind::ArityMismatch => ErrorCode::ArityMismatch,
            TypeErrorKind::UnsatisfiedConstraint => ErrorCode::UnsatisfiedConstraint,
            TypeErrorKind::NullSafetyViolation => ErrorCode::NullSafetyViolation,
            TypeErrorKind::UnreachableCode => ErrorCode::UnreachableCode,
            TypeErrorKind::Redeclaration => ErrorCode::Redeclaration,
            TypeErrorKind::InvalidAssignment => ErrorCode::InvalidAssignment,
            TypeErrorKind::MissingReturn => ErrorCode::MissingReturn,
        }
    }
}

impl From<VmErrorKind> for ErrorCode {
    fn from(kind: VmErrorKind) -> Self {
        match kind {
            VmErrorKind::DivisionByZero => ErrorCode::DivisionByZero,
            VmErrorKind::IndexOutOfRange => ErrorCode::IndexOutOfRange,
            VmErrorKind::NullDereference => ErrorCode::NullDereference,
            VmErrorKind::TypeCast => ErrorCode::InvalidCast,
            VmErrorKind::StackOverflow => ErrorCode::StackOverflow,
            VmErrorKind::UserThrown => ErrorCode::Uncaught,
            VmErrorKind::Cancelled => ErrorCode::Cancelled,
            VmErrorKind::Internal => ErrorCode::Internal,
        }
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One reportable problem, whatever stage produced it. Runtime errors have
/// no source position and report line 0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub line: usize,
    pub column: usize,
    pub severity: Severity,
    pub message: String,
    pub kind: String,
    pub code: ErrorCode,
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line > 0 {
            write!(f, "{}:{}: ", self.line, self.column)?;
        }
        write!(
            f,
            "{}[{}] {}: {}",
            self.severity,
            self.code.as_str(),
            self.kind,
            self.message
        )
    }
}

impl From<&LexError> for Diagnostic {
    fn from(error: &LexError) -> Self {
        Diagnostic {
            line: error.line,
            column: error.column,
            severity: Severity::Error,
            message: error.reason.clone(),
            kind: "LexError".to_string(),
            code: ErrorCode::Lex,
        }
    }
}

impl From<&ParseError> for Diagnostic {
    fn from(error: &ParseError) -> Self {
        Diagnostic {
            line: error.line,
            column: error.column,
            severity: Severity::Error,
            message: format!("expected {}, found {}", error.expected, error.found),
            kind: "ParseError".to_string(),
            code: ErrorCode::Syntax,
        }
    }
}

impl From<&TypeError> for Diagnostic {
    fn from(error: &TypeError) -> Self {
        Diagnostic {
            line: error.line,
            column: error.column,
            severity: error.severity(),
            message: error.message.clone(),
            kind: format!("{:?}", error.kind),
            code: error.kind.into(),
        }
    }
}

impl From<&VmError> for Diagnostic {
    fn from(error: &VmError) -> Self {
        let line = error
            .stack
            .first()
            .and_then(|frame| frame.line)
            .map_or(0, |line| line as usize);
        Diagnostic {
            line,
            column: 0,
            severity: Severity::Error,
            message: error.render(),
            kind: error.kind.exception_name().to_string(),
            code: error.kind.into(),
        }
    }
}

/// Renders diagnostics one per line, or as a JSON array.
pub fn render(diagnostics: &[Diagnostic], json: bool) -> String {
    if json {
        return serde_json::to_string_pretty(diagnostics).unwrap_or_else(|_| "[]".to_string());
    }
    diagnostics
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::Position;

    #[test]
    fn codes_are_grouped_by_stage() {
        assert_eq!(ErrorCode::Lex.as_str(), "E001");
        assert_eq!(ErrorCode::Syntax.as_str(), "E002");
        assert!(ErrorCode::from(TypeErrorKind::MissingReturn).as_str().starts_with("E1"));
        assert!(ErrorCode::from(VmErrorKind::StackOverflow).as_str().starts_with("E3"));
    }

    #[test]
    fn parse_errors_keep_their_position() {
        let error = ParseError::new("'}'", "expression", Position::new(3, 7, 0));
        let diagnostic = Diagnostic::from(&error);
        assert_eq!((diagnostic.line, diagnostic.column), (3, 7));
        assert_eq!(diagnostic.to_string(), "3:7: error[E002] ParseError: expected expression, found '}'");
    }

    #[test]
    fn json_output_uses_string_codes() {
        let error = VmError::new(VmErrorKind::DivisionByZero, "division by zero");
        let rendered = render(&[Diagnostic::from(&error)], true);
        let value: serde_json::Value = serde_json::from_str(&rendered).expect("valid json");
        assert_eq!(value[0]["code"], "E301");
        assert_eq!(value[0]["severity"], "error");
        assert_eq!(value[0]["kind"], "DivideByZeroException");
    }
}
