use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VmErrorKind {
    DivisionByZero,
    IndexOutOfRange,
    NullDereference,
    TypeCast,
    StackOverflow,
    UserThrown,
    Cancelled,
    Internal,
}

impl VmErrorKind {
    /// Exception class raised inside the VM for a fault of this kind.
    pub fn exception_name(self) -> &'static str {
        match self {
            VmErrorKind::DivisionByZero => "DivideByZeroException",
            VmErrorKind::IndexOutOfRange => "IndexOutOfRangeException",
            VmErrorKind::NullDereference => "NullReferenceException",
            VmErrorKind::TypeCast => "InvalidCastException",
            VmErrorKind::StackOverflow => "StackOverflowException",
            VmErrorKind::Cancelled => CANCELLATION_CLASS,
            VmErrorKind::UserThrown | VmErrorKind::Internal => "InvalidOperationException",
        }
    }

    pub fn from_exception_name(name: &str) -> Self {
        match name {
            "DivideByZeroException" => VmErrorKind::DivisionByZero,
            "IndexOutOfRangeException" => VmErrorKind::IndexOutOfRange,
            "NullReferenceException" => VmErrorKind::NullDereference,
            "InvalidCastException" => VmErrorKind::TypeCast,
            "StackOverflowException" => VmErrorKind::StackOverflow,
            CANCELLATION_CLASS => VmErrorKind::Cancelled,
            _ => VmErrorKind::UserThrown,
        }
    }
}

/// Class of the value thrown when a run is cancelled. No catch clause matches
/// it, so only finally blocks run while it unwinds.
pub const CANCELLATION_CLASS: &str = "$Cancellation";

/// One line of a runtime stack trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub function: String,
    pub line: Option<u32>,
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "at {} (line {line})", self.function),
            None => write!(f, "at {}", self.function),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct VmError {
    pub kind: VmErrorKind,
    pub message: String,
    pub stack: Vec<TraceFrame>,
}

impl VmError {
    pub fn new(kind: VmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stack: Vec::new(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(VmErrorKind::Internal, message)
    }

    pub fn with_stack(mut self, stack: Vec<TraceFrame>) -> Self {
        self.stack = stack;
        self
    }

    /// Message followed by one indented line per trace frame.
    pub fn render(&self) -> String {
        let mut out = format!("{self}");
        for frame in &self.stack {
            out.push_str("\n    ");
            out.push_str(&frame.to_string());
        }
        out
    }
}

pub type VmResult<T> = Result<T, VmError>;
