//=====================================================
// File: tokenizer/token.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Token model for the Strata lexer
// Objective: Positions, syntax levels, literal payloads and token kinds
//=====================================================

use std::fmt;

use serde::Serialize;

/// Represents the position of a token in the source code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl Position {
    pub fn new(line: usize, column: usize, offset: usize) -> Self {
        Self {
            line,
            column,
            offset,
        }
    }
}

/// Syntax level active when a token was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum SyntaxLevel {
    High,
    #[default]
    Medium,
    Low,
    Asm,
    AsmSpirv,
}

impl SyntaxLevel {
    pub fn is_asm(self) -> bool {
        matches!(self, SyntaxLevel::Asm | SyntaxLevel::AsmSpirv)
    }
}

impl fmt::Display for SyntaxLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyntaxLevel::High => "@high",
            SyntaxLevel::Medium => "@medium",
            SyntaxLevel::Low => "@low",
            SyntaxLevel::Asm => "@asm",
            SyntaxLevel::AsmSpirv => "@asm spirv",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NumericSuffix {
    Float,
    Double,
    Decimal,
}

/// Numeric literal in canonical form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NumberLiteral {
    pub value: f64,
    /// No fraction, exponent or suffix was written.
    pub is_integer: bool,
    pub suffix: Option<NumericSuffix>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum InterpolationPart {
    Literal(String),
    /// Tokens of an embedded expression, terminated by `Eof`.
    Expression(Vec<Token>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MathSymbol {
    Pi,
    Tau,
    Infinity,
    Euler,
    Sum,
    Product,
    Integral,
    Partial,
    Nabla,
    ElementOf,
    NotElementOf,
    Subset,
    SubsetEq,
    Union,
    Intersection,
    Sqrt,
    LessEq,
    GreaterEq,
    NotEq,
    Times,
    Divide,
}

impl MathSymbol {
    pub fn from_char(ch: char) -> Option<Self> {
        let symbol = match ch {
            'π' => MathSymbol::Pi,
            'τ' => MathSymbol::Tau,
            '∞' => MathSymbol::Infinity,
            'ℯ' => MathSymbol::Euler,
            '∑' => MathSymbol::Sum,
            '∏' => MathSymbol::Product,
            '∫' => MathSymbol::Integral,
            '∂' => MathSymbol::Partial,
            '∇' => MathSymbol::Nabla,
            '∈' => MathSymbol::ElementOf,
            '∉' => MathSymbol::NotElementOf,
            '⊂' => MathSymbol::Subset,
            '⊆' => MathSymbol::SubsetEq,
            '∪' => MathSymbol::Union,
            '∩' => MathSymbol::Intersection,
            '√' => MathSymbol::Sqrt,
            '≤' => MathSymbol::LessEq,
            '≥' => MathSymbol::GreaterEq,
            '≠' => MathSymbol::NotEq,
            '×' => MathSymbol::Times,
            '÷' => MathSymbol::Divide,
            _ => return None,
        };
        Some(symbol)
    }

    /// Numeric value of constant symbols.
    pub fn constant_value(self) -> Option<f64> {
        match self {
            MathSymbol::Pi => Some(std::f64::consts::PI),
            MathSymbol::Tau => Some(std::f64::consts::TAU),
            MathSymbol::Infinity => Some(f64::INFINITY),
            MathSymbol::Euler => Some(std::f64::consts::E),
            _ => None,
        }
    }
}

/// All token kinds produced by the lexer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TokenKind {
    // Literals
    Number(NumberLiteral),
    Str(String),
    Char(char),
    InterpolatedString(Vec<InterpolationPart>),
    True,
    False,
    Null,

    Identifier(String),
    /// Built-in type keyword, normalised (`i32` becomes `int`).
    PrimitiveType(String),

    // Keywords
    Var,
    Let,
    Const,
    Function,
    Fn,
    Mut,
    Class,
    Interface,
    Enum,
    Module,
    If,
    Else,
    While,
    Do,
    For,
    Foreach,
    In,
    Switch,
    Match,
    Case,
    Default,
    Try,
    Catch,
    Finally,
    Throw,
    Return,
    Break,
    Continue,
    New,
    This,
    Base,
    Is,
    As,
    Where,
    When,
    Params,
    Static,
    Abstract,
    Virtual,
    Override,
    Public,
    Private,
    Protected,
    Readonly,
    Async,
    Await,
    Operator,
    Repeat,
    Times,
    Iterate,
    Forever,
    Parallel,

    // @high keywords
    Set,
    To,
    Display,
    Then,
    Otherwise,
    End,

    // Operators
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Percent,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    NullCoalesceAssign,
    EqualEqual,
    NotEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    Spaceship,
    AndAnd,
    OrOr,
    Bang,
    Tilde,
    Amp,
    Pipe,
    Caret,
    PlusPlus,
    MinusMinus,
    Question,
    NullCoalesce,
    QuestionDot,
    QuestionBracket,
    Arrow,
    FatArrow,
    DotDot,
    Dot,

    // Delimiters
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Comma,
    Semicolon,
    Colon,

    MathSymbol(MathSymbol),
    LevelMarker(SyntaxLevel),
    /// Opaque word inside an assembly block.
    AsmText(String),
    /// Line break, only emitted inside assembly blocks.
    Newline,
    Eof,
}

impl TokenKind {
    /// Keywords that may start a statement; used for error recovery.
    pub fn starts_statement(&self) -> bool {
        matches!(
            self,
            TokenKind::Var
                | TokenKind::Let
                | TokenKind::Const
                | TokenKind::Function
                | TokenKind::Fn
                | TokenKind::Class
                | TokenKind::Interface
                | TokenKind::Enum
                | TokenKind::Module
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Do
                | TokenKind::For
                | TokenKind::Foreach
                | TokenKind::Switch
                | TokenKind::Try
                | TokenKind::Throw
                | TokenKind::Return
                | TokenKind::Break
                | TokenKind::Continue
                | TokenKind::Repeat
                | TokenKind::Iterate
                | TokenKind::Forever
                | TokenKind::Parallel
                | TokenKind::Set
                | TokenKind::Display
                | TokenKind::LevelMarker(_)
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Number(n) => write!(f, "{}", n.value),
            TokenKind::Str(s) => write!(f, "\"{}\"", s),
            TokenKind::Char(c) => write!(f, "'{}'", c),
            TokenKind::InterpolatedString(_) => write!(f, "interpolated string"),
            TokenKind::Identifier(s) | TokenKind::PrimitiveType(s) | TokenKind::AsmText(s) => {
                write!(f, "{}", s)
            }
            TokenKind::LevelMarker(level) => write!(f, "{}", level),
            TokenKind::Eof => write!(f, "end of input"),
            TokenKind::Newline => write!(f, "newline"),
            TokenKind::Semicolon => write!(f, "';'"),
            TokenKind::LeftBrace => write!(f, "'{{'"),
            TokenKind::RightBrace => write!(f, "'}}'"),
            TokenKind::LeftParen => write!(f, "'('"),
            TokenKind::RightParen => write!(f, "')'"),
            _ => write!(f, "{:?}", self),
        }
    }
}

/// A token with its kind, source text and position information
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub position: Position,
    pub level: SyntaxLevel,
    /// Text of `///` comments directly preceding the token.
    pub doc: Option<String>,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, position: Position, level: SyntaxLevel) -> Self {
        Self {
            kind,
            lexeme: lexeme.into(),
            position,
            level,
            doc: None,
        }
    }

    pub fn line(&self) -> usize {
        self.position.line
    }

    pub fn column(&self) -> usize {
        self.position.column
    }
}
