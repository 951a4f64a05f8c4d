//=====================================================
// File: ast/mod.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Strata Abstract Syntax Tree definitions
// Objective: Define AST node types for programs, declarations, statements,
//            expressions, patterns and type annotations
//=====================================================

use std::fmt;

use serde::Serialize;

use crate::symbol::Symbol;
use crate::tokenizer::{Position, SyntaxLevel};

/// Identifier of an expression within one parse; the checker keys its
/// annotations by it.
pub type NodeId = u32;

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

//=====================================================
// Types
//=====================================================

/// A type annotation as written in source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TypeExpr {
    Named { name: Symbol, args: Vec<TypeExpr> },
    Array(Box<TypeExpr>),
    Nullable(Box<TypeExpr>),
    Tuple(Vec<TypeExpr>),
}

impl TypeExpr {
    pub fn named(name: impl Into<Symbol>) -> Self {
        TypeExpr::Named {
            name: name.into(),
            args: Vec::new(),
        }
    }
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeExpr::Named { name, args } if args.is_empty() => write!(f, "{name}"),
            TypeExpr::Named { name, args } => {
                let parts: Vec<String> = args.iter().map(ToString::to_string).collect();
                write!(f, "{name}<{}>", parts.join(", "))
            }
            TypeExpr::Array(inner) => write!(f, "{inner}[]"),
            TypeExpr::Nullable(inner) => write!(f, "{inner}?"),
            TypeExpr::Tuple(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "({})", parts.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Constraint {
    Class,
    Struct,
    New,
    Type(TypeExpr),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeParam {
    pub name: Symbol,
    pub constraints: Vec<Constraint>,
}

//=====================================================
// Expressions
//=====================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Literal {
    Integer(i64),
    Float(f64),
    Decimal(f64),
    String(String),
    Char(char),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    Eq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Compare,
    In,
    NotIn,
    Subset,
    SubsetEq,
    Union,
    Intersect,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEq => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEq => ">=",
            BinaryOp::Compare => "<=>",
            BinaryOp::In => "∈",
            BinaryOp::NotIn => "∉",
            BinaryOp::Subset => "⊂",
            BinaryOp::SubsetEq => "⊆",
            BinaryOp::Union => "∪",
            BinaryOp::Intersect => "∩",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Less | BinaryOp::LessEq | BinaryOp::Greater | BinaryOp::GreaterEq
        )
    }

    pub fn is_equality(self) -> bool {
        matches!(self, BinaryOp::Eq | BinaryOp::NotEq)
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod | BinaryOp::Pow
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogicalOp {
    And,
    Or,
    Coalesce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    BitNot,
    Sqrt,
    Await,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Coalesce,
}

impl AssignOp {
    /// Arithmetic operator applied by a compound assignment.
    pub fn binary(self) -> Option<BinaryOp> {
        match self {
            AssignOp::Add => Some(BinaryOp::Add),
            AssignOp::Sub => Some(BinaryOp::Sub),
            AssignOp::Mul => Some(BinaryOp::Mul),
            AssignOp::Div => Some(BinaryOp::Div),
            AssignOp::Mod => Some(BinaryOp::Mod),
            AssignOp::Assign | AssignOp::Coalesce => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum InterpolationSegment {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum LambdaBody {
    Expr(Box<Expr>),
    Block(Vec<Stmt>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwitchArm {
    pub pattern: Pattern,
    pub guard: Option<Expr>,
    pub body: Expr,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Expr {
    pub id: NodeId,
    pub kind: ExprKind,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ExprKind {
    Literal(Literal),
    Identifier(Symbol),
    Interpolated(Vec<InterpolationSegment>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// `++x`, `x--` and friends.
    Update {
        increment: bool,
        prefix: bool,
        target: Box<Expr>,
    },
    Assign {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Conditional {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        type_args: Vec<TypeExpr>,
        args: Vec<Expr>,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
        null_safe: bool,
    },
    Member {
        target: Box<Expr>,
        name: Symbol,
        null_safe: bool,
    },
    Lambda {
        params: Vec<Param>,
        return_type: Option<TypeExpr>,
        body: LambdaBody,
    },
    Array(Vec<Expr>),
    Tuple(Vec<Expr>),
    Range {
        start: Box<Expr>,
        end: Box<Expr>,
    },
    New {
        ty: TypeExpr,
        args: Vec<Expr>,
    },
    This,
    Base,
    Is {
        value: Box<Expr>,
        pattern: Box<Pattern>,
    },
    As {
        value: Box<Expr>,
        ty: TypeExpr,
    },
    Switch {
        subject: Box<Expr>,
        arms: Vec<SwitchArm>,
    },
}

impl Expr {
    pub fn is_literal(&self) -> bool {
        matches!(self.kind, ExprKind::Literal(_))
    }

    pub fn as_literal(&self) -> Option<&Literal> {
        match &self.kind {
            ExprKind::Literal(literal) => Some(literal),
            _ => None,
        }
    }
}

//=====================================================
// Patterns
//=====================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pattern {
    pub kind: PatternKind,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PatternKind {
    Wildcard,
    Constant(Expr),
    Relational {
        op: BinaryOp,
        value: Expr,
    },
    Var(Symbol),
    Type {
        ty: TypeExpr,
        binding: Option<Symbol>,
    },
    Property {
        ty: Option<TypeExpr>,
        fields: Vec<(Symbol, Pattern)>,
        binding: Option<Symbol>,
    },
    Tuple(Vec<Pattern>),
    List {
        before: Vec<Pattern>,
        /// `..` appeared between `before` and `after`.
        rest: bool,
        after: Vec<Pattern>,
    },
    Not(Box<Pattern>),
}

impl Pattern {
    /// Matches every value without testing it.
    pub fn is_irrefutable(&self) -> bool {
        matches!(self.kind, PatternKind::Wildcard | PatternKind::Var(_))
    }
}

//=====================================================
// Declarations
//=====================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Param {
    pub name: Symbol,
    pub ty: Option<TypeExpr>,
    pub default: Option<Expr>,
    pub variadic: bool,
    pub position: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Modifiers {
    pub is_static: bool,
    pub is_abstract: bool,
    pub is_virtual: bool,
    pub is_override: bool,
    pub is_async: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FunctionBody {
    Block(Vec<Stmt>),
    Expr(Box<Expr>),
    /// Abstract and interface members.
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDecl {
    pub id: NodeId,
    pub name: Symbol,
    pub type_params: Vec<TypeParam>,
    pub params: Vec<Param>,
    pub return_type: Option<TypeExpr>,
    pub body: FunctionBody,
    pub modifiers: Modifiers,
    /// `static T operator +(...)` overloads carry the operator symbol.
    pub operator: Option<BinaryOp>,
    pub doc: Option<String>,
    pub position: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeclKind {
    Var,
    Let,
    Const,
    /// `int x = ...` with an explicit leading type.
    Typed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VarDecl {
    pub kind: DeclKind,
    pub name: Symbol,
    pub ty: Option<TypeExpr>,
    pub init: Option<Expr>,
    pub mutable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDecl {
    pub name: Symbol,
    pub ty: Option<TypeExpr>,
    pub init: Option<Expr>,
    pub is_static: bool,
    pub is_const: bool,
    /// Declared as an auto-property `{ get; set; }`.
    pub is_property: bool,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConstructorDecl {
    pub params: Vec<Param>,
    pub base_args: Option<Vec<Expr>>,
    pub body: Vec<Stmt>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ClassMember {
    Field(FieldDecl),
    Method(FunctionDecl),
    Constructor(ConstructorDecl),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassDecl {
    pub name: Symbol,
    pub type_params: Vec<TypeParam>,
    /// Base class and implemented interfaces, in source order.
    pub bases: Vec<TypeExpr>,
    pub members: Vec<ClassMember>,
    pub is_abstract: bool,
    pub doc: Option<String>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterfaceDecl {
    pub name: Symbol,
    pub type_params: Vec<TypeParam>,
    pub bases: Vec<TypeExpr>,
    pub methods: Vec<FunctionDecl>,
    pub properties: Vec<FieldDecl>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnumDecl {
    pub name: Symbol,
    pub variants: Vec<(Symbol, Option<i64>)>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleDecl {
    pub name: Symbol,
    pub body: Vec<Stmt>,
    pub position: Position,
}

//=====================================================
// Statements
//=====================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatchClause {
    pub ty: Option<Symbol>,
    pub name: Option<Symbol>,
    pub body: Vec<Stmt>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseLabel {
    pub pattern: Pattern,
    pub guard: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwitchCase {
    /// Empty for the `default:` section.
    pub labels: Vec<CaseLabel>,
    pub is_default: bool,
    pub body: Vec<Stmt>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AsmOperand {
    Number(f64),
    Name(String),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AsmLine {
    pub label: Option<String>,
    pub mnemonic: Option<String>,
    pub operands: Vec<AsmOperand>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AsmBlock {
    pub level: SyntaxLevel,
    pub lines: Vec<AsmLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stmt {
    pub kind: StmtKind,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StmtKind {
    Var(VarDecl),
    Function(FunctionDecl),
    Class(ClassDecl),
    Interface(InterfaceDecl),
    Enum(EnumDecl),
    Module(ModuleDecl),
    Expr(Expr),
    /// `set x to e`: assigns an existing variable or declares a new one.
    Set {
        name: Symbol,
        value: Expr,
    },
    Block(Vec<Stmt>),
    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    While {
        condition: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        condition: Expr,
    },
    For {
        init: Option<Box<Stmt>>,
        condition: Option<Expr>,
        update: Vec<Expr>,
        body: Box<Stmt>,
    },
    Foreach {
        var: Symbol,
        var_type: Option<TypeExpr>,
        iterable: Expr,
        body: Box<Stmt>,
    },
    Repeat {
        count: Expr,
        body: Box<Stmt>,
    },
    Iterate {
        var: Symbol,
        start: Expr,
        end: Expr,
        step: Option<Expr>,
        body: Box<Stmt>,
    },
    Forever(Box<Stmt>),
    /// `parallel for ...`; iterations run in order inside one VM.
    Parallel(Box<Stmt>),
    Switch {
        subject: Expr,
        cases: Vec<SwitchCase>,
    },
    Try {
        body: Vec<Stmt>,
        catches: Vec<CatchClause>,
        finally: Option<Vec<Stmt>>,
    },
    /// `throw;` without a value rethrows inside a catch clause.
    Throw(Option<Expr>),
    Return(Option<Expr>),
    Break,
    Continue,
    Asm(AsmBlock),
}

impl Stmt {
    /// Control never falls through this statement.
    pub fn diverges(&self) -> bool {
        match &self.kind {
            StmtKind::Return(_) | StmtKind::Throw(_) | StmtKind::Break | StmtKind::Continue => true,
            StmtKind::Block(stmts) => stmts.last().is_some_and(Stmt::diverges),
            StmtKind::If {
                then_branch,
                else_branch: Some(else_branch),
                ..
            } => then_branch.diverges() && else_branch.diverges(),
            _ => false,
        }
    }
}
