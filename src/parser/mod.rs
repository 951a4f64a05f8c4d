//=============================================
// strata/parser/mod.rs
//=============================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Strata recursive descent and precedence-climbing parser
// Objective: Transform token streams of every syntax level into AST nodes
//            consumed by the checker, collecting all errors in one pass
//=============================================

//=============================================
//            Section 1: Imports & Submodules
//=============================================

mod asm;
mod decl;
mod expr;
mod patterns;
mod stmt;
mod types;

use serde::Serialize;
use thiserror::Error;

use crate::ast::{Expr, ExprKind, NodeId, Program};
use crate::tokenizer::{Position, SyntaxLevel, Token, TokenKind};

/// Nesting limit for expressions; deeper input is reported instead of
/// overflowing the native stack.
pub const MAX_EXPRESSION_DEPTH: usize = 256;

/// Tokens examined when deciding whether `f<...>(` is a generic call.
pub const MAX_GENERIC_LOOKAHEAD: usize = 32;

//=============================================
//            Section 2: Parse Errors
//=============================================

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{line}:{column}: expected {expected}, found {found}")]
pub struct ParseError {
    pub found: String,
    pub expected: String,
    pub line: usize,
    pub column: usize,
}

impl ParseError {
    pub fn new(found: impl Into<String>, expected: impl Into<String>, position: Position) -> Self {
        Self {
            found: found.into(),
            expected: expected.into(),
            line: position.line,
            column: position.column,
        }
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Parses a token stream into a program, reporting every error found.
pub fn parse(tokens: Vec<Token>) -> Result<Program, Vec<ParseError>> {
    Parser::new(tokens).parse()
}

//=============================================
//            Section 3: Parser State
//=============================================

/// Recursive descent parser for Strata
pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    expr_depth: usize,
    next_id: NodeId,
    loop_depth: usize,
    switch_depth: usize,
    errors: Vec<ParseError>,
}

impl Parser {
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if tokens.last().is_none_or(|token| token.kind != TokenKind::Eof) {
            let position = tokens.last().map(|token| token.position).unwrap_or_default();
            tokens.push(Token::new(TokenKind::Eof, "", position, SyntaxLevel::Medium));
        }
        Self {
            tokens,
            current: 0,
            expr_depth: 0,
            next_id: 0,
            loop_depth: 0,
            switch_depth: 0,
            errors: Vec::new(),
        }
    }

    //Function: parse
    //Purpose: Consume tokens and produce a Strata program AST
    //Inputs: &mut self
    //Returns: Result<Program, Vec<ParseError>>
    pub fn parse(&mut self) -> Result<Program, Vec<ParseError>> {
        let mut statements = Vec::new();
        while !self.is_at_end() {
            if self.check(&TokenKind::RightBrace) {
                let token = self.advance().clone();
                self.errors
                    .push(ParseError::new(token.lexeme, "statement", token.position));
                continue;
            }
            if let Some(stmt) = self.parse_statement_recovering() {
                statements.push(stmt);
            }
        }
        tracing::debug!(
            statements = statements.len(),
            errors = self.errors.len(),
            "parsed program"
        );
        if self.errors.is_empty() {
            Ok(Program { statements })
        } else {
            Err(std::mem::take(&mut self.errors))
        }
    }

    /// Parses a single expression followed by end of input.
    pub fn parse_expression_only(&mut self) -> ParseResult<Expr> {
        let expr = self.parse_expression()?;
        if !self.is_at_end() {
            return Err(self.error_here("end of expression"));
        }
        Ok(expr)
    }

    /// Statement with error recovery: on failure the error is recorded and
    /// the cursor skips to the next statement boundary.
    fn parse_statement_recovering(&mut self) -> Option<crate::ast::Stmt> {
        let start = self.current;
        match self.parse_statement() {
            Ok(stmt) => Some(stmt),
            Err(err) => {
                self.errors.push(err);
                if self.current == start {
                    self.advance();
                }
                self.synchronize();
                None
            }
        }
    }

    fn synchronize(&mut self) {
        while !self.is_at_end() {
            if self.previous().kind == TokenKind::Semicolon {
                return;
            }
            let kind = &self.peek().kind;
            if kind.starts_statement() || *kind == TokenKind::RightBrace {
                return;
            }
            self.advance();
        }
    }

    //=============================================
    //            Section 4: Token Navigation
    //=============================================

    fn peek(&self) -> &Token {
        let index = self.current.min(self.tokens.len() - 1);
        &self.tokens[index]
    }

    fn peek_at(&self, distance: usize) -> &Token {
        let index = (self.current + distance).min(self.tokens.len() - 1);
        &self.tokens[index]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn check_at(&self, distance: usize, kind: &TokenKind) -> bool {
        &self.peek_at(distance).kind == kind
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: &TokenKind, expected: &str) -> ParseResult<Token> {
        if self.check(kind) {
            Ok(self.advance().clone())
        } else {
            Err(self.error_here(expected))
        }
    }

    fn consume_identifier(&mut self, expected: &str) -> ParseResult<crate::symbol::Symbol> {
        match &self.peek().kind {
            TokenKind::Identifier(name) => {
                let name = crate::symbol::Symbol::from(name.as_str());
                self.advance();
                Ok(name)
            }
            _ => Err(self.error_here(expected)),
        }
    }

    fn error_here(&self, expected: &str) -> ParseError {
        let token = self.peek();
        let found = if token.kind == TokenKind::Eof {
            "end of input".to_string()
        } else {
            token.lexeme.clone()
        };
        ParseError::new(found, expected, token.position)
    }

    fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn current_position(&self) -> Position {
        self.peek().position
    }

    /// Statement terminator: `;`, or nothing before a closing token, at
    /// the end of a line, or anywhere in natural-language code.
    fn end_statement(&mut self) -> ParseResult<()> {
        if self.match_token(&TokenKind::Semicolon) {
            return Ok(());
        }
        let previous = self.previous();
        if previous.level == SyntaxLevel::High {
            return Ok(());
        }
        let next = self.peek();
        let closes = matches!(
            next.kind,
            TokenKind::RightBrace
                | TokenKind::Eof
                | TokenKind::Else
                | TokenKind::End
                | TokenKind::Otherwise
                | TokenKind::Case
                | TokenKind::Default
                | TokenKind::LevelMarker(_)
        );
        if closes || next.position.line > previous.position.line {
            Ok(())
        } else {
            Err(self.error_here("';'"))
        }
    }

    fn make_expr(&mut self, kind: ExprKind, position: Position) -> Expr {
        let id = self.next_id;
        self.next_id += 1;
        Expr { id, kind, position }
    }

    fn enter_expression(&mut self) -> ParseResult<()> {
        self.expr_depth += 1;
        if self.expr_depth > MAX_EXPRESSION_DEPTH {
            self.expr_depth -= 1;
            return Err(self.error_here("shallower expression nesting"));
        }
        Ok(())
    }

    fn exit_expression(&mut self) {
        self.expr_depth = self.expr_depth.saturating_sub(1);
    }

    /// Runs `body` as a function body: loops and switches of the enclosing
    /// code are not visible to `break` and `continue` inside it.
    fn in_function<T>(&mut self, body: impl FnOnce(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        let saved = (self.loop_depth, self.switch_depth);
        self.loop_depth = 0;
        self.switch_depth = 0;
        let result = body(self);
        (self.loop_depth, self.switch_depth) = saved;
        result
    }

    fn in_loop<T>(&mut self, body: impl FnOnce(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        self.loop_depth += 1;
        let result = body(self);
        self.loop_depth -= 1;
        result
    }
}

//=============================================
// End Of strata/parser/mod.rs
//=============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{
        BinaryOp, ClassMember, ExprKind, FunctionBody, Literal, LogicalOp, PatternKind, StmtKind,
        UnaryOp,
    };
    use crate::tokenizer::tokenize;

    fn parse_source(source: &str) -> Result<Program, Vec<ParseError>> {
        parse(tokenize(source).expect("lexing failed"))
    }

    fn program(source: &str) -> Program {
        match parse_source(source) {
            Ok(program) => program,
            Err(errors) => panic!("parse failed: {errors:?}"),
        }
    }

    fn single_expr(source: &str) -> Expr {
        let program = program(source);
        match program.statements.into_iter().next().map(|stmt| stmt.kind) {
            Some(StmtKind::Expr(expr)) => expr,
            other => panic!("expected expression statement, got {other:?}"),
        }
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let expr = single_expr("2 + 3 * 4;");
        match expr.kind {
            ExprKind::Binary {
                op: BinaryOp::Add,
                right,
                ..
            } => assert!(matches!(right.kind, ExprKind::Binary { op: BinaryOp::Mul, .. })),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn power_is_right_associative_and_above_unary() {
        let expr = single_expr("-2 ** 3 ** 2;");
        match expr.kind {
            ExprKind::Unary {
                op: UnaryOp::Neg,
                operand,
            } => match operand.kind {
                ExprKind::Binary {
                    op: BinaryOp::Pow,
                    right,
                    ..
                } => assert!(matches!(right.kind, ExprKind::Binary { op: BinaryOp::Pow, .. })),
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn coalesce_is_right_associative() {
        let expr = single_expr("a ?? b ?? c;");
        match expr.kind {
            ExprKind::Logical {
                op: LogicalOp::Coalesce,
                right,
                ..
            } => assert!(matches!(
                right.kind,
                ExprKind::Logical {
                    op: LogicalOp::Coalesce,
                    ..
                }
            )),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn generic_call_versus_comparison() {
        let call = single_expr("Max<int>(1, 2);");
        match call.kind {
            ExprKind::Call { type_args, args, .. } => {
                assert_eq!(type_args.len(), 1);
                assert_eq!(args.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
        let comparison = single_expr("a < b;");
        assert!(matches!(comparison.kind, ExprKind::Binary { op: BinaryOp::Less, .. }));
    }

    #[test]
    fn c_style_casts_ask_for_as() {
        let errors = parse_source("object o = \"s\";\n(int)o;").unwrap_err();
        assert_eq!(errors[0].found, "(int)");
        assert!(errors[0].expected.contains("'as'"));
        assert_eq!(errors[0].line, 2);

        let errors = parse_source("enum Color { Red, Blue }\nint c = (int)Color.Blue;").unwrap_err();
        assert_eq!(errors[0].found, "(int)");

        let errors = parse_source("var n = (Shape)item;").unwrap_err();
        assert_eq!(errors[0].found, "(Shape)");
    }

    #[test]
    fn parenthesized_names_are_still_expressions() {
        let expr = single_expr("(x) + 1;");
        assert!(matches!(expr.kind, ExprKind::Binary { op: BinaryOp::Add, .. }));
        assert!(parse_source("(int, string) pair = (1, \"a\");").is_ok());
    }

    #[test]
    fn break_outside_loop_is_an_error() {
        let errors = parse_source("break;").unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].found, "break");
    }

    #[test]
    fn recovery_collects_multiple_errors() {
        let errors = parse_source("var = 1;\nvar y = 2;\nvar = 3;").unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].line, 1);
        assert_eq!(errors[1].line, 3);
    }

    #[test]
    fn typed_declarations_and_functions() {
        let program = program("int x = 5;\nint Add(int a, int b) => a + b;\nstring? name = null;");
        assert!(matches!(&program.statements[0].kind, StmtKind::Var(decl) if decl.name == "x"));
        match &program.statements[1].kind {
            StmtKind::Function(function) => {
                assert_eq!(function.params.len(), 2);
                assert!(matches!(function.body, FunctionBody::Expr(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(&program.statements[2].kind, StmtKind::Var(decl) if decl.ty.is_some()));
    }

    #[test]
    fn class_with_constructor_and_base_call() {
        let program = program(
            "class Dog : Animal {\n  public Dog(string name) : base(name) { }\n  public override string Speak() { return \"Woof\"; }\n}",
        );
        match &program.statements[0].kind {
            StmtKind::Class(class) => {
                assert_eq!(class.bases.len(), 1);
                assert!(matches!(
                    &class.members[0],
                    ClassMember::Constructor(ctor) if ctor.base_args.is_some()
                ));
                assert!(matches!(
                    &class.members[1],
                    ClassMember::Method(method) if method.modifiers.is_override
                ));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn switch_expression_with_patterns() {
        let expr = single_expr("shape switch { Circle c when c.Radius > 0 => 1, (0, _) => 2, [1, .., 3] => 3, _ => 0 };");
        match expr.kind {
            ExprKind::Switch { arms, .. } => {
                assert_eq!(arms.len(), 4);
                assert!(arms[0].guard.is_some());
                assert!(matches!(arms[1].pattern.kind, PatternKind::Tuple(_)));
                assert!(matches!(
                    arms[2].pattern.kind,
                    PatternKind::List { rest: true, .. }
                ));
                assert!(matches!(arms[3].pattern.kind, PatternKind::Wildcard));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn high_level_statements() {
        let program = program("@high\nset x to 5\nif x is greater than 3 then\n  display x\notherwise\n  display 0\nend\n");
        assert!(matches!(&program.statements[0].kind, StmtKind::Set { name, .. } if name == "x"));
        match &program.statements[1].kind {
            StmtKind::If {
                condition,
                else_branch,
                ..
            } => {
                assert!(matches!(
                    condition.kind,
                    ExprKind::Binary {
                        op: BinaryOp::Greater,
                        ..
                    }
                ));
                assert!(else_branch.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn asm_block_lines() {
        let program = program("@asm {\n  push 2\n  push 3\n  add\n  print\n}\n");
        match &program.statements[0].kind {
            StmtKind::Asm(block) => {
                assert_eq!(block.lines.len(), 4);
                assert_eq!(block.lines[2].mnemonic.as_deref(), Some("add"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn custom_loops() {
        let program = program("repeat 3 times { x++; }\niterate i: 0..10:2 { }\nforever { break; }\nparallel for (var i = 0; i < 3; i++) { }");
        assert!(matches!(program.statements[0].kind, StmtKind::Repeat { .. }));
        assert!(matches!(
            &program.statements[1].kind,
            StmtKind::Iterate { step: Some(_), .. }
        ));
        assert!(matches!(program.statements[2].kind, StmtKind::Forever(_)));
        assert!(matches!(program.statements[3].kind, StmtKind::Parallel(_)));
    }

    #[test]
    fn math_symbols_become_expressions() {
        let expr = single_expr("√16 + π;");
        match expr.kind {
            ExprKind::Binary { left, right, .. } => {
                assert!(matches!(left.kind, ExprKind::Unary { op: UnaryOp::Sqrt, .. }));
                assert!(matches!(right.kind, ExprKind::Literal(Literal::Float(_))));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn interpolation_parses_embedded_expressions() {
        let expr = single_expr("$\"sum {a + b}!\";");
        match expr.kind {
            ExprKind::Interpolated(parts) => assert_eq!(parts.len(), 3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn deeply_nested_expression_is_rejected() {
        let source = format!("{}1{};", "(".repeat(MAX_EXPRESSION_DEPTH + 8), ")".repeat(MAX_EXPRESSION_DEPTH + 8));
        let result = std::thread::Builder::new()
            .stack_size(64 << 20)
            .spawn(move || parse_source(&source).is_err())
            .unwrap()
            .join()
            .unwrap();
        assert!(result);
    }
}
