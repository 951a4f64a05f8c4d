//=============================================
// strata/parser/types.rs
//=============================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Type annotation parsing
// Objective: Named, generic, array, nullable and tuple types, generic
//            parameter lists and `where` constraints
//=============================================

use super::{ParseResult, Parser, MAX_GENERIC_LOOKAHEAD};
use crate::ast::{Constraint, TypeExpr, TypeParam};
use crate::symbol::Symbol;
use crate::tokenizer::TokenKind;

impl Parser {
    pub(super) fn parse_type(&mut self) -> ParseResult<TypeExpr> {
        let mut ty = match self.peek().kind.clone() {
            TokenKind::PrimitiveType(name) => {
                self.advance();
                TypeExpr::named(name)
            }
            TokenKind::Identifier(_) => {
                let mut name = self.consume_identifier("type name")?.into_string();
                while self.check(&TokenKind::Dot)
                    && matches!(self.peek_at(1).kind, TokenKind::Identifier(_))
                {
                    self.advance();
                    name.push('.');
                    name.push_str(&self.consume_identifier("type name")?);
                }
                let args = if self.check(&TokenKind::Less) {
                    self.parse_type_arguments()?
                } else {
                    Vec::new()
                };
                TypeExpr::Named {
                    name: Symbol::from(name),
                    args,
                }
            }
            TokenKind::LeftParen => {
                self.advance();
                let mut items = vec![self.parse_type()?];
                while self.match_token(&TokenKind::Comma) {
                    items.push(self.parse_type()?);
                }
                self.consume(&TokenKind::RightParen, "')' after tuple type")?;
                if items.len() == 1 {
                    return Err(self.error_here("a tuple type with two or more elements"));
                }
                TypeExpr::Tuple(items)
            }
            // `[T]` array form of the systems level
            TokenKind::LeftBracket => {
                self.advance();
                let inner = self.parse_type()?;
                self.consume(&TokenKind::RightBracket, "']' after array type")?;
                TypeExpr::Array(Box::new(inner))
            }
            _ => return Err(self.error_here("type")),
        };
        loop {
            if self.check(&TokenKind::LeftBracket) && self.check_at(1, &TokenKind::RightBracket) {
                self.advance();
                self.advance();
                ty = TypeExpr::Array(Box::new(ty));
            } else if self.check(&TokenKind::Question) {
                self.advance();
                ty = TypeExpr::Nullable(Box::new(ty));
            } else {
                return Ok(ty);
            }
        }
    }

    pub(super) fn parse_type_arguments(&mut self) -> ParseResult<Vec<TypeExpr>> {
        self.consume(&TokenKind::Less, "'<'")?;
        let mut args = vec![self.parse_type()?];
        while self.match_token(&TokenKind::Comma) {
            args.push(self.parse_type()?);
        }
        self.consume(&TokenKind::Greater, "'>' after type arguments")?;
        Ok(args)
    }

    /// Bounded scan deciding whether the `<` at the cursor opens type
    /// arguments of a generic call: only type tokens may appear before the
    /// matching `>`, and `(` must follow it.
    pub(super) fn generic_call_ahead(&self) -> bool {
        if !self.check(&TokenKind::Less) {
            return false;
        }
        let mut nesting = 0usize;
        for distance in 0..MAX_GENERIC_LOOKAHEAD {
            match &self.peek_at(distance).kind {
                TokenKind::Less => nesting += 1,
                TokenKind::Greater => {
                    nesting -= 1;
                    if nesting == 0 {
                        return self.check_at(distance + 1, &TokenKind::LeftParen);
                    }
                }
                TokenKind::Identifier(_)
                | TokenKind::PrimitiveType(_)
                | TokenKind::Comma
                | TokenKind::Dot
                | TokenKind::Question
                | TokenKind::LeftBracket
                | TokenKind::RightBracket => {}
                _ => return false,
            }
        }
        false
    }

    /// Speculatively parses a type at the cursor and reports whether a
    /// declared name follows it. The cursor is left unchanged.
    pub(super) fn typed_declaration_ahead(&mut self) -> bool {
        if !matches!(
            self.peek().kind,
            TokenKind::PrimitiveType(_) | TokenKind::Identifier(_) | TokenKind::LeftParen
        ) {
            return false;
        }
        let start = self.current;
        let result = self.parse_type().is_ok()
            && matches!(self.peek().kind, TokenKind::Identifier(_))
            && matches!(
                self.peek_at(1).kind,
                TokenKind::Assign
                    | TokenKind::Semicolon
                    | TokenKind::LeftParen
                    | TokenKind::Less
                    | TokenKind::LeftBrace
                    | TokenKind::FatArrow
                    | TokenKind::In
                    | TokenKind::RightParen
                    | TokenKind::Eof
            );
        self.current = start;
        result
    }

    pub(super) fn parse_type_params(&mut self) -> ParseResult<Vec<TypeParam>> {
        let mut params = Vec::new();
        if !self.match_token(&TokenKind::Less) {
            return Ok(params);
        }
        loop {
            let name = self.consume_identifier("type parameter")?;
            params.push(TypeParam {
                name,
                constraints: Vec::new(),
            });
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        self.consume(&TokenKind::Greater, "'>' after type parameters")?;
        Ok(params)
    }

    /// `where T : class, new(), IComparable<T>` clauses, attached to the
    /// matching type parameters.
    pub(super) fn parse_where_clauses(&mut self, params: &mut [TypeParam]) -> ParseResult<()> {
        while self.match_token(&TokenKind::Where) {
            let name = self.consume_identifier("constrained type parameter")?;
            self.consume(&TokenKind::Colon, "':' in where clause")?;
            let mut constraints = Vec::new();
            loop {
                constraints.push(self.parse_constraint()?);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
            match params.iter_mut().find(|param| param.name == name) {
                Some(param) => param.constraints.extend(constraints),
                None => {
                    return Err(super::ParseError::new(
                        name.into_string(),
                        "declared type parameter",
                        self.previous().position,
                    ));
                }
            }
        }
        Ok(())
    }

    fn parse_constraint(&mut self) -> ParseResult<Constraint> {
        if self.check(&TokenKind::Class) {
            let token = self.advance();
            return Ok(if token.lexeme == "struct" {
                Constraint::Struct
            } else {
                Constraint::Class
            });
        }
        if self.check(&TokenKind::New) {
            self.advance();
            self.consume(&TokenKind::LeftParen, "'(' after new")?;
            self.consume(&TokenKind::RightParen, "')' after new(")?;
            return Ok(Constraint::New);
        }
        Ok(Constraint::Type(self.parse_type()?))
    }
}
