//=============================================
// strata/parser/patterns.rs
//=============================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Pattern parsing for switch, match and `is`
// Objective: Wildcard, constant, relational, var, type, property, tuple,
//            list and negated patterns
//=============================================

use super::expr::Precedence;
use super::{ParseResult, Parser};
use crate::ast::{BinaryOp, Pattern, PatternKind};
use crate::symbol::Symbol;
use crate::tokenizer::{MathSymbol, TokenKind};

impl Parser {
    pub(super) fn parse_pattern(&mut self) -> ParseResult<Pattern> {
        let position = self.current_position();
        let kind = match self.peek().kind.clone() {
            TokenKind::Identifier(name) if name == "_" => {
                self.advance();
                PatternKind::Wildcard
            }
            TokenKind::Identifier(name) if name == "not" => {
                self.advance();
                PatternKind::Not(Box::new(self.parse_pattern()?))
            }
            TokenKind::Bang => {
                self.advance();
                PatternKind::Not(Box::new(self.parse_pattern()?))
            }
            TokenKind::Var => {
                self.advance();
                PatternKind::Var(self.consume_identifier("variable name in pattern")?)
            }
            TokenKind::Less
            | TokenKind::LessEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual
            | TokenKind::MathSymbol(MathSymbol::LessEq)
            | TokenKind::MathSymbol(MathSymbol::GreaterEq) => {
                let op = match self.advance().kind {
                    TokenKind::Less => BinaryOp::Less,
                    TokenKind::LessEqual | TokenKind::MathSymbol(MathSymbol::LessEq) => BinaryOp::LessEq,
                    TokenKind::Greater => BinaryOp::Greater,
                    _ => BinaryOp::GreaterEq,
                };
                let value = self.parse_binary(Precedence::Additive)?;
                PatternKind::Relational { op, value }
            }
            TokenKind::LeftParen => {
                self.advance();
                let mut items = vec![self.parse_pattern()?];
                while self.match_token(&TokenKind::Comma) {
                    items.push(self.parse_pattern()?);
                }
                self.consume(&TokenKind::RightParen, "')' after tuple pattern")?;
                if items.len() == 1 {
                    return Ok(items.remove(0));
                }
                PatternKind::Tuple(items)
            }
            TokenKind::LeftBracket => self.parse_list_pattern()?,
            TokenKind::LeftBrace => {
                let fields = self.parse_property_fields()?;
                let binding = self.parse_binding();
                PatternKind::Property {
                    ty: None,
                    fields,
                    binding,
                }
            }
            TokenKind::PrimitiveType(_) => self.parse_type_pattern()?,
            TokenKind::Identifier(name) if self.names_type_in_pattern(&name) => {
                self.parse_type_pattern()?
            }
            _ => PatternKind::Constant(self.parse_binary(Precedence::Additive)?),
        };
        Ok(Pattern { kind, position })
    }

    /// An identifier opens a type pattern when it is followed by a binding
    /// or property block, or when it is capitalised and not a member path.
    fn names_type_in_pattern(&self, name: &str) -> bool {
        match &self.peek_at(1).kind {
            TokenKind::LeftBrace => true,
            TokenKind::Identifier(next) => !matches!(next.as_str(), "and" | "or"),
            TokenKind::Dot | TokenKind::LeftParen => false,
            _ => name.chars().next().is_some_and(char::is_uppercase),
        }
    }

    fn parse_type_pattern(&mut self) -> ParseResult<PatternKind> {
        let ty = self.parse_type()?;
        if self.check(&TokenKind::LeftBrace) {
            let fields = self.parse_property_fields()?;
            let binding = self.parse_binding();
            return Ok(PatternKind::Property {
                ty: Some(ty),
                fields,
                binding,
            });
        }
        let binding = self.parse_binding();
        Ok(PatternKind::Type { ty, binding })
    }

    fn parse_binding(&mut self) -> Option<Symbol> {
        match &self.peek().kind {
            TokenKind::Identifier(name) if !matches!(name.as_str(), "and" | "or") => {
                let name = Symbol::from(name.as_str());
                self.advance();
                Some(name)
            }
            _ => None,
        }
    }

    fn parse_property_fields(&mut self) -> ParseResult<Vec<(Symbol, Pattern)>> {
        self.consume(&TokenKind::LeftBrace, "'{' in property pattern")?;
        let mut fields = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            let name = self.consume_identifier("property name")?;
            self.consume(&TokenKind::Colon, "':' after property name")?;
            fields.push((name, self.parse_pattern()?));
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        self.consume(&TokenKind::RightBrace, "'}' after property pattern")?;
        Ok(fields)
    }

    fn parse_list_pattern(&mut self) -> ParseResult<PatternKind> {
        self.consume(&TokenKind::LeftBracket, "'['")?;
        let mut before = Vec::new();
        let mut after = Vec::new();
        let mut rest = false;
        while !self.check(&TokenKind::RightBracket) && !self.is_at_end() {
            if self.match_token(&TokenKind::DotDot) {
                if rest {
                    return Err(self.error_here("at most one '..' in list pattern"));
                }
                rest = true;
            } else if rest {
                after.push(self.parse_pattern()?);
            } else {
                before.push(self.parse_pattern()?);
            }
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        self.consume(&TokenKind::RightBracket, "']' after list pattern")?;
        Ok(PatternKind::List {
            before,
            rest,
            after,
        })
    }
}
