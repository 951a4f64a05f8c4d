//=============================================
// strata/parser/stmt.rs
//=============================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Statement parsing
// Objective: Declarations dispatch, control flow, custom loops, try/catch,
//            switch statements and natural-language statement forms
//=============================================

use super::{ParseError, ParseResult, Parser};
use crate::ast::{
    CaseLabel, CatchClause, DeclKind, Expr, ExprKind, Stmt, StmtKind, SwitchCase, VarDecl,
};
use crate::symbol::Symbol;
use crate::tokenizer::{SyntaxLevel, TokenKind};

impl Parser {
    //=============================================
    //            Section 5: Statement Parsing
    //=============================================

    pub(super) fn parse_statement(&mut self) -> ParseResult<Stmt> {
        let token = self.peek().clone();
        let position = token.position;
        match token.kind {
            TokenKind::LevelMarker(level) => self.parse_level_region(level),
            TokenKind::Semicolon => {
                self.advance();
                Ok(Stmt {
                    kind: StmtKind::Block(Vec::new()),
                    position,
                })
            }
            TokenKind::LeftBrace => {
                let body = self.parse_block_body()?;
                Ok(Stmt {
                    kind: StmtKind::Block(body),
                    position,
                })
            }
            TokenKind::Var | TokenKind::Let | TokenKind::Const => {
                let stmt = self.parse_var_declaration()?;
                self.end_statement()?;
                Ok(stmt)
            }
            TokenKind::Function | TokenKind::Fn if !self.check_at(1, &TokenKind::LeftParen) => {
                self.parse_function_declaration()
            }
            TokenKind::Class
            | TokenKind::Interface
            | TokenKind::Enum
            | TokenKind::Module
            | TokenKind::Abstract
            | TokenKind::Static
            | TokenKind::Public
            | TokenKind::Private
            | TokenKind::Protected
            | TokenKind::Async
            | TokenKind::Virtual
            | TokenKind::Override
            | TokenKind::Readonly => self.parse_declaration(),
            TokenKind::If => self.parse_if_statement(),
            TokenKind::While => self.parse_while_statement(),
            TokenKind::Do => self.parse_do_while_statement(),
            TokenKind::For => self.parse_for_statement(),
            TokenKind::Foreach => self.parse_foreach_statement(),
            TokenKind::Switch => self.parse_switch_statement(),
            TokenKind::Try => self.parse_try_statement(),
            TokenKind::Repeat => self.parse_repeat_statement(),
            TokenKind::Iterate => self.parse_iterate_statement(),
            TokenKind::Forever => {
                self.advance();
                let body = self.in_loop(|parser| parser.parse_statement())?;
                Ok(Stmt {
                    kind: StmtKind::Forever(Box::new(body)),
                    position,
                })
            }
            TokenKind::Parallel => {
                self.advance();
                let inner = match self.peek().kind {
                    TokenKind::For => self.parse_for_statement()?,
                    TokenKind::Foreach => self.parse_foreach_statement()?,
                    _ => return Err(self.error_here("'for' or 'foreach' after parallel")),
                };
                Ok(Stmt {
                    kind: StmtKind::Parallel(Box::new(inner)),
                    position,
                })
            }
            TokenKind::Throw => {
                self.advance();
                let value = if self.at_statement_end() {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.end_statement()?;
                Ok(Stmt {
                    kind: StmtKind::Throw(value),
                    position,
                })
            }
            TokenKind::Return => {
                self.advance();
                let value = if self.at_statement_end() {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.end_statement()?;
                Ok(Stmt {
                    kind: StmtKind::Return(value),
                    position,
                })
            }
            TokenKind::Break => {
                self.advance();
                if self.loop_depth == 0 && self.switch_depth == 0 {
                    return Err(ParseError::new("break", "enclosing loop or switch", position));
                }
                self.end_statement()?;
                Ok(Stmt {
                    kind: StmtKind::Break,
                    position,
                })
            }
            TokenKind::Continue => {
                self.advance();
                if self.loop_depth == 0 {
                    return Err(ParseError::new("continue", "enclosing loop", position));
                }
                self.end_statement()?;
                Ok(Stmt {
                    kind: StmtKind::Continue,
                    position,
                })
            }
            TokenKind::Set => {
                self.advance();
                let name = self.consume_identifier("variable name after set")?;
                self.consume(&TokenKind::To, "'to' after variable name")?;
                let value = self.parse_expression()?;
                self.end_statement()?;
                Ok(Stmt {
                    kind: StmtKind::Set { name, value },
                    position,
                })
            }
            TokenKind::Display => {
                self.advance();
                let value = self.parse_expression()?;
                self.end_statement()?;
                let callee = self.make_expr(ExprKind::Identifier(Symbol::from("println")), position);
                let call = self.make_expr(
                    ExprKind::Call {
                        callee: Box::new(callee),
                        type_args: Vec::new(),
                        args: vec![value],
                    },
                    position,
                );
                Ok(Stmt {
                    kind: StmtKind::Expr(call),
                    position,
                })
            }
            _ => {
                if self.typed_declaration_ahead() {
                    return self.parse_typed_declaration();
                }
                let expr = self.parse_expression()?;
                self.end_statement()?;
                Ok(Stmt {
                    kind: StmtKind::Expr(expr),
                    position,
                })
            }
        }
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.peek().kind,
            TokenKind::Semicolon
                | TokenKind::RightBrace
                | TokenKind::Eof
                | TokenKind::Else
                | TokenKind::End
                | TokenKind::Otherwise
        ) || (self.peek().level == SyntaxLevel::High
            && self.peek().position.line > self.previous().position.line)
    }

    /// `{ statements }` with per-statement recovery.
    pub(super) fn parse_block_body(&mut self) -> ParseResult<Vec<Stmt>> {
        self.consume(&TokenKind::LeftBrace, "'{'")?;
        let mut statements = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            if let Some(stmt) = self.parse_statement_recovering() {
                statements.push(stmt);
            }
        }
        self.consume(&TokenKind::RightBrace, "'}'")?;
        Ok(statements)
    }

    /// Statements of a natural-language block, up to one of `terminators`
    /// which is left unconsumed.
    fn parse_until(&mut self, terminators: &[TokenKind]) -> ParseResult<Vec<Stmt>> {
        let mut statements = Vec::new();
        while !terminators.contains(&self.peek().kind) && !self.is_at_end() {
            if let Some(stmt) = self.parse_statement_recovering() {
                statements.push(stmt);
            }
        }
        Ok(statements)
    }

    fn block(statements: Vec<Stmt>, position: crate::tokenizer::Position) -> Stmt {
        Stmt {
            kind: StmtKind::Block(statements),
            position,
        }
    }

    /// Statements following a syntax-level marker.
    fn parse_level_region(&mut self, level: SyntaxLevel) -> ParseResult<Stmt> {
        let position = self.advance().position;
        if level.is_asm() {
            return self.parse_asm_block(level, position);
        }
        if self.check(&TokenKind::LeftBrace) {
            let body = self.parse_block_body()?;
            return Ok(Self::block(body, position));
        }
        if self.is_at_end() || self.check(&TokenKind::RightBrace) {
            return Ok(Self::block(Vec::new(), position));
        }
        self.parse_statement()
    }

    //=============================================
    //            Section 5a: Variable Declarations
    //=============================================

    /// `var|let [mut]|const name [: Type] [= expr]` without terminator.
    pub(super) fn parse_var_declaration(&mut self) -> ParseResult<Stmt> {
        let token = self.advance().clone();
        let kind = match token.kind {
            TokenKind::Let => DeclKind::Let,
            TokenKind::Const => DeclKind::Const,
            _ => DeclKind::Var,
        };
        let mutable = self.match_token(&TokenKind::Mut) || kind == DeclKind::Var;
        let name = self.consume_identifier("variable name")?;
        let ty = if self.match_token(&TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        let init = if self.match_token(&TokenKind::Assign) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        if kind == DeclKind::Const && init.is_none() {
            return Err(self.error_here("initializer for constant"));
        }
        Ok(Stmt {
            kind: StmtKind::Var(VarDecl {
                kind,
                name,
                ty,
                init,
                mutable: mutable && kind != DeclKind::Const,
            }),
            position: token.position,
        })
    }

    /// `Type name [= expr];` or a typed function head `Type Name(...)`.
    fn parse_typed_declaration(&mut self) -> ParseResult<Stmt> {
        let position = self.current_position();
        let doc = self.peek().doc.clone();
        let ty = self.parse_type()?;
        if self.check_at(1, &TokenKind::LeftParen) || self.check_at(1, &TokenKind::Less) {
            return self.parse_function_rest(Some(ty), Default::default(), doc, position);
        }
        let stmt = self.parse_typed_variable(ty, position)?;
        self.end_statement()?;
        Ok(stmt)
    }

    fn parse_typed_variable(&mut self, ty: crate::ast::TypeExpr, position: crate::tokenizer::Position) -> ParseResult<Stmt> {
        let name = self.consume_identifier("variable name")?;
        let init = if self.match_token(&TokenKind::Assign) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        Ok(Stmt {
            kind: StmtKind::Var(VarDecl {
                kind: DeclKind::Typed,
                name,
                ty: Some(ty),
                init,
                mutable: true,
            }),
            position,
        })
    }

    //=============================================
    //            Section 5b: Control Flow
    //=============================================

    /// Condition of `if`/`while`: parenthesised in code levels, free-form
    /// in natural-language code.
    fn parse_condition(&mut self, high: bool) -> ParseResult<Expr> {
        if high {
            return self.parse_expression();
        }
        self.consume(&TokenKind::LeftParen, "'(' before condition")?;
        let condition = self.parse_expression()?;
        self.consume(&TokenKind::RightParen, "')' after condition")?;
        Ok(condition)
    }

    fn parse_if_statement(&mut self) -> ParseResult<Stmt> {
        let token = self.advance().clone();
        let high = token.level == SyntaxLevel::High;
        let condition = self.parse_condition(high)?;
        if self.match_token(&TokenKind::Then) {
            return self.parse_high_if_rest(condition, token.position);
        }
        let then_branch = self.parse_statement()?;
        let else_branch = if self.match_token(&TokenKind::Else) {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Stmt {
            kind: StmtKind::If {
                condition,
                then_branch: Box::new(then_branch),
                else_branch,
            },
            position: token.position,
        })
    }

    /// `if c then ... [otherwise ...] end`; `otherwise if` chains share the
    /// final `end`.
    fn parse_high_if_rest(&mut self, condition: Expr, position: crate::tokenizer::Position) -> ParseResult<Stmt> {
        let then_position = self.current_position();
        let then_body = self.parse_until(&[TokenKind::Otherwise, TokenKind::End])?;
        let else_branch = if self.match_token(&TokenKind::Otherwise) {
            if self.check(&TokenKind::If) {
                let nested_position = self.advance().position;
                let nested_condition = self.parse_expression()?;
                self.consume(&TokenKind::Then, "'then' after condition")?;
                return self
                    .parse_high_if_rest(nested_condition, nested_position)
                    .map(|nested| Stmt {
                        kind: StmtKind::If {
                            condition,
                            then_branch: Box::new(Self::block(then_body, then_position)),
                            else_branch: Some(Box::new(nested)),
                        },
                        position,
                    });
            }
            let else_position = self.current_position();
            let body = self.parse_until(&[TokenKind::End])?;
            Some(Box::new(Self::block(body, else_position)))
        } else {
            None
        };
        self.consume(&TokenKind::End, "'end' to close if")?;
        Ok(Stmt {
            kind: StmtKind::If {
                condition,
                then_branch: Box::new(Self::block(then_body, then_position)),
                else_branch,
            },
            position,
        })
    }

    fn parse_while_statement(&mut self) -> ParseResult<Stmt> {
        let token = self.advance().clone();
        let high = token.level == SyntaxLevel::High;
        let condition = self.parse_condition(high)?;
        let body = if self.match_token(&TokenKind::Do) {
            let body_position = self.current_position();
            let body = self.in_loop(|parser| parser.parse_until(&[TokenKind::End]))?;
            self.consume(&TokenKind::End, "'end' to close while")?;
            Self::block(body, body_position)
        } else {
            self.in_loop(|parser| parser.parse_statement())?
        };
        Ok(Stmt {
            kind: StmtKind::While {
                condition,
                body: Box::new(body),
            },
            position: token.position,
        })
    }

    fn parse_do_while_statement(&mut self) -> ParseResult<Stmt> {
        let position = self.advance().position;
        let body = self.in_loop(|parser| parser.parse_statement())?;
        self.consume(&TokenKind::While, "'while' after do body")?;
        let condition = self.parse_condition(false)?;
        self.end_statement()?;
        Ok(Stmt {
            kind: StmtKind::DoWhile {
                body: Box::new(body),
                condition,
            },
            position,
        })
    }

    /// True when `for (` introduces `name in expr` iteration.
    fn foreach_header_ahead(&self, offset: usize) -> bool {
        let mut distance = offset;
        if matches!(
            self.peek_at(distance).kind,
            TokenKind::Var | TokenKind::Let | TokenKind::PrimitiveType(_)
        ) {
            distance += 1;
        } else if matches!(self.peek_at(distance).kind, TokenKind::Identifier(_))
            && matches!(self.peek_at(distance + 1).kind, TokenKind::Identifier(_))
        {
            distance += 1;
        }
        matches!(self.peek_at(distance).kind, TokenKind::Identifier(_))
            && self.check_at(distance + 1, &TokenKind::In)
    }

    fn parse_for_statement(&mut self) -> ParseResult<Stmt> {
        let position = self.advance().position;
        let parenthesised = self.check(&TokenKind::LeftParen);
        let offset = usize::from(parenthesised);
        if self.foreach_header_ahead(offset) {
            return self.parse_foreach_rest(position);
        }
        self.consume(&TokenKind::LeftParen, "'(' after for")?;
        let init = if self.match_token(&TokenKind::Semicolon) {
            None
        } else {
            let stmt = if matches!(self.peek().kind, TokenKind::Var | TokenKind::Let) {
                self.parse_var_declaration()?
            } else if self.typed_declaration_ahead() {
                let start = self.current_position();
                let ty = self.parse_type()?;
                self.parse_typed_variable(ty, start)?
            } else {
                let expr = self.parse_expression()?;
                Stmt {
                    position: expr.position,
                    kind: StmtKind::Expr(expr),
                }
            };
            self.consume(&TokenKind::Semicolon, "';' after for initializer")?;
            Some(Box::new(stmt))
        };
        let condition = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.consume(&TokenKind::Semicolon, "';' after for condition")?;
        let mut update = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            loop {
                update.push(self.parse_expression()?);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(&TokenKind::RightParen, "')' after for clauses")?;
        let body = self.in_loop(|parser| parser.parse_statement())?;
        Ok(Stmt {
            kind: StmtKind::For {
                init,
                condition,
                update,
                body: Box::new(body),
            },
            position,
        })
    }

    fn parse_foreach_statement(&mut self) -> ParseResult<Stmt> {
        let position = self.advance().position;
        self.parse_foreach_rest(position)
    }

    /// `[(] [var|Type] name in expr [)] body`
    fn parse_foreach_rest(&mut self, position: crate::tokenizer::Position) -> ParseResult<Stmt> {
        let parenthesised = self.match_token(&TokenKind::LeftParen);
        let var_type = if self.match_token(&TokenKind::Var) || self.match_token(&TokenKind::Let) {
            None
        } else if !self.check_at(1, &TokenKind::In) {
            Some(self.parse_type()?)
        } else {
            None
        };
        let var = self.consume_identifier("loop variable")?;
        self.consume(&TokenKind::In, "'in' after loop variable")?;
        let iterable = self.parse_expression()?;
        if parenthesised {
            self.consume(&TokenKind::RightParen, "')' after foreach header")?;
        }
        let body = self.in_loop(|parser| parser.parse_statement())?;
        Ok(Stmt {
            kind: StmtKind::Foreach {
                var,
                var_type,
                iterable,
                body: Box::new(body),
            },
            position,
        })
    }

    /// `repeat N times body`, or `repeat N times ... end` in natural-language
    /// code.
    fn parse_repeat_statement(&mut self) -> ParseResult<Stmt> {
        let token = self.advance().clone();
        let count = self.parse_expression()?;
        self.consume(&TokenKind::Times, "'times' after repeat count")?;
        let body = if token.level == SyntaxLevel::High && !self.check(&TokenKind::LeftBrace) {
            let body_position = self.current_position();
            let body = self.in_loop(|parser| parser.parse_until(&[TokenKind::End]))?;
            self.consume(&TokenKind::End, "'end' to close repeat")?;
            Self::block(body, body_position)
        } else {
            self.in_loop(|parser| parser.parse_statement())?
        };
        Ok(Stmt {
            kind: StmtKind::Repeat {
                count,
                body: Box::new(body),
            },
            position: token.position,
        })
    }

    /// `iterate i: a..b[:step] body`
    fn parse_iterate_statement(&mut self) -> ParseResult<Stmt> {
        let position = self.advance().position;
        let parenthesised = self.match_token(&TokenKind::LeftParen);
        let var = self.consume_identifier("iteration variable")?;
        self.consume(&TokenKind::Colon, "':' after iteration variable")?;
        let range = self.parse_expression()?;
        let (start, end) = match range.kind {
            ExprKind::Range { start, end } => (*start, *end),
            _ => {
                return Err(ParseError::new(
                    "expression",
                    "range 'a..b' in iterate",
                    range.position,
                ));
            }
        };
        let step = if self.match_token(&TokenKind::Colon) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        if parenthesised {
            self.consume(&TokenKind::RightParen, "')' after iterate header")?;
        }
        let body = self.in_loop(|parser| parser.parse_statement())?;
        Ok(Stmt {
            kind: StmtKind::Iterate {
                var,
                start,
                end,
                step,
                body: Box::new(body),
            },
            position,
        })
    }

    fn parse_switch_statement(&mut self) -> ParseResult<Stmt> {
        let position = self.advance().position;
        let subject = self.parse_condition(false)?;
        self.consume(&TokenKind::LeftBrace, "'{' after switch subject")?;
        self.switch_depth += 1;
        let cases = self.parse_switch_cases();
        self.switch_depth -= 1;
        let cases = cases?;
        self.consume(&TokenKind::RightBrace, "'}' after switch cases")?;
        Ok(Stmt {
            kind: StmtKind::Switch { subject, cases },
            position,
        })
    }

    fn parse_switch_cases(&mut self) -> ParseResult<Vec<SwitchCase>> {
        let mut cases = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            cases.push(self.parse_switch_case()?);
        }
        Ok(cases)
    }

    fn parse_switch_case(&mut self) -> ParseResult<SwitchCase> {
        let position = self.current_position();
        let mut labels = Vec::new();
        let mut is_default = false;
        loop {
            if self.match_token(&TokenKind::Case) {
                let pattern = self.parse_pattern()?;
                let guard = if self.match_token(&TokenKind::When) {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                self.consume(&TokenKind::Colon, "':' after case label")?;
                labels.push(CaseLabel { pattern, guard });
            } else if self.match_token(&TokenKind::Default) {
                self.consume(&TokenKind::Colon, "':' after default")?;
                is_default = true;
            } else {
                break;
            }
        }
        if labels.is_empty() && !is_default {
            return Err(self.error_here("'case' or 'default'"));
        }
        let body = self.parse_until(&[TokenKind::Case, TokenKind::Default, TokenKind::RightBrace])?;
        Ok(SwitchCase {
            labels,
            is_default,
            body,
            position,
        })
    }

    fn parse_try_statement(&mut self) -> ParseResult<Stmt> {
        let position = self.advance().position;
        let body = self.parse_block_body()?;
        let mut catches = Vec::new();
        while self.check(&TokenKind::Catch) {
            let catch_position = self.advance().position;
            let (ty, name) = if self.match_token(&TokenKind::LeftParen) {
                let ty = self.consume_type_name()?;
                let name = match &self.peek().kind {
                    TokenKind::Identifier(_) => Some(self.consume_identifier("exception variable")?),
                    _ => None,
                };
                self.consume(&TokenKind::RightParen, "')' after catch declaration")?;
                (Some(ty), name)
            } else {
                (None, None)
            };
            let body = self.parse_block_body()?;
            catches.push(CatchClause {
                ty,
                name,
                body,
                position: catch_position,
            });
        }
        let finally = if self.match_token(&TokenKind::Finally) {
            Some(self.parse_block_body()?)
        } else {
            None
        };
        if catches.is_empty() && finally.is_none() {
            return Err(self.error_here("'catch' or 'finally' after try block"));
        }
        Ok(Stmt {
            kind: StmtKind::Try {
                body,
                catches,
                finally,
            },
            position,
        })
    }

    fn consume_type_name(&mut self) -> ParseResult<Symbol> {
        match self.peek().kind.clone() {
            TokenKind::PrimitiveType(name) => {
                self.advance();
                Ok(Symbol::from(name))
            }
            _ => self.consume_identifier("exception type"),
        }
    }
}
