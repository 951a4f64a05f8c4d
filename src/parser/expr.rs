//=============================================
// strata/parser/expr.rs
//=============================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Expression parsing
// Objective: Precedence climbing over binary operators, prefix and postfix
//            operators, primaries, lambdas and interpolated strings
//=============================================

use super::{ParseError, ParseResult, Parser};
use crate::ast::{
    AssignOp, BinaryOp, Expr, ExprKind, InterpolationSegment, LambdaBody, Literal, LogicalOp,
    Param, SwitchArm, UnaryOp,
};
use crate::symbol::Symbol;
use crate::tokenizer::{InterpolationPart, MathSymbol, NumberLiteral, NumericSuffix, TokenKind};

/// Binding power of infix operators, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(super) enum Precedence {
    Coalesce = 1,
    Or,
    And,
    BitOr,
    BitXor,
    BitAnd,
    Equality,
    Relational,
    Range,
    Additive,
    Multiplicative,
}

impl Precedence {
    fn next(self) -> Precedence {
        match self {
            Precedence::Coalesce => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::BitOr,
            Precedence::BitOr => Precedence::BitXor,
            Precedence::BitXor => Precedence::BitAnd,
            Precedence::BitAnd => Precedence::Equality,
            Precedence::Equality => Precedence::Relational,
            Precedence::Relational => Precedence::Range,
            Precedence::Range => Precedence::Additive,
            Precedence::Additive | Precedence::Multiplicative => Precedence::Multiplicative,
        }
    }
}

enum Infix {
    Binary(BinaryOp),
    Logical(LogicalOp),
    Range,
    Is,
    As,
}

fn infix(kind: &TokenKind) -> Option<(Precedence, Infix)> {
    use Precedence as P;
    let entry = match kind {
        TokenKind::NullCoalesce => (P::Coalesce, Infix::Logical(LogicalOp::Coalesce)),
        TokenKind::OrOr => (P::Or, Infix::Logical(LogicalOp::Or)),
        TokenKind::AndAnd => (P::And, Infix::Logical(LogicalOp::And)),
        TokenKind::Pipe => (P::BitOr, Infix::Binary(BinaryOp::BitOr)),
        TokenKind::Caret => (P::BitXor, Infix::Binary(BinaryOp::BitXor)),
        TokenKind::Amp => (P::BitAnd, Infix::Binary(BinaryOp::BitAnd)),
        TokenKind::EqualEqual => (P::Equality, Infix::Binary(BinaryOp::Eq)),
        TokenKind::NotEqual | TokenKind::MathSymbol(MathSymbol::NotEq) => {
            (P::Equality, Infix::Binary(BinaryOp::NotEq))
        }
        TokenKind::Less => (P::Relational, Infix::Binary(BinaryOp::Less)),
        TokenKind::Greater => (P::Relational, Infix::Binary(BinaryOp::Greater)),
        TokenKind::LessEqual | TokenKind::MathSymbol(MathSymbol::LessEq) => {
            (P::Relational, Infix::Binary(BinaryOp::LessEq))
        }
        TokenKind::GreaterEqual | TokenKind::MathSymbol(MathSymbol::GreaterEq) => {
            (P::Relational, Infix::Binary(BinaryOp::GreaterEq))
        }
        TokenKind::Spaceship => (P::Relational, Infix::Binary(BinaryOp::Compare)),
        TokenKind::Is => (P::Relational, Infix::Is),
        TokenKind::As => (P::Relational, Infix::As),
        TokenKind::MathSymbol(MathSymbol::ElementOf) => (P::Relational, Infix::Binary(BinaryOp::In)),
        TokenKind::MathSymbol(MathSymbol::NotElementOf) => {
            (P::Relational, Infix::Binary(BinaryOp::NotIn))
        }
        TokenKind::MathSymbol(MathSymbol::Subset) => (P::Relational, Infix::Binary(BinaryOp::Subset)),
        TokenKind::MathSymbol(MathSymbol::SubsetEq) => {
            (P::Relational, Infix::Binary(BinaryOp::SubsetEq))
        }
        TokenKind::DotDot => (P::Range, Infix::Range),
        TokenKind::Plus => (P::Additive, Infix::Binary(BinaryOp::Add)),
        TokenKind::Minus => (P::Additive, Infix::Binary(BinaryOp::Sub)),
        TokenKind::MathSymbol(MathSymbol::Union) => (P::Additive, Infix::Binary(BinaryOp::Union)),
        TokenKind::Star | TokenKind::MathSymbol(MathSymbol::Times) => {
            (P::Multiplicative, Infix::Binary(BinaryOp::Mul))
        }
        TokenKind::Slash | TokenKind::MathSymbol(MathSymbol::Divide) => {
            (P::Multiplicative, Infix::Binary(BinaryOp::Div))
        }
        TokenKind::Percent => (P::Multiplicative, Infix::Binary(BinaryOp::Mod)),
        TokenKind::MathSymbol(MathSymbol::Intersection) => {
            (P::Multiplicative, Infix::Binary(BinaryOp::Intersect))
        }
        _ => return None,
    };
    Some(entry)
}

fn assign_op(kind: &TokenKind) -> Option<AssignOp> {
    Some(match kind {
        TokenKind::Assign => AssignOp::Assign,
        TokenKind::PlusAssign => AssignOp::Add,
        TokenKind::MinusAssign => AssignOp::Sub,
        TokenKind::StarAssign => AssignOp::Mul,
        TokenKind::SlashAssign => AssignOp::Div,
        TokenKind::PercentAssign => AssignOp::Mod,
        TokenKind::NullCoalesceAssign => AssignOp::Coalesce,
        _ => return None,
    })
}

pub(super) fn number_literal(number: NumberLiteral) -> Literal {
    match number.suffix {
        Some(NumericSuffix::Decimal) => Literal::Decimal(number.value),
        Some(_) => Literal::Float(number.value),
        None if number.is_integer && number.value.abs() < 9.2e18 => {
            Literal::Integer(number.value as i64)
        }
        None => Literal::Float(number.value),
    }
}

impl Parser {
    //=============================================
    //            Section 6: Expression Parsing
    //=============================================

    pub(super) fn parse_expression(&mut self) -> ParseResult<Expr> {
        self.enter_expression()?;
        let result = self.parse_assignment();
        self.exit_expression();
        result
    }

    fn parse_assignment(&mut self) -> ParseResult<Expr> {
        let target = self.parse_conditional()?;
        let Some(op) = assign_op(&self.peek().kind) else {
            return Ok(target);
        };
        let position = self.current_position();
        if !matches!(
            target.kind,
            ExprKind::Identifier(_) | ExprKind::Member { .. } | ExprKind::Index { .. }
        ) {
            return Err(ParseError::new(
                self.peek().lexeme.clone(),
                "assignable target before assignment",
                position,
            ));
        }
        self.advance();
        let value = self.parse_expression()?;
        let start = target.position;
        Ok(self.make_expr(
            ExprKind::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
            start,
        ))
    }

    fn parse_conditional(&mut self) -> ParseResult<Expr> {
        let condition = self.parse_binary(Precedence::Coalesce)?;
        if !self.match_token(&TokenKind::Question) {
            return Ok(condition);
        }
        let then_branch = self.parse_expression()?;
        self.consume(&TokenKind::Colon, "':' in conditional expression")?;
        let else_branch = self.parse_expression()?;
        let start = condition.position;
        Ok(self.make_expr(
            ExprKind::Conditional {
                condition: Box::new(condition),
                then_branch: Box::new(then_branch),
                else_branch: Box::new(else_branch),
            },
            start,
        ))
    }

    /// Precedence climbing over the infix table.
    pub(super) fn parse_binary(&mut self, min: Precedence) -> ParseResult<Expr> {
        let mut left = self.parse_unary()?;
        while let Some((precedence, operator)) = infix(&self.peek().kind) {
            if precedence < min {
                break;
            }
            self.advance();
            let start = left.position;
            let kind = match operator {
                Infix::Is => {
                    let pattern = self.parse_pattern()?;
                    ExprKind::Is {
                        value: Box::new(left),
                        pattern: Box::new(pattern),
                    }
                }
                Infix::As => {
                    let ty = self.parse_type()?;
                    ExprKind::As {
                        value: Box::new(left),
                        ty,
                    }
                }
                Infix::Logical(LogicalOp::Coalesce) => {
                    // right associative
                    let right = self.parse_binary(precedence)?;
                    ExprKind::Logical {
                        op: LogicalOp::Coalesce,
                        left: Box::new(left),
                        right: Box::new(right),
                    }
                }
                Infix::Logical(op) => {
                    let right = self.parse_binary(precedence.next())?;
                    ExprKind::Logical {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    }
                }
                Infix::Range => {
                    let end = self.parse_binary(precedence.next())?;
                    ExprKind::Range {
                        start: Box::new(left),
                        end: Box::new(end),
                    }
                }
                Infix::Binary(op) => {
                    let right = if precedence == Precedence::Multiplicative {
                        self.parse_unary()?
                    } else {
                        self.parse_binary(precedence.next())?
                    };
                    ExprKind::Binary {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    }
                }
            };
            left = self.make_expr(kind, start);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        let token = self.peek().clone();
        let op = match token.kind {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Plus => Some(UnaryOp::Plus),
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            TokenKind::MathSymbol(MathSymbol::Sqrt) => Some(UnaryOp::Sqrt),
            TokenKind::Await => Some(UnaryOp::Await),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            self.enter_expression()?;
            let operand = self.parse_unary();
            self.exit_expression();
            let operand = operand?;
            return Ok(self.make_expr(
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                token.position,
            ));
        }
        if matches!(token.kind, TokenKind::PlusPlus | TokenKind::MinusMinus) {
            self.advance();
            let target = self.parse_unary()?;
            return Ok(self.make_expr(
                ExprKind::Update {
                    increment: token.kind == TokenKind::PlusPlus,
                    prefix: true,
                    target: Box::new(target),
                },
                token.position,
            ));
        }
        self.parse_power()
    }

    /// `**` binds tighter than prefix operators and groups to the right.
    fn parse_power(&mut self) -> ParseResult<Expr> {
        let base = self.parse_postfix()?;
        if !self.match_token(&TokenKind::StarStar) {
            return Ok(base);
        }
        let exponent = self.parse_unary()?;
        let start = base.position;
        Ok(self.make_expr(
            ExprKind::Binary {
                op: BinaryOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            },
            start,
        ))
    }

    fn parse_postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            let start = expr.position;
            match self.peek().kind {
                TokenKind::LeftParen => {
                    let args = self.parse_arguments()?;
                    expr = self.make_expr(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            type_args: Vec::new(),
                            args,
                        },
                        start,
                    );
                }
                TokenKind::Less
                    if matches!(expr.kind, ExprKind::Identifier(_) | ExprKind::Member { .. })
                        && self.generic_call_ahead() =>
                {
                    let type_args = self.parse_type_arguments()?;
                    let args = self.parse_arguments()?;
                    expr = self.make_expr(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            type_args,
                            args,
                        },
                        start,
                    );
                }
                TokenKind::LeftBracket | TokenKind::QuestionBracket => {
                    let null_safe = self.advance().kind == TokenKind::QuestionBracket;
                    let index = self.parse_expression()?;
                    self.consume(&TokenKind::RightBracket, "']' after index")?;
                    expr = self.make_expr(
                        ExprKind::Index {
                            target: Box::new(expr),
                            index: Box::new(index),
                            null_safe,
                        },
                        start,
                    );
                }
                TokenKind::Dot | TokenKind::QuestionDot => {
                    let null_safe = self.advance().kind == TokenKind::QuestionDot;
                    let name = self.parse_member_name()?;
                    expr = self.make_expr(
                        ExprKind::Member {
                            target: Box::new(expr),
                            name,
                            null_safe,
                        },
                        start,
                    );
                }
                TokenKind::PlusPlus | TokenKind::MinusMinus => {
                    let increment = self.advance().kind == TokenKind::PlusPlus;
                    expr = self.make_expr(
                        ExprKind::Update {
                            increment,
                            prefix: false,
                            target: Box::new(expr),
                        },
                        start,
                    );
                }
                TokenKind::Switch if self.check_at(1, &TokenKind::LeftBrace) => {
                    self.advance();
                    let arms = self.parse_switch_arms()?;
                    expr = self.make_expr(
                        ExprKind::Switch {
                            subject: Box::new(expr),
                            arms,
                        },
                        start,
                    );
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_member_name(&mut self) -> ParseResult<Symbol> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Identifier(name) | TokenKind::PrimitiveType(name) => {
                self.advance();
                Ok(Symbol::from(name))
            }
            // keywords are valid member names after a dot
            _ if token.lexeme.chars().next().is_some_and(char::is_alphabetic) => {
                self.advance();
                Ok(Symbol::from(token.lexeme))
            }
            _ => Err(self.error_here("member name")),
        }
    }

    pub(super) fn parse_arguments(&mut self) -> ParseResult<Vec<Expr>> {
        self.consume(&TokenKind::LeftParen, "'('")?;
        let mut args = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            loop {
                args.push(self.parse_expression()?);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(&TokenKind::RightParen, "')' after arguments")?;
        Ok(args)
    }

    /// `{ pattern [when guard] => expr, ... }` of switch and match
    /// expressions.
    fn parse_switch_arms(&mut self) -> ParseResult<Vec<SwitchArm>> {
        self.consume(&TokenKind::LeftBrace, "'{' to open switch arms")?;
        let mut arms = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            let position = self.current_position();
            let pattern = self.parse_pattern()?;
            let guard = if self.match_token(&TokenKind::When) {
                Some(self.parse_expression()?)
            } else {
                None
            };
            self.consume(&TokenKind::FatArrow, "'=>' after pattern")?;
            let body = self.parse_expression()?;
            arms.push(SwitchArm {
                pattern,
                guard,
                body,
                position,
            });
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        self.consume(&TokenKind::RightBrace, "'}' to close switch arms")?;
        Ok(arms)
    }

    //=============================================
    //            Section 7: Primary Expressions
    //=============================================

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let token = self.peek().clone();
        let position = token.position;
        let kind = match token.kind {
            TokenKind::Number(number) => {
                self.advance();
                ExprKind::Literal(number_literal(number))
            }
            TokenKind::Str(text) => {
                self.advance();
                ExprKind::Literal(Literal::String(text))
            }
            TokenKind::Char(ch) => {
                self.advance();
                ExprKind::Literal(Literal::Char(ch))
            }
            TokenKind::True | TokenKind::False => {
                self.advance();
                ExprKind::Literal(Literal::Bool(token.kind == TokenKind::True))
            }
            TokenKind::Null => {
                self.advance();
                ExprKind::Literal(Literal::Null)
            }
            TokenKind::InterpolatedString(parts) => {
                self.advance();
                ExprKind::Interpolated(self.parse_interpolation(parts)?)
            }
            TokenKind::Identifier(name) => {
                if self.check_at(1, &TokenKind::FatArrow) {
                    return self.parse_single_param_lambda();
                }
                self.advance();
                ExprKind::Identifier(Symbol::from(name))
            }
            TokenKind::PrimitiveType(name) => {
                self.advance();
                ExprKind::Identifier(Symbol::from(name))
            }
            TokenKind::This => {
                self.advance();
                ExprKind::This
            }
            TokenKind::Base => {
                self.advance();
                ExprKind::Base
            }
            TokenKind::New => return self.parse_new(),
            TokenKind::LeftBracket => {
                self.advance();
                let items = self.parse_list(&TokenKind::RightBracket)?;
                self.consume(&TokenKind::RightBracket, "']' after array elements")?;
                ExprKind::Array(items)
            }
            TokenKind::LeftParen => {
                if self.lambda_ahead() {
                    return self.parse_lambda();
                }
                if self.cast_ahead() {
                    let found = format!("({})", self.peek_at(1).lexeme);
                    return Err(ParseError::new(found, "'as' for casts, as in `value as int`", position));
                }
                self.advance();
                let first = self.parse_expression()?;
                if self.match_token(&TokenKind::Comma) {
                    let mut items = vec![first];
                    items.extend(self.parse_list(&TokenKind::RightParen)?);
                    self.consume(&TokenKind::RightParen, "')' after tuple")?;
                    ExprKind::Tuple(items)
                } else {
                    self.consume(&TokenKind::RightParen, "')' after expression")?;
                    return Ok(first);
                }
            }
            TokenKind::Function | TokenKind::Fn if self.check_at(1, &TokenKind::LeftParen) => {
                return self.parse_anonymous_function();
            }
            TokenKind::Match => {
                self.advance();
                let subject = self.parse_expression()?;
                let arms = self.parse_switch_arms()?;
                ExprKind::Switch {
                    subject: Box::new(subject),
                    arms,
                }
            }
            TokenKind::MathSymbol(symbol) => {
                self.advance();
                if let Some(value) = symbol.constant_value() {
                    ExprKind::Literal(Literal::Float(value))
                } else {
                    let name = match symbol {
                        MathSymbol::Sum => "sum",
                        MathSymbol::Product => "product",
                        _ => {
                            return Err(ParseError::new(
                                token.lexeme,
                                "expression (operator has no evaluation rule)",
                                position,
                            ));
                        }
                    };
                    ExprKind::Identifier(Symbol::from(name))
                }
            }
            _ => return Err(self.error_here("expression")),
        };
        Ok(self.make_expr(kind, position))
    }

    fn parse_list(&mut self, close: &TokenKind) -> ParseResult<Vec<Expr>> {
        let mut items = Vec::new();
        while !self.check(close) && !self.is_at_end() {
            items.push(self.parse_expression()?);
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        Ok(items)
    }

    fn parse_new(&mut self) -> ParseResult<Expr> {
        let position = self.consume(&TokenKind::New, "new")?.position;
        // `new[] { ... }` and `new T[] { ... }` array creation
        if self.check(&TokenKind::LeftBracket) {
            self.advance();
            self.consume(&TokenKind::RightBracket, "']' in array creation")?;
            return self.parse_array_initializer(position);
        }
        let ty = self.parse_type()?;
        if matches!(ty, crate::ast::TypeExpr::Array(_)) {
            return self.parse_array_initializer(position);
        }
        let args = if self.check(&TokenKind::LeftParen) {
            self.parse_arguments()?
        } else {
            Vec::new()
        };
        Ok(self.make_expr(ExprKind::New { ty, args }, position))
    }

    fn parse_array_initializer(&mut self, position: crate::tokenizer::Position) -> ParseResult<Expr> {
        self.consume(&TokenKind::LeftBrace, "'{' in array creation")?;
        let items = self.parse_list(&TokenKind::RightBrace)?;
        self.consume(&TokenKind::RightBrace, "'}' after array elements")?;
        Ok(self.make_expr(ExprKind::Array(items), position))
    }

    fn parse_interpolation(&mut self, parts: Vec<InterpolationPart>) -> ParseResult<Vec<InterpolationSegment>> {
        let mut segments = Vec::new();
        for part in parts {
            match part {
                InterpolationPart::Literal(text) => segments.push(InterpolationSegment::Text(text)),
                InterpolationPart::Expression(tokens) => {
                    let mut inner = Parser::new(tokens);
                    inner.next_id = self.next_id;
                    let expr = inner.parse_expression_only()?;
                    self.next_id = inner.next_id;
                    segments.push(InterpolationSegment::Expr(expr));
                }
            }
        }
        Ok(segments)
    }

    //=============================================
    //            Section 8: Lambdas
    //=============================================

    /// `(` starts a lambda when its matching `)` is followed by `=>`.
    /// `(Type)operand`: a C-style cast, which Strata spells with `as`.
    fn cast_ahead(&self) -> bool {
        if !self.check_at(2, &TokenKind::RightParen) {
            return false;
        }
        let operand = self.peek_at(3);
        let starts_operand = operand.position.line == self.peek_at(2).position.line
            && matches!(
                operand.kind,
                TokenKind::Identifier(_)
                    | TokenKind::Number(_)
                    | TokenKind::Str(_)
                    | TokenKind::Char(_)
                    | TokenKind::InterpolatedString(_)
                    | TokenKind::True
                    | TokenKind::False
                    | TokenKind::Null
                    | TokenKind::This
            );
        match self.peek_at(1).kind {
            TokenKind::PrimitiveType(_) => starts_operand || self.check_at(3, &TokenKind::LeftParen),
            TokenKind::Identifier(_) => starts_operand,
            _ => false,
        }
    }

    fn lambda_ahead(&self) -> bool {
        let mut nesting = 0usize;
        let mut distance = 0;
        loop {
            match &self.peek_at(distance).kind {
                TokenKind::LeftParen => nesting += 1,
                TokenKind::RightParen => {
                    nesting -= 1;
                    if nesting == 0 {
                        return self.check_at(distance + 1, &TokenKind::FatArrow)
                            || self.check_at(distance + 1, &TokenKind::Arrow);
                    }
                }
                TokenKind::Eof | TokenKind::Semicolon | TokenKind::LeftBrace => return false,
                _ => {}
            }
            distance += 1;
        }
    }

    fn parse_single_param_lambda(&mut self) -> ParseResult<Expr> {
        let position = self.current_position();
        let name = self.consume_identifier("parameter name")?;
        self.consume(&TokenKind::FatArrow, "'=>'")?;
        let params = vec![Param {
            name,
            ty: None,
            default: None,
            variadic: false,
            position,
        }];
        let body = self.parse_lambda_body()?;
        Ok(self.make_expr(
            ExprKind::Lambda {
                params,
                return_type: None,
                body,
            },
            position,
        ))
    }

    fn parse_lambda(&mut self) -> ParseResult<Expr> {
        let position = self.current_position();
        let params = self.parse_parameters()?;
        let return_type = if self.match_token(&TokenKind::Arrow) {
            Some(self.parse_type()?)
        } else {
            None
        };
        self.consume(&TokenKind::FatArrow, "'=>' after lambda parameters")?;
        let body = self.parse_lambda_body()?;
        Ok(self.make_expr(
            ExprKind::Lambda {
                params,
                return_type,
                body,
            },
            position,
        ))
    }

    fn parse_anonymous_function(&mut self) -> ParseResult<Expr> {
        let position = self.current_position();
        self.advance();
        let params = self.parse_parameters()?;
        let return_type = if self.match_token(&TokenKind::Arrow) || self.match_token(&TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        let body = if self.match_token(&TokenKind::FatArrow) {
            self.parse_lambda_body()?
        } else {
            LambdaBody::Block(self.in_function(|parser| parser.parse_block_body())?)
        };
        Ok(self.make_expr(
            ExprKind::Lambda {
                params,
                return_type,
                body,
            },
            position,
        ))
    }

    fn parse_lambda_body(&mut self) -> ParseResult<LambdaBody> {
        if self.check(&TokenKind::LeftBrace) {
            Ok(LambdaBody::Block(self.in_function(|parser| parser.parse_block_body())?))
        } else {
            Ok(LambdaBody::Expr(Box::new(self.parse_expression()?)))
        }
    }
}
