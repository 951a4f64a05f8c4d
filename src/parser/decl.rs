//=============================================
// strata/parser/decl.rs
//=============================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Declaration parsing
// Objective: Functions, parameters, classes and their members, interfaces,
//            enums and modules
//=============================================

use super::{ParseError, ParseResult, Parser};
use crate::ast::{
    BinaryOp, ClassDecl, ClassMember, ConstructorDecl, EnumDecl, FieldDecl, FunctionBody,
    FunctionDecl, InterfaceDecl, ModuleDecl, Modifiers, Param, Stmt, StmtKind, TypeExpr,
};
use crate::symbol::Symbol;
use crate::tokenizer::{Position, TokenKind};

impl Parser {
    fn parse_modifiers(&mut self) -> Modifiers {
        let mut modifiers = Modifiers::default();
        loop {
            match self.peek().kind {
                TokenKind::Static => modifiers.is_static = true,
                TokenKind::Abstract => modifiers.is_abstract = true,
                TokenKind::Virtual => modifiers.is_virtual = true,
                TokenKind::Override => modifiers.is_override = true,
                TokenKind::Async => modifiers.is_async = true,
                TokenKind::Public | TokenKind::Private | TokenKind::Protected | TokenKind::Readonly => {}
                _ => return modifiers,
            }
            self.advance();
        }
    }

    /// Declarations introduced by modifiers or a declaration keyword.
    pub(super) fn parse_declaration(&mut self) -> ParseResult<Stmt> {
        let position = self.current_position();
        let doc = self.peek().doc.clone();
        let modifiers = self.parse_modifiers();
        match self.peek().kind {
            TokenKind::Class => self.parse_class(modifiers, doc, position),
            TokenKind::Interface => self.parse_interface(position),
            TokenKind::Enum => self.parse_enum(position),
            TokenKind::Module => self.parse_module(position),
            TokenKind::Function | TokenKind::Fn => {
                self.advance();
                self.parse_function_rest(None, modifiers, doc, position)
            }
            _ => {
                let ty = self.parse_type()?;
                self.parse_function_rest(Some(ty), modifiers, doc, position)
            }
        }
    }

    pub(super) fn parse_function_declaration(&mut self) -> ParseResult<Stmt> {
        let position = self.current_position();
        let doc = self.peek().doc.clone();
        self.advance();
        self.parse_function_rest(None, Modifiers::default(), doc, position)
    }

    /// Everything after `function`/`fn` or a leading return type: name,
    /// generic parameters, parameters, trailing return type, constraints
    /// and body.
    pub(super) fn parse_function_rest(
        &mut self,
        leading_type: Option<TypeExpr>,
        modifiers: Modifiers,
        doc: Option<String>,
        position: Position,
    ) -> ParseResult<Stmt> {
        let function = self.parse_function_decl(leading_type, modifiers, doc, position)?;
        Ok(Stmt {
            kind: StmtKind::Function(function),
            position,
        })
    }

    fn parse_function_decl(
        &mut self,
        leading_type: Option<TypeExpr>,
        modifiers: Modifiers,
        doc: Option<String>,
        position: Position,
    ) -> ParseResult<FunctionDecl> {
        let name = self.consume_identifier("function name")?;
        let mut type_params = self.parse_type_params()?;
        let params = self.parse_parameters()?;
        let mut return_type = leading_type;
        if self.match_token(&TokenKind::Arrow) || self.match_token(&TokenKind::Colon) {
            return_type = Some(self.parse_type()?);
        }
        self.parse_where_clauses(&mut type_params)?;
        let body = self.parse_function_body(modifiers.is_abstract)?;
        let id = self.next_id;
        self.next_id += 1;
        Ok(FunctionDecl {
            id,
            name,
            type_params,
            params,
            return_type,
            body,
            modifiers,
            operator: None,
            doc,
            position,
        })
    }

    /// Block, `=> expr;`, or `;` for bodiless members.
    fn parse_function_body(&mut self, bodiless: bool) -> ParseResult<FunctionBody> {
        if self.check(&TokenKind::LeftBrace) {
            let body = self.in_function(|parser| parser.parse_block_body())?;
            return Ok(FunctionBody::Block(body));
        }
        if self.match_token(&TokenKind::FatArrow) {
            let expr = self.in_function(|parser| parser.parse_expression())?;
            self.end_statement()?;
            return Ok(FunctionBody::Expr(Box::new(expr)));
        }
        if bodiless && self.match_token(&TokenKind::Semicolon) {
            return Ok(FunctionBody::None);
        }
        Err(self.error_here("function body"))
    }

    /// `(params)`: `Type name`, `name: Type`, `name`, each with an optional
    /// default; `params` marks the trailing variadic parameter.
    pub(super) fn parse_parameters(&mut self) -> ParseResult<Vec<Param>> {
        self.consume(&TokenKind::LeftParen, "'(' before parameters")?;
        let mut params: Vec<Param> = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            loop {
                let param = self.parse_parameter()?;
                if params.last().is_some_and(|last| last.variadic) {
                    return Err(ParseError::new(
                        param.name.into_string(),
                        "no parameter after params",
                        param.position,
                    ));
                }
                params.push(param);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(&TokenKind::RightParen, "')' after parameters")?;
        Ok(params)
    }

    fn parse_parameter(&mut self) -> ParseResult<Param> {
        let position = self.current_position();
        let variadic = self.match_token(&TokenKind::Params);
        self.match_token(&TokenKind::Mut);
        let simple_name = matches!(self.peek().kind, TokenKind::Identifier(_))
            && matches!(
                self.peek_at(1).kind,
                TokenKind::Colon | TokenKind::Comma | TokenKind::RightParen | TokenKind::Assign
            );
        let (name, ty) = if simple_name {
            let name = self.consume_identifier("parameter name")?;
            let ty = if self.match_token(&TokenKind::Colon) {
                Some(self.parse_type()?)
            } else {
                None
            };
            (name, ty)
        } else {
            let ty = self.parse_type()?;
            (self.consume_identifier("parameter name")?, Some(ty))
        };
        let default = if self.match_token(&TokenKind::Assign) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        Ok(Param {
            name,
            ty,
            default,
            variadic,
            position,
        })
    }

    //=============================================
    //            Section 5c: Classes
    //=============================================

    fn parse_class(&mut self, modifiers: Modifiers, doc: Option<String>, position: Position) -> ParseResult<Stmt> {
        self.consume(&TokenKind::Class, "class")?;
        let name = self.consume_identifier("class name")?;
        let mut type_params = self.parse_type_params()?;
        let bases = self.parse_base_list()?;
        self.parse_where_clauses(&mut type_params)?;
        self.consume(&TokenKind::LeftBrace, "'{' to open class body")?;
        let mut members = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            members.push(self.parse_class_member(&name)?);
        }
        self.consume(&TokenKind::RightBrace, "'}' to close class body")?;
        Ok(Stmt {
            kind: StmtKind::Class(ClassDecl {
                name,
                type_params,
                bases,
                members,
                is_abstract: modifiers.is_abstract,
                doc,
                position,
            }),
            position,
        })
    }

    fn parse_base_list(&mut self) -> ParseResult<Vec<TypeExpr>> {
        let mut bases = Vec::new();
        if self.match_token(&TokenKind::Colon) {
            loop {
                bases.push(self.parse_type()?);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        Ok(bases)
    }

    fn parse_class_member(&mut self, class_name: &Symbol) -> ParseResult<ClassMember> {
        let position = self.current_position();
        let doc = self.peek().doc.clone();
        let modifiers = self.parse_modifiers();

        // constructor: `ClassName(params) [: base(args)] { }`
        if matches!(&self.peek().kind, TokenKind::Identifier(name) if name == class_name.as_str())
            && self.check_at(1, &TokenKind::LeftParen)
        {
            self.advance();
            let params = self.parse_parameters()?;
            let base_args = if self.match_token(&TokenKind::Colon) {
                self.consume(&TokenKind::Base, "base")?;
                Some(self.parse_arguments()?)
            } else {
                None
            };
            let body = self.in_function(|parser| parser.parse_block_body())?;
            return Ok(ClassMember::Constructor(ConstructorDecl {
                params,
                base_args,
                body,
                position,
            }));
        }

        match self.peek().kind {
            TokenKind::Function | TokenKind::Fn => {
                self.advance();
                let method = self.parse_function_decl(None, modifiers, doc, position)?;
                return Ok(ClassMember::Method(method));
            }
            TokenKind::Var | TokenKind::Let | TokenKind::Const => {
                let is_const = self.check(&TokenKind::Const);
                let stmt = self.parse_var_declaration()?;
                self.end_statement()?;
                let StmtKind::Var(decl) = stmt.kind else {
                    return Err(self.error_here("field declaration"));
                };
                return Ok(ClassMember::Field(FieldDecl {
                    name: decl.name,
                    ty: decl.ty,
                    init: decl.init,
                    is_static: modifiers.is_static || is_const,
                    is_const,
                    is_property: false,
                    position,
                }));
            }
            TokenKind::Identifier(_) if self.check_at(1, &TokenKind::Colon) => {
                let name = self.consume_identifier("field name")?;
                self.advance();
                let ty = self.parse_type()?;
                let init = if self.match_token(&TokenKind::Assign) {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                self.end_statement()?;
                return Ok(ClassMember::Field(FieldDecl {
                    name,
                    ty: Some(ty),
                    init,
                    is_static: modifiers.is_static,
                    is_const: false,
                    is_property: false,
                    position,
                }));
            }
            _ => {}
        }

        let ty = self.parse_type()?;
        if self.match_token(&TokenKind::Operator) {
            return self
                .parse_operator_overload(ty, modifiers, doc, position)
                .map(ClassMember::Method);
        }
        if self.check_at(1, &TokenKind::LeftParen) || self.check_at(1, &TokenKind::Less) {
            let method = self.parse_function_decl(Some(ty), modifiers, doc, position)?;
            return Ok(ClassMember::Method(method));
        }
        let name = self.consume_identifier("member name")?;
        let is_property = self.check(&TokenKind::LeftBrace);
        if is_property {
            self.skip_accessors()?;
        }
        let init = if self.match_token(&TokenKind::Assign) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        if !is_property || init.is_some() {
            self.end_statement()?;
        }
        Ok(ClassMember::Field(FieldDecl {
            name,
            ty: Some(ty),
            init,
            is_static: modifiers.is_static,
            is_const: false,
            is_property,
            position,
        }))
    }

    /// `{ get; set; }` accessor list of an auto-property.
    fn skip_accessors(&mut self) -> ParseResult<()> {
        self.consume(&TokenKind::LeftBrace, "'{' for accessors")?;
        while !self.check(&TokenKind::RightBrace) {
            let token = self.peek();
            let accessor = matches!(token.lexeme.as_str(), "get" | "set" | "init")
                || matches!(
                    token.kind,
                    TokenKind::Semicolon | TokenKind::Private | TokenKind::Protected | TokenKind::Public
                );
            if !accessor {
                return Err(self.error_here("'get' or 'set'"));
            }
            self.advance();
        }
        self.consume(&TokenKind::RightBrace, "'}' after accessors")?;
        Ok(())
    }

    fn parse_operator_overload(
        &mut self,
        return_type: TypeExpr,
        modifiers: Modifiers,
        doc: Option<String>,
        position: Position,
    ) -> ParseResult<FunctionDecl> {
        let token = self.advance().clone();
        let op = match token.kind {
            TokenKind::Plus => BinaryOp::Add,
            TokenKind::Minus => BinaryOp::Sub,
            TokenKind::Star => BinaryOp::Mul,
            TokenKind::Slash => BinaryOp::Div,
            TokenKind::Percent => BinaryOp::Mod,
            TokenKind::EqualEqual => BinaryOp::Eq,
            TokenKind::NotEqual => BinaryOp::NotEq,
            TokenKind::Less => BinaryOp::Less,
            TokenKind::Greater => BinaryOp::Greater,
            TokenKind::LessEqual => BinaryOp::LessEq,
            TokenKind::GreaterEqual => BinaryOp::GreaterEq,
            _ => {
                return Err(ParseError::new(
                    token.lexeme,
                    "overloadable operator",
                    token.position,
                ));
            }
        };
        let params = self.parse_parameters()?;
        if params.len() != 2 {
            return Err(ParseError::new(
                format!("{} parameters", params.len()),
                "two operands for binary operator",
                position,
            ));
        }
        let body = self.parse_function_body(false)?;
        let id = self.next_id;
        self.next_id += 1;
        Ok(FunctionDecl {
            id,
            name: Symbol::from(format!("op_{op:?}")),
            type_params: Vec::new(),
            params,
            return_type: Some(return_type),
            body,
            modifiers: Modifiers {
                is_static: true,
                ..modifiers
            },
            operator: Some(op),
            doc,
            position,
        })
    }

    //=============================================
    //            Section 5d: Interfaces, Enums, Modules
    //=============================================

    fn parse_interface(&mut self, position: Position) -> ParseResult<Stmt> {
        self.consume(&TokenKind::Interface, "interface")?;
        let name = self.consume_identifier("interface name")?;
        let mut type_params = self.parse_type_params()?;
        let bases = self.parse_base_list()?;
        self.parse_where_clauses(&mut type_params)?;
        self.consume(&TokenKind::LeftBrace, "'{' to open interface body")?;
        let mut methods = Vec::new();
        let mut properties = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            let member_position = self.current_position();
            let doc = self.peek().doc.clone();
            let modifiers = self.parse_modifiers();
            let leading = if matches!(self.peek().kind, TokenKind::Function | TokenKind::Fn) {
                self.advance();
                None
            } else {
                Some(self.parse_type()?)
            };
            if leading.is_some() && self.check_at(1, &TokenKind::LeftBrace) {
                let property_name = self.consume_identifier("property name")?;
                self.skip_accessors()?;
                properties.push(FieldDecl {
                    name: property_name,
                    ty: leading,
                    init: None,
                    is_static: false,
                    is_const: false,
                    is_property: true,
                    position: member_position,
                });
                continue;
            }
            let method_modifiers = Modifiers {
                is_abstract: true,
                ..modifiers
            };
            methods.push(self.parse_function_decl(leading, method_modifiers, doc, member_position)?);
        }
        self.consume(&TokenKind::RightBrace, "'}' to close interface body")?;
        Ok(Stmt {
            kind: StmtKind::Interface(InterfaceDecl {
                name,
                type_params,
                bases,
                methods,
                properties,
                position,
            }),
            position,
        })
    }

    fn parse_enum(&mut self, position: Position) -> ParseResult<Stmt> {
        self.consume(&TokenKind::Enum, "enum")?;
        let name = self.consume_identifier("enum name")?;
        self.consume(&TokenKind::LeftBrace, "'{' to open enum body")?;
        let mut variants = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            let variant = self.consume_identifier("enum member")?;
            let value = if self.match_token(&TokenKind::Assign) {
                let negative = self.match_token(&TokenKind::Minus);
                match self.peek().kind {
                    TokenKind::Number(number) if number.is_integer => {
                        self.advance();
                        let value = number.value as i64;
                        Some(if negative { -value } else { value })
                    }
                    _ => return Err(self.error_here("integer enum value")),
                }
            } else {
                None
            };
            variants.push((variant, value));
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        self.consume(&TokenKind::RightBrace, "'}' to close enum body")?;
        Ok(Stmt {
            kind: StmtKind::Enum(EnumDecl {
                name,
                variants,
                position,
            }),
            position,
        })
    }

    fn parse_module(&mut self, position: Position) -> ParseResult<Stmt> {
        self.consume(&TokenKind::Module, "module")?;
        let mut name = self.consume_identifier("module name")?.into_string();
        while self.match_token(&TokenKind::Dot) {
            name.push('.');
            name.push_str(&self.consume_identifier("module name")?);
        }
        let body = self.parse_block_body()?;
        Ok(Stmt {
            kind: StmtKind::Module(ModuleDecl {
                name: Symbol::from(name),
                body,
                position,
            }),
            position,
        })
    }
}
