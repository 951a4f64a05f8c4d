//=====================================================
// File: checker/stmt.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Statement checking
// Objective: Declarations, control flow, reachability, null-check
//            narrowing and class/inheritance validation
//=====================================================

use std::collections::HashMap;
use std::rc::Rc;

use super::registry::{FunctionSig, Member, TypeParamInfo};
use super::scope::{Storage, SymbolInfo};
use super::types::Type;
use super::{ClassContext, FunctionContext, TypeChecker, TypeErrorKind};
use crate::ast::{
    BinaryOp, CatchClause, ClassDecl, ClassMember, ConstructorDecl, DeclKind, Expr, ExprKind,
    FunctionBody, FunctionDecl, Literal, LogicalOp, ModuleDecl, Param, PatternKind, Stmt,
    StmtKind, SwitchCase, UnaryOp, VarDecl,
};
use crate::symbol::Symbol;
use crate::tokenizer::Position;

/// How control leaves a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Flow {
    Continues,
    /// `break` or `continue`: leaves the statement but not the function.
    Jumps,
    /// `return` or `throw` on every path.
    Exits,
}

impl Flow {
    fn join(self, other: Flow) -> Flow {
        match (self, other) {
            (Flow::Exits, Flow::Exits) => Flow::Exits,
            (Flow::Continues, _) | (_, Flow::Continues) => Flow::Continues,
            _ => Flow::Jumps,
        }
    }
}

fn is_true_literal(expr: &Expr) -> bool {
    matches!(expr.kind, ExprKind::Literal(Literal::Bool(true)))
}

fn is_hoisted(stmt: &Stmt) -> bool {
    matches!(
        stmt.kind,
        StmtKind::Function(_)
            | StmtKind::Class(_)
            | StmtKind::Interface(_)
            | StmtKind::Enum(_)
            | StmtKind::Module(_)
    )
}

/// A `break` that leaves `stmt` itself rather than a nested loop or switch.
pub(super) fn breaks_out(stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Break => true,
        StmtKind::Block(stmts) => stmts.iter().any(breaks_out),
        StmtKind::If {
            then_branch,
            else_branch,
            ..
        } => breaks_out(then_branch) || else_branch.as_deref().is_some_and(breaks_out),
        StmtKind::Try {
            body,
            catches,
            finally,
        } => {
            body.iter().any(breaks_out)
                || catches.iter().any(|clause| clause.body.iter().any(breaks_out))
                || finally.as_ref().is_some_and(|stmts| stmts.iter().any(breaks_out))
        }
        _ => false,
    }
}

/// Names known to be non-null when `condition` evaluates to `when`.
pub(super) fn null_checked(condition: &Expr, when: bool) -> Vec<Symbol> {
    match &condition.kind {
        ExprKind::Binary { op, left, right } if op.is_equality() => {
            let positive = (*op == BinaryOp::NotEq) == when;
            if !positive {
                return Vec::new();
            }
            match (&left.kind, &right.kind) {
                (ExprKind::Identifier(name), ExprKind::Literal(Literal::Null))
                | (ExprKind::Literal(Literal::Null), ExprKind::Identifier(name)) => vec![name.clone()],
                _ => Vec::new(),
            }
        }
        ExprKind::Logical {
            op: LogicalOp::And,
            left,
            right,
        } if when => {
            let mut names = null_checked(left, true);
            names.extend(null_checked(right, true));
            names
        }
        ExprKind::Logical {
            op: LogicalOp::Or,
            left,
            right,
        } if !when => {
            let mut names = null_checked(left, false);
            names.extend(null_checked(right, false));
            names
        }
        ExprKind::Unary {
            op: UnaryOp::Not,
            operand,
        } => null_checked(operand, !when),
        ExprKind::Is { value, pattern } if when => match (&value.kind, &pattern.kind) {
            (ExprKind::Identifier(_), PatternKind::Not(_)) => Vec::new(),
            (ExprKind::Identifier(name), PatternKind::Type { .. } | PatternKind::Property { .. }) => {
                vec![name.clone()]
            }
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

impl TypeChecker {
    pub(super) fn narrow_all(&mut self, names: &[Symbol]) {
        for name in names {
            let Some(info) = self.scopes.lookup(name) else {
                continue;
            };
            if info.ty.is_nullable() {
                let narrowed = info.ty.non_null();
                self.scopes.narrow(name, narrowed);
            }
        }
    }

    //=====================================================
    // Section 1: Blocks
    //=====================================================

    /// Checks statements in the current scope.
    pub(super) fn check_block_statements(&mut self, statements: &[Stmt]) -> Flow {
        let mut flow = Flow::Continues;
        let mut warned = false;
        for stmt in statements {
            if flow != Flow::Continues && !warned && !is_hoisted(stmt) {
                self.report(
                    TypeErrorKind::UnreachableCode,
                    "unreachable statement",
                    stmt.position,
                );
                warned = true;
            }
            let next = self.check_stmt(stmt);
            if flow == Flow::Continues {
                flow = next;
            }
        }
        flow
    }

    pub(super) fn check_block(&mut self, statements: &[Stmt]) -> Flow {
        self.scopes.push();
        let flow = self.check_block_statements(statements);
        self.scopes.pop();
        flow
    }

    fn check_scoped(&mut self, stmt: &Stmt) -> Flow {
        self.scopes.push();
        let flow = self.check_stmt(stmt);
        self.scopes.pop();
        flow
    }

    //=====================================================
    // Section 2: Statements
    //=====================================================

    pub(super) fn check_stmt(&mut self, stmt: &Stmt) -> Flow {
        match &stmt.kind {
            StmtKind::Var(decl) => {
                self.check_var(decl, stmt.position);
                Flow::Continues
            }
            StmtKind::Function(function) => {
                self.check_function_stmt(function);
                Flow::Continues
            }
            StmtKind::Class(class) => {
                self.check_class(class);
                Flow::Continues
            }
            StmtKind::Interface(_) => Flow::Continues,
            StmtKind::Enum(decl) => {
                let mut seen = Vec::new();
                for (variant, _) in &decl.variants {
                    if seen.contains(&variant) {
                        self.redeclared(variant, decl.position);
                    }
                    seen.push(variant);
                }
                Flow::Continues
            }
            StmtKind::Module(decl) => {
                self.check_module(decl);
                Flow::Continues
            }
            StmtKind::Expr(expr) => {
                self.check_expr(expr);
                Flow::Continues
            }
            StmtKind::Set { name, value } => {
                self.check_set(name, value, stmt.position);
                Flow::Continues
            }
            StmtKind::Block(statements) => self.check_block(statements),
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => self.check_if(condition, then_branch, else_branch.as_deref()),
            StmtKind::While { condition, body } => {
                self.scopes.push();
                self.check_condition(condition);
                let narrowed = null_checked(condition, true);
                self.scopes.push();
                self.narrow_all(&narrowed);
                self.check_stmt(body);
                self.scopes.pop();
                self.scopes.pop();
                self.loop_flow(is_true_literal(condition), body)
            }
            StmtKind::DoWhile { body, condition } => {
                self.check_scoped(body);
                self.check_condition(condition);
                self.loop_flow(is_true_literal(condition), body)
            }
            StmtKind::For {
                init,
                condition,
                update,
                body,
            } => {
                self.scopes.push();
                if let Some(init) = init {
                    self.check_stmt(init);
                }
                if let Some(condition) = condition {
                    self.check_condition(condition);
                }
                for expr in update {
                    self.check_expr(expr);
                }
                self.check_scoped(body);
                self.scopes.pop();
                let infinite = condition.as_ref().is_none_or(is_true_literal);
                self.loop_flow(infinite, body)
            }
            StmtKind::Foreach {
                var,
                var_type,
                iterable,
                body,
            } => {
                let iterable_ty = self.check_expr(iterable);
                let element = match iterable_ty.non_null().element() {
                    Some(element) => element,
                    None => {
                        self.report_node(
                            TypeErrorKind::TypeMismatch,
                            format!("cannot iterate over {iterable_ty}"),
                            iterable.position,
                            Some(iterable.id),
                        );
                        Type::Any
                    }
                };
                let element = match var_type {
                    Some(declared) => {
                        let declared = self.resolve_type(declared, stmt.position);
                        self.expect_assignable(&element, &declared, stmt.position, None);
                        declared
                    }
                    None => element,
                };
                self.scopes.push();
                self.declare_local(var, element, stmt.position, true);
                self.check_stmt(body);
                self.scopes.pop();
                Flow::Continues
            }
            StmtKind::Repeat { count, body } => {
                let count_ty = self.check_expr(count);
                self.expect_assignable(&count_ty, &Type::Int, count.position, Some(count.id));
                self.check_scoped(body);
                Flow::Continues
            }
            StmtKind::Iterate {
                var,
                start,
                end,
                step,
                body,
            } => {
                let mut var_ty = Type::Int;
                for bound in [Some(start), Some(end), step.as_ref()].into_iter().flatten() {
                    let ty = self.check_expr(bound);
                    match Type::promote(&var_ty, &ty) {
                        Some(wider) => var_ty = wider,
                        None => self.mismatch(&Type::Int, &ty, bound.position, Some(bound.id)),
                    }
                }
                self.scopes.push();
                self.declare_local(var, var_ty, stmt.position, true);
                self.check_stmt(body);
                self.scopes.pop();
                Flow::Continues
            }
            StmtKind::Forever(body) => {
                self.check_scoped(body);
                self.loop_flow(true, body)
            }
            StmtKind::Parallel(inner) => self.check_stmt(inner),
            StmtKind::Switch { subject, cases } => self.check_switch(subject, cases),
            StmtKind::Try {
                body,
                catches,
                finally,
            } => self.check_try(body, catches, finally.as_deref()),
            StmtKind::Throw(value) => {
                match value {
                    Some(value) => {
                        let ty = self.check_expr(value);
                        if !self.registry.is_exception(&ty.non_null()) {
                            self.report_node(
                                TypeErrorKind::TypeMismatch,
                                format!("cannot throw {ty}; expected an Exception"),
                                value.position,
                                Some(value.id),
                            );
                        }
                    }
                    None if self.catch_depth == 0 => self.report(
                        TypeErrorKind::UndefinedSymbol,
                        "rethrow outside of a catch clause",
                        stmt.position,
                    ),
                    None => {}
                }
                Flow::Exits
            }
            StmtKind::Return(value) => {
                self.check_return(value.as_ref(), stmt.position);
                Flow::Exits
            }
            StmtKind::Break | StmtKind::Continue => Flow::Jumps,
            StmtKind::Asm(_) => Flow::Continues,
        }
    }

    fn loop_flow(&self, infinite: bool, body: &Stmt) -> Flow {
        if infinite && !breaks_out(body) {
            Flow::Exits
        } else {
            Flow::Continues
        }
    }

    pub(super) fn declare_local(&mut self, name: &Symbol, ty: Type, position: Position, mutable: bool) {
        let info = SymbolInfo::new(ty, Storage::Local, position, mutable);
        if self.scopes.declare(name.clone(), info).is_err() {
            self.redeclared(name, position);
        }
    }

    fn at_top_level(&self) -> bool {
        self.scopes.is_global() && self.functions.is_empty()
    }

    fn check_var(&mut self, decl: &VarDecl, position: Position) {
        let declared = decl.ty.as_ref().map(|ty| self.resolve_type(ty, position));
        let ty = match (&declared, &decl.init) {
            (Some(declared), Some(init)) => {
                let found = self.check_expr_with(init, Some(declared));
                self.expect_assignable(&found, declared, init.position, Some(init.id));
                declared.clone()
            }
            (Some(declared), None) => declared.clone(),
            (None, Some(init)) => {
                let found = self.check_expr(init);
                match found {
                    Type::Void => {
                        self.report_node(
                            TypeErrorKind::TypeMismatch,
                            format!("cannot initialise '{}' with a void expression", decl.name),
                            init.position,
                            Some(init.id),
                        );
                        Type::Any
                    }
                    Type::Null => Type::Any,
                    other => other,
                }
            }
            (None, None) => Type::Any,
        };
        let mutable = decl.mutable || decl.kind == DeclKind::Typed;
        let storage = if self.at_top_level() {
            Storage::Global
        } else {
            Storage::Local
        };
        let info = SymbolInfo::new(ty, storage, position, mutable);
        if self.at_top_level() {
            if let Some(module) = self.module.clone() {
                self.declare_module_member(&module, &decl.name, info, position);
                return;
            }
        }
        if self.scopes.declare(decl.name.clone(), info).is_err() {
            self.redeclared(&decl.name, position);
        }
    }

    fn check_set(&mut self, name: &Symbol, value: &Expr, position: Position) {
        match self.lookup(name) {
            Some(info) => {
                let found = self.check_expr_with(value, Some(&info.declared));
                if !info.mutable {
                    self.report(
                        TypeErrorKind::InvalidAssignment,
                        format!("cannot assign to immutable '{name}'"),
                        position,
                    );
                }
                self.expect_assignable(&found, &info.declared, value.position, Some(value.id));
            }
            None => {
                let found = self.check_expr(value);
                let storage = if self.at_top_level() {
                    Storage::Global
                } else {
                    Storage::Local
                };
                let info = SymbolInfo::new(found, storage, position, true);
                let _ = self.scopes.declare(name.clone(), info);
            }
        }
    }

    fn check_if(&mut self, condition: &Expr, then_branch: &Stmt, else_branch: Option<&Stmt>) -> Flow {
        self.scopes.push();
        self.check_condition(condition);
        self.scopes.push();
        let positive = null_checked(condition, true);
        self.narrow_all(&positive);
        let then_flow = self.check_stmt(then_branch);
        self.scopes.pop();
        let negative = null_checked(condition, false);
        let else_flow = match else_branch {
            Some(else_branch) => {
                self.scopes.push();
                self.narrow_all(&negative);
                let flow = self.check_stmt(else_branch);
                self.scopes.pop();
                flow
            }
            None => Flow::Continues,
        };
        self.scopes.pop();
        // `if (x == null) return;` leaves x non-null for the rest of the block.
        if else_branch.is_none() && then_flow == Flow::Exits {
            self.narrow_all(&negative);
        }
        then_flow.join(else_flow)
    }

    fn check_switch(&mut self, subject: &Expr, cases: &[SwitchCase]) -> Flow {
        let subject_ty = self.check_expr(subject);
        let mut flow: Option<Flow> = None;
        let mut has_default = false;
        for case in cases {
            has_default |= case.is_default;
            self.scopes.push();
            for label in &case.labels {
                self.check_pattern(&label.pattern, &subject_ty);
                if let Some(guard) = &label.guard {
                    self.check_condition(guard);
                }
                has_default |= label.guard.is_none() && label.pattern.is_irrefutable();
            }
            let case_flow = self.check_block_statements(&case.body);
            self.scopes.pop();
            // A section ending in `break` leaves the switch, not the function.
            let case_flow = match case_flow {
                Flow::Jumps if case.body.last().is_some_and(|stmt| matches!(stmt.kind, StmtKind::Break)) => {
                    Flow::Continues
                }
                other => other,
            };
            flow = Some(match flow {
                Some(previous) => previous.join(case_flow),
                None => case_flow,
            });
        }
        match flow {
            Some(Flow::Exits) if has_default => Flow::Exits,
            Some(Flow::Jumps) if has_default => Flow::Jumps,
            _ => Flow::Continues,
        }
    }

    fn check_try(&mut self, body: &[Stmt], catches: &[CatchClause], finally: Option<&[Stmt]>) -> Flow {
        let mut flow = self.check_block(body);
        for clause in catches {
            self.scopes.push();
            let caught = match &clause.ty {
                Some(name) => match self.registry.class(name) {
                    Some(_) => {
                        let ty = Type::User(name.clone());
                        if !self.registry.is_exception(&ty) {
                            self.report(
                                TypeErrorKind::TypeMismatch,
                                format!("'{name}' is not an Exception type"),
                                clause.position,
                            );
                        }
                        ty
                    }
                    None => {
                        self.report(
                            TypeErrorKind::UndefinedSymbol,
                            format!("unknown exception type '{name}'"),
                            clause.position,
                        );
                        Type::Any
                    }
                },
                None => Type::User(Symbol::from("Exception")),
            };
            if let Some(name) = &clause.name {
                self.declare_local(name, caught, clause.position, true);
            }
            self.catch_depth += 1;
            let clause_flow = self.check_block_statements(&clause.body);
            self.catch_depth -= 1;
            self.scopes.pop();
            flow = flow.join(clause_flow);
        }
        match finally {
            Some(statements) => match self.check_block(statements) {
                Flow::Exits => Flow::Exits,
                _ => flow,
            },
            None => flow,
        }
    }

    fn check_return(&mut self, value: Option<&Expr>, position: Position) {
        let Some(context) = self.functions.last().cloned() else {
            if let Some(value) = value {
                self.check_expr(value);
            }
            return;
        };
        if context.is_constructor {
            if let Some(value) = value {
                self.check_expr(value);
                self.report(
                    TypeErrorKind::TypeMismatch,
                    "constructors cannot return a value",
                    position,
                );
            }
            return;
        }
        match (context.ret, value) {
            (None, Some(value)) => {
                let found = self.check_expr(value);
                if let Some(context) = self.functions.last_mut() {
                    context.inferred.push(found);
                }
            }
            (None, None) => {
                if let Some(context) = self.functions.last_mut() {
                    context.inferred.push(Type::Void);
                }
            }
            (Some(Type::Void), Some(value)) => {
                self.check_expr(value);
                self.report_node(
                    TypeErrorKind::TypeMismatch,
                    "void function cannot return a value",
                    position,
                    Some(value.id),
                );
            }
            (Some(Type::Void | Type::Any), None) => {}
            (Some(expected), None) => {
                self.report(
                    TypeErrorKind::TypeMismatch,
                    format!("expected a return value of type {expected}"),
                    position,
                );
            }
            (Some(expected), Some(value)) => {
                let found = self.check_expr_with(value, Some(&expected));
                self.expect_assignable(&found, &expected, value.position, Some(value.id));
            }
        }
    }

    //=====================================================
    // Section 3: Functions
    //=====================================================

    fn check_function_stmt(&mut self, function: &FunctionDecl) {
        let stored = if self.at_top_level() {
            match &self.module {
                Some(module) => self
                    .module_member(module, &function.name)
                    .and_then(|info| info.signature),
                None => self.scopes.lookup(&function.name).and_then(|info| info.signature.clone()),
            }
        } else {
            None
        };
        let sig = match stored {
            Some(sig) if sig.name == function.name => sig,
            _ => {
                let outer = self.visible_type_params();
                let sig = Rc::new(self.function_signature(function, &outer));
                let info = SymbolInfo::function(Rc::clone(&sig), Storage::Local, function.position);
                if self.scopes.declare(function.name.clone(), info).is_err() {
                    self.redeclared(&function.name, function.position);
                }
                sig
            }
        };
        self.check_function(function, &sig, false);
    }

    fn visible_type_params(&self) -> Vec<TypeParamInfo> {
        self.type_params.iter().flatten().cloned().collect()
    }

    /// Checks a function or method body against its signature.
    pub(super) fn check_function(&mut self, function: &FunctionDecl, sig: &FunctionSig, is_static: bool) {
        self.type_params.push(sig.type_params.clone());
        let saved_class = self.class.clone();
        if let Some(class) = &mut self.class {
            class.is_static = is_static;
        }
        self.enter_function(Some(sig.ret.clone()), false);
        self.declare_params(&function.params, sig);
        if let FunctionBody::Block(statements) = &function.body {
            let flow = self.check_block_statements(statements);
            let needs_value = !matches!(sig.ret, Type::Void | Type::Any);
            if needs_value && flow != Flow::Exits {
                self.report(
                    TypeErrorKind::MissingReturn,
                    format!("not all paths of '{}' return a value", function.name),
                    function.position,
                );
            }
        } else if let FunctionBody::Expr(body) = &function.body {
            let found = self.check_expr_with(body, Some(&sig.ret));
            if sig.ret != Type::Void {
                self.expect_assignable(&found, &sig.ret, body.position, Some(body.id));
            }
        }
        self.leave_function();
        self.class = saved_class;
        self.type_params.pop();
    }

    pub(super) fn enter_function(&mut self, ret: Option<Type>, is_constructor: bool) {
        self.functions.push(FunctionContext {
            ret,
            inferred: Vec::new(),
            is_constructor,
        });
        self.scopes.push();
        self.catch_stack.push(self.catch_depth);
        self.catch_depth = 0;
    }

    pub(super) fn leave_function(&mut self) -> Vec<Type> {
        self.catch_depth = self.catch_stack.pop().unwrap_or(0);
        self.scopes.pop();
        self.functions
            .pop()
            .map(|context| context.inferred)
            .unwrap_or_default()
    }

    pub(super) fn declare_params(&mut self, params: &[Param], sig: &FunctionSig) {
        for (param, param_sig) in params.iter().zip(&sig.params) {
            if let Some(default) = &param.default {
                let found = self.check_expr_with(default, Some(&param_sig.ty));
                self.expect_assignable(&found, &param_sig.ty, default.position, Some(default.id));
            }
            let ty = match (&param_sig.ty, param_sig.variadic) {
                (Type::Array(_), true) | (_, false) => param_sig.ty.clone(),
                (other, true) => Type::array(other.clone()),
            };
            let info = SymbolInfo::new(ty, Storage::Param, param.position, true);
            if self.scopes.declare(param.name.clone(), info).is_err() {
                self.redeclared(&param.name, param.position);
            }
        }
    }

    //=====================================================
    // Section 4: Classes and modules
    //=====================================================

    fn check_module(&mut self, decl: &ModuleDecl) {
        let name = Self::qualified(self.module.as_ref(), &decl.name);
        let saved = self.module.replace(name);
        self.check_block_statements(&decl.body);
        self.module = saved;
    }

    fn class_type(&self, class: &ClassDecl) -> Type {
        if class.type_params.is_empty() {
            Type::User(class.name.clone())
        } else {
            Type::Generic {
                name: class.name.clone(),
                args: class
                    .type_params
                    .iter()
                    .map(|param| Type::TypeParam(param.name.clone()))
                    .collect(),
            }
        }
    }

    fn check_class(&mut self, class: &ClassDecl) {
        let ty = self.class_type(class);
        let class_params = self.class_type_params.get(&class.name).cloned().unwrap_or_default();
        self.type_params.push(class_params);
        let saved = self.class.replace(ClassContext {
            name: class.name.clone(),
            ty: ty.clone(),
            is_static: false,
        });
        self.check_inheritance(class, &ty);
        let (fields, methods, constructor) = match self.registry.class(&class.name) {
            Some(info) => (
                info.fields.clone(),
                info.methods.clone(),
                info.constructor.clone(),
            ),
            None => Default::default(),
        };
        for member in &class.members {
            match member {
                ClassMember::Field(field) => {
                    let Some(init) = &field.init else {
                        continue;
                    };
                    let declared = fields.get(&field.name).map(|info| info.ty.clone()).unwrap_or(Type::Any);
                    if let Some(context) = &mut self.class {
                        context.is_static = field.is_static;
                    }
                    let found = self.check_expr_with(init, Some(&declared));
                    self.expect_assignable(&found, &declared, init.position, Some(init.id));
                }
                ClassMember::Method(method) => {
                    let Some(sig) = methods.get(&method.name).cloned() else {
                        continue;
                    };
                    if method.modifiers.is_override {
                        self.check_override(class, method, &sig);
                    }
                    self.check_function(method, &sig, sig.is_static);
                }
                ClassMember::Constructor(ctor) => {
                    if let Some(sig) = &constructor {
                        self.check_constructor(class, ctor, sig);
                    }
                }
            }
        }
        self.class = saved;
        self.type_params.pop();
    }

    fn check_constructor(&mut self, class: &ClassDecl, ctor: &ConstructorDecl, sig: &Rc<FunctionSig>) {
        if let Some(context) = &mut self.class {
            context.is_static = false;
        }
        self.enter_function(Some(Type::Void), true);
        self.declare_params(&ctor.params, sig);
        if let Some(args) = &ctor.base_args {
            let base = self.registry.class(&class.name).and_then(|info| info.base.clone());
            let base_ctor = base.as_ref().and_then(|base| {
                self.registry
                    .class_of(base)
                    .map(|(info, bindings)| (info.constructor.clone(), bindings))
            });
            match base_ctor {
                Some((Some(base_sig), bindings)) => {
                    self.check_signature_call(&base_sig, &[], args, ctor.position, None, &bindings);
                }
                Some((None, _)) => {
                    if !args.is_empty() {
                        self.report(
                            TypeErrorKind::ArityMismatch,
                            "base class has no constructor taking arguments",
                            ctor.position,
                        );
                    }
                }
                None => {
                    for arg in args {
                        self.check_expr(arg);
                    }
                    self.report(
                        TypeErrorKind::UndefinedSymbol,
                        format!("'{}' has no base class", class.name),
                        ctor.position,
                    );
                }
            }
        }
        self.check_block_statements(&ctor.body);
        self.leave_function();
    }

    fn check_override(&mut self, class: &ClassDecl, method: &FunctionDecl, sig: &FunctionSig) {
        let base = self.registry.class(&class.name).and_then(|info| info.base.clone());
        let overridden = base.and_then(|base| self.registry.member(&base, &method.name));
        match overridden {
            Some(Member::Method(base_sig)) => {
                if !sig.same_shape(&base_sig, &HashMap::new()) {
                    self.report(
                        TypeErrorKind::TypeMismatch,
                        format!("'{}' does not match the signature it overrides", method.name),
                        method.position,
                    );
                }
            }
            _ => self.report(
                TypeErrorKind::TypeMismatch,
                format!("'{}' has no base method to override", method.name),
                method.position,
            ),
        }
    }

    /// Concrete classes implement every abstract and interface member.
    fn check_inheritance(&mut self, class: &ClassDecl, ty: &Type) {
        if class.is_abstract {
            return;
        }
        let mut missing = Vec::new();
        let mut mismatched = Vec::new();
        for (name, required, bindings) in self.registry.abstract_members(ty) {
            match self.registry.concrete_method(ty, &name) {
                None => missing.push(name),
                Some(provided) => {
                    if !provided.same_shape(&required, &bindings) {
                        mismatched.push(name);
                    }
                }
            }
        }
        for ancestor in self.registry.ancestors(ty) {
            let Some((info, _)) = self.registry.class_of(&ancestor) else {
                continue;
            };
            if !info.is_interface {
                continue;
            }
            for field in info.fields.keys() {
                if !self.has_concrete_field(ty, field) {
                    missing.push(field.clone());
                }
            }
        }
        missing.sort();
        missing.dedup();
        for name in missing {
            self.report(
                TypeErrorKind::UnsatisfiedConstraint,
                format!("'{}' does not implement '{name}'", class.name),
                class.position,
            );
        }
        mismatched.sort();
        mismatched.dedup();
        for name in mismatched {
            self.report(
                TypeErrorKind::TypeMismatch,
                format!("'{}.{name}' does not match the declared signature", class.name),
                class.position,
            );
        }
    }

    fn has_concrete_field(&self, ty: &Type, name: &str) -> bool {
        let mut current = Some(ty.clone());
        let mut guard = 0;
        while let Some(next) = current {
            guard += 1;
            let Some((info, bindings)) = self.registry.class_of(&next) else {
                return false;
            };
            if guard > 64 || info.is_interface {
                return false;
            }
            if info.fields.contains_key(name) {
                return true;
            }
            current = info.base.as_ref().map(|base| base.substitute(&bindings));
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{diagnostics, kinds};
    use super::*;

    #[test]
    fn missing_return_on_some_path() {
        let source = "int sign(int x) { if (x > 0) { return 1; } }";
        assert_eq!(kinds(source), vec![TypeErrorKind::MissingReturn]);
        let complete = "int sign(int x) { if (x > 0) { return 1; } else { return -1; } }";
        assert!(kinds(complete).is_empty());
    }

    #[test]
    fn infinite_loop_counts_as_exiting() {
        let source = "int spin() { while (true) { } }";
        assert!(kinds(source).is_empty());
        let breaking = "int spin() { while (true) { break; } }";
        assert_eq!(kinds(breaking), vec![TypeErrorKind::MissingReturn]);
    }

    #[test]
    fn null_guard_narrows_rest_of_block() {
        let source = "
            int size(string? s) {
                if (s == null) return 0;
                return s.Length;
            }
        ";
        assert!(kinds(source).is_empty(), "{:?}", diagnostics(source));
        let unguarded = "int size(string? s) { return s.Length; }";
        assert_eq!(kinds(unguarded), vec![TypeErrorKind::NullSafetyViolation]);
    }

    #[test]
    fn assignment_to_constant_is_rejected() {
        assert_eq!(
            kinds("const limit = 3; limit = 4;"),
            vec![TypeErrorKind::InvalidAssignment]
        );
        assert_eq!(
            kinds("let x = 1; x += 1;"),
            vec![TypeErrorKind::InvalidAssignment]
        );
    }

    #[test]
    fn redeclaration_in_same_scope() {
        assert_eq!(
            kinds("var a = 1; var a = 2;"),
            vec![TypeErrorKind::Redeclaration]
        );
        assert!(kinds("var a = 1; { var a = \"shadow\"; }").is_empty());
    }

    #[test]
    fn concrete_class_must_implement_interface() {
        let source = "
            interface IShape { double Area(); }
            class Square : IShape { }
        ";
        assert_eq!(kinds(source), vec![TypeErrorKind::UnsatisfiedConstraint]);
        let implemented = "
            interface IShape { double Area(); }
            class Square : IShape {
                double side;
                public double Area() { return side * side; }
            }
        ";
        assert!(kinds(implemented).is_empty(), "{:?}", diagnostics(implemented));
    }

    #[test]
    fn rethrow_requires_catch() {
        assert_eq!(kinds("throw;"), vec![TypeErrorKind::UndefinedSymbol]);
        let inside = "try { var x = 1; } catch (Exception e) { throw; }";
        assert!(kinds(inside).is_empty(), "{:?}", diagnostics(inside));
    }

    #[test]
    fn throwing_a_non_exception_is_a_mismatch() {
        assert_eq!(kinds("throw 42;"), vec![TypeErrorKind::TypeMismatch]);
    }
}
