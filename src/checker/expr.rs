//=====================================================
// File: checker/expr.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Expression typing
// Objective: Infer expression types, check operators, calls, members,
//            lambdas and null-safe access, and record annotations
//=====================================================

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::rc::Rc;

use strata_core::natives::default_registry;

use super::registry::{substitute_sig, FunctionSig, Member, TypeParamInfo};
use super::scope::{Storage, SymbolInfo};
use super::stmt::null_checked;
use super::types::Type;
use super::{OperatorOverload, TypeChecker, TypeErrorKind};
use crate::ast::{
    AssignOp, BinaryOp, Expr, ExprKind, InterpolationSegment, LambdaBody, Literal, LogicalOp,
    NodeId, Param, SwitchArm, TypeExpr, UnaryOp,
};
use crate::symbol::Symbol;
use crate::tokenizer::Position;

/// Static result type of a default native function.
fn native_return(name: &str, args: &[Type]) -> Type {
    match name {
        "print" | "println" => Type::Void,
        "len" => Type::Int,
        "sqrt" | "floor" | "ceil" | "round" => Type::Double,
        "to_string" | "typeof" => Type::String,
        "abs" => match args.first() {
            Some(Type::Int) => Type::Int,
            Some(Type::Any) | None => Type::Any,
            Some(_) => Type::Double,
        },
        _ => Type::Any,
    }
}

/// Replaces the given type parameters with `object`.
fn erase(ty: &Type, vars: &[TypeParamInfo]) -> Type {
    if vars.is_empty() {
        return ty.clone();
    }
    let bindings: HashMap<Symbol, Type> = vars
        .iter()
        .map(|var| (var.name.clone(), Type::Any))
        .collect();
    ty.substitute(&bindings)
}

fn literal_type(literal: &Literal) -> Type {
    match literal {
        Literal::Integer(_) => Type::Int,
        Literal::Float(_) => Type::Double,
        Literal::Decimal(_) => Type::Decimal,
        Literal::String(_) => Type::String,
        Literal::Char(_) => Type::Char,
        Literal::Bool(_) => Type::Bool,
        Literal::Null => Type::Null,
    }
}

impl TypeChecker {
    pub(super) fn check_expr(&mut self, expr: &Expr) -> Type {
        self.check_expr_with(expr, None)
    }

    /// Types `expr`; `expected` guides lambdas and empty array literals.
    pub(super) fn check_expr_with(&mut self, expr: &Expr, expected: Option<&Type>) -> Type {
        let ty = self.infer(expr, expected);
        self.annotations.types.insert(expr.id, ty.clone());
        ty
    }

    pub(super) fn check_condition(&mut self, expr: &Expr) {
        let ty = self.check_expr(expr);
        if !matches!(ty, Type::Bool | Type::Any) {
            self.mismatch(&Type::Bool, &ty, expr.position, Some(expr.id));
        }
    }

    fn infer(&mut self, expr: &Expr, expected: Option<&Type>) -> Type {
        match &expr.kind {
            ExprKind::Literal(literal) => literal_type(literal),
            ExprKind::Identifier(name) => self.identifier_type(name, expr),
            ExprKind::Interpolated(segments) => {
                for segment in segments {
                    if let InterpolationSegment::Expr(inner) = segment {
                        self.check_expr(inner);
                    }
                }
                Type::String
            }
            ExprKind::Binary { op, left, right } => {
                let left_ty = self.check_expr(left);
                let right_ty = self.check_expr(right);
                if let Some(ty) = self.operator_overload(expr, *op, &left_ty, &right_ty) {
                    return ty;
                }
                self.binary_result(*op, &left_ty, &right_ty, expr.position, Some(expr.id))
            }
            ExprKind::Logical { op, left, right } => self.check_logical(*op, left, right, expected),
            ExprKind::Unary { op, operand } => self.check_unary(*op, operand, expr),
            ExprKind::Update { target, .. } => {
                let ty = self.check_assign_target(target);
                if !(ty.is_numeric() || ty.is_any() || ty == Type::Char) {
                    self.report_node(
                        TypeErrorKind::TypeMismatch,
                        format!("cannot increment or decrement {ty}"),
                        expr.position,
                        Some(expr.id),
                    );
                }
                ty
            }
            ExprKind::Assign { op, target, value } => self.check_assign(*op, target, value),
            ExprKind::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                self.check_condition(condition);
                self.scopes.push();
                let positive = null_checked(condition, true);
                self.narrow_all(&positive);
                let then_ty = self.check_expr_with(then_branch, expected);
                self.scopes.pop();
                self.scopes.push();
                let negative = null_checked(condition, false);
                self.narrow_all(&negative);
                let else_ty = self.check_expr_with(else_branch, expected);
                self.scopes.pop();
                self.join(&then_ty, &else_ty, expr.position)
            }
            ExprKind::Call {
                callee,
                type_args,
                args,
            } => self.check_call(expr, callee, type_args, args),
            ExprKind::Index {
                target,
                index,
                null_safe,
            } => self.check_index(expr, target, index, *null_safe),
            ExprKind::Member {
                target,
                name,
                null_safe,
            } => self.check_member(expr, target, name, *null_safe),
            ExprKind::Lambda {
                params,
                return_type,
                body,
            } => self.check_lambda(params, return_type.as_ref(), body, expected, expr.position),
            ExprKind::Array(items) => {
                let expected_element = match expected {
                    Some(Type::Array(element)) => Some((**element).clone()),
                    _ => None,
                };
                let mut element: Option<Type> = None;
                for item in items {
                    let ty = self.check_expr_with(item, expected_element.as_ref());
                    element = Some(match element {
                        None => ty,
                        Some(previous) => self.common_type(&previous, &ty).unwrap_or(Type::Any),
                    });
                }
                Type::array(element.or(expected_element).unwrap_or(Type::Any))
            }
            ExprKind::Tuple(items) => Type::Tuple(items.iter().map(|item| self.check_expr(item)).collect()),
            ExprKind::Range { start, end } => {
                for bound in [start, end] {
                    let ty = self.check_expr(bound);
                    if !matches!(ty, Type::Int | Type::Char | Type::Any) {
                        self.mismatch(&Type::Int, &ty, bound.position, Some(bound.id));
                    }
                }
                Type::array(Type::Int)
            }
            ExprKind::New { ty, args } => self.check_new(expr, ty, args),
            ExprKind::This => match &self.class {
                Some(class) if !class.is_static => class.ty.clone(),
                Some(_) => {
                    self.report_node(
                        TypeErrorKind::UndefinedSymbol,
                        "'this' is not available in a static member",
                        expr.position,
                        Some(expr.id),
                    );
                    Type::Any
                }
                None => {
                    self.report_node(
                        TypeErrorKind::UndefinedSymbol,
                        "'this' used outside of a class",
                        expr.position,
                        Some(expr.id),
                    );
                    Type::Any
                }
            },
            ExprKind::Base => {
                let base = self
                    .class
                    .as_ref()
                    .and_then(|class| self.registry.class(&class.name))
                    .and_then(|info| info.base.clone());
                match base {
                    Some(base) => base,
                    None => {
                        self.report_node(
                            TypeErrorKind::UndefinedSymbol,
                            "'base' used without a base class",
                            expr.position,
                            Some(expr.id),
                        );
                        Type::Any
                    }
                }
            }
            ExprKind::Is { value, pattern } => {
                let value_ty = self.check_expr(value);
                self.check_pattern(pattern, &value_ty);
                Type::Bool
            }
            ExprKind::As { value, ty } => {
                let value_ty = self.check_expr(value);
                let target = self.resolve_type(ty, expr.position);
                if !self.pattern_compatible(&target, &value_ty) {
                    self.report_node(
                        TypeErrorKind::TypeMismatch,
                        format!("cannot convert {value_ty} to {target}"),
                        expr.position,
                        Some(expr.id),
                    );
                }
                target
            }
            ExprKind::Switch { subject, arms } => self.check_switch_expr(subject, arms, expected),
        }
    }

    //=====================================================
    // Section 1: Names and joins
    //=====================================================

    fn identifier_type(&mut self, name: &Symbol, expr: &Expr) -> Type {
        if let Some(info) = self.scopes.lookup(name) {
            if matches!(info.storage, Storage::Local | Storage::Param) {
                return info.ty.clone();
            }
        }
        if let Some(member) = self.implicit_member(name) {
            return match member {
                Member::Field(field) => field.ty,
                Member::Method(sig) => sig.as_type(),
            };
        }
        if let Some(info) = self.lookup(name) {
            return info.ty;
        }
        if default_registry().contains(name) {
            return Type::Any;
        }
        self.report_node(
            TypeErrorKind::UndefinedSymbol,
            format!("undefined name '{name}'"),
            expr.position,
            Some(expr.id),
        );
        Type::Any
    }

    /// Field or method reached through an implicit `this`.
    fn implicit_member(&self, name: &str) -> Option<Member> {
        let class = self.class.as_ref()?;
        self.registry.member(&class.ty, name)
    }

    /// Smallest type both branches convert to.
    pub(super) fn common_type(&self, a: &Type, b: &Type) -> Option<Type> {
        if a == b {
            return Some(a.clone());
        }
        match (a, b) {
            (Type::Any, _) | (_, Type::Any) => return Some(Type::Any),
            (Type::Null, other) | (other, Type::Null) => return Some(Type::nullable(other.clone())),
            _ => {}
        }
        if let Some(promoted) = Type::promote(&a.non_null(), &b.non_null()) {
            let lifted = a.is_nullable() || b.is_nullable();
            return Some(if lifted { Type::nullable(promoted) } else { promoted });
        }
        if self.assignable(a, b) {
            return Some(b.clone());
        }
        if self.assignable(b, a) {
            return Some(a.clone());
        }
        self.registry
            .ancestors(a)
            .into_iter()
            .find(|ancestor| self.registry.is_subtype(b, ancestor))
    }

    pub(super) fn join(&mut self, a: &Type, b: &Type, position: Position) -> Type {
        match self.common_type(a, b) {
            Some(ty) => ty,
            None => {
                self.report(
                    TypeErrorKind::TypeMismatch,
                    format!("branches have incompatible types {a} and {b}"),
                    position,
                );
                Type::Any
            }
        }
    }

    /// Unwraps a nullable receiver, reporting unguarded access.
    fn dereference(&mut self, ty: &Type, null_safe: bool, expr: &Expr) -> Type {
        if (ty.is_nullable() || *ty == Type::Null) && !null_safe {
            self.report_node(
                TypeErrorKind::NullSafetyViolation,
                format!("value of type {ty} may be null here; use '?.' or check for null first"),
                expr.position,
                Some(expr.id),
            );
        }
        match ty {
            Type::Null => Type::Any,
            other => other.non_null(),
        }
    }

    //=====================================================
    // Section 2: Operators
    //=====================================================

    fn operator_overload(&mut self, expr: &Expr, op: BinaryOp, left: &Type, right: &Type) -> Option<Type> {
        let method = Symbol::from(format!("op_{op:?}"));
        let found = [left, right].into_iter().find_map(|side| {
            let (class, bindings) = self.registry.class_of(&side.non_null())?;
            let sig = class.methods.get(&method)?;
            Some((class.name.clone(), substitute_sig(sig, &bindings)))
        });
        let (class, sig) = found?;
        if let [first, second] = sig.params.as_slice() {
            self.expect_assignable(left, &first.ty, expr.position, Some(expr.id));
            self.expect_assignable(right, &second.ty, expr.position, Some(expr.id));
        }
        self.annotations
            .operators
            .insert(expr.id, OperatorOverload { class, method });
        Some(sig.ret.clone())
    }

    fn comparable(&self, left: &Type, right: &Type) -> bool {
        if Type::promote(left, right).is_some() {
            return true;
        }
        match (left, right) {
            (Type::String, Type::String) | (Type::Bool, Type::Bool) => true,
            _ => {
                let comparable = Type::User(Symbol::from("IComparable"));
                left == right && self.assignable(left, &comparable)
            }
        }
    }

    fn binary_result(
        &mut self,
        op: BinaryOp,
        left: &Type,
        right: &Type,
        position: Position,
        node: Option<NodeId>,
    ) -> Type {
        if op.is_equality() {
            return Type::Bool;
        }
        let lifted = left.is_nullable() || right.is_nullable();
        let (l, r) = (left.non_null(), right.non_null());
        let result = match op {
            BinaryOp::Add if l == Type::String || r == Type::String => Some(Type::String),
            BinaryOp::Add
            | BinaryOp::Union
            | BinaryOp::Intersect
                if matches!((&l, &r), (Type::Array(_), Type::Array(_))) =>
            {
                Some(self.common_type(&l, &r).unwrap_or_else(|| Type::array(Type::Any)))
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                Type::promote(&l, &r)
            }
            BinaryOp::Pow => match (&l, &r) {
                (Type::Int, Type::Int) => Some(Type::Int),
                _ => Type::promote(&l, &r).map(|ty| if ty.is_any() { ty } else { Type::Double }),
            },
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => match (&l, &r) {
                (Type::Any, _) | (_, Type::Any) => Some(Type::Any),
                (Type::Int | Type::Char, Type::Int | Type::Char) => Some(Type::Int),
                (Type::Bool, Type::Bool) => Some(Type::Bool),
                _ => None,
            },
            BinaryOp::Less | BinaryOp::LessEq | BinaryOp::Greater | BinaryOp::GreaterEq => {
                self.comparable(&l, &r).then_some(Type::Bool)
            }
            BinaryOp::Compare => self.comparable(&l, &r).then_some(Type::Int),
            BinaryOp::In | BinaryOp::NotIn => {
                matches!(r, Type::Array(_) | Type::String | Type::Any).then_some(Type::Bool)
            }
            BinaryOp::Subset | BinaryOp::SubsetEq => matches!(
                (&l, &r),
                (Type::Array(_) | Type::Any, Type::Array(_) | Type::Any)
            )
            .then_some(Type::Bool),
            BinaryOp::Union | BinaryOp::Intersect => {
                (l.is_any() || r.is_any()).then_some(Type::Any)
            }
            BinaryOp::Eq | BinaryOp::NotEq => Some(Type::Bool),
        };
        match result {
            Some(ty) if lifted && op.is_arithmetic() => Type::nullable(ty),
            Some(ty) => ty,
            None => {
                self.report_node(
                    TypeErrorKind::TypeMismatch,
                    format!(
                        "operator '{}' cannot be applied to {left} and {right}",
                        op.symbol()
                    ),
                    position,
                    node,
                );
                Type::Any
            }
        }
    }

    fn check_logical(&mut self, op: LogicalOp, left: &Expr, right: &Expr, expected: Option<&Type>) -> Type {
        if op == LogicalOp::Coalesce {
            let left_ty = self.check_expr_with(left, expected);
            let inner = left_ty.non_null();
            let right_ty = self.check_expr_with(right, Some(&inner));
            if left_ty == Type::Null {
                return right_ty;
            }
            if self.assignable(&right_ty, &inner) {
                return if right_ty.is_nullable() || right_ty == Type::Null {
                    Type::nullable(inner)
                } else {
                    inner
                };
            }
            return self.join(&inner, &right_ty, right.position);
        }
        self.check_condition(left);
        // The right operand only runs once the left has decided.
        let narrowed = null_checked(left, op == LogicalOp::And);
        self.scopes.push();
        self.narrow_all(&narrowed);
        self.check_condition(right);
        self.scopes.pop_keeping_declarations();
        Type::Bool
    }

    fn check_unary(&mut self, op: UnaryOp, operand: &Expr, expr: &Expr) -> Type {
        if op == UnaryOp::Not {
            self.check_condition(operand);
            return Type::Bool;
        }
        let ty = self.check_expr(operand);
        let result = match op {
            UnaryOp::Neg | UnaryOp::Plus => match &ty {
                Type::Char => Some(Type::Int),
                other if other.is_numeric() || other.is_any() => Some(other.clone()),
                _ => None,
            },
            UnaryOp::BitNot => matches!(ty, Type::Int | Type::Char | Type::Any).then_some(Type::Int),
            UnaryOp::Sqrt => (ty.is_numeric() || ty.is_any()).then_some(Type::Double),
            UnaryOp::Await => Some(ty.clone()),
            UnaryOp::Not => Some(Type::Bool),
        };
        match result {
            Some(result) => result,
            None => {
                self.report_node(
                    TypeErrorKind::TypeMismatch,
                    format!("unary operator {op:?} cannot be applied to {ty}"),
                    expr.position,
                    Some(expr.id),
                );
                Type::Any
            }
        }
    }

    //=====================================================
    // Section 3: Assignment
    //=====================================================

    fn check_assign(&mut self, op: AssignOp, target: &Expr, value: &Expr) -> Type {
        let target_ty = self.check_assign_target(target);
        match op {
            AssignOp::Assign => {
                let value_ty = self.check_expr_with(value, Some(&target_ty));
                self.expect_assignable(&value_ty, &target_ty, value.position, Some(value.id));
                if let ExprKind::Identifier(name) = &target.kind {
                    self.scopes.widen(name);
                    if target_ty.is_nullable() && !value_ty.is_nullable() && value_ty != Type::Null {
                        self.scopes.narrow(name, target_ty.non_null());
                    }
                }
            }
            AssignOp::Coalesce => {
                let value_ty = self.check_expr_with(value, Some(&target_ty.non_null()));
                self.expect_assignable(&value_ty, &target_ty, value.position, Some(value.id));
            }
            compound => {
                let value_ty = self.check_expr(value);
                if let Some(op) = compound.binary() {
                    let result = self.binary_result(op, &target_ty, &value_ty, value.position, Some(value.id));
                    self.expect_assignable(&result, &target_ty, value.position, Some(value.id));
                }
            }
        }
        target_ty
    }

    /// Type stored by an assignment target, after mutability checks.
    fn check_assign_target(&mut self, target: &Expr) -> Type {
        match &target.kind {
            ExprKind::Identifier(name) => {
                let local = self
                    .scopes
                    .lookup(name)
                    .filter(|info| matches!(info.storage, Storage::Local | Storage::Param))
                    .cloned();
                let info = match local {
                    Some(info) => Some(info),
                    None => match self.implicit_member(name) {
                        Some(Member::Field(field)) => {
                            if field.is_const {
                                self.invalid_assignment(name, target);
                            }
                            self.annotations.types.insert(target.id, field.ty.clone());
                            return field.ty;
                        }
                        Some(Member::Method(_)) => {
                            self.invalid_assignment(name, target);
                            return Type::Any;
                        }
                        None => self.lookup(name),
                    },
                };
                let Some(info) = info else {
                    self.report_node(
                        TypeErrorKind::UndefinedSymbol,
                        format!("undefined name '{name}'"),
                        target.position,
                        Some(target.id),
                    );
                    return Type::Any;
                };
                if !info.mutable {
                    self.invalid_assignment(name, target);
                }
                self.annotations.types.insert(target.id, info.declared.clone());
                info.declared
            }
            ExprKind::Member {
                target: object,
                name,
                ..
            } => {
                let ty = self.check_expr(target);
                let owner = match &object.kind {
                    ExprKind::Identifier(type_name) if self.names_type(type_name) => {
                        Some(Type::User(type_name.clone()))
                    }
                    _ => self.annotations.types.get(&object.id).map(Type::non_null),
                };
                match owner.and_then(|owner| self.registry.member(&owner, name)) {
                    Some(Member::Field(field)) if field.is_const => self.invalid_assignment(name, target),
                    Some(Member::Method(_)) => self.invalid_assignment(name, target),
                    _ => {}
                }
                ty
            }
            ExprKind::Index { target: object, .. } => {
                let ty = self.check_expr(target);
                if self.annotations.types.get(&object.id) == Some(&Type::String) {
                    self.report_node(
                        TypeErrorKind::InvalidAssignment,
                        "strings are immutable",
                        target.position,
                        Some(target.id),
                    );
                }
                ty
            }
            _ => {
                self.report_node(
                    TypeErrorKind::InvalidAssignment,
                    "invalid assignment target",
                    target.position,
                    Some(target.id),
                );
                self.check_expr(target)
            }
        }
    }

    fn invalid_assignment(&mut self, name: &str, target: &Expr) {
        self.report_node(
            TypeErrorKind::InvalidAssignment,
            format!("cannot assign to '{name}'"),
            target.position,
            Some(target.id),
        );
    }

    //=====================================================
    // Section 4: Members and indexing
    //=====================================================

    /// A name that refers to a class or enum rather than a variable.
    pub(super) fn names_type(&self, name: &str) -> bool {
        self.lookup(name).is_none()
            && (self.registry.class(name).is_some() || self.registry.enum_variants(name).is_some())
    }

    /// Module named by an identifier or dotted member chain.
    fn module_path(&self, expr: &Expr) -> Option<Symbol> {
        match &expr.kind {
            ExprKind::Identifier(name) => {
                if self.lookup(name).is_some() {
                    return None;
                }
                if let Some(module) = &self.module {
                    let nested = Symbol::from(format!("{module}.{name}"));
                    if self.is_module(&nested) {
                        return Some(nested);
                    }
                }
                self.is_module(name).then(|| name.clone())
            }
            ExprKind::Member { target, name, .. } => {
                let base = self.module_path(target)?;
                let nested = Symbol::from(format!("{base}.{name}"));
                self.is_module(&nested).then_some(nested)
            }
            _ => None,
        }
    }

    fn check_member(&mut self, expr: &Expr, target: &Expr, name: &Symbol, null_safe: bool) -> Type {
        if let Some(module) = self.module_path(target) {
            if let Some(info) = self.module_member(&module, name) {
                return info.ty;
            }
            if self.is_module(&format!("{module}.{name}")) {
                return Type::Any;
            }
            self.report_node(
                TypeErrorKind::UndefinedSymbol,
                format!("module '{module}' has no member '{name}'"),
                expr.position,
                Some(expr.id),
            );
            return Type::Any;
        }
        if let ExprKind::Identifier(type_name) = &target.kind {
            if self.names_type(type_name) {
                return self.static_member(type_name, name, expr);
            }
        }
        let target_ty = self.check_expr(target);
        let inner = self.dereference(&target_ty, null_safe, expr);
        let ty = self.instance_member(&inner, name, expr);
        if null_safe {
            Type::nullable(ty)
        } else {
            ty
        }
    }

    fn static_member(&mut self, type_name: &Symbol, name: &Symbol, expr: &Expr) -> Type {
        if let Some(variants) = self.registry.enum_variants(type_name) {
            if variants.contains(name) {
                return Type::Int;
            }
            self.report_node(
                TypeErrorKind::UndefinedSymbol,
                format!("enum '{type_name}' has no member '{name}'"),
                expr.position,
                Some(expr.id),
            );
            return Type::Any;
        }
        match self.registry.member(&Type::User(type_name.clone()), name) {
            Some(Member::Field(field)) => {
                if !field.is_static {
                    self.report_node(
                        TypeErrorKind::TypeMismatch,
                        format!("'{type_name}.{name}' is an instance field"),
                        expr.position,
                        Some(expr.id),
                    );
                }
                field.ty
            }
            Some(Member::Method(sig)) => sig.as_type(),
            None => {
                self.report_node(
                    TypeErrorKind::UndefinedSymbol,
                    format!("'{type_name}' has no member '{name}'"),
                    expr.position,
                    Some(expr.id),
                );
                Type::Any
            }
        }
    }

    fn constraint_member(&self, param: &str, name: &str) -> Option<Member> {
        let info = self.type_param_in_scope(param)?;
        info.constraints.iter().find_map(|constraint| match constraint {
            super::registry::ConstraintInfo::Type(bound) => self.registry.member(bound, name),
            _ => None,
        })
    }

    fn instance_member(&mut self, receiver: &Type, name: &Symbol, expr: &Expr) -> Type {
        let member = match receiver {
            Type::Any => return Type::Any,
            Type::Array(_) if matches!(name.as_str(), "Length" | "Count") => return Type::Int,
            Type::String if name.as_str() == "Length" => return Type::Int,
            Type::User(_) | Type::Generic { .. } => self.registry.member(receiver, name),
            Type::TypeParam(param) => self.constraint_member(param, name),
            _ => None,
        };
        match member {
            Some(Member::Field(field)) => field.ty,
            Some(Member::Method(sig)) => sig.as_type(),
            None => {
                self.report_node(
                    TypeErrorKind::UndefinedSymbol,
                    format!("{receiver} has no member '{name}'"),
                    expr.position,
                    Some(expr.id),
                );
                Type::Any
            }
        }
    }

    fn check_index(&mut self, expr: &Expr, target: &Expr, index: &Expr, null_safe: bool) -> Type {
        let target_ty = self.check_expr(target);
        let inner = self.dereference(&target_ty, null_safe, expr);
        let index_ty = self.check_expr(index);
        let element = match &inner {
            Type::Any => Type::Any,
            Type::Array(element) => {
                self.expect_assignable(&index_ty, &Type::Int, index.position, Some(index.id));
                (**element).clone()
            }
            Type::String => {
                self.expect_assignable(&index_ty, &Type::Int, index.position, Some(index.id));
                Type::Char
            }
            Type::Tuple(items) => match index.as_literal() {
                Some(Literal::Integer(position)) => {
                    match usize::try_from(*position).ok().and_then(|slot| items.get(slot)) {
                        Some(item) => item.clone(),
                        None => {
                            self.report_node(
                                TypeErrorKind::TypeMismatch,
                                format!("tuple index {position} is out of range for {inner}"),
                                index.position,
                                Some(index.id),
                            );
                            Type::Any
                        }
                    }
                }
                _ => Type::Any,
            },
            other => {
                self.report_node(
                    TypeErrorKind::TypeMismatch,
                    format!("cannot index a value of type {other}"),
                    expr.position,
                    Some(expr.id),
                );
                Type::Any
            }
        };
        if null_safe {
            Type::nullable(element)
        } else {
            element
        }
    }

    //=====================================================
    // Section 5: Calls
    //=====================================================

    fn call_symbol(&mut self, info: &SymbolInfo, type_args: &[TypeExpr], args: &[Expr], expr: &Expr) -> Type {
        match &info.signature {
            Some(sig) => self.check_signature_call(sig, type_args, args, expr.position, Some(expr.id), &HashMap::new()),
            None => self.check_value_call(&info.ty, args, expr),
        }
    }

    fn check_call(&mut self, expr: &Expr, callee: &Expr, type_args: &[TypeExpr], args: &[Expr]) -> Type {
        match &callee.kind {
            ExprKind::Identifier(name) => self.check_named_call(expr, name, type_args, args),
            ExprKind::Member {
                target,
                name,
                null_safe,
            } => self.check_method_call(expr, callee, target, name, *null_safe, type_args, args),
            _ => {
                let ty = self.check_expr(callee);
                self.check_value_call(&ty, args, expr)
            }
        }
    }

    fn check_named_call(&mut self, expr: &Expr, name: &Symbol, type_args: &[TypeExpr], args: &[Expr]) -> Type {
        let local = self
            .scopes
            .lookup(name)
            .filter(|info| matches!(info.storage, Storage::Local | Storage::Param))
            .cloned();
        if let Some(info) = local {
            return self.call_symbol(&info, type_args, args, expr);
        }
        match self.implicit_member(name) {
            Some(Member::Method(sig)) => {
                return self.check_signature_call(&sig, type_args, args, expr.position, Some(expr.id), &HashMap::new());
            }
            Some(Member::Field(field)) => return self.check_value_call(&field.ty, args, expr),
            None => {}
        }
        if let Some(info) = self.lookup(name) {
            return self.call_symbol(&info, type_args, args, expr);
        }
        if let Some(native) = default_registry().get(name) {
            if let Some(arity) = native.arity {
                if args.len() != arity {
                    self.report_node(
                        TypeErrorKind::ArityMismatch,
                        format!("'{name}' expects {arity} arguments, found {}", args.len()),
                        expr.position,
                        Some(expr.id),
                    );
                }
            }
            let arg_types: Vec<Type> = args.iter().map(|arg| self.check_expr(arg)).collect();
            return native_return(name, &arg_types);
        }
        self.report_node(
            TypeErrorKind::UndefinedSymbol,
            format!("undefined function '{name}'"),
            expr.position,
            Some(expr.id),
        );
        for arg in args {
            self.check_expr(arg);
        }
        Type::Any
    }

    #[allow(clippy::too_many_arguments)]
    fn check_method_call(
        &mut self,
        expr: &Expr,
        callee: &Expr,
        target: &Expr,
        name: &Symbol,
        null_safe: bool,
        type_args: &[TypeExpr],
        args: &[Expr],
    ) -> Type {
        if let Some(module) = self.module_path(target) {
            if let Some(info) = self.module_member(&module, name) {
                return self.call_symbol(&info, type_args, args, expr);
            }
            self.report_node(
                TypeErrorKind::UndefinedSymbol,
                format!("module '{module}' has no member '{name}'"),
                expr.position,
                Some(expr.id),
            );
            for arg in args {
                self.check_expr(arg);
            }
            return Type::Any;
        }
        if let ExprKind::Identifier(type_name) = &target.kind {
            if self.names_type(type_name) {
                return self.check_static_call(expr, type_name, name, type_args, args);
            }
        }
        let target_ty = self.check_expr(target);
        let receiver = self.dereference(&target_ty, null_safe, callee);
        let member = match &receiver {
            Type::User(_) | Type::Generic { .. } => self.registry.member(&receiver, name),
            Type::TypeParam(param) => self.constraint_member(param, name),
            _ => None,
        };
        let result = match member {
            Some(Member::Method(sig)) => {
                self.check_signature_call(&sig, type_args, args, expr.position, Some(expr.id), &HashMap::new())
            }
            Some(Member::Field(field)) => self.check_value_call(&field.ty, args, expr),
            None => self.builtin_method(&receiver, name, args, expr),
        };
        if null_safe && result != Type::Void {
            Type::nullable(result)
        } else {
            result
        }
    }

    fn check_static_call(
        &mut self,
        expr: &Expr,
        type_name: &Symbol,
        name: &Symbol,
        type_args: &[TypeExpr],
        args: &[Expr],
    ) -> Type {
        match self.registry.member(&Type::User(type_name.clone()), name) {
            Some(Member::Method(sig)) => {
                if !sig.is_static {
                    self.report_node(
                        TypeErrorKind::TypeMismatch,
                        format!("'{type_name}.{name}' is an instance method"),
                        expr.position,
                        Some(expr.id),
                    );
                }
                self.check_signature_call(&sig, type_args, args, expr.position, Some(expr.id), &HashMap::new())
            }
            Some(Member::Field(field)) => self.check_value_call(&field.ty, args, expr),
            None => {
                self.report_node(
                    TypeErrorKind::UndefinedSymbol,
                    format!("'{type_name}' has no member '{name}'"),
                    expr.position,
                    Some(expr.id),
                );
                for arg in args {
                    self.check_expr(arg);
                }
                Type::Any
            }
        }
    }

    /// Methods the runtime provides on arrays, strings and primitives.
    fn builtin_method(&mut self, receiver: &Type, name: &Symbol, args: &[Expr], expr: &Expr) -> Type {
        let element = receiver.element();
        let signature: Option<(RangeInclusive<usize>, Option<Type>, Type)> = match (receiver, name.as_str()) {
            (Type::Any, _) => Some((0..=usize::MAX, None, Type::Any)),
            (_, "ToString") => Some((0..=0, None, Type::String)),
            (Type::Array(_), "Add" | "Push") => Some((1..=usize::MAX, element.clone(), Type::Void)),
            (Type::Array(_), "Pop") => Some((0..=0, None, element.clone().unwrap_or(Type::Any))),
            (Type::Array(_), "Contains") => Some((1..=1, None, Type::Bool)),
            (Type::Array(_), "IndexOf") => Some((1..=1, None, Type::Int)),
            (Type::Array(_), "Clear") => Some((0..=0, None, Type::Void)),
            (Type::String, "ToUpper" | "ToLower" | "Trim") => Some((0..=0, None, Type::String)),
            (Type::String, "Contains") => Some((1..=1, Some(Type::String), Type::Bool)),
            (Type::String, "IndexOf") => Some((1..=1, Some(Type::String), Type::Int)),
            (Type::String, "Substring") => Some((1..=2, Some(Type::Int), Type::String)),
            (other, "CompareTo") if other.is_value_type() || *other == Type::String => {
                Some((1..=1, Some(other.clone()), Type::Int))
            }
            _ => None,
        };
        let Some((arity, param, ret)) = signature else {
            self.report_node(
                TypeErrorKind::UndefinedSymbol,
                format!("{receiver} has no method '{name}'"),
                expr.position,
                Some(expr.id),
            );
            for arg in args {
                self.check_expr(arg);
            }
            return Type::Any;
        };
        if !arity.contains(&args.len()) {
            self.report_node(
                TypeErrorKind::ArityMismatch,
                format!("'{name}' does not take {} arguments", args.len()),
                expr.position,
                Some(expr.id),
            );
        }
        for arg in args {
            let found = self.check_expr_with(arg, param.as_ref());
            if let Some(param) = &param {
                self.expect_assignable(&found, param, arg.position, Some(arg.id));
            }
        }
        ret
    }

    /// Call through a value of function type.
    fn check_value_call(&mut self, callee: &Type, args: &[Expr], expr: &Expr) -> Type {
        let callee = self.dereference(callee, false, expr);
        match callee {
            Type::Function { params, ret } => {
                if params.len() != args.len() {
                    self.report_node(
                        TypeErrorKind::ArityMismatch,
                        format!("function expects {} arguments, found {}", params.len(), args.len()),
                        expr.position,
                        Some(expr.id),
                    );
                }
                for (index, arg) in args.iter().enumerate() {
                    match params.get(index) {
                        Some(param) => {
                            let found = self.check_expr_with(arg, Some(param));
                            self.expect_assignable(&found, param, arg.position, Some(arg.id));
                        }
                        None => {
                            self.check_expr(arg);
                        }
                    }
                }
                *ret
            }
            Type::Any => {
                for arg in args {
                    self.check_expr(arg);
                }
                Type::Any
            }
            other => {
                self.report_node(
                    TypeErrorKind::TypeMismatch,
                    format!("a value of type {other} is not callable"),
                    expr.position,
                    Some(expr.id),
                );
                for arg in args {
                    self.check_expr(arg);
                }
                Type::Any
            }
        }
    }

    /// Checks arity, unifies type parameters against the arguments and
    /// verifies `where` constraints. `outer` binds the receiver's class
    /// type parameters.
    pub(super) fn check_signature_call(
        &mut self,
        sig: &Rc<FunctionSig>,
        type_args: &[TypeExpr],
        args: &[Expr],
        position: Position,
        node: Option<NodeId>,
        outer: &HashMap<Symbol, Type>,
    ) -> Type {
        let sig = substitute_sig(sig, outer);
        let required = sig.required();
        let max = if sig.is_variadic() { usize::MAX } else { sig.params.len() };
        if args.len() < required || args.len() > max {
            let expected = if sig.is_variadic() {
                format!("at least {required}")
            } else if required == max {
                required.to_string()
            } else {
                format!("{required} to {max}")
            };
            self.report_node(
                TypeErrorKind::ArityMismatch,
                format!("'{}' expects {expected} arguments, found {}", sig.name, args.len()),
                position,
                node,
            );
            for arg in args {
                self.check_expr(arg);
            }
            return erase(&sig.ret, &sig.type_params);
        }

        let mut bindings: HashMap<Symbol, Type> = HashMap::new();
        if !type_args.is_empty() {
            if type_args.len() == sig.type_params.len() {
                for (param, arg) in sig.type_params.iter().zip(type_args) {
                    let resolved = self.resolve_type(arg, position);
                    bindings.insert(param.name.clone(), resolved);
                }
            } else {
                self.report_node(
                    TypeErrorKind::ArityMismatch,
                    format!(
                        "'{}' expects {} type arguments, found {}",
                        sig.name,
                        sig.type_params.len(),
                        type_args.len()
                    ),
                    position,
                    node,
                );
            }
        }
        let explicit = !bindings.is_empty();

        // (parameter type, whole-array alternative for `params`, argument type)
        let mut checked: Vec<Option<(Type, Option<Type>, Type)>> = Vec::new();
        for (index, arg) in args.iter().enumerate() {
            let (param, whole) = match sig.params.get(index) {
                Some(param) if !param.variadic => (param.ty.clone(), None),
                _ => match sig.params.last() {
                    Some(last) => {
                        let element = last.ty.element().unwrap_or_else(|| last.ty.clone());
                        let whole = (args.len() == sig.params.len()).then(|| last.ty.clone());
                        (element, whole)
                    }
                    None => (Type::Any, None),
                },
            };
            let expected = erase(&param.substitute(&bindings), &sig.type_params);
            let found = self.check_expr_with(arg, Some(&expected));
            let whole_match = whole
                .as_ref()
                .is_some_and(|whole| matches!(found, Type::Array(_)) && self.unify(whole, &found, &sig.type_params, &mut bindings));
            if whole_match {
                checked.push(whole.map(|whole| (whole, None, found)));
                continue;
            }
            if explicit || self.unify(&param, &found, &sig.type_params, &mut bindings) {
                checked.push(Some((param, whole, found)));
            } else {
                let shown = erase(&param.substitute(&bindings), &sig.type_params);
                self.mismatch(&shown, &found, arg.position, Some(arg.id));
                checked.push(None);
            }
        }
        for param in &sig.type_params {
            bindings.entry(param.name.clone()).or_insert(Type::Any);
        }
        for (arg, entry) in args.iter().zip(checked) {
            let Some((param, whole, found)) = entry else {
                continue;
            };
            let target = param.substitute(&bindings);
            let fits_whole = whole.is_some_and(|whole| self.assignable(&found, &whole.substitute(&bindings)));
            if !fits_whole {
                self.expect_assignable(&found, &target, arg.position, Some(arg.id));
            }
        }
        self.check_constraints(&sig.type_params, &bindings, position, node);
        sig.ret.substitute(&bindings)
    }

    fn check_new(&mut self, expr: &Expr, ty: &TypeExpr, args: &[Expr]) -> Type {
        let target = self.resolve_type(ty, expr.position);
        let class = self.registry.class_of(&target).map(|(class, bindings)| {
            (
                class.name.clone(),
                class.is_abstract || class.is_interface,
                class.constructor.clone(),
                bindings,
            )
        });
        let Some((name, is_abstract, constructor, bindings)) = class else {
            if matches!(target, Type::TypeParam(_)) && !args.is_empty() {
                self.report_node(
                    TypeErrorKind::ArityMismatch,
                    "type parameters can only be created without arguments",
                    expr.position,
                    Some(expr.id),
                );
            }
            for arg in args {
                self.check_expr(arg);
            }
            return target;
        };
        if is_abstract {
            self.report_node(
                TypeErrorKind::TypeMismatch,
                format!("cannot create an instance of abstract type '{name}'"),
                expr.position,
                Some(expr.id),
            );
        }
        match constructor {
            Some(sig) => {
                self.check_signature_call(&sig, &[], args, expr.position, Some(expr.id), &bindings);
            }
            None => {
                if !args.is_empty() {
                    self.report_node(
                        TypeErrorKind::ArityMismatch,
                        format!("'{name}' has no constructor taking arguments"),
                        expr.position,
                        Some(expr.id),
                    );
                }
                for arg in args {
                    self.check_expr(arg);
                }
            }
        }
        target
    }

    //=====================================================
    // Section 6: Lambdas and switch expressions
    //=====================================================

    fn check_lambda(
        &mut self,
        params: &[Param],
        return_type: Option<&TypeExpr>,
        body: &LambdaBody,
        expected: Option<&Type>,
        position: Position,
    ) -> Type {
        let (expected_params, expected_ret) = match expected {
            Some(Type::Function { params, ret }) => (params.clone(), Some((**ret).clone())),
            _ => (Vec::new(), None),
        };
        let param_types: Vec<Type> = params
            .iter()
            .enumerate()
            .map(|(index, param)| match &param.ty {
                Some(ty) => self.resolve_type(ty, param.position),
                None => expected_params
                    .get(index)
                    .filter(|ty| !ty.contains_type_param())
                    .cloned()
                    .unwrap_or(Type::Any),
            })
            .collect();
        let declared_ret = return_type.map(|ty| self.resolve_type(ty, position));
        self.enter_function(declared_ret.clone(), false);
        for (param, ty) in params.iter().zip(&param_types) {
            let ty = if param.variadic && !matches!(ty, Type::Array(_)) {
                Type::array(ty.clone())
            } else {
                ty.clone()
            };
            let info = SymbolInfo::new(ty, Storage::Param, param.position, true);
            if self.scopes.declare(param.name.clone(), info).is_err() {
                self.redeclared(&param.name, param.position);
            }
        }
        let body_ty = match body {
            LambdaBody::Expr(inner) => {
                let hint = declared_ret
                    .clone()
                    .or_else(|| expected_ret.filter(|ty| !ty.contains_type_param() && *ty != Type::Void));
                let found = self.check_expr_with(inner, hint.as_ref());
                Some(found)
            }
            LambdaBody::Block(statements) => {
                self.check_block_statements(statements);
                None
            }
        };
        let inferred = self.leave_function();
        let ret = match (declared_ret, body_ty) {
            (Some(declared), Some(found)) => {
                if declared != Type::Void {
                    self.expect_assignable(&found, &declared, position, None);
                }
                declared
            }
            (Some(declared), None) => declared,
            (None, Some(found)) => found,
            (None, None) => {
                let mut result: Option<Type> = None;
                for ty in inferred {
                    result = Some(match result {
                        None => ty,
                        Some(previous) => self.join(&previous, &ty, position),
                    });
                }
                result.unwrap_or(Type::Void)
            }
        };
        Type::function(param_types, ret)
    }

    fn check_switch_expr(&mut self, subject: &Expr, arms: &[SwitchArm], expected: Option<&Type>) -> Type {
        let subject_ty = self.check_expr(subject);
        let mut result: Option<Type> = None;
        for arm in arms {
            self.scopes.push();
            self.check_pattern(&arm.pattern, &subject_ty);
            if let Some(guard) = &arm.guard {
                self.check_condition(guard);
            }
            let ty = self.check_expr_with(&arm.body, expected);
            self.scopes.pop();
            result = Some(match result {
                None => ty,
                Some(previous) => self.common_type(&previous, &ty).unwrap_or(Type::Any),
            });
        }
        result.unwrap_or(Type::Any)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{diagnostics, kinds};
    use super::super::{check_program, TypeErrorKind};
    use crate::parser::parse;
    use crate::tokenizer::tokenize;

    #[test]
    fn arity_respects_defaults_and_params() {
        let source = "
            int scale(int x, int factor = 2) { return x * factor; }
            int total(params int[] xs) { return sum(xs); }
            var a = scale(3);
            var b = scale(3, 4);
            var c = total(1, 2, 3);
            var d = total();
        ";
        assert!(kinds(source).is_empty(), "{:?}", diagnostics(source));
        assert_eq!(
            kinds("int scale(int x, int factor = 2) { return x * factor; } scale();"),
            vec![TypeErrorKind::ArityMismatch]
        );
        assert_eq!(kinds("println(len(1, 2));"), vec![TypeErrorKind::ArityMismatch]);
    }

    #[test]
    fn argument_types_are_checked() {
        assert_eq!(
            kinds("int twice(int x) { return x * 2; } twice(\"a\");"),
            vec![TypeErrorKind::TypeMismatch]
        );
    }

    #[test]
    fn null_conditional_access_is_allowed() {
        let source = "
            string? name = null;
            var length = name?.Length;
            var safe = name ?? \"anonymous\";
            if (name != null && name.Length > 2) { println(name); }
        ";
        assert!(kinds(source).is_empty(), "{:?}", diagnostics(source));
        assert_eq!(
            kinds("string? name = null; var n = name.Length;"),
            vec![TypeErrorKind::NullSafetyViolation]
        );
    }

    #[test]
    fn null_is_rejected_for_value_types() {
        assert_eq!(kinds("int x = null;"), vec![TypeErrorKind::TypeMismatch]);
        assert!(kinds("int? x = null;").is_empty());
    }

    #[test]
    fn undefined_names_are_reported() {
        assert_eq!(kinds("var y = missing + 1;"), vec![TypeErrorKind::UndefinedSymbol]);
        assert_eq!(kinds("nowhere();"), vec![TypeErrorKind::UndefinedSymbol]);
    }

    #[test]
    fn lambda_parameters_take_the_expected_type() {
        let source = "
            Func<int, int> twice = x => x * 2;
            int r = twice(4);
        ";
        assert!(kinds(source).is_empty(), "{:?}", diagnostics(source));
    }

    #[test]
    fn operator_overloads_are_annotated() {
        let source = "
            class Vec2 {
                public double X;
                public double Y;
                public Vec2(double x, double y) { X = x; Y = y; }
                public static Vec2 operator +(Vec2 a, Vec2 b) { return new Vec2(a.X + b.X, a.Y + b.Y); }
            }
            var sum = new Vec2(1, 2) + new Vec2(3, 4);
        ";
        let program = parse(tokenize(source).unwrap()).unwrap();
        let checked = check_program(program);
        assert!(checked.diagnostics.is_empty(), "{:?}", checked.diagnostics);
        let overloads: Vec<_> = checked.annotations.operators.values().collect();
        assert_eq!(overloads.len(), 1);
        assert_eq!(overloads[0].class.as_str(), "Vec2");
        assert_eq!(overloads[0].method.as_str(), "op_Add");
    }

    #[test]
    fn abstract_classes_cannot_be_created() {
        let source = "
            abstract class Shape { public abstract double Area(); }
            var s = new Shape();
        ";
        assert_eq!(kinds(source), vec![TypeErrorKind::TypeMismatch]);
    }

    #[test]
    fn module_members_resolve_through_the_module_name() {
        let source = "
            module Geometry {
                const double Tau = 6.28;
                double circumference(double r) { return Tau * r; }
            }
            double c = Geometry.circumference(2.0);
        ";
        assert!(kinds(source).is_empty(), "{:?}", diagnostics(source));
        assert_eq!(
            kinds("module Geometry { } var x = Geometry.missing;"),
            vec![TypeErrorKind::UndefinedSymbol]
        );
    }
}
