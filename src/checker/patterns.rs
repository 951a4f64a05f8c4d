//=====================================================
// File: checker/patterns.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Pattern checking
// Objective: Verify that switch and `is` patterns can match their subject
//            and declare the names they bind
//=====================================================

use super::registry::Member;
use super::types::Type;
use super::{TypeChecker, TypeErrorKind};
use crate::ast::{Pattern, PatternKind, TypeExpr};

impl TypeChecker {
    /// A pattern type can match when either side converts to the other.
    pub(super) fn pattern_compatible(&self, pattern_ty: &Type, subject: &Type) -> bool {
        if subject.is_any() || pattern_ty.is_any() {
            return true;
        }
        if *pattern_ty == Type::Null {
            return subject.is_nullable() || !subject.is_value_type();
        }
        let subject = subject.non_null();
        self.assignable(pattern_ty, &subject)
            || self.assignable(&subject, pattern_ty)
            || (pattern_ty.is_numeric() && subject.is_numeric())
    }

    fn pattern_mismatch(&mut self, pattern_ty: &Type, subject: &Type, pattern: &Pattern) {
        self.report(
            TypeErrorKind::TypeMismatch,
            format!("a {pattern_ty} pattern can never match a value of type {subject}"),
            pattern.position,
        );
    }

    /// Type patterns naming a value (`case Limit:`) behave as constants.
    fn type_pattern_value(&self, ty: &TypeExpr) -> Option<Type> {
        let TypeExpr::Named { name, args } = ty else {
            return None;
        };
        if !args.is_empty()
            || Type::primitive(name).is_some()
            || self.registry.class(name).is_some()
            || self.registry.enum_variants(name).is_some()
            || self.type_param_in_scope(name).is_some()
        {
            return None;
        }
        self.lookup(name).map(|info| info.ty)
    }

    pub(super) fn check_pattern(&mut self, pattern: &Pattern, subject: &Type) {
        match &pattern.kind {
            PatternKind::Wildcard => {}
            PatternKind::Constant(expr) => {
                let ty = self.check_expr(expr);
                if !self.pattern_compatible(&ty, subject) {
                    self.pattern_mismatch(&ty, subject, pattern);
                }
            }
            PatternKind::Relational { value, .. } => {
                let ty = self.check_expr(value);
                let target = subject.non_null();
                let comparable = target.is_any()
                    || ty.is_any()
                    || Type::promote(&target, &ty).is_some()
                    || (target == Type::String && ty == Type::String);
                if !comparable {
                    self.pattern_mismatch(&ty, subject, pattern);
                }
            }
            PatternKind::Var(name) => {
                self.declare_local(name, subject.clone(), pattern.position, true);
            }
            PatternKind::Type { ty, binding } => {
                if binding.is_none() {
                    if let Some(value_ty) = self.type_pattern_value(ty) {
                        if !self.pattern_compatible(&value_ty, subject) {
                            self.pattern_mismatch(&value_ty, subject, pattern);
                        }
                        return;
                    }
                }
                let target = self.resolve_type(ty, pattern.position);
                if !self.pattern_compatible(&target, subject) {
                    self.pattern_mismatch(&target, subject, pattern);
                }
                if let Some(binding) = binding {
                    self.declare_local(binding, target, pattern.position, true);
                }
            }
            PatternKind::Property { ty, fields, binding } => {
                let target = match ty {
                    Some(ty) => {
                        let target = self.resolve_type(ty, pattern.position);
                        if !self.pattern_compatible(&target, subject) {
                            self.pattern_mismatch(&target, subject, pattern);
                        }
                        target
                    }
                    None => subject.non_null(),
                };
                for (field, sub_pattern) in fields {
                    let field_ty = self.property_type(&target, field, pattern);
                    self.check_pattern(sub_pattern, &field_ty);
                }
                if let Some(binding) = binding {
                    self.declare_local(binding, target, pattern.position, true);
                }
            }
            PatternKind::Tuple(items) => match subject.non_null() {
                Type::Tuple(types) if types.len() == items.len() => {
                    for (item, ty) in items.iter().zip(types) {
                        self.check_pattern(item, &ty);
                    }
                }
                Type::Any => {
                    for item in items {
                        self.check_pattern(item, &Type::Any);
                    }
                }
                other => {
                    self.report(
                        TypeErrorKind::TypeMismatch,
                        format!("a tuple pattern of {} elements cannot match {other}", items.len()),
                        pattern.position,
                    );
                    for item in items {
                        self.check_pattern(item, &Type::Any);
                    }
                }
            },
            PatternKind::List { before, after, .. } => {
                let element = match subject.non_null().element() {
                    Some(element) => element,
                    None => {
                        self.report(
                            TypeErrorKind::TypeMismatch,
                            format!("a list pattern cannot match {subject}"),
                            pattern.position,
                        );
                        Type::Any
                    }
                };
                for item in before.iter().chain(after) {
                    self.check_pattern(item, &element);
                }
            }
            PatternKind::Not(inner) => self.check_pattern(inner, subject),
        }
    }

    fn property_type(&mut self, target: &Type, field: &str, pattern: &Pattern) -> Type {
        match target {
            Type::Any => return Type::Any,
            Type::Array(_) if matches!(field, "Length" | "Count") => return Type::Int,
            Type::String if field == "Length" => return Type::Int,
            _ => {}
        }
        match self.registry.member(target, field) {
            Some(Member::Field(info)) => info.ty,
            Some(Member::Method(_)) => {
                self.report(
                    TypeErrorKind::TypeMismatch,
                    format!("'{field}' is a method, not a property"),
                    pattern.position,
                );
                Type::Any
            }
            None => {
                self.report(
                    TypeErrorKind::UndefinedSymbol,
                    format!("{target} has no property '{field}'"),
                    pattern.position,
                );
                Type::Any
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{diagnostics, kinds};
    use super::super::TypeErrorKind;

    #[test]
    fn arms_must_fit_the_subject() {
        let source = "
            int n = 4;
            var label = n switch { 0 => \"zero\", > 0 => \"positive\", _ => \"negative\" };
        ";
        assert!(kinds(source).is_empty(), "{:?}", diagnostics(source));
        let wrong = "
            int n = 4;
            var label = n switch { \"four\" => 1, _ => 0 };
        ";
        assert_eq!(kinds(wrong), vec![TypeErrorKind::TypeMismatch]);
    }

    #[test]
    fn property_patterns_see_fields() {
        let source = "
            class Point { public int X; public int Y; }
            string describe(Point p) {
                return p switch { { X: 0, Y: 0 } => \"origin\", { X: 0 } => \"axis\", _ => \"plane\" };
            }
        ";
        assert!(kinds(source).is_empty(), "{:?}", diagnostics(source));
        let missing = "
            class Point { public int X; }
            var hit = new Point() is { Z: 1 };
        ";
        assert_eq!(kinds(missing), vec![TypeErrorKind::UndefinedSymbol]);
    }

    #[test]
    fn type_pattern_binding_is_usable() {
        let source = "
            object o = \"text\";
            if (o is string s) { var n = s.Length; }
        ";
        assert!(kinds(source).is_empty(), "{:?}", diagnostics(source));
    }
}
