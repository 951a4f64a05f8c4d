//=====================================================
// File: compiler/patterns.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Pattern lowering
// Objective: Turn switch, match and `is` patterns into type tests,
//            comparisons and element extraction against a subject slot
//=====================================================

use anyhow::Result;
use strata_core::vm::{Constant, Opcode};

use super::Compiler;
use crate::ast::{BinaryOp, Pattern, PatternKind, TypeExpr};
use crate::checker::types::Type;

impl<'a> Compiler<'a> {
    /// Emits the tests for `pattern` against the value in `subject` and
    /// returns the jumps taken when it does not match. Bindings are declared
    /// in the current scope.
    pub(super) fn compile_pattern(&mut self, pattern: &'a Pattern, subject: u32) -> Result<Vec<usize>> {
        let mut fails = Vec::new();
        match &pattern.kind {
            PatternKind::Wildcard => {}
            PatternKind::Constant(value) => {
                self.emit(Opcode::LoadLocal, subject, 0);
                self.compile_expr(value)?;
                self.emit_op(Opcode::Equal);
                fails.push(self.emit_jump(Opcode::JumpIfFalse));
            }
            PatternKind::Relational { op, value } => {
                self.emit(Opcode::LoadLocal, subject, 0);
                self.compile_expr(value)?;
                self.emit_op(relational_opcode(*op));
                fails.push(self.emit_jump(Opcode::JumpIfFalse));
            }
            PatternKind::Var(name) => self.bind(name, subject)?,
            PatternKind::Type { ty, binding } => {
                if binding.is_none() {
                    if let Some(name) = self.value_name(ty) {
                        self.emit(Opcode::LoadLocal, subject, 0);
                        self.load_name(&name)?;
                        self.emit_op(Opcode::Equal);
                        fails.push(self.emit_jump(Opcode::JumpIfFalse));
                        return Ok(fails);
                    }
                }
                fails.push(self.type_test(subject, ty));
                if let Some(binding) = binding {
                    self.bind(binding, subject)?;
                }
            }
            PatternKind::Property {
                ty,
                fields,
                binding,
            } => {
                match ty {
                    Some(ty) => fails.push(self.type_test(subject, ty)),
                    None => {
                        self.emit(Opcode::LoadLocal, subject, 0);
                        self.emit_op(Opcode::Null);
                        self.emit_op(Opcode::NotEqual);
                        fails.push(self.emit_jump(Opcode::JumpIfFalse));
                    }
                }
                for (name, field) in fields {
                    if matches!(field.kind, PatternKind::Wildcard) {
                        continue;
                    }
                    let name = self.name_constant(name);
                    self.emit(Opcode::LoadLocal, subject, 0);
                    self.emit(Opcode::GetField, name, 0);
                    let slot = self.declare_temp()?;
                    self.emit(Opcode::StoreLocal, slot, 0);
                    fails.extend(self.compile_pattern(field, slot)?);
                }
                if let Some(binding) = binding {
                    self.bind(binding, subject)?;
                }
            }
            PatternKind::Tuple(items) => {
                fails.push(self.array_test(subject));
                fails.push(self.length_test(subject, items.len(), Opcode::Equal));
                for (position, item) in items.iter().enumerate() {
                    fails.extend(self.element_pattern(subject, item, |compiler| {
                        compiler.emit_constant(Constant::Integer(position as i64));
                    })?);
                }
            }
            PatternKind::List {
                before,
                rest,
                after,
            } => {
                fails.push(self.array_test(subject));
                let fixed = before.len() + after.len();
                let comparison = if *rest { Opcode::GreaterEqual } else { Opcode::Equal };
                fails.push(self.length_test(subject, fixed, comparison));
                for (position, item) in before.iter().enumerate() {
                    fails.extend(self.element_pattern(subject, item, |compiler| {
                        compiler.emit_constant(Constant::Integer(position as i64));
                    })?);
                }
                for (position, item) in after.iter().enumerate() {
                    let from_end = (after.len() - position) as i64;
                    fails.extend(self.element_pattern(subject, item, |compiler| {
                        compiler.emit(Opcode::LoadLocal, subject, 0);
                        compiler.emit_op(Opcode::Len);
                        compiler.emit_constant(Constant::Integer(from_end));
                        compiler.emit_op(Opcode::Sub);
                    })?);
                }
            }
            PatternKind::Not(inner) => {
                let inner_fails = self.compile_pattern(inner, subject)?;
                if inner_fails.is_empty() {
                    self.emit_constant(Constant::Boolean(false));
                    fails.push(self.emit_jump(Opcode::JumpIfFalse));
                } else {
                    fails.push(self.emit_jump(Opcode::Jump));
                    for fail in inner_fails {
                        self.patch_jump(fail);
                    }
                }
            }
        }
        Ok(fails)
    }

    fn bind(&mut self, name: &str, subject: u32) -> Result<()> {
        let slot = self.declare_local(name)?;
        self.emit(Opcode::LoadLocal, subject, 0);
        self.emit(Opcode::StoreLocal, slot, 0);
        Ok(())
    }

    fn type_test(&mut self, subject: u32, ty: &TypeExpr) -> usize {
        let name = self.type_test_name(ty);
        let name = self.name_constant(&name);
        self.emit(Opcode::LoadLocal, subject, 0);
        self.emit(Opcode::IsInstance, name, 0);
        self.emit_jump(Opcode::JumpIfFalse)
    }

    fn array_test(&mut self, subject: u32) -> usize {
        let name = self.name_constant("array");
        self.emit(Opcode::LoadLocal, subject, 0);
        self.emit(Opcode::IsInstance, name, 0);
        self.emit_jump(Opcode::JumpIfFalse)
    }

    fn length_test(&mut self, subject: u32, length: usize, comparison: Opcode) -> usize {
        self.emit(Opcode::LoadLocal, subject, 0);
        self.emit_op(Opcode::Len);
        self.emit_constant(Constant::Integer(length as i64));
        self.emit_op(comparison);
        self.emit_jump(Opcode::JumpIfFalse)
    }

    /// Extracts one element into a temp and matches `item` against it.
    fn element_pattern(
        &mut self,
        subject: u32,
        item: &'a Pattern,
        index: impl FnOnce(&mut Self),
    ) -> Result<Vec<usize>> {
        if matches!(item.kind, PatternKind::Wildcard) {
            return Ok(Vec::new());
        }
        self.emit(Opcode::LoadLocal, subject, 0);
        index(self);
        self.emit_op(Opcode::LoadIndex);
        let slot = self.declare_temp()?;
        self.emit(Opcode::StoreLocal, slot, 0);
        self.compile_pattern(item, slot)
    }

    /// A bare name in type position that is actually a variable, field or
    /// constant, compared by value.
    fn value_name(&mut self, ty: &TypeExpr) -> Option<String> {
        let TypeExpr::Named { name, args } = ty else {
            return None;
        };
        if !args.is_empty()
            || Type::primitive(name).is_some()
            || self.is_class_name(name)
            || self.interfaces.contains(name.as_str())
            || super::is_builtin_exception(name)
        {
            return None;
        }
        let is_field = self
            .current
            .class
            .clone()
            .is_some_and(|class| self.find_field(&class, name).is_some());
        let known = self.resolve_variable(name).is_some() || self.visible_global(name).is_some() || is_field;
        known.then(|| name.to_string())
    }
}

fn relational_opcode(op: BinaryOp) -> Opcode {
    match op {
        BinaryOp::Less => Opcode::Less,
        BinaryOp::LessEq => Opcode::LessEqual,
        BinaryOp::Greater => Opcode::Greater,
        BinaryOp::GreaterEq => Opcode::GreaterEqual,
        BinaryOp::NotEq => Opcode::NotEqual,
        _ => Opcode::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::run;
    use strata_core::Value;

    #[test]
    fn type_patterns_bind_the_subject() {
        let source = "
            object item = 41;
            int result = 0;
            if (item is int n) { result = n + 1; }
            result
        ";
        assert_eq!(run(source), Value::Integer(42));
    }

    #[test]
    fn relational_and_negated_patterns() {
        let source = "
            string grade(int score) => score switch {
                >= 90 => \"A\",
                not < 50 => \"pass\",
                _ => \"fail\"
            };
            grade(95) + grade(60) + grade(10)
        ";
        assert_eq!(run(source), Value::string("Apassfail"));
    }

    #[test]
    fn list_patterns_check_both_ends() {
        let source = "
            string shape(int[] xs) => xs switch {
                [] => \"empty\",
                [1, .., var last] => \"starts at one, ends at \" + last,
                _ => \"other\"
            };
            shape([1, 2, 3]) + \"; \" + shape([]) + \"; \" + shape([2])
        ";
        assert_eq!(run(source), Value::string("starts at one, ends at 3; empty; other"));
    }

    #[test]
    fn property_patterns_read_fields() {
        let source = "
            class Point {
                int X;
                int Y;
                Point(int x, int y) { X = x; Y = y; }
            }
            string locate(Point p) => p switch {
                { X: 0, Y: 0 } => \"origin\",
                Point { X: 0 } => \"axis\",
                _ => \"plane\"
            };
            locate(new Point(0, 0)) + locate(new Point(0, 4)) + locate(new Point(1, 1))
        ";
        assert_eq!(run(source), Value::string("originaxisplane"));
    }
}
