//=====================================================
// File: compiler/fold.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: AST-level optimisation
// Objective: Fold literal operands with the runtime operator semantics and
//            prune statically dead branches and unreachable statements
//=====================================================

use strata_core::Value;
use strata_core::ops;

use crate::ast::{
    BinaryOp, ClassMember, Expr, ExprKind, FunctionBody, InterpolationSegment, LambdaBody, Literal,
    LogicalOp, Param, Pattern, PatternKind, Program, Stmt, StmtKind, UnaryOp,
};
use crate::checker::Annotations;

/// Rewrites `program` in place and returns how many nodes were replaced.
/// Operations that would fault at runtime, such as integer division by a
/// zero literal, are left for the VM to report.
pub fn fold_program(program: &mut Program, annotations: &Annotations, eliminate_dead_code: bool) -> usize {
    let mut folder = Folder {
        annotations,
        eliminate_dead_code,
        rewrites: 0,
    };
    folder.block(&mut program.statements);
    folder.rewrites
}

struct Folder<'a> {
    annotations: &'a Annotations,
    eliminate_dead_code: bool,
    rewrites: usize,
}

impl Folder<'_> {
    fn block(&mut self, statements: &mut Vec<Stmt>) {
        for stmt in statements.iter_mut() {
            self.stmt(stmt);
        }
        if !self.eliminate_dead_code {
            return;
        }
        if let Some(exit) = statements.iter().position(Stmt::diverges) {
            let before = statements.len();
            let mut position = 0;
            statements.retain(|stmt| {
                let keep = position <= exit || is_declaration(stmt);
                position += 1;
                keep
            });
            self.rewrites += before - statements.len();
        }
    }

    fn stmt(&mut self, stmt: &mut Stmt) {
        match &mut stmt.kind {
            StmtKind::Var(decl) => self.opt_expr(decl.init.as_mut()),
            StmtKind::Function(decl) => {
                self.params(&mut decl.params);
                self.function_body(&mut decl.body);
            }
            StmtKind::Class(decl) => {
                for member in &mut decl.members {
                    match member {
                        ClassMember::Field(field) => self.opt_expr(field.init.as_mut()),
                        ClassMember::Method(method) => {
                            self.params(&mut method.params);
                            self.function_body(&mut method.body);
                        }
                        ClassMember::Constructor(constructor) => {
                            self.params(&mut constructor.params);
                            if let Some(args) = &mut constructor.base_args {
                                self.exprs(args);
                            }
                            self.block(&mut constructor.body);
                        }
                    }
                }
            }
            StmtKind::Interface(_) | StmtKind::Enum(_) => {}
            StmtKind::Module(decl) => self.block(&mut decl.body),
            StmtKind::Expr(expr) => self.expr(expr),
            StmtKind::Set { value, .. } => self.expr(value),
            StmtKind::Block(statements) => self.block(statements),
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.expr(condition);
                self.stmt(then_branch);
                if let Some(else_branch) = else_branch {
                    self.stmt(else_branch);
                }
            }
            StmtKind::While { condition, body } | StmtKind::DoWhile { body, condition } => {
                self.expr(condition);
                self.stmt(body);
            }
            StmtKind::For {
                init,
                condition,
                update,
                body,
            } => {
                if let Some(init) = init {
                    self.stmt(init);
                }
                self.opt_expr(condition.as_mut());
                self.exprs(update);
                self.stmt(body);
            }
            StmtKind::Foreach { iterable, body, .. } => {
                self.expr(iterable);
                self.stmt(body);
            }
            StmtKind::Repeat { count, body } => {
                self.expr(count);
                self.stmt(body);
            }
            StmtKind::Iterate {
                start,
                end,
                step,
                body,
                ..
            } => {
                self.expr(start);
                self.expr(end);
                self.opt_expr(step.as_mut());
                self.stmt(body);
            }
            StmtKind::Forever(body) | StmtKind::Parallel(body) => self.stmt(body),
            StmtKind::Switch { subject, cases } => {
                self.expr(subject);
                for case in cases {
                    for label in &mut case.labels {
                        self.pattern(&mut label.pattern);
                        self.opt_expr(label.guard.as_mut());
                    }
                    self.block(&mut case.body);
                }
            }
            StmtKind::Try {
                body,
                catches,
                finally,
            } => {
                self.block(body);
                for clause in catches {
                    self.block(&mut clause.body);
                }
                if let Some(finally) = finally {
                    self.block(finally);
                }
            }
            StmtKind::Throw(value) | StmtKind::Return(value) => self.opt_expr(value.as_mut()),
            StmtKind::Break | StmtKind::Continue | StmtKind::Asm(_) => {}
        }
        if self.eliminate_dead_code {
            self.prune(stmt);
        }
    }

    /// Replaces control flow whose condition is a literal.
    fn prune(&mut self, stmt: &mut Stmt) {
        let replacement = match &mut stmt.kind {
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => match condition.as_literal() {
                Some(Literal::Bool(true)) => Some(vec![std::mem::replace(&mut **then_branch, empty(stmt.position))]),
                Some(Literal::Bool(false)) => Some(
                    else_branch
                        .take()
                        .map(|branch| vec![*branch])
                        .unwrap_or_default(),
                ),
                _ => None,
            },
            StmtKind::While { condition, .. } if condition.as_literal() == Some(&Literal::Bool(false)) => {
                Some(Vec::new())
            }
            StmtKind::For {
                init,
                condition: Some(condition),
                ..
            } if condition.as_literal() == Some(&Literal::Bool(false)) => {
                Some(init.take().map(|init| vec![*init]).unwrap_or_default())
            }
            _ => None,
        };
        if let Some(statements) = replacement {
            stmt.kind = StmtKind::Block(statements);
            self.rewrites += 1;
        }
    }

    fn function_body(&mut self, body: &mut FunctionBody) {
        match body {
            FunctionBody::Block(statements) => self.block(statements),
            FunctionBody::Expr(expr) => self.expr(expr),
            FunctionBody::None => {}
        }
    }

    fn params(&mut self, params: &mut [Param]) {
        for param in params {
            self.opt_expr(param.default.as_mut());
        }
    }

    fn exprs(&mut self, exprs: &mut [Expr]) {
        for expr in exprs {
            self.expr(expr);
        }
    }

    fn opt_expr(&mut self, expr: Option<&mut Expr>) {
        if let Some(expr) = expr {
            self.expr(expr);
        }
    }

    fn pattern(&mut self, pattern: &mut Pattern) {
        match &mut pattern.kind {
            PatternKind::Constant(value) | PatternKind::Relational { value, .. } => self.expr(value),
            PatternKind::Property { fields, .. } => {
                for (_, field) in fields {
                    self.pattern(field);
                }
            }
            PatternKind::Tuple(items) => {
                for item in items {
                    self.pattern(item);
                }
            }
            PatternKind::List { before, after, .. } => {
                for item in before.iter_mut().chain(after.iter_mut()) {
                    self.pattern(item);
                }
            }
            PatternKind::Not(inner) => self.pattern(inner),
            PatternKind::Wildcard | PatternKind::Var(_) | PatternKind::Type { .. } => {}
        }
    }

    fn expr(&mut self, expr: &mut Expr) {
        match &mut expr.kind {
            ExprKind::Literal(_) | ExprKind::Identifier(_) | ExprKind::This | ExprKind::Base => {}
            ExprKind::Interpolated(segments) => {
                for segment in segments {
                    if let InterpolationSegment::Expr(inner) = segment {
                        self.expr(inner);
                    }
                }
            }
            ExprKind::Binary { left, right, .. }
            | ExprKind::Logical { left, right, .. }
            | ExprKind::Range {
                start: left,
                end: right,
            } => {
                self.expr(left);
                self.expr(right);
            }
            ExprKind::Unary { operand, .. } => self.expr(operand),
            ExprKind::Update { target, .. } => self.expr(target),
            ExprKind::Assign { target, value, .. } => {
                self.expr(target);
                self.expr(value);
            }
            ExprKind::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                self.expr(condition);
                self.expr(then_branch);
                self.expr(else_branch);
            }
            ExprKind::Call { callee, args, .. } => {
                self.expr(callee);
                self.exprs(args);
            }
            ExprKind::Index { target, index, .. } => {
                self.expr(target);
                self.expr(index);
            }
            ExprKind::Member { target, .. } => self.expr(target),
            ExprKind::Lambda { params, body, .. } => {
                self.params(params);
                match body {
                    LambdaBody::Expr(inner) => self.expr(inner),
                    LambdaBody::Block(statements) => self.block(statements),
                }
            }
            ExprKind::Array(items) | ExprKind::Tuple(items) => self.exprs(items),
            ExprKind::New { args, .. } => self.exprs(args),
            ExprKind::Is { value, pattern } => {
                self.expr(value);
                self.pattern(pattern);
            }
            ExprKind::As { value, .. } => self.expr(value),
            ExprKind::Switch { subject, arms } => {
                self.expr(subject);
                for arm in arms {
                    self.pattern(&mut arm.pattern);
                    self.opt_expr(arm.guard.as_mut());
                    self.expr(&mut arm.body);
                }
            }
        }
        if let Some(kind) = self.fold(expr) {
            expr.kind = kind;
            self.rewrites += 1;
        }
    }

    /// Folded replacement for an expression whose operands are literals.
    fn fold(&self, expr: &mut Expr) -> Option<ExprKind> {
        match &mut expr.kind {
            ExprKind::Binary { op, left, right } => {
                if self.annotations.operators.contains_key(&expr.id) {
                    return None;
                }
                let op = runtime_binary(*op)?;
                let lhs = literal_value(left.as_literal()?)?;
                let rhs = literal_value(right.as_literal()?)?;
                let value = ops::binary(op, &lhs, &rhs).ok()?;
                value_literal(&value).map(ExprKind::Literal)
            }
            ExprKind::Unary { op, operand } => {
                let literal = operand.as_literal()?;
                let op = match (op, literal) {
                    (UnaryOp::Plus, Literal::Integer(_) | Literal::Float(_) | Literal::Decimal(_)) => {
                        return Some(ExprKind::Literal(literal.clone()));
                    }
                    (UnaryOp::Neg, Literal::Integer(_) | Literal::Float(_) | Literal::Decimal(_)) => ops::UnaryOp::Neg,
                    (UnaryOp::Not, Literal::Bool(_)) => ops::UnaryOp::Not,
                    (UnaryOp::BitNot, Literal::Integer(_)) => ops::UnaryOp::BitNot,
                    _ => return None,
                };
                let value = ops::unary(op, &literal_value(literal)?).ok()?;
                value_literal(&value).map(ExprKind::Literal)
            }
            ExprKind::Logical { op, left, right } => {
                let literal = left.as_literal()?;
                match (op, literal) {
                    (LogicalOp::And, Literal::Bool(false)) | (LogicalOp::Or, Literal::Bool(true)) => {
                        Some(ExprKind::Literal(literal.clone()))
                    }
                    (LogicalOp::And, Literal::Bool(true))
                    | (LogicalOp::Or, Literal::Bool(false))
                    | (LogicalOp::Coalesce, Literal::Null) => Some(take_kind(right)),
                    (LogicalOp::Coalesce, _) => Some(ExprKind::Literal(literal.clone())),
                    _ => None,
                }
            }
            ExprKind::Conditional {
                condition,
                then_branch,
                else_branch,
            } => match condition.as_literal()? {
                Literal::Bool(true) => Some(take_kind(then_branch)),
                Literal::Bool(false) => Some(take_kind(else_branch)),
                _ => None,
            },
            _ => None,
        }
    }
}

fn take_kind(expr: &mut Expr) -> ExprKind {
    std::mem::replace(&mut expr.kind, ExprKind::Literal(Literal::Null))
}

fn empty(position: crate::tokenizer::Position) -> Stmt {
    Stmt {
        kind: StmtKind::Block(Vec::new()),
        position,
    }
}

fn is_declaration(stmt: &Stmt) -> bool {
    matches!(
        stmt.kind,
        StmtKind::Function(_)
            | StmtKind::Class(_)
            | StmtKind::Interface(_)
            | StmtKind::Enum(_)
            | StmtKind::Module(_)
    )
}

fn runtime_binary(op: BinaryOp) -> Option<ops::BinaryOp> {
    let op = match op {
        BinaryOp::Add => ops::BinaryOp::Add,
        BinaryOp::Sub => ops::BinaryOp::Sub,
        BinaryOp::Mul => ops::BinaryOp::Mul,
        BinaryOp::Div => ops::BinaryOp::Div,
        BinaryOp::Mod => ops::BinaryOp::Mod,
        BinaryOp::Pow => ops::BinaryOp::Pow,
        BinaryOp::BitAnd => ops::BinaryOp::BitAnd,
        BinaryOp::BitOr => ops::BinaryOp::BitOr,
        BinaryOp::BitXor => ops::BinaryOp::BitXor,
        BinaryOp::Eq => ops::BinaryOp::Equal,
        BinaryOp::NotEq => ops::BinaryOp::NotEqual,
        BinaryOp::Less => ops::BinaryOp::Less,
        BinaryOp::LessEq => ops::BinaryOp::LessEqual,
        BinaryOp::Greater => ops::BinaryOp::Greater,
        BinaryOp::GreaterEq => ops::BinaryOp::GreaterEqual,
        BinaryOp::Compare => ops::BinaryOp::Compare,
        _ => return None,
    };
    Some(op)
}

fn literal_value(literal: &Literal) -> Option<Value> {
    let value = match literal {
        Literal::Integer(value) => Value::Integer(*value),
        Literal::Float(value) | Literal::Decimal(value) => Value::Float(*value),
        Literal::String(text) => Value::string(text.as_str()),
        Literal::Bool(value) => Value::Boolean(*value),
        Literal::Null => Value::Null,
        Literal::Char(_) => return None,
    };
    Some(value)
}

fn value_literal(value: &Value) -> Option<Literal> {
    let literal = match value {
        Value::Integer(value) => Literal::Integer(*value),
        Value::Float(value) => Literal::Float(*value),
        Value::Boolean(value) => Literal::Bool(*value),
        Value::String(text) => Literal::String(text.to_string()),
        Value::Null => Literal::Null,
        _ => return None,
    };
    Some(literal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::check_program;
    use crate::parser::parse;
    use crate::tokenizer::tokenize;

    fn folded(source: &str, eliminate_dead_code: bool) -> Program {
        let checked = check_program(parse(tokenize(source).expect("lex")).expect("parse"));
        let mut program = checked.program.clone();
        fold_program(&mut program, &checked.annotations, eliminate_dead_code);
        program
    }

    fn initializer(program: &Program, index: usize) -> &ExprKind {
        match &program.statements[index].kind {
            StmtKind::Var(decl) => &decl.init.as_ref().expect("initializer").kind,
            other => panic!("expected a declaration, found {other:?}"),
        }
    }

    #[test]
    fn arithmetic_and_comparisons_fold() {
        let program = folded("int a = 2 + 3 * 4;\nbool b = 10 > 3 && true;\nstring s = \"n=\" + 4;", false);
        assert_eq!(initializer(&program, 0), &ExprKind::Literal(Literal::Integer(14)));
        assert_eq!(initializer(&program, 1), &ExprKind::Literal(Literal::Bool(true)));
        assert_eq!(initializer(&program, 2), &ExprKind::Literal(Literal::String("n=4".into())));
    }

    #[test]
    fn faulting_operations_are_left_alone() {
        let program = folded("int a = 1 / 0;", false);
        assert!(matches!(initializer(&program, 0), ExprKind::Binary { op: BinaryOp::Div, .. }));
    }

    #[test]
    fn folding_is_idempotent() {
        let source = "
            int f(int x) {
                if (1 < 2) { return x * (3 - 1); }
                return -(-x);
            }
            var y = f(4) + (true ? 1 : 2);
        ";
        let once = folded(source, true);
        let mut twice = once.clone();
        let checked = check_program(parse(tokenize(source).expect("lex")).expect("parse"));
        assert_eq!(fold_program(&mut twice, &checked.annotations, true), 0);
        assert_eq!(once, twice);
    }

    #[test]
    fn dead_code_is_pruned_only_when_enabled() {
        let source = "int f() { return 1; int unused = 2; }\nwhile (false) { f(); }";
        let kept = folded(source, false);
        let pruned = folded(source, true);
        let body_len = |program: &Program| match &program.statements[0].kind {
            StmtKind::Function(decl) => match &decl.body {
                FunctionBody::Block(statements) => statements.len(),
                _ => 0,
            },
            _ => 0,
        };
        assert_eq!(body_len(&kept), 2);
        assert_eq!(body_len(&pruned), 1);
        assert!(matches!(&pruned.statements[1].kind, StmtKind::Block(body) if body.is_empty()));
    }
}
