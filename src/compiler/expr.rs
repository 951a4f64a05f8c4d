//=====================================================
// File: compiler/expr.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Expression lowering
// Objective: Emit stack code for operators, calls, member access,
//            assignment targets, lambdas and switch expressions
//=====================================================

use anyhow::{Result, anyhow, bail};
use strata_core::natives::default_registry;
use strata_core::vm::{Constant, Opcode};

use super::{Access, Compiler, FieldRef, FunctionKind, FunctionSetup, MethodRef, is_builtin_exception};
use crate::ast::{
    AssignOp, BinaryOp, Expr, ExprKind, InterpolationSegment, LambdaBody, Literal, LogicalOp, Param,
    SwitchArm, TypeExpr, UnaryOp,
};

/// Assignable location. Field receivers and index operands are parked in
/// scratch slots so the location can be read and written repeatedly.
#[derive(Debug, Clone, Copy)]
enum Place {
    Var(Access),
    Global(u32),
    Field { receiver: u32, name: u32 },
    Index { target: u32, index: u32 },
}

fn binary_opcode(op: BinaryOp) -> Option<Opcode> {
    let opcode = match op {
        BinaryOp::Add => Opcode::Add,
        BinaryOp::Sub => Opcode::Sub,
        BinaryOp::Mul => Opcode::Mul,
        BinaryOp::Div => Opcode::Div,
        BinaryOp::Mod => Opcode::Mod,
        BinaryOp::Pow => Opcode::Pow,
        BinaryOp::BitAnd => Opcode::BitAnd,
        BinaryOp::BitOr => Opcode::BitOr,
        BinaryOp::BitXor => Opcode::BitXor,
        BinaryOp::Eq => Opcode::Equal,
        BinaryOp::NotEq => Opcode::NotEqual,
        BinaryOp::Less => Opcode::Less,
        BinaryOp::LessEq => Opcode::LessEqual,
        BinaryOp::Greater => Opcode::Greater,
        BinaryOp::GreaterEq => Opcode::GreaterEqual,
        BinaryOp::Compare => Opcode::Compare,
        BinaryOp::In => Opcode::In,
        BinaryOp::SubsetEq => Opcode::Subset,
        BinaryOp::Union => Opcode::Union,
        BinaryOp::Intersect => Opcode::Intersect,
        BinaryOp::NotIn | BinaryOp::Subset => return None,
    };
    Some(opcode)
}

pub(super) fn literal_constant(literal: &Literal) -> Constant {
    match literal {
        Literal::Integer(value) => Constant::Integer(*value),
        Literal::Float(value) | Literal::Decimal(value) => Constant::Float(*value),
        Literal::String(value) => Constant::String(value.clone()),
        Literal::Char(value) => Constant::String(value.to_string()),
        Literal::Bool(value) => Constant::Boolean(*value),
        Literal::Null => Constant::Null,
    }
}

impl<'a> Compiler<'a> {
    pub(super) fn compile_expr_as(&mut self, expr: &'a Expr, target: Option<&TypeExpr>) -> Result<()> {
        self.compile_expr(expr)?;
        self.coerce(expr, target);
        Ok(())
    }

    pub(super) fn compile_expr(&mut self, expr: &'a Expr) -> Result<()> {
        match &expr.kind {
            ExprKind::Literal(literal) => {
                match literal {
                    Literal::Null => self.emit_op(Opcode::Null),
                    other => {
                        let index = self.chunk.add_constant(literal_constant(other));
                        self.emit(Opcode::LoadConst, index, 0)
                    }
                };
                Ok(())
            }
            ExprKind::Identifier(name) => self.load_name(name),
            ExprKind::Interpolated(segments) => {
                for segment in segments {
                    match segment {
                        InterpolationSegment::Text(text) => {
                            self.emit_constant(Constant::String(text.clone()))
                        }
                        InterpolationSegment::Expr(part) => self.compile_expr(part)?,
                    }
                }
                self.emit(Opcode::Concat, segments.len() as u32, 0);
                Ok(())
            }
            ExprKind::Binary { op, left, right } => self.compile_binary(expr, *op, left, right),
            ExprKind::Logical { op, left, right } => self.compile_logical(*op, left, right),
            ExprKind::Unary { op, operand } => {
                self.compile_expr(operand)?;
                match op {
                    UnaryOp::Neg => {
                        self.emit_op(Opcode::Neg);
                    }
                    UnaryOp::Not => {
                        self.emit_op(Opcode::Not);
                    }
                    UnaryOp::BitNot => {
                        self.emit_op(Opcode::BitNot);
                    }
                    UnaryOp::Sqrt => {
                        let name = self.name_constant("sqrt");
                        self.emit(Opcode::CallNative, name, 1);
                    }
                    UnaryOp::Plus | UnaryOp::Await => {}
                }
                Ok(())
            }
            ExprKind::Update {
                increment,
                prefix,
                target,
            } => self.compile_update(*increment, *prefix, target),
            ExprKind::Assign { op, target, value } => self.compile_assign(*op, target, value),
            ExprKind::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                self.compile_expr(condition)?;
                let otherwise = self.emit_jump(Opcode::JumpIfFalse);
                self.compile_expr(then_branch)?;
                let end = self.emit_jump(Opcode::Jump);
                self.patch_jump(otherwise);
                self.compile_expr(else_branch)?;
                self.patch_jump(end);
                Ok(())
            }
            ExprKind::Call { callee, args, .. } => self.compile_call(callee, args),
            ExprKind::Index {
                target,
                index,
                null_safe,
            } => {
                self.compile_expr(target)?;
                let skip = null_safe.then(|| self.emit_jump(Opcode::JumpIfNull));
                self.compile_expr(index)?;
                self.emit_op(Opcode::LoadIndex);
                if let Some(skip) = skip {
                    self.patch_jump(skip);
                }
                Ok(())
            }
            ExprKind::Member {
                target,
                name,
                null_safe,
            } => self.compile_member(target, name, *null_safe),
            ExprKind::Lambda {
                params,
                return_type,
                body,
            } => {
                self.lambda_count += 1;
                let name = format!("<lambda{}>", self.lambda_count);
                self.compile_closure(name, params, return_type.as_ref(), body)
            }
            ExprKind::Array(items) | ExprKind::Tuple(items) => {
                for item in items {
                    self.compile_expr(item)?;
                }
                self.emit(Opcode::MakeArray, items.len() as u32, 0);
                Ok(())
            }
            ExprKind::Range { start, end } => {
                self.compile_expr(start)?;
                self.compile_expr(end)?;
                self.emit(Opcode::MakeRange, 0, 0);
                Ok(())
            }
            ExprKind::New { ty, args } => self.compile_new(ty, args),
            ExprKind::This | ExprKind::Base => self.load_this(),
            ExprKind::Is { value, pattern } => {
                self.compile_expr(value)?;
                let subject = self.declare_temp()?;
                self.emit(Opcode::StoreLocal, subject, 0);
                let fails = self.compile_pattern(pattern, subject)?;
                self.emit_constant(Constant::Boolean(true));
                let end = self.emit_jump(Opcode::Jump);
                for fail in fails {
                    self.patch_jump(fail);
                }
                self.emit_constant(Constant::Boolean(false));
                self.patch_jump(end);
                Ok(())
            }
            ExprKind::As { value, ty } => {
                self.compile_expr(value)?;
                let name = self.type_test_name(ty);
                let name = self.name_constant(&name);
                self.emit(Opcode::AsType, name, 0);
                Ok(())
            }
            ExprKind::Switch { subject, arms } => self.compile_switch_expr(subject, arms),
        }
    }

    //=====================================================
    // Section 1: Names
    //=====================================================

    pub(super) fn load_name(&mut self, name: &str) -> Result<()> {
        if let Some(access) = self.resolve_variable(name) {
            self.load_access(access);
            return Ok(());
        }
        if let Some(class) = self.current.class.clone() {
            if let Some((field, owner)) = self.find_field(&class, name) {
                return self.load_field(field, &owner, name);
            }
            match self.find_method(&class, name) {
                Some(MethodRef::Static(_, index)) => {
                    self.emit(Opcode::MakeClosure, index, 0);
                    return Ok(());
                }
                Some(MethodRef::Virtual(..)) => {
                    bail!("method '{name}' cannot be used as a value")
                }
                None => {}
            }
        }
        if let Some(global) = self.visible_global(name) {
            self.emit(Opcode::LoadGlobal, global, 0);
            return Ok(());
        }
        if default_registry().contains(name) {
            let index = self.name_constant(name);
            self.emit(Opcode::LoadNative, index, 0);
            return Ok(());
        }
        bail!("undefined name '{name}'")
    }

    fn load_field(&mut self, field: FieldRef, owner: &str, name: &str) -> Result<()> {
        match field {
            FieldRef::Instance => {
                if self.current.is_static && self.current.kind != FunctionKind::Lambda {
                    bail!("instance field '{name}' used from a static context");
                }
                self.load_this()?;
                let name = self.name_constant(name);
                self.emit(Opcode::GetField, name, 0);
            }
            FieldRef::Static => {
                let global = self
                    .global_index(&format!("{owner}.{name}"))
                    .ok_or_else(|| anyhow!("static field '{owner}.{name}' has no storage"))?;
                self.emit(Opcode::LoadGlobal, global, 0);
            }
        }
        Ok(())
    }

    /// Module named by an identifier or dotted member chain.
    pub(super) fn module_path(&mut self, expr: &Expr) -> Option<String> {
        match &expr.kind {
            ExprKind::Identifier(name) => {
                if self.resolve_variable(name).is_some() || self.visible_global(name).is_some() {
                    return None;
                }
                if self.module.is_some() {
                    let nested = self.qualify(name);
                    if self.modules.contains(&nested) {
                        return Some(nested);
                    }
                }
                self.modules.contains(name.as_str()).then(|| name.to_string())
            }
            ExprKind::Member { target, name, .. } => {
                let base = self.module_path(target)?;
                let nested = format!("{base}.{name}");
                self.modules.contains(&nested).then_some(nested)
            }
            _ => None,
        }
    }

    fn type_name_of(&mut self, expr: &Expr) -> Option<String> {
        match &expr.kind {
            ExprKind::Identifier(name) if self.names_type(name) => Some(name.to_string()),
            _ => None,
        }
    }

    fn compile_member(&mut self, target: &'a Expr, name: &str, null_safe: bool) -> Result<()> {
        if let Some(module) = self.module_path(target) {
            let qualified = format!("{module}.{name}");
            let global = self
                .global_index(&qualified)
                .ok_or_else(|| anyhow!("module '{module}' has no member '{name}'"))?;
            self.emit(Opcode::LoadGlobal, global, 0);
            return Ok(());
        }
        if let Some(type_name) = self.type_name_of(target) {
            return self.compile_static_member(&type_name, name);
        }
        self.compile_expr(target)?;
        let skip = null_safe.then(|| self.emit_jump(Opcode::JumpIfNull));
        let index = self.name_constant(name);
        self.emit(Opcode::GetField, index, 0);
        if let Some(skip) = skip {
            self.patch_jump(skip);
        }
        Ok(())
    }

    fn compile_static_member(&mut self, type_name: &str, name: &str) -> Result<()> {
        if let Some(variants) = self.enums.get(type_name) {
            let value = *variants
                .get(name)
                .ok_or_else(|| anyhow!("enum '{type_name}' has no member '{name}'"))?;
            self.emit_constant(Constant::Integer(value));
            return Ok(());
        }
        if let Some((field, owner)) = self.find_field(type_name, name) {
            if field == FieldRef::Static {
                return self.load_field(field, &owner, name);
            }
        }
        match self.find_method(type_name, name) {
            Some(MethodRef::Static(_, index)) => {
                self.emit(Opcode::MakeClosure, index, 0);
                Ok(())
            }
            _ => bail!("'{type_name}' has no static member '{name}'"),
        }
    }

    //=====================================================
    // Section 2: Operators
    //=====================================================

    fn compile_binary(&mut self, expr: &'a Expr, op: BinaryOp, left: &'a Expr, right: &'a Expr) -> Result<()> {
        let annotations = self.annotations;
        if let Some(overload) = annotations.operators.get(&expr.id) {
            let (decl, index) = match self.find_method(&overload.class, &overload.method) {
                Some(MethodRef::Static(decl, index)) => (decl, index),
                _ => bail!(
                    "operator '{}' of '{}' has no compiled body",
                    op.symbol(),
                    overload.class
                ),
            };
            self.emit_op(Opcode::Null);
            self.compile_args(std::slice::from_ref(left), &decl.params)?;
            let right_target = decl.params.get(1).and_then(|param| param.ty.as_ref());
            self.compile_expr_as(right, right_target)?;
            self.emit(Opcode::CallDirect, index, 2);
            return Ok(());
        }
        match op {
            BinaryOp::NotIn => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.emit_op(Opcode::In);
                self.emit_op(Opcode::Not);
            }
            BinaryOp::Subset => {
                // a ⊂ b holds when a ⊆ b and not b ⊆ a.
                self.begin_scope();
                let lhs = self.declare_temp()?;
                let rhs = self.declare_temp()?;
                self.compile_expr(left)?;
                self.emit(Opcode::StoreLocal, lhs, 0);
                self.compile_expr(right)?;
                self.emit(Opcode::StoreLocal, rhs, 0);
                self.emit(Opcode::LoadLocal, lhs, 0);
                self.emit(Opcode::LoadLocal, rhs, 0);
                self.emit_op(Opcode::Subset);
                self.emit_op(Opcode::Dup);
                let end = self.emit_jump(Opcode::JumpIfFalse);
                self.emit_op(Opcode::Pop);
                self.emit(Opcode::LoadLocal, rhs, 0);
                self.emit(Opcode::LoadLocal, lhs, 0);
                self.emit_op(Opcode::Subset);
                self.emit_op(Opcode::Not);
                self.patch_jump(end);
                self.end_scope();
            }
            other => {
                let opcode = binary_opcode(other)
                    .ok_or_else(|| anyhow!("operator '{}' has no opcode", other.symbol()))?;
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.emit_op(opcode);
            }
        }
        Ok(())
    }

    fn compile_logical(&mut self, op: LogicalOp, left: &'a Expr, right: &'a Expr) -> Result<()> {
        self.compile_expr(left)?;
        let end = match op {
            LogicalOp::And => {
                self.emit_op(Opcode::Dup);
                self.emit_jump(Opcode::JumpIfFalse)
            }
            LogicalOp::Or => {
                self.emit_op(Opcode::Dup);
                self.emit_jump(Opcode::JumpIfTrue)
            }
            LogicalOp::Coalesce => self.emit_jump(Opcode::JumpIfNotNull),
        };
        self.emit_op(Opcode::Pop);
        self.compile_expr(right)?;
        self.patch_jump(end);
        Ok(())
    }

    //=====================================================
    // Section 3: Assignment
    //=====================================================

    fn resolve_place(&mut self, target: &'a Expr) -> Result<Place> {
        match &target.kind {
            ExprKind::Identifier(name) => self.name_place(name),
            ExprKind::Member { target: receiver, name, .. } => {
                if let Some(module) = self.module_path(receiver) {
                    let qualified = format!("{module}.{name}");
                    let global = self
                        .global_index(&qualified)
                        .ok_or_else(|| anyhow!("module '{module}' has no variable '{name}'"))?;
                    return Ok(Place::Global(global));
                }
                if let Some(type_name) = self.type_name_of(receiver) {
                    return match self.find_field(&type_name, name) {
                        Some((FieldRef::Static, owner)) => self.static_place(&owner, name),
                        _ => bail!("'{type_name}.{name}' is not an assignable static field"),
                    };
                }
                self.compile_expr(receiver)?;
                let slot = self.declare_temp()?;
                self.emit(Opcode::StoreLocal, slot, 0);
                let name = self.name_constant(name);
                Ok(Place::Field {
                    receiver: slot,
                    name,
                })
            }
            ExprKind::Index {
                target: collection,
                index,
                ..
            } => {
                self.compile_expr(collection)?;
                let target_slot = self.declare_temp()?;
                self.emit(Opcode::StoreLocal, target_slot, 0);
                self.compile_expr(index)?;
                let index_slot = self.declare_temp()?;
                self.emit(Opcode::StoreLocal, index_slot, 0);
                Ok(Place::Index {
                    target: target_slot,
                    index: index_slot,
                })
            }
            _ => bail!("expression cannot be assigned to"),
        }
    }

    fn name_place(&mut self, name: &str) -> Result<Place> {
        if let Some(access) = self.resolve_variable(name) {
            return Ok(Place::Var(access));
        }
        if let Some(class) = self.current.class.clone() {
            match self.find_field(&class, name) {
                Some((FieldRef::Instance, _)) => {
                    self.load_this()?;
                    let slot = self.declare_temp()?;
                    self.emit(Opcode::StoreLocal, slot, 0);
                    let name = self.name_constant(name);
                    return Ok(Place::Field {
                        receiver: slot,
                        name,
                    });
                }
                Some((FieldRef::Static, owner)) => return self.static_place(&owner, name),
                None => {}
            }
        }
        match self.visible_global(name) {
            Some(global) => Ok(Place::Global(global)),
            None => bail!("undefined variable '{name}'"),
        }
    }

    fn static_place(&mut self, owner: &str, name: &str) -> Result<Place> {
        self.global_index(&format!("{owner}.{name}"))
            .map(Place::Global)
            .ok_or_else(|| anyhow!("static field '{owner}.{name}' has no storage"))
    }

    fn load_place(&mut self, place: Place) {
        match place {
            Place::Var(access) => self.load_access(access),
            Place::Global(global) => {
                self.emit(Opcode::LoadGlobal, global, 0);
            }
            Place::Field { receiver, name } => {
                self.emit(Opcode::LoadLocal, receiver, 0);
                self.emit(Opcode::GetField, name, 0);
            }
            Place::Index { target, index } => {
                self.emit(Opcode::LoadLocal, target, 0);
                self.emit(Opcode::LoadLocal, index, 0);
                self.emit_op(Opcode::LoadIndex);
            }
        }
    }

    /// Pushes whatever a store into `place` expects below the value.
    fn store_prefix(&mut self, place: Place) {
        match place {
            Place::Var(_) | Place::Global(_) => {}
            Place::Field { receiver, .. } => {
                self.emit(Opcode::LoadLocal, receiver, 0);
            }
            Place::Index { target, index } => {
                self.emit(Opcode::LoadLocal, target, 0);
                self.emit(Opcode::LoadLocal, index, 0);
            }
        }
    }

    /// Stores the value on top of the stack and leaves it there.
    fn store_place(&mut self, place: Place) {
        match place {
            Place::Var(access) => {
                self.emit_op(Opcode::Dup);
                self.store_access(access);
            }
            Place::Global(global) => {
                self.emit_op(Opcode::Dup);
                self.emit(Opcode::StoreGlobal, global, 0);
            }
            Place::Field { name, .. } => {
                self.emit(Opcode::SetField, name, 0);
            }
            Place::Index { .. } => {
                self.emit_op(Opcode::StoreIndex);
            }
        }
    }

    fn compile_assign(&mut self, op: AssignOp, target: &'a Expr, value: &'a Expr) -> Result<()> {
        if op == AssignOp::Assign {
            return self.compile_plain_assign(target, value);
        }
        self.begin_scope();
        let place = self.resolve_place(target)?;
        match op.binary() {
            Some(binary) => {
                let opcode = binary_opcode(binary)
                    .ok_or_else(|| anyhow!("operator '{}' has no opcode", binary.symbol()))?;
                self.store_prefix(place);
                self.load_place(place);
                self.compile_expr(value)?;
                self.emit_op(opcode);
                self.store_place(place);
            }
            None => {
                self.load_place(place);
                let end = self.emit_jump(Opcode::JumpIfNotNull);
                self.emit_op(Opcode::Pop);
                self.store_prefix(place);
                self.compile_expr(value)?;
                self.store_place(place);
                self.patch_jump(end);
            }
        }
        self.end_scope();
        Ok(())
    }

    /// `a.b = v` and `a[i] = v` need no scratch slots.
    fn compile_plain_assign(&mut self, target: &'a Expr, value: &'a Expr) -> Result<()> {
        match &target.kind {
            ExprKind::Member {
                target: receiver,
                name,
                ..
            } if self.module_path(receiver).is_none() && self.type_name_of(receiver).is_none() => {
                self.compile_expr(receiver)?;
                self.compile_expr(value)?;
                let name = self.name_constant(name);
                self.emit(Opcode::SetField, name, 0);
                Ok(())
            }
            ExprKind::Index {
                target: collection,
                index,
                ..
            } => {
                self.compile_expr(collection)?;
                self.compile_expr(index)?;
                self.compile_expr(value)?;
                self.emit_op(Opcode::StoreIndex);
                Ok(())
            }
            _ => {
                self.begin_scope();
                let place = self.resolve_place(target)?;
                self.store_prefix(place);
                self.compile_expr(value)?;
                self.store_place(place);
                self.end_scope();
                Ok(())
            }
        }
    }

    fn compile_update(&mut self, increment: bool, prefix: bool, target: &'a Expr) -> Result<()> {
        let opcode = if increment { Opcode::Add } else { Opcode::Sub };
        self.begin_scope();
        let place = self.resolve_place(target)?;
        if prefix {
            self.store_prefix(place);
            self.load_place(place);
            self.emit_constant(Constant::Integer(1));
            self.emit_op(opcode);
            self.store_place(place);
        } else {
            let old = self.declare_temp()?;
            self.load_place(place);
            self.emit(Opcode::StoreLocal, old, 0);
            self.store_prefix(place);
            self.emit(Opcode::LoadLocal, old, 0);
            self.emit_constant(Constant::Integer(1));
            self.emit_op(opcode);
            self.store_place(place);
            self.emit_op(Opcode::Pop);
            self.emit(Opcode::LoadLocal, old, 0);
        }
        self.end_scope();
        Ok(())
    }

    /// Pops the value on top of the stack into `name`, declaring it when
    /// nothing by that name is visible.
    pub(super) fn store_name(&mut self, name: &str) -> Result<()> {
        let resolved = match self.resolve_variable(name) {
            Some(access) => Some(Place::Var(access)),
            None if self.visible_global(name).is_some() || self.current.class.is_some() => {
                self.name_place(name).ok()
            }
            None => None,
        };
        match resolved {
            Some(Place::Var(access)) => self.store_access(access),
            Some(Place::Global(global)) => {
                self.emit(Opcode::StoreGlobal, global, 0);
            }
            Some(place @ (Place::Field { .. } | Place::Index { .. })) => {
                self.begin_scope();
                let value = self.declare_temp()?;
                self.emit(Opcode::StoreLocal, value, 0);
                self.store_prefix(place);
                self.emit(Opcode::LoadLocal, value, 0);
                self.store_place(place);
                self.emit_op(Opcode::Pop);
                self.end_scope();
            }
            None if self.is_top_level() => {
                let global = self.global_slot(&self.qualify(name));
                self.emit(Opcode::StoreGlobal, global, 0);
            }
            None => {
                let slot = self.declare_local(name)?;
                self.emit(Opcode::StoreLocal, slot, 0);
            }
        }
        Ok(())
    }

    //=====================================================
    // Section 4: Calls and object creation
    //=====================================================

    /// Compiles arguments, widening each to its parameter's type.
    pub(super) fn compile_args(&mut self, args: &'a [Expr], params: &[Param]) -> Result<()> {
        for (position, arg) in args.iter().enumerate() {
            let target = params
                .get(position)
                .filter(|param| !param.variadic)
                .and_then(|param| param.ty.as_ref());
            self.compile_expr_as(arg, target)?;
        }
        Ok(())
    }

    fn compile_call(&mut self, callee: &'a Expr, args: &'a [Expr]) -> Result<()> {
        let argc = args.len() as u32;
        match &callee.kind {
            ExprKind::Identifier(name) => self.compile_named_call(name, args),
            ExprKind::Member {
                target,
                name,
                null_safe,
            } => self.compile_method_call(target, name, *null_safe, args),
            _ => {
                self.compile_expr(callee)?;
                self.compile_args(args, &[])?;
                self.emit(Opcode::Call, argc, 0);
                Ok(())
            }
        }
    }

    fn compile_named_call(&mut self, name: &str, args: &'a [Expr]) -> Result<()> {
        let argc = args.len() as u32;
        if let Some(access) = self.resolve_variable(name) {
            self.load_access(access);
            self.compile_args(args, &[])?;
            self.emit(Opcode::Call, argc, 0);
            return Ok(());
        }
        if let Some(class) = self.current.class.clone() {
            match self.find_method(&class, name) {
                Some(MethodRef::Virtual(decl, _)) => {
                    self.load_this()?;
                    self.compile_args(args, &decl.params)?;
                    let name = self.name_constant(name);
                    self.emit(Opcode::Invoke, name, argc);
                    return Ok(());
                }
                Some(MethodRef::Static(decl, index)) => {
                    self.emit_op(Opcode::Null);
                    self.compile_args(args, &decl.params)?;
                    self.emit(Opcode::CallDirect, index, argc);
                    return Ok(());
                }
                None => {}
            }
            if let Some((field, owner)) = self.find_field(&class, name) {
                self.load_field(field, &owner, name)?;
                self.compile_args(args, &[])?;
                self.emit(Opcode::Call, argc, 0);
                return Ok(());
            }
        }
        if let Some(entry) = self.visible_function(name) {
            let (index, decl) = (entry.index, entry.decl);
            self.emit_op(Opcode::Null);
            self.compile_args(args, &decl.params)?;
            self.emit(Opcode::CallDirect, index, argc);
            return Ok(());
        }
        if let Some(global) = self.visible_global(name) {
            self.emit(Opcode::LoadGlobal, global, 0);
            self.compile_args(args, &[])?;
            self.emit(Opcode::Call, argc, 0);
            return Ok(());
        }
        if default_registry().contains(name) {
            self.compile_args(args, &[])?;
            let index = self.name_constant(name);
            self.emit(Opcode::CallNative, index, argc);
            return Ok(());
        }
        bail!("call to undefined function '{name}'")
    }

    fn compile_method_call(
        &mut self,
        target: &'a Expr,
        name: &str,
        null_safe: bool,
        args: &'a [Expr],
    ) -> Result<()> {
        let argc = args.len() as u32;
        if let Some(module) = self.module_path(target) {
            let qualified = format!("{module}.{name}");
            if let Some(entry) = self.functions.get(&qualified) {
                let (index, decl) = (entry.index, entry.decl);
                self.emit_op(Opcode::Null);
                self.compile_args(args, &decl.params)?;
                self.emit(Opcode::CallDirect, index, argc);
                return Ok(());
            }
            let global = self
                .global_index(&qualified)
                .ok_or_else(|| anyhow!("module '{module}' has no function '{name}'"))?;
            self.emit(Opcode::LoadGlobal, global, 0);
            self.compile_args(args, &[])?;
            self.emit(Opcode::Call, argc, 0);
            return Ok(());
        }
        if let Some(type_name) = self.type_name_of(target) {
            return match self.find_method(&type_name, name) {
                Some(MethodRef::Static(decl, index)) => {
                    self.emit_op(Opcode::Null);
                    self.compile_args(args, &decl.params)?;
                    self.emit(Opcode::CallDirect, index, argc);
                    Ok(())
                }
                _ => {
                    self.compile_static_member(&type_name, name)?;
                    self.compile_args(args, &[])?;
                    self.emit(Opcode::Call, argc, 0);
                    Ok(())
                }
            };
        }
        if matches!(target.kind, ExprKind::Base) {
            let base = self
                .current
                .class
                .as_deref()
                .and_then(|class| self.classes.get(class))
                .and_then(|entry| entry.base.clone());
            if let Some(MethodRef::Virtual(decl, Some(index))) =
                base.as_deref().and_then(|base| self.find_method(base, name))
            {
                self.load_this()?;
                self.compile_args(args, &decl.params)?;
                self.emit(Opcode::CallDirect, index, argc);
                return Ok(());
            }
        }
        self.compile_expr(target)?;
        let skip = null_safe.then(|| self.emit_jump(Opcode::JumpIfNull));
        self.compile_args(args, &[])?;
        let index = self.name_constant(name);
        self.emit(Opcode::Invoke, index, argc);
        if let Some(skip) = skip {
            self.patch_jump(skip);
        }
        Ok(())
    }

    fn compile_new(&mut self, ty: &'a TypeExpr, args: &'a [Expr]) -> Result<()> {
        let argc = args.len() as u32;
        let TypeExpr::Named { name, .. } = ty else {
            bail!("cannot create an instance of '{ty}'");
        };
        if let Some(entry) = self.classes.get(name.as_str()) {
            let index = entry.index;
            let params: &'a [Param] = entry
                .explicit_constructor
                .map_or(&[], |ctor| ctor.params.as_slice());
            self.compile_args(args, params)?;
            self.emit(Opcode::New, index, argc);
            return Ok(());
        }
        if is_builtin_exception(name) {
            self.compile_args(args, &[])?;
            let index = self.name_constant(name);
            self.emit(Opcode::MakeException, index, argc);
            return Ok(());
        }
        if name.starts_with("List") || matches!(name.as_str(), "array" | "object" | "Object") {
            for arg in args {
                self.compile_expr(arg)?;
                self.emit_op(Opcode::Pop);
            }
            self.emit(Opcode::MakeArray, 0, 0);
            return Ok(());
        }
        bail!("cannot create an instance of '{name}'")
    }

    //=====================================================
    // Section 5: Closures and switch expressions
    //=====================================================

    pub(super) fn compile_closure(
        &mut self,
        name: String,
        params: &'a [Param],
        return_type: Option<&'a TypeExpr>,
        body: &'a LambdaBody,
    ) -> Result<()> {
        let index = self.reserve_function(&name);
        let class = self.current.class.clone();
        let is_static = self.current.is_static;
        self.begin_function(FunctionSetup {
            index,
            name,
            kind: FunctionKind::Lambda,
            nested: true,
            params,
            return_type,
            class,
            is_static,
        })?;
        match body {
            LambdaBody::Expr(expr) => {
                self.current.line = expr.position.line as u32;
                self.compile_expr_as(expr, return_type)?;
                self.emit_op(Opcode::Return);
            }
            LambdaBody::Block(statements) => {
                for stmt in statements {
                    self.compile_stmt(stmt)?;
                }
            }
        }
        let state = self.end_function()?;
        self.install(state)?;
        self.emit(Opcode::MakeClosure, index, 0);
        Ok(())
    }

    fn compile_switch_expr(&mut self, subject: &'a Expr, arms: &'a [SwitchArm]) -> Result<()> {
        self.begin_scope();
        self.compile_expr(subject)?;
        let slot = self.declare_temp()?;
        self.emit(Opcode::StoreLocal, slot, 0);
        let mut ends = Vec::new();
        for arm in arms {
            self.begin_scope();
            let mut fails = self.compile_pattern(&arm.pattern, slot)?;
            if let Some(guard) = &arm.guard {
                self.compile_expr(guard)?;
                fails.push(self.emit_jump(Opcode::JumpIfFalse));
            }
            self.compile_expr(&arm.body)?;
            self.end_scope();
            ends.push(self.emit_jump(Opcode::Jump));
            for fail in fails {
                self.patch_jump(fail);
            }
        }
        let name = self.name_constant("MatchFailureException");
        self.emit(Opcode::MakeException, name, 0);
        self.emit_op(Opcode::Throw);
        for end in ends {
            self.patch_jump(end);
        }
        self.end_scope();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::OptLevel;
    use super::super::tests::{compile_source, run};
    use strata_core::vm::Opcode;
    use strata_core::Value;

    #[test]
    fn closures_share_captured_variables() {
        let source = "
            int counter() {
                int count = 0;
                var bump = () => { count = count + 1; return count; };
                bump();
                bump();
                return count;
            }
            counter()
        ";
        assert_eq!(run(source), Value::Integer(2));
    }

    #[test]
    fn compound_assignment_updates_fields_and_elements() {
        let source = "
            class Box { public int Value; }
            var box = new Box();
            box.Value += 4;
            int[] items = [1, 2, 3];
            items[1] *= 10;
            box.Value + items[1]
        ";
        assert_eq!(run(source), Value::Integer(24));
    }

    #[test]
    fn postfix_update_yields_the_old_value() {
        let source = "
            int i = 5;
            int old = i++;
            old * 10 + i
        ";
        assert_eq!(run(source), Value::Integer(56));
    }

    #[test]
    fn logical_operators_short_circuit() {
        let source = "
            int calls = 0;
            bool touch() { calls = calls + 1; return true; }
            bool result = false && touch();
            result = true || touch();
            calls
        ";
        assert_eq!(run(source), Value::Integer(0));
    }

    #[test]
    fn null_coalescing_picks_the_fallback() {
        let source = "
            string? name = null;
            name ?? \"anonymous\"
        ";
        assert_eq!(run(source), Value::string("anonymous"));
    }

    #[test]
    fn interpolation_concatenates_parts() {
        let source = "
            int n = 3;
            $\"n is {n}\"
        ";
        assert_eq!(run(source), Value::string("n is 3"));
    }

    #[test]
    fn switch_expressions_pick_the_first_matching_arm() {
        let source = "
            string classify(int n) {
                return n switch { 0 => \"zero\", < 0 => \"negative\", _ => \"positive\" };
            }
            classify(-4)
        ";
        assert_eq!(run(source), Value::string("negative"));
    }

    #[test]
    fn operator_overloads_call_the_static_method() {
        let source = "
            class Vec2 {
                public int X;
                public Vec2(int x) { X = x; }
                public static Vec2 operator +(Vec2 a, Vec2 b) { return new Vec2(a.X + b.X); }
            }
            (new Vec2(2) + new Vec2(5)).X
        ";
        let chunk = compile_source(source, OptLevel::O0);
        assert!(chunk
            .instructions
            .iter()
            .any(|inst| inst.opcode == Opcode::CallDirect && inst.operand_b == 2));
        assert_eq!(run(source), Value::Integer(7));
    }
}
