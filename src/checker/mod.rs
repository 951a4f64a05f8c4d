//=====================================================
// File: checker/mod.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Strata static type checker
// Objective: Declaration pass, type resolution, assignability, generic
//            unification and constraint checks; the statement, expression
//            and pattern walks live in sibling modules
//=====================================================

mod expr;
mod patterns;
pub mod registry;
pub mod scope;
mod stmt;
pub mod types;

use std::collections::HashMap;
use std::rc::Rc;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::ast::{
    ClassDecl, ClassMember, Constraint, EnumDecl, FunctionDecl, InterfaceDecl, NodeId, Param,
    Program, Stmt, StmtKind, TypeExpr, TypeParam,
};
use crate::diagnostics::Severity;
use crate::symbol::Symbol;
use crate::tokenizer::Position;

use registry::{
    ClassInfo, ConstraintInfo, FieldInfo, FunctionSig, ParamSig, TypeParamInfo, TypeRegistry,
};
use scope::{ScopeStack, Storage, SymbolInfo};
use types::Type;

//=====================================================
// Section 1: Diagnostics
//=====================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TypeErrorKind {
    TypeMismatch,
    UndefinedSymbol,
    ArityMismatch,
    UnsatisfiedConstraint,
    NullSafetyViolation,
    UnreachableCode,
    Redeclaration,
    InvalidAssignment,
    MissingReturn,
}

impl TypeErrorKind {
    pub fn severity(self) -> Severity {
        match self {
            TypeErrorKind::UnreachableCode => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{line}:{column}: {kind:?}: {message}")]
pub struct TypeError {
    pub kind: TypeErrorKind,
    pub message: String,
    pub line: usize,
    pub column: usize,
    /// Expression the diagnostic points at, when there is one.
    pub node: Option<NodeId>,
}

impl TypeError {
    pub fn severity(&self) -> Severity {
        self.kind.severity()
    }

    pub fn is_error(&self) -> bool {
        self.severity() == Severity::Error
    }
}

/// User operator resolved for a binary expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperatorOverload {
    pub class: Symbol,
    pub method: Symbol,
}

#[derive(Debug, Clone, Default)]
pub struct Annotations {
    pub operators: HashMap<NodeId, OperatorOverload>,
    pub types: HashMap<NodeId, Type>,
}

/// Program accepted by the checker together with what it learned.
#[derive(Debug, Clone)]
pub struct CheckedProgram {
    pub program: Program,
    pub annotations: Annotations,
    pub diagnostics: Vec<TypeError>,
}

impl CheckedProgram {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(TypeError::is_error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &TypeError> {
        self.diagnostics.iter().filter(|error| error.is_error())
    }
}

/// Checks a whole program and returns every diagnostic found.
pub fn check(program: &Program) -> Vec<TypeError> {
    let mut checker = TypeChecker::new();
    checker.run(program);
    checker.diagnostics
}

pub fn check_program(program: Program) -> CheckedProgram {
    let mut checker = TypeChecker::new();
    checker.run(&program);
    CheckedProgram {
        program,
        annotations: checker.annotations,
        diagnostics: checker.diagnostics,
    }
}

//=====================================================
// Section 2: Checker state
//=====================================================

#[derive(Debug, Clone)]
struct FunctionContext {
    /// `None` while inferring a lambda's result.
    ret: Option<Type>,
    inferred: Vec<Type>,
    is_constructor: bool,
}

#[derive(Debug, Clone)]
struct ClassContext {
    name: Symbol,
    ty: Type,
    is_static: bool,
}

pub(crate) struct TypeChecker {
    registry: TypeRegistry,
    scopes: ScopeStack,
    modules: HashMap<Symbol, HashMap<Symbol, SymbolInfo>>,
    diagnostics: Vec<TypeError>,
    annotations: Annotations,
    functions: Vec<FunctionContext>,
    type_params: Vec<Vec<TypeParamInfo>>,
    class: Option<ClassContext>,
    module: Option<Symbol>,
    class_type_params: HashMap<Symbol, Vec<TypeParamInfo>>,
    catch_depth: usize,
    catch_stack: Vec<usize>,
}

impl TypeChecker {
    fn new() -> Self {
        Self {
            registry: TypeRegistry::new(),
            scopes: ScopeStack::new(),
            modules: HashMap::new(),
            diagnostics: Vec::new(),
            annotations: Annotations::default(),
            functions: Vec::new(),
            type_params: Vec::new(),
            class: None,
            module: None,
            class_type_params: HashMap::new(),
            catch_depth: 0,
            catch_stack: Vec::new(),
        }
    }

    fn run(&mut self, program: &Program) {
        self.collect_types(&program.statements, None);
        self.declare_members(&program.statements, None);
        self.check_block_statements(&program.statements);
        debug!(
            diagnostics = self.diagnostics.len(),
            "type check finished"
        );
    }

    fn report(&mut self, kind: TypeErrorKind, message: impl Into<String>, position: Position) {
        self.report_node(kind, message, position, None);
    }

    fn report_node(
        &mut self,
        kind: TypeErrorKind,
        message: impl Into<String>,
        position: Position,
        node: Option<NodeId>,
    ) {
        self.diagnostics.push(TypeError {
            kind,
            message: message.into(),
            line: position.line,
            column: position.column,
            node,
        });
    }

    fn mismatch(&mut self, expected: &Type, found: &Type, position: Position, node: Option<NodeId>) {
        self.report_node(
            TypeErrorKind::TypeMismatch,
            format!("expected {expected}, found {found}"),
            position,
            node,
        );
    }

    /// Reports a mismatch unless `found` can be stored where `expected` is.
    fn expect_assignable(&mut self, found: &Type, expected: &Type, position: Position, node: Option<NodeId>) {
        if !self.assignable(found, expected) {
            self.mismatch(expected, found, position, node);
        }
    }

    //=====================================================
    // Section 3: Declaration pass
    //=====================================================

    fn qualified(module: Option<&Symbol>, name: &Symbol) -> Symbol {
        match module {
            Some(module) => Symbol::from(format!("{module}.{name}")),
            None => name.clone(),
        }
    }

    /// First phase: every class, interface and enum name, so member
    /// signatures can refer to types declared later.
    fn collect_types(&mut self, statements: &[Stmt], module: Option<&Symbol>) {
        for stmt in statements {
            match &stmt.kind {
                StmtKind::Class(class) => self.collect_class(class, stmt.position),
                StmtKind::Interface(interface) => {
                    if self.registry.class(&interface.name).is_some() {
                        self.redeclared(&interface.name, stmt.position);
                        continue;
                    }
                    let mut info = ClassInfo::new(interface.name.clone(), stmt.position);
                    info.is_interface = true;
                    info.type_params = interface.type_params.iter().map(|param| param.name.clone()).collect();
                    self.registry.insert_class(info);
                }
                StmtKind::Enum(decl) => self.collect_enum(decl, stmt.position),
                StmtKind::Module(decl) => {
                    let name = Self::qualified(module, &decl.name);
                    self.modules.entry(name.clone()).or_default();
                    self.collect_types(&decl.body, Some(&name));
                }
                _ => {}
            }
        }
    }

    fn collect_class(&mut self, class: &ClassDecl, position: Position) {
        if self.registry.class(&class.name).is_some() || self.registry.enum_variants(&class.name).is_some() {
            self.redeclared(&class.name, position);
            return;
        }
        let mut info = ClassInfo::new(class.name.clone(), position);
        info.is_abstract = class.is_abstract;
        info.type_params = class.type_params.iter().map(|param| param.name.clone()).collect();
        self.registry.insert_class(info);
    }

    fn collect_enum(&mut self, decl: &EnumDecl, position: Position) {
        if self.registry.class(&decl.name).is_some() || self.registry.enum_variants(&decl.name).is_some() {
            self.redeclared(&decl.name, position);
            return;
        }
        let variants = decl.variants.iter().map(|(name, _)| name.clone()).collect();
        self.registry.insert_enum(decl.name.clone(), variants);
    }

    fn redeclared(&mut self, name: &Symbol, position: Position) {
        self.report(
            TypeErrorKind::Redeclaration,
            format!("'{name}' is already declared"),
            position,
        );
    }

    /// Second phase: member tables, function signatures and globals.
    fn declare_members(&mut self, statements: &[Stmt], module: Option<&Symbol>) {
        for stmt in statements {
            match &stmt.kind {
                StmtKind::Class(class) => self.declare_class(class),
                StmtKind::Interface(interface) => self.declare_interface(interface),
                StmtKind::Function(function) => {
                    let sig = Rc::new(self.function_signature(function, &[]));
                    let info = SymbolInfo::function(sig, Storage::Function, function.position);
                    match module {
                        Some(module) => self.declare_module_member(module, &function.name, info, stmt.position),
                        None => {
                            if self.scopes.declare(function.name.clone(), info).is_err() {
                                self.redeclared(&function.name, stmt.position);
                            }
                        }
                    }
                }
                StmtKind::Var(decl) => {
                    let ty = match &decl.ty {
                        Some(ty) => self.resolve_type_quiet(ty),
                        None => Type::Any,
                    };
                    let mut info = SymbolInfo::new(ty, Storage::Global, stmt.position, decl.mutable);
                    info.predeclared = true;
                    match module {
                        Some(module) => self.declare_module_member(module, &decl.name, info, stmt.position),
                        None => {
                            let _ = self.scopes.declare(decl.name.clone(), info);
                        }
                    }
                }
                StmtKind::Module(decl) => {
                    let name = Self::qualified(module, &decl.name);
                    self.declare_members(&decl.body, Some(&name));
                }
                _ => {}
            }
        }
    }

    fn declare_module_member(&mut self, module: &Symbol, name: &Symbol, info: SymbolInfo, position: Position) {
        let members = self.modules.entry(module.clone()).or_default();
        if let Some(existing) = members.get(name) {
            if !existing.predeclared {
                self.redeclared(name, position);
                return;
            }
        }
        members.insert(name.clone(), info);
    }

    fn declare_class(&mut self, class: &ClassDecl) {
        let class_params = self.type_param_infos(&class.type_params);
        self.class_type_params.insert(class.name.clone(), class_params.clone());
        self.type_params.push(class_params);
        let mut base = None;
        let mut interfaces = Vec::new();
        for (index, base_expr) in class.bases.iter().enumerate() {
            let resolved = self.resolve_type(base_expr, class.position);
            let Some((info, _)) = self.registry.class_of(&resolved) else {
                continue;
            };
            if info.is_interface {
                interfaces.push(resolved);
            } else if index == 0 {
                base = Some(resolved);
            } else {
                self.report(
                    TypeErrorKind::TypeMismatch,
                    format!("base class '{}' must come first in the base list", info.name),
                    class.position,
                );
            }
        }
        let mut fields = HashMap::new();
        let mut methods = HashMap::new();
        let mut constructor = None;
        for member in &class.members {
            match member {
                ClassMember::Field(field) => {
                    let ty = match &field.ty {
                        Some(ty) => self.resolve_type(ty, field.position),
                        None => Type::Any,
                    };
                    if fields.contains_key(&field.name) {
                        self.redeclared(&field.name, field.position);
                    }
                    fields.insert(
                        field.name.clone(),
                        FieldInfo {
                            ty,
                            is_static: field.is_static,
                            is_const: field.is_const,
                        },
                    );
                }
                ClassMember::Method(method) => {
                    let sig = self.function_signature(method, &[]);
                    if methods.contains_key(&method.name) || fields.contains_key(&method.name) {
                        self.redeclared(&method.name, method.position);
                    }
                    methods.insert(method.name.clone(), Rc::new(sig));
                }
                ClassMember::Constructor(ctor) => {
                    if constructor.is_some() {
                        self.redeclared(&class.name, ctor.position);
                    }
                    let params = self.param_signatures(&ctor.params);
                    constructor = Some(Rc::new(FunctionSig {
                        name: class.name.clone(),
                        type_params: Vec::new(),
                        params,
                        ret: Type::Void,
                        is_static: false,
                        is_abstract: false,
                        is_virtual: false,
                        is_override: false,
                    }));
                }
            }
        }
        self.type_params.pop();
        if let Some(info) = self.registry.class_mut(&class.name) {
            info.base = base;
            info.interfaces = interfaces;
            info.fields = fields;
            info.methods = methods;
            info.constructor = constructor;
        }
    }

    fn declare_interface(&mut self, interface: &InterfaceDecl) {
        let params = self.type_param_infos(&interface.type_params);
        self.type_params.push(params);
        let bases: Vec<Type> = interface
            .bases
            .iter()
            .map(|base| self.resolve_type(base, interface.position))
            .collect();
        let mut methods = HashMap::new();
        for method in &interface.methods {
            let mut sig = self.function_signature(method, &[]);
            sig.is_abstract = true;
            methods.insert(method.name.clone(), Rc::new(sig));
        }
        let mut fields = HashMap::new();
        for property in &interface.properties {
            let ty = match &property.ty {
                Some(ty) => self.resolve_type(ty, property.position),
                None => Type::Any,
            };
            fields.insert(
                property.name.clone(),
                FieldInfo {
                    ty,
                    is_static: false,
                    is_const: false,
                },
            );
        }
        self.type_params.pop();
        if let Some(info) = self.registry.class_mut(&interface.name) {
            info.interfaces = bases;
            info.methods = methods;
            info.fields = fields;
        }
    }

    fn type_param_infos(&mut self, params: &[TypeParam]) -> Vec<TypeParamInfo> {
        // Parameters may constrain each other, so names go in scope first.
        let mut infos: Vec<TypeParamInfo> = params
            .iter()
            .map(|param| TypeParamInfo {
                name: param.name.clone(),
                constraints: Vec::new(),
            })
            .collect();
        self.type_params.push(infos.clone());
        for (info, param) in infos.iter_mut().zip(params) {
            for constraint in &param.constraints {
                let resolved = match constraint {
                    Constraint::Class => ConstraintInfo::Class,
                    Constraint::Struct => ConstraintInfo::Struct,
                    Constraint::New => ConstraintInfo::New,
                    Constraint::Type(ty) => ConstraintInfo::Type(self.resolve_type(ty, Position::default())),
                };
                info.constraints.push(resolved);
            }
        }
        self.type_params.pop();
        infos
    }

    fn param_signatures(&mut self, params: &[Param]) -> Vec<ParamSig> {
        params
            .iter()
            .map(|param| {
                let ty = match &param.ty {
                    Some(ty) => self.resolve_type(ty, param.position),
                    None => Type::Any,
                };
                ParamSig {
                    name: param.name.clone(),
                    // `params int[] xs` collects into an array already.
                    ty,
                    has_default: param.default.is_some(),
                    variadic: param.variadic,
                }
            })
            .collect()
    }

    /// Signature of a declared function; `outer` holds enclosing type
    /// parameters already in scope.
    fn function_signature(&mut self, function: &FunctionDecl, outer: &[TypeParamInfo]) -> FunctionSig {
        let type_params = self.type_param_infos(&function.type_params);
        let mut visible = outer.to_vec();
        visible.extend(type_params.iter().cloned());
        self.type_params.push(visible);
        let params = self.param_signatures(&function.params);
        let ret = match &function.return_type {
            Some(ty) => self.resolve_type(ty, function.position),
            None => Type::Any,
        };
        self.type_params.pop();
        FunctionSig {
            name: function.name.clone(),
            type_params,
            params,
            ret,
            is_static: function.modifiers.is_static || function.operator.is_some(),
            is_abstract: function.modifiers.is_abstract,
            is_virtual: function.modifiers.is_virtual,
            is_override: function.modifiers.is_override,
        }
    }

    //=====================================================
    // Section 4: Type resolution
    //=====================================================

    fn type_param_in_scope(&self, name: &str) -> Option<&TypeParamInfo> {
        self.type_params
            .iter()
            .rev()
            .flat_map(|params| params.iter())
            .find(|param| param.name.as_str() == name)
    }

    fn resolve_type_quiet(&mut self, ty: &TypeExpr) -> Type {
        let before = self.diagnostics.len();
        let resolved = self.resolve_type(ty, Position::default());
        self.diagnostics.truncate(before);
        resolved
    }

    pub(crate) fn resolve_type(&mut self, ty: &TypeExpr, position: Position) -> Type {
        match ty {
            TypeExpr::Array(inner) => Type::array(self.resolve_type(inner, position)),
            TypeExpr::Nullable(inner) => Type::nullable(self.resolve_type(inner, position)),
            TypeExpr::Tuple(items) => Type::Tuple(
                items
                    .iter()
                    .map(|item| self.resolve_type(item, position))
                    .collect(),
            ),
            TypeExpr::Named { name, args } => self.resolve_named(name, args, position),
        }
    }

    fn resolve_named(&mut self, name: &Symbol, args: &[TypeExpr], position: Position) -> Type {
        if args.is_empty() {
            if let Some(primitive) = Type::primitive(name) {
                return primitive;
            }
            if self.type_param_in_scope(name).is_some() {
                return Type::TypeParam(name.clone());
            }
        }
        let resolved: Vec<Type> = args.iter().map(|arg| self.resolve_type(arg, position)).collect();
        match name.as_str() {
            "List" | "IList" | "IEnumerable" if resolved.len() == 1 => {
                return Type::array(resolved.into_iter().next().unwrap_or(Type::Any));
            }
            "Func" if !resolved.is_empty() => {
                let mut params = resolved;
                let ret = params.pop().unwrap_or(Type::Any);
                return Type::function(params, ret);
            }
            "Action" => return Type::function(resolved, Type::Void),
            _ => {}
        }
        if self.registry.enum_variants(name).is_some() {
            return Type::Int;
        }
        let Some(expected) = self.registry.class(name).map(|class| class.type_params.len()) else {
            self.report(
                TypeErrorKind::UndefinedSymbol,
                format!("unknown type '{name}'"),
                position,
            );
            return Type::Any;
        };
        if expected == 0 {
            if !resolved.is_empty() {
                self.report(
                    TypeErrorKind::ArityMismatch,
                    format!("type '{name}' takes no type arguments"),
                    position,
                );
            }
            return Type::User(name.clone());
        }
        let args = if resolved.is_empty() {
            vec![Type::Any; expected]
        } else if resolved.len() != expected {
            self.report(
                TypeErrorKind::ArityMismatch,
                format!(
                    "type '{name}' expects {expected} type arguments, found {}",
                    resolved.len()
                ),
                position,
            );
            vec![Type::Any; expected]
        } else {
            resolved
        };
        Type::Generic {
            name: name.clone(),
            args,
        }
    }

    //=====================================================
    // Section 5: Assignability and unification
    //=====================================================

    pub(crate) fn assignable(&self, from: &Type, to: &Type) -> bool {
        if from == to {
            return true;
        }
        match (from, to) {
            (Type::Any, _) | (_, Type::Any) => true,
            (Type::Null, Type::Nullable(_)) => true,
            (Type::Null, _) => false,
            (Type::Nullable(inner), Type::Nullable(target)) => self.assignable(inner, target),
            (Type::Nullable(_), _) => false,
            (_, Type::Nullable(target)) => self.assignable(from, target),
            (Type::Int, Type::Double | Type::Decimal)
            | (Type::Double, Type::Decimal)
            | (Type::Decimal, Type::Double)
            | (Type::Char, Type::Int) => true,
            (Type::Array(inner), Type::Array(target)) => self.assignable(inner, target),
            (Type::Tuple(items), Type::Tuple(targets)) => {
                items.len() == targets.len()
                    && items
                        .iter()
                        .zip(targets)
                        .all(|(item, target)| self.assignable(item, target))
            }
            (
                Type::Function { params, ret },
                Type::Function {
                    params: target_params,
                    ret: target_ret,
                },
            ) => {
                params.len() == target_params.len()
                    && target_params
                        .iter()
                        .zip(params)
                        .all(|(target, param)| self.assignable(target, param))
                    && (**target_ret == Type::Void || self.assignable(ret, target_ret))
            }
            (Type::TypeParam(name), _) => self.type_param_in_scope(name).is_some_and(|param| {
                param.constraints.iter().any(|constraint| match constraint {
                    ConstraintInfo::Type(bound) => self.assignable(bound, to),
                    _ => false,
                })
            }),
            (_, Type::User(name) | Type::Generic { name, .. }) if name.as_str() == "IComparable" => {
                matches!(
                    from,
                    Type::Int | Type::Double | Type::Decimal | Type::String | Type::Char | Type::Bool
                ) || self.registry.is_subtype(from, to)
            }
            (Type::User(_) | Type::Generic { .. }, Type::User(_) | Type::Generic { .. }) => {
                if self.registry.is_subtype(from, to) {
                    return true;
                }
                match (from, to) {
                    (
                        Type::Generic { name, args },
                        Type::Generic {
                            name: target,
                            args: target_args,
                        },
                    ) => {
                        name == target
                            && args.len() == target_args.len()
                            && args
                                .iter()
                                .zip(target_args)
                                .all(|(arg, target)| arg.is_any() || target.is_any() || arg == target)
                    }
                    _ => false,
                }
            }
            _ => false,
        }
    }

    /// Binds the function's type parameters found in `param` against the
    /// argument type. Returns false when the shapes conflict.
    fn unify(
        &self,
        param: &Type,
        arg: &Type,
        vars: &[TypeParamInfo],
        bindings: &mut HashMap<Symbol, Type>,
    ) -> bool {
        match param {
            Type::TypeParam(name) if vars.iter().any(|var| &var.name == name) => {
                if *arg == Type::Null {
                    return true;
                }
                match bindings.get(name).cloned() {
                    None => {
                        bindings.insert(name.clone(), arg.clone());
                        true
                    }
                    Some(bound) if self.assignable(arg, &bound) => true,
                    Some(bound) if self.assignable(&bound, arg) => {
                        bindings.insert(name.clone(), arg.clone());
                        true
                    }
                    Some(bound) => match Type::promote(&bound, arg) {
                        Some(wider) if bound.is_numeric() && arg.is_numeric() => {
                            bindings.insert(name.clone(), wider);
                            true
                        }
                        _ => false,
                    },
                }
            }
            Type::Array(inner) => match arg {
                Type::Array(arg_inner) => self.unify(inner, arg_inner, vars, bindings),
                _ => true,
            },
            Type::Nullable(inner) => match arg {
                Type::Nullable(arg_inner) => self.unify(inner, arg_inner, vars, bindings),
                other => self.unify(inner, other, vars, bindings),
            },
            Type::Generic { name, args } => match arg {
                Type::Generic {
                    name: arg_name,
                    args: arg_args,
                } if name == arg_name => args
                    .iter()
                    .zip(arg_args)
                    .all(|(param, arg)| self.unify(param, arg, vars, bindings)),
                _ => {
                    // A class implementing the generic interface binds
                    // through its ancestor list.
                    let ancestor = self.registry.ancestors(arg).into_iter().find(|ancestor| {
                        matches!(ancestor, Type::Generic { name: ancestor_name, .. } if ancestor_name == name)
                    });
                    match ancestor {
                        Some(ancestor) => self.unify(param, &ancestor, vars, bindings),
                        None => {
                            if name.as_str() == "IComparable" && (arg.is_value_type() || *arg == Type::String) {
                                if let Some(first) = args.first() {
                                    return self.unify(first, arg, vars, bindings);
                                }
                            }
                            true
                        }
                    }
                }
            },
            Type::Function { params, ret } => match arg {
                Type::Function {
                    params: arg_params,
                    ret: arg_ret,
                } => {
                    params
                        .iter()
                        .zip(arg_params)
                        .all(|(param, arg)| arg.is_any() || self.unify(param, arg, vars, bindings))
                        && self.unify(ret, arg_ret, vars, bindings)
                }
                _ => true,
            },
            Type::Tuple(items) => match arg {
                Type::Tuple(arg_items) => items
                    .iter()
                    .zip(arg_items)
                    .all(|(item, arg)| self.unify(item, arg, vars, bindings)),
                _ => true,
            },
            _ => true,
        }
    }

    /// Whether `ty` meets one `where` constraint under `bindings`.
    fn satisfies(&self, ty: &Type, constraint: &ConstraintInfo, bindings: &HashMap<Symbol, Type>) -> bool {
        if ty.is_any() {
            return true;
        }
        match constraint {
            ConstraintInfo::Class => !ty.is_value_type(),
            ConstraintInfo::Struct => ty.is_value_type(),
            ConstraintInfo::New => {
                if ty.is_value_type() {
                    return true;
                }
                match self.registry.class_of(ty) {
                    Some((class, _)) => {
                        !class.is_abstract
                            && !class.is_interface
                            && class.constructor.as_ref().is_none_or(|ctor| ctor.required() == 0)
                    }
                    None => false,
                }
            }
            ConstraintInfo::Type(bound) => self.assignable(ty, &bound.substitute(bindings)),
        }
    }

    fn check_constraints(
        &mut self,
        vars: &[TypeParamInfo],
        bindings: &HashMap<Symbol, Type>,
        position: Position,
        node: Option<NodeId>,
    ) {
        for var in vars {
            let Some(bound) = bindings.get(&var.name) else {
                continue;
            };
            for constraint in &var.constraints {
                if !self.satisfies(bound, constraint, bindings) {
                    let described = match constraint {
                        ConstraintInfo::Class => "class".to_string(),
                        ConstraintInfo::Struct => "struct".to_string(),
                        ConstraintInfo::New => "new()".to_string(),
                        ConstraintInfo::Type(ty) => ty.to_string(),
                    };
                    self.report_node(
                        TypeErrorKind::UnsatisfiedConstraint,
                        format!("type {bound} does not satisfy '{}: {described}'", var.name),
                        position,
                        node,
                    );
                }
            }
        }
    }

    //=====================================================
    // Section 6: Name lookup
    //=====================================================

    /// Variable, function or module member visible under `name`.
    fn lookup(&self, name: &str) -> Option<SymbolInfo> {
        if let Some(module) = &self.module {
            if let Some(info) = self.scopes.lookup(name) {
                if info.storage != Storage::Global && info.storage != Storage::Function {
                    return Some(info.clone());
                }
            }
            if let Some(info) = self.modules.get(module).and_then(|members| members.get(name)) {
                return Some(info.clone());
            }
        }
        self.scopes.lookup(name).cloned()
    }

    fn module_member(&self, module: &str, name: &str) -> Option<SymbolInfo> {
        self.modules.get(module).and_then(|members| members.get(name)).cloned()
    }

    fn is_module(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::tokenizer::tokenize;

    pub(super) fn diagnostics(source: &str) -> Vec<TypeError> {
        let tokens = tokenize(source).expect("lex");
        let program = parse(tokens).expect("parse");
        check(&program)
    }

    pub(super) fn kinds(source: &str) -> Vec<TypeErrorKind> {
        diagnostics(source).into_iter().map(|error| error.kind).collect()
    }

    #[test]
    fn string_initializer_for_int_is_one_mismatch() {
        assert_eq!(
            kinds("int x = \"not a number\";"),
            vec![TypeErrorKind::TypeMismatch]
        );
    }

    #[test]
    fn clean_program_has_no_diagnostics() {
        let source = "
            int add(int a, int b) { return a + b; }
            var total = add(1, 2);
            double scaled = total * 1.5;
        ";
        assert!(diagnostics(source).is_empty(), "{:?}", diagnostics(source));
    }

    #[test]
    fn unknown_type_is_undefined_symbol() {
        assert_eq!(kinds("Widget w = null;"), vec![TypeErrorKind::UndefinedSymbol]);
    }

    #[test]
    fn generic_arguments_unify_per_call() {
        let source = "
            T first<T>(T[] items) { return items[0]; }
            int a = first([1, 2, 3]);
            string b = first([\"x\"]);
        ";
        assert!(kinds(source).is_empty(), "{:?}", diagnostics(source));
        let bad = "
            T first<T>(T[] items) { return items[0]; }
            int a = first([\"x\"]);
        ";
        assert_eq!(kinds(bad), vec![TypeErrorKind::TypeMismatch]);
    }

    #[test]
    fn where_constraints_are_checked() {
        let source = "
            T make<T>() where T : new() { return new T(); }
            abstract class Shape { public abstract double Area(); }
            var s = make<Shape>();
        ";
        assert!(kinds(source).contains(&TypeErrorKind::UnsatisfiedConstraint));
        let value = "
            T pick<T>(T a) where T : class { return a; }
            var n = pick(3);
        ";
        assert_eq!(kinds(value), vec![TypeErrorKind::UnsatisfiedConstraint]);
    }

    #[test]
    fn unreachable_code_is_a_warning() {
        let errors = diagnostics("int f() { return 1; int y = 2; }");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, TypeErrorKind::UnreachableCode);
        assert_eq!(errors[0].severity(), Severity::Warning);
    }
}
