//=====================================================
// File: checker/registry.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: User type registry
// Objective: Member tables, signatures and subtype queries for classes,
//            interfaces and enums
//=====================================================

use std::collections::HashMap;
use std::rc::Rc;

use super::types::Type;
use crate::symbol::Symbol;
use crate::tokenizer::Position;

/// Exception classes the runtime raises on its own.
pub const BUILTIN_EXCEPTIONS: &[&str] = &[
    "Exception",
    "ArgumentException",
    "DivideByZeroException",
    "IndexOutOfRangeException",
    "InvalidCastException",
    "InvalidOperationException",
    "MatchFailureException",
    "NullReferenceException",
    "StackOverflowException",
];

#[derive(Debug, Clone, PartialEq)]
pub enum ConstraintInfo {
    Class,
    Struct,
    New,
    Type(Type),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeParamInfo {
    pub name: Symbol,
    pub constraints: Vec<ConstraintInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSig {
    pub name: Symbol,
    pub ty: Type,
    pub has_default: bool,
    pub variadic: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSig {
    pub name: Symbol,
    pub type_params: Vec<TypeParamInfo>,
    pub params: Vec<ParamSig>,
    pub ret: Type,
    pub is_static: bool,
    pub is_abstract: bool,
    pub is_virtual: bool,
    pub is_override: bool,
}

impl FunctionSig {
    pub fn required(&self) -> usize {
        self.params
            .iter()
            .filter(|param| !param.has_default && !param.variadic)
            .count()
    }

    pub fn is_variadic(&self) -> bool {
        self.params.last().is_some_and(|param| param.variadic)
    }

    pub fn as_type(&self) -> Type {
        Type::function(
            self.params.iter().map(|param| param.ty.clone()).collect(),
            self.ret.clone(),
        )
    }

    /// Same parameter and return types, ignoring names.
    pub fn same_shape(&self, other: &FunctionSig, bindings: &HashMap<Symbol, Type>) -> bool {
        self.params.len() == other.params.len()
            && self
                .params
                .iter()
                .zip(&other.params)
                .all(|(mine, theirs)| mine.ty == theirs.ty.substitute(bindings))
            && self.ret == other.ret.substitute(bindings)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub ty: Type,
    pub is_static: bool,
    pub is_const: bool,
}

#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub name: Symbol,
    pub type_params: Vec<Symbol>,
    pub base: Option<Type>,
    pub interfaces: Vec<Type>,
    pub fields: HashMap<Symbol, FieldInfo>,
    pub methods: HashMap<Symbol, Rc<FunctionSig>>,
    pub constructor: Option<Rc<FunctionSig>>,
    pub is_abstract: bool,
    pub is_interface: bool,
    pub position: Position,
}

impl ClassInfo {
    pub fn new(name: Symbol, position: Position) -> Self {
        Self {
            name,
            type_params: Vec::new(),
            base: None,
            interfaces: Vec::new(),
            fields: HashMap::new(),
            methods: HashMap::new(),
            constructor: None,
            is_abstract: false,
            is_interface: false,
            position,
        }
    }
}

/// Resolved member of a class type.
#[derive(Debug, Clone)]
pub enum Member {
    Field(FieldInfo),
    Method(Rc<FunctionSig>),
}

#[derive(Debug, Default)]
pub struct TypeRegistry {
    classes: HashMap<Symbol, ClassInfo>,
    enums: HashMap<Symbol, Vec<Symbol>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        let mut registry = Self::default();
        for name in BUILTIN_EXCEPTIONS {
            let mut class = ClassInfo::new(Symbol::from(*name), Position::default());
            if *name != "Exception" {
                class.base = Some(Type::User(Symbol::from("Exception")));
            }
            class.fields.insert(
                Symbol::from("Message"),
                FieldInfo {
                    ty: Type::String,
                    is_static: false,
                    is_const: false,
                },
            );
            class.constructor = Some(Rc::new(FunctionSig {
                name: Symbol::from(*name),
                type_params: Vec::new(),
                params: vec![ParamSig {
                    name: Symbol::from("message"),
                    ty: Type::String,
                    has_default: true,
                    variadic: false,
                }],
                ret: Type::Void,
                is_static: false,
                is_abstract: false,
                is_virtual: false,
                is_override: false,
            }));
            registry.classes.insert(class.name.clone(), class);
        }
        let mut comparable = ClassInfo::new(Symbol::from("IComparable"), Position::default());
        comparable.is_interface = true;
        comparable.type_params = vec![Symbol::from("T")];
        comparable.methods.insert(
            Symbol::from("CompareTo"),
            Rc::new(FunctionSig {
                name: Symbol::from("CompareTo"),
                type_params: Vec::new(),
                params: vec![ParamSig {
                    name: Symbol::from("other"),
                    ty: Type::TypeParam(Symbol::from("T")),
                    has_default: false,
                    variadic: false,
                }],
                ret: Type::Int,
                is_static: false,
                is_abstract: true,
                is_virtual: false,
                is_override: false,
            }),
        );
        registry.classes.insert(comparable.name.clone(), comparable);
        registry
    }

    pub fn is_builtin(name: &str) -> bool {
        BUILTIN_EXCEPTIONS.contains(&name) || name == "IComparable"
    }

    pub fn insert_class(&mut self, class: ClassInfo) {
        self.classes.insert(class.name.clone(), class);
    }

    pub fn class(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.get(name)
    }

    pub fn class_mut(&mut self, name: &str) -> Option<&mut ClassInfo> {
        self.classes.get_mut(name)
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassInfo> {
        self.classes.values()
    }

    pub fn insert_enum(&mut self, name: Symbol, variants: Vec<Symbol>) {
        self.enums.insert(name, variants);
    }

    pub fn enum_variants(&self, name: &str) -> Option<&[Symbol]> {
        self.enums.get(name).map(Vec::as_slice)
    }

    /// Class name and type-argument bindings behind an instance type.
    pub fn class_of(&self, ty: &Type) -> Option<(&ClassInfo, HashMap<Symbol, Type>)> {
        match ty {
            Type::User(name) => self.class(name).map(|class| (class, HashMap::new())),
            Type::Generic { name, args } => self.class(name).map(|class| {
                let bindings = class
                    .type_params
                    .iter()
                    .cloned()
                    .zip(args.iter().cloned())
                    .collect();
                (class, bindings)
            }),
            _ => None,
        }
    }

    /// Finds an instance or static member along the base chain and through
    /// implemented interfaces.
    pub fn member(&self, ty: &Type, name: &str) -> Option<Member> {
        let mut current = Some(ty.clone());
        let mut guard = 0;
        while let Some(ty) = current {
            guard += 1;
            if guard > 64 {
                return None;
            }
            let (class, bindings) = self.class_of(&ty)?;
            if let Some(field) = class.fields.get(name) {
                return Some(Member::Field(FieldInfo {
                    ty: field.ty.substitute(&bindings),
                    ..field.clone()
                }));
            }
            if let Some(method) = class.methods.get(name) {
                return Some(Member::Method(substitute_sig(method, &bindings)));
            }
            for interface in &class.interfaces {
                if let Some(member) = self.member(&interface.substitute(&bindings), name) {
                    return Some(member);
                }
            }
            current = class.base.as_ref().map(|base| base.substitute(&bindings));
        }
        None
    }

    /// Every ancestor type: base chain first, then interfaces.
    pub fn ancestors(&self, ty: &Type) -> Vec<Type> {
        let mut result = Vec::new();
        let mut pending = vec![ty.clone()];
        while let Some(next) = pending.pop() {
            if result.len() > 64 {
                break;
            }
            let Some((class, bindings)) = self.class_of(&next) else {
                continue;
            };
            if let Some(base) = &class.base {
                let base = base.substitute(&bindings);
                result.push(base.clone());
                pending.push(base);
            }
            for interface in &class.interfaces {
                let interface = interface.substitute(&bindings);
                result.push(interface.clone());
                pending.push(interface);
            }
        }
        result
    }

    pub fn is_subtype(&self, ty: &Type, target: &Type) -> bool {
        if ty == target {
            return true;
        }
        let target_name = match target {
            Type::User(name) | Type::Generic { name, .. } => name,
            _ => return false,
        };
        self.ancestors(ty).iter().any(|ancestor| match (ancestor, target) {
            (Type::Generic { .. }, Type::Generic { .. }) => ancestor == target,
            (Type::User(name) | Type::Generic { name, .. }, _) => name == target_name,
            _ => false,
        })
    }

    pub fn is_exception(&self, ty: &Type) -> bool {
        let exception = Type::User(Symbol::from("Exception"));
        ty.is_any() || self.is_subtype(ty, &exception)
    }

    /// Abstract members a concrete class still has to provide, with the
    /// bindings of the type that declared them.
    pub fn abstract_members(&self, ty: &Type) -> Vec<(Symbol, Rc<FunctionSig>, HashMap<Symbol, Type>)> {
        let mut result = Vec::new();
        for ancestor in self.ancestors(ty) {
            if let Some((class, bindings)) = self.class_of(&ancestor) {
                for (name, method) in &class.methods {
                    if method.is_abstract {
                        result.push((name.clone(), Rc::clone(method), bindings.clone()));
                    }
                }
            }
        }
        result
    }

    /// Concrete implementation of `name` on `ty` or its base classes.
    pub fn concrete_method(&self, ty: &Type, name: &str) -> Option<Rc<FunctionSig>> {
        let mut current = Some(ty.clone());
        let mut guard = 0;
        while let Some(ty) = current {
            guard += 1;
            if guard > 64 {
                return None;
            }
            let (class, bindings) = self.class_of(&ty)?;
            if class.is_interface {
                return None;
            }
            if let Some(method) = class.methods.get(name) {
                if !method.is_abstract {
                    return Some(substitute_sig(method, &bindings));
                }
            }
            current = class.base.as_ref().map(|base| base.substitute(&bindings));
        }
        None
    }
}

pub fn substitute_sig(sig: &Rc<FunctionSig>, bindings: &HashMap<Symbol, Type>) -> Rc<FunctionSig> {
    if bindings.is_empty() {
        return Rc::clone(sig);
    }
    let mut sig = (**sig).clone();
    for param in &mut sig.params {
        param.ty = param.ty.substitute(bindings);
    }
    sig.ret = sig.ret.substitute(bindings);
    Rc::new(sig)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_exceptions_derive_from_exception() {
        let registry = TypeRegistry::new();
        let divide = Type::User(Symbol::from("DivideByZeroException"));
        assert!(registry.is_exception(&divide));
        assert!(matches!(
            registry.member(&divide, "Message"),
            Some(Member::Field(FieldInfo { ty: Type::String, .. }))
        ));
    }

    #[test]
    fn subtype_walks_interfaces() {
        let mut registry = TypeRegistry::new();
        let mut shape = ClassInfo::new(Symbol::from("IShape"), Position::default());
        shape.is_interface = true;
        registry.insert_class(shape);
        let mut circle = ClassInfo::new(Symbol::from("Circle"), Position::default());
        circle.interfaces.push(Type::User(Symbol::from("IShape")));
        registry.insert_class(circle);
        assert!(registry.is_subtype(
            &Type::User(Symbol::from("Circle")),
            &Type::User(Symbol::from("IShape"))
        ));
        assert!(!registry.is_subtype(
            &Type::User(Symbol::from("IShape")),
            &Type::User(Symbol::from("Circle"))
        ));
    }
}
