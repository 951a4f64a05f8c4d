//=====================================================
// File: checker/types.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Static type representation
// Objective: Structural type values, substitution and joins used by the
//            checker
//=====================================================

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::symbol::Symbol;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Type {
    Int,
    Double,
    Decimal,
    String,
    Char,
    Bool,
    Void,
    Null,
    /// Unknown or dynamically typed; compatible with everything.
    Any,
    Array(Box<Type>),
    Generic { name: Symbol, args: Vec<Type> },
    Function { params: Vec<Type>, ret: Box<Type> },
    Nullable(Box<Type>),
    User(Symbol),
    TypeParam(Symbol),
    Tuple(Vec<Type>),
}

impl Type {
    pub fn array(element: Type) -> Self {
        Type::Array(Box::new(element))
    }

    pub fn nullable(inner: Type) -> Self {
        match inner {
            Type::Nullable(_) | Type::Any | Type::Null => inner,
            other => Type::Nullable(Box::new(other)),
        }
    }

    pub fn function(params: Vec<Type>, ret: Type) -> Self {
        Type::Function {
            params,
            ret: Box::new(ret),
        }
    }

    /// Type named by a built-in type keyword.
    pub fn primitive(name: &str) -> Option<Self> {
        let ty = match name {
            "int" => Type::Int,
            "double" => Type::Double,
            "decimal" => Type::Decimal,
            "string" => Type::String,
            "char" => Type::Char,
            "bool" => Type::Bool,
            "void" => Type::Void,
            "object" | "dynamic" => Type::Any,
            _ => return None,
        };
        Some(ty)
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Type::Any)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Int | Type::Double | Type::Decimal)
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, Type::Nullable(_))
    }

    /// Value types cannot be null without a `?` wrapper.
    pub fn is_value_type(&self) -> bool {
        matches!(
            self,
            Type::Int | Type::Double | Type::Decimal | Type::Char | Type::Bool
        )
    }

    pub fn non_null(&self) -> Type {
        match self {
            Type::Nullable(inner) => (**inner).clone(),
            other => other.clone(),
        }
    }

    /// Element type produced by iterating a value of this type.
    pub fn element(&self) -> Option<Type> {
        match self {
            Type::Array(inner) => Some((**inner).clone()),
            Type::String => Some(Type::Char),
            Type::Any => Some(Type::Any),
            _ => None,
        }
    }

    pub fn contains_type_param(&self) -> bool {
        match self {
            Type::TypeParam(_) => true,
            Type::Array(inner) | Type::Nullable(inner) => inner.contains_type_param(),
            Type::Generic { args, .. } | Type::Tuple(args) => {
                args.iter().any(Type::contains_type_param)
            }
            Type::Function { params, ret } => {
                params.iter().any(Type::contains_type_param) || ret.contains_type_param()
            }
            _ => false,
        }
    }

    /// Replaces bound type parameters.
    pub fn substitute(&self, bindings: &HashMap<Symbol, Type>) -> Type {
        if bindings.is_empty() {
            return self.clone();
        }
        match self {
            Type::TypeParam(name) => bindings.get(name).cloned().unwrap_or_else(|| self.clone()),
            Type::Array(inner) => Type::array(inner.substitute(bindings)),
            Type::Nullable(inner) => Type::nullable(inner.substitute(bindings)),
            Type::Generic { name, args } => Type::Generic {
                name: name.clone(),
                args: args.iter().map(|arg| arg.substitute(bindings)).collect(),
            },
            Type::Tuple(items) => Type::Tuple(items.iter().map(|item| item.substitute(bindings)).collect()),
            Type::Function { params, ret } => Type::function(
                params.iter().map(|param| param.substitute(bindings)).collect(),
                ret.substitute(bindings),
            ),
            other => other.clone(),
        }
    }

    /// Result type of arithmetic between two numeric types.
    pub fn promote(left: &Type, right: &Type) -> Option<Type> {
        match (left, right) {
            (Type::Any, _) | (_, Type::Any) => Some(Type::Any),
            (Type::Decimal, other) | (other, Type::Decimal) if other.is_numeric() || *other == Type::Char => {
                Some(Type::Decimal)
            }
            (Type::Double, other) | (other, Type::Double) if other.is_numeric() || *other == Type::Char => {
                Some(Type::Double)
            }
            (Type::Int | Type::Char, Type::Int | Type::Char) => Some(Type::Int),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => f.write_str("int"),
            Type::Double => f.write_str("double"),
            Type::Decimal => f.write_str("decimal"),
            Type::String => f.write_str("string"),
            Type::Char => f.write_str("char"),
            Type::Bool => f.write_str("bool"),
            Type::Void => f.write_str("void"),
            Type::Null => f.write_str("null"),
            Type::Any => f.write_str("object"),
            Type::Array(inner) => write!(f, "{inner}[]"),
            Type::Nullable(inner) => write!(f, "{inner}?"),
            Type::User(name) | Type::TypeParam(name) => write!(f, "{name}"),
            Type::Generic { name, args } => {
                let args: Vec<String> = args.iter().map(ToString::to_string).collect();
                write!(f, "{name}<{}>", args.join(", "))
            }
            Type::Tuple(items) => {
                let items: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "({})", items.join(", "))
            }
            Type::Function { params, ret } => {
                let params: Vec<String> = params.iter().map(ToString::to_string).collect();
                write!(f, "({}) => {ret}", params.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_widens_to_the_larger_numeric_type() {
        assert_eq!(Type::promote(&Type::Int, &Type::Int), Some(Type::Int));
        assert_eq!(Type::promote(&Type::Int, &Type::Double), Some(Type::Double));
        assert_eq!(Type::promote(&Type::Decimal, &Type::Double), Some(Type::Decimal));
        assert_eq!(Type::promote(&Type::String, &Type::Int), None);
    }

    #[test]
    fn substitution_reaches_nested_parameters() {
        let ty = Type::array(Type::nullable(Type::TypeParam(Symbol::from("T"))));
        let bindings = HashMap::from([(Symbol::from("T"), Type::Int)]);
        assert_eq!(ty.substitute(&bindings), Type::array(Type::nullable(Type::Int)));
        assert!(ty.contains_type_param());
    }

    #[test]
    fn nullable_does_not_double_wrap() {
        let once = Type::nullable(Type::String);
        assert_eq!(Type::nullable(once.clone()), once);
        assert_eq!(once.to_string(), "string?");
    }
}
