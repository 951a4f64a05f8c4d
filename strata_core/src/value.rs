//=====================================================
// File: strata_core/src/value.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Runtime value model
// Objective: Dynamically typed values manipulated by the stack VM, together
//            with closures, upvalue cells and object instances
//=====================================================

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::vm::bytecode::Constant;

/// A value living on the VM operand stack.
///
/// Scalars are stored inline; strings are immutable shared slices and arrays,
/// closures and objects are reference counted so that copies alias.
#[derive(Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(Rc<str>),
    Array(Rc<RefCell<Vec<Value>>>),
    Closure(Rc<Closure>),
    Native(Rc<str>),
    Object(Rc<Object>),
}

/// Captured variable cell. Open cells point at a live stack slot, closed cells
/// own the value after the declaring scope ended.
#[derive(Debug, Clone)]
pub enum Upvalue {
    Open(usize),
    Closed(Value),
}

pub type UpvalueRef = Rc<RefCell<Upvalue>>;

pub struct Closure {
    pub function: u32,
    pub upvalues: Vec<UpvalueRef>,
}

/// Instance of a user class or of a built-in exception type.
pub struct Object {
    pub class: Rc<str>,
    pub fields: RefCell<HashMap<String, Value>>,
}

impl Object {
    pub fn new(class: impl Into<Rc<str>>) -> Self {
        Self {
            class: class.into(),
            fields: RefCell::new(HashMap::new()),
        }
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.fields.borrow().get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.fields.borrow_mut().insert(name.into(), value);
    }
}

impl Value {
    pub fn string(text: impl AsRef<str>) -> Self {
        Value::String(Rc::from(text.as_ref()))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn from_constant(constant: &Constant) -> Self {
        match constant {
            Constant::Null => Value::Null,
            Constant::Boolean(b) => Value::Boolean(*b),
            Constant::Integer(i) => Value::Integer(*i),
            Constant::Float(f) => Value::Float(*f),
            Constant::String(s) => Value::string(s),
        }
    }

    /// Inverse of [`Value::from_constant`] for values that fit in a constant pool.
    pub fn to_constant(&self) -> Option<Constant> {
        match self {
            Value::Null => Some(Constant::Null),
            Value::Boolean(b) => Some(Constant::Boolean(*b)),
            Value::Integer(i) => Some(Constant::Integer(*i)),
            Value::Float(f) => Some(Constant::Float(*f)),
            Value::String(s) => Some(Constant::String(s.to_string())),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "bool",
            Value::Integer(_) => "int",
            Value::Float(_) => "double",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Closure(_) | Value::Native(_) => "function",
            Value::Object(object) => &object.class,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Integer(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Integer(value) => Some(*value as f64),
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(value) => Some(*value),
            Value::Float(value) if value.fract() == 0.0 => Some(*value as i64),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Integer(a), Value::Float(b)) | (Value::Float(b), Value::Integer(a)) => {
                (*a as f64) == *b
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Native(a), Value::Native(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow()
            }
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Boolean(b) => write!(f, "Boolean({b})"),
            Value::Integer(i) => write!(f, "Integer({i})"),
            Value::Float(val) => write!(f, "Float({val})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Array(items) => f.debug_list().entries(items.borrow().iter()).finish(),
            Value::Closure(closure) => write!(f, "Closure(fn#{})", closure.function),
            Value::Native(name) => write!(f, "Native({name})"),
            Value::Object(object) => write!(f, "Object({})", object.class),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(val) => {
                if val.is_finite() && val.fract() == 0.0 && val.abs() < 1e15 {
                    write!(f, "{val:.1}")
                } else {
                    write!(f, "{val}")
                }
            }
            Value::String(s) => write!(f, "{s}"),
            Value::Array(items) => {
                write!(f, "[")?;
                for (index, item) in items.borrow().iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Closure(_) | Value::Native(_) => write!(f, "<function>"),
            Value::Object(object) => match object.get("Message") {
                Some(Value::String(message)) => write!(f, "{}: {message}", object.class),
                _ => write!(f, "<{}>", object.class),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_numeric_equality() {
        assert_eq!(Value::Integer(2), Value::Float(2.0));
        assert_ne!(Value::Integer(2), Value::string("2"));
    }

    #[test]
    fn arrays_alias_on_clone() {
        let array = Value::array(vec![Value::Integer(1)]);
        let alias = array.clone();
        if let Value::Array(items) = &alias {
            items.borrow_mut().push(Value::Integer(2));
        }
        assert_eq!(array.to_string(), "[1, 2]");
    }

    #[test]
    fn floats_display_with_fraction() {
        assert_eq!(Value::Float(3.0).to_string(), "3.0");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
    }
}
