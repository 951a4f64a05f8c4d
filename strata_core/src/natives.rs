//=====================================================
// File: strata_core/src/natives.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Native function bindings
// Objective: Registry of host functions callable from bytecode through
//            CallNative, including the default console and math set
//=====================================================

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use thiserror::Error;

use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NativeError {
    #[error("{name} expects {expected} argument(s), received {found}")]
    Arity {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("invalid argument: {0}")]
    Argument(String),
    #[error("io error: {0}")]
    Io(String),
}

/// Host state handed to a native call.
pub struct NativeContext<'a> {
    pub out: &'a mut dyn Write,
}

pub type NativeFn =
    Arc<dyn Fn(&mut NativeContext<'_>, &[Value]) -> Result<Value, NativeError> + Send + Sync>;

#[derive(Clone)]
pub struct NativeFunction {
    pub name: String,
    /// `None` accepts any number of arguments.
    pub arity: Option<usize>,
    /// Asynchronous natives suspend the VM; the host completes them.
    pub is_async: bool,
    pub func: NativeFn,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("is_async", &self.is_async)
            .finish()
    }
}

impl NativeFunction {
    pub fn call(&self, ctx: &mut NativeContext<'_>, args: &[Value]) -> Result<Value, NativeError> {
        if let Some(expected) = self.arity {
            if expected != args.len() {
                return Err(NativeError::Arity {
                    name: self.name.clone(),
                    expected,
                    found: args.len(),
                });
            }
        }
        (self.func)(ctx, args)
    }
}

#[derive(Debug, Clone, Default)]
pub struct NativeRegistry {
    functions: HashMap<String, NativeFunction>,
}

pub type SharedNatives = Arc<RwLock<NativeRegistry>>;

static DEFAULT_REGISTRY: Lazy<NativeRegistry> = Lazy::new(NativeRegistry::with_defaults);

/// Default natives, shared by the type checker (for signatures) and new VMs.
pub fn default_registry() -> &'static NativeRegistry {
    &DEFAULT_REGISTRY
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_fn("print", None, |ctx, args| write_values(ctx, args, false));
        registry.register_fn("println", None, |ctx, args| write_values(ctx, args, true));
        registry.register_fn("len", Some(1), |_, args| match &args[0] {
            Value::String(text) => Ok(Value::Integer(text.chars().count() as i64)),
            Value::Array(items) => Ok(Value::Integer(items.borrow().len() as i64)),
            other => Err(NativeError::Argument(format!(
                "len() is not defined for {}",
                other.type_name()
            ))),
        });
        registry.register_fn("sqrt", Some(1), |_, args| {
            Ok(Value::Float(number("sqrt", &args[0])?.sqrt()))
        });
        registry.register_fn("floor", Some(1), |_, args| {
            Ok(Value::Float(number("floor", &args[0])?.floor()))
        });
        registry.register_fn("ceil", Some(1), |_, args| {
            Ok(Value::Float(number("ceil", &args[0])?.ceil()))
        });
        registry.register_fn("round", Some(1), |_, args| {
            Ok(Value::Float(number("round", &args[0])?.round()))
        });
        registry.register_fn("abs", Some(1), |_, args| match &args[0] {
            Value::Integer(v) => Ok(Value::Integer(v.wrapping_abs())),
            other => Ok(Value::Float(number("abs", other)?.abs())),
        });
        registry.register_fn("pow", Some(2), |_, args| {
            crate::ops::binary(crate::ops::BinaryOp::Pow, &args[0], &args[1])
                .map_err(|err| NativeError::Argument(err.to_string()))
        });
        registry.register_fn("min", None, |_, args| fold_numbers("min", args, |a, b| {
            crate::ops::compare(b, a) == Some(std::cmp::Ordering::Less)
        }));
        registry.register_fn("max", None, |_, args| fold_numbers("max", args, |a, b| {
            crate::ops::compare(b, a) == Some(std::cmp::Ordering::Greater)
        }));
        registry.register_fn("sum", None, |_, args| {
            reduce_numbers("sum", args, Value::Integer(0), crate::ops::BinaryOp::Add)
        });
        registry.register_fn("product", None, |_, args| {
            reduce_numbers("product", args, Value::Integer(1), crate::ops::BinaryOp::Mul)
        });
        registry.register_fn("to_string", Some(1), |_, args| {
            Ok(Value::string(args[0].to_string()))
        });
        registry.register_fn("typeof", Some(1), |_, args| {
            Ok(Value::string(args[0].type_name()))
        });
        registry
    }

    pub fn register(&mut self, function: NativeFunction) {
        self.functions.insert(function.name.clone(), function);
    }

    pub fn register_fn<F>(&mut self, name: &str, arity: Option<usize>, func: F)
    where
        F: Fn(&mut NativeContext<'_>, &[Value]) -> Result<Value, NativeError>
            + Send
            + Sync
            + 'static,
    {
        self.register(NativeFunction {
            name: name.to_string(),
            arity,
            is_async: false,
            func: Arc::new(func),
        });
    }

    pub fn register_async<F>(&mut self, name: &str, arity: Option<usize>, func: F)
    where
        F: Fn(&mut NativeContext<'_>, &[Value]) -> Result<Value, NativeError>
            + Send
            + Sync
            + 'static,
    {
        self.register(NativeFunction {
            name: name.to_string(),
            arity,
            is_async: true,
            func: Arc::new(func),
        });
    }

    pub fn get(&self, name: &str) -> Option<&NativeFunction> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    pub fn into_shared(self) -> SharedNatives {
        Arc::new(RwLock::new(self))
    }
}

fn write_values(
    ctx: &mut NativeContext<'_>,
    args: &[Value],
    newline: bool,
) -> Result<Value, NativeError> {
    let text = args
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    let result = if newline {
        writeln!(ctx.out, "{text}")
    } else {
        write!(ctx.out, "{text}")
    };
    result.map_err(|err| NativeError::Io(err.to_string()))?;
    Ok(Value::Null)
}

fn number(name: &str, value: &Value) -> Result<f64, NativeError> {
    value.as_number().ok_or_else(|| {
        NativeError::Argument(format!("{name}() expects a number, found {}", value.type_name()))
    })
}

/// Arguments, or the elements of a single array argument.
fn spread(args: &[Value]) -> Vec<Value> {
    match args {
        [Value::Array(items)] => items.borrow().clone(),
        _ => args.to_vec(),
    }
}

fn fold_numbers(
    name: &str,
    args: &[Value],
    replaces: impl Fn(&Value, &Value) -> bool,
) -> Result<Value, NativeError> {
    let values = spread(args);
    let mut best: Option<Value> = None;
    for value in values {
        number(name, &value)?;
        best = match best {
            Some(current) if !replaces(&current, &value) => Some(current),
            _ => Some(value),
        };
    }
    best.ok_or_else(|| NativeError::Argument(format!("{name}() of an empty sequence")))
}

fn reduce_numbers(
    name: &str,
    args: &[Value],
    seed: Value,
    op: crate::ops::BinaryOp,
) -> Result<Value, NativeError> {
    let mut acc = seed;
    for value in spread(args) {
        number(name, &value)?;
        acc = crate::ops::binary(op, &acc, &value)
            .map_err(|err| NativeError::Argument(err.to_string()))?;
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[Value]) -> Result<Value, NativeError> {
        let mut sink = Vec::new();
        let mut ctx = NativeContext { out: &mut sink };
        default_registry()
            .get(name)
            .expect("native registered")
            .call(&mut ctx, args)
    }

    #[test]
    fn println_writes_to_context() {
        let mut sink = Vec::new();
        {
            let mut ctx = NativeContext { out: &mut sink };
            let println = default_registry().get("println").unwrap();
            println
                .call(&mut ctx, &[Value::string("hi"), Value::Integer(2)])
                .unwrap();
        }
        assert_eq!(String::from_utf8(sink).unwrap(), "hi 2\n");
    }

    #[test]
    fn sum_accepts_array_or_arguments() {
        let array = Value::array(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
        assert_eq!(call("sum", &[array]).unwrap(), Value::Integer(6));
        assert_eq!(
            call("sum", &[Value::Integer(1), Value::Float(0.5)]).unwrap(),
            Value::Float(1.5)
        );
    }

    #[test]
    fn max_picks_largest() {
        let value = call("max", &[Value::Integer(3), Value::Integer(9), Value::Integer(4)]).unwrap();
        assert_eq!(value, Value::Integer(9));
    }

    #[test]
    fn arity_is_enforced() {
        let err = call("sqrt", &[]).unwrap_err();
        assert!(matches!(err, NativeError::Arity { expected: 1, found: 0, .. }));
    }
}
