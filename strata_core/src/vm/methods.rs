//! Members available on built-in receivers (arrays and strings).

use std::cmp::Ordering;

use crate::ops;
use crate::value::Value;

use super::error::{VmError, VmErrorKind, VmResult};

fn int_arg(args: &[Value], index: usize, method: &str) -> VmResult<i64> {
    args.get(index).and_then(Value::as_integer).ok_or_else(|| {
        VmError::new(
            VmErrorKind::TypeCast,
            format!("{method} expects an integer argument"),
        )
    })
}

pub fn property(receiver: &Value, name: &str) -> Option<Value> {
    match (receiver, name) {
        (Value::Array(items), "Length" | "Count") => Some(Value::Integer(items.borrow().len() as i64)),
        (Value::String(text), "Length") => Some(Value::Integer(text.chars().count() as i64)),
        _ => None,
    }
}

/// Returns `Ok(None)` when the receiver has no built-in method `name`.
pub fn invoke(receiver: &Value, name: &str, args: &[Value]) -> VmResult<Option<Value>> {
    if name == "ToString" {
        return Ok(Some(Value::string(receiver.to_string())));
    }
    if name == "CompareTo" && !matches!(receiver, Value::Object(_)) {
        let other = args.first().unwrap_or(&Value::Null);
        let ordering = ops::compare(receiver, other).ok_or_else(|| {
            VmError::new(
                VmErrorKind::TypeCast,
                format!("cannot compare {} with {}", receiver.type_name(), other.type_name()),
            )
        })?;
        let result = match ordering {
            Ordering::Less => -1,
            Ordering::Equal => 0,
            Ordering::Greater => 1,
        };
        return Ok(Some(Value::Integer(result)));
    }
    match receiver {
        Value::Array(items) => {
            let result = match name {
                "Add" | "Push" => {
                    items.borrow_mut().extend(args.iter().cloned());
                    Value::Null
                }
                "Pop" => items.borrow_mut().pop().ok_or_else(|| {
                    VmError::new(VmErrorKind::IndexOutOfRange, "Pop on an empty array")
                })?,
                "Contains" => Value::Boolean(
                    args.first()
                        .map(|needle| items.borrow().contains(needle))
                        .unwrap_or(false),
                ),
                "IndexOf" => {
                    let position = args
                        .first()
                        .and_then(|needle| items.borrow().iter().position(|item| item == needle));
                    Value::Integer(position.map(|p| p as i64).unwrap_or(-1))
                }
                "Clear" => {
                    items.borrow_mut().clear();
                    Value::Null
                }
                _ => return Ok(None),
            };
            Ok(Some(result))
        }
        Value::String(text) => {
            let result = match name {
                "ToUpper" => Value::string(text.to_uppercase()),
                "ToLower" => Value::string(text.to_lowercase()),
                "Trim" => Value::string(text.trim()),
                "Contains" => match args.first() {
                    Some(Value::String(needle)) => Value::Boolean(text.contains(needle.as_ref())),
                    _ => Value::Boolean(false),
                },
                "IndexOf" => match args.first() {
                    Some(Value::String(needle)) => Value::Integer(
                        text.find(needle.as_ref())
                            .map(|byte| text[..byte].chars().count() as i64)
                            .unwrap_or(-1),
                    ),
                    _ => Value::Integer(-1),
                },
                "Substring" => {
                    let chars: Vec<char> = text.chars().collect();
                    let start = int_arg(args, 0, "Substring")?;
                    let len = if args.len() > 1 {
                        int_arg(args, 1, "Substring")?
                    } else {
                        chars.len() as i64 - start
                    };
                    if start < 0 || len < 0 || (start + len) as usize > chars.len() {
                        return Err(VmError::new(
                            VmErrorKind::IndexOutOfRange,
                            format!("Substring({start}, {len}) outside string of length {}", chars.len()),
                        ));
                    }
                    let start = start as usize;
                    Value::string(chars[start..start + len as usize].iter().collect::<String>())
                }
                _ => return Ok(None),
            };
            Ok(Some(result))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_push_and_count() {
        let array = Value::array(Vec::new());
        invoke(&array, "Add", &[Value::Integer(4)]).unwrap();
        assert_eq!(property(&array, "Count"), Some(Value::Integer(1)));
    }

    #[test]
    fn substring_out_of_range_faults() {
        let text = Value::string("abc");
        let err = invoke(&text, "Substring", &[Value::Integer(2), Value::Integer(5)]).unwrap_err();
        assert_eq!(err.kind, VmErrorKind::IndexOutOfRange);
        let ok = invoke(&text, "Substring", &[Value::Integer(1)]).unwrap();
        assert_eq!(ok, Some(Value::string("bc")));
    }

    #[test]
    fn compare_to_orders_primitives() {
        let result = invoke(&Value::Integer(3), "CompareTo", &[Value::Integer(7)]).unwrap();
        assert_eq!(result, Some(Value::Integer(-1)));
        let result = invoke(&Value::string("b"), "CompareTo", &[Value::string("a")]).unwrap();
        assert_eq!(result, Some(Value::Integer(1)));
    }

    #[test]
    fn unknown_method_is_none() {
        assert!(invoke(&Value::Integer(1), "Add", &[]).unwrap().is_none());
    }
}
