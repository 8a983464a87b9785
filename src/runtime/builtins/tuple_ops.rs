use crate::runtime::value::Value;

use super::helpers::{arg_int, arg_tuple, check_arity};

pub(super) fn builtin_tuple(args: &[Value]) -> Result<Value, String> {
    Ok(Value::tuple(args.to_vec()))
}

pub(super) fn builtin_len(args: &[Value]) -> Result<Value, String> {
    check_arity(args, 1, "len", "len(value)")?;
    match &args[0] {
        Value::Tuple(elements) => Ok(Value::Integer(elements.len() as i64)),
        Value::String(text) => Ok(Value::Integer(text.chars().count() as i64)),
        other => Err(super::helpers::type_error(
            "len",
            "argument",
            "Tuple or String",
            other.type_name(),
            "len(value)",
        )),
    }
}

pub(super) fn builtin_index(args: &[Value]) -> Result<Value, String> {
    check_arity(args, 2, "index", "index(tuple, i)")?;
    let elements = arg_tuple(args, 0, "index", "first argument", "index(tuple, i)")?;
    let i = arg_int(args, 1, "index", "second argument", "index(tuple, i)")?;
    usize::try_from(i)
        .ok()
        .and_then(|i| elements.get(i))
        .cloned()
        .ok_or_else(|| format!("index: {} out of range for tuple of {}", i, elements.len()))
}
